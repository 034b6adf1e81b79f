//! Post-hydration text layout correction.
//!
//! The raster backend measures text with the faces available at scene
//! construction, which predates remote font registration. After hydration
//! each text node gets its font family re-applied so the line records are
//! rebuilt against the registered face, and two metric repairs are applied:
//! a single surviving line gets the node's original literal text back, and
//! every line's width is over-allocated to twice the node's nominal width so
//! under-measured lines cannot clip.

use crate::stage::{FontBook, Stage};

pub fn correct_text_layout(stage: &mut Stage, fonts: &FontBook) {
    stage.for_each_text_mut(&mut |node| {
        let family = node.font_family.clone();
        node.apply_font_family(&family, fonts);

        if node.lines.len() == 1 {
            node.lines[0].text = node.text.clone();
        }
        for line in &mut node.lines {
            line.width = node.width * 2.0;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stage_with_text(attrs: serde_json::Value) -> Stage {
        let doc = json!({
            "attrs": { "width": 400, "height": 200 },
            "className": "Stage",
            "children": [
                { "attrs": {}, "className": "Layer", "children": [
                    { "className": "Text", "attrs": attrs }
                ] }
            ]
        });
        Stage::build(&doc, &FontBook::new()).expect("stage")
    }

    #[test]
    fn single_line_text_is_restored_verbatim() {
        let fonts = FontBook::new();
        let mut stage = stage_with_text(json!({ "text": "hello", "width": 300 }));

        // Simulate the backend mangling a single-line node's content.
        stage.for_each_text_mut(&mut |node| {
            assert_eq!(node.lines.len(), 1);
            node.lines[0].text = "hel…".to_string();
        });

        correct_text_layout(&mut stage, &fonts);

        stage.for_each_text(&mut |node| {
            assert_eq!(node.lines.len(), 1);
            assert_eq!(node.lines[0].text, "hello");
            assert_eq!(node.lines[0].width, 600.0);
        });
    }

    #[test]
    fn every_line_width_is_doubled() {
        let fonts = FontBook::new();
        let mut stage = stage_with_text(json!({
            "text": "first line\nsecond line\nthird line",
            "width": 250
        }));

        correct_text_layout(&mut stage, &fonts);

        stage.for_each_text(&mut |node| {
            assert!(node.lines.len() >= 3);
            for line in &node.lines {
                assert_eq!(line.width, 500.0);
            }
            // Multi-line nodes keep their wrapped content.
            assert_eq!(node.lines[0].text, "first line");
        });
    }
}
