//! Scene tree construction and rasterization.
//!
//! The stage is the live counterpart of a scene document: a typed node tree
//! with text metrics computed at construction time. Rasterization serializes
//! the tree to SVG and renders it through usvg/resvg against the request's
//! font database, so fonts registered during hydration take effect on the
//! final bitmap.

use crate::fonts::StyleSpec;
use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;
use std::fmt::Write as _;
use std::path::Path;

/// Fallback advance width, in em, for characters the selected face cannot
/// resolve (and for documents rendered with no usable face at all).
const FALLBACK_CHAR_EM: f32 = 0.6;

/// The font database one render request draws from.
///
/// Seeded with the system fonts so unresolved families still rasterize with
/// a substitute face; remote fonts are registered into it as they resolve.
pub struct FontBook {
    db: fontdb::Database,
}

impl FontBook {
    pub fn new() -> Self {
        let mut db = fontdb::Database::new();
        db.load_system_fonts();

        let families: Vec<String> = db
            .faces()
            .filter_map(|face| face.families.first().map(|(name, _)| name.clone()))
            .collect();

        // Prefer a metric-compatible sans face as the generic fallback.
        for family in ["Arial", "Helvetica", "Liberation Sans", "DejaVu Sans"] {
            if families.iter().any(|f| f.as_str() == family) {
                db.set_sans_serif_family(family);
                break;
            }
        }

        Self { db }
    }

    /// Register a downloaded font file.
    pub fn register_file(&mut self, path: &Path) -> Result<()> {
        self.db.load_font_file(path).map_err(|e| {
            Error::FontError(format!("Failed to load font file {}: {e}", path.display()))
        })?;
        Ok(())
    }

    /// Register raw font bytes (fallback when the file could not be persisted).
    pub fn register_data(&mut self, data: Vec<u8>) {
        self.db.load_font_data(data);
    }

    pub fn database(&self) -> &fontdb::Database {
        &self.db
    }

    /// Width of `text` in the face matching `family` and `spec`, falling back
    /// to a flat per-character estimate when no face matches.
    pub fn measure(&self, text: &str, family: &str, spec: &StyleSpec, size: f32) -> f32 {
        let query = fontdb::Query {
            families: &[fontdb::Family::Name(family), fontdb::Family::SansSerif],
            weight: fontdb::Weight(spec.weight_value()),
            stretch: fontdb::Stretch::Normal,
            style: if spec.is_italic() {
                fontdb::Style::Italic
            } else {
                fontdb::Style::Normal
            },
        };

        if let Some(id) = self.db.query(&query) {
            let measured = self.db.with_face_data(id, |data, index| {
                let face = ttf_parser::Face::parse(data, index).ok()?;
                let upem = face.units_per_em() as f32;
                let units: f32 = text
                    .chars()
                    .map(|ch| {
                        face.glyph_index(ch)
                            .and_then(|glyph| face.glyph_hor_advance(glyph))
                            .map(f32::from)
                            .unwrap_or(upem * FALLBACK_CHAR_EM)
                    })
                    .sum();
                Some(units * size / upem)
            });
            if let Some(Some(width)) = measured {
                return width;
            }
        }

        text.chars().count() as f32 * size * FALLBACK_CHAR_EM
    }
}

impl Default for FontBook {
    fn default() -> Self {
        Self::new()
    }
}

/// One wrapped (or explicit) line of a text node.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub text: String,
    pub width: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone)]
pub struct RectNode {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub fill: Option<String>,
    pub stroke: Option<String>,
    pub stroke_width: f64,
    pub corner_radius: f64,
    pub opacity: f64,
}

#[derive(Debug, Clone)]
pub struct CircleNode {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub fill: Option<String>,
    pub stroke: Option<String>,
    pub stroke_width: f64,
    pub opacity: f64,
}

#[derive(Debug, Clone)]
pub struct TextNode {
    pub x: f64,
    pub y: f64,
    /// Nominal layout width from the document, not the measured extent.
    pub width: f64,
    pub text: String,
    pub font_family: String,
    pub font_style: String,
    pub font_size: f64,
    pub line_height: f64,
    pub align: Align,
    pub fill: Option<String>,
    pub lines: Vec<Line>,
}

#[derive(Debug, Clone)]
pub struct ImageNode {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub media: Option<Value>,
    pub opacity: f64,
    /// Bound during hydration; request-lifetime only.
    pub bitmap: Option<image::DynamicImage>,
}

#[derive(Debug, Clone)]
pub struct GroupNode {
    pub children: Vec<SceneNode>,
}

#[derive(Debug, Clone)]
pub enum SceneNode {
    Group(GroupNode),
    Rect(RectNode),
    Circle(CircleNode),
    Text(TextNode),
    Image(ImageNode),
}

impl TextNode {
    /// Recompute the wrapped line records against the current font database.
    pub fn recompute_lines(&mut self, fonts: &FontBook) {
        let spec = StyleSpec::parse(&self.font_style);
        self.lines = wrap_text(
            &self.text,
            self.width,
            self.font_size,
            &self.font_family,
            &spec,
            fonts,
        );
    }

    /// Re-apply a font family, forcing the line records to be rebuilt with
    /// whatever face that family resolves to now.
    pub fn apply_font_family(&mut self, family: &str, fonts: &FontBook) {
        self.font_family = family.to_string();
        self.recompute_lines(fonts);
    }
}

fn wrap_text(
    text: &str,
    max_width: f64,
    size: f64,
    family: &str,
    spec: &StyleSpec,
    fonts: &FontBook,
) -> Vec<Line> {
    let mut lines = Vec::new();
    let measure = |s: &str| fonts.measure(s, family, spec, size as f32) as f64;

    for paragraph in text.split('\n') {
        if paragraph.trim().is_empty() {
            lines.push(Line {
                text: String::new(),
                width: 0.0,
            });
            continue;
        }

        if max_width <= 0.0 {
            lines.push(Line {
                text: paragraph.to_string(),
                width: measure(paragraph),
            });
            continue;
        }

        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{current} {word}")
            };
            if !current.is_empty() && measure(&candidate) > max_width {
                lines.push(Line {
                    width: measure(&current),
                    text: std::mem::take(&mut current),
                });
                current = word.to_string();
            } else {
                current = candidate;
            }
        }
        if !current.is_empty() {
            lines.push(Line {
                width: measure(&current),
                text: current,
            });
        }
    }

    if lines.is_empty() {
        lines.push(Line {
            text: String::new(),
            width: 0.0,
        });
    }
    lines
}

/// The live scene tree for one render request.
#[derive(Debug, Clone)]
pub struct Stage {
    pub width: f64,
    pub height: f64,
    nodes: Vec<SceneNode>,
}

impl Stage {
    /// Build the scene tree from a pre-processed document.
    ///
    /// Text metrics are computed here with whatever faces the font database
    /// holds at this point; hydration re-measures after remote fonts land.
    pub fn build(document: &Value, fonts: &FontBook) -> Result<Stage> {
        let attrs = document.get("attrs").cloned().unwrap_or(Value::Null);
        let width = attrs.get("width").and_then(Value::as_f64).unwrap_or(0.0);
        let height = attrs.get("height").and_then(Value::as_f64).unwrap_or(0.0);
        if width <= 0.0 || height <= 0.0 {
            return Err(Error::SceneError(format!(
                "stage requires positive width and height, got {width}x{height}"
            )));
        }

        let mut nodes = Vec::new();
        if let Some(children) = document.get("children").and_then(Value::as_array) {
            for child in children {
                if let Some(node) = parse_node(child, fonts) {
                    nodes.push(node);
                }
            }
        }

        Ok(Stage {
            width,
            height,
            nodes,
        })
    }

    pub fn for_each_text(&self, f: &mut dyn FnMut(&TextNode)) {
        visit(&self.nodes, &mut |node| {
            if let SceneNode::Text(text) = node {
                f(text);
            }
        });
    }

    pub fn for_each_text_mut(&mut self, f: &mut dyn FnMut(&mut TextNode)) {
        visit_mut(&mut self.nodes, &mut |node| {
            if let SceneNode::Text(text) = node {
                f(text);
            }
        });
    }

    pub fn for_each_image(&self, f: &mut dyn FnMut(&ImageNode)) {
        visit(&self.nodes, &mut |node| {
            if let SceneNode::Image(img) = node {
                f(img);
            }
        });
    }

    pub fn for_each_image_mut(&mut self, f: &mut dyn FnMut(&mut ImageNode)) {
        visit_mut(&mut self.nodes, &mut |node| {
            if let SceneNode::Image(img) = node {
                f(img);
            }
        });
    }

    /// Serialize the corrected tree to an SVG fragment the raster backend
    /// understands. Hydrated bitmaps are embedded as data URLs.
    pub fn to_svg(&self) -> String {
        let mut svg = String::new();
        let _ = write!(
            svg,
            "<svg xmlns=\"http://www.w3.org/2000/svg\" xmlns:xlink=\"http://www.w3.org/1999/xlink\" width=\"{w}\" height=\"{h}\" viewBox=\"0 0 {w} {h}\">",
            w = self.width,
            h = self.height
        );
        for node in &self.nodes {
            node_svg(&mut svg, node);
        }
        svg.push_str("</svg>");
        svg
    }

    /// Rasterize the tree into encoded PNG bytes.
    pub fn rasterize(&self, fonts: &FontBook) -> Result<Vec<u8>> {
        let svg = self.to_svg();

        let mut opt = usvg::Options::default();
        opt.font_family = "Arial".to_string();
        *opt.fontdb_mut() = fonts.database().clone();

        let tree = usvg::Tree::from_str(&svg, &opt)
            .map_err(|e| Error::RenderError(format!("Failed to parse scene SVG: {e}")))?;

        let size = tree.size().to_int_size();
        let mut pixmap = resvg::tiny_skia::Pixmap::new(size.width(), size.height())
            .ok_or_else(|| Error::RenderError("Failed to allocate pixmap".into()))?;

        resvg::render(
            &tree,
            resvg::tiny_skia::Transform::default(),
            &mut pixmap.as_mut(),
        );

        pixmap
            .encode_png()
            .map_err(|e| Error::RenderError(format!("Failed to encode PNG: {e}")))
    }
}

fn visit<'a>(nodes: &'a [SceneNode], f: &mut dyn FnMut(&'a SceneNode)) {
    for node in nodes {
        match node {
            SceneNode::Group(group) => visit(&group.children, f),
            other => f(other),
        }
    }
}

fn visit_mut(nodes: &mut [SceneNode], f: &mut dyn FnMut(&mut SceneNode)) {
    for node in nodes {
        match node {
            SceneNode::Group(group) => visit_mut(&mut group.children, f),
            other => f(other),
        }
    }
}

fn f64_attr(attrs: &Value, key: &str, default: f64) -> f64 {
    attrs.get(key).and_then(Value::as_f64).unwrap_or(default)
}

fn string_attr(attrs: &Value, key: &str) -> Option<String> {
    attrs.get(key).and_then(Value::as_str).map(str::to_string)
}

fn parse_node(node: &Value, fonts: &FontBook) -> Option<SceneNode> {
    let class = node.get("className").and_then(Value::as_str).unwrap_or("");
    let attrs = node.get("attrs").cloned().unwrap_or(Value::Null);

    match class {
        "Layer" | "Group" => {
            let mut children = Vec::new();
            if let Some(kids) = node.get("children").and_then(Value::as_array) {
                for kid in kids {
                    if let Some(parsed) = parse_node(kid, fonts) {
                        children.push(parsed);
                    }
                }
            }
            Some(SceneNode::Group(GroupNode { children }))
        }
        "Rect" => Some(SceneNode::Rect(RectNode {
            x: f64_attr(&attrs, "x", 0.0),
            y: f64_attr(&attrs, "y", 0.0),
            width: f64_attr(&attrs, "width", 0.0),
            height: f64_attr(&attrs, "height", 0.0),
            fill: string_attr(&attrs, "fill"),
            stroke: string_attr(&attrs, "stroke"),
            stroke_width: f64_attr(&attrs, "strokeWidth", 0.0),
            corner_radius: f64_attr(&attrs, "cornerRadius", 0.0),
            opacity: f64_attr(&attrs, "opacity", 1.0),
        })),
        "Circle" => Some(SceneNode::Circle(CircleNode {
            x: f64_attr(&attrs, "x", 0.0),
            y: f64_attr(&attrs, "y", 0.0),
            radius: f64_attr(&attrs, "radius", 0.0),
            fill: string_attr(&attrs, "fill"),
            stroke: string_attr(&attrs, "stroke"),
            stroke_width: f64_attr(&attrs, "strokeWidth", 0.0),
            opacity: f64_attr(&attrs, "opacity", 1.0),
        })),
        "Text" => {
            let mut text = TextNode {
                x: f64_attr(&attrs, "x", 0.0),
                y: f64_attr(&attrs, "y", 0.0),
                width: f64_attr(&attrs, "width", 0.0),
                text: string_attr(&attrs, "text").unwrap_or_default(),
                font_family: string_attr(&attrs, "fontFamily")
                    .unwrap_or_else(|| "Arial".to_string()),
                font_style: string_attr(&attrs, "fontStyle").unwrap_or_else(|| "400".to_string()),
                font_size: f64_attr(&attrs, "fontSize", 12.0),
                line_height: f64_attr(&attrs, "lineHeight", 1.0),
                align: match string_attr(&attrs, "align").as_deref() {
                    Some("center") => Align::Center,
                    Some("right") => Align::Right,
                    _ => Align::Left,
                },
                fill: string_attr(&attrs, "fill"),
                lines: Vec::new(),
            };
            text.recompute_lines(fonts);
            Some(SceneNode::Text(text))
        }
        "Image" => Some(SceneNode::Image(ImageNode {
            x: f64_attr(&attrs, "x", 0.0),
            y: f64_attr(&attrs, "y", 0.0),
            width: f64_attr(&attrs, "width", 0.0),
            height: f64_attr(&attrs, "height", 0.0),
            media: attrs.get("media").cloned(),
            opacity: f64_attr(&attrs, "opacity", 1.0),
            bitmap: None,
        })),
        _ => None,
    }
}

fn opacity_attr(svg: &mut String, opacity: f64) {
    if opacity < 1.0 {
        let _ = write!(svg, " opacity=\"{opacity}\"");
    }
}

fn paint_attrs(svg: &mut String, fill: &Option<String>, stroke: &Option<String>, stroke_width: f64) {
    match fill {
        Some(fill) => {
            let _ = write!(svg, " fill=\"{}\"", escape_xml(fill));
        }
        None => svg.push_str(" fill=\"none\""),
    }
    if let Some(stroke) = stroke {
        let _ = write!(
            svg,
            " stroke=\"{}\" stroke-width=\"{}\"",
            escape_xml(stroke),
            if stroke_width > 0.0 { stroke_width } else { 1.0 }
        );
    }
}

fn node_svg(svg: &mut String, node: &SceneNode) {
    match node {
        SceneNode::Group(group) => {
            for child in &group.children {
                node_svg(svg, child);
            }
        }
        SceneNode::Rect(rect) => {
            let _ = write!(
                svg,
                "<rect x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\"",
                rect.x, rect.y, rect.width, rect.height
            );
            if rect.corner_radius > 0.0 {
                let _ = write!(
                    svg,
                    " rx=\"{r}\" ry=\"{r}\"",
                    r = rect.corner_radius
                );
            }
            paint_attrs(svg, &rect.fill, &rect.stroke, rect.stroke_width);
            opacity_attr(svg, rect.opacity);
            svg.push_str("/>");
        }
        SceneNode::Circle(circle) => {
            let _ = write!(
                svg,
                "<circle cx=\"{}\" cy=\"{}\" r=\"{}\"",
                circle.x, circle.y, circle.radius
            );
            paint_attrs(svg, &circle.fill, &circle.stroke, circle.stroke_width);
            opacity_attr(svg, circle.opacity);
            svg.push_str("/>");
        }
        SceneNode::Text(text) => text_svg(svg, text),
        SceneNode::Image(img) => image_svg(svg, img),
    }
}

fn text_svg(svg: &mut String, node: &TextNode) {
    let (anchor, anchor_x) = match node.align {
        Align::Left => ("start", node.x),
        Align::Center => ("middle", node.x + node.width / 2.0),
        Align::Right => ("end", node.x + node.width),
    };

    let _ = write!(
        svg,
        "<text x=\"{x:.2}\" y=\"{y:.2}\" text-anchor=\"{anchor}\" font-family=\"{family}\" font-size=\"{size}\"",
        x = anchor_x,
        // First baseline sits roughly a cap height below the node origin.
        y = node.y + node.font_size * 0.8,
        family = escape_xml(&node.font_family),
        size = node.font_size,
    );

    let spec = StyleSpec::parse(&node.font_style);
    let _ = write!(svg, " font-weight=\"{}\"", spec.weight_value());
    if spec.is_italic() {
        svg.push_str(" font-style=\"italic\"");
    }
    if let Some(fill) = &node.fill {
        let _ = write!(svg, " fill=\"{}\"", escape_xml(fill));
    }
    svg.push('>');

    for (idx, line) in node.lines.iter().enumerate() {
        let dy = if idx == 0 {
            0.0
        } else {
            node.font_size * node.line_height
        };
        let _ = write!(
            svg,
            "<tspan x=\"{anchor_x:.2}\" dy=\"{dy:.2}\">{}</tspan>",
            escape_xml(&line.text)
        );
    }
    svg.push_str("</text>");
}

fn image_svg(svg: &mut String, node: &ImageNode) {
    // Nodes that never hydrated render as an empty area.
    let Some(bitmap) = &node.bitmap else {
        return;
    };

    let mut png = Vec::new();
    if bitmap
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .is_err()
    {
        return;
    }

    let width = if node.width > 0.0 {
        node.width
    } else {
        f64::from(bitmap.width())
    };
    let height = if node.height > 0.0 {
        node.height
    } else {
        f64::from(bitmap.height())
    };

    let _ = write!(
        svg,
        "<image x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" preserveAspectRatio=\"none\"",
        node.x, node.y, width, height
    );
    opacity_attr(svg, node.opacity);
    let _ = write!(svg, " xlink:href=\"data:image/png;base64,{}\"/>", BASE64.encode(&png));
}

fn escape_xml(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stage_doc(children: Value) -> Value {
        json!({
            "attrs": { "width": 200, "height": 100 },
            "className": "Stage",
            "children": [
                { "attrs": {}, "className": "Layer", "children": children }
            ]
        })
    }

    #[test]
    fn build_requires_stage_dimensions() {
        let fonts = FontBook::new();
        let doc = json!({ "attrs": { "width": 0 }, "children": [] });
        assert!(Stage::build(&doc, &fonts).is_err());
    }

    #[test]
    fn build_collects_typed_nodes() {
        let fonts = FontBook::new();
        let doc = stage_doc(json!([
            { "className": "Rect", "attrs": { "x": 1, "width": 10, "height": 10, "fill": "red" } },
            { "className": "Text", "attrs": { "text": "hi", "width": 100 } },
            { "className": "Image", "attrs": { "width": 4, "height": 4 } },
            { "className": "Wedge", "attrs": {} }
        ]));
        let stage = Stage::build(&doc, &fonts).expect("stage");
        assert_eq!(stage.width, 200.0);

        let mut texts = 0;
        stage.for_each_text(&mut |t| {
            texts += 1;
            assert_eq!(t.font_family, "Arial");
            assert_eq!(t.font_style, "400");
            assert_eq!(t.lines.len(), 1);
        });
        assert_eq!(texts, 1);

        let mut images = 0;
        stage.for_each_image(&mut |i| {
            images += 1;
            assert!(i.bitmap.is_none());
        });
        assert_eq!(images, 1);
    }

    #[test]
    fn explicit_newlines_split_lines() {
        let fonts = FontBook::new();
        let spec = StyleSpec::parse("400");
        let lines = wrap_text("one\ntwo\nthree", 0.0, 12.0, "Arial", &spec, &fonts);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].text, "one");
        assert_eq!(lines[2].text, "three");
    }

    #[test]
    fn narrow_width_forces_wrapping() {
        let fonts = FontBook::new();
        let spec = StyleSpec::parse("400");
        let lines = wrap_text("hello world", 10.0, 12.0, "Arial", &spec, &fonts);
        assert!(lines.len() >= 2, "expected a wrap, got {lines:?}");
        assert_eq!(lines[0].text, "hello");
    }

    #[test]
    fn empty_text_yields_one_empty_line() {
        let fonts = FontBook::new();
        let spec = StyleSpec::parse("400");
        let lines = wrap_text("", 100.0, 12.0, "Arial", &spec, &fonts);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "");
    }

    #[test]
    fn svg_serialization_includes_shapes_and_text() {
        let fonts = FontBook::new();
        let doc = stage_doc(json!([
            { "className": "Rect", "attrs": { "width": 200, "height": 100, "fill": "#336699" } },
            { "className": "Text", "attrs": { "text": "a < b", "width": 100, "fontSize": 14 } }
        ]));
        let stage = Stage::build(&doc, &fonts).expect("stage");
        let svg = stage.to_svg();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("width=\"200\""));
        assert!(svg.contains("fill=\"#336699\""));
        assert!(svg.contains("a &lt; b"));
        assert!(!svg.contains("<image"));
    }

    #[test]
    fn rasterize_produces_png_of_stage_size() {
        let fonts = FontBook::new();
        let doc = stage_doc(json!([
            { "className": "Rect", "attrs": { "width": 200, "height": 100, "fill": "#ff0000" } }
        ]));
        let stage = Stage::build(&doc, &fonts).expect("stage");
        let png = stage.rasterize(&fonts).expect("png");
        assert_eq!(&png[0..8], b"\x89PNG\r\n\x1a\n");

        let decoded = image::load_from_memory(&png).expect("decode");
        assert_eq!(decoded.width(), 200);
        assert_eq!(decoded.height(), 100);
    }
}
