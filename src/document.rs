//! Scene document validation and pre-processing.
//!
//! A scene document is a JSON tree of typed nodes: a `Stage` root whose
//! `children` are layers, whose children in turn are shapes, text runs and
//! images. Pre-processing happens on the raw JSON representation, before the
//! live scene tree is built, because the background rectangle has to become a
//! regular child node of the first layer.

use crate::diagnostics::DiagnosticLog;
use crate::{Error, Result};
use serde_json::{json, Value};

/// Check that the document is usable at all.
///
/// A document is rejected when it is not a JSON object or when the object
/// carries no keys. Nothing else is validated here; structural problems
/// surface later during scene construction.
pub fn validate(document: &Value) -> Result<()> {
    match document.as_object() {
        Some(map) if !map.is_empty() => Ok(()),
        _ => Err(Error::EmptyDocument),
    }
}

/// Prepend a synthetic background rectangle to the first layer.
///
/// The rectangle spans `(0,0)` to `(attrs.width, attrs.height)` and inherits
/// every field of `attrs.background` as style, so it paints beneath all
/// other content. Documents without root attributes or without a
/// `background` descriptor pass through unchanged.
pub fn inject_background(document: &mut Value, log: &DiagnosticLog) {
    let Some(attrs) = document.get("attrs") else {
        log.push("No need to add background layer. Document has no attributes");
        return;
    };

    let Some(background) = attrs.get("background").and_then(Value::as_object) else {
        log.push("No need to add background layer. No background attribute");
        return;
    };

    let width = attrs.get("width").cloned().unwrap_or(json!(0));
    let height = attrs.get("height").cloned().unwrap_or(json!(0));

    let mut rect_attrs = background.clone();
    rect_attrs.insert("x".into(), json!(0));
    rect_attrs.insert("y".into(), json!(0));
    rect_attrs.insert("width".into(), width);
    rect_attrs.insert("height".into(), height);

    let rect = json!({
        "className": "Rect",
        "attrs": Value::Object(rect_attrs),
    });

    let Some(first_layer_children) = document
        .get_mut("children")
        .and_then(Value::as_array_mut)
        .and_then(|layers| layers.first_mut())
        .and_then(|layer| layer.get_mut("children"))
        .and_then(Value::as_array_mut)
    else {
        log.push("No need to add background layer. Document has no layer children");
        return;
    };

    first_layer_children.insert(0, rect);
    log.push("Background layer added");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with_layer(children: Value) -> Value {
        json!({
            "attrs": { "width": 640, "height": 480 },
            "className": "Stage",
            "children": [
                { "attrs": {}, "className": "Layer", "children": children }
            ]
        })
    }

    #[test]
    fn empty_document_is_rejected() {
        assert!(matches!(validate(&json!({})), Err(Error::EmptyDocument)));
        assert!(matches!(validate(&json!(null)), Err(Error::EmptyDocument)));
        assert!(matches!(validate(&json!([1, 2])), Err(Error::EmptyDocument)));
        assert!(validate(&json!({ "attrs": {} })).is_ok());
    }

    #[test]
    fn no_background_leaves_first_child_unchanged() {
        let mut doc = doc_with_layer(json!([{ "className": "Circle", "attrs": { "radius": 5 } }]));
        let log = DiagnosticLog::new();
        inject_background(&mut doc, &log);
        assert_eq!(
            doc["children"][0]["children"][0]["className"],
            json!("Circle")
        );
        assert!(log.entries()[0].contains("No background attribute"));
    }

    #[test]
    fn missing_attrs_leaves_document_unchanged() {
        let mut doc = json!({ "className": "Stage", "children": [] });
        let before = doc.clone();
        let log = DiagnosticLog::new();
        inject_background(&mut doc, &log);
        assert_eq!(doc, before);
    }

    #[test]
    fn background_becomes_first_child_of_first_layer() {
        let mut doc = doc_with_layer(json!([{ "className": "Text", "attrs": { "text": "hi" } }]));
        doc["attrs"]["background"] = json!({ "fill": "#336699", "opacity": 0.5 });

        let log = DiagnosticLog::new();
        inject_background(&mut doc, &log);

        let rect = &doc["children"][0]["children"][0];
        assert_eq!(rect["className"], json!("Rect"));
        assert_eq!(rect["attrs"]["x"], json!(0));
        assert_eq!(rect["attrs"]["y"], json!(0));
        assert_eq!(rect["attrs"]["width"], json!(640));
        assert_eq!(rect["attrs"]["height"], json!(480));
        assert_eq!(rect["attrs"]["fill"], json!("#336699"));
        assert_eq!(rect["attrs"]["opacity"], json!(0.5));
        // The original child is pushed to the second slot, not replaced.
        assert_eq!(
            doc["children"][0]["children"][1]["className"],
            json!("Text")
        );
    }
}
