//! Filter helpers for Qdrant search queries.

use serde_json::{Map, Value, json};

/// Restrict a search to chunks ingested from one source document.
///
/// Returns `None` when no usable source identifier is supplied so the search spans the whole
/// collection.
pub fn build_source_filter(source_uri: Option<&str>) -> Option<Value> {
    let source = source_uri.and_then(non_empty)?;
    Some(json!({
        "must": [
            {
                "key": "source_uri",
                "match": { "value": source }
            }
        ]
    }))
}

/// Read the stored chunk text from a point payload.
pub fn payload_text(payload: &Map<String, Value>) -> Option<String> {
    payload
        .get("text")
        .and_then(Value::as_str)
        .and_then(non_empty)
        .map(str::to_string)
}

/// Read the stored source URI from a point payload.
pub fn payload_source_uri(payload: &Map<String, Value>) -> Option<String> {
    payload
        .get("source_uri")
        .and_then(Value::as_str)
        .and_then(non_empty)
        .map(str::to_string)
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_filter_matches_exact_uri() {
        let filter = build_source_filter(Some(" docs/handbook.pdf ")).expect("filter");
        assert_eq!(filter["must"][0]["key"], "source_uri");
        assert_eq!(filter["must"][0]["match"]["value"], "docs/handbook.pdf");
    }

    #[test]
    fn blank_source_disables_filter() {
        assert!(build_source_filter(None).is_none());
        assert!(build_source_filter(Some("   ")).is_none());
    }

    #[test]
    fn payload_accessors_skip_blank_values() {
        let payload = json!({ "text": "  ", "source_uri": "s3://bucket/doc" });
        let payload = payload.as_object().expect("object");
        assert_eq!(payload_text(payload), None);
        assert_eq!(
            payload_source_uri(payload).as_deref(),
            Some("s3://bucket/doc")
        );
    }
}
