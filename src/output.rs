//! The result document emitted at the end of a job.

use crate::capture::Capture;
use serde::Serialize;
use serde_json::Value;

/// One `extract` step's prompt and what the AI executor returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extraction {
    pub prompt: String,
    pub result: Value,
}

/// One `evaluate` step's script (as written, before interpolation) and its return value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub script: String,
    pub result: Value,
}

/// Append-only output of a run.
///
/// Keys with no entries are omitted from the JSON entirely rather than
/// serialized as empty lists; consumers rely on that.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutputDocument {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extractions: Vec<Extraction>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub evaluations: Vec<Evaluation>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub captures: Vec<Capture>,
}

impl OutputDocument {
    pub fn push_extraction(&mut self, prompt: &str, result: Value) {
        self.extractions.push(Extraction {
            prompt: prompt.to_string(),
            result,
        });
    }

    pub fn push_evaluation(&mut self, script: &str, result: Value) {
        self.evaluations.push(Evaluation {
            script: script.to_string(),
            result,
        });
    }

    /// Append captures in the order the network delivered them.
    pub fn append_captures(&mut self, captures: impl IntoIterator<Item = Capture>) {
        self.captures.extend(captures);
    }

    pub fn is_empty(&self) -> bool {
        self.extractions.is_empty() && self.evaluations.is_empty() && self.captures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_document_has_no_keys() {
        let doc = OutputDocument::default();
        assert_eq!(serde_json::to_value(&doc).unwrap(), json!({}));
    }

    #[test]
    fn test_only_populated_keys_present() {
        let mut doc = OutputDocument::default();
        doc.push_evaluation("document.title", json!("Example Domain"));
        doc.push_evaluation("1 + 1", json!(2));

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(
            value,
            json!({
                "evaluations": [
                    {"script": "document.title", "result": "Example Domain"},
                    {"script": "1 + 1", "result": 2}
                ]
            })
        );
        assert!(value.get("extractions").is_none());
        assert!(value.get("captures").is_none());
    }
}
