//! Template hashing for change detection.
//!
//! Templates are hashed over their canonical serialization: object keys are
//! sorted, so two templates differing only in key order or whitespace hash
//! the same.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hasher for template bodies.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateHasher;

impl TemplateHasher {
    /// Creates a new template hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the SHA-256 of the canonical serialization of `template`.
    #[must_use]
    pub fn hash_template(&self, template: &Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(canonical_json(template).as_bytes());
        hex::encode(hasher.finalize())
    }

    /// True when both templates have the same canonical serialization.
    #[must_use]
    pub fn same_template(&self, a: &Value, b: &Value) -> bool {
        Self::hashes_match(&self.hash_template(a), &self.hash_template(b))
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

/// Serializes `value` with object keys in sorted order.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let body = entries
                .into_iter()
                .map(|(key, v)| format!("{}:{}", Value::String(key.clone()), canonical_json(v)))
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{body}}}")
        }
        Value::Array(items) => {
            let body = items.iter().map(canonical_json).collect::<Vec<_>>().join(",");
            format!("[{body}]")
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_template_hash_deterministic() {
        let hasher = TemplateHasher::new();
        let template = json!({ "Resources": { "Queue": { "Type": "AWS::SQS::Queue" } } });

        assert_eq!(hasher.hash_template(&template), hasher.hash_template(&template));
        assert_eq!(hasher.hash_template(&template).len(), 64);
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let hasher = TemplateHasher::new();
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": {"y": [1, 2], "x": null}}"#).expect("json");
        let b: Value = serde_json::from_str(r#"{"a": {"x": null, "y": [1, 2]}, "b": 1}"#).expect("json");

        assert!(hasher.same_template(&a, &b));
    }

    #[test]
    fn test_different_templates_differ() {
        let hasher = TemplateHasher::new();

        assert!(!hasher.same_template(&json!({ "a": [1, 2] }), &json!({ "a": [2, 1] })));
        assert!(!hasher.same_template(&json!({ "a": "1" }), &json!({ "a": 1 })));
    }

    #[test]
    fn test_hashes_match() {
        assert!(TemplateHasher::hashes_match("abc123", "abc123"));
        assert!(!TemplateHasher::hashes_match("abc123", "abc124"));
        assert!(!TemplateHasher::hashes_match("abc", "abcd"));
    }
}
