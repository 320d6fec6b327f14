use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Error context information attached to a reported error
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorContext {
    pub code: Option<String>,
    pub operation: Option<String>,
    pub entity_id: Option<String>,
    pub additional: HashMap<String, String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_entity_id(mut self, entity_id: impl ToString) -> Self {
        self.entity_id = Some(entity_id.to_string());
        self
    }

    pub fn add_context<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.additional.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_fields() {
        let ctx = ErrorContext::new()
            .with_code(crate::codes::billing::STATE_CONFLICT)
            .with_operation("finalize")
            .with_entity_id(42)
            .add_context("status", "discharged");

        assert_eq!(ctx.code.as_deref(), Some("CONFLICT_2001"));
        assert_eq!(ctx.operation.as_deref(), Some("finalize"));
        assert_eq!(ctx.entity_id.as_deref(), Some("42"));
        assert_eq!(ctx.additional.get("status").map(String::as_str), Some("discharged"));
    }
}
