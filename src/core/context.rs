use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::BatchError;

/// Key-value store attached to a [`StepExecution`](super::step::StepExecution).
///
/// Partitioners use it to hand each partition its bounds (`minId`/`maxId`),
/// and the chunk engine records its restart offset in it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    entries: BTreeMap<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: &str, value: impl Into<Value>) {
        self.entries.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.entries.get(key).and_then(Value::as_i64)
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.entries
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|value| usize::try_from(value).ok())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Value::as_str)
    }

    /// Returns the integer stored under `key` or a configuration error naming
    /// the missing key.
    pub fn require_i64(&self, key: &str) -> Result<i64, BatchError> {
        self.get_i64(key).ok_or_else(|| {
            BatchError::Configuration(format!(
                "execution context has no integer value for key '{key}'"
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::ExecutionContext;

    #[test]
    fn typed_getters_read_back_stored_values() {
        let mut context = ExecutionContext::new();
        context.put("minId", 1);
        context.put("maxId", 50_i64);
        context.put("name", "partition0");

        assert_eq!(context.get_i64("minId"), Some(1));
        assert_eq!(context.get_usize("maxId"), Some(50));
        assert_eq!(context.get_str("name"), Some("partition0"));
        assert_eq!(context.get_str("minId"), None);
        assert_eq!(context.len(), 3);
    }

    #[test]
    fn require_reports_the_missing_key() {
        let context = ExecutionContext::new();
        let error = context.require_i64("minId").unwrap_err();
        assert!(error.to_string().contains("minId"));
    }
}
