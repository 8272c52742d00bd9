//! Opaque model handle shared by every job of a batch.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Read-only description of the model to simulate.
///
/// The pool never looks inside; it clones the handle into every job and
/// serialises it to worker processes, where the engine resolves it (typically
/// a path to a model archive plus load flags).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelHandle(Arc<Value>);

impl ModelHandle {
    pub fn new(value: Value) -> Self {
        Self(Arc::new(value))
    }

    /// Convenience for the common "model lives in a file" case.
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Self {
        Self::new(Value::String(path.as_ref().display().to_string()))
    }

    pub fn value(&self) -> &Value {
        &self.0
    }
}

impl From<Value> for ModelHandle {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clones_share_the_same_value() {
        let model = ModelHandle::new(json!({"path": "model.fmu"}));
        let copy = model.clone();
        assert!(Arc::ptr_eq(&model.0, &copy.0));
    }

    #[test]
    fn serializes_as_the_inner_value() {
        let model = ModelHandle::from_path("model.fmu");
        assert_eq!(serde_json::to_value(&model).unwrap(), json!("model.fmu"));
    }
}
