//! Page ↔ worker message protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Bare string some pages post instead of the typed object.
const SKIP_WAITING_SENTINEL: &str = "skipWaiting";

/// A message understood by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    /// Activate the waiting worker without waiting for clients to close.
    SkipWaiting,
    /// Report namespaces and the worker's namespace.
    GetCacheInfo,
}

impl WorkerMessage {
    /// Parse posted data. Anything unrecognized yields `None` and is ignored.
    pub fn parse(data: &Value) -> Option<Self> {
        if data.as_str() == Some(SKIP_WAITING_SENTINEL) {
            return Some(WorkerMessage::SkipWaiting);
        }

        match serde_json::from_value::<WorkerMessage>(data.clone()) {
            Ok(message) => Some(message),
            Err(e) => {
                debug!(error = %e, "Ignoring unrecognized message");
                None
            }
        }
    }

    pub fn to_value(&self) -> Value {
        // Unit variants of an internally tagged enum always serialize.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Reply to `GET_CACHE_INFO`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInfo {
    /// Namespace names in the store.
    pub caches: Vec<String>,
    /// Namespace of the replying worker, `{prefix}-v{version}`.
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_typed() {
        assert_eq!(
            WorkerMessage::parse(&json!({"type": "SKIP_WAITING"})),
            Some(WorkerMessage::SkipWaiting)
        );
        assert_eq!(
            WorkerMessage::parse(&json!({"type": "GET_CACHE_INFO"})),
            Some(WorkerMessage::GetCacheInfo)
        );
    }

    #[test]
    fn test_parse_sentinel() {
        assert_eq!(
            WorkerMessage::parse(&json!("skipWaiting")),
            Some(WorkerMessage::SkipWaiting)
        );
    }

    #[test]
    fn test_unrecognized_ignored() {
        assert_eq!(WorkerMessage::parse(&json!({"type": "CLEAR_ALL"})), None);
        assert_eq!(WorkerMessage::parse(&json!("hello")), None);
        assert_eq!(WorkerMessage::parse(&json!(42)), None);
        assert_eq!(WorkerMessage::parse(&json!({"kind": "SKIP_WAITING"})), None);
    }

    #[test]
    fn test_to_value() {
        assert_eq!(
            WorkerMessage::SkipWaiting.to_value(),
            json!({"type": "SKIP_WAITING"})
        );
    }

    #[test]
    fn test_cache_info_shape() {
        let info = CacheInfo {
            caches: vec!["app-v1.0.0".to_string()],
            version: "app-v1.0.0".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&info).unwrap(),
            json!({"caches": ["app-v1.0.0"], "version": "app-v1.0.0"})
        );
    }
}
