use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Engine failure, one variant per surfaced error category.
///
/// `Cache` is always downgraded at call sites (a failed snapshot read is a
/// cache miss, a failed write is logged); it still exists as a category so
/// command handlers that touch the cache directly can report it.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Discovery(String),

    #[error("{0}")]
    Container(String),

    #[error("{0}")]
    Read(String),

    #[error("{0}")]
    Transcode(String),

    #[error("{0}")]
    Cache(String),

    #[error("{0}")]
    State(String),

    #[error("preview payload is {size} bytes, above the {limit} byte cap")]
    PreviewTooLarge { size: u64, limit: u64 },
}

impl EngineError {
    /// Stable category identifier shown to clients next to the message.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Config(_) => "ConfigError",
            EngineError::Discovery(_) => "DiscoveryError",
            EngineError::Container(_) => "ContainerError",
            EngineError::Read(_) => "ReadError",
            EngineError::Transcode(_) => "TranscodeError",
            EngineError::Cache(_) => "CacheError",
            EngineError::State(_) => "StateError",
            EngineError::PreviewTooLarge { .. } => "PreviewTooLarge",
        }
    }

    pub(crate) fn unknown_scan(scan_id: &str) -> Self {
        EngineError::State(format!("Unknown scan id: {scan_id}"))
    }

    pub(crate) fn unknown_asset(asset_id: &str) -> Self {
        EngineError::State(format!("Unknown asset id: {asset_id}"))
    }
}

impl Serialize for EngineError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("EngineError", 2)?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_identifiers_are_stable() {
        assert_eq!(EngineError::Config("x".into()).kind(), "ConfigError");
        assert_eq!(EngineError::Read("x".into()).kind(), "ReadError");
        assert_eq!(
            EngineError::PreviewTooLarge { size: 1, limit: 0 }.kind(),
            "PreviewTooLarge"
        );
    }

    #[test]
    fn serializes_kind_and_message() {
        let value = serde_json::to_value(EngineError::State("Unknown scan id: abc".into()))
            .expect("serializable");
        assert_eq!(value["kind"], "StateError");
        assert_eq!(value["message"], "Unknown scan id: abc");
    }
}
