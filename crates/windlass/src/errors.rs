use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A structured error suitable for rendering on the CLI surface as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Value::is_null", default)]
    pub data: Value,
}

impl ErrorReport {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: Value::Null,
        }
    }
}

/// Resolver failure taxonomy. Degraded per-field reads are not errors and
/// stay `Option::None` in result objects; these variants cover whole
/// operations that cannot proceed.
#[derive(Debug, Error, Clone)]
pub enum WindlassError {
    /// Rejected before any RPC call: malformed address, market id, token
    /// id, or amount.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A required address or market id is not configured. Never attempted
    /// against the RPC layer.
    #[error("not configured: {0}")]
    MissingConfig(String),

    /// Transport-level failure talking to the node.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// A response decoded into something other than the expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// The ownership scan could not complete even at the minimum chunk
    /// size.
    #[error("could not load position ids from logs; try another RPC endpoint")]
    ScanFailed,
}

impl WindlassError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_request",
            Self::MissingConfig(_) => "missing_config",
            Self::Rpc(_) => "rpc_error",
            Self::Decode(_) => "decode_error",
            Self::ScanFailed => "scan_failed",
        }
    }
}

impl From<WindlassError> for ErrorReport {
    fn from(e: WindlassError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

/// Lift a config slot into a value, naming the TOML key in the error so
/// the fix is obvious from the message alone.
pub fn require_configured<T: Copy>(slot: Option<T>, key: &str) -> Result<T, WindlassError> {
    slot.ok_or_else(|| WindlassError::MissingConfig(key.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(WindlassError::InvalidInput(String::new()).code(), "invalid_request");
        assert_eq!(WindlassError::MissingConfig(String::new()).code(), "missing_config");
        assert_eq!(WindlassError::ScanFailed.code(), "scan_failed");
    }

    #[test]
    fn report_skips_null_data() {
        let report = ErrorReport::from(WindlassError::MissingConfig("market".to_owned()));
        let json = serde_json::to_string(&report).unwrap_or_default();
        assert!(!json.contains("\"data\""), "null data serialized: {json}");
        assert!(json.contains("missing_config"), "code missing: {json}");
    }
}
