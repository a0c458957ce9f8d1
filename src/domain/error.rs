//! Domain error types.

/// Top-level error type for tradewindow.
///
/// Per-message variants (`MalformedMessage`, `Validation`) never escape the
/// dispatcher; they are logged and the message is dropped.
#[derive(Debug, thiserror::Error)]
pub enum TradeWindowError {
    #[error("malformed message on {topic}: {reason}")]
    MalformedMessage { topic: String, reason: String },

    #[error("invalid field {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("storage error: {reason}")]
    Storage { reason: String },

    #[error("storage query error: {reason}")]
    StorageQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("startup failed: {reason}")]
    Startup { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TradeWindowError {
    pub fn validation(field: &str, reason: impl Into<String>) -> Self {
        TradeWindowError::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_config(section: &str, key: &str, reason: impl Into<String>) -> Self {
        TradeWindowError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<&TradeWindowError> for std::process::ExitCode {
    fn from(err: &TradeWindowError) -> Self {
        let code: u8 = match err {
            TradeWindowError::Io(_) => 1,
            TradeWindowError::ConfigParse { .. }
            | TradeWindowError::ConfigMissing { .. }
            | TradeWindowError::ConfigInvalid { .. } => 2,
            TradeWindowError::Storage { .. }
            | TradeWindowError::StorageQuery { .. }
            | TradeWindowError::Startup { .. } => 3,
            TradeWindowError::MalformedMessage { .. } | TradeWindowError::Validation { .. } => 4,
        };
        std::process::ExitCode::from(code)
    }
}
