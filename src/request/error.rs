use crate::transport::TransportError;
use std::fmt;

/// Failures surfaced through a request outcome (never thrown)
#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    /// A local precondition failed before any network call
    Validation(String),
    /// Network error, non-2xx response or unreadable body
    Transport {
        message: String,
        status: Option<u16>,
    },
}

impl ModelError {
    pub fn id_required() -> Self {
        ModelError::Validation("ID required".to_string())
    }

    /// Status reported in the uniform failure shape
    pub fn status(&self) -> u16 {
        match self {
            ModelError::Validation(_) => 400,
            ModelError::Transport { status, .. } => status.unwrap_or(500),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ModelError::Validation(msg) => msg,
            ModelError::Transport { message, .. } => message,
        }
    }
}

impl From<TransportError> for ModelError {
    fn from(e: TransportError) -> Self {
        ModelError::Transport {
            status: e.status(),
            message: e.to_string(),
        }
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::Validation(msg) => write!(f, "validation failed: {}", msg),
            ModelError::Transport { message, status } => match status {
                Some(status) => write!(f, "request failed ({}): {}", status, message),
                None => write!(f, "request failed: {}", message),
            },
        }
    }
}

impl std::error::Error for ModelError {}
