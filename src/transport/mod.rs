// HTTP transport contract consumed by models
//
// Models never talk to the network directly: they receive one shared
// transport at construction and call it through this trait. The shared
// instance carries global headers (auth); models only hold a read
// reference and cannot reconfigure it.

mod rest;
#[cfg(test)]
pub(crate) mod mock;

pub use rest::RestClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Query parameters for a request
pub type Params = Map<String, Value>;

/// Transport handle shared by every model built against the same backend
pub type SharedTransport = Arc<dyn Transport>;

/// Uniform response envelope returned by every transport call.
///
/// `success` reports transport-level (HTTP) success. By backend convention
/// `data` is an object `{ "status": bool, "data": ..., "error"?: string }`
/// signalling application-level success or failure.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,

    pub status: u16,

    #[serde(default)]
    pub data: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Envelope {
    /// HTTP 200 envelope carrying `data` as the parsed body
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            status: 200,
            data,
            errors: None,
            message: None,
        }
    }

    /// Non-2xx envelope with a human-readable message
    pub fn failure(status: u16, message: impl Into<String>) -> Self {
        Self {
            success: false,
            status,
            data: Value::Null,
            errors: None,
            message: Some(message.into()),
        }
    }
}

/// Errors raised below the envelope level (no HTTP response to report)
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Connection refused, DNS failure, reset, etc.
    Network(String),
    /// The request exceeded the client's timeout
    Timeout,
    /// The body could not be parsed
    Decode(String),
    /// The caller's cancellation token fired
    Aborted,
}

impl TransportError {
    /// Status code to report for this error, when one is meaningful
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Timeout => Some(408),
            TransportError::Network(_) | TransportError::Decode(_) | TransportError::Aborted => {
                None
            }
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Network(msg) => write!(f, "network error: {}", msg),
            TransportError::Timeout => write!(f, "request timed out"),
            TransportError::Decode(msg) => write!(f, "invalid response body: {}", msg),
            TransportError::Aborted => write!(f, "request aborted"),
        }
    }
}

impl std::error::Error for TransportError {}

/// REST transport used by models.
///
/// Only `get` takes a cancellation signal: reads are the only operation the
/// request coordinator supersedes.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        params: &Params,
        signal: CancellationToken,
    ) -> Result<Envelope, TransportError>;

    async fn post(&self, url: &str, body: &Value, params: &Params)
        -> Result<Envelope, TransportError>;

    async fn put(&self, url: &str, body: &Value, params: &Params)
        -> Result<Envelope, TransportError>;

    async fn delete(&self, url: &str, params: &Params) -> Result<Envelope, TransportError>;
}
