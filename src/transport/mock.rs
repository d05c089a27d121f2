// Scripted in-memory transport for tests

use super::{Envelope, Params, Transport, TransportError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A call observed by the mock
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RecordedCall {
    pub method: &'static str,
    pub url: String,
    pub params: Params,
    pub body: Option<Value>,
}

type Responder = Box<dyn Fn(&RecordedCall) -> Result<Envelope, TransportError> + Send + Sync>;

pub(crate) struct MockTransport {
    responder: Responder,
    delay: Duration,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&RecordedCall) -> Result<Envelope, TransportError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with a logical success wrapping `data`.
    pub fn returning(data: Value) -> Self {
        Self::new(move |_| Ok(ok_payload(data.clone())))
    }

    /// Answer every call after `millis` of (tokio) time.
    pub fn with_delay(mut self, millis: u64) -> Self {
        self.delay = Duration::from_millis(millis);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    async fn respond(
        &self,
        call: RecordedCall,
        signal: Option<CancellationToken>,
    ) -> Result<Envelope, TransportError> {
        self.calls.lock().unwrap().push(call.clone());

        if !self.delay.is_zero() {
            let signal = signal.unwrap_or_else(CancellationToken::new);
            tokio::select! {
                _ = signal.cancelled() => return Err(TransportError::Aborted),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }

        (self.responder)(&call)
    }
}

/// `{ success: true, data: { status: true, data } }`
pub(crate) fn ok_payload(data: Value) -> Envelope {
    Envelope::ok(json!({ "status": true, "data": data }))
}

/// `{ success: true, data: { status: false, error } }`
pub(crate) fn rejected_payload(error: &str) -> Envelope {
    Envelope::ok(json!({ "status": false, "error": error }))
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(
        &self,
        url: &str,
        params: &Params,
        signal: CancellationToken,
    ) -> Result<Envelope, TransportError> {
        let call = RecordedCall {
            method: "GET",
            url: url.to_string(),
            params: params.clone(),
            body: None,
        };
        self.respond(call, Some(signal)).await
    }

    async fn post(&self, url: &str, body: &Value, params: &Params) -> Result<Envelope, TransportError> {
        let call = RecordedCall {
            method: "POST",
            url: url.to_string(),
            params: params.clone(),
            body: Some(body.clone()),
        };
        self.respond(call, None).await
    }

    async fn put(&self, url: &str, body: &Value, params: &Params) -> Result<Envelope, TransportError> {
        let call = RecordedCall {
            method: "PUT",
            url: url.to_string(),
            params: params.clone(),
            body: Some(body.clone()),
        };
        self.respond(call, None).await
    }

    async fn delete(&self, url: &str, params: &Params) -> Result<Envelope, TransportError> {
        let call = RecordedCall {
            method: "DELETE",
            url: url.to_string(),
            params: params.clone(),
            body: None,
        };
        self.respond(call, None).await
    }
}
