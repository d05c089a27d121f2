// Request coordination for one model
//
// Bookkeeping behind fetch/save/destroy: request keys, the in-flight fetch
// slot (dedupe / supersede), the pending debounce slot, the start throttle
// and the outcome types callers receive. The async flow that drives it lives
// in `model`.

mod error;
mod throttle;

pub use error::ModelError;
pub use throttle::FetchThrottle;

use crate::transport::{Envelope, Params};
use futures::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Options for fetch/save/destroy
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct RequestOptions {
    /// Identity to target instead of the model's own
    #[serde(default)]
    pub id: Option<Value>,

    /// Full URL override (skips endpoint + id resolution)
    #[serde(default)]
    pub url: Option<String>,

    /// Query parameters
    #[serde(default)]
    pub params: Params,

    /// Server-side response projection, sent as the `graph` query parameter
    #[serde(default)]
    pub graph: Option<String>,

    /// Delay (ms) before a fetch runs; later debounced calls replace it
    #[serde(default)]
    pub debounce_ms: u64,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<Value>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn with_graph(mut self, graph: &str) -> Self {
        self.graph = Some(graph.to_string());
        self
    }

    pub fn debounced(mut self, millis: u64) -> Self {
        self.debounce_ms = millis;
        self
    }

    /// Query parameters as sent to the transport (`graph` included)
    pub fn query(&self) -> Params {
        let mut query = self.params.clone();
        if let Some(graph) = &self.graph {
            query.insert("graph".to_string(), Value::String(graph.clone()));
        }
        query
    }
}

/// Stable identity of a fetch: URL plus its parameters in key order.
pub fn request_key(url: &str, params: &Params) -> String {
    let sorted: BTreeMap<&String, &Value> = params.iter().collect();
    let encoded = serde_json::to_string(&sorted).unwrap_or_default();
    format!("{}?{}", url, encoded)
}

/// Uniform failure shape: `{ success: false, error, status }`
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Failure {
    pub success: bool,
    pub error: String,
    pub status: u16,
}

impl Failure {
    fn new(error: &str, status: u16) -> Self {
        Self {
            success: false,
            error: error.to_string(),
            status,
        }
    }
}

/// What a fetch/save/destroy call resolved to.
///
/// `Cancelled` and `Skipped` leave the model untouched and are not failures.
#[derive(Clone, Debug)]
pub enum RequestOutcome {
    /// Transport and backend both reported success; the model was updated
    Synced(Envelope),
    /// Transport succeeded but the backend reported `status: false`
    Rejected(Envelope),
    /// Local validation or transport failure
    Failed(ModelError),
    /// Superseded by a newer fetch or cancelled by the caller
    Cancelled,
    /// Dropped by the fetch throttle
    Skipped,
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RequestOutcome::Synced(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RequestOutcome::Cancelled)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, RequestOutcome::Skipped)
    }

    pub fn envelope(&self) -> Option<&Envelope> {
        match self {
            RequestOutcome::Synced(envelope) | RequestOutcome::Rejected(envelope) => Some(envelope),
            _ => None,
        }
    }

    /// The uniform failure shape, for rejected and failed outcomes
    pub fn failure(&self) -> Option<Failure> {
        match self {
            RequestOutcome::Failed(e) => Some(Failure::new(e.message(), e.status())),
            RequestOutcome::Rejected(envelope) => {
                let error = envelope
                    .data
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("request rejected");
                Some(Failure::new(error, envelope.status))
            }
            _ => None,
        }
    }
}

/// How a response envelope is interpreted
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Classified {
    /// Logical success; the record (or list) to apply
    Payload(Value),
    /// Logical failure; the errors map to record
    Rejected(Map<String, Value>),
    /// Transport-level failure
    Failed(ModelError),
}

/// Apply the two-layer success convention to an envelope.
///
/// `success == false` is a transport failure. With `success == true`, a body
/// of `{ "status": false, ... }` is a logical failure whose body becomes the
/// errors map. Anything else is a success whose payload is `data.data` when
/// present, else the whole body.
pub(crate) fn classify(envelope: &Envelope) -> Classified {
    if !envelope.success {
        let message = envelope
            .message
            .clone()
            .or_else(|| {
                envelope
                    .data
                    .get("error")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| format!("HTTP {}", envelope.status));
        return Classified::Failed(ModelError::Transport {
            message,
            status: Some(envelope.status),
        });
    }

    if let Some(Value::Bool(false)) = envelope.data.get("status") {
        let errors = match &envelope.data {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = Map::new();
                map.insert("error".to_string(), other.clone());
                map
            }
        };
        return Classified::Rejected(errors);
    }

    let payload = match envelope.data.get("data") {
        Some(inner) => inner.clone(),
        None => envelope.data.clone(),
    };
    Classified::Payload(payload)
}

pub(crate) type SharedOutcome = Shared<BoxFuture<'static, RequestOutcome>>;

struct InFlight {
    key: String,
    generation: u64,
    token: CancellationToken,
    result: SharedOutcome,
}

struct PendingDebounce {
    generation: u64,
    token: CancellationToken,
}

/// Decision for a new fetch
pub(crate) enum FetchPlan {
    /// Identical fetch already in flight: await its result
    Join(SharedOutcome),
    /// Throttled: resolve without touching the network
    Skip,
    /// Go ahead; `track` the request under this generation and token
    Start {
        generation: u64,
        token: CancellationToken,
    },
}

/// Per-model request state. Held behind the model's mutex and never across
/// an await.
pub struct RequestCoordinator {
    in_flight: Option<InFlight>,
    debounce: Option<PendingDebounce>,
    throttle: FetchThrottle,
    generation: u64,
    active: usize,
}

impl RequestCoordinator {
    pub fn new(min_fetch_interval: Duration) -> Self {
        Self {
            in_flight: None,
            debounce: None,
            throttle: FetchThrottle::new(min_fetch_interval),
            generation: 0,
            active: 0,
        }
    }

    /// Decide what a fetch for `key` should do.
    ///
    /// Order: join an identical in-flight fetch; otherwise cancel a different
    /// in-flight fetch and start (superseding is never throttled); otherwise
    /// start unless the previous start was within the throttle window.
    pub(crate) fn plan_fetch(&mut self, key: &str) -> FetchPlan {
        let now = Instant::now();
        let mut superseded = false;

        if let Some(current) = &self.in_flight {
            if current.key == key {
                debug!(request_key = %key, "Joining in-flight fetch");
                return FetchPlan::Join(current.result.clone());
            }
            debug!(
                previous = %current.key,
                request_key = %key,
                "Cancelling superseded fetch"
            );
            current.token.cancel();
            self.in_flight = None;
            superseded = true;
        }

        if superseded {
            self.throttle.mark(now);
        } else if !self.throttle.try_start(now) {
            debug!(request_key = %key, "Fetch throttled");
            return FetchPlan::Skip;
        }

        self.generation += 1;
        self.active += 1;
        FetchPlan::Start {
            generation: self.generation,
            token: CancellationToken::new(),
        }
    }

    /// Register the started fetch so later calls can join or supersede it.
    pub(crate) fn track(
        &mut self,
        key: String,
        generation: u64,
        token: CancellationToken,
        result: SharedOutcome,
    ) {
        self.in_flight = Some(InFlight {
            key,
            generation,
            token,
            result,
        });
    }

    /// Fetch `generation` settled. Clears the slot only if it still owns it.
    pub(crate) fn finish_fetch(&mut self, generation: u64) {
        self.active = self.active.saturating_sub(1);
        if self
            .in_flight
            .as_ref()
            .map_or(false, |current| current.generation == generation)
        {
            self.in_flight = None;
        }
    }

    /// Save/destroy started
    pub(crate) fn begin(&mut self) {
        self.active += 1;
    }

    /// Save/destroy settled
    pub(crate) fn end(&mut self) {
        self.active = self.active.saturating_sub(1);
    }

    /// Replace any pending debounced fetch with a new one.
    pub(crate) fn replace_debounce(&mut self) -> (u64, CancellationToken) {
        if let Some(pending) = self.debounce.take() {
            debug!(generation = pending.generation, "Replacing pending debounced fetch");
            pending.token.cancel();
        }
        self.generation += 1;
        let token = CancellationToken::new();
        self.debounce = Some(PendingDebounce {
            generation: self.generation,
            token: token.clone(),
        });
        (self.generation, token)
    }

    /// The debounce timer for `generation` elapsed.
    pub(crate) fn settle_debounce(&mut self, generation: u64) {
        if self
            .debounce
            .as_ref()
            .map_or(false, |pending| pending.generation == generation)
        {
            self.debounce = None;
        }
    }

    /// Abort the in-flight fetch and any pending debounce.
    ///
    /// Returns whether there was anything to cancel.
    pub fn cancel(&mut self) -> bool {
        let mut cancelled = false;
        if let Some(current) = self.in_flight.take() {
            current.token.cancel();
            cancelled = true;
        }
        if let Some(pending) = self.debounce.take() {
            pending.token.cancel();
            cancelled = true;
        }
        cancelled
    }

    pub fn is_fetching(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.active > 0
    }

    pub fn has_pending_debounce(&self) -> bool {
        self.debounce.is_some()
    }

    pub fn min_fetch_interval(&self) -> Duration {
        self.throttle.min_interval()
    }
}
