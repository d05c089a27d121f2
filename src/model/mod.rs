// Model: one client-side record of a remote resource
//
// Combines the attribute store with the request coordinator. A `Model` is a
// cheap handle (clones share state) so in-flight requests, debounce timers
// and subscribers all see the same record. Locks are only taken for short
// synchronous sections and never held across an await.

mod kind;
#[cfg(test)]
mod tests;

pub use kind::{ModelKind, ModelOptions};

use crate::attributes::{AttributeStore, SetOptions, EVENT_CHANNEL_CAPACITY};
use crate::event::{ModelEvent, Operation};
use crate::request::{
    classify, request_key, Classified, FetchPlan, ModelError, RequestCoordinator,
    RequestOptions, RequestOutcome,
};
use crate::transport::{Envelope, Params, SharedTransport, TransportError};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct Model {
    inner: Arc<ModelInner>,
}

struct ModelInner {
    kind: Arc<ModelKind>,
    endpoint: String,
    requires_id: bool,
    timestamps: bool,
    transport: SharedTransport,
    store: Mutex<AttributeStore>,
    requests: Mutex<RequestCoordinator>,
    synced_at: Mutex<Option<DateTime<Utc>>>,
    events: broadcast::Sender<ModelEvent>,
}

/// Keeps `is_loading()` true for the lifetime of a save/destroy call, even
/// if the caller drops the future midway.
struct ActiveRequest {
    model: Model,
}

impl ActiveRequest {
    fn begin(model: &Model) -> Self {
        model.requests().begin();
        Self {
            model: model.clone(),
        }
    }
}

impl Drop for ActiveRequest {
    fn drop(&mut self) {
        self.model.requests().end();
    }
}

impl Model {
    /// Build a model of `kind` seeded with `data` (an object, or null).
    ///
    /// No network call is made.
    pub fn new(
        kind: Arc<ModelKind>,
        transport: SharedTransport,
        data: Value,
        options: ModelOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let id_attribute = options
            .id_attribute
            .unwrap_or_else(|| kind.id_attribute().to_string());

        let store = AttributeStore::from_parts(
            data,
            &id_attribute,
            kind.formatters(),
            kind.computed(),
            events.clone(),
        );

        Self {
            inner: Arc::new(ModelInner {
                endpoint: options
                    .endpoint
                    .unwrap_or_else(|| kind.endpoint().to_string()),
                requires_id: options.requires_id.unwrap_or(kind.requires_id()),
                timestamps: options.timestamps.unwrap_or(kind.timestamps()),
                requests: Mutex::new(RequestCoordinator::new(kind.min_fetch_interval())),
                store: Mutex::new(store),
                synced_at: Mutex::new(None),
                transport,
                kind,
                events,
            }),
        }
    }

    /// New unsaved model; nothing is sent to the transport.
    pub fn create(
        kind: Arc<ModelKind>,
        transport: SharedTransport,
        data: Value,
        options: ModelOptions,
    ) -> Self {
        Self::new(kind, transport, data, options)
    }

    /// Construct a model and fetch `id` into it.
    ///
    /// The model is returned whatever the fetch outcome; inspect `errors()`
    /// to tell.
    pub async fn find(
        kind: Arc<ModelKind>,
        transport: SharedTransport,
        id: impl Into<Value>,
        options: RequestOptions,
    ) -> Self {
        let model = Self::new(kind, transport, Value::Null, ModelOptions::default());
        let outcome = model
            .fetch(RequestOptions {
                id: Some(id.into()),
                ..options
            })
            .await;
        debug!(
            kind = %model.inner.kind.name(),
            success = outcome.is_success(),
            "find completed"
        );
        model
    }

    fn store(&self) -> MutexGuard<'_, AttributeStore> {
        self.inner
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn requests(&self) -> MutexGuard<'_, RequestCoordinator> {
        self.inner
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ModelEvent) {
        let _ = self.inner.events.send(event);
    }

    // ── Attributes ───────────────────────────────────────────────────────────

    /// Read an attribute (dotted paths, `|pipes` and computed fields allowed)
    pub fn get(&self, key: &str) -> Option<Value> {
        self.store().get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.store().has(key)
    }

    pub fn set(&self, key: &str, value: Value) -> bool {
        self.store().set(key, value)
    }

    pub fn set_with(&self, key: &str, value: Value, options: SetOptions) -> bool {
        self.store().set_with(key, value, options)
    }

    pub fn set_many(&self, patch: Value, options: SetOptions) -> bool {
        self.store().set_many(patch, options)
    }

    pub fn is_dirty(&self) -> bool {
        self.store().is_dirty()
    }

    pub fn changed_attributes(&self) -> Map<String, Value> {
        self.store().changed_attributes()
    }

    /// Discard local edits and errors
    pub fn reset(&self) {
        self.store().reset();
    }

    pub fn to_json(&self) -> Value {
        self.store().to_json()
    }

    pub fn id(&self) -> Option<Value> {
        self.store().id().cloned()
    }

    pub fn errors(&self) -> Map<String, Value> {
        self.store().errors().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModelEvent> {
        self.inner.events.subscribe()
    }

    // ── Request state ────────────────────────────────────────────────────────

    /// True while any fetch, save or destroy is in flight
    pub fn is_loading(&self) -> bool {
        self.requests().is_loading()
    }

    /// True while a fetch is tracked for this model
    pub fn is_fetching(&self) -> bool {
        self.requests().is_fetching()
    }

    /// Abort the in-flight fetch and any pending debounced fetch.
    ///
    /// Returns whether anything was cancelled.
    pub fn cancel(&self) -> bool {
        let cancelled = self.requests().cancel();
        if cancelled {
            debug!(kind = %self.inner.kind.name(), "Cancelled pending requests");
        }
        cancelled
    }

    /// Last successful sync, when the model keeps timestamps
    pub fn synced_at(&self) -> Option<DateTime<Utc>> {
        *self
            .inner
            .synced_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn kind(&self) -> &ModelKind {
        &self.inner.kind
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// URL of this model's resource, or of `id` when given.
    ///
    /// Endpoints may place the id with an `{id}` placeholder; otherwise it is
    /// appended as the last path segment.
    pub fn url(&self, id: Option<&Value>) -> String {
        let base = self.inner.endpoint.trim_end_matches('/');
        let id = id.cloned().or_else(|| self.id());

        match id {
            Some(id) => {
                let segment = match &id {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let segment = urlencoding::encode(&segment).into_owned();
                if base.contains("{id}") {
                    base.replace("{id}", &segment)
                } else {
                    format!("{}/{}", base, segment)
                }
            }
            None => base.replace("/{id}", "").replace("{id}", ""),
        }
    }

    // ── Fetch ────────────────────────────────────────────────────────────────

    /// Read the remote resource into this model.
    ///
    /// Identical concurrent fetches share one transport call; a fetch for a
    /// different URL/params cancels the one in flight; a repeat within the
    /// throttle window is skipped; `debounce_ms` defers the call and lets
    /// later debounced calls replace it. Failures come back in the outcome
    /// and in `errors()`, never as a panic.
    pub async fn fetch(&self, options: RequestOptions) -> RequestOutcome {
        let url = match self.fetch_url(&options) {
            Ok(url) => url,
            Err(e) => return self.fail_early(Operation::Fetch, e),
        };
        let params = options.query();
        let key = request_key(&url, &params);

        let debounce = if options.debounce_ms > 0 {
            Duration::from_millis(options.debounce_ms)
        } else {
            self.inner.kind.default_debounce()
        };
        if !debounce.is_zero() {
            return self.debounced_fetch(url, params, key, debounce).await;
        }

        self.fetch_now(url, params, key).await
    }

    fn fetch_url(&self, options: &RequestOptions) -> Result<String, ModelError> {
        if let Some(url) = &options.url {
            return Ok(url.clone());
        }

        let id = options
            .id
            .clone()
            .filter(|id| !id.is_null())
            .or_else(|| self.id());
        match id {
            Some(id) => Ok(self.url(Some(&id))),
            None if self.inner.requires_id => Err(ModelError::id_required()),
            None => Ok(self.url(None)),
        }
    }

    async fn debounced_fetch(
        &self,
        url: String,
        params: Params,
        key: String,
        delay: Duration,
    ) -> RequestOutcome {
        let (generation, token) = self.requests().replace_debounce();
        debug!(request_key = %key, delay_ms = delay.as_millis() as u64, "Debouncing fetch");

        let model = self.clone();
        let timer = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => RequestOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {
                    model.requests().settle_debounce(generation);
                    model.fetch_now(url, params, key).await
                }
            }
        });

        timer.await.unwrap_or_else(|e| {
            error!(error = %e, "Debounced fetch task failed");
            RequestOutcome::Cancelled
        })
    }

    async fn fetch_now(&self, url: String, params: Params, key: String) -> RequestOutcome {
        let shared = {
            let mut requests = self.requests();
            match requests.plan_fetch(&key) {
                FetchPlan::Join(shared) => shared,
                FetchPlan::Skip => return RequestOutcome::Skipped,
                FetchPlan::Start { generation, token } => {
                    let model = self.clone();
                    let signal = token.clone();
                    let task = tokio::spawn(async move {
                        let outcome = model.perform_fetch(url, params, signal).await;
                        model.requests().finish_fetch(generation);
                        outcome
                    });

                    let shared = async move {
                        task.await.unwrap_or_else(|e| {
                            error!(error = %e, "Fetch task failed");
                            RequestOutcome::Cancelled
                        })
                    }
                    .boxed()
                    .shared();
                    requests.track(key, generation, token, shared.clone());
                    shared
                }
            }
        };

        shared.await
    }

    async fn perform_fetch(
        &self,
        url: String,
        params: Params,
        signal: CancellationToken,
    ) -> RequestOutcome {
        self.store().clear_errors();
        self.emit(ModelEvent::FetchStart { url: url.clone() });
        debug!(url = %url, "Fetching");

        let response = tokio::select! {
            biased;
            _ = signal.cancelled() => Err(TransportError::Aborted),
            result = self.inner.transport.get(&url, &params, signal.clone()) => result,
        };

        match response {
            Err(TransportError::Aborted) => {
                debug!(url = %url, "Fetch cancelled");
                RequestOutcome::Cancelled
            }
            // Result arrived after a supersede/cancel: discard it
            Ok(_) if signal.is_cancelled() => {
                debug!(url = %url, "Discarding result of cancelled fetch");
                RequestOutcome::Cancelled
            }
            Err(e) => self.fail(Operation::Fetch, e.into()),
            Ok(envelope) => self.apply_response(Operation::Fetch, envelope, None, false),
        }
    }

    // ── Save ─────────────────────────────────────────────────────────────────

    /// Create (no identity yet: POST) or update (PUT) the remote resource.
    ///
    /// `data` is the request body; null or `{}` sends the whole model. On
    /// success the response record (or the body, if the backend echoes
    /// nothing) is merged and becomes the new synced snapshot.
    pub async fn save(&self, data: Value, options: RequestOptions) -> RequestOutcome {
        self.store().clear_errors();

        let body = match data {
            Value::Object(map) if !map.is_empty() => Value::Object(map),
            Value::Null | Value::Object(_) => self.to_json(),
            _ => {
                return self.fail(
                    Operation::Save,
                    ModelError::Validation("save data must be an object".to_string()),
                )
            }
        };

        let id = options
            .id
            .clone()
            .filter(|id| !id.is_null())
            .or_else(|| self.id());
        let created = id.is_none();
        let url = match &options.url {
            Some(url) => url.clone(),
            None if created => self.url(None),
            None => self.url(id.as_ref()),
        };
        let params = options.query();

        debug!(url = %url, created, "Saving");
        let response = {
            let _active = ActiveRequest::begin(self);
            if created {
                self.inner.transport.post(&url, &body, &params).await
            } else {
                self.inner.transport.put(&url, &body, &params).await
            }
        };

        match response {
            Err(e) => self.fail(Operation::Save, e.into()),
            Ok(envelope) => self.apply_response(Operation::Save, envelope, Some(body), created),
        }
    }

    // ── Destroy ──────────────────────────────────────────────────────────────

    /// Delete the remote resource; on success all local state is cleared.
    pub async fn destroy(&self, options: RequestOptions) -> RequestOutcome {
        let id = options
            .id
            .clone()
            .filter(|id| !id.is_null())
            .or_else(|| self.id());
        let Some(id) = id else {
            return self.fail_early(
                Operation::Destroy,
                ModelError::Validation("ID required to destroy".to_string()),
            );
        };
        self.store().clear_errors();

        let url = options.url.clone().unwrap_or_else(|| self.url(Some(&id)));
        let params = options.query();

        debug!(url = %url, "Destroying");
        let response = {
            let _active = ActiveRequest::begin(self);
            self.inner.transport.delete(&url, &params).await
        };

        let envelope = match response {
            Ok(envelope) => envelope,
            Err(e) => return self.fail(Operation::Destroy, e.into()),
        };

        match classify(&envelope) {
            Classified::Failed(e) => self.fail(Operation::Destroy, e),
            Classified::Rejected(errors) => {
                let message = rejection_message(&errors);
                {
                    let mut store = self.store();
                    store.replace_errors(errors);
                    store.set_operation_error(Operation::Destroy, &message);
                }
                warn!(url = %url, error = %message, "Destroy rejected");
                self.emit(ModelEvent::Failed {
                    operation: Operation::Destroy,
                    message,
                });
                RequestOutcome::Rejected(envelope)
            }
            Classified::Payload(_) => {
                self.store().clear();
                self.inner
                    .synced_at
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                info!(url = %url, "Destroyed");
                self.emit(ModelEvent::Destroyed { id: Some(id) });
                RequestOutcome::Synced(envelope)
            }
        }
    }

    // ── Outcome handling ─────────────────────────────────────────────────────

    /// Interpret an envelope for fetch/save. `fallback` is merged when the
    /// backend reports success without returning a record.
    fn apply_response(
        &self,
        operation: Operation,
        envelope: Envelope,
        fallback: Option<Value>,
        created: bool,
    ) -> RequestOutcome {
        match classify(&envelope) {
            Classified::Failed(e) => self.fail(operation, e),
            Classified::Rejected(errors) => {
                let message = rejection_message(&errors);
                self.store().replace_errors(errors);
                warn!(operation = %operation, error = %message, "Request rejected by backend");
                self.emit(ModelEvent::Failed { operation, message });
                RequestOutcome::Rejected(envelope)
            }
            Classified::Payload(payload) => {
                let payload = match (payload, fallback) {
                    (payload @ Value::Object(_), _) => payload,
                    (_, Some(fallback)) => fallback,
                    (payload, None) => payload,
                };

                let snapshot = {
                    let mut store = self.store();
                    store.set_many(payload, SetOptions::default());
                    store.commit();
                    store.clear_errors();
                    store.to_json()
                };
                if self.inner.timestamps {
                    *self
                        .inner
                        .synced_at
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
                }

                match operation {
                    Operation::Save => self.emit(ModelEvent::Saved {
                        created,
                        snapshot,
                    }),
                    _ => self.emit(ModelEvent::Fetched { snapshot }),
                }
                RequestOutcome::Synced(envelope)
            }
        }
    }

    /// Local precondition failed: reset errors, then record the failure.
    fn fail_early(&self, operation: Operation, e: ModelError) -> RequestOutcome {
        self.store().clear_errors();
        self.fail(operation, e)
    }

    fn fail(&self, operation: Operation, e: ModelError) -> RequestOutcome {
        let message = e.message().to_string();
        self.store().set_operation_error(operation, &message);
        warn!(
            kind = %self.inner.kind.name(),
            operation = %operation,
            status = e.status(),
            error = %message,
            "Request failed"
        );
        self.emit(ModelEvent::Failed { operation, message });
        RequestOutcome::Failed(e)
    }
}

fn rejection_message(errors: &Map<String, Value>) -> String {
    errors
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("request rejected")
        .to_string()
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("kind", &self.inner.kind.name())
            .field("endpoint", &self.inner.endpoint)
            .field("store", &*self.store())
            .finish()
    }
}
