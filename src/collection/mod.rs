// Ordered list of models of one kind
//
// Entries are deduplicated by identity: adding a record whose id is already
// present updates that model in place instead of appending a second one.

use crate::attributes::SetOptions;
use crate::model::{Model, ModelKind, ModelOptions};
use crate::request::{classify, Classified, RequestOptions, RequestOutcome};
use crate::transport::SharedTransport;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct Collection {
    kind: Arc<ModelKind>,
    transport: SharedTransport,
    models: Vec<Model>,
}

impl Collection {
    pub fn new(kind: Arc<ModelKind>, transport: SharedTransport) -> Self {
        Self {
            kind,
            transport,
            models: Vec::new(),
        }
    }

    /// Add a record, or merge it into the model that already has its id.
    pub fn add(&mut self, data: Value) -> Model {
        let id = data
            .get(self.kind.id_attribute())
            .filter(|id| !id.is_null())
            .cloned();

        if let Some(existing) = id.as_ref().and_then(|id| self.get(id)) {
            existing.set_many(data, SetOptions::default());
            return existing;
        }

        let model = Model::new(
            Arc::clone(&self.kind),
            Arc::clone(&self.transport),
            data,
            ModelOptions::default(),
        );
        self.models.push(model.clone());
        model
    }

    /// Append an existing model unless one with the same id is present.
    pub fn push(&mut self, model: Model) -> bool {
        if let Some(id) = model.id() {
            if self.get(&id).is_some() {
                return false;
            }
        }
        self.models.push(model);
        true
    }

    pub fn remove(&mut self, id: &Value) -> Option<Model> {
        let index = self
            .models
            .iter()
            .position(|model| model.id().as_ref() == Some(id))?;
        Some(self.models.remove(index))
    }

    /// Replace the contents with `items`.
    pub fn reset(&mut self, items: Vec<Value>) {
        self.models.clear();
        for item in items {
            self.add(item);
        }
    }

    pub fn get(&self, id: &Value) -> Option<Model> {
        self.models
            .iter()
            .find(|model| model.id().as_ref() == Some(id))
            .cloned()
    }

    /// Models whose attribute `key` equals `value`
    pub fn where_eq(&self, key: &str, value: &Value) -> Vec<Model> {
        self.models
            .iter()
            .filter(|model| model.get(key).as_ref() == Some(value))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Model> {
        self.models.iter()
    }

    pub fn to_json(&self) -> Value {
        Value::Array(self.models.iter().map(Model::to_json).collect())
    }

    /// Load the kind's list endpoint and replace the contents.
    ///
    /// A logical success must carry an array payload; anything else leaves
    /// the collection untouched.
    pub async fn fetch(&mut self, options: RequestOptions) -> RequestOutcome {
        let url = options
            .url
            .clone()
            .unwrap_or_else(|| self.kind.endpoint().trim_end_matches('/').to_string());
        let params = options.query();

        debug!(kind = %self.kind.name(), url = %url, "Fetching collection");
        let envelope = match self
            .transport
            .get(&url, &params, CancellationToken::new())
            .await
        {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(url = %url, error = %e, "Collection fetch failed");
                return RequestOutcome::Failed(e.into());
            }
        };

        match classify(&envelope) {
            Classified::Payload(Value::Array(items)) => {
                debug!(url = %url, count = items.len(), "Collection loaded");
                self.reset(items);
                RequestOutcome::Synced(envelope)
            }
            Classified::Payload(other) => {
                warn!(url = %url, payload = %other, "Collection payload is not a list");
                RequestOutcome::Rejected(envelope)
            }
            Classified::Rejected(_) => {
                warn!(url = %url, "Collection fetch rejected");
                RequestOutcome::Rejected(envelope)
            }
            Classified::Failed(e) => {
                warn!(url = %url, error = %e, "Collection fetch failed");
                RequestOutcome::Failed(e)
            }
        }
    }
}
