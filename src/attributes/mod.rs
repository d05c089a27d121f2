// Attribute store embedded in every model
//
// Holds the attribute map plus the snapshot taken at the last sync, resolves
// dotted and piped reads, applies writes, and broadcasts change events only
// for writes that actually changed something.

use crate::event::{ModelEvent, Operation};
use crate::path::{get_path, segments, set_path};
use crate::pipe::{parse_pipeline, split_key, FormatterRegistry};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};


/// Capacity of a model's event channel. Slow subscribers lag, writers never block.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Derived field computed from the store on every read
pub type ComputedFn = Arc<dyn Fn(&AttributeStore) -> Value + Send + Sync>;

/// Dispatch table of computed fields, looked up by exact name
#[derive(Clone, Default)]
pub struct ComputedFields {
    fields: HashMap<String, ComputedFn>,
}

impl ComputedFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<F>(&mut self, name: &str, field: F)
    where
        F: Fn(&AttributeStore) -> Value + Send + Sync + 'static,
    {
        self.fields.insert(name.to_string(), Arc::new(field));
    }

    pub fn get(&self, name: &str) -> Option<&ComputedFn> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }
}

impl fmt::Debug for ComputedFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.fields.keys().collect();
        names.sort();
        f.debug_struct("ComputedFields").field("fields", &names).finish()
    }
}

/// Options for a write
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Apply the write without broadcasting change events
    pub silent: bool,
}

impl SetOptions {
    pub fn silent() -> Self {
        Self { silent: true }
    }
}

pub struct AttributeStore {
    id: Option<Value>,
    id_attribute: String,
    attributes: Map<String, Value>,
    original: Map<String, Value>,
    errors: Map<String, Value>,
    formatters: Arc<FormatterRegistry>,
    computed: Arc<ComputedFields>,
    events: broadcast::Sender<ModelEvent>,
}

impl AttributeStore {
    /// Standalone store with builtin formatters, no computed fields and its
    /// own event channel.
    pub fn new(data: Value) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self::from_parts(
            data,
            "id",
            Arc::new(FormatterRegistry::default()),
            Arc::new(ComputedFields::new()),
            events,
        )
    }

    pub fn from_parts(
        data: Value,
        id_attribute: &str,
        formatters: Arc<FormatterRegistry>,
        computed: Arc<ComputedFields>,
        events: broadcast::Sender<ModelEvent>,
    ) -> Self {
        let attributes = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                debug!(data = %other, "Ignoring non-object seed data");
                Map::new()
            }
        };
        let id = attributes
            .get(id_attribute)
            .filter(|v| !v.is_null())
            .cloned();

        Self {
            id,
            id_attribute: id_attribute.to_string(),
            original: attributes.clone(),
            attributes,
            errors: Map::new(),
            formatters,
            computed,
            events,
        }
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    /// Read an attribute.
    ///
    /// Plain names check the computed-field table first, then the attribute
    /// map (the id attribute falls back to the identity). Dotted names descend
    /// into nested values. A `|pipeline` suffix formats the resolved value
    /// without touching stored data. Missing paths yield `None`; this never
    /// panics.
    pub fn get(&self, key: &str) -> Option<Value> {
        let key = key.trim();
        if !key.contains('.') && !key.contains('|') {
            if let Some(field) = self.computed.get(key) {
                return Some(field(self));
            }
            return self.resolve(key);
        }

        let (path, pipes) = split_key(key);
        let value = self.resolve(path);
        let Some(source) = pipes else {
            return value;
        };

        match parse_pipeline(source) {
            Ok(steps) => Some(self.formatters.apply(value.unwrap_or(Value::Null), &steps)),
            Err(e) => {
                warn!(key = %key, error = %e, "Invalid pipe expression, returning raw value");
                value
            }
        }
    }

    fn resolve(&self, path: &str) -> Option<Value> {
        match get_path(&self.attributes, path) {
            Some(value) => Some(value.clone()),
            None if path == self.id_attribute => self.id.clone(),
            None => None,
        }
    }

    /// True when `key` resolves to something (computed fields included)
    pub fn has(&self, key: &str) -> bool {
        self.computed.contains(key.trim()) || self.resolve(key.trim()).is_some()
    }

    // ── Writes ───────────────────────────────────────────────────────────────

    /// Set one (possibly dotted) attribute. Returns whether anything changed.
    pub fn set(&mut self, key: &str, value: Value) -> bool {
        self.set_with(key, value, SetOptions::default())
    }

    pub fn set_with(&mut self, key: &str, value: Value, options: SetOptions) -> bool {
        let mut patch = Map::new();
        patch.insert(key.to_string(), value);
        self.set_many(Value::Object(patch), options)
    }

    /// Apply every entry of an object patch in order.
    ///
    /// Null or non-object patches are no-ops. When something changed and the
    /// write isn't silent, one "change" event fires followed by one
    /// "change:<key>" per changed top-level attribute, carrying its whole
    /// value (`set("address.city", ..)` reports `change:address`).
    pub fn set_many(&mut self, patch: Value, options: SetOptions) -> bool {
        let patch = match patch {
            Value::Object(patch) => patch,
            Value::Null => return false,
            other => {
                debug!(patch = %other, "Ignoring non-object patch");
                return false;
            }
        };

        // Events are reported per top-level attribute
        let mut changed: Vec<String> = Vec::new();
        for (key, value) in patch {
            let key = key.trim();
            let Some(top) = segments(key).first().map(|s| s.to_string()) else {
                continue;
            };
            if self.assign(key, value) && !changed.contains(&top) {
                changed.push(top);
            }
        }

        if !changed.is_empty() && !options.silent {
            self.emit_changes(&changed);
        }
        !changed.is_empty()
    }

    fn assign(&mut self, key: &str, value: Value) -> bool {
        if segments(key).is_empty() {
            return false;
        }
        if get_path(&self.attributes, key) == Some(&value) {
            return false;
        }

        if key == self.id_attribute {
            self.id = if value.is_null() {
                None
            } else {
                Some(value.clone())
            };
        }
        set_path(&mut self.attributes, key, value);
        true
    }

    fn emit_changes(&self, keys: &[String]) {
        let snapshot = self.to_json();
        // Send errors only mean nobody is subscribed
        let _ = self.events.send(ModelEvent::Change {
            snapshot: snapshot.clone(),
        });

        for key in keys {
            let value = self.attributes.get(key).cloned().unwrap_or(Value::Null);
            let _ = self.events.send(ModelEvent::AttributeChange {
                key: key.clone(),
                value,
                snapshot: snapshot.clone(),
            });
        }
    }

    // ── Sync state ───────────────────────────────────────────────────────────

    /// True when attributes differ from the last synced snapshot
    pub fn is_dirty(&self) -> bool {
        self.attributes != self.original
    }

    /// Top-level attributes whose value differs from the snapshot
    pub fn changed_attributes(&self) -> Map<String, Value> {
        self.attributes
            .iter()
            .filter(|(key, value)| self.original.get(key.as_str()) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Discard local edits: restore the snapshot and clear errors. Silent.
    pub fn reset(&mut self) {
        self.attributes = self.original.clone();
        self.errors.clear();
        self.id = self
            .original
            .get(&self.id_attribute)
            .filter(|id| !id.is_null())
            .cloned();
    }

    /// Take a fresh snapshot of the current attributes.
    pub fn commit(&mut self) {
        self.original = self.attributes.clone();
    }

    /// Drop all local state after the remote resource was deleted.
    pub fn clear(&mut self) {
        self.attributes.clear();
        self.original.clear();
        self.id = None;
    }

    /// Identity plus attributes, flattened into one object
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        if let Some(id) = &self.id {
            out.insert(self.id_attribute.clone(), id.clone());
        }
        for (key, value) in &self.attributes {
            out.insert(key.clone(), value.clone());
        }
        Value::Object(out)
    }

    // ── Errors ───────────────────────────────────────────────────────────────

    pub fn errors(&self) -> &Map<String, Value> {
        &self.errors
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    /// Record `message` under the operation's key (`fetch`, `save`, `destroy`).
    pub fn set_operation_error(&mut self, operation: Operation, message: &str) {
        self.errors.insert(
            operation.as_str().to_string(),
            Value::String(message.to_string()),
        );
    }

    /// Replace the errors map with a failure payload from the backend.
    pub fn replace_errors(&mut self, errors: Map<String, Value>) {
        self.errors = errors;
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn id(&self) -> Option<&Value> {
        self.id.as_ref()
    }

    pub fn id_attribute(&self) -> &str {
        &self.id_attribute
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub fn original(&self) -> &Map<String, Value> {
        &self.original
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModelEvent> {
        self.events.subscribe()
    }
}

impl fmt::Debug for AttributeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeStore")
            .field("id", &self.id)
            .field("attributes", &self.attributes)
            .field("errors", &self.errors)
            .finish()
    }
}
