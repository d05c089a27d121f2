use crate::attributes::{AttributeStore, ComputedFields};
use crate::config::CoreConfig;
use crate::pipe::FormatterRegistry;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Per-type definition shared by every model of one kind (e.g. "user").
///
/// Holds the defaults a model falls back to when its construction options
/// don't override them, plus the formatter registry and the computed-field
/// dispatch table.
#[derive(Debug, Clone)]
pub struct ModelKind {
    name: String,
    endpoint: String,
    requires_id: bool,
    id_attribute: String,
    timestamps: bool,
    min_fetch_interval: Duration,
    default_debounce: Duration,
    formatters: Arc<FormatterRegistry>,
    computed: Arc<ComputedFields>,
}

impl ModelKind {
    pub fn new(name: &str, endpoint: &str) -> Self {
        Self {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            requires_id: true,
            id_attribute: "id".to_string(),
            timestamps: false,
            min_fetch_interval: Duration::from_millis(100),
            default_debounce: Duration::ZERO,
            formatters: Arc::new(FormatterRegistry::default()),
            computed: Arc::new(ComputedFields::new()),
        }
    }

    /// Kind whose defaults come from the `[model]` and `[requests]` sections.
    pub fn from_config(name: &str, endpoint: &str, config: &CoreConfig) -> Self {
        Self::new(name, endpoint)
            .with_requires_id(config.model.requires_id)
            .with_id_attribute(&config.model.id_attribute)
            .with_timestamps(config.model.timestamps)
            .with_min_fetch_interval(Duration::from_millis(config.requests.min_fetch_interval_ms))
            .with_default_debounce(Duration::from_millis(config.requests.default_debounce_ms))
    }

    pub fn with_requires_id(mut self, requires_id: bool) -> Self {
        self.requires_id = requires_id;
        self
    }

    pub fn with_id_attribute(mut self, id_attribute: &str) -> Self {
        self.id_attribute = id_attribute.to_string();
        self
    }

    pub fn with_timestamps(mut self, timestamps: bool) -> Self {
        self.timestamps = timestamps;
        self
    }

    pub fn with_min_fetch_interval(mut self, interval: Duration) -> Self {
        self.min_fetch_interval = interval;
        self
    }

    pub fn with_default_debounce(mut self, debounce: Duration) -> Self {
        self.default_debounce = debounce;
        self
    }

    pub fn with_formatters(mut self, formatters: FormatterRegistry) -> Self {
        self.formatters = Arc::new(formatters);
        self
    }

    /// Register a computed field readable through `get(name)`.
    pub fn with_computed<F>(mut self, name: &str, field: F) -> Self
    where
        F: Fn(&AttributeStore) -> Value + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.computed).insert(name, field);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn requires_id(&self) -> bool {
        self.requires_id
    }

    pub fn id_attribute(&self) -> &str {
        &self.id_attribute
    }

    pub fn timestamps(&self) -> bool {
        self.timestamps
    }

    pub fn min_fetch_interval(&self) -> Duration {
        self.min_fetch_interval
    }

    pub fn default_debounce(&self) -> Duration {
        self.default_debounce
    }

    pub(crate) fn formatters(&self) -> Arc<FormatterRegistry> {
        Arc::clone(&self.formatters)
    }

    pub(crate) fn computed(&self) -> Arc<ComputedFields> {
        Arc::clone(&self.computed)
    }
}

/// Construction options; unset fields fall back to the kind's defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ModelOptions {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub requires_id: Option<bool>,
    #[serde(default)]
    pub id_attribute: Option<String>,
    #[serde(default)]
    pub timestamps: Option<bool>,
}

impl ModelOptions {
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.to_string());
        self
    }

    pub fn with_requires_id(mut self, requires_id: bool) -> Self {
        self.requires_id = Some(requires_id);
        self
    }

    pub fn with_id_attribute(mut self, id_attribute: &str) -> Self {
        self.id_attribute = Some(id_attribute.to_string());
        self
    }

    pub fn with_timestamps(mut self, timestamps: bool) -> Self {
        self.timestamps = Some(timestamps);
        self
    }
}
