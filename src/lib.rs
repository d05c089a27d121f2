// Formatting pipes and the formatter registry
pub mod pipe;

// Dot-notation paths over JSON maps
pub mod path;

// Attribute store: values, sync snapshot, errors
pub mod attributes;

// Change and lifecycle notifications
pub mod event;

// HTTP transport contract and REST client
pub mod transport;

// Request keys, throttling, in-flight and debounce tracking
pub mod request;

// Models: attribute store + request lifecycle
pub mod model;

// Ordered, identity-deduplicated model lists
pub mod collection;

// TOML + environment configuration
pub mod config;

pub use attributes::{AttributeStore, SetOptions};
pub use collection::Collection;
pub use event::{ModelEvent, Operation};
pub use model::{Model, ModelKind, ModelOptions};
pub use request::{Failure, ModelError, RequestOptions, RequestOutcome};
pub use transport::{Envelope, RestClient, SharedTransport, Transport, TransportError};
