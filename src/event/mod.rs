use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;


/// Remote operation a model performs through its transport
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Fetch,
    Save,
    Destroy,
}

impl Operation {
    /// Key used in a model's `errors` map for failures of this operation
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Fetch => "fetch",
            Operation::Save => "save",
            Operation::Destroy => "destroy",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification broadcast to a model's subscribers.
///
/// Snapshots are `to_json()` renderings of the model taken when the event
/// fired.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelEvent {
    /// Some attribute changed ("change")
    Change { snapshot: Value },

    /// One attribute changed ("change:<key>")
    AttributeChange {
        key: String,
        value: Value,
        snapshot: Value,
    },

    /// A fetch went to the transport ("fetch:start")
    FetchStart { url: String },

    /// Fetch applied fresh remote data ("fetched")
    Fetched { snapshot: Value },

    /// Save succeeded ("saved")
    Saved { snapshot: Value, created: bool },

    /// Remote resource deleted, local state cleared ("destroyed")
    Destroyed { id: Option<Value> },

    /// An operation failed ("<operation>:error")
    Failed { operation: Operation, message: String },
}

impl ModelEvent {
    /// Event name as listeners know it
    pub fn name(&self) -> String {
        match self {
            ModelEvent::Change { .. } => "change".to_string(),
            ModelEvent::AttributeChange { key, .. } => format!("change:{}", key),
            ModelEvent::FetchStart { .. } => "fetch:start".to_string(),
            ModelEvent::Fetched { .. } => "fetched".to_string(),
            ModelEvent::Saved { .. } => "saved".to_string(),
            ModelEvent::Destroyed { .. } => "destroyed".to_string(),
            ModelEvent::Failed { operation, .. } => format!("{}:error", operation),
        }
    }
}
