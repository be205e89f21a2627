//! Activity execution context

use chrono::{DateTime, Utc};

/// Context provided to activities during execution
#[derive(Debug, Clone)]
pub struct ActivityContext {
    /// Workflow instance that called the activity
    pub instance_id: String,

    /// Name of the running activity
    pub activity_name: String,

    /// When this invocation began
    pub started_at: DateTime<Utc>,
}

impl ActivityContext {
    /// Create a context for an invocation starting now
    pub fn new(instance_id: impl Into<String>, activity_name: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            activity_name: activity_name.into(),
            started_at: Utc::now(),
        }
    }
}
