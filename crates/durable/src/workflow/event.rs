//! History events for persistence and replay

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::WorkflowError;
use crate::activity::ActivityError;

/// A single entry of a workflow instance's event log
///
/// Events are created without a sequence number. The backend assigns `seq`
/// when the event is appended to durable history; pending events never carry
/// one. An event with `visible_at` set is deferred: it is not delivered to
/// the instance before that time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEvent {
    /// Unique event id
    pub id: Uuid,

    /// Instance-local sequence number, assigned on history append
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,

    /// When the event occurred
    pub timestamp: DateTime<Utc>,

    /// Earliest time the event may be delivered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_at: Option<DateTime<Utc>>,

    /// Event payload
    #[serde(flatten)]
    pub kind: EventKind,
}

impl HistoryEvent {
    /// Create an immediate event stamped with the current time
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: Uuid::now_v7(),
            seq: None,
            timestamp: Utc::now(),
            visible_at: None,
            kind,
        }
    }

    /// Defer delivery until `at`
    pub fn visible_at(mut self, at: DateTime<Utc>) -> Self {
        self.visible_at = Some(at);
        self
    }

    /// Override the event timestamp
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Whether the event is scheduled for a later activation
    pub fn is_deferred(&self) -> bool {
        self.visible_at.is_some()
    }

    /// Whether the event may be delivered at `now`
    pub fn is_visible(&self, now: DateTime<Utc>) -> bool {
        self.visible_at.map_or(true, |at| at <= now)
    }

    /// Delivery ordering key for pending events
    pub fn delivery_time(&self) -> DateTime<Utc> {
        self.visible_at.unwrap_or(self.timestamp)
    }
}

/// Kinds of history events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // =========================================================================
    // Workflow Lifecycle Events
    // =========================================================================
    /// Workflow was started
    WorkflowStarted {
        /// Positional arguments, if any
        #[serde(default)]
        input: Option<Value>,
    },

    /// Workflow returned a value or failed
    WorkflowFinished {
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        exception: Option<WorkflowError>,
    },

    /// Workflow was cancelled
    WorkflowCancelled {
        #[serde(default)]
        reason: Option<String>,
    },

    // =========================================================================
    // Activity Events
    // =========================================================================
    /// Activity invocation began
    ActivityStarted {
        activity_name: String,
        input: Value,
    },

    /// Activity invocation returned a value or raised an error
    ActivityCompleted {
        activity_name: String,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        exception: Option<ActivityError>,
    },

    // =========================================================================
    // Timer Events
    // =========================================================================
    /// Sleep was requested until `until`
    TimerScheduled { until: DateTime<Utc> },

    /// Sleep elapsed
    TimerFired,

    // =========================================================================
    // Signal Events
    // =========================================================================
    /// Workflow suspended waiting for a named signal
    WaitingSignal { signal: String },

    /// External signal delivered to the instance
    SignalReceived {
        signal: String,
        #[serde(default)]
        payload: Option<Value>,
    },
}

impl EventKind {
    /// Snake-case name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::WorkflowStarted { .. } => "workflow_started",
            EventKind::WorkflowFinished { .. } => "workflow_finished",
            EventKind::WorkflowCancelled { .. } => "workflow_cancelled",
            EventKind::ActivityStarted { .. } => "activity_started",
            EventKind::ActivityCompleted { .. } => "activity_completed",
            EventKind::TimerScheduled { .. } => "timer_scheduled",
            EventKind::TimerFired => "timer_fired",
            EventKind::WaitingSignal { .. } => "waiting_signal",
            EventKind::SignalReceived { .. } => "signal_received",
        }
    }

    /// Check if this event ends the workflow
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::WorkflowFinished { .. })
    }
}
