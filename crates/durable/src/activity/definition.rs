//! Activity trait definition

use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use super::ActivityContext;

/// Error raised by activity code
///
/// Recorded as the `exception` of an `ActivityCompleted` event and thrown
/// back into the workflow, which may handle it or let it escape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityError {
    /// Error message
    pub message: String,

    /// Error type/code for programmatic handling
    #[serde(default)]
    pub error_type: Option<String>,

    /// Additional error details (for debugging)
    #[serde(default)]
    pub details: Option<Value>,
}

impl ActivityError {
    /// Create a new activity error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            details: None,
        }
    }

    /// Set the error type
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// Add error details
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for ActivityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ActivityError {}

impl From<anyhow::Error> for ActivityError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// An activity is an externally-effecting unit of work called by a workflow
///
/// Activities run inline during the activation that schedules them. Their
/// outcome is recorded in history, so a replaying workflow never runs the
/// same call twice.
///
/// `Input` carries the positional arguments. A tuple such as `(i64, i64)`
/// serializes to a JSON array.
///
/// # Example
///
/// ```ignore
/// use weft_durable::prelude::*;
///
/// struct Add;
///
/// #[async_trait]
/// impl Activity for Add {
///     const TYPE: &'static str = "add";
///     type Input = (i64, i64);
///     type Output = i64;
///
///     async fn execute(&self, _ctx: &ActivityContext, (a, b): (i64, i64)) -> Result<i64, ActivityError> {
///         Ok(a + b)
///     }
/// }
/// ```
#[async_trait]
pub trait Activity: Send + Sync + 'static {
    /// Name recorded in `ActivityStarted`/`ActivityCompleted` events
    const TYPE: &'static str;

    /// Input type for the activity
    type Input: Serialize + DeserializeOwned + Send;

    /// Output type for the activity
    type Output: Serialize + DeserializeOwned + Send;

    /// Execute the activity
    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError>;
}

/// Type-erased activity interface
///
/// Lets a [`Command`](crate::workflow::Command) carry any activity with JSON
/// input and output.
#[async_trait]
pub trait AnyActivity: Send + Sync {
    /// Activity name
    fn name(&self) -> &'static str;

    /// Decode the input, execute, and encode the output
    async fn invoke(&self, ctx: &ActivityContext, input: Value) -> Result<Value, ActivityError>;
}

struct ActivityWrapper<A: Activity> {
    inner: A,
}

#[async_trait]
impl<A: Activity> AnyActivity for ActivityWrapper<A> {
    fn name(&self) -> &'static str {
        A::TYPE
    }

    async fn invoke(&self, ctx: &ActivityContext, input: Value) -> Result<Value, ActivityError> {
        let typed: A::Input = serde_json::from_value(input).map_err(|e| {
            ActivityError::new(format!("invalid input for activity {}: {}", A::TYPE, e))
                .with_type("invalid_input")
        })?;

        let output = self.inner.execute(ctx, typed).await?;

        serde_json::to_value(output).map_err(|e| {
            ActivityError::new(format!("failed to encode output of {}: {}", A::TYPE, e))
                .with_type("serialization")
        })
    }
}

/// Shared handle to a type-erased activity
pub type ActivityHandle = Arc<dyn AnyActivity>;

/// Erase an activity's types
pub fn erase<A: Activity>(activity: A) -> ActivityHandle {
    Arc::new(ActivityWrapper { inner: activity })
}
