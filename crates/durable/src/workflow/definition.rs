//! Workflow trait definition

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use super::{Command, WorkflowContext};
use crate::activity::ActivityError;

/// Error escaping a workflow procedure
///
/// Terminal: the instance finishes with this error recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowError {
    /// Error message
    pub message: String,

    /// Error code for programmatic handling
    #[serde(default)]
    pub code: Option<String>,
}

impl WorkflowError {
    /// Create a new workflow error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Set the error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl std::fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{}: {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for WorkflowError {}

impl From<ActivityError> for WorkflowError {
    fn from(err: ActivityError) -> Self {
        Self {
            message: err.message,
            code: Some(err.error_type.unwrap_or_else(|| "activity_failed".to_string())),
        }
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string()).with_code("serialization")
    }
}

/// Outcome of advancing a workflow by one step
#[derive(Debug)]
pub enum Step<T> {
    /// Suspend at a command
    Yield(Command),
    /// Return the final result
    Return(T),
}

impl<T> Step<T> {
    /// Map the returned value
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Step<U> {
        match self {
            Step::Yield(cmd) => Step::Yield(cmd),
            Step::Return(value) => Step::Return(f(value)),
        }
    }
}

/// Value a suspended workflow is resumed with
///
/// `Ok` carries an activity result, a signal payload, or `null` for a fired
/// timer. `Err` is an activity failure thrown into the workflow.
pub type Resumed = Result<Value, ActivityError>;

/// A workflow is a resumable procedure written as an explicit state machine
///
/// The engine calls [`start`](Workflow::start) once, then
/// [`resume`](Workflow::resume) each time the last yielded command
/// completes. Each call returns either the next command to suspend at or the
/// final output. Returning `Err` fails the workflow.
///
/// # Determinism
///
/// Given the same sequence of resume values, a workflow must yield the same
/// sequence of commands. State is rebuilt by replay on every activation, so
/// workflows must not read clocks, randomness or I/O directly. Use the
/// [`WorkflowContext`] helpers instead.
///
/// # Example
///
/// ```ignore
/// use weft_durable::prelude::*;
///
/// #[derive(Default)]
/// struct SumWorkflow {
///     args: (i64, i64),
/// }
///
/// impl Workflow for SumWorkflow {
///     const TYPE: &'static str = "sum";
///     type Input = (i64, i64);
///     type Output = i64;
///
///     fn new(args: Self::Input) -> Self {
///         Self { args }
///     }
///
///     fn start(&mut self, ctx: &WorkflowContext) -> Result<Step<i64>, WorkflowError> {
///         ctx.call_activity(Add, self.args).map(Step::Yield)
///     }
///
///     fn resume(&mut self, _ctx: &WorkflowContext, value: Resumed) -> Result<Step<i64>, WorkflowError> {
///         Ok(Step::Return(serde_json::from_value(value?)?))
///     }
/// }
/// ```
pub trait Workflow: Send + Sync + 'static {
    /// Default alias used for registration
    const TYPE: &'static str;

    /// Positional arguments, decoded from the `WorkflowStarted` input
    ///
    /// A missing input decodes from `null`, so `()` accepts it.
    type Input: DeserializeOwned + Send;

    /// Final result
    type Output: Serialize + Send;

    /// Create a new workflow from its input
    fn new(input: Self::Input) -> Self;

    /// Run until the first suspend point
    fn start(&mut self, ctx: &WorkflowContext) -> Result<Step<Self::Output>, WorkflowError>;

    /// Continue after the last yielded command completed
    fn resume(
        &mut self,
        ctx: &WorkflowContext,
        value: Resumed,
    ) -> Result<Step<Self::Output>, WorkflowError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(WorkflowError::new("boom").to_string(), "boom");
        assert_eq!(
            WorkflowError::new("boom").with_code("bad_input").to_string(),
            "bad_input: boom"
        );
    }

    #[test]
    fn test_activity_error_conversion() {
        let err: WorkflowError = ActivityError::new("card declined").into();
        assert_eq!(err.message, "card declined");
        assert_eq!(err.code.as_deref(), Some("activity_failed"));

        let err: WorkflowError = ActivityError::new("timeout").with_type("network").into();
        assert_eq!(err.code.as_deref(), Some("network"));
    }

    #[test]
    fn test_step_map() {
        match Step::<i64>::Return(2).map(|v| v * 10) {
            Step::Return(v) => assert_eq!(v, 20),
            Step::Yield(_) => panic!("expected return"),
        }
    }
}
