//! Workflow registry: alias to runnable procedure
//!
//! The registry maps workflow aliases to procedures that build type-erased
//! workflow state machines from JSON input.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::workflow::{Resumed, Step, Workflow, WorkflowContext, WorkflowError};

/// Type-erased workflow interface
///
/// Lets the reducer drive workflows without knowing their concrete types.
/// Outputs are encoded as JSON.
pub trait AnyWorkflow: Send + Sync {
    /// Get the workflow type identifier
    fn workflow_type(&self) -> &'static str;

    /// Run until the first suspend point
    fn start(&mut self, ctx: &WorkflowContext) -> Result<Step<Value>, WorkflowError>;

    /// Continue after the last yielded command completed
    fn resume(&mut self, ctx: &WorkflowContext, value: Resumed)
        -> Result<Step<Value>, WorkflowError>;
}

/// Wrapper to implement AnyWorkflow for any Workflow
struct WorkflowWrapper<W: Workflow> {
    inner: W,
}

fn encode<T: serde::Serialize>(step: Step<T>) -> Result<Step<Value>, WorkflowError> {
    match step {
        Step::Yield(cmd) => Ok(Step::Yield(cmd)),
        Step::Return(output) => Ok(Step::Return(serde_json::to_value(output)?)),
    }
}

impl<W: Workflow> AnyWorkflow for WorkflowWrapper<W> {
    fn workflow_type(&self) -> &'static str {
        W::TYPE
    }

    fn start(&mut self, ctx: &WorkflowContext) -> Result<Step<Value>, WorkflowError> {
        encode(self.inner.start(ctx)?)
    }

    fn resume(
        &mut self,
        ctx: &WorkflowContext,
        value: Resumed,
    ) -> Result<Step<Value>, WorkflowError> {
        encode(self.inner.resume(ctx, value)?)
    }
}

/// Builds a workflow from its optional `WorkflowStarted` input
///
/// Fails with a [`WorkflowError`] when the input does not decode, which
/// finishes the instance as failed.
pub type WorkflowProcedure =
    Arc<dyn Fn(Option<Value>) -> Result<Box<dyn AnyWorkflow>, WorkflowError> + Send + Sync>;

/// Registry of workflow procedures keyed by alias
#[derive(Clone)]
pub struct WorkflowRegistry {
    procedures: HashMap<String, WorkflowProcedure>,
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            procedures: HashMap::new(),
        }
    }

    /// Register a workflow under its `TYPE`
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut registry = WorkflowRegistry::new();
    /// registry.register::<OrderWorkflow>();
    /// ```
    pub fn register<W: Workflow>(&mut self) {
        self.register_as::<W>(W::TYPE);
    }

    /// Register a workflow under a custom alias
    pub fn register_as<W: Workflow>(&mut self, alias: impl Into<String>) {
        let procedure: WorkflowProcedure = Arc::new(
            |input: Option<Value>| -> Result<Box<dyn AnyWorkflow>, WorkflowError> {
                let typed: W::Input = serde_json::from_value(input.unwrap_or(Value::Null))
                    .map_err(|e| {
                        WorkflowError::new(format!("invalid input for {}: {}", W::TYPE, e))
                            .with_code("invalid_input")
                    })?;
                Ok(Box::new(WorkflowWrapper { inner: W::new(typed) }))
            },
        );

        self.procedures.insert(alias.into(), procedure);
    }

    /// Check if an alias is registered
    pub fn contains(&self, alias: &str) -> bool {
        self.procedures.contains_key(alias)
    }

    /// Look up the procedure for an alias
    pub fn get(&self, alias: &str) -> Result<WorkflowProcedure, RegistryError> {
        self.procedures
            .get(alias)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownWorkflowType(alias.to_string()))
    }

    /// Get the number of registered aliases
    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }

    /// Get all registered aliases
    pub fn workflow_types(&self) -> impl Iterator<Item = &str> {
        self.procedures.keys().map(|s| s.as_str())
    }
}

impl fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowRegistry")
            .field("workflow_types", &self.procedures.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Errors from registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Workflow alias not registered
    #[error("unknown workflow type: {0}")]
    UnknownWorkflowType(String),
}
