//! Workflows and activities shared by the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use weft_durable::prelude::*;

pub struct Add;

#[async_trait]
impl Activity for Add {
    const TYPE: &'static str = "add";
    type Input = (i64, i64);
    type Output = i64;

    async fn execute(&self, _ctx: &ActivityContext, (a, b): (i64, i64)) -> Result<i64, ActivityError> {
        Ok(a + b)
    }
}

/// Sleeps for the given number of milliseconds before answering
pub struct SlowAdd;

#[async_trait]
impl Activity for SlowAdd {
    const TYPE: &'static str = "slow_add";
    type Input = (u64, i64, i64);
    type Output = i64;

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        (ms, a, b): (u64, i64, i64),
    ) -> Result<i64, ActivityError> {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(a + b)
    }
}

/// `counted_add` executions running right now
pub static COUNTED_ACTIVE: AtomicUsize = AtomicUsize::new(0);
/// Most `counted_add` executions seen running at once
pub static COUNTED_PEAK: AtomicUsize = AtomicUsize::new(0);

/// Like `slow_add`, but tracks how many executions overlap
pub struct CountedAdd;

#[async_trait]
impl Activity for CountedAdd {
    const TYPE: &'static str = "counted_add";
    type Input = (u64, i64, i64);
    type Output = i64;

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        (ms, a, b): (u64, i64, i64),
    ) -> Result<i64, ActivityError> {
        let active = COUNTED_ACTIVE.fetch_add(1, Ordering::SeqCst) + 1;
        COUNTED_PEAK.fetch_max(active, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        COUNTED_ACTIVE.fetch_sub(1, Ordering::SeqCst);
        Ok(a + b)
    }
}

pub struct Explode;

#[async_trait]
impl Activity for Explode {
    const TYPE: &'static str = "explode";
    type Input = ();
    type Output = ();

    async fn execute(&self, _ctx: &ActivityContext, _input: ()) -> Result<(), ActivityError> {
        Err(ActivityError::new("boom").with_type("detonated"))
    }
}

/// Adds its two inputs through the `add` activity
pub struct SumWorkflow {
    args: (i64, i64),
}

impl Workflow for SumWorkflow {
    const TYPE: &'static str = "sum";
    type Input = (i64, i64);
    type Output = i64;

    fn new(args: (i64, i64)) -> Self {
        Self { args }
    }

    fn start(&mut self, ctx: &WorkflowContext) -> Result<Step<i64>, WorkflowError> {
        ctx.call_activity(Add, self.args).map(Step::Yield)
    }

    fn resume(&mut self, _ctx: &WorkflowContext, value: Resumed) -> Result<Step<i64>, WorkflowError> {
        Ok(Step::Return(serde_json::from_value(value?)?))
    }
}

/// Sleeps, then adds
pub struct NapThenSum {
    millis: u64,
    args: (i64, i64),
    woke: bool,
}

impl Workflow for NapThenSum {
    const TYPE: &'static str = "nap_then_sum";
    type Input = (u64, i64, i64);
    type Output = i64;

    fn new((millis, a, b): (u64, i64, i64)) -> Self {
        Self {
            millis,
            args: (a, b),
            woke: false,
        }
    }

    fn start(&mut self, ctx: &WorkflowContext) -> Result<Step<i64>, WorkflowError> {
        Ok(Step::Yield(ctx.sleep(self.millis)))
    }

    fn resume(&mut self, ctx: &WorkflowContext, value: Resumed) -> Result<Step<i64>, WorkflowError> {
        if !self.woke {
            self.woke = true;
            return ctx.call_activity(Add, self.args).map(Step::Yield);
        }
        Ok(Step::Return(serde_json::from_value(value?)?))
    }
}

#[derive(Deserialize)]
struct Order {
    id: i64,
}

/// Waits for `order_created` and returns the order id
pub struct AwaitOrder;

impl Workflow for AwaitOrder {
    const TYPE: &'static str = "await_order";
    type Input = ();
    type Output = i64;

    fn new(_input: ()) -> Self {
        Self
    }

    fn start(&mut self, ctx: &WorkflowContext) -> Result<Step<i64>, WorkflowError> {
        Ok(Step::Yield(ctx.wait_for_signal("order_created")))
    }

    fn resume(&mut self, _ctx: &WorkflowContext, value: Resumed) -> Result<Step<i64>, WorkflowError> {
        let order: Order = serde_json::from_value(value?)?;
        Ok(Step::Return(order.id))
    }
}

/// Lets the activity failure escape
pub struct Fragile;

impl Workflow for Fragile {
    const TYPE: &'static str = "fragile";
    type Input = ();
    type Output = Value;

    fn new(_input: ()) -> Self {
        Self
    }

    fn start(&mut self, ctx: &WorkflowContext) -> Result<Step<Value>, WorkflowError> {
        ctx.call_activity(Explode, ()).map(Step::Yield)
    }

    fn resume(&mut self, _ctx: &WorkflowContext, value: Resumed) -> Result<Step<Value>, WorkflowError> {
        Ok(Step::Return(value?))
    }
}

/// Catches the activity failure and reports it
pub struct Resilient;

impl Workflow for Resilient {
    const TYPE: &'static str = "resilient";
    type Input = ();
    type Output = String;

    fn new(_input: ()) -> Self {
        Self
    }

    fn start(&mut self, ctx: &WorkflowContext) -> Result<Step<String>, WorkflowError> {
        ctx.call_activity(Explode, ()).map(Step::Yield)
    }

    fn resume(&mut self, _ctx: &WorkflowContext, value: Resumed) -> Result<Step<String>, WorkflowError> {
        match value {
            Ok(_) => Ok(Step::Return("unexpected".to_string())),
            Err(e) => Ok(Step::Return(format!("recovered from {}", e.message))),
        }
    }
}

/// Runs `slow_add` once
pub struct SlowSum {
    args: (u64, i64, i64),
}

impl Workflow for SlowSum {
    const TYPE: &'static str = "slow_sum";
    type Input = (u64, i64, i64);
    type Output = i64;

    fn new(args: (u64, i64, i64)) -> Self {
        Self { args }
    }

    fn start(&mut self, ctx: &WorkflowContext) -> Result<Step<i64>, WorkflowError> {
        ctx.call_activity(SlowAdd, self.args).map(Step::Yield)
    }

    fn resume(&mut self, _ctx: &WorkflowContext, value: Resumed) -> Result<Step<i64>, WorkflowError> {
        Ok(Step::Return(serde_json::from_value(value?)?))
    }
}

/// Runs `counted_add` once
pub struct CountedSum {
    args: (u64, i64, i64),
}

impl Workflow for CountedSum {
    const TYPE: &'static str = "counted_sum";
    type Input = (u64, i64, i64);
    type Output = i64;

    fn new(args: (u64, i64, i64)) -> Self {
        Self { args }
    }

    fn start(&mut self, ctx: &WorkflowContext) -> Result<Step<i64>, WorkflowError> {
        ctx.call_activity(CountedAdd, self.args).map(Step::Yield)
    }

    fn resume(&mut self, _ctx: &WorkflowContext, value: Resumed) -> Result<Step<i64>, WorkflowError> {
        Ok(Step::Return(serde_json::from_value(value?)?))
    }
}

/// Executor over a fresh in-process backend with every test workflow registered
pub fn executor() -> (InMemoryBackend, WorkflowExecutor) {
    let backend = InMemoryBackend::new();
    let mut executor = WorkflowExecutor::new(Arc::new(backend.clone()));
    executor.register::<SumWorkflow>();
    executor.register::<NapThenSum>();
    executor.register::<AwaitOrder>();
    executor.register::<Fragile>();
    executor.register::<Resilient>();
    executor.register::<SlowSum>();
    executor.register::<CountedSum>();
    (backend, executor)
}

/// Assert history sequence numbers run 1..=n without gaps
pub fn assert_contiguous(history: &[HistoryEvent]) {
    let seqs: Vec<u64> = history.iter().filter_map(|e| e.seq).collect();
    let expected: Vec<u64> = (1..=history.len() as u64).collect();
    assert_eq!(seqs, expected);
}
