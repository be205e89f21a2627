//! Workflow state and the `apply` reducer
//!
//! [`WorkflowState`] is never persisted. Every activation rebuilds it from a
//! zero state by folding the instance's ordered events through
//! [`WorkflowState::apply`], the only place event semantics are defined.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::registry::{AnyWorkflow, WorkflowProcedure};
use crate::workflow::{
    Command, EventKind, HistoryEvent, Resumed, Step, WorkflowContext, WorkflowError,
};

/// A workflow suspended on a named signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalWait {
    /// When the wait was registered
    pub since: DateTime<Utc>,
}

/// Replayed state of one workflow instance
pub struct WorkflowState {
    procedure: WorkflowProcedure,
    ctx: WorkflowContext,
    coroutine: Option<Box<dyn AnyWorkflow>>,
    current: Command,
    has_finished: bool,
    result: Option<Value>,
    exception: Option<WorkflowError>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    signals: HashMap<String, SignalWait>,
}

/// Comparable view of a [`WorkflowState`]
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    pub current: &'static str,
    pub current_replaying: bool,
    pub current_completed: bool,
    pub has_finished: bool,
    pub result: Option<Value>,
    pub exception: Option<WorkflowError>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub waiting_signals: Vec<String>,
}

impl WorkflowState {
    /// Zero state for a procedure; `current` is a completed no-op
    pub fn new(procedure: WorkflowProcedure, ctx: WorkflowContext) -> Self {
        Self {
            procedure,
            ctx,
            coroutine: None,
            current: Command::no_op(),
            has_finished: false,
            result: None,
            exception: None,
            started_at: None,
            finished_at: None,
            cancelled_at: None,
            signals: HashMap::new(),
        }
    }

    /// Fold events in order
    pub fn fold<'a>(self, events: impl IntoIterator<Item = &'a HistoryEvent>) -> Self {
        events.into_iter().fold(self, WorkflowState::apply)
    }

    /// Apply one event
    pub fn apply(mut self, event: &HistoryEvent) -> Self {
        trace!(
            instance_id = %self.ctx.instance_id(),
            event = event.kind.name(),
            seq = ?event.seq,
            "applying event"
        );

        match &event.kind {
            EventKind::WorkflowStarted { input } => self.on_started(input.clone(), event.timestamp),

            EventKind::WorkflowFinished { result, exception } => {
                self.has_finished = true;
                self.finished_at = Some(event.timestamp);
                self.result = result.clone();
                self.exception = exception.clone();
            }

            EventKind::WorkflowCancelled { .. } => {
                self.cancelled_at = Some(event.timestamp);
            }

            EventKind::ActivityStarted { .. } => self.current.mark_replaying(),

            EventKind::TimerScheduled { until } => {
                self.current.adopt_recorded_until(*until);
                self.current.mark_replaying();
            }

            EventKind::ActivityCompleted {
                result, exception, ..
            } => {
                let value = match exception {
                    Some(error) => Err(error.clone()),
                    None => Ok(result.clone().unwrap_or(Value::Null)),
                };
                self.resume(value);
            }

            EventKind::TimerFired => self.resume(Ok(Value::Null)),

            EventKind::WaitingSignal { signal } => {
                self.signals.insert(
                    signal.clone(),
                    SignalWait {
                        since: event.timestamp,
                    },
                );
                self.current.mark_replaying();
            }

            EventKind::SignalReceived { signal, payload } => {
                if self.signals.remove(signal).is_some() {
                    self.resume(Ok(payload.clone().unwrap_or(Value::Null)));
                } else {
                    warn!(
                        instance_id = %self.ctx.instance_id(),
                        %signal,
                        "no workflow waiting for signal, ignoring"
                    );
                }
            }
        }

        self
    }

    fn on_started(&mut self, input: Option<Value>, at: DateTime<Utc>) {
        if self.coroutine.is_some() || self.has_finished {
            warn!(instance_id = %self.ctx.instance_id(), "duplicate workflow_started ignored");
            return;
        }

        self.started_at = Some(at);

        match (self.procedure)(input) {
            Ok(mut workflow) => {
                let step = workflow.start(&self.ctx);
                self.coroutine = Some(workflow);
                match step {
                    Ok(Step::Return(result)) => {
                        self.has_finished = true;
                        self.result = Some(result);
                    }
                    other => self.advance(other),
                }
            }
            Err(error) => self.fail(error),
        }
    }

    fn resume(&mut self, value: Resumed) {
        if self.has_finished {
            debug!(instance_id = %self.ctx.instance_id(), "workflow finished, resume ignored");
            return;
        }

        let Some(workflow) = self.coroutine.as_mut() else {
            warn!(instance_id = %self.ctx.instance_id(), "resume before workflow_started ignored");
            return;
        };

        let step = workflow.resume(&self.ctx, value);
        self.advance(step);
    }

    fn advance(&mut self, step: Result<Step<Value>, WorkflowError>) {
        match step {
            Ok(Step::Yield(cmd)) => self.current = cmd,
            Ok(Step::Return(result)) => self.current = Command::finish(result),
            Err(error) => self.fail(error),
        }
    }

    fn fail(&mut self, error: WorkflowError) {
        debug!(instance_id = %self.ctx.instance_id(), %error, "workflow raised");
        self.has_finished = true;
        self.exception = Some(error);
    }

    /// Whether the engine loop should run `current` again
    pub fn can_advance(&self) -> bool {
        !(self.has_finished || self.cancelled_at.is_some() || self.current.is_completed())
    }

    pub fn instance_id(&self) -> &str {
        self.ctx.instance_id()
    }

    pub fn current(&self) -> &Command {
        &self.current
    }

    pub(crate) fn current_mut(&mut self) -> &mut Command {
        &mut self.current
    }

    pub fn has_finished(&self) -> bool {
        self.has_finished
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn exception(&self) -> Option<&WorkflowError> {
        self.exception.as_ref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }

    /// Signals the workflow is suspended on
    pub fn signals(&self) -> &HashMap<String, SignalWait> {
        &self.signals
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let mut waiting_signals: Vec<String> = self.signals.keys().cloned().collect();
        waiting_signals.sort();

        StateSnapshot {
            current: self.current.name(),
            current_replaying: self.current.is_replaying(),
            current_completed: self.current.is_completed(),
            has_finished: self.has_finished,
            result: self.result.clone(),
            exception: self.exception.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            cancelled_at: self.cancelled_at,
            waiting_signals,
        }
    }
}

impl std::fmt::Debug for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowState")
            .field("instance_id", &self.ctx.instance_id())
            .field("current", &self.current)
            .field("has_finished", &self.has_finished)
            .field("cancelled_at", &self.cancelled_at)
            .field("signals", &self.signals)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{Activity, ActivityContext, ActivityError};
    use crate::engine::WorkflowRegistry;
    use crate::workflow::{CommandKind, Workflow};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static ADD_CALLS: AtomicUsize = AtomicUsize::new(0);

    struct Add;

    #[async_trait]
    impl Activity for Add {
        const TYPE: &'static str = "add";
        type Input = (i64, i64);
        type Output = i64;

        async fn execute(
            &self,
            _ctx: &ActivityContext,
            (a, b): (i64, i64),
        ) -> Result<i64, ActivityError> {
            ADD_CALLS.fetch_add(1, Ordering::SeqCst);
            Ok(a + b)
        }
    }

    /// Sleeps, waits for "go", then adds its two arguments
    struct Pipeline {
        args: (i64, i64),
        stage: u8,
    }

    impl Workflow for Pipeline {
        const TYPE: &'static str = "pipeline";
        type Input = (i64, i64);
        type Output = i64;

        fn new(args: (i64, i64)) -> Self {
            Self { args, stage: 0 }
        }

        fn start(&mut self, ctx: &WorkflowContext) -> Result<Step<i64>, WorkflowError> {
            self.stage = 1;
            Ok(Step::Yield(ctx.sleep(1000)))
        }

        fn resume(
            &mut self,
            ctx: &WorkflowContext,
            value: Resumed,
        ) -> Result<Step<i64>, WorkflowError> {
            match self.stage {
                1 => {
                    self.stage = 2;
                    Ok(Step::Yield(ctx.wait_for_signal("go")))
                }
                2 => {
                    self.stage = 3;
                    ctx.call_activity(Add, self.args).map(Step::Yield)
                }
                _ => Ok(Step::Return(serde_json::from_value(value?)?)),
            }
        }
    }

    fn zero(instance_id: &str) -> WorkflowState {
        let mut registry = WorkflowRegistry::new();
        registry.register::<Pipeline>();
        WorkflowState::new(
            registry.get("pipeline").unwrap(),
            WorkflowContext::new(instance_id),
        )
    }

    fn event(kind: EventKind) -> HistoryEvent {
        HistoryEvent::new(kind)
    }

    fn full_history() -> Vec<HistoryEvent> {
        let until = Utc::now();
        vec![
            event(EventKind::WorkflowStarted {
                input: Some(json!([2, 3])),
            }),
            event(EventKind::TimerScheduled { until }),
            event(EventKind::TimerFired),
            event(EventKind::WaitingSignal {
                signal: "go".into(),
            }),
            event(EventKind::SignalReceived {
                signal: "go".into(),
                payload: None,
            }),
            event(EventKind::ActivityStarted {
                activity_name: "add".into(),
                input: json!([2, 3]),
            }),
            event(EventKind::ActivityCompleted {
                activity_name: "add".into(),
                result: Some(json!(5)),
                exception: None,
            }),
            event(EventKind::WorkflowFinished {
                result: Some(json!(5)),
                exception: None,
            }),
        ]
    }

    #[test]
    fn test_zero_state() {
        let state = zero("wf");
        assert!(!state.can_advance());
        assert!(state.current().is_completed());
        assert!(!state.has_finished());
    }

    #[test]
    fn test_started_yields_first_command() {
        let state = zero("wf").fold(&full_history()[..1]);

        assert!(state.started_at().is_some());
        assert!(matches!(state.current().kind(), CommandKind::Sleep { .. }));
        assert!(!state.current().is_replaying());
        assert!(state.can_advance());
    }

    #[test]
    fn test_full_history_finishes() {
        let state = zero("wf").fold(&full_history());

        assert!(state.has_finished());
        assert_eq!(state.result(), Some(&json!(5)));
        assert!(state.finished_at().is_some());
        assert!(state.signals().is_empty());
    }

    #[test]
    fn test_replay_equivalence_for_every_split() {
        let history = full_history();
        let whole = zero("wf").fold(&history).snapshot();

        for split in 0..=history.len() {
            let (prefix, suffix) = history.split_at(split);
            let incremental = zero("wf").fold(prefix).fold(suffix).snapshot();
            assert_eq!(incremental, whole, "split at {split}");
        }
    }

    #[tokio::test]
    async fn test_replayed_activity_is_not_invoked_again() {
        let history = full_history();
        // Started, timer, signal, and the activity start
        let state = zero("wf-replay").fold(&history[..6]);

        assert!(matches!(
            state.current().kind(),
            CommandKind::ScheduleActivity { .. }
        ));
        assert!(state.current().is_replaying());

        let before = ADD_CALLS.load(Ordering::SeqCst);
        assert!(state.current().run(state.instance_id()).await.is_empty());
        assert_eq!(ADD_CALLS.load(Ordering::SeqCst), before);
    }

    #[test]
    fn test_replayed_sleep_keeps_recorded_wake_up() {
        let recorded = Utc::now() - chrono::Duration::days(3);
        let history = vec![
            event(EventKind::WorkflowStarted {
                input: Some(json!([2, 3])),
            }),
            event(EventKind::TimerScheduled { until: recorded }),
        ];

        let state = zero("wf").fold(&history);
        assert!(state.current().is_replaying());
        assert!(matches!(
            state.current().kind(),
            CommandKind::Sleep { until } if *until == recorded
        ));
    }

    #[test]
    fn test_waiting_signal_registers_and_marks_replaying() {
        let state = zero("wf").fold(&full_history()[..4]);

        assert!(state.signals().contains_key("go"));
        assert!(state.current().is_replaying());
        assert_eq!(state.snapshot().waiting_signals, vec!["go".to_string()]);
    }

    #[test]
    fn test_stale_signal_is_ignored() {
        let history = full_history();
        let before = zero("wf").fold(&history[..3]).snapshot();

        let stale = event(EventKind::SignalReceived {
            signal: "unrelated".into(),
            payload: Some(json!(1)),
        });
        let after = zero("wf").fold(&history[..3]).apply(&stale).snapshot();

        assert_eq!(before, after);
    }

    #[test]
    fn test_activity_exception_escapes_as_workflow_failure() {
        let history = full_history();
        let failed = event(EventKind::ActivityCompleted {
            activity_name: "add".into(),
            result: None,
            exception: Some(ActivityError::new("overflow")),
        });

        let state = zero("wf").fold(&history[..6]).apply(&failed);

        assert!(state.has_finished());
        assert!(state.result().is_none());
        assert_eq!(state.exception().map(|e| e.message.as_str()), Some("overflow"));
    }

    #[test]
    fn test_cancellation_stops_advancing() {
        let history = full_history();
        let cancelled = event(EventKind::WorkflowCancelled {
            reason: Some("operator".into()),
        });

        let state = zero("wf").fold(&history[..1]).apply(&cancelled);

        assert!(state.is_cancelled());
        assert!(!state.has_finished());
        assert!(!state.can_advance());
        assert!(matches!(state.current().kind(), CommandKind::Sleep { .. }));
    }

    #[test]
    fn test_invalid_input_fails_at_start() {
        let started = event(EventKind::WorkflowStarted {
            input: Some(json!("not a tuple")),
        });

        let state = zero("wf").apply(&started);

        assert!(state.has_finished());
        assert_eq!(
            state.exception().and_then(|e| e.code.as_deref()),
            Some("invalid_input")
        );
    }
}
