//! Commands: the suspend points of a workflow
//!
//! A workflow yields one [`Command`] at a time. The engine runs it, which may
//! trigger a side effect and always reports the outcome as history events.
//! Once a command's "started" event has been folded during replay the
//! command is marked replaying and running it again emits nothing.

use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use super::event::{EventKind, HistoryEvent};
use crate::activity::{ActivityContext, ActivityHandle};

/// Processing status of a command within one activation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// Not yet processed
    Running,
    /// Processed; the engine loop moves on
    Completed,
}

/// What a command does when run
#[derive(Clone)]
pub enum CommandKind {
    /// Placeholder before the workflow starts
    NoOp,

    /// Block until `until`
    Sleep { until: DateTime<Utc> },

    /// Call an activity with JSON-encoded positional arguments
    ScheduleActivity {
        activity: ActivityHandle,
        input: Value,
    },

    /// Block until the named signal arrives
    WaitSignal { signal: String },

    /// Record the workflow's return value
    FinishWorkflow { result: Value },
}

impl fmt::Debug for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::NoOp => write!(f, "NoOp"),
            CommandKind::Sleep { until } => f.debug_struct("Sleep").field("until", until).finish(),
            CommandKind::ScheduleActivity { activity, input } => f
                .debug_struct("ScheduleActivity")
                .field("activity", &activity.name())
                .field("input", input)
                .finish(),
            CommandKind::WaitSignal { signal } => {
                f.debug_struct("WaitSignal").field("signal", signal).finish()
            }
            CommandKind::FinishWorkflow { result } => f
                .debug_struct("FinishWorkflow")
                .field("result", result)
                .finish(),
        }
    }
}

/// One outstanding suspend point
#[derive(Debug, Clone)]
pub struct Command {
    kind: CommandKind,
    replaying: bool,
    status: CommandStatus,
}

impl Command {
    fn with_kind(kind: CommandKind) -> Self {
        Self {
            kind,
            replaying: false,
            status: CommandStatus::Running,
        }
    }

    /// Pre-start placeholder; already completed
    pub fn no_op() -> Self {
        Self {
            kind: CommandKind::NoOp,
            replaying: false,
            status: CommandStatus::Completed,
        }
    }

    /// Sleep until the given instant
    pub fn sleep(until: DateTime<Utc>) -> Self {
        Self::with_kind(CommandKind::Sleep { until })
    }

    /// Call an activity
    pub fn schedule_activity(activity: ActivityHandle, input: Value) -> Self {
        Self::with_kind(CommandKind::ScheduleActivity { activity, input })
    }

    /// Wait for a named signal
    pub fn wait_signal(signal: impl Into<String>) -> Self {
        Self::with_kind(CommandKind::WaitSignal {
            signal: signal.into(),
        })
    }

    /// Finish the workflow with a result
    pub fn finish(result: Value) -> Self {
        Self::with_kind(CommandKind::FinishWorkflow { result })
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    /// Snake-case name used in logs
    pub fn name(&self) -> &'static str {
        match self.kind {
            CommandKind::NoOp => "no_op",
            CommandKind::Sleep { .. } => "sleep",
            CommandKind::ScheduleActivity { .. } => "schedule_activity",
            CommandKind::WaitSignal { .. } => "wait_signal",
            CommandKind::FinishWorkflow { .. } => "finish_workflow",
        }
    }

    /// Whether the side effect was already recorded
    pub fn is_replaying(&self) -> bool {
        self.replaying
    }

    pub(crate) fn mark_replaying(&mut self) {
        self.replaying = true;
    }

    /// Take the wake-up instant from history instead of the one computed now
    pub(crate) fn adopt_recorded_until(&mut self, recorded: DateTime<Utc>) {
        if let CommandKind::Sleep { until } = &mut self.kind {
            *until = recorded;
        }
    }

    pub fn status(&self) -> CommandStatus {
        self.status
    }

    /// Whether the engine is done with this command for the activation
    pub fn is_completed(&self) -> bool {
        self.status == CommandStatus::Completed
    }

    pub(crate) fn set_status(&mut self, status: CommandStatus) {
        self.status = status;
    }

    /// Run the command for `instance_id`
    ///
    /// Returns the events describing what happened. A replaying command
    /// returns no events and has no side effect. Activity errors are captured
    /// in the returned `ActivityCompleted` event, never propagated.
    pub async fn run(&self, instance_id: &str) -> Vec<HistoryEvent> {
        if self.replaying {
            return vec![];
        }

        match &self.kind {
            CommandKind::NoOp => vec![],

            CommandKind::Sleep { until } => vec![
                HistoryEvent::new(EventKind::TimerScheduled { until: *until }),
                HistoryEvent::new(EventKind::TimerFired)
                    .at(*until)
                    .visible_at(*until),
            ],

            CommandKind::ScheduleActivity { activity, input } => {
                let activity_name = activity.name().to_string();
                let started = HistoryEvent::new(EventKind::ActivityStarted {
                    activity_name: activity_name.clone(),
                    input: input.clone(),
                });

                let ctx = ActivityContext::new(instance_id, activity_name.as_str());
                debug!(%instance_id, activity = %activity_name, "invoking activity");

                let completed = match activity.invoke(&ctx, input.clone()).await {
                    Ok(result) => EventKind::ActivityCompleted {
                        activity_name,
                        result: Some(result),
                        exception: None,
                    },
                    Err(error) => {
                        warn!(%instance_id, activity = %activity_name, %error, "activity failed");
                        EventKind::ActivityCompleted {
                            activity_name,
                            result: None,
                            exception: Some(error),
                        }
                    }
                };

                vec![started, HistoryEvent::new(completed)]
            }

            CommandKind::WaitSignal { signal } => vec![HistoryEvent::new(EventKind::WaitingSignal {
                signal: signal.clone(),
            })],

            CommandKind::FinishWorkflow { result } => {
                vec![HistoryEvent::new(EventKind::WorkflowFinished {
                    result: Some(result.clone()),
                    exception: None,
                })]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{erase, Activity, ActivityError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Tally(Arc<AtomicUsize>);

    #[async_trait]
    impl Activity for Tally {
        const TYPE: &'static str = "tally";
        type Input = ();
        type Output = usize;

        async fn execute(&self, _ctx: &ActivityContext, _input: ()) -> Result<usize, ActivityError> {
            Ok(self.0.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }

    struct Broken;

    #[async_trait]
    impl Activity for Broken {
        const TYPE: &'static str = "broken";
        type Input = ();
        type Output = ();

        async fn execute(&self, _ctx: &ActivityContext, _input: ()) -> Result<(), ActivityError> {
            Err(ActivityError::new("boom"))
        }
    }

    #[tokio::test]
    async fn test_no_op_starts_completed() {
        let cmd = Command::no_op();
        assert!(cmd.is_completed());
        assert!(cmd.run("wf").await.is_empty());
    }

    #[tokio::test]
    async fn test_sleep_emits_immediate_and_deferred_events() {
        let until = Utc::now() + chrono::Duration::seconds(5);
        let events = Command::sleep(until).run("wf").await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::TimerScheduled { until });
        assert!(!events[0].is_deferred());
        assert_eq!(events[1].kind, EventKind::TimerFired);
        assert_eq!(events[1].visible_at, Some(until));
        assert_eq!(events[1].timestamp, until);
    }

    #[tokio::test]
    async fn test_activity_runs_once_and_not_when_replaying() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut cmd = Command::schedule_activity(erase(Tally(calls.clone())), json!(null));

        let events = cmd.run("wf").await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].kind, EventKind::ActivityStarted { .. }));
        match &events[1].kind {
            EventKind::ActivityCompleted { result, exception, .. } => {
                assert_eq!(result, &Some(json!(1)));
                assert!(exception.is_none());
            }
            other => panic!("unexpected event {other:?}"),
        }

        cmd.mark_replaying();
        assert!(cmd.run("wf").await.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_activity_error_is_captured() {
        let events = Command::schedule_activity(erase(Broken), json!(null))
            .run("wf")
            .await;

        match &events[1].kind {
            EventKind::ActivityCompleted { result, exception, .. } => {
                assert!(result.is_none());
                assert_eq!(exception.as_ref().map(|e| e.message.as_str()), Some("boom"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wait_signal_and_finish() {
        let events = Command::wait_signal("approved").run("wf").await;
        assert_eq!(
            events[0].kind,
            EventKind::WaitingSignal {
                signal: "approved".to_string()
            }
        );

        let events = Command::finish(json!(7)).run("wf").await;
        assert!(events[0].kind.is_terminal());
    }
}
