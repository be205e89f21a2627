//! Workflow context: the handle workflows use to build commands

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::{Command, WorkflowError};
use crate::activity::{erase, Activity};

/// Per-activation handle passed to workflow code
///
/// Builds the commands a workflow yields and provides replay-safe
/// randomness. The random generator is seeded from the instance id, so every
/// replay draws the same sequence.
pub struct WorkflowContext {
    instance_id: String,
    rng: Mutex<StdRng>,
}

impl WorkflowContext {
    /// Create a context for an instance
    pub fn new(instance_id: impl Into<String>) -> Self {
        let instance_id = instance_id.into();
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&Sha256::digest(instance_id.as_bytes()));

        Self {
            instance_id,
            rng: Mutex::new(StdRng::from_seed(seed)),
        }
    }

    /// Id of the running instance
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Call an activity with positional arguments
    pub fn call_activity<A: Activity>(
        &self,
        activity: A,
        args: impl Serialize,
    ) -> Result<Command, WorkflowError> {
        let input = serde_json::to_value(args)?;
        Ok(Command::schedule_activity(erase(activity), input))
    }

    /// Sleep for `millis` milliseconds from now
    pub fn sleep(&self, millis: u64) -> Command {
        self.sleep_for(Duration::from_millis(millis))
    }

    /// Sleep for a duration from now
    pub fn sleep_for(&self, duration: Duration) -> Command {
        let until = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|delta| Utc::now().checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Command::sleep(until)
    }

    /// Sleep until an instant
    pub fn sleep_until(&self, until: DateTime<Utc>) -> Command {
        Command::sleep(until)
    }

    /// Suspend until the named signal arrives; resumes with its payload
    pub fn wait_for_signal(&self, signal: impl Into<String>) -> Command {
        Command::wait_signal(signal)
    }

    /// Deterministic random number in `[0, 1)`
    pub fn random(&self) -> f64 {
        self.rng.lock().gen()
    }

    /// Deterministic random `u64`
    pub fn random_u64(&self) -> u64 {
        self.rng.lock().gen()
    }
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::CommandKind;

    #[test]
    fn test_random_is_seeded_by_instance() {
        let a = WorkflowContext::new("order-1");
        let b = WorkflowContext::new("order-1");
        let c = WorkflowContext::new("order-2");

        let seq_a: Vec<u64> = (0..4).map(|_| a.random_u64()).collect();
        let seq_b: Vec<u64> = (0..4).map(|_| b.random_u64()).collect();
        let seq_c: Vec<u64> = (0..4).map(|_| c.random_u64()).collect();

        assert_eq!(seq_a, seq_b);
        assert_ne!(seq_a, seq_c);

        let r = a.random();
        assert!((0.0..1.0).contains(&r));
    }

    #[test]
    fn test_sleep_targets_future() {
        let ctx = WorkflowContext::new("wf");
        let before = Utc::now();

        match ctx.sleep(5000).kind() {
            CommandKind::Sleep { until } => {
                assert!(*until >= before + chrono::Duration::milliseconds(5000));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_wait_for_signal() {
        let ctx = WorkflowContext::new("wf");
        let cmd = ctx.wait_for_signal("order_created");
        assert_eq!(cmd.name(), "wait_signal");
        assert!(!cmd.is_completed());
    }
}
