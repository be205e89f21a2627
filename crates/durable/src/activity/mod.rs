//! Activity abstractions
//!
//! Activities are units of work called by workflows. They:
//! - Run inline during the activation that schedules them
//! - Are never retried by the engine
//! - Report failures as [`ActivityError`], which the workflow may catch

mod context;
mod definition;

pub use context::ActivityContext;
pub use definition::{erase, Activity, ActivityError, ActivityHandle, AnyActivity};
