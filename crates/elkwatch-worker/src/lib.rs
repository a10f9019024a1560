//! The evaluation engine: per-rule execution, scheduling, and retention
//! cleanup.
//!
//! The [`scheduler::Scheduler`] owns one reconcile task, one cleanup task,
//! and one cooperative task per enabled rule. Every rule execution runs
//! under a global concurrency semaphore, and the permit is held until the
//! detached persistence/notification step finishes, so the semaphore is a
//! real ceiling on outbound load.

pub mod cleanup;
pub mod error;
pub mod executor;
pub mod scheduler;
pub mod window;


pub use error::{ExecError, ExecOutcome};
pub use executor::Executor;
pub use scheduler::{Scheduler, SchedulerHandle};
