//! Job records and their state machine.

pub mod model;
pub mod store;

pub use model::{FailureOutcome, InvalidTransition, Job, JobStatus};
pub use store::JobStore;
