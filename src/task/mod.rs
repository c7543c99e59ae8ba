//! # Task Model
//!
//! Everything the service tracks per transcode job, and the queue that
//! decides which jobs run.
//!
//! - [`Task`] / [`TaskStatus`]: one job and its lifecycle status
//! - [`Transition`]: user commands and the statuses they are expected from
//! - [`OutputParams`]: requested output settings, turned into encoder arguments
//! - [`ProgressLedger`]: progress samples and running-time accounting
//! - [`TaskRegistry`]: id-to-task map plus the template task
//! - [`QueueScheduler`]: concurrency-limited admission of queued tasks
//! - [`EncoderSession`]: a task's binding to its live encoder process

pub mod ledger;
pub mod params;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod types;

pub use ledger::*;
pub use params::*;
pub use registry::*;
pub use scheduler::*;
pub use session::*;
pub use types::*;
