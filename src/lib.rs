//! # Transcode Queue
//!
//! Task lifecycle state machine and bounded-concurrency queue for media
//! transcode jobs, each executed by an external `ffmpeg` process.
//!
//! ## Architecture Overview
//!
//! - **[`service`]**: The transcode service: task transitions, queue admission,
//!   encoder event handling and the actor runtime around them
//! - **[`task`]**: Task model, output parameters, progress ledger, registry and
//!   the queue scheduler
//! - **[`encoder`]**: The encoder contract, the process-backed `ffmpeg`
//!   implementation, its output parser and a scripted mock
//! - **[`event`]**: Outbound service events and the handlers they fan out to
//! - **[`notification`]**: User-facing notification log
//! - **[`config`]**: TOML configuration
//! - **[`cli`]**: Command-line surface of the `tq` binary
//!
//! ## Features
//!
//! ### Task Lifecycle
//! - **Explicit statuses**: initializing, idle, queued, running, paused,
//!   stopping, finished, error
//! - **Graceful and forced stops**: a second reset kills a stopping encoder
//! - **Progress ledger**: elapsed running time across pause/resume cycles
//!
//! ### Queue
//! - **Concurrency limit**: at most `max_concurrent_tasks` running at once
//! - **Automatic refill**: a slot freed by finish, failure, pause or delete is
//!   handed to the next queued task
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use transcode_queue::{FfmpegEncoder, OutputParams, ServiceConfig, TranscodeService};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let encoder = Arc::new(FfmpegEncoder::new());
//!     let mut service = TranscodeService::new(ServiceConfig::default(), encoder);
//!     service.init_encoder();
//!
//!     let (handle, _join) = service.spawn();
//!     handle.task_add("clip", OutputParams::for_input("/media/clip.mkv")).await?;
//!     handle.invoke("queueStart", vec![]).await?;
//!     Ok(())
//! }
//! ```

/// Injectable wall clock.
pub mod clock;

/// Service configuration and TOML loading.
pub mod config;

/// Encoder process contract and implementations.
///
/// Includes the `ffmpeg` stderr parser that turns raw output into progress,
/// metadata, warning and error events.
pub mod encoder;

/// Environment constants and path utilities.
///
/// Centralizes all hardcoded paths and directory names used throughout
/// the application for easier maintenance and consistency.
pub mod env;

/// Outbound events and the bus that delivers them.
pub mod event;

/// User-facing notifications.
pub mod notification;

/// The transcode service and its actor runtime.
pub mod service;

/// Task model and queue scheduling.
pub mod task;

// CLI module for command-line interface
pub mod cli;

// Re-export service types
pub use service::{ServiceCommand, ServiceError, ServiceHandle, TranscodeService};

// Re-export task types
pub use task::{
    OutputParams, QueueSignal, Task, TaskId, TaskRef, TaskSnapshot, TaskStatus, WorkingStatus,
};

// Re-export encoder types
pub use encoder::{Encoder, EncoderControl, EncoderError, FfmpegEncoder, MockEncoder};

// Re-export configuration, events and clock
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ServiceConfig};
pub use event::{
    ChannelEventHandler, EventBus, LoggingEventHandler, ServiceEvent, ServiceEventHandler,
};
pub use notification::{Notification, NotificationLevel};
