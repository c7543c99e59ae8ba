use crate::encoder::{EncoderControl, EncoderError};
use std::fmt;

/// What to do with the task once a requested exit completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAction {
    /// Graceful reset: back to `idle`
    ResetToIdle,
    /// Stopped by the duration ceiling: park in `error`
    FailWithError,
    /// Forced reset; the status was already set
    ClearAfterKill,
}

/// The live binding between a task and its encoder process.
///
/// `generation` tells this run's events apart from those of earlier runs of
/// the same task.
pub struct EncoderSession {
    generation: u64,
    control: Box<dyn EncoderControl>,
    pending_exit: Option<ExitAction>,
}

impl EncoderSession {
    pub fn new(generation: u64, control: Box<dyn EncoderControl>) -> Self {
        Self {
            generation,
            control,
            pending_exit: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Set while an exit or kill is in flight
    pub fn pending_exit(&self) -> Option<ExitAction> {
        self.pending_exit
    }

    pub fn pause(&mut self) -> Result<(), EncoderError> {
        self.control.pause()
    }

    pub fn resume(&mut self) -> Result<(), EncoderError> {
        self.control.resume()
    }

    /// Ask the process to quit; `action` runs when it has
    pub fn exit(&mut self, action: ExitAction) -> Result<(), EncoderError> {
        self.pending_exit = Some(action);
        self.control.exit()
    }

    /// Kill the process; `action` runs when it is gone
    pub fn force_kill(&mut self, action: ExitAction) -> Result<(), EncoderError> {
        self.pending_exit = Some(action);
        self.control.force_kill()
    }
}

impl fmt::Debug for EncoderSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncoderSession")
            .field("generation", &self.generation)
            .field("pending_exit", &self.pending_exit)
            .finish_non_exhaustive()
    }
}
