use super::{
    Encoder, EncoderCommand, EncoderControl, EncoderError, EncoderEvent, EncoderEvents,
    EncoderMode, EventOrigin,
};
use crate::task::TaskId;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Command received by a mock process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCall {
    Pause,
    Resume,
    Exit,
    ForceKill,
}

/// One process spawned by [`MockEncoder`]
#[derive(Debug, Clone)]
pub struct MockSession {
    pub command: EncoderCommand,
    events: EncoderEvents,
    calls: Arc<Mutex<Vec<ControlCall>>>,
}

impl MockSession {
    /// Report an event as if the process had produced it
    pub fn emit(&self, event: EncoderEvent) {
        self.events.emit(event);
    }

    pub fn origin(&self) -> EventOrigin {
        self.events.origin()
    }

    /// Commands received so far, in order
    pub fn calls(&self) -> Vec<ControlCall> {
        lock(&self.calls).clone()
    }
}

#[derive(Debug)]
struct MockState {
    sessions: Vec<MockSession>,
    auto_exit: bool,
    fail_next_spawn: bool,
}

/// Encoder that records every spawn and lets tests script the events.
///
/// By default `exit` and `force_kill` report [`EncoderEvent::Exited`] right
/// away, like a process that quits promptly.
#[derive(Debug, Clone)]
pub struct MockEncoder {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEncoder {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                sessions: Vec::new(),
                auto_exit: true,
                fail_next_spawn: false,
            })),
        }
    }

    /// Whether exit and kill requests complete immediately
    pub fn with_auto_exit(self, auto_exit: bool) -> Self {
        lock(&self.state).auto_exit = auto_exit;
        self
    }

    /// Make the next spawn fail
    pub fn fail_next_spawn(&self) {
        lock(&self.state).fail_next_spawn = true;
    }

    pub fn sessions(&self) -> Vec<MockSession> {
        lock(&self.state).sessions.clone()
    }

    /// Most recent transcode run of a task
    pub fn session_for(&self, task_id: TaskId) -> Option<MockSession> {
        self.find_last(|origin| {
            matches!(origin, EventOrigin::Session { task_id: id, .. } if id == task_id)
        })
    }

    /// Most recent input probe of a task
    pub fn probe_for(&self, task_id: TaskId) -> Option<MockSession> {
        self.find_last(|origin| origin == EventOrigin::Probe { task_id })
    }

    pub fn version_probe(&self) -> Option<MockSession> {
        self.find_last(|origin| origin == EventOrigin::Version)
    }

    pub fn spawn_count(&self, mode: EncoderMode) -> usize {
        lock(&self.state)
            .sessions
            .iter()
            .filter(|s| s.command.mode == mode)
            .count()
    }

    fn find_last(&self, predicate: impl Fn(EventOrigin) -> bool) -> Option<MockSession> {
        lock(&self.state)
            .sessions
            .iter()
            .rev()
            .find(|s| predicate(s.origin()))
            .cloned()
    }
}

impl Encoder for MockEncoder {
    fn spawn(
        &self,
        command: EncoderCommand,
        events: EncoderEvents,
    ) -> Result<Box<dyn EncoderControl>, EncoderError> {
        let mut state = lock(&self.state);
        if state.fail_next_spawn {
            state.fail_next_spawn = false;
            return Err(EncoderError::Spawn {
                program: command.program,
                source: io::Error::new(io::ErrorKind::NotFound, "mock spawn failure"),
            });
        }

        let session = MockSession {
            command,
            events: events.clone(),
            calls: Arc::new(Mutex::new(Vec::new())),
        };
        let control = MockControl {
            events,
            calls: session.calls.clone(),
            auto_exit: state.auto_exit,
        };
        state.sessions.push(session);
        Ok(Box::new(control))
    }
}

struct MockControl {
    events: EncoderEvents,
    calls: Arc<Mutex<Vec<ControlCall>>>,
    auto_exit: bool,
}

impl MockControl {
    fn record(&self, call: ControlCall) {
        lock(&self.calls).push(call);
    }
}

impl EncoderControl for MockControl {
    fn pause(&mut self) -> Result<(), EncoderError> {
        self.record(ControlCall::Pause);
        Ok(())
    }

    fn resume(&mut self) -> Result<(), EncoderError> {
        self.record(ControlCall::Resume);
        Ok(())
    }

    fn exit(&mut self) -> Result<(), EncoderError> {
        self.record(ControlCall::Exit);
        if self.auto_exit {
            self.events.emit(EncoderEvent::Exited);
        }
        Ok(())
    }

    fn force_kill(&mut self) -> Result<(), EncoderError> {
        self.record(ControlCall::ForceKill);
        if self.auto_exit {
            self.events.emit(EncoderEvent::Exited);
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_records_spawns_and_calls() {
        let encoder = MockEncoder::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let origin = EventOrigin::Session {
            task_id: 1,
            generation: 7,
        };
        let command = EncoderCommand::new("ffmpeg", EncoderMode::Transcode, vec![]);

        let mut control = encoder
            .spawn(command, EncoderEvents::new(origin, tx))
            .unwrap();
        control.pause().unwrap();
        control.exit().unwrap();

        let session = encoder.session_for(1).unwrap();
        assert_eq!(session.calls(), vec![ControlCall::Pause, ControlCall::Exit]);
        assert_eq!(encoder.spawn_count(EncoderMode::Transcode), 1);
        assert!(encoder.probe_for(1).is_none());

        let message = rx.recv().await.unwrap();
        assert_eq!(message.origin, origin);
        assert_eq!(message.event, EncoderEvent::Exited);
    }

    #[tokio::test]
    async fn test_fail_next_spawn_only_once() {
        let encoder = MockEncoder::new();
        encoder.fail_next_spawn();
        let (tx, _rx) = mpsc::unbounded_channel();
        let events = EncoderEvents::new(EventOrigin::Version, tx);
        let command = EncoderCommand::new("ffmpeg", EncoderMode::Version, vec![]);

        assert!(encoder.spawn(command.clone(), events.clone()).is_err());
        assert!(encoder.spawn(command, events).is_ok());
        assert!(encoder.version_probe().is_some());
    }

    #[tokio::test]
    async fn test_without_auto_exit() {
        let encoder = MockEncoder::new().with_auto_exit(false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = EncoderEvents::new(EventOrigin::Probe { task_id: 0 }, tx);
        let command = EncoderCommand::new("ffmpeg", EncoderMode::Probe, vec![]);

        let mut control = encoder.spawn(command, events).unwrap();
        control.force_kill().unwrap();
        assert!(rx.try_recv().is_err());
    }
}
