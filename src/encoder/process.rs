use super::parser::OutputParser;
use super::{
    Encoder, EncoderCommand, EncoderControl, EncoderError, EncoderEvent, EncoderEvents,
    EncoderMode,
};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Spawns real ffmpeg processes through `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegEncoder;

impl FfmpegEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl Encoder for FfmpegEncoder {
    fn spawn(
        &self,
        command: EncoderCommand,
        events: EncoderEvents,
    ) -> Result<Box<dyn EncoderControl>, EncoderError> {
        info!("Spawning encoder: {}", command.command_line());

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EncoderError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let stderr = child.stderr.take();
        let (kill_tx, kill_rx) = oneshot::channel();
        let exit_requested = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));

        tokio::spawn(monitor(
            child,
            stderr,
            command.mode,
            events,
            kill_rx,
            exit_requested.clone(),
            running.clone(),
        ));

        Ok(Box::new(FfmpegProcess {
            pid,
            stdin,
            kill_tx: Some(kill_tx),
            exit_requested,
            running,
        }))
    }
}

/// Control handle of one spawned process
#[derive(Debug)]
pub struct FfmpegProcess {
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    kill_tx: Option<oneshot::Sender<()>>,
    exit_requested: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl FfmpegProcess {
    fn ensure_running(&self) -> Result<(), EncoderError> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EncoderError::NotRunning)
        }
    }

    #[cfg(unix)]
    fn signal(&self, signal: nix::sys::signal::Signal) -> Result<(), EncoderError> {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        self.ensure_running()?;
        let pid = self.pid.ok_or(EncoderError::NotRunning)?;
        let pid = i32::try_from(pid).map_err(|e| EncoderError::Signal(e.to_string()))?;
        kill(Pid::from_raw(pid), signal).map_err(|e| EncoderError::Signal(e.to_string()))
    }
}

impl EncoderControl for FfmpegProcess {
    #[cfg(unix)]
    fn pause(&mut self) -> Result<(), EncoderError> {
        self.signal(nix::sys::signal::Signal::SIGSTOP)
    }

    #[cfg(not(unix))]
    fn pause(&mut self) -> Result<(), EncoderError> {
        Err(EncoderError::Unsupported("pause"))
    }

    #[cfg(unix)]
    fn resume(&mut self) -> Result<(), EncoderError> {
        self.signal(nix::sys::signal::Signal::SIGCONT)
    }

    #[cfg(not(unix))]
    fn resume(&mut self) -> Result<(), EncoderError> {
        Err(EncoderError::Unsupported("resume"))
    }

    fn exit(&mut self) -> Result<(), EncoderError> {
        self.ensure_running()?;
        self.exit_requested.store(true, Ordering::SeqCst);

        // A stopped process never reads stdin
        #[cfg(unix)]
        if let Err(e) = self.signal(nix::sys::signal::Signal::SIGCONT) {
            debug!("Could not continue encoder before exit: {}", e);
        }

        match self.stdin.take() {
            Some(mut stdin) => {
                tokio::spawn(async move {
                    if let Err(e) = stdin.write_all(b"q").await {
                        debug!("Failed to write quit command to encoder: {}", e);
                    }
                });
                Ok(())
            }
            None => self.force_kill(),
        }
    }

    fn force_kill(&mut self) -> Result<(), EncoderError> {
        self.exit_requested.store(true, Ordering::SeqCst);
        match self.kill_tx.take() {
            Some(tx) => {
                let _ = tx.send(());
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// Read stderr to the end, then wait for the exit status and report it
async fn monitor(
    mut child: Child,
    stderr: Option<ChildStderr>,
    mode: EncoderMode,
    events: EncoderEvents,
    mut kill_rx: oneshot::Receiver<()>,
    exit_requested: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
) {
    let mut parser = OutputParser::new(mode);
    let mut kill_armed = true;

    if let Some(mut stderr) = stderr {
        let mut buf = [0u8; 4096];
        let mut pending: Vec<u8> = Vec::new();

        loop {
            tokio::select! {
                read = stderr.read(&mut buf) => match read {
                    Ok(0) => break,
                    Ok(n) => {
                        pending.extend_from_slice(&buf[..n]);
                        for line in drain_lines(&mut pending) {
                            for event in parser.parse_line(&line) {
                                events.emit(event);
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Failed reading encoder output: {}", e);
                        break;
                    }
                },
                request = &mut kill_rx, if kill_armed => {
                    kill_armed = false;
                    if request.is_ok() {
                        kill_child(&mut child);
                    }
                }
            }
        }

        if !pending.is_empty() {
            let line = String::from_utf8_lossy(&pending).into_owned();
            for event in parser.parse_line(&line) {
                events.emit(event);
            }
        }
    }

    for event in parser.finish() {
        events.emit(event);
    }

    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            request = &mut kill_rx, if kill_armed => {
                kill_armed = false;
                if request.is_ok() {
                    kill_child(&mut child);
                }
            }
        }
    };
    running.store(false, Ordering::SeqCst);

    let terminal = classify_exit(
        mode,
        status.as_ref().ok(),
        exit_requested.load(Ordering::SeqCst),
        &parser,
    );
    match &status {
        Ok(status) => debug!("Encoder exited with {} ({:?})", status, terminal),
        Err(e) => warn!("Failed to wait for encoder: {}", e),
    }
    events.emit(terminal);
}

fn kill_child(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!("Failed to kill encoder process: {}", e);
    }
}

/// Split complete `\r` or `\n` terminated lines off the front of `pending`
fn drain_lines(pending: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = pending.iter().position(|&b| b == b'\n' || b == b'\r') {
        let line: Vec<u8> = pending.drain(..=pos).collect();
        let text = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
        if !text.is_empty() {
            lines.push(text);
        }
    }
    lines
}

fn classify_exit(
    mode: EncoderMode,
    status: Option<&ExitStatus>,
    exit_requested: bool,
    parser: &OutputParser,
) -> EncoderEvent {
    if exit_requested {
        return EncoderEvent::Exited;
    }

    let success = status.is_some_and(ExitStatus::success);
    match mode {
        EncoderMode::Probe if parser.metadata_emitted() => EncoderEvent::Finished,
        EncoderMode::Probe => EncoderEvent::Critical(parser.errors().to_vec()),
        _ if success => EncoderEvent::Finished,
        _ if !parser.errors().is_empty() => EncoderEvent::Critical(parser.errors().to_vec()),
        _ => EncoderEvent::Escaped,
    }
}
