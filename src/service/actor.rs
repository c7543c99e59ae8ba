use super::{ServiceCommand, ServiceError, TranscodeService};
use crate::task::{OutputParams, TaskId, TaskSnapshot};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const REQUEST_BUFFER: usize = 64;

enum Request {
    Execute {
        command: ServiceCommand,
        reply: oneshot::Sender<Value>,
    },
    Snapshot {
        id: TaskId,
        reply: oneshot::Sender<Option<TaskSnapshot>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable front door to a service running on its own task
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    tx: mpsc::Sender<Request>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Execute { command, .. } => write!(f, "Execute({})", command.function_name()),
            Request::Snapshot { id, .. } => write!(f, "Snapshot({})", id),
            Request::Shutdown { .. } => write!(f, "Shutdown"),
        }
    }
}

impl ServiceHandle {
    pub async fn execute(&self, command: ServiceCommand) -> Result<Value, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Execute { command, reply })
            .await
            .map_err(|_| ServiceError::Stopped)?;
        rx.await.map_err(|_| ServiceError::Stopped)
    }

    /// Decode and run a `{function, args}` call
    pub async fn invoke(&self, function: &str, args: Vec<Value>) -> Result<Value, ServiceError> {
        let command = ServiceCommand::from_invocation(function, args)?;
        self.execute(command).await
    }

    pub async fn task_add(
        &self,
        name: impl Into<String>,
        params: OutputParams,
    ) -> Result<TaskId, ServiceError> {
        let value = self
            .execute(ServiceCommand::TaskAdd {
                name: name.into(),
                params: Some(params),
            })
            .await?;
        value
            .as_u64()
            .and_then(|id| TaskId::try_from(id).ok())
            .ok_or(ServiceError::Stopped)
    }

    pub async fn task_snapshot(&self, id: TaskId) -> Result<Option<TaskSnapshot>, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Snapshot { id, reply })
            .await
            .map_err(|_| ServiceError::Stopped)?;
        rx.await.map_err(|_| ServiceError::Stopped)
    }

    /// Kill running encoders and stop the service loop
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Shutdown { reply })
            .await
            .map_err(|_| ServiceError::Stopped)?;
        rx.await.map_err(|_| ServiceError::Stopped)
    }
}

impl TranscodeService {
    /// Move the service onto its own tokio task.
    ///
    /// Commands, encoder events and deferred work are all handled on that one
    /// task, one at a time.
    pub fn spawn(self) -> (ServiceHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(REQUEST_BUFFER);
        let join = tokio::spawn(self.run(rx));
        (ServiceHandle { tx }, join)
    }

    async fn run(mut self, mut requests: mpsc::Receiver<Request>) {
        info!("Transcode service started");
        let mut stop_reply = None;
        loop {
            tokio::select! {
                request = requests.recv() => {
                    let Some(request) = request else {
                        debug!("All service handles dropped");
                        break;
                    };
                    match request {
                        Request::Execute { command, reply } => {
                            let _ = reply.send(self.execute(command));
                        }
                        Request::Snapshot { id, reply } => {
                            let _ = reply.send(self.task(id).map(|t| t.snapshot()));
                        }
                        Request::Shutdown { reply } => {
                            stop_reply = Some(reply);
                            break;
                        }
                    }
                }
                Some(message) = self.encoder_rx.recv() => {
                    self.handle_encoder_message(message);
                }
                Some(message) = self.internal_rx.recv() => {
                    self.handle_internal(message);
                }
            }
        }
        self.shutdown();
        info!("Transcode service stopped");
        if let Some(reply) = stop_reply {
            let _ = reply.send(());
        }
    }
}
