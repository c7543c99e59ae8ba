use super::TranscodeService;
use crate::notification::NotificationId;
use crate::task::{OutputParams, TaskId, TaskRef};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Errors from the invocation surface and the service handle
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Invalid argument {index} for {function}: {message}")]
    InvalidArgument {
        function: String,
        index: usize,
        message: String,
    },

    #[error("Transcode service has stopped")]
    Stopped,
}

/// A call into the service, as issued by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceCommand {
    /// Without params the template task's settings are used
    TaskAdd {
        name: String,
        params: Option<OutputParams>,
    },
    MergeUploaded {
        id: TaskId,
        hashes: Vec<String>,
    },
    TaskDelete(TaskId),
    TaskStart(TaskId),
    TaskPause(TaskId),
    TaskResume(TaskId),
    TaskReset(TaskId),
    QueueStart,
    QueuePause,
    DeleteNotification(NotificationId),
    SetParameters {
        ids: Vec<TaskRef>,
        params: OutputParams,
    },
    TrialLimitStop {
        id: TaskId,
        by_frontend: bool,
    },
    InitEncoder,
    EmitEncoderVersion,
}

impl ServiceCommand {
    /// Decode a `{function, args}` call with positional arguments
    pub fn from_invocation(function: &str, args: Vec<Value>) -> Result<Self, ServiceError> {
        let args = Args {
            function,
            values: args,
        };
        let command = match function {
            "taskAdd" => ServiceCommand::TaskAdd {
                name: args.required(0)?,
                params: args.optional(1)?,
            },
            "mergeUploaded" => ServiceCommand::MergeUploaded {
                id: args.required(0)?,
                hashes: args.required(1)?,
            },
            "taskDelete" => ServiceCommand::TaskDelete(args.required(0)?),
            "taskStart" => ServiceCommand::TaskStart(args.required(0)?),
            "taskPause" => ServiceCommand::TaskPause(args.required(0)?),
            "taskResume" => ServiceCommand::TaskResume(args.required(0)?),
            "taskReset" => ServiceCommand::TaskReset(args.required(0)?),
            "queueStart" => ServiceCommand::QueueStart,
            "queuePause" => ServiceCommand::QueuePause,
            "deleteNotification" => ServiceCommand::DeleteNotification(args.required(0)?),
            "setParameter" => ServiceCommand::SetParameters {
                ids: args.required(0)?,
                params: args.required(1)?,
            },
            "trailLimit_stopTranscoding" => ServiceCommand::TrialLimitStop {
                id: args.required(0)?,
                by_frontend: args.optional(1)?.unwrap_or(false),
            },
            "initFFmpeg" => ServiceCommand::InitEncoder,
            "emitFFmpegVersion" => ServiceCommand::EmitEncoderVersion,
            other => return Err(ServiceError::UnknownFunction(other.to_string())),
        };
        Ok(command)
    }

    /// Wire name of the function
    pub fn function_name(&self) -> &'static str {
        match self {
            ServiceCommand::TaskAdd { .. } => "taskAdd",
            ServiceCommand::MergeUploaded { .. } => "mergeUploaded",
            ServiceCommand::TaskDelete(_) => "taskDelete",
            ServiceCommand::TaskStart(_) => "taskStart",
            ServiceCommand::TaskPause(_) => "taskPause",
            ServiceCommand::TaskResume(_) => "taskResume",
            ServiceCommand::TaskReset(_) => "taskReset",
            ServiceCommand::QueueStart => "queueStart",
            ServiceCommand::QueuePause => "queuePause",
            ServiceCommand::DeleteNotification(_) => "deleteNotification",
            ServiceCommand::SetParameters { .. } => "setParameter",
            ServiceCommand::TrialLimitStop { .. } => "trailLimit_stopTranscoding",
            ServiceCommand::InitEncoder => "initFFmpeg",
            ServiceCommand::EmitEncoderVersion => "emitFFmpegVersion",
        }
    }
}

struct Args<'a> {
    function: &'a str,
    values: Vec<Value>,
}

impl Args<'_> {
    fn invalid(&self, index: usize, message: impl Into<String>) -> ServiceError {
        ServiceError::InvalidArgument {
            function: self.function.to_string(),
            index,
            message: message.into(),
        }
    }

    fn required<T: DeserializeOwned>(&self, index: usize) -> Result<T, ServiceError> {
        self.optional(index)?
            .ok_or_else(|| self.invalid(index, "missing argument"))
    }

    /// Missing and `null` both decode to `None`
    fn optional<T: DeserializeOwned>(&self, index: usize) -> Result<Option<T>, ServiceError> {
        match self.values.get(index) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| self.invalid(index, e.to_string())),
        }
    }
}

impl TranscodeService {
    /// Run one command; `taskAdd` returns the new id, everything else `null`
    pub fn execute(&mut self, command: ServiceCommand) -> Value {
        match command {
            ServiceCommand::TaskAdd { name, params } => {
                let params = params.unwrap_or_else(|| self.registry.template().after.clone());
                Value::from(self.task_add(&name, params))
            }
            ServiceCommand::MergeUploaded { id, hashes } => {
                self.merge_uploaded(id, &hashes);
                Value::Null
            }
            ServiceCommand::TaskDelete(id) => {
                self.task_delete(id);
                Value::Null
            }
            ServiceCommand::TaskStart(id) => {
                self.task_start(id);
                Value::Null
            }
            ServiceCommand::TaskPause(id) => {
                self.task_pause(id);
                Value::Null
            }
            ServiceCommand::TaskResume(id) => {
                self.task_resume(id);
                Value::Null
            }
            ServiceCommand::TaskReset(id) => {
                self.task_reset(id);
                Value::Null
            }
            ServiceCommand::QueueStart => {
                self.queue_start();
                Value::Null
            }
            ServiceCommand::QueuePause => {
                self.queue_pause();
                Value::Null
            }
            ServiceCommand::DeleteNotification(id) => {
                self.delete_notification(id);
                Value::Null
            }
            ServiceCommand::SetParameters { ids, params } => {
                self.set_parameters(&ids, &params);
                Value::Null
            }
            ServiceCommand::TrialLimitStop { id, by_frontend } => {
                self.trial_limit_stop(id, by_frontend);
                Value::Null
            }
            ServiceCommand::InitEncoder => {
                self.init_encoder();
                Value::Null
            }
            ServiceCommand::EmitEncoderVersion => {
                self.emit_encoder_version();
                Value::Null
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_task_commands() {
        assert_eq!(
            ServiceCommand::from_invocation("taskStart", vec![json!(3)]).unwrap(),
            ServiceCommand::TaskStart(3)
        );
        assert_eq!(
            ServiceCommand::from_invocation("mergeUploaded", vec![json!(1), json!(["a", "b"])])
                .unwrap(),
            ServiceCommand::MergeUploaded {
                id: 1,
                hashes: vec!["a".to_string(), "b".to_string()]
            }
        );
        assert_eq!(
            ServiceCommand::from_invocation("queuePause", vec![]).unwrap(),
            ServiceCommand::QueuePause
        );
    }

    #[test]
    fn test_decode_optional_arguments() {
        assert_eq!(
            ServiceCommand::from_invocation("trailLimit_stopTranscoding", vec![json!(2)]).unwrap(),
            ServiceCommand::TrialLimitStop {
                id: 2,
                by_frontend: false
            }
        );
        assert_eq!(
            ServiceCommand::from_invocation("taskAdd", vec![json!("clip"), json!(null)]).unwrap(),
            ServiceCommand::TaskAdd {
                name: "clip".to_string(),
                params: None
            }
        );
    }

    #[test]
    fn test_decode_template_id() {
        let command = ServiceCommand::from_invocation(
            "setParameter",
            vec![json!([-1, 4]), json!({ "output": { "format": "mkv" } })],
        )
        .unwrap();

        match command {
            ServiceCommand::SetParameters { ids, params } => {
                assert_eq!(ids, vec![TaskRef::Template, TaskRef::Task(4)]);
                assert_eq!(params.output.format, "mkv");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            ServiceCommand::from_invocation("activate", vec![json!("code")]),
            Err(ServiceError::UnknownFunction(name)) if name == "activate"
        ));
        assert!(matches!(
            ServiceCommand::from_invocation("taskStart", vec![]),
            Err(ServiceError::InvalidArgument { index: 0, .. })
        ));
        assert!(matches!(
            ServiceCommand::from_invocation("taskDelete", vec![json!("x")]),
            Err(ServiceError::InvalidArgument { index: 0, .. })
        ));
        assert!(matches!(
            ServiceCommand::from_invocation("taskStart", vec![json!(-1)]),
            Err(ServiceError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_function_names_round_trip() {
        let command = ServiceCommand::InitEncoder;
        assert_eq!(
            ServiceCommand::from_invocation(command.function_name(), vec![]).unwrap(),
            command
        );
    }
}
