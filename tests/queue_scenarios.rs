//! End-to-end queue scenarios driven through the public service API with a
//! scripted encoder and a manual clock.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use transcode_queue::encoder::{ControlCall, EncoderEvent, EncoderProgress, ProbeMetadata};
use transcode_queue::task::InputFile;
use transcode_queue::{
    ChannelEventHandler, ManualClock, MockEncoder, NotificationLevel, OutputParams, QueueSignal,
    ServiceConfig, ServiceEvent, TaskId, TaskStatus, TranscodeService, WorkingStatus,
};

struct Harness {
    service: TranscodeService,
    encoder: MockEncoder,
    clock: ManualClock,
    events: broadcast::Receiver<ServiceEvent>,
}

impl Harness {
    fn new(limit: usize) -> Self {
        Self::with_encoder(limit, MockEncoder::new())
    }

    fn with_encoder(limit: usize, encoder: MockEncoder) -> Self {
        let mut config = ServiceConfig::default();
        config.encoder.path = Some(PathBuf::from("/opt/ffmpeg/ffmpeg"));
        config.scheduler.max_concurrent_tasks = limit;

        let clock = ManualClock::default();
        let (channel, events) = ChannelEventHandler::channel(4096);
        let mut service = TranscodeService::new(config, Arc::new(encoder.clone()))
            .with_clock(Arc::new(clock.clone()));
        service.add_event_handler(Box::new(channel));

        Self {
            service,
            encoder,
            clock,
            events,
        }
    }

    fn add(&mut self, name: &str) -> TaskId {
        self.service
            .task_add(name, OutputParams::for_input(format!("/videos/{}.mov", name)))
    }

    fn status(&self, id: TaskId) -> TaskStatus {
        self.service.task(id).map(|t| t.status).unwrap()
    }

    fn statuses(&self) -> Vec<TaskStatus> {
        self.service
            .task_ids()
            .into_iter()
            .map(|id| self.status(id))
            .collect()
    }

    fn report(&mut self, id: TaskId, event: EncoderEvent) {
        self.encoder.session_for(id).unwrap().emit(event);
        self.service.process_pending_events();
        self.check_invariants();
    }

    fn drain_events(&mut self) -> Vec<ServiceEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    /// Running tasks own a session and never exceed the limit
    fn check_invariants(&self) {
        let mut running = 0;
        for id in self.service.task_ids() {
            let task = self.service.task(id).unwrap();
            if task.status == TaskStatus::Running {
                running += 1;
                assert!(task.has_session(), "running task {} without session", id);
            }
        }
        assert!(running <= self.service.config().concurrency_limit());
    }
}

#[tokio::test]
async fn test_limit_two_with_five_tasks() {
    let mut h = Harness::new(2);
    for name in ["a", "b", "c", "d", "e"] {
        h.add(name);
    }
    assert_eq!(h.service.task_ids(), vec![0, 1, 2, 3, 4]);
    h.drain_events();

    h.service.queue_start();
    h.check_invariants();
    use TaskStatus::*;
    assert_eq!(
        h.statuses(),
        vec![Running, Running, IdleQueued, IdleQueued, IdleQueued]
    );
    assert_eq!(h.service.working_status(), WorkingStatus::Running);
    assert!(h.drain_events().contains(&ServiceEvent::WorkingStatusUpdate {
        value: QueueSignal::Start
    }));

    h.report(0, EncoderEvent::Finished);
    assert_eq!(
        h.statuses(),
        vec![Finished, Running, Running, IdleQueued, IdleQueued]
    );

    h.service.queue_pause();
    h.check_invariants();
    assert_eq!(h.statuses(), vec![Finished, Paused, Paused, Idle, Idle]);
    assert_eq!(h.service.working_status(), WorkingStatus::Idle);
    assert_eq!(
        h.encoder.session_for(1).unwrap().calls(),
        vec![ControlCall::Pause]
    );
}

#[tokio::test]
async fn test_queue_pause_then_start_restores_running_set() {
    let mut h = Harness::new(2);
    for name in ["a", "b", "c", "d"] {
        h.add(name);
    }
    h.service.queue_start();
    h.service.queue_pause();

    h.service.queue_start();
    h.check_invariants();

    use TaskStatus::*;
    assert_eq!(h.statuses(), vec![Running, Running, IdleQueued, IdleQueued]);
    // Resumed, not restarted
    assert_eq!(h.encoder.spawn_count(transcode_queue::encoder::EncoderMode::Transcode), 2);
    assert_eq!(
        h.encoder.session_for(0).unwrap().calls(),
        vec![ControlCall::Pause, ControlCall::Resume]
    );
}

#[tokio::test]
async fn test_failures_free_slots() {
    let mut h = Harness::new(1);
    for name in ["a", "b", "c"] {
        h.add(name);
    }
    h.service.queue_start();

    h.report(0, EncoderEvent::Critical(vec!["Conversion failed!".to_string()]));
    assert_eq!(h.status(0), TaskStatus::Error);
    assert_eq!(h.status(1), TaskStatus::Running);

    h.report(1, EncoderEvent::Escaped);
    assert_eq!(h.status(2), TaskStatus::Running);

    h.report(2, EncoderEvent::Finished);
    assert_eq!(h.service.working_status(), WorkingStatus::Idle);
    let events = h.drain_events();
    assert_eq!(
        events.last(),
        Some(&ServiceEvent::WorkingStatusUpdate {
            value: QueueSignal::Stop
        })
    );

    let levels: Vec<_> = h.service.notifications().iter().map(|(_, n)| n.level).collect();
    assert_eq!(
        levels,
        vec![
            NotificationLevel::Error,
            NotificationLevel::Error,
            NotificationLevel::Ok
        ]
    );
}

#[tokio::test]
async fn test_user_pause_frees_slot_for_next_task() {
    let mut h = Harness::new(1);
    h.add("a");
    h.add("b");
    h.service.queue_start();

    h.service.task_pause(0);
    h.check_invariants();
    assert_eq!(h.status(0), TaskStatus::Paused);
    assert_eq!(h.status(1), TaskStatus::Running);
}

#[tokio::test]
async fn test_ceiling_stops_running_task() {
    let mut h = Harness::with_encoder(2, MockEncoder::new().with_auto_exit(false));
    let id = h.add("long");
    h.service.queue_start();

    h.report(
        id,
        EncoderEvent::Status(EncoderProgress {
            time: 700.0,
            ..Default::default()
        }),
    );
    assert_eq!(h.status(id), TaskStatus::Stopping);

    h.report(id, EncoderEvent::Exited);
    assert_eq!(h.status(id), TaskStatus::Error);
    assert!(!h.service.task(id).unwrap().has_session());

    let (_, notification) = h.service.notifications().iter().last().unwrap();
    assert_eq!(notification.level, NotificationLevel::Error);
    assert!(notification.content.contains("duration limit"));
}

#[tokio::test]
async fn test_remote_task_upload_then_probe() {
    let mut h = Harness::new(2);
    let mut params = OutputParams::default();
    params.input.files.push(InputFile::default());
    let id = h.service.task_add("upload.mp4", params);
    assert_eq!(h.status(id), TaskStatus::Initializing);

    h.service.merge_uploaded(id, &["f00d".to_string()]);
    assert_eq!(h.status(id), TaskStatus::Idle);

    h.encoder
        .probe_for(id)
        .unwrap()
        .emit(EncoderEvent::Metadata(ProbeMetadata {
            format: Some("mov".to_string()),
            duration: Some(12.0),
            vcodec: Some("hevc".to_string()),
            vresolution: Some("3840x2160".to_string()),
            ..Default::default()
        }));
    h.service.process_pending_events();

    let task = h.service.task(id).unwrap();
    assert_eq!(task.before.format, "mov");
    assert_eq!(task.before.duration, 12.0);
    assert_eq!(task.before.vresolution, "3840x2160");

    // Remote outputs are written to the download cache
    h.service.task_start(id);
    let args = h.encoder.session_for(id).unwrap().command.args;
    let output = PathBuf::from(args.last().unwrap());
    assert!(output.starts_with(&h.service.config().storage.download_dir));
    assert!(output.to_string_lossy().ends_with(".mp4"));
}

#[tokio::test]
async fn test_pause_resume_elapsed_accounting() {
    let mut h = Harness::new(2);
    let id = h.add("clip");
    h.service.task_start(id);

    let intervals = [(30, 20), (15, 60), (5, 0)];
    let mut last_t = 0.0;
    for (run, idle) in intervals {
        h.clock.advance_secs(run);
        h.report(
            id,
            EncoderEvent::Status(EncoderProgress {
                time: 1.0,
                ..Default::default()
            }),
        );
        let t = h.service.task(id).unwrap().progress.time.last().unwrap().0;
        assert!(t >= last_t);
        last_t = t;

        h.service.task_pause(id);
        h.clock.advance_secs(idle);
        h.service.task_resume(id);
    }
    h.service.task_pause(id);

    assert_eq!(h.service.task(id).unwrap().progress.elapsed, 50.0);
}

#[tokio::test]
async fn test_deleted_task_is_gone_for_good() {
    let mut h = Harness::new(2);
    let a = h.add("a");
    let b = h.add("b");
    h.service.queue_start();

    h.service.task_delete(a);
    h.service.process_pending_events();
    assert_eq!(h.service.task_ids(), vec![b]);

    h.drain_events();
    h.service.task_start(a);
    h.service.task_pause(a);
    h.service.task_resume(a);
    h.service.task_reset(a);
    h.service.task_delete(a);
    h.service.trial_limit_stop(a, false);
    assert!(h.drain_events().is_empty());

    // Ids are never reused
    assert_eq!(h.add("c"), 2);
}
