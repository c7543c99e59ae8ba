//! Real processes: a shell script standing in for ffmpeg prints the kind of
//! stderr output ffmpeg produces.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use transcode_queue::{
    ChannelEventHandler, FfmpegEncoder, OutputParams, QueueSignal, ServiceConfig, ServiceEvent,
    TaskStatus, TranscodeService,
};

const FAKE_FFMPEG: &str = r#"#!/bin/sh
echo "ffmpeg version 9.9-fake Copyright (c) 2000-2024 the FFmpeg developers" >&2
echo "Input #0, matroska,webm, from 'input.mkv':" >&2
echo "  Duration: 00:00:10.00, start: 0.000000, bitrate: 1000 kb/s" >&2
echo "  Stream #0:0: Video: h264 (High), yuv420p(progressive), 1280x720, 25 fps, 25 tbr" >&2
echo "  Stream #0:1: Audio: aac (LC), 48000 Hz, stereo, fltp, 128 kb/s" >&2
printf 'frame=  100 fps= 50 q=28.0 size=     512kB time=00:00:04.00 bitrate=1048.6kbits/s speed=2.0x\r' >&2
printf 'frame=  250 fps= 50 q=28.0 size=    1280kB time=00:00:10.00 bitrate=1048.6kbits/s speed=2.0x\n' >&2
exit 0
"#;

const FAILING_FFMPEG: &str = r#"#!/bin/sh
echo "ffmpeg version 9.9-fake" >&2
echo "Input #0, matroska,webm, from 'input.mkv':" >&2
echo "  Duration: 00:00:10.00, start: 0.000000, bitrate: 1000 kb/s" >&2
echo "Unknown encoder 'libnothing'" >&2
echo "Conversion failed!" >&2
exit 1
"#;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn service_for(binary: PathBuf) -> (TranscodeService, broadcast::Receiver<ServiceEvent>) {
    let mut config = ServiceConfig::default();
    config.encoder.path = Some(binary);
    config.policy.function_level = config.policy.unrestricted_level;
    let (channel, events) = ChannelEventHandler::channel(1024);
    let mut service = TranscodeService::new(config, Arc::new(FfmpegEncoder::new()));
    service.add_event_handler(Box::new(channel));
    (service, events)
}

/// Collect events up to and including the first one matching `done`
async fn collect_until(
    events: &mut broadcast::Receiver<ServiceEvent>,
    done: impl Fn(&ServiceEvent) -> bool,
) -> Vec<ServiceEvent> {
    tokio::time::timeout(Duration::from_secs(10), async {
        let mut seen = Vec::new();
        loop {
            let event = events.recv().await.unwrap();
            let finished = done(&event);
            seen.push(event);
            if finished {
                return seen;
            }
        }
    })
    .await
    .expect("event within timeout")
}

fn is_probed(event: &ServiceEvent) -> bool {
    matches!(event, ServiceEvent::TaskUpdate { task, .. } if task.before.is_populated())
}

fn is_stopped(event: &ServiceEvent) -> bool {
    matches!(
        event,
        ServiceEvent::WorkingStatusUpdate {
            value: QueueSignal::Stop
        }
    )
}

// One test per binary: scripts are written before any process is spawned
#[tokio::test]
async fn test_transcode_with_process_encoder() {
    let dir = TempDir::new().unwrap();
    let working = write_script(dir.path(), "ffmpeg-ok", FAKE_FFMPEG);
    let failing = write_script(dir.path(), "ffmpeg-fail", FAILING_FFMPEG);
    let input = dir.path().join("input.mkv");
    std::fs::write(&input, b"").unwrap();
    let input = input.to_string_lossy().into_owned();

    // Successful run
    let (mut service, mut events) = service_for(working);
    service.init_encoder();
    let id = service.task_add("input.mkv", OutputParams::for_input(input.clone()));
    let (handle, join) = service.spawn();
    let mut seen = collect_until(&mut events, is_probed).await;
    handle
        .execute(transcode_queue::ServiceCommand::QueueStart)
        .await
        .unwrap();

    seen.extend(collect_until(&mut events, is_stopped).await);
    assert!(seen.contains(&ServiceEvent::FfmpegVersion {
        content: "9.9-fake".to_string()
    }));
    assert!(seen.iter().any(|e| matches!(
        e,
        ServiceEvent::ProgressUpdate { status: Some(status), .. } if status.time == 10.0
    )));

    let task = handle.task_snapshot(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Finished);
    assert_eq!(task.before.vcodec, "h264");
    assert_eq!(task.before.vresolution, "1280x720");
    assert_eq!(task.before.duration, 10.0);
    assert!(task.cmd_text.contains("Stream #0:1: Audio: aac"));
    handle.shutdown().await.unwrap();
    join.await.unwrap();

    // Failing run
    let (mut service, mut events) = service_for(failing);
    let id = service.task_add("input.mkv", OutputParams::for_input(input));
    let (handle, join) = service.spawn();
    collect_until(&mut events, is_probed).await;
    handle.invoke("taskStart", vec![serde_json::json!(id)]).await.unwrap();

    collect_until(&mut events, is_stopped).await;
    let task = handle.task_snapshot(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Error);
    assert_eq!(
        task.error_info,
        vec!["Unknown encoder 'libnothing'", "Conversion failed!"]
    );
    handle.shutdown().await.unwrap();
    join.await.unwrap();
}
