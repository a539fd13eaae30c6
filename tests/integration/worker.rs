// Background worker: message streaming and cancellation

use crate::common::{Behavior, FakeFfmpeg, StaticProbe, request, touch_input};
use serial_test::serial;
use std::time::{Duration, Instant};
use vidopt::engine::worker::{TranscodeHandle, WorkerMessage, spawn_transcode};
use vidopt::engine::{
    AccelPreference, CapabilityProbe, EncoderCandidate, ErrorKind, FfmpegTool, JobState,
    TranscodeError, Transcoder,
};

/// Forward messages until ffmpeg reports it is encoding
fn wait_for_encode_start(handle: &TranscodeHandle) -> Vec<WorkerMessage> {
    let mut seen = Vec::new();
    loop {
        let message = handle
            .receiver()
            .recv_timeout(Duration::from_secs(10))
            .expect("worker went quiet before the encode started");
        let started = matches!(&message, WorkerMessage::LogLine { line, .. } if line == "encoding started");
        seen.push(message);
        if started {
            return seen;
        }
    }
}

#[test]
#[serial]
fn test_worker_streams_states_then_finished() {
    let dir = tempfile::tempdir().unwrap();
    let input = touch_input(dir.path(), "in.mov");
    let output = dir.path().join("out.mp4");

    let fake = FakeFfmpeg::builder().install();
    let transcoder = Transcoder::with_prober(fake.tool(), StaticProbe::none());
    let req = request(input.to_str().unwrap(), output.to_str().unwrap())
        .accel(AccelPreference::Auto)
        .build();
    let job_id = req.job_id();

    let handle = spawn_transcode(transcoder, req);
    assert_eq!(handle.job_id(), job_id);

    let mut states = Vec::new();
    let mut lines = Vec::new();
    let mut finished = 0;
    let result = handle.wait(|message| match message {
        WorkerMessage::StateChanged { job_id: id, state } => {
            assert_eq!(*id, job_id);
            states.push(state.clone());
        }
        WorkerMessage::LogLine { line, .. } => lines.push(line.clone()),
        WorkerMessage::Finished { .. } => finished += 1,
    });

    let done = result.unwrap();
    assert_eq!(done.output_path, output);
    assert_eq!(finished, 1);
    assert_eq!(states.first(), Some(&JobState::Building));
    assert_eq!(states.last(), Some(&JobState::Succeeded));
    assert!(lines.iter().any(|l| l.starts_with("out_time_us=")));
}

#[test]
#[serial]
fn test_worker_cancel_kills_running_encode() {
    let dir = tempfile::tempdir().unwrap();
    let input = touch_input(dir.path(), "in.mov");
    let output = dir.path().join("out.mp4");

    let fake = FakeFfmpeg::builder()
        .on_encode("libx264", Behavior::Hang)
        .install();
    let transcoder = Transcoder::with_prober(fake.tool(), StaticProbe::none());
    let req = request(input.to_str().unwrap(), output.to_str().unwrap()).build();

    let start = Instant::now();
    let handle = spawn_transcode(transcoder, req);

    // Wait until ffmpeg is actually running before cancelling
    let seen = wait_for_encode_start(&handle);

    handle.cancel();
    assert!(handle.cancel_token().is_cancelled());

    let mut states = Vec::new();
    let result = handle.wait(|message| {
        if let WorkerMessage::StateChanged { state, .. } = message {
            states.push(state.clone());
        }
    });

    assert!(matches!(result, Err(TranscodeError::Cancelled)));
    assert_eq!(states.last(), Some(&JobState::Cancelled));
    assert!(!output.exists());
    assert!(start.elapsed() < Duration::from_secs(20));
    assert!(seen.iter().any(|m| matches!(
        m,
        WorkerMessage::StateChanged {
            state: JobState::Running { .. },
            ..
        }
    )));
}

#[test]
#[serial]
fn test_worker_reports_missing_input() {
    let dir = tempfile::tempdir().unwrap();
    let fake = FakeFfmpeg::builder().install();
    let transcoder = Transcoder::with_prober(fake.tool(), StaticProbe::none());
    let req = request(
        dir.path().join("absent.mov").to_str().unwrap(),
        dir.path().join("out.mp4").to_str().unwrap(),
    )
    .build();

    let result = spawn_transcode(transcoder, req).wait(|_| {});
    assert!(matches!(result, Err(TranscodeError::InputNotFound(_))));
    assert!(fake.calls().is_empty());
}

#[test]
#[serial]
fn test_cancel_wins_over_clean_exit() {
    let dir = tempfile::tempdir().unwrap();
    let input = touch_input(dir.path(), "in.mov");
    let output = dir.path().join("out.mp4");

    // ffmpeg catches SIGTERM, leaves a truncated file and exits 0
    let fake = FakeFfmpeg::builder()
        .on_encode("libx264", Behavior::TrapTermAndSucceed)
        .install();
    let transcoder = Transcoder::with_prober(fake.tool(), StaticProbe::none());
    let req = request(input.to_str().unwrap(), output.to_str().unwrap()).build();

    let handle = spawn_transcode(transcoder, req);
    wait_for_encode_start(&handle);
    handle.cancel();

    let mut states = Vec::new();
    let result = handle.wait(|message| {
        if let WorkerMessage::StateChanged { state, .. } = message {
            states.push(state.clone());
        }
    });

    assert!(matches!(result, Err(TranscodeError::Cancelled)));
    assert_eq!(states.last(), Some(&JobState::Cancelled));
    assert!(!states.contains(&JobState::Verifying));
    assert!(!output.exists());
}

struct PanickingRegistry;

impl CapabilityProbe for PanickingRegistry {
    fn is_present(&self, name: &str) -> bool {
        panic!("registry lookup blew up for {name}");
    }

    fn is_functional(&self, _candidate: &EncoderCandidate) -> bool {
        false
    }
}

#[test]
fn test_worker_panic_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let input = touch_input(dir.path(), "in.mov");
    let req = request(
        input.to_str().unwrap(),
        dir.path().join("out.mp4").to_str().unwrap(),
    )
    .accel(AccelPreference::Auto)
    .build();
    let transcoder = Transcoder::with_prober(FfmpegTool::default(), PanickingRegistry);

    let result = spawn_transcode(transcoder, req).wait(|_| {});
    match result {
        Err(err @ TranscodeError::WorkerPanicked(_)) => {
            assert_eq!(err.kind(), ErrorKind::WorkerPanicked);
            assert!(err.to_string().contains("registry lookup blew up for h264_nvenc"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}
