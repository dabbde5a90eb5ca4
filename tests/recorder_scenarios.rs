use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use incident_recorder::{
    ChannelHandler, EncoderKind, Frame, IncidentArtifact, IncidentRecorder, RecorderConfig,
    RollingBuffer,
};

const QUIESCENCE: Duration = Duration::from_millis(250);
const SETTLE: Duration = Duration::from_millis(50);
const PATIENCE: Duration = Duration::from_secs(5);

fn frame(sequence: u64) -> Frame {
    let at = UNIX_EPOCH + Duration::from_secs(1_750_000_000) + Duration::from_millis(sequence * 10);
    Frame::new(sequence, at, 8, 6, vec![(sequence % 251) as u8; 8 * 6 * 3]).unwrap()
}

fn setup(
    dir: &std::path::Path,
    pre_roll: u64,
    min_frames: usize,
) -> (
    Arc<RollingBuffer>,
    IncidentRecorder,
    mpsc::Receiver<IncidentArtifact>,
) {
    let buffer = Arc::new(RollingBuffer::new(Duration::from_secs(5), 10));
    for seq in 0..pre_roll {
        buffer.push(frame(seq)).unwrap();
    }
    let (tx, rx) = mpsc::channel();
    let recorder = IncidentRecorder::new(
        RecorderConfig {
            output_dir: dir.to_path_buf(),
            camera_id: "CAM-001".to_string(),
            quiescence: QUIESCENCE,
            settle: SETTLE,
            min_frames,
            fps: 10,
            encoder: EncoderKind::MjpegAvi,
        },
        buffer.clone(),
        Arc::new(ChannelHandler(tx)),
    );
    (buffer, recorder, rx)
}

#[test]
fn rolling_window_keeps_latest_fifty_of_two_hundred() {
    let buffer = RollingBuffer::new(Duration::from_secs(5), 10);
    for seq in 0..200 {
        buffer.push(frame(seq)).unwrap();
    }
    assert_eq!(buffer.len(), 50);
    assert_eq!(buffer.snapshot()[0].sequence, 150);
}

#[test]
fn three_event_frames_follow_the_pre_roll() {
    let dir = tempfile::tempdir().unwrap();
    let (buffer, recorder, rx) = setup(dir.path(), 12, 10);
    let pre_roll = buffer.len();

    assert!(recorder.signal_start("x", 0.9));
    for seq in 12..15 {
        assert!(recorder.on_frame(&frame(seq)));
    }

    let artifact = rx.recv_timeout(PATIENCE).expect("artifact");
    assert_eq!(artifact.pre_roll_frames, pre_roll);
    assert_eq!(artifact.frame_count, pre_roll + 3);
    assert_eq!(artifact.confidence, 0.9);
    assert!(artifact.content_hash.starts_with("0x"));
    assert_eq!(artifact.content_hash.len(), 2 + 64);

    // Exactly one completion per event.
    assert!(recorder.wait_idle(PATIENCE));
    assert!(rx.recv_timeout(QUIESCENCE * 2).is_err());
}

#[test]
fn continue_moves_the_finalize_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let (_buffer, recorder, rx) = setup(dir.path(), 12, 10);

    assert!(recorder.signal_start("x", 0.6));
    thread::sleep(QUIESCENCE / 2);
    assert!(recorder.is_event_active());
    let last_signal = Instant::now();
    recorder.signal_continue(0.95);

    let artifact = rx.recv_timeout(PATIENCE).expect("artifact");
    assert!(last_signal.elapsed() >= QUIESCENCE + SETTLE);
    assert_eq!(artifact.confidence, 0.95);
}

#[test]
fn restart_while_capturing_keeps_the_event() {
    let dir = tempfile::tempdir().unwrap();
    let (_buffer, recorder, rx) = setup(dir.path(), 12, 10);

    assert!(recorder.signal_start("first", 0.5));
    assert!(!recorder.signal_start("second", 0.7));

    let artifact = rx.recv_timeout(PATIENCE).expect("artifact");
    assert_eq!(artifact.label, "first");
    assert_eq!(artifact.confidence, 0.7);
    assert!(recorder.wait_idle(PATIENCE));
    assert!(rx.recv_timeout(QUIESCENCE * 2).is_err());
}

#[test]
fn idle_frames_never_reach_an_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let (_buffer, recorder, rx) = setup(dir.path(), 12, 10);

    let stray = Frame::new(500, SystemTime::now(), 8, 6, vec![0; 8 * 6 * 3]).unwrap();
    assert!(!recorder.on_frame(&stray));

    assert!(recorder.signal_start("x", 0.5));
    let artifact = rx.recv_timeout(PATIENCE).expect("artifact");
    assert_eq!(artifact.frame_count, 12);
    assert_eq!(artifact.pre_roll_frames, 12);
}

#[test]
fn events_below_the_floor_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let (_buffer, recorder, rx) = setup(dir.path(), 3, 10);

    assert!(recorder.signal_start("x", 0.9));
    for seq in 3..6 {
        recorder.on_frame(&frame(seq));
    }

    assert!(rx.recv_timeout(QUIESCENCE + SETTLE + QUIESCENCE).is_err());
    assert!(recorder.wait_idle(PATIENCE));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

    // The recorder is usable again.
    assert!(recorder.signal_start("y", 0.9));
    assert!(recorder.wait_idle(PATIENCE));
}
