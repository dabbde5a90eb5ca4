use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use incident_recorder::config::IncidentdConfig;
use incident_recorder::EncoderKind;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "INCIDENTD_CONFIG",
        "INCIDENTD_CAMERA_ID",
        "INCIDENTD_SOURCE",
        "INCIDENTD_OUTPUT_DIR",
        "INCIDENTD_THRESHOLD",
        "INCIDENTD_RETENTION_SECS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = IncidentdConfig::load().expect("load defaults");
    assert_eq!(cfg.camera_id, "CAM-001");
    assert_eq!(cfg.source.spec, "stub://front_camera");
    assert_eq!(cfg.source.target_fps, 30);
    assert_eq!(cfg.source.analysis_fps, 5);
    assert_eq!(cfg.buffer_window, Duration::from_secs(5));
    assert_eq!(cfg.recorder.quiescence, Duration::from_secs(5));
    assert_eq!(cfg.recorder.settle, Duration::from_millis(500));
    assert_eq!(cfg.recorder.min_frames, 10);
    assert_eq!(cfg.recorder.fps, None);
    assert_eq!(cfg.recorder.encoder, EncoderKind::MjpegAvi);
    assert_eq!(cfg.detection.threshold, 0.6);
    assert_eq!(cfg.detection.window, 5);
    assert_eq!(cfg.detection.overlap, 2);
    assert_eq!(cfg.retention, Duration::from_secs(7 * 24 * 60 * 60));
}

#[test]
fn loads_json_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "camera_id": "CAM-LOBBY",
        "source": {
            "spec": "rtsp://camera-1/stream",
            "target_fps": 15,
            "analysis_fps": 3
        },
        "buffer": { "window_seconds": 10 },
        "recorder": {
            "output_dir": "/var/lib/incidentd",
            "quiescence_secs": 2.5,
            "min_frames": 20,
            "encoder": "ffmpeg-mp4"
        },
        "detection": { "threshold": 0.4, "window": 8, "overlap": 3 },
        "retention": { "seconds": 43200 }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("INCIDENTD_CONFIG", file.path());
    std::env::set_var("INCIDENTD_SOURCE", "stub://override");
    std::env::set_var("INCIDENTD_THRESHOLD", "0.75");
    std::env::set_var("INCIDENTD_RETENTION_SECS", "86400");

    let cfg = IncidentdConfig::load().expect("load config");

    assert_eq!(cfg.camera_id, "CAM-LOBBY");
    assert_eq!(cfg.source.spec, "stub://override");
    assert_eq!(cfg.source.target_fps, 15);
    assert_eq!(cfg.source.analysis_fps, 3);
    assert_eq!(cfg.buffer_window, Duration::from_secs(10));
    assert_eq!(cfg.recorder.output_dir.to_str(), Some("/var/lib/incidentd"));
    assert_eq!(cfg.recorder.quiescence, Duration::from_millis(2500));
    assert_eq!(cfg.recorder.min_frames, 20);
    assert_eq!(cfg.recorder.encoder, EncoderKind::FfmpegMp4);
    assert_eq!(cfg.detection.threshold, 0.75);
    assert_eq!(cfg.detection.window, 8);
    assert_eq!(cfg.detection.overlap, 3);
    assert_eq!(cfg.retention.as_secs(), 86400);

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
camera_id = "CAM-GATE"

[source]
spec = "0"
target_fps = 25

[recorder]
fps = 12
settle_ms = 100
"#;
    file.write_all(toml.as_bytes()).expect("write config");

    let cfg = IncidentdConfig::load_from(Some(file.path())).expect("load toml");
    assert_eq!(cfg.camera_id, "CAM-GATE");
    assert_eq!(cfg.source.spec, "0");
    assert_eq!(cfg.source.target_fps, 25);
    assert_eq!(cfg.recorder.fps, Some(12));
    assert_eq!(cfg.recorder.settle, Duration::from_millis(100));
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    for json in [
        r#"{ "source": { "target_fps": 0 } }"#,
        r#"{ "source": { "analysis_fps": 0 } }"#,
        r#"{ "buffer": { "window_seconds": 0 } }"#,
        r#"{ "recorder": { "quiescence_secs": 0 } }"#,
        r#"{ "recorder": { "quiescence_secs": 1e19 } }"#,
        r#"{ "recorder": { "quiescence_secs": 3601 } }"#,
        r#"{ "detection": { "threshold": 1.5 } }"#,
        r#"{ "detection": { "window": 3, "overlap": 3 } }"#,
        r#"{ "retention": { "seconds": 0 } }"#,
        r#"{ "unknown_section": {} }"#,
    ] {
        let mut file = NamedTempFile::new().expect("temp config");
        file.write_all(json.as_bytes()).expect("write config");
        assert!(
            IncidentdConfig::load_from(Some(file.path())).is_err(),
            "accepted {}",
            json
        );
    }

    std::env::set_var("INCIDENTD_THRESHOLD", "high");
    assert!(IncidentdConfig::load().is_err());
    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("INCIDENTD_CONFIG", "/nonexistent/incidentd.json");
    assert!(IncidentdConfig::load().is_err());
    clear_env();
}
