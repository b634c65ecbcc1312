use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use defect_watch::config::DefectConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "DEFECT_CONFIG",
        "DEFECT_DEVICE",
        "DEFECT_MAX_RETRIES",
        "DEFECT_RETRY_DELAY_SECS",
        "DEFECT_DETECTOR_BACKEND",
        "DEFECT_MODEL_PATH",
        "DEFECT_OUTPUT",
        "DEFECT_PREVIEW",
        "DEFECT_TELEGRAM_BOT_TOKEN",
        "DEFECT_TELEGRAM_CHAT_IDS",
        "DEFECT_TWILIO_ACCOUNT_SID",
        "DEFECT_TWILIO_AUTH_TOKEN",
        "DEFECT_TWILIO_FROM",
        "DEFECT_TWILIO_TO",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "camera": {
            "device": "/dev/video2",
            "width": 1280,
            "height": 720,
            "max_retries": 5,
            "retry_delay_secs": 2
        },
        "labels": { "0": "bearing_defect", "7": "gasket_defect" },
        "output": { "video_path": "line2.avi", "jpeg_quality": 70 },
        "alerts": { "workers": 2, "queue_capacity": 16 },
        "telegram": { "bot_token": "123:abc", "chat_ids": ["1001", "1002"] },
        "loop": { "max_consecutive_detect_failures": 5 }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("DEFECT_CONFIG", file.path());
    std::env::set_var("DEFECT_MAX_RETRIES", "4");
    std::env::set_var("DEFECT_TELEGRAM_CHAT_IDS", "2001, 2002,");

    let cfg = DefectConfig::load().expect("load config");

    assert_eq!(cfg.camera.device, "/dev/video2");
    assert_eq!((cfg.camera.width, cfg.camera.height), (1280, 720));
    assert_eq!(cfg.camera.max_retries, 4);
    assert_eq!(cfg.retry_policy().delay, Duration::from_secs(2));
    assert_eq!(cfg.output.video_path, PathBuf::from("line2.avi"));
    assert_eq!(cfg.output.fps, 20);
    assert_eq!(cfg.output.jpeg_quality, 70);
    assert_eq!(cfg.label_table().resolve(7).unwrap(), "gasket_defect");
    assert!(cfg.label_table().resolve(3).is_err());
    assert_eq!(cfg.dispatcher_config().workers, 2);
    assert_eq!(cfg.telegram.chat_ids, vec!["2001", "2002"]);
    assert_eq!(cfg.loop_settings().max_consecutive_detect_failures, 5);
    assert_eq!(cfg.notifiers().unwrap().len(), 1);

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
[camera]
device = "stub://bench"

[detector]
backend = "stub"
stub_every_n = 3

[sms]
account_sid = "ACtest"
auth_token = "secret"
from_number = "+15550001111"
to_numbers = ["+15552223333"]
"#;
    file.write_all(toml.as_bytes()).expect("write config");

    let cfg = DefectConfig::load_from(Some(file.path())).expect("load config");

    assert_eq!(cfg.camera.device, "stub://bench");
    assert_eq!(cfg.detector.stub_every_n, 3);
    let notifiers = cfg.notifiers().unwrap();
    assert_eq!(notifiers.len(), 1);
    assert_eq!(notifiers[0].name(), "sms");
    assert_eq!(notifiers[0].recipients(), ["+15552223333".to_string()]);
    assert_eq!(cfg.detector().unwrap().name(), "stub");

    clear_env();
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = DefectConfig::load().expect("load config");

    assert_eq!(cfg.camera.device, "0");
    assert_eq!(cfg.camera.max_retries, 3);
    assert_eq!(cfg.camera.retry_delay, Duration::from_secs(5));
    assert_eq!(cfg.label_table().len(), 5);
    assert!(cfg.output.preview_path.is_none());
    assert!(cfg.notifiers().unwrap().is_empty());

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("DEFECT_MAX_RETRIES", "0");
    assert!(DefectConfig::load().is_err());

    std::env::set_var("DEFECT_MAX_RETRIES", "three");
    assert!(DefectConfig::load().is_err());

    std::env::remove_var("DEFECT_MAX_RETRIES");
    std::env::set_var("DEFECT_DETECTOR_BACKEND", "tract");
    let err = DefectConfig::load().unwrap_err();
    assert!(err.to_string().contains("model_path"));

    clear_env();
}
