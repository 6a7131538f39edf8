use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use vigil::config::VigilConfig;
use vigil::{BackendKind, ClassifierMode, DeviceCandidate, DeviceId};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "VIGIL_CONFIG",
        "VIGIL_API_ADDR",
        "VIGIL_DEVICES",
        "VIGIL_FALLBACK_BACKENDS",
        "VIGIL_MODE",
        "VIGIL_SCREENSHOT_DIR",
        "VIGIL_MODEL_URL",
        "VIGIL_ALERT_INTERVAL_SECS",
        "VIGIL_NOTIFY_INTERVAL_SECS",
        "VIGIL_FEISHU_WEBHOOK",
        "VIGIL_WECHAT_WEBHOOK",
        "VIGIL_SMS_PHONE",
        "VIGIL_SMS_API_KEY",
        "VIGIL_SMS_GATEWAY",
        "VIGIL_EMAIL_TO",
        "VIGIL_EMAIL_FROM",
        "VIGIL_EMAIL_PASSWORD",
        "VIGIL_SMTP_SERVER",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = VigilConfig::load().expect("load defaults");
    assert_eq!(cfg.api_addr, "127.0.0.1:8787");
    assert_eq!(
        cfg.devices,
        vec![
            DeviceCandidate::new(DeviceId::Index(0)),
            DeviceCandidate::new(DeviceId::Index(1))
        ]
    );
    assert_eq!(cfg.mode, ClassifierMode::Posture);
    assert_eq!(cfg.alert_interval, Duration::from_secs(60));
    assert_eq!(cfg.notification_interval, Duration::from_secs(300));
    assert_eq!(cfg.notification.smtp_server, "smtp.qq.com");
    assert_eq!(cfg.notification.timeout_secs, 10);
    assert_eq!(cfg.telemetry.jpeg_quality, 70);
    assert_eq!(cfg.screenshot_dir.to_str(), Some("screenshots"));
    assert!(cfg.model.url.is_none());
    assert!(cfg.notification.configured_channels().is_empty());
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "devices": {
            "candidates": [{"id": "stub://lobby"}, {"id": 2, "backend": "v4l2"}],
            "fallback_backends": ["mjpeg"]
        },
        "classifier": {"mode": "presence"},
        "throttle": {"alert_interval_secs": 30, "notification_interval_secs": 120},
        "notification": {
            "feishu_webhook": "https://open.feishu.cn/hook/abc",
            "smtp_server": "smtp.example.com"
        },
        "api": {"addr": "0.0.0.0:9000"},
        "telemetry": {"jpeg_quality": 55, "subscriber_queue": 2},
        "target_fps": 5
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("VIGIL_CONFIG", file.path());
    std::env::set_var("VIGIL_NOTIFY_INTERVAL_SECS", "600");
    std::env::set_var("VIGIL_WECHAT_WEBHOOK", "https://qyapi.weixin.qq.com/hook");

    let cfg = VigilConfig::load().expect("load config");
    assert_eq!(cfg.devices.len(), 2);
    assert_eq!(cfg.devices[0].id, DeviceId::Name("stub://lobby".to_string()));
    assert_eq!(cfg.devices[1].backend, Some(BackendKind::V4l2));
    assert_eq!(cfg.fallback_backends, vec![BackendKind::Mjpeg]);
    assert_eq!(cfg.mode, ClassifierMode::Presence);
    assert_eq!(cfg.alert_interval, Duration::from_secs(30));
    assert_eq!(cfg.notification_interval, Duration::from_secs(600));
    assert_eq!(cfg.notification.smtp_server, "smtp.example.com");
    assert_eq!(cfg.api_addr, "0.0.0.0:9000");
    assert_eq!(cfg.telemetry.subscriber_queue, 2);
    assert_eq!(cfg.capture.target_fps, 5);
    assert_eq!(cfg.notification.configured_channels().len(), 2);

    clear_env();
}

#[test]
fn loads_toml_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
screenshot_dir = "/var/lib/vigil/shots"

[classifier]
mode = "posture"

[model]
url = "http://127.0.0.1:9100/infer"
persist_tracks = false
"#;
    file.write_all(toml.as_bytes()).expect("write config");

    std::env::set_var("VIGIL_DEVICES", "stub://a, 1@v4l2");
    let cfg = VigilConfig::load_from(Some(file.path())).expect("load toml");
    assert_eq!(cfg.screenshot_dir.to_str(), Some("/var/lib/vigil/shots"));
    assert_eq!(cfg.model.url.as_deref(), Some("http://127.0.0.1:9100/infer"));
    assert!(!cfg.model.persist_tracks);
    assert_eq!(
        cfg.devices,
        vec![
            DeviceCandidate::new(DeviceId::Name("stub://a".to_string())),
            DeviceCandidate::new(DeviceId::Index(1)).with_backend(BackendKind::V4l2),
        ]
    );

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("VIGIL_ALERT_INTERVAL_SECS", "soon");
    assert!(VigilConfig::load().is_err());
    clear_env();

    std::env::set_var("VIGIL_MODE", "dance");
    assert!(VigilConfig::load().is_err());
    clear_env();

    std::env::set_var("VIGIL_API_ADDR", "not-an-addr");
    assert!(VigilConfig::load().is_err());
    clear_env();
}
