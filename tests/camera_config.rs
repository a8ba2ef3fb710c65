use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use bambu_camera::config::{CameraConfig, ConfigOverrides};
use bambu_camera::VerifyMode;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "BAMBU_CAMERA_CONFIG",
        "BAMBU_HOST",
        "BAMBU_ACCESS_CODE",
        "BAMBU_CAMERA_PORT",
        "BAMBU_CAMERA_TLS_VERIFY",
        "BAMBU_CAMERA_TLS_CA_PATH",
        "BAMBU_CAMERA_TLS_SERVER_NAME",
        "BAMBU_CAMERA_CONNECT_TIMEOUT_SECS",
        "BAMBU_CAMERA_READ_TIMEOUT_MS",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "host": "192.168.1.50",
            "access_code": "12345678",
            "port": 6001,
            "tls": {
                "verify": "none",
                "server_name": "01S00A000000000"
            },
            "timeouts": {
                "connect_secs": 5,
                "read_ms": 1500
            }
        }"#,
    );
    std::env::set_var("BAMBU_CAMERA_CONFIG", file.path());
    std::env::set_var("BAMBU_ACCESS_CODE", "87654321");
    std::env::set_var("BAMBU_CAMERA_READ_TIMEOUT_MS", "250");

    let cfg = CameraConfig::load().expect("load config");

    assert_eq!(cfg.host, "192.168.1.50");
    assert_eq!(cfg.access_code, "87654321");
    assert_eq!(cfg.port, 6001);
    assert_eq!(cfg.tls.verify, VerifyMode::Disabled);
    assert_eq!(cfg.tls.server_name.as_deref(), Some("01S00A000000000"));
    assert_eq!(cfg.connect_timeout, Some(Duration::from_secs(5)));
    assert_eq!(cfg.read_timeout, Some(Duration::from_millis(250)));
    assert_eq!(cfg.endpoint().unwrap().to_string(), "192.168.1.50:6001");

    clear_env();
}

#[test]
fn overrides_take_precedence_over_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("BAMBU_HOST", "printer.local");
    std::env::set_var("BAMBU_ACCESS_CODE", "12345678");
    std::env::set_var("BAMBU_CAMERA_PORT", "6002");

    let cfg = CameraConfig::load_with(ConfigOverrides {
        host: Some("10.0.0.7:7000".to_string()),
        tls_verify: Some(VerifyMode::WebPki),
        ..ConfigOverrides::default()
    })
    .expect("load config");

    assert_eq!(cfg.host, "10.0.0.7:7000");
    assert_eq!(cfg.port, 6002);
    assert_eq!(cfg.tls.verify, VerifyMode::WebPki);
    let endpoint = cfg.endpoint().unwrap();
    assert_eq!(endpoint.host, "10.0.0.7");
    assert_eq!(endpoint.port, 7000);

    clear_env();
}

#[test]
fn defaults_to_camera_port_and_disabled_verification() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("BAMBU_HOST", "192.168.1.50");
    std::env::set_var("BAMBU_ACCESS_CODE", "12345678");

    let cfg = CameraConfig::load().expect("load config");
    assert_eq!(cfg.port, bambu_camera::DEFAULT_PORT);
    assert_eq!(cfg.tls.verify, VerifyMode::Disabled);
    assert!(cfg.connect_timeout.is_none());
    assert!(cfg.read_timeout.is_none());
    assert!(!format!("{:?}", cfg).contains("12345678"));

    clear_env();
}

#[test]
fn rejects_missing_host_and_access_code() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let err = CameraConfig::load().unwrap_err();
    assert!(err.to_string().contains("host is required"));

    std::env::set_var("BAMBU_HOST", "192.168.1.50");
    let err = CameraConfig::load().unwrap_err();
    assert!(err.to_string().contains("access code is required"));

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("BAMBU_HOST", "192.168.1.50");
    std::env::set_var("BAMBU_ACCESS_CODE", "x".repeat(33));
    assert!(CameraConfig::load().is_err());

    std::env::set_var("BAMBU_ACCESS_CODE", "12345678");
    std::env::set_var("BAMBU_CAMERA_PORT", "not-a-port");
    assert!(CameraConfig::load().is_err());

    std::env::remove_var("BAMBU_CAMERA_PORT");
    std::env::set_var("BAMBU_CAMERA_TLS_VERIFY", "ca");
    let err = CameraConfig::load().unwrap_err();
    assert!(err.to_string().contains("requires a CA"));

    std::env::set_var("BAMBU_CAMERA_TLS_VERIFY", "sometimes");
    assert!(CameraConfig::load().is_err());

    std::env::remove_var("BAMBU_CAMERA_TLS_VERIFY");
    std::env::set_var("BAMBU_CAMERA_READ_TIMEOUT_MS", "0");
    let err = CameraConfig::load().unwrap_err();
    assert!(err.to_string().contains("read timeout"));

    clear_env();
}

#[test]
fn rejects_malformed_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config("{ not json");
    std::env::set_var("BAMBU_CAMERA_CONFIG", file.path());
    let err = CameraConfig::load().unwrap_err();
    assert!(err.to_string().contains("invalid config file"));

    std::env::set_var("BAMBU_CAMERA_CONFIG", PathBuf::from("/nonexistent/camera.json"));
    let err = CameraConfig::load().unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}

#[test]
fn custom_ca_settings_read_bundle_from_disk() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let ca = write_config("-----BEGIN CERTIFICATE-----\n-----END CERTIFICATE-----\n");
    let mut cfg = CameraConfig::new("192.168.1.50", "12345678");
    cfg.tls.verify = VerifyMode::CustomCa;
    cfg.tls.ca_path = Some(ca.path().to_path_buf());

    let settings = cfg.tls_settings().expect("tls settings");
    assert_eq!(settings.verify, VerifyMode::CustomCa);
    assert!(settings.ca_pem.is_some());
}
