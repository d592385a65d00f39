use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::Builder;

use mask_tally::config::{CounterConfig, StoreKind};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "MASK_TALLY_CONFIG",
        "MASK_TALLY_STORE",
        "MASK_TALLY_DB_PATH",
        "MASK_TALLY_SOURCE",
        "MASK_TALLY_MAX_FRAMES",
        "MASK_TALLY_BACKEND",
        "MASK_TALLY_MODEL",
        "MASK_TALLY_API_ADDR",
        "MASK_TALLY_POLL_MS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".json").tempfile().expect("temp config");
    let json = r#"{
        "store": "sqlite",
        "db_path": "lobby.db",
        "source": {
            "path": "stub://lobby",
            "target_fps": 5,
            "width": 320,
            "height": 240,
            "max_frames": 50
        },
        "backend": { "name": "scripted", "confidence": 0.4 },
        "api": { "addr": "0.0.0.0:9100" },
        "dashboard": { "poll_ms": 250, "history_window": 20 }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("MASK_TALLY_CONFIG", file.path());
    std::env::set_var("MASK_TALLY_DB_PATH", "override.db");
    std::env::set_var("MASK_TALLY_POLL_MS", "500");

    let cfg = CounterConfig::load().expect("load config");
    assert_eq!(cfg.store, StoreKind::Sqlite);
    assert_eq!(cfg.db_path, "override.db");
    assert_eq!(cfg.source.path, "stub://lobby");
    assert_eq!(cfg.source.target_fps, 5);
    assert_eq!(cfg.source.width, 320);
    assert_eq!(cfg.source.max_frames, Some(50));
    assert!((cfg.backend.confidence - 0.4).abs() < f32::EPSILON);
    assert_eq!(cfg.api_addr.as_deref(), Some("0.0.0.0:9100"));
    assert_eq!(cfg.poll_interval, Duration::from_millis(500));
    assert_eq!(cfg.history_window, 20);

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
store = "memory"

[source]
path = "stub://door"
max_frames = 3

[api]
enabled = false
"#;
    file.write_all(toml.as_bytes()).expect("write config");
    std::env::set_var("MASK_TALLY_CONFIG", file.path());

    let cfg = CounterConfig::load().expect("load config");
    assert_eq!(cfg.store, StoreKind::Memory);
    assert_eq!(cfg.source.path, "stub://door");
    assert_eq!(cfg.source.max_frames, Some(3));
    assert!(cfg.api_addr.is_none());

    clear_env();
}

#[test]
fn env_can_switch_store_and_disable_api() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MASK_TALLY_STORE", "memory");
    std::env::set_var("MASK_TALLY_API_ADDR", "off");
    std::env::set_var("MASK_TALLY_MAX_FRAMES", "7");

    let cfg = CounterConfig::load().expect("load config");
    assert_eq!(cfg.store, StoreKind::Memory);
    assert!(cfg.api_addr.is_none());
    assert_eq!(cfg.source.max_frames, Some(7));

    clear_env();
}

#[test]
fn empty_numeric_overrides_are_ignored() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MASK_TALLY_MAX_FRAMES", "");
    std::env::set_var("MASK_TALLY_POLL_MS", "  ");

    let cfg = CounterConfig::load().expect("load config");
    assert_eq!(cfg.source.max_frames, None);
    assert_eq!(cfg.poll_interval, Duration::from_millis(1000));

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MASK_TALLY_POLL_MS", "soon");
    assert!(CounterConfig::load().is_err());
    std::env::set_var("MASK_TALLY_POLL_MS", "0");
    assert!(CounterConfig::load().is_err());
    clear_env();

    std::env::set_var("MASK_TALLY_STORE", "redis");
    assert!(CounterConfig::load().is_err());
    clear_env();

    let mut file = Builder::new().suffix(".json").tempfile().expect("temp config");
    file.write_all(br#"{"backend": {"confidence": 1.5}}"#)
        .expect("write config");
    std::env::set_var("MASK_TALLY_CONFIG", file.path());
    assert!(CounterConfig::load().is_err());
    clear_env();
}
