//! Loading notification settings from TOML and JSON.

use std::time::Duration;

use obslice::{NotifyConfig, NotifyMode, Slice, SliceError, TaskQueue};

#[test]
fn toml_debounce() {
    let config = NotifyConfig::from_toml_str(
        r#"
            label = "todos"
            mode = "debounce"
            window_ms = 40
        "#,
    )
    .unwrap();
    assert_eq!(config.label.as_deref(), Some("todos"));
    assert_eq!(config.mode, NotifyMode::Debounce);
    assert_eq!(config.window(), Duration::from_millis(40));
}

#[test]
fn empty_toml_is_immediate() {
    let config = NotifyConfig::from_toml_str("").unwrap();
    assert_eq!(config, NotifyConfig::default());
}

#[test]
fn json_coalesce() {
    let config = NotifyConfig::from_json_str(r#"{ "mode": "coalesce" }"#).unwrap();
    assert_eq!(config.mode, NotifyMode::Coalesce);
    assert_eq!(config.label, None);
}

#[test]
fn unknown_keys_are_rejected() {
    let err = NotifyConfig::from_toml_str("mode = \"immediate\"\nspeed = 3").unwrap_err();
    assert!(matches!(err, SliceError::Config(_)));
}

#[test]
fn unknown_mode_is_rejected() {
    let err = NotifyConfig::from_json_str(r#"{ "mode": "eventually" }"#).unwrap_err();
    assert!(err.to_string().starts_with("invalid notify configuration: invalid JSON"));
}

#[test]
fn zero_window_debounce_fails_validation() {
    let err = NotifyConfig::from_toml_str("mode = \"debounce\"\nwindow_ms = 0").unwrap_err();
    assert!(err.to_string().contains("window_ms"));
}

#[test]
fn serializes_back_to_json() {
    let config = NotifyConfig::coalesce().with_label("counts");
    let json = serde_json::to_value(&config).unwrap();
    assert_eq!(json["mode"], "coalesce");
    assert_eq!(json["label"], "counts");
}

#[test]
fn loaded_config_drives_a_slice() {
    let queue = TaskQueue::manual();
    let config = NotifyConfig::from_toml_str("mode = \"coalesce\"").unwrap();
    let slice = Slice::builder(0u8).config(&config, &queue).unwrap().build();
    let hits = std::rc::Rc::new(std::cell::Cell::new(0));
    let h = hits.clone();
    let _sub = slice.sub(|s| *s, move |_| h.set(h.get() + 1));

    slice.pub_replace(|s| s + 1);
    slice.pub_replace(|s| s + 1);
    queue.run_due();
    assert_eq!(hits.get(), 1);
}

#[test]
fn load_from_file_checks_extension() {
    let dir = tempfile::tempdir().unwrap();
    let toml_path = dir.path().join("notify.toml");
    std::fs::write(&toml_path, "mode = \"debounce\"\nwindow_ms = 8\n").unwrap();
    let yaml_path = dir.path().join("notify.yaml");
    std::fs::write(&yaml_path, "mode: debounce\n").unwrap();

    let config = NotifyConfig::load_from_file(&toml_path).unwrap();
    assert_eq!(config.window_ms, 8);
    assert!(NotifyConfig::load_from_file(&yaml_path).is_err());
    assert!(NotifyConfig::load_from_file(&dir.path().join("missing.json")).is_err());
}
