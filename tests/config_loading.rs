//! Integration tests for configuration loading.

use std::io::Write;
use trace_walker::config::{self, Config};

/// Test: a partial file keeps defaults for everything it doesn't set.
#[tokio::test]
async fn test_partial_config_uses_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "api_key = \"file-key\"").unwrap();
    writeln!(file, "speed_ms = 800").unwrap();
    writeln!(file, "narration = true").unwrap();

    let config = config::load_from(file.path()).await.unwrap();
    let defaults = Config::default();

    assert_eq!(config.gemini.api_key.as_deref(), Some("file-key"));
    assert_eq!(config.gemini.analysis_model, defaults.gemini.analysis_model);
    assert_eq!(config.gemini.voice_name, "Kore");
    assert_eq!(config.playback.speed_ms, 800);
    assert!(config.playback.narration);
    assert_eq!(config.playback.output_addr(), Some("127.0.0.1:7878"));
}

/// Test: an empty output address disables the listener.
#[tokio::test]
async fn test_empty_output_addr_disables_listener() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "api_key = \"k\"").unwrap();
    writeln!(file, "output_addr = \"\"").unwrap();

    let config = config::load_from(file.path()).await.unwrap();

    assert_eq!(config.playback.output_addr(), None);
}

/// Test: malformed files are reported, not silently defaulted.
#[tokio::test]
async fn test_malformed_config_is_an_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "speed_ms = \"fast\"").unwrap();

    let error = config::load_from(file.path()).await.unwrap_err();
    assert!(format!("{error:#}").contains("Failed to parse"));
}

/// Test: a missing file is an error for explicit paths.
#[tokio::test]
async fn test_missing_config_file() {
    let dir = tempfile::tempdir().unwrap();

    assert!(config::load_from(dir.path().join("Config.toml")).await.is_err());
}

/// Test: default config round-trips through TOML.
#[tokio::test]
async fn test_default_config_serializes() {
    let text = toml::to_string(&Config::default()).unwrap();
    let config: Config = toml::from_str(&text).unwrap();

    assert_eq!(config, Config::default());
}

/// Test: a zero auto-advance period is rejected instead of ticking every 1ms.
#[tokio::test]
async fn test_zero_speed_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "speed_ms = 0").unwrap();

    let error = config::load_from(file.path()).await.unwrap_err();
    let message = format!("{error:#}");

    assert!(message.contains("Invalid configuration"));
    assert!(message.contains("speed_ms"));
}
