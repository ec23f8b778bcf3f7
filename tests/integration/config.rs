//! Configuration loading and its effect on a scheduler.

use std::io::Write;

use strand::{load_config, Config, Environment, LoggerKind, Scheduler, Subscription, ValidationError};

#[test]
fn test_config_file_overrides_environment_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "environment = \"development\"\nenable_names = false\nlogger = \"none\"\nrunaway_threshold = 7"
    )
    .unwrap();

    let config = load_config(file.path()).unwrap();
    assert_eq!(config.environment(), Environment::Development);
    assert!(!config.enable_names());
    assert!(config.validate_subscriptions());
    assert_eq!(config.logger(), LoggerKind::None);
    assert_eq!(config.runaway_threshold(), 7);

    let scheduler = Scheduler::new(config);
    assert_eq!(scheduler.runaway_detector().threshold(), 7);
}

#[test]
fn test_validation_follows_environment() {
    let strict = Subscription::detached(&Config::development());
    strict.cancel();
    assert!(matches!(
        strict.add_disposer(|| {}),
        Err(ValidationError::DisposerOnCancelled { .. })
    ));

    let lenient = Subscription::detached(&Config::production());
    lenient.cancel();
    assert!(lenient.add_disposer(|| {}).is_ok());
}

#[test]
fn test_missing_config_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_config(&dir.path().join("absent.toml")).is_err());
}
