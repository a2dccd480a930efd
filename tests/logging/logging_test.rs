//! Tests for `src/logging.rs`.

use mmbridge::logging::{LoggingGuard, LOG_FILE_PREFIX};

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

#[test]
fn log_files_are_named_after_the_binary() {
    assert_eq!(LOG_FILE_PREFIX, "mmbridge.log");
}

#[test]
fn production_logging_creates_dir_and_refuses_second_init() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let logs_dir = tmp.path().join("nested").join("logs");
    assert!(!logs_dir.exists());

    // Only this test installs the global subscriber in this binary.
    let guard = mmbridge::logging::init_production(&logs_dir, "debug");
    assert!(guard.is_ok());
    assert!(logs_dir.is_dir(), "logs directory should be created");

    let again = mmbridge::logging::init_production(&logs_dir, "debug");
    assert!(again.is_err(), "a second global subscriber must be rejected");

    // Falls back silently once a subscriber exists.
    mmbridge::logging::init_cli("info");
}
