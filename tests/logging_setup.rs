use tempfile::tempdir;

#[test]
fn init_for_db_in_creates_a_rolling_log_file() {
    let dir = tempdir().unwrap();
    mdengine::logging::init_for_db_in(dir.path(), "smoke", "info").unwrap();
    log::info!("hello from the logging smoke test");
    // log4rs's appenders flush lazily; give the background writer a moment.
    std::thread::sleep(std::time::Duration::from_millis(50));
    let log_file = dir.path().join("smoke_logs").join("smoke.log");
    assert!(log_file.exists(), "expected the rolling log file to be created");
}
