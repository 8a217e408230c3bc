use assert_cmd::cargo::cargo_bin_cmd;

#[test]
fn help_lists_save_and_restore() {
    let mut cmd = cargo_bin_cmd!("i3-restore");
    cmd.arg("--help");
    let out = cmd.assert().success();
    let stdout = String::from_utf8(out.get_output().stdout.clone()).expect("utf8");

    assert!(stdout.contains("save"));
    assert!(stdout.contains("restore"));
    assert!(stdout.contains("--verbose"));
}

#[test]
fn missing_subcommand_exits_nonzero() {
    let mut cmd = cargo_bin_cmd!("i3-restore");
    cmd.assert().failure();
}

#[test]
fn malformed_config_aborts_before_touching_i3() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = temp.path().join("config.json");
    std::fs::write(&config, r#"{"subprocesses": "invalid"}"#).expect("write config");
    let log = temp.path().join("logs").join("i3-restore.log");

    let mut cmd = cargo_bin_cmd!("i3-restore");
    cmd.env("i3_PATH", temp.path())
        .env("I3_RESTORE_LOG_FILE", &log)
        .env("I3_RESTORE_CONFIG", &config)
        .arg("save");
    let out = cmd.assert().failure();
    let stderr = String::from_utf8(out.get_output().stderr.clone()).expect("utf8");
    assert!(stderr.contains("config parse error"));

    let logged = std::fs::read_to_string(&log).expect("log written");
    assert!(logged.contains("\"event_type\":\"run.failed\""));
    assert!(!temp.path().join("web_browsers.sh").exists());
}

#[test]
fn unknown_top_level_key_is_rejected_for_restore_too() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = temp.path().join("config.json");
    std::fs::write(&config, r#"{"terminal": []}"#).expect("write config");

    let mut cmd = cargo_bin_cmd!("i3-restore");
    cmd.env("i3_PATH", temp.path())
        .env("I3_RESTORE_LOG_FILE", temp.path().join("run.log"))
        .arg("restore")
        .arg("--config")
        .arg(&config);
    cmd.assert().failure();
}

#[test]
fn restore_without_a_saved_session_succeeds() {
    let temp = tempfile::tempdir().expect("tempdir");
    let log = temp.path().join("run.log");

    let mut cmd = cargo_bin_cmd!("i3-restore");
    cmd.env("i3_PATH", temp.path().join("never-saved"))
        .env("I3_RESTORE_LOG_FILE", &log)
        .env_remove("I3_RESTORE_CONFIG")
        .arg("restore");
    cmd.assert().success();

    let logged = std::fs::read_to_string(&log).expect("log written");
    assert!(logged.contains("\"event_type\":\"restore.nothing_saved\""));
}
