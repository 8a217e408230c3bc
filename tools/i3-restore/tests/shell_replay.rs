use i3_restore::resolver::Container;
use i3_restore::runtime::ProductionFileSystem;
use i3_restore::script::build_subprocess_command;
use i3_restore::store::SessionStore;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

fn sh(line: &str, cwd: &Path) -> String {
    let out = Command::new("sh")
        .arg("-c")
        .arg(line)
        .current_dir(cwd)
        .output()
        .expect("run sh");
    assert!(out.status.success(), "sh failed: {line}");
    String::from_utf8(out.stdout).expect("utf8")
}

#[test]
fn escaped_argument_reaches_the_program_as_one_argument() {
    let temp = tempfile::tempdir().expect("tempdir");
    let args = vec!["%s:".to_string(), "a b".to_string()];

    let plain = build_subprocess_command("{command}", "printf", &args);
    assert_eq!(sh(&plain, temp.path()), "a b:");

    let wrapped = build_subprocess_command("bash -c \"{command}\"", "printf", &args);
    assert_eq!(sh(&wrapped, temp.path()), "a b:");
}

#[test]
fn subprocess_file_path_survives_a_base_directory_with_spaces() {
    let temp = tempfile::tempdir().expect("tempdir");
    let base = temp.path().join("my state");
    std::fs::create_dir_all(&base).expect("base dir");
    let fs = ProductionFileSystem;
    let store = SessionStore::new(&fs, &base);

    let script = store
        .write_workspace(
            "1",
            &[Container {
                command: Some("printenv I3_RESTORE_SUBPROCESS_SCRIPT".to_string()),
                working_directory: Some(temp.path().to_path_buf()),
                subprocess_command: Some("vim notes.md".to_string()),
                ..Container::default()
            }],
        )
        .expect("write")
        .expect("script path");

    let out = Command::new("bash")
        .arg(&script)
        .arg("0")
        .output()
        .expect("run script");
    assert!(out.status.success());
    let printed = PathBuf::from(String::from_utf8(out.stdout).expect("utf8").trim());
    assert_eq!(printed, base.join("workspace_1_subprocess_0.sh"));
    assert_eq!(
        std::fs::read_to_string(&printed).expect("subprocess file"),
        "vim notes.md"
    );
}

#[test]
fn browsers_start_without_waiting_for_each_other() {
    let temp = tempfile::tempdir().expect("tempdir");
    let marker = temp.path().join("second-browser");
    let fs = ProductionFileSystem;
    let store = SessionStore::new(&fs, temp.path());
    store.append_browser("sleep 5").expect("first");
    store
        .append_browser(&format!("touch \"{}\"", marker.display()))
        .expect("second");
    let script = store.browsers_script().expect("browsers script");

    let started = Instant::now();
    let status = Command::new("bash")
        .arg(&script)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("run browsers");
    assert!(status.success());
    assert!(started.elapsed() < Duration::from_secs(3));

    while !marker.exists() && started.elapsed() < Duration::from_secs(3) {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(marker.exists());
}
