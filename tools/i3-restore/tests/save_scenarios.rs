use i3_restore::config::{parse_config, AppConfig};
use i3_restore::errors::RestoreError;
use i3_restore::plugins::PluginRegistry;
use i3_restore::runtime::{
    FakeClock, FakeFileSystem, FakeProcessRunner, FakeProcessTable, FileSystem,
    ProductionRuntime,
};
use i3_restore::save::save_session;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

struct Harness {
    fs: FakeFileSystem,
    runner: FakeProcessRunner,
    table: FakeProcessTable,
}

impl Harness {
    fn new() -> Self {
        Self {
            fs: FakeFileSystem::default(),
            runner: FakeProcessRunner::default(),
            table: FakeProcessTable::default(),
        }
    }

    fn runtime(&self) -> ProductionRuntime {
        ProductionRuntime {
            clock: Arc::new(FakeClock::default()),
            file_system: Arc::new(self.fs.clone()),
            process_runner: Arc::new(self.runner.clone()),
            process_table: Arc::new(self.table.clone()),
        }
    }

    fn save(&self, cfg: &AppConfig) -> i3_restore::save::SaveSummary {
        save_session(
            &self.runtime(),
            cfg,
            Path::new("/state"),
            &PluginRegistry::with_defaults(),
        )
        .expect("save")
    }
}

fn window(id: u64, class: &str) -> Value {
    json!({"nodes": [], "swallows": [], "window": id, "window_properties": {"class": class}})
}

fn tree(workspaces: Vec<Value>) -> String {
    json!({
        "nodes": [
            {"name": "__i3", "nodes": [{"type": "con", "nodes": []}]},
            {"name": "DP-1", "nodes": [{"type": "con", "nodes": workspaces}]}
        ]
    })
    .to_string()
}

fn workspace(name: &str, nodes: Vec<Value>) -> Value {
    json!({"name": name, "type": "workspace", "nodes": nodes})
}

#[test]
fn template_nodes_are_skipped_and_windows_keep_traversal_order() {
    let h = Harness::new();
    h.runner.push_stdout(tree(vec![workspace(
        "1",
        vec![
            json!({"nodes": [], "swallows": [{"class": "^Gimp$"}]}),
            json!({"nodes": [window(11, "Xterm")]}),
            window(12, "Gimp"),
        ],
    )]));
    h.runner.push_stdout("100\n");
    h.runner.push_stdout("200\n");
    h.table
        .insert(100, None, "xterm", &["xterm"], Some("/home/u"))
        .insert(200, None, "gimp", &["gimp", "a b.png"], Some("/pics"));

    let summary = h.save(&AppConfig::default());
    assert_eq!(summary.containers_saved, 2);
    assert_eq!(
        summary.workspaces,
        vec![PathBuf::from("/state/workspace_1_programs.sh")]
    );
    assert_eq!(
        h.fs.file("/state/workspace_1_programs.sh").expect("script"),
        "#!/usr/bin/env bash\n\
         [[ $1 == 0 ]] && cd \"/home/u\" && xterm\n\
         [[ $1 == 1 ]] && cd \"/pics\" && gimp a b.png\n"
    );
    assert_eq!(
        h.runner.command_lines(),
        vec![
            "i3-msg -t get_tree",
            "xdotool getwindowpid 11",
            "xdotool getwindowpid 12"
        ]
    );
}

#[test]
fn terminal_saves_its_launch_command_with_the_subprocess_template() {
    let cfg = parse_config(
        r#"{
            "terminals": [{"class": "Alacritty", "command": "alacritty"}],
            "subprocesses": [{"name": "vim", "launch_command": "alacritty -e bash -c \"{command} && bash\""}]
        }"#,
    )
    .expect("cfg");
    let h = Harness::new();
    h.runner
        .push_stdout(tree(vec![workspace("2: code", vec![window(21, "Alacritty")])]));
    h.runner.push_stdout("300");
    h.table
        .insert(300, None, "alacritty", &["alacritty", "-e", "bash"], Some("/"))
        .insert(301, Some(300), "bash", &["bash"], Some("/home/u/src"))
        .insert(302, Some(301), "vim", &["vim", "my file.rs"], Some("/home/u/src"));

    h.save(&cfg);
    let script = h
        .fs
        .file("/state/workspace_2:{space}code_programs.sh")
        .expect("script");
    assert!(script.ends_with(
        "[[ $1 == 0 ]] && cd \"/home/u/src\" && I3_RESTORE_SUBPROCESS_SCRIPT=\"/state/workspace_2:{space}code_subprocess_0.sh\" alacritty\n"
    ));
    assert_eq!(
        h.fs.file("/state/workspace_2:{space}code_subprocess_0.sh").as_deref(),
        Some("alacritty -e bash -c \"vim my\\ file.rs && bash\"")
    );
}

#[test]
fn one_browser_line_per_run_and_browser_only_workspaces_write_nothing() {
    let cfg = parse_config(r#"{"web_browsers": ["firefox"]}"#).expect("cfg");
    let h = Harness::new();
    h.fs.write_string(Path::new("/state/workspace_9_programs.sh"), "stale")
        .expect("seed");
    h.runner.push_stdout(tree(vec![
        workspace("1", vec![window(1, "firefox")]),
        workspace("2", vec![window(2, "firefox"), window(3, "Gimp")]),
        workspace("3", vec![]),
    ]));
    h.runner.push_stdout("10");
    h.runner.push_stdout("11");
    h.runner.push_stdout("12");
    h.table
        .insert(10, None, "firefox", &["/usr/lib/firefox/firefox"], Some("/"))
        .insert(11, None, "firefox", &["/usr/lib/firefox/firefox", "-contentproc"], Some("/"))
        .insert(12, None, "gimp", &["gimp"], Some("/"));

    let summary = h.save(&cfg);
    assert_eq!(summary.containers_dropped, 2);
    assert_eq!(
        h.fs.file("/state/web_browsers.sh").as_deref(),
        Some("/usr/lib/firefox/firefox &\n")
    );
    assert_eq!(
        h.fs.paths(),
        vec![
            PathBuf::from("/state/web_browsers.sh"),
            PathBuf::from("/state/workspace_2_programs.sh"),
        ]
    );
}

#[test]
fn failing_plugin_falls_back_to_the_generic_resolution() {
    let with_plugin = parse_config(
        r#"{"enabled_plugins": {"kitty": {"listen_socket": "unix:/tmp/kitty"}}}"#,
    )
    .expect("cfg");

    let run = |cfg: &AppConfig, plugin_enabled: bool| {
        let h = Harness::new();
        h.runner
            .push_stdout(tree(vec![workspace("1", vec![window(5, "kitty")])]));
        h.runner.push_stdout("77");
        if plugin_enabled {
            h.runner.push_stdout("kitty 0.45.0 created by Kovid Goyal");
            h.runner.push_exit(1, "Failed to connect to unix:/tmp/kitty-77");
        }
        h.table
            .insert(77, None, "kitty", &["kitty", "--single-instance"], Some("/home/u"));
        h.save(cfg);
        (
            h.fs.file("/state/workspace_1_programs.sh"),
            h.runner.command_lines(),
        )
    };

    let (fallback, commands) = run(&with_plugin, true);
    let (plain, _) = run(&AppConfig::default(), false);
    assert_eq!(fallback, plain);
    assert!(fallback
        .expect("script")
        .contains("cd \"/home/u\" && kitty --single-instance"));
    assert_eq!(commands[3], "kitty @ --to unix:/tmp/kitty-77 ls --all-env-vars");
}

#[test]
fn invalid_plugin_settings_abort_the_save() {
    let cfg = parse_config(
        r#"{"enabled_plugins": {"kitty": {"listen_socket": "unix:/tmp/kitty", "scrollback": "lots"}}}"#,
    )
    .expect("cfg");
    let h = Harness::new();
    h.runner
        .push_stdout(tree(vec![workspace("1", vec![window(5, "kitty")])]));
    h.runner.push_stdout("77");
    h.table.insert(77, None, "kitty", &["kitty"], Some("/"));

    let err = save_session(
        &h.runtime(),
        &cfg,
        Path::new("/state"),
        &PluginRegistry::with_defaults(),
    )
    .expect_err("fatal");
    assert!(err.is_config_error());
}

#[test]
fn browser_file_write_failure_aborts_before_the_workspace_script() {
    let cfg = parse_config(r#"{"web_browsers": ["firefox"]}"#).expect("cfg");
    let h = Harness::new();
    h.runner.push_stdout(tree(vec![workspace(
        "1",
        vec![window(1, "Gimp"), window(2, "firefox")],
    )]));
    h.runner.push_stdout("10");
    h.runner.push_stdout("11");
    h.table
        .insert(10, None, "gimp", &["gimp"], Some("/"))
        .insert(11, None, "firefox", &["firefox"], Some("/"));
    h.fs.set_fail_next(
        "/state/web_browsers.sh",
        RestoreError::Io("read-only file system".to_string()),
    );

    let err = save_session(
        &h.runtime(),
        &cfg,
        Path::new("/state"),
        &PluginRegistry::with_defaults(),
    )
    .expect_err("aborts");
    assert!(matches!(err, RestoreError::Io(_)));
    assert!(h.fs.paths().is_empty());
}

#[test]
fn kitty_session_write_failure_falls_back_to_the_generic_resolution() {
    let with_plugin = parse_config(
        r#"{"enabled_plugins": {"kitty": {"listen_socket": "unix:/tmp/kitty"}}}"#,
    )
    .expect("cfg");

    let run = |cfg: &AppConfig, plugin_enabled: bool| {
        let h = Harness::new();
        h.runner
            .push_stdout(tree(vec![workspace("1", vec![window(5, "kitty")])]));
        h.runner.push_stdout("77");
        if plugin_enabled {
            h.runner.push_stdout("kitty 0.42.0 created by Kovid Goyal");
            h.runner.push_stdout(
                json!([{"platform_window_id": 5, "tabs": [{"layout": "tall", "is_active": true,
                    "windows": [{"id": 1, "pid": 78, "cwd": "/home/u", "env": {}}]}]}])
                .to_string(),
            );
            h.fs.set_fail_next(
                "/state/kitty-session-5",
                RestoreError::Io("disk full".to_string()),
            );
        }
        h.table
            .insert(77, None, "kitty", &["kitty", "--single-instance"], Some("/home/u"));
        h.save(cfg);
        h.fs.file("/state/workspace_1_programs.sh")
    };

    let fallback = run(&with_plugin, true);
    assert_eq!(fallback, run(&AppConfig::default(), false));
    assert!(fallback
        .expect("script")
        .contains("cd \"/home/u\" && kitty --single-instance"));
}
