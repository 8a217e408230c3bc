//! Session capture for kitty windows through kitty's remote control.
//!
//! kitty 0.43.0 and newer can print its own session description
//! (`ls --output-format=session`); every `launch` directive of that output
//! is rewritten to carry the window's cwd plus a subprocess or scrollback
//! restore command. Older versions get an equivalent session rebuilt from
//! the `ls` tree.

use super::{MultiplexerPlugin, PluginError};
use crate::config::COMMAND_PLACEHOLDER;
use crate::errors::RestoreError;
use crate::logging::append_run_log;
use crate::resolver::{detect_subprocess, Container, SaveContext};
use crate::runtime::{ProcessRequest, ProcessRunner};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;

pub const KITTY_CLASS: &str = "kitty";

const PID_PLACEHOLDER: &str = "{kitty_pid}";
const LAUNCH_PREFIX: &str = "launch ";
const NEW_OS_WINDOW: &str = "new_os_window";
const UNSERIALIZE_DATA_KEY: &str = "kitty-unserialize-data=";
const NATIVE_SESSION_VERSION: [u32; 3] = [0, 43, 0];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollbackExtent {
    #[default]
    None,
    Screen,
    All,
}

impl ScrollbackExtent {
    fn extent_flag(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Screen => Some("screen"),
            Self::All => Some("all"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KittyConfig {
    pub listen_socket: String,
    #[serde(default)]
    pub scrollback: ScrollbackExtent,
}

impl KittyConfig {
    pub fn from_settings(settings: &Value) -> Result<Self, RestoreError> {
        let cfg: Self = serde_json::from_value(settings.clone())
            .map_err(|e| RestoreError::InvalidConfig(format!("enabled_plugins.kitty: {e}")))?;
        if cfg.listen_socket.trim().is_empty() {
            return Err(RestoreError::InvalidConfig(
                "enabled_plugins.kitty.listen_socket must not be empty".to_string(),
            ));
        }
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Native,
    Reconstructed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsWindow {
    #[serde(default)]
    pub platform_window_id: Option<u64>,
    #[serde(default)]
    pub tabs: Vec<KittyTab>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KittyTab {
    #[serde(default)]
    pub layout: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub windows: Vec<KittyWindow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KittyWindow {
    pub id: u64,
    pub pid: u32,
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl KittyWindow {
    fn shell(&self) -> &str {
        self.env.get("SHELL").map(String::as_str).unwrap_or("bash")
    }
}

/// Probes the installed kitty once per plugin instance.
#[derive(Default)]
pub struct KittyPlugin {
    mode: OnceLock<SessionMode>,
}

impl KittyPlugin {
    pub fn with_mode(mode: SessionMode) -> Self {
        let plugin = Self::default();
        let _ = plugin.mode.set(mode);
        plugin
    }

    fn session_mode(&self, runner: &dyn ProcessRunner) -> SessionMode {
        *self.mode.get_or_init(|| {
            let mode = probe_session_mode(runner);
            append_run_log("info", "kitty.session_mode", json!({ "mode": format!("{mode:?}") }));
            mode
        })
    }
}

impl MultiplexerPlugin for KittyPlugin {
    fn window_class(&self) -> &'static str {
        KITTY_CLASS
    }

    fn validate_config(&self, settings: &Value) -> Result<(), RestoreError> {
        KittyConfig::from_settings(settings).map(|_| ())
    }

    fn attempt_save(
        &self,
        ctx: &SaveContext<'_>,
        container: &mut Container,
        settings: &Value,
    ) -> Result<(), PluginError> {
        let cfg = KittyConfig::from_settings(settings)?;
        let (Some(pid), Some(window_id)) = (container.pid, container.window_id) else {
            return Err(PluginError::Recoverable(
                "kitty container has no pid or window id".to_string(),
            ));
        };
        let mode = self.session_mode(ctx.runner);
        let socket = listen_socket_for(&cfg.listen_socket, pid);
        append_run_log("info", "kitty.save", json!({ "socket": socket, "window": window_id }));

        let tree = query_tree(ctx.runner, &socket)?;
        let os_window = tree
            .into_iter()
            .find(|os_window| os_window.platform_window_id == Some(window_id))
            .ok_or_else(|| {
                PluginError::Recoverable(format!("kitty has no OS window {window_id}"))
            })?;

        let capture = WindowCapture {
            ctx,
            socket: &socket,
            scrollback: cfg.scrollback,
            container_window: window_id,
        };
        let contents = match mode {
            SessionMode::Reconstructed => parse_tree_to_session(&os_window, &capture),
            SessionMode::Native => {
                let native = query_session(ctx.runner, &socket)?;
                replace_launch_commands(&native, &os_window, &capture)?
            }
        };
        append_run_log("debug", "kitty.session", json!({ "contents": contents }));

        let session_file = ctx.store.write_kitty_session(window_id, &contents)?;
        container.command = Some(format!("kitty --session '{}'", session_file.display()));
        // The session file carries every window's cwd.
        container.working_directory = Some(PathBuf::from("/"));
        container.subprocess_command = None;
        Ok(())
    }
}

/// Socket kitty listens on for the instance `pid`: `{kitty_pid}` is replaced
/// when present, otherwise kitty appends `-<pid>` itself.
pub fn listen_socket_for(template: &str, pid: u32) -> String {
    if template.contains(PID_PLACEHOLDER) {
        template.replace(PID_PLACEHOLDER, &pid.to_string())
    } else {
        format!("{template}-{pid}")
    }
}

/// Dotted version from `kitty --version` output (`kitty 0.43.1 created by ...`).
pub fn parse_version(output: &str) -> Option<Vec<u32>> {
    output
        .split_whitespace()
        .nth(1)?
        .split('.')
        .map(|part| part.parse().ok())
        .collect()
}

pub fn probe_session_mode(runner: &dyn ProcessRunner) -> SessionMode {
    let version = runner
        .run(ProcessRequest::new("kitty", ["--version"]))
        .ok()
        .filter(|out| out.success())
        .and_then(|out| parse_version(&out.stdout));
    match version {
        Some(version) if version.as_slice() >= NATIVE_SESSION_VERSION.as_slice() => {
            SessionMode::Native
        }
        Some(_) => SessionMode::Reconstructed,
        None => {
            append_run_log("error", "kitty.version.unknown", json!({}));
            SessionMode::Reconstructed
        }
    }
}

fn remote(runner: &dyn ProcessRunner, socket: &str, args: &[&str]) -> Result<String, PluginError> {
    let mut full = vec!["@", "--to", socket];
    full.extend_from_slice(args);
    let out = runner.run(ProcessRequest::new("kitty", full))?;
    if !out.success() {
        append_run_log(
            "error",
            "kitty.remote.failed",
            json!({ "socket": socket, "args": args, "stderr": out.stderr }),
        );
        return Err(PluginError::Recoverable(format!(
            "kitty @ {} failed: {}",
            args.join(" "),
            out.stderr.trim()
        )));
    }
    Ok(out.stdout)
}

fn query_tree(runner: &dyn ProcessRunner, socket: &str) -> Result<Vec<OsWindow>, PluginError> {
    let text = remote(runner, socket, &["ls", "--all-env-vars"])?;
    serde_json::from_str(&text)
        .map_err(|e| PluginError::Recoverable(format!("invalid kitty tree: {e}")))
}

fn query_session(runner: &dyn ProcessRunner, socket: &str) -> Result<String, PluginError> {
    remote(
        runner,
        socket,
        &["ls", "--all-env-vars", "--output-format=session"],
    )
}

struct WindowCapture<'c, 'a> {
    ctx: &'c SaveContext<'a>,
    socket: &'c str,
    scrollback: ScrollbackExtent,
    container_window: u64,
}

impl WindowCapture<'_, '_> {
    /// `launch --cwd="<cwd>"` plus the window's restore command, if any.
    fn launch_directive(&self, window: &KittyWindow) -> String {
        let mut directive = format!("{LAUNCH_PREFIX}--cwd=\"{}\"", window.cwd);
        if let Some(restore) = self.restore_command(window) {
            directive.push(' ');
            directive.push_str(&restore);
        }
        directive
    }

    fn restore_command(&self, window: &KittyWindow) -> Option<String> {
        let shell = window.shell();
        let template = format!("{COMMAND_PLACEHOLDER} && {shell}");
        match detect_subprocess(
            self.ctx.processes,
            self.ctx.config,
            window.pid,
            true,
            &template,
        ) {
            Ok(Some(command)) => return Some(format!("{shell} -c '{command}'")),
            Ok(None) => {}
            Err(error) => append_run_log(
                "debug",
                "kitty.window.process_unavailable",
                json!({ "window": window.id, "error": error.to_string() }),
            ),
        }

        let scrollback = self.capture_scrollback(window)?;
        Some(format!(
            "{shell} -c 'cat \"{}\" && {shell}'",
            scrollback.display()
        ))
    }

    fn capture_scrollback(&self, window: &KittyWindow) -> Option<PathBuf> {
        let extent = self.scrollback.extent_flag()?;
        let match_arg = format!("id:{}", window.id);
        let extent_arg = format!("--extent={extent}");
        let text = remote(
            self.ctx.runner,
            self.socket,
            &[
                "get-text",
                "--ansi",
                "--add-cursor",
                "--match",
                match_arg.as_str(),
                extent_arg.as_str(),
            ],
        )
        .ok()?;
        match self
            .ctx
            .store
            .write_kitty_scrollback(self.container_window, window.id, &text)
        {
            Ok(path) => {
                append_run_log(
                    "info",
                    "kitty.scrollback.saved",
                    json!({ "path": path.display().to_string() }),
                );
                Some(path)
            }
            Err(error) => {
                append_run_log(
                    "error",
                    "kitty.scrollback.failed",
                    json!({ "window": window.id, "error": error.to_string() }),
                );
                None
            }
        }
    }
}

fn parse_tree_to_session(os_window: &OsWindow, capture: &WindowCapture<'_, '_>) -> String {
    let mut out = String::new();
    for tab in &os_window.tabs {
        out.push_str("new_tab\n");
        out.push_str(&format!("layout {}\n", tab.layout));
        if tab.is_active {
            out.push_str("focus\n");
        }
        for window in &tab.windows {
            out.push_str(&capture.launch_directive(window));
            out.push('\n');
        }
    }
    out
}

/// Rewrites each `launch 'kitty-unserialize-data=<json>' ...` line of a
/// native session. The JSON text is kept byte-for-byte; everything after it
/// is replaced by the window's cwd and restore command.
///
/// kitty describes every OS window of the instance. Sections whose windows
/// all belong to other OS windows are left out.
fn replace_launch_commands(
    session: &str,
    os_window: &OsWindow,
    capture: &WindowCapture<'_, '_>,
) -> Result<String, PluginError> {
    let windows = os_window
        .tabs
        .iter()
        .flat_map(|tab| tab.windows.iter())
        .map(|window| (window.id, window))
        .collect::<BTreeMap<_, _>>();

    let mut out = String::with_capacity(session.len());
    let mut restored = 0;
    for section in os_window_sections(session) {
        let mut rewritten = String::new();
        let mut own = 0;
        let mut foreign = 0;
        for line in section {
            if !line.starts_with(LAUNCH_PREFIX) {
                rewritten.push_str(line);
                continue;
            }
            let (data, window_id) = unserialize_data(line)?;
            let Some(window) = windows.get(&window_id) else {
                foreign += 1;
                continue;
            };
            own += 1;
            let directive = capture.launch_directive(window);
            let flags = directive.strip_prefix(LAUNCH_PREFIX).unwrap_or(&directive);
            rewritten.push_str(&format!(
                "{LAUNCH_PREFIX}'{UNSERIALIZE_DATA_KEY}{data}' {flags}\n"
            ));
        }
        if own == 0 && foreign > 0 {
            append_run_log(
                "debug",
                "kitty.session.other_os_window",
                json!({ "windows": foreign }),
            );
            continue;
        }
        restored += own;
        out.push_str(&rewritten);
    }
    if restored == 0 && !windows.is_empty() {
        return Err(PluginError::Recoverable(
            "native session lists none of the OS window's windows".to_string(),
        ));
    }
    Ok(out)
}

/// Lines of a session grouped per OS window. A new group starts at every
/// `new_os_window` directive that follows other lines.
fn os_window_sections(session: &str) -> Vec<Vec<&str>> {
    let mut sections: Vec<Vec<&str>> = vec![Vec::new()];
    for line in session.split_inclusive('\n') {
        if line.starts_with(NEW_OS_WINDOW) && sections.last().is_some_and(|s| !s.is_empty()) {
            sections.push(Vec::new());
        }
        if let Some(section) = sections.last_mut() {
            section.push(line);
        }
    }
    sections
}

/// Raw JSON text following `kitty-unserialize-data=` and its window id.
fn unserialize_data(line: &str) -> Result<(&str, u64), PluginError> {
    let malformed = || PluginError::Recoverable(format!("malformed kitty launch line: {}", line.trim_end()));
    let key_start = line[LAUNCH_PREFIX.len()..]
        .find(UNSERIALIZE_DATA_KEY)
        .ok_or_else(malformed)?
        + LAUNCH_PREFIX.len();
    let data_start = key_start + UNSERIALIZE_DATA_KEY.len();
    let rest = &line[data_start..];

    let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
    let value = stream.next().ok_or_else(malformed)?.map_err(|_| malformed())?;
    let data = &rest[..stream.byte_offset()];
    let window_id = value.get("id").and_then(Value::as_u64).ok_or_else(malformed)?;
    Ok((data, window_id))
}
