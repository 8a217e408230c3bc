use crate::browsers::{BrowserClaim, BrowserDedup};
use crate::config::{AppConfig, COMMAND_PLACEHOLDER};
use crate::errors::{ProcessError, RestoreError};
use crate::logging::append_run_log;
use crate::plugins::{PluginError, PluginRegistry};
use crate::runtime::{ProcessRunner, ProcessTable};
use crate::script::build_subprocess_command;
use crate::store::SessionStore;
use crate::tree::WindowLeaf;
use serde_json::json;
use std::path::PathBuf;

/// One window and what it takes to relaunch it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Container {
    pub window_id: Option<u64>,
    pub class: Option<String>,
    pub pid: Option<u32>,
    pub command: Option<String>,
    pub working_directory: Option<PathBuf>,
    /// Runs inside the shell of `command` when `command` is a terminal.
    pub subprocess_command: Option<String>,
}

impl Container {
    pub fn for_window(leaf: &WindowLeaf, pid: Option<u32>) -> Self {
        Self {
            window_id: leaf.window_id,
            class: leaf.class.clone(),
            pid,
            ..Self::default()
        }
    }

    pub fn class_name(&self) -> &str {
        self.class.as_deref().unwrap_or_default()
    }

    pub fn is_resolved(&self) -> bool {
        self.command.is_some()
    }

    fn clear_resolution(&mut self) {
        self.command = None;
        self.working_directory = None;
        self.subprocess_command = None;
    }
}

/// Collaborators shared by every container of a save run.
pub struct SaveContext<'a> {
    pub config: &'a AppConfig,
    pub processes: &'a dyn ProcessTable,
    pub runner: &'a dyn ProcessRunner,
    pub store: &'a SessionStore<'a>,
}

/// Resolves the relaunch command of `container`. A container whose process
/// vanished or could not be inspected comes back unresolved. Only fatal
/// plugin errors and session write failures are returned as errors.
pub fn resolve_container(
    ctx: &SaveContext<'_>,
    plugins: &PluginRegistry,
    browsers: &mut BrowserDedup,
    container: &mut Container,
) -> Result<(), RestoreError> {
    let Some(pid) = container.pid else {
        append_run_log(
            "debug",
            "resolver.no_pid",
            json!({ "window": container.window_id }),
        );
        return Ok(());
    };
    let class = container.class_name().to_string();
    let snapshot = ctx.processes.snapshot();
    let ctx = &SaveContext {
        processes: &snapshot,
        ..*ctx
    };

    if let (Some(plugin), Some(settings)) = (plugins.get(&class), ctx.config.plugin_settings(&class)) {
        match plugin.attempt_save(ctx, container, settings) {
            Ok(()) => {
                append_run_log(
                    "info",
                    "resolver.plugin.saved",
                    json!({ "class": class, "window": container.window_id, "command": container.command }),
                );
                return Ok(());
            }
            Err(PluginError::Fatal(error)) => return Err(error),
            Err(PluginError::Recoverable(reason)) => {
                append_run_log(
                    "warn",
                    "resolver.plugin.fallback",
                    json!({ "class": class, "window": container.window_id, "reason": reason }),
                );
                container.clear_resolution();
            }
        }
    }

    let is_terminal = ctx.config.terminal_for_class(&class).is_some();
    if let Err(error) = resolve_generic(ctx, container, pid, &class) {
        append_run_log(
            "debug",
            "resolver.process_unavailable",
            json!({ "window": container.window_id, "pid": pid, "error": error.to_string() }),
        );
        container.clear_resolution();
        return Ok(());
    }

    if !is_terminal {
        dedup_browser(ctx, browsers, container)?;
    }
    Ok(())
}

fn resolve_generic(
    ctx: &SaveContext<'_>,
    container: &mut Container,
    pid: u32,
    class: &str,
) -> Result<(), ProcessError> {
    let process = ctx.processes.process(pid)?;

    if let Some(terminal) = ctx.config.terminal_for_class(class) {
        let subprocess =
            detect_subprocess(ctx.processes, ctx.config, pid, false, COMMAND_PLACEHOLDER)?;
        // Terminals disagree on whose cwd tracks the shell; the newest child wins.
        let children = ctx.processes.children(pid, false)?;
        let cwd = match children.last() {
            Some(child) => child.require_cwd()?.to_path_buf(),
            None => process.require_cwd()?.to_path_buf(),
        };
        append_run_log(
            "debug",
            "resolver.terminal",
            json!({ "class": class, "pid": pid, "subprocess": subprocess }),
        );
        container.command = Some(terminal.command.clone());
        container.working_directory = Some(cwd);
        container.subprocess_command = subprocess;
        return Ok(());
    }

    let (program, args) = process.require_cmdline()?;
    let cwd = process.require_cwd()?.to_path_buf();
    let command = std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");
    container.command = Some(command);
    container.working_directory = Some(cwd);
    Ok(())
}

fn dedup_browser(
    ctx: &SaveContext<'_>,
    browsers: &mut BrowserDedup,
    container: &mut Container,
) -> Result<(), RestoreError> {
    let Some(command) = container.command.clone() else {
        return Ok(());
    };
    match browsers.claim(&command) {
        BrowserClaim::NotBrowser => {}
        BrowserClaim::First(browser) => {
            ctx.store.append_browser(&command)?;
            append_run_log(
                "info",
                "resolver.browser.saved",
                json!({ "browser": browser, "command": command }),
            );
            container.command = None;
        }
        BrowserClaim::Duplicate(browser) => {
            append_run_log(
                "debug",
                "resolver.browser.duplicate",
                json!({ "browser": browser, "window": container.window_id }),
            );
            container.command = None;
        }
    }
    Ok(())
}

/// Finds the subprocess worth relaunching under `pid`.
///
/// Descendants are checked newest first and the first one whose name is a
/// configured subprocess decides the outcome: if its arguments fail the
/// filters there is no subprocess at all, older candidates are not
/// considered. With `include_self` the process itself is the oldest
/// candidate.
pub fn detect_subprocess(
    processes: &dyn ProcessTable,
    config: &AppConfig,
    pid: u32,
    include_self: bool,
    default_template: &str,
) -> Result<Option<String>, ProcessError> {
    let mut candidates = processes.children(pid, true)?;
    if include_self {
        candidates.insert(0, processes.process(pid)?);
    }

    for candidate in candidates.iter().rev() {
        let Some(program) = config.subprocess_named(&candidate.name) else {
            continue;
        };
        let (binary, args) = candidate.require_cmdline()?;
        if !program.accepts(args) {
            append_run_log(
                "debug",
                "resolver.subprocess.filtered",
                json!({ "name": program.name, "pid": candidate.pid }),
            );
            return Ok(None);
        }
        return Ok(Some(build_subprocess_command(
            program.launch_template(default_template),
            binary,
            args,
        )));
    }
    Ok(None)
}
