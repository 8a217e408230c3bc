use crate::errors::RestoreError;
use crate::logging::append_run_log;
use crate::runtime::{ProcessRequest, ProcessRunner};
use crate::tree::{parse_tree, workspaces, WorkspaceTree};
use serde_json::json;

/// Talks to i3 through `i3-msg` and resolves window pids through `xdotool`.
pub struct I3Client<'a> {
    runner: &'a dyn ProcessRunner,
}

impl<'a> I3Client<'a> {
    pub fn new(runner: &'a dyn ProcessRunner) -> Self {
        Self { runner }
    }

    pub fn workspaces(&self) -> Result<Vec<WorkspaceTree>, RestoreError> {
        let out = self
            .runner
            .run(ProcessRequest::new("i3-msg", ["-t", "get_tree"]))?;
        if !out.success() {
            append_run_log(
                "error",
                "i3.tree.failed",
                json!({ "exit_code": out.exit_code, "stderr": out.stderr }),
            );
            return Err(RestoreError::Tree(format!(
                "i3-msg -t get_tree failed: {}",
                out.stderr.trim()
            )));
        }
        let root = parse_tree(&out.stdout)?;
        let found = workspaces(&root);
        append_run_log(
            "debug",
            "i3.tree.fetched",
            json!({ "workspaces": found.iter().map(|ws| ws.name.as_str()).collect::<Vec<_>>() }),
        );
        Ok(found)
    }

    pub fn focus_workspace(&self, name: &str) -> Result<(), RestoreError> {
        self.command(&format!(
            "workspace --no-auto-back-and-forth {}",
            quote_argument(name)
        ))
    }

    pub fn exec(&self, shell_command: &str) -> Result<(), RestoreError> {
        self.command(&format!("exec {shell_command}"))
    }

    pub fn focus_next(&self) -> Result<(), RestoreError> {
        self.command("focus next")
    }

    pub fn restart(&self) -> Result<(), RestoreError> {
        self.command("restart")
    }

    pub fn command(&self, command: &str) -> Result<(), RestoreError> {
        let out = self.runner.run(ProcessRequest::new("i3-msg", [command]))?;
        if !out.success() {
            append_run_log(
                "error",
                "i3.command.failed",
                json!({ "command": command, "exit_code": out.exit_code, "stderr": out.stderr }),
            );
            return Err(RestoreError::Process(format!(
                "i3-msg '{command}' failed: {}",
                out.stderr.trim()
            )));
        }
        append_run_log("debug", "i3.command.sent", json!({ "command": command }));
        Ok(())
    }

    /// Pid owning `window_id`, or `None` when the window has no process
    /// (already closed, or never exposed `_NET_WM_PID`).
    pub fn window_pid(&self, window_id: u64) -> Option<u32> {
        let out = self
            .runner
            .run(ProcessRequest::new(
                "xdotool",
                ["getwindowpid".to_string(), window_id.to_string()],
            ))
            .ok()?;
        if !out.success() {
            return None;
        }
        out.stdout.trim().parse().ok()
    }
}

/// Double-quotes `value` for i3's command parser.
pub fn quote_argument(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
