//! Replays a saved session.
//!
//! A restore is planned up front as a flat list of [`RestoreAction`]s and
//! then executed against i3. i3 never acknowledges that a window has been
//! mapped, so every invoke is followed by a fixed settle delay before focus
//! moves on.

use crate::errors::RestoreError;
use crate::i3::{quote_argument, I3Client};
use crate::logging::append_run_log;
use crate::runtime::{Clock, ProductionRuntime};
use crate::store::SessionStore;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreTiming {
    pub container_settle: Duration,
    pub final_settle: Duration,
}

impl Default for RestoreTiming {
    fn default() -> Self {
        Self {
            container_settle: Duration::from_millis(200),
            final_settle: Duration::from_secs(7),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreAction {
    FocusWorkspace(String),
    Invoke {
        working_directory: PathBuf,
        script: PathBuf,
        index: usize,
    },
    Settle(Duration),
    FocusNext,
    RunBrowsers(PathBuf),
    Restart,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestorePlan {
    pub actions: Vec<RestoreAction>,
    /// Workspace scripts that could not be read.
    pub unreadable: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub workspaces: usize,
    pub containers: usize,
    pub failures: usize,
}

pub fn plan_restore(store: &SessionStore<'_>, timing: RestoreTiming) -> Result<RestorePlan, RestoreError> {
    let mut plan = RestorePlan::default();
    let workspaces = store.saved_workspaces()?;
    let browsers = store.browsers_script();
    if workspaces.is_empty() && browsers.is_none() {
        append_run_log(
            "info",
            "restore.nothing_saved",
            json!({ "dir": store.dir().display().to_string() }),
        );
        return Ok(plan);
    }
    for workspace in workspaces {
        let containers = match store.read_workspace(&workspace) {
            Ok(containers) => containers,
            Err(error) => {
                append_run_log(
                    "error",
                    "restore.workspace.unreadable",
                    json!({ "workspace": workspace.name, "error": error.to_string() }),
                );
                plan.unreadable += 1;
                continue;
            }
        };
        if containers.is_empty() {
            continue;
        }
        plan.actions
            .push(RestoreAction::FocusWorkspace(workspace.name.clone()));
        for container in containers {
            plan.actions.push(RestoreAction::Invoke {
                working_directory: container.working_directory,
                script: workspace.script.clone(),
                index: container.index,
            });
            plan.actions
                .push(RestoreAction::Settle(timing.container_settle));
            plan.actions.push(RestoreAction::FocusNext);
        }
    }
    if let Some(browsers) = browsers {
        plan.actions.push(RestoreAction::RunBrowsers(browsers));
    }
    plan.actions.push(RestoreAction::Settle(timing.final_settle));
    plan.actions.push(RestoreAction::Restart);
    Ok(plan)
}

/// Shell command i3 executes to relaunch container `index` of `script`.
pub fn invoke_command(working_directory: &Path, script: &Path, index: usize) -> String {
    format!(
        "cd {} && bash {} {index}",
        quote_argument(&working_directory.to_string_lossy()),
        quote_argument(&script.to_string_lossy())
    )
}

/// Runs every action in order. A failing action is logged and counted; the
/// remaining actions still run.
pub fn execute_plan(plan: &RestorePlan, i3: &I3Client<'_>, clock: &dyn Clock) -> RestoreSummary {
    let mut summary = RestoreSummary {
        failures: plan.unreadable,
        ..RestoreSummary::default()
    };
    for action in &plan.actions {
        let result = match action {
            RestoreAction::FocusWorkspace(name) => {
                summary.workspaces += 1;
                i3.focus_workspace(name)
            }
            RestoreAction::Invoke {
                working_directory,
                script,
                index,
            } => {
                summary.containers += 1;
                i3.exec(&invoke_command(working_directory, script, *index))
            }
            RestoreAction::Settle(duration) => clock.sleep_for(*duration),
            RestoreAction::FocusNext => i3.focus_next(),
            RestoreAction::RunBrowsers(path) => {
                i3.exec(&format!("bash {}", quote_argument(&path.to_string_lossy())))
            }
            RestoreAction::Restart => i3.restart(),
        };
        if let Err(error) = result {
            summary.failures += 1;
            append_run_log(
                "error",
                "restore.action.failed",
                json!({ "action": format!("{action:?}"), "error": error.to_string() }),
            );
        }
    }
    summary
}

pub fn restore_session(
    runtime: &ProductionRuntime,
    base_dir: &Path,
    timing: RestoreTiming,
) -> Result<RestoreSummary, RestoreError> {
    let store = SessionStore::new(runtime.file_system.as_ref(), base_dir);
    let plan = plan_restore(&store, timing)?;
    let i3 = I3Client::new(runtime.process_runner.as_ref());
    let summary = execute_plan(&plan, &i3, runtime.clock.as_ref());
    append_run_log(
        "info",
        "restore.completed",
        json!({
            "workspaces": summary.workspaces,
            "containers": summary.containers,
            "failures": summary.failures
        }),
    );
    Ok(summary)
}
