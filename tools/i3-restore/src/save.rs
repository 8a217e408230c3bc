use crate::browsers::BrowserDedup;
use crate::config::AppConfig;
use crate::errors::RestoreError;
use crate::i3::I3Client;
use crate::logging::append_run_log;
use crate::plugins::PluginRegistry;
use crate::resolver::{resolve_container, Container, SaveContext};
use crate::runtime::ProductionRuntime;
use crate::store::SessionStore;
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub workspaces: Vec<PathBuf>,
    pub containers_saved: usize,
    pub containers_dropped: usize,
}

/// Captures every workspace of the running i3 session into `base_dir`.
///
/// The browser flags and the plugin registry (with its cached probes) live
/// for exactly this call, so repeated runs never share state.
pub fn save_session(
    runtime: &ProductionRuntime,
    cfg: &AppConfig,
    base_dir: &Path,
    plugins: &PluginRegistry,
) -> Result<SaveSummary, RestoreError> {
    let runner = runtime.process_runner.as_ref();
    let i3 = I3Client::new(runner);
    let workspaces = i3.workspaces()?;

    let store = SessionStore::new(runtime.file_system.as_ref(), base_dir);
    store.prepare_for_save()?;

    let ctx = SaveContext {
        config: cfg,
        processes: runtime.process_table.as_ref(),
        runner,
        store: &store,
    };
    let mut browsers = BrowserDedup::new(&cfg.web_browsers);
    let mut summary = SaveSummary::default();

    for workspace in &workspaces {
        append_run_log(
            "debug",
            "save.workspace.start",
            json!({ "workspace": workspace.name }),
        );
        let mut containers = Vec::new();
        for leaf in workspace.windows() {
            let pid = leaf.window_id.and_then(|window| i3.window_pid(window));
            let mut container = Container::for_window(leaf, pid);
            resolve_container(&ctx, plugins, &mut browsers, &mut container)?;
            if container.is_resolved() {
                containers.push(container);
            } else {
                summary.containers_dropped += 1;
            }
        }
        summary.containers_saved += containers.len();
        if let Some(path) = store.write_workspace(&workspace.name, &containers)? {
            summary.workspaces.push(path);
        }
    }

    append_run_log(
        "info",
        "save.completed",
        json!({
            "workspaces": summary.workspaces.len(),
            "containers_saved": summary.containers_saved,
            "containers_dropped": summary.containers_dropped,
            "browsers": browsers.captured()
        }),
    );
    Ok(summary)
}
