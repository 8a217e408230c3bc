use crate::errors::RestoreError;
use crate::logging::append_run_log;
use crate::resolver::Container;
use crate::runtime::FileSystem;
use crate::script::{
    desanitize_workspace_name, parse_workspace_script, render_workspace_script,
    sanitize_workspace_name, SavedContainer, ScriptEntry,
};
use serde_json::json;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

const WORKSPACE_PREFIX: &str = "workspace_";
const PROGRAMS_SUFFIX: &str = "_programs.sh";
const KITTY_SESSION_PREFIX: &str = "kitty-session-";
const KITTY_SCROLLBACK_PREFIX: &str = "kitty-scrollback-";
const BROWSERS_FILE: &str = "web_browsers.sh";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedWorkspace {
    pub name: String,
    pub script: PathBuf,
}

/// Session files of one base directory.
pub struct SessionStore<'a> {
    fs: &'a dyn FileSystem,
    dir: PathBuf,
}

impl<'a> SessionStore<'a> {
    pub fn new(fs: &'a dyn FileSystem, dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn workspace_script_path(&self, workspace: &str) -> PathBuf {
        self.dir.join(format!(
            "{WORKSPACE_PREFIX}{}{PROGRAMS_SUFFIX}",
            sanitize_workspace_name(workspace)
        ))
    }

    pub fn subprocess_path(&self, workspace: &str, index: usize) -> PathBuf {
        self.dir.join(format!(
            "{WORKSPACE_PREFIX}{}_subprocess_{index}.sh",
            sanitize_workspace_name(workspace)
        ))
    }

    pub fn kitty_session_path(&self, window_id: u64) -> PathBuf {
        self.dir.join(format!("{KITTY_SESSION_PREFIX}{window_id}"))
    }

    pub fn kitty_scrollback_path(&self, os_window_id: u64, window_id: u64) -> PathBuf {
        self.dir
            .join(format!("{KITTY_SCROLLBACK_PREFIX}{os_window_id}-{window_id}"))
    }

    pub fn browsers_path(&self) -> PathBuf {
        self.dir.join(BROWSERS_FILE)
    }

    /// Creates the directory and removes every artifact of the previous save.
    pub fn prepare_for_save(&self) -> Result<usize, RestoreError> {
        self.fs.create_dir_all(&self.dir)?;
        let mut removed = 0;
        for path in self.fs.list_dir(&self.dir)? {
            if is_session_artifact(&path) {
                self.fs.remove_file(&path)?;
                removed += 1;
            }
        }
        append_run_log(
            "debug",
            "store.cleared",
            json!({ "dir": self.dir.display().to_string(), "removed": removed }),
        );
        Ok(removed)
    }

    /// Writes the script of one workspace. Containers without a command are
    /// skipped; a workspace left with none gets no file and returns `None`.
    pub fn write_workspace(
        &self,
        workspace: &str,
        containers: &[Container],
    ) -> Result<Option<PathBuf>, RestoreError> {
        let mut entries = Vec::new();
        for container in containers {
            let Some(command) = container.command.as_ref() else {
                continue;
            };
            let index = entries.len();
            let subprocess_file = match container.subprocess_command.as_deref() {
                Some(subprocess) => {
                    let path = self.subprocess_path(workspace, index);
                    self.fs.write_string(&path, subprocess)?;
                    Some(path)
                }
                None => None,
            };
            entries.push(ScriptEntry {
                working_directory: container
                    .working_directory
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("/")),
                subprocess_file,
                command: command.clone(),
            });
        }
        if entries.is_empty() {
            append_run_log(
                "debug",
                "store.workspace.empty",
                json!({ "workspace": workspace }),
            );
            return Ok(None);
        }

        let path = self.workspace_script_path(workspace);
        self.fs
            .write_string(&path, &render_workspace_script(&entries))?;
        self.fs.set_executable(&path)?;
        append_run_log(
            "info",
            "store.workspace.written",
            json!({
                "workspace": workspace,
                "path": path.display().to_string(),
                "containers": entries.len()
            }),
        );
        Ok(Some(path))
    }

    /// Adds one browser to the shared browser script. Each line runs in the
    /// background so every browser starts without waiting on the previous one.
    pub fn append_browser(&self, command: &str) -> Result<(), RestoreError> {
        let path = self.browsers_path();
        self.fs.append_string(&path, &format!("{command} &\n"))?;
        self.fs.set_executable(&path)
    }

    pub fn browsers_script(&self) -> Option<PathBuf> {
        let path = self.browsers_path();
        self.fs.exists(&path).then_some(path)
    }

    pub fn write_kitty_session(&self, window_id: u64, contents: &str) -> Result<PathBuf, RestoreError> {
        let path = self.kitty_session_path(window_id);
        self.fs.write_string(&path, contents)?;
        Ok(path)
    }

    pub fn write_kitty_scrollback(
        &self,
        os_window_id: u64,
        window_id: u64,
        contents: &str,
    ) -> Result<PathBuf, RestoreError> {
        let path = self.kitty_scrollback_path(os_window_id, window_id);
        self.fs.write_string(&path, contents)?;
        Ok(path)
    }

    /// Saved workspaces in natural order of their names. A directory that was
    /// never created holds no workspaces.
    pub fn saved_workspaces(&self) -> Result<Vec<SavedWorkspace>, RestoreError> {
        if !self.fs.exists(&self.dir) {
            return Ok(Vec::new());
        }
        let mut saved = self
            .fs
            .list_dir(&self.dir)?
            .into_iter()
            .filter_map(|script| {
                let file_name = script.file_name()?.to_str()?;
                let sanitized = file_name
                    .strip_prefix(WORKSPACE_PREFIX)?
                    .strip_suffix(PROGRAMS_SUFFIX)?;
                Some(SavedWorkspace {
                    name: desanitize_workspace_name(sanitized),
                    script: script.clone(),
                })
            })
            .collect::<Vec<_>>();
        saved.sort_by(|a, b| natural_cmp(&a.name, &b.name));
        Ok(saved)
    }

    pub fn read_workspace(&self, workspace: &SavedWorkspace) -> Result<Vec<SavedContainer>, RestoreError> {
        let text = self.fs.read_to_string(&workspace.script)?;
        parse_workspace_script(&workspace.script, &text)
    }
}

fn is_session_artifact(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    (name.starts_with(WORKSPACE_PREFIX)
        && (name.ends_with(PROGRAMS_SUFFIX) || name.contains("_subprocess_")))
        || name.starts_with(KITTY_SESSION_PREFIX)
        || name.starts_with(KITTY_SCROLLBACK_PREFIX)
        || name == BROWSERS_FILE
}

/// Orders names by their leading number first, so "2" sorts before "10".
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    fn split(name: &str) -> (Option<u64>, &str) {
        let digits = name.chars().take_while(char::is_ascii_digit).count();
        (name[..digits].parse().ok(), &name[digits..])
    }
    let (a_num, a_rest) = split(a);
    let (b_num, b_rest) = split(b);
    match (a_num, b_num) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a_rest.cmp(b_rest)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}
