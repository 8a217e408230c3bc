use crate::errors::ProcessError;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub parent: Option<u32>,
    pub name: String,
    pub cmdline: Vec<String>,
    /// `None` when the working directory could not be read.
    pub cwd: Option<PathBuf>,
    pub start_time: u64,
}

impl ProcessInfo {
    pub fn require_cwd(&self) -> Result<&Path, ProcessError> {
        self.cwd
            .as_deref()
            .ok_or(ProcessError::AccessDenied(self.pid))
    }

    /// Program and arguments. An empty command line means it could not be read.
    pub fn require_cmdline(&self) -> Result<(&str, &[String]), ProcessError> {
        match self.cmdline.split_first() {
            Some((program, args)) => Ok((program.as_str(), args)),
            None => Err(ProcessError::AccessDenied(self.pid)),
        }
    }
}

pub trait ProcessTable: Send + Sync {
    fn process(&self, pid: u32) -> Result<ProcessInfo, ProcessError>;
    /// Children of `pid` in creation order (oldest first). With `recursive`,
    /// every descendant is included.
    fn children(&self, pid: u32, recursive: bool) -> Result<Vec<ProcessInfo>, ProcessError>;
    /// The whole table as it is now. Lookups against the snapshot never read
    /// the system again.
    fn snapshot(&self) -> ProcessSnapshot;
}

/// A point-in-time copy of the process table.
#[derive(Debug, Clone, Default)]
pub struct ProcessSnapshot {
    entries: BTreeMap<u32, Result<ProcessInfo, ProcessError>>,
}

impl ProcessSnapshot {
    fn live(&self) -> impl Iterator<Item = &ProcessInfo> {
        self.entries.values().filter_map(|entry| entry.as_ref().ok())
    }
}

impl ProcessTable for ProcessSnapshot {
    fn process(&self, pid: u32) -> Result<ProcessInfo, ProcessError> {
        match self.entries.get(&pid) {
            Some(entry) => entry.clone(),
            None => Err(ProcessError::NoSuchProcess(pid)),
        }
    }

    fn children(&self, pid: u32, recursive: bool) -> Result<Vec<ProcessInfo>, ProcessError> {
        self.process(pid)?;
        Ok(descendants_of(self.live(), pid, recursive))
    }

    fn snapshot(&self) -> ProcessSnapshot {
        self.clone()
    }
}

/// Reads the live process table through `sysinfo`.
pub struct SysinfoProcessTable;

impl SysinfoProcessTable {
    fn info(pid: Pid, process: &sysinfo::Process) -> ProcessInfo {
        ProcessInfo {
            pid: pid.as_u32(),
            parent: process.parent().map(|p| p.as_u32()),
            name: process.name().to_string_lossy().to_string(),
            cmdline: process
                .cmd()
                .iter()
                .map(|arg| arg.to_string_lossy().to_string())
                .collect(),
            cwd: process.cwd().map(Path::to_path_buf),
            start_time: process.start_time(),
        }
    }
}

impl ProcessTable for SysinfoProcessTable {
    fn process(&self, pid: u32) -> Result<ProcessInfo, ProcessError> {
        self.snapshot().process(pid)
    }

    fn children(&self, pid: u32, recursive: bool) -> Result<Vec<ProcessInfo>, ProcessError> {
        self.snapshot().children(pid, recursive)
    }

    fn snapshot(&self) -> ProcessSnapshot {
        let refresh = ProcessRefreshKind::nothing()
            .with_cmd(UpdateKind::Always)
            .with_cwd(UpdateKind::Always);
        let mut system = System::new();
        system.refresh_processes_specifics(ProcessesToUpdate::All, true, refresh);

        let entries = system
            .processes()
            .iter()
            .filter(|(_, process)| process.thread_kind().is_none())
            .map(|(pid, process)| {
                let entry = if process.status() == ProcessStatus::Zombie {
                    Err(ProcessError::Zombie(pid.as_u32()))
                } else {
                    Ok(Self::info(*pid, process))
                };
                (pid.as_u32(), entry)
            })
            .collect();
        ProcessSnapshot { entries }
    }
}

fn descendants_of<'p>(
    processes: impl Iterator<Item = &'p ProcessInfo>,
    root: u32,
    recursive: bool,
) -> Vec<ProcessInfo> {
    let mut by_parent: BTreeMap<u32, Vec<&ProcessInfo>> = BTreeMap::new();
    for process in processes {
        if let Some(parent) = process.parent {
            by_parent.entry(parent).or_default().push(process);
        }
    }

    let mut found = Vec::new();
    let mut seen = BTreeSet::from([root]);
    let mut frontier = vec![root];
    while let Some(parent) = frontier.pop() {
        for child in by_parent.get(&parent).into_iter().flatten() {
            if !seen.insert(child.pid) {
                continue;
            }
            found.push((*child).clone());
            if recursive {
                frontier.push(child.pid);
            }
        }
    }

    found.sort_by_key(|process| (process.start_time, process.pid));
    found
}

/// In-memory process table. Processes are created in insertion order.
#[derive(Default, Clone)]
pub struct FakeProcessTable {
    entries: Arc<Mutex<BTreeMap<u32, Result<ProcessInfo, ProcessError>>>>,
    clock: Arc<Mutex<u64>>,
    snapshots: Arc<Mutex<usize>>,
}

impl FakeProcessTable {
    pub fn insert(
        &self,
        pid: u32,
        parent: Option<u32>,
        name: &str,
        cmdline: &[&str],
        cwd: Option<&str>,
    ) -> &Self {
        let mut clock = self.clock.lock().expect("clock lock");
        *clock += 1;
        let info = ProcessInfo {
            pid,
            parent,
            name: name.to_string(),
            cmdline: cmdline.iter().map(ToString::to_string).collect(),
            cwd: cwd.map(PathBuf::from),
            start_time: *clock,
        };
        self.entries
            .lock()
            .expect("entries lock")
            .insert(pid, Ok(info));
        self
    }

    /// Makes every lookup of `pid` fail with `error`.
    pub fn fail(&self, pid: u32, error: ProcessError) -> &Self {
        self.entries
            .lock()
            .expect("entries lock")
            .insert(pid, Err(error));
        self
    }

    /// Number of snapshots taken so far.
    pub fn snapshots_taken(&self) -> usize {
        *self.snapshots.lock().expect("snapshots lock")
    }
}

impl ProcessTable for FakeProcessTable {
    fn process(&self, pid: u32) -> Result<ProcessInfo, ProcessError> {
        self.snapshot().process(pid)
    }

    fn children(&self, pid: u32, recursive: bool) -> Result<Vec<ProcessInfo>, ProcessError> {
        self.snapshot().children(pid, recursive)
    }

    fn snapshot(&self) -> ProcessSnapshot {
        *self.snapshots.lock().expect("snapshots lock") += 1;
        ProcessSnapshot {
            entries: self.entries.lock().expect("entries lock").clone(),
        }
    }
}
