use crate::errors::RestoreError;
use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

mod processes;

pub use processes::{
    FakeProcessTable, ProcessInfo, ProcessSnapshot, ProcessTable, SysinfoProcessTable,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl ProcessRequest {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
    fn sleep_until(&self, deadline: SystemTime) -> Result<(), RestoreError>;

    fn sleep_for(&self, duration: Duration) -> Result<(), RestoreError> {
        self.sleep_until(self.now() + duration)
    }
}

pub trait ProcessRunner: Send + Sync {
    fn spawn(&self, request: ProcessRequest) -> Result<u64, RestoreError>;
    fn wait(&self, handle: u64) -> Result<ProcessOutput, RestoreError>;

    fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, RestoreError> {
        let handle = self.spawn(request)?;
        self.wait(handle)
    }
}

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, RestoreError>;
    /// Replaces the whole file. Readers never observe a partially written file.
    fn write_string(&self, path: &Path, contents: &str) -> Result<(), RestoreError>;
    fn append_string(&self, path: &Path, contents: &str) -> Result<(), RestoreError>;
    fn create_dir_all(&self, path: &Path) -> Result<(), RestoreError>;
    fn remove_file(&self, path: &Path) -> Result<(), RestoreError>;
    fn exists(&self, path: &Path) -> bool;
    /// Regular files directly inside `dir`, sorted by path.
    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, RestoreError>;
    fn set_executable(&self, path: &Path) -> Result<(), RestoreError>;
}

pub struct ProductionClock;

impl Clock for ProductionClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep_until(&self, deadline: SystemTime) -> Result<(), RestoreError> {
        let now = SystemTime::now();
        if let Ok(duration) = deadline.duration_since(now) {
            std::thread::sleep(duration);
        }
        Ok(())
    }
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, RestoreError> {
        std::fs::read_to_string(path).map_err(|e| RestoreError::Io(io_context(path, e)))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), RestoreError> {
        let file_name = path
            .file_name()
            .ok_or_else(|| RestoreError::Io(format!("{} has no file name", path.display())))?;
        let mut tmp_name = std::ffi::OsString::from(".");
        tmp_name.push(file_name);
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);
        std::fs::write(&tmp, contents).map_err(|e| RestoreError::Io(io_context(&tmp, e)))?;
        std::fs::rename(&tmp, path).map_err(|e| RestoreError::Io(io_context(path, e)))
    }

    fn append_string(&self, path: &Path, contents: &str) -> Result<(), RestoreError> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| RestoreError::Io(io_context(path, e)))?;
        file.write_all(contents.as_bytes())
            .map_err(|e| RestoreError::Io(io_context(path, e)))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), RestoreError> {
        std::fs::create_dir_all(path).map_err(|e| RestoreError::Io(io_context(path, e)))
    }

    fn remove_file(&self, path: &Path) -> Result<(), RestoreError> {
        std::fs::remove_file(path).map_err(|e| RestoreError::Io(io_context(path, e)))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, RestoreError> {
        let mut files = std::fs::read_dir(dir)
            .map_err(|e| RestoreError::Io(io_context(dir, e)))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect::<Vec<_>>();
        files.sort();
        Ok(files)
    }

    #[cfg(unix)]
    fn set_executable(&self, path: &Path) -> Result<(), RestoreError> {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)
            .map_err(|e| RestoreError::Io(io_context(path, e)))?
            .permissions();
        perms.set_mode(perms.mode() | 0o111);
        std::fs::set_permissions(path, perms).map_err(|e| RestoreError::Io(io_context(path, e)))
    }

    #[cfg(not(unix))]
    fn set_executable(&self, _path: &Path) -> Result<(), RestoreError> {
        Ok(())
    }
}

fn io_context(path: &Path, error: std::io::Error) -> String {
    format!("{}: {error}", path.display())
}

#[derive(Default)]
struct ProcessState {
    next_handle: u64,
    children: HashMap<u64, std::process::Child>,
}

pub struct ProductionProcessRunner {
    state: Mutex<ProcessState>,
}

impl ProductionProcessRunner {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ProcessState::default()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ProcessState>, RestoreError> {
        self.state
            .lock()
            .map_err(|_| RestoreError::Process("process lock poisoned".to_string()))
    }
}

impl Default for ProductionProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner for ProductionProcessRunner {
    fn spawn(&self, request: ProcessRequest) -> Result<u64, RestoreError> {
        let mut cmd = std::process::Command::new(&request.program);
        cmd.args(&request.args);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let child = cmd
            .spawn()
            .map_err(|e| RestoreError::Process(format!("{}: {e}", request.program)))?;
        let mut state = self.lock()?;
        let handle = state.next_handle;
        state.next_handle += 1;
        state.children.insert(handle, child);
        Ok(handle)
    }

    fn wait(&self, handle: u64) -> Result<ProcessOutput, RestoreError> {
        let child = self.lock()?.children.remove(&handle);
        let child =
            child.ok_or_else(|| RestoreError::Process(format!("unknown handle {handle}")))?;
        let output = child
            .wait_with_output()
            .map_err(|e| RestoreError::Process(e.to_string()))?;
        Ok(ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

pub struct ProductionRuntime {
    pub clock: Arc<dyn Clock>,
    pub file_system: Arc<dyn FileSystem>,
    pub process_runner: Arc<dyn ProcessRunner>,
    pub process_table: Arc<dyn ProcessTable>,
}

impl ProductionRuntime {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(ProductionClock),
            file_system: Arc::new(ProductionFileSystem),
            process_runner: Arc::new(ProductionProcessRunner::new()),
            process_table: Arc::new(SysinfoProcessTable),
        }
    }
}

impl Default for ProductionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct FakeClock {
    origin: SystemTime,
    now: Arc<Mutex<SystemTime>>,
    sleeps: Arc<Mutex<Vec<SystemTime>>>,
}

impl FakeClock {
    pub fn new(now: SystemTime) -> Self {
        Self {
            origin: now,
            now: Arc::new(Mutex::new(now)),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sleeps(&self) -> Vec<SystemTime> {
        self.sleeps.lock().expect("sleep lock").clone()
    }

    /// Length of every recorded sleep, in order.
    pub fn slept(&self) -> Vec<Duration> {
        let mut previous = self.origin;
        self.sleeps()
            .into_iter()
            .map(|deadline| {
                let step = deadline.duration_since(previous).unwrap_or_default();
                previous = deadline;
                step
            })
            .collect()
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(SystemTime::UNIX_EPOCH)
    }
}

impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().expect("clock lock")
    }

    fn sleep_until(&self, deadline: SystemTime) -> Result<(), RestoreError> {
        self.sleeps.lock().expect("sleep lock").push(deadline);
        *self.now.lock().expect("clock lock") = deadline;
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct FakeFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, String>>>,
    dirs: Arc<Mutex<Vec<PathBuf>>>,
    executables: Arc<Mutex<BTreeSet<PathBuf>>>,
    failures: Arc<Mutex<HashMap<PathBuf, RestoreError>>>,
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let fs = Self::default();
        fs.files
            .lock()
            .expect("files lock")
            .insert(path.into(), contents.into());
        fs
    }

    /// The next operation on `path` fails with `error`.
    pub fn set_fail_next(&self, path: impl Into<PathBuf>, error: RestoreError) {
        self.failures
            .lock()
            .expect("fail lock")
            .insert(path.into(), error);
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files
            .lock()
            .expect("files lock")
            .get(path.as_ref())
            .cloned()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths = self
            .files
            .lock()
            .expect("files lock")
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        paths.sort();
        paths
    }

    pub fn is_executable(&self, path: impl AsRef<Path>) -> bool {
        self.executables
            .lock()
            .expect("executables lock")
            .contains(path.as_ref())
    }

    fn maybe_fail(&self, path: &Path) -> Result<(), RestoreError> {
        if let Some(err) = self.failures.lock().expect("fail lock").remove(path) {
            return Err(err);
        }
        Ok(())
    }
}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, RestoreError> {
        self.maybe_fail(path)?;
        self.file(path)
            .ok_or_else(|| RestoreError::Io(format!("missing file {}", path.display())))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), RestoreError> {
        self.maybe_fail(path)?;
        self.files
            .lock()
            .expect("files lock")
            .insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn append_string(&self, path: &Path, contents: &str) -> Result<(), RestoreError> {
        self.maybe_fail(path)?;
        self.files
            .lock()
            .expect("files lock")
            .entry(path.to_path_buf())
            .or_default()
            .push_str(contents);
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), RestoreError> {
        self.maybe_fail(path)?;
        self.dirs
            .lock()
            .expect("dirs lock")
            .push(path.to_path_buf());
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<(), RestoreError> {
        self.maybe_fail(path)?;
        self.files.lock().expect("files lock").remove(path);
        self.executables
            .lock()
            .expect("executables lock")
            .remove(path);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.dirs.lock().expect("dirs lock").iter().any(|dir| dir == path)
            || self
                .files
                .lock()
                .expect("files lock")
                .keys()
                .any(|file| file.starts_with(path))
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, RestoreError> {
        self.maybe_fail(dir)?;
        Ok(self
            .paths()
            .into_iter()
            .filter(|path| path.parent() == Some(dir))
            .collect())
    }

    fn set_executable(&self, path: &Path) -> Result<(), RestoreError> {
        self.maybe_fail(path)?;
        if self.file(path).is_none() {
            return Err(RestoreError::Io(format!("missing file {}", path.display())));
        }
        self.executables
            .lock()
            .expect("executables lock")
            .insert(path.to_path_buf());
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct FakeProcessRunner {
    responses: Arc<Mutex<Vec<Result<ProcessOutput, RestoreError>>>>,
    spawned: Arc<Mutex<Vec<ProcessRequest>>>,
    waits: Arc<Mutex<Vec<u64>>>,
    next_handle: Arc<Mutex<u64>>,
}

impl FakeProcessRunner {
    pub fn push_response(&self, output: Result<ProcessOutput, RestoreError>) {
        self.responses.lock().expect("responses lock").push(output);
    }

    /// Queues a successful run with the given stdout.
    pub fn push_stdout(&self, stdout: impl Into<String>) {
        self.push_response(Ok(ProcessOutput {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }));
    }

    pub fn push_exit(&self, exit_code: i32, stderr: impl Into<String>) {
        self.push_response(Ok(ProcessOutput {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }));
    }

    pub fn spawned(&self) -> Vec<ProcessRequest> {
        self.spawned.lock().expect("spawned lock").clone()
    }

    pub fn waits(&self) -> Vec<u64> {
        self.waits.lock().expect("waits lock").clone()
    }

    /// Rendered `program arg arg ...` lines for every spawned request.
    pub fn command_lines(&self) -> Vec<String> {
        self.spawned()
            .into_iter()
            .map(|request| {
                std::iter::once(request.program)
                    .chain(request.args)
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect()
    }
}

impl ProcessRunner for FakeProcessRunner {
    fn spawn(&self, request: ProcessRequest) -> Result<u64, RestoreError> {
        self.spawned.lock().expect("spawned lock").push(request);
        let mut next = self.next_handle.lock().expect("next lock");
        let handle = *next;
        *next += 1;
        Ok(handle)
    }

    fn wait(&self, handle: u64) -> Result<ProcessOutput, RestoreError> {
        self.waits.lock().expect("waits lock").push(handle);
        let mut responses = self.responses.lock().expect("responses lock");
        if responses.is_empty() {
            return Err(RestoreError::Process(
                "no fake response queued".to_string(),
            ));
        }
        responses.remove(0)
    }
}
