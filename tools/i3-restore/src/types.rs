use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub type EnvMap = BTreeMap<String, String>;

pub const BASE_DIR_ENV: &str = "i3_PATH";
pub const LOG_FILE_ENV: &str = "I3_RESTORE_LOG_FILE";
pub const VERBOSE_ENV: &str = "I3_RESTORE_VERBOSE";
pub const CONFIG_FILE_ENV: &str = "I3_RESTORE_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    #[default]
    Quiet,
    Info,
    Debug,
}

impl Verbosity {
    pub fn parse_env(value: &str) -> Self {
        match value.trim() {
            "1" => Self::Info,
            "2" => Self::Debug,
            _ => Self::Quiet,
        }
    }

    pub fn from_flag_count(count: u8) -> Self {
        match count {
            0 => Self::Quiet,
            1 => Self::Info,
            _ => Self::Debug,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Lowest level echoed to stderr at the given verbosity.
    pub fn console_threshold(verbosity: Verbosity) -> Self {
        match verbosity {
            Verbosity::Quiet => Self::Error,
            Verbosity::Info => Self::Info,
            Verbosity::Debug => Self::Debug,
        }
    }

    /// Lowest level written to the log file at the given verbosity.
    pub fn file_threshold(verbosity: Verbosity) -> Self {
        match verbosity {
            Verbosity::Debug => Self::Debug,
            _ => Self::Info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeScope {
    pub base_dir: PathBuf,
    pub log_file: PathBuf,
    pub config_file: PathBuf,
    pub verbosity: Verbosity,
}

impl RuntimeScope {
    pub fn from_env(env: &EnvMap) -> Self {
        let base_dir = env
            .get(BASE_DIR_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                PathBuf::from(env.get("HOME").map(String::as_str).unwrap_or("/"))
                    .join(".config")
                    .join("i3")
            });
        let log_file = env
            .get(LOG_FILE_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| base_dir.join("logs").join("i3-restore.log"));
        let config_file = env
            .get(CONFIG_FILE_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| base_dir.join("i3-restore").join("config.json"));
        let verbosity = env
            .get(VERBOSE_ENV)
            .map(|value| Verbosity::parse_env(value))
            .unwrap_or_default();
        Self {
            base_dir,
            log_file,
            config_file,
            verbosity,
        }
    }
}
