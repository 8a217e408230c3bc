use thiserror::Error;

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("process error: {0}")]
    Process(String),
    #[error("i3 tree error: {0}")]
    Tree(String),
    #[error("session file error: {0}")]
    Session(String),
}

impl RestoreError {
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigParse(_) | Self::InvalidConfig(_))
    }
}

/// Races between the i3 tree snapshot and process inspection. These are
/// expected during a save run and never abort it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessError {
    #[error("process {0} no longer exists")]
    NoSuchProcess(u32),
    #[error("process {0} is a zombie")]
    Zombie(u32),
    #[error("access denied while inspecting process {0}")]
    AccessDenied(u32),
}
