pub mod browsers;
pub mod config;
pub mod errors;
pub mod i3;
pub mod logging;
pub mod plugins;
pub mod resolver;
pub mod restore;
pub mod runtime;
pub mod save;
pub mod script;
pub mod store;
pub mod tree;
pub mod types;

use clap::{error::ErrorKind, ArgAction, CommandFactory, Parser, Subcommand};
use config::load_config;
use errors::RestoreError;
use logging::{append_run_log, init_run_log};
use plugins::PluginRegistry;
use restore::{restore_session, RestoreTiming};
use runtime::ProductionRuntime;
use save::save_session;
use serde_json::json;
use types::{EnvMap, RuntimeScope, Verbosity};

#[derive(Debug, Clone, Parser)]
#[command(name = "i3-restore")]
#[command(about = "Save and restore the programs running in an i3 session")]
pub struct Cli {
    /// Configuration file (defaults to $i3_PATH/i3-restore/config.json)
    #[arg(long, global = true)]
    pub config: Option<std::path::PathBuf>,
    /// Echo more of the run log to stderr (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum CliCommand {
    /// Capture every workspace's programs into the session directory
    Save,
    /// Relaunch the saved programs workspace by workspace
    Restore,
}

pub fn run() -> Result<i32, RestoreError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let env = std::env::vars_os().collect::<Vec<_>>();
    let runtime = ProductionRuntime::new();
    run_with_runtime(&args, &env, &runtime)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    env: &[(std::ffi::OsString, std::ffi::OsString)],
    runtime: &ProductionRuntime,
) -> Result<i32, RestoreError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(RestoreError::Cli(error.to_string())),
        },
    };

    let mut scope = RuntimeScope::from_env(&env_to_map(env));
    if let Some(config) = &cli.config {
        scope.config_file = config.clone();
    }
    scope.verbosity = scope.verbosity.max(Verbosity::from_flag_count(cli.verbose));
    init_run_log(&scope.log_file, scope.verbosity);

    let result = run_command(cli.command, &scope, runtime);
    if let Err(error) = &result {
        append_run_log(
            "error",
            "run.failed",
            json!({ "command": format!("{:?}", cli.command), "error": error.to_string() }),
        );
    }
    result
}

fn run_command(
    command: CliCommand,
    scope: &RuntimeScope,
    runtime: &ProductionRuntime,
) -> Result<i32, RestoreError> {
    let cfg = load_config(&scope.config_file, runtime.file_system.as_ref())?;
    let plugins = PluginRegistry::with_defaults();
    plugins.validate_enabled(&cfg)?;

    append_run_log(
        "info",
        "run.start",
        json!({
            "command": format!("{command:?}"),
            "base_dir": scope.base_dir.display().to_string(),
            "config": scope.config_file.display().to_string()
        }),
    );

    match command {
        CliCommand::Save => {
            save_session(runtime, &cfg, &scope.base_dir, &plugins)?;
            Ok(0)
        }
        CliCommand::Restore => {
            let summary = restore_session(runtime, &scope.base_dir, RestoreTiming::default())?;
            Ok(if summary.failures > 0 { 1 } else { 0 })
        }
    }
}

pub fn render_help() -> String {
    Cli::command().render_long_help().to_string()
}

fn env_to_map(env: &[(std::ffi::OsString, std::ffi::OsString)]) -> EnvMap {
    let mut map = EnvMap::new();
    for (key, value) in env {
        if let (Some(key), Some(value)) = (key.to_str(), value.to_str()) {
            map.insert(key.to_string(), value.to_string());
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::{render_help, Cli, CliCommand};
    use clap::Parser;

    #[test]
    fn help_lists_both_commands() {
        let help = render_help();
        assert!(help.contains("save"));
        assert!(help.contains("restore"));
        assert!(help.contains("--config"));
    }

    #[test]
    fn verbosity_flags_are_counted() {
        let cli = Cli::try_parse_from(["i3-restore", "-vv", "save"]).expect("parse");
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.command, CliCommand::Save);

        let cli = Cli::try_parse_from(["i3-restore", "restore", "--config", "/c.json"])
            .expect("parse");
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/c.json")));
    }
}
