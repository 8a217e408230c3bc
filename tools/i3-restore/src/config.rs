use crate::errors::RestoreError;
use crate::logging::append_run_log;
use crate::runtime::FileSystem;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;

pub const COMMAND_PLACEHOLDER: &str = "{command}";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppConfig {
    pub terminals: Vec<TerminalConfig>,
    pub subprocesses: Vec<SubprocessConfig>,
    pub web_browsers: Vec<String>,
    /// Raw per-plugin settings keyed by window class. Each supported plugin
    /// validates its own entry.
    pub enabled_plugins: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TerminalConfig {
    pub class: String,
    pub command: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubprocessConfig {
    pub name: String,
    #[serde(default)]
    pub launch_command: Option<String>,
    /// Deprecated spelling of `include_args`.
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub include_args: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_args: Option<Vec<String>>,
}

impl SubprocessConfig {
    fn include_filter(&self) -> &[String] {
        self.include_args
            .as_deref()
            .or(self.args.as_deref())
            .unwrap_or_default()
    }

    fn exclude_filter(&self) -> &[String] {
        self.exclude_args.as_deref().unwrap_or_default()
    }

    /// Whether a process running with `args` should be saved. A non-empty
    /// include list needs at least one of its entries present; any entry of
    /// the exclude list rejects the process.
    pub fn accepts(&self, args: &[String]) -> bool {
        let include = self.include_filter();
        if !include.is_empty() && !args.iter().any(|arg| include.contains(arg)) {
            return false;
        }
        let exclude = self.exclude_filter();
        !args.iter().any(|arg| exclude.contains(arg))
    }

    pub fn launch_template<'a>(&'a self, default_template: &'a str) -> &'a str {
        self.launch_command.as_deref().unwrap_or(default_template)
    }
}

impl AppConfig {
    pub fn terminal_for_class(&self, class: &str) -> Option<&TerminalConfig> {
        self.terminals.iter().find(|terminal| terminal.class == class)
    }

    pub fn subprocess_named(&self, name: &str) -> Option<&SubprocessConfig> {
        self.subprocesses.iter().find(|program| program.name == name)
    }

    pub fn plugin_settings(&self, class: &str) -> Option<&Value> {
        self.enabled_plugins.get(class)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialAppConfig {
    terminals: Option<Vec<TerminalConfig>>,
    subprocesses: Option<Vec<SubprocessConfig>>,
    web_browsers: Option<Vec<String>>,
    enabled_plugins: Option<BTreeMap<String, Value>>,
}

/// Reads the configuration file at `path`. A missing file yields the
/// defaults; anything unparsable or semantically invalid is an error.
pub fn load_config(path: &Path, fs: &dyn FileSystem) -> Result<AppConfig, RestoreError> {
    let mut cfg = AppConfig::default();

    if !fs.exists(path) {
        append_run_log(
            "debug",
            "config.defaults",
            json!({ "path": path.display().to_string() }),
        );
        return Ok(cfg);
    }

    let contents = fs.read_to_string(path)?;
    let partial = parse_partial(&contents)?;
    merge_partial_config(&mut cfg, partial);
    validate_config(&cfg)?;

    append_run_log(
        "debug",
        "config.loaded",
        json!({
            "path": path.display().to_string(),
            "terminals": cfg.terminals.len(),
            "subprocesses": cfg.subprocesses.len(),
            "web_browsers": cfg.web_browsers.len(),
            "enabled_plugins": cfg.enabled_plugins.keys().collect::<Vec<_>>()
        }),
    );
    Ok(cfg)
}

pub fn parse_config(contents: &str) -> Result<AppConfig, RestoreError> {
    let mut cfg = AppConfig::default();
    merge_partial_config(&mut cfg, parse_partial(contents)?);
    validate_config(&cfg)?;
    Ok(cfg)
}

fn parse_partial(contents: &str) -> Result<PartialAppConfig, RestoreError> {
    if contents.trim().is_empty() {
        return Ok(PartialAppConfig::default());
    }
    serde_json::from_str(contents).map_err(|e| RestoreError::ConfigParse(e.to_string()))
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(terminals) = partial.terminals {
        cfg.terminals = terminals;
    }
    if let Some(subprocesses) = partial.subprocesses {
        cfg.subprocesses = subprocesses;
    }
    if let Some(web_browsers) = partial.web_browsers {
        cfg.web_browsers = web_browsers;
    }
    if let Some(enabled_plugins) = partial.enabled_plugins {
        cfg.enabled_plugins = enabled_plugins;
    }
}

fn validate_config(cfg: &AppConfig) -> Result<(), RestoreError> {
    for terminal in &cfg.terminals {
        if terminal.class.trim().is_empty() || terminal.command.trim().is_empty() {
            return Err(RestoreError::InvalidConfig(
                "terminals entries need a non-empty class and command".to_string(),
            ));
        }
    }

    for program in &cfg.subprocesses {
        if program.name.trim().is_empty() {
            return Err(RestoreError::InvalidConfig(
                "subprocesses entries need a non-empty name".to_string(),
            ));
        }
        if program.args.is_some() && program.include_args.is_some() {
            return Err(RestoreError::InvalidConfig(format!(
                "subprocess '{}' sets both the deprecated 'args' and 'include_args'; keep only 'include_args'",
                program.name
            )));
        }
        if program.args.is_some() {
            append_run_log(
                "warn",
                "config.subprocess.deprecated_args",
                json!({ "name": program.name }),
            );
        }
    }

    if cfg.web_browsers.iter().any(|browser| browser.is_empty()) {
        return Err(RestoreError::InvalidConfig(
            "web_browsers entries must not be empty".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{load_config, parse_config, SubprocessConfig};
    use crate::errors::RestoreError;
    use crate::runtime::FakeFileSystem;
    use std::path::Path;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn missing_file_yields_defaults() {
        let fs = FakeFileSystem::default();
        let cfg = load_config(Path::new("/cfg/config.json"), &fs).expect("defaults");
        assert!(cfg.terminals.is_empty());
        assert!(cfg.subprocesses.is_empty());
        assert!(cfg.web_browsers.is_empty());
        assert!(cfg.enabled_plugins.is_empty());
    }

    #[test]
    fn absent_keys_keep_defaults_and_present_keys_are_read() {
        let cfg = parse_config(
            r#"{
                "terminals": [{"class": "Alacritty", "command": "alacritty"}],
                "subprocesses": [{"name": "vim", "launch_command": "alacritty -e {command}"}],
                "web_browsers": ["firefox"],
                "enabled_plugins": {"kitty": {"listen_socket": "unix:/tmp/kitty"}}
            }"#,
        )
        .expect("config");
        assert_eq!(cfg.terminals[0].command, "alacritty");
        assert_eq!(
            cfg.subprocess_named("vim").and_then(|p| p.launch_command.as_deref()),
            Some("alacritty -e {command}")
        );
        assert_eq!(cfg.web_browsers, vec!["firefox"]);
        assert!(cfg.plugin_settings("kitty").is_some());

        let partial = parse_config(r#"{"web_browsers": ["chromium"]}"#).expect("partial");
        assert!(partial.terminals.is_empty());
    }

    #[test]
    fn wrong_types_and_unknown_keys_are_parse_errors() {
        for text in [
            r#"{"subprocesses": "invalid"}"#,
            r#"{"terminals": "invalid"}"#,
            r#"{"web_browsers": "invalid"}"#,
            r#"{"enabled_plugins": []}"#,
            r#"{"terminal": []}"#,
        ] {
            let err = parse_config(text).expect_err(text);
            assert!(matches!(err, RestoreError::ConfigParse(_)), "{text}: {err}");
        }
    }

    #[test]
    fn deprecated_and_new_include_lists_together_are_rejected() {
        let err = parse_config(
            r#"{"subprocesses": [{"name": "vim", "args": ["-S"], "include_args": ["-S"]}]}"#,
        )
        .expect_err("both filters");
        assert!(matches!(err, RestoreError::InvalidConfig(_)));
        assert!(err.is_config_error());
    }

    #[test]
    fn deprecated_args_act_as_include_any() {
        let program = SubprocessConfig {
            name: "vim".to_string(),
            args: Some(args(&["--test-arg", "-t"])),
            ..SubprocessConfig::default()
        };
        assert!(program.accepts(&args(&["--test-arg", "file name"])));
        assert!(!program.accepts(&args(&["--not-test-arg"])));
    }

    #[test]
    fn include_and_exclude_filters_combine() {
        let program = SubprocessConfig {
            name: "nvim".to_string(),
            include_args: Some(args(&["-S"])),
            exclude_args: Some(args(&["--headless"])),
            ..SubprocessConfig::default()
        };
        assert!(program.accepts(&args(&["-S", "Session.vim"])));
        assert!(!program.accepts(&args(&["Session.vim"])));
        assert!(!program.accepts(&args(&["-S", "--headless"])));

        let unfiltered = SubprocessConfig {
            name: "cmus".to_string(),
            ..SubprocessConfig::default()
        };
        assert!(unfiltered.accepts(&[]));
        assert_eq!(unfiltered.launch_template("{command}"), "{command}");
    }
}
