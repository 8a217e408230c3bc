use crate::config::AppConfig;
use crate::errors::{ProcessError, RestoreError};
use crate::logging::append_run_log;
use crate::resolver::{Container, SaveContext};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

pub mod kitty;

#[derive(Debug)]
pub enum PluginError {
    /// The container is resolved as if no plugin were configured.
    Recoverable(String),
    /// Aborts the whole save run.
    Fatal(RestoreError),
}

impl From<RestoreError> for PluginError {
    fn from(error: RestoreError) -> Self {
        if error.is_config_error() {
            Self::Fatal(error)
        } else {
            Self::Recoverable(error.to_string())
        }
    }
}

impl From<ProcessError> for PluginError {
    fn from(error: ProcessError) -> Self {
        Self::Recoverable(error.to_string())
    }
}

/// Window-class specific replacement for generic container resolution.
pub trait MultiplexerPlugin: Send + Sync {
    fn window_class(&self) -> &'static str;
    fn validate_config(&self, settings: &Value) -> Result<(), RestoreError>;
    /// On success the plugin has set the container's command and working
    /// directory itself.
    fn attempt_save(
        &self,
        ctx: &SaveContext<'_>,
        container: &mut Container,
        settings: &Value,
    ) -> Result<(), PluginError>;
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<&'static str, Arc<dyn MultiplexerPlugin>>,
}

impl PluginRegistry {
    pub fn with_defaults() -> Self {
        let mut this = Self::default();
        this.register(Arc::new(kitty::KittyPlugin::default()));
        this
    }

    pub fn register(&mut self, plugin: Arc<dyn MultiplexerPlugin>) {
        self.plugins.insert(plugin.window_class(), plugin);
    }

    pub fn get(&self, class: &str) -> Option<Arc<dyn MultiplexerPlugin>> {
        self.plugins.get(class).cloned()
    }

    /// Validates the settings of every enabled plugin. Keys naming a class
    /// without a registered plugin are ignored.
    pub fn validate_enabled(&self, config: &AppConfig) -> Result<(), RestoreError> {
        for (class, settings) in &config.enabled_plugins {
            match self.get(class) {
                Some(plugin) => plugin.validate_config(settings)?,
                None => append_run_log(
                    "debug",
                    "plugins.unsupported",
                    json!({ "class": class }),
                ),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{PluginError, PluginRegistry};
    use crate::config::parse_config;
    use crate::errors::{ProcessError, RestoreError};

    #[test]
    fn registry_registers_default_plugins() {
        let registry = PluginRegistry::with_defaults();
        assert!(registry.get("kitty").is_some());
        assert!(registry.get("Alacritty").is_none());
    }

    #[test]
    fn unknown_plugin_keys_are_ignored_and_known_ones_validated() {
        let registry = PluginRegistry::with_defaults();
        let cfg = parse_config(r#"{"enabled_plugins": {"wezterm": {"anything": 1}}}"#)
            .expect("cfg");
        registry.validate_enabled(&cfg).expect("ignored");

        let bad = parse_config(r#"{"enabled_plugins": {"kitty": {"scrollback": "all"}}}"#)
            .expect("cfg");
        let err = registry.validate_enabled(&bad).expect_err("missing socket");
        assert!(err.is_config_error());
    }

    #[test]
    fn only_config_errors_are_fatal() {
        assert!(matches!(
            PluginError::from(RestoreError::InvalidConfig("x".to_string())),
            PluginError::Fatal(_)
        ));
        assert!(matches!(
            PluginError::from(RestoreError::Io("x".to_string())),
            PluginError::Recoverable(_)
        ));
        assert!(matches!(
            PluginError::from(ProcessError::NoSuchProcess(3)),
            PluginError::Recoverable(_)
        ));
    }
}
