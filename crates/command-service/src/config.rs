use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::engine::EngineSettings;

const DEFAULT_CONFIG_PATH: &str = "config/command-service.toml";

#[derive(Debug, Clone, Deserialize, Default)]
pub(crate) struct Config {
    #[serde(default)]
    pub(crate) engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct EngineConfig {
    pub(crate) shell: String,
    pub(crate) shell_arg: String,
    pub(crate) grace_window_ms: u64,
    pub(crate) max_output_bytes: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shell: "/bin/bash".to_string(),
            shell_arg: "-c".to_string(),
            grace_window_ms: 3000,
            max_output_bytes: 1024 * 1024,
        }
    }
}

impl Config {
    pub(crate) fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// An explicit path must exist; without one the default path is optional.
    pub(crate) fn resolve(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            return Self::load(default_path);
        }
        tracing::info!(path = DEFAULT_CONFIG_PATH, "config not found, using defaults");
        Ok(Self::default())
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.engine.shell.trim().is_empty() {
            anyhow::bail!("engine.shell must not be empty");
        }
        if self.engine.max_output_bytes == 0 {
            anyhow::bail!("engine.max_output_bytes must be positive");
        }
        Ok(())
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            shell_arg: config.shell_arg.clone(),
            grace_window: Duration::from_millis(config.grace_window_ms),
            max_output_bytes: usize::try_from(config.max_output_bytes).unwrap_or(usize::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_engine_table_uses_defaults() {
        let config: Config = toml::from_str("").expect("parse");
        assert_eq!(config.engine.shell, "/bin/bash");
        assert_eq!(config.engine.grace_window_ms, 3000);
        assert_eq!(config.engine.max_output_bytes, 1024 * 1024);
    }

    #[test]
    fn partial_engine_table_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [engine]
            grace_window_ms = 500
            "#,
        )
        .expect("parse");
        assert_eq!(config.engine.grace_window_ms, 500);
        assert_eq!(config.engine.shell_arg, "-c");

        let settings = EngineSettings::from(&config.engine);
        assert_eq!(settings.grace_window, Duration::from_millis(500));
    }

    #[test]
    fn load_rejects_empty_shell() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("service.toml");
        std::fs::write(&path, "[engine]\nshell = \"  \"\n").expect("write");
        let err = Config::load(&path).expect_err("empty shell");
        assert!(err.to_string().contains("engine.shell"));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("absent.toml");
        assert!(Config::resolve(Some(&missing)).is_err());
    }
}
