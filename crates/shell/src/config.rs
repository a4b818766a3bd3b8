//! Shell configuration management

use crate::arena::DEFAULT_BLOCK_SIZE;
use crate::interpreter::{DEFAULT_MAX_ARGS, InterpreterSettings};
use crate::session::SessionSettings;
use crate::usb::iso::DEFAULT_RING_LEN;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub shell: ShellSettings,
    pub transfer: TransferSettings,
    pub arena: ArenaSettings,
    pub isochronous: IsochronousSettings,
    pub interpreter: InterpreterConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellSettings {
    pub log_level: String,
    pub prompt: String,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            prompt: "> ".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// Timeout for every transfer, in milliseconds
    pub timeout_ms: u64,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self { timeout_ms: 1000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaSettings {
    /// Capacity of each payload block; also the largest single payload
    pub block_size: usize,
}

impl Default for ArenaSettings {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsochronousSettings {
    /// Descriptor slots reused round-robin
    pub ring_len: usize,
    /// Extra wait past the transfer timeout before a submission is cancelled
    pub completion_grace_ms: u64,
}

impl Default for IsochronousSettings {
    fn default() -> Self {
        Self {
            ring_len: DEFAULT_RING_LEN,
            completion_grace_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    pub max_args: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_args: DEFAULT_MAX_ARGS,
        }
    }
}

impl ShellConfig {
    /// Load configuration from the specified path, or the first standard
    /// location that exists
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-shell/shell.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to load config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: ShellConfig = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("{:#}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-shell").join("shell.toml")
        } else {
            PathBuf::from(".config/usb-shell/shell.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.shell.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.shell.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.arena.block_size == 0 {
            return Err(anyhow!("arena.block_size must be greater than 0"));
        }
        if self.isochronous.ring_len == 0 {
            return Err(anyhow!("isochronous.ring_len must be greater than 0"));
        }
        // a line needs room for at least the command name
        if self.interpreter.max_args < 2 {
            return Err(anyhow!(
                "interpreter.max_args must be at least 2, got {}",
                self.interpreter.max_args
            ));
        }

        Ok(())
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            block_size: self.arena.block_size,
            ring_len: self.isochronous.ring_len,
            transfer_timeout: Duration::from_millis(self.transfer.timeout_ms),
            completion_grace: Duration::from_millis(self.isochronous.completion_grace_ms),
        }
    }

    pub fn interpreter_settings(&self) -> InterpreterSettings {
        InterpreterSettings {
            max_args: self.interpreter.max_args,
            prompt: self.shell.prompt.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ShellConfig::default();
        assert_eq!(config.shell.log_level, "warn");
        assert_eq!(config.shell.prompt, "> ");
        assert_eq!(config.arena.block_size, 0x30000);
        assert_eq!(config.isochronous.ring_len, 10);
        assert_eq!(config.interpreter.max_args, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_settings_match_session_defaults() {
        let config = ShellConfig::default();
        assert_eq!(config.session_settings(), SessionSettings::default());
        assert_eq!(config.interpreter_settings(), InterpreterSettings::default());
    }

    #[test]
    fn test_config_serialization() {
        let config = ShellConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: ShellConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = ShellConfig::default();
        config.shell.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.shell.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_sizes() {
        let mut config = ShellConfig::default();
        config.arena.block_size = 0;
        assert!(config.validate().is_err());

        let mut config = ShellConfig::default();
        config.isochronous.ring_len = 0;
        assert!(config.validate().is_err());

        let mut config = ShellConfig::default();
        config.interpreter.max_args = 1;
        assert!(config.validate().is_err());
        config.interpreter.max_args = 2;
        assert!(config.validate().is_ok());
    }
}
