// Toolchain configuration for the graded language
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

fn default_check_timeout() -> u64 {
    10
}

fn default_test_timeout() -> u64 {
    30
}

/// External command used for one validation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_check_timeout")]
    pub timeout_secs: u64,
}

/// Configuration of the language toolchain candidate code is graded with.
///
/// The structural check and the functional harness both shell out to this
/// toolchain; absence of the binary is a soft failure for the structural
/// check only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolchainConfig {
    /// Language name used in generation prompts.
    pub language: String,
    /// Extension for temp files handed to the toolchain.
    pub file_extension: String,
    /// Syntax/structural validation command.
    pub check: ToolCommand,
    /// Functional harness command.
    pub test: ToolCommand,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        ToolchainConfig {
            language: "jac".to_string(),
            file_extension: "jac".to_string(),
            check: ToolCommand {
                command: "jac".to_string(),
                args: vec!["check".to_string()],
                timeout_secs: default_check_timeout(),
            },
            test: ToolCommand {
                command: "jac".to_string(),
                args: vec!["test".to_string()],
                timeout_secs: default_test_timeout(),
            },
        }
    }
}

impl ToolchainConfig {
    /// Load toolchain configuration from a JSON file.
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!(
                "Toolchain config file not found: {}",
                config_path.display()
            );
        }

        let content = fs::read_to_string(config_path)
            .context("Failed to read toolchain config")?;

        serde_json::from_str(&content).context("Failed to parse toolchain config")
    }

    /// Load from the given path, or fall back to built-in defaults when no
    /// path is supplied.
    pub fn load_or_default(config_path: Option<&Path>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config() {
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .unwrap();
        write!(
            file,
            r#"{{
                "language": "lobster",
                "file_extension": "lobster",
                "check": {{ "command": "lobster", "args": ["--parsedump"] }},
                "test": {{ "command": "lobster", "args": [], "timeout_secs": 45 }}
            }}"#
        )
        .unwrap();

        let config = ToolchainConfig::load(file.path()).unwrap();
        assert_eq!(config.language, "lobster");
        assert_eq!(config.check.timeout_secs, 10);
        assert_eq!(config.test.timeout_secs, 45);
    }

    #[test]
    fn test_missing_config_fails() {
        let result = ToolchainConfig::load(Path::new("config/does-not-exist.json"));
        assert!(result.is_err());
    }
}
