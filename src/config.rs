use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::aggregate::{StatePriorities, TieBreakPolicy};

/// Configuration file structure for pipewatch.
///
/// Lets users pin the repository, refresh cadence and aggregation policy
/// instead of repeating CLI flags. Loaded from the current directory or a
/// specified path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Bitbucket API and repository settings
    #[serde(default)]
    pub bitbucket: BitbucketConfig,

    /// Refresh cycle parameters
    #[serde(default)]
    pub refresh: RefreshConfig,

    /// Aggregation tie-break parameters
    #[serde(default)]
    pub aggregation: AggregationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BitbucketConfig {
    /// Opaque credential for the Basic authorization header
    pub credential: Option<String>,

    /// Bitbucket API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Workspace slug (e.g. 'acme')
    pub workspace: Option<String>,

    /// Repository slug (e.g. 'widgets')
    pub repository: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RefreshConfig {
    /// How many recent pipelines one refresh cycle covers
    #[serde(default = "default_window")]
    pub window: usize,

    /// Seconds between periodic refreshes
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,

    /// Steps at or below this duration are noise-filtered out
    #[serde(default = "default_min_step_duration_seconds")]
    pub min_step_duration_seconds: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AggregationConfig {
    /// How equal-severity records for the same step are resolved
    #[serde(default)]
    pub policy: TieBreakPolicy,

    /// Severity ranking per result state
    #[serde(default)]
    pub priorities: StatePriorities,
}

impl Default for BitbucketConfig {
    fn default() -> Self {
        Self {
            credential: None,
            base_url: default_base_url(),
            workspace: None,
            repository: None,
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            interval_seconds: default_interval_seconds(),
            min_step_duration_seconds: default_min_step_duration_seconds(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.bitbucket.org/2.0".to_string()
}

fn default_window() -> usize {
    100
}

fn default_interval_seconds() -> u64 {
    30
}

fn default_min_step_duration_seconds() -> f64 {
    120.0
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./pipewatch.toml
    /// 3. ./pipewatch.json
    /// 4. ./pipewatch.yaml
    /// 5. ./pipewatch.yml
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let candidates = [
            "pipewatch.toml",
            "pipewatch.json",
            "pipewatch.yaml",
            "pipewatch.yml",
        ];

        for candidate in &candidates {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load_from_path(path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => {
                // Unknown extension: try each supported format in turn.
                if let Ok(config) = toml::from_str(&contents) {
                    return Ok(config);
                }
                if let Ok(config) = serde_json::from_str(&contents) {
                    return Ok(config);
                }
                serde_yaml::from_str(&contents)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bitbucket.base_url, "https://api.bitbucket.org/2.0");
        assert_eq!(config.refresh.window, 100);
        assert_eq!(config.refresh.interval_seconds, 30);
        assert_eq!(config.refresh.min_step_duration_seconds, 120.0);
        assert_eq!(config.aggregation.policy, TieBreakPolicy::RecencyOnTie);
    }

    #[test]
    fn test_load_toml_config() {
        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        let toml_content = r#"
[bitbucket]
workspace = "acme"
repository = "widgets"
credential = "c2VjcmV0"

[refresh]
window = 50
interval-seconds = 15

[aggregation]
policy = "strict-priority"

[aggregation.priorities]
error = 2
"#;
        write!(temp_file, "{}", toml_content).unwrap();

        let config = Config::load(Some(temp_file.path())).unwrap();
        assert_eq!(config.bitbucket.workspace.as_deref(), Some("acme"));
        assert_eq!(config.bitbucket.repository.as_deref(), Some("widgets"));
        assert_eq!(config.refresh.window, 50);
        assert_eq!(config.refresh.interval_seconds, 15);
        assert_eq!(config.aggregation.policy, TieBreakPolicy::StrictPriority);
        assert_eq!(config.aggregation.priorities.error, 2);
        assert_eq!(config.aggregation.priorities.failed, 1);
    }

    #[test]
    fn test_load_json_config() {
        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        let json_content = r#"{
  "bitbucket": {
    "workspace": "acme",
    "repository": "widgets",
    "base-url": "https://bitbucket.example.com/2.0"
  },
  "refresh": {
    "min-step-duration-seconds": 60
  }
}"#;
        write!(temp_file, "{}", json_content).unwrap();

        let config = Config::load(Some(temp_file.path())).unwrap();
        assert_eq!(
            config.bitbucket.base_url,
            "https://bitbucket.example.com/2.0"
        );
        assert_eq!(config.refresh.min_step_duration_seconds, 60.0);
        // Unspecified sections keep their defaults.
        assert_eq!(config.aggregation.policy, TieBreakPolicy::RecencyOnTie);
    }

    #[test]
    fn test_load_nonexistent_config_fails() {
        assert!(Config::load(Some(Path::new("nonexistent.toml"))).is_err());
    }
}
