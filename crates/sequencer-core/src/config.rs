use crate::error::Result;
use crate::progress::ProgressSink;
use crate::types::{ConditionMode, FailurePolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "sequencer.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// NodeDefaults
// ---------------------------------------------------------------------------

/// Settings given to nodes created by the built-in registry factories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefaults {
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default)]
    pub condition_mode: ConditionMode,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
}

fn default_attempts() -> u32 {
    1
}

impl Default for NodeDefaults {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            condition_mode: ConditionMode::default(),
            attempts: default_attempts(),
        }
    }
}

// ---------------------------------------------------------------------------
// ProgressConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    ProgressSink::DEFAULT_CAPACITY
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub defaults: NodeDefaults,
    #[serde(default)]
    pub progress: ProgressConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            defaults: NodeDefaults::default(),
            progress: ProgressConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Reads `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: EngineConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    /// A progress sink sized by `progress.channel_capacity`.
    pub fn progress_sink(&self) -> ProgressSink {
        ProgressSink::new(self.progress.channel_capacity)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.version != 1 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!("unknown config version {}, expected 1", self.version),
            });
        }

        if self.defaults.attempts == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "defaults.attempts is 0; every instruction would fail validation"
                    .to_string(),
            });
        } else if self.defaults.attempts > 10 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "defaults.attempts={} (>10 is unusual)",
                    self.defaults.attempts
                ),
            });
        }

        if self.progress.channel_capacity == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "progress.channel_capacity is 0; using 1".to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_roundtrip() {
        let cfg = EngineConfig::default();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let parsed: EngineConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, cfg);
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.defaults.attempts, 1);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "defaults:\n  failure_policy: continue\n";
        let cfg: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.defaults.failure_policy, FailurePolicy::Continue);
        assert_eq!(cfg.defaults.condition_mode, ConditionMode::All);
        assert_eq!(cfg.defaults.attempts, 1);
        assert_eq!(cfg.progress.channel_capacity, ProgressSink::DEFAULT_CAPACITY);
    }

    #[test]
    fn missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let cfg = EngineConfig::load(&dir.path().join(DEFAULT_CONFIG_FILE)).unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf/sequencer.yaml");
        let mut cfg = EngineConfig::default();
        cfg.defaults.attempts = 3;
        cfg.progress.channel_capacity = 16;
        cfg.save(&path).unwrap();
        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sequencer.yaml");
        std::fs::write(&path, "defaults: [unterminated").unwrap();
        assert!(EngineConfig::load(&path).is_err());
    }

    #[test]
    fn validate_flags_zero_values() {
        let mut cfg = EngineConfig::default();
        assert!(cfg.validate().is_empty());

        cfg.defaults.attempts = 0;
        cfg.progress.channel_capacity = 0;
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().all(|w| w.level == WarnLevel::Error));
    }

    #[test]
    fn validate_warns_on_many_attempts() {
        let mut cfg = EngineConfig::default();
        cfg.defaults.attempts = 25;
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, WarnLevel::Warning);
        assert!(warnings[0].message.contains("attempts=25"));
    }
}
