use serde::{Deserialize, Serialize};

/// Errors loading a [`RecorderConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Tuning of the [`crate::Recorder`] write path.
///
/// Every field has a default, so an empty document is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Write a full snapshot once this many diffs follow the last one.
    /// Zero disables periodic snapshots.
    pub snapshot_every: u32,
    /// Upsert the current-state snapshot after every recorded version.
    pub maintain_current: bool,
    /// Record nothing when a new version equals the previous one.
    pub skip_empty_diffs: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            snapshot_every: 20,
            maintain_current: true,
            skip_empty_diffs: true,
        }
    }
}

impl RecorderConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Whether the next version should be a snapshot, given the number of
    /// diffs written since the last one.
    pub(crate) fn snapshot_due(&self, diffs_since_snapshot: u32) -> bool {
        self.snapshot_every > 0 && diffs_since_snapshot >= self.snapshot_every
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RecorderConfig::default();
        assert_eq!(config.snapshot_every, 20);
        assert!(config.maintain_current);
        assert!(config.skip_empty_diffs);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = RecorderConfig::from_yaml_str("snapshot_every: 5\n").unwrap();
        assert_eq!(config.snapshot_every, 5);
        assert!(config.maintain_current);
        assert!(config.skip_empty_diffs);
    }

    #[test]
    fn yaml_roundtrip() {
        let config = RecorderConfig {
            snapshot_every: 3,
            maintain_current: false,
            skip_empty_diffs: false,
        };
        let yaml = config.to_yaml_string().unwrap();
        assert_eq!(RecorderConfig::from_yaml_str(&yaml).unwrap(), config);
    }

    #[test]
    fn bad_yaml_is_rejected() {
        assert!(matches!(
            RecorderConfig::from_yaml_str("snapshot_every: lots\n"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn snapshot_cadence() {
        let config = RecorderConfig {
            snapshot_every: 2,
            ..RecorderConfig::default()
        };
        assert!(!config.snapshot_due(1));
        assert!(config.snapshot_due(2));
        let never = RecorderConfig {
            snapshot_every: 0,
            ..RecorderConfig::default()
        };
        assert!(!never.snapshot_due(1_000));
    }
}
