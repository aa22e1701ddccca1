//! Run-wide build settings.

use std::collections::HashMap;
use std::time::Duration;

use fpgabuild_core::SshSettings;
use serde::{Deserialize, Serialize};

use crate::stage::Stage;

fn default_stage_timeout_secs() -> u64 {
    4 * 60 * 60
}

fn default_connect_timeout_secs() -> u64 {
    20
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_command_timeout_secs() -> u64 {
    600
}

fn default_scratch_dir() -> String {
    "/tmp".to_string()
}

/// Timeouts and remote scratch space, shared by every target of a run.
///
/// Every field is optional in a manifest's `[settings]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildSettings {
    /// Default limit for one stage tool invocation.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,

    /// Per-stage overrides keyed by stage name (`implement`, `compile`, ...).
    #[serde(default)]
    pub stage_timeouts: HashMap<String, u64>,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Interval at which a waiting remote shell read rechecks its deadline.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Limit for one-shot commands and transfers.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Directory on remote Linux hosts for output archives.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: String,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            stage_timeout_secs: default_stage_timeout_secs(),
            stage_timeouts: HashMap::new(),
            connect_timeout_secs: default_connect_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            command_timeout_secs: default_command_timeout_secs(),
            scratch_dir: default_scratch_dir(),
        }
    }
}

impl BuildSettings {
    pub fn stage_timeout(&self, stage: Stage) -> Duration {
        let secs = self
            .stage_timeouts
            .get(stage.name())
            .copied()
            .unwrap_or(self.stage_timeout_secs);
        Duration::from_secs(secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn ssh(&self) -> SshSettings {
        SshSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            command_timeout: self.command_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_timeout_override() {
        let mut settings = BuildSettings::default();
        settings.stage_timeouts.insert("implement".to_string(), 60);
        assert_eq!(settings.stage_timeout(Stage::Implement), Duration::from_secs(60));
        assert_eq!(
            settings.stage_timeout(Stage::Generate),
            Duration::from_secs(4 * 60 * 60)
        );
    }

    #[test]
    fn test_defaults_from_empty_table() {
        let settings: BuildSettings = toml::from_str("").unwrap();
        assert_eq!(settings, BuildSettings::default());
        assert_eq!(settings.ssh().poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_partial_settings_table() {
        let settings: BuildSettings = toml::from_str(
            r#"
poll_interval_ms = 250

[stage_timeouts]
implement = 900
"#,
        )
        .unwrap();
        assert_eq!(settings.ssh().poll_interval, Duration::from_millis(250));
        assert_eq!(settings.stage_timeout(Stage::Implement), Duration::from_secs(900));
        assert_eq!(settings.command_timeout_secs, 600);
        assert_eq!(settings.scratch_dir, "/tmp");
    }
}
