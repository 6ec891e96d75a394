//! Typed default configuration.
//!
//! Every field of [`Config`] has a value here, so a config file only needs to
//! mention what it changes.

use std::path::PathBuf;

use super::{Config, DisputeTrackerConfig, MiningConfig};

/// Directory searched for the config file and env file.
pub const CONFIG_DIR: &str = "configs";

/// Config file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "config.json";

const LOG_LEVEL: &str = "info";

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LOG_LEVEL.into(),
            mining: MiningConfig::default(),
            dispute_tracker: DisputeTrackerConfig::default(),
            env_file: PathBuf::from(CONFIG_DIR).join(".env"),
        }
    }
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: LOG_LEVEL.into(),
            refresh_interval_ms: 15_000,
            threads: 1,
            duty_percent: 50,
            dummy_challenge_interval_secs: 300,
            dummy_difficulty: 1_000_000,
        }
    }
}

impl Default for DisputeTrackerConfig {
    fn default() -> Self {
        Self {
            log_level: LOG_LEVEL.into(),
            contract: "tellor".into(),
            reorg_wait_ms: 3 * 60 * 1000,
            retry_interval_ms: 1_000,
        }
    }
}
