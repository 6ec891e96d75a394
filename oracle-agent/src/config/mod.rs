//! Agent configuration.
//!
//! Configuration is a JSON file layered over typed defaults (see
//! [`defaults`]). It is loaded once at startup by [`parse_config`] and passed
//! by reference into each component's constructor; nothing re-reads it later.
//!
//! After the file is parsed, the env file it names is loaded into the process
//! environment. That file holds private details (node URL, keys) consumed by
//! the chain client, which lives outside this crate.

pub mod defaults;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;

use crate::error::{Error, Result};
use crate::tracing::prelude::*;

/// Top-level configuration holding the settings of every component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Config {
    /// Default log level for everything without a component override
    pub log_level: String,

    pub mining: MiningConfig,

    pub dispute_tracker: DisputeTrackerConfig,

    /// Env file with private details, loaded after the config file
    pub env_file: PathBuf,
}

/// Settings for the mining orchestration loop and the CPU worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct MiningConfig {
    pub enabled: bool,

    pub log_level: String,

    /// How often the loop asks the challenge source for a new challenge
    pub refresh_interval_ms: u64,

    /// Number of CPU mining threads
    pub threads: usize,

    /// Target CPU duty cycle percentage (1-100)
    pub duty_percent: u8,

    /// How often the development challenge source rotates its challenge
    pub dummy_challenge_interval_secs: u64,

    /// Difficulty of challenges made up by the development source
    pub dummy_difficulty: u64,
}

impl MiningConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn dummy_challenge_interval(&self) -> Duration {
        Duration::from_secs(self.dummy_challenge_interval_secs)
    }
}

/// Settings for the reorg-safe dispute tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct DisputeTrackerConfig {
    pub log_level: String,

    /// Contract name written into the `contract` label of every sample
    pub contract: String,

    /// Reorg safety window: how long an event waits for a removal notice
    pub reorg_wait_ms: u64,

    /// Fixed delay between subscription attempts
    pub retry_interval_ms: u64,
}

impl DisputeTrackerConfig {
    pub fn reorg_wait(&self) -> Duration {
        Duration::from_millis(self.reorg_wait_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// A loaded configuration plus what happened while loading it.
///
/// Loading runs before logging is set up, so nothing is logged there.
/// Call [`LoadedConfig::log_outcome`] once the subscriber is installed.
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: Config,

    /// Config file that was read, or looked for
    pub path: PathBuf,

    /// No file at `path`; defaults were used
    pub used_defaults: bool,

    /// The env file existed and was loaded
    pub env_file_loaded: bool,
}

impl LoadedConfig {
    pub fn log_outcome(&self) {
        if self.used_defaults {
            warn!(path = %self.path.display(), "No config file on disk, using defaults");
        } else {
            info!(path = %self.path.display(), "Loaded config file");
        }
        if self.env_file_loaded {
            debug!(path = %self.config.env_file.display(), "Loaded env file");
        }
    }
}

/// Load the configuration.
///
/// Starts from [`Config::default`] and overrides it with whatever the JSON
/// file at `path` sets (`configs/config.json` when `None`). A missing file is
/// not an error: the defaults are used and [`LoadedConfig::used_defaults`]
/// is set. Unknown keys are rejected.
///
/// The env file named by the resulting config is then loaded into the
/// process environment; a missing env file is ignored.
pub fn parse_config(path: Option<&Path>) -> Result<LoadedConfig> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| Path::new(defaults::CONFIG_DIR).join(defaults::CONFIG_FILE));

    let (config, used_defaults) = match std::fs::read_to_string(&path) {
        Ok(contents) => (serde_json::from_str::<Config>(&contents)?, false),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => (Config::default(), true),
        Err(e) => return Err(e.into()),
    };

    config.validate()?;
    let env_file_loaded = load_env_file(&config.env_file)?;

    Ok(LoadedConfig {
        config,
        path,
        used_defaults,
        env_file_loaded,
    })
}

impl Config {
    /// Reject values no component can run with.
    pub fn validate(&self) -> Result<()> {
        check_level("logLevel", &self.log_level)?;
        check_level("mining.logLevel", &self.mining.log_level)?;
        check_level("disputeTracker.logLevel", &self.dispute_tracker.log_level)?;

        if self.mining.refresh_interval_ms == 0 {
            return Err(Error::Config("mining.refreshIntervalMs must be positive".into()));
        }
        if self.mining.duty_percent == 0 || self.mining.duty_percent > 100 {
            return Err(Error::Config(format!(
                "mining.dutyPercent must be within 1-100, got {}",
                self.mining.duty_percent
            )));
        }
        if self.mining.dummy_difficulty == 0 {
            return Err(Error::Config("mining.dummyDifficulty must be positive".into()));
        }
        if self.dispute_tracker.reorg_wait_ms == 0 {
            return Err(Error::Config("disputeTracker.reorgWaitMs must be positive".into()));
        }
        if self.dispute_tracker.retry_interval_ms == 0 {
            return Err(Error::Config(
                "disputeTracker.retryIntervalMs must be positive".into(),
            ));
        }
        if self.dispute_tracker.contract.is_empty() {
            return Err(Error::Config("disputeTracker.contract must not be empty".into()));
        }
        Ok(())
    }

    /// Per-component log levels as `tracing` filter directives.
    pub fn log_directives(&self) -> Vec<String> {
        vec![
            format!("oracle_agent::mining={}", self.mining.log_level),
            format!("oracle_agent::cpu_pool={}", self.mining.log_level),
            format!("oracle_agent::tracker={}", self.dispute_tracker.log_level),
        ]
    }
}

fn check_level(field: &str, level: &str) -> Result<()> {
    LevelFilter::from_str(level)
        .map(|_| ())
        .map_err(|_| Error::Config(format!("{field}: unknown log level {level:?}")))
}

/// Returns whether the file existed.
fn load_env_file(path: &Path) -> Result<bool> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(true),
        Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use test_case::test_case;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");

        // The default env file (configs/.env) does not exist in the test
        // working directory, so it is skipped.
        let loaded = parse_config(Some(&missing)).unwrap();
        assert!(loaded.used_defaults);
        assert!(!loaded.env_file_loaded);
        assert_eq!(loaded.path, missing);
        assert_eq!(loaded.config, Config::default());
    }

    #[test]
    fn test_partial_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join("missing.env");
        let path = write_file(
            &dir,
            "config.json",
            &format!(
                r#"{{
                    "mining": {{ "refreshIntervalMs": 250, "threads": 2 }},
                    "disputeTracker": {{ "reorgWaitMs": 60000 }},
                    "envFile": {:?}
                }}"#,
                env
            ),
        );

        let loaded = parse_config(Some(&path)).unwrap();
        assert!(!loaded.used_defaults);
        let config = loaded.config;
        assert_eq!(config.mining.refresh_interval(), Duration::from_millis(250));
        assert_eq!(config.mining.threads, 2);
        assert_eq!(config.dispute_tracker.reorg_wait(), Duration::from_secs(60));

        // Untouched fields keep their defaults
        let defaults = Config::default();
        assert_eq!(config.mining.duty_percent, defaults.mining.duty_percent);
        assert_eq!(config.dispute_tracker.contract, defaults.dispute_tracker.contract);
        assert_eq!(
            config.dispute_tracker.retry_interval_ms,
            defaults.dispute_tracker.retry_interval_ms
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "config.json", r#"{ "mining": { "gasMax": 10 } }"#);

        let err = parse_config(Some(&path)).unwrap_err();
        assert!(matches!(err, Error::Json(_)), "unexpected error: {err}");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "config.json",
            r#"{ "disputeTracker": { "reorgWaitMs": 0 } }"#,
        );

        let err = parse_config(Some(&path)).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "unexpected error: {err}");
    }

    #[test_case(r#"{ "logLevel": "loud" }"# ; "top level")]
    #[test_case(r#"{ "mining": { "logLevel": "verbose" } }"# ; "mining")]
    #[test_case(r#"{ "disputeTracker": { "logLevel": "bogus" } }"# ; "dispute tracker")]
    fn test_unknown_log_level_rejected(contents: &str) {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "config.json", contents);

        let err = parse_config(Some(&path)).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "unexpected error: {err}");
    }

    #[test]
    fn test_known_log_levels_accepted() {
        let mut config = Config::default();
        for level in ["off", "error", "warn", "info", "debug", "trace", "DEBUG"] {
            config.log_level = level.into();
            config.dispute_tracker.log_level = level.into();
            config.validate().unwrap();
        }
    }

    #[test]
    #[serial]
    fn test_env_file_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let env = write_file(&dir, "agent.env", "ORACLE_AGENT_TEST_NODE_URL=http://node:8545\n");
        let path = write_file(&dir, "config.json", &format!(r#"{{ "envFile": {:?} }}"#, env));

        std::env::remove_var("ORACLE_AGENT_TEST_NODE_URL");
        let loaded = parse_config(Some(&path)).unwrap();
        assert!(loaded.env_file_loaded);
        assert_eq!(
            std::env::var("ORACLE_AGENT_TEST_NODE_URL").as_deref(),
            Ok("http://node:8545")
        );
        std::env::remove_var("ORACLE_AGENT_TEST_NODE_URL");
    }

    #[test]
    fn test_malformed_env_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let env = write_file(&dir, "agent.env", "NOT A VALID LINE\n");
        let path = write_file(&dir, "config.json", &format!(r#"{{ "envFile": {:?} }}"#, env));

        let err = parse_config(Some(&path)).unwrap_err();
        assert!(matches!(err, Error::EnvFile(_)), "unexpected error: {err}");
    }

    #[test]
    fn test_log_directives_per_component() {
        let mut config = Config::default();
        config.dispute_tracker.log_level = "debug".into();

        let directives = config.log_directives();
        assert!(directives.contains(&"oracle_agent::tracker=debug".to_string()));
        assert!(directives.contains(&"oracle_agent::mining=info".to_string()));
    }
}
