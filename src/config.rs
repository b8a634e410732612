use crate::error::{Result, StbtError};
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StbtConfig {
    pub global: GlobalConfig,
    pub wait: WaitConfig,
    pub press_until_match: PressUntilMatchConfig,
    pub recovery: RecoveryConfig,
    pub remote: RemoteConfig,
    pub events: EventConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GlobalConfig {
    /// Remote control URI (none, test, vr:<host>[:<port>], lirc:<socket>:<remote>)
    #[serde(default = "default_control")]
    pub control: String,

    /// Debug verbosity; 1 enables debug output, 2 also per-frame traces
    #[serde(default)]
    pub verbose: u8,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WaitConfig {
    /// Default timeout for wait_for_match / wait_for_motion
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,

    /// Threshold used by the template matcher to confirm a potential match
    #[serde(default = "default_noise_threshold")]
    pub noise_threshold: f64,

    /// Frames in a row that must match at the same position
    #[serde(default = "default_consecutive_matches")]
    pub consecutive_matches: u32,

    /// Frames in a row that must contain motion
    #[serde(default = "default_consecutive_frames")]
    pub consecutive_frames: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PressUntilMatchConfig {
    /// Seconds to wait for a match between presses
    #[serde(default = "default_interval_secs")]
    pub interval_secs: f64,

    /// Give up after this many presses
    #[serde(default = "default_max_presses")]
    pub max_presses: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RecoveryConfig {
    /// How long an underrun may last before the source is restarted
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: f64,

    /// Pause between tearing the source down and rebuilding it
    #[serde(default = "default_settle_secs")]
    pub settle_secs: f64,

    /// Restarts attempted before giving up until the video comes back
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RemoteConfig {
    /// Upper bound for connecting to a network or infrared remote
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: f64,

    /// Recorder URI used by `stbt record`
    #[serde(default = "default_control_recorder")]
    pub control_recorder: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EventConfig {
    /// Detection event bus capacity
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

impl WaitConfig {
    pub fn timeout(&self) -> Result<Duration> {
        seconds("wait.timeout_secs", self.timeout_secs)
    }
}

impl PressUntilMatchConfig {
    pub fn interval(&self) -> Result<Duration> {
        seconds("press_until_match.interval_secs", self.interval_secs)
    }
}

impl RecoveryConfig {
    pub fn grace_period(&self) -> Result<Duration> {
        seconds("recovery.grace_period_secs", self.grace_period_secs)
    }

    pub fn settle_period(&self) -> Result<Duration> {
        seconds("recovery.settle_secs", self.settle_secs)
    }
}

impl RemoteConfig {
    pub fn connect_timeout(&self) -> Result<Duration> {
        seconds("remote.connect_timeout_secs", self.connect_timeout_secs)
    }
}

/// Convert a seconds setting, rejecting negative, NaN and huge values
fn seconds(key: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|e| {
        StbtError::configuration(format!("{} = {} is not a valid duration: {}", key, value, e))
    })
}

impl StbtConfig {
    /// Load configuration from the standard locations plus environment
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_with(None::<&Path>)
    }

    /// Load configuration from the standard locations, then `extra` on top
    ///
    /// Later sources win: system file, user file, `$STBT_CONFIG_FILE`,
    /// `extra`, then `STBT__<SECTION>__<KEY>` environment variables.
    pub fn load_with<P: AsRef<Path>>(extra: Option<P>) -> std::result::Result<Self, ConfigError> {
        let mut builder = Self::defaults_builder()?;

        for path in standard_config_files() {
            debug!("Looking for configuration in: {}", path.display());
            builder = builder.add_source(
                File::from(path.as_path())
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        if let Some(path) = extra {
            let path = path.as_ref();
            debug!("Loading configuration from: {}", path.display());
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix("STBT")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: StbtConfig = settings.try_deserialize()?;
        config.validate()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Load configuration from a single file, ignoring the standard locations
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ConfigError> {
        let settings = Self::defaults_builder()?
            .add_source(
                File::from(path.as_ref())
                    .format(FileFormat::Toml)
                    .required(true),
            )
            .build()?;

        let config: StbtConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn defaults_builder(
    ) -> std::result::Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("global.control", default_control())?
            .set_default("global.verbose", 0)?
            .set_default("wait.timeout_secs", default_timeout_secs())?
            .set_default("wait.noise_threshold", default_noise_threshold())?
            .set_default("wait.consecutive_matches", default_consecutive_matches())?
            .set_default("wait.consecutive_frames", default_consecutive_frames())?
            .set_default("press_until_match.interval_secs", default_interval_secs())?
            .set_default("press_until_match.max_presses", default_max_presses())?
            .set_default("recovery.grace_period_secs", default_grace_period_secs())?
            .set_default("recovery.settle_secs", default_settle_secs())?
            .set_default("recovery.max_attempts", default_max_attempts())?
            .set_default("remote.connect_timeout_secs", default_connect_timeout_secs())?
            .set_default("remote.control_recorder", default_control_recorder())?
            .set_default("events.bus_capacity", default_bus_capacity() as i64)
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !(self.wait.timeout_secs > 0.0) {
            return Err(ConfigError::Message(
                "Wait timeout_secs must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.wait.noise_threshold) {
            return Err(ConfigError::Message(
                "Wait noise_threshold must be between 0 and 1".to_string(),
            ));
        }

        if self.wait.consecutive_matches == 0 || self.wait.consecutive_frames == 0 {
            return Err(ConfigError::Message(
                "Wait consecutive_matches and consecutive_frames must be greater than 0"
                    .to_string(),
            ));
        }

        if !(self.press_until_match.interval_secs > 0.0) {
            return Err(ConfigError::Message(
                "press_until_match interval_secs must be greater than 0".to_string(),
            ));
        }

        if !(self.recovery.grace_period_secs >= 0.0) || !(self.recovery.settle_secs >= 0.0) {
            return Err(ConfigError::Message(
                "Recovery periods must not be negative".to_string(),
            ));
        }

        if !(self.remote.connect_timeout_secs > 0.0) {
            return Err(ConfigError::Message(
                "Remote connect_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.events.bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        // In range but too large to represent
        for duration in [
            self.wait.timeout(),
            self.press_until_match.interval(),
            self.recovery.grace_period(),
            self.recovery.settle_period(),
            self.remote.connect_timeout(),
        ] {
            duration.map_err(|e| ConfigError::Message(e.to_string()))?;
        }

        Ok(())
    }
}

impl Default for StbtConfig {
    fn default() -> Self {
        Self {
            global: GlobalConfig {
                control: default_control(),
                verbose: 0,
            },
            wait: WaitConfig {
                timeout_secs: default_timeout_secs(),
                noise_threshold: default_noise_threshold(),
                consecutive_matches: default_consecutive_matches(),
                consecutive_frames: default_consecutive_frames(),
            },
            press_until_match: PressUntilMatchConfig {
                interval_secs: default_interval_secs(),
                max_presses: default_max_presses(),
            },
            recovery: RecoveryConfig {
                grace_period_secs: default_grace_period_secs(),
                settle_secs: default_settle_secs(),
                max_attempts: default_max_attempts(),
            },
            remote: RemoteConfig {
                connect_timeout_secs: default_connect_timeout_secs(),
                control_recorder: default_control_recorder(),
            },
            events: EventConfig {
                bus_capacity: default_bus_capacity(),
            },
        }
    }
}

/// System, user and per-run configuration files, lowest priority first
fn standard_config_files() -> Vec<PathBuf> {
    let mut files = vec![std::env::var_os("STBT_SYSTEM_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc/stbt/stbt.conf"))];

    let user_dir = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")));
    if let Some(dir) = user_dir {
        files.push(dir.join("stbt").join("stbt.conf"));
    }

    if let Some(run_file) = std::env::var_os("STBT_CONFIG_FILE").filter(|f| !f.is_empty()) {
        files.push(PathBuf::from(run_file));
    }

    files
}

// Default value functions
fn default_control() -> String {
    "none".to_string()
}

fn default_timeout_secs() -> f64 {
    10.0
}
fn default_noise_threshold() -> f64 {
    0.16
}
fn default_consecutive_matches() -> u32 {
    1
}
fn default_consecutive_frames() -> u32 {
    10
}

fn default_interval_secs() -> f64 {
    3.0
}
fn default_max_presses() -> u32 {
    10
}

fn default_grace_period_secs() -> f64 {
    2.0
}
fn default_settle_secs() -> f64 {
    5.0
}
fn default_max_attempts() -> u32 {
    3
}

fn default_connect_timeout_secs() -> f64 {
    3.0
}
fn default_control_recorder() -> String {
    "file:///dev/stdin".to_string()
}

fn default_bus_capacity() -> usize {
    256
}
