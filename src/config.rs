//! Acquisition configuration using Figment.
//!
//! Values are layered, later sources winning:
//! 1. built-in defaults,
//! 2. an optional TOML file (`plant_daq.toml` by default),
//! 3. environment variables prefixed with `PLANT_DAQ_`, using `__` to reach
//!    nested tables (`PLANT_DAQ_PROTOCOL__END_MARKER=DONE`),
//! 4. command-line overrides applied by the binary.
//!
//! # Example
//! ```no_run
//! use plant_daq::config::AcquisitionConfig;
//!
//! let config = AcquisitionConfig::load()?;
//! config.validate()?;
//! println!("Port: {} @ {} baud", config.port, config.baud_rate);
//! # Ok::<(), plant_daq::error::DaqError>(())
//! ```

use crate::error::{DaqError, DaqResult};
use crate::protocol::ProtocolTokens;
use crate::validation::{
    is_in_range, is_not_empty, is_valid_file_prefix, is_valid_path, is_valid_port_name,
};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "plant_daq.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "PLANT_DAQ_";

const BAUD_RANGE: std::ops::RangeInclusive<u32> = 300..=4_000_000;
const MAX_READ_TIMEOUT: Duration = Duration::from_secs(60);
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Everything one acquisition session needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Serial port identifier.
    pub port: String,
    /// Symbol rate.
    pub baud_rate: u32,
    /// Upper bound on a single blocking read.
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Pause after clearing buffers before `START` is sent.
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
    /// Directory receiving session files.
    pub output_dir: PathBuf,
    /// Session file name prefix.
    pub file_prefix: String,
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Device command and marker tokens.
    pub protocol: ProtocolTokens,
}

fn default_port() -> String {
    if cfg!(windows) {
        "COM5".to_string()
    } else {
        "/dev/ttyUSB0".to_string()
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: 115_200,
            read_timeout: Duration::from_secs(2),
            settle_delay: Duration::from_secs(2),
            output_dir: PathBuf::from("."),
            file_prefix: "plant_data".to_string(),
            log_level: "info".to_string(),
            protocol: ProtocolTokens::default(),
        }
    }
}

impl AcquisitionConfig {
    /// Load configuration from `plant_daq.toml` and environment variables.
    pub fn load() -> DaqResult<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load configuration from a specific file path. A missing file is not an
    /// error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> DaqResult<Self> {
        Ok(Self::figment(path).extract()?)
    }

    /// The layered provider stack without extracting.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> DaqResult<()> {
        let invalid = |msg: String| Err(DaqError::Configuration(msg));

        if let Err(e) = is_valid_port_name(&self.port) {
            return invalid(e.to_string());
        }
        if is_in_range(self.baud_rate, BAUD_RANGE).is_err() {
            return invalid(format!(
                "Invalid baud_rate {}. Must be {}-{}",
                self.baud_rate,
                BAUD_RANGE.start(),
                BAUD_RANGE.end()
            ));
        }
        if self.read_timeout.is_zero() || self.read_timeout > MAX_READ_TIMEOUT {
            return invalid(format!(
                "Invalid read_timeout {:?}. Must be greater than zero and at most {:?}",
                self.read_timeout, MAX_READ_TIMEOUT
            ));
        }
        if let Err(e) = is_valid_path(&self.output_dir.to_string_lossy()) {
            return invalid(format!("Invalid output_dir: {}", e));
        }
        if let Err(e) = is_valid_file_prefix(&self.file_prefix) {
            return invalid(e.to_string());
        }
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            ));
        }

        let tokens = &self.protocol;
        for (name, value) in [
            ("start_command", &tokens.start_command),
            ("stop_command", &tokens.stop_command),
            ("started_marker", &tokens.started_marker),
            ("end_marker", &tokens.end_marker),
        ] {
            if is_not_empty(value.trim()).is_err() {
                return invalid(format!("Protocol token '{}' cannot be empty", name));
            }
        }
        if tokens.started_marker.contains(tokens.end_marker.as_str()) {
            return invalid(format!(
                "started_marker '{}' contains end_marker '{}'",
                tokens.started_marker, tokens.end_marker
            ));
        }

        Ok(())
    }
}
