//! Application settings for the `fe-sinus` frontend.
//!
//! Settings are layered with figment, later sources overriding earlier ones:
//!
//! 1. Library defaults ([`FrontendSettings::default`])
//! 2. A TOML file (`config/fe-sinus.toml` unless given on the command line)
//! 3. Environment variables prefixed with `SINUS_`, nested with `__`
//!    (e.g. `SINUS_FRONTEND__FRONTEND_INDEX=3`)
//!
//! The same file carries the seed of the configuration store under `[odb]`:
//!
//! ```toml
//! [odb.Equipment.sinus.Settings]
//! waveform_length = 512
//! channel_frequency = [1000000, 2000000, 500000, 1000000, 1000000, 1000000, 1000000, 1000000]
//! ```
//!
//! Keys missing from the seed are registered with their defaults at
//! initialization, so an empty `[odb]` table is valid.

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::controller::ControllerOptions;
use crate::encoder::event_size;
use crate::error::{AppResult, DaqError};
use crate::instrument::{InstrumentConfig, SettingsKeys};
use crate::logging::OutputFormat;
use crate::store::MemoryStore;

/// Settings file used when none is given.
pub const DEFAULT_CONFIG_PATH: &str = "config/fe-sinus.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "SINUS_";

/// Equipment name, and so the store namespace.
pub const DEFAULT_EQUIPMENT: &str = "sinus";

/// Interval between two DC-offset checks.
pub const DEFAULT_HOT_RELOAD_MS: u64 = 1000;

/// Interval between two readout polls of the host loop.
pub const DEFAULT_POLL_MS: u64 = 10;

/// Largest event handed to the transport (4 MiB).
pub const DEFAULT_MAX_EVENT_SIZE: usize = 4 * 1024 * 1024;

/// Depth of the queue between readout and event consumer.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 256;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontendSettings {
    /// Logging verbosity (trace, debug, info, warn, error).
    ///
    /// `RUST_LOG` takes precedence when set.
    pub log_level: String,

    /// Log output format.
    pub log_format: OutputFormat,

    /// Frontend identity and timing.
    pub frontend: FrontendSection,

    /// Initial contents of the configuration store.
    pub odb: toml::Table,
}

impl Default for FrontendSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: OutputFormat::Pretty,
            frontend: FrontendSection::default(),
            odb: toml::Table::new(),
        }
    }
}

/// `[frontend]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontendSection {
    /// Equipment name; settings live under `/Equipment/<equipment>/Settings`.
    pub equipment: String,

    /// Index of this frontend among its peers, stamped into every event.
    pub frontend_index: u32,

    /// Readout poll interval.
    #[serde(with = "humantime_serde")]
    pub poll_period: Duration,

    /// Minimum interval between two hot-reload checks.
    #[serde(with = "humantime_serde")]
    pub hot_reload_period: Duration,

    /// Largest event accepted at run start, in bytes.
    pub max_event_size: usize,

    /// Events buffered between readout and consumer before readout waits.
    pub event_queue_capacity: usize,
}

impl Default for FrontendSection {
    fn default() -> Self {
        Self {
            equipment: DEFAULT_EQUIPMENT.to_string(),
            frontend_index: 0,
            poll_period: Duration::from_millis(DEFAULT_POLL_MS),
            hot_reload_period: Duration::from_millis(DEFAULT_HOT_RELOAD_MS),
            max_event_size: DEFAULT_MAX_EVENT_SIZE,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
        }
    }
}

impl FrontendSettings {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from `path` and the environment, then validate.
    ///
    /// A missing file is not an error; defaults and environment apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Self::figment(path.as_ref()).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// The provider stack used by [`FrontendSettings::load_from`].
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Check values that parse but cannot drive the frontend.
    pub fn validate(&self) -> AppResult<()> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        let frontend = &self.frontend;
        if frontend.equipment.is_empty() || frontend.equipment.contains('/') {
            return Err(DaqError::Configuration(format!(
                "Invalid equipment name '{}'",
                frontend.equipment
            )));
        }
        if frontend.poll_period.is_zero() {
            return Err(DaqError::Configuration(
                "frontend.poll_period must be non-zero".to_string(),
            ));
        }
        if frontend.event_queue_capacity == 0 {
            return Err(DaqError::Configuration(
                "frontend.event_queue_capacity must be non-zero".to_string(),
            ));
        }

        // Even an event without waveforms must fit.
        let minimum = event_size(&InstrumentConfig {
            record_length: 0,
            ..Default::default()
        });
        if frontend.max_event_size < minimum {
            return Err(DaqError::Configuration(format!(
                "frontend.max_event_size {} is below the minimum event size of {minimum} bytes",
                frontend.max_event_size
            )));
        }

        Ok(())
    }

    /// Store keys of the configured equipment.
    pub fn settings_keys(&self) -> SettingsKeys {
        SettingsKeys::new(&self.frontend.equipment)
    }

    /// Controller parameters derived from these settings.
    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            settings: self.settings_keys(),
            frontend_index: self.frontend.frontend_index,
            hot_reload_period: self.frontend.hot_reload_period,
            max_event_size: self.frontend.max_event_size,
        }
    }

    /// A configuration store holding the `[odb]` seed.
    pub fn seed_store(&self) -> MemoryStore {
        MemoryStore::from_toml(&self.odb)
    }
}
