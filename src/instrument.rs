//! Per-channel signal parameters and the instrument configuration snapshot.
//!
//! An [`InstrumentConfig`] is an immutable value: it is rebuilt from the
//! configuration store at initialization and at every run start
//! ([`InstrumentConfig::load_full`]), and a narrower subset (the DC offsets)
//! can be re-read while a run is active
//! ([`InstrumentConfig::load_hot_subset`]). The controller publishes each new
//! value as a fresh snapshot instead of mutating the one readers hold.
//!
//! The store is treated as authoritative: values are taken as they are, the
//! only normalisation being that every per-channel array has exactly
//! [`NUM_CHANNELS`] entries.

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, DaqError};
use crate::store::{settings_key, ConfigStore, StoreError, StoreExt};

/// Number of physical channels on the emulated digitizer.
pub const NUM_CHANNELS: usize = 8;

/// DC offset of every channel, in channel order.
pub type DcOffsets = [u16; NUM_CHANNELS];

/// Values used for keys missing from the store (V1720-like board).
pub mod defaults {
    /// Sampling clock: 250 MS/s.
    pub const SAMPLE_CLOCK_HZ: u32 = 250_000_000;
    /// Samples per waveform.
    pub const RECORD_LENGTH: u32 = 1024;
    /// Channels start enabled.
    pub const CHANNEL_ENABLED: bool = true;
    /// No baseline shift.
    pub const DC_OFFSET: u16 = 0;
    /// 1 MHz sine.
    pub const FREQUENCY_HZ: u32 = 1_000_000;
    /// Peak amplitude in ADC counts.
    pub const AMPLITUDE: u16 = 1000;
    /// No phase shift.
    pub const PHASE_NS: i32 = 0;
}

/// Store key names under the equipment settings directory.
pub mod keys {
    /// Sampling clock in Hz.
    pub const DISCRETE_FREQUENCY: &str = "discrete_frequency";
    /// Samples per waveform.
    pub const WAVEFORM_LENGTH: &str = "waveform_length";
    /// Per-channel enable flags.
    pub const CHANNEL_ENABLED: &str = "channel_enabled";
    /// Per-channel DC offsets.
    pub const CHANNEL_DC_OFFSET: &str = "channel_dc_offset";
    /// Per-channel sine frequencies in Hz.
    pub const CHANNEL_FREQUENCY: &str = "channel_frequency";
    /// Per-channel amplitudes in ADC counts.
    pub const CHANNEL_AMPLITUDE: &str = "channel_amplitude";
    /// Per-channel phase offsets in ns.
    pub const CHANNEL_PHASE: &str = "channel_phase";

    /// Every key the frontend registers.
    pub const ALL: [&str; 7] = [
        DISCRETE_FREQUENCY,
        WAVEFORM_LENGTH,
        CHANNEL_ENABLED,
        CHANNEL_DC_OFFSET,
        CHANNEL_FREQUENCY,
        CHANNEL_AMPLITUDE,
        CHANNEL_PHASE,
    ];
}

/// Resolves setting names to store paths for one piece of equipment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsKeys {
    equipment: String,
}

impl SettingsKeys {
    /// Keys under `/Equipment/<equipment>/Settings`.
    pub fn new(equipment: impl Into<String>) -> Self {
        Self {
            equipment: equipment.into(),
        }
    }

    /// Equipment name.
    pub fn equipment(&self) -> &str {
        &self.equipment
    }

    /// Full store path of setting `name`.
    pub fn path(&self, name: &str) -> String {
        settings_key(&self.equipment, name)
    }
}

// =============================================================================
// ChannelConfig
// =============================================================================

/// Signal parameters of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Whether the channel produces a waveform bank.
    pub enabled: bool,
    /// Baseline written to the DC-offset bank, regardless of `enabled`.
    pub dc_offset: u16,
    /// Peak signal magnitude in ADC counts, before clamping.
    pub amplitude: u16,
    /// Sine frequency. Must be non-zero when the channel is enabled.
    pub frequency_hz: u32,
    /// Time offset in ns, subtracted from each sample time.
    pub phase_ns: i32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::CHANNEL_ENABLED,
            dc_offset: defaults::DC_OFFSET,
            amplitude: defaults::AMPLITUDE,
            frequency_hz: defaults::FREQUENCY_HZ,
            phase_ns: defaults::PHASE_NS,
        }
    }
}

// =============================================================================
// InstrumentConfig
// =============================================================================

/// Complete signal configuration of the instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Sampling clock used to convert a sample index to a time offset.
    pub sample_clock_hz: u32,
    /// Samples per waveform bank; 0 disables waveform banks.
    pub record_length: u32,
    /// Channel parameters in physical channel order.
    pub channels: [ChannelConfig; NUM_CHANNELS],
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            sample_clock_hz: defaults::SAMPLE_CLOCK_HZ,
            record_length: defaults::RECORD_LENGTH,
            channels: [ChannelConfig::default(); NUM_CHANNELS],
        }
    }
}

impl InstrumentConfig {
    /// Read the whole configuration from the store.
    ///
    /// Missing keys are created with their [`defaults`]; arrays of the wrong
    /// length are resized to [`NUM_CHANNELS`] and written back. Calling this
    /// twice without an intervening store change yields equal values.
    pub fn load_full(store: &dyn ConfigStore, settings: &SettingsKeys) -> Result<Self, StoreError> {
        let sample_clock_hz = store.get_scalar(
            &settings.path(keys::DISCRETE_FREQUENCY),
            defaults::SAMPLE_CLOCK_HZ,
        )?;
        let record_length =
            store.get_scalar(&settings.path(keys::WAVEFORM_LENGTH), defaults::RECORD_LENGTH)?;

        let enabled = store.get_array(
            &settings.path(keys::CHANNEL_ENABLED),
            NUM_CHANNELS,
            defaults::CHANNEL_ENABLED,
        )?;
        let dc_offsets = load_dc_offsets(store, settings)?;
        let frequencies = store.get_array(
            &settings.path(keys::CHANNEL_FREQUENCY),
            NUM_CHANNELS,
            defaults::FREQUENCY_HZ,
        )?;
        let amplitudes = store.get_array(
            &settings.path(keys::CHANNEL_AMPLITUDE),
            NUM_CHANNELS,
            defaults::AMPLITUDE,
        )?;
        let phases = store.get_array(
            &settings.path(keys::CHANNEL_PHASE),
            NUM_CHANNELS,
            defaults::PHASE_NS,
        )?;

        // get_array guarantees NUM_CHANNELS entries per array.
        let channels = std::array::from_fn(|i| ChannelConfig {
            enabled: enabled[i],
            dc_offset: dc_offsets[i],
            amplitude: amplitudes[i],
            frequency_hz: frequencies[i],
            phase_ns: phases[i],
        });

        Ok(Self {
            sample_clock_hz,
            record_length,
            channels,
        })
    }

    /// Re-read the settings that may change during a run.
    ///
    /// Returns the new DC offsets when they differ from this configuration,
    /// `None` when they are unchanged. Nothing is modified; the caller decides
    /// whether to adopt the values via [`InstrumentConfig::with_dc_offsets`].
    pub fn load_hot_subset(
        &self,
        store: &dyn ConfigStore,
        settings: &SettingsKeys,
    ) -> Result<Option<DcOffsets>, StoreError> {
        let current = load_dc_offsets(store, settings)?;
        Ok((current != self.dc_offsets()).then_some(current))
    }

    /// Copy of this configuration with new DC offsets.
    pub fn with_dc_offsets(&self, offsets: DcOffsets) -> Self {
        let mut next = self.clone();
        for (channel, offset) in next.channels.iter_mut().zip(offsets) {
            channel.dc_offset = offset;
        }
        next
    }

    /// Bit `i` set iff channel `i` is enabled.
    pub fn channel_enable_mask(&self) -> u32 {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, ch)| ch.enabled)
            .fold(0, |mask, (i, _)| mask | (1 << i))
    }

    /// DC offsets in channel order.
    pub fn dc_offsets(&self) -> DcOffsets {
        self.channels.map(|ch| ch.dc_offset)
    }

    /// Indices of enabled channels, ascending.
    pub fn enabled_channels(&self) -> impl Iterator<Item = usize> + '_ {
        self.channels
            .iter()
            .enumerate()
            .filter_map(|(i, ch)| ch.enabled.then_some(i))
    }

    /// Check the values that would otherwise fault the readout path.
    ///
    /// A zero sampling clock is rejected. A zero frequency on an enabled
    /// channel is left to the caller: it degenerates to a flat baseline.
    pub fn validate(&self) -> AppResult<()> {
        if self.sample_clock_hz == 0 {
            return Err(DaqError::Configuration(format!(
                "{} must be non-zero",
                keys::DISCRETE_FREQUENCY
            )));
        }
        Ok(())
    }
}

fn load_dc_offsets(store: &dyn ConfigStore, settings: &SettingsKeys) -> Result<DcOffsets, StoreError> {
    let offsets = store.get_array(
        &settings.path(keys::CHANNEL_DC_OFFSET),
        NUM_CHANNELS,
        defaults::DC_OFFSET,
    )?;
    Ok(std::array::from_fn(|i| offsets[i]))
}
