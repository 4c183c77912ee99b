//! Sine waveform synthesis with 12-bit ADC quantization.
//!
//! Each sample is evaluated from absolute run time rather than accumulated
//! phase, so a waveform depends only on the configuration, the channel and
//! the elapsed time since run start. The time base is computed in the integer
//! domain and the sine in `f64`, which keeps long runs free of phase drift.
//!
//! For sample `j`:
//!
//! ```text
//! t_ns   = (j * 1e9) / sample_clock_hz + elapsed_ns - phase_ns   (integer)
//! raw    = sin(2π * t_ns / (1e9 / frequency_hz)) * amplitude + 2048
//! sample = clamp(raw, 0, 4095) truncated to u16
//! ```

use std::f64::consts::TAU;

use crate::clock::NANOS_PER_SEC;
use crate::instrument::InstrumentConfig;

/// ADC code of a zero-volt input (centre of the 12-bit range).
pub const ADC_BASELINE: f64 = 2048.0;

/// Largest 12-bit ADC code.
pub const ADC_MAX: u16 = 4095;

/// Fill `out` with the waveform of `channel` at `elapsed_ns` since run start.
///
/// `out` is expected to hold `config.record_length` samples; only
/// `out.len()` samples are written, so an empty slice is a no-op.
///
/// # Preconditions
///
/// `channel` should be enabled and its `frequency_hz` non-zero. A zero
/// frequency is not guarded here: the period becomes infinite and the output
/// degenerates to the baseline. `config.sample_clock_hz` must be non-zero
/// (see [`InstrumentConfig::validate`]).
///
/// # Panics
///
/// Panics if `channel` is not a valid channel index.
pub fn synthesize(config: &InstrumentConfig, channel: usize, elapsed_ns: i64, out: &mut [u16]) {
    let params = &config.channels[channel];
    let period_ns = NANOS_PER_SEC as f64 / f64::from(params.frequency_hz);
    let amplitude = f64::from(params.amplitude);
    let sample_clock_hz = i64::from(config.sample_clock_hz);
    let phase_ns = i64::from(params.phase_ns);

    for (j, sample) in out.iter_mut().enumerate() {
        let offset_ns = (j as i64).wrapping_mul(NANOS_PER_SEC as i64) / sample_clock_hz;
        // Wraps instead of trapping for elapsed times no real run reaches.
        let t_ns = offset_ns.wrapping_add(elapsed_ns).wrapping_sub(phase_ns);
        let raw = (TAU * t_ns as f64 / period_ns).sin() * amplitude + ADC_BASELINE;
        *sample = quantize(raw);
    }
}

/// Allocating convenience wrapper around [`synthesize`].
pub fn synthesize_vec(config: &InstrumentConfig, channel: usize, elapsed_ns: i64) -> Vec<u16> {
    let mut out = vec![0; config.record_length as usize];
    synthesize(config, channel, elapsed_ns, &mut out);
    out
}

/// Clamp to the ADC range and truncate toward zero. NaN maps to 0.
#[inline]
pub fn quantize(raw: f64) -> u16 {
    raw.clamp(0.0, f64::from(ADC_MAX)) as u16
}
