//! Signal analysis shared by the live and offline paths.
//!
//! The live side ([`LiveLoudnessAnalyzer`]) runs on the real-time processing
//! thread and reports to the main thread through bounded SPSC channels. The
//! offline preprocessor in [`crate::timeline`] reuses the same RMS and
//! spectrum helpers so both paths agree on the numbers they produce.

mod bands;
mod loudness;
mod spectrum;

use std::f32::consts::PI;

pub use bands::BandEnergyQuery;
pub use loudness::{
    LiveHandles, LiveLoudnessAnalyzer, LoudnessMessage, LoudnessMonitor, LoudnessState,
    MAX_CHANNELS,
};
pub use spectrum::{SpectrumAnalyzer, SpectrumTap};

/// Floor for the running loudness peak so normalisation never divides by zero.
pub const PEAK_FLOOR: f32 = 1e-4;

/// Root-mean-square of a block. Empty blocks are silent.
pub fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Averages every channel into `mono`, sample by sample. A single channel is
/// copied unchanged. Positions missing from short channels count as silence.
pub fn downmix_into<C: AsRef<[f32]>>(channels: &[C], mono: &mut [f32]) {
    mono.fill(0.0);
    if channels.is_empty() {
        return;
    }

    for channel in channels {
        for (out, sample) in mono.iter_mut().zip(channel.as_ref()) {
            *out += *sample;
        }
    }

    if channels.len() > 1 {
        let scale = 1.0 / channels.len() as f32;
        for out in mono.iter_mut() {
            *out *= scale;
        }
    }
}

/// Blackman window coefficient for `index` in a window of `len` samples.
pub fn blackman_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    let phase = (2.0 * PI * index as f32) / (len as f32 - 1.0);
    0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos()
}

/// Converts a linear magnitude to decibels. Anything that does not produce a
/// finite value (silence, NaN) maps to negative infinity.
pub fn to_decibels(magnitude: f32) -> f32 {
    let db = 20.0 * magnitude.log10();
    if db.is_finite() {
        db
    } else {
        f32::NEG_INFINITY
    }
}
