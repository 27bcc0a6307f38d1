use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{mapping::BandRange, scene::SceneDescriptor, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub analysis: AnalysisConfig,
    pub export: ExportConfig,
    /// Scene painted by the built-in renderer.
    pub scene: SceneDescriptor,
}

impl AppConfig {
    /// Reads a JSON configuration file. Fields that are absent keep their
    /// defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config = serde_json::from_str(&raw)?;
        tracing::debug!(path = %path.as_ref().display(), "loaded configuration");
        Ok(config)
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Frames handed to the processing stage per invocation.
    pub render_quantum: usize,
    /// Live input channel count handed to the analyzer.
    pub channels: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            render_quantum: 128,
            channels: 2,
        }
    }
}

/// How the live analyzer forwards audio to its output ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Average all channels into one.
    Mono,
    /// Copy every channel unchanged.
    PassThrough,
}

/// Live and offline analysis parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Frames accumulated before the live analyzer computes RMS.
    pub window_size: usize,
    /// Per-window decay applied to the smoothed RMS.
    pub decay_factor: f32,
    pub fft_size: usize,
    /// Shortest slice the preprocessor extracts near the track edges.
    pub min_window: usize,
    pub output: OutputMode,
    /// Capacity of the loudness message channel.
    pub message_capacity: usize,
    /// Capacity, in samples, of the spectrum sample tap.
    pub tap_capacity: usize,
    pub bands: Vec<BandRange>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window_size: 2048,
            decay_factor: 0.95,
            fft_size: 2048,
            min_window: 1024,
            output: OutputMode::PassThrough,
            message_capacity: 64,
            tap_capacity: 8192,
            bands: BandRange::defaults(),
        }
    }
}

/// Export encoder and pacing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
    pub codec: String,
    pub keyframe_interval_ms: u64,
    /// Frames allowed in flight before new frames are dropped.
    pub max_queue_depth: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            fps: 60,
            width: 1280,
            height: 720,
            bitrate: 8_000_000,
            codec: "xor-rle".to_string(),
            keyframe_interval_ms: 5_000,
            max_queue_depth: 8,
        }
    }
}

impl ExportConfig {
    /// Width and height rounded up to even values, as most codecs require.
    pub fn even_dimensions(&self) -> (u32, u32) {
        (round_up_even(self.width), round_up_even(self.height))
    }

    /// Frame duration in microseconds.
    pub fn frame_duration_us(&self) -> u64 {
        1_000_000 / u64::from(self.fps.max(1))
    }
}

fn round_up_even(value: u32) -> u32 {
    value.saturating_add(value & 1)
}
