//! Core library for Soundframe.
//!
//! Soundframe extracts loudness and per-band spectral energy from audio,
//! either live on a real-time processing thread or precomputed over a whole
//! track, and turns a track plus a renderer into an encoded, muxed video.
//! Each module owns one subsystem: the cross-thread sample ring, live and
//! offline analysis, the feature pull interface, the scene renderer, and the
//! export pipeline.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod mapping;
pub mod record;
pub mod render;
pub mod ring;
pub mod scene;
pub mod timeline;

pub use analysis::{BandEnergyQuery, LiveLoudnessAnalyzer, LoudnessMonitor, SpectrumTap};
pub use audio::{AudioEngine, AudioMode, ClockedPlayback, PlaybackSource};
pub use config::{AnalysisConfig, AppConfig, AudioConfig, ExportConfig, OutputMode};
pub use error::{Result, SoundframeError};
pub use mapping::{BandRange, FeatureSource, FrameFeatures, TimelineFeatures};
pub use record::{
    ExportPipeline, ExportState, ExportSummary, Muxer, PackedMuxer, StopHandle, VideoEncoder,
    WorkerEncoder, XorDeltaCodec,
};
pub use render::{Renderer, SceneRenderer, Surface};
pub use ring::{SampleBlock, SampleRing};
pub use scene::{Effect, EffectKind, SceneDescriptor};
pub use timeline::{
    CancelToken, Clock, DecodedTrack, ManualClock, SpectrumFrame, SystemClock, TrackTimeline,
    TrackTimelinePreprocessor,
};
