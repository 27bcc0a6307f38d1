//! Offline export: renders a track frame by frame at a fixed rate, encodes
//! the frames and muxes them with the source audio.
//!
//! [`ExportPipeline`] is a small state machine,
//! `Idle -> Rendering -> Finalizing -> Complete`, with `Failed` reachable
//! from `Rendering` or `Finalizing` only. Encoder setup happens inside
//! `Rendering`, so a failed start never jumps straight from `Idle`. It is
//! driven by [`ExportPipeline::run`] or by calling [`ExportPipeline::tick`]
//! from an existing loop.

mod encoder;
mod mux;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

pub use encoder::{
    ChunkInfo, EncodedChunk, EncoderConfig, EncoderConfigPatch, EncoderEvent, EncoderRequest,
    VideoCodec, VideoEncoder, VideoFrame, WorkerEncoder, XorDeltaCodec,
};
pub use mux::{MuxRequest, Muxer, PackedHeader, PackedMuxer};
use serde::Serialize;

use crate::{
    audio::PlaybackSource,
    config::ExportConfig,
    mapping::{FrameFeatures, TimelineFeatures},
    render::Renderer,
    timeline::Clock,
    Result, SoundframeError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportState {
    Idle,
    Rendering,
    Finalizing,
    Complete,
    Failed,
}

impl ExportState {
    pub fn name(self) -> &'static str {
        match self {
            ExportState::Idle => "idle",
            ExportState::Rendering => "rendering",
            ExportState::Finalizing => "finalizing",
            ExportState::Complete => "complete",
            ExportState::Failed => "failed",
        }
    }
}

/// Requests a best-effort stop from another thread. The pipeline notices
/// on its next tick and finalizes what it has.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Outcome of a finished export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    /// Ticks that produced a frame, including dropped ones.
    pub frames_rendered: u64,
    pub frames_encoded: u64,
    pub frames_dropped: u64,
    pub keyframes: u64,
    /// Duration of the video stream and of the trimmed audio.
    pub duration_us: u64,
    /// Size of the muxed container.
    pub bytes: u64,
}

pub type EncoderFactory = Box<dyn FnMut() -> Result<Box<dyn VideoEncoder>>>;

struct ExportSession {
    encoder: Box<dyn VideoEncoder>,
    encoder_config: EncoderConfig,
    chunks: Vec<ChunkInfo>,
    frame_index: u64,
    frames_dropped: u64,
    /// `None` until the first keyframe, which makes frame 0 a keyframe.
    last_keyframe_at: Option<Duration>,
    started_at: Duration,
}

impl ExportSession {
    fn collect(&mut self) -> Result<()> {
        let completed = self.encoder.poll()?;
        self.chunks.extend(completed);
        Ok(())
    }

    /// End of the last encoded frame.
    fn video_duration_us(&self) -> u64 {
        self.chunks
            .iter()
            .map(|chunk| chunk.timestamp_us + chunk.duration_us)
            .max()
            .unwrap_or(0)
    }
}

/// Fixed-rate render, encode and mux of one track.
pub struct ExportPipeline<C> {
    config: ExportConfig,
    clock: C,
    state: ExportState,
    renderer: Option<Box<dyn Renderer>>,
    features: TimelineFeatures,
    playback: Box<dyn PlaybackSource>,
    muxer: Box<dyn Muxer>,
    new_encoder: EncoderFactory,
    session: Option<ExportSession>,
    output: Option<Vec<u8>>,
    summary: Option<ExportSummary>,
    stop: StopHandle,
    last_error: Option<String>,
}

impl<C: Clock> ExportPipeline<C> {
    /// Pipeline reading features from `features` and audio from `playback`.
    /// Frames are encoded with [`XorDeltaCodec`] on a worker thread and
    /// packed with [`PackedMuxer`] unless replaced.
    pub fn new(
        config: ExportConfig,
        clock: C,
        features: TimelineFeatures,
        playback: impl PlaybackSource + 'static,
    ) -> Self {
        Self {
            config,
            clock,
            state: ExportState::Idle,
            renderer: None,
            features,
            playback: Box::new(playback),
            muxer: Box::new(PackedMuxer::new()),
            new_encoder: Box::new(|| -> Result<Box<dyn VideoEncoder>> {
                Ok(Box::new(WorkerEncoder::spawn(XorDeltaCodec::new())?))
            }),
            session: None,
            output: None,
            summary: None,
            stop: StopHandle::default(),
            last_error: None,
        }
    }

    pub fn with_renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.attach_renderer(renderer);
        self
    }

    pub fn attach_renderer(&mut self, renderer: impl Renderer + 'static) {
        self.renderer = Some(Box::new(renderer));
    }

    pub fn with_muxer(mut self, muxer: impl Muxer + 'static) -> Self {
        self.muxer = Box::new(muxer);
        self
    }

    /// Replaces the encoder built at each [`start`](Self::start).
    pub fn with_encoder_factory(
        mut self,
        factory: impl FnMut() -> Result<Box<dyn VideoEncoder>> + 'static,
    ) -> Self {
        self.new_encoder = Box::new(factory);
        self
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Muxed container, once the export is complete.
    pub fn output(&self) -> Option<&[u8]> {
        self.output.as_deref()
    }

    pub fn take_output(&mut self) -> Option<Vec<u8>> {
        self.output.take()
    }

    pub fn summary(&self) -> Option<ExportSummary> {
        self.summary
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Frames produced so far in the current session.
    pub fn frame_index(&self) -> u64 {
        self.session.as_ref().map_or(0, |session| session.frame_index)
    }

    /// Restarts playback, configures a fresh encoder and renders frame 0.
    pub fn start(&mut self) -> Result<()> {
        if self.state != ExportState::Idle {
            return Err(SoundframeError::InvalidState {
                expected: ExportState::Idle.name(),
                actual: self.state.name(),
            });
        }
        if self.renderer.is_none() {
            return Err(SoundframeError::RendererMissing);
        }
        if self.config.fps == 0 {
            return Err(SoundframeError::InvalidInput("export fps must be non-zero"));
        }

        self.stop.reset();
        self.playback.restart();
        self.playback.play();
        self.state = ExportState::Rendering;

        let mut encoder = match (self.new_encoder)() {
            Ok(encoder) => encoder,
            Err(error) => return Err(self.fail(error)),
        };
        let patch = EncoderConfigPatch::full(EncoderConfig::from_export(&self.config));
        let encoder_config = match encoder.configure(patch) {
            Ok(config) => config,
            Err(error) => return Err(self.fail(error)),
        };

        tracing::info!(
            fps = encoder_config.fps,
            width = encoder_config.width,
            height = encoder_config.height,
            bitrate = encoder_config.bitrate,
            codec = %encoder_config.codec,
            duration = self.playback.duration_seconds(),
            "export started"
        );

        self.session = Some(ExportSession {
            encoder,
            encoder_config,
            chunks: Vec::new(),
            frame_index: 0,
            frames_dropped: 0,
            last_keyframe_at: None,
            started_at: self.clock.now(),
        });

        if let Err(error) = self.render_frame() {
            return Err(self.fail(error));
        }
        Ok(())
    }

    /// One step of the render loop. Finalizes once the audio has ended or a
    /// stop was requested; does nothing outside `Rendering`.
    pub fn tick(&mut self) -> Result<ExportState> {
        if self.state != ExportState::Rendering {
            return Ok(self.state);
        }

        let collected = match self.session.as_mut() {
            Some(session) => session.collect(),
            None => Err(SoundframeError::msg("export session missing")),
        };
        if let Err(error) = collected {
            return Err(self.fail(error));
        }

        if self.stop.is_stopped() || self.playback.is_ended() {
            self.finalize()?;
            return Ok(self.state);
        }

        if let Err(error) = self.render_frame() {
            return Err(self.fail(error));
        }
        Ok(self.state)
    }

    /// Stops rendering and finalizes with the frames produced so far.
    pub fn stop(&mut self) -> Result<ExportState> {
        if self.state != ExportState::Rendering {
            return Err(SoundframeError::InvalidState {
                expected: ExportState::Rendering.name(),
                actual: self.state.name(),
            });
        }
        tracing::info!(frames = self.frame_index(), "export stopped early");
        self.finalize()?;
        Ok(self.state)
    }

    /// Starts if idle, then ticks at the configured rate until the export
    /// completes or fails.
    pub fn run(&mut self) -> Result<ExportSummary> {
        if self.state == ExportState::Idle {
            self.start()?;
        }

        while self.state == ExportState::Rendering {
            let deadline = match self.session.as_ref() {
                Some(session) => {
                    session.started_at + frame_offset(session.frame_index, self.config.fps)
                }
                None => break,
            };
            self.clock.sleep_until(deadline);
            self.tick()?;
        }

        match (self.state, self.summary) {
            (ExportState::Complete, Some(summary)) => Ok(summary),
            _ => Err(SoundframeError::InvalidState {
                expected: ExportState::Complete.name(),
                actual: self.state.name(),
            }),
        }
    }

    fn render_frame(&mut self) -> Result<()> {
        let fps = self.config.fps;
        let frame_duration_us = self.config.frame_duration_us();
        let keyframe_interval = Duration::from_millis(self.config.keyframe_interval_ms);
        let max_queue_depth = self.config.max_queue_depth;
        let now = self.clock.now();

        let (Some(session), Some(renderer)) = (self.session.as_mut(), self.renderer.as_mut())
        else {
            return Err(SoundframeError::RendererMissing);
        };

        let index = session.frame_index;
        let time_seconds = index as f64 / f64::from(fps);
        let timeline_fps = u64::from(self.features.timeline().fps());
        self.features
            .seek((index * timeline_fps / u64::from(fps)) as usize);
        let features =
            FrameFeatures::capture(&self.features, self.features.bands(), index, time_seconds);

        let surface = renderer.render(&features)?;
        let frame = VideoFrame::from_surface(surface, index * frame_duration_us, frame_duration_us);

        let keyframe = session
            .last_keyframe_at
            .map_or(true, |last| now.saturating_sub(last) >= keyframe_interval);

        let depth = session.encoder.queue_depth();
        if depth < max_queue_depth {
            session.encoder.submit(frame, keyframe)?;
            if keyframe {
                session.last_keyframe_at = Some(now);
            }
        } else {
            session.frames_dropped += 1;
            tracing::warn!(frame = index, depth, "encoder backlog, frame dropped");
        }

        session.frame_index += 1;
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        self.state = ExportState::Finalizing;
        self.playback.pause();

        let Some(mut session) = self.session.take() else {
            return Err(self.fail(SoundframeError::msg("export session missing")));
        };

        let flushed = session.encoder.flush();
        let stream = match flushed.and_then(|stream| session.collect().map(|()| stream)) {
            Ok(stream) => stream,
            Err(error) => return Err(self.fail(error)),
        };

        let duration_us = session.video_duration_us();
        let audio = self
            .playback
            .asset()
            .trimmed(duration_us as f64 / 1_000_000.0);
        let frames_encoded = session.chunks.len() as u64;

        let muxed = self.muxer.mux(MuxRequest {
            video: &stream,
            audio: &audio,
            encoder: &session.encoder_config,
            frame_count: frames_encoded,
            duration_us,
        });
        let muxed = match muxed {
            Ok(muxed) => muxed,
            Err(error) => return Err(self.fail(error)),
        };

        let summary = ExportSummary {
            frames_rendered: session.frame_index,
            frames_encoded,
            frames_dropped: session.frames_dropped,
            keyframes: session.chunks.iter().filter(|chunk| chunk.keyframe).count() as u64,
            duration_us,
            bytes: muxed.len() as u64,
        };
        tracing::info!(
            frames = summary.frames_encoded,
            dropped = summary.frames_dropped,
            keyframes = summary.keyframes,
            bytes = summary.bytes,
            "export complete"
        );

        self.output = Some(muxed);
        self.summary = Some(summary);
        self.state = ExportState::Complete;
        Ok(())
    }

    /// Moves to `Failed`, releasing the encoder and any partial output.
    fn fail(&mut self, error: SoundframeError) -> SoundframeError {
        debug_assert!(
            matches!(self.state, ExportState::Rendering | ExportState::Finalizing),
            "export cannot fail from {}",
            self.state.name()
        );
        tracing::error!(%error, state = self.state.name(), "export failed");
        self.playback.pause();
        self.session = None;
        self.output = None;
        self.summary = None;
        self.last_error = Some(error.to_string());
        self.state = ExportState::Failed;
        error
    }
}

impl<C> std::fmt::Debug for ExportPipeline<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportPipeline")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("has_renderer", &self.renderer.is_some())
            .field("summary", &self.summary)
            .finish()
    }
}

/// Offset of frame `index` from the session start. Computed from the index
/// rather than accumulated, so rounding never drifts.
fn frame_offset(index: u64, fps: u32) -> Duration {
    Duration::from_nanos(index.saturating_mul(1_000_000_000) / u64::from(fps.max(1)))
}
