mod playback;

use std::sync::Arc;

pub use playback::{ClockedPlayback, PlaybackSource};

use crate::{
    analysis::{BandEnergyQuery, LiveLoudnessAnalyzer, LoudnessMonitor, SpectrumTap},
    config::AppConfig,
    mapping::{find_band, BandRange, FeatureSource, FrameFeatures, TimelineFeatures},
    timeline::{DecodedTrack, TrackTimeline, TrackTimelinePreprocessor},
    Result,
};

/// Mode enum describes where features come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioMode {
    /// Features follow the live analyzer.
    Live,
    /// Features are read from a precomputed track timeline.
    Precomputed,
}

/// Owner of all analysis state for one application.
///
/// Built once at startup and passed to whatever needs features; there is no
/// global analysis state. In live mode it holds the main-thread ends of the
/// analyzer channels, in precomputed mode the timeline of the loaded track.
#[derive(Debug)]
pub struct AudioEngine {
    mode: AudioMode,
    config: AppConfig,
    query: BandEnergyQuery,
    monitor: Option<LoudnessMonitor>,
    spectrum: Option<SpectrumTap>,
    track: Option<Arc<DecodedTrack>>,
    timeline: Option<TimelineFeatures>,
}

impl AudioEngine {
    pub fn new(config: AppConfig) -> Self {
        Self {
            mode: AudioMode::Live,
            query: BandEnergyQuery::new(config.audio.sample_rate),
            config,
            monitor: None,
            spectrum: None,
            track: None,
            timeline: None,
        }
    }

    /// Returns the currently active audio mode.
    pub fn mode(&self) -> AudioMode {
        self.mode
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn bands(&self) -> &[BandRange] {
        &self.config.analysis.bands
    }

    /// Starts a live analysis session for `config.audio.channels` input
    /// channels and returns the stage to move onto the processing thread. If
    /// the stage cannot be built the engine keeps running without it and
    /// reports zero loudness.
    pub fn start_live(&mut self) -> Option<LiveLoudnessAnalyzer> {
        let channel_count = self.config.audio.channels;
        self.mode = AudioMode::Live;
        self.monitor = None;
        self.spectrum = None;

        match LiveLoudnessAnalyzer::new(
            &self.config.analysis,
            channel_count,
            self.config.audio.render_quantum,
        ) {
            Ok((analyzer, handles)) => {
                tracing::info!(
                    channels = channel_count,
                    window = self.config.analysis.window_size,
                    quantum = self.config.audio.render_quantum,
                    "live analysis started"
                );
                self.monitor = Some(handles.monitor);
                self.spectrum = Some(handles.spectrum);
                Some(analyzer)
            }
            Err(error) => {
                tracing::warn!(%error, "live analysis unavailable");
                None
            }
        }
    }

    /// Main-thread analysis tick: drains analyzer messages and refreshes the
    /// spectrum snapshot. Never blocks.
    pub fn tick(&mut self) {
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.poll();
        }
        if let Some(spectrum) = self.spectrum.as_mut() {
            if let Err(error) = spectrum.refresh() {
                tracing::warn!(%error, "spectrum refresh failed");
            }
        }
    }

    /// Latest live magnitude spectrum; empty when live analysis is not running.
    pub fn spectrum(&self) -> &[f32] {
        self.spectrum
            .as_ref()
            .map(SpectrumTap::magnitudes)
            .unwrap_or_default()
    }

    /// Preprocesses `track` at `fps` and switches to precomputed mode.
    pub fn load_track(&mut self, track: DecodedTrack, fps: u32) -> Result<Arc<TrackTimeline>> {
        let timeline =
            TrackTimelinePreprocessor::from_config(&self.config.analysis).run(&track, fps)?;
        let timeline = Arc::new(timeline);
        self.install(Arc::new(track), timeline.clone());
        Ok(timeline)
    }

    /// Installs a track and its timeline, e.g. one preprocessed off-thread.
    pub fn install(&mut self, track: Arc<DecodedTrack>, timeline: Arc<TrackTimeline>) {
        self.timeline = Some(TimelineFeatures::new(timeline, self.bands().to_vec()));
        self.track = Some(track);
        self.mode = AudioMode::Precomputed;
    }

    pub fn track(&self) -> Option<&Arc<DecodedTrack>> {
        self.track.as_ref()
    }

    /// Independent reader over the loaded timeline, e.g. for an export.
    pub fn timeline_features(&self) -> Option<TimelineFeatures> {
        self.timeline.clone()
    }

    /// Moves the precomputed read position.
    pub fn seek_frame(&mut self, frame: usize) {
        if let Some(timeline) = self.timeline.as_mut() {
            timeline.seek(frame);
        }
    }

    pub fn frame_features(&self, frame_index: u64, time_seconds: f64) -> FrameFeatures {
        FrameFeatures::capture(self, self.bands(), frame_index, time_seconds)
    }
}

impl FeatureSource for AudioEngine {
    fn current_loudness(&self) -> f32 {
        match self.mode {
            AudioMode::Live => self
                .monitor
                .as_ref()
                .map(LoudnessMonitor::level)
                .unwrap_or(0.0),
            AudioMode::Precomputed => self
                .timeline
                .as_ref()
                .map(|timeline| timeline.current_loudness())
                .unwrap_or(0.0),
        }
    }

    fn band_energy(&self, name: &str) -> f32 {
        match self.mode {
            AudioMode::Live => find_band(self.bands(), name)
                .map(|band| self.query.energy(self.spectrum(), band.min_hz, band.max_hz))
                .unwrap_or(0.0),
            AudioMode::Precomputed => self
                .timeline
                .as_ref()
                .map(|timeline| timeline.band_energy(name))
                .unwrap_or(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use super::*;
    use crate::config::AnalysisConfig;

    fn engine(window: usize) -> AudioEngine {
        let mut config = AppConfig::default();
        config.audio.sample_rate = 8_000;
        config.analysis = AnalysisConfig {
            window_size: window,
            fft_size: window,
            min_window: window / 2,
            ..Default::default()
        };
        AudioEngine::new(config)
    }

    #[test]
    fn live_levels_reach_the_main_thread() {
        let mut engine = engine(256);
        assert_eq!(engine.config().audio.channels, 2);
        let mut analyzer = engine.start_live().expect("stereo input is supported");
        assert_eq!(engine.current_loudness(), 0.0);

        // 1 kHz sits in the "mid" band.
        let samples: Vec<f32> = (0..512)
            .map(|i| (2.0 * PI * 1_000.0 * i as f32 / 8_000.0).sin())
            .collect();
        let mut out = vec![vec![0.0_f32; 128]; 2];
        for chunk in samples.chunks(128) {
            analyzer.process(&[chunk, chunk], &mut out);
        }

        engine.tick();
        assert!((engine.current_loudness() - 1.0).abs() < 1e-6);
        assert!(engine.band_energy("mid") > engine.band_energy("sub"));
        assert_eq!(engine.band_energy("unknown"), 0.0);
    }

    #[test]
    fn failed_live_start_reads_as_silence() {
        let mut engine = engine(256);
        engine.config.audio.channels = 6;
        assert!(engine.start_live().is_none());

        engine.tick();
        assert_eq!(engine.current_loudness(), 0.0);
        assert_eq!(engine.band_energy("bass"), 0.0);
        assert!(engine.spectrum().is_empty());
    }

    #[test]
    fn precomputed_mode_reads_the_timeline() {
        let mut engine = engine(128);
        let mut samples = vec![0.2_f32; 4_000];
        samples.extend(vec![0.8_f32; 4_000]);
        let track = DecodedTrack::new(8_000, vec![samples]).unwrap();

        let timeline = engine.load_track(track, 10).unwrap();
        assert_eq!(engine.mode(), AudioMode::Precomputed);
        assert_eq!(timeline.len(), 10);

        engine.seek_frame(0);
        assert!((engine.current_loudness() - 1.0).abs() < 1e-6);
        engine.seek_frame(9);
        let features = engine.frame_features(9, 0.9);
        assert!((features.loudness - 1.0).abs() < 1e-6);
        assert_eq!(features.bands.len(), engine.bands().len());
        assert!(engine.track().is_some());
    }
}
