//! Pull-style feature access for the expression layer and the renderer.
//!
//! Consumers only ever see two questions: how loud is it right now, and how
//! much energy sits in a named band. [`FeatureSource`] answers them from
//! either live analysis ([`crate::AudioEngine`]) or a precomputed
//! [`TrackTimeline`] ([`TimelineFeatures`]).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{analysis::BandEnergyQuery, timeline::TrackTimeline};

/// Floor applied to silent dB bins when averaging timeline spectra.
pub const DB_FLOOR: f32 = -120.0;

/// A named frequency range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandRange {
    pub name: String,
    pub min_hz: f32,
    pub max_hz: f32,
}

impl BandRange {
    pub fn new(name: impl Into<String>, min_hz: f32, max_hz: f32) -> Self {
        Self {
            name: name.into(),
            min_hz,
            max_hz,
        }
    }

    /// Conventional split of the audible range.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("sub", 20.0, 60.0),
            Self::new("bass", 60.0, 250.0),
            Self::new("low_mid", 250.0, 500.0),
            Self::new("mid", 500.0, 2_000.0),
            Self::new("high_mid", 2_000.0, 4_000.0),
            Self::new("presence", 4_000.0, 6_000.0),
            Self::new("brilliance", 6_000.0, 20_000.0),
        ]
    }
}

pub(crate) fn find_band<'a>(bands: &'a [BandRange], name: &str) -> Option<&'a BandRange> {
    bands.iter().find(|band| band.name == name)
}

/// The two pull functions the expression layer consumes.
pub trait FeatureSource {
    /// Normalised loudness in `[0, 1]`.
    fn current_loudness(&self) -> f32;

    /// Average energy of the named band. Unknown names read as 0.0.
    fn band_energy(&self, name: &str) -> f32;
}

/// Feature snapshot handed to the renderer for one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameFeatures {
    pub frame_index: u64,
    pub time_seconds: f64,
    pub loudness: f32,
    pub bands: Vec<(String, f32)>,
}

impl FrameFeatures {
    /// Samples every band of `bands` from `source`.
    pub fn capture(
        source: &dyn FeatureSource,
        bands: &[BandRange],
        frame_index: u64,
        time_seconds: f64,
    ) -> Self {
        Self {
            frame_index,
            time_seconds,
            loudness: source.current_loudness(),
            bands: bands
                .iter()
                .map(|band| (band.name.clone(), source.band_energy(&band.name)))
                .collect(),
        }
    }

    pub fn band(&self, name: &str) -> Option<f32> {
        self.bands
            .iter()
            .find(|(band, _)| band == name)
            .map(|(_, energy)| *energy)
    }
}

impl FeatureSource for FrameFeatures {
    fn current_loudness(&self) -> f32 {
        self.loudness
    }

    fn band_energy(&self, name: &str) -> f32 {
        self.band(name).unwrap_or(0.0)
    }
}

/// Serves features from a precomputed timeline at a chosen frame.
#[derive(Debug, Clone)]
pub struct TimelineFeatures {
    timeline: Arc<TrackTimeline>,
    bands: Vec<BandRange>,
    query: BandEnergyQuery,
    frame: usize,
}

impl TimelineFeatures {
    pub fn new(timeline: Arc<TrackTimeline>, bands: Vec<BandRange>) -> Self {
        let query = BandEnergyQuery::new(timeline.sample_rate()).with_floor(DB_FLOOR);
        Self {
            timeline,
            bands,
            query,
            frame: 0,
        }
    }

    pub fn timeline(&self) -> &Arc<TrackTimeline> {
        &self.timeline
    }

    pub fn bands(&self) -> &[BandRange] {
        &self.bands
    }

    /// Moves the read position. Frames past the end read the last frame.
    pub fn seek(&mut self, frame: usize) {
        self.frame = frame;
    }

    pub fn frame(&self) -> usize {
        self.frame
    }

    /// Snapshot for `frame`, timestamped from the timeline's frame rate.
    pub fn frame_features(&mut self, frame: usize) -> FrameFeatures {
        self.seek(frame);
        let time_seconds = frame as f64 / f64::from(self.timeline.fps().max(1));
        FrameFeatures::capture(&*self, &self.bands, frame as u64, time_seconds)
    }
}

impl FeatureSource for TimelineFeatures {
    fn current_loudness(&self) -> f32 {
        self.timeline
            .frame_clamped(self.frame)
            .map(|frame| frame.loudness)
            .unwrap_or(0.0)
    }

    fn band_energy(&self, name: &str) -> f32 {
        let (Some(band), Some(frame)) = (
            find_band(&self.bands, name),
            self.timeline.frame_clamped(self.frame),
        ) else {
            return 0.0;
        };
        self.query
            .energy(frame.spectrum.bins(), band.min_hz, band.max_hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::{SpectrumFrame, TimelineFrame};

    fn timeline() -> Arc<TrackTimeline> {
        let frames = vec![
            TimelineFrame {
                spectrum: SpectrumFrame::new(vec![-10.0, -20.0, f32::NEG_INFINITY, -40.0]),
                loudness: 0.25,
            },
            TimelineFrame {
                spectrum: SpectrumFrame::new(vec![-1.0, -2.0, -3.0, -4.0]),
                loudness: 1.0,
            },
        ];
        Arc::new(TrackTimeline::from_frames(10, 800, 8, frames))
    }

    #[test]
    fn timeline_features_follow_the_frame() {
        let bands = vec![BandRange::new("low", 0.0, 100.0), BandRange::new("top", 300.0, 400.0)];
        let mut features = TimelineFeatures::new(timeline(), bands);

        let first = features.frame_features(0);
        assert_eq!(first.loudness, 0.25);
        assert_eq!(first.band("low"), Some(-15.0));
        assert_eq!(first.band("top"), Some(-40.0));

        let second = features.frame_features(1);
        assert_eq!(second.frame_index, 1);
        assert!((second.time_seconds - 0.1).abs() < 1e-9);
        assert_eq!(second.loudness, 1.0);
    }

    #[test]
    fn silent_bins_use_the_floor() {
        let bands = vec![BandRange::new("mid", 200.0, 200.0)];
        let features = TimelineFeatures::new(timeline(), bands);
        assert_eq!(features.band_energy("mid"), DB_FLOOR);
    }

    #[test]
    fn unknown_bands_read_as_zero() {
        let mut features = TimelineFeatures::new(timeline(), BandRange::defaults());
        let snapshot = features.frame_features(1);
        assert_eq!(features.band_energy("nope"), 0.0);
        assert_eq!(snapshot.band_energy("nope"), 0.0);
        assert_eq!(snapshot.bands.len(), BandRange::defaults().len());
    }

    #[test]
    fn seeking_past_the_end_holds_the_last_frame() {
        let mut features = TimelineFeatures::new(timeline(), Vec::new());
        features.seek(99);
        assert_eq!(features.current_loudness(), 1.0);
    }
}
