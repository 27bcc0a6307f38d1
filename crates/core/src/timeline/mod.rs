//! Offline, frame-indexed feature timelines.
//!
//! Offline rendering runs faster or slower than real time, so it cannot read
//! the live analyzer. Instead [`TrackTimelinePreprocessor`] walks a fully
//! decoded track once and bakes one spectrum and one normalised loudness per
//! output frame. The result is immutable and can be shared freely.

mod clock;

use std::{
    io::Read,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use serde::Serialize;

use crate::{
    analysis::{compute_rms, downmix_into, SpectrumAnalyzer, MAX_CHANNELS, PEAK_FLOOR},
    config::AnalysisConfig,
    Result, SoundframeError,
};

pub use clock::{Clock, ManualClock, SystemClock};

const PROGRESS_LOG_INTERVAL: usize = 600;

/// A whole track decoded to per-channel float samples.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTrack {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl DecodedTrack {
    /// Wraps planar samples. Only mono and stereo are accepted, and all
    /// channels must have the same length.
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Result<Self> {
        if sample_rate == 0 {
            return Err(SoundframeError::Decode("sample rate must be non-zero".into()));
        }
        if channels.is_empty() || channels.len() > MAX_CHANNELS {
            return Err(SoundframeError::Decode(format!(
                "unsupported channel count {}",
                channels.len()
            )));
        }
        let frames = channels[0].len();
        if channels.iter().any(|channel| channel.len() != frames) {
            return Err(SoundframeError::Decode("channels differ in length".into()));
        }

        Ok(Self {
            sample_rate,
            channels,
        })
    }

    /// Decodes a WAV file from disk.
    pub fn open_wav(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::read_wav(std::io::BufReader::new(file))
    }

    /// Decodes WAV data, integer or float. Integer samples are scaled to
    /// `[-1, 1)`.
    pub fn read_wav<R: Read>(reader: R) -> Result<Self> {
        let reader = hound::WavReader::new(reader)?;
        let spec = reader.spec();
        let channel_count = usize::from(spec.channels);
        if channel_count == 0 || channel_count > MAX_CHANNELS {
            return Err(SoundframeError::Decode(format!(
                "unsupported channel count {channel_count}"
            )));
        }

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|sample| sample.map(|value| value as f32 * scale))
                    .collect::<std::result::Result<_, _>>()?
            }
        };

        let mut channels =
            vec![Vec::with_capacity(interleaved.len() / channel_count); channel_count];
        for frame in interleaved.chunks_exact(channel_count) {
            for (channel, sample) in channels.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }

        tracing::debug!(
            sample_rate = spec.sample_rate,
            channels = channel_count,
            frames = channels[0].len(),
            "decoded wav"
        );
        Self::new(spec.sample_rate, channels)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Samples per channel.
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    /// Copy cut to at most `seconds` of audio.
    pub fn trimmed(&self, seconds: f64) -> Self {
        let keep = ((seconds.max(0.0) * f64::from(self.sample_rate)).round() as usize)
            .min(self.frames());
        Self {
            sample_rate: self.sample_rate,
            channels: self
                .channels
                .iter()
                .map(|channel| channel[..keep].to_vec())
                .collect(),
        }
    }
}

/// Per-bin magnitudes in dB for one frame; `fft_size / 2` bins.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectrumFrame(Vec<f32>);

impl SpectrumFrame {
    pub fn new(bins: Vec<f32>) -> Self {
        Self(bins)
    }

    pub fn bins(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineFrame {
    pub spectrum: SpectrumFrame,
    /// Normalised loudness in `[0, 1]`.
    pub loudness: f32,
}

/// Immutable feature timeline, indexed by output frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackTimeline {
    fps: u32,
    sample_rate: u32,
    fft_size: usize,
    peak_loudness: f32,
    frames: Vec<TimelineFrame>,
}

impl TrackTimeline {
    pub fn from_frames(
        fps: u32,
        sample_rate: u32,
        fft_size: usize,
        frames: Vec<TimelineFrame>,
    ) -> Self {
        Self {
            fps,
            sample_rate,
            fft_size,
            peak_loudness: PEAK_FLOOR,
            frames,
        }
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Highest raw loudness seen during preprocessing.
    pub fn peak_loudness(&self) -> f32 {
        self.peak_loudness
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[TimelineFrame] {
        &self.frames
    }

    pub fn frame(&self, index: usize) -> Option<&TimelineFrame> {
        self.frames.get(index)
    }

    /// Like [`frame`](Self::frame) but indices past the end read the last frame.
    pub fn frame_clamped(&self, index: usize) -> Option<&TimelineFrame> {
        self.frames.get(index.min(self.frames.len().saturating_sub(1)))
    }

    /// Frame covering `seconds` of playback.
    pub fn frame_at(&self, seconds: f64) -> Option<&TimelineFrame> {
        if seconds < 0.0 {
            return self.frames.first();
        }
        self.frame_clamped((seconds * f64::from(self.fps)).floor() as usize)
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frames.len() as f64 / f64::from(self.fps.max(1))
    }
}

/// Cooperative cancellation flag shared between a worker and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Bakes a [`TrackTimeline`] from a decoded track.
///
/// For frame `i` the window is centred on `i / fps` seconds, clamped to the
/// track and never shorter than `min_window` samples (unless the whole track
/// is shorter). The window is downmixed to mono, Blackman windowed and turned
/// into a dB spectrum. Loudness is the mean per-channel RMS of the raw slice,
/// normalised against the running peak of this run only.
#[derive(Debug, Clone)]
pub struct TrackTimelinePreprocessor {
    fft_size: usize,
    min_window: usize,
    cancel: Option<CancelToken>,
}

impl TrackTimelinePreprocessor {
    pub fn new(fft_size: usize, min_window: usize) -> Self {
        Self {
            fft_size,
            min_window,
            cancel: None,
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(config.fft_size, config.min_window)
    }

    /// Checks `token` once per frame and stops with
    /// [`SoundframeError::Cancelled`] when it fires.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn run(&self, track: &DecodedTrack, fps: u32) -> Result<TrackTimeline> {
        if fps == 0 {
            return Err(SoundframeError::InvalidInput("fps must be non-zero"));
        }

        let mut analyzer = SpectrumAnalyzer::new(self.fft_size)?;
        let total = track.frames();
        // Whole frames only, computed in integers so exact durations stay exact.
        let frame_count =
            (total as u64 * u64::from(fps) / u64::from(track.sample_rate())) as usize;
        let half = self.fft_size / 2;
        let min_window = self.min_window.min(total);

        tracing::info!(
            frames = frame_count,
            fps,
            fft_size = self.fft_size,
            duration = track.duration_seconds(),
            "preprocessing track timeline"
        );

        let mut mono = Vec::with_capacity(self.fft_size.max(min_window));
        let mut rms = [0.0_f32; MAX_CHANNELS];
        let mut peak = PEAK_FLOOR;
        let mut frames = Vec::with_capacity(frame_count);

        for index in 0..frame_count {
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                tracing::info!(completed = index, "timeline preprocessing cancelled");
                return Err(SoundframeError::Cancelled);
            }

            let centre = ((index as u64 * u64::from(track.sample_rate()) / u64::from(fps))
                as usize)
                .min(total);
            let mut start = centre.saturating_sub(half);
            let end = (start + self.fft_size).min(total);
            if end - start < min_window {
                start = end.saturating_sub(min_window);
            }

            let slices: [&[f32]; MAX_CHANNELS] = [
                track.channels()[0].get(start..end).unwrap_or_default(),
                track
                    .channels()
                    .get(1)
                    .and_then(|channel| channel.get(start..end))
                    .unwrap_or_default(),
            ];
            let slices = &slices[..track.channel_count()];

            mono.resize(end - start, 0.0);
            downmix_into(slices, &mut mono);

            let mut bins = Vec::with_capacity(analyzer.bin_count());
            analyzer.decibels_into(&mono, &mut bins)?;

            for (value, slice) in rms.iter_mut().zip(slices) {
                *value = compute_rms(slice);
            }
            let loudness = rms[..slices.len()].iter().sum::<f32>() / slices.len() as f32;
            peak = peak.max(loudness);

            frames.push(TimelineFrame {
                spectrum: SpectrumFrame::new(bins),
                loudness: (loudness / peak).clamp(0.0, 1.0),
            });

            if index > 0 && index % PROGRESS_LOG_INTERVAL == 0 {
                tracing::debug!(completed = index, total = frame_count, "timeline progress");
            }
        }

        tracing::info!(frames = frames.len(), peak, "timeline ready");
        Ok(TrackTimeline {
            fps,
            sample_rate: track.sample_rate(),
            fft_size: self.fft_size,
            peak_loudness: peak,
            frames,
        })
    }

    /// Runs [`run`](Self::run) on a dedicated thread.
    pub fn spawn(
        self,
        track: Arc<DecodedTrack>,
        fps: u32,
    ) -> Result<JoinHandle<Result<TrackTimeline>>> {
        let handle = std::thread::Builder::new()
            .name("timeline-preprocess".to_string())
            .spawn(move || self.run(&track, fps))?;
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use super::*;

    fn tone(
        sample_rate: u32,
        seconds: f32,
        frequency: f32,
        envelope: impl Fn(f32) -> f32,
    ) -> Vec<f32> {
        let len = (sample_rate as f32 * seconds) as usize;
        (0..len)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                envelope(t) * (2.0 * PI * frequency * t).sin()
            })
            .collect()
    }

    fn stereo_track() -> DecodedTrack {
        let left = tone(8_000, 1.0, 500.0, |t| 1.0 - t);
        let right = tone(8_000, 1.0, 1_000.0, |_| 0.25);
        DecodedTrack::new(8_000, vec![left, right]).unwrap()
    }

    #[test]
    fn produces_one_frame_per_output_frame() {
        let timeline = TrackTimelinePreprocessor::new(512, 256)
            .run(&stereo_track(), 30)
            .unwrap();

        assert_eq!(timeline.len(), 30);
        assert_eq!(timeline.fps(), 30);
        assert!(timeline
            .frames()
            .iter()
            .all(|frame| frame.spectrum.len() == 256));
        assert!(timeline
            .frames()
            .iter()
            .all(|frame| (0.0..=1.0).contains(&frame.loudness)));
    }

    #[test]
    fn frame_count_floors_partial_frames() {
        let track = DecodedTrack::new(1_000, vec![vec![0.1; 1_050]]).unwrap();
        let timeline = TrackTimelinePreprocessor::new(64, 32).run(&track, 10).unwrap();
        assert_eq!(timeline.len(), 10);

        // 4.1 s exactly; a float duration times fps lands just under 123.
        let track = DecodedTrack::new(48_000, vec![vec![0.1; 196_800]]).unwrap();
        let timeline = TrackTimelinePreprocessor::new(64, 32).run(&track, 30).unwrap();
        assert_eq!(timeline.len(), 123);
    }

    #[test]
    fn is_deterministic() {
        let track = stereo_track();
        let preprocessor = TrackTimelinePreprocessor::new(256, 128);
        let first = preprocessor.run(&track, 24).unwrap();
        let second = preprocessor.run(&track, 24).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn loudness_is_normalised_against_the_running_peak() {
        let mut samples = vec![0.5; 4_000];
        samples.extend(vec![0.25; 4_000]);
        let track = DecodedTrack::new(4_000, vec![samples]).unwrap();
        let timeline = TrackTimelinePreprocessor::new(64, 64).run(&track, 4).unwrap();

        assert_eq!(timeline.len(), 8);
        assert!((timeline.frame(0).unwrap().loudness - 1.0).abs() < 1e-6);
        assert!((timeline.frame(7).unwrap().loudness - 0.5).abs() < 1e-6);
        assert!((timeline.peak_loudness() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn spectrum_tracks_the_dominant_tone() {
        let samples = tone(8_000, 0.5, 1_000.0, |_| 1.0);
        let track = DecodedTrack::new(8_000, vec![samples]).unwrap();
        let timeline = TrackTimelinePreprocessor::new(256, 256).run(&track, 10).unwrap();

        // 1 kHz at 8 kHz over 256 points lands on bin 32.
        let bins = timeline.frame(2).unwrap().spectrum.bins();
        let loudest = bins
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(index, _)| index)
            .unwrap();
        assert_eq!(loudest, 32);
    }

    #[test]
    fn silent_tracks_yield_negative_infinity_bins() {
        let track = DecodedTrack::new(1_000, vec![vec![0.0; 1_000]]).unwrap();
        let timeline = TrackTimelinePreprocessor::new(64, 32).run(&track, 5).unwrap();
        let frame = timeline.frame(0).unwrap();
        assert!(frame.spectrum.bins().iter().all(|db| *db == f32::NEG_INFINITY));
        assert_eq!(frame.loudness, 0.0);
    }

    #[test]
    fn honours_cancellation() {
        let token = CancelToken::new();
        token.cancel();
        let result = TrackTimelinePreprocessor::new(256, 128)
            .with_cancel(token)
            .run(&stereo_track(), 30);
        assert!(matches!(result, Err(SoundframeError::Cancelled)));
    }

    #[test]
    fn runs_on_a_worker_thread() {
        let handle = TrackTimelinePreprocessor::new(128, 64)
            .spawn(Arc::new(stereo_track()), 12)
            .unwrap();
        let timeline = handle.join().unwrap().unwrap();
        assert_eq!(timeline.len(), 12);
    }

    #[test]
    fn rejects_unsupported_layouts() {
        assert!(DecodedTrack::new(44_100, vec![vec![0.0; 4]; 3]).is_err());
        assert!(DecodedTrack::new(44_100, vec![vec![0.0; 4], vec![0.0; 3]]).is_err());
        assert!(DecodedTrack::new(0, vec![vec![0.0; 4]]).is_err());
        assert!(TrackTimelinePreprocessor::new(64, 32)
            .run(&stereo_track(), 0)
            .is_err());
    }

    #[test]
    fn decodes_integer_wav() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..100 {
                writer.write_sample(i16::MAX / 2).unwrap();
                writer.write_sample(-(i16::MAX / 2)).unwrap();
            }
            writer.finalize().unwrap();
        }

        let track = DecodedTrack::read_wav(std::io::Cursor::new(cursor.into_inner())).unwrap();
        assert_eq!(track.channel_count(), 2);
        assert_eq!(track.frames(), 100);
        assert!((track.channels()[0][0] - 0.5).abs() < 1e-3);
        assert!((track.channels()[1][0] + 0.5).abs() < 1e-3);
    }

    #[test]
    fn rejects_corrupt_wav() {
        let result = DecodedTrack::read_wav(&b"not a wav file"[..]);
        assert!(matches!(result, Err(SoundframeError::Decode(_))));
    }

    #[test]
    fn trims_to_duration() {
        let track = stereo_track().trimmed(0.25);
        assert_eq!(track.frames(), 2_000);
        assert_eq!(track.channel_count(), 2);
    }

    #[test]
    fn frame_lookup_by_time() {
        let timeline = TrackTimelinePreprocessor::new(64, 32)
            .run(&stereo_track(), 10)
            .unwrap();
        assert_eq!(timeline.frame_at(0.35), timeline.frame(3));
        assert_eq!(timeline.frame_at(5.0), timeline.frame(9));
        assert_eq!(timeline.frame_at(-1.0), timeline.frame(0));
    }
}
