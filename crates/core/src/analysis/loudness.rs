use crate::{
    config::{AnalysisConfig, OutputMode},
    ring::{SampleBlock, SampleRing},
    Result, SoundframeError,
};

use super::{compute_rms, downmix_into, SpectrumTap, PEAK_FLOOR};

/// Inputs wider than stereo are not supported.
pub const MAX_CHANNELS: usize = 2;

/// Smoothed per-channel RMS plus the session peak used for normalisation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnessState {
    smoothed: [f32; MAX_CHANNELS],
    channel_count: usize,
    max_volume: f32,
    loudness: f32,
    level: f32,
}

impl LoudnessState {
    pub fn new(channel_count: usize) -> Self {
        Self {
            smoothed: [0.0; MAX_CHANNELS],
            channel_count: channel_count.min(MAX_CHANNELS),
            max_volume: PEAK_FLOOR,
            loudness: 0.0,
            level: 0.0,
        }
    }

    /// Starts a new session: smoothing and the running peak are forgotten.
    pub fn reset(&mut self) {
        *self = Self::new(self.channel_count);
    }

    /// Folds one window of per-channel RMS values in and returns the
    /// normalised level. Attack is instant, release decays by
    /// `decay_factor` per window.
    pub fn update(&mut self, rms: &[f32], decay_factor: f32) -> f32 {
        let count = self.channel_count;
        for (smoothed, value) in self.smoothed[..count].iter_mut().zip(rms) {
            *smoothed = value.max(*smoothed * decay_factor);
        }

        let active = &self.smoothed[..count];
        let loudest = active.iter().copied().fold(0.0_f32, f32::max);
        self.max_volume = self.max_volume.max(loudest);
        self.loudness = if count == 0 {
            0.0
        } else {
            active.iter().sum::<f32>() / count as f32
        };
        self.level = (self.loudness / self.max_volume).clamp(0.0, 1.0);
        self.level
    }

    pub fn smoothed(&self) -> &[f32] {
        &self.smoothed[..self.channel_count]
    }

    /// Mean of the smoothed channels, before normalisation.
    pub fn loudness(&self) -> f32 {
        self.loudness
    }

    pub fn max_volume(&self) -> f32 {
        self.max_volume
    }

    /// Loudness normalised against the session peak, in `[0, 1]`.
    pub fn level(&self) -> f32 {
        self.level
    }

    fn message(&self) -> LoudnessMessage {
        LoudnessMessage {
            level: self.level,
            loudness: self.loudness,
            channels: self.smoothed,
            channel_count: self.channel_count,
        }
    }
}

/// One analysis result sent from the processing thread. Plain `Copy` data so
/// nothing on the channel allocates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnessMessage {
    pub level: f32,
    pub loudness: f32,
    pub channels: [f32; MAX_CHANNELS],
    pub channel_count: usize,
}

impl LoudnessMessage {
    pub fn smoothed(&self) -> &[f32] {
        &self.channels[..self.channel_count.min(MAX_CHANNELS)]
    }
}

/// Main-thread end of the loudness channel.
pub struct LoudnessMonitor {
    messages: rtrb::Consumer<LoudnessMessage>,
    latest: Option<LoudnessMessage>,
}

impl LoudnessMonitor {
    /// Drains every pending message and keeps the newest.
    pub fn poll(&mut self) -> Option<LoudnessMessage> {
        while let Ok(message) = self.messages.pop() {
            self.latest = Some(message);
        }
        self.latest
    }

    pub fn latest(&self) -> Option<LoudnessMessage> {
        self.latest
    }

    /// Latest normalised level, or 0.0 before the first window arrives.
    pub fn level(&self) -> f32 {
        self.latest.map(|message| message.level).unwrap_or(0.0)
    }
}

impl std::fmt::Debug for LoudnessMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoudnessMonitor")
            .field("latest", &self.latest)
            .finish()
    }
}

/// Main-thread handles returned alongside a [`LiveLoudnessAnalyzer`].
#[derive(Debug)]
pub struct LiveHandles {
    pub monitor: LoudnessMonitor,
    pub spectrum: SpectrumTap,
}

/// Real-time loudness stage.
///
/// Each [`process`](Self::process) call takes one render quantum. Quanta
/// accumulate in an input ring until a full analysis window is available;
/// that window is measured, reported over the message channel, forwarded to
/// the spectrum tap, and pushed to the output ring that feeds playthrough.
/// After construction nothing here allocates, blocks, or logs.
pub struct LiveLoudnessAnalyzer {
    input: SampleRing,
    output: SampleRing,
    window: SampleBlock,
    mono: Vec<f32>,
    rms: [f32; MAX_CHANNELS],
    state: LoudnessState,
    decay_factor: f32,
    output_mode: OutputMode,
    messages: rtrb::Producer<LoudnessMessage>,
    tap: rtrb::Producer<f32>,
}

impl LiveLoudnessAnalyzer {
    pub fn new(
        config: &AnalysisConfig,
        channel_count: usize,
        render_quantum: usize,
    ) -> Result<(Self, LiveHandles)> {
        if channel_count == 0 || channel_count > MAX_CHANNELS {
            return Err(SoundframeError::InvalidInput(
                "live analysis supports mono or stereo input",
            ));
        }
        if render_quantum == 0 || config.window_size < render_quantum {
            return Err(SoundframeError::InvalidInput(
                "analysis window must hold at least one render quantum",
            ));
        }
        if !(config.decay_factor > 0.0 && config.decay_factor <= 1.0) {
            return Err(SoundframeError::InvalidInput(
                "decay factor must lie in (0, 1]",
            ));
        }

        let output_channels = match config.output {
            OutputMode::Mono => 1,
            OutputMode::PassThrough => channel_count,
        };

        let (messages, consumer) = rtrb::RingBuffer::new(config.message_capacity.max(1));
        let (tap, tap_consumer) = rtrb::RingBuffer::new(config.tap_capacity.max(1));
        let spectrum = SpectrumTap::new(tap_consumer, config.fft_size)?;

        let analyzer = Self {
            input: SampleRing::new(channel_count, config.window_size),
            output: SampleRing::new(output_channels, config.window_size * 2),
            window: SampleBlock::new(channel_count, config.window_size),
            mono: vec![0.0; config.window_size],
            rms: [0.0; MAX_CHANNELS],
            state: LoudnessState::new(channel_count),
            decay_factor: config.decay_factor,
            output_mode: config.output,
            messages,
            tap,
        };

        let handles = LiveHandles {
            monitor: LoudnessMonitor {
                messages: consumer,
                latest: None,
            },
            spectrum,
        };

        Ok((analyzer, handles))
    }

    pub fn channel_count(&self) -> usize {
        self.input.channel_count()
    }

    pub fn state(&self) -> &LoudnessState {
        &self.state
    }

    /// Forgets smoothing and the session peak, e.g. when a new track starts.
    pub fn reset(&mut self) {
        self.state.reset();
    }

    /// Processes one render quantum. `output` is zeroed and then filled from
    /// the output ring, so it stays silent until the first window has been
    /// analysed. Returns the level when this call completed a window.
    pub fn process<I, O>(&mut self, input: &[I], output: &mut [O]) -> Option<f32>
    where
        I: AsRef<[f32]>,
        O: AsMut<[f32]>,
    {
        self.input.push(input);

        let level = if self.input.frames_available() >= self.input.capacity() {
            Some(self.analyze_window())
        } else {
            None
        };

        for channel in output.iter_mut() {
            channel.as_mut().fill(0.0);
        }
        let pulled = self.output.pull(output);

        if self.output_mode == OutputMode::Mono {
            if let Some((first, rest)) = output.split_first_mut() {
                let first = first.as_mut();
                for channel in rest {
                    for (out, sample) in channel.as_mut().iter_mut().zip(&first[..pulled]) {
                        *out = *sample;
                    }
                }
            }
        }

        level
    }

    fn analyze_window(&mut self) -> f32 {
        self.window.silence();
        self.input.pull_block(&mut self.window);

        let channel_count = self.window.channel_count();
        for (rms, channel) in self.rms.iter_mut().zip(self.window.channels()) {
            *rms = compute_rms(channel);
        }

        let level = self
            .state
            .update(&self.rms[..channel_count], self.decay_factor);
        // A full channel means the main thread is behind; it only needs the newest value.
        let _ = self.messages.push(self.state.message());

        downmix_into(self.window.channels(), &mut self.mono);
        match self.output_mode {
            OutputMode::Mono => self.output.push(&[self.mono.as_slice()]),
            OutputMode::PassThrough => self.output.push_block(&self.window),
        }

        for sample in &self.mono {
            if self.tap.push(*sample).is_err() {
                break;
            }
        }

        level
    }
}

impl std::fmt::Debug for LiveLoudnessAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveLoudnessAnalyzer")
            .field("channels", &self.input.channel_count())
            .field("window", &self.input.capacity())
            .field("output_mode", &self.output_mode)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(window_size: usize, output: OutputMode) -> AnalysisConfig {
        AnalysisConfig {
            window_size,
            fft_size: window_size,
            output,
            ..Default::default()
        }
    }

    fn feed(
        analyzer: &mut LiveLoudnessAnalyzer,
        amplitude: f32,
        quanta: usize,
        quantum: usize,
    ) -> Vec<f32> {
        let channels = analyzer.channel_count();
        let block = vec![vec![amplitude; quantum]; channels];
        let mut out = vec![vec![0.0_f32; quantum]; channels];
        (0..quanta)
            .filter_map(|_| analyzer.process(&block, &mut out))
            .collect()
    }

    #[test]
    fn reports_once_per_window() {
        let (mut analyzer, mut handles) =
            LiveLoudnessAnalyzer::new(&config(512, OutputMode::PassThrough), 2, 128).unwrap();

        let levels = feed(&mut analyzer, 0.5, 8, 128);
        assert_eq!(levels.len(), 2);
        assert!((levels[0] - 1.0).abs() < 1e-6);

        let message = handles.monitor.poll().unwrap();
        assert!((message.loudness - 0.5).abs() < 1e-6);
        assert_eq!(message.smoothed().len(), 2);
        assert!((handles.monitor.level() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn decays_no_faster_than_the_decay_factor() {
        let decay = 0.8;
        let cfg = AnalysisConfig {
            decay_factor: decay,
            ..config(256, OutputMode::PassThrough)
        };
        let (mut analyzer, mut handles) = LiveLoudnessAnalyzer::new(&cfg, 1, 128).unwrap();

        let mut previous = None;
        for amplitude in [1.0, 0.6, 0.3, 0.1, 0.0, 0.0] {
            feed(&mut analyzer, amplitude, 2, 128);
            let loudness = handles.monitor.poll().unwrap().loudness;
            if let Some(previous) = previous {
                assert!(loudness >= previous * decay - 1e-6);
            }
            previous = Some(loudness);
        }
        assert!(analyzer.state().max_volume() >= 1.0 - 1e-6);
    }

    #[test]
    fn output_is_silent_until_primed() {
        let (mut analyzer, _handles) =
            LiveLoudnessAnalyzer::new(&config(256, OutputMode::PassThrough), 1, 128).unwrap();

        let block = [vec![0.25_f32; 128]];
        let mut out = [vec![1.0_f32; 128]];

        analyzer.process(&block, &mut out);
        assert!(out[0].iter().all(|sample| *sample == 0.0));

        analyzer.process(&block, &mut out);
        assert!(out[0].iter().all(|sample| *sample == 0.25));
    }

    #[test]
    fn mono_output_downmixes_and_duplicates() {
        let (mut analyzer, _handles) =
            LiveLoudnessAnalyzer::new(&config(128, OutputMode::Mono), 2, 128).unwrap();

        let block = [vec![1.0_f32; 128], vec![0.0_f32; 128]];
        let mut out = [vec![0.0_f32; 128], vec![0.0_f32; 128]];
        analyzer.process(&block, &mut out);

        assert!(out[0].iter().all(|sample| *sample == 0.5));
        assert!(out[1].iter().all(|sample| *sample == 0.5));
    }

    #[test]
    fn forwards_windows_to_the_spectrum_tap() {
        let (mut analyzer, mut handles) =
            LiveLoudnessAnalyzer::new(&config(256, OutputMode::PassThrough), 1, 128).unwrap();
        feed(&mut analyzer, 0.5, 2, 128);

        assert!(handles.spectrum.refresh().unwrap());
        assert!(handles.spectrum.magnitudes()[0] > 0.0);
    }

    #[test]
    fn reset_forgets_the_session_peak() {
        let (mut analyzer, _handles) =
            LiveLoudnessAnalyzer::new(&config(128, OutputMode::PassThrough), 1, 128).unwrap();
        feed(&mut analyzer, 1.0, 1, 128);
        analyzer.reset();

        let levels = feed(&mut analyzer, 0.1, 1, 128);
        assert!((levels[0] - 1.0).abs() < 1e-6);
        assert!((analyzer.state().max_volume() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn rejects_unsupported_layouts() {
        let cfg = config(256, OutputMode::PassThrough);
        assert!(LiveLoudnessAnalyzer::new(&cfg, 3, 128).is_err());
        assert!(LiveLoudnessAnalyzer::new(&cfg, 2, 512).is_err());
        assert!(LiveLoudnessAnalyzer::new(
            &AnalysisConfig {
                decay_factor: 0.0,
                ..cfg
            },
            2,
            128
        )
        .is_err());
    }

    #[test]
    fn state_floor_prevents_division_by_zero() {
        let mut state = LoudnessState::new(2);
        assert_eq!(state.update(&[0.0, 0.0], 0.9), 0.0);
        assert_eq!(state.max_volume(), PEAK_FLOOR);
    }
}
