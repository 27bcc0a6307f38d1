use std::{fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use super::{blackman_value, to_decibels};
use crate::{Result, SoundframeError};

/// Windowed real FFT with all buffers allocated once.
///
/// Both output flavours cover `size / 2` bins; the Nyquist bin realfft also
/// produces is left out.
pub struct SpectrumAnalyzer {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl SpectrumAnalyzer {
    pub fn new(size: usize) -> Result<Self> {
        if size < 2 {
            return Err(SoundframeError::InvalidInput(
                "fft size must be at least two samples",
            ));
        }

        let plan = RealFftPlanner::<f32>::new().plan_fft_forward(size);
        let window = (0..size).map(|index| blackman_value(index, size)).collect();

        Ok(Self {
            size,
            input: plan.make_input_vec(),
            spectrum: plan.make_output_vec(),
            scratch: plan.make_scratch_vec(),
            window,
            plan,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of bins each spectrum carries.
    pub fn bin_count(&self) -> usize {
        self.size / 2
    }

    /// Fills `out` with per-bin magnitudes in dB. `samples` shorter than the
    /// FFT size are zero padded, longer ones truncated.
    pub fn decibels_into(&mut self, samples: &[f32], out: &mut Vec<f32>) -> Result<()> {
        self.transform(samples)?;
        out.clear();
        out.extend(
            self.spectrum[..self.size / 2]
                .iter()
                .map(|bin| to_decibels(bin.norm())),
        );
        Ok(())
    }

    /// Fills `out` with linear magnitudes normalised by the window length.
    pub fn magnitudes_into(&mut self, samples: &[f32], out: &mut Vec<f32>) -> Result<()> {
        self.transform(samples)?;
        let scale = 1.0 / self.size as f32;
        out.clear();
        out.extend(
            self.spectrum[..self.size / 2]
                .iter()
                .map(|bin| bin.norm() * scale),
        );
        Ok(())
    }

    fn transform(&mut self, samples: &[f32]) -> Result<()> {
        for (index, slot) in self.input.iter_mut().enumerate() {
            let sample = samples.get(index).copied().unwrap_or(0.0);
            *slot = sample * self.window[index];
        }

        self.plan
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)?;
        Ok(())
    }
}

impl fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("size", &self.size)
            .finish()
    }
}

/// Main-thread end of the live sample tap.
///
/// The processing thread forwards its mono downmix through a bounded
/// `rtrb` queue; [`SpectrumTap::refresh`] drains it once per display tick,
/// keeps the newest `fft_size` samples and recomputes the magnitude snapshot
/// that band queries read.
pub struct SpectrumTap {
    samples: rtrb::Consumer<f32>,
    history: Vec<f32>,
    analyzer: SpectrumAnalyzer,
    magnitudes: Vec<f32>,
}

impl SpectrumTap {
    pub(crate) fn new(samples: rtrb::Consumer<f32>, fft_size: usize) -> Result<Self> {
        let analyzer = SpectrumAnalyzer::new(fft_size)?;
        Ok(Self {
            samples,
            history: vec![0.0; fft_size],
            magnitudes: vec![0.0; analyzer.bin_count()],
            analyzer,
        })
    }

    /// Latest magnitude snapshot, as of the last [`refresh`](Self::refresh).
    pub fn magnitudes(&self) -> &[f32] {
        &self.magnitudes
    }

    /// Drains pending samples and recomputes the snapshot. Returns `false`
    /// when nothing new arrived and the previous snapshot was kept.
    pub fn refresh(&mut self) -> Result<bool> {
        let available = self.samples.slots();
        if available == 0 {
            return Ok(false);
        }

        let skip = available.saturating_sub(self.history.len());
        for _ in 0..skip {
            let _ = self.samples.pop();
        }

        let take = available - skip;
        self.history.drain(..take);
        for _ in 0..take {
            let sample = self.samples.pop().unwrap_or(0.0);
            self.history.push(sample);
        }

        self.analyzer
            .magnitudes_into(&self.history, &mut self.magnitudes)?;
        Ok(true)
    }
}

impl fmt::Debug for SpectrumTap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumTap")
            .field("analyzer", &self.analyzer)
            .field("pending", &self.samples.slots())
            .finish()
    }
}
