use std::ops::RangeInclusive;

/// Average energy over a frequency range of a magnitude spectrum.
///
/// Frequencies map to bins with `round(frequency / nyquist * bin_count)`,
/// clamped to the last bin. The range is inclusive at both ends and the
/// order of the two frequencies does not matter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandEnergyQuery {
    sample_rate: f32,
    floor: Option<f32>,
}

impl BandEnergyQuery {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate as f32,
            floor: None,
        }
    }

    /// Replaces non-finite bins (silent bins of a dB spectrum) with `floor`
    /// so a single silent bin does not drag the average to negative infinity.
    pub fn with_floor(mut self, floor: f32) -> Self {
        self.floor = Some(floor);
        self
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Inclusive bin indices covered by the range, or `None` for an empty
    /// spectrum or a non-positive sample rate.
    pub fn bin_range(
        &self,
        bin_count: usize,
        min_frequency: f32,
        max_frequency: f32,
    ) -> Option<RangeInclusive<usize>> {
        let nyquist = self.sample_rate / 2.0;
        if bin_count == 0 || nyquist <= 0.0 {
            return None;
        }

        let (low, high) = if min_frequency > max_frequency {
            (max_frequency, min_frequency)
        } else {
            (min_frequency, max_frequency)
        };

        let last = bin_count - 1;
        let to_index = |frequency: f32| {
            let index = (frequency / nyquist * bin_count as f32).round();
            (index.max(0.0) as usize).min(last)
        };

        Some(to_index(low)..=to_index(high))
    }

    /// Arithmetic mean of `spectrum` over the bins of the range.
    pub fn energy(&self, spectrum: &[f32], min_frequency: f32, max_frequency: f32) -> f32 {
        let Some(range) = self.bin_range(spectrum.len(), min_frequency, max_frequency) else {
            return 0.0;
        };

        let bins = &spectrum[range];
        let sum: f32 = bins
            .iter()
            .map(|value| match self.floor {
                Some(floor) if !value.is_finite() => floor,
                _ => *value,
            })
            .sum();
        sum / bins.len() as f32
    }
}
