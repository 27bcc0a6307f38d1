//! Fixed-capacity multi-channel sample FIFO.
//!
//! [`SampleRing`] bridges a producer and a consumer that work in blocks of
//! different sizes, e.g. 128-frame render quanta accumulating into a
//! 2048-frame analysis window. All storage is allocated up front so neither
//! [`SampleRing::push`] nor [`SampleRing::pull`] allocates.
//!
//! Overrun is lossy: when a push would exceed the unread capacity, the write
//! head keeps going and overwrites unread samples while the read head stays
//! where it was. The reader then sees a mix of newer and older samples rather
//! than the most recent contiguous block. Whether this should instead drop the
//! oldest contiguous frames is still an open question; the behaviour is kept
//! as is and pinned by `overrun_overwrites_in_place`.

/// One production/consumption unit: per-channel sample arrays of equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBlock {
    channels: Vec<Vec<f32>>,
}

impl SampleBlock {
    /// Creates a silent block.
    pub fn new(channel_count: usize, frames: usize) -> Self {
        Self {
            channels: vec![vec![0.0; frames]; channel_count],
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of frames, taken from the first channel.
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut [Vec<f32>] {
        &mut self.channels
    }

    /// Zeroes every channel in place.
    pub fn silence(&mut self) {
        for channel in &mut self.channels {
            channel.fill(0.0);
        }
    }
}

/// Circular buffer of per-channel float samples.
#[derive(Debug, Clone)]
pub struct SampleRing {
    channels: Vec<Vec<f32>>,
    capacity: usize,
    read_index: usize,
    write_index: usize,
    frames_available: usize,
}

impl SampleRing {
    pub fn new(channel_count: usize, capacity: usize) -> Self {
        Self {
            channels: vec![vec![0.0; capacity]; channel_count],
            capacity,
            read_index: 0,
            write_index: 0,
            frames_available: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Unread frames, saturating at [`capacity`](Self::capacity).
    pub fn frames_available(&self) -> usize {
        self.frames_available
    }

    /// Writes the block at the write head. The frame count comes from the
    /// first input channel; input channels beyond our channel count and
    /// samples missing from short channels are skipped.
    pub fn push<C: AsRef<[f32]>>(&mut self, input: &[C]) {
        let Some(first) = input.first() else {
            return;
        };
        if self.capacity == 0 {
            return;
        }

        let frames = first.as_ref().len();
        for (source, storage) in input.iter().zip(self.channels.iter_mut()) {
            let source = source.as_ref();
            for offset in 0..frames {
                if let Some(sample) = source.get(offset) {
                    storage[(self.write_index + offset) % self.capacity] = *sample;
                }
            }
        }

        self.write_index = (self.write_index + frames) % self.capacity;
        self.frames_available = (self.frames_available + frames).min(self.capacity);
    }

    /// Copies up to the destination length into `output`, starting at the read
    /// head. Returns the number of frames copied. When fewer frames are
    /// available only that prefix is written, so callers that need silence
    /// must zero the destination first.
    pub fn pull<C: AsMut<[f32]>>(&mut self, output: &mut [C]) -> usize {
        let Some(first) = output.first_mut() else {
            return 0;
        };

        let frames = first.as_mut().len().min(self.frames_available);
        if frames == 0 {
            return 0;
        }

        for (destination, storage) in output.iter_mut().zip(self.channels.iter()) {
            let destination = destination.as_mut();
            for offset in 0..frames {
                if let Some(slot) = destination.get_mut(offset) {
                    *slot = storage[(self.read_index + offset) % self.capacity];
                }
            }
        }

        self.read_index = (self.read_index + frames) % self.capacity;
        self.frames_available -= frames;
        frames
    }

    pub fn push_block(&mut self, block: &SampleBlock) {
        self.push(block.channels());
    }

    pub fn pull_block(&mut self, block: &mut SampleBlock) -> usize {
        self.pull(block.channels_mut())
    }
}
