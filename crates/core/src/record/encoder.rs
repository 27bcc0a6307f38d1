use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use crossbeam::channel::{self, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::{config::ExportConfig, render::Surface, Result, SoundframeError};

/// One captured frame awaiting encoding. Pixels are RGBA8.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub timestamp_us: u64,
    pub duration_us: u64,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl VideoFrame {
    pub fn from_surface(surface: Surface, timestamp_us: u64, duration_us: u64) -> Self {
        Self {
            timestamp_us,
            duration_us,
            width: surface.width(),
            height: surface.height(),
            pixels: surface.into_pixels(),
        }
    }
}

/// Encoded payload of one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedChunk {
    pub data: Vec<u8>,
    pub timestamp_us: u64,
    pub duration_us: u64,
    pub keyframe: bool,
}

impl EncodedChunk {
    pub fn info(&self) -> ChunkInfo {
        ChunkInfo {
            timestamp_us: self.timestamp_us,
            duration_us: self.duration_us,
            keyframe: self.keyframe,
            byte_len: self.data.len(),
        }
    }
}

/// Chunk metadata reported back to the export session. Payloads stay with
/// the encoder until the stream is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    pub timestamp_us: u64,
    pub duration_us: u64,
    pub keyframe: bool,
    pub byte_len: usize,
}

/// Complete encoder configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
    pub fps: u32,
}

impl EncoderConfig {
    /// Configuration for an export, dimensions rounded up to even.
    pub fn from_export(config: &ExportConfig) -> Self {
        let (width, height) = config.even_dimensions();
        Self {
            codec: config.codec.clone(),
            width,
            height,
            bitrate: config.bitrate,
            fps: config.fps,
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self::from_export(&ExportConfig::default())
    }
}

/// Partial configuration update; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncoderConfigPatch {
    pub codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bitrate: Option<u32>,
    pub fps: Option<u32>,
}

impl EncoderConfigPatch {
    /// Patch that sets every field, e.g. from [`EncoderConfig::from_export`].
    pub fn full(config: EncoderConfig) -> Self {
        Self {
            codec: Some(config.codec),
            width: Some(config.width),
            height: Some(config.height),
            bitrate: Some(config.bitrate),
            fps: Some(config.fps),
        }
    }

    pub fn apply_to(self, mut config: EncoderConfig) -> EncoderConfig {
        if let Some(codec) = self.codec {
            config.codec = codec;
        }
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(bitrate) = self.bitrate {
            config.bitrate = bitrate;
        }
        if let Some(fps) = self.fps {
            config.fps = fps;
        }
        config
    }
}

/// Messages sent to the encoder worker.
#[derive(Debug)]
pub enum EncoderRequest {
    UpdateEncoderConfig(EncoderConfigPatch),
    EncodeFrame { frame: VideoFrame, keyframe: bool },
    RequestAllEncodedFrames,
}

/// Messages sent back by the encoder worker, in the order work completed.
#[derive(Debug)]
pub enum EncoderEvent {
    Configured(EncoderConfig),
    Chunk(ChunkInfo),
    /// Every chunk payload so far, concatenated in encode order.
    AllEncodedFrames(Vec<u8>),
    Error(String),
}

/// The codec proper. Runs on the encoder worker thread.
pub trait VideoCodec: Send {
    fn configure(&mut self, config: &EncoderConfig) -> Result<()>;

    fn encode(&mut self, frame: &VideoFrame, keyframe: bool) -> Result<Vec<u8>>;
}

/// Asynchronous encoder as seen by the export session.
///
/// [`submit`](Self::submit) returns immediately; completions are collected
/// with [`poll`](Self::poll). [`flush`](Self::flush) waits for every
/// in-flight frame and returns the elementary stream.
pub trait VideoEncoder {
    fn configure(&mut self, patch: EncoderConfigPatch) -> Result<EncoderConfig>;

    fn submit(&mut self, frame: VideoFrame, keyframe: bool) -> Result<()>;

    /// Frames submitted but not yet encoded.
    fn queue_depth(&self) -> usize;

    /// Chunks completed since the last poll, in encode order.
    fn poll(&mut self) -> Result<Vec<ChunkInfo>>;

    fn flush(&mut self) -> Result<Vec<u8>>;
}

/// [`VideoEncoder`] that runs a [`VideoCodec`] on a dedicated thread and talks
/// to it only through [`EncoderRequest`] / [`EncoderEvent`] messages.
pub struct WorkerEncoder {
    requests: Option<Sender<EncoderRequest>>,
    events: Receiver<EncoderEvent>,
    in_flight: Arc<AtomicUsize>,
    pending: Vec<ChunkInfo>,
    worker: Option<JoinHandle<()>>,
}

impl WorkerEncoder {
    pub fn spawn<V: VideoCodec + 'static>(codec: V) -> Result<Self> {
        let (requests, request_rx) = channel::unbounded();
        let (event_tx, events) = channel::unbounded();
        let in_flight = Arc::new(AtomicUsize::new(0));

        let worker_in_flight = in_flight.clone();
        let worker = std::thread::Builder::new()
            .name("video-encoder".to_string())
            .spawn(move || run_worker(codec, request_rx, event_tx, worker_in_flight))?;

        Ok(Self {
            requests: Some(requests),
            events,
            in_flight,
            pending: Vec::new(),
            worker: Some(worker),
        })
    }

    fn send(&self, request: EncoderRequest) -> Result<()> {
        self.requests
            .as_ref()
            .ok_or_else(|| SoundframeError::Encoder("encoder closed".into()))?
            .send(request)
            .map_err(|_| SoundframeError::Encoder("encoder worker exited".into()))
    }

    fn recv(&self) -> Result<EncoderEvent> {
        self.events
            .recv()
            .map_err(|_| SoundframeError::Encoder("encoder worker exited".into()))
    }
}

impl VideoEncoder for WorkerEncoder {
    fn configure(&mut self, patch: EncoderConfigPatch) -> Result<EncoderConfig> {
        self.send(EncoderRequest::UpdateEncoderConfig(patch))?;
        loop {
            match self.recv()? {
                EncoderEvent::Configured(config) => return Ok(config),
                EncoderEvent::Chunk(info) => self.pending.push(info),
                EncoderEvent::Error(message) => return Err(SoundframeError::Encoder(message)),
                EncoderEvent::AllEncodedFrames(_) => {}
            }
        }
    }

    fn submit(&mut self, frame: VideoFrame, keyframe: bool) -> Result<()> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let sent = self.send(EncoderRequest::EncodeFrame { frame, keyframe });
        if sent.is_err() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        sent
    }

    fn queue_depth(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn poll(&mut self) -> Result<Vec<ChunkInfo>> {
        while let Ok(event) = self.events.try_recv() {
            match event {
                EncoderEvent::Chunk(info) => self.pending.push(info),
                EncoderEvent::Error(message) => return Err(SoundframeError::Encoder(message)),
                EncoderEvent::Configured(_) | EncoderEvent::AllEncodedFrames(_) => {}
            }
        }
        Ok(std::mem::take(&mut self.pending))
    }

    fn flush(&mut self) -> Result<Vec<u8>> {
        self.send(EncoderRequest::RequestAllEncodedFrames)?;
        loop {
            match self.recv()? {
                EncoderEvent::AllEncodedFrames(stream) => return Ok(stream),
                EncoderEvent::Chunk(info) => self.pending.push(info),
                EncoderEvent::Error(message) => return Err(SoundframeError::Encoder(message)),
                EncoderEvent::Configured(_) => {}
            }
        }
    }
}

impl Drop for WorkerEncoder {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop.
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("encoder worker panicked");
            }
        }
    }
}

impl std::fmt::Debug for WorkerEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerEncoder")
            .field("in_flight", &self.queue_depth())
            .field("pending", &self.pending.len())
            .finish()
    }
}

fn run_worker<V: VideoCodec>(
    mut codec: V,
    requests: Receiver<EncoderRequest>,
    events: Sender<EncoderEvent>,
    in_flight: Arc<AtomicUsize>,
) {
    let mut config = EncoderConfig::default();
    let mut stream = Vec::new();

    for request in requests {
        let event = match request {
            EncoderRequest::UpdateEncoderConfig(patch) => {
                let updated = patch.apply_to(config.clone());
                match codec.configure(&updated) {
                    Ok(()) => {
                        config = updated;
                        EncoderEvent::Configured(config.clone())
                    }
                    Err(error) => EncoderEvent::Error(error.to_string()),
                }
            }
            EncoderRequest::EncodeFrame { frame, keyframe } => {
                let result = codec.encode(&frame, keyframe);
                in_flight.fetch_sub(1, Ordering::SeqCst);
                match result {
                    Ok(data) => {
                        let chunk = EncodedChunk {
                            data,
                            timestamp_us: frame.timestamp_us,
                            duration_us: frame.duration_us,
                            keyframe,
                        };
                        stream.extend_from_slice(&chunk.data);
                        EncoderEvent::Chunk(chunk.info())
                    }
                    Err(error) => EncoderEvent::Error(error.to_string()),
                }
            }
            EncoderRequest::RequestAllEncodedFrames => {
                EncoderEvent::AllEncodedFrames(std::mem::take(&mut stream))
            }
        };

        if events.send(event).is_err() {
            break;
        }
    }

    tracing::debug!("encoder worker stopped");
}

const CHUNK_MAGIC: [u8; 2] = *b"XD";
const CHUNK_HEADER_LEN: usize = 16;
/// Longest repeated-byte run a single packed token can describe.
const MAX_RUN: usize = 129;
/// Longest literal stretch a single packed token can carry.
const MAX_LITERAL: usize = 128;
/// Coarsest quantizer step: colour channels keep their top two bits.
const MAX_QUANT_SHIFT: u8 = 6;

/// Lossy delta codec with run-length packing.
///
/// Keyframes carry the quantized frame, delta frames the XOR against the
/// previously reconstructed frame, so static regions come out as zero runs.
/// Payloads are packed PackBits style: a control byte below 0x80 is followed
/// by `control + 1` literal bytes, one at or above 0x80 by a single byte
/// repeated `control - 0x80 + 2` times.
///
/// Each chunk starts with a 16-byte header: magic `XD`, keyframe flag, the
/// quantizer shift, then width, height and packed payload length as
/// little-endian `u32`s.
///
/// Rate control targets `bitrate / 8 / fps` bytes per chunk. A chunk over
/// budget coarsens the quantizer for the next frame and a chunk under half
/// the budget refines it. Alpha is never quantized.
#[derive(Debug, Default)]
pub struct XorDeltaCodec {
    config: Option<EncoderConfig>,
    previous: Option<Vec<u8>>,
    quant_shift: u8,
}

impl XorDeltaCodec {
    pub const NAME: &'static str = "xor-rle";

    pub fn new() -> Self {
        Self::default()
    }

    /// Current quantizer shift applied to colour channels.
    pub fn quant_shift(&self) -> u8 {
        self.quant_shift
    }

    fn chunk_budget(config: &EncoderConfig) -> usize {
        (u64::from(config.bitrate) / 8 / u64::from(config.fps.max(1))) as usize
    }

    fn adapt(&mut self, chunk_len: usize, budget: usize) {
        if chunk_len > budget && self.quant_shift < MAX_QUANT_SHIFT {
            self.quant_shift += 1;
            tracing::trace!(shift = self.quant_shift, chunk_len, budget, "quantizer coarsened");
        } else if chunk_len * 2 < budget && self.quant_shift > 0 {
            self.quant_shift -= 1;
            tracing::trace!(shift = self.quant_shift, chunk_len, budget, "quantizer refined");
        }
    }
}

impl VideoCodec for XorDeltaCodec {
    fn configure(&mut self, config: &EncoderConfig) -> Result<()> {
        if config.codec != Self::NAME {
            return Err(SoundframeError::Encoder(format!(
                "unsupported codec `{}`",
                config.codec
            )));
        }
        let even = |value: u32| value > 0 && value % 2 == 0;
        if !even(config.width) || !even(config.height) {
            return Err(SoundframeError::Encoder(format!(
                "invalid dimensions {}x{}",
                config.width, config.height
            )));
        }
        if config.fps == 0 {
            return Err(SoundframeError::Encoder("fps must be non-zero".into()));
        }
        if config.bitrate == 0 {
            return Err(SoundframeError::Encoder("bitrate must be non-zero".into()));
        }

        self.config = Some(config.clone());
        self.previous = None;
        self.quant_shift = 0;
        Ok(())
    }

    fn encode(&mut self, frame: &VideoFrame, keyframe: bool) -> Result<Vec<u8>> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| SoundframeError::Encoder("encoder used before configure".into()))?;
        if frame.width != config.width || frame.height != config.height {
            return Err(SoundframeError::Encoder(format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width, frame.height, config.width, config.height
            )));
        }
        let budget = Self::chunk_budget(config);

        let reconstructed = quantize(&frame.pixels, self.quant_shift);
        let mut chunk = Vec::with_capacity(CHUNK_HEADER_LEN + budget.min(reconstructed.len()));
        chunk.extend_from_slice(&CHUNK_MAGIC);
        chunk.push(u8::from(keyframe));
        chunk.push(self.quant_shift);
        chunk.extend_from_slice(&frame.width.to_le_bytes());
        chunk.extend_from_slice(&frame.height.to_le_bytes());
        chunk.extend_from_slice(&[0; 4]);

        match (&self.previous, keyframe) {
            (_, true) => pack_runs(&reconstructed, &mut chunk),
            (Some(previous), false) => {
                let delta: Vec<u8> = previous
                    .iter()
                    .zip(&reconstructed)
                    .map(|(before, now)| before ^ now)
                    .collect();
                pack_runs(&delta, &mut chunk);
            }
            (None, false) => {
                return Err(SoundframeError::Encoder(
                    "delta frame requested before any keyframe".into(),
                ))
            }
        }

        let payload_len = (chunk.len() - CHUNK_HEADER_LEN) as u32;
        chunk[12..CHUNK_HEADER_LEN].copy_from_slice(&payload_len.to_le_bytes());

        self.previous = Some(reconstructed);
        self.adapt(chunk.len(), budget);
        Ok(chunk)
    }
}

/// Drops the low `shift` bits of every colour channel, leaving alpha intact.
fn quantize(pixels: &[u8], shift: u8) -> Vec<u8> {
    if shift == 0 {
        return pixels.to_vec();
    }
    let mask = u8::MAX << shift;
    pixels
        .iter()
        .enumerate()
        .map(|(index, byte)| if index % 4 == 3 { *byte } else { byte & mask })
        .collect()
}

fn run_length(data: &[u8]) -> usize {
    let first = data[0];
    data.iter()
        .take(MAX_RUN)
        .take_while(|byte| **byte == first)
        .count()
}

fn pack_runs(data: &[u8], out: &mut Vec<u8>) {
    let mut index = 0;
    while index < data.len() {
        let run = run_length(&data[index..]);
        if run >= 2 {
            out.push(0x80 | (run - 2) as u8);
            out.push(data[index]);
            index += run;
            continue;
        }

        let start = index;
        while index < data.len()
            && index - start < MAX_LITERAL
            && run_length(&data[index..]) < 2
        {
            index += 1;
        }
        out.push((index - start - 1) as u8);
        out.extend_from_slice(&data[start..index]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(width: u32, height: u32) -> EncoderConfigPatch {
        EncoderConfigPatch::full(EncoderConfig::from_export(&ExportConfig {
            width,
            height,
            fps: 10,
            ..Default::default()
        }))
    }

    fn frame(index: u64, fill: u8) -> VideoFrame {
        sized_frame(index, 2, vec![fill; 16])
    }

    fn sized_frame(index: u64, side: u32, pixels: Vec<u8>) -> VideoFrame {
        VideoFrame {
            timestamp_us: index * 100_000,
            duration_us: 100_000,
            width: side,
            height: side,
            pixels,
        }
    }

    /// Opaque pixels whose colour channels hold low-bit noise below 16.
    fn noisy_pixels(side: u32, seed: &mut u32) -> Vec<u8> {
        (0..side * side * 4)
            .map(|index| {
                *seed ^= *seed << 13;
                *seed ^= *seed >> 17;
                *seed ^= *seed << 5;
                if index % 4 == 3 {
                    255
                } else {
                    (*seed % 16) as u8
                }
            })
            .collect()
    }

    fn codec_with(side: u32, bitrate: u32) -> XorDeltaCodec {
        let mut config = config(side, side).apply_to(EncoderConfig::default());
        config.bitrate = bitrate;
        let mut codec = XorDeltaCodec::new();
        codec.configure(&config).unwrap();
        codec
    }

    fn unpack_runs(packed: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut index = 0;
        while index < packed.len() {
            let control = packed[index] as usize;
            if control >= 0x80 {
                out.extend(std::iter::repeat(packed[index + 1]).take(control - 0x80 + 2));
                index += 2;
            } else {
                out.extend_from_slice(&packed[index + 1..index + 2 + control]);
                index += 2 + control;
            }
        }
        out
    }

    fn payload(chunk: &[u8]) -> &[u8] {
        let len = u32::from_le_bytes([chunk[12], chunk[13], chunk[14], chunk[15]]) as usize;
        assert_eq!(chunk.len(), CHUNK_HEADER_LEN + len);
        &chunk[CHUNK_HEADER_LEN..]
    }

    #[test]
    fn patch_rounds_dimensions_up() {
        let config = config(3, 5).apply_to(EncoderConfig::default());
        assert_eq!((config.width, config.height), (4, 6));
        assert_eq!(config.codec, XorDeltaCodec::NAME);
    }

    #[test]
    fn partial_patch_keeps_other_fields() {
        let base = EncoderConfig::default();
        let patched = EncoderConfigPatch {
            bitrate: Some(1),
            ..Default::default()
        }
        .apply_to(base.clone());
        assert_eq!(patched.bitrate, 1);
        assert_eq!(patched.width, base.width);
    }

    #[test]
    fn delta_frames_xor_against_the_previous_frame() {
        let mut codec = XorDeltaCodec::new();
        codec
            .configure(&config(2, 2).apply_to(EncoderConfig::default()))
            .unwrap();

        let key = codec.encode(&frame(0, 7), true).unwrap();
        assert_eq!(&key[..4], b"XD\x01\x00");
        assert_eq!(unpack_runs(payload(&key)), vec![7; 16]);

        let delta = codec.encode(&frame(1, 5), false).unwrap();
        assert_eq!(delta[2], 0);
        assert_eq!(unpack_runs(payload(&delta)), vec![7 ^ 5; 16]);
    }

    #[test]
    fn unchanged_frame_delta_is_tiny() {
        let mut codec = codec_with(64, 8_000_000);
        let pixels: Vec<u8> = (0..64 * 64 * 4).map(|index| (index % 251) as u8).collect();
        let raw_len = pixels.len();

        let key = codec.encode(&sized_frame(0, 64, pixels.clone()), true).unwrap();
        assert!(key.len() > raw_len);

        let delta = codec.encode(&sized_frame(1, 64, pixels), false).unwrap();
        assert!(delta.len() < raw_len / 32, "delta chunk is {} bytes", delta.len());
        assert!(unpack_runs(payload(&delta)).iter().all(|byte| *byte == 0));
    }

    #[test]
    fn chunks_reconstruct_the_frames_when_under_budget() {
        let mut codec = codec_with(16, 8_000_000);
        let mut seed = 0x1234_5678;
        let mut reconstructed = vec![0; 16 * 16 * 4];

        for index in 0..4 {
            let pixels = noisy_pixels(16, &mut seed);
            let chunk = codec
                .encode(&sized_frame(index, 16, pixels.clone()), index == 0)
                .unwrap();
            assert_eq!(chunk[3], 0);
            for (byte, delta) in reconstructed.iter_mut().zip(unpack_runs(payload(&chunk))) {
                *byte ^= delta;
            }
            assert_eq!(reconstructed, pixels);
        }
        assert_eq!(codec.quant_shift(), 0);
    }

    #[test]
    fn low_bitrate_coarsens_the_quantizer_until_chunks_fit() {
        // 64 bytes per chunk at 10 fps.
        let budget = 64;
        let mut codec = codec_with(16, (budget * 8 * 10) as u32);
        let mut seed = 0x9e37_79b9;

        let chunks: Vec<Vec<u8>> = (0..8)
            .map(|index| {
                let pixels = noisy_pixels(16, &mut seed);
                codec
                    .encode(&sized_frame(index, 16, pixels), index == 0)
                    .unwrap()
            })
            .collect();

        let shifts: Vec<u8> = chunks.iter().map(|chunk| chunk[3]).collect();
        assert_eq!(shifts, vec![0, 1, 2, 3, 4, 5, 5, 5]);
        assert!(chunks[..5].iter().all(|chunk| chunk.len() > budget));
        assert!(chunks[5..].iter().all(|chunk| chunk.len() <= budget));
    }

    #[test]
    fn codec_rejects_bad_configuration_and_frames() {
        let mut codec = XorDeltaCodec::new();
        assert!(codec.encode(&frame(0, 1), true).is_err());

        let mut bad = config(2, 2).apply_to(EncoderConfig::default());
        bad.codec = "h264".into();
        assert!(codec.configure(&bad).is_err());

        let mut silent = config(2, 2).apply_to(EncoderConfig::default());
        silent.bitrate = 0;
        assert!(codec.configure(&silent).is_err());

        codec
            .configure(&config(4, 4).apply_to(EncoderConfig::default()))
            .unwrap();
        assert!(codec.encode(&frame(0, 1), true).is_err());
    }

    #[test]
    fn worker_encodes_in_order_and_flushes() {
        let mut encoder = WorkerEncoder::spawn(XorDeltaCodec::new()).unwrap();
        let applied = encoder.configure(config(2, 2)).unwrap();
        assert_eq!((applied.width, applied.height), (2, 2));

        encoder.submit(frame(0, 1), true).unwrap();
        encoder.submit(frame(1, 2), false).unwrap();
        encoder.submit(frame(2, 3), false).unwrap();

        let stream = encoder.flush().unwrap();
        assert_eq!(encoder.queue_depth(), 0);
        // Uniform frames pack to a single run token each.
        assert_eq!(stream.len(), 3 * (CHUNK_HEADER_LEN + 2));

        let chunks = encoder.poll().unwrap();
        let timestamps: Vec<u64> = chunks.iter().map(|chunk| chunk.timestamp_us).collect();
        assert_eq!(timestamps, vec![0, 100_000, 200_000]);
        assert!(chunks[0].keyframe);
        assert!(!chunks[1].keyframe);
    }

    #[test]
    fn worker_reports_configuration_errors() {
        let mut encoder = WorkerEncoder::spawn(XorDeltaCodec::new()).unwrap();
        let patch = EncoderConfigPatch {
            codec: Some("vp9".into()),
            ..Default::default()
        };
        assert!(matches!(
            encoder.configure(patch),
            Err(SoundframeError::Encoder(_))
        ));
    }

    #[test]
    fn worker_surfaces_encode_errors() {
        let mut encoder = WorkerEncoder::spawn(XorDeltaCodec::new()).unwrap();
        encoder.configure(config(4, 4)).unwrap();
        encoder.submit(frame(0, 1), true).unwrap();

        // The flush barrier guarantees the error event has arrived.
        assert!(encoder.flush().is_err());
    }
}
