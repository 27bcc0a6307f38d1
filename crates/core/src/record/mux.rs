use std::io::Cursor;

use serde::{Deserialize, Serialize};

use super::encoder::EncoderConfig;
use crate::{timeline::DecodedTrack, Result, SoundframeError};

/// Everything a muxer needs to build the final container.
#[derive(Debug, Clone, Copy)]
pub struct MuxRequest<'a> {
    /// Elementary video stream, chunks concatenated in encode order.
    pub video: &'a [u8],
    /// Source audio, already trimmed to the video duration.
    pub audio: &'a DecodedTrack,
    pub encoder: &'a EncoderConfig,
    pub frame_count: u64,
    pub duration_us: u64,
}

/// Interleaves the encoded video with the audio asset.
pub trait Muxer {
    fn mux(&mut self, request: MuxRequest<'_>) -> Result<Vec<u8>>;
}

impl<F> Muxer for F
where
    F: FnMut(MuxRequest<'_>) -> Result<Vec<u8>>,
{
    fn mux(&mut self, request: MuxRequest<'_>) -> Result<Vec<u8>> {
        self(request)
    }
}

const PACKED_MAGIC: [u8; 4] = *b"SFPK";

/// Header at the start of a packed container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedHeader {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub frame_count: u64,
    pub duration_us: u64,
    pub video_bytes: u64,
    pub audio_bytes: u64,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Simple container: `SFPK`, a little-endian `u32` header length, a JSON
/// [`PackedHeader`], the video stream, then the audio as 16-bit PCM WAV.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackedMuxer;

impl PackedMuxer {
    pub fn new() -> Self {
        Self
    }

    /// Reads the header back from a packed container.
    pub fn read_header(bytes: &[u8]) -> Result<PackedHeader> {
        if bytes.len() < 8 || bytes[..4] != PACKED_MAGIC {
            return Err(SoundframeError::Mux("not a packed container".into()));
        }
        let mut len = [0; 4];
        len.copy_from_slice(&bytes[4..8]);
        let len = u32::from_le_bytes(len) as usize;
        let header = bytes
            .get(8..8 + len)
            .ok_or_else(|| SoundframeError::Mux("truncated container header".into()))?;
        Ok(serde_json::from_slice(header)?)
    }
}

impl Muxer for PackedMuxer {
    fn mux(&mut self, request: MuxRequest<'_>) -> Result<Vec<u8>> {
        if request.video.is_empty() || request.frame_count == 0 {
            return Err(SoundframeError::Mux("no video frames to mux".into()));
        }

        let audio = encode_wav(request.audio)?;
        let header = PackedHeader {
            codec: request.encoder.codec.clone(),
            width: request.encoder.width,
            height: request.encoder.height,
            fps: request.encoder.fps,
            frame_count: request.frame_count,
            duration_us: request.duration_us,
            video_bytes: request.video.len() as u64,
            audio_bytes: audio.len() as u64,
            sample_rate: request.audio.sample_rate(),
            channels: request.audio.channel_count() as u16,
        };
        let header = serde_json::to_vec(&header)?;
        let header_len = u32::try_from(header.len())
            .map_err(|_| SoundframeError::Mux("container header too large".into()))?;

        let mut out =
            Vec::with_capacity(8 + header.len() + request.video.len() + audio.len());
        out.extend_from_slice(&PACKED_MAGIC);
        out.extend_from_slice(&header_len.to_le_bytes());
        out.extend_from_slice(&header);
        out.extend_from_slice(request.video);
        out.extend_from_slice(&audio);
        Ok(out)
    }
}

fn encode_wav(track: &DecodedTrack) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: track.channel_count() as u16,
        sample_rate: track.sample_rate(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec)
        .map_err(|error| SoundframeError::Mux(error.to_string()))?;
    for frame in 0..track.frames() {
        for channel in track.channels() {
            let quantized = (channel[frame].clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16;
            writer
                .write_sample(quantized)
                .map_err(|error| SoundframeError::Mux(error.to_string()))?;
        }
    }
    writer
        .finalize()
        .map_err(|error| SoundframeError::Mux(error.to_string()))?;
    Ok(cursor.into_inner())
}
