//! Decoding of raw 16-bit PCM narration audio.

use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use byteorder::{ByteOrder, LittleEndian};
use std::time::Duration;

/// Decoded, playable audio with one sample vector per channel.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frame_count(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / self.sample_rate as f64)
    }
}

pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    general_purpose::STANDARD
        .decode(data.trim())
        .context("Narration audio is not valid base64")
}

/// Converts interleaved signed 16-bit little-endian PCM into an [AudioBuffer].
///
/// Samples are scaled by 1/32768 into `[-1.0, 1.0)`. A trailing odd byte or
/// incomplete frame is dropped.
pub fn decode_pcm16(bytes: &[u8], sample_rate: u32, channel_count: u16) -> AudioBuffer {
    let channel_count = channel_count as usize;
    if channel_count == 0 {
        return AudioBuffer {
            sample_rate,
            channels: vec![],
        };
    }

    let sample_count = bytes.len() / 2;
    let frame_count = sample_count / channel_count;

    let mut channels = vec![Vec::with_capacity(frame_count); channel_count];

    for frame in bytes.chunks_exact(2 * channel_count).take(frame_count) {
        for (channel, sample) in channels.iter_mut().zip(frame.chunks_exact(2)) {
            channel.push(LittleEndian::read_i16(sample) as f32 / 32768.0);
        }
    }

    AudioBuffer {
        sample_rate,
        channels,
    }
}

/// Decodes a base64 payload straight into an [AudioBuffer].
pub fn decode_base64_pcm16(data: &str, sample_rate: u32, channel_count: u16) -> Result<AudioBuffer> {
    let bytes = decode_base64(data)?;
    Ok(decode_pcm16(&bytes, sample_rate, channel_count))
}
