//! Impulse response decoding.

use std::io::Cursor;

use hound::{SampleFormat, WavReader};

use crate::error::{Error, Result};

/// A decoded impulse response, one `Vec` per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseResponse {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl ImpulseResponse {
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    /// Linear-interpolation resample of every channel to `rate`.
    pub fn resampled(self, rate: u32) -> Self {
        if rate == self.sample_rate || self.sample_rate == 0 || rate == 0 {
            return self;
        }
        let ratio = self.sample_rate as f64 / rate as f64;
        let frames = self.frames();
        let out_frames = ((frames as f64) / ratio).round().max(1.0) as usize;
        let channels = self
            .channels
            .iter()
            .map(|src| {
                (0..out_frames)
                    .map(|i| {
                        let pos = i as f64 * ratio;
                        let i0 = pos as usize;
                        let frac = (pos - i0 as f64) as f32;
                        let a = src.get(i0).copied().unwrap_or(0.0);
                        let b = src.get(i0 + 1).copied().unwrap_or(0.0);
                        a + frac * (b - a)
                    })
                    .collect()
            })
            .collect();
        Self { sample_rate: rate, channels }
    }
}

/// Decodes WAV bytes into the engine's native format: planar `f32` at
/// `target_rate`.
pub fn decode_impulse(resource: &str, bytes: &[u8], target_rate: u32) -> Result<ImpulseResponse> {
    let reader = WavReader::new(Cursor::new(bytes)).map_err(|e| Error::load_failed(resource, e))?;
    let spec = reader.spec();
    let channel_count = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::load_failed(resource, e))?,
        SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::load_failed(resource, e))?
        }
    };

    if interleaved.len() < channel_count {
        return Err(Error::load_failed(resource, "impulse response has no frames"));
    }

    let mut channels = vec![Vec::with_capacity(interleaved.len() / channel_count); channel_count];
    for frame in interleaved.chunks_exact(channel_count) {
        for (dst, s) in channels.iter_mut().zip(frame) {
            dst.push(*s);
        }
    }

    Ok(ImpulseResponse { sample_rate: spec.sample_rate, channels }.resampled(target_rate))
}
