//! Fractional delay line, split into a read half and a write half.
//!
//! The renderer reads a whole block of delayed output before any of the
//! block's input is known, then writes the input once everything upstream has
//! run. That split is what lets the line sit inside a feedback cycle. It also
//! fixes the minimum effective delay at one block: shorter settings are
//! clamped up when read.

use super::param::Param;

/// Upper bound for the delay time setting, in seconds.
pub const MAX_DELAY_SECS: f32 = 1.0;

pub struct DelayLine {
    time: Param,
    max_secs: f32,
    buffer: Vec<f32>,
    capacity: usize,
    write_pos: usize,
    channels: usize,
    sample_rate: f32,
}

impl DelayLine {
    /// `time` is the delay in seconds, shared with the control side.
    pub fn new(time: Param, max_secs: f32) -> Self {
        Self {
            time,
            max_secs,
            buffer: Vec::new(),
            capacity: 0,
            write_pos: 0,
            channels: 1,
            sample_rate: 44100.0,
        }
    }

    /// Allocates the ring. Must run before the line is handed to the renderer.
    pub fn prepare(&mut self, sr: u32, channels: u16, max_frames: usize) {
        self.sample_rate = sr as f32;
        self.channels = channels.max(1) as usize;
        self.capacity = (self.max_secs * self.sample_rate).ceil() as usize + max_frames.max(1) + 2;
        self.buffer = vec![0.0; self.capacity * self.channels];
        self.write_pos = 0;
    }

    /// Delay in frames that a block of `frames` will actually use.
    pub fn effective_delay(&self, frames: usize) -> f64 {
        let requested = (self.time.get().max(0.0) * self.sample_rate) as f64;
        let longest = self.capacity.saturating_sub(frames + 1) as f64;
        requested.max(frames as f64).min(longest)
    }

    /// Fills `out` with the delayed signal for the coming block.
    pub fn read(&self, out: &mut [f32]) {
        if self.capacity == 0 {
            out.fill(0.0);
            return;
        }
        let ch = self.channels;
        let frames = out.len() / ch;
        let delay = self.effective_delay(frames);
        let cap = self.capacity as f64;
        for (f, frame) in out.chunks_mut(ch).enumerate() {
            let mut pos = self.write_pos as f64 + f as f64 - delay;
            if pos < 0.0 {
                pos += cap;
            }
            let i0 = pos as usize % self.capacity;
            let i1 = (i0 + 1) % self.capacity;
            let frac = (pos - pos.floor()) as f32;
            for (c, s) in frame.iter_mut().enumerate() {
                let a = self.buffer[i0 * ch + c];
                let b = self.buffer[i1 * ch + c];
                *s = a + frac * (b - a);
            }
        }
    }

    /// Appends the block's input to the ring.
    pub fn write(&mut self, input: &[f32]) {
        if self.capacity == 0 {
            return;
        }
        let ch = self.channels;
        for frame in input.chunks(ch) {
            let base = self.write_pos * ch;
            self.buffer[base..base + frame.len()].copy_from_slice(frame);
            self.write_pos = (self.write_pos + 1) % self.capacity;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(secs: f32, sr: u32, channels: u16, frames: usize) -> DelayLine {
        let mut d = DelayLine::new(Param::new(secs), MAX_DELAY_SECS);
        d.prepare(sr, channels, frames);
        d
    }

    #[test]
    fn impulse_comes_back_after_the_delay() {
        // 10 frames at 1024 Hz, blocks of 4
        let mut d = line(10.0 / 1024.0, 1024, 1, 4);
        let mut seen = Vec::new();
        for b in 0..6 {
            let mut out = [0.0f32; 4];
            d.read(&mut out);
            seen.extend_from_slice(&out);
            let mut input = [0.0f32; 4];
            if b == 0 {
                input[0] = 1.0;
            }
            d.write(&input);
        }
        let hit = seen.iter().position(|&s| s != 0.0);
        assert_eq!(hit, Some(10));
        assert!((seen[10] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn short_delays_clamp_to_one_block() {
        let d = line(0.0, 1000, 1, 16);
        assert_eq!(d.effective_delay(16), 16.0);
    }

    #[test]
    fn channels_stay_interleaved() {
        let mut d = line(0.0, 1000, 2, 4);
        let mut out = [0.0f32; 8];
        d.read(&mut out);
        d.write(&[1.0, -1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        d.read(&mut out);
        assert_eq!(&out[0..2], &[1.0, -1.0]);
    }
}
