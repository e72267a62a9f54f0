//! Uniformly partitioned FFT convolution (overlap-save).
//!
//! The impulse response is cut into partitions of `P` samples, each
//! transformed once up front. Every `P` input samples the engine transforms a
//! `2P` window, multiplies it against the frequency-domain delay line of past
//! input spectra, and emits `P` output samples. Latency is `P` frames.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use super::effect::Effect;
use crate::impulse::ImpulseResponse;

pub const DEFAULT_PARTITION: usize = 512;

const GAIN_CALIBRATION: f32 = 0.00125;
const GAIN_CALIBRATION_SAMPLE_RATE: f32 = 44100.0;
const MIN_POWER: f32 = 0.000125;

/// Equal-power scale applied to an impulse response when normalization is on.
pub fn normalization_scale(ir: &ImpulseResponse) -> f32 {
    let length = ir.frames();
    let channels = ir.channels.len();
    if length == 0 || channels == 0 {
        return 1.0;
    }
    let energy: f32 = ir.channels.iter().flat_map(|c| c.iter()).map(|s| s * s).sum();
    let mut power = (energy / (channels * length) as f32).sqrt();
    if !power.is_finite() || power < MIN_POWER {
        power = MIN_POWER;
    }
    let mut scale = GAIN_CALIBRATION / power;
    if ir.sample_rate > 0 {
        scale *= GAIN_CALIBRATION_SAMPLE_RATE / ir.sample_rate as f32;
    }
    scale
}

struct ChannelState {
    kernel: usize,
    window: Vec<f32>,
    fill: usize,
    ready: Vec<f32>,
    fdl: Vec<Vec<Complex<f32>>>,
    head: usize,
    spectrum: Vec<Complex<f32>>,
    acc: Vec<Complex<f32>>,
}

pub struct Convolver {
    partition: usize,
    /// Per IR channel, per partition: spectrum of the zero-padded slice.
    kernels: Vec<Vec<Vec<Complex<f32>>>>,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    states: Vec<ChannelState>,
}

impl Convolver {
    pub fn new(ir: &ImpulseResponse, partition: usize, normalize: bool) -> Self {
        let p = partition.max(1);
        let n = 2 * p;
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n);
        let ifft = planner.plan_fft_inverse(n);
        let scale = if normalize { normalization_scale(ir) } else { 1.0 };

        let mut scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        let kernels = ir
            .channels
            .iter()
            .map(|h| {
                let count = h.len().div_ceil(p).max(1);
                (0..count)
                    .map(|k| {
                        let mut buf = vec![Complex::new(0.0, 0.0); n];
                        let start = (k * p).min(h.len());
                        let end = ((k + 1) * p).min(h.len());
                        for (b, s) in buf.iter_mut().zip(&h[start..end]) {
                            b.re = s * scale;
                        }
                        fft.process_with_scratch(&mut buf, &mut scratch);
                        buf
                    })
                    .collect()
            })
            .collect();

        let mut conv = Self {
            partition: p,
            kernels,
            scratch: vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len().max(ifft.get_inplace_scratch_len())],
            fft,
            ifft,
            states: Vec::new(),
        };
        conv.reset_states(1);
        conv
    }

    pub fn latency_frames(&self) -> usize {
        self.partition
    }

    fn reset_states(&mut self, channels: usize) {
        let p = self.partition;
        let n = 2 * p;
        let ir_channels = self.kernels.len().max(1);
        self.states = (0..channels)
            .map(|c| {
                let kernel = c % ir_channels;
                let parts = self.kernels.get(kernel).map(|k| k.len()).unwrap_or(1);
                ChannelState {
                    kernel,
                    window: vec![0.0; n],
                    fill: 0,
                    ready: vec![0.0; p],
                    fdl: vec![vec![Complex::new(0.0, 0.0); n]; parts],
                    head: 0,
                    spectrum: vec![Complex::new(0.0, 0.0); n],
                    acc: vec![Complex::new(0.0, 0.0); n],
                }
            })
            .collect();
    }

    fn run_partition(&mut self, channel: usize) {
        let p = self.partition;
        let n = 2 * p;
        let st = &mut self.states[channel];

        for (c, s) in st.spectrum.iter_mut().zip(st.window.iter()) {
            *c = Complex::new(*s, 0.0);
        }
        self.fft.process_with_scratch(&mut st.spectrum, &mut self.scratch);
        st.fdl[st.head].copy_from_slice(&st.spectrum);

        st.acc.fill(Complex::new(0.0, 0.0));
        if let Some(kernel) = self.kernels.get(st.kernel) {
            let parts = st.fdl.len();
            for (k, part) in kernel.iter().enumerate() {
                let x = &st.fdl[(st.head + parts - k) % parts];
                for ((a, xi), hi) in st.acc.iter_mut().zip(x.iter()).zip(part.iter()) {
                    *a += xi * hi;
                }
            }
        }
        self.ifft.process_with_scratch(&mut st.acc, &mut self.scratch);

        let norm = 1.0 / n as f32;
        for (r, a) in st.ready.iter_mut().zip(st.acc[p..].iter()) {
            *r = a.re * norm;
        }
        st.window.copy_within(p..n, 0);
        st.fill = 0;
        st.head = (st.head + 1) % st.fdl.len();
    }
}

impl Effect for Convolver {
    fn prepare(&mut self, _sr: u32, channels: u16) {
        self.reset_states(channels.max(1) as usize);
    }

    fn process(&mut self, block: &mut [f32]) {
        let channels = self.states.len();
        let p = self.partition;
        for frame in block.chunks_mut(channels) {
            for (c, s) in frame.iter_mut().enumerate() {
                let st = &mut self.states[c];
                st.window[p + st.fill] = *s;
                *s = st.ready[st.fill];
                st.fill += 1;
                if st.fill == p {
                    self.run_partition(c);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ir(taps: Vec<f32>) -> ImpulseResponse {
        ImpulseResponse { sample_rate: 44100, channels: vec![taps] }
    }

    fn run(conv: &mut Convolver, input: &[f32]) -> Vec<f32> {
        let mut out = input.to_vec();
        for chunk in out.chunks_mut(37) {
            conv.process(chunk);
        }
        out
    }

    #[test]
    fn matches_direct_convolution_after_latency() {
        let taps: Vec<f32> = (0..50).map(|i| 0.9f32.powi(i) * if i % 2 == 0 { 1.0 } else { -0.5 }).collect();
        let mut conv = Convolver::new(&ir(taps.clone()), 16, false);
        conv.prepare(44100, 1);

        let input: Vec<f32> = (0..300).map(|i| ((i * 7) % 11) as f32 / 11.0 - 0.5).collect();
        let out = run(&mut conv, &input);

        let lat = conv.latency_frames();
        for n in 0..(input.len() - lat) {
            let mut direct = 0.0f32;
            for (k, h) in taps.iter().enumerate() {
                if n >= k {
                    direct += h * input[n - k];
                }
            }
            assert!((out[n + lat] - direct).abs() < 1e-4, "sample {n}: {} vs {direct}", out[n + lat]);
        }
        assert!(out[..lat].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn stereo_input_uses_mono_ir_on_both_channels() {
        let mut conv = Convolver::new(&ir(vec![0.5]), 8, false);
        conv.prepare(44100, 2);
        let mut block = vec![0.0f32; 64];
        block[0] = 1.0;
        block[1] = -1.0;
        conv.process(&mut block);
        assert!((block[16] - 0.5).abs() < 1e-5);
        assert!((block[17] + 0.5).abs() < 1e-5);
    }

    #[test]
    fn normalization_respects_power_floor() {
        let quiet = ir(vec![0.0; 32]);
        let scale = normalization_scale(&quiet);
        assert!((scale - GAIN_CALIBRATION / MIN_POWER).abs() < 1e-3);
    }
}
