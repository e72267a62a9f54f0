use std::f32::consts::PI;
use std::sync::Arc;

use super::effect::Effect;

const FIR_TAPS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Oversample {
    None,
    #[default]
    X4,
}

impl Oversample {
    pub fn factor(self) -> usize {
        match self {
            Oversample::None => 1,
            Oversample::X4 => 4,
        }
    }
}

/// Per-channel oversampling state.
#[derive(Clone)]
struct ChannelState {
    prev: f32,
    history: [f32; FIR_TAPS],
    pos: usize,
}

impl ChannelState {
    fn new() -> Self {
        Self { prev: 0.0, history: [0.0; FIR_TAPS], pos: 0 }
    }
}

/// Static-curve waveshaper. The curve is shared and never mutated.
pub struct WaveShaper {
    curve: Arc<[f32]>,
    oversample: Oversample,
    fir: [f32; FIR_TAPS],
    states: Vec<ChannelState>,
}

impl WaveShaper {
    pub fn new(curve: Arc<[f32]>, oversample: Oversample) -> Self {
        Self {
            fir: lowpass(oversample.factor()),
            curve,
            oversample,
            states: vec![ChannelState::new()],
        }
    }

    pub fn curve(&self) -> &Arc<[f32]> {
        &self.curve
    }

    /// Curve lookup with linear interpolation; inputs outside [-1, 1] hold the end values.
    #[inline]
    pub fn shape(&self, x: f32) -> f32 {
        shape(&self.curve, x)
    }

    fn process_oversampled(&mut self, block: &mut [f32]) {
        let factor = self.oversample.factor();
        let channels = self.states.len();
        for frame in block.chunks_mut(channels) {
            for (s, st) in frame.iter_mut().zip(self.states.iter_mut()) {
                let x = *s;
                let mut out = 0.0;
                for i in 0..factor {
                    let t = (i + 1) as f32 / factor as f32;
                    let up = st.prev + t * (x - st.prev);
                    st.history[st.pos] = shape(&self.curve, up);
                    st.pos = (st.pos + 1) % FIR_TAPS;
                    if i + 1 == factor {
                        let mut idx = st.pos;
                        for c in self.fir.iter() {
                            idx = if idx == 0 { FIR_TAPS - 1 } else { idx - 1 };
                            out += c * st.history[idx];
                        }
                    }
                }
                st.prev = x;
                *s = out;
            }
        }
    }
}

impl Effect for WaveShaper {
    fn prepare(&mut self, _sr: u32, channels: u16) {
        self.states = vec![ChannelState::new(); channels.max(1) as usize];
    }

    fn process(&mut self, block: &mut [f32]) {
        if self.curve.is_empty() {
            return;
        }
        match self.oversample {
            Oversample::None => {
                for s in block.iter_mut() {
                    *s = shape(&self.curve, *s);
                }
            }
            Oversample::X4 => self.process_oversampled(block),
        }
    }
}

#[inline]
fn shape(curve: &[f32], x: f32) -> f32 {
    let n = curve.len();
    if n == 1 {
        return curve[0];
    }
    let v = (n - 1) as f32 * 0.5 * (x + 1.0);
    if !(v > 0.0) {
        // also catches NaN
        return curve[0];
    }
    if v >= (n - 1) as f32 {
        return curve[n - 1];
    }
    let k = v as usize;
    let f = v - k as f32;
    curve[k] + f * (curve[k + 1] - curve[k])
}

/// Blackman-windowed sinc lowpass at 0.9 / factor of Nyquist, unity DC gain.
fn lowpass(factor: usize) -> [f32; FIR_TAPS] {
    let mut h = [0.0f32; FIR_TAPS];
    if factor <= 1 {
        h[0] = 1.0;
        return h;
    }
    let cutoff = 0.9 / factor as f32;
    let m = (FIR_TAPS - 1) as f32;
    for (n, c) in h.iter_mut().enumerate() {
        let t = n as f32 - m / 2.0;
        let sinc = if t == 0.0 { 1.0 } else { (PI * cutoff * t).sin() / (PI * cutoff * t) };
        let w = 0.42 - 0.5 * (2.0 * PI * n as f32 / m).cos() + 0.08 * (4.0 * PI * n as f32 / m).cos();
        *c = sinc * w;
    }
    let sum: f32 = h.iter().sum();
    for c in h.iter_mut() {
        *c /= sum;
    }
    h
}
