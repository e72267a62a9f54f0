use super::effect::Effect;
use super::param::Param;

/// How the shared parameter maps to the applied gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainLaw {
    /// gain = v
    Direct,
    /// gain = 1 - v, used for the dry half of a wet/dry pair.
    Complement,
}

/// Linear gain driven by a shared [`Param`].
///
/// The target is read once per block and the applied gain ramps linearly
/// from the previous block's value to avoid zipper noise.
pub struct Gain {
    param: Param,
    law: GainLaw,
    current: f32,
    channels: usize,
}

impl Gain {
    pub fn new(param: Param) -> Self {
        Self::with_law(param, GainLaw::Direct)
    }

    pub fn with_law(param: Param, law: GainLaw) -> Self {
        let mut g = Self { param, law, current: 0.0, channels: 1 };
        g.current = g.target();
        g
    }

    #[inline]
    pub fn target(&self) -> f32 {
        let v = self.param.get();
        match self.law {
            GainLaw::Direct => v,
            GainLaw::Complement => 1.0 - v,
        }
    }
}

impl Effect for Gain {
    fn prepare(&mut self, _sr: u32, channels: u16) {
        self.channels = channels.max(1) as usize;
    }

    fn process(&mut self, block: &mut [f32]) {
        let target = self.target();
        let frames = block.len() / self.channels;
        if frames == 0 || target == self.current {
            for s in block.iter_mut() {
                *s *= target;
            }
            self.current = target;
            return;
        }
        let step = (target - self.current) / frames as f32;
        let mut g = self.current;
        for frame in block.chunks_mut(self.channels) {
            g += step;
            for s in frame {
                *s *= g;
            }
        }
        self.current = target;
    }
}
