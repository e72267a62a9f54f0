//! The four pedals and the ports the router wires between.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use crate::dsp::convolver::Convolver;
use crate::dsp::curve::{distortion_curve, CURVE_LEN};
use crate::dsp::delay_line::{DelayLine, MAX_DELAY_SECS};
use crate::dsp::effect::Effect;
use crate::dsp::gain::{Gain, GainLaw};
use crate::dsp::param::Param;
use crate::dsp::waveshaper::{Oversample, WaveShaper};
use crate::error::{Error, Result};
use crate::graph::{GraphError, NodeId, Patchbay, Processor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageKind {
    Boost,
    Distortion,
    Delay,
    Reverb,
}

impl StageKind {
    /// Fixed signal order. Not configurable.
    pub const ORDER: [StageKind; 4] = [
        StageKind::Boost,
        StageKind::Distortion,
        StageKind::Delay,
        StageKind::Reverb,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            StageKind::Boost => "boost",
            StageKind::Distortion => "distortion",
            StageKind::Delay => "delay",
            StageKind::Reverb => "reverb",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown stage '{0}' (expected boost, distortion, delay or reverb)")]
pub struct UnknownStage(pub String);

impl FromStr for StageKind {
    type Err = UnknownStage;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "boost" => Ok(StageKind::Boost),
            "distortion" | "dist" => Ok(StageKind::Distortion),
            "delay" => Ok(StageKind::Delay),
            "reverb" => Ok(StageKind::Reverb),
            other => Err(UnknownStage(other.to_string())),
        }
    }
}

/// A pedal as seen by the router: one input port, one output port, and
/// whatever internal nodes sit between them.
pub trait Stage {
    fn kind(&self) -> StageKind;
    fn input(&self) -> NodeId;
    fn output(&self) -> NodeId;
    /// Every node the stage owns, ports included.
    fn nodes(&self) -> Vec<NodeId>;
    /// Re-creates the stage's internal edges after a full disconnect.
    fn wire(&self, _bay: &mut Patchbay) -> std::result::Result<(), GraphError> {
        Ok(())
    }
}

fn finite(name: &'static str, v: f32) -> Result<f32> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(Error::invalid(name, v, "must be a finite number"))
    }
}

fn non_negative(name: &'static str, v: f32) -> Result<f32> {
    if finite(name, v)? < 0.0 {
        return Err(Error::invalid(name, v, "must not be negative"));
    }
    Ok(v)
}

fn within(name: &'static str, v: f32, lo: f32, hi: f32, reason: &'static str) -> Result<f32> {
    if !(lo..=hi).contains(&finite(name, v)?) {
        return Err(Error::invalid(name, v, reason));
    }
    Ok(v)
}

pub struct BoostStage {
    node: NodeId,
    gain: Param,
}

impl BoostStage {
    pub fn new(bay: &mut Patchbay, gain: f32) -> Result<Self> {
        let gain = Param::new(non_negative("boost gain", gain)?);
        let node = bay.add(Processor::Effect(Box::new(Gain::new(gain.clone()))));
        Ok(Self { node, gain })
    }

    pub fn gain(&self) -> f32 {
        self.gain.get()
    }

    /// Live update, no rewiring. Negative or non-finite gains are rejected.
    pub fn set_gain(&self, v: f32) -> Result<()> {
        self.gain.set(non_negative("boost gain", v)?);
        Ok(())
    }
}

impl Stage for BoostStage {
    fn kind(&self) -> StageKind {
        StageKind::Boost
    }
    fn input(&self) -> NodeId {
        self.node
    }
    fn output(&self) -> NodeId {
        self.node
    }
    fn nodes(&self) -> Vec<NodeId> {
        vec![self.node]
    }
}

/// Waveshaper over an immutable curve. A new amount means a new stage.
pub struct DistortionStage {
    node: NodeId,
    amount: f32,
    curve: Arc<[f32]>,
}

impl DistortionStage {
    pub fn new(bay: &mut Patchbay, amount: f32, oversample: Oversample) -> Result<Self> {
        let amount = non_negative("distortion amount", amount)?;
        let curve = distortion_curve(amount, CURVE_LEN);
        let shaper = WaveShaper::new(curve.clone(), oversample);
        let node = bay.add(Processor::Effect(Box::new(shaper)));
        Ok(Self { node, amount, curve })
    }

    pub fn amount(&self) -> f32 {
        self.amount
    }

    pub fn curve(&self) -> &Arc<[f32]> {
        &self.curve
    }

    /// Removes the stage's node from the graph.
    pub fn release(self, bay: &mut Patchbay) -> std::result::Result<(), GraphError> {
        bay.remove(self.node)
    }
}

impl Stage for DistortionStage {
    fn kind(&self) -> StageKind {
        StageKind::Distortion
    }
    fn input(&self) -> NodeId {
        self.node
    }
    fn output(&self) -> NodeId {
        self.node
    }
    fn nodes(&self) -> Vec<NodeId> {
        vec![self.node]
    }
}

/// Feedback delay with a wet/dry mix.
///
/// ```text
/// input -> dry -> output
/// input -> line -> feedback -> line
///          line -> wet -> output
/// ```
///
/// Feedback of 1.0 or more makes the loop gain non-decaying; energy in the
/// cycle then grows without bound. Such values are accepted but logged.
///
/// Wet and dry read `applied`, not `mix`. The output node copies `mix` into
/// `applied` after both have run, so a block always renders one mix value and
/// a new one takes effect on the next block.
pub struct DelayStage {
    input: NodeId,
    output: NodeId,
    line: NodeId,
    feedback: NodeId,
    wet: NodeId,
    dry: NodeId,
    time: Param,
    feedback_amount: Param,
    mix: Param,
    applied: Param,
}

/// Unity pass-through that latches `from` into `to` once per block.
struct Latch {
    from: Param,
    to: Param,
}

impl Effect for Latch {
    fn process(&mut self, _block: &mut [f32]) {
        self.to.set(self.from.get());
    }
}

impl DelayStage {
    pub fn new(bay: &mut Patchbay, time: f32, feedback: f32, mix: f32) -> Result<Self> {
        let time = Param::new(check_delay_time(time)?);
        let feedback_amount = Param::new(check_feedback(feedback)?);
        let mix = Param::new(check_mix(mix)?);
        let applied = Param::new(mix.get());

        let input = bay.add(Processor::Effect(Box::new(Gain::new(Param::new(1.0)))));
        let output = bay.add(Processor::Effect(Box::new(Latch {
            from: mix.clone(),
            to: applied.clone(),
        })));
        let line = bay.add(Processor::Delay(DelayLine::new(time.clone(), MAX_DELAY_SECS)));
        let feedback = bay.add(Processor::Effect(Box::new(Gain::new(feedback_amount.clone()))));
        let wet = bay.add(Processor::Effect(Box::new(Gain::new(applied.clone()))));
        let dry = bay.add(Processor::Effect(Box::new(Gain::with_law(
            applied.clone(),
            GainLaw::Complement,
        ))));

        Ok(Self { input, output, line, feedback, wet, dry, time, feedback_amount, mix, applied })
    }

    pub fn time(&self) -> f32 {
        self.time.get()
    }

    pub fn feedback(&self) -> f32 {
        self.feedback_amount.get()
    }

    pub fn wet(&self) -> f32 {
        self.mix.get()
    }

    pub fn dry(&self) -> f32 {
        1.0 - self.mix.get()
    }

    pub fn set_time(&self, secs: f32) -> Result<()> {
        self.time.set(check_delay_time(secs)?);
        Ok(())
    }

    pub fn set_feedback(&self, v: f32) -> Result<()> {
        self.feedback_amount.set(check_feedback(v)?);
        Ok(())
    }

    /// Takes effect from the next rendered block.
    pub fn set_mix(&self, v: f32) -> Result<()> {
        self.mix.set(check_mix(v)?);
        Ok(())
    }

    pub fn line(&self) -> NodeId {
        self.line
    }
}

fn check_delay_time(secs: f32) -> Result<f32> {
    within("delay time", secs, 0.0, MAX_DELAY_SECS, "must be between 0 and 1 second")
}

fn check_mix(v: f32) -> Result<f32> {
    within("delay mix", v, 0.0, 1.0, "must be between 0 and 1")
}

fn check_feedback(v: f32) -> Result<f32> {
    let v = non_negative("delay feedback", v)?;
    if v >= 1.0 {
        tracing::warn!(feedback = v, "delay feedback >= 1.0: the echo loop will not decay");
    }
    Ok(v)
}

impl Stage for DelayStage {
    fn kind(&self) -> StageKind {
        StageKind::Delay
    }
    fn input(&self) -> NodeId {
        self.input
    }
    fn output(&self) -> NodeId {
        self.output
    }
    fn nodes(&self) -> Vec<NodeId> {
        vec![self.input, self.output, self.line, self.feedback, self.wet, self.dry]
    }
    fn wire(&self, bay: &mut Patchbay) -> std::result::Result<(), GraphError> {
        bay.connect(self.input, self.dry)?;
        bay.connect(self.dry, self.output)?;
        bay.connect(self.input, self.line)?;
        bay.connect(self.line, self.feedback)?;
        bay.connect(self.feedback, self.line)?;
        bay.connect(self.line, self.wet)?;
        bay.connect(self.wet, self.output)?;
        Ok(())
    }
}

/// Convolution reverb. Only exists once its impulse response has loaded.
pub struct ReverbStage {
    node: NodeId,
    resource: String,
}

impl ReverbStage {
    pub fn install(bay: &mut Patchbay, convolver: Convolver, resource: impl Into<String>) -> Self {
        let node = bay.add(Processor::Effect(Box::new(convolver)));
        Self { node, resource: resource.into() }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }
}

impl Stage for ReverbStage {
    fn kind(&self) -> StageKind {
        StageKind::Reverb
    }
    fn input(&self) -> NodeId {
        self.node
    }
    fn output(&self) -> NodeId {
        self.node
    }
    fn nodes(&self) -> Vec<NodeId> {
        vec![self.node]
    }
}
