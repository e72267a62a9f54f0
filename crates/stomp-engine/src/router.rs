//! Chain router: the only code that connects or disconnects nodes.

use crate::control::ChainSettings;
use crate::dsp::convolver::Convolver;
use crate::dsp::waveshaper::Oversample;
use crate::error::Result;
use crate::graph::{GraphError, NodeId, Patchbay};
use crate::stage::{BoostStage, DelayStage, DistortionStage, ReverbStage, Stage, StageKind};

struct Stages {
    boost: BoostStage,
    distortion: DistortionStage,
    delay: DelayStage,
    reverb: Option<ReverbStage>,
}

impl Stages {
    fn get(&self, kind: StageKind) -> Option<&dyn Stage> {
        match kind {
            StageKind::Boost => Some(&self.boost),
            StageKind::Distortion => Some(&self.distortion),
            StageKind::Delay => Some(&self.delay),
            StageKind::Reverb => self.reverb.as_ref().map(|r| r as &dyn Stage),
        }
    }

    fn all(&self) -> impl Iterator<Item = &dyn Stage> + '_ {
        StageKind::ORDER.into_iter().filter_map(|k| self.get(k))
    }
}

pub struct Router {
    bay: Patchbay,
    stages: Stages,
    enabled: [bool; 4],
    oversample: Oversample,
    active: Vec<StageKind>,
}

impl Router {
    /// Builds boost, distortion and delay. Reverb arrives later through
    /// [`Router::install_reverb`]. Nothing is wired until [`Router::rebuild`].
    pub fn new(mut bay: Patchbay, settings: &ChainSettings) -> Result<Self> {
        let boost = BoostStage::new(&mut bay, settings.boost_gain)?;
        let distortion = DistortionStage::new(&mut bay, settings.distortion_amount, settings.oversample)?;
        let delay = DelayStage::new(
            &mut bay,
            settings.delay_time,
            settings.delay_feedback,
            settings.delay_mix,
        )?;
        Ok(Self {
            bay,
            stages: Stages { boost, distortion, delay, reverb: None },
            enabled: settings.enabled,
            oversample: settings.oversample,
            active: Vec::new(),
        })
    }

    /// Tears every connection down and wires source -> enabled, ready
    /// stages in fixed order -> sink, then installs the result on the
    /// renderer. Safe to call at any time; calling it twice in a row
    /// yields the same connection set.
    pub fn rebuild(&mut self) -> std::result::Result<(), GraphError> {
        let source = self.bay.source();
        self.bay.disconnect(source);
        let owned: Vec<NodeId> = self.stages.all().flat_map(|s| s.nodes()).collect();
        for id in owned {
            self.bay.disconnect(id);
        }

        let mut tail = source;
        let mut active = Vec::with_capacity(StageKind::ORDER.len());
        for kind in StageKind::ORDER {
            if !self.enabled[kind.index()] {
                continue;
            }
            let Some(stage) = self.stages.get(kind) else {
                continue;
            };
            self.bay.connect(tail, stage.input())?;
            stage.wire(&mut self.bay)?;
            tail = stage.output();
            active.push(kind);
        }
        let sink = self.bay.sink();
        self.bay.connect(tail, sink)?;
        self.bay.commit()?;

        tracing::debug!(
            stages = ?active,
            connections = self.bay.connection_count(),
            "chain rebuilt"
        );
        self.active = active;
        Ok(())
    }

    pub fn is_enabled(&self, kind: StageKind) -> bool {
        self.enabled[kind.index()]
    }

    /// Flips the flag only. The caller decides when to rebuild.
    pub fn set_enabled(&mut self, kind: StageKind, on: bool) {
        self.enabled[kind.index()] = on;
    }

    /// Whether the stage's nodes exist. Only reverb can be missing.
    pub fn is_ready(&self, kind: StageKind) -> bool {
        self.stages.get(kind).is_some()
    }

    /// Stages wired by the last rebuild, in signal order.
    pub fn active_stages(&self) -> &[StageKind] {
        &self.active
    }

    pub fn boost(&self) -> &BoostStage {
        &self.stages.boost
    }

    pub fn distortion(&self) -> &DistortionStage {
        &self.stages.distortion
    }

    pub fn delay(&self) -> &DelayStage {
        &self.stages.delay
    }

    pub fn reverb(&self) -> Option<&ReverbStage> {
        self.stages.reverb.as_ref()
    }

    pub fn patchbay(&self) -> &Patchbay {
        &self.bay
    }

    /// Swaps in a distortion stage built on a fresh curve, drops the old one,
    /// and rebuilds. The previous stage is left untouched on error.
    pub fn replace_distortion(&mut self, amount: f32) -> Result<()> {
        let next = DistortionStage::new(&mut self.bay, amount, self.oversample)?;
        let old = std::mem::replace(&mut self.stages.distortion, next);
        old.release(&mut self.bay)?;
        self.rebuild()?;
        Ok(())
    }

    /// Adds the loaded reverb to the chain and rebuilds once.
    pub fn install_reverb(&mut self, convolver: Convolver, resource: &str) -> std::result::Result<(), GraphError> {
        if let Some(old) = self.stages.reverb.take() {
            for id in old.nodes() {
                self.bay.remove(id)?;
            }
        }
        self.stages.reverb = Some(ReverbStage::install(&mut self.bay, convolver, resource));
        self.rebuild()
    }

    /// Walks the wiring from the source at stage granularity.
    ///
    /// Returns `None` unless there is exactly one way out of the source and
    /// out of each stage, it ends at the sink, and the sink has exactly one
    /// feed.
    pub fn signal_path(&self) -> Option<Vec<StageKind>> {
        let sink = self.bay.sink();
        if self.bay.connections().filter(|c| c.to == sink).count() != 1 {
            return None;
        }
        let mut path = Vec::new();
        let mut cur = self.bay.source();
        loop {
            let mut outs = self.bay.outputs(cur);
            let next = outs.next()?;
            if outs.next().is_some() {
                return None;
            }
            if next == sink {
                return Some(path);
            }
            let stage = self.stages.all().find(|s| s.input() == next)?;
            if path.contains(&stage.kind()) {
                return None;
            }
            path.push(stage.kind());
            cur = stage.output();
        }
    }
}
