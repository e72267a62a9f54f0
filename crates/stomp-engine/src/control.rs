//! Control surface: the single entry point for parameter edits and toggles.

use std::sync::Arc;
use std::time::Duration;

use crate::dsp::convolver::{Convolver, DEFAULT_PARTITION};
use crate::dsp::waveshaper::Oversample;
use crate::error::Result;
use crate::graph::Patchbay;
use crate::resource::ResourceProvider;
use crate::reverb::{ReverbConfig, ReverbLoader};
use crate::router::Router;
use crate::stage::StageKind;

/// Startup values for every stage.
#[derive(Debug, Clone)]
pub struct ChainSettings {
    pub boost_gain: f32,
    pub distortion_amount: f32,
    pub delay_time: f32,
    pub delay_feedback: f32,
    pub delay_mix: f32,
    /// Indexed by [`StageKind::index`].
    pub enabled: [bool; 4],
    pub oversample: Oversample,
    /// Name passed to the resource provider for the reverb's impulse response.
    pub impulse: String,
    pub partition: usize,
    pub normalize_impulse: bool,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            boost_gain: 1.5,
            distortion_amount: 300.0,
            delay_time: 0.4,
            delay_feedback: 0.5,
            delay_mix: 0.5,
            enabled: [true; 4],
            oversample: Oversample::X4,
            impulse: "hall".into(),
            partition: DEFAULT_PARTITION,
            normalize_impulse: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReverbStatus {
    Loading,
    Ready,
    /// Permanent for the session.
    Failed(String),
}

enum ReverbSlot {
    Loading(ReverbLoader),
    Ready,
    Failed(String),
}

/// Snapshot of the control state, for display.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainStatus {
    pub enabled: [bool; 4],
    pub active: Vec<StageKind>,
    pub boost_gain: f32,
    pub distortion_amount: f32,
    pub delay_time: f32,
    pub delay_feedback: f32,
    pub delay_mix: f32,
    pub reverb: ReverbStatus,
}

/// Owns the router and the pending reverb load.
///
/// Methods take `&mut self`; share it across threads behind a mutex so
/// topology changes stay serialized.
pub struct Controller {
    router: Router,
    reverb: ReverbSlot,
}

impl Controller {
    /// Builds the chain, wires it once without reverb, and starts the
    /// impulse response load in the background.
    pub fn new(bay: Patchbay, settings: &ChainSettings, provider: Arc<dyn ResourceProvider>) -> Result<Self> {
        let sample_rate = bay.format().sample_rate;
        let mut router = Router::new(bay, settings)?;
        router.rebuild()?;
        let loader = ReverbLoader::spawn(
            provider,
            ReverbConfig {
                resource: settings.impulse.clone(),
                sample_rate,
                partition: settings.partition,
                normalize: settings.normalize_impulse,
            },
        );
        Ok(Self { router, reverb: ReverbSlot::Loading(loader) })
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn set_boost_gain(&mut self, v: f32) -> Result<()> {
        self.router.boost().set_gain(v)
    }

    /// Rebuilds the distortion stage on a new curve and rewires the chain.
    pub fn set_distortion_amount(&mut self, v: f32) -> Result<()> {
        self.router.replace_distortion(v)
    }

    pub fn set_delay_time(&mut self, secs: f32) -> Result<()> {
        self.router.delay().set_time(secs)
    }

    pub fn set_delay_feedback(&mut self, v: f32) -> Result<()> {
        self.router.delay().set_feedback(v)
    }

    pub fn set_delay_mix(&mut self, v: f32) -> Result<()> {
        self.router.delay().set_mix(v)
    }

    /// Flips a stage and rewires. Returns the new enabled state.
    ///
    /// Turning reverb on before its impulse response has loaded is allowed;
    /// the chain simply runs without it until the load lands.
    pub fn toggle(&mut self, kind: StageKind) -> Result<bool> {
        let on = !self.router.is_enabled(kind);
        self.set_enabled(kind, on)?;
        Ok(on)
    }

    pub fn set_enabled(&mut self, kind: StageKind, on: bool) -> Result<()> {
        self.router.set_enabled(kind, on);
        self.router.rebuild()?;
        tracing::info!(stage = %kind, on, "stage toggled");
        Ok(())
    }

    /// Checks the background load without blocking. Returns the new status
    /// the first time the load resolves, `None` otherwise.
    pub fn poll(&mut self) -> Option<ReverbStatus> {
        let ReverbSlot::Loading(loader) = &self.reverb else {
            return None;
        };
        let outcome = loader.try_take()?;
        Some(self.resolve(outcome))
    }

    /// Like [`Controller::poll`], but waits up to `timeout` for the load.
    pub fn wait_for_reverb(&mut self, timeout: Duration) -> ReverbStatus {
        if let ReverbSlot::Loading(loader) = &self.reverb {
            if let Some(outcome) = loader.wait(timeout) {
                return self.resolve(outcome);
            }
        }
        self.reverb_status()
    }

    fn resolve(&mut self, outcome: Result<Convolver>) -> ReverbStatus {
        let resource = match &self.reverb {
            ReverbSlot::Loading(loader) => loader.resource().to_string(),
            _ => return self.reverb_status(),
        };
        let installed = outcome.and_then(|conv| {
            self.router.install_reverb(conv, &resource)?;
            Ok(())
        });
        self.reverb = match installed {
            Ok(()) => {
                tracing::info!(resource = %resource, "reverb ready");
                ReverbSlot::Ready
            }
            Err(e) => {
                tracing::error!(resource = %resource, error = %e, "reverb unavailable for this session");
                ReverbSlot::Failed(e.to_string())
            }
        };
        self.reverb_status()
    }

    pub fn reverb_status(&self) -> ReverbStatus {
        match &self.reverb {
            ReverbSlot::Loading(_) => ReverbStatus::Loading,
            ReverbSlot::Ready => ReverbStatus::Ready,
            ReverbSlot::Failed(msg) => ReverbStatus::Failed(msg.clone()),
        }
    }

    pub fn status(&self) -> ChainStatus {
        let r = &self.router;
        ChainStatus {
            enabled: StageKind::ORDER.map(|k| r.is_enabled(k)),
            active: r.active_stages().to_vec(),
            boost_gain: r.boost().gain(),
            distortion_amount: r.distortion().amount(),
            delay_time: r.delay().time(),
            delay_feedback: r.delay().feedback(),
            delay_mix: r.delay().wet(),
            reverb: self.reverb_status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::StreamFormat;
    use crate::impulse::tests::wav_bytes;
    use crate::resource::MemoryProvider;

    fn hall() -> Arc<dyn ResourceProvider> {
        Arc::new(MemoryProvider::new().with("hall", wav_bytes(44100, &[vec![0.8, 0.4, 0.2, 0.1]])))
    }

    fn controller(provider: Arc<dyn ResourceProvider>) -> Controller {
        let (bay, _renderer) = Patchbay::new(StreamFormat::default());
        Controller::new(bay, &ChainSettings::default(), provider).unwrap()
    }

    #[test]
    fn reverb_toggle_before_load_is_harmless() {
        let mut c = controller(hall());
        assert!(!c.toggle(StageKind::Reverb).unwrap());
        assert!(c.toggle(StageKind::Reverb).unwrap());
        if c.reverb_status() == ReverbStatus::Loading {
            assert!(!c.router().signal_path().unwrap().contains(&StageKind::Reverb));
        }
    }

    #[test]
    fn reverb_joins_the_path_once_loaded() {
        let mut c = controller(hall());
        assert_eq!(c.wait_for_reverb(Duration::from_secs(10)), ReverbStatus::Ready);
        assert_eq!(c.router().signal_path().unwrap().last(), Some(&StageKind::Reverb));
        // resolves exactly once
        assert_eq!(c.poll(), None);
    }

    #[test]
    fn failed_load_is_permanent() {
        let mut c = controller(Arc::new(MemoryProvider::new()));
        let status = c.wait_for_reverb(Duration::from_secs(10));
        assert!(matches!(status, ReverbStatus::Failed(_)));
        c.toggle(StageKind::Reverb).unwrap();
        c.toggle(StageKind::Reverb).unwrap();
        assert_eq!(c.poll(), None);
        assert!(!c.router().is_ready(StageKind::Reverb));
        assert_eq!(
            c.router().signal_path().unwrap(),
            vec![StageKind::Boost, StageKind::Distortion, StageKind::Delay]
        );
    }

    #[test]
    fn invalid_values_never_reach_the_chain() {
        let mut c = controller(hall());
        assert!(c.set_boost_gain(-2.0).is_err());
        assert!(c.set_delay_mix(2.0).is_err());
        assert!(c.set_delay_time(f32::INFINITY).is_err());
        assert!(c.set_distortion_amount(-5.0).is_err());
        let s = c.status();
        assert_eq!(s.boost_gain, 1.5);
        assert_eq!(s.delay_mix, 0.5);
        assert_eq!(s.delay_time, 0.4);
        assert_eq!(s.distortion_amount, 300.0);
    }

    #[test]
    fn live_setters_do_not_rewire() {
        let mut c = controller(hall());
        let before: Vec<_> = c.router().patchbay().connections().collect();
        c.set_boost_gain(2.0).unwrap();
        c.set_delay_time(0.2).unwrap();
        c.set_delay_feedback(0.3).unwrap();
        c.set_delay_mix(0.25).unwrap();
        let after: Vec<_> = c.router().patchbay().connections().collect();
        assert_eq!(before, after);
        let s = c.status();
        assert_eq!((s.boost_gain, s.delay_time, s.delay_feedback, s.delay_mix), (2.0, 0.2, 0.3, 0.25));
    }
}
