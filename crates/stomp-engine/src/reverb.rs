//! One-shot background load of the reverb's impulse response.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError};

use crate::dsp::convolver::Convolver;
use crate::error::{Error, Result};
use crate::impulse::decode_impulse;
use crate::resource::ResourceProvider;

#[derive(Debug, Clone)]
pub struct ReverbConfig {
    pub resource: String,
    pub sample_rate: u32,
    pub partition: usize,
    pub normalize: bool,
}

/// Fetch, decode and transform an impulse response. Blocking.
pub fn load_reverb(provider: &dyn ResourceProvider, cfg: &ReverbConfig) -> Result<Convolver> {
    let bytes = provider.fetch(&cfg.resource)?;
    let ir = decode_impulse(&cfg.resource, &bytes, cfg.sample_rate)?;
    tracing::debug!(
        resource = %cfg.resource,
        frames = ir.frames(),
        channels = ir.channels.len(),
        "impulse response decoded"
    );
    Ok(Convolver::new(&ir, cfg.partition, cfg.normalize))
}

/// Handle to a load running on its own thread. Resolves exactly once; the
/// result is dropped if the handle is gone by then.
pub struct ReverbLoader {
    resource: String,
    rx: Receiver<Result<Convolver>>,
}

impl ReverbLoader {
    pub fn spawn(provider: Arc<dyn ResourceProvider>, cfg: ReverbConfig) -> Self {
        let (tx, rx) = bounded(1);
        let resource = cfg.resource.clone();
        let worker_tx = tx.clone();
        let spawned = thread::Builder::new()
            .name("reverb-loader".into())
            .spawn(move || {
                let _ = worker_tx.send(load_reverb(provider.as_ref(), &cfg));
            });
        if let Err(e) = spawned {
            let _ = tx.send(Err(Error::load_failed(&resource, e)));
        }
        Self { resource, rx }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// `None` while the load is still running.
    pub fn try_take(&self) -> Option<Result<Convolver>> {
        match self.rx.try_recv() {
            Ok(r) => Some(r),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(self.vanished())),
        }
    }

    /// Blocks up to `timeout` for the result.
    pub fn wait(&self, timeout: Duration) -> Option<Result<Convolver>> {
        match self.rx.recv_timeout(timeout) {
            Ok(r) => Some(r),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(self.vanished())),
        }
    }

    fn vanished(&self) -> Error {
        Error::load_failed(&self.resource, "loader exited without a result")
    }
}
