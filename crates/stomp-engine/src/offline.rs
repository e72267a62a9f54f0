//! Run the chain without audio hardware.

use std::sync::Arc;
use std::time::Duration;

use crate::control::{ChainSettings, Controller, ReverbStatus};
use crate::error::Result;
use crate::graph::{Patchbay, Renderer, StreamFormat};
use crate::resource::ResourceProvider;

/// A controller and its renderer driven from one thread.
pub struct OfflineSession {
    pub controller: Controller,
    renderer: Renderer,
}

impl OfflineSession {
    pub fn new(
        format: StreamFormat,
        settings: &ChainSettings,
        provider: Arc<dyn ResourceProvider>,
    ) -> Result<Self> {
        let (bay, renderer) = Patchbay::new(format);
        let controller = Controller::new(bay, settings, provider)?;
        Ok(Self { controller, renderer })
    }

    pub fn format(&self) -> StreamFormat {
        self.renderer.format()
    }

    /// Blocks until the reverb has loaded or failed, or `timeout` passes.
    pub fn wait_for_reverb(&mut self, timeout: Duration) -> ReverbStatus {
        self.controller.wait_for_reverb(timeout)
    }

    /// Processes one interleaved block in place.
    pub fn process(&mut self, block: &mut [f32]) {
        self.renderer.process(block);
    }

    /// Renders `input` followed by `tail_frames` of silence, in blocks of
    /// the session's `max_frames`.
    pub fn render(&mut self, input: &[f32], tail_frames: usize) -> Vec<f32> {
        let format = self.format();
        let channels = format.channels.max(1) as usize;
        let mut out = input.to_vec();
        out.resize(input.len() + tail_frames * channels, 0.0);
        for block in out.chunks_mut(format.max_frames.max(1) * channels) {
            self.renderer.process(block);
        }
        out
    }
}
