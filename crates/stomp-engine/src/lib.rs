pub mod control;
pub mod devices;
pub mod dsp;
pub mod error;
pub mod graph;
pub mod impulse;
pub mod offline;
pub mod resource;
pub mod reverb;
pub mod router;
pub mod stage;

mod ring;

pub use control::{ChainSettings, ChainStatus, Controller, ReverbStatus};
pub use error::{Error, Result};
pub use graph::StreamFormat;
pub use offline::OfflineSession;
pub use resource::{DirProvider, MemoryProvider, ResourceProvider};
pub use stage::StageKind;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use ring::{next_pow2, SpscRingF32};
use std::path::PathBuf;
use std::sync::Arc;

use graph::Patchbay;

pub const DEFAULT_BLOCK_FRAMES: usize = 512;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Case-insensitive substring of the input device name.
    pub input_name: Option<String>,
    pub output_name: Option<String>,
    /// Index into the device list, tried before the name.
    pub input_index: Option<usize>,
    pub output_index: Option<usize>,
    pub sample_rate: Option<u32>,
    /// Frames per buffer, if the backend allows it.
    pub block_size: Option<u32>,
    /// Where named impulse responses live.
    pub impulse_dir: PathBuf,
    pub settings: ChainSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            input_name: None,
            output_name: None,
            input_index: None,
            output_index: None,
            sample_rate: None,
            block_size: None,
            impulse_dir: PathBuf::from("sound"),
            settings: ChainSettings::default(),
        }
    }
}

pub type SharedController = Arc<Mutex<Controller>>;

pub struct Engine {
    input_stream: Option<cpal::Stream>,
    output_stream: Option<cpal::Stream>,
    controller: Option<SharedController>,
    cfg: EngineConfig,
}

impl Engine {
    pub fn new(cfg: EngineConfig) -> Self {
        Self { input_stream: None, output_stream: None, controller: None, cfg }
    }

    /// Builds the pedal chain, opens input -> chain -> output, and returns
    /// the control handle. Impulse responses come from `cfg.impulse_dir`.
    pub fn start(&mut self) -> Result<SharedController> {
        let provider = Arc::new(DirProvider::new(self.cfg.impulse_dir.clone()));
        self.start_with(provider)
    }

    /// Same as [`Engine::start`] with a caller-supplied resource provider.
    pub fn start_with(&mut self, provider: Arc<dyn ResourceProvider>) -> Result<SharedController> {
        let host = cpal::default_host();

        let in_dev = pick_device(&host, true, self.cfg.input_name.as_deref(), self.cfg.input_index)
            .map_err(|e| Error::InputUnavailable(e.to_string()))?
            .ok_or_else(|| Error::InputUnavailable("no input device matched (and no default available)".into()))?;
        let out_dev = pick_device(&host, false, self.cfg.output_name.as_deref(), self.cfg.output_index)
            .map_err(|e| Error::OutputUnavailable(e.to_string()))?
            .ok_or_else(|| Error::OutputUnavailable("no output device matched (and no default available)".into()))?;

        let in_cfg_any = in_dev
            .default_input_config()
            .map_err(|e| Error::InputUnavailable(e.to_string()))?;
        let out_cfg_any = out_dev
            .default_output_config()
            .map_err(|e| Error::OutputUnavailable(e.to_string()))?;

        let mut in_cfg = in_cfg_any.config();
        let mut out_cfg = out_cfg_any.config();

        // Honor sample_rate/block_size if provided (best-effort)
        if let Some(sr) = self.cfg.sample_rate {
            in_cfg.sample_rate = cpal::SampleRate(sr);
            out_cfg.sample_rate = cpal::SampleRate(sr);
        }
        if let Some(bs) = self.cfg.block_size {
            out_cfg.buffer_size = cpal::BufferSize::Fixed(bs);
            in_cfg.buffer_size = cpal::BufferSize::Fixed(bs);
        }

        // The chain runs at the output rate with the input's channel count.
        in_cfg.sample_rate = out_cfg.sample_rate;
        let in_channels = in_cfg.channels.max(1) as usize;
        let out_channels = out_cfg.channels.max(1) as usize;
        let sr = out_cfg.sample_rate.0;

        let max_frames = match in_cfg.buffer_size {
            cpal::BufferSize::Fixed(n) => n as usize,
            _ => DEFAULT_BLOCK_FRAMES,
        };
        let format = StreamFormat { sample_rate: sr, channels: in_cfg.channels, max_frames };

        // Capacity: a power-of-two ring >= 8 blocks
        let cap = next_pow2(max_frames * 8 * in_channels).max(1024);
        let ring = Arc::new(SpscRingF32::with_capacity(cap));
        let ring_tx = ring.clone();
        let ring_rx = ring;

        let (bay, renderer) = Patchbay::new(format);
        let controller = Arc::new(Mutex::new(Controller::new(bay, &self.cfg.settings, provider)?));

        // Scratch buffers reused in the callbacks (avoid allocs)
        let mut scratch = Vec::<f32>::with_capacity(cap);
        let mut pulled = Vec::<f32>::with_capacity(cap);

        /* --------- INPUT (format-specific) --------- */
        let input_stream = match in_cfg_any.sample_format() {
            cpal::SampleFormat::F32 => {
                in_dev.build_input_stream::<f32, _, _>(
                    &in_cfg,
                    {
                        let mut renderer = renderer;
                        let ring = ring_tx;
                        move |data: &[f32], _| {
                            scratch.clear();
                            scratch.extend_from_slice(data);
                            renderer.process(&mut scratch);
                            let _ = ring.push_slice(&scratch);
                        }
                    },
                    move |err| tracing::error!(%err, "input stream error"),
                    None,
                )
            }
            cpal::SampleFormat::I16 => {
                in_dev.build_input_stream::<i16, _, _>(
                    &in_cfg,
                    {
                        let mut renderer = renderer;
                        let ring = ring_tx;
                        move |data: &[i16], _| {
                            scratch.clear();
                            scratch.extend(data.iter().map(|&s| s as f32 / 32768.0));
                            renderer.process(&mut scratch);
                            let _ = ring.push_slice(&scratch);
                        }
                    },
                    move |err| tracing::error!(%err, "input stream error"),
                    None,
                )
            }
            cpal::SampleFormat::U16 => {
                in_dev.build_input_stream::<u16, _, _>(
                    &in_cfg,
                    {
                        let mut renderer = renderer;
                        let ring = ring_tx;
                        move |data: &[u16], _| {
                            scratch.clear();
                            scratch.extend(data.iter().map(|&s| ((s as f32 / 65535.0) * 2.0) - 1.0));
                            renderer.process(&mut scratch);
                            let _ = ring.push_slice(&scratch);
                        }
                    },
                    move |err| tracing::error!(%err, "input stream error"),
                    None,
                )
            }
            other => return Err(Error::InputUnavailable(format!("unsupported input format: {other:?}"))),
        }
        .map_err(|e| Error::InputUnavailable(e.to_string()))?;

        /* --------- OUTPUT (format-specific) -------- */
        // Whole frames of the chain's channel count are spread over the
        // device's channels. Underruns play silence.
        let output_stream = match out_cfg_any.sample_format() {
            cpal::SampleFormat::F32 => {
                out_dev.build_output_stream::<f32, _, _>(
                    &out_cfg,
                    move |out: &mut [f32], _| match pull(&ring_rx, &mut pulled, out.len() / out_channels * in_channels) {
                        Some(src) => remix(src, in_channels, out, out_channels, |v| v.clamp(-1.0, 1.0)),
                        None => out.fill(0.0),
                    },
                    move |err| tracing::error!(%err, "output stream error"),
                    None,
                )
            }
            cpal::SampleFormat::I16 => {
                out_dev.build_output_stream::<i16, _, _>(
                    &out_cfg,
                    move |out: &mut [i16], _| match pull(&ring_rx, &mut pulled, out.len() / out_channels * in_channels) {
                        Some(src) => remix(src, in_channels, out, out_channels, |v| {
                            (v.clamp(-1.0, 1.0) * 32767.0) as i16
                        }),
                        None => out.fill(0),
                    },
                    move |err| tracing::error!(%err, "output stream error"),
                    None,
                )
            }
            cpal::SampleFormat::U16 => {
                out_dev.build_output_stream::<u16, _, _>(
                    &out_cfg,
                    move |out: &mut [u16], _| match pull(&ring_rx, &mut pulled, out.len() / out_channels * in_channels) {
                        Some(src) => remix(src, in_channels, out, out_channels, |v| {
                            (((v.clamp(-1.0, 1.0) + 1.0) * 0.5) * 65535.0) as u16
                        }),
                        None => out.fill(32768),
                    },
                    move |err| tracing::error!(%err, "output stream error"),
                    None,
                )
            }
            other => return Err(Error::OutputUnavailable(format!("unsupported output format: {other:?}"))),
        }
        .map_err(|e| Error::OutputUnavailable(e.to_string()))?;

        input_stream.play().map_err(|e| Error::Stream(format!("failed to play input stream: {e}")))?;
        output_stream.play().map_err(|e| Error::Stream(format!("failed to play output stream: {e}")))?;

        tracing::info!(
            input = %in_dev.name().unwrap_or_default(),
            output = %out_dev.name().unwrap_or_default(),
            sample_rate = sr,
            channels = in_channels,
            block = max_frames,
            "engine started"
        );

        self.input_stream = Some(input_stream);
        self.output_stream = Some(output_stream);
        self.controller = Some(controller.clone());
        Ok(controller)
    }

    pub fn controller(&self) -> Option<SharedController> {
        self.controller.clone()
    }

    /// Drops the streams. A reverb load still in flight is discarded.
    pub fn stop(&mut self) {
        self.input_stream = None;
        self.output_stream = None;
        self.controller = None;
    }
}

fn pull<'a>(ring: &SpscRingF32, buf: &'a mut Vec<f32>, samples: usize) -> Option<&'a [f32]> {
    buf.resize(samples, 0.0);
    ring.pop_into(buf).then_some(&buf[..])
}

/// Copies `src` frames (`src_ch` wide) into `dst` frames (`dst_ch` wide).
/// Destination channel `c` takes source channel `c % src_ch`.
fn remix<T: Copy>(src: &[f32], src_ch: usize, dst: &mut [T], dst_ch: usize, conv: impl Fn(f32) -> T) {
    for (s, d) in src.chunks(src_ch).zip(dst.chunks_mut(dst_ch)) {
        for (c, o) in d.iter_mut().enumerate() {
            *o = conv(s[c % s.len()]);
        }
    }
}

/* ---------- device picking (by name or index) ---------- */

fn pick_device(
    host: &cpal::Host,
    want_input: bool,
    name_substr: Option<&str>,
    index: Option<usize>,
) -> std::result::Result<Option<cpal::Device>, cpal::DevicesError> {
    let usable = |dev: &cpal::Device| {
        if want_input {
            dev.supported_input_configs().map(|mut c| c.next().is_some()).unwrap_or(false)
        } else {
            dev.supported_output_configs().map(|mut c| c.next().is_some()).unwrap_or(false)
        }
    };

    // Try explicit index first
    if let Some(idx) = index {
        if let Some(dev) = host.devices()?.filter(|d| usable(d)).nth(idx) {
            return Ok(Some(dev));
        }
        tracing::warn!(idx, want_input, "device index not found, falling back");
    }

    // Then try substring match
    if let Some(q) = name_substr {
        let qn = q.to_lowercase();
        for dev in host.devices()? {
            let name = dev.name().unwrap_or_default();
            if name.to_lowercase().contains(&qn) && usable(&dev) {
                return Ok(Some(dev));
            }
        }
        tracing::warn!(query = q, want_input, "no device name matched, falling back to default");
    }

    // Fallback to default
    Ok(if want_input { host.default_input_device() } else { host.default_output_device() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remix_spreads_mono_over_stereo() {
        let mut out = [0.0f32; 4];
        remix(&[0.5, -0.5], 1, &mut out, 2, |v| v);
        assert_eq!(out, [0.5, 0.5, -0.5, -0.5]);
    }

    #[test]
    fn remix_drops_extra_source_channels() {
        let mut out = [0i16; 2];
        remix(&[1.0, 0.0, -1.0, 0.0], 2, &mut out, 1, |v| (v * 100.0) as i16);
        assert_eq!(out, [100, -100]);
    }
}
