//! Offline rendering of a WAV file through the chain.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use stomp_engine::{ChainSettings, DirProvider, OfflineSession, ReverbStatus, StreamFormat};

pub struct RenderJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub impulse_dir: PathBuf,
    pub settings: ChainSettings,
    pub tail_secs: f32,
    pub block_frames: usize,
}

/// Reads `input`, runs it through the chain with the reverb fully loaded,
/// and writes 32-bit float WAV to `output`. Returns the frames written.
pub fn render_file(job: &RenderJob) -> Result<usize> {
    let (samples, spec) = read_wav(&job.input)?;
    let format = StreamFormat {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        max_frames: job.block_frames.max(1),
    };
    let provider = Arc::new(DirProvider::new(job.impulse_dir.clone()));
    let mut session = OfflineSession::new(format, &job.settings, provider)?;
    if job.settings.enabled[stomp_engine::StageKind::Reverb.index()] {
        match session.wait_for_reverb(Duration::from_secs(60)) {
            ReverbStatus::Ready => {}
            ReverbStatus::Failed(e) => tracing::warn!(error = %e, "rendering without reverb"),
            ReverbStatus::Loading => tracing::warn!("reverb still loading, rendering without it"),
        }
    }

    let tail = (job.tail_secs.max(0.0) * spec.sample_rate as f32) as usize;
    let out = session.render(&samples, tail);
    write_wav(&job.output, &out, spec.channels, spec.sample_rate)?;

    let frames = out.len() / spec.channels.max(1) as usize;
    tracing::info!(output = %job.output.display(), frames, "render complete");
    Ok(frames)
}

fn read_wav(path: &Path) -> Result<(Vec<f32>, hound::WavSpec)> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };
    Ok((samples, spec))
}

fn write_wav(path: &Path, samples: &[f32], channels: u16, sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer =
        hound::WavWriter::create(path, spec).with_context(|| format!("creating {}", path.display()))?;
    for &s in samples {
        writer.write_sample(s)?;
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stomp_engine::StageKind;

    fn write_input(path: &Path, samples: &[f32]) {
        write_wav(path, samples, 1, 8000).unwrap();
    }

    #[test]
    fn renders_with_tail() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        write_input(&input, &[0.25; 800]);

        let mut settings = ChainSettings::default();
        settings.enabled[StageKind::Reverb.index()] = false;
        let job = RenderJob {
            input,
            output: output.clone(),
            impulse_dir: dir.path().to_path_buf(),
            settings,
            tail_secs: 0.5,
            block_frames: 128,
        };
        assert_eq!(render_file(&job).unwrap(), 800 + 4000);

        let (samples, spec) = read_wav(&output).unwrap();
        assert_eq!(spec.sample_rate, 8000);
        assert_eq!(samples.len(), 4800);
        assert!(samples.iter().all(|s| s.is_finite()));
        // delayed copy shows up in the tail
        assert!(samples[800..].iter().any(|s| s.abs() > 1e-4));
    }

    #[test]
    fn missing_impulse_still_renders() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.wav");
        write_input(&input, &[0.1; 256]);
        let job = RenderJob {
            input,
            output: dir.path().join("out.wav"),
            impulse_dir: dir.path().join("nowhere"),
            settings: ChainSettings::default(),
            tail_secs: 0.0,
            block_frames: 64,
        };
        assert_eq!(render_file(&job).unwrap(), 256);
    }

    #[test]
    fn unreadable_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let job = RenderJob {
            input: dir.path().join("absent.wav"),
            output: dir.path().join("out.wav"),
            impulse_dir: dir.path().to_path_buf(),
            settings: ChainSettings::default(),
            tail_secs: 0.0,
            block_frames: 64,
        };
        assert!(render_file(&job).is_err());
    }
}
