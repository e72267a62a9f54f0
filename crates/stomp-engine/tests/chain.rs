use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use stomp_engine::control::ChainSettings;
use stomp_engine::dsp::convolver::Convolver;
use stomp_engine::graph::{Patchbay, StreamFormat};
use stomp_engine::impulse::ImpulseResponse;
use stomp_engine::router::Router;
use stomp_engine::{MemoryProvider, OfflineSession, ReverbStatus, StageKind};

const SR: u32 = 44100;

fn format() -> StreamFormat {
    StreamFormat { sample_rate: SR, channels: 1, max_frames: 512 }
}

/// Half a second of decaying pseudo-noise, encoded as a float WAV.
fn hall_wav() -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SR,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut w = hound::WavWriter::new(&mut cursor, spec).unwrap();
        let mut seed: u32 = 0x1234_5678;
        for i in 0..(SR / 2) {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let noise = (seed >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0;
            let env = (-(i as f32) / (SR as f32 * 0.1)).exp();
            w.write_sample(noise * env).unwrap();
        }
        w.finalize().unwrap();
    }
    cursor.into_inner()
}

fn session() -> OfflineSession {
    let provider = Arc::new(MemoryProvider::new().with("hall", hall_wav()));
    OfflineSession::new(format(), &ChainSettings::default(), provider).unwrap()
}

fn tiny_reverb() -> Convolver {
    let ir = ImpulseResponse { sample_rate: SR, channels: vec![vec![0.6, 0.3, 0.1]] };
    Convolver::new(&ir, 64, false)
}

#[test]
fn impulse_through_full_chain_is_audible_and_bounded() {
    let mut s = session();
    assert_eq!(s.wait_for_reverb(Duration::from_secs(30)), ReverbStatus::Ready);
    assert_eq!(
        s.controller.router().signal_path().unwrap(),
        StageKind::ORDER.to_vec()
    );

    let mut input = vec![0.0f32; 1];
    input[0] = 1.0;
    let out = s.render(&input, 2 * SR as usize);

    assert!(out.iter().all(|v| v.is_finite()), "NaN or inf in output");
    let peak = out.iter().fold(0.0f32, |m, v| m.max(v.abs()));
    assert!(peak < 10.0, "output peak {peak} out of range");

    let energy: f32 = out.iter().map(|v| v * v).sum();
    assert!(energy > 0.0, "output is silent");

    // the first echo lands roughly 0.4 s in
    let echo = (0.45 * SR as f32) as usize;
    let late: f32 = out[echo..].iter().map(|v| v * v).sum();
    assert!(late > 0.0, "no delayed energy");
}

#[test]
fn everything_off_is_a_wire() {
    let mut s = session();
    for kind in StageKind::ORDER {
        s.controller.set_enabled(kind, false).unwrap();
    }
    let input: Vec<f32> = (0..2048).map(|i| (i as f32 * 0.01).sin() * 0.5).collect();
    let out = s.render(&input, 0);
    assert_eq!(out, input);
}

#[test]
fn boost_alone_scales_the_signal() {
    let mut s = session();
    for kind in [StageKind::Distortion, StageKind::Delay, StageKind::Reverb] {
        s.controller.set_enabled(kind, false).unwrap();
    }
    let out = s.render(&[0.2; 1024], 0);
    assert!(out.iter().all(|v| (v - 0.3).abs() < 1e-6));
}

#[test]
fn distortion_changes_mid_stream_keep_audio_flowing() {
    let mut s = session();
    let input: Vec<f32> = (0..512).map(|i| (i as f32 * 0.05).sin() * 0.3).collect();
    let mut block = input.clone();
    s.process(&mut block);
    for amount in [1.0, 50.0, 1000.0, 300.0] {
        s.controller.set_distortion_amount(amount).unwrap();
        let mut block = input.clone();
        s.process(&mut block);
        assert!(block.iter().all(|v| v.is_finite()));
        assert!(block.iter().any(|v| *v != 0.0));
    }
    assert_eq!(s.controller.status().distortion_amount, 300.0);
}

#[test]
fn reverb_toggled_on_before_load_behaves_as_disabled() {
    let mut s = session();
    s.controller.set_enabled(StageKind::Reverb, false).unwrap();
    s.controller.set_enabled(StageKind::Reverb, true).unwrap();
    let path = s.controller.router().signal_path().unwrap();
    assert_eq!(path, vec![StageKind::Boost, StageKind::Distortion, StageKind::Delay]);

    assert_eq!(s.wait_for_reverb(Duration::from_secs(30)), ReverbStatus::Ready);
    assert_eq!(s.controller.router().signal_path().unwrap().last(), Some(&StageKind::Reverb));
}

#[test]
fn missing_impulse_leaves_the_rest_of_the_chain_running() {
    let mut s = OfflineSession::new(format(), &ChainSettings::default(), Arc::new(MemoryProvider::new())).unwrap();
    assert!(matches!(s.wait_for_reverb(Duration::from_secs(30)), ReverbStatus::Failed(_)));
    let out = s.render(&[0.5; 256], 0);
    assert!(out.iter().any(|v| *v != 0.0));
}

fn expected_path(enabled: &[bool; 4], reverb_ready: bool) -> Vec<StageKind> {
    StageKind::ORDER
        .into_iter()
        .filter(|k| enabled[k.index()] && (*k != StageKind::Reverb || reverb_ready))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn any_toggle_sequence_yields_the_enabled_stages_in_order(
        toggles in proptest::collection::vec(0usize..4, 0..24),
        reverb_ready in any::<bool>(),
    ) {
        let (bay, _renderer) = Patchbay::new(format());
        let mut router = Router::new(bay, &ChainSettings::default()).unwrap();
        router.rebuild().unwrap();
        if reverb_ready {
            router.install_reverb(tiny_reverb(), "hall").unwrap();
        }

        let mut enabled = [true; 4];
        for t in toggles {
            let kind = StageKind::ORDER[t];
            enabled[t] = !enabled[t];
            router.set_enabled(kind, enabled[t]);
            router.rebuild().unwrap();
        }

        let expected = expected_path(&enabled, reverb_ready);
        prop_assert_eq!(router.signal_path(), Some(expected.clone()));

        let before: Vec<_> = router.patchbay().connections().collect();
        router.rebuild().unwrap();
        let after: Vec<_> = router.patchbay().connections().collect();
        prop_assert_eq!(&before, &after);

        let delay_edges = if expected.contains(&StageKind::Delay) { 7 } else { 0 };
        prop_assert_eq!(after.len(), expected.len() + 1 + delay_edges);
    }
}
