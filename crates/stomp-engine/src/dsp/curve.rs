//! Distortion transfer curve.
//!
//! The curve is a static lookup table over the input range [-1, 1). Its
//! length is independent of the stream's sample rate.

use std::f64::consts::PI;
use std::sync::Arc;

/// Reference curve length.
pub const CURVE_LEN: usize = 44100;

/// Builds the saturation curve for `amount` (k):
///
/// ```text
/// x        = i * 2 / n - 1
/// curve[i] = (3 + k) * x * (π / 180) * 20 / (π + k * |x|)
/// ```
///
/// Larger `k` gives a steeper knee. The result is immutable; a new amount
/// means a new curve.
pub fn distortion_curve(amount: f32, len: usize) -> Arc<[f32]> {
    let k = amount as f64;
    let n = len as f64;
    let deg = PI / 180.0;
    (0..len)
        .map(|i| {
            let x = i as f64 * 2.0 / n - 1.0;
            ((3.0 + k) * x * 20.0 * deg / (PI + k * x.abs())) as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_curve_endpoints() {
        let c = distortion_curve(300.0, CURVE_LEN);
        assert_eq!(c.len(), CURVE_LEN);

        let expected0 = (3.0 + 300.0) * -1.0 * (PI / 180.0) * 20.0 / (PI + 300.0);
        assert!((c[0] as f64 - expected0).abs() < 1e-6);
        assert!(c[CURVE_LEN / 2].abs() < 1e-6);
    }

    #[test]
    fn curve_is_odd_about_the_midpoint() {
        let c = distortion_curve(300.0, CURVE_LEN);
        let mid = CURVE_LEN / 2;
        for d in 1..mid {
            let a = c[mid + d];
            let b = c[mid - d];
            assert!((a + b).abs() < 1e-5, "asymmetry at offset {d}: {a} vs {b}");
        }
    }

    #[test]
    fn steepness_grows_with_amount() {
        let soft = distortion_curve(1.0, 1000);
        let hard = distortion_curve(1000.0, 1000);
        // just above zero the hard curve is much steeper
        assert!(hard[510] > soft[510]);
    }

    #[test]
    fn zero_amount_is_linear() {
        let c = distortion_curve(0.0, 8);
        let slope = 3.0 * 20.0 * (PI / 180.0) / PI;
        for (i, v) in c.iter().enumerate() {
            let x = i as f64 * 2.0 / 8.0 - 1.0;
            assert!((*v as f64 - slope * x).abs() < 1e-6);
        }
    }
}
