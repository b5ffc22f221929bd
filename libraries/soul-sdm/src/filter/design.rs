//! NTF synthesis for the noise-shaping loop filters
//!
//! Zeros sit on the unit circle inside the audio band; poles are those of a
//! digital Butterworth filter whose cutoff is bisected until the peak NTF
//! gain reaches the out-of-band limit (Lee's rule for 1-bit loops).

use super::{Section, ZeroPlacement};
use rustfft::num_complex::Complex64;
use std::f64::consts::PI;

/// Frequency grid resolution used when searching for the NTF peak
const GAIN_GRID_POINTS: usize = 1024;

/// Bisection steps for the Butterworth cutoff
const BISECT_STEPS: usize = 60;

/// Tolerance on the achieved peak gain, relative to the target
const GAIN_TOLERANCE: f64 = 0.01;

/// Roots of the Legendre polynomial `P_n`, ascending
///
/// These are the optimal in-band zero positions (normalized to the band
/// edge) for an order-`n` NTF.
pub(super) fn legendre_nodes(n: usize) -> Vec<f64> {
    let mut nodes = Vec::with_capacity(n);

    for i in 1..=n {
        // Tricomi's initial guess, refined with Newton steps
        let mut x = (PI * (i as f64 - 0.25) / (n as f64 + 0.5)).cos();
        for _ in 0..100 {
            let (p, dp) = legendre(n, x);
            let dx = p / dp;
            x -= dx;
            if dx.abs() < 1e-15 {
                break;
            }
        }
        nodes.push(x);
    }

    nodes.sort_by(f64::total_cmp);
    nodes
}

/// `P_n(x)` and its derivative
fn legendre(n: usize, x: f64) -> (f64, f64) {
    let (mut p0, mut p1) = (1.0, x);
    for k in 2..=n {
        let k = k as f64;
        let p2 = ((2.0 * k - 1.0) * x * p1 - (k - 1.0) * p0) / k;
        p0 = p1;
        p1 = p2;
    }
    let dp = n as f64 * (x * p1 - p0) / (x * x - 1.0);
    (p1, dp)
}

/// NTF zero polynomials, one per section (second-order pairs first)
fn zero_sections(order: usize, placement: ZeroPlacement, band_omega: f64) -> Vec<[f64; 2]> {
    let pairs = order / 2;
    let mut sections = Vec::with_capacity(order.div_ceil(2));

    match placement {
        ZeroPlacement::Optimized => {
            for node in legendre_nodes(order).into_iter().filter(|r| *r > 1e-9) {
                sections.push([-2.0 * (node * band_omega).cos(), 1.0]);
            }
        }
        ZeroPlacement::Dc => {
            sections.resize(pairs, [-2.0, 1.0]);
        }
    }

    if order % 2 == 1 {
        sections.push([-1.0, 0.0]);
    }

    sections
}

/// NTF pole polynomials for a Butterworth cutoff `fc` (fraction of the rate)
fn pole_sections(order: usize, fc: f64) -> (Vec<[f64; 2]>, f64) {
    let warped = (PI * fc).tan();
    let mut complex = Vec::with_capacity(order);
    let mut real = None;

    for k in 0..order {
        let angle = PI * (2 * k + order + 1) as f64 / (2 * order) as f64;
        let s = Complex64::from_polar(warped, angle);
        let z = (Complex64::new(1.0, 0.0) + s) / (Complex64::new(1.0, 0.0) - s);
        if z.im > 1e-12 {
            complex.push(z);
        } else if z.im.abs() <= 1e-12 {
            real = Some(z.re);
        }
    }

    complex.sort_by(|a, b| a.norm().total_cmp(&b.norm()));

    let mut radius = 0.0_f64;
    let mut sections: Vec<[f64; 2]> = complex
        .iter()
        .map(|z| {
            radius = radius.max(z.norm());
            [-2.0 * z.re, z.norm_sqr()]
        })
        .collect();

    if let Some(re) = real {
        radius = radius.max(re.abs());
        sections.push([-re, 0.0]);
    }

    (sections, radius)
}

/// Magnitude of `Π (1 + z1 e^{-jω} + z2 e^{-2jω}) / (1 + p1 e^{-jω} + p2 e^{-2jω})`
pub(super) fn ntf_magnitude(poles: &[[f64; 2]], zeros: &[[f64; 2]], omega: f64) -> f64 {
    let z1 = Complex64::from_polar(1.0, -omega);
    let z2 = z1 * z1;
    let one = Complex64::new(1.0, 0.0);

    poles
        .iter()
        .zip(zeros)
        .map(|(p, q)| ((one + z1 * q[0] + z2 * q[1]) / (one + z1 * p[0] + z2 * p[1])).norm())
        .product()
}

fn peak_gain(poles: &[[f64; 2]], zeros: &[[f64; 2]]) -> f64 {
    (0..=GAIN_GRID_POINTS)
        .map(|i| ntf_magnitude(poles, zeros, PI * i as f64 / GAIN_GRID_POINTS as f64))
        .fold(0.0, f64::max)
}

/// Synthesize the section cascade, or `None` if the NTF cannot be realised
pub(super) fn synthesize(
    order: usize,
    placement: ZeroPlacement,
    band_omega: f64,
    max_gain: f64,
) -> Option<Vec<Section>> {
    let zeros = zero_sections(order, placement, band_omega);

    let (mut lo, mut hi) = (1e-6, 0.5 - 1e-6);
    for _ in 0..BISECT_STEPS {
        let mid = 0.5 * (lo + hi);
        let (poles, _) = pole_sections(order, mid);
        if peak_gain(&poles, &zeros) > max_gain {
            hi = mid;
        } else {
            lo = mid;
        }
    }

    let (poles, radius) = pole_sections(order, lo);
    let achieved = peak_gain(&poles, &zeros);
    if radius >= 1.0 - 1e-9 || (achieved - max_gain).abs() > max_gain * GAIN_TOLERANCE {
        return None;
    }

    Some(
        poles
            .into_iter()
            .zip(zeros)
            .map(|(pole, zero)| Section { pole, zero })
            .collect(),
    )
}
