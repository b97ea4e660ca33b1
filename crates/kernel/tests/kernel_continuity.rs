//! M4 cubic spline properties: compact support, continuity at the piece
//! joins, derivative consistency and 3D normalization.

use std::f32::consts::PI;

use sph_kernel::{cubic_spline, cubic_spline_dq};

#[test]
fn zero_beyond_support() {
    for h in [0.05, 0.2, 1.0] {
        for q in [2.0, 2.000_1, 3.0, 100.0] {
            assert_eq!(cubic_spline(q, h), 0.0);
            assert_eq!(cubic_spline_dq(q * h, h), 0.0);
        }
    }
}

#[test]
fn continuous_at_piece_joins() {
    let h = 0.2;
    let eps = 1.0e-4;
    let scale = cubic_spline(0.0, h);

    // q = 1
    let jump = (cubic_spline(1.0 - eps, h) - cubic_spline(1.0 + eps, h)).abs();
    assert!(jump / scale < 1.0e-3, "W jump at q=1: {jump}");
    let dscale = cubic_spline_dq(h, h).abs();
    let djump = (cubic_spline_dq(h * (1.0 - eps), h) - cubic_spline_dq(h * (1.0 + eps), h)).abs();
    assert!(djump / dscale < 1.0e-3, "dW/dq jump at q=1: {djump}");

    // q = 2 (edge of support)
    assert!(cubic_spline(2.0 - eps, h) / scale < 1.0e-6);
    assert!(cubic_spline_dq(h * (2.0 - eps), h).abs() / dscale < 1.0e-6);
}

#[test]
fn derivative_matches_finite_difference() {
    // With h = 1 the q-derivative of W equals cubic_spline_dq(q, 1).
    let h = 1.0;
    let dq = 1.0e-3;
    let mut q = 0.05;
    while q < 1.95 {
        let fd = (cubic_spline(q + dq, h) - cubic_spline(q - dq, h)) / (2.0 * dq);
        let analytic = cubic_spline_dq(q, h);
        assert!(
            (fd - analytic).abs() < 1.0e-3,
            "q = {q}: finite difference {fd}, analytic {analytic}"
        );
        q += 0.05;
    }
}

#[test]
fn derivative_scales_with_inverse_h() {
    // dW/dq at a fixed q scales as 1/h^4, W as 1/h^3.
    let q = 0.7;
    let (h1, h2) = (0.1_f32, 0.2_f32);
    let ratio_w = cubic_spline(q, h1) / cubic_spline(q, h2);
    let ratio_dw = cubic_spline_dq(q * h1, h1) / cubic_spline_dq(q * h2, h2);
    assert!((ratio_w - 8.0).abs() < 1.0e-3);
    assert!((ratio_dw - 16.0).abs() < 1.0e-3);
}

#[test]
fn normalized_in_three_dimensions() {
    // Integral of W over the support ball: sum W(r/h) 4 pi r^2 dr.
    let h = 0.2_f32;
    let steps = 4000;
    let dr = 2.0 * h / steps as f32;
    let mut integral = 0.0_f64;
    for k in 0..steps {
        let r = (k as f32 + 0.5) * dr;
        integral += (cubic_spline(r / h, h) * 4.0 * PI * r * r * dr) as f64;
    }
    assert!((integral - 1.0).abs() < 1.0e-3, "integral = {integral}");
}
