use crate::qcp::{Qcp, Superposition, clamp_to_cos_half_angle, rotation_between, weighted_msd};
use glam::{DQuat, DVec3};
use std::f64::consts::FRAC_PI_2;

fn assert_vec_approx(actual: DVec3, expected: DVec3, tolerance: f64) {
    let diff = (actual - expected).length();
    assert!(
        diff <= tolerance,
        "expected {expected:?}, got {actual:?} (diff {diff})"
    );
}

fn sample_points() -> Vec<DVec3> {
    vec![
        DVec3::new(1.0, 0.0, 0.0),
        DVec3::new(0.0, 2.0, 0.0),
        DVec3::new(0.0, 0.0, 3.0),
        DVec3::new(1.0, 1.0, 1.0),
        DVec3::new(-2.0, 0.5, 0.0),
    ]
}

#[test]
fn recovers_a_known_rotation() {
    let rotation = DQuat::from_axis_angle(DVec3::new(1.0, 2.0, 3.0).normalize(), 0.7);
    let moved = sample_points();
    let target: Vec<DVec3> = moved.iter().map(|&p| rotation * p).collect();
    let weights = vec![1.0, 0.5, 2.0, 1.0, 3.0];

    let result = Qcp::default().weighted_superpose(&moved, &target, Some(&weights), false);
    assert!(result.rmsd < 1.0e-5, "rmsd {}", result.rmsd);
    for (m, t) in moved.iter().zip(&target) {
        assert_vec_approx(result.rotation * *m, *t, 1.0e-6);
    }
    assert_eq!(result.translation, DVec3::ZERO);
}

#[test]
fn recovers_rotation_and_translation() {
    let rotation = DQuat::from_rotation_y(-1.2) * DQuat::from_rotation_x(0.4);
    let offset = DVec3::new(3.0, -1.0, 7.5);
    let moved = sample_points();
    let target: Vec<DVec3> = moved.iter().map(|&p| rotation * p + offset).collect();

    let result = Qcp::default().weighted_superpose(&moved, &target, None, true);
    for (m, t) in moved.iter().zip(&target) {
        assert_vec_approx(result.rotation * *m + result.translation, *t, 1.0e-6);
    }
}

#[test]
fn zero_weight_pairs_are_ignored() {
    let moved = vec![DVec3::X, DVec3::Z, DVec3::Y];
    let target = vec![DVec3::Y, DVec3::Z, DVec3::new(5.0, -5.0, 5.0)];
    let weights = vec![1.0, 1.0, 0.0];

    let result = Qcp::default().weighted_superpose(&moved, &target, Some(&weights), false);
    assert_vec_approx(result.rotation * DVec3::X, DVec3::Y, 1.0e-6);
    assert_vec_approx(result.rotation * DVec3::Z, DVec3::Z, 1.0e-6);
}

#[test]
fn degenerate_input_returns_identity() {
    let qcp = Qcp::default();
    assert_eq!(
        qcp.weighted_superpose(&[], &[], None, true),
        Superposition::IDENTITY
    );

    let moved = vec![DVec3::X, DVec3::Y];
    let target = vec![DVec3::Y, DVec3::Z];
    assert_eq!(
        qcp.weighted_superpose(&moved, &target, Some(&[0.0, 0.0]), false),
        Superposition::IDENTITY
    );
    assert_eq!(
        qcp.weighted_superpose(&moved, &target[..1], None, false),
        Superposition::IDENTITY
    );

    let poisoned = vec![DVec3::X, DVec3::new(f64::NAN, 0.0, 0.0)];
    let result = qcp.weighted_superpose(&poisoned, &target, None, false);
    assert_eq!(result, Superposition::IDENTITY);
    assert!(result.rotation.is_finite());
}

#[test]
fn single_point_uses_the_rotation_arc() {
    let result = Qcp::default().weighted_superpose(
        &[DVec3::new(0.0, 2.0, 0.0)],
        &[DVec3::new(0.0, 0.0, 5.0)],
        None,
        false,
    );
    assert_vec_approx(result.rotation * DVec3::Y, DVec3::Z, 1.0e-9);
    assert!((result.rmsd - 3.0).abs() < 1.0e-9);
}

#[test]
fn collinear_headings_still_align() {
    // Rotation about the shared line is free, so the dominant eigenvalue is repeated.
    let moved = vec![DVec3::Y, DVec3::Y * 2.0];
    let target = vec![DVec3::X, DVec3::X * 2.0];

    let result = Qcp::default().weighted_superpose(&moved, &target, None, false);
    assert_vec_approx(result.rotation * DVec3::Y, DVec3::X, 1.0e-6);
    assert!(result.rotation.is_finite());
}

#[test]
fn rotation_between_handles_zero_length() {
    assert_eq!(rotation_between(DVec3::ZERO, DVec3::X), DQuat::IDENTITY);
    let q = rotation_between(DVec3::X * 3.0, DVec3::Z * 0.5);
    assert_vec_approx(q * DVec3::X, DVec3::Z, 1.0e-12);
}

#[test]
fn clamp_limits_angle_and_keeps_axis() {
    let rotation = DQuat::from_rotation_x(1.0);
    let clamped = clamp_to_cos_half_angle(rotation, (0.25f64).cos());
    let (axis, angle) = clamped.to_axis_angle();
    assert!((angle - 0.5).abs() < 1.0e-9, "angle {angle}");
    assert_vec_approx(axis, DVec3::X, 1.0e-9);

    let small = DQuat::from_rotation_z(0.1);
    assert!(clamp_to_cos_half_angle(small, (0.25f64).cos()).abs_diff_eq(small, 1.0e-12));

    // A stiff joint (cos_half = 1) never rotates.
    let frozen = clamp_to_cos_half_angle(DQuat::from_rotation_y(FRAC_PI_2), 1.0);
    assert!(frozen.abs_diff_eq(DQuat::IDENTITY, 1.0e-12));
}

#[test]
fn weighted_msd_averages_by_weight() {
    let a = [DVec3::ZERO, DVec3::ZERO];
    let b = [DVec3::X * 2.0, DVec3::Y];
    assert!((weighted_msd(&a, &b, &[1.0, 3.0]) - (4.0 + 3.0) / 4.0).abs() < 1.0e-12);
    assert_eq!(weighted_msd(&a, &b, &[0.0, 0.0]), 0.0);
}
