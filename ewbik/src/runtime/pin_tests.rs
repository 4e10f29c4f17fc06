use crate::{BoneId, Error, MODE_X, MODE_Y, MODE_Z, Skeleton, Transform};
use glam::{DQuat, DVec3};

fn assert_vec_approx(actual: DVec3, expected: DVec3) {
    let diff = (actual - expected).length();
    assert!(
        diff <= 1.0e-9,
        "expected {expected:?}, got {actual:?} (diff {diff})"
    );
}

fn fork() -> (Skeleton, BoneId, BoneId, BoneId) {
    let mut skeleton = Skeleton::new("root", DVec3::Y, 2.0).unwrap();
    let root = skeleton.root();
    let a = skeleton.add_bone(root, DVec3::X, 1.0, "a").unwrap();
    let b = skeleton.add_bone(root, DVec3::NEG_X, 1.0, "b").unwrap();
    let c = skeleton.add_bone(root, DVec3::Z, 1.0, "c").unwrap();
    for bone in [a, b, c] {
        skeleton.enable_pin(bone).unwrap();
    }
    (skeleton, a, b, c)
}

#[test]
fn enable_pin_targets_the_current_tip() {
    let mut skeleton = Skeleton::new("root", DVec3::Y, 2.0).unwrap();
    let root = skeleton.root();
    let arm = skeleton.add_bone(root, DVec3::X, 3.0, "arm").unwrap();
    assert!(skeleton.pin(arm).is_none());

    skeleton.enable_pin(arm).unwrap();
    let pin = skeleton.pin(arm).unwrap();
    assert!(pin.is_enabled());
    assert_eq!(pin.weight(), 1.0);
    assert_eq!(pin.depth_falloff(), 1.0);
    assert_eq!(pin.mode_code(), 0);
    assert_eq!(pin.subtarget_count(), 1);
    assert_eq!(skeleton.nodes().parent(pin.target()), Some(skeleton.armature_frame()));

    let target = skeleton.pin_target_global(arm).unwrap();
    assert_vec_approx(target.translation, DVec3::new(3.0, 2.0, 0.0));
    assert!(
        target
            .rotation
            .abs_diff_eq(skeleton.bone_global(arm).unwrap().rotation, 1.0e-9)
    );
}

#[test]
fn priorities_select_orientation_objectives() {
    let (mut skeleton, a, _, _) = fork();
    skeleton
        .set_pin_priorities(a, DVec3::new(1.0, 0.0, 0.5))
        .unwrap();
    let pin = skeleton.pin(a).unwrap();
    assert_eq!(pin.mode_code(), MODE_X | MODE_Z);
    assert_eq!(pin.subtarget_count(), 3);
    assert_eq!(pin.max_priority(), 1.0);

    skeleton.set_pin_priorities(a, DVec3::splat(0.2)).unwrap();
    assert_eq!(skeleton.pin(a).unwrap().mode_code(), MODE_X | MODE_Y | MODE_Z);
    assert_eq!(skeleton.pin(a).unwrap().subtarget_count(), 4);

    assert!(matches!(
        skeleton.set_pin_priorities(a, DVec3::new(0.0, -1.0, 0.0)),
        Err(Error::InvalidValue { .. })
    ));
}

#[test]
fn pin_setters_validate_and_persist_through_disable() {
    let (mut skeleton, a, _, _) = fork();
    skeleton.set_pin_weight(a, 2.5).unwrap();
    skeleton.set_pin_depth_falloff(a, 4.0).unwrap();
    assert!(skeleton.set_pin_weight(a, -1.0).is_err());
    assert!(skeleton.set_pin_depth_falloff(a, f64::NAN).is_err());

    let target = skeleton.pin(a).unwrap().target();
    skeleton.disable_pin(a).unwrap();
    let pin = skeleton.pin(a).unwrap();
    assert!(!pin.is_enabled());
    assert_eq!(pin.weight(), 2.5);
    assert_eq!(pin.depth_falloff(), 1.0);

    skeleton.enable_pin(a).unwrap();
    assert!(skeleton.pin(a).unwrap().is_enabled());
    assert_eq!(skeleton.pin(a).unwrap().target(), target);
}

#[test]
fn missing_pins_are_reported() {
    let mut skeleton = Skeleton::new("root", DVec3::Y, 1.0).unwrap();
    let root = skeleton.root();
    assert!(matches!(
        skeleton.disable_pin(root),
        Err(Error::NoPin { ref bone }) if bone == "root"
    ));
    assert!(matches!(
        skeleton.set_pin_position(root, DVec3::ZERO),
        Err(Error::NoPin { .. })
    ));
    assert!(skeleton.remove_pin(root).is_err());
}

#[test]
fn pin_pose_setters() {
    let (mut skeleton, a, _, _) = fork();
    skeleton
        .set_pin_position(a, DVec3::new(4.0, 5.0, 6.0))
        .unwrap();
    assert_vec_approx(
        skeleton.pin_target_global(a).unwrap().translation,
        DVec3::new(4.0, 5.0, 6.0),
    );

    let rotation = DQuat::from_rotation_x(0.7);
    skeleton.set_pin_orientation(a, rotation).unwrap();
    let target = skeleton.pin_target_global(a).unwrap();
    assert!(target.rotation.abs_diff_eq(rotation, 1.0e-9));
    assert_vec_approx(target.translation, DVec3::new(4.0, 5.0, 6.0));

    let pose = Transform::from_translation_rotation(DVec3::X, DQuat::from_rotation_y(0.3));
    skeleton.set_pin_global(a, pose).unwrap();
    assert!(skeleton.pin_target_global(a).unwrap().abs_diff_eq(&pose, 1.0e-9));
}

#[test]
fn child_pin_targets_follow_their_parent() {
    let (mut skeleton, a, b, _) = fork();
    skeleton.set_parent_pin(b, Some(a)).unwrap();
    assert_eq!(skeleton.pin(b).unwrap().parent_pin(), Some(a));
    assert_eq!(skeleton.pin(a).unwrap().child_pins(), &[b]);
    assert!(skeleton.is_pin_ancestor(a, b));

    let b_before = skeleton.pin_target_global(b).unwrap().translation;
    let a_before = skeleton.pin_target_global(a).unwrap().translation;
    skeleton
        .set_pin_position(a, a_before + DVec3::new(0.0, 0.0, 3.0))
        .unwrap();
    assert_vec_approx(
        skeleton.pin_target_global(b).unwrap().translation,
        b_before + DVec3::new(0.0, 0.0, 3.0),
    );

    skeleton.set_parent_pin(b, None).unwrap();
    assert_eq!(skeleton.pin(b).unwrap().parent_pin(), None);
    assert!(skeleton.pin(a).unwrap().child_pins().is_empty());
}

#[test]
fn pin_cycles_are_rerooted() {
    let (mut skeleton, a, b, c) = fork();
    skeleton.set_parent_pin(a, Some(c)).unwrap();
    skeleton.set_parent_pin(b, Some(a)).unwrap();

    // b is below a, so a first moves to its former parent c.
    skeleton.set_parent_pin(a, Some(b)).unwrap();
    assert_eq!(skeleton.pin(b).unwrap().parent_pin(), Some(c));
    assert_eq!(skeleton.pin(a).unwrap().parent_pin(), Some(b));
    assert!(!skeleton.is_pin_ancestor(a, b));
    assert_eq!(
        skeleton.nodes().parent(skeleton.pin(a).unwrap().target()),
        Some(skeleton.pin(b).unwrap().target())
    );

    assert!(matches!(
        skeleton.set_parent_pin(a, Some(a)),
        Err(Error::InvalidValue { .. })
    ));
}

#[test]
fn removing_a_pin_hands_children_to_its_parent() {
    let (mut skeleton, a, b, c) = fork();
    skeleton.set_parent_pin(b, Some(a)).unwrap();
    skeleton.set_parent_pin(c, Some(b)).unwrap();
    let c_before = skeleton.pin_target_global(c).unwrap();

    skeleton.remove_pin(b).unwrap();
    assert!(skeleton.pin(b).is_none());
    assert_eq!(skeleton.pin(c).unwrap().parent_pin(), Some(a));
    assert_eq!(skeleton.pin(a).unwrap().child_pins(), &[c]);
    assert!(
        skeleton
            .pin_target_global(c)
            .unwrap()
            .abs_diff_eq(&c_before, 1.0e-9)
    );
    assert!(!skeleton.bone(skeleton.root()).unwrap().effectored_children().contains(&b));
}
