use crate::{Error, NodeGraph, NodeId, Transform};
use glam::{DQuat, DVec3};
use std::f64::consts::{FRAC_PI_2, PI};

fn assert_vec_approx(actual: DVec3, expected: DVec3) {
    let diff = (actual - expected).length();
    assert!(
        diff <= 1.0e-9,
        "expected {expected:?}, got {actual:?} (diff {diff})"
    );
}

fn composed_global(graph: &NodeGraph, id: NodeId) -> Transform {
    let mut chain = vec![id];
    let mut cur = graph.parent(id);
    while let Some(p) = cur {
        chain.push(p);
        cur = graph.parent(p);
    }
    chain
        .iter()
        .rev()
        .fold(Transform::IDENTITY, |acc, &n| {
            acc.mul_transform(&graph.local(n).unwrap())
        })
}

fn three_node_chain(graph: &mut NodeGraph) -> (NodeId, NodeId, NodeId) {
    let a = graph
        .insert(Transform::from_translation(DVec3::new(1.0, 0.0, 0.0)), None)
        .unwrap();
    let b = graph
        .insert(
            Transform::from_translation_rotation(
                DVec3::new(0.0, 2.0, 0.0),
                DQuat::from_rotation_z(FRAC_PI_2),
            ),
            Some(a),
        )
        .unwrap();
    let c = graph
        .insert(Transform::from_translation(DVec3::new(0.0, 3.0, 0.0)), Some(b))
        .unwrap();
    (a, b, c)
}

#[test]
fn global_composes_parent_chain() {
    let mut graph = NodeGraph::new();
    let (_, _, c) = three_node_chain(&mut graph);

    // b is rotated 90 degrees about Z, so c's +Y offset becomes -X.
    let global = graph.global(c).unwrap();
    assert_vec_approx(global.translation, DVec3::new(-2.0, 2.0, 0.0));
    assert_vec_approx(global.y_axis(), DVec3::new(-1.0, 0.0, 0.0));
}

#[test]
fn mutation_marks_dependents_dirty_and_lazily_refreshes() {
    let mut graph = NodeGraph::new();
    let (a, b, c) = three_node_chain(&mut graph);
    graph.update_all().unwrap();
    assert_eq!(graph.is_dirty(c), Some(false));

    graph.translate_by(a, DVec3::new(0.0, 0.0, 5.0)).unwrap();
    assert_eq!(graph.is_dirty(a), Some(true));
    assert_eq!(graph.is_dirty(b), Some(true));
    assert_eq!(graph.is_dirty(c), Some(true));

    // Querying the middle node cleans it and its ancestors only.
    graph.update_global(b).unwrap();
    assert_eq!(graph.is_dirty(a), Some(false));
    assert_eq!(graph.is_dirty(b), Some(false));
    assert_eq!(graph.is_dirty(c), Some(true));

    let global = graph.global(c).unwrap();
    assert_vec_approx(global.translation, DVec3::new(-2.0, 2.0, 5.0));
}

#[test]
fn update_all_cleans_every_node() {
    let mut graph = NodeGraph::new();
    let (a, b, c) = three_node_chain(&mut graph);
    let d = graph.insert(Transform::IDENTITY, Some(c)).unwrap();
    graph.rotate_by(a, DQuat::from_rotation_z(0.7)).unwrap();
    graph.remove(b).unwrap();

    graph.update_all().unwrap();
    for id in graph.ids().collect::<Vec<_>>() {
        assert_eq!(graph.is_dirty(id), Some(false), "node {id:?} still dirty");
    }
    assert!(
        graph
            .compute_global(d)
            .unwrap()
            .abs_diff_eq(&composed_global(&graph, d), 1.0e-9)
    );
}

#[test]
fn cache_matches_composition_regardless_of_query_order() {
    let mut graph = NodeGraph::new();
    let (a, b, c) = three_node_chain(&mut graph);
    let d = graph
        .insert(Transform::from_translation(DVec3::new(0.5, 0.0, 0.0)), Some(a))
        .unwrap();

    graph.rotate_by(a, DQuat::from_rotation_x(0.3)).unwrap();
    let _ = graph.global(c).unwrap();
    graph.translate_by(b, DVec3::new(0.0, 0.0, 1.0)).unwrap();
    graph.set_parent(d, Some(c)).unwrap();
    let _ = graph.global(b).unwrap();
    graph.rotate_by_local_axes(c, DQuat::from_rotation_y(1.1)).unwrap();
    graph.set_parent_keep_local(b, None).unwrap();
    graph.translate_to(a, DVec3::new(-4.0, 1.0, 0.0)).unwrap();

    graph.update_all().unwrap();
    for id in [a, b, c, d] {
        let cached = graph.global(id).unwrap();
        let composed = composed_global(&graph, id);
        assert!(
            cached.abs_diff_eq(&composed, 1.0e-9),
            "node {id:?}: cached {cached:?} != composed {composed:?}"
        );
        assert!(graph.compute_global(id).unwrap().abs_diff_eq(&composed, 1.0e-9));
    }
}

#[test]
fn set_parent_preserves_global_pose() {
    let mut graph = NodeGraph::new();
    let (a, _, c) = three_node_chain(&mut graph);
    let other = graph
        .insert(
            Transform::from_translation_rotation(
                DVec3::new(10.0, 0.0, 0.0),
                DQuat::from_rotation_y(PI / 3.0),
            ),
            None,
        )
        .unwrap();

    let before = graph.global(c).unwrap();
    graph.set_parent(c, Some(other)).unwrap();
    assert_eq!(graph.parent(c), Some(other));
    assert!(!graph.dependents(a).is_empty());
    assert!(graph.dependents(other).contains(&c));
    assert!(graph.global(c).unwrap().abs_diff_eq(&before, 1.0e-9));
}

#[test]
fn set_parent_keep_local_moves_with_new_parent() {
    let mut graph = NodeGraph::new();
    let a = graph
        .insert(Transform::from_translation(DVec3::new(0.0, 1.0, 0.0)), None)
        .unwrap();
    let other = graph
        .insert(Transform::from_translation(DVec3::new(5.0, 0.0, 0.0)), None)
        .unwrap();
    let child = graph
        .insert(Transform::from_translation(DVec3::new(0.0, 1.0, 0.0)), Some(a))
        .unwrap();

    graph.set_parent_keep_local(child, Some(other)).unwrap();
    assert_vec_approx(
        graph.global(child).unwrap().translation,
        DVec3::new(5.0, 1.0, 0.0),
    );
}

#[test]
fn parenting_to_a_descendant_reroots_the_descendant_first() {
    let mut graph = NodeGraph::new();
    let (a, b, c) = three_node_chain(&mut graph);
    let top = graph.insert(Transform::IDENTITY, None).unwrap();
    graph.set_parent(a, Some(top)).unwrap();

    let c_before = graph.global(c).unwrap();
    graph.set_parent(b, Some(c)).unwrap();

    // c moved up to b's former parent, then b hung under c.
    assert_eq!(graph.parent(c), Some(a));
    assert_eq!(graph.parent(b), Some(c));
    assert!(!graph.is_ancestor(b, c));
    assert!(graph.global(c).unwrap().abs_diff_eq(&c_before, 1.0e-9));
}

#[test]
fn parenting_to_self_is_rejected() {
    let mut graph = NodeGraph::new();
    let (a, _, _) = three_node_chain(&mut graph);
    assert!(matches!(
        graph.set_parent(a, Some(a)),
        Err(Error::NodeCycle { .. })
    ));
}

#[test]
fn slip_to_keeps_dependents_in_place() {
    let mut graph = NodeGraph::new();
    let (a, b, c) = three_node_chain(&mut graph);
    let anchor = graph
        .insert(Transform::from_translation(DVec3::new(0.0, 0.0, -3.0)), None)
        .unwrap();
    let c_before = graph.global(c).unwrap();

    let target = Transform::from_translation_rotation(
        DVec3::new(7.0, 7.0, 7.0),
        DQuat::from_rotation_x(0.8),
    );
    graph.slip_to(b, Some(anchor), target).unwrap();

    assert_eq!(graph.parent(b), Some(anchor));
    assert!(!graph.dependents(a).contains(&b));
    assert!(graph.global(b).unwrap().abs_diff_eq(&target, 1.0e-9));
    assert!(graph.global(c).unwrap().abs_diff_eq(&c_before, 1.0e-9));
}

#[test]
fn rotate_by_global_spins_about_own_origin() {
    let mut graph = NodeGraph::new();
    let (_, b, c) = three_node_chain(&mut graph);
    let origin_before = graph.global(b).unwrap().translation;

    graph
        .rotate_by_global(b, DQuat::from_rotation_z(-FRAC_PI_2))
        .unwrap();
    let b_global = graph.global(b).unwrap();
    assert_vec_approx(b_global.translation, origin_before);
    assert_vec_approx(b_global.y_axis(), DVec3::Y);
    assert_vec_approx(
        graph.global(c).unwrap().translation,
        origin_before + DVec3::new(0.0, 3.0, 0.0),
    );
}

#[test]
fn align_and_translate_helpers() {
    let mut graph = NodeGraph::new();
    let (a, b, _) = three_node_chain(&mut graph);
    let free = graph.insert(Transform::IDENTITY, Some(a)).unwrap();

    graph.align_globals_to(free, b).unwrap();
    assert!(
        graph
            .global(free)
            .unwrap()
            .abs_diff_eq(&graph.global(b).unwrap(), 1.0e-9)
    );

    graph.align_locals_to(free, b).unwrap();
    assert_eq!(graph.local(free), graph.local(b));

    graph
        .translate_to_global(free, DVec3::new(3.0, 3.0, 3.0))
        .unwrap();
    assert_vec_approx(
        graph.global(free).unwrap().translation,
        DVec3::new(3.0, 3.0, 3.0),
    );
    graph
        .translate_by_global(free, DVec3::new(-1.0, 0.0, 0.0))
        .unwrap();
    assert_vec_approx(
        graph.global(free).unwrap().translation,
        DVec3::new(2.0, 3.0, 3.0),
    );

    let local = graph.to_local_of(b, DVec3::new(-2.0, 2.0, 0.0)).unwrap();
    assert_vec_approx(local, DVec3::new(0.0, 3.0, 0.0));
}

#[test]
fn removing_a_node_hands_dependents_to_its_parent() {
    let mut graph = NodeGraph::new();
    let (a, b, c) = three_node_chain(&mut graph);
    let c_before = graph.global(c).unwrap();

    graph.remove(b).unwrap();
    assert!(!graph.contains(b));
    assert_eq!(graph.parent(c), Some(a));
    assert!(graph.global(c).unwrap().abs_diff_eq(&c_before, 1.0e-9));

    // The stale handle must not alias a node that reuses the slot.
    let reused = graph.insert(Transform::IDENTITY, None).unwrap();
    assert_eq!(reused.slot(), b.slot());
    assert!(graph.local(b).is_none());
    assert!(matches!(
        graph.translate_by(b, DVec3::X),
        Err(Error::UnknownNode { .. })
    ));
}
