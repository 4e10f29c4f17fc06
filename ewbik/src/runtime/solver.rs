//! Iterative solve over the segment tree.
//!
//! Each bone is rotated about its own origin so that the tips of the pinned bones beneath it line
//! up with their targets in the weighted least-squares sense. Orientation objectives are encoded
//! as extra point pairs placed along each active axis, on both sides of the tip.

use crate::kusudama::return_schedule;
use crate::qcp::{Qcp, clamp_to_cos_half_angle, weighted_msd};
use crate::runtime::{BoneId, Skeleton};
use crate::{Error, Kusudama, NodeGraph, NodeId, Transform};
use glam::DVec3;
use std::f64::consts::PI;

/// A pinned bone as seen from one of its ancestors.
#[derive(Copy, Clone, Debug)]
pub(super) struct Effector {
    frame: NodeId,
    height: f64,
    pub(super) target: NodeId,
    pub(super) weight: f64,
    /// Weight of the X/Y/Z orientation objectives; zero when inactive.
    pub(super) axis_weights: DVec3,
}

/// Solver state for one bone, fixed for the duration of a solve call.
#[derive(Clone, Debug)]
pub(super) struct WorkingBone {
    pub(super) frame: NodeId,
    constraint_frame: NodeId,
    constraint: Option<Kusudama>,
    cos_half_dampen: f64,
    return_schedule: Vec<f64>,
    pub(super) translate: bool,
    pub(super) stabilization_passes: usize,
    pub(super) effectors: Vec<Effector>,
}

/// Paired tip and target points relative to a bone's origin.
#[derive(Default)]
struct Headings {
    tips: Vec<DVec3>,
    targets: Vec<DVec3>,
    weights: Vec<f64>,
}

impl Headings {
    fn push(&mut self, tip: DVec3, target: DVec3, weight: f64) {
        self.tips.push(tip);
        self.targets.push(target);
        self.weights.push(weight);
    }

    fn weighted_offset(&self) -> DVec3 {
        let mut offset = DVec3::ZERO;
        let mut total = 0.0;
        for ((tip, target), &w) in self.tips.iter().zip(&self.targets).zip(&self.weights) {
            offset += (*target - *tip) * w;
            total += w;
        }
        if total > 0.0 { offset / total } else { DVec3::ZERO }
    }
}

fn headings(
    sim: &mut NodeGraph,
    origin: DVec3,
    effectors: &[Effector],
) -> Result<Headings, Error> {
    let mut out = Headings::default();
    for effector in effectors {
        let bone = sim.global(effector.frame)?;
        let tip = Transform {
            translation: bone.transform_point(DVec3::Y * effector.height),
            ..bone
        };
        let target = sim.global(effector.target)?;
        out.push(
            tip.translation - origin,
            target.translation - origin,
            effector.weight,
        );

        let scale_by = (target.translation - origin).length().max(1.0);
        let axes = [
            (effector.axis_weights.x, DVec3::X),
            (effector.axis_weights.y, DVec3::Y),
            (effector.axis_weights.z, DVec3::Z),
        ];
        for (weight, axis) in axes {
            if weight <= 0.0 {
                continue;
            }
            let tip_axis = tip.rotation * axis * scale_by;
            let target_axis = target.rotation * axis * scale_by;
            out.push(
                tip.translation + tip_axis - origin,
                target.translation + target_axis - origin,
                weight,
            );
            out.push(
                tip.translation - tip_axis - origin,
                target.translation - target_axis - origin,
                weight,
            );
        }
    }
    Ok(out)
}

pub(super) fn current_msd(sim: &mut NodeGraph, bone: &WorkingBone) -> Result<f64, Error> {
    let origin = sim.global(bone.frame)?.translation;
    let h = headings(sim, origin, &bone.effectors)?;
    Ok(weighted_msd(&h.tips, &h.targets, &h.weights))
}

/// One damped alignment step followed by a hard snap into the bone's constraint.
fn align_step(qcp: &Qcp, sim: &mut NodeGraph, bone: &WorkingBone) -> Result<(), Error> {
    let origin = sim.global(bone.frame)?.translation;
    let h = headings(sim, origin, &bone.effectors)?;
    let fit = qcp.weighted_superpose(&h.tips, &h.targets, Some(&h.weights), bone.translate);
    let rotation = clamp_to_cos_half_angle(fit.rotation, bone.cos_half_dampen);
    sim.rotate_by_global(bone.frame, rotation)?;

    if bone.translate {
        let rotated = headings(sim, origin, &bone.effectors)?;
        sim.translate_by_global(bone.frame, rotated.weighted_offset())?;
    }
    if let Some(constraint) = &bone.constraint {
        constraint.snap_to_limits(sim, bone.frame, bone.constraint_frame)?;
    }
    Ok(())
}

pub(super) fn solve_bone(
    qcp: &Qcp,
    sim: &mut NodeGraph,
    bone: &WorkingBone,
    iteration: usize,
) -> Result<(), Error> {
    let passes = bone.stabilization_passes;
    let mut best_local = sim
        .local(bone.frame)
        .ok_or(Error::UnknownNode { index: bone.frame.slot() })?;
    let mut best_msd = if passes > 0 {
        current_msd(sim, bone)?
    } else {
        f64::INFINITY
    };

    for _ in 0..=passes {
        align_step(qcp, sim, bone)?;
        if passes == 0 {
            break;
        }
        let msd = current_msd(sim, bone)?;
        if msd <= best_msd {
            best_msd = msd;
            best_local = sim
                .local(bone.frame)
                .ok_or(Error::UnknownNode { index: bone.frame.slot() })?;
        } else {
            sim.set_local(bone.frame, best_local)?;
            break;
        }
    }

    if let (Some(constraint), Some(&strength)) =
        (&bone.constraint, bone.return_schedule.get(iteration))
    {
        constraint.set_axes_to_returnfulled(
            sim,
            bone.frame,
            bone.constraint_frame,
            (strength * 0.5).cos(),
            strength,
        )?;
    }
    Ok(())
}

impl Skeleton {
    /// Enabled pins in `bone`'s subtree with their accumulated depth falloff.
    pub(super) fn effectors_for(&self, bone: BoneId) -> Vec<Effector> {
        let mut out = Vec::new();
        let mut stack = vec![(bone, 1.0)];
        while let Some((id, factor)) = stack.pop() {
            let Some(b) = self.bones.get(id) else {
                continue;
            };
            let mut child_factor = factor;
            if let Some(pin) = b.pin.as_ref().filter(|p| p.is_enabled()) {
                let weight = pin.weight * factor;
                let max_priority = pin.max_priority();
                let axis_weights = if max_priority > 0.0 {
                    pin.priorities / max_priority * weight
                } else {
                    DVec3::ZERO
                };
                out.push(Effector {
                    frame: b.frame,
                    height: b.height,
                    target: pin.target,
                    weight,
                    axis_weights,
                });
                child_factor *= pin.depth_falloff;
            }
            if child_factor > 0.0 {
                stack.extend(b.effectored_children.iter().map(|&c| (c, child_factor)));
            }
        }
        out
    }

    pub(super) fn working_bone(&self, id: BoneId) -> Result<WorkingBone, Error> {
        let bone = self.bone(id)?;
        let translate = bone.parent.is_none() && !bone.is_pinned();
        let base = if translate { PI } else { self.config.dampening };
        let dampening = base * (1.0 - bone.stiffness);
        let effectors = self.effectors_for(id);
        let single_point =
            effectors.len() == 1 && effectors.iter().all(|e| e.axis_weights == DVec3::ZERO);
        let stabilization_passes = if translate || single_point || effectors.is_empty() {
            0
        } else {
            self.config.stabilization_passes
        };
        let painfulness = bone.constraint.as_ref().map_or(0.0, Kusudama::painfulness);
        Ok(WorkingBone {
            frame: bone.frame,
            constraint_frame: bone.constraint_frame,
            constraint: bone.constraint.clone(),
            cos_half_dampen: (dampening * 0.5).cos(),
            return_schedule: return_schedule(self.config.iterations, painfulness, dampening),
            translate,
            stabilization_passes,
            effectors,
        })
    }

    /// Solves the pins reachable from `from`: starting at the nearest segment whose base is
    /// pinned (or the root segment), then outward past each pinned tip.
    ///
    /// Unreachable targets are not an error; the chain settles on a best-effort pose. If the
    /// result is not finite, the skeleton is left untouched.
    pub fn solve(&mut self, from: BoneId) -> Result<(), Error> {
        self.bone(from)?;
        self.ensure_segmented();
        let Some(start) = self.segments.index_of(from) else {
            return Ok(());
        };
        let groups = self.segments.solve_groups(self.segments.group_root(start));

        let mut plan = Vec::new();
        for group in &groups {
            for &index in group {
                let Some(segment) = self.segments.get(index) else {
                    continue;
                };
                for &bone in segment.bones.iter().rev() {
                    let working = self.working_bone(bone)?;
                    if !working.effectors.is_empty() {
                        plan.push(working);
                    }
                }
            }
        }
        if plan.is_empty() {
            log::debug!("nothing to solve from bone '{}'", self.bone(from)?.tag);
            return Ok(());
        }

        log::debug!(
            "solving {} bones in {} groups for {} iterations",
            plan.len(),
            groups.len(),
            self.config.iterations
        );
        let qcp = Qcp::new(self.config.epsilon);
        let mut sim = self.nodes.clone();
        for iteration in 0..self.config.iterations {
            for bone in &plan {
                solve_bone(&qcp, &mut sim, bone, iteration)?;
            }
            log::trace!("iteration {iteration} complete");
        }

        let mut solved = Vec::with_capacity(plan.len());
        for bone in &plan {
            let local = sim
                .local(bone.frame)
                .ok_or(Error::UnknownNode { index: bone.frame.slot() })?;
            if !local.is_finite() {
                log::warn!("discarding solve: non-finite pose for node {}", bone.frame.slot());
                return Ok(());
            }
            solved.push((bone.frame, local));
        }
        for (frame, local) in solved {
            self.nodes.set_local(frame, local)?;
        }
        Ok(())
    }

    /// Solves the whole skeleton.
    pub fn solve_all(&mut self) -> Result<(), Error> {
        self.solve(self.root)
    }
}
