//! Orientation constraint built from a sequence of limit cones on the unit sphere.
//!
//! Adjacent cones are joined by a path whose sides are arcs of two "tangent circles", each
//! touching both cones. A bone's Y heading (expressed in its constraint frame) must lie inside a
//! cone or on one of these paths. An optional twist band bounds the rotation about Y.

use crate::qcp::{clamp_to_cos_half_angle, rotation_between};
use crate::{Error, NodeGraph, NodeId};
use glam::{DQuat, DVec3};
use std::f64::consts::{PI, TAU};

const BOUNDS_EPSILON: f64 = 1.0e-9;

/// The two circles tangent to a cone and its successor, one on each side of the great circle
/// through both control points.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TangentCircles {
    /// Center on the negative side of `cone × next`.
    pub center1: DVec3,
    /// Center on the positive side of `cone × next`.
    pub center2: DVec3,
    pub radius: f64,
    pub radius_cos: f64,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LimitCone {
    control_point: DVec3,
    radius: f64,
    radius_cos: f64,
    tangents: Option<TangentCircles>,
}

impl LimitCone {
    /// `control_point` is normalised (zero length falls back to +Y); `radius` is clamped to
    /// `[0, π]`.
    pub fn new(control_point: DVec3, radius: f64) -> Self {
        let radius = if radius.is_finite() {
            radius.clamp(0.0, PI)
        } else {
            0.0
        };
        Self {
            control_point: control_point.try_normalize().unwrap_or(DVec3::Y),
            radius,
            radius_cos: radius.cos(),
            tangents: None,
        }
    }

    pub fn control_point(&self) -> DVec3 {
        self.control_point
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn radius_cos(&self) -> f64 {
        self.radius_cos
    }

    /// Tangent circles joining this cone to the next one; `None` for the last cone.
    pub fn tangent_circles(&self) -> Option<&TangentCircles> {
        self.tangents.as_ref()
    }

    fn contains(&self, direction: DVec3) -> bool {
        direction.dot(self.control_point) >= self.radius_cos - BOUNDS_EPSILON
    }

    fn closest_on_rim(&self, direction: DVec3) -> DVec3 {
        rotate_toward(self.control_point, direction, self.radius)
    }
}

fn rotate_toward(from: DVec3, to: DVec3, angle: f64) -> DVec3 {
    let axis = from
        .cross(to)
        .try_normalize()
        .unwrap_or_else(|| from.any_orthonormal_vector());
    DQuat::from_axis_angle(axis, angle) * from
}

fn tangent_circles(a: &LimitCone, b: &LimitCone) -> TangentCircles {
    let radius = ((PI - (a.radius + b.radius)) * 0.5).max(0.0);
    let radius_cos = radius.cos();
    // Centers sit at angle (rA + tR) from A and (rB + tR) from B.
    let cos_a = (a.radius + radius).cos();
    let cos_b = (b.radius + radius).cos();
    let (ca, cb) = (a.control_point, b.control_point);
    let d = ca.dot(cb).clamp(-1.0, 1.0);
    let denom = 1.0 - d * d;

    let cross = ca.cross(cb);
    let (center1, center2) = match cross.try_normalize() {
        Some(normal) if denom > 1.0e-12 => {
            let ka = (cos_a - d * cos_b) / denom;
            let kb = (cos_b - d * cos_a) / denom;
            let in_plane = ca * ka + cb * kb;
            let h = (1.0 - in_plane.length_squared()).max(0.0).sqrt();
            let c1 = (in_plane - normal * h).try_normalize().unwrap_or(-normal);
            let c2 = (in_plane + normal * h).try_normalize().unwrap_or(normal);
            (c1, c2)
        }
        _ => {
            // Coincident or opposite cones: any great circle through both works.
            let perp = ca.any_orthonormal_vector();
            (-perp, perp)
        }
    };
    TangentCircles {
        center1,
        center2,
        radius,
        radius_cos,
    }
}

enum PathRegion {
    Outside,
    OnPath,
    /// Inside a tangent circle; carries the nearest point on its rim.
    InTangent(DVec3),
}

/// Tangent circle center of the triangle `cone, center, next` containing `direction`, if any.
fn enclosing_tangent(cone: &LimitCone, next: &LimitCone, direction: DVec3) -> Option<DVec3> {
    let tangents = cone.tangents?;
    let (c1, c2) = (cone.control_point, next.control_point);
    let (center, inside) = if direction.dot(c1.cross(c2)) < 0.0 {
        let t = tangents.center1;
        let inside = direction.dot(c1.cross(t)) > -BOUNDS_EPSILON
            && direction.dot(t.cross(c2)) > -BOUNDS_EPSILON;
        (t, inside)
    } else {
        let t = tangents.center2;
        let inside = direction.dot(t.cross(c1)) > -BOUNDS_EPSILON
            && direction.dot(c2.cross(t)) > -BOUNDS_EPSILON;
        (t, inside)
    };
    inside.then_some(center)
}

/// Projection of `direction` onto the geodesic from `cone` to `next`, seen from the tangent circle
/// center whose triangle encloses it.
fn project_onto_path(cone: &LimitCone, next: &LimitCone, direction: DVec3) -> Option<DVec3> {
    let center = enclosing_tangent(cone, next, direction)?;
    let normal = cone.control_point.cross(next.control_point).try_normalize()?;
    // Intersect the ray center -> direction with the plane of the great circle.
    let ray = direction - center;
    let denom = normal.dot(ray);
    if denom.abs() <= BOUNDS_EPSILON {
        return None;
    }
    let s = -normal.dot(center) / denom;
    (center + ray * s).try_normalize()
}

/// Region of `direction` relative to the path joining `cone` to its successor `next`.
fn path_region(cone: &LimitCone, next: &LimitCone, direction: DVec3) -> PathRegion {
    let (Some(center), Some(tangents)) = (enclosing_tangent(cone, next, direction), cone.tangents)
    else {
        return PathRegion::Outside;
    };
    if direction.dot(center) > tangents.radius_cos + BOUNDS_EPSILON {
        PathRegion::InTangent(rotate_toward(center, direction, tangents.radius))
    } else {
        PathRegion::OnPath
    }
}

/// Splits `rotation` into `swing * twist`, where `twist` rotates about `axis` and `swing` has no
/// component about it.
pub fn swing_twist(rotation: DQuat, axis: DVec3) -> (DQuat, DQuat) {
    let axis = axis.try_normalize().unwrap_or(DVec3::Y);
    let imaginary = DVec3::new(rotation.x, rotation.y, rotation.z);
    let projected = axis * imaginary.dot(axis);
    let twist = DQuat::from_xyzw(projected.x, projected.y, projected.z, rotation.w);
    let twist = if twist.length_squared() > f64::EPSILON {
        twist.normalize()
    } else {
        // 180 degree swing: no twist is recoverable.
        DQuat::IDENTITY
    };
    ((rotation * twist.conjugate()).normalize(), twist)
}

fn wrap_tau(angle: f64) -> f64 {
    angle.rem_euclid(TAU)
}

fn wrap_pi(angle: f64) -> f64 {
    let wrapped = wrap_tau(angle);
    if wrapped > PI { wrapped - TAU } else { wrapped }
}

/// Per-iteration strengths of the soft return-to-center step for a bone: entry `i` is
/// `((n^p - i^p) / n^p) * painfulness * dampening` with `p = 0.2 * n * painfulness`.
pub fn return_schedule(iterations: usize, painfulness: f64, dampening: f64) -> Vec<f64> {
    if iterations == 0 || !(painfulness > 0.0) {
        return Vec::new();
    }
    let n = iterations as f64;
    let p = 0.2 * n * painfulness;
    let n_p = n.powf(p);
    (0..iterations)
        .map(|i| {
            let falloff = if n_p > 0.0 {
                (n_p - (i as f64).powf(p)) / n_p
            } else {
                0.0
            };
            falloff * painfulness * dampening
        })
        .collect()
}

/// Orientation limits for one joint: limit cones for the Y heading plus a twist band about Y.
///
/// The twist band is `[min_axial_angle, min_axial_angle + axial_range]`, measured in the
/// constraint frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Kusudama {
    cones: Vec<LimitCone>,
    min_axial_angle: f64,
    axial_range: f64,
    orientationally_constrained: bool,
    axially_constrained: bool,
    painfulness: f64,
}

impl Default for Kusudama {
    fn default() -> Self {
        Self {
            cones: Vec::new(),
            min_axial_angle: 0.0,
            axial_range: TAU,
            orientationally_constrained: true,
            axially_constrained: false,
            painfulness: 0.0,
        }
    }
}

impl Kusudama {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit_cones(&self) -> &[LimitCone] {
        &self.cones
    }

    pub fn add_limit_cone(&mut self, control_point: DVec3, radius: f64) {
        self.cones.push(LimitCone::new(control_point, radius));
        self.update_tangent_handles();
    }

    pub fn insert_limit_cone(
        &mut self,
        index: usize,
        control_point: DVec3,
        radius: f64,
    ) -> Result<(), Error> {
        if index > self.cones.len() {
            return Err(Error::invalid(format!(
                "limit cone index {index} out of range (len {})",
                self.cones.len()
            )));
        }
        self.cones.insert(index, LimitCone::new(control_point, radius));
        self.update_tangent_handles();
        Ok(())
    }

    pub fn remove_limit_cone(&mut self, index: usize) -> Result<LimitCone, Error> {
        if index >= self.cones.len() {
            return Err(Error::invalid(format!(
                "limit cone index {index} out of range (len {})",
                self.cones.len()
            )));
        }
        let mut removed = self.cones.remove(index);
        removed.tangents = None;
        self.update_tangent_handles();
        Ok(removed)
    }

    pub fn set_cone(&mut self, index: usize, control_point: DVec3, radius: f64) -> Result<(), Error> {
        let len = self.cones.len();
        let cone = self.cones.get_mut(index).ok_or_else(|| {
            Error::invalid(format!("limit cone index {index} out of range (len {len})"))
        })?;
        *cone = LimitCone::new(control_point, radius);
        self.update_tangent_handles();
        Ok(())
    }

    pub fn update_tangent_handles(&mut self) {
        for i in 0..self.cones.len() {
            let tangents = self
                .cones
                .get(i + 1)
                .map(|next| tangent_circles(&self.cones[i], next));
            self.cones[i].tangents = tangents;
        }
    }

    /// Sets the twist band and enables axial limits. `range` is clamped to `[0, 2π]`.
    pub fn set_axial_limits(&mut self, min_angle: f64, range: f64) {
        self.min_axial_angle = wrap_tau(min_angle);
        self.axial_range = range.clamp(0.0, TAU);
        self.axially_constrained = true;
    }

    pub fn min_axial_angle(&self) -> f64 {
        self.min_axial_angle
    }

    pub fn axial_range(&self) -> f64 {
        self.axial_range
    }

    pub fn is_orientationally_constrained(&self) -> bool {
        self.orientationally_constrained
    }

    pub fn is_axially_constrained(&self) -> bool {
        self.axially_constrained
    }

    pub fn enable_orientational_limits(&mut self) {
        self.orientationally_constrained = true;
    }

    pub fn disable_orientational_limits(&mut self) {
        self.orientationally_constrained = false;
    }

    pub fn enable_axial_limits(&mut self) {
        self.axially_constrained = true;
    }

    pub fn disable_axial_limits(&mut self) {
        self.axially_constrained = false;
    }

    pub fn painfulness(&self) -> f64 {
        self.painfulness
    }

    /// Strength of the pull back toward the allowed path, in `[0, 1]`.
    pub fn set_painfulness(&mut self, painfulness: f64) {
        self.painfulness = if painfulness.is_finite() {
            painfulness.clamp(0.0, 1.0)
        } else {
            0.0
        };
    }

    /// Returns whether `direction` is allowed, and the nearest allowed direction (the normalised
    /// input itself when allowed).
    pub fn point_in_limits(&self, direction: DVec3) -> (bool, DVec3) {
        let Some(direction) = direction.try_normalize() else {
            return (true, direction);
        };
        if self.cones.is_empty() || self.cones.iter().any(|c| c.contains(direction)) {
            return (true, direction);
        }

        let mut best = direction;
        let mut best_dot = f64::NEG_INFINITY;
        let mut consider = |candidate: DVec3| {
            let dot = candidate.dot(direction);
            if dot > best_dot {
                best_dot = dot;
                best = candidate;
            }
        };
        for pair in self.cones.windows(2) {
            match path_region(&pair[0], &pair[1], direction) {
                PathRegion::OnPath => return (true, direction),
                PathRegion::InTangent(rim) => consider(rim),
                PathRegion::Outside => {}
            }
        }
        for cone in &self.cones {
            consider(cone.closest_on_rim(direction));
        }
        (false, best)
    }

    /// Point on the centerline of the allowed region nearest `direction`: the closest projection
    /// onto a geodesic between adjacent control points whose path encloses `direction`, otherwise
    /// the nearest control point.
    pub fn point_on_path_sequence(&self, direction: DVec3) -> DVec3 {
        let Some(direction) = direction.try_normalize() else {
            return direction;
        };
        match self.cones.as_slice() {
            [] => return direction,
            [only] => return only.control_point,
            _ => {}
        }
        let on_paths = self
            .cones
            .windows(2)
            .filter_map(|pair| project_onto_path(&pair[0], &pair[1], direction));
        let nearest = |a: &DVec3, b: &DVec3| a.dot(direction).total_cmp(&b.dot(direction));
        on_paths
            .max_by(nearest)
            .or_else(|| self.cones.iter().map(|c| c.control_point).max_by(nearest))
            .unwrap_or(direction)
    }

    /// Rotation of `bone` relative to `frame`, both in global space.
    fn relative_rotation(
        graph: &mut NodeGraph,
        bone: NodeId,
        frame: NodeId,
    ) -> Result<(DQuat, DQuat), Error> {
        let frame_rotation = graph.global(frame)?.rotation;
        let bone_rotation = graph.global(bone)?.rotation;
        Ok((
            frame_rotation,
            (frame_rotation.inverse() * bone_rotation).normalize(),
        ))
    }

    /// Twist of `bone` about its Y axis relative to `frame`, in `(-π, π]`.
    pub fn twist_angle(graph: &mut NodeGraph, bone: NodeId, frame: NodeId) -> Result<f64, Error> {
        let (_, relative) = Self::relative_rotation(graph, bone, frame)?;
        Ok(twist_of(relative))
    }

    /// Signed twist from `bone`'s current twist to the middle of the band.
    pub fn angle_to_twist_center(
        &self,
        graph: &mut NodeGraph,
        bone: NodeId,
        frame: NodeId,
    ) -> Result<f64, Error> {
        let twist = Self::twist_angle(graph, bone, frame)?;
        let center = self.min_axial_angle + self.axial_range * 0.5;
        Ok(wrap_pi(center - twist))
    }

    /// Hard-snaps `bone` (constrained relative to `frame`) into the allowed heading region and
    /// twist band. Returns whether anything moved.
    pub fn snap_to_limits(
        &self,
        graph: &mut NodeGraph,
        bone: NodeId,
        frame: NodeId,
    ) -> Result<bool, Error> {
        let mut moved = false;
        if self.orientationally_constrained && !self.cones.is_empty() {
            let (frame_rotation, relative) = Self::relative_rotation(graph, bone, frame)?;
            let heading = relative * DVec3::Y;
            let (in_bounds, rectified) = self.point_in_limits(heading);
            if !in_bounds {
                let correction = rotation_between(heading, rectified);
                let global = frame_rotation * correction * frame_rotation.inverse();
                graph.rotate_by_global(bone, global)?;
                moved = true;
            }
        }
        if self.snap_to_twist_limits(graph, bone, frame)? {
            moved = true;
        }
        Ok(moved)
    }

    /// Rotates `bone` about its own Y axis to the nearest twist band boundary when it lies outside
    /// the band.
    pub fn snap_to_twist_limits(
        &self,
        graph: &mut NodeGraph,
        bone: NodeId,
        frame: NodeId,
    ) -> Result<bool, Error> {
        if !self.axially_constrained || self.axial_range >= TAU {
            return Ok(false);
        }
        let twist = Self::twist_angle(graph, bone, frame)?;
        let from_min = wrap_tau(twist - self.min_axial_angle);
        if from_min <= self.axial_range + BOUNDS_EPSILON {
            return Ok(false);
        }
        let past_max = from_min - self.axial_range;
        let before_min = TAU - from_min;
        let delta = if past_max <= before_min {
            self.axial_range - from_min
        } else {
            before_min
        };
        graph.rotate_about_y(bone, delta)?;
        Ok(true)
    }

    /// Soft step toward the allowed path centerline and the twist band center. The swing moves at
    /// most `2 * acos(cos_half_swing)`, the twist at most `twist_step` radians.
    pub fn set_axes_to_returnfulled(
        &self,
        graph: &mut NodeGraph,
        bone: NodeId,
        frame: NodeId,
        cos_half_swing: f64,
        twist_step: f64,
    ) -> Result<(), Error> {
        if self.orientationally_constrained && !self.cones.is_empty() {
            let (frame_rotation, relative) = Self::relative_rotation(graph, bone, frame)?;
            let heading = relative * DVec3::Y;
            let target = self.point_on_path_sequence(heading);
            let correction =
                clamp_to_cos_half_angle(rotation_between(heading, target), cos_half_swing);
            let global = frame_rotation * correction * frame_rotation.inverse();
            graph.rotate_by_global(bone, global)?;
        }
        if self.axially_constrained && self.axial_range < TAU {
            let to_center = self.angle_to_twist_center(graph, bone, frame)?;
            let step = to_center.clamp(-twist_step.abs(), twist_step.abs());
            graph.rotate_about_y(bone, step)?;
        }
        Ok(())
    }
}

fn twist_of(relative: DQuat) -> f64 {
    let (_, twist) = swing_twist(relative, DVec3::Y);
    wrap_pi(2.0 * twist.y.atan2(twist.w))
}
