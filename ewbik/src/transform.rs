use glam::{DQuat, DVec3};

/// Rigid transform with uniform scale. `parent.mul_transform(&child)` is exact, so composing a chain
/// of locals gives the global pose without drift from shear.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Transform {
    pub translation: DVec3,
    pub rotation: DQuat,
    pub scale: f64,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        translation: DVec3::ZERO,
        rotation: DQuat::IDENTITY,
        scale: 1.0,
    };

    pub fn from_translation(translation: DVec3) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    pub fn from_rotation(rotation: DQuat) -> Self {
        Self {
            rotation,
            ..Self::IDENTITY
        }
    }

    pub fn from_translation_rotation(translation: DVec3, rotation: DQuat) -> Self {
        Self {
            translation,
            rotation,
            scale: 1.0,
        }
    }

    /// `self ∘ child`: the pose of `child` (expressed in `self`'s frame) in `self`'s parent space.
    pub fn mul_transform(&self, child: &Transform) -> Transform {
        Transform {
            translation: self.transform_point(child.translation),
            rotation: (self.rotation * child.rotation).normalize(),
            scale: self.scale * child.scale,
        }
    }

    pub fn inverse(&self) -> Transform {
        let rotation = self.rotation.inverse();
        let scale = if self.scale.abs() > f64::EPSILON {
            1.0 / self.scale
        } else {
            0.0
        };
        Transform {
            translation: rotation * (-self.translation) * scale,
            rotation,
            scale,
        }
    }

    pub fn transform_point(&self, point: DVec3) -> DVec3 {
        self.translation + self.rotation * (point * self.scale)
    }

    pub fn inverse_transform_point(&self, point: DVec3) -> DVec3 {
        self.inverse().transform_point(point)
    }

    /// Direction only; ignores translation and scale.
    pub fn transform_vector(&self, vector: DVec3) -> DVec3 {
        self.rotation * vector
    }

    pub fn x_axis(&self) -> DVec3 {
        self.rotation * DVec3::X
    }

    pub fn y_axis(&self) -> DVec3 {
        self.rotation * DVec3::Y
    }

    pub fn z_axis(&self) -> DVec3 {
        self.rotation * DVec3::Z
    }

    pub fn is_finite(&self) -> bool {
        self.translation.is_finite() && self.rotation.is_finite() && self.scale.is_finite()
    }

    /// Rotations are compared up to sign (`q` and `-q` are the same orientation).
    pub fn abs_diff_eq(&self, other: &Transform, max_abs_diff: f64) -> bool {
        self.translation
            .abs_diff_eq(other.translation, max_abs_diff)
            && (self.rotation.abs_diff_eq(other.rotation, max_abs_diff)
                || self.rotation.abs_diff_eq(-other.rotation, max_abs_diff))
            && (self.scale - other.scale).abs() <= max_abs_diff
    }
}
