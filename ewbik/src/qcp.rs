//! Weighted optimal superposition of two corresponding point sets.
//!
//! Quaternion characteristic polynomial method: the optimal rotation is the eigenvector of Horn's
//! symmetric 4x4 key matrix belonging to its largest eigenvalue. The eigenvalue is found by
//! Newton iteration on the characteristic polynomial, seeded at the upper bound `E0`; the
//! eigenvector is read off the adjugate of `key - λI`.

use glam::{DMat3, DMat4, DQuat, DVec3, DVec4};

/// Result of [`Qcp::weighted_superpose`]: applying `rotation` then adding `translation` moves the
/// first point set onto the second as closely as possible.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Superposition {
    pub rotation: DQuat,
    pub translation: DVec3,
    pub rmsd: f64,
}

impl Superposition {
    pub const IDENTITY: Self = Self {
        rotation: DQuat::IDENTITY,
        translation: DVec3::ZERO,
        rmsd: 0.0,
    };
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Qcp {
    /// Relative convergence threshold for the eigenvalue and the eigenvector conditioning floor.
    pub epsilon: f64,
    pub max_iterations: usize,
}

impl Default for Qcp {
    fn default() -> Self {
        Self {
            epsilon: 1.0e-6,
            max_iterations: 50,
        }
    }
}

impl Qcp {
    pub fn new(epsilon: f64) -> Self {
        Self {
            epsilon,
            ..Self::default()
        }
    }

    /// Rotation (and translation when `translate` is set) minimising
    /// `Σ wᵢ |R·movedᵢ + t − targetᵢ|²`. `weights: None` weighs every pair equally.
    ///
    /// Degenerate input (empty sets, mismatched lengths, zero total weight, non-finite values)
    /// returns [`Superposition::IDENTITY`].
    pub fn weighted_superpose(
        &self,
        moved: &[DVec3],
        target: &[DVec3],
        weights: Option<&[f64]>,
        translate: bool,
    ) -> Superposition {
        let n = moved.len();
        if n == 0 || target.len() != n || weights.is_some_and(|w| w.len() != n) {
            return Superposition::IDENTITY;
        }
        let weight = |i: usize| weights.map_or(1.0, |w| w[i].max(0.0));
        let weight_sum: f64 = (0..n).map(weight).sum();
        if !(weight_sum > 0.0) || !weight_sum.is_finite() {
            return Superposition::IDENTITY;
        }
        if moved.iter().chain(target).any(|p| !p.is_finite()) {
            return Superposition::IDENTITY;
        }

        let (moved_center, target_center) = if translate {
            let mut mc = DVec3::ZERO;
            let mut tc = DVec3::ZERO;
            for i in 0..n {
                mc += moved[i] * weight(i);
                tc += target[i] * weight(i);
            }
            (mc / weight_sum, tc / weight_sum)
        } else {
            (DVec3::ZERO, DVec3::ZERO)
        };

        if n == 1 && !translate {
            let rotation = rotation_between(moved[0], target[0]);
            let rmsd = (rotation * moved[0] - target[0]).length();
            return Superposition {
                rotation,
                translation: DVec3::ZERO,
                rmsd,
            };
        }

        // Weighted cross-covariance S[a][b] = Σ w·moved_a·target_b and E0 = Σ w(|m|²+|t|²)/2.
        let mut s = [[0.0f64; 3]; 3];
        let mut e0 = 0.0;
        for i in 0..n {
            let w = weight(i);
            let m = moved[i] - moved_center;
            let t = target[i] - target_center;
            e0 += w * (m.length_squared() + t.length_squared());
            let (m, t) = (m.to_array(), t.to_array());
            for a in 0..3 {
                for b in 0..3 {
                    s[a][b] += w * m[a] * t[b];
                }
            }
        }
        e0 *= 0.5;

        let rotation = self.rotation_from_covariance(&s, e0);
        let (rotation, max_eigenvalue) = match rotation {
            Some(found) => found,
            None => (DQuat::IDENTITY, e0),
        };
        let rmsd = (2.0 * (e0 - max_eigenvalue) / weight_sum).abs().sqrt();
        let translation = if translate {
            target_center - rotation * moved_center
        } else {
            DVec3::ZERO
        };
        Superposition {
            rotation,
            translation,
            rmsd,
        }
    }

    fn rotation_from_covariance(&self, s: &[[f64; 3]; 3], e0: f64) -> Option<(DQuat, f64)> {
        let [sxx, sxy, sxz] = s[0];
        let [syx, syy, syz] = s[1];
        let [szx, szy, szz] = s[2];

        // Horn's key matrix; its dominant eigenvector is (w, x, y, z).
        let key = DMat4::from_cols_array(&[
            sxx + syy + szz,
            syz - szy,
            szx - sxz,
            sxy - syx,
            syz - szy,
            sxx - syy - szz,
            sxy + syx,
            szx + sxz,
            szx - sxz,
            sxy + syx,
            -sxx + syy - szz,
            syz + szy,
            sxy - syx,
            szx + sxz,
            syz + szy,
            -sxx - syy + szz,
        ]);

        // The key matrix is traceless, so its characteristic polynomial is
        // λ⁴ + c2·λ² + c1·λ + c0 with c2 = -tr(K²)/2, c1 = -tr(K³)/3, c0 = det(K).
        let key2 = key * key;
        let key3 = key2 * key;
        let c2 = -0.5 * trace(&key2);
        let c1 = -trace(&key3) / 3.0;
        let c0 = key.determinant();

        let mut lambda = e0;
        for _ in 0..self.max_iterations {
            let previous = lambda;
            let l2 = lambda * lambda;
            let f = l2 * l2 + c2 * l2 + c1 * lambda + c0;
            let df = 4.0 * l2 * lambda + 2.0 * c2 * lambda + c1;
            if df.abs() <= f64::MIN_POSITIVE {
                break;
            }
            lambda -= f / df;
            if (lambda - previous).abs() <= (self.epsilon * lambda).abs() {
                break;
            }
        }
        if !lambda.is_finite() {
            return None;
        }

        let shifted = key - DMat4::from_diagonal(DVec4::splat(lambda));
        let q = dominant_adjugate_row(&shifted);
        let floor = self.epsilon * e0.powi(3);
        let q = if q.is_finite() && q.length() > floor {
            q.normalize()
        } else {
            // Repeated dominant eigenvalue (eg. collinear headings): the adjugate vanishes. Power
            // iteration from the identity quaternion lands on the optimal rotation nearest to it.
            self.power_iterate(&key, e0)?
        };
        let mut rotation = DQuat::from_xyzw(q.y, q.z, q.w, q.x).normalize();
        if rotation.w < 0.0 {
            rotation = -rotation;
        }
        Some((rotation, lambda))
    }

    fn power_iterate(&self, key: &DMat4, e0: f64) -> Option<DVec4> {
        // Eigenvalues of the key matrix lie in [-E0, E0]; the shift makes the spectrum non-negative.
        let shifted = *key + DMat4::from_diagonal(DVec4::splat(e0));
        let mut v = DVec4::X;
        for _ in 0..self.max_iterations * 4 {
            let next = (shifted * v).try_normalize()?;
            let converged = next.distance_squared(v) <= self.epsilon * self.epsilon;
            v = next;
            if converged {
                break;
            }
        }
        v.is_finite().then_some(v)
    }
}

fn trace(m: &DMat4) -> f64 {
    m.x_axis.x + m.y_axis.y + m.z_axis.z + m.w_axis.w
}

/// The row of adj(m) with the largest norm. For singular `m` every row spans the null space.
fn dominant_adjugate_row(m: &DMat4) -> DVec4 {
    let a = m.transpose().to_cols_array_2d(); // a[row][col]
    let mut best = DVec4::ZERO;
    for row in 0..4 {
        let mut cofactors = [0.0; 4];
        for (col, cofactor) in cofactors.iter_mut().enumerate() {
            let minor = minor3(&a, row, col);
            let sign = if (row + col) % 2 == 0 { 1.0 } else { -1.0 };
            *cofactor = sign * minor.determinant();
        }
        let candidate = DVec4::from_array(cofactors);
        if candidate.length_squared() > best.length_squared() {
            best = candidate;
        }
    }
    best
}

fn minor3(a: &[[f64; 4]; 4], skip_row: usize, skip_col: usize) -> DMat3 {
    let mut values = [0.0; 9];
    let mut k = 0;
    // Row-major fill, then transpose into glam's column-major layout.
    for (r, row) in a.iter().enumerate() {
        if r == skip_row {
            continue;
        }
        for (c, &v) in row.iter().enumerate() {
            if c == skip_col {
                continue;
            }
            values[k] = v;
            k += 1;
        }
    }
    DMat3::from_cols_array(&values).transpose()
}

/// Minimal rotation taking the direction of `from` onto the direction of `to`. Zero-length input
/// gives the identity.
pub fn rotation_between(from: DVec3, to: DVec3) -> DQuat {
    match (from.try_normalize(), to.try_normalize()) {
        (Some(from), Some(to)) => DQuat::from_rotation_arc(from, to),
        _ => DQuat::IDENTITY,
    }
}

/// Limits the rotation angle of `rotation` so that `cos(angle / 2) >= cos_half_angle`, keeping
/// its axis.
pub fn clamp_to_cos_half_angle(rotation: DQuat, cos_half_angle: f64) -> DQuat {
    let rotation = if rotation.w < 0.0 { -rotation } else { rotation };
    if rotation.w >= cos_half_angle {
        return rotation;
    }
    let axis = DVec3::new(rotation.x, rotation.y, rotation.z);
    let Some(axis) = axis.try_normalize() else {
        return DQuat::IDENTITY;
    };
    let w = cos_half_angle.clamp(-1.0, 1.0);
    let sin_half = (1.0 - w * w).max(0.0).sqrt();
    let v = axis * sin_half;
    DQuat::from_xyzw(v.x, v.y, v.z, w)
}

/// `Σ wᵢ|aᵢ − bᵢ|² / Σ wᵢ`; zero when the total weight is zero.
pub fn weighted_msd(a: &[DVec3], b: &[DVec3], weights: &[f64]) -> f64 {
    let mut total = 0.0;
    let mut weight_sum = 0.0;
    for ((a, b), &w) in a.iter().zip(b).zip(weights) {
        total += w * a.distance_squared(*b);
        weight_sum += w;
    }
    if weight_sum > 0.0 {
        total / weight_sum
    } else {
        0.0
    }
}
