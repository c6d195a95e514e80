//! Second-order (Lorentz) cone.
//!
//! The second-order cone (also called Lorentz cone or ice cream cone) is defined as:
//!
//! K_SOC = {(t, x) ∈ ℝ × ℝ^{d-1} : t ≥ ||x||₂}
//!
//! A block of order 1 is the half-line t ≥ 0.
//!
//! # Jordan Algebra
//!
//! - Product: (t,x) ∘ (u,v) = (tu + x^T v, tv + ux)
//! - Identity: e = (1, 0, ..., 0)
//! - Determinant: det(t,x) = t² - ||x||²
//! - Inverse: (t, -x) / det
//! - Quadratic representation: Q_w = 2 w w^T - det(w) R, R = diag(1, -1, ..., -1)
//!
//! Every operation only needs a handful of block reductions (the scalar part,
//! a squared norm, a dot product) followed by an elementwise map. The scalar
//! helpers below take those reductions as input so the distributed operations
//! and the slice kernels share one set of formulas.

use thiserror::Error;

use crate::error::SocError;

/// Relative tolerance for accepting points on the cone boundary.
///
/// A block is in the closed cone when `t - ||x|| >= -BOUNDARY_TOL * max(|t|, ||x||)`.
pub const BOUNDARY_TOL: f64 = 1e-12;

/// Per-block failure, before it is tied to a block position.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ConeFault {
    /// Point not in the closed cone
    #[error("not in the closed cone")]
    OutsideCone,

    /// Point not in the open cone
    #[error("not in the cone interior")]
    NotInterior,

    /// Zero determinant
    #[error("zero determinant")]
    Singular { det: f64 },

    /// Direction with a NaN or infinite entry
    #[error("not finite")]
    NonFinite,
}

impl ConeFault {
    /// Attach the block's first index and the operand name.
    pub fn at(self, first: usize, operand: &str) -> SocError {
        match self {
            ConeFault::Singular { det } => SocError::Singular { first, det },
            fault => SocError::Domain {
                first,
                reason: format!("{operand} is {fault}"),
            },
        }
    }
}

// ============================================================================
// Scalar helpers (block reductions in, block scalars out)
// ============================================================================

/// det = t² - ||x||², evaluated as (t - ||x||)(t + ||x||).
#[inline]
pub fn det_from_parts(t: f64, rest_sq: f64) -> f64 {
    let rn = rest_sq.sqrt();
    (t - rn) * (t + rn)
}

/// Closed-cone membership with the relative [`BOUNDARY_TOL`].
#[inline]
pub fn in_closed_cone(t: f64, rest_sq: f64) -> bool {
    let rn = rest_sq.sqrt();
    t - rn >= -BOUNDARY_TOL * t.abs().max(rn)
}

/// Exact non-positivity test: det <= 0 or t <= 0.
///
/// For t > 0, det > 0 iff t > ||x||, which avoids underflow in t².
#[inline]
pub fn is_non_positive(t: f64, rest_sq: f64) -> bool {
    !(t > 0.0 && t > rest_sq.sqrt())
}

/// Square root scalars `(y0, scale)` with `sqrt(x) = (y0, scale * x_rest)`.
///
/// y0 = sqrt((t + sqrt(det)) / 2), scale = 1 / (2 y0). Only sums appear under
/// the roots, so there is no cancellation near the boundary.
pub fn sqrt_parts(t: f64, rest_sq: f64) -> Result<(f64, f64), ConeFault> {
    if !in_closed_cone(t, rest_sq) {
        return Err(ConeFault::OutsideCone);
    }
    let det = det_from_parts(t, rest_sq).max(0.0);
    let y0 = (0.5 * (t.max(0.0) + det.sqrt())).sqrt();
    let scale = if y0 > 0.0 { 0.5 / y0 } else { 0.0 };
    Ok((y0, scale))
}

/// 1 / det for the inverse (t, -x) / det.
pub fn inverse_parts(t: f64, rest_sq: f64) -> Result<f64, ConeFault> {
    let det = det_from_parts(t, rest_sq);
    if det == 0.0 || !det.is_finite() {
        return Err(ConeFault::Singular { det });
    }
    Ok(1.0 / det)
}

/// Block reductions needed by the step-to-boundary search along s + α ds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepMoments {
    /// s₀
    pub t: f64,
    /// ds₀
    pub dt: f64,
    /// ||s_rest||²
    pub xx: f64,
    /// ||ds_rest||²
    pub dd: f64,
    /// s_rest · ds_rest
    pub xd: f64,
}

/// Maximum α ≥ 0 such that s + α ds stays in the closed cone.
///
/// Returns `f64::INFINITY` when the ray never leaves the cone. Fails with
/// [`ConeFault::OutsideCone`] when s itself is outside the closed cone and
/// with [`ConeFault::NonFinite`] when ds has a NaN or infinite entry.
pub fn step_to_boundary(m: &StepMoments, order: usize) -> Result<f64, ConeFault> {
    if !(m.dt.is_finite() && m.dd.is_finite() && m.xd.is_finite()) {
        return Err(ConeFault::NonFinite);
    }
    if order == 1 {
        if !(m.t >= 0.0) {
            return Err(ConeFault::OutsideCone);
        }
        return Ok(if m.dt < 0.0 { -m.t / m.dt } else { f64::INFINITY });
    }
    if !in_closed_cone(m.t, m.xx) {
        return Err(ConeFault::OutsideCone);
    }

    // We want the maximum α such that (t + α Δt)² - ||x + α Δx||² ≥ 0
    //
    // Rearrange: aα² + bα + c ≥ 0, where:
    //   a = (Δt)² - ||Δx||²
    //   b = 2(t Δt - x^T Δx)
    //   c = t² - ||x||² ≥ 0
    let a = m.dt * m.dt - m.dd;
    let b = 2.0 * (m.t * m.dt - m.xd);
    let c = det_from_parts(m.t, m.xx).max(0.0);

    let mut alpha = if c <= BOUNDARY_TOL * m.t * m.t {
        boundary_step(m, a, b)
    } else {
        interior_step(a, b, c)
    };

    // Also need t + α Δt ≥ 0
    if m.dt < 0.0 {
        alpha = alpha.min(-m.t / m.dt);
    }

    Ok(alpha.max(0.0))
}

/// Step from a point on the boundary, where det(s + α ds) ≈ α(aα + b).
fn boundary_step(m: &StepMoments, a: f64, b: f64) -> f64 {
    if m.t == 0.0 {
        // Apex: α ds stays in the cone iff ds does.
        return if in_closed_cone(m.dt, m.dd) { f64::INFINITY } else { 0.0 };
    }

    let b_tol = BOUNDARY_TOL * 2.0 * (m.t * m.dt).abs().max(m.xd.abs());
    if b > b_tol {
        // Moving inward; leaves again at the positive root -b/a if a < 0.
        if a < 0.0 {
            -b / a
        } else {
            f64::INFINITY
        }
    } else if b < -b_tol {
        0.0
    } else if a >= 0.0 {
        // Tangent to the surface
        f64::INFINITY
    } else {
        0.0
    }
}

/// Smallest positive root of aα² + bα + c with c > 0.
fn interior_step(a: f64, b: f64, c: f64) -> f64 {
    // If a ≈ 0 relative to other coefficients, use linear case: α = -c/b
    let coef_scale = a.abs().max(b.abs()).max(c);
    if a.abs() <= 1e-12 * coef_scale {
        return if b < 0.0 { -c / b } else { f64::INFINITY };
    }

    let discriminant = b * b - 4.0 * a * c;

    // Due to floating point precision, discriminant can be slightly negative
    // when mathematically it should be zero (or very small positive).
    let disc_scale = (b * b).max((4.0 * a * c).abs());
    if discriminant < -1e-12 * disc_scale {
        // No real roots: the ray stays inside
        return f64::INFINITY;
    }
    let sqrt_disc = discriminant.max(0.0).sqrt();

    // Citardauq form: compute one root directly and the other via c = a*α1*α2,
    // so that -b ± √disc never cancels.
    let q = if b >= 0.0 {
        -0.5 * (b + sqrt_disc)
    } else {
        -0.5 * (b - sqrt_disc)
    };
    if q == 0.0 {
        return 0.0;
    }
    let (alpha1, alpha2) = (q / a, c / q);

    let mut alpha_max = f64::INFINITY;
    if alpha1 > 0.0 {
        alpha_max = alpha_max.min(alpha1);
    }
    if alpha2 > 0.0 {
        alpha_max = alpha_max.min(alpha2);
    }
    alpha_max
}

// ============================================================================
// Slice kernels (one contiguous block)
// ============================================================================

/// A single second-order cone block of fixed order.
///
/// These kernels operate on one contiguous block and serve as the sequential
/// reference for the distributed operations in [`crate::ops`].
#[derive(Debug, Clone, Copy)]
pub struct SocCone {
    /// Total dimension (1 for the half-line, otherwise 1 + length of x)
    dim: usize,
}

impl SocCone {
    /// Create a cone block of the given order.
    ///
    /// # Arguments
    ///
    /// * `dim` - Block order (at least 1)
    pub fn new(dim: usize) -> Self {
        assert!(dim >= 1, "SOC block must have order >= 1");
        Self { dim }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Scalar part and ||x||²
    #[inline]
    fn parts(s: &[f64]) -> (f64, f64) {
        (s[0], s[1..].iter().map(|&xi| xi * xi).sum())
    }

    #[inline]
    fn dot(s: &[f64], v: &[f64]) -> f64 {
        s.iter().zip(v).map(|(&si, &vi)| si * vi).sum()
    }

    /// Jordan determinant t² - ||x||²
    pub fn det(&self, s: &[f64]) -> f64 {
        assert_eq!(s.len(), self.dim);
        let (t, xx) = Self::parts(s);
        det_from_parts(t, xx)
    }

    /// True if s is not in the open cone.
    pub fn is_non_positive(&self, s: &[f64]) -> bool {
        assert_eq!(s.len(), self.dim);
        let (t, xx) = Self::parts(s);
        is_non_positive(t, xx)
    }

    /// Identity e = (1, 0, ..., 0)
    pub fn identity(&self, out: &mut [f64]) {
        assert_eq!(out.len(), self.dim);
        out.fill(0.0);
        out[0] = 1.0;
    }

    /// Jordan product: (t,x) ∘ (u,v) = (tu + x^T v, tv + ux)
    pub fn jordan_product(&self, s: &[f64], other: &[f64], out: &mut [f64]) {
        assert_eq!(s.len(), self.dim);
        assert_eq!(other.len(), self.dim);
        assert_eq!(out.len(), self.dim);

        let t = s[0];
        let u = other[0];
        out[0] = Self::dot(s, other);
        for i in 1..self.dim {
            out[i] = t * other[i] + u * s[i];
        }
    }

    /// Jordan square root: w with w ∘ w = s and w in the cone.
    pub fn sqrt(&self, s: &[f64], out: &mut [f64]) -> Result<(), ConeFault> {
        assert_eq!(s.len(), self.dim);
        assert_eq!(out.len(), self.dim);

        let (t, xx) = Self::parts(s);
        let (y0, scale) = sqrt_parts(t, xx)?;
        out[0] = y0;
        for i in 1..self.dim {
            out[i] = scale * s[i];
        }
        Ok(())
    }

    /// Jordan inverse: w with w ∘ s = e
    pub fn inverse(&self, s: &[f64], out: &mut [f64]) -> Result<(), ConeFault> {
        assert_eq!(s.len(), self.dim);
        assert_eq!(out.len(), self.dim);

        let (t, xx) = Self::parts(s);
        let inv_det = inverse_parts(t, xx)?;
        out[0] = t * inv_det;
        for i in 1..self.dim {
            out[i] = -s[i] * inv_det;
        }
        Ok(())
    }

    /// Quadratic representation: Q_w y = 2 (w^T y) w - det(w) R y
    pub fn quad_rep(&self, w: &[f64], y: &[f64], out: &mut [f64]) {
        assert_eq!(w.len(), self.dim);
        assert_eq!(y.len(), self.dim);
        assert_eq!(out.len(), self.dim);

        let (w0, ww) = Self::parts(w);
        let det_w = det_from_parts(w0, ww);
        let two_wy = 2.0 * Self::dot(w, y);

        out[0] = two_wy * w0 - det_w * y[0];
        for i in 1..self.dim {
            out[i] = two_wy * w[i] + det_w * y[i];
        }
    }

    /// Nesterov-Todd scaling point: the interior w with Q_w s = z.
    ///
    /// With s̄ = s / √det(s) and z̄ = z / √det(z):
    ///   1. r = z̄^{1/2}
    ///   2. u = Q_r s̄                (det u = 1)
    ///   3. w̄ = Q_r u^{-1/2}
    ///   4. w = (det z / det s)^{1/4} w̄
    pub fn nesterov_todd(&self, s: &[f64], z: &[f64], out: &mut [f64]) -> Result<(), ConeFault> {
        assert_eq!(s.len(), self.dim);
        assert_eq!(z.len(), self.dim);
        assert_eq!(out.len(), self.dim);

        if self.is_non_positive(s) || self.is_non_positive(z) {
            return Err(ConeFault::NotInterior);
        }
        let det_s = self.det(s);
        let det_z = self.det(z);
        let s_bar: Vec<f64> = s.iter().map(|&v| v / det_s.sqrt()).collect();
        let z_bar: Vec<f64> = z.iter().map(|&v| v / det_z.sqrt()).collect();

        let n = self.dim;
        let mut root = vec![0.0; n];
        let mut u = vec![0.0; n];
        let mut u_root = vec![0.0; n];
        let mut u_root_inv = vec![0.0; n];

        self.sqrt(&z_bar, &mut root)?;
        self.quad_rep(&root, &s_bar, &mut u);
        self.sqrt(&u, &mut u_root)?;
        self.inverse(&u_root, &mut u_root_inv)?;
        self.quad_rep(&root, &u_root_inv, out);

        let gamma = (det_z / det_s).sqrt().sqrt();
        for v in out.iter_mut() {
            *v *= gamma;
        }
        Ok(())
    }

    /// Maximum α ≥ 0 such that s + α ds stays in the closed cone.
    pub fn step_to_boundary(&self, s: &[f64], ds: &[f64]) -> Result<f64, ConeFault> {
        assert_eq!(s.len(), self.dim);
        assert_eq!(ds.len(), self.dim);

        let m = StepMoments {
            t: s[0],
            dt: ds[0],
            xx: s[1..].iter().map(|&xi| xi * xi).sum(),
            dd: ds[1..].iter().map(|&di| di * di).sum(),
            xd: Self::dot(&s[1..], &ds[1..]),
        };
        step_to_boundary(&m, self.dim)
    }
}
