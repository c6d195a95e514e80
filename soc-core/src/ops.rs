//! Collective cone operations on distributed vectors.
//!
//! Every function here is collective over `group`: all ranks must call it in
//! the same order with the same replicated partition and cutoff, and with
//! vectors distributed the same way. `cutoff` only selects how straddling
//! blocks are combined (see [`crate::dist::exchange`]); it never changes the
//! result.
//!
//! Each operation follows the same three steps:
//!
//! 1. per-block partial reductions over the locally owned entries
//! 2. [`BlockExchange::combine`] to turn partials into block totals
//! 3. an elementwise map on the owned entries
//!
//! Failures are agreed on collectively before anything is returned, so all
//! ranks see the same error for the same (lowest) block.

use crate::cones::soc::{self, ConeFault, StepMoments};
use crate::dist::{agree, BlockExchange, BlockFailure, DistVector, LocalBlock, Operand, ProcessGroup};
use crate::error::{SocError, SocResult};
use crate::partition::ConePartition;

// ============================================================================
// Helpers
// ============================================================================

fn plan<G: ProcessGroup>(
    group: &G,
    x: &DistVector,
    part: &ConePartition,
    cutoff: usize,
) -> SocResult<BlockExchange> {
    x.distribution().check_group_size(group.size())?;
    if x.rank() != group.rank() {
        return Err(SocError::OutOfRange(format!(
            "vector belongs to rank {} but the group handle is rank {}",
            x.rank(),
            group.rank()
        )));
    }
    BlockExchange::new(part, x.distribution(), group.rank(), cutoff)
}

#[inline]
fn sum_sq(v: &[f64]) -> f64 {
    v.iter().map(|&a| a * a).sum()
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(&x, &y)| x * y).sum()
}

/// Derive `k_out` scalars per block from its `k` totals, stopping at the
/// first (lowest) failing block.
fn derive<F>(
    ex: &BlockExchange,
    totals: &[f64],
    k: usize,
    k_out: usize,
    f: F,
) -> (Vec<f64>, Option<BlockFailure>)
where
    F: Fn(&LocalBlock, &[f64], &mut [f64]) -> Result<(), (Operand, ConeFault)>,
{
    let mut out = vec![0.0; k_out * ex.blocks().len()];
    for ((lb, tot), params) in ex
        .blocks()
        .iter()
        .zip(totals.chunks(k))
        .zip(out.chunks_mut(k_out))
    {
        if let Err((operand, fault)) = f(lb, tot, params) {
            let failure = BlockFailure {
                first: lb.block.first,
                operand,
                fault,
            };
            return (out, Some(failure));
        }
    }
    (out, None)
}

/// Block totals `[x0, ||x_rest||²]`.
fn norm_totals<G: ProcessGroup>(group: &G, ex: &BlockExchange, x: &[f64]) -> SocResult<Vec<f64>> {
    let mut totals = ex.partials(2, |lb, out| {
        out[0] = lb.head(x);
        out[1] = sum_sq(lb.rest(x));
    });
    ex.combine(group, &mut totals, 2)?;
    Ok(totals)
}

/// Multiply each block of `x` by its own factor (local).
fn scale_blocks(ex: &BlockExchange, x: &[f64], factors: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; x.len()];
    ex.map_blocks(factors, 1, &mut out, |lb: &LocalBlock, f, seg| {
        for (o, &v) in seg.iter_mut().zip(lb.segment(x)) {
            *o = f[0] * v;
        }
    });
    out
}

// ============================================================================
// Local-slice implementations on a fixed exchange plan
// ============================================================================

fn dets_with<G: ProcessGroup>(group: &G, ex: &BlockExchange, x: &[f64]) -> SocResult<Vec<f64>> {
    let totals = norm_totals(group, ex, x)?;
    let mut out = vec![0.0; x.len()];
    ex.map_blocks(&totals, 2, &mut out, |lb, tot, seg| {
        seg.fill(0.0);
        if lb.holds_first {
            seg[0] = soc::det_from_parts(tot[0], tot[1]);
        }
    });
    Ok(out)
}

fn broadcast_with<G: ProcessGroup>(group: &G, ex: &BlockExchange, v: &[f64]) -> SocResult<Vec<f64>> {
    let mut heads = ex.partials(1, |lb, out| out[0] = lb.head(v));
    ex.combine(group, &mut heads, 1)?;
    Ok(heads)
}

fn sqrt_with<G: ProcessGroup>(
    group: &G,
    ex: &BlockExchange,
    x: &[f64],
    operand: Operand,
) -> SocResult<Vec<f64>> {
    let totals = norm_totals(group, ex, x)?;
    let (params, failure) = derive(ex, &totals, 2, 2, |_, tot, p| {
        let (y0, scale) = soc::sqrt_parts(tot[0], tot[1]).map_err(|f| (operand, f))?;
        p[0] = y0;
        p[1] = scale;
        Ok(())
    });
    agree(group, failure)?;

    let mut out = vec![0.0; x.len()];
    ex.map_blocks(&params, 2, &mut out, |lb, p, seg| {
        for (o, &v) in seg.iter_mut().zip(lb.segment(x)) {
            *o = p[1] * v;
        }
        if lb.holds_first {
            seg[0] = p[0];
        }
    });
    Ok(out)
}

fn apply_with<G: ProcessGroup>(group: &G, ex: &BlockExchange, x: &[f64], y: &[f64]) -> SocResult<Vec<f64>> {
    let mut totals = ex.partials(3, |lb, out| {
        out[0] = lb.head(x);
        out[1] = lb.head(y);
        out[2] = dot(lb.segment(x), lb.segment(y));
    });
    ex.combine(group, &mut totals, 3)?;

    let mut out = vec![0.0; x.len()];
    ex.map_blocks(&totals, 3, &mut out, |lb, tot, seg| {
        let (x0, y0) = (tot[0], tot[1]);
        for ((o, &xi), &yi) in seg.iter_mut().zip(lb.segment(x)).zip(lb.segment(y)) {
            *o = x0 * yi + y0 * xi;
        }
        if lb.holds_first {
            seg[0] = tot[2];
        }
    });
    Ok(out)
}

fn inverse_with<G: ProcessGroup>(
    group: &G,
    ex: &BlockExchange,
    x: &[f64],
    operand: Operand,
) -> SocResult<Vec<f64>> {
    let totals = norm_totals(group, ex, x)?;
    let (inv_dets, failure) = derive(ex, &totals, 2, 1, |_, tot, p| {
        p[0] = soc::inverse_parts(tot[0], tot[1]).map_err(|f| (operand, f))?;
        Ok(())
    });
    agree(group, failure)?;

    let mut out = vec![0.0; x.len()];
    ex.map_blocks(&inv_dets, 1, &mut out, |lb, inv, seg| {
        let xs = lb.segment(x);
        for (o, &v) in seg.iter_mut().zip(xs) {
            *o = -v * inv[0];
        }
        if lb.holds_first {
            seg[0] = xs[0] * inv[0];
        }
    });
    Ok(out)
}

fn quadratic_with<G: ProcessGroup>(
    group: &G,
    ex: &BlockExchange,
    w: &[f64],
    x: &[f64],
) -> SocResult<Vec<f64>> {
    let mut totals = ex.partials(4, |lb, out| {
        out[0] = lb.head(w);
        out[1] = lb.head(x);
        out[2] = dot(lb.segment(w), lb.segment(x));
        out[3] = sum_sq(lb.rest(w));
    });
    ex.combine(group, &mut totals, 4)?;

    // Q_w x = 2 (w·x) w - det(w) R x
    let mut out = vec![0.0; x.len()];
    ex.map_blocks(&totals, 4, &mut out, |lb, tot, seg| {
        let (w0, x0, two_wx) = (tot[0], tot[1], 2.0 * tot[2]);
        let det_w = soc::det_from_parts(w0, tot[3]);
        for ((o, &wi), &xi) in seg.iter_mut().zip(lb.segment(w)).zip(lb.segment(x)) {
            *o = two_wx * wi + det_w * xi;
        }
        if lb.holds_first {
            seg[0] = two_wx * w0 - det_w * x0;
        }
    });
    Ok(out)
}

fn nesterov_todd_with<G: ProcessGroup>(
    group: &G,
    ex: &BlockExchange,
    s: &[f64],
    z: &[f64],
) -> SocResult<Vec<f64>> {
    let mut totals = ex.partials(4, |lb, out| {
        out[0] = lb.head(s);
        out[1] = sum_sq(lb.rest(s));
        out[2] = lb.head(z);
        out[3] = sum_sq(lb.rest(z));
    });
    ex.combine(group, &mut totals, 4)?;

    // [1/√det s, 1/√det z, (det z / det s)^{1/4}]
    let (factors, failure) = derive(ex, &totals, 4, 3, |_, tot, f| {
        let det_s = soc::det_from_parts(tot[0], tot[1]);
        let det_z = soc::det_from_parts(tot[2], tot[3]);
        if soc::is_non_positive(tot[0], tot[1]) || !(det_s > 0.0) {
            return Err((Operand::S, ConeFault::NotInterior));
        }
        if soc::is_non_positive(tot[2], tot[3]) || !(det_z > 0.0) {
            return Err((Operand::Z, ConeFault::NotInterior));
        }
        f[0] = 1.0 / det_s.sqrt();
        f[1] = 1.0 / det_z.sqrt();
        f[2] = (det_z / det_s).sqrt().sqrt();
        Ok(())
    });
    agree(group, failure)?;

    let column = |j: usize| -> Vec<f64> { factors.chunks(3).map(|f| f[j]).collect() };
    let s_bar = scale_blocks(ex, s, &column(0));
    let z_bar = scale_blocks(ex, z, &column(1));

    // w̄ = Q_r (Q_r s̄)^{-1/2} with r = z̄^{1/2}
    let root = sqrt_with(group, ex, &z_bar, Operand::Z)?;
    let u = quadratic_with(group, ex, &root, &s_bar)?;
    let u_root = sqrt_with(group, ex, &u, Operand::S)?;
    let u_root_inv = inverse_with(group, ex, &u_root, Operand::S)?;
    let w_bar = quadratic_with(group, ex, &root, &u_root_inv)?;

    Ok(scale_blocks(ex, &w_bar, &column(2)))
}

// ============================================================================
// Public API
// ============================================================================

/// Per-block determinants `x0² - ||x_rest||²`, stored at each block's first
/// index with zeros elsewhere.
pub fn dets<G: ProcessGroup>(
    group: &G,
    x: &DistVector,
    part: &ConePartition,
    cutoff: usize,
) -> SocResult<DistVector> {
    let ex = plan(group, x, part, cutoff)?;
    Ok(x.with_local(dets_with(group, &ex, x.local())?))
}

/// Replicate the value at each block's first index over the whole block.
pub fn broadcast<G: ProcessGroup>(
    group: &G,
    v: &DistVector,
    part: &ConePartition,
    cutoff: usize,
) -> SocResult<DistVector> {
    let mut out = v.clone();
    broadcast_in_place(group, &mut out, part, cutoff)?;
    Ok(out)
}

/// [`broadcast`] writing into `v`.
pub fn broadcast_in_place<G: ProcessGroup>(
    group: &G,
    v: &mut DistVector,
    part: &ConePartition,
    cutoff: usize,
) -> SocResult<()> {
    let ex = plan(group, v, part, cutoff)?;
    let heads = broadcast_with(group, &ex, v.local())?;
    ex.map_blocks(&heads, 1, v.local_mut(), |_, head, seg| seg.fill(head[0]));
    Ok(())
}

/// Number of blocks not strictly inside the cone (`det <= 0` or `x0 <= 0`),
/// summed over the group.
pub fn num_non_positive<G: ProcessGroup>(
    group: &G,
    x: &DistVector,
    part: &ConePartition,
    cutoff: usize,
) -> SocResult<usize> {
    let ex = plan(group, x, part, cutoff)?;
    let totals = norm_totals(group, &ex, x.local())?;
    let local = ex
        .blocks()
        .iter()
        .zip(totals.chunks(2))
        .filter(|(lb, tot)| lb.holds_first && soc::is_non_positive(tot[0], tot[1]))
        .count();
    group.all_reduce_count(local)
}

/// Jordan square root of every block.
///
/// Fails with [`SocError::Domain`] if a block is outside the closed cone.
pub fn sqrt<G: ProcessGroup>(
    group: &G,
    x: &DistVector,
    part: &ConePartition,
    cutoff: usize,
) -> SocResult<DistVector> {
    let ex = plan(group, x, part, cutoff)?;
    Ok(x.with_local(sqrt_with(group, &ex, x.local(), Operand::X)?))
}

/// Jordan product `x ∘ y` of every block.
pub fn apply<G: ProcessGroup>(
    group: &G,
    x: &DistVector,
    y: &DistVector,
    part: &ConePartition,
    cutoff: usize,
) -> SocResult<DistVector> {
    x.check_layout(y)?;
    let ex = plan(group, x, part, cutoff)?;
    Ok(x.with_local(apply_with(group, &ex, x.local(), y.local())?))
}

/// Jordan inverse `(x0, -x_rest) / det(x)` of every block.
///
/// Fails with [`SocError::Singular`] if a block has zero determinant.
pub fn inverse<G: ProcessGroup>(
    group: &G,
    x: &DistVector,
    part: &ConePartition,
    cutoff: usize,
) -> SocResult<DistVector> {
    let ex = plan(group, x, part, cutoff)?;
    Ok(x.with_local(inverse_with(group, &ex, x.local(), Operand::X)?))
}

/// Quadratic representation `Q_w x` of every block.
pub fn apply_quadratic<G: ProcessGroup>(
    group: &G,
    w: &DistVector,
    x: &DistVector,
    part: &ConePartition,
    cutoff: usize,
) -> SocResult<DistVector> {
    w.check_layout(x)?;
    let ex = plan(group, x, part, cutoff)?;
    Ok(x.with_local(quadratic_with(group, &ex, w.local(), x.local())?))
}

/// Nesterov-Todd scaling point: the interior `w` with `Q_w s = z` per block.
///
/// Then `Q_{w^{1/2}} s = Q_{w^{-1/2}} z`. Fails with [`SocError::Domain`] if a
/// block of `s` or `z` is not strictly inside the cone.
pub fn nesterov_todd<G: ProcessGroup>(
    group: &G,
    s: &DistVector,
    z: &DistVector,
    part: &ConePartition,
    cutoff: usize,
) -> SocResult<DistVector> {
    s.check_layout(z)?;
    let ex = plan(group, s, part, cutoff)?;
    Ok(s.with_local(nesterov_todd_with(group, &ex, s.local(), z.local())?))
}

/// Largest `alpha` in `[0, upper_bound]` with `s + alpha z` in the closed
/// cone for every block.
///
/// Fails with [`SocError::Domain`] if a block of `s` is outside the closed
/// cone or a block of `z` has a NaN or infinite entry, and with
/// [`SocError::OutOfRange`] if `upper_bound` is negative or NaN.
pub fn max_step<G: ProcessGroup>(
    group: &G,
    s: &DistVector,
    z: &DistVector,
    part: &ConePartition,
    upper_bound: f64,
    cutoff: usize,
) -> SocResult<f64> {
    if !(upper_bound >= 0.0) {
        return Err(SocError::OutOfRange(format!(
            "step upper bound must be >= 0, got {upper_bound}"
        )));
    }
    s.check_layout(z)?;
    let ex = plan(group, s, part, cutoff)?;
    let (sl, zl) = (s.local(), z.local());

    let mut totals = ex.partials(5, |lb, out| {
        out[0] = lb.head(sl);
        out[1] = lb.head(zl);
        out[2] = sum_sq(lb.rest(sl));
        out[3] = sum_sq(lb.rest(zl));
        out[4] = dot(lb.rest(sl), lb.rest(zl));
    });
    ex.combine(group, &mut totals, 5)?;

    let blocks = ex.blocks();
    let (steps, failure) = derive(&ex, &totals, 5, 1, |lb, tot, step| {
        let m = StepMoments {
            t: tot[0],
            dt: tot[1],
            xx: tot[2],
            dd: tot[3],
            xd: tot[4],
        };
        step[0] = soc::step_to_boundary(&m, lb.block.order).map_err(|f| match f {
            ConeFault::NonFinite => (Operand::Z, f),
            _ => (Operand::S, f),
        })?;
        Ok(())
    });
    agree(group, failure)?;

    let local = blocks
        .iter()
        .zip(&steps)
        .filter(|(lb, _)| lb.holds_first)
        .fold(upper_bound, |acc, (_, &step)| acc.min(step));
    let alpha = group.all_reduce_min(local)?;

    log::debug!("max step {alpha:e} (upper bound {upper_bound:e})");
    Ok(alpha)
}

/// The Jordan identity `e = (1, 0, ..., 0)` in every block, laid out like
/// `like`. No communication.
pub fn identity<G: ProcessGroup>(group: &G, like: &DistVector, part: &ConePartition) -> SocResult<DistVector> {
    like.distribution().check_group_size(group.size())?;
    part.check_len(like.len())?;
    let mut out = like.zeros_like();
    let range = out.local_range();
    for block in part.blocks_in(range.start, range.end) {
        if range.contains(&block.first) {
            out.set(block.first, 1.0)?;
        }
    }
    Ok(out)
}
