//! Collective operation tests.
//!
//! Every operation is run on 1 to 4 thread ranks and with both exchange
//! routes (home rank and all-reduce), and compared against the per-block
//! slice kernels on the gathered vectors.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use soc_core::{ops, ConePartition, DistVector, LocalGroup, SocCone, SocError, SocResult};

/// Cutoffs exercising the all-reduce route (0) and the home route.
const CUTOFFS: [usize; 2] = [0, 1000];

fn assert_close(a: &[f64], b: &[f64], tol: f64, what: &str) {
    assert_eq!(a.len(), b.len(), "{what}: length");
    for (i, (x, y)) in a.iter().zip(b).enumerate() {
        let scale = x.abs().max(y.abs()).max(1.0);
        assert!((x - y).abs() <= tol * scale, "{what}[{i}]: {x} vs {y}");
    }
}

/// Random partition with block orders in 1..=max_order.
fn random_partition(rng: &mut ChaCha8Rng, num_blocks: usize, max_order: usize) -> ConePartition {
    let orders: Vec<usize> = (0..num_blocks).map(|_| rng.gen_range(1..=max_order)).collect();
    ConePartition::from_block_orders(&orders).unwrap()
}

/// Random point strictly inside the cone, block by block.
fn interior_point(rng: &mut ChaCha8Rng, part: &ConePartition) -> Vec<f64> {
    let mut x = vec![0.0; part.len()];
    for b in part.blocks() {
        let mut rest_sq = 0.0;
        for v in &mut x[b.first + 1..b.end()] {
            *v = rng.gen_range(-1.0..1.0);
            rest_sq += *v * *v;
        }
        x[b.first] = f64::sqrt(rest_sq) + rng.gen_range(0.1..1.0);
    }
    x
}

/// Random point, not necessarily in the cone.
fn any_point(rng: &mut ChaCha8Rng, n: usize) -> Vec<f64> {
    (0..n).map(|_| rng.gen_range(-2.0..2.0)).collect()
}

/// Apply a slice kernel to every block of a replicated vector.
fn blockwise<F>(part: &ConePartition, inputs: &[&[f64]], f: F) -> Vec<f64>
where
    F: Fn(&SocCone, &[&[f64]], &mut [f64]),
{
    let mut out = vec![0.0; part.len()];
    for b in part.blocks() {
        let cone = SocCone::new(b.order);
        let args: Vec<&[f64]> = inputs.iter().map(|v| &v[b.first..b.end()]).collect();
        f(&cone, &args, &mut out[b.first..b.end()]);
    }
    out
}

/// Run an operation on `ranks` thread ranks and gather its result everywhere.
fn run_gathered<F>(ranks: usize, f: F) -> Vec<Vec<f64>>
where
    F: Fn(&LocalGroup) -> SocResult<DistVector> + Sync,
{
    LocalGroup::run(ranks, |g| f(g).and_then(|v| v.gather_all(g)))
        .unwrap()
        .into_iter()
        .map(|r| r.unwrap())
        .collect()
}

/// Run an operation on every rank count and cutoff; check all ranks agree
/// and return one result per configuration.
fn every_config<F>(f: F) -> Vec<Vec<f64>>
where
    F: Fn(&LocalGroup, usize) -> SocResult<DistVector> + Sync,
{
    let mut results = Vec::new();
    for ranks in 1..=4 {
        for cutoff in CUTOFFS {
            let per_rank = run_gathered(ranks, |g| f(g, cutoff));
            for other in &per_rank[1..] {
                assert_eq!(other, &per_rank[0], "ranks disagree ({ranks} ranks, cutoff {cutoff})");
            }
            results.push(per_rank[0].clone());
        }
    }
    results
}

#[test]
fn test_scenario_three_blocks_of_five() {
    let part = ConePartition::uniform(3, 5).unwrap();
    let radius = 1.0 / f64::sqrt(5.0);

    for ranks in 1..=4 {
        let counts = LocalGroup::run(ranks, |g| {
            let mut s = DistVector::uniform(g, 15, 0.0, radius, 1).unwrap();
            let mut z = DistVector::uniform(g, 15, 0.0, radius, 2).unwrap();
            for (i, (sv, zv)) in [(0, (2.0, 5.0)), (5, (3.0, 6.0)), (10, (4.0, 7.0))] {
                s.set_if_local(i, sv).unwrap();
                z.set_if_local(i, zv).unwrap();
            }
            (
                ops::num_non_positive(g, &s, &part, 1000).unwrap(),
                ops::num_non_positive(g, &z, &part, 1000).unwrap(),
            )
        })
        .unwrap();
        assert!(counts.iter().all(|&c| c == (0, 0)), "{ranks} ranks: {counts:?}");
    }
}

#[test]
fn test_dets_match_kernel() {
    let mut rng = ChaCha8Rng::seed_from_u64(101);
    let part = random_partition(&mut rng, 9, 7);
    let x = any_point(&mut rng, part.len());

    let expected = blockwise(&part, &[x.as_slice()], |cone, a, out| {
        out.fill(0.0);
        out[0] = cone.det(a[0]);
    });
    for got in every_config(|g, cutoff| {
        let xv = DistVector::from_global(g, &x)?;
        ops::dets(g, &xv, &part, cutoff)
    }) {
        assert_close(&got, &expected, 1e-13, "dets");
    }
}

#[test]
fn test_broadcast_of_dets() {
    let mut rng = ChaCha8Rng::seed_from_u64(202);
    let part = random_partition(&mut rng, 8, 6);
    let x = any_point(&mut rng, part.len());

    let results = LocalGroup::run(3, |g| -> SocResult<_> {
        let xv = DistVector::from_global(g, &x)?;
        let d = ops::dets(g, &xv, &part, 2)?;
        let b = ops::broadcast(g, &d, &part, 2)?;
        let bb = ops::broadcast(g, &b, &part, 2)?;
        let mut in_place = d.clone();
        ops::broadcast_in_place(g, &mut in_place, &part, 2)?;
        Ok((d.gather_all(g)?, b.gather_all(g)?, bb.gather_all(g)?, in_place.gather_all(g)?))
    })
    .unwrap();

    for r in results {
        let (d, b, bb, in_place) = r.unwrap();
        assert_eq!(b, bb, "broadcast is idempotent");
        assert_eq!(b, in_place);
        for blk in part.blocks() {
            // Reading the broadcast vector at the first index gives the det back
            assert_eq!(b[blk.first], d[blk.first]);
            assert!(b[blk.first..blk.end()].iter().all(|&v| v == d[blk.first]));
        }
    }
}

#[test]
fn test_num_non_positive_matches_recount() {
    let mut rng = ChaCha8Rng::seed_from_u64(303);
    for trial in 0..5 {
        let part = random_partition(&mut rng, 12, 5);
        let x = any_point(&mut rng, part.len());
        let expected = part
            .blocks()
            .filter(|b| SocCone::new(b.order).is_non_positive(&x[b.first..b.end()]))
            .count();

        for ranks in 1..=4 {
            for cutoff in CUTOFFS {
                let counts = LocalGroup::run(ranks, |g| {
                    let xv = DistVector::from_global(g, &x).unwrap();
                    ops::num_non_positive(g, &xv, &part, cutoff).unwrap()
                })
                .unwrap();
                assert!(
                    counts.iter().all(|&c| c == expected),
                    "trial {trial}, {ranks} ranks: {counts:?} vs {expected}"
                );
            }
        }
    }
}

#[test]
fn test_sqrt_squares_back() {
    let mut rng = ChaCha8Rng::seed_from_u64(404);
    let part = random_partition(&mut rng, 10, 6);
    let x = interior_point(&mut rng, &part);

    let expected_root = blockwise(&part, &[x.as_slice()], |cone, a, out| cone.sqrt(a[0], out).unwrap());
    for squared in every_config(|g, cutoff| {
        let xv = DistVector::from_global(g, &x)?;
        let root = ops::sqrt(g, &xv, &part, cutoff)?;
        let root_gathered = root.gather_all(g)?;
        assert_close(&root_gathered, &expected_root, 1e-12, "sqrt");
        ops::apply(g, &root, &root, &part, cutoff)
    }) {
        assert_close(&squared, &x, 1e-12, "sqrt(x) o sqrt(x)");
    }
}

#[test]
fn test_inverse_is_two_sided() {
    let mut rng = ChaCha8Rng::seed_from_u64(505);
    let part = random_partition(&mut rng, 10, 6);
    // Outside points are invertible too
    let x = any_point(&mut rng, part.len());
    let e = blockwise(&part, &[], |cone, _, out| cone.identity(out));

    for cutoff in CUTOFFS {
        for ranks in 1..=4 {
            let results = run_gathered(ranks, |g| {
                let xv = DistVector::from_global(g, &x)?;
                let inv = ops::inverse(g, &xv, &part, cutoff)?;
                let left = ops::apply(g, &inv, &xv, &part, cutoff)?;
                let right = ops::apply(g, &xv, &inv, &part, cutoff)?;
                assert_eq!(left.local(), right.local(), "Jordan product commutes");
                Ok(left)
            });
            assert_close(&results[0], &e, 1e-9, "inverse(x) o x");
        }
    }
}

#[test]
fn test_identity_layout() {
    let part = ConePartition::from_block_orders(&[1, 4, 2]).unwrap();
    let results = run_gathered(3, |g| {
        let like = DistVector::zeros(g, part.len())?;
        ops::identity(g, &like, &part)
    });
    for r in results {
        assert_eq!(r, vec![1.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    }
}

#[test]
fn test_apply_and_quadratic_match_kernel() {
    let mut rng = ChaCha8Rng::seed_from_u64(606);
    let part = random_partition(&mut rng, 11, 8);
    let w = any_point(&mut rng, part.len());
    let x = any_point(&mut rng, part.len());

    let product = blockwise(&part, &[w.as_slice(), x.as_slice()], |cone, a, out| cone.jordan_product(a[0], a[1], out));
    let quad = blockwise(&part, &[w.as_slice(), x.as_slice()], |cone, a, out| cone.quad_rep(a[0], a[1], out));

    for got in every_config(|g, cutoff| {
        let (wv, xv) = (DistVector::from_global(g, &w)?, DistVector::from_global(g, &x)?);
        ops::apply(g, &wv, &xv, &part, cutoff)
    }) {
        assert_close(&got, &product, 1e-13, "apply");
    }
    for got in every_config(|g, cutoff| {
        let (wv, xv) = (DistVector::from_global(g, &w)?, DistVector::from_global(g, &x)?);
        ops::apply_quadratic(g, &wv, &xv, &part, cutoff)
    }) {
        assert_close(&got, &quad, 1e-12, "apply_quadratic");
    }
}

#[test]
fn test_cutoff_never_changes_results() {
    let mut rng = ChaCha8Rng::seed_from_u64(707);
    let part = random_partition(&mut rng, 6, 9);
    let s = interior_point(&mut rng, &part);
    let z = interior_point(&mut rng, &part);

    for ranks in 2..=4 {
        let by_cutoff: Vec<Vec<Vec<f64>>> = [0, 3, 1000]
            .iter()
            .map(|&cutoff| {
                run_gathered(ranks, |g| {
                    let (sv, zv) = (DistVector::from_global(g, &s)?, DistVector::from_global(g, &z)?);
                    ops::nesterov_todd(g, &sv, &zv, &part, cutoff)
                })
            })
            .collect();
        assert_eq!(by_cutoff[0], by_cutoff[1]);
        assert_eq!(by_cutoff[0], by_cutoff[2]);
    }
}

#[test]
fn test_nesterov_todd_round_trip() {
    let mut rng = ChaCha8Rng::seed_from_u64(808);
    let part = random_partition(&mut rng, 8, 6);
    let s = interior_point(&mut rng, &part);
    let z = interior_point(&mut rng, &part);

    let expected_w = blockwise(&part, &[s.as_slice(), z.as_slice()], |cone, a, out| {
        cone.nesterov_todd(a[0], a[1], out).unwrap()
    });

    for ranks in 1..=4 {
        let results = LocalGroup::run(ranks, |g| -> SocResult<_> {
            let (sv, zv) = (DistVector::from_global(g, &s)?, DistVector::from_global(g, &z)?);
            let w = ops::nesterov_todd(g, &sv, &zv, &part, 4)?;
            let w_root = ops::sqrt(g, &w, &part, 4)?;
            let w_root_inv = ops::inverse(g, &w_root, &part, 4)?;
            let lhs = ops::apply_quadratic(g, &w_root, &sv, &part, 4)?;
            let rhs = ops::apply_quadratic(g, &w_root_inv, &zv, &part, 4)?;
            let scaled = ops::apply_quadratic(g, &w, &sv, &part, 4)?;
            let interior = ops::num_non_positive(g, &w, &part, 4)?;
            Ok((w.gather_all(g)?, lhs.gather_all(g)?, rhs.gather_all(g)?, scaled.gather_all(g)?, interior))
        })
        .unwrap();

        for r in results {
            let (w, lhs, rhs, scaled, interior) = r.unwrap();
            assert_eq!(interior, 0, "w is interior");
            assert_close(&w, &expected_w, 1e-10, "nesterov_todd");
            assert_close(&lhs, &rhs, 1e-10, "Q_sqrt(w) s vs Q_inv(sqrt(w)) z");
            assert_close(&scaled, &z, 1e-10, "Q_w s");
        }
    }
}

#[test]
fn test_max_step_half_lines() {
    let mut rng = ChaCha8Rng::seed_from_u64(909);
    let n = 13;
    let part = ConePartition::uniform(n, 1).unwrap();
    let s: Vec<f64> = (0..n).map(|_| rng.gen_range(0.5..2.0)).collect();
    let z: Vec<f64> = (0..n).map(|_| rng.gen_range(-3.0..3.0)).collect();

    let upper = 100.0;
    let expected = s
        .iter()
        .zip(&z)
        .filter(|(_, &zi)| zi < 0.0)
        .map(|(&si, &zi)| -si / zi)
        .fold(upper, f64::min);

    for ranks in 1..=4 {
        let alphas = LocalGroup::run(ranks, |g| {
            let (sv, zv) = (DistVector::from_global(g, &s).unwrap(), DistVector::from_global(g, &z).unwrap());
            ops::max_step(g, &sv, &zv, &part, upper, 1000).unwrap()
        })
        .unwrap();
        assert!(alphas.iter().all(|&a| a == expected), "{alphas:?} vs {expected}");
    }

    // Nothing binds: the upper bound comes back
    let positive: Vec<f64> = z.iter().map(|v| v.abs()).collect();
    let alpha = LocalGroup::run(2, |g| {
        let (sv, zv) = (DistVector::from_global(g, &s).unwrap(), DistVector::from_global(g, &positive).unwrap());
        ops::max_step(g, &sv, &zv, &part, 7.5, 1000).unwrap()
    })
    .unwrap();
    assert_eq!(alpha, vec![7.5, 7.5]);
}

#[test]
fn test_max_step_lands_on_boundary() {
    let mut rng = ChaCha8Rng::seed_from_u64(1010);
    let part = random_partition(&mut rng, 7, 6);
    let s = interior_point(&mut rng, &part);
    let z: Vec<f64> = any_point(&mut rng, part.len()).iter().map(|v| 4.0 * v).collect();
    let upper = 1e6;

    let mut seen = Vec::new();
    for ranks in 1..=4 {
        for cutoff in CUTOFFS {
            let alphas = LocalGroup::run(ranks, |g| {
                let (sv, zv) = (DistVector::from_global(g, &s).unwrap(), DistVector::from_global(g, &z).unwrap());
                ops::max_step(g, &sv, &zv, &part, upper, cutoff).unwrap()
            })
            .unwrap();
            seen.extend(alphas);
        }
    }
    let alpha = seen[0];
    for a in &seen {
        assert!((a - alpha).abs() <= 1e-12 * alpha.max(1.0));
    }
    assert!(alpha > 0.0 && alpha < upper);

    // Every block stays in the closed cone; the binding one touches the boundary.
    let moved: Vec<f64> = s.iter().zip(&z).map(|(si, zi)| si + alpha * zi).collect();
    let mut tightest = f64::INFINITY;
    for b in part.blocks() {
        let block = &moved[b.first..b.end()];
        let rest = block[1..].iter().map(|v| v * v).sum::<f64>().sqrt();
        let gap = (block[0] - rest) / block[0].abs().max(rest).max(1.0);
        assert!(gap >= -1e-9, "block {} leaves the cone: {gap}", b.first);
        tightest = tightest.min(gap);
    }
    assert!(tightest.abs() < 1e-9, "no block on the boundary: {tightest}");
}

#[test]
fn test_max_step_rejects_bad_bound() {
    let part = ConePartition::uniform(2, 3).unwrap();
    let results = LocalGroup::run(2, |g| {
        let s = DistVector::zeros(g, 6).unwrap();
        (
            ops::max_step(g, &s, &s, &part, -1.0, 10),
            ops::max_step(g, &s, &s, &part, f64::NAN, 10),
        )
    })
    .unwrap();
    for (neg, nan) in results {
        assert!(matches!(neg, Err(SocError::OutOfRange(_))));
        assert!(matches!(nan, Err(SocError::OutOfRange(_))));
    }
}

#[test]
fn test_max_step_small_scale() {
    // Block 0: (2k, αk, 0) leaves the cone at α = 2. Block 3 moves inward.
    let part = ConePartition::uniform(2, 3).unwrap();
    for scale in [1.0, 1e-4, 1e-8] {
        let s = vec![2.0 * scale, 0.0, 0.0, 2.0 * scale, 0.0, 0.0];
        let z = vec![0.0, scale, 0.0, scale, 0.0, 0.0];
        for ranks in 1..=4 {
            for cutoff in CUTOFFS {
                let alphas = LocalGroup::run(ranks, |g| {
                    let (sv, zv) = (DistVector::from_global(g, &s).unwrap(), DistVector::from_global(g, &z).unwrap());
                    ops::max_step(g, &sv, &zv, &part, 100.0, cutoff).unwrap()
                })
                .unwrap();
                for alpha in alphas {
                    assert!((alpha - 2.0).abs() < 1e-12, "scale {scale}, {ranks} ranks: alpha = {alpha}");
                    for b in part.blocks() {
                        let p: Vec<f64> = (b.first..b.end()).map(|i| s[i] + alpha * z[i]).collect();
                        let det = p[0] * p[0] - p[1..].iter().map(|v| v * v).sum::<f64>();
                        assert!(det >= -1e-12 * scale * scale, "scale {scale}: det = {det:e}");
                    }
                }
            }
        }
    }
}

#[test]
fn test_max_step_rejects_non_finite_direction() {
    let part = ConePartition::uniform(2, 3).unwrap();
    let s = vec![2.0, 0.0, 0.0, 2.0, 0.0, 0.0];
    let z = vec![f64::NAN, 0.0, 0.0, -1.0, 1.0, 0.0];
    for ranks in 1..=4 {
        for cutoff in CUTOFFS {
            let results = LocalGroup::run(ranks, |g| {
                let (sv, zv) = (DistVector::from_global(g, &s).unwrap(), DistVector::from_global(g, &z).unwrap());
                ops::max_step(g, &sv, &zv, &part, 100.0, cutoff)
            })
            .unwrap();
            for r in results {
                assert_eq!(
                    r,
                    Err(SocError::Domain {
                        first: 0,
                        reason: "z is not finite".into()
                    })
                );
            }
        }
    }
}

#[test]
fn test_failures_agree_across_ranks() {
    // Blocks start at 0, 5, 10, 15; three ranks own [0,7) [7,14) [14,20).
    let part = ConePartition::uniform(4, 5).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(1111);
    let mut x = interior_point(&mut rng, &part);
    x[5] = -1.0; // straddles ranks 0 and 1
    x[15] = -1.0; // only on rank 2

    for cutoff in CUTOFFS {
        let results = LocalGroup::run(3, |g| {
            let xv = DistVector::from_global(g, &x).unwrap();
            ops::sqrt(g, &xv, &part, cutoff).map(|_| ())
        })
        .unwrap();
        for r in results {
            assert_eq!(
                r,
                Err(SocError::Domain {
                    first: 5,
                    reason: "x is not in the closed cone".into()
                })
            );
        }
    }

    // Same failure through the Nesterov-Todd checks, reported against s.
    let results = LocalGroup::run(3, |g| {
        let xv = DistVector::from_global(g, &x).unwrap();
        let e = ops::identity(g, &xv, &part).unwrap();
        ops::nesterov_todd(g, &xv, &e, &part, 1000).map(|_| ())
    })
    .unwrap();
    for r in results {
        let err = r.unwrap_err();
        assert_eq!(err.block(), Some(5));
        assert!(err.to_string().contains("s is not in the cone interior"), "{err}");
    }
}

#[test]
fn test_nesterov_todd_rejects_boundary_z() {
    // z block 5 is on the boundary, z block 15 is outside; s is interior.
    let part = ConePartition::uniform(4, 5).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(1212);
    let s = interior_point(&mut rng, &part);
    let mut z = interior_point(&mut rng, &part);
    z[5..10].copy_from_slice(&[5.0, 3.0, 4.0, 0.0, 0.0]);
    z[15] = -1.0;

    for ranks in 1..=4 {
        for cutoff in CUTOFFS {
            let results = LocalGroup::run(ranks, |g| {
                let (sv, zv) = (DistVector::from_global(g, &s).unwrap(), DistVector::from_global(g, &z).unwrap());
                ops::nesterov_todd(g, &sv, &zv, &part, cutoff).map(|_| ())
            })
            .unwrap();
            for r in results {
                let err = r.unwrap_err();
                assert_eq!(err.block(), Some(5), "{ranks} ranks, cutoff {cutoff}");
                assert!(err.to_string().contains("z is not in the cone interior"), "{err}");
            }
        }
    }
}

#[test]
fn test_inverse_singular_block() {
    let part = ConePartition::uniform(3, 3).unwrap();
    let x = vec![2.0, 0.5, 0.0, 5.0, 3.0, 4.0, 1.0, 0.0, 0.0];
    let results = LocalGroup::run(2, |g| {
        let xv = DistVector::from_global(g, &x).unwrap();
        ops::inverse(g, &xv, &part, 1000).map(|_| ())
    })
    .unwrap();
    for r in results {
        assert_eq!(r, Err(SocError::Singular { first: 3, det: 0.0 }));
    }
}

#[test]
fn test_layout_mismatches() {
    let part = ConePartition::uniform(2, 3).unwrap();
    let results = LocalGroup::run(2, |g| {
        let x = DistVector::zeros(g, 6).unwrap();
        let short = DistVector::zeros(g, 4).unwrap();
        (
            ops::apply(g, &x, &short, &part, 10).is_err(),
            ops::dets(g, &short, &part, 10).is_err(),
        )
    })
    .unwrap();
    assert!(results.iter().all(|&r| r == (true, true)));
}
