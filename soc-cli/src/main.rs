//! Walkthrough driver for the soc-core cone operations.
//!
//! Builds two points `s` and `z` in a product of second-order cones, runs
//! every cone operation on them across `--ranks` thread ranks and prints the
//! results from rank 0.

mod exchange_choice;
mod report;

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

use soc_core::{ops, ConePartition, DistVector, LocalGroup, ProcessGroup, SocSettings};

use exchange_choice::{cutoff_for, ExchangeChoice};
use report::{max_abs_diff, Report};

#[derive(Parser, Debug)]
#[command(name = "soc-cli", about = "Second-order cone operations walkthrough")]
struct Args {
    /// Order of every cone block
    #[arg(long, default_value_t = 5)]
    n: usize,

    /// Number of cone blocks
    #[arg(long, default_value_t = 3)]
    blocks: usize,

    /// Number of simulated ranks
    #[arg(long, default_value_t = 1)]
    ranks: usize,

    /// Block order above which straddling blocks use the all-reduce
    /// (defaults to SOC_CUTOFF or 1000)
    #[arg(long)]
    cutoff: Option<usize>,

    /// Exchange route for straddling blocks
    #[arg(long, value_enum, default_value_t = ExchangeChoice::Auto)]
    exchange: ExchangeChoice,

    /// Upper bound for the maximum step search
    #[arg(long, default_value_t = 100.0)]
    upper_bound: f64,

    /// Seed for the random parts of s and z
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Only print the summary lines
    #[arg(long)]
    quiet: bool,

    /// Write a JSON report to this path
    #[arg(long)]
    json: Option<PathBuf>,
}

/// Gather `v` everywhere and print it from rank 0 (collective).
fn print_vec<G: ProcessGroup>(group: &G, v: &DistVector, label: &str, quiet: bool) -> Result<Vec<f64>> {
    let full = v.gather_all(group)?;
    if !quiet && group.rank() == 0 {
        println!("{label}:");
        for value in &full {
            println!("  {value:>24.16e}");
        }
    }
    Ok(full)
}

/// One value per block, read at its first index.
fn per_block(part: &ConePartition, full: &[f64]) -> Vec<f64> {
    part.blocks().map(|b| full[b.first]).collect()
}

fn walkthrough<G: ProcessGroup>(group: &G, args: &Args, cutoff: usize) -> Result<Option<Report>> {
    let n = args.n;
    let len = n * args.blocks;
    let quiet = args.quiet;
    let sample_radius = 1.0 / (n as f64).sqrt();

    // Construct s and z in the product cone
    let part = ConePartition::uniform(args.blocks, n)?;
    let mut s = DistVector::uniform(group, len, 0.0, sample_radius, args.seed)?;
    let mut z = DistVector::uniform(group, len, 0.0, sample_radius, args.seed.wrapping_add(1))?;
    for b in 0..args.blocks {
        s.set_if_local(b * n, 2.0 + b as f64)?;
        z.set_if_local(b * n, 5.0 + b as f64)?;
    }
    let full_s = print_vec(group, &s, "s", quiet)?;
    let full_z = print_vec(group, &z, "z", quiet)?;
    if !quiet && group.rank() == 0 {
        println!("orders: {:?}", part.orders());
        println!("firstInds: {:?}", part.first_inds());
    }

    // Determinants and non-positive members
    let s_dets = ops::dets(group, &s, &part, cutoff)?;
    let z_dets = ops::dets(group, &z, &part, cutoff)?;
    let s_dets_bcast = ops::broadcast(group, &s_dets, &part, cutoff)?;
    let z_dets_bcast = ops::broadcast(group, &z_dets, &part, cutoff)?;
    let s_non_pos = ops::num_non_positive(group, &s, &part, cutoff)?;
    let z_non_pos = ops::num_non_positive(group, &z, &part, cutoff)?;
    let full_s_dets = print_vec(group, &s_dets, "det(s)", quiet)?;
    let full_z_dets = print_vec(group, &z_dets, "det(z)", quiet)?;
    print_vec(group, &s_dets_bcast, "Broadcasted det(s)", quiet)?;
    print_vec(group, &z_dets_bcast, "Broadcasted det(z)", quiet)?;
    if group.rank() == 0 {
        println!("# non-SOC in s: {s_non_pos}");
        println!("# non-SOC in z: {z_non_pos}");
    }

    // Square roots
    let s_root = ops::sqrt(group, &s, &part, cutoff)?;
    let z_root = ops::sqrt(group, &z, &part, cutoff)?;
    let s_root_sq = ops::apply(group, &s_root, &s_root, &part, cutoff)?;
    let z_root_sq = ops::apply(group, &z_root, &z_root, &part, cutoff)?;
    print_vec(group, &s_root, "sqrt(s)", quiet)?;
    print_vec(group, &z_root, "sqrt(z)", quiet)?;
    let full_s_root_sq = print_vec(group, &s_root_sq, "(sqrt(s))^2", quiet)?;
    let full_z_root_sq = print_vec(group, &z_root_sq, "(sqrt(z))^2", quiet)?;

    // Inverses
    let e = ops::identity(group, &s, &part)?.gather_all(group)?;
    let s_inv = ops::inverse(group, &s, &part, cutoff)?;
    let z_inv = ops::inverse(group, &z, &part, cutoff)?;
    let s_inv_s = ops::apply(group, &s_inv, &s, &part, cutoff)?;
    let z_inv_z = ops::apply(group, &z_inv, &z, &part, cutoff)?;
    let s_s_inv = ops::apply(group, &s, &s_inv, &part, cutoff)?;
    let z_z_inv = ops::apply(group, &z, &z_inv, &part, cutoff)?;
    print_vec(group, &s_inv, "inv(s)", quiet)?;
    print_vec(group, &z_inv, "inv(z)", quiet)?;
    let mut inverse_residual = 0.0_f64;
    for (v, label) in [
        (&s_inv_s, "s o inv(s)"),
        (&z_inv_z, "z o inv(z)"),
        (&s_s_inv, "inv(s) o s"),
        (&z_z_inv, "inv(z) o z"),
    ] {
        let full = print_vec(group, v, label, quiet)?;
        inverse_residual = inverse_residual.max(max_abs_diff(&full, &e));
    }

    // Nesterov-Todd scaling point
    let w = ops::nesterov_todd(group, &s, &z, &part, cutoff)?;
    let w_root = ops::sqrt(group, &w, &part, cutoff)?;
    let w_root_inv = ops::inverse(group, &w_root, &part, cutoff)?;
    let s_nt = ops::apply_quadratic(group, &w_root, &s, &part, cutoff)?;
    let z_nt = ops::apply_quadratic(group, &w_root_inv, &z, &part, cutoff)?;
    print_vec(group, &w, "w", quiet)?;
    let full_s_nt = print_vec(group, &s_nt, "s_NT", quiet)?;
    let full_z_nt = print_vec(group, &z_nt, "z_NT", quiet)?;

    // Largest step with s + alpha z in the product cone
    let alpha = ops::max_step(group, &s, &z, &part, args.upper_bound, cutoff)?;
    let mut p = s.clone();
    p.axpy(alpha, &z)?;
    let p_dets = ops::dets(group, &p, &part, cutoff)?;
    if group.rank() == 0 {
        println!("maximum step in cone is: {alpha}");
    }
    print_vec(group, &p, "s + alpha z", quiet)?;
    let full_p_dets = print_vec(group, &p_dets, "det(s + alpha z)", quiet)?;

    if group.rank() != 0 {
        return Ok(None);
    }
    Ok(Some(Report {
        order: n,
        blocks: args.blocks,
        ranks: group.size(),
        cutoff,
        seed: args.seed,
        non_positive_s: s_non_pos,
        non_positive_z: z_non_pos,
        dets_s: per_block(&part, &full_s_dets),
        dets_z: per_block(&part, &full_z_dets),
        sqrt_residual: max_abs_diff(&full_s_root_sq, &full_s).max(max_abs_diff(&full_z_root_sq, &full_z)),
        inverse_residual,
        nesterov_todd_residual: max_abs_diff(&full_s_nt, &full_z_nt),
        upper_bound: args.upper_bound,
        max_step: alpha,
        dets_at_step: per_block(&part, &full_p_dets),
    }))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let settings = SocSettings::default();

    let level = if settings.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if args.n == 0 || args.blocks == 0 || args.ranks == 0 {
        bail!("--n, --blocks and --ranks must all be positive");
    }
    let cutoff = cutoff_for(args.exchange, args.cutoff.unwrap_or(settings.cutoff));
    log::info!(
        "{} blocks of order {} on {} ranks (cutoff {cutoff})",
        args.blocks,
        args.n,
        args.ranks
    );

    let reports = LocalGroup::run(args.ranks, |group| walkthrough(group, &args, cutoff))?;
    let mut summary = None;
    for result in reports {
        if let Some(report) = result? {
            summary = Some(report);
        }
    }

    if let (Some(path), Some(report)) = (&args.json, &summary) {
        report.write(path)?;
        log::info!("wrote report to {}", path.display());
    }
    Ok(())
}
