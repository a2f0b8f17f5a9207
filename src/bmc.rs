//! Backward and forward Monte Carlo over a phase-space mesh.
//!
//! Every retained mesh cell is seeded with `n_per_vertex` markers. Each time
//! slice restores the seeded markers, runs them for exactly one step and
//! folds the markers that hit the target (the wall by default) into the
//! probability of the cell they were seeded from.

use crate::background::Background;
use crate::diag::Histogram;
use crate::endcond::EndCond;
use crate::marker::{gc_to_particle, GuidingCenter, InputMarker, MarkerState, ParticleInput, Species};
use crate::error::MarkerError;
use crate::simulate::Simulation;
use anyhow::Result;
use log::{debug, info, warn};
use marker_common::{BmcConfig, DiagnosticsConfig, EndCondName, MeshKind, ProbabilitySnapshot, SimParams, Vec3};
use std::f64::consts::TAU;

/// Probabilities above this are reported as suspicious.
const PROBABILITY_WARN_LIMIT: f64 = 1.0001;

/// Forces the end conditions and step control a BMC slice relies on.
pub fn setup_endconds(params: &mut SimParams, dt: f64) {
    params.active_endconds = vec![EndCondName::Tmax, EndCondName::Wall];
    params.fixed_dt = Some(dt);
}

fn prepare(sim: &mut Simulation, dt: f64) {
    let mut params = sim.params().clone();
    setup_endconds(&mut params, dt);
    sim.set_params(params);
}

/// The configured mesh with its time and charge axes collapsed to one bin.
pub fn mesh_histogram(kind: MeshKind, diagnostics: &DiagnosticsConfig) -> Result<Histogram> {
    let collapse = |name: &str, axis: &mut marker_common::AxisConfig| {
        if axis.n != 1 {
            warn!("BMC mesh {} axis has {} bins; using a single bin.", name, axis.n);
            axis.n = 1;
        }
    };
    match kind {
        MeshKind::Dist5d => {
            let mut cfg = diagnostics
                .dist5d
                .clone()
                .ok_or_else(|| anyhow::anyhow!("BMC mesh dist5d is not configured."))?;
            collapse("time", &mut cfg.time);
            collapse("charge", &mut cfg.charge);
            Ok(Histogram::dist5d(&cfg))
        }
        MeshKind::Dist6d => {
            let mut cfg = diagnostics
                .dist6d
                .clone()
                .ok_or_else(|| anyhow::anyhow!("BMC mesh dist6d is not configured."))?;
            collapse("time", &mut cfg.time);
            collapse("charge", &mut cfg.charge);
            Ok(Histogram::dist6d(&cfg))
        }
    }
}

/// Seeded markers and the mesh cell each one belongs to.
#[derive(Debug, Clone)]
pub struct MeshSeed {
    pub markers: Vec<MarkerState>,
    pub mesh_index: Vec<usize>,
    pub n_per_vertex: usize,
}

/// Seeds `n_per_vertex` markers at the center of every mesh cell inside the
/// wall, at time `bmc.t1`. Cell centers rather than lower cell edges keep the
/// seeds inside the bins their probability is reported for.
///
/// 5D cells are guiding centers spread evenly in gyro angle; 6D cells are
/// particles. Replicates that fail conversion are dropped.
pub fn init_particles(mesh: &Histogram, kind: MeshKind, bmc: &BmcConfig, bg: &Background) -> Result<MeshSeed> {
    let axes = mesh.axes();
    let n_phase = match kind {
        MeshKind::Dist5d => 5,
        MeshKind::Dist6d => 6,
    };
    if axes.len() != n_phase + 2 || axes[n_phase..].iter().any(|a| a.n != 1) {
        anyhow::bail!("BMC mesh must have {} phase-space axes and single-bin time and charge axes.", n_phase);
    }

    let species = Species::from_amu_e(bmc.mass_amu, bmc.charge_e, bmc.mass_amu.round() as i32, bmc.charge_e.round() as i32);
    let n_cells: usize = axes[..n_phase].iter().map(|a| a.n).product();
    let mut markers = Vec::new();
    let mut mesh_index = Vec::new();
    let mut dropped = 0usize;
    let mut outside = 0usize;

    let mut bins = vec![0usize; axes.len()];
    for cell in 0..n_cells {
        let mut rest = cell;
        for d in (0..n_phase).rev() {
            bins[d] = rest % axes[d].n;
            rest /= axes[d].n;
        }
        let c: Vec<f64> = (0..n_phase).map(|d| axes[d].center(bins[d])).collect();
        let (r, phi, z) = (c[0], c[1], c[2]);
        if !bg.wall.point_inside(r, z) {
            outside += 1;
            continue;
        }
        let index = mesh.flat_index(&bins);

        for k in 0..bmc.n_per_vertex {
            let converted = match kind {
                MeshKind::Dist5d => {
                    let zeta = TAU * k as f64 / bmc.n_per_vertex as f64;
                    gc_cell_to_particle(r, phi, z, c[3], c[4], zeta, species, bg, bmc.t1)
                }
                MeshKind::Dist6d => Ok((r, phi, z, Vec3::new(c[3], c[4], c[5]))),
            };
            let state = converted.map(|(r, phi, z, v)| {
                InputMarker::Particle(ParticleInput {
                    id: markers.len() as i64 + 1,
                    r,
                    phi,
                    z,
                    v,
                    species,
                    weight: 1.0,
                    time: bmc.t1,
                })
                .into_state(bg)
            });
            match state {
                Ok(m) if m.err.is_none() => {
                    markers.push(m);
                    mesh_index.push(index);
                }
                _ => dropped += 1,
            }
        }
    }

    info!(
        "BMC seeding: {} markers from {} cells ({} outside the wall, {} replicates dropped).",
        markers.len(),
        n_cells,
        outside,
        dropped
    );
    Ok(MeshSeed { markers, mesh_index, n_per_vertex: bmc.n_per_vertex })
}

#[allow(clippy::too_many_arguments)]
fn gc_cell_to_particle(
    r: f64,
    phi: f64,
    z: f64,
    vpar: f64,
    vperp: f64,
    zeta: f64,
    species: Species,
    bg: &Background,
    t: f64,
) -> Result<(f64, f64, f64, Vec3), MarkerError> {
    if vperp < 0.0 {
        return Err(MarkerError::UnphysicalMoment);
    }
    let b = bg.bfield.eval_b(r, phi, z, t)?;
    let mu = 0.5 * species.mass * vperp * vperp / b.norm();
    gc_to_particle(&GuidingCenter { r, phi, z, vpar, mu, zeta }, species, bg, t)
}

/// Zeroes `destination` and adds `weight / n_per_vertex` to the cell of
/// every valid marker whose end condition intersects `target`.
pub fn fold_hits(markers: &[MarkerState], seed: &MeshSeed, target: EndCond, destination: &mut [f64]) {
    destination.fill(0.0);
    let per_vertex = seed.n_per_vertex as f64;
    for (m, &index) in markers.iter().zip(&seed.mesh_index) {
        if m.err.is_none() && m.endcond.intersects(target) {
            destination[index] += m.weight / per_vertex;
        }
    }
}

/// Source/destination pair walked from `t1` down to `t0`.
#[derive(Debug, Clone)]
pub struct BackwardSweep {
    t1: f64,
    dt: f64,
    n_slices: usize,
    next: usize,
    source: Vec<f64>,
    destination: Vec<f64>,
}

impl BackwardSweep {
    pub fn new(t0: f64, t1: f64, dt: f64, mesh_len: usize) -> Self {
        let n_slices = ((t1 - t0) / dt).round().max(0.0) as usize;
        BackwardSweep { t1, dt, n_slices, next: 0, source: vec![0.0; mesh_len], destination: vec![0.0; mesh_len] }
    }

    pub fn n_slices(&self) -> usize {
        self.n_slices
    }

    /// Start time of the next slice, latest first.
    pub fn next_slice(&mut self) -> Option<f64> {
        if self.next >= self.n_slices {
            return None;
        }
        let t = self.t1 - self.next as f64 * self.dt;
        self.next += 1;
        Some(t)
    }

    /// Folds the markers of the last slice into the destination and adds it to the source.
    pub fn fold(&mut self, markers: &[MarkerState], seed: &MeshSeed, target: EndCond) {
        fold_hits(markers, seed, target, &mut self.destination);
        for (s, d) in self.source.iter_mut().zip(&self.destination) {
            *s += d;
        }
    }

    pub fn source(&self) -> &[f64] {
        &self.source
    }

    pub fn destination(&self) -> &[f64] {
        &self.destination
    }

    pub fn into_source(self) -> Vec<f64> {
        self.source
    }
}

pub fn target_mask(names: &[EndCondName]) -> EndCond {
    EndCond::from_names(names)
}

fn restore(seed: &MeshSeed, time: f64) -> Vec<MarkerState> {
    let mut markers = seed.markers.clone();
    for m in &mut markers {
        m.time = time;
    }
    markers
}

/// Walks from `bmc.t1` back to `bmc.t0` one slice at a time and returns the
/// accumulated hit probability per mesh cell. `sim` is switched to
/// [`setup_endconds`] first, so every marker takes exactly one step per slice.
pub fn backward_monte_carlo(sim: &mut Simulation, seed: &MeshSeed, mesh: &Histogram, bmc: &BmcConfig) -> Result<ProbabilitySnapshot> {
    prepare(sim, bmc.dt);
    let target = target_mask(&bmc.target);
    let mut sweep = BackwardSweep::new(bmc.t0, bmc.t1, bmc.dt, mesh.len());
    let n_partitions = sim.plan().partitions().len() as u64;
    let base_seed = sim.params().seed;
    info!("BMC backward sweep: {} slices of {:e} s over {} markers.", sweep.n_slices(), bmc.dt, seed.markers.len());

    let mut k: u64 = 0;
    while let Some(t) = sweep.next_slice() {
        sim.endcond_mut().max_time = t;
        let mut markers = restore(seed, t);
        sim.run_seeded(&mut markers, base_seed.wrapping_add(k * n_partitions))?;
        sweep.fold(&markers, seed, target);
        debug!(
            "BMC slice {} at t = {:e} s: {:.3} hits, total probability mass {:.3}.",
            k + 1,
            t,
            sweep.destination().iter().sum::<f64>(),
            sweep.source().iter().sum::<f64>()
        );
        k += 1;
    }

    let slices = sweep.n_slices();
    let values = sweep.into_source();
    check_probabilities(&values);
    Ok(ProbabilitySnapshot { axes: mesh.axis_info(), values, slices })
}

/// Runs the seeded markers once from `bmc.t0` to `bmc.t1`.
pub fn forward_monte_carlo(sim: &mut Simulation, seed: &MeshSeed, mesh: &Histogram, bmc: &BmcConfig) -> Result<ProbabilitySnapshot> {
    prepare(sim, bmc.dt);
    let target = target_mask(&bmc.target);
    sim.endcond_mut().max_time = bmc.t1;
    let mut markers = restore(seed, bmc.t0);
    info!("BMC forward run: {:e} s to {:e} s over {} markers.", bmc.t0, bmc.t1, markers.len());
    sim.run(&mut markers)?;

    let mut values = vec![0.0; mesh.len()];
    fold_hits(&markers, seed, target, &mut values);
    check_probabilities(&values);
    Ok(ProbabilitySnapshot { axes: mesh.axis_info(), values, slices: 1 })
}

/// Logs a warning for every probability above the sanity limit and returns their count.
pub fn check_probabilities(values: &[f64]) -> usize {
    let mut n_bad = 0;
    for (i, &p) in values.iter().enumerate() {
        if p > PROBABILITY_WARN_LIMIT {
            if n_bad < 10 {
                warn!("Probability {:.4} above 1 in mesh cell {}.", p, i);
            }
            n_bad += 1;
        }
    }
    if n_bad > 10 {
        warn!("{} mesh cells in total have probabilities above 1.", n_bad);
    }
    n_bad
}
