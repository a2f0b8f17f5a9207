//! Simulation driver: splits the backlog over partitions, runs the lane loop
//! of each partition concurrently and merges their diagnostics.

use crate::background::Background;
use crate::diag::Diagnostics;
use crate::endcond::{self, EndCondConfig};
use crate::lane::{CycleReport, Lane, MarkerQueue, NSIMD};
use crate::marker::MarkerState;
use crate::step::{accrue_diagnostics, AdaptiveFieldLine, FixedStepOrbit, Integrator};
use anyhow::Result;
use log::{debug, info, warn};
use marker_common::{DiagnosticsConfig, PartitionConfig, PartitionKind, SimMode, SimParams, SimulationConfig};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

/// One concurrent execution context.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub name: String,
    pub kind: PartitionKind,
    /// Maximum number of markers, `None` for "whatever is left".
    pub capacity: Option<usize>,
}

/// Static assignment of the backlog to partitions.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionPlan {
    partitions: Vec<Partition>,
}

impl PartitionPlan {
    pub fn host_only() -> Self {
        PartitionPlan {
            partitions: vec![Partition { name: "host".to_string(), kind: PartitionKind::Host, capacity: None }],
        }
    }

    pub fn from_config(configs: &[PartitionConfig]) -> Self {
        if configs.is_empty() {
            return Self::host_only();
        }
        PartitionPlan {
            partitions: configs
                .iter()
                .map(|c| Partition { name: c.name.clone(), kind: c.kind, capacity: c.capacity })
                .collect(),
        }
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// Number of markers per partition, in plan order. Capped partitions are
    /// filled first; the uncapped partition takes the remainder, or the last
    /// partition does when all are capped.
    pub fn split(&self, n_markers: usize) -> Vec<usize> {
        let mut counts = vec![0; self.partitions.len()];
        let mut remaining = n_markers;
        for (count, p) in counts.iter_mut().zip(&self.partitions) {
            if let Some(cap) = p.capacity {
                *count = cap.min(remaining);
                remaining -= *count;
            }
        }
        if remaining > 0 {
            let sink = self
                .partitions
                .iter()
                .position(|p| p.capacity.is_none())
                .unwrap_or(self.partitions.len() - 1);
            if self.partitions[sink].capacity.is_some() {
                warn!(
                    "Partition capacities cover {} of {} markers; '{}' takes the rest.",
                    n_markers - remaining,
                    n_markers,
                    self.partitions[sink].name
                );
            }
            counts[sink] += remaining;
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionTiming {
    pub name: String,
    pub n_markers: usize,
    pub seconds: f64,
}

pub struct RunOutcome {
    /// Diagnostics of every partition merged, indexed like the input markers.
    pub diagnostics: Diagnostics,
    pub timings: Vec<PartitionTiming>,
}

pub struct Simulation {
    params: SimParams,
    endcond: EndCondConfig,
    diag_config: DiagnosticsConfig,
    plan: PartitionPlan,
    background: Background,
}

impl Simulation {
    pub fn new(params: SimParams, diag_config: DiagnosticsConfig, plan: PartitionPlan, background: Background) -> Self {
        let endcond = EndCondConfig::from_params(&params);
        Simulation { params, endcond, diag_config, plan, background }
    }

    pub fn from_config(config: &SimulationConfig) -> Result<Self> {
        let background = Background::from_config(config)?;
        Ok(Self::new(
            config.get_sim_params(),
            config.diagnostics.clone(),
            PartitionPlan::from_config(&config.partitions),
            background,
        ))
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn background(&self) -> &Background {
        &self.background
    }

    pub fn plan(&self) -> &PartitionPlan {
        &self.plan
    }

    /// Replaces the run parameters and the end conditions derived from them.
    /// The abort handle survives.
    pub fn set_params(&mut self, params: SimParams) {
        let abort = Arc::clone(&self.endcond.abort);
        self.endcond = EndCondConfig::from_params(&params);
        self.endcond.abort = abort;
        self.params = params;
    }

    pub fn endcond(&self) -> &EndCondConfig {
        &self.endcond
    }

    pub fn endcond_mut(&mut self) -> &mut EndCondConfig {
        &mut self.endcond
    }

    /// Setting the returned flag stops every marker at its next step.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.endcond.abort)
    }

    pub fn run(&self, markers: &mut [MarkerState]) -> Result<RunOutcome> {
        self.run_seeded(markers, self.params.seed)
    }

    /// Runs every marker until it stops. Partition `k` draws from a stream
    /// seeded with `seed + k`.
    ///
    /// All diagnostic buffers are allocated before any marker moves, so an
    /// allocation failure returns an error with the markers untouched.
    pub fn run_seeded(&self, markers: &mut [MarkerState], seed: u64) -> Result<RunOutcome> {
        let counts = self.plan.split(markers.len());
        let mut total = Diagnostics::new(&self.diag_config, markers.len())?;
        let mut partition_diags = counts
            .iter()
            .map(|&n| Diagnostics::new(&self.diag_config, n))
            .collect::<Result<Vec<_>>>()?;

        let mut slices = Vec::with_capacity(counts.len());
        let mut rest = markers;
        for &n in &counts {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(n);
            slices.push(head);
            rest = tail;
        }

        let timings: Vec<PartitionTiming> = slices
            .into_par_iter()
            .zip(partition_diags.par_iter_mut())
            .enumerate()
            .map(|(k, (slice, diag))| {
                let partition = &self.plan.partitions[k];
                let started = Instant::now();
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(k as u64));
                let n_markers = slice.len();
                if n_markers > 0 {
                    match self.params.mode {
                        SimMode::FullOrbit => {
                            let integrator = FixedStepOrbit::from_params(&self.params);
                            self.run_partition::<_, NSIMD>(&integrator, slice, diag, &mut rng);
                        }
                        SimMode::FieldLine => {
                            let integrator = AdaptiveFieldLine::from_params(&self.params);
                            self.run_partition::<_, NSIMD>(&integrator, slice, diag, &mut rng);
                        }
                    }
                }
                let seconds = started.elapsed().as_secs_f64();
                debug!("Partition '{}' ({:?}) finished {} markers in {:.3} s.", partition.name, partition.kind, n_markers, seconds);
                PartitionTiming { name: partition.name.clone(), n_markers, seconds }
            })
            .collect();

        let mut offset = 0;
        for (diag, timing) in partition_diags.iter().zip(&timings) {
            total.merge(diag, offset);
            offset += timing.n_markers;
        }
        for t in &timings {
            info!("Partition '{}': {} markers in {:.3} s.", t.name, t.n_markers, t.seconds);
        }
        Ok(RunOutcome { diagnostics: total, timings })
    }

    /// Lane loop of one partition: step, end conditions, diagnostics, refill,
    /// until no slot is running and the backlog is empty.
    fn run_partition<I: Integrator, const N: usize>(
        &self,
        integrator: &I,
        markers: &mut [MarkerState],
        diag: &mut Diagnostics,
        rng: &mut StdRng,
    ) {
        let bg = &self.background;
        let source = integrator.point_source();
        let mut queue = MarkerQueue::new(markers);
        let mut lane: Lane<N> = Lane::new();

        let report = lane.cycle(&mut queue, bg);
        init_steps(&mut lane, &report, integrator);
        let mut n_running = report.n_running;
        let mut cputime_last = Instant::now();
        let mut n_steps: u64 = 0;

        while n_running > 0 {
            let pre = lane.snapshot();
            integrator.step(&mut lane, &pre, bg, rng);

            let now = Instant::now();
            let elapsed = now.duration_since(cputime_last).as_secs_f64();
            cputime_last = now;
            for (_, active) in lane.running_mut() {
                active.marker.cputime += elapsed;
            }

            endcond::check_lane(&mut lane, &pre, &self.endcond, bg.wall.as_ref());
            accrue_diagnostics(diag, &lane, &pre, source, bg);

            let report = lane.cycle(&mut queue, bg);
            init_steps(&mut lane, &report, integrator);
            n_running = report.n_running;
            n_steps += 1;
        }
        debug_assert_eq!(queue.finished(), queue.len());
        debug!("Lane loop done: {} markers, {} lane steps.", queue.len(), n_steps);
    }
}

fn init_steps<I: Integrator, const N: usize>(lane: &mut Lane<N>, report: &CycleReport<N>, integrator: &I) {
    for (i, active) in lane.live_mut() {
        if report.activated[i] {
            active.h = integrator.initial_step(active);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::testing::tokamak;
    use crate::diag::DiagKind;
    use crate::endcond::EndCond;
    use crate::error::MarkerError;
    use crate::marker::{FieldLineInput, GuidingCenterInput, InputMarker, ParticleInput, Species};
    use crate::physlib::{CONST_E, CONST_M_E};
    use marker_common::{AxisConfig, Dist5DConfig, EndCondName, RecordMode, Vec3};
    use std::collections::HashSet;

    fn params(mode: SimMode, dt: f64, steps: u32) -> SimParams {
        SimParams {
            mode,
            record_mode: RecordMode::Particle,
            enable_orbit_following: true,
            enable_coulomb_collisions: false,
            seed: 7,
            fixed_dt: Some(dt),
            gyro_steps: 20,
            adaptive_tolerance: 1.0e-8,
            max_dphi: 1.0,
            max_drho: 1.0,
            active_endconds: vec![EndCondName::Tmax, EndCondName::Wall],
            max_time: dt * steps as f64,
            max_cputime: f64::INFINITY,
            min_energy_ev: 0.0,
            min_rho: 0.0,
            max_rho: f64::INFINITY,
            max_pol_orbits: f64::INFINITY,
            max_tor_orbits: f64::INFINITY,
        }
    }

    fn axis(min: f64, max: f64, n: usize) -> AxisConfig {
        AxisConfig { min, max, n }
    }

    fn dist5d() -> DiagnosticsConfig {
        DiagnosticsConfig {
            dist5d: Some(Dist5DConfig {
                r: axis(4.0, 8.5, 9),
                phi: axis(0.0, std::f64::consts::TAU, 4),
                z: axis(-2.5, 2.5, 5),
                vpar: axis(-1.0e7, 1.0e7, 4),
                vperp: axis(0.0, 1.0e7, 2),
                time: axis(0.0, 1.0, 1),
                charge: axis(-10.0, 10.0, 1),
            }),
            ..DiagnosticsConfig::default()
        }
    }

    fn protons(n: usize) -> Vec<MarkerState> {
        let bg = tokamak();
        (0..n)
            .map(|i| {
                let f = i as f64 / n as f64;
                InputMarker::Particle(ParticleInput {
                    id: i as i64 + 1,
                    r: 6.5 + f,
                    phi: 0.0,
                    z: -0.3 + 0.6 * f,
                    v: Vec3::new(2.0e5, 1.0e6 * (1.0 - 2.0 * f), 1.0e5),
                    species: Species::from_amu_e(1.007276, 1.0, 1, 1),
                    weight: 1.0,
                    time: 0.0,
                })
                .into_state(&bg)
            })
            .collect()
    }

    fn without_cputime(markers: &[MarkerState]) -> Vec<MarkerState> {
        markers.iter().cloned().map(|mut m| {
            m.cputime = 0.0;
            m
        }).collect()
    }

    #[test]
    fn test_every_marker_finishes_exactly_once() {
        let mut markers = protons(37);
        let ids: HashSet<i64> = markers.iter().map(|m| m.id).collect();
        let sim = Simulation::new(params(SimMode::FullOrbit, 1.0e-9, 10), dist5d(), PartitionPlan::host_only(), tokamak());
        sim.run(&mut markers).expect("run");

        assert_eq!(markers.len(), 37);
        assert_eq!(markers.iter().map(|m| m.id).collect::<HashSet<_>>(), ids);
        assert!(markers.iter().all(|m| !m.running && m.err.is_none()));
        assert!(markers.iter().all(|m| m.endcond == EndCond::TMAX));
    }

    #[test]
    fn test_abort_stops_every_marker_after_one_step() {
        let mut markers = protons(20);
        let sim = Simulation::new(params(SimMode::FullOrbit, 1.0e-9, 1000), DiagnosticsConfig::default(), PartitionPlan::host_only(), tokamak());
        sim.abort_handle().store(true, std::sync::atomic::Ordering::Relaxed);
        sim.run(&mut markers).expect("run");

        assert!(markers.iter().all(|m| !m.running && m.endcond == EndCond::ABORTED));
        assert!(markers.iter().all(|m| m.time == 1.0e-9));
    }

    #[test]
    fn test_histogram_total_counts_every_step() {
        let dt = 2f64.powi(-30);
        let mut markers = protons(20);
        let sim = Simulation::new(params(SimMode::FullOrbit, dt, 10), dist5d(), PartitionPlan::host_only(), tokamak());
        let outcome = sim.run(&mut markers).expect("run");

        let (_, values) = outcome.diagnostics.histogram(DiagKind::Dist5D).expect("dist5d enabled");
        assert_eq!(values.iter().sum::<f64>(), 20.0 * 10.0);
        assert!(markers.iter().all(|m| m.time == 10.0 * dt));
    }

    #[test]
    fn test_failed_marker_is_written_back_without_diagnostics() {
        let dt = 2f64.powi(-30);
        let bg = tokamak();
        // Near the axis with a Larmor radius of about half a metre pointing to -R.
        let failed = InputMarker::GuidingCenter(GuidingCenterInput {
            id: 99,
            r: 0.05,
            phi: 0.0,
            z: 0.0,
            energy: 1.0e6 * CONST_E,
            pitch: 0.0,
            zeta: std::f64::consts::FRAC_PI_2,
            species: Species { mass: CONST_M_E * 1.0e10, charge: CONST_E, anum: 0, znum: 0 },
            weight: 1.0,
            time: 0.0,
        })
        .into_state(&bg);
        assert_eq!(failed.err, Some(MarkerError::NonPositiveRadius));

        let mut markers = protons(20);
        markers.insert(10, failed);
        let sim = Simulation::new(params(SimMode::FullOrbit, dt, 10), dist5d(), PartitionPlan::host_only(), bg);
        let outcome = sim.run(&mut markers).expect("run");

        let (_, values) = outcome.diagnostics.histogram(DiagKind::Dist5D).expect("dist5d enabled");
        assert_eq!(values.iter().sum::<f64>(), 20.0 * 10.0);

        assert_eq!(markers.len(), 21);
        let bad: Vec<&MarkerState> = markers.iter().filter(|m| m.id == 99).collect();
        assert_eq!(bad.len(), 1);
        assert_eq!(bad[0].err, Some(MarkerError::NonPositiveRadius));
        assert_eq!(bad[0].time, 0.0);
        assert!(!bad[0].running);
        assert!(markers.iter().filter(|m| m.id != 99).all(|m| m.err.is_none() && m.time == 10.0 * dt));
    }

    #[test]
    fn test_partitioned_run_matches_host_only() {
        let plan = PartitionPlan::from_config(&[
            PartitionConfig { name: "host".to_string(), kind: PartitionKind::Host, capacity: Some(5) },
            PartitionConfig { name: "accel0".to_string(), kind: PartitionKind::Accelerator, capacity: None },
            PartitionConfig { name: "accel1".to_string(), kind: PartitionKind::Accelerator, capacity: Some(9) },
        ]);
        let p = params(SimMode::FullOrbit, 1.0e-9, 12);

        let mut single = protons(30);
        let host = Simulation::new(p.clone(), dist5d(), PartitionPlan::host_only(), tokamak());
        let a = host.run(&mut single).expect("host run");

        let mut split = protons(30);
        let multi = Simulation::new(p, dist5d(), plan, tokamak());
        let b = multi.run(&mut split).expect("partitioned run");

        assert_eq!(b.timings.iter().map(|t| t.n_markers).collect::<Vec<_>>(), vec![5, 16, 9]);
        assert_eq!(without_cputime(&single), without_cputime(&split));
        assert_eq!(a.diagnostics.arena().data(), b.diagnostics.arena().data());
    }

    #[test]
    fn test_field_lines_run_to_max_time() {
        let bg = tokamak();
        let mut markers: Vec<MarkerState> = (0..3)
            .map(|i| {
                InputMarker::FieldLine(FieldLineInput {
                    id: i + 1,
                    r: 6.8 + 0.3 * i as f64,
                    phi: 0.0,
                    z: 0.0,
                    pitch: 1.0,
                    weight: 1.0,
                    time: 0.0,
                })
                .into_state(&bg)
            })
            .collect();
        let rho0: Vec<f64> = markers.iter().map(|m| m.rho).collect();

        let mut p = params(SimMode::FieldLine, 1.0, 1);
        p.fixed_dt = None;
        p.max_time = 1.0e-7;
        let sim = Simulation::new(p, DiagnosticsConfig::default(), PartitionPlan::host_only(), tokamak());
        sim.run(&mut markers).expect("run");

        for (m, rho) in markers.iter().zip(rho0) {
            assert!(!m.running);
            assert_eq!(m.endcond, EndCond::TMAX);
            assert!(m.time >= 1.0e-7);
            assert!((m.rho - rho).abs() < 1e-4);
        }
    }

    #[test]
    fn test_wall_hit_records_tile() {
        let bg = tokamak();
        // Fast radial motion straight out of the 2.1 m wall.
        let mut markers = vec![InputMarker::Particle(ParticleInput {
            id: 1,
            r: 8.25,
            phi: 0.0,
            z: 0.0,
            v: Vec3::new(5.0e7, 0.0, 0.0),
            species: Species::from_amu_e(1.007276, 1.0, 1, 1),
            weight: 1.0,
            time: 0.0,
        })
        .into_state(&bg)];
        let sim = Simulation::new(params(SimMode::FullOrbit, 1.0e-9, 1000), DiagnosticsConfig::default(), PartitionPlan::host_only(), bg);
        sim.run(&mut markers).expect("run");
        assert!(markers[0].endcond.contains(EndCond::WALL));
        assert_eq!(markers[0].walltile, 1);
    }

    #[test]
    fn test_split_fills_capped_partitions_first() {
        let plan = PartitionPlan::from_config(&[
            PartitionConfig { name: "a".to_string(), kind: PartitionKind::Host, capacity: None },
            PartitionConfig { name: "b".to_string(), kind: PartitionKind::Accelerator, capacity: Some(4) },
        ]);
        assert_eq!(plan.split(10), vec![6, 4]);
        assert_eq!(plan.split(3), vec![0, 3]);

        let capped = PartitionPlan::from_config(&[
            PartitionConfig { name: "a".to_string(), kind: PartitionKind::Host, capacity: Some(2) },
            PartitionConfig { name: "b".to_string(), kind: PartitionKind::Accelerator, capacity: Some(2) },
        ]);
        assert_eq!(capped.split(7), vec![2, 5]);
        assert_eq!(PartitionPlan::host_only().split(0), vec![0]);
    }
}
