//! End-condition evaluation.
//!
//! `evaluate` is a pure function of the pre- and post-step marker. Every
//! condition that matches contributes its bit; nothing is prioritized and no
//! verdict ever revives a finished marker.

use crate::background::Wall;
use crate::error::MarkerError;
use crate::lane::{Lane, LaneSnapshot};
use crate::marker::{Kinetics, MarkerState};
use crate::physlib::{ekin_vnorm, CONST_C, CONST_E};
use bitflags::bitflags;
use marker_common::{EndCondName, SimParams};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EndCond: u32 {
        const TMAX = 0x1;
        const EMIN = 0x2;
        const WALL = 0x8;
        const RHOMIN = 0x10;
        const RHOMAX = 0x20;
        const POLMAX = 0x40;
        const TORMAX = 0x80;
        const CPUMAX = 0x100;
        const ABORTED = 0x200;
    }
}

impl EndCond {
    pub fn from_endcond_name(name: EndCondName) -> EndCond {
        match name {
            EndCondName::Tmax => EndCond::TMAX,
            EndCondName::Emin => EndCond::EMIN,
            EndCondName::Wall => EndCond::WALL,
            EndCondName::Rhomin => EndCond::RHOMIN,
            EndCondName::Rhomax => EndCond::RHOMAX,
            EndCondName::Polmax => EndCond::POLMAX,
            EndCondName::Tormax => EndCond::TORMAX,
            EndCondName::Cpumax => EndCond::CPUMAX,
        }
    }

    pub fn from_names(names: &[EndCondName]) -> EndCond {
        names.iter().fold(EndCond::empty(), |acc, &name| acc | EndCond::from_endcond_name(name))
    }

    /// Human readable label, e.g. "TMAX | WALL", or "none" for an empty set.
    pub fn label(&self) -> String {
        if self.is_empty() {
            return "none".to_string();
        }
        self.iter_names().map(|(name, _)| name).collect::<Vec<_>>().join(" | ")
    }
}

#[derive(Debug, Clone)]
pub struct EndCondConfig {
    pub active: EndCond,
    pub max_time: f64,
    pub max_cputime: f64,
    pub min_energy_ev: f64,
    pub min_rho: f64,
    pub max_rho: f64,
    pub max_pol_orbits: f64,
    pub max_tor_orbits: f64,
    /// Raised by the caller to stop every marker at its next step.
    pub abort: Arc<AtomicBool>,
}

impl EndCondConfig {
    pub fn from_params(params: &SimParams) -> Self {
        EndCondConfig {
            active: EndCond::from_names(&params.active_endconds),
            max_time: params.max_time,
            max_cputime: params.max_cputime,
            min_energy_ev: params.min_energy_ev,
            min_rho: params.min_rho,
            max_rho: params.max_rho,
            max_pol_orbits: params.max_pol_orbits,
            max_tor_orbits: params.max_tor_orbits,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Outcome of one end-condition check.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Verdict {
    pub endcond: EndCond,
    pub walltile: u32,
    pub err: Option<MarkerError>,
}

impl Verdict {
    pub fn terminates(&self) -> bool {
        self.err.is_some() || !self.endcond.is_empty()
    }
}

/// Checks a marker that was running before the step. Markers with an error
/// or that were already finished get an empty verdict.
pub fn evaluate(pre: &MarkerState, post: &MarkerState, cfg: &EndCondConfig, wall: &dyn Wall) -> Verdict {
    if post.err.is_some() || !pre.running {
        return Verdict::default();
    }
    if let Err(err) = check_physical(post) {
        return Verdict { err: Some(err), ..Verdict::default() };
    }

    let mut fired = EndCond::empty();
    let mut walltile = 0;

    if post.time >= cfg.max_time {
        fired |= EndCond::TMAX;
    }
    if let Some(tile) = wall.hit_tile(pre.r, pre.z, post.r, post.z) {
        fired |= EndCond::WALL;
        walltile = tile;
    }
    if post.cputime >= cfg.max_cputime {
        fired |= EndCond::CPUMAX;
    }
    if let Kinetics::Particle { v } = post.kinetics {
        let ekin_ev = ekin_vnorm(post.species.mass, v.norm()) / CONST_E;
        if ekin_ev < cfg.min_energy_ev {
            fired |= EndCond::EMIN;
        }
    }
    if post.rho < cfg.min_rho {
        fired |= EndCond::RHOMIN;
    }
    if post.rho >= cfg.max_rho {
        fired |= EndCond::RHOMAX;
    }
    let turns = std::f64::consts::TAU;
    if ((post.theta - post.theta0) / turns).abs() >= cfg.max_pol_orbits {
        fired |= EndCond::POLMAX;
    }
    if ((post.phi - post.phi0) / turns).abs() >= cfg.max_tor_orbits {
        fired |= EndCond::TORMAX;
    }

    let mut endcond = fired & cfg.active;
    if cfg.abort.load(Ordering::Relaxed) {
        endcond |= EndCond::ABORTED;
    }
    if !endcond.contains(EndCond::WALL) {
        walltile = 0;
    }
    Verdict { endcond, walltile, err: None }
}

/// Writes a verdict into the post-step marker.
pub fn apply(post: &mut MarkerState, verdict: Verdict) {
    if let Some(err) = verdict.err {
        post.fail(err);
    }
    if !verdict.endcond.is_empty() {
        post.endcond |= verdict.endcond;
        post.walltile = verdict.walltile;
        post.running = false;
    }
}

/// Evaluates and applies the end conditions of every slot that was live
/// before the step.
pub fn check_lane<const N: usize>(lane: &mut Lane<N>, pre: &LaneSnapshot<N>, cfg: &EndCondConfig, wall: &dyn Wall) {
    for (i, active) in lane.live_mut() {
        if let Some(before) = &pre[i] {
            let verdict = evaluate(&before.marker, &active.marker, cfg, wall);
            apply(&mut active.marker, verdict);
        }
    }
}

fn check_physical(m: &MarkerState) -> Result<(), MarkerError> {
    if !(m.r.is_finite() && m.phi.is_finite() && m.z.is_finite()) {
        return Err(MarkerError::NonFinite);
    }
    if m.r <= 0.0 {
        return Err(MarkerError::NonPositiveRadius);
    }
    if let Kinetics::Particle { v } = m.kinetics {
        if !v.is_finite() {
            return Err(MarkerError::NonFinite);
        }
        if v.norm() >= CONST_C {
            return Err(MarkerError::Superluminal);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::testing::tokamak;
    use crate::marker::{InputMarker, ParticleInput, Species};
    use marker_common::Vec3;

    fn config() -> EndCondConfig {
        EndCondConfig {
            active: EndCond::TMAX | EndCond::WALL | EndCond::CPUMAX,
            max_time: 1.0e-6,
            max_cputime: 10.0,
            min_energy_ev: 0.0,
            min_rho: 0.0,
            max_rho: f64::INFINITY,
            max_pol_orbits: f64::INFINITY,
            max_tor_orbits: f64::INFINITY,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    fn marker(r: f64) -> MarkerState {
        InputMarker::Particle(ParticleInput {
            id: 1,
            r,
            phi: 0.0,
            z: 0.0,
            v: Vec3::new(1.0e5, 1.0e6, 0.0),
            species: Species::from_amu_e(2.0, 1.0, 2, 1),
            weight: 1.0,
            time: 0.0,
        })
        .into_state(&tokamak())
    }

    #[test]
    fn test_simultaneous_conditions_all_set() {
        let bg = tokamak();
        let pre = marker(8.2);
        let mut post = pre.clone();
        post.r = 8.4;
        post.time = 2.0e-6;
        let verdict = evaluate(&pre, &post, &config(), bg.wall.as_ref());
        assert_eq!(verdict.endcond, EndCond::TMAX | EndCond::WALL);
        assert_eq!(verdict.walltile, 1);
        apply(&mut post, verdict);
        assert!(!post.running);
        assert_eq!(post.endcond.label(), "TMAX | WALL");
    }

    #[test]
    fn test_inactive_condition_does_not_fire() {
        let bg = tokamak();
        let pre = marker(7.0);
        let mut post = pre.clone();
        post.rho = 5.0;
        let mut cfg = config();
        cfg.max_rho = 1.0;
        assert!(!evaluate(&pre, &post, &cfg, bg.wall.as_ref()).terminates());
        cfg.active |= EndCond::RHOMAX;
        assert_eq!(evaluate(&pre, &post, &cfg, bg.wall.as_ref()).endcond, EndCond::RHOMAX);
    }

    #[test]
    fn test_unphysical_state_becomes_error() {
        let bg = tokamak();
        let pre = marker(7.0);
        let mut post = pre.clone();
        post.r = -0.1;
        let verdict = evaluate(&pre, &post, &config(), bg.wall.as_ref());
        assert_eq!(verdict.err, Some(MarkerError::NonPositiveRadius));
        apply(&mut post, verdict);
        assert!(!post.running);
        assert!(post.endcond.is_empty());
    }

    #[test]
    fn test_marker_with_error_is_skipped() {
        let bg = tokamak();
        let pre = marker(7.0);
        let mut post = pre.clone();
        post.time = 1.0;
        post.err = Some(MarkerError::NonFinite);
        assert_eq!(evaluate(&pre, &post, &config(), bg.wall.as_ref()), Verdict::default());
    }

    #[test]
    fn test_abort_flag_stops_marker() {
        let bg = tokamak();
        let pre = marker(7.0);
        let post = pre.clone();
        let cfg = config();
        cfg.abort.store(true, Ordering::Relaxed);
        assert_eq!(evaluate(&pre, &post, &cfg, bg.wall.as_ref()).endcond, EndCond::ABORTED);
    }

    #[test]
    fn test_apply_never_revives() {
        let mut post = marker(7.0);
        post.running = false;
        post.endcond = EndCond::TMAX;
        apply(&mut post, Verdict::default());
        assert!(!post.running);
        assert_eq!(post.endcond, EndCond::TMAX);
    }

    #[test]
    fn test_every_configurable_name_has_its_own_bit() {
        let names = [
            EndCondName::Tmax,
            EndCondName::Emin,
            EndCondName::Wall,
            EndCondName::Rhomin,
            EndCondName::Rhomax,
            EndCondName::Polmax,
            EndCondName::Tormax,
            EndCondName::Cpumax,
        ];
        let all = EndCond::from_names(&names);
        assert_eq!(all.bits().count_ones() as usize, names.len());
        assert_eq!(all, EndCond::all() - EndCond::ABORTED);
        assert_eq!(EndCond::from_names(&[EndCondName::Wall, EndCondName::Tmax]), EndCond::TMAX | EndCond::WALL);
        assert!(EndCond::from_names(&[]).is_empty());
    }
}
