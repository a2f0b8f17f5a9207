use serde::{Deserialize, Serialize};
use crate::config::{EndCondName, RecordMode, SimMode};

/// Simulation parameters derived from the configuration, used frequently during simulation steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimParams {
    // Mode
    pub mode: SimMode,
    pub record_mode: RecordMode,
    pub enable_orbit_following: bool,
    pub enable_coulomb_collisions: bool,
    pub seed: u64,

    // Step control
    pub fixed_dt: Option<f64>,
    pub gyro_steps: u32,
    pub adaptive_tolerance: f64,
    pub max_dphi: f64,
    pub max_drho: f64,

    // End conditions
    pub active_endconds: Vec<EndCondName>,
    pub max_time: f64,
    pub max_cputime: f64,
    pub min_energy_ev: f64,
    pub min_rho: f64,
    pub max_rho: f64,
    pub max_pol_orbits: f64,
    pub max_tor_orbits: f64,
}
