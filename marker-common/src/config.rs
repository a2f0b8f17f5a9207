use serde::{Deserialize, Serialize};
use anyhow::Result;
use crate::sim_params::SimParams;
use std::path::Path;

// Which integrator drives the markers
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SimMode {
    /// Fixed-step full-orbit following with optional Coulomb collisions.
    FullOrbit,
    /// Adaptive Cash-Karp tracing of magnetic field lines.
    FieldLine,
}

// Coordinates recorded by diagnostics in full-orbit mode
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordMode {
    Particle,
    GuidingCenter,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationSection {
    pub mode: SimMode,
    #[serde(default = "default_record_mode")]
    pub record_mode: RecordMode,
    #[serde(default = "default_true")]
    pub enable_orbit_following: bool,
    #[serde(default)]
    pub enable_coulomb_collisions: bool,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

// Step-size control for both integrators
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimestepConfig {
    /// User-defined fixed step in seconds. When absent the step is a fraction of the gyro time.
    #[serde(default)]
    pub fixed_dt: Option<f64>,
    #[serde(default = "default_gyro_steps")]
    pub gyro_steps: u32,
    #[serde(default = "default_adaptive_tolerance")]
    pub adaptive_tolerance: f64,
    /// Largest accepted change of toroidal angle per adaptive step (radians).
    #[serde(default = "default_max_dphi")]
    pub max_dphi: f64,
    /// Largest accepted change of normalized flux radius per adaptive step.
    #[serde(default = "default_max_drho")]
    pub max_drho: f64,
}

impl Default for TimestepConfig {
    fn default() -> Self {
        TimestepConfig {
            fixed_dt: None,
            gyro_steps: default_gyro_steps(),
            adaptive_tolerance: default_adaptive_tolerance(),
            max_dphi: default_max_dphi(),
            max_drho: default_max_drho(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EndCondName {
    Tmax,
    Emin,
    Wall,
    Rhomin,
    Rhomax,
    Polmax,
    Tormax,
    Cpumax,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EndConditionsConfig {
    #[serde(default = "default_active_endconds")]
    pub active: Vec<EndCondName>,
    pub max_time: f64,
    #[serde(default = "default_max_cputime")]
    pub max_cputime: f64,
    #[serde(default)]
    pub min_energy_ev: f64,
    #[serde(default)]
    pub min_rho: f64,
    #[serde(default = "default_max_rho")]
    pub max_rho: f64,
    #[serde(default = "default_max_orbits")]
    pub max_pol_orbits: f64,
    #[serde(default = "default_max_orbits")]
    pub max_tor_orbits: f64,
}

// Analytic circular tokamak field
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct FieldConfig {
    pub r0: f64,
    #[serde(default)]
    pub z0: f64,
    pub b0: f64,
    #[serde(default = "default_safety_factor")]
    pub safety_factor: f64,
    pub minor_radius: f64,
    /// Radial electric field at the separatrix (V/m), linear in minor radius.
    #[serde(default)]
    pub e_radial: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WallKind {
    Circular,
    Polygon,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct WallConfig {
    pub kind: WallKind,
    #[serde(default)]
    pub radius: f64,
    #[serde(default)]
    pub r: Vec<f64>,
    #[serde(default)]
    pub z: Vec<f64>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PlasmaSpeciesConfig {
    pub name: String,
    pub mass_amu: f64,
    pub charge_e: f64,
    #[serde(default)]
    pub anum: i32,
    #[serde(default)]
    pub znum: i32,
    /// Core and edge densities (m^-3).
    pub density0: f64,
    #[serde(default)]
    pub density_edge: f64,
    /// Core and edge temperatures (eV).
    pub temperature0_ev: f64,
    #[serde(default)]
    pub temperature_edge_ev: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct PlasmaConfig {
    #[serde(default)]
    pub species: Vec<PlasmaSpeciesConfig>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    Particle,
    GuidingCenter,
    FieldLine,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MarkersConfig {
    pub kind: MarkerKind,
    /// CSV file with one marker per row. Unused when markers are seeded from the BMC mesh.
    #[serde(default)]
    pub input: Option<String>,
}

/// One histogram axis: `n` equal bins over `[min, max)`.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct AxisConfig {
    pub min: f64,
    pub max: f64,
    pub n: usize,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Dist5DConfig {
    pub r: AxisConfig,
    pub phi: AxisConfig,
    pub z: AxisConfig,
    pub vpar: AxisConfig,
    pub vperp: AxisConfig,
    #[serde(default = "default_time_axis")]
    pub time: AxisConfig,
    #[serde(default = "default_charge_axis")]
    pub charge: AxisConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Dist6DConfig {
    pub r: AxisConfig,
    pub phi: AxisConfig,
    pub z: AxisConfig,
    pub vr: AxisConfig,
    pub vphi: AxisConfig,
    pub vz: AxisConfig,
    #[serde(default = "default_time_axis")]
    pub time: AxisConfig,
    #[serde(default = "default_charge_axis")]
    pub charge: AxisConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrbitMode {
    Interval,
    Poincare,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OrbitConfig {
    pub mode: OrbitMode,
    /// Maximum number of points kept per marker; older points are overwritten.
    pub npoint: usize,
    #[serde(default)]
    pub interval: f64,
    #[serde(default)]
    pub toroidal_angles_deg: Vec<f64>,
    #[serde(default)]
    pub poloidal_angles_deg: Vec<f64>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TransportConfig {
    /// Points per sub-array when evaluating drift and diffusion.
    pub navg: usize,
    /// Recording interval in seconds; negative records outer mid-plane crossings.
    pub interval: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct DiagnosticsConfig {
    #[serde(default)]
    pub dist5d: Option<Dist5DConfig>,
    #[serde(default)]
    pub dist6d: Option<Dist6DConfig>,
    #[serde(default)]
    pub orbit: Option<OrbitConfig>,
    #[serde(default)]
    pub transport: Option<TransportConfig>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BmcDirection {
    Backward,
    Forward,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MeshKind {
    Dist5d,
    Dist6d,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct BmcConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bmc_direction")]
    pub direction: BmcDirection,
    #[serde(default = "default_mesh_kind")]
    pub mesh: MeshKind,
    #[serde(default)]
    pub t0: f64,
    pub t1: f64,
    /// Slice width, also used as the fixed integrator step.
    pub dt: f64,
    #[serde(default = "default_n_per_vertex")]
    pub n_per_vertex: usize,
    #[serde(default = "default_electron_mass_amu")]
    pub mass_amu: f64,
    #[serde(default = "default_electron_charge_e")]
    pub charge_e: f64,
    /// End conditions counted as a hit when folding markers into the probability mesh.
    #[serde(default = "default_bmc_target")]
    pub target: Vec<EndCondName>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PartitionKind {
    Host,
    Accelerator,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PartitionConfig {
    pub name: String,
    pub kind: PartitionKind,
    /// Markers handed to this partition. The uncapped partition (or the last
    /// one, if every partition is capped) takes the remainder.
    #[serde(default)]
    pub capacity: Option<usize>,
}

// Configuration for output settings, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    pub base_filename: String,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
    #[serde(default = "default_true")]
    pub save_endstate_csv: bool,
}

// Main simulation configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationConfig {
    pub simulation: SimulationSection,
    #[serde(default)]
    pub timestep: TimestepConfig,
    pub endconditions: EndConditionsConfig,
    pub field: FieldConfig,
    pub wall: WallConfig,
    #[serde(default)]
    pub plasma: PlasmaConfig,
    pub markers: MarkersConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    #[serde(default)]
    pub bmc: Option<BmcConfig>,
    #[serde(default)]
    pub partitions: Vec<PartitionConfig>,
    pub output: OutputConfig,
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let config = Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))?;
        Ok(config)
    }

    /// Parses and validates a configuration held in memory.
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: SimulationConfig = toml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the cross-section consistency rules. Every violation is fatal before any marker runs.
    pub fn validate(&self) -> Result<()> {
        // --- Field and wall ---
        if self.field.r0 <= 0.0 || self.field.minor_radius <= 0.0 {
            anyhow::bail!("field.r0 and field.minor_radius must be positive.");
        }
        if self.field.b0 == 0.0 || self.field.safety_factor == 0.0 {
            anyhow::bail!("field.b0 and field.safety_factor must be non-zero.");
        }
        match self.wall.kind {
            WallKind::Circular => {
                if self.wall.radius <= 0.0 {
                    anyhow::bail!("wall.radius must be positive for a circular wall.");
                }
            }
            WallKind::Polygon => {
                if self.wall.r.len() < 3 || self.wall.r.len() != self.wall.z.len() {
                    anyhow::bail!("polygon wall needs at least 3 vertices with matching r and z.");
                }
            }
        }

        // --- Mode and markers ---
        let field_line_markers = self.markers.kind == MarkerKind::FieldLine;
        if field_line_markers != (self.simulation.mode == SimMode::FieldLine) {
            anyhow::bail!("field_line markers are used with, and only with, the field_line mode.");
        }
        if self.simulation.enable_coulomb_collisions && self.plasma.species.is_empty() {
            anyhow::bail!("Coulomb collisions need at least one plasma species.");
        }

        // --- Step control ---
        if let Some(dt) = self.timestep.fixed_dt {
            if dt <= 0.0 {
                anyhow::bail!("timestep.fixed_dt must be positive.");
            }
        }
        if self.timestep.gyro_steps == 0 {
            anyhow::bail!("timestep.gyro_steps must be greater than 0.");
        }
        if self.timestep.adaptive_tolerance <= 0.0
            || self.timestep.max_dphi <= 0.0
            || self.timestep.max_drho <= 0.0
        {
            anyhow::bail!("adaptive tolerance and limits must be positive.");
        }

        // --- Diagnostics shapes ---
        if let Some(d) = &self.diagnostics.dist5d {
            for axis in [d.r, d.phi, d.z, d.vpar, d.vperp, d.time, d.charge] {
                validate_axis(&axis)?;
            }
        }
        if let Some(d) = &self.diagnostics.dist6d {
            for axis in [d.r, d.phi, d.z, d.vr, d.vphi, d.vz, d.time, d.charge] {
                validate_axis(&axis)?;
            }
        }
        if let Some(o) = &self.diagnostics.orbit {
            if o.npoint == 0 {
                anyhow::bail!("diagnostics.orbit.npoint must be greater than 0.");
            }
            if o.mode == OrbitMode::Poincare
                && o.toroidal_angles_deg.is_empty()
                && o.poloidal_angles_deg.is_empty()
            {
                anyhow::bail!("Poincare orbit mode needs at least one plane.");
            }
        }
        if let Some(t) = &self.diagnostics.transport {
            if t.navg < 2 {
                anyhow::bail!("diagnostics.transport.navg must be at least 2.");
            }
        }

        // --- BMC ---
        if let Some(bmc) = self.bmc.as_ref().filter(|b| b.enabled) {
            if bmc.dt <= 0.0 || bmc.t1 <= bmc.t0 {
                anyhow::bail!("bmc requires dt > 0 and t1 > t0.");
            }
            if bmc.n_per_vertex == 0 {
                anyhow::bail!("bmc.n_per_vertex must be greater than 0.");
            }
            let mesh_present = match bmc.mesh {
                MeshKind::Dist5d => self.diagnostics.dist5d.is_some(),
                MeshKind::Dist6d => self.diagnostics.dist6d.is_some(),
            };
            if !mesh_present {
                anyhow::bail!("bmc mesh {:?} is not configured under [diagnostics].", bmc.mesh);
            }
            if self.simulation.mode != SimMode::FullOrbit {
                anyhow::bail!("bmc runs in full_orbit mode only.");
            }
        }

        // --- Partitions ---
        let uncapped = self.partitions.iter().filter(|p| p.capacity.is_none()).count();
        if uncapped > 1 {
            anyhow::bail!("at most one partition may omit its capacity.");
        }

        Ok(())
    }

    /// Converts the configuration into simulation parameters used at runtime.
    pub fn get_sim_params(&self) -> SimParams {
        let ec = &self.endconditions;
        SimParams {
            // Mode
            mode: self.simulation.mode,
            record_mode: self.simulation.record_mode,
            enable_orbit_following: self.simulation.enable_orbit_following,
            enable_coulomb_collisions: self.simulation.enable_coulomb_collisions,
            seed: self.simulation.seed,
            // Step control
            fixed_dt: self.timestep.fixed_dt,
            gyro_steps: self.timestep.gyro_steps,
            adaptive_tolerance: self.timestep.adaptive_tolerance,
            max_dphi: self.timestep.max_dphi,
            max_drho: self.timestep.max_drho,
            // End conditions
            active_endconds: ec.active.clone(),
            max_time: ec.max_time,
            max_cputime: ec.max_cputime,
            min_energy_ev: ec.min_energy_ev,
            min_rho: ec.min_rho,
            max_rho: ec.max_rho,
            max_pol_orbits: ec.max_pol_orbits,
            max_tor_orbits: ec.max_tor_orbits,
        }
    }
}

fn validate_axis(axis: &AxisConfig) -> Result<()> {
    if axis.n == 0 || !(axis.max > axis.min) {
        anyhow::bail!("histogram axis needs n > 0 and max > min (got {:?}).", axis);
    }
    Ok(())
}

fn default_true() -> bool {
    true
}

fn default_record_mode() -> RecordMode {
    RecordMode::Particle
}

fn default_seed() -> u64 {
    12345
}

fn default_gyro_steps() -> u32 {
    20
}

fn default_adaptive_tolerance() -> f64 {
    1.0e-8
}

fn default_max_dphi() -> f64 {
    1.0
}

fn default_max_drho() -> f64 {
    1.0
}

fn default_active_endconds() -> Vec<EndCondName> {
    vec![EndCondName::Tmax, EndCondName::Wall]
}

fn default_max_cputime() -> f64 {
    f64::INFINITY
}

fn default_max_rho() -> f64 {
    f64::INFINITY
}

fn default_max_orbits() -> f64 {
    f64::INFINITY
}

fn default_safety_factor() -> f64 {
    2.0
}

fn default_time_axis() -> AxisConfig {
    AxisConfig { min: 0.0, max: 1.0e3, n: 1 }
}

fn default_charge_axis() -> AxisConfig {
    AxisConfig { min: -100.0, max: 100.0, n: 1 }
}

fn default_bmc_direction() -> BmcDirection {
    BmcDirection::Backward
}

fn default_mesh_kind() -> MeshKind {
    MeshKind::Dist5d
}

fn default_n_per_vertex() -> usize {
    1
}

fn default_electron_mass_amu() -> f64 {
    5.485_799_090_65e-4
}

fn default_electron_charge_e() -> f64 {
    -1.0
}

fn default_bmc_target() -> Vec<EndCondName> {
    vec![EndCondName::Wall]
}
