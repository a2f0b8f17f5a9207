//! Background collaborators the engine consumes: magnetic and electric
//! field, first wall, and plasma profiles.
//!
//! The engine only relies on the traits below. The analytic providers in the
//! submodules are what the binary builds from `config.toml`.

pub mod field;
pub mod plasma;
pub mod wall;

use crate::error::MarkerError;
use anyhow::Result;
use log::info;
use marker_common::{SimulationConfig, Vec3, WallKind};

pub use field::{AnalyticTokamakField, RadialElectricField};
pub use plasma::{ParabolicPlasma, PlasmaSpecies};
pub use wall::{CircularWall, PolygonWall};

/// Magnetic field and its gradient at one point.
///
/// `b` holds cylindrical components (B_R, B_phi, B_z). `db[i][j]` is the
/// partial derivative of component `i` with respect to coordinate `j` of
/// (R, phi, z).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldEval {
    pub b: Vec3,
    pub db: [[f64; 3]; 3],
}

pub trait MagneticField: Send + Sync {
    fn eval_b_db(&self, r: f64, phi: f64, z: f64, t: f64) -> Result<FieldEval, MarkerError>;

    fn eval_psi(&self, r: f64, phi: f64, z: f64, t: f64) -> Result<f64, MarkerError>;

    /// Normalized flux radius for poloidal flux `psi`.
    fn eval_rho(&self, psi: f64) -> Result<f64, MarkerError>;

    /// Magnetic axis position (R, z).
    fn axis(&self) -> (f64, f64);

    fn eval_b(&self, r: f64, phi: f64, z: f64, t: f64) -> Result<Vec3, MarkerError> {
        self.eval_b_db(r, phi, z, t).map(|f| f.b)
    }

    fn eval_rho_at(&self, r: f64, phi: f64, z: f64, t: f64) -> Result<f64, MarkerError> {
        let psi = self.eval_psi(r, phi, z, t)?;
        self.eval_rho(psi)
    }

    /// Geometric poloidal angle around the magnetic axis.
    fn poloidal_angle(&self, r: f64, z: f64) -> f64 {
        let (r0, z0) = self.axis();
        (z - z0).atan2(r - r0)
    }
}

pub trait ElectricField: Send + Sync {
    /// Cylindrical components of E at the given point.
    fn eval_e(&self, r: f64, phi: f64, z: f64, t: f64) -> Result<Vec3, MarkerError>;
}

pub trait Wall: Send + Sync {
    fn point_inside(&self, r: f64, z: f64) -> bool;

    /// 1-based id of the wall element crossed by the segment from (r0, z0) to
    /// (r1, z1), or `None` if the segment stays inside.
    fn hit_tile(&self, r0: f64, z0: f64, r1: f64, z1: f64) -> Option<u32>;
}

pub trait Plasma: Send + Sync {
    fn species(&self) -> &[PlasmaSpecies];

    /// Density (m^-3) and temperature (eV) of species `index` at flux radius `rho`.
    fn eval_dens_temp(&self, index: usize, rho: f64) -> (f64, f64);
}

/// Everything the integrators and end-condition checks read. Shared by
/// reference between partitions, never mutated during a run.
pub struct Background {
    pub bfield: Box<dyn MagneticField>,
    pub efield: Box<dyn ElectricField>,
    pub wall: Box<dyn Wall>,
    pub plasma: Box<dyn Plasma>,
}

impl Background {
    pub fn from_config(config: &SimulationConfig) -> Result<Self> {
        let f = &config.field;
        let bfield = AnalyticTokamakField::new(f.r0, f.z0, f.b0, f.safety_factor, f.minor_radius);
        let efield = RadialElectricField::new(f.r0, f.z0, f.minor_radius, f.e_radial);

        let wall: Box<dyn Wall> = match config.wall.kind {
            WallKind::Circular => Box::new(CircularWall::new(f.r0, f.z0, config.wall.radius)),
            WallKind::Polygon => Box::new(PolygonWall::new(config.wall.r.clone(), config.wall.z.clone())?),
        };

        let plasma = ParabolicPlasma::from_config(&config.plasma);
        info!(
            "Background: circular tokamak R0={} m, B0={} T, a={} m, {:?} wall, {} plasma species.",
            f.r0,
            f.b0,
            f.minor_radius,
            config.wall.kind,
            plasma.species().len()
        );

        Ok(Background {
            bfield: Box::new(bfield),
            efield: Box::new(efield),
            wall,
            plasma: Box::new(plasma),
        })
    }
}
