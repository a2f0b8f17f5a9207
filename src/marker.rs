//! Marker state, the input marker kinds and the guiding-center transform.

use crate::background::Background;
use crate::endcond::EndCond;
use crate::error::MarkerError;
use crate::physlib::{vnorm_ekin, CONST_C, CONST_E, CONST_U};
use marker_common::{perpendicular_basis, unwrap_angle, MarkerRecord, Vec3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Species {
    /// Mass (kg) and charge (C).
    pub mass: f64,
    pub charge: f64,
    pub anum: i32,
    pub znum: i32,
}

impl Species {
    pub fn from_amu_e(mass_amu: f64, charge_e: f64, anum: i32, znum: i32) -> Self {
        Species { mass: mass_amu * CONST_U, charge: charge_e * CONST_E, anum, znum }
    }
}

/// Velocity-like part of the state, per representation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Kinetics {
    /// Full orbit: cylindrical velocity components (m/s) at the marker's phi.
    Particle { v: Vec3 },
    /// Field line followed parallel (+1) or anti-parallel (-1) to B.
    FieldLine { pitch: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerState {
    pub id: i64,
    pub r: f64,
    /// Cumulative toroidal angle (rad), not wrapped.
    pub phi: f64,
    pub z: f64,
    pub kinetics: Kinetics,
    pub species: Species,
    pub weight: f64,
    pub time: f64,
    pub cputime: f64,
    pub rho: f64,
    /// Cumulative poloidal angle (rad), not wrapped.
    pub theta: f64,
    /// Angles at initialization, used by the transit-count end conditions.
    pub phi0: f64,
    pub theta0: f64,
    pub running: bool,
    pub endcond: EndCond,
    pub walltile: u32,
    pub err: Option<MarkerError>,
}

impl MarkerState {
    /// Particle velocity, or `None` for field lines.
    pub fn velocity(&self) -> Option<Vec3> {
        match self.kinetics {
            Kinetics::Particle { v } => Some(v),
            Kinetics::FieldLine { .. } => None,
        }
    }

    /// Marks the marker as permanently invalid.
    pub fn fail(&mut self, err: MarkerError) {
        self.err = Some(err);
        self.running = false;
    }

    /// Re-evaluates rho and the cumulative poloidal angle after the position changed.
    pub fn refresh_flux_coordinates(&mut self, bg: &Background) -> Result<(), MarkerError> {
        self.rho = bg.bfield.eval_rho_at(self.r, self.phi, self.z, self.time)?;
        self.theta = unwrap_angle(bg.bfield.poloidal_angle(self.r, self.z), self.theta);
        Ok(())
    }

    pub fn to_record(&self) -> MarkerRecord {
        let (v, pitch) = match self.kinetics {
            Kinetics::Particle { v } => (v, 0.0),
            Kinetics::FieldLine { pitch } => (Vec3::zero(), pitch),
        };
        MarkerRecord {
            id: self.id,
            r: self.r,
            phi: self.phi,
            z: self.z,
            vr: v.x,
            vphi: v.y,
            vz: v.z,
            pitch,
            mass: self.species.mass,
            charge: self.species.charge,
            weight: self.weight,
            time: self.time,
            cputime: self.cputime,
            rho: self.rho,
            running: self.running,
            endcond: self.endcond.bits(),
            walltile: self.walltile,
            err: self.err.map_or(0, MarkerError::code),
        }
    }
}

/// Particle marker with cylindrical velocity.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleInput {
    pub id: i64,
    pub r: f64,
    pub phi: f64,
    pub z: f64,
    pub v: Vec3,
    pub species: Species,
    pub weight: f64,
    pub time: f64,
}

/// Guiding-center marker given by kinetic energy, pitch v_par / v and gyro angle.
#[derive(Debug, Clone, PartialEq)]
pub struct GuidingCenterInput {
    pub id: i64,
    pub r: f64,
    pub phi: f64,
    pub z: f64,
    pub energy: f64,
    pub pitch: f64,
    pub zeta: f64,
    pub species: Species,
    pub weight: f64,
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldLineInput {
    pub id: i64,
    pub r: f64,
    pub phi: f64,
    pub z: f64,
    pub pitch: f64,
    pub weight: f64,
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputMarker {
    Particle(ParticleInput),
    GuidingCenter(GuidingCenterInput),
    FieldLine(FieldLineInput),
}

impl InputMarker {
    pub fn id(&self) -> i64 {
        match self {
            InputMarker::Particle(p) => p.id,
            InputMarker::GuidingCenter(g) => g.id,
            InputMarker::FieldLine(f) => f.id,
        }
    }

    /// Converts the input into a marker ready to run. Conversion failures do
    /// not drop the marker: it comes back not running, carrying the error.
    pub fn into_state(self, bg: &Background) -> MarkerState {
        match self {
            InputMarker::Particle(p) => {
                let mut state = new_state(p.id, p.r, p.phi, p.z, Kinetics::Particle { v: p.v }, p.species, p.weight, p.time);
                if let Err(err) = validate_particle(p.r, p.v) {
                    state.fail(err);
                }
                finish_init(state, bg)
            }
            InputMarker::GuidingCenter(g) => {
                let converted = gc_input_to_particle(&g, bg);
                match converted {
                    Ok(p) => InputMarker::Particle(p).into_state(bg),
                    Err(err) => {
                        let mut state = new_state(
                            g.id,
                            g.r,
                            g.phi,
                            g.z,
                            Kinetics::Particle { v: Vec3::zero() },
                            g.species,
                            g.weight,
                            g.time,
                        );
                        state.fail(err);
                        state
                    }
                }
            }
            InputMarker::FieldLine(f) => {
                let species = Species { mass: 0.0, charge: 0.0, anum: 0, znum: 0 };
                let pitch = if f.pitch < 0.0 { -1.0 } else { 1.0 };
                let mut state = new_state(f.id, f.r, f.phi, f.z, Kinetics::FieldLine { pitch }, species, f.weight, f.time);
                if !(f.r > 0.0) {
                    state.fail(MarkerError::NonPositiveRadius);
                }
                finish_init(state, bg)
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn new_state(id: i64, r: f64, phi: f64, z: f64, kinetics: Kinetics, species: Species, weight: f64, time: f64) -> MarkerState {
    MarkerState {
        id,
        r,
        phi,
        z,
        kinetics,
        species,
        weight,
        time,
        cputime: 0.0,
        rho: 0.0,
        theta: 0.0,
        phi0: phi,
        theta0: 0.0,
        running: true,
        endcond: EndCond::empty(),
        walltile: 0,
        err: None,
    }
}

fn finish_init(mut state: MarkerState, bg: &Background) -> MarkerState {
    if state.err.is_some() {
        return state;
    }
    state.theta = bg.bfield.poloidal_angle(state.r, state.z);
    state.theta0 = state.theta;
    match bg.bfield.eval_rho_at(state.r, state.phi, state.z, state.time) {
        Ok(rho) => state.rho = rho,
        Err(err) => state.fail(err),
    }
    state
}

fn validate_particle(r: f64, v: Vec3) -> Result<(), MarkerError> {
    if !r.is_finite() || !v.is_finite() {
        return Err(MarkerError::NonFinite);
    }
    if r <= 0.0 {
        return Err(MarkerError::NonPositiveRadius);
    }
    if v.norm() >= CONST_C {
        return Err(MarkerError::Superluminal);
    }
    Ok(())
}

fn gc_input_to_particle(g: &GuidingCenterInput, bg: &Background) -> Result<ParticleInput, MarkerError> {
    if !(g.energy >= 0.0) || !(-1.0..=1.0).contains(&g.pitch) {
        return Err(MarkerError::NonFinite);
    }
    let b = bg.bfield.eval_b(g.r, g.phi, g.z, g.time)?;
    let v = vnorm_ekin(g.species.mass, g.energy);
    let vpar = g.pitch * v;
    let vperp = (1.0 - g.pitch * g.pitch).sqrt() * v;
    let mu = 0.5 * g.species.mass * vperp * vperp / b.norm();
    let gc = GuidingCenter { r: g.r, phi: g.phi, z: g.z, vpar, mu, zeta: g.zeta };
    let (r, phi, z, v) = gc_to_particle(&gc, g.species, bg, g.time)?;
    Ok(ParticleInput { id: g.id, r, phi, z, v, species: g.species, weight: g.weight, time: g.time })
}

/// Guiding-center coordinates of a charged particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuidingCenter {
    pub r: f64,
    pub phi: f64,
    pub z: f64,
    pub vpar: f64,
    /// Magnetic moment m v_perp^2 / (2B) (J/T).
    pub mu: f64,
    pub zeta: f64,
}

/// First-order guiding-center to particle transform.
///
/// The particle sits at X + (m / qB) b x v_perp with v_perp at gyro angle
/// `zeta` in the basis returned by `perpendicular_basis(b)`. The Larmor
/// displacement is added in the local cylindrical frame, so a large enough
/// gyro radius can put the particle at r <= 0.
pub fn gc_to_particle(gc: &GuidingCenter, species: Species, bg: &Background, t: f64) -> Result<(f64, f64, f64, Vec3), MarkerError> {
    if !(gc.mu >= 0.0) || !gc.mu.is_finite() {
        return Err(MarkerError::UnphysicalMoment);
    }
    if gc.vpar.abs() >= CONST_C {
        return Err(MarkerError::Superluminal);
    }
    let b = bg.bfield.eval_b(gc.r, gc.phi, gc.z, t)?;
    let bnorm = b.norm();
    let bhat = b.scale(1.0 / bnorm);
    let (e1, e2) = perpendicular_basis(bhat);

    let vperp = (2.0 * gc.mu * bnorm / species.mass).sqrt();
    let (s, c) = gc.zeta.sin_cos();
    let vperp_vec = (e1.scale(c) + e2.scale(s)).scale(vperp);
    let larmor = bhat.cross(vperp_vec).scale(species.mass / (species.charge * bnorm));

    let r = gc.r + larmor.x;
    if !(r > 0.0) {
        return Err(MarkerError::NonPositiveRadius);
    }
    let phi = gc.phi + larmor.y / gc.r;
    let z = gc.z + larmor.z;
    let v = bhat.scale(gc.vpar) + vperp_vec;
    if v.norm() >= CONST_C {
        return Err(MarkerError::Superluminal);
    }
    Ok((r, phi, z, v))
}

/// First-order particle to guiding-center transform, inverse of [`gc_to_particle`]
/// to first order in the Larmor radius.
pub fn particle_to_gc(state: &MarkerState, bg: &Background) -> Result<GuidingCenter, MarkerError> {
    let v = state.velocity().ok_or(MarkerError::WrongRepresentation)?;
    let b = bg.bfield.eval_b(state.r, state.phi, state.z, state.time)?;
    let bnorm = b.norm();
    let bhat = b.scale(1.0 / bnorm);
    let vpar = v.dot(bhat);
    let vperp_vec = v - bhat.scale(vpar);
    let larmor = bhat.cross(vperp_vec).scale(state.species.mass / (state.species.charge * bnorm));

    let r = state.r - larmor.x;
    if !(r > 0.0) {
        return Err(MarkerError::NonPositiveRadius);
    }
    let phi = state.phi - larmor.y / state.r;
    let z = state.z - larmor.z;
    let (e1, e2) = perpendicular_basis(bhat);
    let zeta = vperp_vec.dot(e2).atan2(vperp_vec.dot(e1));
    let mu = 0.5 * state.species.mass * vperp_vec.norm_squared() / bnorm;
    Ok(GuidingCenter { r, phi, z, vpar, mu, zeta })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::testing::tokamak;
    use crate::physlib::CONST_M_E;

    fn alpha() -> Species {
        Species::from_amu_e(4.0, 2.0, 4, 2)
    }

    #[test]
    fn test_gc_particle_roundtrip() {
        let bg = tokamak();
        let gc = GuidingCenter { r: 7.0, phi: 0.3, z: 0.2, vpar: 4.0e6, mu: 1.0e-14, zeta: 1.1 };
        let (r, phi, z, v) = gc_to_particle(&gc, alpha(), &bg, 0.0).expect("valid gc");

        let state = InputMarker::Particle(ParticleInput {
            id: 1,
            r,
            phi,
            z,
            v,
            species: alpha(),
            weight: 1.0,
            time: 0.0,
        })
        .into_state(&bg);
        let back = particle_to_gc(&state, &bg).expect("valid particle");

        // First order in the Larmor radius: positions agree to a small fraction of it.
        assert!((back.r - gc.r).abs() < 1e-3);
        assert!((back.z - gc.z).abs() < 1e-3);
        assert!((back.vpar - gc.vpar).abs() / gc.vpar.abs() < 1e-2);
        assert!((back.mu - gc.mu).abs() / gc.mu < 1e-2);
    }

    #[test]
    fn test_gc_input_with_nonpositive_radius_keeps_marker_with_error() {
        let bg = tokamak();
        // A heavy marker near the axis of symmetry with a Larmor radius of
        // about half a metre, gyrating so that its displacement points to -R.
        let species = Species { mass: CONST_M_E * 1.0e10, charge: CONST_E, anum: 0, znum: 0 };
        let input = InputMarker::GuidingCenter(GuidingCenterInput {
            id: 7,
            r: 0.05,
            phi: 0.0,
            z: 0.0,
            energy: 1.0e6 * CONST_E,
            pitch: 0.0,
            zeta: std::f64::consts::FRAC_PI_2,
            species,
            weight: 1.0,
            time: 0.0,
        });
        let state = input.into_state(&bg);
        assert_eq!(state.id, 7);
        assert!(!state.running);
        assert_eq!(state.err, Some(MarkerError::NonPositiveRadius));
    }

    #[test]
    fn test_superluminal_particle_is_flagged() {
        let bg = tokamak();
        let state = InputMarker::Particle(ParticleInput {
            id: 2,
            r: 7.0,
            phi: 0.0,
            z: 0.0,
            v: Vec3::new(0.0, CONST_C, 0.0),
            species: alpha(),
            weight: 1.0,
            time: 0.0,
        })
        .into_state(&bg);
        assert_eq!(state.err, Some(MarkerError::Superluminal));
        assert!(!state.running);
    }

    #[test]
    fn test_field_line_initializes_flux_coordinates() {
        let bg = tokamak();
        let state = InputMarker::FieldLine(FieldLineInput { id: 3, r: 7.2, phi: 0.0, z: 0.0, pitch: -0.3, weight: 1.0, time: 0.0 })
            .into_state(&bg);
        assert!(state.running);
        assert!((state.rho - 0.5).abs() < 1e-12);
        assert_eq!(state.kinetics, Kinetics::FieldLine { pitch: -1.0 });
        assert_eq!(state.theta, 0.0);
    }
}
