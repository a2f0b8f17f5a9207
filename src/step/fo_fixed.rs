//! Fixed-step full-orbit integration: relativistic Boris push followed by an
//! optional collision sub-step.

use super::{collisions, Integrator};
use crate::background::Background;
use crate::diag::PointSource;
use crate::error::MarkerError;
use crate::lane::{Active, Lane, LaneSnapshot};
use crate::marker::{Kinetics, MarkerState};
use crate::physlib::{gyrofreq_vnorm, CONST_C};
use marker_common::{cart_point_to_cyl, cyl_point_to_cart, RecordMode, SimParams, Vec3};
use rand::rngs::StdRng;
use std::f64::consts::TAU;

#[derive(Debug, Clone)]
pub struct FixedStepOrbit {
    pub fixed_dt: Option<f64>,
    /// Steps per gyro-period when no fixed step is given.
    pub gyro_steps: u32,
    pub orbit_following: bool,
    pub collisions: bool,
    pub record_mode: RecordMode,
}

impl FixedStepOrbit {
    pub fn from_params(params: &SimParams) -> Self {
        FixedStepOrbit {
            fixed_dt: params.fixed_dt,
            gyro_steps: params.gyro_steps,
            orbit_following: params.enable_orbit_following,
            collisions: params.enable_coulomb_collisions,
            record_mode: params.record_mode,
        }
    }

    fn advance(&self, marker: &mut MarkerState, b: &mut Vec3, h: f64, bg: &Background, rng: &mut StdRng) -> Result<(), MarkerError> {
        if self.orbit_following {
            boris_step(marker, *b, h, bg)?;
        }
        if self.collisions {
            collisions::apply(marker, h, bg.plasma.as_ref(), rng)?;
        }
        marker.time += h;
        marker.refresh_flux_coordinates(bg)?;
        *b = bg.bfield.eval_b(marker.r, marker.phi, marker.z, marker.time)?;
        Ok(())
    }
}

impl Integrator for FixedStepOrbit {
    fn initial_step(&self, active: &Active) -> f64 {
        if let Some(dt) = self.fixed_dt {
            return dt;
        }
        let m = &active.marker;
        let v = m.velocity().map_or(0.0, |v| v.norm());
        let omega = gyrofreq_vnorm(m.species.mass, m.species.charge, v, active.b.norm());
        TAU / omega / self.gyro_steps as f64
    }

    fn step<const N: usize>(&self, lane: &mut Lane<N>, _pre: &LaneSnapshot<N>, bg: &Background, rng: &mut StdRng) {
        for (_, active) in lane.running_mut() {
            let h = active.h;
            if let Err(err) = self.advance(&mut active.marker, &mut active.b, h, bg, rng) {
                active.marker.fail(err);
            }
        }
    }

    fn point_source(&self) -> PointSource {
        match self.record_mode {
            RecordMode::Particle => PointSource::Particle,
            RecordMode::GuidingCenter => PointSource::GuidingCenter,
        }
    }
}

/// Relativistic Boris push of one marker over `h` seconds, using the magnetic
/// field `b` (cylindrical) at its current position.
pub fn boris_step(marker: &mut MarkerState, b: Vec3, h: f64, bg: &Background) -> Result<(), MarkerError> {
    let Kinetics::Particle { v } = marker.kinetics else {
        return Err(MarkerError::WrongRepresentation);
    };
    let phi = marker.phi;
    let e = bg.efield.eval_e(marker.r, phi, marker.z, marker.time)?;

    let pos = cyl_point_to_cart(marker.r, phi, marker.z);
    let v_cart = v.cyl_to_cart(phi);
    let b_cart = b.cyl_to_cart(phi);
    let e_cart = e.cyl_to_cart(phi);

    let half = marker.species.charge * h / (2.0 * marker.species.mass);
    let gamma = 1.0 / (1.0 - v_cart.norm_squared() / (CONST_C * CONST_C)).sqrt();
    let u_minus = v_cart.scale(gamma) + e_cart.scale(half);
    let gamma_minus = (1.0 + u_minus.norm_squared() / (CONST_C * CONST_C)).sqrt();

    let t = b_cart.scale(half / gamma_minus);
    let s = t.scale(2.0 / (1.0 + t.norm_squared()));
    let u_prime = u_minus + u_minus.cross(t);
    let u_plus = u_minus + u_prime.cross(s);
    let u_new = u_plus + e_cart.scale(half);

    let gamma_new = (1.0 + u_new.norm_squared() / (CONST_C * CONST_C)).sqrt();
    let v_new = u_new.scale(1.0 / gamma_new);
    let pos_new = pos + v_new.scale(h);
    if !pos_new.is_finite() || !v_new.is_finite() {
        return Err(MarkerError::NonFinite);
    }

    let (r, phi_new, z) = cart_point_to_cyl(pos_new, phi);
    marker.r = r;
    marker.phi = phi_new;
    marker.z = z;
    marker.kinetics = Kinetics::Particle { v: v_new.cart_to_cyl(phi_new) };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::testing::tokamak;
    use crate::marker::{InputMarker, ParticleInput, Species};
    use rand::SeedableRng;

    fn params(fixed_dt: Option<f64>) -> FixedStepOrbit {
        FixedStepOrbit {
            fixed_dt,
            gyro_steps: 20,
            orbit_following: true,
            collisions: false,
            record_mode: RecordMode::Particle,
        }
    }

    fn proton(bg: &Background) -> Active {
        let marker = InputMarker::Particle(ParticleInput {
            id: 1,
            r: 7.0,
            phi: 0.0,
            z: 0.0,
            v: Vec3::new(1.0e6, 5.0e5, 2.0e5),
            species: Species::from_amu_e(1.007276, 1.0, 1, 1),
            weight: 1.0,
            time: 0.0,
        })
        .into_state(bg);
        let b = bg.bfield.eval_b(marker.r, marker.phi, marker.z, 0.0).expect("inside field");
        Active { index: 0, marker, b, h: 0.0 }
    }

    #[test]
    fn test_gyro_fraction_step() {
        let bg = tokamak();
        let active = proton(&bg);
        let integrator = params(None);
        let v = active.marker.velocity().map_or(0.0, |v| v.norm());
        let m = active.marker.species;
        let expected = TAU / gyrofreq_vnorm(m.mass, m.charge, v, active.b.norm()) / 20.0;
        assert!((integrator.initial_step(&active) - expected).abs() < 1e-20);
        assert_eq!(params(Some(1.0e-9)).initial_step(&active), 1.0e-9);
    }

    #[test]
    fn test_boris_conserves_speed_without_electric_field() {
        let bg = tokamak();
        let mut active = proton(&bg);
        let integrator = params(None);
        active.h = integrator.initial_step(&active);
        let v0 = active.marker.velocity().map_or(0.0, |v| v.norm());

        let mut lane: Lane<1> = Lane::new();
        let mut backlog = vec![active.marker.clone()];
        let mut queue = crate::lane::MarkerQueue::new(&mut backlog);
        lane.cycle(&mut queue, &bg);
        if let Some(a) = lane.live_slot_mut(0) {
            a.h = active.h;
        }
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            let pre = lane.snapshot();
            integrator.step(&mut lane, &pre, &bg, &mut rng);
        }
        let after = lane.live(0).expect("still in lane");
        assert!(after.marker.err.is_none());
        let v1 = after.marker.velocity().map_or(0.0, |v| v.norm());
        assert!((v1 - v0).abs() / v0 < 1e-10);
        assert!((after.marker.time - 200.0 * active.h).abs() < 1e-18);
        // Ten gyrations keep the marker within a few Larmor radii of its start.
        assert!((after.marker.r - 7.0).abs() < 0.05);
    }

    #[test]
    fn test_field_line_marker_is_rejected() {
        let bg = tokamak();
        let mut marker = InputMarker::FieldLine(crate::marker::FieldLineInput {
            id: 1,
            r: 7.0,
            phi: 0.0,
            z: 0.0,
            pitch: 1.0,
            weight: 1.0,
            time: 0.0,
        })
        .into_state(&bg);
        let b = Vec3::new(0.0, 5.0, 0.0);
        assert_eq!(boris_step(&mut marker, b, 1.0e-9, &bg), Err(MarkerError::WrongRepresentation));
    }
}
