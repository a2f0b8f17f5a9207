//! Coulomb collisions with the background plasma, integrated with
//! Euler-Maruyama in velocity space.

use crate::background::Plasma;
use crate::error::MarkerError;
use crate::marker::{Kinetics, MarkerState, Species};
use crate::physlib::{erf, erf_prime, CONST_E, CONST_EPS0};
use marker_common::perpendicular_basis;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;
use std::f64::consts::PI;

/// Drift and diffusion of a test particle summed over the plasma species.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CollisionCoefficients {
    /// Friction along v (m/s^2), negative for slowing down.
    pub k: f64,
    /// Parallel and perpendicular velocity diffusion (m^2/s^3).
    pub d_par: f64,
    pub d_perp: f64,
}

/// NRL Coulomb logarithm with density in m^-3 and temperature in eV, clamped to [5, 30].
pub fn coulomb_logarithm(density: f64, temperature_ev: f64) -> f64 {
    let n_cm3 = density * 1.0e-6;
    (24.0 - (n_cm3.sqrt() / temperature_ev).ln()).clamp(5.0, 30.0)
}

/// Chandrasekhar function G(x) = (erf(x) - x erf'(x)) / (2 x^2).
pub fn chandrasekhar(x: f64) -> f64 {
    if x < 0.1 {
        // Series; the closed form cancels catastrophically here.
        return (2.0 * x / 3.0 - 2.0 * x.powi(3) / 5.0 + x.powi(5) / 7.0) / PI.sqrt();
    }
    (erf(x) - x * erf_prime(x)) / (2.0 * x * x)
}

pub fn coefficients(species: Species, speed: f64, rho: f64, plasma: &dyn Plasma) -> CollisionCoefficients {
    let mut coefs = CollisionCoefficients::default();
    for (index, field) in plasma.species().iter().enumerate() {
        let (density, temperature_ev) = plasma.eval_dens_temp(index, rho);
        if !(density > 0.0 && temperature_ev > 0.0) {
            continue;
        }
        let vth = (2.0 * temperature_ev * CONST_E / field.mass).sqrt();
        let x = speed / vth;
        let g = chandrasekhar(x);

        let clog = coulomb_logarithm(density, temperature_ev);
        let cab = (species.charge * field.charge).powi(2) * density * clog
            / (4.0 * PI * CONST_EPS0 * CONST_EPS0 * species.mass * species.mass);

        coefs.k -= cab * (1.0 + species.mass / field.mass) * g / (vth * vth);
        coefs.d_par += cab * g / speed;
        coefs.d_perp += cab * (erf(x) - g) / (2.0 * speed);
    }
    coefs
}

/// Applies one collision sub-step of length `h` to a particle marker.
pub fn apply(marker: &mut MarkerState, h: f64, plasma: &dyn Plasma, rng: &mut StdRng) -> Result<(), MarkerError> {
    let Kinetics::Particle { v } = marker.kinetics else {
        return Err(MarkerError::WrongRepresentation);
    };
    let speed = v.norm();
    if !(speed > 0.0) {
        return Ok(());
    }

    let c = coefficients(marker.species, speed, marker.rho, plasma);
    let vhat = v.scale(1.0 / speed);
    let (e1, e2) = perpendicular_basis(vhat);

    let xi_par: f64 = rng.sample(StandardNormal);
    let xi_1: f64 = rng.sample(StandardNormal);
    let xi_2: f64 = rng.sample(StandardNormal);

    let dv = vhat.scale(c.k * h + (2.0 * c.d_par * h).sqrt() * xi_par)
        + (e1.scale(xi_1) + e2.scale(xi_2)).scale((2.0 * c.d_perp * h).sqrt());
    let v_new = v + dv;
    if !v_new.is_finite() {
        return Err(MarkerError::NonFinite);
    }
    marker.kinetics = Kinetics::Particle { v: v_new };
    Ok(())
}
