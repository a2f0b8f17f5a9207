//! Physical constants and single-particle relations.

/// Speed of light (m/s).
pub const CONST_C: f64 = 299_792_458.0;
/// Elementary charge (C).
pub const CONST_E: f64 = 1.602_176_634e-19;
/// Atomic mass unit (kg).
pub const CONST_U: f64 = 1.660_539_066_60e-27;
/// Electron mass (kg).
pub const CONST_M_E: f64 = 9.109_383_701_5e-31;
/// Vacuum permittivity (F/m).
pub const CONST_EPS0: f64 = 8.854_187_812_8e-12;

/// Lorentz factor for speed `v`.
pub fn gamma_vnorm(v: f64) -> f64 {
    1.0 / (1.0 - v * v / (CONST_C * CONST_C)).sqrt()
}

/// Relativistic gyrofrequency (rad/s) of a particle with speed `v` in a field of magnitude `b`.
pub fn gyrofreq_vnorm(mass: f64, charge: f64, v: f64, b: f64) -> f64 {
    charge.abs() * b / (gamma_vnorm(v) * mass)
}

/// Kinetic energy (J) at speed `v`.
pub fn ekin_vnorm(mass: f64, v: f64) -> f64 {
    (gamma_vnorm(v) - 1.0) * mass * CONST_C * CONST_C
}

/// Speed corresponding to kinetic energy `ekin` (J).
pub fn vnorm_ekin(mass: f64, ekin: f64) -> f64 {
    let gamma = 1.0 + ekin / (mass * CONST_C * CONST_C);
    CONST_C * (1.0 - 1.0 / (gamma * gamma)).sqrt()
}

/// Error function, Abramowitz and Stegun 7.1.26 (absolute error below 1.5e-7).
pub fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    sign * y
}

/// Derivative of the error function.
pub fn erf_prime(x: f64) -> f64 {
    2.0 / std::f64::consts::PI.sqrt() * (-x * x).exp()
}
