use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Neg, Sub};

/// A simple 3D vector struct.
///
/// Depending on context the components are Cartesian (x, y, z) or cylindrical
/// (R, phi, z) components of a vector attached to a point with toroidal angle `phi`.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    /// Creates a new Vec3.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Vec3 { x, y, z }
    }

    /// Creates a zero vector.
    pub const fn zero() -> Self {
        Vec3 { x: 0.0, y: 0.0, z: 0.0 }
    }

    pub fn norm_squared(&self) -> f64 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    pub fn norm(&self) -> f64 {
        self.norm_squared().sqrt()
    }

    /// Returns a normalized version of the vector.
    /// Returns a zero vector if the original vector's length is zero.
    pub fn normalize_or_zero(&self) -> Self {
        let len_sq = self.norm_squared();
        if len_sq > 0.0 {
            self.scale(1.0 / len_sq.sqrt())
        } else {
            Vec3::zero()
        }
    }

    pub fn dot(&self, other: Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: Vec3) -> Vec3 {
        Vec3 {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    pub fn scale(&self, factor: f64) -> Self {
        Vec3 { x: self.x * factor, y: self.y * factor, z: self.z * factor }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Rotates cylindrical components (R, phi, z) at toroidal angle `phi` into Cartesian components.
    pub fn cyl_to_cart(&self, phi: f64) -> Vec3 {
        let (s, c) = phi.sin_cos();
        Vec3 { x: self.x * c - self.y * s, y: self.x * s + self.y * c, z: self.z }
    }

    /// Rotates Cartesian components into cylindrical components at toroidal angle `phi`.
    pub fn cart_to_cyl(&self, phi: f64) -> Vec3 {
        let (s, c) = phi.sin_cos();
        Vec3 { x: self.x * c + self.y * s, y: -self.x * s + self.y * c, z: self.z }
    }
}

impl Add for Vec3 {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Vec3 { x: self.x + other.x, y: self.y + other.y, z: self.z + other.z }
    }
}

impl Sub for Vec3 {
    type Output = Self;
    fn sub(self, other: Self) -> Self {
        Vec3 { x: self.x - other.x, y: self.y - other.y, z: self.z - other.z }
    }
}

impl Mul<f64> for Vec3 {
    type Output = Self;
    fn mul(self, scalar: f64) -> Self {
        self.scale(scalar)
    }
}

impl Neg for Vec3 {
    type Output = Self;
    fn neg(self) -> Self {
        Vec3 { x: -self.x, y: -self.y, z: -self.z }
    }
}

/// Cartesian position of the point (r, phi, z).
pub fn cyl_point_to_cart(r: f64, phi: f64, z: f64) -> Vec3 {
    let (s, c) = phi.sin_cos();
    Vec3::new(r * c, r * s, z)
}

/// Cylindrical coordinates of a Cartesian point, with `phi` unwrapped to stay
/// continuous with `phi_ref` so cumulative toroidal angles are preserved.
pub fn cart_point_to_cyl(p: Vec3, phi_ref: f64) -> (f64, f64, f64) {
    let r = (p.x * p.x + p.y * p.y).sqrt();
    let phi = unwrap_angle(p.y.atan2(p.x), phi_ref);
    (r, phi, p.z)
}

/// Shifts `angle` by a multiple of 2 pi so that it lies within pi of `reference`.
pub fn unwrap_angle(angle: f64, reference: f64) -> f64 {
    use std::f64::consts::{PI, TAU};
    let mut delta = (angle - reference).rem_euclid(TAU);
    if delta > PI {
        delta -= TAU;
    }
    reference + delta
}

/// Returns an orthonormal pair perpendicular to the unit vector `b`.
pub fn perpendicular_basis(b: Vec3) -> (Vec3, Vec3) {
    let helper = if b.z.abs() < 0.9 { Vec3::new(0.0, 0.0, 1.0) } else { Vec3::new(1.0, 0.0, 0.0) };
    let e1 = b.cross(helper).normalize_or_zero();
    let e2 = b.cross(e1);
    (e1, e2)
}
