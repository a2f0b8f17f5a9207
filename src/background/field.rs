use super::{ElectricField, FieldEval, MagneticField};
use crate::error::MarkerError;
use marker_common::Vec3;

/// Circular large-aspect-ratio tokamak field.
///
/// B_phi = B0 R0 / R and the poloidal field follows from the flux
/// psi = B0 r_min^2 / (2 q), with r_min the distance to the axis. The field is
/// divergence free and has circular flux surfaces with rho = r_min / a.
#[derive(Debug, Clone)]
pub struct AnalyticTokamakField {
    r0: f64,
    z0: f64,
    b0: f64,
    q: f64,
    psi_sep: f64,
}

impl AnalyticTokamakField {
    pub fn new(r0: f64, z0: f64, b0: f64, safety_factor: f64, minor_radius: f64) -> Self {
        let psi_sep = b0 * minor_radius * minor_radius / (2.0 * safety_factor);
        AnalyticTokamakField { r0, z0, b0, q: safety_factor, psi_sep }
    }
}

impl MagneticField for AnalyticTokamakField {
    fn eval_b_db(&self, r: f64, _phi: f64, z: f64, _t: f64) -> Result<FieldEval, MarkerError> {
        if !(r > 0.0) || !z.is_finite() {
            return Err(MarkerError::OutsideDomain);
        }
        let (b0, r0, q) = (self.b0, self.r0, self.q);
        let dz = z - self.z0;

        let b = Vec3::new(-b0 * dz / (q * r), b0 * r0 / r, b0 * (r - r0) / (q * r));

        let r2 = r * r;
        let db = [
            [b0 * dz / (q * r2), 0.0, -b0 / (q * r)],
            [-b0 * r0 / r2, 0.0, 0.0],
            [b0 * r0 / (q * r2), 0.0, 0.0],
        ];
        Ok(FieldEval { b, db })
    }

    fn eval_psi(&self, r: f64, _phi: f64, z: f64, _t: f64) -> Result<f64, MarkerError> {
        if !(r > 0.0) || !z.is_finite() {
            return Err(MarkerError::OutsideDomain);
        }
        let rmin2 = (r - self.r0).powi(2) + (z - self.z0).powi(2);
        Ok(self.b0 * rmin2 / (2.0 * self.q))
    }

    fn eval_rho(&self, psi: f64) -> Result<f64, MarkerError> {
        let s = psi / self.psi_sep;
        if !(s >= 0.0) {
            return Err(MarkerError::OutsideDomain);
        }
        Ok(s.sqrt())
    }

    fn axis(&self) -> (f64, f64) {
        (self.r0, self.z0)
    }
}

/// Electric field pointing along the minor radius, growing linearly to `e_edge` at the separatrix.
#[derive(Debug, Clone)]
pub struct RadialElectricField {
    r0: f64,
    z0: f64,
    minor_radius: f64,
    e_edge: f64,
}

impl RadialElectricField {
    pub fn new(r0: f64, z0: f64, minor_radius: f64, e_edge: f64) -> Self {
        RadialElectricField { r0, z0, minor_radius, e_edge }
    }
}

impl ElectricField for RadialElectricField {
    fn eval_e(&self, r: f64, _phi: f64, z: f64, _t: f64) -> Result<Vec3, MarkerError> {
        if self.e_edge == 0.0 {
            return Ok(Vec3::zero());
        }
        // E = e_edge * r_min / a along the unit minor-radius vector.
        let scale = self.e_edge / self.minor_radius;
        Ok(Vec3::new(scale * (r - self.r0), 0.0, scale * (z - self.z0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field() -> AnalyticTokamakField {
        AnalyticTokamakField::new(6.2, 0.3, 5.3, 2.0, 2.0)
    }

    #[test]
    fn test_gradient_matches_finite_differences() {
        let f = field();
        let (r, z) = (7.1, -0.4);
        let eval = f.eval_b_db(r, 0.0, z, 0.0).expect("inside domain");
        let h = 1e-6;
        let plus_r = f.eval_b(r + h, 0.0, z, 0.0).expect("inside domain");
        let minus_r = f.eval_b(r - h, 0.0, z, 0.0).expect("inside domain");
        let plus_z = f.eval_b(r, 0.0, z + h, 0.0).expect("inside domain");
        let minus_z = f.eval_b(r, 0.0, z - h, 0.0).expect("inside domain");

        let d_dr = (plus_r - minus_r).scale(0.5 / h);
        let d_dz = (plus_z - minus_z).scale(0.5 / h);
        for (i, (fd_r, fd_z)) in [(d_dr.x, d_dz.x), (d_dr.y, d_dz.y), (d_dr.z, d_dz.z)].into_iter().enumerate() {
            assert!((eval.db[i][0] - fd_r).abs() < 1e-6, "dB{}/dR", i);
            assert!((eval.db[i][2] - fd_z).abs() < 1e-6, "dB{}/dz", i);
        }
    }

    #[test]
    fn test_field_is_divergence_free() {
        let f = field();
        let (r, z) = (5.5, 1.2);
        let eval = f.eval_b_db(r, 0.0, z, 0.0).expect("inside domain");
        // div B = (1/R) d(R B_R)/dR + (1/R) dB_phi/dphi + dB_z/dz
        let div = eval.b.x / r + eval.db[0][0] + eval.db[1][1] / r + eval.db[2][2];
        assert!(div.abs() < 1e-12);
    }

    #[test]
    fn test_rho_is_normalized_minor_radius() {
        let f = field();
        let rho = f.eval_rho_at(6.2 + 1.0, 0.0, 0.3, 0.0).expect("inside domain");
        assert!((rho - 0.5).abs() < 1e-12);
        assert!(f.eval_b_db(0.0, 0.0, 0.0, 0.0).is_err());
    }
}
