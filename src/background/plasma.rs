use super::Plasma;
use crate::physlib::{CONST_E, CONST_M_E, CONST_U};
use marker_common::PlasmaConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct PlasmaSpecies {
    pub name: String,
    /// Mass (kg) and charge (C).
    pub mass: f64,
    pub charge: f64,
    pub density0: f64,
    pub density_edge: f64,
    pub temperature0_ev: f64,
    pub temperature_edge_ev: f64,
}

impl PlasmaSpecies {
    pub fn electrons(density0: f64, temperature0_ev: f64) -> Self {
        PlasmaSpecies {
            name: "electron".to_string(),
            mass: CONST_M_E,
            charge: -CONST_E,
            density0,
            density_edge: 0.0,
            temperature0_ev,
            temperature_edge_ev: 0.0,
        }
    }
}

/// Profiles of the form x(rho) = x_edge + (x0 - x_edge)(1 - rho^2) inside the
/// separatrix, flat at the edge value outside.
#[derive(Debug, Clone)]
pub struct ParabolicPlasma {
    species: Vec<PlasmaSpecies>,
}

impl ParabolicPlasma {
    pub fn new(species: Vec<PlasmaSpecies>) -> Self {
        ParabolicPlasma { species }
    }

    pub fn from_config(config: &PlasmaConfig) -> Self {
        let species = config
            .species
            .iter()
            .map(|s| PlasmaSpecies {
                name: s.name.clone(),
                mass: s.mass_amu * CONST_U,
                charge: s.charge_e * CONST_E,
                density0: s.density0,
                density_edge: s.density_edge,
                temperature0_ev: s.temperature0_ev,
                temperature_edge_ev: s.temperature_edge_ev,
            })
            .collect();
        ParabolicPlasma { species }
    }
}

impl Plasma for ParabolicPlasma {
    fn species(&self) -> &[PlasmaSpecies] {
        &self.species
    }

    fn eval_dens_temp(&self, index: usize, rho: f64) -> (f64, f64) {
        let Some(s) = self.species.get(index) else {
            return (0.0, 0.0);
        };
        let shape = if rho < 1.0 { 1.0 - rho * rho } else { 0.0 };
        (
            s.density_edge + (s.density0 - s.density_edge) * shape,
            s.temperature_edge_ev + (s.temperature0_ev - s.temperature_edge_ev) * shape,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_peak_on_axis_and_flatten_outside() {
        let mut e = PlasmaSpecies::electrons(1.0e20, 1.0e4);
        e.density_edge = 1.0e18;
        let plasma = ParabolicPlasma::new(vec![e]);
        assert_eq!(plasma.eval_dens_temp(0, 0.0), (1.0e20, 1.0e4));
        let (n_half, _) = plasma.eval_dens_temp(0, 0.5);
        assert!((n_half - (1.0e18 + 0.75 * (1.0e20 - 1.0e18))).abs() < 1.0);
        assert_eq!(plasma.eval_dens_temp(0, 1.3), (1.0e18, 0.0));
        assert_eq!(plasma.eval_dens_temp(5, 0.0), (0.0, 0.0));
    }
}
