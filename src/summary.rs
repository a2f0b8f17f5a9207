//! End-of-run summary of where the markers went.

use crate::endcond::EndCond;
use crate::marker::MarkerState;
use crate::physlib::{ekin_vnorm, CONST_E};
use log::{info, warn};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndStateSummary {
    /// Marker count per end-condition combination label.
    pub by_endcond: BTreeMap<String, usize>,
    pub by_error: BTreeMap<String, usize>,
    pub still_running: usize,
    pub wall_markers: usize,
    pub wall_weight: f64,
    /// Weighted kinetic energy carried into the wall (J).
    pub wall_energy: f64,
}

impl EndStateSummary {
    pub fn from_markers(markers: &[MarkerState]) -> Self {
        let mut s = EndStateSummary::default();
        for m in markers {
            if let Some(err) = m.err {
                *s.by_error.entry(err.to_string()).or_default() += 1;
                continue;
            }
            if m.running {
                s.still_running += 1;
            }
            *s.by_endcond.entry(m.endcond.label()).or_default() += 1;
            if m.endcond.contains(EndCond::WALL) {
                s.wall_markers += 1;
                s.wall_weight += m.weight;
                if let Some(v) = m.velocity() {
                    s.wall_energy += m.weight * ekin_vnorm(m.species.mass, v.norm());
                }
            }
        }
        s
    }

    pub fn n_errors(&self) -> usize {
        self.by_error.values().sum()
    }

    pub fn log(&self) {
        info!("--- End-state summary ---");
        for (label, count) in &self.by_endcond {
            info!("{:>8} markers ended with {}", count, label);
        }
        for (message, count) in &self.by_error {
            warn!("{:>8} markers failed: {}", count, message);
        }
        if self.still_running > 0 {
            warn!("{} markers are still flagged as running.", self.still_running);
        }
        info!(
            "Wall: {} markers, weight {:.4e}, energy {:.4e} J ({:.4e} eV).",
            self.wall_markers,
            self.wall_weight,
            self.wall_energy,
            self.wall_energy / CONST_E
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::testing::tokamak;
    use crate::error::MarkerError;
    use crate::marker::{InputMarker, ParticleInput, Species};
    use marker_common::Vec3;

    fn marker(id: i64, weight: f64) -> MarkerState {
        InputMarker::Particle(ParticleInput {
            id,
            r: 7.0,
            phi: 0.0,
            z: 0.0,
            v: Vec3::new(1.0e6, 0.0, 0.0),
            species: Species::from_amu_e(1.007276, 1.0, 1, 1),
            weight,
            time: 0.0,
        })
        .into_state(&tokamak())
    }

    #[test]
    fn test_counts_combinations_and_wall_losses() {
        let mut markers: Vec<MarkerState> = (1..=5).map(|i| marker(i, i as f64)).collect();
        for m in &mut markers {
            m.running = false;
        }
        markers[0].endcond = EndCond::TMAX;
        markers[1].endcond = EndCond::TMAX;
        markers[2].endcond = EndCond::WALL | EndCond::TMAX;
        markers[3].endcond = EndCond::WALL;
        markers[4].fail(MarkerError::NonFinite);

        let s = EndStateSummary::from_markers(&markers);
        assert_eq!(s.by_endcond.get("TMAX"), Some(&2));
        assert_eq!(s.by_endcond.get("TMAX | WALL"), Some(&1));
        assert_eq!(s.by_endcond.get("WALL"), Some(&1));
        assert_eq!(s.n_errors(), 1);
        assert_eq!(s.wall_markers, 2);
        assert_eq!(s.wall_weight, 7.0);
        let e1 = ekin_vnorm(markers[0].species.mass, 1.0e6);
        assert!((s.wall_energy - 7.0 * e1).abs() / (7.0 * e1) < 1e-12);
        assert_eq!(s.still_running, 0);
    }
}
