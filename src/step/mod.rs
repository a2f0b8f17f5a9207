//! Integrators advancing every running slot of a lane by one step.

pub mod collisions;
pub mod fo_fixed;
pub mod ml_adaptive;

use crate::background::Background;
use crate::diag::{DiagPoint, Diagnostics, PointSource};
use crate::lane::{Active, Lane, LaneSnapshot};
use rand::rngs::StdRng;

pub use fo_fixed::FixedStepOrbit;
pub use ml_adaptive::AdaptiveFieldLine;

pub trait Integrator: Sync {
    /// Step size for a marker that was just placed in a lane slot.
    fn initial_step(&self, active: &Active) -> f64;

    /// Advances every running slot by its own step `h`, including marker
    /// time. Per-marker failures are recorded on the marker. `pre` holds the
    /// lane as it was before the call.
    fn step<const N: usize>(&self, lane: &mut Lane<N>, pre: &LaneSnapshot<N>, bg: &Background, rng: &mut StdRng);

    /// Representation the diagnostics record for this integrator.
    fn point_source(&self) -> PointSource;
}

/// Feeds the last step of every slot into the diagnostics.
///
/// A slot contributes only if it was running before the step, carries no
/// error afterwards, and actually moved (a rolled-back adaptive step does not
/// count unless it ended the marker).
pub fn accrue_diagnostics<const N: usize>(
    diag: &mut Diagnostics,
    lane: &Lane<N>,
    pre: &LaneSnapshot<N>,
    source: PointSource,
    bg: &Background,
) {
    for (i, before) in pre.iter().enumerate() {
        let (Some(before), Some(after)) = (before, lane.live(i)) else {
            continue;
        };
        if !before.marker.running || after.marker.err.is_some() {
            continue;
        }
        let finished = !after.marker.running;
        if after.marker.time == before.marker.time && !finished {
            continue;
        }
        let p0 = DiagPoint::from_marker(source, &before.marker, before.b, bg);
        let p1 = DiagPoint::from_marker(source, &after.marker, after.b, bg);
        if let (Some(p0), Some(p1)) = (p0, p1) {
            diag.update(after.index, &p0, &p1, finished, source);
        }
    }
}
