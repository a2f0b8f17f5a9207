//! Fixed-width lane of marker slots kept populated from a backlog queue.

use crate::background::Background;
use crate::marker::MarkerState;
use log::trace;
use marker_common::Vec3;

/// Default lane width.
pub const NSIMD: usize = 16;

/// A marker being simulated in a lane slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Active {
    /// Position of the marker in the queue's result array.
    pub index: usize,
    pub marker: MarkerState,
    /// Magnetic field (cylindrical) at the marker position, refreshed by the integrators.
    pub b: Vec3,
    /// Current step: seconds for orbits, metres of arc length for field lines.
    pub h: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Dummy,
    Live(Active),
    /// Finished during the last step, waiting for `cycle` to write it back.
    PendingWriteback(Active),
}

/// Pre-step copies of the live slots.
pub type LaneSnapshot<const N: usize> = [Option<Active>; N];

/// Backlog and result array of one partition. Markers are started in order
/// and written back to the position they were taken from.
pub struct MarkerQueue<'a> {
    markers: &'a mut [MarkerState],
    next: usize,
    finished: usize,
}

impl<'a> MarkerQueue<'a> {
    pub fn new(markers: &'a mut [MarkerState]) -> Self {
        MarkerQueue { markers, next: 0, finished: 0 }
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Markers not yet handed to a lane.
    pub fn remaining(&self) -> usize {
        self.markers.len() - self.next
    }

    /// Markers written back so far.
    pub fn finished(&self) -> usize {
        self.finished
    }

    fn write_back(&mut self, active: Active) {
        self.markers[active.index] = active.marker;
        self.finished += 1;
    }
}

/// Result of one scheduler cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport<const N: usize> {
    pub n_running: usize,
    /// Slots that received a new marker in this cycle.
    pub activated: [bool; N],
}

impl<const N: usize> CycleReport<N> {
    pub fn n_activated(&self) -> usize {
        self.activated.iter().filter(|a| **a).count()
    }
}

#[derive(Debug, Clone)]
pub struct Lane<const N: usize> {
    slots: [Slot; N],
}

impl<const N: usize> Default for Lane<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Lane<N> {
    pub fn new() -> Self {
        Lane { slots: std::array::from_fn(|_| Slot::Dummy) }
    }

    pub fn slots(&self) -> &[Slot; N] {
        &self.slots
    }

    /// Live slots whose marker is still running.
    pub fn running_mut(&mut self) -> impl Iterator<Item = (usize, &mut Active)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, slot)| match slot {
            Slot::Live(a) if a.marker.running => Some((i, a)),
            _ => None,
        })
    }

    pub fn live_mut(&mut self) -> impl Iterator<Item = (usize, &mut Active)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, slot)| match slot {
            Slot::Live(a) => Some((i, a)),
            _ => None,
        })
    }

    pub fn live(&self, i: usize) -> Option<&Active> {
        match &self.slots[i] {
            Slot::Live(a) => Some(a),
            _ => None,
        }
    }

    pub fn live_slot_mut(&mut self, i: usize) -> Option<&mut Active> {
        match &mut self.slots[i] {
            Slot::Live(a) => Some(a),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> LaneSnapshot<N> {
        std::array::from_fn(|i| self.live(i).cloned())
    }

    pub fn n_running(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Live(a) if a.marker.running))
            .count()
    }

    /// Moves live slots whose marker stopped running to `PendingWriteback`.
    pub fn retire_finished(&mut self) {
        for slot in self.slots.iter_mut() {
            if matches!(slot, Slot::Live(a) if !a.marker.running) {
                if let Slot::Live(active) = std::mem::replace(slot, Slot::Dummy) {
                    *slot = Slot::PendingWriteback(active);
                }
            }
        }
    }

    /// Writes back finished markers and refills their slots from the queue.
    ///
    /// Markers that come out of the queue already stopped (they failed
    /// conversion) are written back immediately and the next one is tried, so
    /// a zero running count always means the backlog is exhausted.
    pub fn cycle(&mut self, queue: &mut MarkerQueue<'_>, bg: &Background) -> CycleReport<N> {
        self.retire_finished();
        let mut activated = [false; N];

        for (i, slot) in self.slots.iter_mut().enumerate() {
            if matches!(slot, Slot::Live(_)) {
                continue;
            }
            if let Slot::PendingWriteback(active) = std::mem::replace(slot, Slot::Dummy) {
                trace!("slot {}: writing back marker {}", i, active.marker.id);
                queue.write_back(active);
            }

            while queue.next < queue.markers.len() {
                let index = queue.next;
                queue.next += 1;
                let marker = queue.markers[index].clone();
                if !marker.running || marker.err.is_some() {
                    queue.finished += 1;
                    continue;
                }
                let active = activate(index, marker, bg);
                if active.marker.running {
                    *slot = Slot::Live(active);
                    activated[i] = true;
                    break;
                }
                queue.write_back(active);
            }
        }

        CycleReport { n_running: self.n_running(), activated }
    }
}

fn activate(index: usize, mut marker: MarkerState, bg: &Background) -> Active {
    let b = match bg.bfield.eval_b(marker.r, marker.phi, marker.z, marker.time) {
        Ok(b) => b,
        Err(err) => {
            marker.fail(err);
            Vec3::zero()
        }
    };
    Active { index, marker, b, h: 0.0 }
}
