//! Diagnostics accumulated from marker trajectories.
//!
//! All enabled diagnostics share one [`DiagArena`] sized before any marker
//! runs. Partitions each own a `Diagnostics` built from the same
//! configuration; the driver merges them at the join point.

pub mod arena;
pub mod dist;
pub mod orbit;
pub mod transcoef;

use crate::background::Background;
use crate::marker::{particle_to_gc, Kinetics, MarkerState};
use crate::physlib::CONST_E;
use anyhow::Result;
use log::debug;
use marker_common::{DiagnosticsConfig, DiagnosticsSnapshot, RegionInfo, Vec3};
use std::f64::consts::TAU;

pub use arena::{DiagArena, DiagKind, Region};
pub use dist::{Axis, Histogram};
pub use orbit::{OrbitRecorder, ORBIT_FIELDS, ORBIT_SEQ_COLUMN};
pub use transcoef::{TransportCoefficients, TRANSCOEF_FIELDS};

/// Representation the diagnostics see a marker in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointSource {
    Particle,
    /// Particles converted to their guiding center before recording.
    GuidingCenter,
    FieldLine,
}

/// One marker position in the coordinates every diagnostic reads.
///
/// `fields` holds the representation-specific orbit columns: (v_R, v_phi,
/// v_z) for particles, (v_par, mu, zeta) for guiding centers and (pitch, 0, 0)
/// for field lines.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DiagPoint {
    pub id: i64,
    pub r: f64,
    pub phi: f64,
    pub z: f64,
    pub vr: f64,
    pub vphi: f64,
    pub vz: f64,
    pub vpar: f64,
    pub vperp: f64,
    pub rho: f64,
    pub theta: f64,
    pub time: f64,
    pub charge_e: f64,
    pub weight: f64,
    pub fields: [f64; 3],
}

impl DiagPoint {
    pub fn from_marker(source: PointSource, m: &MarkerState, b: Vec3, bg: &Background) -> Option<Self> {
        match source {
            PointSource::Particle => Self::from_particle(m, b),
            PointSource::GuidingCenter => Self::from_guiding_center(m, bg),
            PointSource::FieldLine => Some(Self::from_field_line(m)),
        }
    }

    pub fn from_particle(m: &MarkerState, b: Vec3) -> Option<Self> {
        let v = m.velocity()?;
        let bhat = b.normalize_or_zero();
        let vpar = v.dot(bhat);
        let vperp = (v - bhat.scale(vpar)).norm();
        Some(DiagPoint {
            vr: v.x,
            vphi: v.y,
            vz: v.z,
            vpar,
            vperp,
            fields: [v.x, v.y, v.z],
            ..Self::base(m)
        })
    }

    pub fn from_guiding_center(m: &MarkerState, bg: &Background) -> Option<Self> {
        let v = m.velocity()?;
        let gc = particle_to_gc(m, bg).ok()?;
        let vperp = (2.0 * gc.mu * bg.bfield.eval_b(m.r, m.phi, m.z, m.time).ok()?.norm() / m.species.mass).sqrt();
        Some(DiagPoint {
            r: gc.r,
            phi: gc.phi,
            z: gc.z,
            vr: v.x,
            vphi: v.y,
            vz: v.z,
            vpar: gc.vpar,
            vperp,
            fields: [gc.vpar, gc.mu, gc.zeta],
            ..Self::base(m)
        })
    }

    pub fn from_field_line(m: &MarkerState) -> Self {
        let pitch = match m.kinetics {
            Kinetics::FieldLine { pitch } => pitch,
            Kinetics::Particle { .. } => 0.0,
        };
        DiagPoint { fields: [pitch, 0.0, 0.0], ..Self::base(m) }
    }

    fn base(m: &MarkerState) -> Self {
        DiagPoint {
            id: m.id,
            r: m.r,
            phi: m.phi,
            z: m.z,
            rho: m.rho,
            theta: m.theta,
            time: m.time,
            charge_e: m.species.charge / CONST_E,
            weight: m.weight,
            ..DiagPoint::default()
        }
    }

    /// Linear interpolation at fraction `f` of the way to `other`.
    pub fn lerp(&self, other: &DiagPoint, f: f64) -> DiagPoint {
        let mix = |a: f64, b: f64| a + f * (b - a);
        DiagPoint {
            id: self.id,
            r: mix(self.r, other.r),
            phi: mix(self.phi, other.phi),
            z: mix(self.z, other.z),
            vr: mix(self.vr, other.vr),
            vphi: mix(self.vphi, other.vphi),
            vz: mix(self.vz, other.vz),
            vpar: mix(self.vpar, other.vpar),
            vperp: mix(self.vperp, other.vperp),
            rho: mix(self.rho, other.rho),
            theta: mix(self.theta, other.theta),
            time: mix(self.time, other.time),
            charge_e: other.charge_e,
            weight: other.weight,
            fields: std::array::from_fn(|i| mix(self.fields[i], other.fields[i])),
        }
    }
}

pub struct Diagnostics {
    arena: DiagArena,
    dist5d: Option<Histogram>,
    dist6d: Option<Histogram>,
    orbit: Option<OrbitRecorder>,
    transcoef: Option<TransportCoefficients>,
    n_markers: usize,
}

impl Diagnostics {
    /// Sizes and allocates every enabled diagnostic for `n_markers` markers.
    /// Fails before any marker runs if the buffer cannot be allocated.
    pub fn new(cfg: &DiagnosticsConfig, n_markers: usize) -> Result<Self> {
        let dist5d = cfg.dist5d.as_ref().map(Histogram::dist5d);
        let dist6d = cfg.dist6d.as_ref().map(Histogram::dist6d);
        let orbit = cfg.orbit.as_ref().map(|o| OrbitRecorder::new(o, n_markers));
        let transcoef = cfg.transport.as_ref().map(|t| TransportCoefficients::new(t, n_markers));

        let mut layout = Vec::new();
        if let Some(h) = &dist5d {
            layout.push((DiagKind::Dist5D, h.len()));
        }
        if let Some(h) = &dist6d {
            layout.push((DiagKind::Dist6D, h.len()));
        }
        if let Some(o) = &orbit {
            layout.push((DiagKind::Orbit, o.region_len()));
        }
        if let Some(t) = &transcoef {
            layout.push((DiagKind::TransportCoef, t.region_len()));
        }
        let arena = DiagArena::allocate(&layout)?;
        debug!("Allocated {} diagnostic values for {} markers.", arena.data().len(), n_markers);

        Ok(Diagnostics { arena, dist5d, dist6d, orbit, transcoef, n_markers })
    }

    pub fn n_markers(&self) -> usize {
        self.n_markers
    }

    pub fn arena(&self) -> &DiagArena {
        &self.arena
    }

    pub fn histogram(&self, kind: DiagKind) -> Option<(&Histogram, &[f64])> {
        let hist = match kind {
            DiagKind::Dist5D => self.dist5d.as_ref()?,
            DiagKind::Dist6D => self.dist6d.as_ref()?,
            _ => return None,
        };
        Some((hist, self.arena.region(kind)?))
    }

    /// Adds one step of marker `index` (partition-local) to every enabled
    /// diagnostic. Field lines carry no velocity and skip the histograms.
    pub fn update(&mut self, index: usize, pre: &DiagPoint, post: &DiagPoint, finished: bool, source: PointSource) {
        if source != PointSource::FieldLine {
            let phi = post.phi.rem_euclid(TAU);
            if let (Some(h), Some(buf)) = (&self.dist5d, self.arena.region_mut(DiagKind::Dist5D)) {
                let coords = [post.r, phi, post.z, post.vpar, post.vperp, post.time, post.charge_e];
                h.add(buf, &coords, post.weight);
            }
            if let (Some(h), Some(buf)) = (&self.dist6d, self.arena.region_mut(DiagKind::Dist6D)) {
                let coords = [post.r, phi, post.z, post.vr, post.vphi, post.vz, post.time, post.charge_e];
                h.add(buf, &coords, post.weight);
            }
        }
        if let (Some(o), Some(buf)) = (&mut self.orbit, self.arena.region_mut(DiagKind::Orbit)) {
            o.update(buf, index, pre, post);
        }
        if let (Some(t), Some(buf)) = (&mut self.transcoef, self.arena.region_mut(DiagKind::TransportCoef)) {
            t.update(buf, index, pre, post, finished);
        }
    }

    /// Adds the histograms of `other` element-wise and copies its per-marker
    /// blocks to markers `marker_offset..marker_offset + other.n_markers()`.
    ///
    /// Both sides must be built from the same configuration.
    pub fn merge(&mut self, other: &Diagnostics, marker_offset: usize) {
        debug_assert!(marker_offset + other.n_markers <= self.n_markers);
        for region in other.arena.regions() {
            let src = &other.arena.data()[region.offset..region.offset + region.len];
            let Some(dst) = self.arena.region_mut(region.kind) else {
                continue;
            };
            match region.kind {
                DiagKind::Dist5D | DiagKind::Dist6D => {
                    debug_assert_eq!(dst.len(), src.len());
                    for (d, s) in dst.iter_mut().zip(src) {
                        *d += s;
                    }
                }
                DiagKind::Orbit | DiagKind::TransportCoef => {
                    let per_marker = if other.n_markers == 0 { 0 } else { src.len() / other.n_markers };
                    let start = marker_offset * per_marker;
                    dst[start..start + src.len()].copy_from_slice(src);
                }
            }
        }
    }

    pub fn to_snapshot(&self) -> DiagnosticsSnapshot {
        let regions = self
            .arena
            .regions()
            .iter()
            .map(|region| {
                let (axes, record_width) = match region.kind {
                    DiagKind::Dist5D => (self.dist5d.as_ref().map(Histogram::axis_info).unwrap_or_default(), 0),
                    DiagKind::Dist6D => (self.dist6d.as_ref().map(Histogram::axis_info).unwrap_or_default(), 0),
                    DiagKind::Orbit => (Vec::new(), self.orbit.as_ref().map_or(0, OrbitRecorder::record_width)),
                    DiagKind::TransportCoef => (Vec::new(), TRANSCOEF_FIELDS),
                };
                RegionInfo {
                    name: region.kind.name().to_string(),
                    offset: region.offset,
                    len: region.len,
                    axes,
                    record_width,
                }
            })
            .collect();
        DiagnosticsSnapshot { regions, data: self.arena.data().to_vec() }
    }
}
