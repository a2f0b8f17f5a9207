use super::DiagPoint;
use marker_common::{OrbitConfig, OrbitMode};
use std::f64::consts::TAU;

/// Values per record: id, time, r, phi, z, three representation-specific
/// fields, rho, weight and the record's 1-based sequence number within its
/// marker. Poincare records append the plane id.
pub const ORBIT_FIELDS: usize = 11;

/// Column of the sequence number; zero marks an unused record.
pub const ORBIT_SEQ_COLUMN: usize = 10;

/// Keeps the latest `npoint` records of every marker, recorded either at a
/// fixed time interval or when a toroidal or poloidal plane is crossed.
///
/// Each marker owns a block of `npoint` records at its partition index.
/// Unused records are all zeros, including their sequence number.
#[derive(Debug, Clone)]
pub struct OrbitRecorder {
    mode: OrbitMode,
    npoint: usize,
    interval: f64,
    toroidal_planes: Vec<f64>,
    poloidal_planes: Vec<f64>,
    written: Vec<usize>,
    last_time: Vec<f64>,
}

impl OrbitRecorder {
    pub fn new(cfg: &OrbitConfig, n_markers: usize) -> Self {
        OrbitRecorder {
            mode: cfg.mode,
            npoint: cfg.npoint,
            interval: cfg.interval,
            toroidal_planes: cfg.toroidal_angles_deg.iter().map(|a| a.to_radians()).collect(),
            poloidal_planes: cfg.poloidal_angles_deg.iter().map(|a| a.to_radians()).collect(),
            written: vec![0; n_markers],
            last_time: vec![f64::NEG_INFINITY; n_markers],
        }
    }

    pub fn record_width(&self) -> usize {
        match self.mode {
            OrbitMode::Interval => ORBIT_FIELDS,
            OrbitMode::Poincare => ORBIT_FIELDS + 1,
        }
    }

    pub fn npoint(&self) -> usize {
        self.npoint
    }

    /// Values occupied by one marker.
    pub fn block_len(&self) -> usize {
        self.npoint * self.record_width()
    }

    pub fn region_len(&self) -> usize {
        self.written.len() * self.block_len()
    }

    pub fn update(&mut self, buf: &mut [f64], index: usize, pre: &DiagPoint, post: &DiagPoint) {
        match self.mode {
            OrbitMode::Interval => {
                if post.time - self.last_time[index] >= self.interval {
                    self.last_time[index] = post.time;
                    self.write(buf, index, post, None);
                }
            }
            OrbitMode::Poincare => {
                let n_tor = self.toroidal_planes.len();
                for k in 0..n_tor {
                    if let Some(f) = crossing(pre.phi, post.phi, self.toroidal_planes[k]) {
                        self.write(buf, index, &pre.lerp(post, f), Some(k));
                    }
                }
                for k in 0..self.poloidal_planes.len() {
                    if let Some(f) = crossing(pre.theta, post.theta, self.poloidal_planes[k]) {
                        self.write(buf, index, &pre.lerp(post, f), Some(n_tor + k));
                    }
                }
            }
        }
    }

    fn write(&mut self, buf: &mut [f64], index: usize, p: &DiagPoint, plane: Option<usize>) {
        let width = self.record_width();
        let slot = self.written[index] % self.npoint;
        self.written[index] += 1;
        let seq = self.written[index];

        let start = index * self.block_len() + slot * width;
        let record = &mut buf[start..start + width];
        record[..ORBIT_FIELDS].copy_from_slice(&[
            p.id as f64,
            p.time,
            p.r,
            p.phi,
            p.z,
            p.fields[0],
            p.fields[1],
            p.fields[2],
            p.rho,
            p.weight,
            seq as f64,
        ]);
        if let Some(plane) = plane {
            record[ORBIT_FIELDS] = plane as f64;
        }
    }
}

/// Fraction of the step at which an angle moving from `a0` to `a1` crosses
/// `plane` (mod 2 pi), if it does.
fn crossing(a0: f64, a1: f64, plane: f64) -> Option<f64> {
    let k0 = ((a0 - plane) / TAU).floor();
    let k1 = ((a1 - plane) / TAU).floor();
    if k0 == k1 {
        return None;
    }
    let boundary = plane + TAU * k0.max(k1);
    Some((boundary - a0) / (a1 - a0))
}
