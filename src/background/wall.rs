use super::Wall;
use anyhow::Result;

/// Circular poloidal cross-section, toroidally symmetric.
#[derive(Debug, Clone)]
pub struct CircularWall {
    r0: f64,
    z0: f64,
    radius: f64,
}

impl CircularWall {
    pub fn new(r0: f64, z0: f64, radius: f64) -> Self {
        CircularWall { r0, z0, radius }
    }
}

impl Wall for CircularWall {
    fn point_inside(&self, r: f64, z: f64) -> bool {
        (r - self.r0).powi(2) + (z - self.z0).powi(2) < self.radius * self.radius
    }

    fn hit_tile(&self, r0: f64, z0: f64, r1: f64, z1: f64) -> Option<u32> {
        if self.point_inside(r0, z0) && !self.point_inside(r1, z1) {
            Some(1)
        } else {
            None
        }
    }
}

/// Closed polygon in the (R, z) plane. Edge `i` joins vertex `i` to vertex
/// `i + 1` and is reported as tile `i + 1`.
#[derive(Debug, Clone)]
pub struct PolygonWall {
    r: Vec<f64>,
    z: Vec<f64>,
}

impl PolygonWall {
    pub fn new(r: Vec<f64>, z: Vec<f64>) -> Result<Self> {
        if r.len() < 3 || r.len() != z.len() {
            anyhow::bail!("polygon wall needs at least 3 vertices with matching r and z.");
        }
        Ok(PolygonWall { r, z })
    }

    fn edge(&self, i: usize) -> ((f64, f64), (f64, f64)) {
        let j = (i + 1) % self.r.len();
        ((self.r[i], self.z[i]), (self.r[j], self.z[j]))
    }
}

impl Wall for PolygonWall {
    // Even-odd ray casting along +R.
    fn point_inside(&self, r: f64, z: f64) -> bool {
        let mut inside = false;
        for i in 0..self.r.len() {
            let ((ra, za), (rb, zb)) = self.edge(i);
            if (za > z) != (zb > z) {
                let r_cross = ra + (z - za) / (zb - za) * (rb - ra);
                if r < r_cross {
                    inside = !inside;
                }
            }
        }
        inside
    }

    fn hit_tile(&self, r0: f64, z0: f64, r1: f64, z1: f64) -> Option<u32> {
        let mut best: Option<(f64, u32)> = None;
        for i in 0..self.r.len() {
            let ((ra, za), (rb, zb)) = self.edge(i);
            if let Some(s) = segment_intersection((r0, z0), (r1, z1), (ra, za), (rb, zb)) {
                if best.map_or(true, |(s_best, _)| s < s_best) {
                    best = Some((s, i as u32 + 1));
                }
            }
        }
        best.map(|(_, tile)| tile)
    }
}

/// Parameter along p->q at which it crosses a->b, if the segments intersect.
fn segment_intersection(p: (f64, f64), q: (f64, f64), a: (f64, f64), b: (f64, f64)) -> Option<f64> {
    let d1 = (q.0 - p.0, q.1 - p.1);
    let d2 = (b.0 - a.0, b.1 - a.1);
    let denom = d1.0 * d2.1 - d1.1 * d2.0;
    if denom == 0.0 {
        return None;
    }
    let w = (a.0 - p.0, a.1 - p.1);
    let s = (w.0 * d2.1 - w.1 * d2.0) / denom;
    let u = (w.0 * d1.1 - w.1 * d1.0) / denom;
    if (0.0..=1.0).contains(&s) && (0.0..=1.0).contains(&u) {
        Some(s)
    } else {
        None
    }
}
