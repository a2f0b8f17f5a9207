use marker_common::{AxisConfig, AxisInfo, Dist5DConfig, Dist6DConfig};

/// `n` equal bins over the half-open interval `[min, max)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
    pub n: usize,
}

impl Axis {
    pub fn new(name: &'static str, min: f64, max: f64, n: usize) -> Self {
        Axis { name, min, max, n }
    }

    fn from_config(name: &'static str, cfg: &AxisConfig) -> Self {
        Axis::new(name, cfg.min, cfg.max, cfg.n)
    }

    /// Bin holding `x`, or `None` when `x` is outside `[min, max)`.
    pub fn bin(&self, x: f64) -> Option<usize> {
        if !(x >= self.min && x < self.max) {
            return None;
        }
        let i = ((x - self.min) / (self.max - self.min) * self.n as f64).floor() as usize;
        Some(i.min(self.n - 1))
    }

    pub fn center(&self, i: usize) -> f64 {
        self.min + (self.max - self.min) * (i as f64 + 0.5) / self.n as f64
    }
}

/// Dense row-major histogram over a fixed set of axes.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    axes: Vec<Axis>,
}

impl Histogram {
    pub fn new(axes: Vec<Axis>) -> Self {
        Histogram { axes }
    }

    /// (R, phi, z, v_par, v_perp, time, charge).
    pub fn dist5d(cfg: &Dist5DConfig) -> Self {
        Histogram::new(vec![
            Axis::from_config("r", &cfg.r),
            Axis::from_config("phi", &cfg.phi),
            Axis::from_config("z", &cfg.z),
            Axis::from_config("vpar", &cfg.vpar),
            Axis::from_config("vperp", &cfg.vperp),
            Axis::from_config("time", &cfg.time),
            Axis::from_config("charge", &cfg.charge),
        ])
    }

    /// (R, phi, z, v_R, v_phi, v_z, time, charge).
    pub fn dist6d(cfg: &Dist6DConfig) -> Self {
        Histogram::new(vec![
            Axis::from_config("r", &cfg.r),
            Axis::from_config("phi", &cfg.phi),
            Axis::from_config("z", &cfg.z),
            Axis::from_config("vr", &cfg.vr),
            Axis::from_config("vphi", &cfg.vphi),
            Axis::from_config("vz", &cfg.vz),
            Axis::from_config("time", &cfg.time),
            Axis::from_config("charge", &cfg.charge),
        ])
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn len(&self) -> usize {
        self.axes.iter().map(|a| a.n).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat index of per-axis bin numbers.
    pub fn flat_index(&self, bins: &[usize]) -> usize {
        bins.iter().zip(&self.axes).fold(0, |acc, (&b, axis)| acc * axis.n + b)
    }

    /// Flat index of the bin holding `coords`, or `None` if any coordinate is out of range.
    pub fn index(&self, coords: &[f64]) -> Option<usize> {
        if coords.len() != self.axes.len() {
            return None;
        }
        let mut idx = 0;
        for (x, axis) in coords.iter().zip(&self.axes) {
            idx = idx * axis.n + axis.bin(*x)?;
        }
        Some(idx)
    }

    /// Adds `weight` to the bin holding `coords`. Out-of-range points are dropped.
    pub fn add(&self, buf: &mut [f64], coords: &[f64], weight: f64) -> bool {
        match self.index(coords) {
            Some(i) => {
                buf[i] += weight;
                true
            }
            None => false,
        }
    }

    pub fn axis_info(&self) -> Vec<AxisInfo> {
        self.axes
            .iter()
            .map(|a| AxisInfo { name: a.name.to_string(), min: a.min, max: a.max, n: a.n })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_open_binning() {
        let h = Histogram::new(vec![Axis::new("x", 0.0, 1.0, 2)]);
        let mut buf = vec![0.0; h.len()];

        assert!(h.add(&mut buf, &[0.49], 2.0));
        assert_eq!(buf, vec![2.0, 0.0]);
        assert!(h.add(&mut buf, &[0.5], 2.0));
        assert_eq!(buf, vec![2.0, 2.0]);

        assert!(!h.add(&mut buf, &[1.0], 2.0));
        assert!(!h.add(&mut buf, &[-0.01], 2.0));
        assert!(!h.add(&mut buf, &[f64::NAN], 2.0));
        assert_eq!(buf.iter().sum::<f64>(), 4.0);
    }

    #[test]
    fn test_row_major_index() {
        let h = Histogram::new(vec![Axis::new("a", 0.0, 2.0, 2), Axis::new("b", 0.0, 3.0, 3)]);
        assert_eq!(h.len(), 6);
        assert_eq!(h.index(&[1.5, 0.5]), Some(3));
        assert_eq!(h.flat_index(&[1, 2]), 5);
        assert_eq!(h.index(&[1.5]), None);
    }

    #[test]
    fn test_centers_fall_in_their_bins() {
        let axis = Axis::new("r", 4.0, 8.5, 7);
        for i in 0..axis.n {
            assert_eq!(axis.bin(axis.center(i)), Some(i));
        }
    }
}
