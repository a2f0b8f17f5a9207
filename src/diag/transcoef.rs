use super::DiagPoint;
use marker_common::TransportConfig;
use std::f64::consts::TAU;

/// Values per marker: id, drift coefficient K and diffusion coefficient D.
/// D is -1 for markers that never collected a complete averaging window.
pub const TRANSCOEF_FIELDS: usize = 3;

/// Radial drift and diffusion coefficients estimated from rho(t).
///
/// Samples are taken at a fixed time interval, or at every outer midplane
/// crossing when the interval is not positive. They are split into windows of
/// `navg` samples and the coefficients written once the marker finishes.
#[derive(Debug, Clone)]
pub struct TransportCoefficients {
    navg: usize,
    interval: f64,
    samples: Vec<Vec<(f64, f64)>>,
    last_time: Vec<f64>,
}

impl TransportCoefficients {
    pub fn new(cfg: &TransportConfig, n_markers: usize) -> Self {
        TransportCoefficients {
            navg: cfg.navg,
            interval: cfg.interval,
            samples: vec![Vec::new(); n_markers],
            last_time: vec![f64::NEG_INFINITY; n_markers],
        }
    }

    pub fn region_len(&self) -> usize {
        self.samples.len() * TRANSCOEF_FIELDS
    }

    pub fn update(&mut self, buf: &mut [f64], index: usize, pre: &DiagPoint, post: &DiagPoint, finished: bool) {
        let samples = &mut self.samples[index];
        if samples.is_empty() {
            samples.push((pre.time, pre.rho));
            self.last_time[index] = pre.time;
        }

        let record = if self.interval > 0.0 {
            post.time - self.last_time[index] >= self.interval
        } else {
            (pre.theta / TAU).floor() != (post.theta / TAU).floor()
        };
        if record {
            samples.push((post.time, post.rho));
            self.last_time[index] = post.time;
        }

        if finished {
            let out = &mut buf[index * TRANSCOEF_FIELDS..(index + 1) * TRANSCOEF_FIELDS];
            let (k, d) = coefficients(samples, self.navg).unwrap_or((0.0, -1.0));
            out.copy_from_slice(&[post.id as f64, k, d]);
            samples.clear();
        }
    }
}

/// Drift K and diffusion D from consecutive windows of `navg` samples.
///
/// Each window gives K_j = drho_j / dt_j; K is their mean and D the mean of
/// (drho_j - K dt_j)^2 / (2 dt_j). Incomplete trailing windows are ignored.
pub fn coefficients(samples: &[(f64, f64)], navg: usize) -> Option<(f64, f64)> {
    if navg < 2 {
        return None;
    }
    let windows: Vec<(f64, f64)> = samples
        .chunks_exact(navg)
        .filter_map(|w| {
            let (t0, rho0) = w[0];
            let (t1, rho1) = w[navg - 1];
            let dt = t1 - t0;
            (dt > 0.0).then_some((dt, rho1 - rho0))
        })
        .collect();
    if windows.is_empty() {
        return None;
    }

    let n = windows.len() as f64;
    let k = windows.iter().map(|(dt, drho)| drho / dt).sum::<f64>() / n;
    let d = windows
        .iter()
        .map(|(dt, drho)| (drho - k * dt).powi(2) / (2.0 * dt))
        .sum::<f64>()
        / n;
    Some((k, d))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(time: f64, rho: f64, theta: f64) -> DiagPoint {
        DiagPoint { id: 5, time, rho, theta, weight: 1.0, ..DiagPoint::default() }
    }

    #[test]
    fn test_linear_drift_has_no_diffusion() {
        let samples: Vec<(f64, f64)> = (0..8).map(|i| (i as f64, 0.1 + 0.01 * i as f64)).collect();
        let (k, d) = coefficients(&samples, 4).expect("two windows");
        assert!((k - 0.01).abs() < 1e-12);
        assert!(d.abs() < 1e-12);
    }

    #[test]
    fn test_alternating_windows_diffuse() {
        // Windows of two samples, drho = +0.2 then -0.2 over dt = 1.
        let samples = vec![(0.0, 0.5), (1.0, 0.7), (2.0, 0.5), (3.0, 0.3)];
        let (k, d) = coefficients(&samples, 2).expect("two windows");
        assert!(k.abs() < 1e-12);
        assert!((d - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_too_few_samples_writes_sentinel() {
        let cfg = TransportConfig { navg: 5, interval: 1.0 };
        let mut tc = TransportCoefficients::new(&cfg, 1);
        let mut buf = vec![0.0; tc.region_len()];
        tc.update(&mut buf, 0, &point(0.0, 0.2, 0.0), &point(1.0, 0.3, 0.0), true);
        assert_eq!(buf, vec![5.0, 0.0, -1.0]);
    }

    #[test]
    fn test_midplane_crossings_are_sampled() {
        let cfg = TransportConfig { navg: 2, interval: 0.0 };
        let mut tc = TransportCoefficients::new(&cfg, 1);
        let mut buf = vec![0.0; tc.region_len()];
        // No crossing: theta stays inside (0, 2 pi).
        tc.update(&mut buf, 0, &point(0.0, 0.2, 0.1), &point(1.0, 0.25, 3.0), false);
        // Crossing theta = 2 pi.
        tc.update(&mut buf, 0, &point(1.0, 0.25, 3.0), &point(2.0, 0.4, 6.5), true);
        assert_eq!(buf[0], 5.0);
        assert!((buf[1] - 0.1).abs() < 1e-12);
        assert!(buf[2].abs() < 1e-12);
    }
}
