use serde::{Deserialize, Serialize};

/// Persisted state of one marker, either at the start or at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerRecord {
    pub id: i64,
    pub r: f64,
    pub phi: f64,
    pub z: f64,
    /// Cylindrical velocity (m/s). Zero for field lines.
    pub vr: f64,
    pub vphi: f64,
    pub vz: f64,
    /// Direction along the field for field lines, zero for particles.
    pub pitch: f64,
    pub mass: f64,
    pub charge: f64,
    pub weight: f64,
    pub time: f64,
    pub cputime: f64,
    pub rho: f64,
    pub running: bool,
    /// End-condition bitmask, zero while the marker is alive.
    pub endcond: u32,
    pub walltile: u32,
    /// Error code, zero when the marker is valid.
    pub err: u32,
}

/// Axis of a persisted histogram region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisInfo {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub n: usize,
}

/// One named sub-region of the flat diagnostics buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionInfo {
    pub name: String,
    pub offset: usize,
    pub len: usize,
    /// Histogram axes in row-major order; empty for record-type regions.
    pub axes: Vec<AxisInfo>,
    /// Number of f64 values per record for record-type regions, zero for histograms.
    pub record_width: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    pub regions: Vec<RegionInfo>,
    pub data: Vec<f64>,
}

impl DiagnosticsSnapshot {
    /// Returns the region description and its slice of the buffer.
    pub fn region(&self, name: &str) -> Option<(&RegionInfo, &[f64])> {
        let info = self.regions.iter().find(|r| r.name == name)?;
        let values = self.data.get(info.offset..info.offset + info.len)?;
        Some((info, values))
    }
}

/// Probability mesh produced by a backward or forward Monte Carlo sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbabilitySnapshot {
    pub axes: Vec<AxisInfo>,
    pub values: Vec<f64>,
    pub slices: usize,
}

/// Everything a run writes out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub inistate: Vec<MarkerRecord>,
    pub endstate: Vec<MarkerRecord>,
    pub diagnostics: DiagnosticsSnapshot,
    pub probability: Option<ProbabilitySnapshot>,
}
