//! Marker CSV input, end-state CSV output and snapshot persistence.

use crate::marker::{FieldLineInput, GuidingCenterInput, InputMarker, ParticleInput, Species};
use crate::physlib::CONST_E;
use anyhow::{Context, Result};
use log::{error, info};
use marker_common::{MarkerKind, MarkerRecord, RunSnapshot, Vec3};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// One row of a marker input file. Angles are in degrees, masses in amu,
/// charges in elementary charges and energies in eV. Columns a marker kind
/// does not use may be left out.
#[derive(Debug, Deserialize)]
struct MarkerRow {
    id: i64,
    r: f64,
    phi_deg: f64,
    z: f64,
    #[serde(default)]
    vr: Option<f64>,
    #[serde(default)]
    vphi: Option<f64>,
    #[serde(default)]
    vz: Option<f64>,
    #[serde(default)]
    energy_ev: Option<f64>,
    #[serde(default)]
    pitch: Option<f64>,
    #[serde(default)]
    zeta: Option<f64>,
    #[serde(default)]
    mass_amu: Option<f64>,
    #[serde(default)]
    charge_e: Option<f64>,
    #[serde(default)]
    anum: Option<i32>,
    #[serde(default)]
    znum: Option<i32>,
    #[serde(default)]
    weight: Option<f64>,
    #[serde(default)]
    time: Option<f64>,
}

impl MarkerRow {
    fn species(&self) -> Result<Species> {
        let (Some(mass), Some(charge)) = (self.mass_amu, self.charge_e) else {
            anyhow::bail!("marker {} needs mass_amu and charge_e", self.id);
        };
        Ok(Species::from_amu_e(
            mass,
            charge,
            self.anum.unwrap_or(mass.round() as i32),
            self.znum.unwrap_or(charge.round() as i32),
        ))
    }

    fn into_input(self, kind: MarkerKind) -> Result<InputMarker> {
        let phi = self.phi_deg.to_radians();
        let weight = self.weight.unwrap_or(1.0);
        let time = self.time.unwrap_or(0.0);
        Ok(match kind {
            MarkerKind::Particle => {
                let (Some(vr), Some(vphi), Some(vz)) = (self.vr, self.vphi, self.vz) else {
                    anyhow::bail!("particle marker {} needs vr, vphi and vz", self.id);
                };
                InputMarker::Particle(ParticleInput {
                    id: self.id,
                    r: self.r,
                    phi,
                    z: self.z,
                    v: Vec3::new(vr, vphi, vz),
                    species: self.species()?,
                    weight,
                    time,
                })
            }
            MarkerKind::GuidingCenter => {
                let (Some(energy_ev), Some(pitch)) = (self.energy_ev, self.pitch) else {
                    anyhow::bail!("guiding-center marker {} needs energy_ev and pitch", self.id);
                };
                InputMarker::GuidingCenter(GuidingCenterInput {
                    id: self.id,
                    r: self.r,
                    phi,
                    z: self.z,
                    energy: energy_ev * CONST_E,
                    pitch,
                    zeta: self.zeta.unwrap_or(0.0),
                    species: self.species()?,
                    weight,
                    time,
                })
            }
            MarkerKind::FieldLine => InputMarker::FieldLine(FieldLineInput {
                id: self.id,
                r: self.r,
                phi,
                z: self.z,
                pitch: self.pitch.unwrap_or(1.0),
                weight,
                time,
            }),
        })
    }
}

/// Parses marker rows of the given kind from CSV with a header line.
pub fn read_markers<R: Read>(reader: R, kind: MarkerKind) -> Result<Vec<InputMarker>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut markers = Vec::new();
    for (line, row) in rdr.deserialize::<MarkerRow>().enumerate() {
        let row = row.with_context(|| format!("bad marker row {}", line + 1))?;
        markers.push(row.into_input(kind)?);
    }
    Ok(markers)
}

pub fn read_markers_csv<P: AsRef<Path>>(path: P, kind: MarkerKind) -> Result<Vec<InputMarker>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open marker file '{}'", path.display()))?;
    let markers = read_markers(file, kind).with_context(|| format!("Invalid marker file '{}'", path.display()))?;
    info!("Read {} {:?} markers from {}", markers.len(), kind, path.display());
    Ok(markers)
}

pub fn write_endstate_csv<P: AsRef<Path>>(path: P, records: &[MarkerRecord]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path).with_context(|| format!("Error creating CSV file '{}'", path.display()))?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    info!("End states of {} markers saved to {}", records.len(), path.display());
    Ok(())
}

/// Writes the snapshot as `<base>_snapshot.<ext>` in the requested format and
/// returns the file name. Unknown formats fall back to JSON.
pub fn save_snapshot(snapshot: &RunSnapshot, base_filename: &str, format: Option<&str>) -> Result<PathBuf> {
    let output_format = format.unwrap_or("json");
    match output_format {
        "json" => write_json(snapshot, base_filename),
        "bincode" => {
            let filename = PathBuf::from(format!("{}_snapshot.bin", base_filename));
            let file = File::create(&filename)
                .with_context(|| format!("Error creating snapshot file '{}'", filename.display()))?;
            bincode::serialize_into(BufWriter::new(file), snapshot)
                .map_err(|e| anyhow::anyhow!("Error serializing snapshot to bincode: {}", e))?;
            info!("Snapshot saved to {} (binary format)", filename.display());
            Ok(filename)
        }
        "messagepack" => {
            let filename = PathBuf::from(format!("{}_snapshot.msgpack", base_filename));
            let file = File::create(&filename)
                .with_context(|| format!("Error creating snapshot file '{}'", filename.display()))?;
            let mut writer = BufWriter::new(file);
            rmp_serde::encode::write(&mut writer, snapshot)
                .map_err(|e| anyhow::anyhow!("Error serializing snapshot to MessagePack: {}", e))?;
            writer.flush()?;
            info!("Snapshot saved to {} (MessagePack format)", filename.display());
            Ok(filename)
        }
        _ => {
            error!("Unknown output format: {}. Using JSON instead.", output_format);
            write_json(snapshot, base_filename)
        }
    }
}

fn write_json(snapshot: &RunSnapshot, base_filename: &str) -> Result<PathBuf> {
    let filename = PathBuf::from(format!("{}_snapshot.json", base_filename));
    let json_string = serde_json::to_string(snapshot)
        .map_err(|e| anyhow::anyhow!("Error serializing snapshot to JSON: {}", e))?;
    let mut file = File::create(&filename)
        .with_context(|| format!("Error creating snapshot file '{}'", filename.display()))?;
    file.write_all(json_string.as_bytes())
        .with_context(|| format!("Error writing snapshot JSON to file '{}'", filename.display()))?;
    info!("Snapshot saved to {} ({}MB)", filename.display(), json_string.len() / 1_048_576);
    Ok(filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use marker_common::DiagnosticsSnapshot;

    #[test]
    fn test_particle_rows_convert_units() {
        let csv = "id,r,phi_deg,z,vr,vphi,vz,mass_amu,charge_e,weight\n\
                   1, 7.0, 90, 0.1, 1e5, 2e5, 0, 2.0, 1, 3.5\n\
                   2, 6.5, 0, 0.0, 0, 0, 1e6, 4.0, 2,\n";
        let markers = read_markers(csv.as_bytes(), MarkerKind::Particle).expect("valid rows");
        assert_eq!(markers.len(), 2);
        let InputMarker::Particle(p) = &markers[0] else {
            panic!("expected a particle");
        };
        assert!((p.phi - std::f64::consts::FRAC_PI_2).abs() < 1e-15);
        assert_eq!(p.v, Vec3::new(1.0e5, 2.0e5, 0.0));
        assert_eq!(p.weight, 3.5);
        assert_eq!(p.species, Species::from_amu_e(2.0, 1.0, 2, 1));
        let InputMarker::Particle(p) = &markers[1] else {
            panic!("expected a particle");
        };
        assert_eq!(p.weight, 1.0);
        assert_eq!((p.species.anum, p.species.znum), (4, 2));
    }

    #[test]
    fn test_guiding_center_energy_is_in_ev() {
        let csv = "id,r,phi_deg,z,energy_ev,pitch,mass_amu,charge_e\n7,7.0,0,0,3.5e6,0.5,4.0,2\n";
        let markers = read_markers(csv.as_bytes(), MarkerKind::GuidingCenter).expect("valid row");
        let InputMarker::GuidingCenter(g) = &markers[0] else {
            panic!("expected a guiding center");
        };
        assert_eq!(g.id, 7);
        assert!((g.energy - 3.5e6 * CONST_E).abs() < 1e-20);
        assert_eq!(g.zeta, 0.0);
    }

    #[test]
    fn test_missing_velocity_is_an_error() {
        let csv = "id,r,phi_deg,z,mass_amu,charge_e\n1,7.0,0,0,1.0,1\n";
        let err = read_markers(csv.as_bytes(), MarkerKind::Particle).unwrap_err();
        assert!(err.to_string().contains("vr"));
    }

    #[test]
    fn test_field_lines_need_only_position() {
        let csv = "id,r,phi_deg,z,pitch\n1,7.0,0,0,-1\n2,7.5,0,0,\n";
        let markers = read_markers(csv.as_bytes(), MarkerKind::FieldLine).expect("valid rows");
        let pitches: Vec<f64> = markers
            .iter()
            .map(|m| match m {
                InputMarker::FieldLine(f) => f.pitch,
                _ => f64::NAN,
            })
            .collect();
        assert_eq!(pitches, vec![-1.0, 1.0]);
    }

    #[test]
    fn test_unknown_format_falls_back_to_json() {
        let snapshot = RunSnapshot {
            inistate: Vec::new(),
            endstate: Vec::new(),
            diagnostics: DiagnosticsSnapshot::default(),
            probability: None,
        };
        let base = std::env::temp_dir().join(format!("marker_engine_output_test_{}", std::process::id()));
        let base = base.to_string_lossy().into_owned();
        let path = save_snapshot(&snapshot, &base, Some("hdf5")).expect("json fallback");
        assert!(path.to_string_lossy().ends_with("_snapshot.json"));
        let text = std::fs::read_to_string(&path).expect("written");
        let back: RunSnapshot = serde_json::from_str(&text).expect("valid json");
        assert!(back.endstate.is_empty() && back.probability.is_none());
        let _ = std::fs::remove_file(path);
    }
}
