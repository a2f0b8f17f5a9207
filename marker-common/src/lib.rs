pub mod config;
pub mod sim_params;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{
    AxisConfig, BmcConfig, BmcDirection, DiagnosticsConfig, Dist5DConfig, Dist6DConfig, EndCondName,
    EndConditionsConfig, FieldConfig, MarkerKind, MarkersConfig, MeshKind, OrbitConfig, OrbitMode,
    OutputConfig, PartitionConfig, PartitionKind, PlasmaConfig, PlasmaSpeciesConfig, RecordMode, SimMode,
    SimulationConfig, SimulationSection, TimestepConfig, TransportConfig, WallConfig, WallKind,
};
pub use sim_params::SimParams;
pub use snapshot::{AxisInfo, DiagnosticsSnapshot, MarkerRecord, ProbabilitySnapshot, RegionInfo, RunSnapshot};
pub use vecmath::{cart_point_to_cyl, cyl_point_to_cart, perpendicular_basis, unwrap_angle, Vec3};
