pub mod background;
pub mod bmc;
pub mod diag;
pub mod endcond;
pub mod error;
pub mod lane;
pub mod marker;
pub mod output;
pub mod physlib;
pub mod simulate;
pub mod step;
pub mod summary;

pub use error::MarkerError;
pub use marker::MarkerState;
pub use simulate::{PartitionPlan, RunOutcome, Simulation};
