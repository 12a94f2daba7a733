//! Line orchestration: bottle injection, work-unit dispatch, start/stop and status.

mod builder;
mod line;
mod status;

pub use builder::FactoryBuilder;
pub use line::Factory;
pub use status::{CappingStatus, FactoryStatus, FillingStatus, LabelingStatus, StationsStatus};
