//! Job implementations
//!
//! - [`EntitySyncJob`]: pages source entities into collections
//! - [`CustomValuesJob`]: one call per parent, expensive phase
//! - [`CamperHistoryJob`]: derived rows built from local collections

pub mod camper_history;
pub mod custom_values;
pub mod entity;
pub mod mapper;

pub use camper_history::CamperHistoryJob;
pub use custom_values::{CustomValuesJob, CustomValuesTarget};
pub use entity::{EntityDefinition, EntitySyncJob};
pub use mapper::{FieldMapper, MapError, Passthrough, Project};
