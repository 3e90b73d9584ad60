//! Bulk generation engine: scheduler, retry wrapper and output naming.

mod config;
mod naming;
mod retry;
mod scheduler;
mod types;

pub use config::{EngineConfig, GRID_SIZE};
pub use naming::{extension_of, file_name, file_names, slugify};
pub use retry::{retry, retry_if};
pub use scheduler::{BulkScheduler, LaneEntry};
pub use types::{total_images, EngineEvent, GeneratedImage};
