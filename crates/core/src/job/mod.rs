//! Job orchestration: resumable generation runs, their persistence and
//! the gallery views rendered from them.

mod assets;
mod config;
mod fs_store;
mod prompts;
mod render;
mod runner;
mod sqlite_store;
mod store;
mod types;

pub use assets::AssetWriter;
pub use config::{default_job_id, JobConfig};
pub use fs_store::FsJobStore;
pub use prompts::build_prompts;
pub use render::{escape_html, format_elapsed, render_gallery, GallerySource};
pub use runner::JobRunner;
pub use sqlite_store::SqliteJobStore;
pub use store::{album_dir, create_job_store, JobStore, JobView};
pub use types::{
    Job, JobError, JobImage, JobOutcome, JobStatus, JobStoreError, JobSummary, Progress,
    ProgressCallback,
};
