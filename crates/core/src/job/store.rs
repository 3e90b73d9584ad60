//! Job storage trait and shared helpers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::fs_store::FsJobStore;
use super::render::{render_gallery, GallerySource};
use super::sqlite_store::SqliteJobStore;
use super::types::{Job, JobStoreError, JobSummary};
use crate::config::{StoreBackend, StoreConfig};

/// How the gallery views of a job are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobView {
    /// Local gallery shows thumbnails instead of full images.
    pub thumbnail: bool,
}

/// Trait for job storage backends.
///
/// Every backend also writes the two gallery views (`index.html` and
/// `remote.html`) into `<root>/<id>/`.
pub trait JobStore: Send + Sync {
    /// Get a job by ID.
    fn load(&self, id: &str) -> Result<Option<Job>, JobStoreError>;

    /// Insert or replace a job and refresh its gallery views.
    fn save(&self, job: &Job, view: &JobView) -> Result<(), JobStoreError>;

    /// All stored jobs, most recently updated first.
    fn list(&self) -> Result<Vec<JobSummary>, JobStoreError>;
}

/// Write `contents` to `path` through a temporary sibling file.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), JobStoreError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("data");
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Render `index.html` (local files) and `remote.html` (upstream URLs).
pub(crate) fn write_views(dir: &Path, job: &Job, view: &JobView) -> Result<(), JobStoreError> {
    std::fs::create_dir_all(dir)?;
    let local = render_gallery(
        job,
        GallerySource::Local {
            thumbnail: view.thumbnail,
        },
    );
    write_atomic(&dir.join("index.html"), local.as_bytes())?;
    let remote = render_gallery(job, GallerySource::Remote);
    write_atomic(&dir.join("remote.html"), remote.as_bytes())?;
    Ok(())
}

/// Directory of album `id` under `root`.
pub fn album_dir(root: &Path, id: &str) -> PathBuf {
    root.join(id)
}

/// Build the configured store. Albums live under `output_dir`.
pub fn create_job_store(
    config: &StoreConfig,
    output_dir: &Path,
) -> Result<Arc<dyn JobStore>, JobStoreError> {
    match config.backend {
        StoreBackend::Fs => Ok(Arc::new(FsJobStore::new(output_dir))),
        StoreBackend::Sqlite => Ok(Arc::new(SqliteJobStore::new(&config.path, output_dir)?)),
    }
}
