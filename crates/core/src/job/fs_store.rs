//! Filesystem job store: `<root>/<id>/data.json` plus gallery views.

use std::path::{Path, PathBuf};

use tracing::warn;

use super::store::{album_dir, write_atomic, write_views, JobStore, JobView};
use super::types::{Job, JobStoreError, JobSummary};

const DATA_FILE: &str = "data.json";

/// Job store keeping one directory per album.
pub struct FsJobStore {
    root: PathBuf,
}

impl FsJobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn data_file(&self, id: &str) -> PathBuf {
        album_dir(&self.root, id).join(DATA_FILE)
    }
}

impl JobStore for FsJobStore {
    fn load(&self, id: &str) -> Result<Option<Job>, JobStoreError> {
        let data = match std::fs::read(self.data_file(id)) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&data)?))
    }

    fn save(&self, job: &Job, view: &JobView) -> Result<(), JobStoreError> {
        let dir = album_dir(&self.root, &job.id);
        std::fs::create_dir_all(&dir)?;
        let json = serde_json::to_vec_pretty(job)?;
        write_atomic(&dir.join(DATA_FILE), &json)?;
        write_views(&dir, job, view)
    }

    fn list(&self) -> Result<Vec<JobSummary>, JobStoreError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut jobs = Vec::new();
        for entry in entries {
            let path = entry?.path().join(DATA_FILE);
            if !path.is_file() {
                continue;
            }
            let parsed = std::fs::read(&path)
                .map_err(JobStoreError::from)
                .and_then(|data| serde_json::from_slice::<Job>(&data).map_err(JobStoreError::from));
            match parsed {
                Ok(job) => jobs.push(JobSummary::from(&job)),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable album"),
            }
        }
        jobs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobImage, JobStatus};
    use tempfile::TempDir;

    fn sample_job(id: &str) -> Job {
        let mut job = Job::new(id, vec!["b".into(), "a".into()]);
        job.images.push(JobImage {
            url: "https://cdn.test/1/grid.png".into(),
            prompt: "a".into(),
            prompt_index: 0,
            image_index: 0,
            file: Some("a_00000_00.png".into()),
        });
        job.mark_finished(0);
        job
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = FsJobStore::new(dir.path());
        let job = sample_job("album");

        store.save(&job, &JobView::default()).unwrap();
        assert!(dir.path().join("album/data.json").exists());
        assert!(dir.path().join("album/index.html").exists());
        assert!(dir.path().join("album/remote.html").exists());

        let loaded = store.load("album").unwrap().unwrap();
        assert_eq!(loaded, job);
    }

    #[test]
    fn test_load_missing() {
        let dir = TempDir::new().unwrap();
        let store = FsJobStore::new(dir.path());
        assert!(store.load("nope").unwrap().is_none());
    }

    #[test]
    fn test_load_corrupt_data_fails() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("bad")).unwrap();
        std::fs::write(dir.path().join("bad/data.json"), b"{not json").unwrap();
        let store = FsJobStore::new(dir.path());
        assert!(matches!(
            store.load("bad"),
            Err(JobStoreError::Serialization(_))
        ));
    }

    #[test]
    fn test_save_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = FsJobStore::new(dir.path());
        let mut job = sample_job("album");
        store.save(&job, &JobView::default()).unwrap();

        job.status = JobStatus::Finished;
        job.percentage = 100.0;
        store.save(&job, &JobView::default()).unwrap();

        let loaded = store.load("album").unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Finished);
    }

    #[test]
    fn test_list_skips_unreadable() {
        let dir = TempDir::new().unwrap();
        let store = FsJobStore::new(dir.path());
        store.save(&sample_job("one"), &JobView::default()).unwrap();
        store.save(&sample_job("two"), &JobView::default()).unwrap();
        std::fs::create_dir_all(dir.path().join("broken")).unwrap();
        std::fs::write(dir.path().join("broken/data.json"), b"[]").unwrap();
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();

        let jobs = store.list().unwrap();
        let mut ids: Vec<_> = jobs.iter().map(|j| j.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["one", "two"]);
        assert_eq!(jobs[0].prompts, 2);
        assert_eq!(jobs[0].finished_prompts, 1);
    }

    #[test]
    fn test_list_missing_root() {
        let dir = TempDir::new().unwrap();
        let store = FsJobStore::new(dir.path().join("missing"));
        assert!(store.list().unwrap().is_empty());
    }
}
