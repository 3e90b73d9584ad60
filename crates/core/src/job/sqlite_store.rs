//! SQLite-backed job store implementation.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::store::{album_dir, write_views, JobStore, JobView};
use super::types::{Job, JobStatus, JobStoreError, JobSummary};

const SELECT_COLUMNS: &str =
    "id, status, created_at, updated_at, percentage, prompts, finished, images";

/// SQLite-backed job store.
///
/// Job data lives in the database; gallery views are still written to
/// `<root>/<id>/`.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
    root: PathBuf,
}

impl SqliteJobStore {
    /// Create a new SQLite job store, creating the database file and tables if needed.
    pub fn new(path: &Path, root: impl Into<PathBuf>) -> Result<Self, JobStoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            root: root.into(),
        })
    }

    /// Create an in-memory SQLite job store (useful for testing).
    pub fn in_memory(root: impl Into<PathBuf>) -> Result<Self, JobStoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            root: root.into(),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), JobStoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                percentage REAL NOT NULL DEFAULT 0,
                prompts TEXT NOT NULL,
                finished TEXT NOT NULL,
                images TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_updated_at ON jobs(updated_at);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, JobStoreError> {
        self.conn
            .lock()
            .map_err(|_| JobStoreError::Database("connection lock poisoned".to_string()))
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let id: String = row.get(0)?;
        let status: String = row.get(1)?;
        let created_at: String = row.get(2)?;
        let updated_at: String = row.get(3)?;
        let percentage: f64 = row.get(4)?;
        let prompts: String = row.get(5)?;
        let finished: String = row.get(6)?;
        let images: String = row.get(7)?;

        Ok(Job {
            id,
            status: JobStatus::parse(&status).ok_or_else(|| invalid(1, format!("unknown status {}", status)))?,
            created_at: parse_time(2, &created_at)?,
            updated_at: parse_time(3, &updated_at)?,
            percentage: percentage as f32,
            prompts: parse_json(5, &prompts)?,
            finished: parse_json(6, &finished)?,
            images: parse_json(7, &images)?,
        })
    }
}

fn invalid(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

fn parse_time(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| invalid(column, e.to_string()))
}

fn parse_json<T: serde::de::DeserializeOwned>(column: usize, value: &str) -> rusqlite::Result<T> {
    serde_json::from_str(value).map_err(|e| invalid(column, e.to_string()))
}

impl JobStore for SqliteJobStore {
    fn load(&self, id: &str) -> Result<Option<Job>, JobStoreError> {
        let conn = self.conn()?;

        let result = conn.query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?", SELECT_COLUMNS),
            params![id],
            Self::row_to_job,
        );

        match result {
            Ok(job) => Ok(Some(job)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, job: &Job, view: &JobView) -> Result<(), JobStoreError> {
        let prompts = serde_json::to_string(&job.prompts)?;
        let finished = serde_json::to_string(&job.finished)?;
        let images = serde_json::to_string(&job.images)?;

        {
            let conn = self.conn()?;
            conn.execute(
                r#"INSERT INTO jobs (id, status, created_at, updated_at, percentage, prompts, finished, images)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                   ON CONFLICT(id) DO UPDATE SET
                       status = excluded.status,
                       updated_at = excluded.updated_at,
                       percentage = excluded.percentage,
                       prompts = excluded.prompts,
                       finished = excluded.finished,
                       images = excluded.images"#,
                params![
                    job.id,
                    job.status.as_str(),
                    job.created_at.to_rfc3339(),
                    job.updated_at.to_rfc3339(),
                    f64::from(job.percentage),
                    prompts,
                    finished,
                    images,
                ],
            )?;
        }

        write_views(&album_dir(&self.root, &job.id), job, view)
    }

    fn list(&self) -> Result<Vec<JobSummary>, JobStoreError> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs ORDER BY updated_at DESC, id ASC",
            SELECT_COLUMNS
        ))?;

        let rows = stmt.query_map([], Self::row_to_job)?;

        let mut jobs = Vec::new();
        for row_result in rows {
            let job = row_result?;
            jobs.push(JobSummary::from(&job));
        }

        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobImage;
    use tempfile::TempDir;

    fn create_test_store(dir: &TempDir) -> SqliteJobStore {
        SqliteJobStore::in_memory(dir.path()).unwrap()
    }

    fn sample_job(id: &str) -> Job {
        let mut job = Job::new(id, vec!["cat".into(), "dog".into()]);
        job.images.push(JobImage {
            url: "https://cdn.test/1/u0.png".into(),
            prompt: "cat".into(),
            prompt_index: 0,
            image_index: 0,
            file: None,
        });
        job.percentage = 12.5;
        job
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir);
        let job = sample_job("a1");

        store.save(&job, &JobView::default()).unwrap();
        let loaded = store.load("a1").unwrap().unwrap();
        assert_eq!(loaded, job);
        assert!(dir.path().join("a1/index.html").exists());
        assert!(dir.path().join("a1/remote.html").exists());
    }

    #[test]
    fn test_get_nonexistent_job() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir);
        assert!(store.load("missing").unwrap().is_none());
    }

    #[test]
    fn test_save_updates_existing_row() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir);
        let mut job = sample_job("a1");
        store.save(&job, &JobView::default()).unwrap();

        job.status = JobStatus::PartiallyFinished;
        job.mark_finished(1);
        store.save(&job, &JobView::default()).unwrap();

        let loaded = store.load("a1").unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::PartiallyFinished);
        assert_eq!(loaded.finished, vec![1]);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_list_jobs() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir);
        store.save(&sample_job("a1"), &JobView::default()).unwrap();
        store.save(&sample_job("a2"), &JobView::default()).unwrap();

        let jobs = store.list().unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.prompts == 2 && j.images == 1));
    }

    #[test]
    fn test_file_database_persists() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("db/jobs.sqlite");
        {
            let store = SqliteJobStore::new(&db, dir.path()).unwrap();
            store.save(&sample_job("a1"), &JobView::default()).unwrap();
        }
        let store = SqliteJobStore::new(&db, dir.path()).unwrap();
        assert!(store.load("a1").unwrap().is_some());
    }
}
