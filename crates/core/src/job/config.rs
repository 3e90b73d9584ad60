//! Job run settings.

use std::path::PathBuf;

use chrono::Utc;

use crate::config::Config;
use crate::engine::EngineConfig;

/// Everything one run of a job needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Album identifier; also the album directory name.
    pub id: String,
    /// Directory holding all albums.
    pub output_dir: PathBuf,
    /// Literal prompts or prompt files.
    pub prompts: Vec<String>,
    pub prefix: String,
    pub suffix: String,
    pub engine: EngineConfig,
    /// Download every image into the album.
    pub download: bool,
    /// Write thumbnails next to downloaded images.
    pub thumbnail: bool,
}

impl JobConfig {
    pub fn new(id: impl Into<String>, output_dir: impl Into<PathBuf>, prompts: Vec<String>) -> Self {
        Self {
            id: id.into(),
            output_dir: output_dir.into(),
            prompts,
            prefix: String::new(),
            suffix: String::new(),
            engine: EngineConfig::default(),
            download: false,
            thumbnail: false,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let id = if config.output.album.is_empty() {
            default_job_id()
        } else {
            config.output.album.clone()
        };
        Self {
            id,
            output_dir: config.output.dir.clone(),
            prompts: config.generation.prompts.clone(),
            prefix: config.generation.prefix.clone(),
            suffix: config.generation.suffix.clone(),
            engine: EngineConfig::from(&config.generation),
            download: config.output.download,
            thumbnail: config.output.thumbnail,
        }
    }

    pub fn album_dir(&self) -> PathBuf {
        self.output_dir.join(&self.id)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.album_dir().join("images")
    }
}

/// Timestamp id (`YYYYMMDD_HHMMSS`, UTC) for a new album.
pub fn default_job_id() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_job_id_shape() {
        let id = default_job_id();
        assert_eq!(id.len(), 15);
        assert_eq!(id.as_bytes()[8], b'_');
        assert!(id.chars().filter(|c| *c != '_').all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        config.output.album = "my-album".to_string();
        config.output.download = true;
        config.generation.prompts = vec!["cat".to_string()];
        config.generation.upscale = true;

        let job = JobConfig::from_config(&config);
        assert_eq!(job.id, "my-album");
        assert!(job.download);
        assert!(job.engine.upscale);
        assert_eq!(job.album_dir(), PathBuf::from("output/my-album"));
        assert_eq!(job.images_dir(), PathBuf::from("output/my-album/images"));
    }

    #[test]
    fn test_from_config_generates_id() {
        let job = JobConfig::from_config(&Config::default());
        assert_eq!(job.id.len(), 15);
    }
}
