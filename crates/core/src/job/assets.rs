//! Turning scheduler emissions into recorded images, downloading them into
//! the album when asked to.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::types::JobImage;
use crate::engine::GeneratedImage;
use crate::imaging;
use crate::metrics;
use crate::transport::{Transport, TransportError};

/// Thumbnail scale for upscaled images.
const UPSCALE_THUMBNAIL_DIVISOR: u32 = 8;
/// Thumbnail scale for grid quadrants.
const QUADRANT_THUMBNAIL_DIVISOR: u32 = 4;

/// Records images and, with a downloader, writes them under `images/`.
pub struct AssetWriter {
    downloader: Option<Arc<dyn Transport>>,
    images_dir: PathBuf,
    thumbnail: bool,
}

impl AssetWriter {
    /// Writer that only records URLs.
    pub fn record_only() -> Self {
        Self {
            downloader: None,
            images_dir: PathBuf::new(),
            thumbnail: false,
        }
    }

    pub fn new(downloader: Arc<dyn Transport>, images_dir: impl Into<PathBuf>, thumbnail: bool) -> Self {
        Self {
            downloader: Some(downloader),
            images_dir: images_dir.into(),
            thumbnail,
        }
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    fn thumbnail_path(&self, file: &str) -> PathBuf {
        let stem = Path::new(file)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file);
        self.images_dir
            .join("_thumbnails")
            .join(format!("{}.jpg", stem))
    }

    /// Records for `image` pointing at its URL only.
    pub fn record(&self, image: &GeneratedImage) -> Vec<JobImage> {
        records(image, None)
    }

    /// Image records for one emission: four for a grid, one otherwise.
    ///
    /// Download and post-processing failures are logged; the records are
    /// returned regardless. A cancelled download leaves the records without
    /// files.
    pub async fn materialize(&self, image: &GeneratedImage, cancel: &CancellationToken) -> Vec<JobImage> {
        let Some(downloader) = &self.downloader else {
            return records(image, None);
        };

        let file = image.file_name();
        let dest = self.images_dir.join(&file);
        match downloader.download(&image.url, &dest, cancel).await {
            Ok(()) => {
                metrics::ASSET_DOWNLOADS.with_label_values(&["success"]).inc();
                debug!(url = %image.url, file = %dest.display(), "Downloaded image");
            }
            Err(TransportError::Cancelled) => {
                debug!(url = %image.url, "Download cancelled");
                return records(image, None);
            }
            Err(e) => {
                metrics::ASSET_DOWNLOADS.with_label_values(&["failed"]).inc();
                warn!(url = %image.url, error = %e, "Couldn't download image");
            }
        }

        if !image.preview {
            if self.thumbnail {
                self.write_thumbnail(dest, self.thumbnail_path(&file), UPSCALE_THUMBNAIL_DIVISOR)
                    .await;
            }
            return records(image, Some(vec![file]));
        }

        let names = image.file_names();
        let outputs: Vec<PathBuf> = names.iter().map(|n| self.images_dir.join(n)).collect();
        let split = {
            let input = dest.clone();
            let outputs = outputs.clone();
            tokio::task::spawn_blocking(move || imaging::split_grid(&input, &outputs)).await
        };
        match split {
            Ok(Ok(())) => {
                if self.thumbnail {
                    for (name, output) in names.iter().zip(outputs) {
                        self.write_thumbnail(output, self.thumbnail_path(name), QUADRANT_THUMBNAIL_DIVISOR)
                            .await;
                    }
                }
            }
            Ok(Err(e)) => warn!(file = %dest.display(), error = %e, "Couldn't split grid"),
            Err(e) => warn!(file = %dest.display(), error = %e, "Grid split task failed"),
        }
        records(image, Some(names))
    }

    async fn write_thumbnail(&self, input: PathBuf, output: PathBuf, divisor: u32) {
        let result = tokio::task::spawn_blocking(move || {
            if let Some(parent) = output.parent() {
                std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
            }
            imaging::thumbnail(&input, &output, divisor).map_err(|e| e.to_string())
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Couldn't write thumbnail"),
            Err(e) => warn!(error = %e, "Thumbnail task failed"),
        }
    }
}

/// One record per slot of `image`; `files` names each slot's file.
fn records(image: &GeneratedImage, files: Option<Vec<String>>) -> Vec<JobImage> {
    (0..image.slots())
        .map(|offset| JobImage {
            url: image.url.clone(),
            prompt: image.prompt.clone(),
            prompt_index: image.prompt_index,
            image_index: image.image_index + offset,
            file: files.as_ref().and_then(|f| f.get(offset).cloned()),
        })
        .collect()
}
