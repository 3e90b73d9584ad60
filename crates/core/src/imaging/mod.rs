//! Grid splitting and thumbnails.
//!
//! Output formats follow the file extension. JPEG output drops the alpha
//! channel.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::DynamicImage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImagingError {
    #[error("couldn't read image {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("couldn't write image {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("expected 4 outputs, got {0}")]
    OutputCount(usize),

    #[error("image too small: {width}x{height}")]
    TooSmall { width: u32, height: u32 },
}

fn open(path: &Path) -> Result<DynamicImage, ImagingError> {
    image::open(path).map_err(|source| ImagingError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn save(image: &DynamicImage, path: &Path) -> Result<(), ImagingError> {
    let is_jpeg = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"));
    let result = if is_jpeg {
        DynamicImage::ImageRgb8(image.to_rgb8()).save(path)
    } else {
        image.save(path)
    };
    result.map_err(|source| ImagingError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Split a 2x2 grid into its quadrants, written to `outputs` in reading
/// order (top-left, top-right, bottom-left, bottom-right).
///
/// With an odd dimension the middle row/column of pixels is dropped.
pub fn split_grid(input: &Path, outputs: &[PathBuf]) -> Result<(), ImagingError> {
    if outputs.len() != 4 {
        return Err(ImagingError::OutputCount(outputs.len()));
    }
    let grid = open(input)?;
    let (width, height) = (grid.width(), grid.height());
    let (w, h) = (width / 2, height / 2);
    if w == 0 || h == 0 {
        return Err(ImagingError::TooSmall { width, height });
    }

    for (n, output) in outputs.iter().enumerate() {
        let (col, row) = ((n % 2) as u32, (n / 2) as u32);
        let x = col * w + if col == 1 { width % 2 } else { 0 };
        let y = row * h + if row == 1 { height % 2 } else { 0 };
        save(&grid.crop_imm(x, y, w, h), output)?;
    }
    Ok(())
}

/// Write `input` scaled down by `divisor` to `output`.
pub fn thumbnail(input: &Path, output: &Path, divisor: u32) -> Result<(), ImagingError> {
    let source = open(input)?;
    let divisor = divisor.max(1);
    let width = (source.width() / divisor).max(1);
    let height = (source.height() / divisor).max(1);
    let resized = source.resize_exact(width, height, FilterType::CatmullRom);
    save(&resized, output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    const COLORS: [[u8; 3]; 4] = [[255, 0, 0], [0, 255, 0], [0, 0, 255], [255, 255, 0]];

    fn write_grid(dir: &Path, size: u32) -> PathBuf {
        let split = size / 2 + size % 2;
        let img = RgbImage::from_fn(size, size, |x, y| {
            let col = usize::from(x >= split);
            let row = usize::from(y >= split);
            Rgb(COLORS[row * 2 + col])
        });
        let path = dir.join("grid.png");
        img.save(&path).unwrap();
        path
    }

    fn outputs(dir: &Path) -> Vec<PathBuf> {
        (0..4).map(|n| dir.join(format!("q{}.png", n))).collect()
    }

    #[test]
    fn test_split_even_grid() {
        let dir = TempDir::new().unwrap();
        let grid = write_grid(dir.path(), 8);
        let outs = outputs(dir.path());
        split_grid(&grid, &outs).unwrap();

        for (n, out) in outs.iter().enumerate() {
            let q = image::open(out).unwrap().to_rgb8();
            assert_eq!(q.dimensions(), (4, 4));
            assert!(q.pixels().all(|p| p.0 == COLORS[n]), "quadrant {}", n);
        }
    }

    #[test]
    fn test_split_odd_grid_skips_middle() {
        let dir = TempDir::new().unwrap();
        let grid = write_grid(dir.path(), 9);
        let outs = outputs(dir.path());
        split_grid(&grid, &outs).unwrap();

        let last = image::open(&outs[3]).unwrap().to_rgb8();
        assert_eq!(last.dimensions(), (4, 4));
        assert!(last.pixels().all(|p| p.0 == COLORS[3]));
    }

    #[test]
    fn test_split_requires_four_outputs() {
        let dir = TempDir::new().unwrap();
        let grid = write_grid(dir.path(), 8);
        let err = split_grid(&grid, &outputs(dir.path())[..3]).unwrap_err();
        assert!(matches!(err, ImagingError::OutputCount(3)));
    }

    #[test]
    fn test_split_unreadable_input() {
        let dir = TempDir::new().unwrap();
        let bogus = dir.path().join("bogus.png");
        std::fs::write(&bogus, b"not an image").unwrap();
        let err = split_grid(&bogus, &outputs(dir.path())).unwrap_err();
        assert!(matches!(err, ImagingError::Read { .. }));
    }

    #[test]
    fn test_thumbnail_jpeg() {
        let dir = TempDir::new().unwrap();
        let grid = write_grid(dir.path(), 16);
        let thumb = dir.path().join("thumb.jpg");
        thumbnail(&grid, &thumb, 4).unwrap();
        let t = image::open(&thumb).unwrap();
        assert_eq!((t.width(), t.height()), (4, 4));
    }
}
