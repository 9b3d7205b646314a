//! Asset loading for scene elements.
//!
//! Still images and carousels are decoded once at startup through the
//! `image` crate and converted to [`PixelBuffer`]s.  Video elements read a
//! directory of pre-extracted frames lazily; see [`frame_dir`].

pub mod frame_dir;

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use ledwall_core::PixelBuffer;
use thiserror::Error;

pub use frame_dir::FrameDirectoryVideo;

/// File extensions treated as frames or images.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("no image files in {0}")]
    EmptyDirectory(PathBuf),

    #[error("scale factor must be positive and finite, got {0}")]
    InvalidScale(f32),
}

/// `true` if `path` has one of [`IMAGE_EXTENSIONS`], in any case.
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

/// Decodes an image file into an RGB buffer, optionally resized by `scale`
/// with nearest-neighbour sampling.
///
/// # Errors
///
/// [`MediaError::Io`] if the file cannot be opened, [`MediaError::Decode`]
/// if it is not a supported image, [`MediaError::InvalidScale`] for a
/// non-positive scale.
pub fn load_image(path: &Path, scale: Option<f32>) -> Result<PixelBuffer, MediaError> {
    let img = ImageReader::open(path)
        .map_err(|source| MediaError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .with_guessed_format()
        .map_err(|source| MediaError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .decode()
        .map_err(|source| MediaError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
    let img = match scale {
        Some(s) => rescale(img, s)?,
        None => img,
    };
    Ok(to_pixel_buffer(img))
}

/// Loads every path in order, stopping at the first failure.
///
/// # Errors
///
/// See [`load_image`].
pub fn load_images(paths: &[PathBuf], scale: Option<f32>) -> Result<Vec<PixelBuffer>, MediaError> {
    paths.iter().map(|p| load_image(p, scale)).collect()
}

fn rescale(img: DynamicImage, scale: f32) -> Result<DynamicImage, MediaError> {
    if !scale.is_finite() || scale <= 0.0 {
        return Err(MediaError::InvalidScale(scale));
    }
    if scale == 1.0 {
        return Ok(img);
    }
    let w = ((img.width() as f32 * scale).round() as u32).max(1);
    let h = ((img.height() as f32 * scale).round() as u32).max(1);
    Ok(img.resize_exact(w, h, FilterType::Nearest))
}

fn to_pixel_buffer(img: DynamicImage) -> PixelBuffer {
    let rgb = img.to_rgb8();
    let (w, h) = rgb.dimensions();
    // An RgbImage always holds exactly w * h * 3 bytes.
    PixelBuffer::from_raw(w, h, rgb.into_raw()).unwrap_or_else(|| PixelBuffer::new(w, h))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::{Path, PathBuf};

    use image::{Rgb, RgbImage};

    /// Writes a solid-colour PNG and returns its path.
    pub(crate) fn write_png(dir: &Path, name: &str, w: u32, h: u32, rgb: [u8; 3]) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(w, h, Rgb(rgb)).save(&path).unwrap();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::write_png;
    use super::*;

    #[test]
    fn test_load_image_reads_rgb_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "red.png", 3, 2, [200, 10, 20]);

        let buf = load_image(&path, None).unwrap();

        assert_eq!(buf.dimensions(), (3, 2));
        assert_eq!(buf.pixel(2, 1), Some([200, 10, 20]));
    }

    #[test]
    fn test_load_image_applies_nearest_neighbour_scale() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "small.png", 2, 3, [1, 2, 3]);

        let buf = load_image(&path, Some(2.0)).unwrap();

        assert_eq!(buf.dimensions(), (4, 6));
        assert_eq!(buf.pixel(3, 5), Some([1, 2, 3]));
    }

    #[test]
    fn test_load_image_rejects_bad_scale() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "a.png", 1, 1, [0, 0, 0]);

        assert!(matches!(load_image(&path, Some(0.0)), Err(MediaError::InvalidScale(_))));
        assert!(matches!(load_image(&path, Some(f32::NAN)), Err(MediaError::InvalidScale(_))));
    }

    #[test]
    fn test_load_image_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_image(&dir.path().join("absent.png"), None);
        assert!(matches!(result, Err(MediaError::Io { .. })));
    }

    #[test]
    fn test_load_image_garbage_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.png");
        std::fs::write(&path, b"definitely not a png").unwrap();

        assert!(matches!(load_image(&path, None), Err(MediaError::Decode { .. })));
    }

    #[test]
    fn test_is_image_file_is_case_insensitive() {
        assert!(is_image_file(Path::new("a/b/frame_001.PNG")));
        assert!(is_image_file(Path::new("x.jpeg")));
        assert!(!is_image_file(Path::new("notes.txt")));
        assert!(!is_image_file(Path::new("no_extension")));
    }
}
