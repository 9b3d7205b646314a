//! Video as a directory of pre-extracted frames.

use std::fs;
use std::path::{Path, PathBuf};

use ledwall_core::PixelBuffer;
use tracing::debug;

use crate::application::element::VideoSource;
use crate::infrastructure::media::{is_image_file, load_image, MediaError};

/// Plays the image files of a directory in file-name order, one per call.
///
/// Frames are decoded on demand, so memory stays flat for long clips.
#[derive(Debug)]
pub struct FrameDirectoryVideo {
    frames: Vec<PathBuf>,
    next: usize,
    scale: Option<f32>,
}

impl FrameDirectoryVideo {
    /// Lists the frames of `dir`.
    ///
    /// # Errors
    ///
    /// [`MediaError::Io`] if the directory cannot be read,
    /// [`MediaError::EmptyDirectory`] if it holds no image files.
    pub fn open(dir: &Path, scale: Option<f32>) -> Result<Self, MediaError> {
        let io_err = |source| MediaError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut frames = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.is_file() && is_image_file(&path) {
                frames.push(path);
            }
        }
        if frames.is_empty() {
            return Err(MediaError::EmptyDirectory(dir.to_path_buf()));
        }
        frames.sort();
        debug!("{} frame(s) in {}", frames.len(), dir.display());
        Ok(Self {
            frames,
            next: 0,
            scale,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

impl VideoSource for FrameDirectoryVideo {
    fn next_frame(&mut self) -> Result<Option<PixelBuffer>, String> {
        let Some(path) = self.frames.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        load_image(path, self.scale).map(Some).map_err(|e| e.to_string())
    }

    fn rewind(&mut self) -> Result<(), String> {
        self.next = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::media::test_support::write_png;

    #[test]
    fn test_frames_play_in_name_order_then_end() {
        // Arrange: written out of order, with a stray non-image file.
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "frame_002.png", 1, 1, [2, 2, 2]);
        write_png(dir.path(), "frame_001.png", 1, 1, [1, 1, 1]);
        fs::write(dir.path().join("README.txt"), "ignored").unwrap();
        let mut video = FrameDirectoryVideo::open(dir.path(), None).unwrap();

        // Act
        let first = video.next_frame().unwrap().unwrap();
        let second = video.next_frame().unwrap().unwrap();
        let end = video.next_frame().unwrap();

        // Assert
        assert_eq!(video.frame_count(), 2);
        assert_eq!(first.pixel(0, 0), Some([1, 1, 1]));
        assert_eq!(second.pixel(0, 0), Some([2, 2, 2]));
        assert!(end.is_none());
    }

    #[test]
    fn test_rewind_restarts_from_first_frame() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "a.png", 1, 1, [7, 7, 7]);
        let mut video = FrameDirectoryVideo::open(dir.path(), None).unwrap();
        video.next_frame().unwrap();
        assert!(video.next_frame().unwrap().is_none());

        video.rewind().unwrap();

        assert_eq!(video.next_frame().unwrap().unwrap().pixel(0, 0), Some([7, 7, 7]));
    }

    #[test]
    fn test_empty_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = FrameDirectoryVideo::open(dir.path(), None);
        assert!(matches!(result, Err(MediaError::EmptyDirectory(_))));
    }

    #[test]
    fn test_unreadable_frame_is_reported_not_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.png"), b"junk").unwrap();
        let mut video = FrameDirectoryVideo::open(dir.path(), None).unwrap();

        assert!(video.next_frame().is_err());
    }
}
