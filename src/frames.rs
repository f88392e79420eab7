//! Per-session frame storage.
//!
//! Each recording owns one temporary directory holding `frame0.png`,
//! `frame1.png`, ... which the encoder reads back through the `frame%d.png`
//! pattern.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::RgbaImage;
use tempfile::TempDir;

use crate::error::{LapseError, LapseResult};

const SESSION_DIR_PREFIX: &str = "lapse_images";
const FRAME_PREFIX: &str = "frame";
const FRAME_EXTENSION: &str = "png";

/// Allocates session directories under a root (the system temp dir by default).
#[derive(Debug, Clone)]
pub struct FrameStore {
    root: PathBuf,
}

impl FrameStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn system_temp() -> Self {
        Self::new(std::env::temp_dir())
    }

    pub fn allocate_session_dir(&self) -> LapseResult<FrameDir> {
        fs::create_dir_all(&self.root)?;
        let dir = tempfile::Builder::new()
            .prefix(SESSION_DIR_PREFIX)
            .tempdir_in(&self.root)?;
        tracing::debug!(path = ?dir.path(), "Allocated frame directory");
        Ok(FrameDir { dir })
    }
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::system_temp()
    }
}

/// A live session directory. Dropping it removes the directory as well, but
/// `cleanup` reports failures.
#[derive(Debug)]
pub struct FrameDir {
    dir: TempDir,
}

impl FrameDir {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Input pattern handed to the encoder.
    pub fn pattern(&self) -> PathBuf {
        frame_pattern(self.path())
    }

    pub fn cleanup(self) -> LapseResult<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        tracing::debug!(path = ?path, "Removed frame directory");
        Ok(())
    }
}

pub fn frame_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("{FRAME_PREFIX}{index}.{FRAME_EXTENSION}"))
}

pub fn frame_pattern(dir: &Path) -> PathBuf {
    dir.join(format!("{FRAME_PREFIX}%d.{FRAME_EXTENSION}"))
}

/// Encodes the still as PNG and writes it as frame `index` of `dir`.
pub fn write_frame(dir: &Path, index: u64, image: &RgbaImage) -> LapseResult<PathBuf> {
    let path = frame_path(dir, index);
    if image.width() == 0 || image.height() == 0 {
        return Err(LapseError::frame_write(&path, "image has zero dimension"));
    }

    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageFormat::Png)
        .map_err(|e| LapseError::frame_write(&path, e.to_string()))?;
    fs::write(&path, bytes.into_inner()).map_err(|e| LapseError::frame_write(&path, e.to_string()))?;
    Ok(path)
}

/// Number of `frame<N>.png` files currently present in `dir`.
pub fn count_frames(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.starts_with(FRAME_PREFIX) && name.ends_with(FRAME_EXTENSION)
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel() -> RgbaImage {
        RgbaImage::from_pixel(4, 3, image::Rgba([10, 20, 30, 255]))
    }

    #[test]
    fn test_allocate_creates_unique_dirs_under_root() {
        let root = tempfile::tempdir().unwrap();
        let store = FrameStore::new(root.path());
        let a = store.allocate_session_dir().unwrap();
        let b = store.allocate_session_dir().unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(root.path()));
        assert!(a
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("lapse_images"));
    }

    #[test]
    fn test_write_frame_uses_sequential_names() {
        let root = tempfile::tempdir().unwrap();
        let dir = FrameStore::new(root.path()).allocate_session_dir().unwrap();
        let first = write_frame(dir.path(), 0, &pixel()).unwrap();
        let second = write_frame(dir.path(), 1, &pixel()).unwrap();
        assert_eq!(first.file_name().unwrap(), "frame0.png");
        assert_eq!(second.file_name().unwrap(), "frame1.png");
        assert_eq!(count_frames(dir.path()), 2);

        let decoded = image::open(&first).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (4, 3));
    }

    #[test]
    fn test_pattern_points_into_session_dir() {
        let root = tempfile::tempdir().unwrap();
        let dir = FrameStore::new(root.path()).allocate_session_dir().unwrap();
        let pattern = dir.pattern();
        assert_eq!(pattern.parent().unwrap(), dir.path());
        assert_eq!(pattern.file_name().unwrap(), "frame%d.png");
    }

    #[test]
    fn test_cleanup_removes_directory_and_frames() {
        let root = tempfile::tempdir().unwrap();
        let dir = FrameStore::new(root.path()).allocate_session_dir().unwrap();
        write_frame(dir.path(), 0, &pixel()).unwrap();
        let path = dir.path().to_path_buf();
        dir.cleanup().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_write_into_missing_dir_is_frame_write_error() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("gone");
        let err = write_frame(&missing, 0, &pixel()).unwrap_err();
        assert!(matches!(err, LapseError::FrameWrite { .. }));
    }
}
