use log::info;
use std::path::{Path, PathBuf};

use crate::constants::{AUDIO_DIR, DATA_FILE, IMAGE_DIR, TEXT_DIR, VIDEO_DIR};
use crate::error::{ArchiveError, ArchiveResult};

/// Locations of the four content directories and the submission log
#[derive(Debug, Clone)]
pub struct StoragePaths {
    pub root: PathBuf,
    pub audio_dir: PathBuf,
    pub video_dir: PathBuf,
    pub text_dir: PathBuf,
    pub image_dir: PathBuf,
    pub data_file: PathBuf,
}

impl StoragePaths {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            audio_dir: root.join(AUDIO_DIR),
            video_dir: root.join(VIDEO_DIR),
            text_dir: root.join(TEXT_DIR),
            image_dir: root.join(IMAGE_DIR),
            data_file: root.join(DATA_FILE),
            root,
        }
    }

    /// Resolve paths under `root` and create the content directories
    pub fn prepare(root: impl AsRef<Path>) -> ArchiveResult<Self> {
        let paths = Self::new(root);
        paths.ensure_dirs()?;
        Ok(paths)
    }

    /// Create any missing content directory. Existing directories are left alone.
    pub fn ensure_dirs(&self) -> ArchiveResult<()> {
        for dir in self.content_dirs() {
            std::fs::create_dir_all(dir).map_err(|e| ArchiveError::io(dir, e))?;
        }
        info!("Content directories ready under {}", self.root.display());
        Ok(())
    }

    pub fn content_dirs(&self) -> [&Path; 4] {
        [
            &self.audio_dir,
            &self.video_dir,
            &self.text_dir,
            &self.image_dir,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_is_idempotent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let paths = StoragePaths::prepare(temp_dir.path()).unwrap();
        std::fs::write(paths.audio_dir.join("keep.wav"), b"data").unwrap();

        let again = StoragePaths::prepare(temp_dir.path()).unwrap();
        for dir in again.content_dirs() {
            assert!(dir.is_dir());
        }
        assert!(again.audio_dir.join("keep.wav").exists());
        assert!(!again.data_file.exists());
        assert!(again.data_file.ends_with("submissions.csv"));
    }
}
