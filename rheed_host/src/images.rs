//! Captured image source.
//!
//! The camera drops files into one directory. The most recently modified
//! file is the current capture; a new capture is detected when either the
//! newest path or its modification time changes.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// Most recently modified regular file in `dir`.
///
/// A missing directory counts as empty.
pub async fn most_recent_image(dir: &Path) -> io::Result<Option<(PathBuf, SystemTime)>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Image directory {} does not exist yet", dir.display());
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    let mut newest: Option<(PathBuf, SystemTime)> = None;
    while let Some(entry) = entries.next_entry().await? {
        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified()?;
        if newest.as_ref().is_none_or(|(_, t)| modified > *t) {
            newest = Some((entry.path(), modified));
        }
    }
    Ok(newest)
}

/// Reports each new capture once.
#[derive(Debug)]
pub struct ImageWatcher {
    dir: PathBuf,
    last: Option<(PathBuf, SystemTime)>,
}

impl ImageWatcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            last: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the last capture reported.
    pub fn current(&self) -> Option<&Path> {
        self.last.as_ref().map(|(p, _)| p.as_path())
    }

    /// Return the newest capture if it has not been reported yet.
    pub async fn poll(&mut self) -> io::Result<Option<PathBuf>> {
        let Some(newest) = most_recent_image(&self.dir).await? else {
            return Ok(None);
        };
        if self.last.as_ref() == Some(&newest) {
            return Ok(None);
        }
        let path = newest.0.clone();
        self.last = Some(newest);
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::time::Duration;

    fn touch(path: &Path, age_secs: u64) {
        let file = File::create(path).unwrap();
        let t = SystemTime::now() - Duration::from_secs(age_secs);
        file.set_modified(t).unwrap();
    }

    #[tokio::test]
    async fn picks_newest_file_and_skips_dirs() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("old.png"), 60);
        touch(&dir.path().join("new.png"), 1);
        fs::create_dir(dir.path().join("subdir")).unwrap();

        let (path, _) = most_recent_image(dir.path()).await.unwrap().unwrap();
        assert_eq!(path.file_name().unwrap(), "new.png");
    }

    #[tokio::test]
    async fn missing_or_empty_dir_has_no_image() {
        let dir = tempfile::tempdir().unwrap();
        assert!(most_recent_image(dir.path()).await.unwrap().is_none());
        assert!(
            most_recent_image(&dir.path().join("absent"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn watcher_reports_each_capture_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = ImageWatcher::new(dir.path());
        assert!(watcher.poll().await.unwrap().is_none());

        touch(&dir.path().join("a.png"), 30);
        assert!(watcher.poll().await.unwrap().is_some());
        assert!(watcher.poll().await.unwrap().is_none());

        // Same name rewritten by a retake.
        touch(&dir.path().join("a.png"), 0);
        let again = watcher.poll().await.unwrap().unwrap();
        assert_eq!(again.file_name().unwrap(), "a.png");
        assert_eq!(watcher.current(), Some(again.as_path()));
    }
}
