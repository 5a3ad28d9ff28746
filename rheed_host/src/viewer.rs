//! Image display collaborator.

use std::path::Path;
use tracing::info;

/// Shows a captured image to the operator.
///
/// `show` must return once the image is on screen; the session sends
/// `READY` right after.
pub trait Viewer: Send + Sync {
    fn show(&self, image: &Path) -> std::io::Result<()>;
}

/// Viewer that only records the image in the log, for headless hosts.
#[derive(Debug, Default)]
pub struct LogViewer;

impl Viewer for LogViewer {
    fn show(&self, image: &Path) -> std::io::Result<()> {
        info!(image = %image.display(), "Image ready for review");
        Ok(())
    }
}
