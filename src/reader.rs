//! Loading of OME-TIFF hyperstacks.

use crate::stack::FrameStack;
use crate::{PrepError, utils};
use opencv::imgcodecs;
use std::path::{Path, PathBuf};

/// Turns a file into a [`FrameStack`]. Implementations must be shareable
/// between the worker threads of a batch.
pub trait StackReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<FrameStack, PrepError>;
}

/// Reads every page of a (OME-)TIFF file with OpenCV, keeping the bit depth,
/// and splits the pages into `channel_count` channels (XYCZT page order, one
/// z-slice).
#[derive(Debug, Clone, Copy)]
pub struct OmeTiffReader {
    pub channel_count: usize,
}

impl Default for OmeTiffReader {
    fn default() -> Self {
        Self { channel_count: 1 }
    }
}

impl StackReader for OmeTiffReader {
    fn read(&self, path: &Path) -> Result<FrameStack, PrepError> {
        let start = std::time::Instant::now();
        let pages = utils::imreadmulti(path, imgcodecs::IMREAD_UNCHANGED)?;
        let page_count = pages.len();
        let stack = FrameStack::from_pages(pages, self.channel_count)?;
        log::info!(
            "Loaded {} in {:?} - {} pages, shape (t={}, c={}, {}x{})",
            path.display(),
            start.elapsed(),
            page_count,
            stack.time_count(),
            stack.channel_count(),
            stack.width(),
            stack.height()
        );
        Ok(stack)
    }
}

/// True for `*.ome.tif` and `*.ome.tiff`, ignoring case.
pub fn is_ome_tiff(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| {
            let n = n.to_lowercase();
            n.ends_with(".ome.tif") || n.ends_with(".ome.tiff")
        })
        .unwrap_or(false)
}

/// Returns paths to all OME-TIFF files in a single directory (non-recursive),
/// sorted by name.
///
/// Fails with `InputError` if the directory is missing or unreadable.
pub fn collect_stack_files(dir: &Path) -> Result<Vec<PathBuf>, PrepError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| PrepError::InputError(format!("cannot read {}: {}", dir.display(), e)))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry_path(dir, entry))
        .filter(|p| p.is_file() && is_ome_tiff(p))
        .collect();
    files.sort();
    Ok(files)
}

/// Unreadable entries are logged and skipped.
fn entry_path(dir: &Path, entry: std::io::Result<std::fs::DirEntry>) -> Option<PathBuf> {
    match entry {
        Ok(entry) => Some(entry.path()),
        Err(e) => {
            log::warn!("Skipping an entry of {}: {}", dir.display(), e);
            None
        }
    }
}
