//! Temp-file spill scope for payloads that must outlive a parse but not a
//! delivery.
//!
//! The receiver allocates one context per run of deliveries, decoders
//! spill into it, and once the upward callback for a delivery that used it
//! completes, the context is dropped and every spilled file goes with it.

use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;

/// An owned scope of spilled payload files.
///
/// The backing directory is created lazily on the first spill and removed,
/// files and all, when the context is dropped.
#[derive(Debug, Default)]
pub struct TempFileContext {
    dir: Mutex<Option<TempDir>>,
    spilled: AtomicUsize,
}

impl TempFileContext {
    /// Create an empty context. No directory is made until the first spill.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `bytes` to a fresh file inside the context.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the directory or file cannot be
    /// created.
    pub fn spill(&self, bytes: &[u8]) -> io::Result<PathBuf> {
        let mut slot = self.dir.lock().unwrap();
        let dir = match &mut *slot {
            Some(dir) => dir,
            empty => empty.insert(
                tempfile::Builder::new()
                    .prefix("messaging-http-")
                    .tempdir()?,
            ),
        };
        let index = self.spilled.fetch_add(1, Ordering::Relaxed);
        let path = dir.path().join(format!("payload-{index}"));
        std::fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Number of files spilled into this context so far.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.spilled.load(Ordering::Relaxed)
    }
}
