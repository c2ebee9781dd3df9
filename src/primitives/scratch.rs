use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tempfile::TempDir;

use crate::error::{EngineError, Result};

/// Scoped scratch directory for spill files.
///
/// All spill runs for one engine execution live under a single temporary
/// directory that is removed when the last handle drops, on success and
/// failure paths alike. Total bytes written are tracked against a hard
/// ceiling; exceeding it fails the run rather than exhausting the
/// filesystem.
pub struct ScratchSpace {
    dir: TempDir,
    ceiling_bytes: u64,
    used_bytes: AtomicU64,
    next_file: AtomicU64,
}

impl ScratchSpace {
    /// Creates the scratch directory under `parent` (system temp dir when
    /// `None`) with the given byte ceiling.
    pub fn new(parent: Option<&Path>, ceiling_bytes: u64) -> Result<Self> {
        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                tempfile::Builder::new()
                    .prefix("fraudsift-scratch-")
                    .tempdir_in(parent)?
            }
            None => tempfile::Builder::new()
                .prefix("fraudsift-scratch-")
                .tempdir()?,
        };
        Ok(Self {
            dir,
            ceiling_bytes,
            used_bytes: AtomicU64::new(0),
            next_file: AtomicU64::new(0),
        })
    }

    /// Reserves a unique path for the next spill run file.
    pub fn next_run_path(&self) -> PathBuf {
        let id = self.next_file.fetch_add(1, Ordering::SeqCst);
        self.dir.path().join(format!("run-{id:06}.jsonl"))
    }

    /// Records `bytes` of scratch usage, failing once the ceiling is passed.
    pub fn charge(&self, bytes: u64) -> Result<()> {
        let total = self.used_bytes.fetch_add(bytes, Ordering::SeqCst) + bytes;
        if total > self.ceiling_bytes {
            return Err(EngineError::ScratchExhausted {
                limit_bytes: self.ceiling_bytes,
            });
        }
        Ok(())
    }

    pub fn used_bytes(&self) -> u64 {
        self.used_bytes.load(Ordering::SeqCst)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}
