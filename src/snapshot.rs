//! Point-in-time view of declared task files.
//!
//! A snapshot records the kind of every declared path and, for regular files,
//! a BLAKE3 fingerprint of the content. Directories are tracked by kind only;
//! their contents are not walked.

use std::fs;
use std::io::ErrorKind;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

use crate::core::Hash32;
use crate::error::SnapshotError;

/// What was found at a declared path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    /// Nothing exists at the path.
    Missing,
    /// A regular file with the given content fingerprint.
    RegularFile(Hash32),
    /// A directory. Its contents are not part of the snapshot.
    Directory,
}

impl FileKind {
    pub fn fingerprint(&self) -> Option<Hash32> {
        match self {
            FileKind::RegularFile(hash) => Some(*hash),
            _ => None,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, FileKind::Directory)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub path: Utf8PathBuf,
    pub kind: FileKind,
}

impl FileSnapshot {
    /// Captures the current state of a single path.
    ///
    /// A path that vanishes between the stat and the content read is reported
    /// as [`FileKind::Missing`]. Any other I/O failure is an error.
    ///
    /// Paths which are neither regular files nor directories (FIFOs, sockets,
    /// devices) are reported as [`SnapshotError::Unreadable`]: they have no
    /// stable content to fingerprint, and reading a FIFO would block.
    pub fn capture(path: &Utf8Path) -> Result<Self, SnapshotError> {
        let kind = match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => FileKind::Directory,
            Ok(meta) if meta.is_file() => match Hash32::hash_file(path) {
                Ok(hash) => FileKind::RegularFile(hash),
                Err(e) if is_gone(&e) => FileKind::Missing,
                Err(source) => return Err(unreadable(path, source)),
            },
            Ok(_) => {
                let source = std::io::Error::other("not a regular file or directory");
                return Err(unreadable(path, source));
            }
            Err(e) if is_gone(&e) => FileKind::Missing,
            Err(source) => return Err(unreadable(path, source)),
        };

        Ok(Self {
            path: path.to_owned(),
            kind,
        })
    }
}

fn is_gone(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory)
}

fn unreadable(path: &Utf8Path, source: std::io::Error) -> SnapshotError {
    SnapshotError::Unreadable {
        path: path.to_owned(),
        source,
    }
}

/// Produces one [`FileSnapshot`] per declared path, in declaration order.
#[derive(Debug, Clone, Copy)]
pub struct Collector {
    parallel: bool,
}

impl Collector {
    pub fn new(parallel: bool) -> Self {
        Self { parallel }
    }

    pub fn snapshot(&self, paths: &[Utf8PathBuf]) -> Result<Vec<FileSnapshot>, SnapshotError> {
        if self.parallel {
            paths
                .par_iter()
                .map(|path| FileSnapshot::capture(path))
                .collect()
        } else {
            paths
                .iter()
                .map(|path| FileSnapshot::capture(path))
                .collect()
        }
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new(true)
    }
}
