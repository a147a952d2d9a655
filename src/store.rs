use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::PersistentCache;
use crate::core::TaskIdentity;
use crate::error::StoreError;
use crate::history::{ExecutionHistoryRecord, TaskHistory};

const FILE_TASKS: &str = "tasks.bin";
const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct EncodedRef<'a> {
    version: u32,
    history: &'a TaskHistory,
}

#[derive(Deserialize)]
struct Encoded {
    version: u32,
    history: TaskHistory,
}

/// Owns the task history and writes it back to the persistent cache.
///
/// The history is read once when the store is opened. From then on the
/// in-memory copy is authoritative and every [`persist`](Self::persist)
/// replaces `tasks.bin` as a whole.
pub struct HistoryStore {
    cache: Box<dyn PersistentCache>,
    history: TaskHistory,
}

impl HistoryStore {
    /// Opens the store on top of `cache`.
    ///
    /// An invalid cache, a missing data file, or data which can't be decoded
    /// all produce an empty history.
    pub fn open(cache: Box<dyn PersistentCache>) -> Self {
        let history = if cache.is_valid() {
            load(&cache.base_dir().join(FILE_TASKS))
        } else {
            debug!(dir = %cache.base_dir(), "cache is not valid, starting with empty task history");
            TaskHistory::default()
        };

        Self { cache, history }
    }

    pub fn history(&self) -> &TaskHistory {
        &self.history
    }

    pub fn owner_of(&self, path: &Utf8Path) -> Option<&TaskIdentity> {
        self.history.owners().owner_of(path)
    }

    /// Records a task execution and persists it.
    ///
    /// The new history is written before it replaces the in-memory copy, so a
    /// failed write leaves both the record and the ownership index untouched.
    pub(crate) fn commit(&mut self, record: ExecutionHistoryRecord) -> Result<(), StoreError> {
        let mut candidate = self.history.clone();
        candidate.commit(record);
        self.write(&candidate)?;
        self.history = candidate;
        Ok(())
    }

    pub(crate) fn forget(&mut self, identity: &TaskIdentity) {
        if self.history.forget(identity).is_some() {
            debug!(task = %identity, "forgot task history");
        }
    }

    /// Writes the history to `tasks.bin` and commits the cache.
    ///
    /// The file is written next to its final location and renamed over it,
    /// so readers only ever observe a complete history.
    pub fn persist(&mut self) -> Result<(), StoreError> {
        let history = std::mem::take(&mut self.history);
        let result = self.write(&history);
        self.history = history;
        result
    }

    fn write(&mut self, history: &TaskHistory) -> Result<(), StoreError> {
        let s = Instant::now();
        let path = self.data_file();
        let temp = path.with_extension("bin.tmp");

        {
            let mut writer = BufWriter::new(File::create(&temp)?);
            let encoded = EncodedRef {
                version: FORMAT_VERSION,
                history,
            };
            ciborium::into_writer(&encoded, &mut writer)?;
            writer.flush()?;
        }

        fs::rename(&temp, &path)?;
        self.cache.update()?;

        debug!(
            records = history.len(),
            elapsed = ?s.elapsed(),
            "saved task history"
        );

        Ok(())
    }

    pub fn data_file(&self) -> Utf8PathBuf {
        self.cache.base_dir().join(FILE_TASKS)
    }
}

fn load(path: &Utf8Path) -> TaskHistory {
    let s = Instant::now();

    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return TaskHistory::default(),
        Err(e) => {
            warn!(path = %path, "couldn't open task history, discarding it: {e}");
            return TaskHistory::default();
        }
    };

    match ciborium::from_reader::<Encoded, _>(BufReader::new(file)) {
        Ok(encoded) if encoded.version == FORMAT_VERSION => {
            debug!(
                records = encoded.history.len(),
                elapsed = ?s.elapsed(),
                "loaded task history"
            );
            encoded.history
        }
        Ok(encoded) => {
            warn!(
                path = %path,
                version = encoded.version,
                "task history has unsupported format version, discarding it"
            );
            TaskHistory::default()
        }
        Err(e) => {
            warn!(path = %path, "task history is corrupt, discarding it: {e}");
            TaskHistory::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheParameters, CacheRepository, DirCacheRepository};
    use crate::core::{Hash32, TypeTag};
    use crate::snapshot::{FileKind, FileSnapshot};

    fn temp() -> (tempfile::TempDir, DirCacheRepository) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, DirCacheRepository::new(root))
    }

    fn open(repo: &DirCacheRepository) -> HistoryStore {
        let cache = repo
            .cache_for("build", "taskArtifacts", &CacheParameters::new())
            .unwrap();
        HistoryStore::open(cache)
    }

    fn record(path: &str) -> ExecutionHistoryRecord {
        ExecutionHistoryRecord {
            identity: TaskIdentity::new(path, TypeTag::new("Default")),
            inputs: vec![FileSnapshot {
                path: "in.txt".into(),
                kind: FileKind::RegularFile(Hash32::hash("in")),
            }],
            outputs: vec![
                FileSnapshot {
                    path: "out.txt".into(),
                    kind: FileKind::RegularFile(Hash32::hash("out")),
                },
                FileSnapshot {
                    path: "out".into(),
                    kind: FileKind::Directory,
                },
            ],
        }
    }

    #[test]
    fn test_persist_and_reload() {
        let (_dir, repo) = temp();

        let mut store = open(&repo);
        assert!(store.history().is_empty());
        store.commit(record(":a")).unwrap();
        store.commit(record(":b")).unwrap();
        assert!(store.data_file().is_file());

        let store = open(&repo);
        assert_eq!(store.history().len(), 2);
        assert_eq!(store.history().record(&record(":a").identity), Some(&record(":a")));
        assert_eq!(
            store.owner_of(Utf8Path::new("out.txt")),
            Some(&record(":b").identity)
        );
    }

    #[test]
    fn test_corrupt_history_is_discarded() {
        let (_dir, repo) = temp();

        let mut store = open(&repo);
        store.commit(record(":a")).unwrap();
        fs::write(store.data_file(), b"definitely not cbor").unwrap();

        let store = open(&repo);
        assert!(store.history().is_empty());
    }

    #[test]
    fn test_unknown_version_is_discarded() {
        let (_dir, repo) = temp();

        let mut store = open(&repo);
        store.commit(record(":a")).unwrap();

        let file = File::create(store.data_file()).unwrap();
        let encoded = EncodedRef {
            version: FORMAT_VERSION + 1,
            history: store.history(),
        };
        ciborium::into_writer(&encoded, file).unwrap();

        let store = open(&repo);
        assert!(store.history().is_empty());
    }

    #[test]
    fn test_invalid_cache_ignores_data_file() {
        let (_dir, repo) = temp();

        let mut store = open(&repo);
        store.commit(record(":a")).unwrap();

        let mut params = CacheParameters::new();
        params.insert("layout".into(), "other".into());
        let cache = repo.cache_for("build", "taskArtifacts", &params).unwrap();
        let store = HistoryStore::open(cache);
        assert!(store.history().is_empty());
    }

    #[test]
    fn test_failed_commit_keeps_previous_history() {
        let (dir, repo) = temp();

        let mut store = open(&repo);
        store.commit(record(":a")).unwrap();
        fs::remove_dir_all(dir.path().join("build")).unwrap();

        assert!(matches!(store.commit(record(":b")), Err(StoreError::Io(_))));

        assert_eq!(store.history().len(), 1);
        assert!(store.history().record(&record(":b").identity).is_none());
        assert_eq!(
            store.owner_of(Utf8Path::new("out.txt")),
            Some(&record(":a").identity)
        );
    }

    #[test]
    fn test_forget_then_persist() {
        let (_dir, repo) = temp();

        let mut store = open(&repo);
        store.commit(record(":a")).unwrap();
        store.forget(&record(":a").identity);
        store.persist().unwrap();

        let store = open(&repo);
        assert!(store.history().record(&record(":a").identity).is_none());
    }
}
