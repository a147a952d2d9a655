//! The persistent cache the task history lives in.
//!
//! The engine only needs a directory to keep `tasks.bin` in, a way to learn
//! whether that directory holds trustworthy data, and a commit hook. Anything
//! beyond that (locking, cross-process coordination) belongs to the cache.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufReader;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::error::CacheError;

pub type CacheParameters = BTreeMap<String, String>;

/// A cache directory obtained from a [`CacheRepository`].
pub trait PersistentCache: Send {
    /// Returns `false` when the cache holds no usable data, e.g. it was just
    /// created or was written with different parameters.
    fn is_valid(&self) -> bool;

    fn base_dir(&self) -> &Utf8Path;

    /// Commits the current contents of the cache.
    fn update(&mut self) -> Result<(), CacheError>;
}

/// Looks up persistent caches by owner, name and parameters.
pub trait CacheRepository: Send + Sync {
    fn cache_for(
        &self,
        owner: &str,
        name: &str,
        parameters: &CacheParameters,
    ) -> Result<Box<dyn PersistentCache>, CacheError>;
}

const FILE_PROPERTIES: &str = "cache.properties";

/// A cache repository backed by plain directories under `root`.
///
/// Each cache lives at `<root>/<owner>/<name>`. The parameters it was
/// created with are written to `cache.properties` on every commit, and a
/// cache is valid only when that file exists and matches the lookup.
#[derive(Debug, Clone)]
pub struct DirCacheRepository {
    root: Utf8PathBuf,
}

impl DirCacheRepository {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl CacheRepository for DirCacheRepository {
    fn cache_for(
        &self,
        owner: &str,
        name: &str,
        parameters: &CacheParameters,
    ) -> Result<Box<dyn PersistentCache>, CacheError> {
        let dir = self.root.join(owner).join(name);
        fs::create_dir_all(&dir)?;

        let valid = read_properties(&dir).as_ref() == Some(parameters);
        debug!(dir = %dir, valid, "opened cache");

        Ok(Box::new(DirCache {
            dir,
            parameters: parameters.clone(),
            valid,
        }))
    }
}

fn read_properties(dir: &Utf8Path) -> Option<CacheParameters> {
    let file = File::open(dir.join(FILE_PROPERTIES)).ok()?;
    ciborium::from_reader(BufReader::new(file)).ok()
}

#[derive(Debug)]
pub struct DirCache {
    dir: Utf8PathBuf,
    parameters: CacheParameters,
    valid: bool,
}

impl PersistentCache for DirCache {
    fn is_valid(&self) -> bool {
        self.valid
    }

    fn base_dir(&self) -> &Utf8Path {
        &self.dir
    }

    fn update(&mut self) -> Result<(), CacheError> {
        let file = File::create(self.dir.join(FILE_PROPERTIES))?;
        ciborium::into_writer(&self.parameters, file)?;
        self.valid = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    #[test]
    fn test_new_cache_is_invalid_until_committed() {
        let (_dir, root) = temp();
        let repo = DirCacheRepository::new(&root);
        let params = CacheParameters::new();

        let mut cache = repo.cache_for("build", "taskArtifacts", &params).unwrap();
        assert!(!cache.is_valid());
        assert_eq!(cache.base_dir().as_str(), root.join("build/taskArtifacts").as_str());
        assert!(cache.base_dir().is_dir());

        cache.update().unwrap();
        assert!(cache.is_valid());

        let cache = repo.cache_for("build", "taskArtifacts", &params).unwrap();
        assert!(cache.is_valid());
    }

    #[test]
    fn test_parameter_mismatch_is_invalid() {
        let (_dir, root) = temp();
        let repo = DirCacheRepository::new(&root);

        let mut cache = repo.cache_for("build", "c", &CacheParameters::new()).unwrap();
        cache.update().unwrap();

        let mut params = CacheParameters::new();
        params.insert("version".into(), "2".into());
        let cache = repo.cache_for("build", "c", &params).unwrap();
        assert!(!cache.is_valid());
    }

    #[test]
    fn test_garbage_properties_are_invalid() {
        let (_dir, root) = temp();
        let repo = DirCacheRepository::new(&root);
        fs::create_dir_all(root.join("build/c")).unwrap();
        fs::write(root.join("build/c").join(FILE_PROPERTIES), [0xff, 0x00, 0x13]).unwrap();

        let cache = repo.cache_for("build", "c", &CacheParameters::new()).unwrap();
        assert!(!cache.is_valid());
    }
}
