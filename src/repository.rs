use std::sync::{Arc, Mutex, PoisonError};

use camino::Utf8PathBuf;
use tracing::debug;

use crate::cache::{CacheParameters, CacheRepository};
use crate::core::{TaskIdentity, TypeTag};
use crate::error::CacheError;
use crate::snapshot::Collector;
use crate::state::{self, StoreHandle, TaskArtifactState};
use crate::store::HistoryStore;

/// Name of the persistent cache holding the task history.
pub const CACHE_NAME: &str = "taskArtifacts";

/// The view of a task the engine needs to decide whether it is up to date.
///
/// The engine never mutates a task and never inspects its type beyond the
/// [`TypeTag`] used for identity.
pub trait Task {
    fn path(&self) -> &str;

    fn type_tag(&self) -> TypeTag;

    fn input_files(&self) -> Vec<Utf8PathBuf>;

    fn output_files(&self) -> Vec<Utf8PathBuf>;

    fn identity(&self) -> TaskIdentity {
        TaskIdentity::new(self.path(), self.type_tag())
    }
}

/// Settings for a [`TaskArtifactStateRepository`].
#[derive(Debug, Clone)]
pub struct RepositoryOptions {
    /// Owner of the task history cache, usually one per build invocation.
    pub scope: String,
    /// Fingerprint declared files on the rayon thread pool.
    pub parallel_hashing: bool,
}

impl RepositoryOptions {
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn parallel_hashing(mut self, enabled: bool) -> Self {
        self.parallel_hashing = enabled;
        self
    }
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            scope: "build".into(),
            parallel_hashing: true,
        }
    }
}

/// Entry point of the engine: hands out a [`TaskArtifactState`] per task.
///
/// The history store is opened on the first request and shared by every
/// state handed out afterwards.
pub struct TaskArtifactStateRepository {
    caches: Box<dyn CacheRepository>,
    options: RepositoryOptions,
    store: Mutex<Option<StoreHandle>>,
}

impl TaskArtifactStateRepository {
    pub fn new(caches: impl CacheRepository + 'static) -> Self {
        Self::with_options(caches, RepositoryOptions::default())
    }

    pub fn with_options(caches: impl CacheRepository + 'static, options: RepositoryOptions) -> Self {
        Self {
            caches: Box::new(caches),
            options,
            store: Mutex::new(None),
        }
    }

    /// Returns a fresh state object for `task`.
    pub fn state_for<T>(&self, task: &T) -> Result<TaskArtifactState, CacheError>
    where
        T: Task + ?Sized,
    {
        Ok(TaskArtifactState::new(
            task.identity(),
            task.input_files(),
            task.output_files(),
            self.store()?,
            Collector::new(self.options.parallel_hashing),
        ))
    }

    /// Number of tasks with recorded history.
    pub fn history_len(&self) -> Result<usize, CacheError> {
        let store = self.store()?;
        let len = state::lock(&store).history().len();
        Ok(len)
    }

    fn store(&self) -> Result<StoreHandle, CacheError> {
        let mut slot = self.store.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(store) = slot.as_ref() {
            return Ok(Arc::clone(store));
        }

        let cache = self
            .caches
            .cache_for(&self.options.scope, CACHE_NAME, &CacheParameters::new())?;
        debug!(dir = %cache.base_dir(), "opening task history");

        let store = Arc::new(Mutex::new(HistoryStore::open(cache)));
        *slot = Some(Arc::clone(&store));
        Ok(store)
    }
}
