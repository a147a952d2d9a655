#![forbid(unsafe_code)]
//! Incremental build avoidance.
//!
//! For every task with declared input and output files, `taskstamp` answers a
//! single question: are the outputs recorded by the last successful execution
//! still valid, so that the task can be skipped?
//!
//! The answer is derived from content fingerprints, never timestamps. The
//! history of every task lives in a single `tasks.bin` file inside a
//! persistent cache, together with an index of which task last produced
//! each output file, so that two tasks writing the same file keep
//! invalidating each other instead of silently sharing it.
//!
//! ```rust,no_run
//! use camino::Utf8PathBuf;
//! use taskstamp::{DirCacheRepository, Task, TaskArtifactStateRepository, TypeTag};
//!
//! struct Compile;
//!
//! impl Task for Compile {
//!     fn path(&self) -> &str {
//!         ":compile"
//!     }
//!
//!     fn type_tag(&self) -> TypeTag {
//!         TypeTag::of::<Self>()
//!     }
//!
//!     fn input_files(&self) -> Vec<Utf8PathBuf> {
//!         vec!["src/main.c".into()]
//!     }
//!
//!     fn output_files(&self) -> Vec<Utf8PathBuf> {
//!         vec!["build/main.o".into()]
//!     }
//! }
//!
//! let repository = TaskArtifactStateRepository::new(DirCacheRepository::new(".cache"));
//! let mut state = repository.state_for(&Compile)?;
//!
//! if !state.is_up_to_date()? {
//!     // run the task, then record its effect
//!     state.update()?;
//! }
//! # Ok::<(), taskstamp::StateError>(())
//! ```

mod cache;
mod core;
mod error;
mod history;
#[cfg(feature = "logging")]
pub mod logging;
mod repository;
mod snapshot;
mod state;
mod store;

pub use crate::cache::{
    CacheParameters, CacheRepository, DirCache, DirCacheRepository, PersistentCache,
};
pub use crate::core::{Hash32, TaskIdentity, TypeTag};
pub use crate::error::*;
pub use crate::history::{ExecutionHistoryRecord, OwnershipIndex, TaskHistory};
pub use crate::repository::{CACHE_NAME, RepositoryOptions, Task, TaskArtifactStateRepository};
pub use crate::snapshot::{Collector, FileKind, FileSnapshot};
pub use crate::state::{Staleness, TaskArtifactState};
pub use crate::store::HistoryStore;
