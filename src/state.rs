use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};

use crate::core::TaskIdentity;
use crate::error::{SnapshotError, StateError, StoreError};
use crate::history::ExecutionHistoryRecord;
use crate::snapshot::{Collector, FileKind, FileSnapshot};
use crate::store::HistoryStore;

/// Shared handle to the history store.
///
/// The lock is the single critical section every query, invalidation and
/// update of the shared history goes through.
pub(crate) type StoreHandle = Arc<Mutex<HistoryStore>>;

pub(crate) fn lock(store: &StoreHandle) -> MutexGuard<'_, HistoryStore> {
    // Every fallible step happens before the store is touched, so a poisoned
    // lock can't hold a half-applied update.
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The reason a task can't be skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    /// The task declares no input files.
    NoInputs,
    /// The task declares no output files.
    NoOutputs,
    /// The task history was explicitly invalidated.
    Invalidated,
    /// No history has been recorded for this task.
    NoHistory,
    /// Output paths were added or removed since the last execution.
    OutputSetChanged,
    /// An output file was last produced by another task.
    OutputOwnedBy {
        path: Utf8PathBuf,
        owner: TaskIdentity,
    },
    /// An output was removed, changed kind, or changed content.
    OutputChanged { path: Utf8PathBuf },
    /// Input paths were added or removed since the last execution.
    InputSetChanged,
    /// An input was removed, changed kind, or changed content.
    InputChanged { path: Utf8PathBuf },
}

impl Display for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Staleness::NoInputs => write!(f, "task has no declared inputs"),
            Staleness::NoOutputs => write!(f, "task has no declared outputs"),
            Staleness::Invalidated => write!(f, "task history was invalidated"),
            Staleness::NoHistory => write!(f, "no history is available for task"),
            Staleness::OutputSetChanged => write!(f, "set of output files has changed"),
            Staleness::OutputOwnedBy { path, owner } => {
                write!(f, "output file {path} was last produced by {owner}")
            }
            Staleness::OutputChanged { path } => write!(f, "output file {path} has changed"),
            Staleness::InputSetChanged => write!(f, "set of input files has changed"),
            Staleness::InputChanged { path } => write!(f, "input file {path} has changed"),
        }
    }
}

/// The up-to-date state of one task for one build.
///
/// States are cheap to obtain and are not shared: the history lives in the
/// store, so an invalidation made through one state is seen by every state
/// obtained afterwards.
pub struct TaskArtifactState {
    identity: TaskIdentity,
    inputs: Vec<Utf8PathBuf>,
    outputs: Vec<Utf8PathBuf>,
    store: StoreHandle,
    collector: Collector,
    invalidated: bool,
}

impl TaskArtifactState {
    pub(crate) fn new(
        identity: TaskIdentity,
        inputs: Vec<Utf8PathBuf>,
        outputs: Vec<Utf8PathBuf>,
        store: StoreHandle,
        collector: Collector,
    ) -> Self {
        Self {
            identity,
            inputs,
            outputs,
            store,
            collector,
            invalidated: false,
        }
    }

    pub fn identity(&self) -> &TaskIdentity {
        &self.identity
    }

    /// Returns `true` when the recorded outputs of the task are still valid
    /// and its execution can be skipped.
    pub fn is_up_to_date(&self) -> Result<bool, SnapshotError> {
        match self.out_of_date_reason()? {
            Some(reason) => {
                info!(task = %self.identity, "not up to date: {reason}");
                Ok(false)
            }
            None => {
                debug!(task = %self.identity, "up to date");
                Ok(true)
            }
        }
    }

    /// Returns the first reason the task is out of date, or `None` when it is
    /// up to date. Has no side effects.
    pub fn out_of_date_reason(&self) -> Result<Option<Staleness>, SnapshotError> {
        if self.inputs.is_empty() {
            return Ok(Some(Staleness::NoInputs));
        }
        if self.outputs.is_empty() {
            return Ok(Some(Staleness::NoOutputs));
        }
        if self.invalidated {
            return Ok(Some(Staleness::Invalidated));
        }

        let store = lock(&self.store);

        let Some(record) = store.history().record(&self.identity) else {
            return Ok(Some(Staleness::NoHistory));
        };

        let outputs = self.collector.snapshot(&self.outputs)?;
        let inputs = self.collector.snapshot(&self.inputs)?;

        let recorded = by_path(&record.outputs);
        if !same_paths(&outputs, &recorded) {
            return Ok(Some(Staleness::OutputSetChanged));
        }

        for output in outputs.iter().filter(|o| !o.kind.is_directory()) {
            match store.owner_of(&output.path) {
                Some(owner) if *owner != self.identity => {
                    return Ok(Some(Staleness::OutputOwnedBy {
                        path: output.path.clone(),
                        owner: owner.clone(),
                    }));
                }
                _ => {}
            }
        }

        if let Some(path) = first_changed(&outputs, &recorded) {
            return Ok(Some(Staleness::OutputChanged { path }));
        }

        let recorded = by_path(&record.inputs);
        if !same_paths(&inputs, &recorded) {
            return Ok(Some(Staleness::InputSetChanged));
        }

        if let Some(path) = first_changed(&inputs, &recorded) {
            return Ok(Some(Staleness::InputChanged { path }));
        }

        Ok(None)
    }

    /// Drops the recorded history of the task.
    ///
    /// This state reports the task as out of date until [`update`](Self::update)
    /// is called, as does every state obtained later for the same task.
    pub fn invalidate(&mut self) -> Result<(), StoreError> {
        self.invalidated = true;

        let mut store = lock(&self.store);
        store.forget(&self.identity);
        store.persist()
    }

    /// Records the current inputs and outputs as the result of a successful
    /// execution and takes ownership of the output files.
    pub fn update(&mut self) -> Result<(), StateError> {
        let inputs = self.collector.snapshot(&self.inputs)?;
        let outputs = self.collector.snapshot(&self.outputs)?;

        lock(&self.store).commit(ExecutionHistoryRecord {
            identity: self.identity.clone(),
            inputs,
            outputs,
        })?;
        self.invalidated = false;

        debug!(task = %self.identity, "recorded task history");
        Ok(())
    }
}

fn by_path(snapshots: &[FileSnapshot]) -> BTreeMap<&Utf8Path, FileKind> {
    snapshots
        .iter()
        .map(|s| (s.path.as_path(), s.kind))
        .collect()
}

fn same_paths(current: &[FileSnapshot], recorded: &BTreeMap<&Utf8Path, FileKind>) -> bool {
    let current: BTreeSet<&Utf8Path> = current.iter().map(|s| s.path.as_path()).collect();
    current.len() == recorded.len() && current.iter().all(|path| recorded.contains_key(path))
}

fn first_changed(
    current: &[FileSnapshot],
    recorded: &BTreeMap<&Utf8Path, FileKind>,
) -> Option<Utf8PathBuf> {
    current
        .iter()
        .find(|s| recorded.get(s.path.as_path()) != Some(&s.kind))
        .map(|s| s.path.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::core::{Hash32, TypeTag};

    fn snap(path: &str, kind: FileKind) -> FileSnapshot {
        FileSnapshot {
            path: path.into(),
            kind,
        }
    }

    #[test]
    fn test_same_paths_ignores_order_and_duplicates() {
        let recorded = [
            snap("a", FileKind::Missing),
            snap("b", FileKind::Directory),
        ];
        let recorded = by_path(&recorded);

        let current = [
            snap("b", FileKind::Directory),
            snap("a", FileKind::Missing),
            snap("a", FileKind::Missing),
        ];
        assert!(same_paths(&current, &recorded));

        let current = [snap("a", FileKind::Missing)];
        assert!(!same_paths(&current, &recorded));

        let current = [
            snap("a", FileKind::Missing),
            snap("c", FileKind::Directory),
        ];
        assert!(!same_paths(&current, &recorded));
    }

    #[test]
    fn test_first_changed_compares_kind_and_fingerprint() {
        let recorded = [
            snap("a", FileKind::RegularFile(Hash32::hash("a"))),
            snap("b", FileKind::Directory),
        ];
        let recorded = by_path(&recorded);

        let current = [
            snap("a", FileKind::RegularFile(Hash32::hash("a"))),
            snap("b", FileKind::Directory),
        ];
        assert_eq!(first_changed(&current, &recorded), None);

        let current = [
            snap("a", FileKind::RegularFile(Hash32::hash("changed"))),
            snap("b", FileKind::Directory),
        ];
        assert_eq!(first_changed(&current, &recorded), Some("a".into()));

        let current = [
            snap("a", FileKind::RegularFile(Hash32::hash("a"))),
            snap("b", FileKind::Missing),
        ];
        assert_eq!(first_changed(&current, &recorded), Some("b".into()));
    }

    #[test]
    fn test_staleness_display() {
        let owner = TaskIdentity::new(":other", TypeTag::new("Default"));
        let reason = Staleness::OutputOwnedBy {
            path: "build/out.txt".into(),
            owner,
        };
        assert_eq!(
            reason.to_string(),
            "output file build/out.txt was last produced by :other (Default)"
        );
        assert_eq!(
            Staleness::InputChanged { path: "in.txt".into() }.to_string(),
            "input file in.txt has changed"
        );
    }
}
