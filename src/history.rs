use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::core::TaskIdentity;
use crate::snapshot::FileSnapshot;

/// What a task looked like the last time it completed successfully.
///
/// Records are replaced wholesale on every update and never edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionHistoryRecord {
    pub identity: TaskIdentity,
    pub inputs: Vec<FileSnapshot>,
    pub outputs: Vec<FileSnapshot>,
}

/// Maps each produced output path to the task which produced it last.
///
/// Only non-directory outputs are owned. Several tasks may declare the same
/// output directory, but a file path belongs to exactly one task at a time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipIndex {
    owners: BTreeMap<Utf8PathBuf, TaskIdentity>,
}

impl OwnershipIndex {
    pub fn owner_of(&self, path: &Utf8Path) -> Option<&TaskIdentity> {
        self.owners.get(path)
    }

    /// Claims every non-directory output for `identity`, overwriting any
    /// previous owner.
    pub(crate) fn claim(&mut self, identity: &TaskIdentity, outputs: &[FileSnapshot]) {
        for output in outputs.iter().filter(|o| !o.kind.is_directory()) {
            self.owners.insert(output.path.clone(), identity.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

/// The full persisted unit: every record plus the ownership index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHistory {
    pub(crate) records: BTreeMap<TaskIdentity, ExecutionHistoryRecord>,
    pub(crate) owners: OwnershipIndex,
}

impl TaskHistory {
    pub fn record(&self, identity: &TaskIdentity) -> Option<&ExecutionHistoryRecord> {
        self.records.get(identity)
    }

    pub fn owners(&self) -> &OwnershipIndex {
        &self.owners
    }

    /// Replaces the record for the task and claims its outputs.
    pub(crate) fn commit(&mut self, record: ExecutionHistoryRecord) {
        self.owners.claim(&record.identity, &record.outputs);
        self.records.insert(record.identity.clone(), record);
    }

    pub(crate) fn forget(&mut self, identity: &TaskIdentity) -> Option<ExecutionHistoryRecord> {
        self.records.remove(identity)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
