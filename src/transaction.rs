use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::classify::{classify, EditScope, Reason};
use crate::codec::{Codec, CodecError};
use crate::coerce::{coerce, CoercionError};
use crate::dataset::{Dataset, ElementPath, TagElement, TagId};
use crate::registry::DatasetRegistry;
use crate::storage::{BackupStatus, FileStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackupToken(u64);

impl fmt::Display for BackupToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "edit-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditTransaction {
    pub path: ElementPath,
    pub raw_value: String,
    pub scope: EditScope,
    pub token: BackupToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Proposed,
    Validated,
    BackedUp,
    Committed,
    Rejected,
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Committed,
    Unchanged,
    SkippedAbsent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReport {
    pub token: BackupToken,
    pub path: ElementPath,
    pub value: String,
    pub per_file: Vec<(PathBuf, FileOutcome)>,
    pub backups: Vec<BackupStatus>,
}

impl TransactionReport {
    pub fn count(&self, outcome: FileOutcome) -> usize {
        self.per_file
            .iter()
            .filter(|(_, file_outcome)| *file_outcome == outcome)
            .count()
    }

    /// Backups written by this edit. Files backed up earlier in the session are left out.
    pub fn created_backups(&self) -> Vec<&Path> {
        self.backups
            .iter()
            .filter_map(|status| match status {
                BackupStatus::Created(path) => Some(path.as_path()),
                BackupStatus::Existing(_) => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Another edit is still being saved")]
    Busy,
    #[error("Record {0} does not exist")]
    NoSuchRecord(usize),
    #[error("Tag {0} is not present in the selected record(s)")]
    TagNotFound(ElementPath),
    #[error("Nested element {0} can only be edited in one record at a time")]
    NestedInBulk(ElementPath),
    #[error("Tag {tag} is read-only: {reason}")]
    NotEditable { tag: TagId, reason: Reason },
    #[error("Tag {0} is slice-specific and cannot be edited across all slices")]
    SliceSpecificInBulk(TagId),
    #[error(transparent)]
    InvalidValue(#[from] CoercionError),
}

#[derive(Debug, Error)]
pub enum EditError {
    #[error("Edit rejected: {0}")]
    Rejected(#[from] Rejection),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("Backup of {} failed, nothing was changed: {source}", .path.display())]
    BackupFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Writing {} failed, restored {} file(s): {source}", .failed.display(), .reverted.len())]
    PartialCommit {
        failed: PathBuf,
        reverted: Vec<PathBuf>,
        #[source]
        source: io::Error,
    },
    #[error(
        "Writing {} failed and {} file(s) could not be restored: {}",
        .failed.display(),
        .left_modified.len(),
        list_paths(.left_modified)
    )]
    RollbackIncomplete {
        failed: PathBuf,
        reverted: Vec<PathBuf>,
        left_modified: Vec<PathBuf>,
    },
    #[error("The save worker stopped before reporting a result")]
    WorkerLost,
}

fn list_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug)]
struct PendingWrite {
    index: usize,
    path: PathBuf,
    edited: Arc<Dataset>,
    bytes: Vec<u8>,
}

/// A validated edit with serialized bytes, ready to be written.
#[derive(Debug)]
pub struct PreparedEdit {
    token: BackupToken,
    path: ElementPath,
    value: String,
    writes: Vec<PendingWrite>,
    per_file: Vec<(PathBuf, FileOutcome)>,
}

/// Outcome of a successful [`PreparedEdit::persist`], to be handed back to the manager.
#[derive(Debug)]
pub struct PersistedEdit {
    token: BackupToken,
    path: ElementPath,
    value: String,
    replacements: Vec<(usize, Arc<Dataset>)>,
    per_file: Vec<(PathBuf, FileOutcome)>,
    backups: Vec<BackupStatus>,
}

impl PreparedEdit {
    pub fn token(&self) -> BackupToken {
        self.token
    }

    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    pub fn persist(self, store: &dyn FileStore) -> Result<PersistedEdit, EditError> {
        let token = self.token;

        let mut backups = Vec::with_capacity(self.writes.len());
        for write in &self.writes {
            match store.ensure_backup(&write.path) {
                Ok(status) => backups.push(status),
                Err(source) => {
                    log_phase(token, &self.path, Phase::RolledBack);
                    return Err(EditError::BackupFailed {
                        path: write.path.clone(),
                        source,
                    });
                }
            }
        }
        if !self.writes.is_empty() {
            log_phase(token, &self.path, Phase::BackedUp);
        }

        let mut written: Vec<(PathBuf, Vec<u8>)> = Vec::with_capacity(self.writes.len());
        for write in &self.writes {
            let result = store.read(&write.path).and_then(|snapshot| {
                store.replace(&write.path, &write.bytes)?;
                Ok(snapshot)
            });
            match result {
                Ok(snapshot) => written.push((write.path.clone(), snapshot)),
                Err(source) => {
                    log::warn!("[{token}] Writing {} failed: {source}", write.path.display());
                    let error = roll_back(store, write.path.clone(), &written, source);
                    log_phase(token, &self.path, Phase::RolledBack);
                    return Err(error);
                }
            }
        }

        let replacements = self
            .writes
            .into_iter()
            .map(|write| (write.index, write.edited))
            .collect();
        Ok(PersistedEdit {
            token,
            path: self.path,
            value: self.value,
            replacements,
            per_file: self.per_file,
            backups,
        })
    }
}

fn roll_back(
    store: &dyn FileStore,
    failed: PathBuf,
    written: &[(PathBuf, Vec<u8>)],
    source: io::Error,
) -> EditError {
    let mut reverted = Vec::new();
    let mut left_modified = Vec::new();
    for (path, snapshot) in written.iter().rev() {
        match store.replace(path, snapshot) {
            Ok(()) => reverted.push(path.clone()),
            Err(err) => {
                log::error!("Could not restore {}: {err}", path.display());
                left_modified.push(path.clone());
            }
        }
    }

    if left_modified.is_empty() {
        EditError::PartialCommit {
            failed,
            reverted,
            source,
        }
    } else {
        EditError::RollbackIncomplete {
            failed,
            reverted,
            left_modified,
        }
    }
}

fn log_phase(token: BackupToken, path: &ElementPath, phase: Phase) {
    log::info!("[{token}] {path} {phase:?}");
}

/// Serializes edits: one in flight at a time, registry swapped only after every write lands.
pub struct TransactionManager {
    codec: Arc<dyn Codec>,
    next_token: u64,
    in_flight: Option<BackupToken>,
}

impl TransactionManager {
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        Self {
            codec,
            next_token: 1,
            in_flight: None,
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn propose(
        &mut self,
        path: impl Into<ElementPath>,
        raw_value: &str,
        scope: EditScope,
    ) -> EditTransaction {
        let path = path.into();
        let token = BackupToken(self.next_token);
        self.next_token += 1;
        log_phase(token, &path, Phase::Proposed);
        EditTransaction {
            path,
            raw_value: raw_value.to_string(),
            scope,
            token,
        }
    }

    pub fn begin(
        &mut self,
        registry: &DatasetRegistry,
        transaction: EditTransaction,
    ) -> Result<PreparedEdit, EditError> {
        if self.in_flight.is_some() {
            log_phase(transaction.token, &transaction.path, Phase::Rejected);
            return Err(Rejection::Busy.into());
        }

        match self.prepare(registry, &transaction) {
            Ok(prepared) => {
                log_phase(transaction.token, &transaction.path, Phase::Validated);
                self.in_flight = Some(transaction.token);
                Ok(prepared)
            }
            Err(err) => {
                log_phase(transaction.token, &transaction.path, Phase::Rejected);
                log::warn!("[{}] {err}", transaction.token);
                Err(err)
            }
        }
    }

    pub fn finish(
        &mut self,
        registry: &mut DatasetRegistry,
        outcome: Result<PersistedEdit, EditError>,
    ) -> Result<TransactionReport, EditError> {
        self.in_flight = None;
        let persisted = outcome?;

        registry.replace(persisted.replacements);
        log_phase(persisted.token, &persisted.path, Phase::Committed);
        Ok(TransactionReport {
            token: persisted.token,
            path: persisted.path,
            value: persisted.value,
            per_file: persisted.per_file,
            backups: persisted.backups,
        })
    }

    pub fn apply(
        &mut self,
        registry: &mut DatasetRegistry,
        store: &dyn FileStore,
        transaction: EditTransaction,
    ) -> Result<TransactionReport, EditError> {
        let prepared = self.begin(registry, transaction)?;
        let outcome = prepared.persist(store);
        self.finish(registry, outcome)
    }

    fn prepare(
        &self,
        registry: &DatasetRegistry,
        transaction: &EditTransaction,
    ) -> Result<PreparedEdit, EditError> {
        let path = &transaction.path;
        let tag = path.tag;
        let candidates: Vec<usize> = match transaction.scope {
            EditScope::Single(index) => {
                if registry.get(index).is_none() {
                    return Err(Rejection::NoSuchRecord(index).into());
                }
                vec![index]
            }
            // Item positions are per record, so a nested path names one element.
            EditScope::Bulk if path.is_nested() => {
                return Err(Rejection::NestedInBulk(path.clone()).into());
            }
            EditScope::Bulk => (0..registry.len()).collect(),
        };

        let mut per_file = Vec::with_capacity(candidates.len());
        let mut targets = Vec::new();
        for index in candidates {
            let Some(dataset) = registry.get(index) else {
                continue;
            };
            match dataset.element_at(path) {
                Some(element) => targets.push((index, Arc::clone(dataset), element.vr)),
                None => {
                    let path = dataset.path().to_path_buf();
                    per_file.push((index, path, FileOutcome::SkippedAbsent));
                }
            }
        }
        if targets.is_empty() {
            return Err(Rejection::TagNotFound(path.clone()).into());
        }

        for (_, _, vr) in &targets {
            let classification = classify(tag, *vr, transaction.scope);
            if !classification.editable {
                let rejection = match classification.reason {
                    Reason::SliceSpecificInBulk => Rejection::SliceSpecificInBulk(tag),
                    reason => Rejection::NotEditable { tag, reason },
                };
                return Err(rejection.into());
            }
        }

        let mut value = None;
        let mut writes = Vec::new();
        for (index, dataset, vr) in targets {
            let coerced = coerce(vr, &transaction.raw_value).map_err(Rejection::from)?;
            let current = dataset.element_at(path).and_then(TagElement::normalized);
            if current.as_deref() == Some(coerced.as_str()) {
                per_file.push((index, dataset.path().to_path_buf(), FileOutcome::Unchanged));
            } else {
                let edited = self.codec.with_value(&dataset, path, vr, &coerced)?;
                let bytes = self.codec.serialize(&edited)?;
                per_file.push((index, dataset.path().to_path_buf(), FileOutcome::Committed));
                writes.push(PendingWrite {
                    index,
                    path: dataset.path().to_path_buf(),
                    edited: Arc::new(edited),
                    bytes,
                });
            }
            value.get_or_insert(coerced);
        }

        per_file.sort_by_key(|(index, _, _)| *index);
        Ok(PreparedEdit {
            token: transaction.token,
            path: path.clone(),
            value: value.unwrap_or_default(),
            writes,
            per_file: per_file
                .into_iter()
                .map(|(_, path, outcome)| (path, outcome))
                .collect(),
        })
    }
}
