use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use thiserror::Error;

use crate::codec::Codec;
use crate::dataset::Dataset;
use crate::storage::{BACKUP_SUFFIX, TEMP_PREFIX};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Path not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("No candidate files in {}", .0.display())]
    Empty(PathBuf),
    #[error("None of the {attempted} file(s) under {} could be parsed", .path.display())]
    NoRecords { path: PathBuf, attempted: usize },
    #[error("Could not list {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadWarning {
    pub path: PathBuf,
    pub message: String,
}

pub struct LoadReport {
    pub registry: DatasetRegistry,
    pub warnings: Vec<LoadWarning>,
    pub source: PathBuf,
}

/// Loaded records in display order, with a revision per slot.
#[derive(Debug, Clone, Default)]
pub struct DatasetRegistry {
    datasets: Vec<Arc<Dataset>>,
    revisions: Vec<u64>,
}

impl DatasetRegistry {
    pub fn from_datasets(mut datasets: Vec<Dataset>) -> Self {
        datasets.sort_by(|a, b| {
            a.slice_index()
                .cmp(&b.slice_index())
                .then_with(|| a.file_name().cmp(&b.file_name()))
        });
        let revisions = vec![0; datasets.len()];
        Self {
            datasets: datasets.into_iter().map(Arc::new).collect(),
            revisions,
        }
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Dataset>> {
        self.datasets.get(index)
    }

    pub fn datasets(&self) -> &[Arc<Dataset>] {
        &self.datasets
    }

    pub fn revision(&self, index: usize) -> u64 {
        self.revisions.get(index).copied().unwrap_or(0)
    }

    /// Sum of slot revisions; changes whenever any slot is replaced.
    pub fn generation(&self) -> u64 {
        self.revisions.iter().sum()
    }

    /// Swaps in edited datasets. Order is preserved and each replaced slot's revision bumps.
    pub(crate) fn replace(&mut self, replacements: Vec<(usize, Arc<Dataset>)>) {
        for (index, dataset) in replacements {
            if let (Some(slot), Some(revision)) =
                (self.datasets.get_mut(index), self.revisions.get_mut(index))
            {
                *slot = dataset;
                *revision += 1;
            }
        }
    }

    pub fn load(
        path: &Path,
        codec: Arc<dyn Codec>,
        workers: usize,
    ) -> Result<LoadReport, LoadError> {
        let candidates = candidate_files(path)?;
        let attempted = candidates.len();
        let worker_count = workers.clamp(1, 32).min(attempted.max(1));
        log::info!(
            "Loading {attempted} candidate file(s) from {} with {worker_count} worker(s)",
            path.display()
        );

        let candidates = Arc::new(candidates);
        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let candidates = Arc::clone(&candidates);
            let codec = Arc::clone(&codec);
            handles.push(thread::spawn(move || {
                (worker_id..candidates.len())
                    .step_by(worker_count)
                    .map(|index| {
                        let path = &candidates[index];
                        let parsed = fs::read(path)
                            .map_err(|err| LoadWarning {
                                path: path.clone(),
                                message: format!("Could not read {}: {err}", path.display()),
                            })
                            .and_then(|bytes| {
                                codec.parse(path, &bytes).map_err(|err| LoadWarning {
                                    path: path.clone(),
                                    message: err.to_string(),
                                })
                            });
                        (index, parsed)
                    })
                    .collect::<Vec<_>>()
            }));
        }

        let mut results = Vec::with_capacity(attempted);
        let mut warnings = Vec::new();
        for (worker_id, handle) in handles.into_iter().enumerate() {
            match handle.join() {
                Ok(batch) => results.extend(batch),
                Err(_) => {
                    for index in (worker_id..attempted).step_by(worker_count) {
                        warnings.push(LoadWarning {
                            path: candidates[index].clone(),
                            message: format!("Parser worker {worker_id} panicked"),
                        });
                    }
                }
            }
        }
        results.sort_by_key(|(index, _)| *index);

        let mut datasets = Vec::with_capacity(results.len());
        for (_, parsed) in results {
            match parsed {
                Ok(dataset) => datasets.push(dataset),
                Err(warning) => warnings.push(warning),
            }
        }
        for warning in &warnings {
            log::warn!("Skipping {}: {}", warning.path.display(), warning.message);
        }

        if datasets.is_empty() {
            return Err(LoadError::NoRecords {
                path: path.to_path_buf(),
                attempted,
            });
        }

        let registry = Self::from_datasets(datasets);
        log::info!(
            "Loaded {} record(s), {} warning(s)",
            registry.len(),
            warnings.len()
        );
        Ok(LoadReport {
            registry,
            warnings,
            source: path.to_path_buf(),
        })
    }
}

/// Regular files one level deep, excluding our own backup and temp files.
pub fn candidate_files(path: &Path) -> Result<Vec<PathBuf>, LoadError> {
    if !path.exists() {
        return Err(LoadError::NotFound(path.to_path_buf()));
    }
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let entries = fs::read_dir(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut files = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|candidate| candidate.is_file() && !is_own_artifact(candidate))
        .collect::<Vec<_>>();
    files.sort();

    if files.is_empty() {
        return Err(LoadError::Empty(path.to_path_buf()));
    }
    Ok(files)
}

fn is_own_artifact(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    name.ends_with(BACKUP_SUFFIX) || name.starts_with(TEMP_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DicomCodec;
    use crate::fixtures::SliceFixture;

    fn codec() -> Arc<dyn Codec> {
        Arc::new(DicomCodec)
    }

    #[test]
    fn directory_with_one_corrupt_file_loads_the_rest_in_slice_order() {
        let dir = tempfile::tempdir().expect("temp dir");
        SliceFixture::new(3).write_to(dir.path().join("a.dcm"));
        SliceFixture::new(1).write_to(dir.path().join("b.dcm"));
        SliceFixture::new(2).write_to(dir.path().join("c.dcm"));
        fs::write(dir.path().join("d.dcm"), b"not a dicom file").expect("write corrupt");

        let report = DatasetRegistry::load(dir.path(), codec(), 2).expect("loads");

        assert_eq!(report.registry.len(), 3);
        let order = report
            .registry
            .datasets()
            .iter()
            .map(|dataset| dataset.slice_index())
            .collect::<Vec<_>>();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].path.ends_with("d.dcm"));
    }

    #[test]
    fn ties_break_on_file_name() {
        let registry = DatasetRegistry::from_datasets(vec![
            SliceFixture::new(5).dataset("z.dcm"),
            SliceFixture::without_instance_number().dataset("last.dcm"),
            SliceFixture::new(5).dataset("m.dcm"),
        ]);
        let names = registry
            .datasets()
            .iter()
            .map(|dataset| dataset.file_name())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["m.dcm", "z.dcm", "last.dcm"]);
    }

    #[test]
    fn enumeration_skips_backups_and_temp_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        SliceFixture::new(1).write_to(dir.path().join("a.dcm"));
        SliceFixture::new(1).write_to(dir.path().join("a.dcm.bak"));
        fs::write(dir.path().join(".tagscope-123.tmp"), b"partial").expect("write temp");
        fs::create_dir(dir.path().join("nested")).expect("nested dir");

        let files = candidate_files(dir.path()).expect("lists");
        assert_eq!(files, vec![dir.path().join("a.dcm")]);
    }

    #[test]
    fn load_failures_are_distinguished() {
        let dir = tempfile::tempdir().expect("temp dir");
        assert!(matches!(
            DatasetRegistry::load(&dir.path().join("missing"), codec(), 1),
            Err(LoadError::NotFound(_))
        ));
        assert!(matches!(
            DatasetRegistry::load(dir.path(), codec(), 1),
            Err(LoadError::Empty(_))
        ));

        fs::write(dir.path().join("bad.dcm"), b"junk").expect("write");
        assert!(matches!(
            DatasetRegistry::load(dir.path(), codec(), 1),
            Err(LoadError::NoRecords { attempted: 1, .. })
        ));
    }

    #[test]
    fn single_file_path_is_accepted() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = SliceFixture::new(9).write_to(dir.path().join("only.dcm"));
        let report = DatasetRegistry::load(&path, codec(), 4).expect("loads");
        assert_eq!(report.registry.len(), 1);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn replace_bumps_only_edited_revisions() {
        let mut registry = DatasetRegistry::from_datasets(vec![
            SliceFixture::new(1).dataset("a.dcm"),
            SliceFixture::new(2).dataset("b.dcm"),
        ]);
        let replacement = Arc::new(SliceFixture::new(2).dataset("b.dcm"));
        registry.replace(vec![(1, replacement)]);

        assert_eq!(registry.revision(0), 0);
        assert_eq!(registry.revision(1), 1);
        assert_eq!(registry.generation(), 1);
    }
}
