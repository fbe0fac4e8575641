use crate::anonymizer::{deidentify, AnonymizedRecord};
use crate::discovery::{DiscoveryError, FileDiscovery, DEFAULT_EXTENSION};
use crate::extractor::{ExtractionFailure, Extractor};
use crate::output::{write_anonymized_file, MetadataTable, OutputLayout, WriteError};
use crate::record::MetadataRecord;
use crate::rules::{ConfigError, RuleSet};
use crate::scan_id::assign_scan_ids;
use log::{debug, error, info, warn};
use rayon::prelude::*;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that abort a batch before any output is produced.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("invalid rule set: {0}")]
    Config(#[from] ConfigError),

    #[error("no matching files found in {}", .0.display())]
    NoFiles(PathBuf),

    #[error("failed to write metadata table {}: {source}", path.display())]
    Table { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    pub input_root: PathBuf,
    /// Defaults to the sibling directory `<input>-Anonymized`.
    pub output_root: Option<PathBuf>,
    /// Only produce the metadata tables, no DICOM output.
    pub metadata_only: bool,
    /// File extension to look for, `None` for every file.
    pub extension: Option<String>,
    pub original_table: Option<PathBuf>,
    pub anonymized_table: Option<PathBuf>,
    /// Fail with [`BatchError::NoFiles`] instead of producing empty output.
    pub require_files: bool,
}

impl BatchOptions {
    pub fn new(input_root: impl Into<PathBuf>) -> Self {
        Self {
            input_root: input_root.into(),
            output_root: None,
            metadata_only: false,
            extension: Some(DEFAULT_EXTENSION.to_owned()),
            original_table: None,
            anonymized_table: None,
            require_files: false,
        }
    }

    pub fn output_root(mut self, output_root: impl Into<PathBuf>) -> Self {
        self.output_root = Some(output_root.into());
        self
    }

    pub fn metadata_only(mut self, metadata_only: bool) -> Self {
        self.metadata_only = metadata_only;
        self
    }

    pub fn extension(mut self, extension: Option<&str>) -> Self {
        self.extension = extension.map(str::to_owned);
        self
    }

    pub fn require_files(mut self, require_files: bool) -> Self {
        self.require_files = require_files;
        self
    }

    pub fn tables(
        mut self,
        original_table: impl Into<PathBuf>,
        anonymized_table: impl Into<PathBuf>,
    ) -> Self {
        self.original_table = Some(original_table.into());
        self.anonymized_table = Some(anonymized_table.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Extraction,
    Write,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureStage::Extraction => write!(f, "extraction"),
            FailureStage::Write => write!(f, "write"),
        }
    }
}

/// A file that was skipped, with the stage it failed in and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub path: PathBuf,
    pub stage: FailureStage,
    pub cause: String,
}

impl From<ExtractionFailure> for FileFailure {
    fn from(failure: ExtractionFailure) -> Self {
        Self {
            path: failure.path,
            stage: FailureStage::Extraction,
            cause: failure.cause,
        }
    }
}

impl FileFailure {
    fn write(path: &Path, err: &WriteError) -> Self {
        Self {
            path: path.to_path_buf(),
            stage: FailureStage::Write,
            cause: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Files found below the input root.
    pub discovered: usize,
    /// Files extracted and, unless metadata-only, written.
    pub succeeded: usize,
    /// Extraction failures plus write failures.
    pub failed: usize,
    /// Subjects that received scan IDs.
    pub subjects: usize,
    /// Series that received scan IDs.
    pub series: usize,
    /// Files without a subject or series identifier. They are processed but get no scan ID.
    pub ungroupable: Vec<PathBuf>,
    /// Failed files in discovery order, extraction failures before write failures.
    pub failures: Vec<FileFailure>,
    /// Where DICOM output went, `None` in metadata-only mode.
    pub output_root: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct BatchOutput {
    pub summary: RunSummary,
    pub original: MetadataTable,
    pub anonymized: MetadataTable,
}

/// Processes every file below the input root.
///
/// The batch runs in two phases with a barrier in between: first all files are read and their
/// metadata extracted, then the scan IDs are assigned over the complete set of records (a
/// subject's chronology is only known once all of its series have been seen), and finally the
/// rules are applied and the tables and DICOM files are written. Per-file work in both phases is
/// spread over the rayon thread pool, results keep discovery order.
///
/// Failures of single files are collected in the [`RunSummary`]. Only a missing input root, an
/// invalid rule set or an unwritable metadata table abort the batch, and an input without any
/// matching file when [`BatchOptions::require_files`] is set.
pub fn run_batch(options: &BatchOptions, rules: &RuleSet) -> Result<BatchOutput, BatchError> {
    rules.validate()?;
    let discovery = FileDiscovery::new(&options.input_root, options.extension.as_deref())?;

    let files: Vec<PathBuf> = discovery.files().collect();
    info!(
        "found {} files in {}",
        files.len(),
        discovery.root().display()
    );
    if files.is_empty() && options.require_files {
        return Err(BatchError::NoFiles(discovery.root().to_path_buf()));
    }

    // phase 1: extraction
    let extractor = Extractor::for_rules(rules);
    let results: Vec<Result<MetadataRecord, ExtractionFailure>> = files
        .par_iter()
        .map(|path| extractor.extract(path))
        .collect();

    let mut records = Vec::with_capacity(results.len());
    let mut failures: Vec<FileFailure> = Vec::new();
    for result in results {
        match result {
            Ok(record) => records.push(record),
            Err(failure) => {
                warn!("{}", failure);
                failures.push(failure.into());
            }
        }
    }
    info!(
        "extracted metadata from {} files, {} failed",
        records.len(),
        failures.len()
    );

    // phase 2: scan ID assignment over the complete set
    let (grouping, assignment) = assign_scan_ids(&mut records);
    let ungroupable: Vec<PathBuf> = grouping
        .ungroupable()
        .iter()
        .map(|&index| records[index].file_path().to_path_buf())
        .collect();
    for path in &ungroupable {
        warn!(
            "{} has no subject or series identifier, no scan ID assigned",
            path.display()
        );
    }
    info!(
        "assigned {} scan IDs to {} subjects",
        assignment.len(),
        assignment.subject_count()
    );
    for (key, scan_id) in assignment.iter() {
        debug!("{} / {} -> {}", key.subject_id, key.series_id, scan_id);
    }

    let anonymized: Vec<AnonymizedRecord> = records
        .par_iter()
        .map(|record| deidentify(record, rules))
        .collect();

    let original_table = MetadataTable::original(&records);
    let anonymized_table = MetadataTable::anonymized(&anonymized);
    write_tables([
        (&original_table, options.original_table.as_deref(), "original"),
        (&anonymized_table, options.anonymized_table.as_deref(), "anonymized"),
    ])?;

    // phase 3: DICOM output
    let mut succeeded = records.len();
    let output_root = if options.metadata_only {
        info!("metadata-only mode, no DICOM files written");
        None
    } else {
        let layout = OutputLayout::new(discovery.root(), options.output_root.clone());
        let write_failures: Vec<FileFailure> = anonymized
            .par_iter()
            .filter_map(|record| match write_anonymized_file(&layout, record, rules) {
                Ok(_) => None,
                Err(err) => {
                    error!("{}", err);
                    Some(FileFailure::write(record.file_path(), &err))
                }
            })
            .collect();
        succeeded -= write_failures.len();
        failures.extend(write_failures);
        info!(
            "wrote {} anonymized files to {}",
            succeeded,
            layout.output_root().display()
        );
        Some(layout.output_root().to_path_buf())
    };

    let summary = RunSummary {
        discovered: files.len(),
        succeeded,
        failed: failures.len(),
        subjects: assignment.subject_count(),
        series: assignment.len(),
        ungroupable,
        failures,
        output_root,
    };
    info!(
        "processed {} files: {} succeeded, {} failed",
        summary.discovered, summary.succeeded, summary.failed
    );

    Ok(BatchOutput {
        summary,
        original: original_table,
        anonymized: anonymized_table,
    })
}

/// Writes the requested tables, all or none.
///
/// Every table file is created before any of them is written. When one of them cannot be created
/// or written, the files created so far are removed again.
fn write_tables(tables: [(&MetadataTable, Option<&Path>, &str); 2]) -> Result<(), BatchError> {
    let mut created: Vec<(&MetadataTable, &Path, &str, File)> = Vec::with_capacity(tables.len());
    for (table, path, kind) in tables {
        let Some(path) = path else {
            continue;
        };
        match MetadataTable::create_file(path) {
            Ok(file) => created.push((table, path, kind, file)),
            Err(source) => {
                remove_tables(created.iter().map(|&(_, path, _, _)| path));
                return Err(table_error(path, source));
            }
        }
    }

    let paths: Vec<&Path> = created.iter().map(|&(_, path, _, _)| path).collect();
    for (table, path, kind, file) in created {
        if let Err(source) = table.write_csv(BufWriter::new(file)) {
            remove_tables(paths.iter().copied());
            return Err(table_error(path, source));
        }
        info!("saved {} metadata to {}", kind, path.display());
    }
    Ok(())
}

fn remove_tables<'a>(paths: impl Iterator<Item = &'a Path>) {
    for path in paths {
        if let Err(err) = fs::remove_file(path) {
            warn!("failed to remove incomplete table {}: {}", path.display(), err);
        }
    }
}

fn table_error(path: &Path, source: io::Error) -> BatchError {
    BatchError::Table {
        path: path.to_path_buf(),
        source,
    }
}
