mod table;

pub use table::MetadataTable;

use crate::anonymizer::AnonymizedRecord;
use crate::rules::RuleSet;
use dicom_object::open_file;
use log::debug;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ANONYMIZED_DIR_SUFFIX: &str = "-Anonymized";

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("{} is not inside the input root {}", path.display(), root.display())]
    OutsideInputRoot { path: PathBuf, root: PathBuf },

    #[error("failed to read {}: {cause}", path.display())]
    Read { path: PathBuf, cause: String },

    #[error("failed to create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {}: {cause}", path.display())]
    Write { path: PathBuf, cause: String },
}

/// Maps source files under the input root to their place under the output root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    input_root: PathBuf,
    output_root: PathBuf,
}

impl OutputLayout {
    /// Without an explicit output root the sibling directory `<input>-Anonymized` is used.
    pub fn new(input_root: impl Into<PathBuf>, output_root: Option<PathBuf>) -> Self {
        let input_root = input_root.into();
        let output_root = output_root.unwrap_or_else(|| Self::default_output_root(&input_root));
        Self {
            input_root,
            output_root,
        }
    }

    pub fn default_output_root(input_root: &Path) -> PathBuf {
        // resolves roots like "." that have no file name of their own
        let input_root = fs::canonicalize(input_root).unwrap_or_else(|_| input_root.to_path_buf());
        let mut name = input_root
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| OsString::from("input"));
        name.push(ANONYMIZED_DIR_SUFFIX);
        input_root.with_file_name(name)
    }

    pub fn input_root(&self) -> &Path {
        &self.input_root
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// The output path mirroring `source`'s path relative to the input root.
    pub fn output_path(&self, source: &Path) -> Result<PathBuf, WriteError> {
        let relative =
            source
                .strip_prefix(&self.input_root)
                .map_err(|_| WriteError::OutsideInputRoot {
                    path: source.to_path_buf(),
                    root: self.input_root.clone(),
                })?;
        Ok(self.output_root.join(relative))
    }
}

/// Writes the de-identified version of `record`'s source file into the output tree.
///
/// The full source file, pixel data included, is read again, the anonymized field values are
/// applied and the result is written to the mirrored path. Returns the path written.
pub fn write_anonymized_file(
    layout: &OutputLayout,
    record: &AnonymizedRecord,
    rules: &RuleSet,
) -> Result<PathBuf, WriteError> {
    let source = record.file_path();
    let target = layout.output_path(source)?;

    let mut obj = open_file(source).map_err(|err| WriteError::Read {
        path: source.to_path_buf(),
        cause: err.to_string(),
    })?;
    let changed = record.apply_to(&mut obj, rules);

    // create intermediate output directories if they don't exist yet
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|source| WriteError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    obj.write_to_file(&target).map_err(|err| WriteError::Write {
        path: target.clone(),
        cause: err.to_string(),
    })?;

    debug!(
        "wrote {} ({} elements changed)",
        target.display(),
        changed
    );
    Ok(target)
}
