use crate::record::{Column, FieldValue, MetadataRecord};
use crate::rules::RuleSet;
use crate::tags;
use dicom_core::Tag;
use dicom_object::{InMemDicomObject, OpenFileOptions};
use log::debug;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A file that could not be read as DICOM. It is reported and left out of grouping, the rest of
/// the batch carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to read {}: {cause}", path.display())]
pub struct ExtractionFailure {
    pub path: PathBuf,
    pub cause: String,
}

impl ExtractionFailure {
    pub fn new(path: impl Into<PathBuf>, cause: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            cause: cause.into(),
        }
    }
}

/// Reads the header fields needed for grouping, the export tables and the rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extractor {
    tags: BTreeSet<Tag>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor {
    /// An extractor for the export table columns only.
    pub fn new() -> Self {
        Self {
            tags: Column::ALL.iter().map(|column| column.tag()).collect(),
        }
    }

    /// An extractor for the export table columns plus every field the rules read or write.
    pub fn for_rules(rules: &RuleSet) -> Self {
        let mut extractor = Self::new();
        extractor.tags.extend(rules.referenced_tags());
        extractor
    }

    pub fn tags(&self) -> &BTreeSet<Tag> {
        &self.tags
    }

    /// Reads the header of the file at `path`, stopping before the pixel data.
    pub fn extract(&self, path: &Path) -> Result<MetadataRecord, ExtractionFailure> {
        let obj = OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(path)
            .map_err(|err| ExtractionFailure::new(path, err.to_string()))?;
        Ok(self.extract_from_object(path, &obj))
    }

    /// Builds a record from an object that is already in memory.
    pub fn extract_from_object(&self, path: &Path, obj: &InMemDicomObject) -> MetadataRecord {
        let mut record = MetadataRecord::new(path);
        for &tag in &self.tags {
            record.set_field(tag, read_field(path, obj, tag));
        }
        record
    }
}

fn read_field(path: &Path, obj: &InMemDicomObject, tag: Tag) -> FieldValue {
    let Ok(elem) = obj.element(tag) else {
        return FieldValue::Absent;
    };
    match elem.to_str() {
        Ok(value) => FieldValue::present(value.trim_end_matches([' ', '\0'])),
        Err(err) => {
            debug!(
                "ignoring value of {} in {}: {}",
                tag,
                path.display(),
                err
            );
            FieldValue::Absent
        }
    }
}
