//! De-identification of DICOM scan collections with chronological scan IDs.
//!
//! A batch walks an input directory, reads the identifying header fields of every DICOM file,
//! groups the files by subject and series and gives every series a scan ID derived from the
//! subject identifier and the series' position in the subject's chronology (`P001`, `P001A`,
//! `P001B`, ...). The scan ID replaces the accession number, a declarative [`RuleSet`] clears,
//! spares, defaults or adds the remaining fields, and the result is written to a mirrored output
//! tree together with two positionally joinable metadata tables.
//!
//! # Example
//!
//! ```no_run
//! use dicom_scan_anonymizer::{run_batch, BatchOptions, RuleSet};
//!
//! let options = BatchOptions::new("scans")
//!     .tables("original_metadata.csv", "anonymized_metadata.csv");
//! let output = run_batch(&options, &RuleSet::standard())?;
//!
//! println!(
//!     "{} files processed, {} failed, {} subjects",
//!     output.summary.succeeded, output.summary.failed, output.summary.subjects
//! );
//! # Ok::<(), dicom_scan_anonymizer::BatchError>(())
//! ```

pub mod anonymizer;
pub mod batch;
pub mod discovery;
pub mod extractor;
pub mod grouper;
mod hashing;
pub mod output;
pub mod record;
pub mod rules;
pub mod scan_id;

#[cfg(test)]
mod test_utils;

pub use dicom_core::Tag;
pub use dicom_dictionary_std::tags;

pub use anonymizer::{anonymize, deidentify, AnonymizedRecord};
pub use batch::{run_batch, BatchError, BatchOptions, BatchOutput, FailureStage, FileFailure, RunSummary};
pub use discovery::{DiscoveryError, FileDiscovery};
pub use extractor::{ExtractionFailure, Extractor};
pub use grouper::{Grouping, SeriesGroup, SeriesKey};
pub use output::{write_anonymized_file, MetadataTable, OutputLayout, WriteError};
pub use record::{Column, FieldValue, MetadataRecord};
pub use rules::{ConfigError, FieldName, RuleSet, RuleSetBuilder, ValueSource, SCAN_ID_FIELD};
pub use scan_id::{assign_scan_ids, ChronoKey, ScanIdAssignment};
