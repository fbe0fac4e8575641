use crate::hashing::{self, Blake3Hasher};
use crate::record::MetadataRecord;
use crate::rules::FieldName;
use garde::Validate;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A code-only value computation, evaluated against the original record.
pub type RecordFn = fn(&MetadataRecord) -> Option<String>;

/// Where the value of a defaulted or added field comes from.
///
/// In JSON a plain string is a constant, anything else is one of the [`ComputedValue`] forms:
///
/// ```json
/// {
///   "PatientName": "ANONYMIZED",
///   "OtherPatientIDs": { "source": "hash", "field": "PatientID", "length": 12 }
/// }
/// ```
#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum ValueSource {
    /// A fixed value.
    Constant(#[garde(skip)] String),

    /// A value derived from the original record.
    Computed(#[garde(dive)] ComputedValue),

    /// A function supplied in code. It cannot be loaded from or written to configuration files.
    #[serde(skip)]
    Function(#[garde(skip)] RecordFn),
}

/// The declarative computed values that can be used in configuration files.
#[derive(Validate, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ComputedValue {
    /// A fixed value, the long form of a plain string.
    Constant {
        #[garde(skip)]
        value: String,
    },

    /// Copy the original value of another field.
    Copy {
        #[garde(skip)]
        field: FieldName,
    },

    /// Apply a regex replacement to the original value of a field, e.g. `^[A-Za-z]+` with an
    /// empty replacement strips leading letters.
    Regex {
        #[garde(skip)]
        field: FieldName,
        #[garde(custom(is_valid_regex))]
        pattern: String,
        #[garde(skip)]
        #[serde(default)]
        replacement: String,
    },

    /// Hash the original value of a field, optionally truncated to `length` digits.
    Hash {
        #[garde(skip)]
        field: FieldName,
        #[garde(range(min = 8))]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        length: Option<usize>,
    },

    /// Shift the date in `field` back by an offset derived from the hash of `seed_field`.
    HashDate {
        #[garde(skip)]
        field: FieldName,
        #[garde(skip)]
        seed_field: FieldName,
    },
}

impl PartialEq for ValueSource {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ValueSource::Constant(a), ValueSource::Constant(b)) => a == b,
            (ValueSource::Computed(a), ValueSource::Computed(b)) => a == b,
            // compared by function address
            (ValueSource::Function(a), ValueSource::Function(b)) => *a as usize == *b as usize,
            _ => false,
        }
    }
}

fn is_valid_regex(pattern: &str, _ctx: &()) -> garde::Result {
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|err| garde::Error::new(format!("invalid regex: {err}")))
}

impl ValueSource {
    /// Computes the value for the given original record.
    ///
    /// Returns `None` if the inputs of a computed value are absent or cannot be used, in which
    /// case the rule leaves the field as it is.
    pub fn evaluate(&self, record: &MetadataRecord) -> Option<String> {
        match self {
            ValueSource::Constant(value) => Some(value.clone()),
            ValueSource::Computed(computed) => computed.evaluate(record),
            ValueSource::Function(function) => function(record),
        }
    }

    /// Fields whose original values this source reads.
    pub fn inputs(&self) -> Vec<FieldName> {
        match self {
            ValueSource::Computed(ComputedValue::Copy { field })
            | ValueSource::Computed(ComputedValue::Regex { field, .. })
            | ValueSource::Computed(ComputedValue::Hash { field, .. }) => vec![*field],
            ValueSource::Computed(ComputedValue::Constant { .. }) => Vec::new(),
            ValueSource::Computed(ComputedValue::HashDate { field, seed_field }) => {
                vec![*field, *seed_field]
            }
            ValueSource::Constant(_) | ValueSource::Function(_) => Vec::new(),
        }
    }
}

impl ComputedValue {
    fn evaluate(&self, record: &MetadataRecord) -> Option<String> {
        match self {
            ComputedValue::Constant { value } => Some(value.clone()),
            ComputedValue::Copy { field } => record.field(field.tag()).as_str().map(Into::into),
            ComputedValue::Regex {
                field,
                pattern,
                replacement,
            } => {
                let value = record.field(field.tag()).as_str()?;
                match Regex::new(pattern) {
                    Ok(regex) => Some(regex.replace_all(value, replacement.as_str()).into_owned()),
                    Err(err) => {
                        debug!("skipping regex rule for {}: {}", field, err);
                        None
                    }
                }
            }
            ComputedValue::Hash { field, length } => {
                let value = record.field(field.tag()).non_empty()?;
                hashing::hash_value(&Blake3Hasher, value, *length).ok()
            }
            ComputedValue::HashDate { field, seed_field } => {
                let date = record.field(field.tag()).non_empty()?;
                let seed = record.field(seed_field.tag()).as_str()?;
                match hashing::shift_date(&Blake3Hasher, date, seed) {
                    Ok(shifted) => Some(shifted),
                    Err(err) => {
                        debug!(
                            "did not shift {} of {}: {}",
                            field,
                            record.file_path().display(),
                            err
                        );
                        None
                    }
                }
            }
        }
    }
}

impl From<&str> for ValueSource {
    fn from(value: &str) -> Self {
        ValueSource::Constant(value.into())
    }
}

impl From<String> for ValueSource {
    fn from(value: String) -> Self {
        ValueSource::Constant(value)
    }
}

impl From<ComputedValue> for ValueSource {
    fn from(value: ComputedValue) -> Self {
        ValueSource::Computed(value)
    }
}

impl From<RecordFn> for ValueSource {
    fn from(function: RecordFn) -> Self {
        ValueSource::Function(function)
    }
}
