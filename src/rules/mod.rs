mod field;
mod value;

pub use field::FieldName;
pub use value::{ComputedValue, RecordFn, ValueSource};

use crate::tags;
use dicom_core::Tag;
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use thiserror::Error;

/// The field that receives the scan ID. It is owned by the scan ID substitution and may not be
/// targeted by clear, default or add rules.
pub const SCAN_ID_FIELD: Tag = tags::ACCESSION_NUMBER;

#[derive(Error, Debug, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum ConfigError {
    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("invalid rule for field {field}: {reason}")]
    InvalidRule { field: String, reason: String },

    #[error("field {0} is both spared and added")]
    SparedAndAdded(String),

    #[error("field {0} receives the scan ID and cannot be targeted by a {1} rule")]
    ReservedField(String, &'static str),

    #[error("failed to parse rule set: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(format!("{err}"))
    }
}

/// Declarative de-identification rules applied to every record.
///
/// The rules are applied in a fixed order (see [`crate::anonymizer::anonymize`]):
///
/// 1. `field_defaults` set a baseline value, constant or computed from the original record
/// 2. `fields_to_clear` reset a field to an empty value, unless it is in `fields_to_spare`
/// 3. `fields_to_add` set a value whether or not the field existed, overriding everything before
///
/// # Example
///
/// ```
/// use dicom_scan_anonymizer::rules::RuleSet;
///
/// let rules = RuleSet::from_json(r#"{
///     "fields_to_clear": ["PatientName", "PatientBirthDate", "InstitutionName"],
///     "fields_to_spare": ["PatientSex"],
///     "field_defaults": {},
///     "fields_to_add": { "BodyPartExamined": "CHEST" }
/// }"#).unwrap();
/// assert_eq!(rules.fields_to_clear().len(), 3);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RuleSet {
    fields_to_clear: BTreeSet<FieldName>,
    fields_to_spare: BTreeSet<FieldName>,
    field_defaults: BTreeMap<FieldName, ValueSource>,
    fields_to_add: BTreeMap<FieldName, ValueSource>,

    /// Strip private (odd group) tags from written files.
    remove_private_tags: bool,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            fields_to_clear: BTreeSet::new(),
            fields_to_spare: BTreeSet::new(),
            field_defaults: BTreeMap::new(),
            fields_to_add: BTreeMap::new(),
            remove_private_tags: true,
        }
    }
}

impl RuleSet {
    /// The rule set used when no configuration is given: the usual patient, institution and
    /// physician fields are cleared and private tags are removed.
    #[allow(deprecated)]
    pub fn standard() -> Self {
        RuleSetBuilder::new()
            .clear(tags::PATIENT_NAME)
            .clear(tags::PATIENT_ID)
            .clear(tags::PATIENT_BIRTH_DATE)
            .clear(tags::PATIENT_SEX)
            .clear(tags::PATIENT_ADDRESS)
            .clear(tags::PATIENT_TELEPHONE_NUMBERS)
            .clear(tags::STUDY_ID)
            .clear(tags::INSTITUTION_NAME)
            .clear(tags::INSTITUTION_ADDRESS)
            .clear(tags::REFERRING_PHYSICIAN_NAME)
            .clear(tags::PHYSICIANS_OF_RECORD)
            .clear(tags::PERFORMING_PHYSICIAN_NAME)
            .clear(tags::OPERATORS_NAME)
            .clear(tags::MEDICAL_RECORD_LOCATOR)
            .clear(tags::ADDITIONAL_PATIENT_HISTORY)
            .clear(tags::PATIENT_COMMENTS)
            .clear(tags::REQUESTING_PHYSICIAN)
            .remove_private_tags(true)
            .build()
    }

    /// Parses and validates a rule set from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let rules: RuleSet = serde_json::from_str(json)?;
        rules.validate()?;
        Ok(rules)
    }

    /// Parses and validates a rule set from a JSON reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ConfigError> {
        let rules: RuleSet = serde_json::from_reader(reader)?;
        rules.validate()?;
        Ok(rules)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks the rule set for instructions that cannot be applied or that contradict each other.
    ///
    /// Rejected are: computed values that fail validation (bad regex, hash length below 8), a
    /// field that is both spared and added, and any clear, default or add rule on
    /// [`SCAN_ID_FIELD`]. A field that is both cleared and spared is fine, sparing is the way to
    /// exempt a field from clearing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let reserved = FieldName::new(SCAN_ID_FIELD);
        if self.fields_to_clear.contains(&reserved) {
            return Err(ConfigError::ReservedField(reserved.to_string(), "clear"));
        }
        if self.field_defaults.contains_key(&reserved) {
            return Err(ConfigError::ReservedField(reserved.to_string(), "default"));
        }
        if self.fields_to_add.contains_key(&reserved) {
            return Err(ConfigError::ReservedField(reserved.to_string(), "add"));
        }

        if let Some(field) = self
            .fields_to_spare
            .iter()
            .find(|field| self.fields_to_add.contains_key(field))
        {
            return Err(ConfigError::SparedAndAdded(field.to_string()));
        }

        for (field, source) in self.field_defaults.iter().chain(&self.fields_to_add) {
            source.validate().map_err(|err| ConfigError::InvalidRule {
                field: field.to_string(),
                reason: err.to_string(),
            })?;
        }

        Ok(())
    }

    pub fn fields_to_clear(&self) -> &BTreeSet<FieldName> {
        &self.fields_to_clear
    }

    pub fn fields_to_spare(&self) -> &BTreeSet<FieldName> {
        &self.fields_to_spare
    }

    pub fn field_defaults(&self) -> &BTreeMap<FieldName, ValueSource> {
        &self.field_defaults
    }

    pub fn fields_to_add(&self) -> &BTreeMap<FieldName, ValueSource> {
        &self.fields_to_add
    }

    pub fn remove_private_tags(&self) -> bool {
        self.remove_private_tags
    }

    pub fn is_spared(&self, field: &FieldName) -> bool {
        self.fields_to_spare.contains(field)
    }

    /// All tags that have to be read from a file to apply these rules.
    pub fn referenced_tags(&self) -> BTreeSet<Tag> {
        let mut tags: BTreeSet<Tag> = self
            .fields_to_clear
            .iter()
            .chain(&self.fields_to_spare)
            .chain(self.field_defaults.keys())
            .chain(self.fields_to_add.keys())
            .map(|field| field.tag())
            .collect();
        for source in self.field_defaults.values().chain(self.fields_to_add.values()) {
            tags.extend(source.inputs().into_iter().map(FieldName::tag));
        }
        tags
    }
}

/// A builder for [`RuleSet`].
///
/// # Example
///
/// ```
/// use dicom_scan_anonymizer::rules::{ComputedValue, RuleSetBuilder};
/// use dicom_scan_anonymizer::tags;
///
/// let rules = RuleSetBuilder::new()
///     .clear(tags::PATIENT_NAME)
///     .clear(tags::PATIENT_BIRTH_DATE)
///     .spare(tags::PATIENT_SEX)
///     .default_value(tags::INSTITUTION_NAME, "ANONYMIZED")
///     .add(tags::BODY_PART_EXAMINED, "CHEST")
///     .build();
/// assert!(rules.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSetBuilder(RuleSet);

impl RuleSetBuilder {
    pub fn new() -> Self {
        RuleSetBuilder(RuleSet::default())
    }

    pub fn clear(mut self, field: impl Into<FieldName>) -> Self {
        self.0.fields_to_clear.insert(field.into());
        self
    }

    pub fn spare(mut self, field: impl Into<FieldName>) -> Self {
        self.0.fields_to_spare.insert(field.into());
        self
    }

    pub fn default_value(mut self, field: impl Into<FieldName>, source: impl Into<ValueSource>) -> Self {
        self.0.field_defaults.insert(field.into(), source.into());
        self
    }

    pub fn add(mut self, field: impl Into<FieldName>, source: impl Into<ValueSource>) -> Self {
        self.0.fields_to_add.insert(field.into(), source.into());
        self
    }

    pub fn remove_private_tags(mut self, remove: bool) -> Self {
        self.0.remove_private_tags = remove;
        self
    }

    /// Returns the rule set without validating it.
    pub fn build(self) -> RuleSet {
        self.0
    }

    /// Returns the rule set if it passes [`RuleSet::validate`].
    pub fn try_build(self) -> Result<RuleSet, ConfigError> {
        self.0.validate()?;
        Ok(self.0)
    }
}

impl Default for RuleSetBuilder {
    fn default() -> Self {
        Self::new()
    }
}
