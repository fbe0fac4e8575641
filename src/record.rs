use crate::tags;
use dicom_core::Tag;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

static ABSENT: FieldValue = FieldValue::Absent;

/// The value of a single header field as found in a source file.
///
/// A field that exists in the file but holds no value is `Present("")`, which is
/// different from a field that does not exist at all (`Absent`).
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldValue {
    Present(String),
    #[default]
    Absent,
}

impl FieldValue {
    pub fn present(value: impl Into<String>) -> Self {
        FieldValue::Present(value.into())
    }

    pub fn is_present(&self) -> bool {
        matches!(self, FieldValue::Present(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Present(value) => Some(value),
            FieldValue::Absent => None,
        }
    }

    /// Returns the value only if it is present and not blank.
    pub fn non_empty(&self) -> Option<&str> {
        self.as_str()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Renders the value as a table cell, absent values become an empty cell.
    pub fn as_cell(&self) -> &str {
        self.as_str().unwrap_or("")
    }
}

impl From<Option<String>> for FieldValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(FieldValue::Absent, FieldValue::Present)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Present(value.into())
    }
}

/// Columns of the metadata export tables, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Column {
    PatientId,
    PatientName,
    PatientBirthDate,
    PatientSex,
    AccessionNumber,
    InstitutionName,
    StudyDate,
    StudyTime,
    SeriesInstanceUid,
    BodyPartExamined,
}

impl Column {
    pub const ALL: [Column; 10] = [
        Column::PatientId,
        Column::PatientName,
        Column::PatientBirthDate,
        Column::PatientSex,
        Column::AccessionNumber,
        Column::InstitutionName,
        Column::StudyDate,
        Column::StudyTime,
        Column::SeriesInstanceUid,
        Column::BodyPartExamined,
    ];

    pub fn tag(self) -> Tag {
        match self {
            Column::PatientId => tags::PATIENT_ID,
            Column::PatientName => tags::PATIENT_NAME,
            Column::PatientBirthDate => tags::PATIENT_BIRTH_DATE,
            Column::PatientSex => tags::PATIENT_SEX,
            Column::AccessionNumber => tags::ACCESSION_NUMBER,
            Column::InstitutionName => tags::INSTITUTION_NAME,
            Column::StudyDate => tags::STUDY_DATE,
            Column::StudyTime => tags::STUDY_TIME,
            Column::SeriesInstanceUid => tags::SERIES_INSTANCE_UID,
            Column::BodyPartExamined => tags::BODY_PART_EXAMINED,
        }
    }

    /// The column header, which is the DICOM keyword of the underlying tag.
    pub fn header(self) -> &'static str {
        match self {
            Column::PatientId => "PatientID",
            Column::PatientName => "PatientName",
            Column::PatientBirthDate => "PatientBirthDate",
            Column::PatientSex => "PatientSex",
            Column::AccessionNumber => "AccessionNumber",
            Column::InstitutionName => "InstitutionName",
            Column::StudyDate => "StudyDate",
            Column::StudyTime => "StudyTime",
            Column::SeriesInstanceUid => "SeriesInstanceUID",
            Column::BodyPartExamined => "BodyPartExamined",
        }
    }
}

/// The identifying attributes of one source file.
///
/// Records are created by the extractor and only gain a scan ID afterwards. The scan ID can be
/// set once; every record of the same (subject, series) group receives the same value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRecord {
    file_path: PathBuf,
    fields: BTreeMap<Tag, FieldValue>,
    scan_id: Option<String>,
}

impl MetadataRecord {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            fields: BTreeMap::new(),
            scan_id: None,
        }
    }

    /// Builder-style variant of [`MetadataRecord::set_field`].
    pub fn with_field(mut self, tag: Tag, value: impl Into<FieldValue>) -> Self {
        self.set_field(tag, value);
        self
    }

    pub fn set_field(&mut self, tag: Tag, value: impl Into<FieldValue>) {
        self.fields.insert(tag, value.into());
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Returns the value of a field, or [`FieldValue::Absent`] if it was never read.
    pub fn field(&self, tag: Tag) -> &FieldValue {
        self.fields.get(&tag).unwrap_or(&ABSENT)
    }

    pub fn fields(&self) -> &BTreeMap<Tag, FieldValue> {
        &self.fields
    }

    pub fn subject_id(&self) -> &FieldValue {
        self.field(tags::PATIENT_ID)
    }

    pub fn series_id(&self) -> &FieldValue {
        self.field(tags::SERIES_INSTANCE_UID)
    }

    pub fn study_date(&self) -> &FieldValue {
        self.field(tags::STUDY_DATE)
    }

    pub fn study_time(&self) -> &FieldValue {
        self.field(tags::STUDY_TIME)
    }

    pub fn original_accession(&self) -> &FieldValue {
        self.field(tags::ACCESSION_NUMBER)
    }

    pub fn scan_id(&self) -> Option<&str> {
        self.scan_id.as_deref()
    }

    /// Sets the scan ID of this record. Returns `false` and leaves the record unchanged if a
    /// different scan ID was already assigned.
    pub(crate) fn assign_scan_id(&mut self, scan_id: &str) -> bool {
        match &self.scan_id {
            Some(existing) => existing == scan_id,
            None => {
                self.scan_id = Some(scan_id.to_owned());
                true
            }
        }
    }
}
