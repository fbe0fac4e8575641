use crate::rules::ConfigError;
use dicom_core::DataDictionary;
use dicom_core::{Tag, VR};
use dicom_dictionary_std::StandardDataDictionary;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A header field addressed by a rule.
///
/// Parsed from a DICOM keyword (`"PatientName"`) or from tag notation (`"(0010,0010)"`,
/// `"0010,0010"` or `"00100010"`). Serialized as the keyword when the standard dictionary knows
/// the tag, otherwise in `(gggg,eeee)` notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldName(Tag);

impl FieldName {
    pub fn new(tag: Tag) -> Self {
        Self(tag)
    }

    pub fn tag(self) -> Tag {
        self.0
    }

    /// The keyword of this field in the standard data dictionary, if it has one.
    pub fn alias(self) -> Option<&'static str> {
        StandardDataDictionary
            .by_tag(self.0)
            .map(|entry| entry.alias)
    }

    /// The value representation to use when this field has to be created from scratch.
    pub(crate) fn default_vr(self) -> VR {
        StandardDataDictionary
            .by_tag(self.0)
            .map(|entry| entry.vr.relaxed())
            .unwrap_or(VR::LO)
    }
}

impl From<Tag> for FieldName {
    fn from(tag: Tag) -> Self {
        Self(tag)
    }
}

impl FromStr for FieldName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(entry) = StandardDataDictionary.by_name(s) {
            return Ok(Self(entry.tag.inner()));
        }
        s.parse::<Tag>()
            .map(Self)
            .map_err(|_| ConfigError::UnknownField(s.into()))
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.alias() {
            Some(alias) => f.write_str(alias),
            None => write!(f, "{}", self.0),
        }
    }
}

impl Serialize for FieldName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FieldName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
