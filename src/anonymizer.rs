use crate::record::{FieldValue, MetadataRecord};
use crate::rules::{FieldName, RuleSet, SCAN_ID_FIELD};
use dicom_core::header::Header;
use dicom_core::{DataElement, PrimitiveValue, Tag};
use dicom_object::InMemDicomObject;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// The de-identified counterpart of a [`MetadataRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnonymizedRecord {
    file_path: PathBuf,
    fields: BTreeMap<Tag, FieldValue>,
    scan_id: Option<String>,
}

impl AnonymizedRecord {
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn field(&self, tag: Tag) -> &FieldValue {
        static ABSENT: FieldValue = FieldValue::Absent;
        self.fields.get(&tag).unwrap_or(&ABSENT)
    }

    pub fn fields(&self) -> &BTreeMap<Tag, FieldValue> {
        &self.fields
    }

    pub fn scan_id(&self) -> Option<&str> {
        self.scan_id.as_deref()
    }

    /// Replaces the accession number with the scan ID.
    ///
    /// Without a scan ID (the record could not be grouped) a present accession number is emptied
    /// instead, so the original never reaches the output.
    pub fn with_scan_id(mut self, scan_id: Option<&str>) -> Self {
        match scan_id {
            Some(scan_id) => {
                self.fields
                    .insert(SCAN_ID_FIELD, FieldValue::present(scan_id));
                self.scan_id = Some(scan_id.to_owned());
            }
            None => {
                if let Some(value @ FieldValue::Present(_)) = self.fields.get_mut(&SCAN_ID_FIELD) {
                    *value = FieldValue::present("");
                }
                self.scan_id = None;
            }
        }
        self
    }

    /// Writes the de-identified field values into a DICOM object.
    ///
    /// Private tags are removed first when the rules ask for it, then every present field that
    /// differs from the object's current value is put into the object, keeping the element's VR or
    /// taking it from the standard dictionary for new elements. Inside sequence items, at any depth,
    /// the cleared fields and the accession number are emptied and private tags removed. Returns
    /// the number of elements changed.
    pub fn apply_to(&self, obj: &mut InMemDicomObject, rules: &RuleSet) -> usize {
        let mut changed = 0;

        if rules.remove_private_tags() {
            changed += remove_private_tags(obj);
        }

        for (&tag, value) in &self.fields {
            let FieldValue::Present(value) = value else {
                continue;
            };

            let (unchanged, vr) = match obj.element(tag) {
                Ok(elem) => (
                    elem.to_str()
                        .map(|current| current.trim_end_matches([' ', '\0']) == value.as_str())
                        .unwrap_or(false),
                    elem.vr(),
                ),
                Err(_) => (false, FieldName::new(tag).default_vr()),
            };
            if unchanged {
                continue;
            }

            let new_value = if value.is_empty() {
                PrimitiveValue::Empty
            } else {
                PrimitiveValue::from(value.as_str())
            };
            obj.put(DataElement::new::<PrimitiveValue>(tag, vr, new_value));
            changed += 1;
        }

        let nested_clear: BTreeSet<Tag> = rules
            .fields_to_clear()
            .iter()
            .filter(|field| !rules.is_spared(field))
            .map(|field| field.tag())
            .chain([SCAN_ID_FIELD])
            .collect();
        changed += clear_sequence_items(obj, &nested_clear, rules.remove_private_tags());

        changed
    }
}

fn remove_private_tags(obj: &mut InMemDicomObject) -> usize {
    let private_tags: Vec<Tag> = obj
        .iter()
        .map(|elem| elem.tag())
        .filter(is_private_tag)
        .collect();
    private_tags
        .into_iter()
        .filter(|&tag| obj.remove_element(tag))
        .count()
}

/// Empties the `clear` fields in every item of every sequence of `obj`, recursively.
fn clear_sequence_items(
    obj: &mut InMemDicomObject,
    clear: &BTreeSet<Tag>,
    remove_private: bool,
) -> usize {
    let sequence_tags: Vec<Tag> = obj
        .iter()
        .filter(|elem| elem.value().items().is_some())
        .map(|elem| elem.tag())
        .collect();

    let mut changed = 0;
    for tag in sequence_tags {
        obj.update_value(tag, |value| {
            if let Some(items) = value.items_mut() {
                for item in items.iter_mut() {
                    changed += clear_item(item, clear, remove_private);
                }
            }
        });
    }
    changed
}

fn clear_item(item: &mut InMemDicomObject, clear: &BTreeSet<Tag>, remove_private: bool) -> usize {
    let mut changed = 0;
    if remove_private {
        changed += remove_private_tags(item);
    }

    for &tag in clear {
        let vr = match item.element(tag) {
            Ok(elem) if !matches!(elem.value().primitive(), None | Some(PrimitiveValue::Empty)) => {
                elem.vr()
            }
            _ => continue,
        };
        item.put(DataElement::new::<PrimitiveValue>(tag, vr, PrimitiveValue::Empty));
        changed += 1;
    }

    changed + clear_sequence_items(item, clear, remove_private)
}

pub(crate) fn is_private_tag(tag: &Tag) -> bool {
    // tags with odd group numbers are private tags
    tag.group() % 2 != 0
}

/// Applies the generic rules of a [`RuleSet`] to a record.
///
/// The stages run in a fixed order, each later stage overriding the earlier ones:
///
/// 1. `field_defaults`, evaluated against the original record
/// 2. `fields_to_clear`, emptying present fields unless they are spared (absent fields stay absent)
/// 3. `fields_to_add`, setting the value whether or not the field existed
///
/// Computed values that cannot be evaluated leave the field as it is. The accession number is not
/// touched here, see [`AnonymizedRecord::with_scan_id`] and [`deidentify`].
pub fn anonymize(record: &MetadataRecord, rules: &RuleSet) -> AnonymizedRecord {
    let mut fields = record.fields().clone();

    for (field, source) in rules.field_defaults() {
        if let Some(value) = source.evaluate(record) {
            fields.insert(field.tag(), FieldValue::Present(value));
        }
    }

    for field in rules.fields_to_clear() {
        if rules.is_spared(field) {
            continue;
        }
        if let Some(value @ FieldValue::Present(_)) = fields.get_mut(&field.tag()) {
            *value = FieldValue::present("");
        }
    }

    for (field, source) in rules.fields_to_add() {
        if let Some(value) = source.evaluate(record) {
            fields.insert(field.tag(), FieldValue::Present(value));
        }
    }

    AnonymizedRecord {
        file_path: record.file_path().to_path_buf(),
        fields,
        scan_id: None,
    }
}

/// Applies the rules and then substitutes the record's scan ID for its accession number.
pub fn deidentify(record: &MetadataRecord, rules: &RuleSet) -> AnonymizedRecord {
    anonymize(record, rules).with_scan_id(record.scan_id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{ComputedValue, RuleSetBuilder};
    use crate::tags;
    use crate::test_utils::make_dicom_object;
    use dicom_core::value::DataSetSequence;
    use dicom_core::VR;

    fn record() -> MetadataRecord {
        MetadataRecord::new("in/p1/a.dcm")
            .with_field(tags::PATIENT_ID, "P001")
            .with_field(tags::PATIENT_NAME, "Doe^John")
            .with_field(tags::PATIENT_SEX, "M")
            .with_field(tags::INSTITUTION_NAME, "General Hospital")
            .with_field(tags::ACCESSION_NUMBER, "ACC-991")
            .with_field(tags::STUDY_DATE, "20250110")
            .with_field(tags::BODY_PART_EXAMINED, FieldValue::Absent)
    }

    #[test]
    fn test_additions_override_clearing_override_defaults() {
        let rules = RuleSetBuilder::new()
            .default_value(tags::INSTITUTION_NAME, "d")
            .clear(tags::INSTITUTION_NAME)
            .add(tags::INSTITUTION_NAME, "v")
            .build();
        let result = anonymize(&record(), &rules);
        assert_eq!(result.field(tags::INSTITUTION_NAME).as_str(), Some("v"));
    }

    #[test]
    fn test_clearing_overrides_defaults() {
        let rules = RuleSetBuilder::new()
            .default_value(tags::INSTITUTION_NAME, "d")
            .clear(tags::INSTITUTION_NAME)
            .build();
        let result = anonymize(&record(), &rules);
        assert_eq!(result.field(tags::INSTITUTION_NAME).as_str(), Some(""));
    }

    #[test]
    fn test_spared_field_is_not_cleared() {
        let rules = RuleSetBuilder::new()
            .clear(tags::PATIENT_SEX)
            .spare(tags::PATIENT_SEX)
            .clear(tags::PATIENT_NAME)
            .build();
        let result = anonymize(&record(), &rules);
        assert_eq!(result.field(tags::PATIENT_SEX).as_str(), Some("M"));
        assert_eq!(result.field(tags::PATIENT_NAME).as_str(), Some(""));
    }

    #[test]
    fn test_clearing_absent_field_keeps_it_absent() {
        let rules = RuleSetBuilder::new().clear(tags::BODY_PART_EXAMINED).build();
        let result = anonymize(&record(), &rules);
        assert_eq!(result.field(tags::BODY_PART_EXAMINED), &FieldValue::Absent);
    }

    #[test]
    fn test_add_inserts_new_field() {
        let rules = RuleSetBuilder::new()
            .add(tags::BODY_PART_EXAMINED, "CHEST")
            .add(tags::PATIENT_IDENTITY_REMOVED, "YES")
            .build();
        let result = anonymize(&record(), &rules);
        assert_eq!(result.field(tags::BODY_PART_EXAMINED).as_str(), Some("CHEST"));
        assert_eq!(result.field(tags::PATIENT_IDENTITY_REMOVED).as_str(), Some("YES"));
    }

    #[test]
    fn test_defaults_are_computed_from_original_record() {
        let rules = RuleSetBuilder::new()
            .default_value(
                tags::PATIENT_NAME,
                ComputedValue::Copy {
                    field: FieldName::new(tags::PATIENT_ID),
                },
            )
            // reads the original value, not the default above
            .add(
                tags::OTHER_PATIENT_NAMES,
                ComputedValue::Copy {
                    field: FieldName::new(tags::PATIENT_NAME),
                },
            )
            .build();
        let result = anonymize(&record(), &rules);
        assert_eq!(result.field(tags::PATIENT_NAME).as_str(), Some("P001"));
        assert_eq!(result.field(tags::OTHER_PATIENT_NAMES).as_str(), Some("Doe^John"));
    }

    #[test]
    fn test_unevaluable_source_leaves_field() {
        let rules = RuleSetBuilder::new()
            .add(
                tags::STUDY_DATE,
                ComputedValue::HashDate {
                    field: FieldName::new(tags::STUDY_DATE),
                    seed_field: FieldName::new(tags::PATIENT_BIRTH_DATE),
                },
            )
            .build();
        let result = anonymize(&record(), &rules);
        assert_eq!(result.field(tags::STUDY_DATE).as_str(), Some("20250110"));
    }

    #[test]
    fn test_anonymize_does_not_touch_accession() {
        let result = anonymize(&record(), &RuleSet::standard());
        assert_eq!(result.field(tags::ACCESSION_NUMBER).as_str(), Some("ACC-991"));
        assert_eq!(result.scan_id(), None);
    }

    #[test]
    fn test_deidentify_substitutes_scan_id() {
        let mut record = record();
        assert!(record.assign_scan_id("P001A"));
        let result = deidentify(&record, &RuleSet::standard());
        assert_eq!(result.field(tags::ACCESSION_NUMBER).as_str(), Some("P001A"));
        assert_eq!(result.scan_id(), Some("P001A"));
        assert_eq!(result.field(tags::PATIENT_NAME).as_str(), Some(""));
        // the source record is left as it was
        assert_eq!(record.original_accession().as_str(), Some("ACC-991"));
    }

    #[test]
    fn test_deidentify_without_scan_id_empties_accession() {
        let result = deidentify(&record(), &RuleSet::default());
        assert_eq!(result.field(tags::ACCESSION_NUMBER).as_str(), Some(""));
        assert_eq!(result.scan_id(), None);

        let no_accession = MetadataRecord::new("a.dcm").with_field(tags::PATIENT_ID, "P001");
        let result = deidentify(&no_accession, &RuleSet::default());
        assert_eq!(result.field(tags::ACCESSION_NUMBER), &FieldValue::Absent);
    }

    #[test]
    fn test_apply_to_object() {
        let mut obj = make_dicom_object(&[
            (tags::PATIENT_ID, VR::LO, "P001"),
            (tags::PATIENT_NAME, VR::PN, "Doe^John"),
            (tags::ACCESSION_NUMBER, VR::SH, "ACC-991"),
            (tags::MODALITY, VR::CS, "CR"),
            (Tag(0x0033, 0x1010), VR::LO, "private"),
        ]);
        let mut record = MetadataRecord::new("a.dcm")
            .with_field(tags::PATIENT_ID, "P001")
            .with_field(tags::PATIENT_NAME, "Doe^John")
            .with_field(tags::ACCESSION_NUMBER, "ACC-991");
        record.assign_scan_id("P001");

        let rules = RuleSetBuilder::new()
            .clear(tags::PATIENT_NAME)
            .add(tags::BODY_PART_EXAMINED, "CHEST")
            .remove_private_tags(true)
            .build();
        let anonymized = deidentify(&record, &rules);
        let changed = anonymized.apply_to(&mut obj, &rules);

        // private tag removed, name emptied, accession replaced, body part added
        assert_eq!(changed, 4);
        assert!(obj.element(Tag(0x0033, 0x1010)).is_err());
        assert_eq!(obj.element(tags::PATIENT_NAME).unwrap().to_str().unwrap(), "");
        assert_eq!(obj.element(tags::ACCESSION_NUMBER).unwrap().to_str().unwrap(), "P001");
        let body_part = obj.element(tags::BODY_PART_EXAMINED).unwrap();
        assert_eq!(body_part.vr(), VR::CS);
        assert_eq!(body_part.to_str().unwrap(), "CHEST");
        // untouched
        assert_eq!(obj.element(tags::MODALITY).unwrap().to_str().unwrap(), "CR");
        assert_eq!(obj.element(tags::PATIENT_ID).unwrap().to_str().unwrap(), "P001");
    }

    fn item(elements: &[(Tag, VR, &str)]) -> InMemDicomObject {
        let mut item: InMemDicomObject = InMemDicomObject::new_empty();
        for &(tag, vr, value) in elements {
            item.put(DataElement::new::<PrimitiveValue>(tag, vr, PrimitiveValue::from(value)));
        }
        item
    }

    fn nested_str(obj: &InMemDicomObject, sequence: Tag, tag: Tag) -> Option<String> {
        let items = obj.element(sequence).ok()?.value().items()?;
        let elem = items.first()?.element(tag).ok()?;
        elem.to_str().ok().map(|value| value.into_owned())
    }

    #[test]
    fn test_apply_to_object_clears_inside_sequences() {
        let deeper = item(&[(tags::PATIENT_NAME, VR::PN, "Doe^Jane")]);
        let mut referenced = item(&[
            (tags::PATIENT_NAME, VR::PN, "Doe^John"),
            (tags::PATIENT_SEX, VR::CS, "M"),
            (tags::ACCESSION_NUMBER, VR::SH, "ACC-991"),
            (Tag(0x0033, 0x1010), VR::LO, "private"),
        ]);
        referenced.put(DataElement::new(
            tags::REFERENCED_STUDY_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(vec![deeper]),
        ));
        let mut obj = make_dicom_object(&[(tags::PATIENT_NAME, VR::PN, "Doe^John")]);
        obj.put(DataElement::new(
            tags::REFERENCED_PATIENT_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(vec![referenced]),
        ));

        let record = MetadataRecord::new("a.dcm").with_field(tags::PATIENT_NAME, "Doe^John");
        let rules = RuleSetBuilder::new()
            .clear(tags::PATIENT_NAME)
            .clear(tags::PATIENT_SEX)
            .spare(tags::PATIENT_SEX)
            .build();
        deidentify(&record, &rules).apply_to(&mut obj, &rules);

        assert_eq!(obj.element(tags::PATIENT_NAME).unwrap().to_str().unwrap(), "");
        let sequence = tags::REFERENCED_PATIENT_SEQUENCE;
        assert_eq!(nested_str(&obj, sequence, tags::PATIENT_NAME).as_deref(), Some(""));
        assert_eq!(nested_str(&obj, sequence, tags::ACCESSION_NUMBER).as_deref(), Some(""));
        assert_eq!(nested_str(&obj, sequence, tags::PATIENT_SEX).as_deref(), Some("M"));
        assert_eq!(nested_str(&obj, sequence, Tag(0x0033, 0x1010)), None);

        let referenced = &obj.element(sequence).unwrap().value().items().unwrap()[0];
        assert_eq!(
            nested_str(referenced, tags::REFERENCED_STUDY_SEQUENCE, tags::PATIENT_NAME).as_deref(),
            Some("")
        );
    }

    #[test]
    fn test_apply_to_object_keeps_private_tags() {
        let mut obj = make_dicom_object(&[(Tag(0x0033, 0x1010), VR::LO, "private")]);
        let rules = RuleSetBuilder::new().remove_private_tags(false).build();
        let anonymized = anonymize(&MetadataRecord::new("a.dcm"), &rules);
        assert_eq!(anonymized.apply_to(&mut obj, &rules), 0);
        assert!(obj.element(Tag(0x0033, 0x1010)).is_ok());
    }

    #[test]
    fn test_is_private_tag() {
        assert!(is_private_tag(&Tag(0x0009, 0x0010)));
        assert!(is_private_tag(&Tag(0x0033, 0x1010)));
        assert!(!is_private_tag(&tags::PATIENT_ID));
        assert!(!is_private_tag(&tags::PIXEL_DATA));
    }
}
