//! Chronological scan ID assignment.
//!
//! Every series of a subject receives `subject_id + suffix(i)`, where `i` is the position of the
//! series after sorting the subject's series by study date and time. The suffix table is part of
//! the output contract: consumers correlate series by these exact strings, so it is versioned and
//! must never be reordered.

use crate::grouper::{Grouping, SeriesKey};
use crate::record::MetadataRecord;
use log::{debug, warn};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Version of [`SUFFIX_TABLE`].
pub const SUFFIX_TABLE_VERSION: u32 = 1;

/// Suffixes for series positions `0..86`.
///
/// * `0`: no suffix
/// * `1..=26`: `A` to `Z`
/// * `27..=68`: the printable ASCII symbols and digits in code order
/// * `69..=85`: `a` to `q`
///
/// Position 60 is a backslash, the DICOM value separator. The AccessionNumber (VR SH) written
/// for that series therefore reads back as two values, the subject ID and an empty one, unless it
/// is taken verbatim as a string. The table is frozen at version 1 regardless.
#[rustfmt::skip]
pub const SUFFIX_TABLE: [&str; 86] = [
    "",
    "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M",
    "N", "O", "P", "Q", "R", "S", "T", "U", "V", "W", "X", "Y", "Z",
    "!", "\"", "#", "$", "%", "&", "'", "(", ")", "*", "+", ",", "-", ".", "/",
    "0", "1", "2", "3", "4", "5", "6", "7", "8", "9",
    ":", ";", "<", "=", ">", "?", "@",
    "[", "\\", "]", "^", "_", "`",
    "{", "|", "}", "~",
    "a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l", "m", "n", "o", "p", "q",
];

/// Prefix of the suffix used for positions beyond the table.
pub const OVERFLOW_PREFIX: &str = "_scan";

/// Returns the suffix for the series at the given zero-based position.
pub fn suffix(index: usize) -> Cow<'static, str> {
    match SUFFIX_TABLE.get(index) {
        Some(&suffix) => Cow::Borrowed(suffix),
        None => Cow::Owned(format!("{OVERFLOW_PREFIX}{index}")),
    }
}

/// Returns the scan ID of the series at the given position for a subject.
pub fn scan_id_for(subject_id: &str, index: usize) -> String {
    format!("{}{}", subject_id, suffix(index))
}

/// Chronological sort key of a record or series.
///
/// Compares by study date, then by study time. A missing (or blank) component sorts after every
/// present value, so a series whose date cannot be established never becomes the first series of
/// a subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChronoKey {
    date: Option<String>,
    time: Option<String>,
}

impl ChronoKey {
    pub fn new(date: Option<&str>, time: Option<&str>) -> Self {
        Self {
            date: date.map(Into::into),
            time: time.map(Into::into),
        }
    }

    /// The key that sorts after every other key.
    pub fn unresolved() -> Self {
        Self::new(None, None)
    }

    pub fn of(record: &MetadataRecord) -> Self {
        Self::new(record.study_date().non_empty(), record.study_time().non_empty())
    }

    pub fn date(&self) -> Option<&str> {
        self.date.as_deref()
    }

    pub fn time(&self) -> Option<&str> {
        self.time.as_deref()
    }

    pub fn is_resolved(&self) -> bool {
        self.date.is_some()
    }
}

fn cmp_missing_last(a: &Option<String>, b: &Option<String>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

impl Ord for ChronoKey {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_missing_last(&self.date, &other.date)
            .then_with(|| cmp_missing_last(&self.time, &other.time))
    }
}

impl PartialOrd for ChronoKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The scan IDs decided for a batch, one per (subject, series).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanIdAssignment {
    scan_ids: BTreeMap<SeriesKey, String>,
    subjects: usize,
}

impl ScanIdAssignment {
    /// Decides the scan ID of every series in the grouping.
    ///
    /// Per subject, series are ordered by [`ChronoKey`]; equal keys are ordered by series
    /// identifier. The result only depends on the set of groups, not on the order in which
    /// records were extracted.
    pub fn assign(grouping: &Grouping) -> Self {
        let mut assignment = ScanIdAssignment::default();

        for (subject_id, mut groups) in grouping.by_subject() {
            groups.sort_by(|a, b| {
                a.chrono_key()
                    .cmp(b.chrono_key())
                    .then_with(|| a.key().series_id.cmp(&b.key().series_id))
            });

            for (index, group) in groups.into_iter().enumerate() {
                let scan_id = scan_id_for(subject_id, index);
                debug!(
                    "series {} of subject {} -> {} ({} files)",
                    group.key().series_id,
                    subject_id,
                    scan_id,
                    group.members().len()
                );
                assignment.scan_ids.insert(group.key().clone(), scan_id);
            }
            assignment.subjects += 1;
        }

        assignment
    }

    pub fn scan_id(&self, key: &SeriesKey) -> Option<&str> {
        self.scan_ids.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SeriesKey, &str)> {
        self.scan_ids.iter().map(|(key, id)| (key, id.as_str()))
    }

    /// Number of distinct subjects that received scan IDs.
    pub fn subject_count(&self) -> usize {
        self.subjects
    }

    /// Number of series that received a scan ID.
    pub fn len(&self) -> usize {
        self.scan_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scan_ids.is_empty()
    }

    /// Writes the scan IDs into the records the grouping was built from.
    pub fn apply(&self, grouping: &Grouping, records: &mut [MetadataRecord]) {
        for group in grouping.groups() {
            let Some(scan_id) = self.scan_id(group.key()) else {
                continue;
            };
            for &index in group.members() {
                if let Some(record) = records.get_mut(index) {
                    if !record.assign_scan_id(scan_id) {
                        warn!(
                            "{} already has scan ID {:?}, not changing it to {}",
                            record.file_path().display(),
                            record.scan_id(),
                            scan_id
                        );
                    }
                }
            }
        }
    }
}

/// Groups the records, decides their scan IDs and writes them into the records.
pub fn assign_scan_ids(records: &mut [MetadataRecord]) -> (Grouping, ScanIdAssignment) {
    let grouping = Grouping::from_records(records);
    let assignment = ScanIdAssignment::assign(&grouping);
    assignment.apply(&grouping, records);
    (grouping, assignment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags;
    use std::collections::HashSet;

    fn record(path: &str, subject: &str, series: &str, date: Option<&str>) -> MetadataRecord {
        let mut record = MetadataRecord::new(path)
            .with_field(tags::PATIENT_ID, subject)
            .with_field(tags::SERIES_INSTANCE_UID, series);
        if let Some(date) = date {
            record.set_field(tags::STUDY_DATE, date);
        }
        record
    }

    fn scan_ids(records: &[MetadataRecord]) -> Vec<Option<String>> {
        records.iter().map(|r| r.scan_id().map(Into::into)).collect()
    }

    #[test]
    fn test_suffix_table() {
        assert_eq!(SUFFIX_TABLE.len(), 86);
        assert_eq!(SUFFIX_TABLE[0], "");
        assert_eq!(SUFFIX_TABLE[1], "A");
        assert_eq!(SUFFIX_TABLE[26], "Z");
        assert_eq!(SUFFIX_TABLE[27], "!");
        assert_eq!(SUFFIX_TABLE[85], "q");

        let unique: HashSet<_> = SUFFIX_TABLE.iter().collect();
        assert_eq!(unique.len(), SUFFIX_TABLE.len());

        for s in &SUFFIX_TABLE[1..] {
            assert_eq!(s.chars().count(), 1);
            let c = s.chars().next().unwrap();
            assert!(c.is_ascii_graphic());
        }
        for s in &SUFFIX_TABLE[27..69] {
            assert!(!s.chars().next().unwrap().is_ascii_alphabetic());
        }
    }

    #[test]
    fn test_value_separator_suffix() {
        let positions: Vec<usize> = SUFFIX_TABLE
            .iter()
            .enumerate()
            .filter(|(_, s)| s.contains('\\'))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(positions, vec![60]);
        assert_eq!(scan_id_for("P001", 60), "P001\\");
        assert_eq!(scan_id_for("P001", 60).split('\\').count(), 2);
    }

    #[test]
    fn test_suffix() {
        assert_eq!(suffix(0), "");
        assert_eq!(suffix(1), "A");
        assert_eq!(suffix(25), "Y");
        assert_eq!(suffix(26), "Z");
        assert_eq!(suffix(27), "!");
        assert_eq!(suffix(85), "q");
        assert_eq!(suffix(86), "_scan86");
        assert_eq!(suffix(1000), "_scan1000");
    }

    #[test]
    fn test_chrono_key_ordering() {
        let early = ChronoKey::new(Some("20250110"), Some("080000"));
        let later_same_day = ChronoKey::new(Some("20250110"), Some("120000"));
        let no_time = ChronoKey::new(Some("20250110"), None);
        let next_day = ChronoKey::new(Some("20250111"), None);
        let unresolved = ChronoKey::unresolved();
        let time_only = ChronoKey::new(None, Some("000000"));

        assert!(early < later_same_day);
        assert!(later_same_day < no_time);
        assert!(no_time < next_day);
        assert!(next_day < time_only);
        assert!(time_only < unresolved);
        assert!(!unresolved.is_resolved());
    }

    #[test]
    fn test_three_series_chronological() {
        let mut records = vec![
            record("c1.dcm", "P001", "1.3", Some("20250120")),
            record("a1.dcm", "P001", "1.1", Some("20250110")),
            record("b1.dcm", "P001", "1.2", Some("20250115")),
            record("a2.dcm", "P001", "1.1", Some("20250110")),
            record("c2.dcm", "P001", "1.3", Some("20250120")),
        ];
        let (_, assignment) = assign_scan_ids(&mut records);
        assert_eq!(
            scan_ids(&records),
            vec![
                Some("P001B".into()),
                Some("P001".into()),
                Some("P001A".into()),
                Some("P001".into()),
                Some("P001B".into()),
            ]
        );
        assert_eq!(assignment.subject_count(), 1);
        assert_eq!(assignment.len(), 3);
    }

    #[test]
    fn test_missing_date_sorts_last() {
        let mut records = vec![
            record("x.dcm", "P001", "1.0", None),
            record("y.dcm", "P001", "1.9", Some("20250120")),
            record("z.dcm", "P001", "1.5", Some("20240101")),
        ];
        assign_scan_ids(&mut records);
        assert_eq!(records[0].scan_id(), Some("P001B"));
        assert_eq!(records[1].scan_id(), Some("P001A"));
        assert_eq!(records[2].scan_id(), Some("P001"));
    }

    #[test]
    fn test_empty_date_counts_as_missing() {
        let mut records = vec![
            record("x.dcm", "P001", "1.0", Some("")),
            record("y.dcm", "P001", "1.9", Some("20250120")),
        ];
        assign_scan_ids(&mut records);
        assert_eq!(records[0].scan_id(), Some("P001A"));
        assert_eq!(records[1].scan_id(), Some("P001"));
    }

    #[test]
    fn test_ties_broken_by_series_id() {
        let mut records = vec![
            record("1.dcm", "P001", "1.2.3.9", Some("20250110")),
            record("2.dcm", "P001", "1.2.3.10", Some("20250110")),
            record("3.dcm", "P001", "9.9", None),
            record("4.dcm", "P001", "8.8", None),
        ];
        assign_scan_ids(&mut records);
        // lexicographic, not numeric
        assert_eq!(records[1].scan_id(), Some("P001"));
        assert_eq!(records[0].scan_id(), Some("P001A"));
        assert_eq!(records[3].scan_id(), Some("P001B"));
        assert_eq!(records[2].scan_id(), Some("P001C"));
    }

    #[test]
    fn test_subjects_are_independent() {
        let mut records = vec![
            record("1.dcm", "P001", "1.1", Some("20250110")),
            record("2.dcm", "P002", "2.1", Some("20240110")),
            record("3.dcm", "P002", "2.2", Some("20240210")),
        ];
        let (_, assignment) = assign_scan_ids(&mut records);
        assert_eq!(records[0].scan_id(), Some("P001"));
        assert_eq!(records[1].scan_id(), Some("P002"));
        assert_eq!(records[2].scan_id(), Some("P002A"));
        assert_eq!(assignment.subject_count(), 2);
    }

    #[test]
    fn test_ungroupable_records_get_no_scan_id() {
        let mut records = vec![
            MetadataRecord::new("1.dcm").with_field(tags::PATIENT_ID, "P001"),
            record("2.dcm", "P001", "1.1", Some("20250110")),
        ];
        let (grouping, _) = assign_scan_ids(&mut records);
        assert_eq!(grouping.ungroupable(), &[0]);
        assert_eq!(records[0].scan_id(), None);
        assert_eq!(records[1].scan_id(), Some("P001"));
    }

    fn many_series(subject: &str, n: usize) -> Vec<MetadataRecord> {
        (0..n)
            .map(|i| {
                // not calendar dates, only their ordering matters here
                let date = format!("2000{:04}", i + 1);
                record(
                    &format!("{subject}/{i}.dcm"),
                    subject,
                    &format!("1.{i}"),
                    Some(&date),
                )
            })
            .collect()
    }

    #[test]
    fn test_uniqueness_and_overflow() {
        let mut records = many_series("P001", 200);
        assign_scan_ids(&mut records);

        let ids: HashSet<_> = records.iter().map(|r| r.scan_id().unwrap()).collect();
        assert_eq!(ids.len(), 200);

        assert_eq!(records[0].scan_id(), Some("P001"));
        assert_eq!(records[1].scan_id(), Some("P001A"));
        assert_eq!(records[26].scan_id(), Some("P001Z"));
        assert_eq!(records[27].scan_id(), Some("P001!"));
        assert_eq!(records[85].scan_id(), Some("P001q"));
        assert_eq!(records[86].scan_id(), Some("P001_scan86"));
        assert_eq!(records[199].scan_id(), Some("P001_scan199"));
    }

    #[test]
    fn test_87_series_overflow() {
        let mut records = many_series("S", 87);
        assign_scan_ids(&mut records);
        assert_eq!(records[86].scan_id(), Some("S_scan86"));
    }

    #[test]
    fn test_determinism_under_reordering() {
        let mut records = many_series("P001", 40);
        records.extend(many_series("P002", 5));
        // several files per series
        let extra: Vec<_> = records
            .iter()
            .map(|r| {
                let path = format!("dup-{}", r.file_path().display());
                let mut copy = MetadataRecord::new(path);
                for (tag, value) in r.fields() {
                    copy.set_field(*tag, value.clone());
                }
                copy
            })
            .collect();
        records.extend(extra);

        let mut forward = records.clone();
        let (_, forward_assignment) = assign_scan_ids(&mut forward);

        let mut backward = records.clone();
        backward.reverse();
        let (_, backward_assignment) = assign_scan_ids(&mut backward);

        let mut rotated = records.clone();
        rotated.rotate_left(17);
        let (_, rotated_assignment) = assign_scan_ids(&mut rotated);

        assert_eq!(forward_assignment, backward_assignment);
        assert_eq!(forward_assignment, rotated_assignment);

        let by_path = |records: &[MetadataRecord]| {
            let mut pairs: Vec<_> = records
                .iter()
                .map(|r| (r.file_path().to_path_buf(), r.scan_id().map(String::from)))
                .collect();
            pairs.sort();
            pairs
        };
        assert_eq!(by_path(&forward), by_path(&backward));
        assert_eq!(by_path(&forward), by_path(&rotated));
    }

    #[test]
    fn test_group_cohesion() {
        let mut records = vec![
            record("1.dcm", "P001", "1.1", Some("20250110")),
            record("2.dcm", "P001", "1.1", Some("20250130")),
            record("3.dcm", "P001", "1.1", None),
            record("4.dcm", "P001", "1.2", Some("20250120")),
        ];
        assign_scan_ids(&mut records);
        assert_eq!(records[0].scan_id(), Some("P001"));
        assert_eq!(records[1].scan_id(), Some("P001"));
        assert_eq!(records[2].scan_id(), Some("P001"));
        assert_eq!(records[3].scan_id(), Some("P001A"));
    }
}
