use crate::record::MetadataRecord;
use crate::scan_id::ChronoKey;
use std::collections::BTreeMap;

/// Identifies one series of one subject.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesKey {
    pub subject_id: String,
    pub series_id: String,
}

impl SeriesKey {
    pub fn new(subject_id: impl Into<String>, series_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            series_id: series_id.into(),
        }
    }

    /// Builds the key of a record, or `None` if its subject or series identifier is absent or
    /// blank.
    pub fn of(record: &MetadataRecord) -> Option<Self> {
        let subject_id = record.subject_id().non_empty()?;
        let series_id = record.series_id().non_empty()?;
        Some(Self::new(subject_id, series_id))
    }
}

/// The records of one (subject, series) pair together with the series' chronological key, the
/// earliest key among its records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesGroup {
    key: SeriesKey,
    members: Vec<usize>,
    chrono_key: ChronoKey,
}

impl SeriesGroup {
    fn new(key: SeriesKey) -> Self {
        Self {
            key,
            members: Vec::new(),
            chrono_key: ChronoKey::unresolved(),
        }
    }

    fn push(&mut self, index: usize, chrono_key: ChronoKey) {
        self.members.push(index);
        if chrono_key < self.chrono_key {
            self.chrono_key = chrono_key;
        }
    }

    pub fn key(&self) -> &SeriesKey {
        &self.key
    }

    /// Indices of the member records in the slice that was grouped, in ascending order.
    pub fn members(&self) -> &[usize] {
        &self.members
    }

    pub fn chrono_key(&self) -> &ChronoKey {
        &self.chrono_key
    }
}

/// The result of grouping a batch of records by (subject, series).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grouping {
    groups: BTreeMap<SeriesKey, SeriesGroup>,
    ungroupable: Vec<usize>,
}

impl Grouping {
    /// Partitions the records by [`SeriesKey`].
    ///
    /// Records without a subject or series identifier end up in [`Grouping::ungroupable`]. The
    /// set of groups and their chronological keys do not depend on the order of `records`.
    pub fn from_records(records: &[MetadataRecord]) -> Self {
        let mut grouping = Grouping::default();
        for (index, record) in records.iter().enumerate() {
            match SeriesKey::of(record) {
                Some(key) => grouping
                    .groups
                    .entry(key.clone())
                    .or_insert_with(|| SeriesGroup::new(key))
                    .push(index, ChronoKey::of(record)),
                None => grouping.ungroupable.push(index),
            }
        }
        grouping
    }

    pub fn groups(&self) -> impl Iterator<Item = &SeriesGroup> {
        self.groups.values()
    }

    pub fn get(&self, key: &SeriesKey) -> Option<&SeriesGroup> {
        self.groups.get(key)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Indices of the records that lack a subject or series identifier.
    pub fn ungroupable(&self) -> &[usize] {
        &self.ungroupable
    }

    /// The groups of every subject, keyed by subject identifier.
    pub fn by_subject(&self) -> BTreeMap<&str, Vec<&SeriesGroup>> {
        let mut subjects: BTreeMap<&str, Vec<&SeriesGroup>> = BTreeMap::new();
        for group in self.groups.values() {
            subjects
                .entry(group.key.subject_id.as_str())
                .or_default()
                .push(group);
        }
        subjects
    }
}
