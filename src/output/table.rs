use crate::anonymizer::AnonymizedRecord;
use crate::record::{Column, MetadataRecord};
use crate::rules::SCAN_ID_FIELD;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// One of the two metadata export tables.
///
/// Both tables share the fixed [`Column`] schema and list one row per extracted file in discovery
/// order, so they can be joined by position or by file path. Rows keep the source file path, which
/// is not one of the exported columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataTable {
    rows: Vec<(PathBuf, Vec<String>)>,
}

impl MetadataTable {
    /// The table of original field values.
    pub fn original(records: &[MetadataRecord]) -> Self {
        let rows = records
            .iter()
            .map(|record| {
                let cells = Column::ALL
                    .iter()
                    .map(|column| record.field(column.tag()).as_cell().to_owned())
                    .collect();
                (record.file_path().to_path_buf(), cells)
            })
            .collect();
        Self { rows }
    }

    /// The table of anonymized field values, with the assigned scan ID (or nothing) in the
    /// accession number column.
    pub fn anonymized(records: &[AnonymizedRecord]) -> Self {
        let rows = records
            .iter()
            .map(|record| {
                let cells = Column::ALL
                    .iter()
                    .map(|column| match column.tag() {
                        tag if tag == SCAN_ID_FIELD => record.scan_id().unwrap_or_default().to_owned(),
                        tag => record.field(tag).as_cell().to_owned(),
                    })
                    .collect();
                (record.file_path().to_path_buf(), cells)
            })
            .collect();
        Self { rows }
    }

    pub fn header() -> Vec<&'static str> {
        Column::ALL.iter().map(|column| column.header()).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &[String]> {
        self.rows.iter().map(|(_, cells)| cells.as_slice())
    }

    pub fn file_paths(&self) -> impl Iterator<Item = &Path> {
        self.rows.iter().map(|(path, _)| path.as_path())
    }

    pub fn cell(&self, row: usize, column: Column) -> Option<&str> {
        let index = Column::ALL.iter().position(|&c| c == column)?;
        self.rows
            .get(row)
            .and_then(|(_, cells)| cells.get(index))
            .map(String::as_str)
    }

    /// Renders the table as CSV with a header line, quoting cells where needed.
    pub fn write_csv<W: Write>(&self, mut writer: W) -> io::Result<()> {
        write_csv_line(&mut writer, Self::header())?;
        for (_, cells) in &self.rows {
            write_csv_line(&mut writer, cells.iter().map(String::as_str))?;
        }
        writer.flush()
    }

    /// Creates (or truncates) the table file at `path`, creating parent directories.
    pub fn create_file(path: &Path) -> io::Result<File> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        File::create(path)
    }

    /// Writes the CSV rendering to `path`, creating parent directories.
    pub fn write_to_path(&self, path: &Path) -> io::Result<()> {
        self.write_csv(BufWriter::new(Self::create_file(path)?))
    }
}

fn write_csv_line<'a, W: Write>(
    writer: &mut W,
    cells: impl IntoIterator<Item = &'a str>,
) -> io::Result<()> {
    for (i, cell) in cells.into_iter().enumerate() {
        if i > 0 {
            writer.write_all(b",")?;
        }
        if cell.contains([',', '"', '\n', '\r']) {
            write!(writer, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            writer.write_all(cell.as_bytes())?;
        }
    }
    writer.write_all(b"\r\n")
}
