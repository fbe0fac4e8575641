use log::warn;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

pub const DEFAULT_EXTENSION: &str = "dcm";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("input directory {} does not exist or is not a directory", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("input directory {} is not readable: {}", .0.display(), .1.to_lowercase())]
    DirectoryUnreadable(PathBuf, String),
}

/// Enumerates candidate files below an input root.
///
/// Every call to [`FileDiscovery::files`] starts a fresh walk over the tree, so the sequence can
/// be consumed more than once. Entries are visited in file name order to keep batch output
/// reproducible across runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiscovery {
    root: PathBuf,
    extension: Option<String>,
}

impl FileDiscovery {
    /// Creates a new [`FileDiscovery`] for the given root.
    ///
    /// # Arguments
    ///
    /// * `root` - Directory to search
    /// * `extension` - Only files with this extension (case-insensitive, leading dot optional)
    ///   are returned. `None` accepts every file.
    ///
    /// # Returns
    ///
    /// A [`DiscoveryError`] if the root does not exist, is not a directory or cannot be read.
    pub fn new(root: impl Into<PathBuf>, extension: Option<&str>) -> Result<Self, DiscoveryError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(DiscoveryError::DirectoryNotFound(root));
        }
        if let Err(err) = fs::read_dir(&root) {
            return Err(DiscoveryError::DirectoryUnreadable(root, err.to_string()));
        }

        let extension = extension
            .map(|ext| ext.trim_start_matches('.').to_owned())
            .filter(|ext| !ext.is_empty());

        Ok(Self { root, extension })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily walks the tree below the root and yields the matching file paths.
    pub fn files(&self) -> impl Iterator<Item = PathBuf> + '_ {
        WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!("skipping unreadable entry: {}", err);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(move |path| self.matches_extension(path))
    }

    fn matches_extension(&self, path: &Path) -> bool {
        match &self.extension {
            None => true,
            Some(wanted) => path
                .extension()
                .and_then(OsStr::to_str)
                .is_some_and(|ext| ext.eq_ignore_ascii_case(wanted)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn make_tree() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("p1/s1")).unwrap();
        fs::create_dir_all(dir.path().join("p2")).unwrap();
        File::create(dir.path().join("p1/s1/b.dcm")).unwrap();
        File::create(dir.path().join("p1/s1/a.DCM")).unwrap();
        File::create(dir.path().join("p1/notes.txt")).unwrap();
        File::create(dir.path().join("p2/c.dcm")).unwrap();
        dir
    }

    #[test]
    fn test_missing_root() {
        let result = FileDiscovery::new("/this/path/does/not/exist", Some("dcm"));
        assert!(matches!(
            result,
            Err(DiscoveryError::DirectoryNotFound(_))
        ));
    }

    #[test]
    fn test_root_is_a_file() {
        let dir = make_tree();
        let result = FileDiscovery::new(dir.path().join("p2/c.dcm"), Some("dcm"));
        assert!(matches!(
            result,
            Err(DiscoveryError::DirectoryNotFound(_))
        ));
    }

    #[test]
    fn test_recursive_with_extension_filter() {
        let dir = make_tree();
        let discovery = FileDiscovery::new(dir.path(), Some(".dcm")).unwrap();
        let files: Vec<_> = discovery
            .files()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            files,
            vec![
                PathBuf::from("p1/s1/a.DCM"),
                PathBuf::from("p1/s1/b.dcm"),
                PathBuf::from("p2/c.dcm"),
            ]
        );
    }

    #[test]
    fn test_no_extension_filter() {
        let dir = make_tree();
        let discovery = FileDiscovery::new(dir.path(), None).unwrap();
        assert_eq!(discovery.files().count(), 4);
    }

    #[test]
    fn test_files_is_restartable() {
        let dir = make_tree();
        let discovery = FileDiscovery::new(dir.path(), Some("dcm")).unwrap();
        let first: Vec<_> = discovery.files().collect();
        let second: Vec<_> = discovery.files().collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }
}
