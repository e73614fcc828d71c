//! On-disk layout of inventory artifacts below an installation root.
//!
//! ```text
//! var/check_mk/inventory/<host>.json                     current tree
//! var/check_mk/inventory/<host>.json.gz                  gzip envelope
//! var/check_mk/inventory/.last                           marker
//! var/check_mk/inventory_archive/<host>/<ts>.json        archived snapshot
//! var/check_mk/inventory_delta_cache/<host>/<p>_<c>.json cached delta
//! tmp/check_mk/status_data/<host>.json                   status data
//! tmp/check_mk/status_data/.last                         marker
//! ```
//!
//! Every artifact also has a legacy location without the `.json` part, which
//! is read as a fallback and removed once the modern file is written.

use std::path::{Path, PathBuf};

const JSON_SUFFIX: &str = ".json";
const GZ_SUFFIX: &str = ".gz";
const MARKER_FILE: &str = ".last";

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// Modern (`.json`) and legacy location of a plain JSON tree.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TreePath {
    pub path: PathBuf,
    pub legacy: PathBuf,
}

impl TreePath {
    /// # Panics
    ///
    /// Panics if `path` does not end in `.json`.
    pub fn new(path: PathBuf, legacy: PathBuf) -> Self {
        assert!(
            path.to_string_lossy().ends_with(JSON_SUFFIX),
            "tree path {} must end in {}",
            path.display(),
            JSON_SUFFIX
        );
        Self { path, legacy }
    }

    /// Tree path for a file found in an archive or delta-cache directory,
    /// which may be either the modern or the legacy variant.
    pub fn from_archive_or_delta_cache_file_path(file_path: &Path) -> Self {
        let raw = file_path.to_string_lossy();
        match raw.strip_suffix(JSON_SUFFIX) {
            Some(legacy) => Self::new(file_path.to_path_buf(), PathBuf::from(legacy)),
            None => Self::new(with_suffix(file_path, JSON_SUFFIX), file_path.to_path_buf()),
        }
    }
}

/// Modern (`.json.gz`) and legacy (`.gz`) location of a gzip envelope.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TreePathGz {
    pub path: PathBuf,
    pub legacy: PathBuf,
}

/// Resolves artifact locations below an installation root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InventoryPaths {
    root: PathBuf,
}

impl InventoryPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn inventory_dir(&self) -> PathBuf {
        self.root.join("var/check_mk/inventory")
    }

    pub fn status_data_dir(&self) -> PathBuf {
        self.root.join("tmp/check_mk/status_data")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.root.join("var/check_mk/inventory_archive")
    }

    pub fn delta_cache_dir(&self) -> PathBuf {
        self.root.join("var/check_mk/inventory_delta_cache")
    }

    pub fn inventory_marker_file(&self) -> PathBuf {
        self.inventory_dir().join(MARKER_FILE)
    }

    pub fn status_data_marker_file(&self) -> PathBuf {
        self.status_data_dir().join(MARKER_FILE)
    }

    pub fn inventory_tree(&self, host_name: &str) -> TreePath {
        let legacy = self.inventory_dir().join(host_name);
        TreePath::new(with_suffix(&legacy, JSON_SUFFIX), legacy)
    }

    pub fn inventory_tree_gz(&self, host_name: &str) -> TreePathGz {
        let base = self.inventory_dir().join(host_name);
        TreePathGz {
            path: with_suffix(&base, ".json.gz"),
            legacy: with_suffix(&base, GZ_SUFFIX),
        }
    }

    pub fn status_data_tree(&self, host_name: &str) -> TreePath {
        let legacy = self.status_data_dir().join(host_name);
        TreePath::new(with_suffix(&legacy, JSON_SUFFIX), legacy)
    }

    pub fn archive_host(&self, host_name: &str) -> PathBuf {
        self.archive_dir().join(host_name)
    }

    pub fn archive_tree(&self, host_name: &str, timestamp: i64) -> TreePath {
        let legacy = self.archive_host(host_name).join(timestamp.to_string());
        TreePath::new(with_suffix(&legacy, JSON_SUFFIX), legacy)
    }

    pub fn delta_cache_host(&self, host_name: &str) -> PathBuf {
        self.delta_cache_dir().join(host_name)
    }

    /// Cached delta between two snapshots; `None` stands for "no previous
    /// snapshot".
    ///
    /// # Panics
    ///
    /// Panics if `previous_timestamp >= current_timestamp`.
    pub fn delta_cache_tree(
        &self,
        host_name: &str,
        previous_timestamp: Option<i64>,
        current_timestamp: i64,
    ) -> TreePath {
        let previous = match previous_timestamp {
            Some(previous) => {
                assert!(
                    previous < current_timestamp,
                    "previous timestamp {} must be older than current timestamp {}",
                    previous,
                    current_timestamp
                );
                previous.to_string()
            }
            None => "None".to_string(),
        };
        let legacy = self
            .delta_cache_host(host_name)
            .join(format!("{}_{}", previous, current_timestamp));
        TreePath::new(with_suffix(&legacy, JSON_SUFFIX), legacy)
    }
}
