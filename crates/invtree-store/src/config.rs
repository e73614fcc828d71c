//! Store configuration.

use serde::{Deserialize, Serialize};

fn default_compression_level() -> u32 {
    6
}

fn default_touch_marker_files() -> bool {
    true
}

/// Configuration for [`InventoryStore`](crate::InventoryStore) and
/// [`RawInventoryStore`](crate::RawInventoryStore).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Gzip level (0-9) for the envelope artifact.
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    /// Touch the `.last` marker files after every inventory or status-data
    /// write.
    #[serde(default = "default_touch_marker_files")]
    pub touch_marker_files: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            compression_level: default_compression_level(),
            touch_marker_files: default_touch_marker_files(),
        }
    }
}

impl StoreConfig {
    pub(crate) fn compression(&self) -> flate2::Compression {
        flate2::Compression::new(self.compression_level.min(9))
    }
}
