// Store Options
//
// Durability knobs for the file-backed metadata store, loadable from
// JSON. Every field has a default.

use serde::{Deserialize, Serialize};

pub const DEFAULT_DIR_NAME: &str = "consensus-meta";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Sync the record and its directory on every durable write.
    pub fsync: bool,

    /// Subdirectory of the filesystem root holding one file per replica.
    pub dir_name: String,
}

impl StoreOptions {
    /// Built-in options (used if no config is provided).
    pub fn default_options() -> Self {
        Self {
            fsync: true,
            dir_name: DEFAULT_DIR_NAME.into(),
        }
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::default_options()
    }
}
