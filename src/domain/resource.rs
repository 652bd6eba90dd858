//! Resource specifications
//!
//! Describes a replicated resource and where it should be placed. The
//! defining record lives in the control plane; this is only the request.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Size used when none is requested
pub const DEFAULT_SIZE_KIB: u64 = 4096;

/// Storage pool used when none is requested
pub const DEFAULT_STORAGE_POOL: &str = "DfltStorPool";

/// Diskless storage pool used when none is requested
pub const DEFAULT_DISKLESS_STORAGE_POOL: &str = "DfltDisklessStorPool";

/// A resource and its desired placement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResourceSpec {
    /// Unique name within the control plane
    pub name: String,
    /// Nodes receiving a diskful assignment
    pub node_list: Vec<String>,
    /// Nodes receiving a diskless assignment
    pub client_list: Vec<String>,
    /// Number of replicas for the control plane to place itself
    pub auto_place: u64,
    /// Avoid nodes already holding resources matching this regex
    pub do_not_place_with_regex: String,
    /// Size of volume 0
    pub size_kib: u64,
    pub storage_pool: String,
    pub diskless_storage_pool: String,
    pub encryption: bool,
}

impl ResourceSpec {
    /// Spec referring to an existing resource by name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
        .with_default_pools()
    }

    /// Fill in defaults and drop duplicate placements.
    ///
    /// - no name: a fresh UUID is used
    /// - no placement at all: auto-place one replica
    /// - duplicates are removed from both node lists, and nodes already
    ///   receiving storage are removed from the client list
    pub fn normalized(mut self) -> Self {
        if self.name.is_empty() {
            self.name = uuid::Uuid::new_v4().to_string();
        }

        if self.node_list.is_empty() && self.client_list.is_empty() && self.auto_place == 0 {
            self.auto_place = 1;
        }

        self.node_list = uniq(&self.node_list);
        self.client_list = subtract(&self.node_list, &self.client_list);

        if self.size_kib == 0 {
            self.size_kib = DEFAULT_SIZE_KIB;
        }

        self.with_default_pools()
    }

    fn with_default_pools(mut self) -> Self {
        if self.storage_pool.is_empty() {
            self.storage_pool = DEFAULT_STORAGE_POOL.to_string();
        }
        if self.diskless_storage_pool.is_empty() {
            self.diskless_storage_pool = DEFAULT_DISKLESS_STORAGE_POOL.to_string();
        }
        self
    }

    /// Whether the control plane should place replicas itself
    pub fn is_auto_placed(&self) -> bool {
        self.auto_place > 0
    }

    /// The caller asked for placement, so a missing definition may be created
    pub fn wants_definition(&self) -> bool {
        self.is_auto_placed() || !self.node_list.is_empty() || !self.client_list.is_empty()
    }

    /// Pool an assignment should draw from
    pub fn pool_for(&self, diskless: bool) -> &str {
        if diskless {
            &self.diskless_storage_pool
        } else {
            &self.storage_pool
        }
    }
}

/// Remove duplicates, keeping first occurrences in order
fn uniq(items: &[String]) -> Vec<String> {
    subtract(&[], items)
}

/// Elements of `items` not in `remove`, deduplicated
fn subtract(remove: &[String], items: &[String]) -> Vec<String> {
    let mut seen: HashSet<&str> = remove.iter().map(String::as_str).collect();
    items
        .iter()
        .filter(|item| seen.insert(item.as_str()))
        .cloned()
        .collect()
}
