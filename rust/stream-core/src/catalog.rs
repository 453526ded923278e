// rust/stream-core/src/catalog.rs

//! Shard catalog resolution.
//!
//! A dataset is an ordered list of shard files. Resuming by global offset is
//! only correct if that order never changes, so the listing from the
//! catalog is always re-sorted with a deterministic [`ShardOrder`] rather
//! than trusted as returned.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::config::CatalogConfig;
use crate::error::{Result, StreamError};
use crate::storage::StorageBackend;

/// Identifier of one shard: its path relative to the dataset root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShardId(String);

impl ShardId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShardId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ShardId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Lists the shard files of a dataset.
pub trait ShardCatalog: Send + Sync {
    /// Returns every shard of `dataset`, in any order.
    ///
    /// # Errors
    ///
    /// Returns a listing error if the dataset cannot be enumerated.
    fn list_shards(&self, dataset: &str) -> Result<Vec<ShardId>>;
}

/// Deterministic ordering key for shards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ShardOrder {
    /// Plain byte-wise order of the shard path.
    #[default]
    Lexicographic,
    /// Shards grouped by path prefix, groups in the given order, each group
    /// lexicographic. Shards outside every group are excluded.
    PrefixGroups(Vec<String>),
}

impl ShardOrder {
    pub fn from_config(config: &CatalogConfig) -> Self {
        if config.prefix_groups.is_empty() {
            Self::Lexicographic
        } else {
            Self::PrefixGroups(config.prefix_groups.clone())
        }
    }

    /// Sorts `shards` in place and drops duplicates and excluded entries.
    pub fn apply(&self, mut shards: Vec<ShardId>) -> Vec<ShardId> {
        shards.sort();
        shards.dedup();

        match self {
            Self::Lexicographic => shards,
            Self::PrefixGroups(groups) => {
                let mut ordered = Vec::with_capacity(shards.len());
                for prefix in groups {
                    let group: Vec<ShardId> = shards
                        .iter()
                        .filter(|s| s.as_str().starts_with(prefix.as_str()))
                        .filter(|s| !ordered.contains(*s))
                        .cloned()
                        .collect();
                    ordered.extend(group);
                }
                ordered
            }
        }
    }
}

/// Resolves the ordered shard list for `dataset`.
///
/// A failed listing is not fatal: it is logged and resolves to an empty
/// catalog, leaving the caller to decide whether an empty stream is fine.
pub fn resolve_catalog(
    catalog: &dyn ShardCatalog,
    dataset: &str,
    order: &ShardOrder,
) -> Vec<ShardId> {
    tracing::info!(dataset, "fetching shard list");

    match catalog.list_shards(dataset) {
        Ok(shards) => {
            let shards = order.apply(shards);
            tracing::info!(dataset, shards = shards.len(), "resolved shard catalog");
            shards
        }
        Err(e) => {
            tracing::warn!(dataset, error = %e, "error listing shards, streaming nothing");
            Vec::new()
        }
    }
}

/// Catalog backed by a [`StorageBackend`]: a dataset is a directory (or key
/// prefix) and its shards are the files below it.
pub struct StorageCatalog {
    storage: Arc<dyn StorageBackend>,
    extension: Option<String>,
}

impl StorageCatalog {
    pub fn new(storage: Arc<dyn StorageBackend>, extension: Option<String>) -> Self {
        Self { storage, extension }
    }
}

impl ShardCatalog for StorageCatalog {
    fn list_shards(&self, dataset: &str) -> Result<Vec<ShardId>> {
        let names = self
            .storage
            .list(Path::new(dataset))
            .map_err(|e| StreamError::listing(dataset, e.to_string()))?;

        let suffix = self.extension.as_ref().map(|ext| format!(".{ext}"));
        Ok(names
            .into_iter()
            .filter(|name| suffix.as_ref().map_or(true, |s| name.ends_with(s.as_str())))
            .map(ShardId::from)
            .collect())
    }
}
