//! The metadata collaborator of the chunkgate router.
//!
//! The router records one [`FragmentLocation`] per successful upload and
//! resolves fragments, file listings, and path enumeration from here. Two
//! drivers implement the contract: MySQL for deployments and an in-memory
//! map for tests and local development.

use async_trait::async_trait;
use chunkgate_core::types::{FragmentKey, FragmentLocation};
use serde::{Deserialize, Serialize};

/// Error types raised by metadata drivers.
pub mod error;
/// In-memory driver for tests and `memory` backend deployments.
pub mod memory;
/// MySQL driver.
pub mod mysql;

pub use error::MetaError;
pub use memory::MemoryMetaStore;
pub use mysql::MySqlMetaStore;

/// Everything the router needs from the metadata database.
///
/// `store_v1`/`delete_v1` exist for clients still speaking the legacy
/// registry schema; the `Registry-Version` request header selects between
/// the two call families.
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Records a fragment location under the legacy v1 schema, replacing any
    /// previous record for the same key.
    async fn store_v1(&self, location: &FragmentLocation) -> Result<(), MetaError>;

    /// Records a fragment location under the v2 schema, replacing any
    /// previous record for the same key.
    async fn store_v2(&self, location: &FragmentLocation) -> Result<(), MetaError>;

    /// Resolves one fragment, if it was ever uploaded.
    async fn fragment(&self, key: &FragmentKey) -> Result<Option<FragmentLocation>, MetaError>;

    /// Every fragment recorded for the path, ordered by fragment index and
    /// range start.
    async fn file_fragments(&self, path: &str) -> Result<Vec<FragmentLocation>, MetaError>;

    /// Drops every v1 fragment record of the path.
    async fn delete_v1(&self, path: &str) -> Result<(), MetaError>;

    /// Drops every v2 fragment record of the path.
    async fn delete_v2(&self, path: &str) -> Result<(), MetaError>;

    /// Renames a file, carrying all its fragment records along.
    async fn move_file(&self, source: &str, dest: &str) -> Result<(), MetaError>;

    /// Paths exactly one level below the directory.
    async fn list_directory(&self, path: &str) -> Result<Vec<String>, MetaError>;

    /// Every path at any depth below the directory.
    async fn list_descendants(&self, path: &str) -> Result<Vec<String>, MetaError>;
}

/// Which driver backs the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaBackend {
    /// MySQL, the production driver.
    #[default]
    Mysql,
    /// Process-local maps; nothing survives a restart.
    Memory,
}

/// Metadata database connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaConfig {
    /// Driver selection.
    pub backend: MetaBackend,
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database user.
    pub user: String,
    /// Database password.
    pub password: String,
    /// Schema holding the fragment tables.
    pub database: String,
    /// Connection pool size.
    pub pool_size: u32,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            backend: MetaBackend::Mysql,
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: "chunkgate".to_string(),
            password: String::new(),
            database: "chunkgate".to_string(),
            pool_size: 5,
        }
    }
}

/// Normalizes a directory argument into the prefix its children share:
/// `"/a"` and `"/a/"` both become `"/a/"`.
fn dir_prefix(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("{trimmed}/")
    }
}

/// Paths exactly one level below `dir`, computed from a flat path set.
/// `/a/b/c` contributes `/a/b` to a listing of `/a`.
pub(crate) fn direct_children<'a>(
    paths: impl IntoIterator<Item = &'a str>,
    dir: &str,
) -> Vec<String> {
    let prefix = dir_prefix(dir);
    let mut children: Vec<String> = paths
        .into_iter()
        .filter_map(|path| {
            let rest = path.strip_prefix(&prefix)?;
            if rest.is_empty() {
                return None;
            }
            let segment = rest.split('/').next().unwrap_or(rest);
            Some(format!("{prefix}{segment}"))
        })
        .collect();
    children.sort_unstable();
    children.dedup();
    children
}

/// Every stored path below `dir`, at any depth.
pub(crate) fn descendants<'a>(paths: impl IntoIterator<Item = &'a str>, dir: &str) -> Vec<String> {
    let prefix = dir_prefix(dir);
    let mut found: Vec<String> = paths
        .into_iter()
        .filter(|path| path.starts_with(&prefix) && path.len() > prefix.len())
        .map(str::to_string)
        .collect();
    found.sort_unstable();
    found.dedup();
    found
}
