//! MySQL metadata driver.
//!
//! One `fragments` table holds every fragment record; the legacy-v1 and v2
//! call families share it and are told apart by the `registry_version`
//! column. Writes are upserts keyed on the full fragment identity, so a
//! re-upload of the same `(path, index, range)` atomically replaces the
//! previous record.

use async_trait::async_trait;
use chunkgate_core::types::{FragmentKey, FragmentLocation};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::Row;

use crate::{descendants, direct_children, MetaConfig, MetaError, MetaStore};

const V1: u8 = 1;
const V2: u8 = 2;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS fragments (
    path             VARCHAR(512)      NOT NULL,
    fragment_index   BIGINT UNSIGNED   NOT NULL,
    byte_start       BIGINT UNSIGNED   NOT NULL,
    byte_end         BIGINT UNSIGNED   NOT NULL,
    file_id          BIGINT UNSIGNED   NOT NULL,
    group_id         SMALLINT UNSIGNED NOT NULL,
    is_last          BOOLEAN           NOT NULL,
    registry_version TINYINT UNSIGNED  NOT NULL,
    PRIMARY KEY (path, fragment_index, byte_start, byte_end)
)
";

const UPSERT: &str = "
INSERT INTO fragments
    (path, fragment_index, byte_start, byte_end, file_id, group_id, is_last, registry_version)
VALUES (?, ?, ?, ?, ?, ?, ?, ?)
ON DUPLICATE KEY UPDATE
    file_id = VALUES(file_id),
    group_id = VALUES(group_id),
    is_last = VALUES(is_last),
    registry_version = VALUES(registry_version)
";

pub struct MySqlMetaStore {
    pool: MySqlPool,
}

impl MySqlMetaStore {
    /// Connects to the configured database and ensures the schema exists.
    pub async fn connect(config: &MetaConfig) -> Result<Self, MetaError> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database);
        let pool = MySqlPoolOptions::new()
            .max_connections(config.pool_size)
            .connect_with(options)
            .await?;
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    async fn upsert(&self, location: &FragmentLocation, version: u8) -> Result<(), MetaError> {
        sqlx::query(UPSERT)
            .bind(&location.key.path)
            .bind(location.key.index)
            .bind(location.key.start)
            .bind(location.key.end)
            .bind(location.file_id)
            .bind(location.group_id)
            .bind(location.is_last)
            .bind(version)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, path: &str, version: u8) -> Result<(), MetaError> {
        sqlx::query("DELETE FROM fragments WHERE path = ? AND registry_version = ?")
            .bind(path)
            .bind(version)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn paths_with_prefix(&self, prefix: &str) -> Result<Vec<String>, MetaError> {
        let pattern = format!("{}%", escape_like(prefix));
        let rows = sqlx::query(
            "SELECT DISTINCT path FROM fragments WHERE path LIKE ? ESCAPE '\\\\'",
        )
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("path").map_err(MetaError::from))
            .collect()
    }
}

fn decode_location(row: &MySqlRow, key: FragmentKey) -> Result<FragmentLocation, MetaError> {
    Ok(FragmentLocation {
        key,
        file_id: row.try_get("file_id")?,
        group_id: row.try_get("group_id")?,
        is_last: row.try_get("is_last")?,
    })
}

/// Escapes LIKE metacharacters so a stored path cannot widen a prefix query.
fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[async_trait]
impl MetaStore for MySqlMetaStore {
    async fn store_v1(&self, location: &FragmentLocation) -> Result<(), MetaError> {
        self.upsert(location, V1).await
    }

    async fn store_v2(&self, location: &FragmentLocation) -> Result<(), MetaError> {
        self.upsert(location, V2).await
    }

    async fn fragment(&self, key: &FragmentKey) -> Result<Option<FragmentLocation>, MetaError> {
        let row = sqlx::query(
            "SELECT file_id, group_id, is_last FROM fragments \
             WHERE path = ? AND fragment_index = ? AND byte_start = ? AND byte_end = ?",
        )
        .bind(&key.path)
        .bind(key.index)
        .bind(key.start)
        .bind(key.end)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| decode_location(&row, key.clone())).transpose()
    }

    async fn file_fragments(&self, path: &str) -> Result<Vec<FragmentLocation>, MetaError> {
        let rows = sqlx::query(
            "SELECT fragment_index, byte_start, byte_end, file_id, group_id, is_last \
             FROM fragments WHERE path = ? ORDER BY fragment_index, byte_start",
        )
        .bind(path)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let key = FragmentKey::new(
                    path,
                    row.try_get("fragment_index")?,
                    row.try_get("byte_start")?,
                    row.try_get("byte_end")?,
                );
                decode_location(row, key)
            })
            .collect()
    }

    async fn delete_v1(&self, path: &str) -> Result<(), MetaError> {
        self.delete(path, V1).await
    }

    async fn delete_v2(&self, path: &str) -> Result<(), MetaError> {
        self.delete(path, V2).await
    }

    async fn move_file(&self, source: &str, dest: &str) -> Result<(), MetaError> {
        sqlx::query("UPDATE fragments SET path = ? WHERE path = ?")
            .bind(dest)
            .bind(source)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<String>, MetaError> {
        let prefix = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{path}/")
        };
        let paths = self.paths_with_prefix(&prefix).await?;
        Ok(direct_children(paths.iter().map(String::as_str), path))
    }

    async fn list_descendants(&self, path: &str) -> Result<Vec<String>, MetaError> {
        let prefix = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{path}/")
        };
        let paths = self.paths_with_prefix(&prefix).await?;
        Ok(descendants(paths.iter().map(String::as_str), path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_metacharacters_are_escaped() {
        assert_eq!(escape_like("/a_b%c\\d"), "/a\\_b\\%c\\\\d");
        assert_eq!(escape_like("/plain/path"), "/plain/path");
    }
}
