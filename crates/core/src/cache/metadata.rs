//! Metadata record and guard scalar operations.
//!
//! Per-key reads pull untyped SQLite values and decode them explicitly, so a
//! malformed row surfaces as `Error::Decode` instead of a conversion panic.
//! The probes used at cold start look at storage classes and table shape
//! only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, OptionalExtension, types::Value, types::ValueRef};

use super::connection::CacheDb;
use super::integrity::{NamespaceStore, StoredScalar};
use super::migrations::{CACHE_STATE_DDL, IMAGE_META_DDL};
use super::types::{BlobFormat, MetadataRecord};
use crate::Error;

const IMAGE_META_COLUMNS: [&str; 5] = ["key", "remote_url", "fetched_at", "format", "size"];

/// Raw column values of one metadata row.
type RawRecord = (Value, Value, Value, Value);

fn decode_fault(key: &str, reason: impl Into<String>) -> Error {
    Error::Decode { key: key.to_string(), reason: reason.into() }
}

fn storage_class(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Integer(_) => "integer",
        Value::Real(_) => "real",
        Value::Text(_) => "text",
        Value::Blob(_) => "blob",
    }
}

/// Typed decode of a raw metadata row.
fn decode_record(key: &str, raw: RawRecord) -> Result<MetadataRecord, Error> {
    let (remote_url, fetched_at, format, size) = raw;

    let remote_url = match remote_url {
        Value::Text(s) if !s.is_empty() => s,
        other => return Err(decode_fault(key, format!("remote_url is {}", storage_class(&other)))),
    };

    let fetched_at = match fetched_at {
        Value::Text(s) => DateTime::parse_from_rfc3339(&s)
            .map_err(|e| decode_fault(key, format!("fetched_at: {e}")))?
            .with_timezone(&Utc),
        other => return Err(decode_fault(key, format!("fetched_at is {}", storage_class(&other)))),
    };

    let format = match format {
        Value::Text(s) => BlobFormat::parse(&s).ok_or_else(|| decode_fault(key, format!("unknown format {s:?}")))?,
        other => return Err(decode_fault(key, format!("format is {}", storage_class(&other)))),
    };

    let size = match size {
        Value::Integer(n) if n >= 0 => n as u64,
        other => return Err(decode_fault(key, format!("size is {} {other:?}", storage_class(&other)))),
    };

    Ok(MetadataRecord { remote_url, fetched_at, format, size })
}

impl CacheDb {
    /// Get the metadata record for a key.
    ///
    /// Returns `Ok(None)` if the key is unknown and `Error::Decode` if the
    /// stored row is malformed.
    pub async fn get_record(&self, key: &str) -> Result<Option<MetadataRecord>, Error> {
        let lookup = key.to_string();
        let raw = self
            .conn
            .call(move |conn| -> Result<Option<RawRecord>, Error> {
                let row = conn
                    .query_row(
                        "SELECT remote_url, fetched_at, format, size FROM image_meta WHERE key = ?1",
                        params![lookup],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                    )
                    .optional()?;
                Ok(row)
            })
            .await
            .map_err(Error::from)?;

        raw.map(|raw| decode_record(key, raw)).transpose()
    }

    /// Insert or update the metadata record for a key.
    pub async fn set_record(&self, key: &str, record: &MetadataRecord) -> Result<(), Error> {
        let key = key.to_string();
        let record = record.clone();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO image_meta (key, remote_url, fetched_at, format, size)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT(key) DO UPDATE SET
                        remote_url = excluded.remote_url,
                        fetched_at = excluded.fetched_at,
                        format = excluded.format,
                        size = excluded.size",
                    params![
                        key,
                        record.remote_url,
                        record.fetched_at.to_rfc3339(),
                        record.format.as_str(),
                        record.size as i64,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Delete the metadata record for a key. Returns whether a row existed.
    pub async fn remove_record(&self, key: &str) -> Result<bool, Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM image_meta WHERE key = ?1", params![key])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete the records of several keys that were fetched before `cutoff`.
    ///
    /// A row stamped at or after `cutoff` was written by a concurrent refetch
    /// and is kept. A row whose timestamp is unreadable is removed.
    pub async fn remove_records_before(&self, keys: Vec<String>, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let tx = conn.transaction()?;
                let mut deleted = 0u64;
                {
                    let mut select = tx.prepare("SELECT fetched_at FROM image_meta WHERE key = ?1")?;
                    let mut delete = tx.prepare("DELETE FROM image_meta WHERE key = ?1")?;
                    for key in &keys {
                        let fetched_at: Option<Value> = select.query_row(params![key], |row| row.get(0)).optional()?;
                        let Some(fetched_at) = fetched_at else {
                            continue;
                        };
                        let newer = match fetched_at {
                            Value::Text(s) => {
                                DateTime::parse_from_rfc3339(&s).is_ok_and(|t| t.with_timezone(&Utc) >= cutoff)
                            }
                            _ => false,
                        };
                        if !newer {
                            deleted += delete.execute(params![key])? as u64;
                        }
                    }
                }
                tx.commit()?;
                Ok(deleted)
            })
            .await
            .map_err(Error::from)
    }

    /// All keys with a metadata record, oldest fetch first.
    pub async fn all_keys(&self) -> Result<Vec<String>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<String>, Error> {
                let mut stmt =
                    conn.prepare("SELECT key FROM image_meta WHERE typeof(key) = 'text' ORDER BY fetched_at ASC")?;
                let keys = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(keys)
            })
            .await
            .map_err(Error::from)
    }

    /// Number of metadata records. Reads no row contents.
    pub async fn record_count(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM image_meta", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}

#[async_trait]
impl NamespaceStore for CacheDb {
    async fn probe_scalar(&self, name: &'static str) -> Result<StoredScalar, Error> {
        self.conn
            .call(move |conn| -> Result<StoredScalar, Error> {
                let probed = conn
                    .query_row("SELECT value FROM cache_state WHERE name = ?1", params![name], |row| {
                        Ok(match row.get_ref(0)? {
                            ValueRef::Integer(v) => StoredScalar::Integer(v),
                            _ => StoredScalar::Foreign,
                        })
                    })
                    .optional()?;
                Ok(probed.unwrap_or(StoredScalar::Absent))
            })
            .await
            .map_err(Error::from)
    }

    async fn probe_namespace(&self) -> Result<bool, Error> {
        self.conn
            .call(|conn| -> Result<bool, Error> {
                let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('image_meta')")?;
                let mut columns = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                columns.sort_unstable();

                let mut expected = IMAGE_META_COLUMNS.map(String::from).to_vec();
                expected.sort_unstable();
                Ok(columns == expected)
            })
            .await
            .map_err(Error::from)
    }

    async fn reset_namespace(&self) -> Result<(), Error> {
        self.conn
            .call(|conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                tx.execute_batch("DROP TABLE IF EXISTS image_meta; DROP TABLE IF EXISTS cache_state;")?;
                tx.execute_batch(CACHE_STATE_DDL)?;
                tx.execute_batch(IMAGE_META_DDL)?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn write_scalar(&self, name: &'static str, value: i64) -> Result<(), Error> {
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO cache_state (name, value) VALUES (?1, ?2)
                    ON CONFLICT(name) DO UPDATE SET value = excluded.value",
                    params![name, value],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }
}
