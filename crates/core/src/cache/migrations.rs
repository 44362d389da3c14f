//! Database schema migrations.
//!
//! Uses a simple version table approach to track applied migrations.
//! These cover the DDL of the store itself; the contents of the image
//! namespace are versioned separately by the integrity guard.

use super::Error;
use tokio_rusqlite::{Connection, params};

/// DDL for the guard scalars, shared with namespace invalidation.
pub(crate) const CACHE_STATE_DDL: &str = include_str!("../../migrations/001_cache_state.sql");

/// DDL for the image metadata table, shared with namespace invalidation.
pub(crate) const IMAGE_META_DDL: &str = include_str!("../../migrations/002_image_meta.sql");

/// Migration list: (version, SQL).
///
/// Migrations must be applied in order. All migrations are idempotent
/// using CREATE IF NOT EXISTS.
const MIGRATIONS: &[(i64, &str)] = &[(1, CACHE_STATE_DDL), (2, IMAGE_META_DDL)];

/// Run any pending migrations.
///
/// This creates the _migrations table if it doesn't exist, checks the
/// current version, and applies any migrations that haven't been run yet.
///
/// # Errors
///
/// Returns an error if a migration SQL fails to execute.
pub async fn run(conn: &Connection) -> Result<(), Error> {
    conn.call(|conn| -> Result<(), Error> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(Error::from)?;

        let current: i64 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))
            .map_err(|e| Error::MigrationFailed(format!("unreadable migration table: {e}")))?;

        for (version, sql) in MIGRATIONS {
            if *version > current {
                conn.execute_batch(sql)
                    .map_err(|e| Error::MigrationFailed(format!("version {version}: {e}")))?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, ?2)",
                    params![version, chrono::Utc::now().to_rfc3339()],
                )
                .map_err(Error::from)?;
                tracing::debug!(version, "applied migration");
            }
        }

        Ok(())
    })
    .await
    .map_err(Error::from)
}
