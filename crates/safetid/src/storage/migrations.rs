//! Schema versioning for the documents database.
//!
//! The version lives in the `metadata` table. Each step runs in its own
//! transaction together with the version bump, so an interrupted upgrade
//! resumes from the last completed step.

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::{Error, Result};

use super::schema::SCHEMA_STATEMENTS;

/// The schema version this build writes.
pub const CURRENT_VERSION: i32 = 1;

const VERSION_KEY: &str = "schema_version";

/// One upgrade step.
struct Migration {
    version: i32,
    description: &'static str,
    sql: &'static str,
}

/// Upgrade steps in order. Versions are contiguous from 1.
const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "documents and metadata tables",
    sql: "",
}];

/// Create missing tables and bring the schema up to [`CURRENT_VERSION`].
///
/// # Errors
///
/// Returns `DatabaseMigration` if the database was written by a newer
/// release or holds an unreadable version, or a persistence error.
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    for statement in SCHEMA_STATEMENTS {
        conn.execute(statement, [])?;
    }

    let version = schema_version(conn)?;
    if version > CURRENT_VERSION {
        return Err(Error::DatabaseMigration {
            message: format!(
                "database schema version {version} is newer than supported version {CURRENT_VERSION}"
            ),
        });
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > version) {
        apply(conn, migration)?;
    }
    Ok(())
}

fn apply(conn: &Connection, migration: &Migration) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    if !migration.sql.is_empty() {
        tx.execute_batch(migration.sql)?;
    }
    set_schema_version(&tx, migration.version)?;
    tx.commit()?;

    info!(
        version = migration.version,
        "Applied schema migration: {}", migration.description
    );
    Ok(())
}

/// Stored schema version, or 0 for a fresh database.
fn schema_version(conn: &Connection) -> Result<i32> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    value.map_or(Ok(0), |value| {
        value.parse().map_err(|_| Error::DatabaseMigration {
            message: format!("invalid schema version: {value}"),
        })
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (VERSION_KEY, version.to_string()),
    )?;
    Ok(())
}
