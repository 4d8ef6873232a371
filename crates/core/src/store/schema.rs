use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};

/// Bucket holding store-level bookkeeping such as the schema version.
pub const META_BUCKET: &str = "meta";

pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";

/// Every bucket lives in one ordered table; `(bucket, key)` ordering is
/// byte-lexicographic because both columns compare with memcmp.
pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS entries (
            bucket  TEXT NOT NULL,
            key     BLOB NOT NULL,
            value   BLOB NOT NULL,
            PRIMARY KEY (bucket, key)
        ) WITHOUT ROWID;
        ",
    )?;
    Ok(())
}

/// Stamp a fresh store with the current schema version, or reject a store
/// written by a newer build.
pub fn migrate(conn: &Connection) -> Result<()> {
    let stored: Option<Vec<u8>> = conn
        .query_row(
            "SELECT value FROM entries WHERE bucket = ?1 AND key = ?2",
            params![META_BUCKET, SCHEMA_VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match stored {
        None => {
            conn.execute(
                "INSERT INTO entries (bucket, key, value) VALUES (?1, ?2, ?3)",
                params![
                    META_BUCKET,
                    SCHEMA_VERSION_KEY,
                    SCHEMA_VERSION.to_be_bytes().as_slice()
                ],
            )?;
            Ok(())
        }
        Some(bytes) => {
            let raw: [u8; 4] = bytes.as_slice().try_into().map_err(|_| Error::CorruptRecord {
                bucket: META_BUCKET.to_string(),
                message: format!("schema version has {} bytes", bytes.len()),
            })?;
            let db = u32::from_be_bytes(raw);
            if db > SCHEMA_VERSION {
                return Err(Error::SchemaTooNew {
                    db,
                    code: SCHEMA_VERSION,
                });
            }
            Ok(())
        }
    }
}

pub fn schema_version(conn: &Connection) -> Result<Option<u32>> {
    let stored: Option<Vec<u8>> = conn
        .query_row(
            "SELECT value FROM entries WHERE bucket = ?1 AND key = ?2",
            params![META_BUCKET, SCHEMA_VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;
    Ok(stored
        .and_then(|b| <[u8; 4]>::try_from(b.as_slice()).ok())
        .map(u32::from_be_bytes))
}
