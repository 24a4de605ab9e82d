use rusqlite::{Connection, Transaction};

use super::{StorageError, StorageResult};

const CURRENT_SCHEMA_VERSION: i32 = 1;

pub(super) fn run_migrations(conn: &mut Connection) -> StorageResult<()> {
    let mut version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(StorageError::Migration(format!(
            "database version ({version}) is newer than supported schema ({CURRENT_SCHEMA_VERSION})"
        )));
    }

    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;

    while version < CURRENT_SCHEMA_VERSION {
        let next_version = version + 1;
        apply_migration(&tx, next_version)?;
        version = next_version;
    }

    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    tx.commit()?;

    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> StorageResult<()> {
    match version {
        1 => tx
            .execute_batch(include_str!("schemas/schema_v1.sql"))
            .map_err(|e| StorageError::Migration(format!("schema_v1.sql: {e}"))),
        _ => Err(StorageError::Migration(format!(
            "no migration defined for version {version}"
        ))),
    }
}
