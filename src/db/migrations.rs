use anyhow::{bail, Context, Result};
use rusqlite::Connection;

/// Schema steps in order. Step `n` (1-based) upgrades `user_version` `n - 1` to `n`.
const MIGRATIONS: &[(&str, &str)] = &[
    ("kv_store", include_str!("schemas/schema_v1.sql")),
    ("tasks", include_str!("schemas/schema_v2.sql")),
];

fn current_version() -> i32 {
    MIGRATIONS.len() as i32
}

pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;
    let target = current_version();

    if version > target {
        bail!("database version ({version}) is newer than supported schema ({target})");
    }
    if version == target {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;
    for (index, (name, sql)) in MIGRATIONS.iter().enumerate().skip(version.max(0) as usize) {
        let next_version = index + 1;
        tx.execute_batch(sql)
            .with_context(|| format!("migration to version {next_version} ({name}) failed"))?;
    }
    tx.pragma_update(None, "user_version", target)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    log::info!("database schema migrated from v{version} to v{target}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_version(conn: &Connection) -> i32 {
        conn.pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn migrates_fresh_database_to_current() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        assert_eq!(user_version(&conn), current_version());

        // Second run is a no-op.
        run_migrations(&mut conn).unwrap();
        assert_eq!(user_version(&conn), current_version());
    }

    #[test]
    fn upgrades_from_an_older_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIGRATIONS[0].1).unwrap();
        conn.pragma_update(None, "user_version", 1).unwrap();

        run_migrations(&mut conn).unwrap();
        let tasks: i64 = conn
            .query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))
            .unwrap();
        assert_eq!(tasks, 0);
    }

    #[test]
    fn refuses_newer_schema() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", current_version() + 1)
            .unwrap();
        assert!(run_migrations(&mut conn).is_err());
    }
}
