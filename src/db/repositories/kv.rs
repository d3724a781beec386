use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::db::Database;

pub(crate) fn read_value(conn: &Connection, key: &str) -> Result<Option<Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM kv_store WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("failed to read key {key}"))?;

    raw.map(|text| {
        serde_json::from_str(&text).with_context(|| format!("stored value for {key} is not JSON"))
    })
    .transpose()
}

pub(crate) fn write_value(conn: &Connection, key: &str, value: &Value) -> Result<()> {
    let encoded = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO kv_store (key, value, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET
             value = excluded.value,
             updated_at = excluded.updated_at",
        params![key, encoded, Utc::now().to_rfc3339()],
    )
    .with_context(|| format!("failed to write key {key}"))?;
    Ok(())
}

/// Insert only when the key is absent. Returns whether a row was written.
pub(crate) fn seed_value(conn: &Connection, key: &str, value: &Value) -> Result<bool> {
    let encoded = serde_json::to_string(value)?;
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, encoded, Utc::now().to_rfc3339()],
        )
        .with_context(|| format!("failed to seed key {key}"))?;
    Ok(inserted > 0)
}

impl Database {
    /// Read `keys`; absent keys are missing from the map.
    pub async fn get_values(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        let keys: Vec<String> = keys.iter().map(|key| key.to_string()).collect();
        self.execute(move |conn| {
            let mut values = HashMap::with_capacity(keys.len());
            for key in keys {
                match read_value(conn, &key) {
                    Ok(Some(value)) => {
                        values.insert(key, value);
                    }
                    Ok(None) => {}
                    // A corrupt value reads like a missing one; the caller's defaults apply.
                    Err(err) => log::warn!("ignoring unreadable value: {err:#}"),
                }
            }
            Ok(values)
        })
        .await
    }

    /// Write all entries in one transaction, then notify subscribers.
    pub async fn set_values(&self, entries: Vec<(String, Value)>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let changed: Vec<String> = entries.iter().map(|(key, _)| key.clone()).collect();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            for (key, value) in &entries {
                write_value(&tx, key, value)?;
            }
            tx.commit().context("failed to commit key/value write")?;
            Ok(())
        })
        .await?;
        self.publish_change(changed);
        Ok(())
    }

    pub async fn remove_values(&self, keys: &[&str]) -> Result<()> {
        let keys: Vec<String> = keys.iter().map(|key| key.to_string()).collect();
        let changed = keys.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            for key in &keys {
                tx.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
            }
            tx.commit()?;
            Ok(())
        })
        .await?;
        self.publish_change(changed);
        Ok(())
    }
}
