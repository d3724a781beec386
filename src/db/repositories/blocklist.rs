use anyhow::{Context, Result};
use rusqlite::TransactionBehavior;
use serde_json::Value;

use crate::{
    blocking::normalize_all,
    db::{
        helpers::decode_or,
        keys,
        repositories::kv::{read_value, write_value},
        Database,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edit {
    Insert,
    Remove,
}

impl Database {
    /// Append an already-normalized domain. Returns false when it was present.
    pub async fn add_blocklist_entry(&self, domain: &str) -> Result<bool> {
        self.edit_blocklist(domain, Edit::Insert).await
    }

    /// Returns false when the domain was not on the list.
    pub async fn remove_blocklist_entry(&self, domain: &str) -> Result<bool> {
        self.edit_blocklist(domain, Edit::Remove).await
    }

    async fn edit_blocklist(&self, domain: &str, edit: Edit) -> Result<bool> {
        let domain = domain.to_string();
        let changed = self
            .execute(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let stored: Vec<Value> =
                    decode_or(read_value(&tx, keys::BLOCKLIST)?.as_ref(), Vec::new());
                let mut entries = normalize_all(stored.iter().filter_map(Value::as_str));

                let present = entries.contains(&domain);
                let changed = match edit {
                    Edit::Insert if !present => {
                        entries.push(domain);
                        true
                    }
                    Edit::Remove if present => {
                        entries.retain(|entry| entry != &domain);
                        true
                    }
                    _ => false,
                };

                if changed {
                    write_value(&tx, keys::BLOCKLIST, &serde_json::to_value(&entries)?)?;
                    tx.commit().context("failed to commit blocklist edit")?;
                }
                Ok(changed)
            })
            .await?;

        if changed {
            self.publish_change(vec![keys::BLOCKLIST.to_string()]);
        }
        Ok(changed)
    }
}
