use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use rusqlite::{Connection, TransactionBehavior};
use serde_json::{json, Map, Value};

use crate::{
    blocking::normalize_all,
    clock::day_key,
    db::{
        helpers::{decode_or, from_millis, to_millis},
        models::{book_from_value, DailyStats},
        repositories::kv::{read_value, seed_value, write_value},
        Database,
    },
    timer::state::{
        positive_minutes, ConfigOverrides, SessionConfig, SessionMode, SessionState, StoredState,
        DEFAULT_SESSION_MINUTES,
    },
};

/// Persisted key names. Shared with anything else that reads the same store.
pub mod keys {
    pub const BLOCKLIST: &str = "blocklist";
    pub const FOCUS_ENABLED: &str = "focusEnabled";
    pub const SESSION_MINUTES: &str = "sessionMinutes";
    pub const FOCUS_MINUTES: &str = "focusMinutes";
    pub const BREAK_MINUTES: &str = "breakMinutes";
    pub const LONG_BREAK_MINUTES: &str = "longBreakMinutes";
    pub const SESSIONS_BEFORE_LONG: &str = "sessionsBeforeLong";
    pub const AUTO_START_NEXT: &str = "autoStartNext";
    pub const CURRENT_MODE: &str = "currentMode";
    pub const SESSION_END_TS: &str = "sessionEndTs";
    pub const SESSION_START_TS: &str = "sessionStartTs";
    pub const SESSION_COUNT: &str = "sessionCount";
    pub const STATS: &str = "stats";

    pub const ALL: [&str; 13] = [
        BLOCKLIST,
        FOCUS_ENABLED,
        SESSION_MINUTES,
        FOCUS_MINUTES,
        BREAK_MINUTES,
        LONG_BREAK_MINUTES,
        SESSIONS_BEFORE_LONG,
        AUTO_START_NEXT,
        CURRENT_MODE,
        SESSION_END_TS,
        SESSION_START_TS,
        SESSION_COUNT,
        STATS,
    ];
}

pub const DEFAULT_BLOCKLIST: [&str; 3] = ["youtube.com", "twitter.com", "reddit.com"];

#[derive(Debug, Clone, PartialEq)]
enum StatsUpdate {
    Focus(u64),
    TasksDone(i64),
    PauseReason(String),
}

/// A batch of key writes and stats accruals committed in one transaction.
#[derive(Debug, Clone, Default)]
pub struct StateWrite {
    expected: Vec<(String, Value)>,
    entries: Vec<(String, Value)>,
    stats: Vec<(NaiveDate, StatsUpdate)>,
}

impl StateWrite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.entries.retain(|(existing, _)| existing != key);
        self.entries.push((key.to_string(), value.into()));
        self
    }

    /// Only commit if `key` still holds `value`. An absent key matches `null`.
    pub fn expect(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.expected.push((key.to_string(), value.into()));
        self
    }

    /// Mode, timestamps, counter and blocking flag.
    pub fn session(self, state: &SessionState) -> Self {
        self.set(keys::CURRENT_MODE, state.mode.as_str())
            .set(keys::FOCUS_ENABLED, state.blocking_enabled)
            .set(keys::SESSION_END_TS, to_millis(state.session_end_at))
            .set(keys::SESSION_START_TS, to_millis(state.session_start_at))
            .set(keys::SESSION_COUNT, state.completed_focus_count)
    }

    pub fn config(self, config: &SessionConfig) -> Self {
        self.set(keys::FOCUS_MINUTES, config.focus_minutes)
            .set(keys::BREAK_MINUTES, config.break_minutes)
            .set(keys::LONG_BREAK_MINUTES, config.long_break_minutes)
            .set(keys::SESSIONS_BEFORE_LONG, config.sessions_before_long)
            .set(keys::AUTO_START_NEXT, config.auto_start_next)
    }

    pub fn record_focus(mut self, day: NaiveDate, elapsed_secs: u64) -> Self {
        self.stats.push((day, StatsUpdate::Focus(elapsed_secs)));
        self
    }

    pub fn tasks_done(mut self, day: NaiveDate, delta: i64) -> Self {
        self.stats.push((day, StatsUpdate::TasksDone(delta)));
        self
    }

    pub fn pause_reason(mut self, day: NaiveDate, reason: &str) -> Self {
        self.stats
            .push((day, StatsUpdate::PauseReason(reason.to_string())));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.stats.is_empty()
    }

    pub fn changed_keys(&self) -> Vec<String> {
        let mut changed: Vec<String> = self.entries.iter().map(|(key, _)| key.clone()).collect();
        if !self.stats.is_empty() && !changed.iter().any(|key| key == keys::STATS) {
            changed.push(keys::STATS.to_string());
        }
        changed
    }

    /// Apply inside an open transaction. Stats are read-modify-written here so
    /// concurrent accruals never overwrite each other. Returns false without
    /// writing when an expectation no longer holds.
    pub(crate) fn apply(&self, conn: &Connection) -> Result<bool> {
        for (key, value) in &self.expected {
            let current = read_value(conn, key)?.unwrap_or(Value::Null);
            if &current != value {
                return Ok(false);
            }
        }
        for (key, value) in &self.entries {
            write_value(conn, key, value)?;
        }
        if !self.stats.is_empty() {
            // Only the touched days are rewritten; every other day keeps its stored value.
            let mut days = match read_value(conn, keys::STATS)? {
                Some(Value::Object(days)) => days,
                None | Some(Value::Null) => Map::new(),
                Some(other) => bail!("stored stats are not a map: {other}"),
            };
            for (day, update) in &self.stats {
                let key = day_key(*day);
                let mut entry: DailyStats = match days.get(&key) {
                    Some(raw) => serde_json::from_value(raw.clone())
                        .with_context(|| format!("stored stats for {key} are unreadable"))?,
                    None => DailyStats::default(),
                };
                match update {
                    StatsUpdate::Focus(secs) => entry.record_focus(*secs),
                    StatsUpdate::TasksDone(delta) => entry.add_tasks_done(*delta),
                    StatsUpdate::PauseReason(reason) => entry.add_pause_reason(reason),
                }
                days.insert(key, serde_json::to_value(&entry)?);
            }
            write_value(conn, keys::STATS, &Value::Object(days))?;
        }
        Ok(true)
    }
}

fn stored_state_from(values: &HashMap<String, Value>) -> StoredState {
    let blocklist: Vec<Value> = decode_or(values.get(keys::BLOCKLIST), Vec::new());
    let blocklist = normalize_all(blocklist.iter().filter_map(Value::as_str));

    let overrides = ConfigOverrides {
        focus_minutes: values.get(keys::FOCUS_MINUTES).cloned(),
        break_minutes: values.get(keys::BREAK_MINUTES).cloned(),
        long_break_minutes: values.get(keys::LONG_BREAK_MINUTES).cloned(),
        sessions_before_long: values.get(keys::SESSIONS_BEFORE_LONG).cloned(),
        auto_start_next: values.get(keys::AUTO_START_NEXT).cloned(),
    };
    let mut config = SessionConfig::default();
    config.merge(&overrides);

    let mode = values
        .get(keys::CURRENT_MODE)
        .and_then(Value::as_str)
        .and_then(SessionMode::parse)
        .unwrap_or_default();

    let session = SessionState {
        mode,
        session_end_at: from_millis(values.get(keys::SESSION_END_TS)),
        session_start_at: from_millis(values.get(keys::SESSION_START_TS)),
        completed_focus_count: decode_or(values.get(keys::SESSION_COUNT), 0),
        blocking_enabled: decode_or(values.get(keys::FOCUS_ENABLED), false),
    };

    StoredState {
        session,
        config,
        blocklist,
        session_minutes: values
            .get(keys::SESSION_MINUTES)
            .and_then(positive_minutes)
            .unwrap_or(DEFAULT_SESSION_MINUTES),
        stats: book_from_value(values.get(keys::STATS)),
    }
}

fn default_entries() -> Vec<(&'static str, Value)> {
    let config = SessionConfig::default();
    vec![
        (keys::FOCUS_ENABLED, json!(false)),
        (keys::BLOCKLIST, json!(DEFAULT_BLOCKLIST)),
        (keys::SESSION_MINUTES, json!(DEFAULT_SESSION_MINUTES)),
        (keys::FOCUS_MINUTES, json!(config.focus_minutes)),
        (keys::BREAK_MINUTES, json!(config.break_minutes)),
        (keys::LONG_BREAK_MINUTES, json!(config.long_break_minutes)),
        (keys::SESSIONS_BEFORE_LONG, json!(config.sessions_before_long)),
        (keys::AUTO_START_NEXT, json!(config.auto_start_next)),
        (keys::CURRENT_MODE, json!(SessionMode::Idle.as_str())),
        (keys::SESSION_COUNT, json!(0)),
        (keys::STATS, json!({})),
    ]
}

impl Database {
    /// Read every state key. Missing or malformed values fall back to defaults.
    pub async fn load_state(&self) -> Result<StoredState> {
        let values = self
            .get_values(&keys::ALL)
            .await
            .context("failed to load session state")?;
        Ok(stored_state_from(&values))
    }

    /// Commit a [`StateWrite`] atomically and notify subscribers of the keys it
    /// touched. Returns false when an expectation failed and nothing was written.
    pub async fn commit(&self, write: StateWrite) -> Result<bool> {
        if write.is_empty() {
            return Ok(true);
        }
        let changed = write.changed_keys();
        let applied = self
            .execute(move |conn| {
                let tx = conn
                    .transaction_with_behavior(TransactionBehavior::Immediate)
                    .context("failed to open state transaction")?;
                if !write.apply(&tx)? {
                    return Ok(false);
                }
                tx.commit().context("failed to commit state write")?;
                Ok(true)
            })
            .await?;
        if applied {
            self.publish_change(changed);
        }
        Ok(applied)
    }

    /// Write defaults for absent keys. Returns the keys that were seeded.
    pub async fn seed_defaults(&self) -> Result<Vec<String>> {
        let seeded = self
            .execute(|conn| {
                let tx = conn.transaction()?;
                let mut seeded = Vec::new();
                for (key, value) in default_entries() {
                    if seed_value(&tx, key, &value)? {
                        seeded.push(key.to_string());
                    }
                }
                tx.commit().context("failed to commit default state")?;
                Ok(seeded)
            })
            .await?;
        self.publish_change(seeded.clone());
        Ok(seeded)
    }
}
