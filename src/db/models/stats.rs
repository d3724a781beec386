//! Per-day usage statistics.
//!
//! Stored as one JSON map under the `stats` key, keyed by local calendar day
//! (`YYYY-MM-DD`). Field names match what the popup reports read.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub type StatsBook = BTreeMap<String, DailyStats>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStats {
    #[serde(rename = "sessions", default, deserialize_with = "lenient_count")]
    pub sessions_completed: u64,
    #[serde(rename = "focusSeconds", default, deserialize_with = "lenient_count")]
    pub focus_seconds_accrued: u64,
    #[serde(rename = "tasksDone", default, deserialize_with = "lenient_count")]
    pub tasks_completed_delta: u64,
    #[serde(rename = "pauseReasons", default, deserialize_with = "lenient_counts")]
    pub pause_reason_counts: BTreeMap<String, u64>,
}

/// Counters written by other clients may be fractional, negative or not numbers at all.
fn count_from(value: &Value) -> u64 {
    match value {
        Value::Number(number) => number.as_u64().unwrap_or_else(|| {
            number
                .as_f64()
                .filter(|float| float.is_finite() && *float > 0.0)
                .map_or(0, |float| float.round() as u64)
        }),
        _ => 0,
    }
}

fn lenient_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(count_from(&Value::deserialize(deserializer)?))
}

fn lenient_counts<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<String, u64>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(reasons) => reasons
            .iter()
            .map(|(reason, count)| (reason.clone(), count_from(count)))
            .collect(),
        _ => BTreeMap::new(),
    })
}

/// Decode the stored `stats` map day by day. A day that is not an object is
/// skipped without affecting the others.
pub fn book_from_value(value: Option<&Value>) -> StatsBook {
    let Some(Value::Object(days)) = value else {
        return StatsBook::new();
    };
    days.iter()
        .filter_map(|(day, raw)| match serde_json::from_value::<DailyStats>(raw.clone()) {
            Ok(stats) => Some((day.clone(), stats)),
            Err(err) => {
                log::warn!("skipping unreadable stats for {day}: {err}");
                None
            }
        })
        .collect()
}

impl DailyStats {
    pub fn record_focus(&mut self, elapsed_secs: u64) {
        self.sessions_completed = self.sessions_completed.saturating_add(1);
        self.focus_seconds_accrued = self.focus_seconds_accrued.saturating_add(elapsed_secs);
    }

    /// Add a signed delta, clamping at zero.
    pub fn add_tasks_done(&mut self, delta: i64) {
        self.tasks_completed_delta = if delta >= 0 {
            self.tasks_completed_delta.saturating_add(delta.unsigned_abs())
        } else {
            self.tasks_completed_delta.saturating_sub(delta.unsigned_abs())
        };
    }

    pub fn add_pause_reason(&mut self, reason: &str) {
        let count = self
            .pause_reason_counts
            .entry(reason.to_string())
            .or_insert(0);
        *count = count.saturating_add(1);
    }
}
