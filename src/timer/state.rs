use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::models::StatsBook;

pub const DEFAULT_FOCUS_MINUTES: u32 = 25;
pub const DEFAULT_BREAK_MINUTES: u32 = 5;
pub const DEFAULT_LONG_BREAK_MINUTES: u32 = 15;
pub const DEFAULT_SESSIONS_BEFORE_LONG: u32 = 4;
/// Length of an ad hoc `startFocus` when the caller gives no usable minutes.
pub const DEFAULT_SESSION_MINUTES: f64 = 25.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SessionMode {
    #[default]
    Idle,
    Focus,
    Break,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Idle => "idle",
            SessionMode::Focus => "focus",
            SessionMode::Break => "break",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "idle" => Some(SessionMode::Idle),
            "focus" => Some(SessionMode::Focus),
            "break" => Some(SessionMode::Break),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub focus_minutes: u32,
    pub break_minutes: u32,
    pub long_break_minutes: u32,
    pub sessions_before_long: u32,
    pub auto_start_next: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            focus_minutes: DEFAULT_FOCUS_MINUTES,
            break_minutes: DEFAULT_BREAK_MINUTES,
            long_break_minutes: DEFAULT_LONG_BREAK_MINUTES,
            sessions_before_long: DEFAULT_SESSIONS_BEFORE_LONG,
            auto_start_next: true,
        }
    }
}

impl SessionConfig {
    /// Apply the usable fields of `overrides`. Non-positive or non-numeric
    /// values keep the current setting.
    pub fn merge(&mut self, overrides: &ConfigOverrides) {
        if let Some(minutes) = overrides.focus_minutes.as_ref().and_then(whole_minutes) {
            self.focus_minutes = minutes;
        }
        if let Some(minutes) = overrides.break_minutes.as_ref().and_then(whole_minutes) {
            self.break_minutes = minutes;
        }
        if let Some(minutes) = overrides.long_break_minutes.as_ref().and_then(whole_minutes) {
            self.long_break_minutes = minutes;
        }
        if let Some(count) = overrides.sessions_before_long.as_ref().and_then(whole_minutes) {
            self.sessions_before_long = count;
        }
        if let Some(Value::Bool(auto)) = overrides.auto_start_next {
            self.auto_start_next = auto;
        }
    }

    /// Long break every `sessions_before_long` completed focus phases.
    pub fn is_long_break(&self, completed_focus_count: u32) -> bool {
        completed_focus_count % self.sessions_before_long.max(1) == 0
    }

    pub fn break_minutes_for(&self, long: bool) -> u32 {
        if long {
            self.long_break_minutes
        } else {
            self.break_minutes
        }
    }
}

/// Partial config as sent by a UI surface. Fields stay loosely typed so bad
/// input can be ignored instead of failing the whole command.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus_minutes: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub break_minutes: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_break_minutes: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sessions_before_long: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_start_next: Option<Value>,
}

/// Longest phase accepted from input: one week.
pub const MAX_MINUTES: f64 = 7.0 * 24.0 * 60.0;

/// A positive number of minutes, at most [`MAX_MINUTES`], from a number or
/// numeric string.
pub fn positive_minutes(value: &Value) -> Option<f64> {
    let minutes = match value {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (minutes.is_finite() && minutes > 0.0 && minutes <= MAX_MINUTES).then_some(minutes)
}

fn whole_minutes(value: &Value) -> Option<u32> {
    let minutes = positive_minutes(value)?.round();
    (minutes >= 1.0).then_some(minutes as u32)
}

pub fn minutes_to_duration(minutes: f64) -> Duration {
    Duration::milliseconds((minutes * 60_000.0).round() as i64)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub mode: SessionMode,
    pub session_end_at: Option<DateTime<Utc>>,
    pub session_start_at: Option<DateTime<Utc>>,
    pub completed_focus_count: u32,
    pub blocking_enabled: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_focus(&mut self, now: DateTime<Utc>, length: Duration) {
        self.mode = SessionMode::Focus;
        self.session_start_at = Some(now);
        self.session_end_at = Some(now + length);
        self.blocking_enabled = true;
    }

    /// Enter a break. `None` leaves the break untimed, waiting for a manual resume.
    pub fn begin_break(&mut self, now: DateTime<Utc>, length: Option<Duration>) {
        self.mode = SessionMode::Break;
        self.session_start_at = None;
        self.session_end_at = length.map(|length| now + length);
        self.blocking_enabled = false;
    }

    /// Back to idle, keeping the cycle counter.
    pub fn stop(&mut self) {
        self.mode = SessionMode::Idle;
        self.session_start_at = None;
        self.session_end_at = None;
        self.blocking_enabled = false;
    }

    pub fn reset_cycle(&mut self) {
        self.stop();
        self.completed_focus_count = 0;
    }

    /// Seconds of focus to credit when this focus phase completes.
    pub fn focus_elapsed_secs(&self, configured_minutes: u32) -> u64 {
        match (self.session_start_at, self.session_end_at) {
            (Some(start), Some(end)) => (end - start).num_seconds().max(0) as u64,
            _ => u64::from(configured_minutes) * 60,
        }
    }

    pub fn remaining_ms(&self, now: DateTime<Utc>) -> Option<i64> {
        self.session_end_at
            .map(|end| (end - now).num_milliseconds().max(0))
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.mode != SessionMode::Idle && self.session_end_at.is_some_and(|end| end <= now)
    }

    pub fn is_coherent(&self) -> bool {
        self.blocking_enabled == (self.mode == SessionMode::Focus)
    }
}

/// Everything one command reads from the store before deciding what to write.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredState {
    pub session: SessionState,
    pub config: SessionConfig,
    pub blocklist: Vec<String>,
    pub session_minutes: f64,
    pub stats: StatsBook,
}

impl Default for StoredState {
    fn default() -> Self {
        Self {
            session: SessionState::default(),
            config: SessionConfig::default(),
            blocklist: Vec::new(),
            session_minutes: DEFAULT_SESSION_MINUTES,
            stats: StatsBook::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_ignores_unusable_values() {
        let mut config = SessionConfig::default();
        let overrides: ConfigOverrides = serde_json::from_value(json!({
            "focusMinutes": 50,
            "breakMinutes": 0,
            "longBreakMinutes": "abc",
            "sessionsBeforeLong": "3",
            "autoStartNext": "yes"
        }))
        .unwrap();

        config.merge(&overrides);

        assert_eq!(config.focus_minutes, 50);
        assert_eq!(config.break_minutes, DEFAULT_BREAK_MINUTES);
        assert_eq!(config.long_break_minutes, DEFAULT_LONG_BREAK_MINUTES);
        assert_eq!(config.sessions_before_long, 3);
        assert!(config.auto_start_next);
    }

    #[test]
    fn long_break_every_n_sessions() {
        let config = SessionConfig::default();
        assert!(!config.is_long_break(1));
        assert!(!config.is_long_break(3));
        assert!(config.is_long_break(4));
        assert!(config.is_long_break(8));
    }

    #[test]
    fn zero_cycle_length_does_not_divide_by_zero() {
        let config = SessionConfig {
            sessions_before_long: 0,
            ..SessionConfig::default()
        };
        assert!(config.is_long_break(1));
    }

    #[test]
    fn positive_minutes_rejects_bad_input() {
        assert_eq!(positive_minutes(&json!(25)), Some(25.0));
        assert_eq!(positive_minutes(&json!("12.5")), Some(12.5));
        assert_eq!(positive_minutes(&json!(0)), None);
        assert_eq!(positive_minutes(&json!(-3)), None);
        assert_eq!(positive_minutes(&json!("soon")), None);
        assert_eq!(positive_minutes(&json!(null)), None);
        assert_eq!(positive_minutes(&json!(true)), None);
        assert_eq!(positive_minutes(&json!(1e300)), None);
        assert_eq!(positive_minutes(&json!("1e300")), None);
        assert_eq!(positive_minutes(&json!(MAX_MINUTES)), Some(MAX_MINUTES));
        assert_eq!(positive_minutes(&json!(MAX_MINUTES + 1.0)), None);
    }

    #[test]
    fn oversized_cycle_lengths_keep_current_setting() {
        let mut config = SessionConfig::default();
        let overrides: ConfigOverrides = serde_json::from_value(json!({
            "focusMinutes": 1e300,
            "breakMinutes": 4294967296u64,
        }))
        .unwrap();
        config.merge(&overrides);
        assert_eq!(config.focus_minutes, DEFAULT_FOCUS_MINUTES);
        assert_eq!(config.break_minutes, DEFAULT_BREAK_MINUTES);
    }

    #[test]
    fn transitions_keep_blocking_coherent() {
        let now = Utc::now();
        let mut state = SessionState::new();
        assert!(state.is_coherent());

        state.begin_focus(now, Duration::minutes(25));
        assert!(state.is_coherent());
        assert_eq!(state.session_end_at, Some(now + Duration::minutes(25)));

        state.begin_break(now, None);
        assert!(state.is_coherent());
        assert_eq!(state.session_end_at, None);

        state.stop();
        assert!(state.is_coherent());
    }

    #[test]
    fn elapsed_falls_back_to_configured_minutes() {
        let now = Utc::now();
        let mut state = SessionState::new();
        state.begin_focus(now, Duration::minutes(10));
        assert_eq!(state.focus_elapsed_secs(25), 600);

        state.session_start_at = None;
        assert_eq!(state.focus_elapsed_secs(25), 1500);
    }

    #[test]
    fn reset_cycle_clears_counter() {
        let mut state = SessionState {
            completed_focus_count: 3,
            ..SessionState::default()
        };
        state.stop();
        assert_eq!(state.completed_focus_count, 3);
        state.reset_cycle();
        assert_eq!(state.completed_focus_count, 0);
    }
}
