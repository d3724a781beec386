//! Reports over the per-day stats book.

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::{
    clock::day_key,
    db::models::{DailyStats, StatsBook},
};

/// The last `days` days ending on `today`, oldest first. Days without an
/// entry come back zeroed.
pub fn stats_window(book: &StatsBook, today: NaiveDate, days: u32) -> Vec<(NaiveDate, DailyStats)> {
    (0..i64::from(days))
        .rev()
        .map(|offset| {
            let day = today - Duration::days(offset);
            let stats = book.get(&day_key(day)).cloned().unwrap_or_default();
            (day, stats)
        })
        .collect()
}

/// Totals over a window of days.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub days: u32,
    pub total_sessions: u64,
    pub total_focus_minutes: u64,
    pub total_tasks_done: u64,
    pub average_session_minutes: u64,
    pub top_pause_reason: Option<(String, u64)>,
}

impl StatsSummary {
    pub fn from_window(window: &[(NaiveDate, DailyStats)]) -> Self {
        let mut summary = Self {
            days: window.len() as u32,
            ..Self::default()
        };
        if window.is_empty() {
            return summary;
        }

        let mut focus_seconds: u64 = 0;
        let mut reasons: std::collections::BTreeMap<&str, u64> = Default::default();
        for (_, day) in window {
            summary.total_sessions += day.sessions_completed;
            summary.total_tasks_done += day.tasks_completed_delta;
            focus_seconds += day.focus_seconds_accrued;
            for (reason, count) in &day.pause_reason_counts {
                *reasons.entry(reason.as_str()).or_insert(0) += count;
            }
        }

        summary.total_focus_minutes = focus_seconds / 60;
        if summary.total_sessions > 0 {
            summary.average_session_minutes = summary.total_focus_minutes / summary.total_sessions;
        }
        // Ties go to the alphabetically first reason.
        summary.top_pause_reason = reasons
            .into_iter()
            .fold(None, |best: Option<(&str, u64)>, (reason, count)| match best {
                Some((_, top)) if top >= count => best,
                _ => Some((reason, count)),
            })
            .map(|(reason, count)| (reason.to_string(), count));
        summary
    }

    /// Total focus time as hours and minutes.
    pub fn total_time(&self) -> (u64, u64) {
        (self.total_focus_minutes / 60, self.total_focus_minutes % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").unwrap()
    }

    fn book() -> StatsBook {
        let mut book = StatsBook::new();
        let mut first = DailyStats::default();
        first.record_focus(1500);
        first.record_focus(1500);
        first.add_pause_reason("phone");
        book.insert("2024-03-01".into(), first);

        let mut third = DailyStats::default();
        third.record_focus(3000);
        third.add_tasks_done(4);
        third.add_pause_reason("slack");
        third.add_pause_reason("slack");
        book.insert("2024-03-03".into(), third);

        book.insert("2024-02-01".into(), DailyStats::default());
        book
    }

    #[test]
    fn window_is_zero_filled_and_ordered() {
        let window = stats_window(&book(), day("2024-03-03"), 3);
        let days: Vec<NaiveDate> = window.iter().map(|(day, _)| *day).collect();
        assert_eq!(days, vec![day("2024-03-01"), day("2024-03-02"), day("2024-03-03")]);
        assert_eq!(window[1].1, DailyStats::default());
        assert_eq!(window[2].1.sessions_completed, 1);
    }

    #[test]
    fn summary_totals() {
        let window = stats_window(&book(), day("2024-03-03"), 7);
        let summary = StatsSummary::from_window(&window);
        assert_eq!(summary.days, 7);
        assert_eq!(summary.total_sessions, 3);
        assert_eq!(summary.total_focus_minutes, 100);
        assert_eq!(summary.average_session_minutes, 33);
        assert_eq!(summary.total_tasks_done, 4);
        assert_eq!(summary.top_pause_reason, Some(("slack".to_string(), 2)));
        assert_eq!(summary.total_time(), (1, 40));
    }

    #[test]
    fn empty_window() {
        let summary = StatsSummary::from_window(&stats_window(&StatsBook::new(), day("2024-03-03"), 0));
        assert_eq!(summary, StatsSummary::default());
        assert_eq!(summary.top_pause_reason, None);
    }
}
