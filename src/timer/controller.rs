use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    blocking::{compile_rules, normalize_domain, RuleEnforcer},
    clock::{day_key, Clock},
    db::{
        helpers::to_millis,
        keys,
        models::{DailyStats, StatsBook},
        Database, StateWrite,
    },
    error::{FocusError, FocusResult},
    log_error, log_info, log_warn,
    notify::Notifier,
};

use super::{
    state::{
        minutes_to_duration, positive_minutes, ConfigOverrides, SessionConfig, SessionMode,
        SessionState, StoredState, DEFAULT_SESSION_MINUTES,
    },
    wakeup::{FiredWakeup, WakeupScheduler, WakeupToken, WAKEUP_NAME},
};

const ENABLE_LOGS: bool = true;
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Everything the controller talks to besides its own state.
pub struct Collaborators {
    pub db: Database,
    pub enforcer: RuleEnforcer,
    pub scheduler: Arc<dyn WakeupScheduler>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FocusEvent {
    #[serde(rename_all = "camelCase")]
    StateChanged {
        mode: SessionMode,
        #[serde(with = "chrono::serde::ts_milliseconds_option")]
        session_end_at: Option<DateTime<Utc>>,
        completed_focus_count: u32,
    },
    #[serde(rename_all = "camelCase")]
    PhaseCompleted {
        finished: SessionMode,
        next: SessionMode,
        long_break: bool,
    },
    #[serde(rename_all = "camelCase")]
    BlocklistChanged { entries: Vec<String> },
}

/// Answer to `getStatus`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub focus_enabled: bool,
    pub current_mode: SessionMode,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub session_end_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub session_start_at: Option<DateTime<Utc>>,
    pub remaining_ms: Option<i64>,
    pub session_minutes: f64,
    pub completed_focus_count: u32,
    pub config: SessionConfig,
    pub blocklist: Vec<String>,
    pub today: DailyStats,
    pub stats: StatsBook,
    /// Set when the last phase could not get a live wakeup.
    pub degraded: bool,
}

#[derive(Debug, Default)]
struct ControllerInner {
    armed: Option<(WakeupToken, DateTime<Utc>)>,
    degraded: bool,
    /// Blocking flag and blocklist last pushed to the enforcer. `None` after a
    /// failed sync so the next reconcile retries.
    rules_applied: Option<(bool, Vec<String>)>,
}

/// Owns the focus session state machine.
///
/// Every command and every wakeup runs under one lock and follows the same
/// order: read the store, compute the next state, commit it in a single
/// transaction, resync rules, then re-arm the wakeup.
#[derive(Clone)]
pub struct FocusController {
    inner: Arc<Mutex<ControllerInner>>,
    db: Database,
    enforcer: RuleEnforcer,
    scheduler: Arc<dyn WakeupScheduler>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<FocusEvent>,
}

impl FocusController {
    pub fn new(collaborators: Collaborators) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(ControllerInner::default())),
            db: collaborators.db,
            enforcer: collaborators.enforcer,
            scheduler: collaborators.scheduler,
            notifier: collaborators.notifier,
            clock: collaborators.clock,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FocusEvent> {
        self.events.subscribe()
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub async fn status(&self) -> FocusResult<StatusReport> {
        let inner = self.inner.lock().await;
        let stored = self.load().await?;
        let now = self.clock.now();
        let today = stored
            .stats
            .get(&day_key(self.clock.today()))
            .cloned()
            .unwrap_or_default();
        let session = &stored.session;

        Ok(StatusReport {
            focus_enabled: session.blocking_enabled,
            current_mode: session.mode,
            session_end_at: session.session_end_at,
            session_start_at: session.session_start_at,
            remaining_ms: session.remaining_ms(now),
            session_minutes: stored.session_minutes,
            completed_focus_count: session.completed_focus_count,
            config: stored.config.clone(),
            blocklist: stored.blocklist.clone(),
            today,
            stats: stored.stats,
            degraded: inner.degraded,
        })
    }

    /// Start an ad hoc focus phase. Unusable or oversized `minutes` fall back to 25.
    /// Supersedes whatever phase is running.
    pub async fn start_focus(&self, minutes: Option<Value>) -> FocusResult<()> {
        let mut inner = self.inner.lock().await;
        let stored = self.load().await?;
        let minutes = minutes
            .as_ref()
            .and_then(positive_minutes)
            .unwrap_or(DEFAULT_SESSION_MINUTES);

        let mut next = stored.session.clone();
        next.begin_focus(self.clock.now(), minutes_to_duration(minutes));

        let write = StateWrite::new().set(keys::SESSION_MINUTES, minutes);
        self.transition(&mut inner, &stored, next, write).await?;
        log_info!("focus started for {minutes} minute(s)");
        Ok(())
    }

    pub async fn stop_focus(&self) -> FocusResult<()> {
        let mut inner = self.inner.lock().await;
        let stored = self.load().await?;
        let mut next = stored.session.clone();
        next.stop();
        self.transition(&mut inner, &stored, next, StateWrite::new())
            .await?;
        log_info!("focus stopped");
        Ok(())
    }

    /// Merge `overrides` into the saved config and start its first focus phase.
    pub async fn start_cycle(&self, overrides: ConfigOverrides) -> FocusResult<()> {
        let mut inner = self.inner.lock().await;
        let mut stored = self.load().await?;
        stored.config.merge(&overrides);

        let mut next = stored.session.clone();
        next.begin_focus(
            self.clock.now(),
            minutes_to_duration(f64::from(stored.config.focus_minutes)),
        );

        let write = StateWrite::new().config(&stored.config);
        self.transition(&mut inner, &stored, next, write).await?;
        log_info!(
            "cycle started: {}m focus, {}m break, {}m long break every {}",
            stored.config.focus_minutes,
            stored.config.break_minutes,
            stored.config.long_break_minutes,
            stored.config.sessions_before_long
        );
        Ok(())
    }

    pub async fn stop_cycle(&self) -> FocusResult<()> {
        let mut inner = self.inner.lock().await;
        let stored = self.load().await?;
        let mut next = stored.session.clone();
        next.reset_cycle();
        self.transition(&mut inner, &stored, next, StateWrite::new())
            .await?;
        log_info!("cycle stopped");
        Ok(())
    }

    pub async fn record_task_completion_delta(&self, delta: i64) -> FocusResult<()> {
        if delta == 0 {
            return Ok(());
        }
        let _inner = self.inner.lock().await;
        let write = StateWrite::new().tasks_done(self.clock.today(), delta);
        self.db.commit(write).await.map_err(FocusError::Persistence)?;
        Ok(())
    }

    /// Count one pause for `reason` today. Blank reasons are ignored.
    pub async fn record_pause_reason(&self, reason: &str) -> FocusResult<()> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Ok(());
        }
        let _inner = self.inner.lock().await;
        let write = StateWrite::new().pause_reason(self.clock.today(), reason);
        self.db.commit(write).await.map_err(FocusError::Persistence)?;
        Ok(())
    }

    pub async fn list_blocked_sites(&self) -> FocusResult<Vec<String>> {
        Ok(self.load().await?.blocklist)
    }

    /// Normalize and add a site. Returns the list after the edit.
    pub async fn add_blocked_site(&self, raw: &str) -> FocusResult<Vec<String>> {
        let domain = normalize_domain(raw)
            .ok_or_else(|| FocusError::invalid(format!("not a domain: {raw:?}")))?;
        let mut inner = self.inner.lock().await;
        let added = self
            .db
            .add_blocklist_entry(&domain)
            .await
            .map_err(FocusError::Persistence)?;
        if added {
            log_info!("blocking {domain}");
        }
        self.after_blocklist_edit(&mut inner).await
    }

    pub async fn remove_blocked_site(&self, raw: &str) -> FocusResult<Vec<String>> {
        let domain = normalize_domain(raw)
            .ok_or_else(|| FocusError::invalid(format!("not a domain: {raw:?}")))?;
        let mut inner = self.inner.lock().await;
        let removed = self
            .db
            .remove_blocklist_entry(&domain)
            .await
            .map_err(FocusError::Persistence)?;
        if removed {
            log_info!("unblocking {domain}");
        }
        self.after_blocklist_edit(&mut inner).await
    }

    async fn after_blocklist_edit(
        &self,
        inner: &mut ControllerInner,
    ) -> FocusResult<Vec<String>> {
        let stored = self.load().await?;
        self.sync_rules_if_stale(inner, &stored).await;
        self.emit(FocusEvent::BlocklistChanged {
            entries: stored.blocklist.clone(),
        });
        Ok(stored.blocklist)
    }

    /// Handle a fired wakeup. Returns whether a phase transition happened.
    ///
    /// A wakeup that is not the one this controller armed last, or whose phase
    /// was stopped or replaced in the store, does nothing.
    pub async fn on_wakeup(&self, fired: FiredWakeup) -> FocusResult<bool> {
        if fired.name != WAKEUP_NAME {
            return Ok(false);
        }
        let mut inner = self.inner.lock().await;
        match inner.armed {
            Some((token, _)) if token == fired.token => inner.armed = None,
            _ => {
                log_info!("ignoring superseded wakeup {:?}", fired.token);
                return Ok(false);
            }
        }

        let stored = self.load().await?;
        let now = self.clock.now();
        if stored.session.is_due(now) {
            return self.complete_phase(&mut inner, &stored).await;
        }

        // Stopped, replaced, or fired early against the wall clock.
        if stored.session.mode != SessionMode::Idle {
            self.rearm(&mut inner, stored.session.session_end_at);
        }
        Ok(false)
    }

    /// Seed missing keys, bring rules in line with the stored mode, and pick up
    /// a phase that was running when the last process exited.
    pub async fn restore(&self) -> FocusResult<()> {
        let seeded = self
            .db
            .seed_defaults()
            .await
            .map_err(FocusError::Persistence)?;
        if !seeded.is_empty() {
            log_info!("seeded defaults for {} key(s)", seeded.len());
        }

        let mut inner = self.inner.lock().await;
        let stored = self.load().await?;

        if !stored.session.is_coherent() {
            log_warn!(
                "stored blocking flag disagrees with mode {}, repairing",
                stored.session.mode.as_str()
            );
            let mut next = stored.session.clone();
            next.blocking_enabled = next.mode == SessionMode::Focus;
            self.transition(&mut inner, &stored, next, StateWrite::new())
                .await?;
            return self.catch_up(&mut inner).await;
        }

        self.sync_rules_if_stale(&mut inner, &stored).await;
        self.catch_up(&mut inner).await
    }

    /// Periodic check for state written by other processes and for wakeups
    /// that were missed.
    pub async fn reconcile(&self) -> FocusResult<()> {
        let mut inner = self.inner.lock().await;
        self.catch_up(&mut inner).await
    }

    async fn catch_up(&self, inner: &mut ControllerInner) -> FocusResult<()> {
        let stored = self.load().await?;
        if stored.session.is_due(self.clock.now()) {
            self.complete_phase(inner, &stored).await?;
            return Ok(());
        }

        let desired = match stored.session.mode {
            SessionMode::Idle => None,
            _ => stored.session.session_end_at,
        };
        let armed_at = inner.armed.map(|(_, at)| at);
        if desired != armed_at {
            self.rearm(inner, desired);
        }
        self.sync_rules_if_stale(inner, &stored).await;
        Ok(())
    }

    async fn complete_phase(
        &self,
        inner: &mut ControllerInner,
        stored: &StoredState,
    ) -> FocusResult<bool> {
        let now = self.clock.now();
        let config = &stored.config;
        let mut next = stored.session.clone();

        // Guard against a second process completing the same phase.
        let mut write = StateWrite::new()
            .expect(keys::CURRENT_MODE, stored.session.mode.as_str())
            .expect(keys::SESSION_END_TS, to_millis(stored.session.session_end_at));

        let (finished, long_break) = match stored.session.mode {
            SessionMode::Idle => return Ok(false),
            SessionMode::Focus => {
                let elapsed = stored.session.focus_elapsed_secs(config.focus_minutes);
                // Credited to the day the wakeup is handled, even if the phase began yesterday.
                write = write.record_focus(self.clock.today(), elapsed);

                next.completed_focus_count = next.completed_focus_count.saturating_add(1);
                let long_break = config.is_long_break(next.completed_focus_count);
                let length = config.auto_start_next.then(|| {
                    minutes_to_duration(f64::from(config.break_minutes_for(long_break)))
                });
                next.begin_break(now, length);
                (SessionMode::Focus, long_break)
            }
            SessionMode::Break => {
                if config.auto_start_next {
                    next.begin_focus(now, minutes_to_duration(f64::from(config.focus_minutes)));
                } else {
                    next.stop();
                }
                (SessionMode::Break, false)
            }
        };

        if !self.transition(inner, stored, next.clone(), write).await? {
            log_info!("phase already completed elsewhere");
            return Ok(false);
        }

        log_info!(
            "{} phase complete, now {} (completed focus: {})",
            finished.as_str(),
            next.mode.as_str(),
            next.completed_focus_count
        );

        let (title, message) = match finished {
            SessionMode::Focus if long_break => ("Focus session complete", "Time for a long break."),
            SessionMode::Focus => ("Focus session complete", "Time for a break."),
            _ => ("Break over", "Ready for the next focus session."),
        };
        if let Err(err) = self.notifier.notify(title, message) {
            log_warn!("alert failed: {err:#}");
        }

        self.emit(FocusEvent::PhaseCompleted {
            finished,
            next: next.mode,
            long_break,
        });
        Ok(true)
    }

    /// Commit `next`, then resync rules, then re-arm. Returns false when the
    /// write's expectations failed and nothing changed.
    async fn transition(
        &self,
        inner: &mut ControllerInner,
        stored: &StoredState,
        next: SessionState,
        write: StateWrite,
    ) -> FocusResult<bool> {
        debug_assert!(next.is_coherent());
        let applied = self
            .db
            .commit(write.session(&next))
            .await
            .map_err(FocusError::Persistence)?;
        if !applied {
            return Ok(false);
        }

        self.sync_rules(inner, next.blocking_enabled, &stored.blocklist)
            .await;
        self.rearm(inner, next.session_end_at);

        self.emit(FocusEvent::StateChanged {
            mode: next.mode,
            session_end_at: next.session_end_at,
            completed_focus_count: next.completed_focus_count,
        });
        Ok(true)
    }

    async fn sync_rules_if_stale(
        &self,
        inner: &mut ControllerInner,
        stored: &StoredState,
    ) {
        let desired = (stored.session.blocking_enabled, stored.blocklist.clone());
        if inner.rules_applied.as_ref() != Some(&desired) {
            self.sync_rules(inner, desired.0, &desired.1).await;
        }
    }

    async fn sync_rules(
        &self,
        inner: &mut ControllerInner,
        blocking: bool,
        blocklist: &[String],
    ) {
        let result = if blocking {
            self.enforcer.sync(compile_rules(blocklist)).await
        } else {
            self.enforcer.clear().await.map(|_| 0)
        };

        match result {
            Ok(count) => {
                log_info!("rules synced: {count} installed");
                inner.rules_applied = Some((blocking, blocklist.to_vec()));
            }
            Err(err) => {
                log_warn!("{err}; timer continues without blocking");
                inner.rules_applied = None;
            }
        }
    }

    /// Replace the armed wakeup with one at `at`, or just disarm. Arming is
    /// retried once; after that the phase runs without a live wakeup and
    /// status reports `degraded`.
    fn rearm(&self, inner: &mut ControllerInner, at: Option<DateTime<Utc>>) {
        self.scheduler.cancel(WAKEUP_NAME);
        inner.armed = None;
        inner.degraded = false;

        let Some(at) = at else {
            return;
        };

        let armed = self.scheduler.arm(WAKEUP_NAME, at).or_else(|err| {
            log_warn!("arming wakeup failed, retrying: {err:#}");
            self.scheduler.arm(WAKEUP_NAME, at)
        });

        match armed {
            Ok(token) => {
                log_info!("wakeup armed for {at}");
                inner.armed = Some((token, at));
            }
            Err(err) => {
                let err = FocusError::Scheduling(format!("{err:#}"));
                log_error!("{err}");
                inner.degraded = true;
            }
        }
    }

    async fn load(&self) -> FocusResult<StoredState> {
        self.db.load_state().await.map_err(FocusError::Persistence)
    }

    fn emit(&self, event: FocusEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// Feed fired wakeups into [`FocusController::on_wakeup`] until `shutdown`.
    pub fn spawn_wakeup_listener(
        &self,
        mut fired: mpsc::UnboundedReceiver<FiredWakeup>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    wakeup = fired.recv() => {
                        let Some(wakeup) = wakeup else { break };
                        if let Err(err) = controller.on_wakeup(wakeup).await {
                            log_error!("wakeup handling failed: {err}");
                        }
                    }
                }
            }
        })
    }

    /// Resync rules whenever another writer in this process touches the
    /// blocklist or the blocking flag.
    pub fn spawn_store_listener(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let controller = self.clone();
        let mut changes = self.db.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    change = changes.recv() => match change {
                        Ok(change) => {
                            if change.touches(keys::BLOCKLIST) || change.touches(keys::FOCUS_ENABLED) {
                                controller.resync_from_store().await;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            log_warn!("store listener skipped {skipped} change(s)");
                            controller.resync_from_store().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    async fn resync_from_store(&self) {
        let mut inner = self.inner.lock().await;
        match self.load().await {
            Ok(stored) => self.sync_rules_if_stale(&mut inner, &stored).await,
            Err(err) => log_error!("resync skipped: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        blocking::MemoryFilter,
        clock::ManualClock,
        notify::RecordingNotifier,
        timer::wakeup::ManualScheduler,
    };
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    struct Harness {
        controller: FocusController,
        filter: Arc<MemoryFilter>,
        scheduler: Arc<ManualScheduler>,
        notifier: Arc<RecordingNotifier>,
        clock: Arc<ManualClock>,
    }

    async fn harness() -> Harness {
        let db = Database::open_in_memory().unwrap();
        let filter = Arc::new(MemoryFilter::new());
        let scheduler = Arc::new(ManualScheduler::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        ));
        let controller = FocusController::new(Collaborators {
            db,
            enforcer: RuleEnforcer::new(filter.clone(), std::time::Duration::from_secs(2)),
            scheduler: scheduler.clone(),
            notifier: notifier.clone(),
            clock: clock.clone(),
        });
        controller.restore().await.unwrap();
        Harness {
            controller,
            filter,
            scheduler,
            notifier,
            clock,
        }
    }

    impl Harness {
        async fn fire(&self) -> bool {
            let fired = self.scheduler.fire(WAKEUP_NAME).expect("a wakeup is armed");
            self.clock.set(fired.due_at);
            self.controller.on_wakeup(fired).await.unwrap()
        }

        async fn set_count(&self, count: u32) {
            self.controller
                .db()
                .set_values(vec![(keys::SESSION_COUNT.to_string(), json!(count))])
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn start_focus_arms_wakeup_and_installs_rules() {
        let h = harness().await;
        let now = h.clock.now();
        h.controller.start_focus(Some(json!(25))).await.unwrap();

        let status = h.controller.status().await.unwrap();
        assert_eq!(status.current_mode, SessionMode::Focus);
        assert!(status.focus_enabled);
        assert_eq!(status.session_end_at, Some(now + Duration::minutes(25)));
        assert_eq!(status.remaining_ms, Some(1_500_000));
        assert_eq!(
            h.scheduler.armed(WAKEUP_NAME).map(|(_, at)| at),
            status.session_end_at
        );
        assert_eq!(
            h.filter.installed_domains(),
            vec!["youtube.com", "twitter.com", "reddit.com"]
        );
    }

    #[tokio::test]
    async fn bad_minutes_fall_back_to_default() {
        let h = harness().await;
        let now = h.clock.now();
        for minutes in [
            json!(0),
            json!(-4),
            json!("soon"),
            Value::Null,
            json!(1e300),
            json!("1e300"),
            json!(f64::MAX),
        ] {
            h.controller.start_focus(Some(minutes)).await.unwrap();
            let status = h.controller.status().await.unwrap();
            assert_eq!(status.session_end_at, Some(now + Duration::minutes(25)));
        }
        h.controller.start_focus(None).await.unwrap();
        assert_eq!(h.controller.status().await.unwrap().session_minutes, 25.0);
    }

    #[tokio::test]
    async fn focus_wakeup_goes_to_short_break() {
        let h = harness().await;
        h.controller.start_cycle(ConfigOverrides::default()).await.unwrap();
        assert!(h.fire().await);

        let status = h.controller.status().await.unwrap();
        assert_eq!(status.current_mode, SessionMode::Break);
        assert_eq!(status.completed_focus_count, 1);
        assert!(!status.focus_enabled);
        assert_eq!(
            status.session_end_at,
            Some(h.clock.now() + Duration::minutes(5))
        );
        assert_eq!(status.today.sessions_completed, 1);
        assert_eq!(status.today.focus_seconds_accrued, 1500);
        assert!(h.filter.installed().is_empty());
        assert_eq!(h.notifier.sent()[0].1, "Time for a break.");
    }

    #[tokio::test]
    async fn fourth_focus_gets_long_break() {
        let h = harness().await;
        h.set_count(3).await;
        h.controller.start_cycle(ConfigOverrides::default()).await.unwrap();
        h.fire().await;

        let status = h.controller.status().await.unwrap();
        assert_eq!(status.completed_focus_count, 4);
        assert_eq!(
            status.session_end_at,
            Some(h.clock.now() + Duration::minutes(15))
        );
    }

    #[tokio::test]
    async fn manual_cycle_pauses_after_focus() {
        let h = harness().await;
        let overrides: ConfigOverrides =
            serde_json::from_value(json!({ "autoStartNext": false })).unwrap();
        h.controller.start_cycle(overrides).await.unwrap();
        h.fire().await;

        let status = h.controller.status().await.unwrap();
        assert_eq!(status.current_mode, SessionMode::Break);
        assert_eq!(status.session_end_at, None);
        assert!(!status.focus_enabled);
        assert_eq!(h.scheduler.armed_count(), 0);

        h.controller.start_focus(Some(json!(10))).await.unwrap();
        let status = h.controller.status().await.unwrap();
        assert_eq!(status.current_mode, SessionMode::Focus);
        assert_eq!(h.scheduler.armed_count(), 1);
    }

    #[tokio::test]
    async fn break_wakeup_starts_next_focus() {
        let h = harness().await;
        h.controller.start_cycle(ConfigOverrides::default()).await.unwrap();
        h.fire().await;
        h.fire().await;

        let status = h.controller.status().await.unwrap();
        assert_eq!(status.current_mode, SessionMode::Focus);
        assert!(status.focus_enabled);
        assert_eq!(status.completed_focus_count, 1);
        assert!(!h.filter.installed().is_empty());
        assert_eq!(h.notifier.sent().len(), 2);
    }

    #[tokio::test]
    async fn stop_cycle_mid_break_resets_everything() {
        let h = harness().await;
        h.controller.start_cycle(ConfigOverrides::default()).await.unwrap();
        h.fire().await;
        h.controller.stop_cycle().await.unwrap();

        let status = h.controller.status().await.unwrap();
        assert_eq!(status.current_mode, SessionMode::Idle);
        assert_eq!(status.completed_focus_count, 0);
        assert_eq!(status.session_end_at, None);
        assert_eq!(h.scheduler.armed_count(), 0);
        assert!(h.filter.installed().is_empty());
    }

    #[tokio::test]
    async fn wakeup_after_stop_is_ignored() {
        let h = harness().await;
        h.controller.start_focus(None).await.unwrap();
        let fired = h.scheduler.armed(WAKEUP_NAME).unwrap();
        h.controller.stop_focus().await.unwrap();

        let late = FiredWakeup {
            name: WAKEUP_NAME.to_string(),
            token: fired.0,
            due_at: fired.1,
        };
        h.clock.set(fired.1);
        assert!(!h.controller.on_wakeup(late).await.unwrap());

        let status = h.controller.status().await.unwrap();
        assert_eq!(status.current_mode, SessionMode::Idle);
        assert_eq!(status.today.sessions_completed, 0);
    }

    #[tokio::test]
    async fn restarting_focus_supersedes_previous_wakeup() {
        let h = harness().await;
        h.controller.start_focus(Some(json!(25))).await.unwrap();
        let first = h.scheduler.armed(WAKEUP_NAME).unwrap();
        h.clock.advance(Duration::minutes(3));
        h.controller.start_focus(Some(json!(10))).await.unwrap();

        assert_eq!(h.scheduler.armed_count(), 1);
        let stale = FiredWakeup {
            name: WAKEUP_NAME.to_string(),
            token: first.0,
            due_at: first.1,
        };
        assert!(!h.controller.on_wakeup(stale).await.unwrap());
        let status = h.controller.status().await.unwrap();
        assert_eq!(status.session_end_at, Some(h.clock.now() + Duration::minutes(10)));
    }

    #[tokio::test]
    async fn scheduling_failure_retries_then_degrades() {
        let h = harness().await;
        h.scheduler.fail_next(1);
        h.controller.start_focus(None).await.unwrap();
        assert!(!h.controller.status().await.unwrap().degraded);
        assert_eq!(h.scheduler.armed_count(), 1);

        h.scheduler.fail_next(2);
        h.controller.start_focus(None).await.unwrap();
        let status = h.controller.status().await.unwrap();
        assert!(status.degraded);
        assert_eq!(status.current_mode, SessionMode::Focus);
        assert_eq!(h.scheduler.armed_count(), 0);
    }

    #[tokio::test]
    async fn rule_failure_does_not_block_timer() {
        let h = harness().await;
        h.filter.set_available(false);
        h.controller.start_focus(None).await.unwrap();
        let status = h.controller.status().await.unwrap();
        assert_eq!(status.current_mode, SessionMode::Focus);

        h.filter.set_available(true);
        h.controller.reconcile().await.unwrap();
        assert_eq!(h.filter.installed().len(), 3);
    }

    #[tokio::test]
    async fn missed_wakeup_is_processed_by_reconcile() {
        let h = harness().await;
        h.controller.start_cycle(ConfigOverrides::default()).await.unwrap();
        h.scheduler.cancel(WAKEUP_NAME);
        h.clock.advance(Duration::minutes(40));

        h.controller.reconcile().await.unwrap();
        let status = h.controller.status().await.unwrap();
        assert_eq!(status.current_mode, SessionMode::Break);
        assert_eq!(status.today.focus_seconds_accrued, 1500);
    }

    #[tokio::test]
    async fn blocklist_edits_resync_during_focus() {
        let h = harness().await;
        h.controller.start_focus(None).await.unwrap();
        let list = h
            .controller
            .add_blocked_site("HTTP://WWW.Example.com/path")
            .await
            .unwrap();
        assert_eq!(list.last().map(String::as_str), Some("example.com"));
        assert!(h.filter.installed_domains().contains(&"example.com".to_string()));

        h.controller.remove_blocked_site("youtube.com").await.unwrap();
        assert!(!h.filter.installed_domains().contains(&"youtube.com".to_string()));

        let err = h.controller.add_blocked_site("https://www./").await.unwrap_err();
        assert!(matches!(err, FocusError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn stats_commands_accrue_for_today() {
        let h = harness().await;
        h.controller.record_task_completion_delta(2).await.unwrap();
        h.controller.record_task_completion_delta(-5).await.unwrap();
        h.controller.record_pause_reason("phone").await.unwrap();
        h.controller.record_pause_reason("  ").await.unwrap();

        let today = h.controller.status().await.unwrap().today;
        assert_eq!(today.tasks_completed_delta, 0);
        assert_eq!(today.pause_reason_counts.len(), 1);
        assert_eq!(today.pause_reason_counts["phone"], 1);
    }
}
