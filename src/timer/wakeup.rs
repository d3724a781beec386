//! One-shot wakeups keyed by name.
//!
//! Arming a name that is already armed replaces the earlier wakeup, so a
//! scheduler never holds more than one pending wakeup per name. Every arm
//! hands out a fresh [`WakeupToken`]; the receiver compares it against the
//! token it last armed and drops anything older.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

pub const WAKEUP_NAME: &str = "focus-session";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WakeupToken(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredWakeup {
    pub name: String,
    pub token: WakeupToken,
    pub due_at: DateTime<Utc>,
}

pub trait WakeupScheduler: Send + Sync + 'static {
    /// Fire once at `at`, replacing any wakeup already armed under `name`.
    fn arm(&self, name: &str, at: DateTime<Utc>) -> Result<WakeupToken>;

    /// Returns whether something was armed.
    fn cancel(&self, name: &str) -> bool;

    fn armed(&self, name: &str) -> Option<(WakeupToken, DateTime<Utc>)>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct Slot {
    token: WakeupToken,
    due_at: DateTime<Utc>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Sleeps on the tokio runtime and delivers fired wakeups over a channel.
pub struct TokioScheduler {
    fired: mpsc::UnboundedSender<FiredWakeup>,
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    next_token: AtomicU64,
}

impl TokioScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FiredWakeup>) {
        let (fired, receiver) = mpsc::unbounded_channel();
        let scheduler = Self {
            fired,
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(1),
        };
        (scheduler, receiver)
    }
}

impl WakeupScheduler for TokioScheduler {
    fn arm(&self, name: &str, at: DateTime<Utc>) -> Result<WakeupToken> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| anyhow!("no runtime to schedule wakeup on: {err}"))?;
        if self.fired.is_closed() {
            return Err(anyhow!("wakeup receiver has been dropped"));
        }

        let token = WakeupToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let cancel = CancellationToken::new();

        let delay = (at - Utc::now()).to_std().unwrap_or_default();
        let fired = self.fired.clone();
        let slots = Arc::clone(&self.slots);
        let slot_name = name.to_string();
        let task_cancel = cancel.clone();

        // Held across the spawn so an immediately due task cannot run before its slot exists.
        let mut armed = lock(&self.slots);
        let handle = runtime.spawn(async move {
            tokio::select! {
                _ = task_cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    {
                        let mut slots = lock(&slots);
                        if slots.get(&slot_name).map(|slot| slot.token) == Some(token) {
                            slots.remove(&slot_name);
                        }
                    }
                    let _ = fired.send(FiredWakeup {
                        name: slot_name,
                        token,
                        due_at: at,
                    });
                }
            }
        });

        let previous = armed.insert(
            name.to_string(),
            Slot {
                token,
                due_at: at,
                cancel,
                handle,
            },
        );
        drop(armed);
        if let Some(previous) = previous {
            previous.cancel.cancel();
            previous.handle.abort();
        }

        Ok(token)
    }

    fn cancel(&self, name: &str) -> bool {
        match lock(&self.slots).remove(name) {
            Some(slot) => {
                slot.cancel.cancel();
                slot.handle.abort();
                true
            }
            None => false,
        }
    }

    fn armed(&self, name: &str) -> Option<(WakeupToken, DateTime<Utc>)> {
        lock(&self.slots)
            .get(name)
            .map(|slot| (slot.token, slot.due_at))
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, slot) in lock(&self.slots).drain() {
            slot.cancel.cancel();
            slot.handle.abort();
        }
    }
}

#[derive(Debug, Default)]
struct ManualSlots {
    slots: HashMap<String, (WakeupToken, DateTime<Utc>)>,
    next_token: u64,
    arm_calls: u64,
    failures_left: u32,
}

/// Scheduler that never fires on its own. Tests decide when a wakeup fires.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    inner: Mutex<ManualSlots>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to `arm` fail.
    pub fn fail_next(&self, count: u32) {
        lock(&self.inner).failures_left = count;
    }

    pub fn arm_calls(&self) -> u64 {
        lock(&self.inner).arm_calls
    }

    pub fn armed_count(&self) -> usize {
        lock(&self.inner).slots.len()
    }

    /// Disarm `name` and hand back the wakeup as if it had fired.
    pub fn fire(&self, name: &str) -> Option<FiredWakeup> {
        lock(&self.inner)
            .slots
            .remove(name)
            .map(|(token, due_at)| FiredWakeup {
                name: name.to_string(),
                token,
                due_at,
            })
    }
}

impl WakeupScheduler for ManualScheduler {
    fn arm(&self, name: &str, at: DateTime<Utc>) -> Result<WakeupToken> {
        let mut inner = lock(&self.inner);
        inner.arm_calls += 1;
        if inner.failures_left > 0 {
            inner.failures_left -= 1;
            return Err(anyhow!("wakeup facility unavailable"));
        }
        inner.next_token += 1;
        let token = WakeupToken(inner.next_token);
        inner.slots.insert(name.to_string(), (token, at));
        Ok(token)
    }

    fn cancel(&self, name: &str) -> bool {
        lock(&self.inner).slots.remove(name).is_some()
    }

    fn armed(&self, name: &str) -> Option<(WakeupToken, DateTime<Utc>)> {
        lock(&self.inner).slots.get(name).copied()
    }
}
