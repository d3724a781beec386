use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{bail, Result};
use log::debug;

use crate::error::{FocusError, FocusResult};

use super::rules::BlockRule;

/// Host facility that actually filters network traffic.
///
/// Implementations do blocking I/O; the enforcer runs them off the async
/// runtime with a deadline.
pub trait NetworkFilter: Send + Sync + 'static {
    fn installed_rule_ids(&self) -> Result<Vec<u32>>;

    fn update_rules(&self, remove_ids: &[u32], add_rules: &[BlockRule]) -> Result<()>;
}

/// In-process rule table. Used when no host facility is configured and in tests.
#[derive(Default)]
pub struct MemoryFilter {
    rules: Mutex<BTreeMap<u32, BlockRule>>,
    unavailable: AtomicBool,
    update_calls: AtomicU64,
}

impl MemoryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail, as if the facility had gone away.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn installed(&self) -> Vec<BlockRule> {
        match self.rules.lock() {
            Ok(guard) => guard.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        }
    }

    pub fn installed_domains(&self) -> Vec<String> {
        self.installed().into_iter().map(|rule| rule.domain).collect()
    }

    pub fn update_calls(&self) -> u64 {
        self.update_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("network filter unavailable");
        }
        Ok(())
    }
}

impl NetworkFilter for MemoryFilter {
    fn installed_rule_ids(&self) -> Result<Vec<u32>> {
        self.check_available()?;
        let guard = match self.rules.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(guard.keys().copied().collect())
    }

    fn update_rules(&self, remove_ids: &[u32], add_rules: &[BlockRule]) -> Result<()> {
        self.check_available()?;
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let mut guard = match self.rules.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for id in remove_ids {
            guard.remove(id);
        }
        for rule in add_rules {
            if guard.contains_key(&rule.id) {
                bail!("rule id {} is already installed", rule.id);
            }
            guard.insert(rule.id, rule.clone());
        }
        Ok(())
    }
}

/// Applies compiled rules to a [`NetworkFilter`] by full replacement.
#[derive(Clone)]
pub struct RuleEnforcer {
    filter: Arc<dyn NetworkFilter>,
    timeout: Duration,
}

impl RuleEnforcer {
    pub fn new(filter: Arc<dyn NetworkFilter>, timeout: Duration) -> Self {
        Self { filter, timeout }
    }

    /// Remove every installed rule, then install `desired`. Returns the number
    /// of rules now installed. An empty `desired` is the same as [`clear`].
    ///
    /// [`clear`]: RuleEnforcer::clear
    pub async fn sync(&self, desired: Vec<BlockRule>) -> FocusResult<usize> {
        let filter = Arc::clone(&self.filter);
        self.run(move || replace_all(filter.as_ref(), &desired)).await
    }

    pub async fn clear(&self) -> FocusResult<()> {
        self.sync(Vec::new()).await.map(|_| ())
    }

    async fn run<F>(&self, job: F) -> FocusResult<usize>
    where
        F: FnOnce() -> Result<usize> + Send + 'static,
    {
        let task = tokio::task::spawn_blocking(job);
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(count))) => Ok(count),
            Ok(Ok(Err(err))) => Err(FocusError::RuleInstall(format!("{err:#}"))),
            Ok(Err(join_err)) => Err(FocusError::RuleInstall(format!(
                "rule update task failed: {join_err}"
            ))),
            Err(_) => Err(FocusError::RuleInstall(format!(
                "rule update timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

fn replace_all(filter: &dyn NetworkFilter, desired: &[BlockRule]) -> Result<usize> {
    let existing = filter.installed_rule_ids()?;
    if !existing.is_empty() {
        filter.update_rules(&existing, &[])?;
    }
    if !desired.is_empty() {
        filter.update_rules(&[], desired)?;
    }
    debug!(
        "replaced {} installed rule(s) with {}",
        existing.len(),
        desired.len()
    );
    Ok(desired.len())
}
