pub mod blocking;
pub mod clock;
pub mod db;
pub mod error;
pub mod notify;
pub mod settings;
pub mod stats;
pub mod tasks;
pub mod timer;
pub mod utils;

use std::{io::IsTerminal, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use blocking::{HostsFileFilter, MemoryFilter, NetworkFilter, RuleEnforcer};
use clock::{Clock, SystemClock};
use db::Database;
use notify::{LogNotifier, Notifier, SilentNotifier, TerminalNotifier};
use settings::{EnforcerBackend, SettingsStore};
use tasks::TaskList;
use timer::{Collaborators, FiredWakeup, FocusController, TokioScheduler};

pub use error::{FocusError, FocusResult};

pub const DATA_DIR_ENV: &str = "FOCUSKIT_DATA_DIR";
pub const DEBUG_ENV: &str = "FOCUSKIT_DEBUG";
pub const DATABASE_FILE: &str = "focuskit.sqlite3";
pub const SETTINGS_FILE: &str = "settings.json";

/// `$FOCUSKIT_DATA_DIR`, else the platform data dir, else `./.focuskit`.
pub fn resolve_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|value| !value.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .map(|dir| dir.join("focuskit"))
        .unwrap_or_else(|| PathBuf::from(".focuskit"))
}

fn debug_mode() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// A fully wired process: store, settings, controller and task list.
pub struct App {
    pub data_dir: PathBuf,
    pub db: Database,
    pub settings: SettingsStore,
    pub controller: FocusController,
    pub tasks: TaskList,
    wakeups: mpsc::UnboundedReceiver<FiredWakeup>,
}

impl App {
    /// Open the store under `data_dir`, restore the last session and resync rules.
    pub async fn open(data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

        let settings = SettingsStore::new(data_dir.join(SETTINGS_FILE))?;
        let db = Database::new(data_dir.join(DATABASE_FILE))?;

        let enforcer_settings = settings.enforcer();
        let filter: Arc<dyn NetworkFilter> = match enforcer_settings.backend {
            EnforcerBackend::Hosts => {
                Arc::new(HostsFileFilter::new(enforcer_settings.hosts_path_in(&data_dir)))
            }
            EnforcerBackend::Memory => Arc::new(MemoryFilter::new()),
        };

        let notifier: Arc<dyn Notifier> = if !settings.notifications().enabled {
            Arc::new(SilentNotifier)
        } else if std::io::stdout().is_terminal() {
            Arc::new(TerminalNotifier)
        } else {
            Arc::new(LogNotifier)
        };

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let (scheduler, wakeups) = TokioScheduler::new();

        let controller = FocusController::new(Collaborators {
            db: db.clone(),
            enforcer: RuleEnforcer::new(filter, enforcer_settings.timeout()),
            scheduler: Arc::new(scheduler),
            notifier,
            clock: clock.clone(),
        });
        controller.restore().await?;

        Ok(Self {
            tasks: TaskList::new(db.clone(), clock),
            data_dir,
            db,
            settings,
            controller,
            wakeups,
        })
    }

    /// Run until Ctrl-C: deliver wakeups, follow store changes and reconcile
    /// on a fixed tick.
    pub async fn run_daemon(self) -> Result<()> {
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown requested"),
                Err(err) => warn!("Failed to listen for Ctrl-C: {err}"),
            }
            signal.cancel();
        });
        self.run_until(shutdown).await
    }

    pub async fn run_until(self, shutdown: CancellationToken) -> Result<()> {
        let tick = if debug_mode() {
            Duration::from_secs(1)
        } else {
            Duration::from_secs(10)
        };

        let wakeup_task = self
            .controller
            .spawn_wakeup_listener(self.wakeups, shutdown.clone());
        let store_task = self.controller.spawn_store_listener(shutdown.clone());
        info!(
            "focuskit running from {} (reconcile every {}s)",
            self.data_dir.display(),
            tick.as_secs()
        );

        let mut interval = tokio::time::interval(tick);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(err) = self.controller.reconcile().await {
                        warn!("reconcile failed: {err}");
                    }
                }
            }
        }

        for task in [wakeup_task, store_task] {
            if let Err(err) = task.await {
                warn!("background task ended abnormally: {err}");
            }
        }
        info!("focuskit stopped");
        Ok(())
    }
}
