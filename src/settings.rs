use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

pub const DEFAULT_ENFORCER_TIMEOUT_MS: u64 = 3_000;
pub const HOSTS_FILE_NAME: &str = "hosts.blocklist";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum EnforcerBackend {
    /// Managed section in a hosts-format file.
    #[default]
    Hosts,
    /// Rules live only in this process.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnforcerSettings {
    pub backend: EnforcerBackend,
    /// Defaults to `hosts.blocklist` in the data directory.
    pub hosts_path: Option<PathBuf>,
    pub timeout_ms: u64,
}

impl Default for EnforcerSettings {
    fn default() -> Self {
        Self {
            backend: EnforcerBackend::Hosts,
            hosts_path: None,
            timeout_ms: DEFAULT_ENFORCER_TIMEOUT_MS,
        }
    }
}

impl EnforcerSettings {
    pub fn hosts_path_in(&self, data_dir: &Path) -> PathBuf {
        self.hosts_path
            .clone()
            .unwrap_or_else(|| data_dir.join(HOSTS_FILE_NAME))
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    pub enabled: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSettings {
    pub enforcer: EnforcerSettings,
    pub notifications: NotificationSettings,
}

/// `settings.json` in the data directory. A missing or unreadable file means defaults.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!("ignoring invalid settings in {}: {err}", path.display());
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> UserSettings {
        self.read().clone()
    }

    pub fn enforcer(&self) -> EnforcerSettings {
        self.read().enforcer.clone()
    }

    pub fn notifications(&self) -> NotificationSettings {
        self.read().notifications.clone()
    }

    pub fn update_notifications(&self, settings: NotificationSettings) -> Result<()> {
        let mut guard = self.write();
        guard.notifications = settings;
        self.persist(&guard)
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        assert_eq!(store.current(), UserSettings::default());
        assert_eq!(store.enforcer().backend, EnforcerBackend::Hosts);
        assert!(store.notifications().enabled);
        assert_eq!(
            store.enforcer().hosts_path_in(dir.path()),
            dir.path().join(HOSTS_FILE_NAME)
        );
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"enforcer":{"backend":"memory"}}"#).unwrap();

        let store = SettingsStore::new(path).unwrap();
        let enforcer = store.enforcer();
        assert_eq!(enforcer.backend, EnforcerBackend::Memory);
        assert_eq!(enforcer.timeout_ms, DEFAULT_ENFORCER_TIMEOUT_MS);
        assert!(store.notifications().enabled);
    }

    #[test]
    fn invalid_json_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ nope").unwrap();
        let store = SettingsStore::new(path).unwrap();
        assert_eq!(store.current(), UserSettings::default());
    }

    #[test]
    fn updates_are_written_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();
        store
            .update_notifications(NotificationSettings { enabled: false })
            .unwrap();

        let reopened = SettingsStore::new(path).unwrap();
        assert!(!reopened.notifications().enabled);
    }
}
