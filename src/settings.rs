use crate::error::{BeaconError, BeaconResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

pub const DEFAULT_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_REPORT_HOUR: u32 = 21;
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Operator-tunable configuration, persisted as one JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bot_token: String,
    pub chat_id: String,
    pub interval_ms: u64,
    pub daily_reports_enabled: bool,
    pub report_hour: u32,
    pub retention_days: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            interval_ms: DEFAULT_INTERVAL_MS,
            daily_reports_enabled: false,
            report_hour: DEFAULT_REPORT_HOUR,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

/// Bot token and chat id, present only when both are configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub bot_token: String,
    pub chat_id: String,
}

impl Settings {
    pub fn credentials(&self) -> Option<Credentials> {
        let bot_token = self.bot_token.trim();
        let chat_id = self.chat_id.trim();
        if bot_token.is_empty() || chat_id.is_empty() {
            return None;
        }
        Some(Credentials {
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
        })
    }

    pub fn validate(&self) -> BeaconResult<()> {
        if self.interval_ms == 0 {
            return Err(BeaconError::InvalidArgument(
                "Interval must be greater than zero".into(),
            ));
        }
        if self.report_hour > 23 {
            return Err(BeaconError::InvalidArgument(
                "Report hour must be between 0 and 23".into(),
            ));
        }
        Ok(())
    }

    /// Token with everything but the first and last four characters hidden.
    pub fn masked_token(&self) -> String {
        mask_secret(&self.bot_token)
    }
}

pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.is_empty() {
        return "(not set)".to_string();
    }
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}

/// Shared settings record with write-through persistence.
///
/// Readers always observe a complete record; a mutation is committed in
/// memory only after it reached disk.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<Settings>,
}

impl SettingsStore {
    /// Load from `path`. Missing, unreadable or invalid files fall back to defaults.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = read_settings(&path).unwrap_or_default();
        if data.credentials().is_none() {
            log::warn!(
                "No messaging credentials in {}; outbound updates disabled",
                path.display()
            );
        }
        Self {
            path,
            data: RwLock::new(data),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Settings {
        self.data
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn interval_ms(&self) -> u64 {
        self.snapshot().interval_ms
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.snapshot().credentials()
    }

    /// Apply `change`, validate, persist, then publish. Returns the new record.
    pub fn update<F>(&self, change: F) -> BeaconResult<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        let mut guard = self
            .data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut next = guard.clone();
        change(&mut next);
        next.validate()?;
        self.persist(&next)?;
        *guard = next.clone();
        Ok(next)
    }

    fn persist(&self, data: &Settings) -> BeaconResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let serialized = serde_json::to_string_pretty(data)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serialized)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn read_settings(path: &Path) -> Option<Settings> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            log::error!("Error loading settings from {}: {}", path.display(), e);
            return None;
        }
    };

    let settings: Settings = match serde_json::from_str(&contents) {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("Corrupt settings file {}: {}", path.display(), e);
            return None;
        }
    };

    match settings.validate() {
        Ok(()) => Some(settings),
        Err(e) => {
            log::error!("Ignoring settings file {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let store = SettingsStore::load(tmp.path().join("settings.json"));
        assert_eq!(store.snapshot(), Settings::default());
        assert_eq!(store.interval_ms(), 60_000);
        assert!(store.credentials().is_none());
    }

    #[test]
    fn test_corrupt_or_invalid_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("settings.json");

        fs::write(&path, "{\"bot_token\": 12").unwrap();
        assert_eq!(SettingsStore::load(&path).snapshot(), Settings::default());

        fs::write(&path, r#"{"bot_token":"abc","chat_id":"1","interval_ms":0}"#).unwrap();
        assert_eq!(SettingsStore::load(&path).snapshot(), Settings::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("settings.json");
        fs::write(&path, r#"{"bot_token":"123:abc","chat_id":"42"}"#).unwrap();

        let settings = SettingsStore::load(&path).snapshot();
        assert_eq!(settings.interval_ms, DEFAULT_INTERVAL_MS);
        assert_eq!(settings.retention_days, DEFAULT_RETENTION_DAYS);
        assert_eq!(
            settings.credentials(),
            Some(Credentials {
                bot_token: "123:abc".into(),
                chat_id: "42".into()
            })
        );
    }

    #[test]
    fn test_update_writes_through() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("settings.json");
        let store = SettingsStore::load(&path);

        store.update(|s| s.interval_ms = 15_000).unwrap();
        assert_eq!(store.interval_ms(), 15_000);

        let reloaded = SettingsStore::load(&path);
        assert_eq!(reloaded.interval_ms(), 15_000);
    }

    #[test]
    fn test_invalid_update_is_not_committed() {
        let tmp = TempDir::new().unwrap();
        let store = SettingsStore::load(tmp.path().join("settings.json"));

        let result = store.update(|s| s.interval_ms = 0);
        assert!(matches!(result, Err(BeaconError::InvalidArgument(_))));
        assert_eq!(store.interval_ms(), DEFAULT_INTERVAL_MS);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "(not set)");
        assert_eq!(mask_secret("short"), "*****");
        assert_eq!(mask_secret("123456:ABCDEFGH"), "1234…EFGH");
    }
}
