//! Durable storage for small user preferences.
//!
//! Only one preference exists today: the destination address remembered
//! from the last accepted delivery. Values expire after a number of days.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Key under which the last destination address is remembered.
pub const DESTINATION_ADDRESS_KEY: &str = "destination_address";

/// Lifetime of a remembered preference unless configured otherwise.
pub const DEFAULT_TTL_DAYS: u32 = 365;

/// Errors that can occur while persisting preferences.
#[derive(Debug, thiserror::Error)]
pub enum PreferenceError {
    /// Failed to determine the user's configuration directory.
    #[error("failed to obtain user's directories")]
    DirectoriesNotFound,
    /// An I/O error occurred while reading or writing the preferences file.
    #[error("failed to access preferences: {0}")]
    IoError(#[from] std::io::Error),
    /// The preferences file could not be parsed.
    #[error("failed to deserialize preferences: {0}")]
    DeserializeError(#[from] toml::de::Error),
    /// The preferences could not be serialized.
    #[error("failed to serialize preferences: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

/// Read/write access to durable key-value preferences.
pub trait PreferenceStore {
    /// Returns the stored value, or `None` if it is absent or expired.
    fn read(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key` for `ttl_days` days.
    fn write(&mut self, key: &str, value: &str, ttl_days: u32) -> Result<(), PreferenceError>;
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct StoredPreference {
    value: String,
    expires_at: DateTime<Utc>,
}

impl StoredPreference {
    fn new(value: &str, ttl_days: u32) -> Self {
        Self {
            value: value.to_string(),
            expires_at: Utc::now() + Duration::days(i64::from(ttl_days)),
        }
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct PreferenceFile {
    #[serde(default)]
    entries: BTreeMap<String, StoredPreference>,
}

/// Preferences kept as TOML in the user's configuration directory.
#[derive(Debug, Clone)]
pub struct FilePreferenceStore {
    path: PathBuf,
}

impl FilePreferenceStore {
    /// Opens the store at `preferences.toml` in the user's config directory.
    pub fn open_default() -> Result<Self, PreferenceError> {
        match ProjectDirs::from("dev", "bookpost", "bookpost") {
            Some(dirs) => Ok(Self::at(dirs.config_dir().join("preferences.toml"))),
            None => Err(PreferenceError::DirectoriesNotFound),
        }
    }

    /// Opens the store backed by the file at `path`. The file is created
    /// lazily on the first write.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<PreferenceFile, PreferenceError> {
        if !self.path.exists() {
            return Ok(PreferenceFile::default());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        Ok(toml::from_str(&contents)?)
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn read(&self, key: &str) -> Option<String> {
        let file = match self.load() {
            Ok(file) => file,
            Err(err) => {
                log::warn!("Ignoring unreadable preferences at {:?}: {err}", self.path);
                return None;
            }
        };
        file.entries
            .get(key)
            .filter(|entry| entry.is_live(Utc::now()))
            .map(|entry| entry.value.clone())
    }

    fn write(&mut self, key: &str, value: &str, ttl_days: u32) -> Result<(), PreferenceError> {
        let mut file = self.load().unwrap_or_else(|err| {
            log::warn!("Replacing unreadable preferences at {:?}: {err}", self.path);
            PreferenceFile::default()
        });

        let now = Utc::now();
        file.entries.retain(|_, entry| entry.is_live(now));
        file.entries
            .insert(key.to_string(), StoredPreference::new(value, ttl_days));

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, toml::to_string_pretty(&file)?)?;
        log::debug!("Stored preference {key} at {:?}", self.path);
        Ok(())
    }
}

/// Preferences that live only as long as the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryPreferenceStore {
    entries: HashMap<String, StoredPreference>,
}

impl PreferenceStore for MemoryPreferenceStore {
    fn read(&self, key: &str) -> Option<String> {
        self.entries
            .get(key)
            .filter(|entry| entry.is_live(Utc::now()))
            .map(|entry| entry.value.clone())
    }

    fn write(&mut self, key: &str, value: &str, ttl_days: u32) -> Result<(), PreferenceError> {
        self.entries
            .insert(key.to_string(), StoredPreference::new(value, ttl_days));
        Ok(())
    }
}
