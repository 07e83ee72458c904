// Persistence for display service settings
// Settings are persisted to <state_dir>/settings.json with file locking

use super::config::Config;
use super::settings::{SettingKey, SettingValue, Snapshot};
use anyhow::{Context, Result};
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Durable key/value store of named settings
pub trait ConfigStore {
    /// Stored value for `key`, or `default` when nothing is stored
    fn get(&self, key: SettingKey, default: SettingValue) -> SettingValue;

    /// Replace every stored setting with the snapshot's values
    fn set(&mut self, snapshot: &Snapshot) -> Result<()>;

    /// Read a full snapshot, defaulting anything missing
    fn load_snapshot(&self) -> Snapshot {
        Snapshot::from_lookup(|key, default| self.get(key, default))
    }
}

/// On-disk layout of settings.json
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct SettingsFile {
    /// Storage name -> value. Kept as raw JSON so foreign entries never block a load
    #[serde(default)]
    values: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Settings stored as JSON in the state directory
#[derive(Debug)]
pub struct JsonConfigStore {
    path: PathBuf,
    contents: SettingsFile,
}

impl JsonConfigStore {
    /// Load the settings file, starting empty if it doesn't exist
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_path(config.settings_file())
    }

    pub fn open_path(path: PathBuf) -> Result<Self> {
        let contents = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
            if raw.trim().is_empty() {
                SettingsFile::default()
            } else {
                serde_json::from_str(&raw).with_context(|| {
                    format!("Failed to parse settings file: {}", path.display())
                })?
            }
        } else {
            SettingsFile::default()
        };

        Ok(Self { path, contents })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// When the file was last written by this crate
    pub fn updated_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.contents.updated_at
    }

    fn save(&self) -> Result<()> {
        let parent = self
            .path
            .parent()
            .with_context(|| format!("Invalid path: {}", self.path.display()))?;
        fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create settings directory: {}", parent.display())
        })?;

        // Writers serialize on a sidecar lock so the rename below stays atomic for readers
        let lock_path = parent.join(".settings.lock");
        let lock = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;
        lock.lock_exclusive()
            .with_context(|| "Failed to acquire exclusive lock on settings file")?;

        let contents = serde_json::to_string_pretty(&self.contents)
            .with_context(|| "Failed to serialize settings")?;
        atomic_write(&self.path, &contents)

        // Lock is released when `lock` is dropped
    }
}

impl ConfigStore for JsonConfigStore {
    fn get(&self, key: SettingKey, default: SettingValue) -> SettingValue {
        let Some(raw) = self.contents.values.get(key.name()) else {
            return default;
        };
        match serde_json::from_value::<SettingValue>(raw.clone()) {
            Ok(value) => value,
            Err(_) => {
                warn!(setting = %key, value = %raw, "unreadable stored setting, using default");
                default
            }
        }
    }

    fn set(&mut self, snapshot: &Snapshot) -> Result<()> {
        for (key, value) in snapshot.entries() {
            self.contents
                .values
                .insert(key.name().to_string(), json_value(value));
        }
        self.contents.updated_at = Some(chrono::Utc::now());
        self.save()
    }
}

fn json_value(value: SettingValue) -> serde_json::Value {
    match value {
        SettingValue::Bool(b) => serde_json::Value::Bool(b),
        SettingValue::Int(i) => serde_json::Value::from(i),
    }
}

/// In-memory store for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    values: BTreeMap<SettingKey, SettingValue>,
    writes: usize,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            values: snapshot.entries().into_iter().collect(),
            writes: 0,
        }
    }

    /// Number of `set` calls so far
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get(&self, key: SettingKey, default: SettingValue) -> SettingValue {
        self.values.get(&key).copied().unwrap_or(default)
    }

    fn set(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.values.extend(snapshot.entries());
        self.writes += 1;
        Ok(())
    }
}

/// Atomically save data to a file using write-to-temp + rename
pub fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("Invalid path: {}", path.display()))?;

    // Temp file in the same directory keeps the rename on one filesystem
    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown"),
        std::process::id()
    ));

    fs::write(&temp_path, contents)
        .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;

    fs::rename(&temp_path, path).with_context(|| {
        format!(
            "Failed to rename {} to {}",
            temp_path.display(),
            path.display()
        )
    })?;

    Ok(())
}
