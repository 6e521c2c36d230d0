use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RegisterError, Result};

pub const DATA_DIR: &str = "data";
pub const DATABASE_FILE: &str = "policyhub.db";
pub const ATTACHMENTS_DIR: &str = "attachments";
pub const EXPORTS_DIR: &str = "exports";

/// Per-workstation preferences, stored as JSON next to the user's profile.
/// Everything shared lives in the shared folder, never in here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalConfig {
    pub shared_folder_path: Option<PathBuf>,
    pub remembered_username: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn load(&self) -> Result<LocalConfig> {
        if !self.path.exists() {
            return Ok(LocalConfig::default());
        }
        let raw = fs::read_to_string(&self.path)?;
        match serde_json::from_str(&raw) {
            Ok(config) => Ok(config),
            Err(error) => {
                // A corrupt file should not lock the user out.
                tracing::warn!(path = %self.path.display(), %error, "unreadable local config, starting fresh");
                Ok(LocalConfig::default())
            }
        }
    }

    pub fn save(&self, config: &LocalConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(config)
            .map_err(|e| RegisterError::validation(format!("cannot serialize config: {e}")))?;
        fs::write(&self.path, raw)?;
        Ok(())
    }

    pub fn update<F>(&self, mutate: F) -> Result<LocalConfig>
    where
        F: FnOnce(&mut LocalConfig),
    {
        let mut config = self.load()?;
        mutate(&mut config);
        self.save(&config)?;
        Ok(config)
    }

    pub fn clear_remembered_username(&self) -> Result<()> {
        self.update(|c| c.remembered_username = None)?;
        Ok(())
    }
}

/// Layout of the shared folder every workstation points at.
#[derive(Debug, Clone)]
pub struct SharedFolder {
    root: PathBuf,
}

impl SharedFolder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn database_path(&self) -> PathBuf {
        self.root.join(DATA_DIR).join(DATABASE_FILE)
    }

    pub fn attachments_dir(&self) -> PathBuf {
        self.root.join(ATTACHMENTS_DIR)
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.root.join(EXPORTS_DIR)
    }

    /// Creates the data, attachments and exports directories if missing.
    pub fn ensure_layout(&self) -> Result<()> {
        fs::create_dir_all(self.root.join(DATA_DIR))?;
        fs::create_dir_all(self.attachments_dir())?;
        fs::create_dir_all(self.exports_dir())?;
        Ok(())
    }

    /// Checks the folder exists and is writable before the pool opens it.
    pub fn validate(&self) -> Result<()> {
        if !self.root.is_dir() {
            return Err(RegisterError::validation(format!(
                "shared folder does not exist: {}",
                self.root.display()
            )));
        }
        let probe = self.root.join(".write_probe");
        fs::write(&probe, b"probe").map_err(|e| {
            RegisterError::validation(format!(
                "shared folder is not writable: {} ({e})",
                self.root.display()
            ))
        })?;
        let _ = fs::remove_file(&probe);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_missing_file_returns_default() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("config.json"));
        let config = store.load().unwrap();
        assert!(config.shared_folder_path.is_none());
        assert!(config.remembered_username.is_none());
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("config.json"));
        store
            .update(|c| {
                c.shared_folder_path = Some(PathBuf::from("/srv/policies"));
                c.remembered_username = Some("mbutler".to_string());
            })
            .unwrap();

        let config = store.load().unwrap();
        assert_eq!(config.shared_folder_path.as_deref(), Some(Path::new("/srv/policies")));
        assert_eq!(config.remembered_username.as_deref(), Some("mbutler"));
    }

    #[test]
    fn corrupt_file_falls_back_to_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        let store = ConfigStore::new(path);
        let config = store.load().unwrap();
        assert!(config.shared_folder_path.is_none());
    }

    #[test]
    fn ensure_layout_creates_directories() {
        let dir = TempDir::new().unwrap();
        let shared = SharedFolder::new(dir.path());
        shared.ensure_layout().unwrap();
        assert!(shared.database_path().parent().unwrap().is_dir());
        assert!(shared.attachments_dir().is_dir());
        assert!(shared.exports_dir().is_dir());
    }

    #[test]
    fn validate_rejects_missing_folder() {
        let shared = SharedFolder::new("/definitely/not/here");
        assert!(shared.validate().is_err());
    }
}
