use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::bridge::SOCKET_FILE_NAME;
use crate::db::DB_FILE_NAME;

const APP_NAME: &str = "notekeeper";
const CONFIG_FILE: &str = "config.json";

/// File name of the local store snapshot inside the data directory.
pub const LOCAL_STORE_FILE_NAME: &str = "local-store.json";
/// Directory the desktop host stores images in, inside the data directory.
pub const IMAGES_DIR_NAME: &str = "images";

pub const ENV_CLOUD_URL: &str = "NOTEKEEPER_CLOUD_URL";
pub const ENV_CLOUD_KEY: &str = "NOTEKEEPER_CLOUD_KEY";
pub const ENV_BRIDGE_SOCKET: &str = "NOTEKEEPER_BRIDGE_SOCKET";
pub const ENV_DATA_DIR: &str = "NOTEKEEPER_DATA_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the cloud project, e.g. `https://abc.supabase.co`
    pub cloud_url: Option<String>,
    /// Anonymous API key of the cloud project
    pub cloud_key: Option<String>,
    /// Socket of a running desktop host. When set, the desktop backend is used.
    pub bridge_socket: Option<PathBuf>,
    /// Overrides the per-user data directory
    pub data_dir: Option<PathBuf>,
    /// Object storage bucket for cloud image uploads
    pub image_bucket: String,
    pub autosave_idle_ms: u64,
    pub saving_indicator_ms: u64,
    pub search_debounce_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cloud_url: None,
            cloud_key: None,
            bridge_socket: None,
            data_dir: None,
            image_bucket: crate::store::DEFAULT_IMAGE_BUCKET.to_string(),
            autosave_idle_ms: 1000,
            saving_indicator_ms: 500,
            search_debounce_ms: 300,
        }
    }
}

impl Config {
    /// Defaults, then the user's config file, then the environment.
    /// A missing or unreadable config file leaves the defaults in place.
    pub fn load() -> Self {
        let mut config = match Self::try_load() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config, using defaults: {:#}", e);
                Self::default()
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    fn try_load() -> Result<Self> {
        let config_path = get_config_path()?;
        if !config_path.exists() {
            return Ok(Self::default());
        }
        Self::from_file(&config_path)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config = serde_json::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Overlay environment variables. Empty values count as unset.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = var(ENV_CLOUD_URL) {
            self.cloud_url = Some(url);
        }
        if let Some(key) = var(ENV_CLOUD_KEY) {
            self.cloud_key = Some(key);
        }
        if let Some(socket) = var(ENV_BRIDGE_SOCKET) {
            self.bridge_socket = Some(PathBuf::from(socket));
        }
        if let Some(dir) = var(ENV_DATA_DIR) {
            self.data_dir = Some(PathBuf::from(dir));
        }
    }

    /// Cloud URL and key, only when both are present and non-blank.
    pub fn cloud_credentials(&self) -> Option<(&str, &str)> {
        let url = self.cloud_url.as_deref().filter(|s| !s.trim().is_empty())?;
        let key = self.cloud_key.as_deref().filter(|s| !s.trim().is_empty())?;
        Some((url, key))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_data_dir(),
        }
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(DB_FILE_NAME))
    }

    pub fn local_store_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(LOCAL_STORE_FILE_NAME))
    }

    pub fn images_dir(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(IMAGES_DIR_NAME))
    }

    /// Socket the host listens on: the configured one, else `<data_dir>/bridge.sock`.
    pub fn socket_path(&self) -> Result<PathBuf> {
        match &self.bridge_socket {
            Some(socket) => Ok(socket.clone()),
            None => Ok(self.data_dir()?.join(SOCKET_FILE_NAME)),
        }
    }

    pub fn autosave_idle(&self) -> Duration {
        Duration::from_millis(self.autosave_idle_ms)
    }

    pub fn saving_indicator(&self) -> Duration {
        Duration::from_millis(self.saving_indicator_ms)
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }
}

/// Per-user data directory.
pub fn default_data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

fn get_config_path() -> Result<PathBuf> {
    let mut path =
        dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    path.push(APP_NAME);
    path.push(CONFIG_FILE);
    Ok(path)
}
