//! The storage contract and the backend selector.
//!
//! Every backend implements [`NoteStore`]. [`Storage`] picks exactly one of them
//! at startup and is the only handle the rest of the application holds.

mod cloud;
mod local;

pub use cloud::{CloudStore, DEFAULT_IMAGE_BUCKET};
pub use local::LocalStore;

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::bridge::BridgeClient;
use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use crate::models::*;

/// Message surfaced once when neither the desktop host nor cloud credentials are available.
pub const LOCAL_MODE_NOTICE: &str =
    "Running in local-only mode. Notes are stored on this device and will not sync.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Desktop,
    Cloud,
    Local,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Desktop => write!(f, "desktop"),
            BackendKind::Cloud => write!(f, "cloud"),
            BackendKind::Local => write!(f, "local"),
        }
    }
}

/// Operations every backend supports.
///
/// Listings and search results are ordered by `updated_at`, newest first.
/// Lookups of unknown ids return `None`; updates and deletes of unknown ids
/// succeed without effect.
#[async_trait]
pub trait NoteStore: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn create_notebook(&self, name: &str) -> StoreResult<Notebook>;
    async fn list_notebooks(&self) -> StoreResult<Vec<Notebook>>;
    async fn get_notebook(&self, id: Uuid) -> StoreResult<Option<Notebook>>;
    async fn update_notebook(&self, id: Uuid, input: UpdateNotebookInput) -> StoreResult<()>;
    /// Removes the notebook and every note in it, atomically.
    async fn delete_notebook(&self, id: Uuid) -> StoreResult<()>;

    async fn create_note(&self, input: CreateNoteInput) -> StoreResult<Note>;
    async fn list_notes_by_notebook(&self, notebook_id: Uuid) -> StoreResult<Vec<Note>>;
    async fn get_note(&self, id: Uuid) -> StoreResult<Option<Note>>;
    async fn update_note(&self, id: Uuid, input: UpdateNoteInput) -> StoreResult<()>;
    async fn delete_note(&self, id: Uuid) -> StoreResult<()>;

    /// Case-insensitive substring match on title or content. A blank query
    /// matches nothing.
    async fn search_notes(&self, query: &str) -> StoreResult<Vec<Note>>;

    async fn upload_image(&self, image: ImageUpload) -> StoreResult<String>;
    async fn delete_image(&self, url: &str) -> StoreResult<()>;

    /// Where this backend keeps its data, if it is a local file.
    async fn storage_path(&self) -> StoreResult<Option<String>>;
}

/// Decide which backend a configuration selects.
pub fn choose_backend(config: &Config) -> BackendKind {
    if config.bridge_socket.is_some() {
        BackendKind::Desktop
    } else if config.cloud_credentials().is_some() {
        BackendKind::Cloud
    } else {
        BackendKind::Local
    }
}

/// The storage facade: one backend, chosen once.
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn NoteStore>,
    notice_pending: Arc<AtomicBool>,
}

impl Storage {
    pub fn new(backend: Arc<dyn NoteStore>) -> Self {
        let notice_pending = backend.kind() == BackendKind::Local;
        Self {
            backend,
            notice_pending: Arc::new(AtomicBool::new(notice_pending)),
        }
    }

    /// Build the backend the configuration selects.
    ///
    /// A configured but unreachable desktop host is a transport error, not a
    /// reason to fall back to another backend.
    pub async fn from_config(config: &Config) -> StoreResult<Self> {
        let kind = choose_backend(config);
        let backend: Arc<dyn NoteStore> = match kind {
            BackendKind::Desktop => {
                let socket = config
                    .socket_path()
                    .map_err(|e| StoreError::transport(format!("{:#}", e)))?;
                Arc::new(BridgeClient::connect(&socket).await?)
            }
            BackendKind::Cloud => {
                let (url, key) = config
                    .cloud_credentials()
                    .ok_or_else(|| StoreError::validation("cloud_key", "cloud credentials missing"))?;
                Arc::new(CloudStore::with_bucket(url, key, config.image_bucket.clone()))
            }
            BackendKind::Local => match config.local_store_path() {
                Ok(path) => Arc::new(LocalStore::open(path)?),
                Err(e) => {
                    tracing::warn!("No data directory, local store will not persist: {:#}", e);
                    Arc::new(LocalStore::in_memory())
                }
            },
        };

        tracing::info!("Using {} storage backend", kind);
        Ok(Self::new(backend))
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// The local-only mode notice, the first time it is asked for.
    pub fn take_local_mode_notice(&self) -> Option<&'static str> {
        if self.notice_pending.swap(false, Ordering::SeqCst) {
            tracing::warn!("{}", LOCAL_MODE_NOTICE);
            Some(LOCAL_MODE_NOTICE)
        } else {
            None
        }
    }

    pub fn backend(&self) -> Arc<dyn NoteStore> {
        self.backend.clone()
    }
}

impl Deref for Storage {
    type Target = dyn NoteStore;

    fn deref(&self) -> &Self::Target {
        self.backend.as_ref()
    }
}
