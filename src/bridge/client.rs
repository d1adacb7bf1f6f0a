//! Client side of the desktop bridge.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::protocol::*;
use crate::error::{StoreError, StoreResult};
use crate::models::*;
use crate::store::{BackendKind, NoteStore};

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// A [`NoteStore`] whose every operation is a round trip to the host process.
///
/// Calls are strictly sequential: one request is written and its response read
/// before the next request goes out.
pub struct BridgeClient {
    conn: Mutex<Connection>,
    next_id: AtomicU64,
    socket: PathBuf,
}

impl BridgeClient {
    pub async fn connect(path: &Path) -> StoreResult<Self> {
        let stream = UnixStream::connect(path).await.map_err(|e| {
            StoreError::transport(format!(
                "cannot reach desktop host at {}: {}",
                path.display(),
                e
            ))
        })?;
        let (read, write) = stream.into_split();
        tracing::debug!("Connected to desktop host at {}", path.display());

        Ok(Self {
            conn: Mutex::new(Connection {
                reader: BufReader::new(read),
                writer: write,
            }),
            next_id: AtomicU64::new(1),
            socket: path.to_path_buf(),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket
    }

    /// Send one request and wait for its response.
    pub async fn call(
        &self,
        method: &str,
        params: impl Serialize + Send,
    ) -> StoreResult<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = Request {
            id: Some(RequestId::Number(id)),
            method: method.to_string(),
            params: serde_json::to_value(params)?,
        };

        let mut req_str = serde_json::to_string(&request)?;
        req_str.push('\n');

        let mut conn = self.conn.lock().await;
        conn.writer
            .write_all(req_str.as_bytes())
            .await
            .map_err(StoreError::transport)?;

        // Responses to calls whose caller gave up are still in the stream; skip them
        let response = loop {
            let mut line = String::new();
            let bytes_read = conn
                .reader
                .read_line(&mut line)
                .await
                .map_err(StoreError::transport)?;
            if bytes_read == 0 {
                return Err(StoreError::transport("connection closed by desktop host"));
            }

            let response: Response = serde_json::from_str(&line)?;
            match &response.id {
                Some(RequestId::Number(n)) if *n == id => break response,
                Some(RequestId::Number(n)) if *n < id => {
                    tracing::debug!("Discarding stale bridge response {}", n);
                }
                other => {
                    return Err(StoreError::transport(format!(
                        "response id {:?} does not match request {}",
                        other, id
                    )));
                }
            }
        };
        drop(conn);

        if let Some(error) = response.error {
            return Err(error.into());
        }

        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }

    async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: impl Serialize + Send,
    ) -> StoreResult<T> {
        let value = self.call(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl NoteStore for BridgeClient {
    fn kind(&self) -> BackendKind {
        BackendKind::Desktop
    }

    async fn create_notebook(&self, name: &str) -> StoreResult<Notebook> {
        self.call_as(
            methods::NOTEBOOKS_CREATE,
            CreateNotebookParams {
                name: name.to_string(),
            },
        )
        .await
    }

    async fn list_notebooks(&self) -> StoreResult<Vec<Notebook>> {
        self.call_as(methods::NOTEBOOKS_LIST, serde_json::json!({}))
            .await
    }

    async fn get_notebook(&self, id: Uuid) -> StoreResult<Option<Notebook>> {
        self.call_as(methods::NOTEBOOKS_GET, IdParams { id }).await
    }

    async fn update_notebook(&self, id: Uuid, input: UpdateNotebookInput) -> StoreResult<()> {
        self.call(
            methods::NOTEBOOKS_UPDATE,
            UpdateNotebookParams {
                id,
                name: input.name,
            },
        )
        .await?;
        Ok(())
    }

    async fn delete_notebook(&self, id: Uuid) -> StoreResult<()> {
        self.call(methods::NOTEBOOKS_DELETE, IdParams { id }).await?;
        Ok(())
    }

    async fn create_note(&self, input: CreateNoteInput) -> StoreResult<Note> {
        self.call_as(methods::NOTES_CREATE, input).await
    }

    async fn list_notes_by_notebook(&self, notebook_id: Uuid) -> StoreResult<Vec<Note>> {
        self.call_as(
            methods::NOTES_LIST_BY_NOTEBOOK,
            NotebookIdParams { notebook_id },
        )
        .await
    }

    async fn get_note(&self, id: Uuid) -> StoreResult<Option<Note>> {
        self.call_as(methods::NOTES_GET, IdParams { id }).await
    }

    async fn update_note(&self, id: Uuid, input: UpdateNoteInput) -> StoreResult<()> {
        self.call(
            methods::NOTES_UPDATE,
            UpdateNoteParams {
                id,
                title: input.title,
                content: input.content,
            },
        )
        .await?;
        Ok(())
    }

    async fn delete_note(&self, id: Uuid) -> StoreResult<()> {
        self.call(methods::NOTES_DELETE, IdParams { id }).await?;
        Ok(())
    }

    async fn search_notes(&self, query: &str) -> StoreResult<Vec<Note>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        self.call_as(
            methods::NOTES_SEARCH,
            SearchParams {
                query: query.to_string(),
            },
        )
        .await
    }

    async fn upload_image(&self, image: ImageUpload) -> StoreResult<String> {
        self.call_as(methods::IMAGES_UPLOAD, UploadImageParams::encode(&image))
            .await
    }

    async fn delete_image(&self, url: &str) -> StoreResult<()> {
        self.call(
            methods::IMAGES_DELETE,
            DeleteImageParams {
                url: url.to_string(),
            },
        )
        .await?;
        Ok(())
    }

    async fn storage_path(&self) -> StoreResult<Option<String>> {
        self.call_as(methods::STORAGE_PATH, serde_json::json!({}))
            .await
    }
}
