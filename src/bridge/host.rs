//! Host process side of the desktop bridge.
//!
//! Owns the SQL database and the image directory, and serves every connected
//! client from a Unix socket.

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use super::protocol::*;
use crate::db::{Database, ImageDir};
use crate::error::StoreError;
use crate::models::{CreateNoteInput, UpdateNoteInput, UpdateNotebookInput};

pub struct BridgeHost {
    listener: UnixListener,
    path: PathBuf,
    db: Database,
    images: ImageDir,
}

impl BridgeHost {
    /// Bind to `path`, replacing a stale socket left by a previous run.
    pub async fn bind(path: &Path, db: Database, images: ImageDir) -> Result<Self> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(path)?;
        info!("Bridge host listening on {}", path.display());

        Ok(Self {
            listener,
            path: path.to_path_buf(),
            db,
            images,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.path
    }

    /// Serve until interrupted.
    pub async fn run(self) -> Result<()> {
        self.serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await
    }

    /// Serve until `shutdown` resolves, then remove the socket file.
    pub async fn serve(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, _)) => {
                            let db = self.db.clone();
                            let images = self.images.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_client(stream, db, images).await {
                                    error!("Client error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove socket {}: {}", self.path.display(), e);
        }
        Ok(())
    }
}

async fn handle_client(stream: UnixStream, db: Database, images: ImageDir) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(req) => dispatch(req, &db, &images),
            Err(e) => {
                warn!("Parse error: {}", e);
                Response::error(None, PARSE_ERROR, e.to_string())
            }
        };

        let mut output = serde_json::to_string(&response)?;
        output.push('\n');
        writer.write_all(output.as_bytes()).await?;
    }

    debug!("Client disconnected");
    Ok(())
}

fn dispatch(req: Request, db: &Database, images: &ImageDir) -> Response {
    debug!("Bridge call {}", req.method);
    let id = req.id.clone();

    let outcome = match req.method.as_str() {
        methods::NOTEBOOKS_CREATE => with_params(&req, |p: CreateNotebookParams| {
            db.create_notebook(&p.name)
        }),
        methods::NOTEBOOKS_LIST => Ok(db.get_all_notebooks().map(to_value)),
        methods::NOTEBOOKS_GET => with_params(&req, |p: IdParams| db.get_notebook(p.id)),
        methods::NOTEBOOKS_UPDATE => with_params(&req, |p: UpdateNotebookParams| {
            db.update_notebook(p.id, UpdateNotebookInput { name: p.name })
                .map(|_| ())
        }),
        methods::NOTEBOOKS_DELETE => {
            with_params(&req, |p: IdParams| db.delete_notebook(p.id).map(|_| ()))
        }
        methods::NOTES_CREATE => with_params(&req, |p: CreateNoteInput| db.create_note(p)),
        methods::NOTES_LIST_BY_NOTEBOOK => with_params(&req, |p: NotebookIdParams| {
            db.get_notes_by_notebook(p.notebook_id)
        }),
        methods::NOTES_GET => with_params(&req, |p: IdParams| db.get_note(p.id)),
        methods::NOTES_UPDATE => with_params(&req, |p: UpdateNoteParams| {
            let input = UpdateNoteInput {
                title: p.title,
                content: p.content,
            };
            db.update_note(p.id, input).map(|_| ())
        }),
        methods::NOTES_DELETE => with_params(&req, |p: IdParams| db.delete_note(p.id).map(|_| ())),
        methods::NOTES_SEARCH => with_params(&req, |p: SearchParams| db.search_notes(&p.query)),
        methods::IMAGES_UPLOAD => match req.params::<UploadImageParams>() {
            Ok(p) => match p.decode() {
                Ok(image) => Ok(images.store(&image).map(to_value)),
                Err(e) => Err(format!("Invalid image data: {}", e)),
            },
            Err(e) => Err(e.to_string()),
        },
        methods::IMAGES_DELETE => {
            with_params(&req, |p: DeleteImageParams| images.remove(&p.url))
        }
        methods::STORAGE_PATH => Ok(Ok(to_value(
            db.path().map(|p| p.display().to_string()),
        ))),
        other => {
            warn!("Unknown bridge method {}", other);
            return Response::error(id, METHOD_NOT_FOUND, format!("Unknown method: {}", other));
        }
    };

    match outcome {
        Ok(Ok(value)) => Response::success(id, value),
        Ok(Err(e)) => error_response(id, &into_store_error(e)),
        Err(message) => Response::error(id, INVALID_PARAMS, message),
    }
}

/// Decode params and run `op`. The outer `Err` is a params problem, the inner
/// one a store failure.
fn with_params<P, T, F>(req: &Request, op: F) -> Result<Result<serde_json::Value>, String>
where
    P: serde::de::DeserializeOwned,
    T: Serialize,
    F: FnOnce(P) -> Result<T>,
{
    let params = req.params::<P>().map_err(|e| e.to_string())?;
    Ok(op(params).map(to_value))
}

fn to_value<T: Serialize>(value: T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

fn into_store_error(err: anyhow::Error) -> StoreError {
    let err = match err.downcast::<StoreError>() {
        Ok(store) => return store,
        Err(err) => err,
    };
    match err.downcast::<rusqlite::Error>() {
        Ok(db) => StoreError::Database(db),
        Err(other) => StoreError::Bridge {
            code: INTERNAL_ERROR,
            message: other.to_string(),
        },
    }
}
