//! Wire format between the desktop host and its clients.
//!
//! Newline-delimited JSON over a Unix socket. Each line is one request or one
//! response; responses echo the request id.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::ImageUpload;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    /// Decode `params` into the shape a method expects. `null` reads as `{}`.
    pub fn params<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.params {
            Value::Null => serde_json::from_value(Value::Object(Default::default())),
            params => serde_json::from_value(params.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Response {
    pub fn success(id: Option<RequestId>, result: impl Into<Value>) -> Self {
        Self {
            id,
            result: Some(result.into()),
            error: None,
        }
    }

    pub fn error(id: Option<RequestId>, code: i32, message: impl Into<String>) -> Self {
        Self::error_with_data(id, code, message, None)
    }

    pub fn error_with_data(
        id: Option<RequestId>,
        code: i32,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data,
            }),
        }
    }
}

pub const PARSE_ERROR: i32 = -32700;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
/// Input rejected by the store; `data.field` names the offending field.
pub const VALIDATION_ERROR: i32 = -32000;
/// A multi-step write was rolled back.
pub const TRANSACTION_ERROR: i32 = -32001;

pub mod methods {
    pub const NOTEBOOKS_CREATE: &str = "notebooks.create";
    pub const NOTEBOOKS_LIST: &str = "notebooks.list";
    pub const NOTEBOOKS_GET: &str = "notebooks.get";
    pub const NOTEBOOKS_UPDATE: &str = "notebooks.update";
    pub const NOTEBOOKS_DELETE: &str = "notebooks.delete";
    pub const NOTES_CREATE: &str = "notes.create";
    pub const NOTES_LIST_BY_NOTEBOOK: &str = "notes.listByNotebook";
    pub const NOTES_GET: &str = "notes.get";
    pub const NOTES_UPDATE: &str = "notes.update";
    pub const NOTES_DELETE: &str = "notes.delete";
    pub const NOTES_SEARCH: &str = "notes.search";
    pub const IMAGES_UPLOAD: &str = "images.upload";
    pub const IMAGES_DELETE: &str = "images.delete";
    pub const STORAGE_PATH: &str = "storage.path";
}

// ============================================================
// Params
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdParams {
    pub id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNotebookParams {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateNotebookParams {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotebookIdParams {
    pub notebook_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateNoteParams {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParams {
    pub query: String,
}

/// Image bytes travel base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadImageParams {
    pub file_name: String,
    pub data: String,
}

impl UploadImageParams {
    pub fn encode(image: &ImageUpload) -> Self {
        Self {
            file_name: image.file_name.clone(),
            data: base64::engine::general_purpose::STANDARD.encode(&image.bytes),
        }
    }

    pub fn decode(self) -> Result<ImageUpload, base64::DecodeError> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(self.data.as_bytes())?;
        Ok(ImageUpload::new(self.file_name, bytes))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteImageParams {
    pub url: String,
}

// ============================================================
// Error mapping
// ============================================================

/// Host side: turn a store failure into a wire error. Internal details of
/// database and IO failures are logged, not sent.
pub fn error_response(id: Option<RequestId>, err: &StoreError) -> Response {
    match err {
        StoreError::Validation { field, message } => Response::error_with_data(
            id,
            VALIDATION_ERROR,
            message.clone(),
            Some(serde_json::json!({ "field": field })),
        ),
        StoreError::Transaction(message) => {
            Response::error(id, TRANSACTION_ERROR, message.clone())
        }
        other => {
            tracing::error!("Internal error: {}", other);
            Response::error(id, INTERNAL_ERROR, "Internal host error")
        }
    }
}

/// Client side: turn a wire error back into the matching store failure.
impl From<RpcError> for StoreError {
    fn from(err: RpcError) -> Self {
        match err.code {
            VALIDATION_ERROR => {
                let field = err
                    .data
                    .as_ref()
                    .and_then(|d| d.get("field"))
                    .and_then(|f| f.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                StoreError::Validation {
                    field,
                    message: err.message,
                }
            }
            TRANSACTION_ERROR => StoreError::Transaction(err.message),
            code => StoreError::Bridge {
                code,
                message: err.message,
            },
        }
    }
}
