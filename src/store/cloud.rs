//! HTTP client for the cloud relational store.
//!
//! Talks to a PostgREST-style REST endpoint (`/rest/v1/<table>`) for rows and to
//! an object namespace (`/storage/v1/object/<bucket>`) for images. Timestamps
//! travel as RFC 3339 text columns.
//!
//! A "no rows" answer to a single-row read (PostgREST code `PGRST116`) becomes
//! `None`; every other non-success response is surfaced as an error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BackendKind, NoteStore};
use crate::error::{StoreError, StoreResult};
use crate::models::*;

/// Default object bucket for note images.
pub const DEFAULT_IMAGE_BUCKET: &str = "note-images";

/// Error code for "the result contains 0 rows" on single-object reads.
const NO_ROWS_CODE: &str = "PGRST116";

/// Accept header asking for exactly one row as a bare object.
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

#[derive(Debug, Clone, Deserialize)]
struct NotebookRow {
    id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<NotebookRow> for Notebook {
    fn from(row: NotebookRow) -> Self {
        Notebook {
            id: row.id,
            name: row.name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct NoteRow {
    id: Uuid,
    notebook_id: Uuid,
    title: String,
    #[serde(default)]
    content: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<NoteRow> for Note {
    fn from(row: NoteRow) -> Self {
        Note {
            id: row.id,
            notebook_id: row.notebook_id,
            title: row.title,
            content: row.content.unwrap_or_default(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct NotebookPatch<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    updated_at: String,
}

#[derive(Debug, Serialize)]
struct NotePatch<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    updated_at: String,
}

#[derive(Debug, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Cloud relational backend.
#[derive(Debug, Clone)]
pub struct CloudStore {
    base_url: String,
    api_key: String,
    bucket: String,
    client: Client,
}

impl CloudStore {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_bucket(base_url, api_key, DEFAULT_IMAGE_BUCKET)
    }

    pub fn with_bucket(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            bucket: bucket.into(),
            client: Client::new(),
        }
    }

    /// Build a request carrying the access credential.
    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client
            .request(method, &url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    fn rows(&self, method: Method, table: &str) -> reqwest::RequestBuilder {
        self.request(method, &format!("/rest/v1/{}", table))
    }

    /// Handle response, converting non-success statuses to `StoreError`.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> StoreResult<T> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json().await?)
        } else {
            Err(backend_error(status, response.text().await.unwrap_or_default()))
        }
    }

    /// Handle a single-row read, mapping "no rows" to `None`.
    async fn handle_optional<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> StoreResult<Option<T>> {
        let status = response.status();
        if status.is_success() {
            return Ok(Some(response.json().await?));
        }
        let body = response.text().await.unwrap_or_default();
        let no_rows = serde_json::from_str::<PostgrestError>(&body)
            .map(|e| e.code.as_deref() == Some(NO_ROWS_CODE))
            .unwrap_or(false);
        if no_rows {
            Ok(None)
        } else {
            Err(backend_error(status, body))
        }
    }

    /// Handle response that may return empty body (204 No Content).
    async fn handle_empty_response(&self, response: reqwest::Response) -> StoreResult<()> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(backend_error(status, response.text().await.unwrap_or_default()))
        }
    }

    fn public_url(&self, object: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, object
        )
    }
}

fn backend_error(status: StatusCode, body: String) -> StoreError {
    let message = serde_json::from_str::<PostgrestError>(&body)
        .ok()
        .and_then(|e| e.message)
        .unwrap_or(body);
    StoreError::Backend {
        status: status.as_u16(),
        message,
    }
}

/// Quote a value for use inside a PostgREST logic tree such as `or=(...)`.
fn quote_filter_value(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// Make `query` match itself literally inside an `ilike` pattern.
///
/// `%`, `_` and `\` get a backslash. PostgREST turns every `*` into `%` and has
/// no escape for it, so a literal `*` becomes the single-character wildcard.
fn escape_ilike(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        match c {
            '%' | '_' | '\\' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '*' => escaped.push('_'),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// `or=(title.ilike.*q*,content.ilike.*q*)` filter for case-insensitive search.
pub(crate) fn search_filter(query: &str) -> String {
    let pattern = quote_filter_value(&format!("*{}*", escape_ilike(query)));
    format!("(title.ilike.{},content.ilike.{})", pattern, pattern)
}

/// Storage key of an uploaded image: the last segment of the URL path.
pub(crate) fn object_key_from_url(url: &str) -> StoreResult<String> {
    let parsed = reqwest::Url::parse(url).map_err(|e| StoreError::InvalidUrl(e.to_string()))?;
    parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .ok_or_else(|| StoreError::InvalidUrl(format!("no object key in {}", url)))
}

#[async_trait]
impl NoteStore for CloudStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Cloud
    }

    // ============================================================
    // Notebook operations
    // ============================================================

    async fn create_notebook(&self, name: &str) -> StoreResult<Notebook> {
        validate_notebook_name(name)?;
        let response = self
            .rows(Method::POST, "notebooks")
            .header("Prefer", "return=representation")
            .header("Accept", SINGLE_OBJECT)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await?;
        let row: NotebookRow = self.handle_response(response).await?;
        Ok(row.into())
    }

    async fn list_notebooks(&self) -> StoreResult<Vec<Notebook>> {
        let response = self
            .rows(Method::GET, "notebooks")
            .query(&[("select", "*"), ("order", "updated_at.desc")])
            .send()
            .await?;
        let rows: Vec<NotebookRow> = self.handle_response(response).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_notebook(&self, id: Uuid) -> StoreResult<Option<Notebook>> {
        let response = self
            .rows(Method::GET, "notebooks")
            .query(&[("select", "*".to_string()), ("id", format!("eq.{}", id))])
            .header("Accept", SINGLE_OBJECT)
            .send()
            .await?;
        let row: Option<NotebookRow> = self.handle_optional(response).await?;
        Ok(row.map(Into::into))
    }

    async fn update_notebook(&self, id: Uuid, input: UpdateNotebookInput) -> StoreResult<()> {
        if let Some(name) = &input.name {
            validate_notebook_name(name)?;
        }
        let patch = NotebookPatch {
            name: input.name.as_deref(),
            updated_at: format_timestamp(now()),
        };
        let response = self
            .rows(Method::PATCH, "notebooks")
            .query(&[("id", format!("eq.{}", id))])
            .json(&patch)
            .send()
            .await?;
        self.handle_empty_response(response).await
    }

    async fn delete_notebook(&self, id: Uuid) -> StoreResult<()> {
        // notes.notebook_id is ON DELETE CASCADE, so one statement is atomic
        let response = self
            .rows(Method::DELETE, "notebooks")
            .query(&[("id", format!("eq.{}", id))])
            .send()
            .await?;
        self.handle_empty_response(response).await
    }

    // ============================================================
    // Note operations
    // ============================================================

    async fn create_note(&self, input: CreateNoteInput) -> StoreResult<Note> {
        let response = self
            .rows(Method::POST, "notes")
            .header("Prefer", "return=representation")
            .header("Accept", SINGLE_OBJECT)
            .json(&serde_json::json!({
                "notebook_id": input.notebook_id,
                "title": input.title,
                "content": input.content.unwrap_or_default(),
            }))
            .send()
            .await?;
        let row: NoteRow = self.handle_response(response).await?;
        Ok(row.into())
    }

    async fn list_notes_by_notebook(&self, notebook_id: Uuid) -> StoreResult<Vec<Note>> {
        let response = self
            .rows(Method::GET, "notes")
            .query(&[
                ("select", "*".to_string()),
                ("notebook_id", format!("eq.{}", notebook_id)),
                ("order", "updated_at.desc".to_string()),
            ])
            .send()
            .await?;
        let rows: Vec<NoteRow> = self.handle_response(response).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_note(&self, id: Uuid) -> StoreResult<Option<Note>> {
        let response = self
            .rows(Method::GET, "notes")
            .query(&[("select", "*".to_string()), ("id", format!("eq.{}", id))])
            .header("Accept", SINGLE_OBJECT)
            .send()
            .await?;
        let row: Option<NoteRow> = self.handle_optional(response).await?;
        Ok(row.map(Into::into))
    }

    async fn update_note(&self, id: Uuid, input: UpdateNoteInput) -> StoreResult<()> {
        let patch = NotePatch {
            title: input.title.as_deref(),
            content: input.content.as_deref(),
            updated_at: format_timestamp(now()),
        };
        let response = self
            .rows(Method::PATCH, "notes")
            .query(&[("id", format!("eq.{}", id))])
            .json(&patch)
            .send()
            .await?;
        self.handle_empty_response(response).await
    }

    async fn delete_note(&self, id: Uuid) -> StoreResult<()> {
        let response = self
            .rows(Method::DELETE, "notes")
            .query(&[("id", format!("eq.{}", id))])
            .send()
            .await?;
        self.handle_empty_response(response).await
    }

    async fn search_notes(&self, query: &str) -> StoreResult<Vec<Note>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .rows(Method::GET, "notes")
            .query(&[
                ("select", "*".to_string()),
                ("or", search_filter(query)),
                ("order", "updated_at.desc".to_string()),
            ])
            .send()
            .await?;
        let rows: Vec<NoteRow> = self.handle_response(response).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    // ============================================================
    // Image operations
    // ============================================================

    async fn upload_image(&self, image: ImageUpload) -> StoreResult<String> {
        let object = image.storage_name();
        tracing::debug!(
            "Uploading {} ({} bytes) as {}/{}",
            image.file_name,
            image.bytes.len(),
            self.bucket,
            object
        );
        let response = self
            .request(
                Method::POST,
                &format!("/storage/v1/object/{}/{}", self.bucket, object),
            )
            .header("Content-Type", image.content_type())
            .header("Cache-Control", "max-age=3600")
            .header("x-upsert", "false")
            .body(image.bytes)
            .send()
            .await?;
        self.handle_empty_response(response).await?;
        Ok(self.public_url(&object))
    }

    async fn delete_image(&self, url: &str) -> StoreResult<()> {
        let key = object_key_from_url(url)?;
        let response = self
            .request(Method::DELETE, &format!("/storage/v1/object/{}", self.bucket))
            .json(&serde_json::json!({ "prefixes": [key] }))
            .send()
            .await?;
        self.handle_empty_response(response).await
    }

    async fn storage_path(&self) -> StoreResult<Option<String>> {
        Ok(None)
    }
}
