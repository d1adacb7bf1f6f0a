#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use notekeeper::models::*;
use notekeeper::store::LocalStore;
use notekeeper::{BackendKind, NoteStore, StoreError, StoreResult};
use uuid::Uuid;

/// In-memory store that records note updates and searches, and can be told to
/// fail or stall writes.
pub struct RecordingStore {
    inner: LocalStore,
    updates: Mutex<Vec<(Uuid, UpdateNoteInput)>>,
    searches: Mutex<Vec<String>>,
    fail_writes: AtomicBool,
    slow_title: Mutex<Option<(String, Duration)>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self {
            inner: LocalStore::in_memory(),
            updates: Mutex::new(Vec::new()),
            searches: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            slow_title: Mutex::new(None),
        }
    }

    fn inner(&self) -> &LocalStore {
        &self.inner
    }

    pub fn updates(&self) -> Vec<(Uuid, UpdateNoteInput)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn searches(&self) -> Vec<String> {
        self.searches.lock().unwrap().clone()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Hold any update that sets the title to `title` for `delay` before applying it.
    pub fn stall_title(&self, title: &str, delay: Duration) {
        *self.slow_title.lock().unwrap() = Some((title.to_string(), delay));
    }

    pub async fn seed(&self) -> (Notebook, Note) {
        let notebook = self.inner().create_notebook("Work").await.unwrap();
        let note = self
            .inner()
            .create_note(CreateNoteInput {
                notebook_id: notebook.id,
                title: UNTITLED_NOTE.to_string(),
                content: Some("<p>Hello World</p>".to_string()),
            })
            .await
            .unwrap();
        (notebook, note)
    }
}

#[async_trait]
impl NoteStore for RecordingStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn create_notebook(&self, name: &str) -> StoreResult<Notebook> {
        self.inner().create_notebook(name).await
    }

    async fn list_notebooks(&self) -> StoreResult<Vec<Notebook>> {
        self.inner().list_notebooks().await
    }

    async fn get_notebook(&self, id: Uuid) -> StoreResult<Option<Notebook>> {
        self.inner().get_notebook(id).await
    }

    async fn update_notebook(&self, id: Uuid, input: UpdateNotebookInput) -> StoreResult<()> {
        self.inner().update_notebook(id, input).await
    }

    async fn delete_notebook(&self, id: Uuid) -> StoreResult<()> {
        self.inner().delete_notebook(id).await
    }

    async fn create_note(&self, input: CreateNoteInput) -> StoreResult<Note> {
        self.inner().create_note(input).await
    }

    async fn list_notes_by_notebook(&self, notebook_id: Uuid) -> StoreResult<Vec<Note>> {
        self.inner().list_notes_by_notebook(notebook_id).await
    }

    async fn get_note(&self, id: Uuid) -> StoreResult<Option<Note>> {
        self.inner().get_note(id).await
    }

    async fn update_note(&self, id: Uuid, input: UpdateNoteInput) -> StoreResult<()> {
        self.updates.lock().unwrap().push((id, input.clone()));
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::transport("simulated outage"));
        }
        let stall = self
            .slow_title
            .lock()
            .unwrap()
            .as_ref()
            .filter(|(title, _)| input.title.as_deref() == Some(title.as_str()))
            .map(|(_, delay)| *delay);
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        self.inner().update_note(id, input).await
    }

    async fn delete_note(&self, id: Uuid) -> StoreResult<()> {
        self.inner().delete_note(id).await
    }

    async fn search_notes(&self, query: &str) -> StoreResult<Vec<Note>> {
        self.searches.lock().unwrap().push(query.to_string());
        self.inner().search_notes(query).await
    }

    async fn upload_image(&self, image: ImageUpload) -> StoreResult<String> {
        self.inner().upload_image(image).await
    }

    async fn delete_image(&self, url: &str) -> StoreResult<()> {
        self.inner().delete_image(url).await
    }

    async fn storage_path(&self) -> StoreResult<Option<String>> {
        Ok(None)
    }
}
