//! In-process document store.
//!
//! Two collections (notebooks, notes), each keyed by id with secondary indices
//! on the owning notebook and on both timestamps, so listings are ordered range
//! scans rather than full scans. Writes run as a unit of work that records an
//! undo log; if any step (including the snapshot flush) fails, the log is
//! replayed and nothing of the unit of work remains visible.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BackendKind, NoteStore};
use crate::error::{StoreError, StoreResult};
use crate::models::*;

trait Record: Clone {
    fn id(&self) -> Uuid;
    fn created_at(&self) -> DateTime<Utc>;
    fn updated_at(&self) -> DateTime<Utc>;

    fn parent_id(&self) -> Option<Uuid> {
        None
    }
}

impl Record for Notebook {
    fn id(&self) -> Uuid {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl Record for Note {
    fn id(&self) -> Uuid {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn parent_id(&self) -> Option<Uuid> {
        Some(self.notebook_id)
    }
}

/// A collection with a primary index on id and secondary indices.
struct Table<R> {
    rows: HashMap<Uuid, R>,
    by_parent: BTreeSet<(Uuid, DateTime<Utc>, Uuid)>,
    by_created: BTreeSet<(DateTime<Utc>, Uuid)>,
    by_updated: BTreeSet<(DateTime<Utc>, Uuid)>,
}

impl<R> Default for Table<R> {
    fn default() -> Self {
        Self {
            rows: HashMap::new(),
            by_parent: BTreeSet::new(),
            by_created: BTreeSet::new(),
            by_updated: BTreeSet::new(),
        }
    }
}

impl<R: Record> Table<R> {
    fn get(&self, id: Uuid) -> Option<&R> {
        self.rows.get(&id)
    }

    /// Insert or replace, returning the previous version.
    fn put(&mut self, record: R) -> Option<R> {
        let previous = self.remove(record.id());
        let id = record.id();
        if let Some(parent) = record.parent_id() {
            self.by_parent.insert((parent, record.updated_at(), id));
        }
        self.by_created.insert((record.created_at(), id));
        self.by_updated.insert((record.updated_at(), id));
        self.rows.insert(id, record);
        previous
    }

    fn remove(&mut self, id: Uuid) -> Option<R> {
        let record = self.rows.remove(&id)?;
        if let Some(parent) = record.parent_id() {
            self.by_parent.remove(&(parent, record.updated_at(), id));
        }
        self.by_created.remove(&(record.created_at(), id));
        self.by_updated.remove(&(record.updated_at(), id));
        Some(record)
    }

    fn newest_first(&self) -> Vec<R> {
        self.by_updated
            .iter()
            .rev()
            .filter_map(|(_, id)| self.rows.get(id).cloned())
            .collect()
    }

    fn children_newest_first(&self, parent: Uuid) -> Vec<R> {
        let low = (parent, DateTime::<Utc>::MIN_UTC, Uuid::nil());
        let high = (parent, DateTime::<Utc>::MAX_UTC, Uuid::from_u128(u128::MAX));
        self.by_parent
            .range(low..=high)
            .rev()
            .filter_map(|(_, _, id)| self.rows.get(id).cloned())
            .collect()
    }

    fn child_ids(&self, parent: Uuid) -> Vec<Uuid> {
        let low = (parent, DateTime::<Utc>::MIN_UTC, Uuid::nil());
        let high = (parent, DateTime::<Utc>::MAX_UTC, Uuid::from_u128(u128::MAX));
        self.by_parent
            .range(low..=high)
            .map(|(_, _, id)| *id)
            .collect()
    }

    fn oldest_first(&self) -> Vec<R> {
        self.by_created
            .iter()
            .filter_map(|(_, id)| self.rows.get(id).cloned())
            .collect()
    }
}

#[derive(Default)]
struct Collections {
    notebooks: Table<Notebook>,
    notes: Table<Note>,
}

/// On-disk form of the store.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    notebooks: Vec<Notebook>,
    notes: Vec<Note>,
}

enum Undo {
    RestoreNotebook(Notebook),
    ForgetNotebook(Uuid),
    RestoreNote(Note),
    ForgetNote(Uuid),
}

/// Pending changes against the collections, reversible until committed.
struct UnitOfWork<'a> {
    collections: &'a mut Collections,
    undo: Vec<Undo>,
}

impl<'a> UnitOfWork<'a> {
    fn new(collections: &'a mut Collections) -> Self {
        Self {
            collections,
            undo: Vec::new(),
        }
    }

    fn put_notebook(&mut self, notebook: Notebook) {
        let id = notebook.id;
        match self.collections.notebooks.put(notebook) {
            Some(previous) => self.undo.push(Undo::RestoreNotebook(previous)),
            None => self.undo.push(Undo::ForgetNotebook(id)),
        }
    }

    fn delete_notebook(&mut self, id: Uuid) {
        if let Some(previous) = self.collections.notebooks.remove(id) {
            self.undo.push(Undo::RestoreNotebook(previous));
        }
    }

    fn put_note(&mut self, note: Note) {
        let id = note.id;
        match self.collections.notes.put(note) {
            Some(previous) => self.undo.push(Undo::RestoreNote(previous)),
            None => self.undo.push(Undo::ForgetNote(id)),
        }
    }

    fn delete_note(&mut self, id: Uuid) {
        if let Some(previous) = self.collections.notes.remove(id) {
            self.undo.push(Undo::RestoreNote(previous));
        }
    }

    fn is_dirty(&self) -> bool {
        !self.undo.is_empty()
    }

    fn rollback(self) {
        for step in self.undo.into_iter().rev() {
            match step {
                Undo::RestoreNotebook(notebook) => {
                    self.collections.notebooks.put(notebook);
                }
                Undo::ForgetNotebook(id) => {
                    self.collections.notebooks.remove(id);
                }
                Undo::RestoreNote(note) => {
                    self.collections.notes.put(note);
                }
                Undo::ForgetNote(id) => {
                    self.collections.notes.remove(id);
                }
            }
        }
    }
}

/// Embedded document store, optionally persisted as a JSON snapshot.
pub struct LocalStore {
    collections: Mutex<Collections>,
    snapshot_path: Option<PathBuf>,
}

impl LocalStore {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            collections: Mutex::new(Collections::default()),
            snapshot_path: None,
        }
    }

    /// Open (or create) a store persisted at `path`.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut collections = Collections::default();
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let snapshot: Snapshot = serde_json::from_str(&raw)?;
            for notebook in snapshot.notebooks {
                collections.notebooks.put(notebook);
            }
            for note in snapshot.notes {
                collections.notes.put(note);
            }
            tracing::debug!(
                "Loaded local store from {} ({} notebooks, {} notes)",
                path.display(),
                collections.notebooks.rows.len(),
                collections.notes.rows.len()
            );
        }

        Ok(Self {
            collections: Mutex::new(collections),
            snapshot_path: Some(path),
        })
    }

    fn read<T>(&self, f: impl FnOnce(&Collections) -> T) -> T {
        let collections = self.collections.lock().expect("local store lock poisoned");
        f(&collections)
    }

    /// Run `f` as one unit of work: either every change it made is committed
    /// (and flushed), or none of them is.
    fn write<T>(&self, f: impl FnOnce(&mut UnitOfWork<'_>) -> StoreResult<T>) -> StoreResult<T> {
        let mut collections = self.collections.lock().expect("local store lock poisoned");
        let mut work = UnitOfWork::new(&mut collections);

        let value = match f(&mut work) {
            Ok(value) => value,
            Err(e) => {
                work.rollback();
                return Err(e);
            }
        };

        if work.is_dirty() {
            if let Some(path) = &self.snapshot_path {
                if let Err(e) = flush(work.collections, path) {
                    tracing::warn!("Local store flush failed, rolling back: {}", e);
                    work.rollback();
                    return Err(e);
                }
            }
        }

        Ok(value)
    }
}

fn flush(collections: &Collections, path: &Path) -> StoreResult<()> {
    let snapshot = Snapshot {
        notebooks: collections.notebooks.oldest_first(),
        notes: collections.notes.oldest_first(),
    };
    let json = serde_json::to_string(&snapshot)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl NoteStore for LocalStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn create_notebook(&self, name: &str) -> StoreResult<Notebook> {
        validate_notebook_name(name)?;
        let now = now();
        let notebook = Notebook {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.write(|work| {
            work.put_notebook(notebook.clone());
            Ok(())
        })?;
        Ok(notebook)
    }

    async fn list_notebooks(&self) -> StoreResult<Vec<Notebook>> {
        Ok(self.read(|c| c.notebooks.newest_first()))
    }

    async fn get_notebook(&self, id: Uuid) -> StoreResult<Option<Notebook>> {
        Ok(self.read(|c| c.notebooks.get(id).cloned()))
    }

    async fn update_notebook(&self, id: Uuid, input: UpdateNotebookInput) -> StoreResult<()> {
        if let Some(name) = &input.name {
            validate_notebook_name(name)?;
        }
        self.write(|work| {
            let Some(mut notebook) = work.collections.notebooks.get(id).cloned() else {
                return Ok(());
            };
            if let Some(name) = input.name {
                notebook.name = name;
            }
            notebook.updated_at = next_timestamp(notebook.updated_at);
            work.put_notebook(notebook);
            Ok(())
        })
    }

    async fn delete_notebook(&self, id: Uuid) -> StoreResult<()> {
        self.write(|work| {
            for note_id in work.collections.notes.child_ids(id) {
                work.delete_note(note_id);
            }
            work.delete_notebook(id);
            Ok(())
        })
    }

    async fn create_note(&self, input: CreateNoteInput) -> StoreResult<Note> {
        let now = now();
        let note = Note {
            id: Uuid::new_v4(),
            notebook_id: input.notebook_id,
            title: input.title,
            content: input.content.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };
        self.write(|work| {
            work.put_note(note.clone());
            Ok(())
        })?;
        Ok(note)
    }

    async fn list_notes_by_notebook(&self, notebook_id: Uuid) -> StoreResult<Vec<Note>> {
        Ok(self.read(|c| c.notes.children_newest_first(notebook_id)))
    }

    async fn get_note(&self, id: Uuid) -> StoreResult<Option<Note>> {
        Ok(self.read(|c| c.notes.get(id).cloned()))
    }

    async fn update_note(&self, id: Uuid, input: UpdateNoteInput) -> StoreResult<()> {
        self.write(|work| {
            let Some(mut note) = work.collections.notes.get(id).cloned() else {
                return Ok(());
            };
            input.merge_into(&mut note);
            note.updated_at = next_timestamp(note.updated_at);
            work.put_note(note);
            Ok(())
        })
    }

    async fn delete_note(&self, id: Uuid) -> StoreResult<()> {
        self.write(|work| {
            work.delete_note(id);
            Ok(())
        })
    }

    async fn search_notes(&self, query: &str) -> StoreResult<Vec<Note>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let mut matches: Vec<Note> = self.read(|c| {
            c.notes
                .rows
                .values()
                .filter(|note| note_matches(note, query))
                .cloned()
                .collect()
        });
        matches.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(matches)
    }

    async fn upload_image(&self, image: ImageUpload) -> StoreResult<String> {
        tracing::debug!(
            "Encoding {} ({} bytes) as data URL",
            image.file_name,
            image.bytes.len()
        );
        let encoded = base64::engine::general_purpose::STANDARD.encode(&image.bytes);
        Ok(format!("data:{};base64,{}", image.content_type(), encoded))
    }

    async fn delete_image(&self, url: &str) -> StoreResult<()> {
        if !url.starts_with("data:") {
            tracing::debug!("Ignoring delete of non-inline image {}", url);
        }
        Ok(())
    }

    async fn storage_path(&self) -> StoreResult<Option<String>> {
        Ok(self
            .snapshot_path
            .as_ref()
            .map(|p| p.display().to_string()))
    }
}
