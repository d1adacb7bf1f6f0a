//! Client-side state: active selections and cached listings.
//!
//! Optimistic edits and authoritative reloads can finish in either order. Every
//! cached note list carries the sequence number of the last change applied to
//! it; a reload only lands if it was issued after that change.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::watch;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::*;
use crate::store::NoteStore;

#[derive(Default)]
struct CachedNotes {
    notes: Vec<Note>,
    stamp: u64,
}

#[derive(Default)]
struct Inner {
    active_notebook: Option<Uuid>,
    active_note: Option<Uuid>,
    notebooks: Vec<Notebook>,
    notes: HashMap<Uuid, CachedNotes>,
    sequence: u64,
}

impl Inner {
    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }
}

/// Handed out by [`AppState::begin_reload`], redeemed by [`AppState::apply_reload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadTicket {
    notebook_id: Uuid,
    issued: u64,
}

impl ReloadTicket {
    pub fn notebook_id(&self) -> Uuid {
        self.notebook_id
    }
}

/// Process-wide state shared by the editing surfaces. Create one per
/// application and pass it around behind an `Arc`.
pub struct AppState {
    inner: RwLock<Inner>,
    refresh: watch::Sender<u64>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    pub fn new() -> Self {
        let (refresh, _) = watch::channel(0);
        Self {
            inner: RwLock::new(Inner::default()),
            refresh,
        }
    }

    fn read<T>(&self, f: impl FnOnce(&Inner) -> T) -> T {
        let inner = self.inner.read().expect("state lock poisoned");
        f(&inner)
    }

    fn write<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        let mut inner = self.inner.write().expect("state lock poisoned");
        f(&mut inner)
    }

    // ============================================================
    // Selection
    // ============================================================

    pub fn active_notebook(&self) -> Option<Uuid> {
        self.read(|s| s.active_notebook)
    }

    pub fn active_note(&self) -> Option<Uuid> {
        self.read(|s| s.active_note)
    }

    /// Select a notebook. The active note is always cleared.
    pub fn set_active_notebook(&self, notebook_id: Option<Uuid>) {
        self.write(|s| {
            s.active_notebook = notebook_id;
            s.active_note = None;
        });
    }

    pub fn set_active_note(&self, note_id: Option<Uuid>) {
        self.write(|s| s.active_note = note_id);
    }

    /// Select a notebook and one of its notes together.
    pub fn select(&self, notebook_id: Uuid, note_id: Uuid) {
        self.write(|s| {
            s.active_notebook = Some(notebook_id);
            s.active_note = Some(note_id);
        });
    }

    // ============================================================
    // Notebooks
    // ============================================================

    pub fn notebooks(&self) -> Vec<Notebook> {
        self.read(|s| s.notebooks.clone())
    }

    pub fn set_notebooks(&self, notebooks: Vec<Notebook>) {
        self.write(|s| s.notebooks = notebooks);
    }

    pub async fn reload_notebooks(&self, store: &dyn NoteStore) -> StoreResult<()> {
        let notebooks = store.list_notebooks().await?;
        self.set_notebooks(notebooks);
        Ok(())
    }

    /// Forget a deleted notebook, its notes, and any selection pointing at it.
    pub fn remove_notebook_from_cache(&self, notebook_id: Uuid) {
        self.write(|s| {
            s.notebooks.retain(|nb| nb.id != notebook_id);
            if let Some(cached) = s.notes.remove(&notebook_id) {
                if let Some(active) = s.active_note {
                    if cached.notes.iter().any(|n| n.id == active) {
                        s.active_note = None;
                    }
                }
            }
            if s.active_notebook == Some(notebook_id) {
                s.active_notebook = None;
                s.active_note = None;
            }
        });
    }

    // ============================================================
    // Notes
    // ============================================================

    /// Cached notes of a notebook, `None` if it was never loaded.
    pub fn notes(&self, notebook_id: Uuid) -> Option<Vec<Note>> {
        self.read(|s| s.notes.get(&notebook_id).map(|c| c.notes.clone()))
    }

    pub fn cached_note(&self, notebook_id: Uuid, note_id: Uuid) -> Option<Note> {
        self.read(|s| {
            s.notes
                .get(&notebook_id)
                .and_then(|c| c.notes.iter().find(|n| n.id == note_id).cloned())
        })
    }

    pub fn set_notes(&self, notebook_id: Uuid, notes: Vec<Note>) {
        self.write(|s| {
            let stamp = s.next_sequence();
            s.notes.insert(notebook_id, CachedNotes { notes, stamp });
        });
    }

    /// Optimistically merge `changes` into a cached note and stamp it as
    /// modified now. Returns whether the note was cached.
    ///
    /// This only hides latency; the real write and a reload must follow.
    pub fn update_note_in_cache(
        &self,
        notebook_id: Uuid,
        note_id: Uuid,
        changes: &UpdateNoteInput,
    ) -> bool {
        self.write(|s| {
            let stamp = s.next_sequence();
            let Some(cached) = s.notes.get_mut(&notebook_id) else {
                return false;
            };
            let Some(note) = cached.notes.iter_mut().find(|n| n.id == note_id) else {
                return false;
            };
            changes.merge_into(note);
            note.updated_at = now();
            cached.stamp = stamp;
            true
        })
    }

    pub fn remove_note_from_cache(&self, notebook_id: Uuid, note_id: Uuid) {
        self.write(|s| {
            let stamp = s.next_sequence();
            if let Some(cached) = s.notes.get_mut(&notebook_id) {
                cached.notes.retain(|n| n.id != note_id);
                cached.stamp = stamp;
            }
            if s.active_note == Some(note_id) {
                s.active_note = None;
            }
        });
    }

    /// Start an authoritative reload of a notebook's notes.
    pub fn begin_reload(&self, notebook_id: Uuid) -> ReloadTicket {
        self.write(|s| ReloadTicket {
            notebook_id,
            issued: s.next_sequence(),
        })
    }

    /// Install reloaded notes unless something newer reached the cache since
    /// the ticket was issued. Returns whether the result was applied.
    pub fn apply_reload(&self, ticket: ReloadTicket, notes: Vec<Note>) -> bool {
        self.write(|s| {
            let cached = s.notes.entry(ticket.notebook_id).or_default();
            if ticket.issued < cached.stamp {
                tracing::warn!(
                    "Discarding stale reload of notebook {} (issued {}, cache at {})",
                    ticket.notebook_id,
                    ticket.issued,
                    cached.stamp
                );
                return false;
            }
            cached.notes = notes;
            cached.stamp = ticket.issued;
            true
        })
    }

    /// Reload a notebook's notes from the backend.
    pub async fn reload_notes(&self, store: &dyn NoteStore, notebook_id: Uuid) -> StoreResult<bool> {
        let ticket = self.begin_reload(notebook_id);
        let notes = store.list_notes_by_notebook(notebook_id).await?;
        Ok(self.apply_reload(ticket, notes))
    }

    // ============================================================
    // Refresh counter
    // ============================================================

    /// Tell every subscriber to reload.
    pub fn refresh(&self) {
        self.refresh.send_modify(|count| *count += 1);
    }

    pub fn refresh_count(&self) -> u64 {
        *self.refresh.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.refresh.subscribe()
    }
}
