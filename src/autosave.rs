//! Debounced autosave for the note being edited.
//!
//! Each (note, field) pair has at most one pending idle timer. An edit replaces
//! the pending timer; when a timer runs out the field is written on its own,
//! the notebook's cached notes are reloaded, and the saving indicator stays up
//! for a minimum time after the write completes.
//!
//! Timers are only ever aborted while still sleeping. Once a timer claims its
//! slot the write runs to completion, so cancelling can never tear a write in
//! half. Writes of the same (note, field) are serialized in claim order, so a
//! slow earlier write cannot land after a later one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, watch, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cache::AppState;
use crate::config::Config;
use crate::error::StoreResult;
use crate::models::UpdateNoteInput;
use crate::store::NoteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Title,
    Content,
}

impl Field {
    fn update(self, value: String) -> UpdateNoteInput {
        match self {
            Field::Title => UpdateNoteInput::title(value),
            Field::Content => UpdateNoteInput::content(value),
        }
    }
}

/// User-facing outcome of a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Saved { note_id: Uuid },
    Failed { note_id: Uuid, message: String },
}

struct PendingTimer {
    ticket: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Indicator {
    in_flight: usize,
    epoch: u64,
}

struct Shared {
    store: Arc<dyn NoteStore>,
    state: Arc<AppState>,
    idle: Duration,
    indicator_hold: Duration,
    timers: Mutex<HashMap<(Uuid, Field), PendingTimer>>,
    write_locks: Mutex<HashMap<(Uuid, Field), Arc<AsyncMutex<()>>>>,
    next_ticket: AtomicU64,
    indicator: Mutex<Indicator>,
    saving: watch::Sender<bool>,
    notices: broadcast::Sender<Notice>,
}

impl Shared {
    fn begin_saving(&self) {
        let mut indicator = self.indicator.lock().expect("indicator lock poisoned");
        indicator.in_flight += 1;
        indicator.epoch += 1;
        self.saving.send_replace(true);
    }

    /// A successful write keeps the indicator up for the hold period; a failed
    /// one drops it as soon as nothing else is in flight.
    fn end_saving(self: &Arc<Self>, succeeded: bool) {
        let epoch = {
            let mut indicator = self.indicator.lock().expect("indicator lock poisoned");
            indicator.in_flight = indicator.in_flight.saturating_sub(1);
            indicator.epoch += 1;
            if !succeeded {
                if indicator.in_flight == 0 {
                    self.saving.send_replace(false);
                }
                return;
            }
            indicator.epoch
        };

        let shared = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(shared.indicator_hold).await;
            let indicator = shared.indicator.lock().expect("indicator lock poisoned");
            if indicator.in_flight == 0 && indicator.epoch == epoch {
                shared.saving.send_replace(false);
            }
        });
    }

    /// Persist `input`, then reconcile the cache with the backend.
    async fn write(
        self: &Arc<Self>,
        notebook_id: Uuid,
        note_id: Uuid,
        input: UpdateNoteInput,
    ) -> StoreResult<()> {
        self.begin_saving();
        tracing::debug!("Saving note {}", note_id);

        let result = self.store.update_note(note_id, input).await;
        if result.is_ok() {
            if let Err(e) = self
                .state
                .reload_notes(self.store.as_ref(), notebook_id)
                .await
            {
                tracing::warn!("Reload after saving note {} failed: {}", note_id, e);
            }
        }

        self.end_saving(result.is_ok());
        result
    }

    /// Queue behind any write of the same (note, field) already under way.
    async fn write_slot(&self, key: (Uuid, Field)) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.write_locks.lock().expect("autosave lock poisoned");
            locks.entry(key).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Forget idle write slots of a note, or of every note when `note_id` is `None`.
    fn prune_write_slots(&self, note_id: Option<Uuid>) {
        let mut locks = self.write_locks.lock().expect("autosave lock poisoned");
        locks.retain(|(id, _), lock| {
            note_id.is_some_and(|n| n != *id) || Arc::strong_count(lock) > 1
        });
    }

    fn notify(&self, notice: Notice) {
        // No subscribers is fine
        let _ = self.notices.send(notice);
    }
}

/// Owns every pending autosave timer. Cloning shares the same timers.
#[derive(Clone)]
pub struct Autosave {
    shared: Arc<Shared>,
}

impl Autosave {
    pub fn new(
        store: Arc<dyn NoteStore>,
        state: Arc<AppState>,
        idle: Duration,
        indicator_hold: Duration,
    ) -> Self {
        let (saving, _) = watch::channel(false);
        let (notices, _) = broadcast::channel(16);
        Self {
            shared: Arc::new(Shared {
                store,
                state,
                idle,
                indicator_hold,
                timers: Mutex::new(HashMap::new()),
                write_locks: Mutex::new(HashMap::new()),
                next_ticket: AtomicU64::new(1),
                indicator: Mutex::new(Indicator::default()),
                saving,
                notices,
            }),
        }
    }

    pub fn from_config(store: Arc<dyn NoteStore>, state: Arc<AppState>, config: &Config) -> Self {
        Self::new(store, state, config.autosave_idle(), config.saving_indicator())
    }

    /// Whether the saving indicator should be shown.
    pub fn saving(&self) -> watch::Receiver<bool> {
        self.shared.saving.subscribe()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.shared.notices.subscribe()
    }

    /// Record an edit: update the cache at once, persist after the idle period.
    pub fn edit(&self, notebook_id: Uuid, note_id: Uuid, field: Field, value: impl Into<String>) {
        let value = value.into();
        self.shared
            .state
            .update_note_in_cache(notebook_id, note_id, &field.update(value.clone()));

        let key = (note_id, field);
        let ticket = self.shared.next_ticket.fetch_add(1, Ordering::SeqCst);
        let mut timers = self.shared.timers.lock().expect("autosave lock poisoned");
        if let Some(previous) = timers.remove(&key) {
            previous.handle.abort();
        }

        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(shared.idle).await;

            let claimed = {
                let mut timers = shared.timers.lock().expect("autosave lock poisoned");
                match timers.get(&key) {
                    Some(pending) if pending.ticket == ticket => {
                        timers.remove(&key);
                        true
                    }
                    _ => false,
                }
            };
            if !claimed {
                return;
            }

            let _slot = shared.write_slot(key).await;
            if let Err(e) = shared.write(notebook_id, note_id, field.update(value)).await {
                tracing::error!("Autosave of {:?} for note {} failed: {}", field, note_id, e);
                shared.notify(Notice::Failed {
                    note_id,
                    message: e.to_string(),
                });
            }
        });

        timers.insert(key, PendingTimer { ticket, handle });
    }

    pub fn edit_title(&self, notebook_id: Uuid, note_id: Uuid, title: impl Into<String>) {
        self.edit(notebook_id, note_id, Field::Title, title);
    }

    pub fn edit_content(&self, notebook_id: Uuid, note_id: Uuid, content: impl Into<String>) {
        self.edit(notebook_id, note_id, Field::Content, content);
    }

    /// Manual save: drop both pending timers and write both fields at once.
    pub async fn save_now(
        &self,
        notebook_id: Uuid,
        note_id: Uuid,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> StoreResult<()> {
        self.cancel_note(note_id);

        let input = UpdateNoteInput {
            title: Some(title.into()),
            content: Some(content.into()),
        };
        self.shared
            .state
            .update_note_in_cache(notebook_id, note_id, &input);

        let _title_slot = self.shared.write_slot((note_id, Field::Title)).await;
        let _content_slot = self.shared.write_slot((note_id, Field::Content)).await;
        match self.shared.write(notebook_id, note_id, input).await {
            Ok(()) => {
                tracing::info!("Saved note {}", note_id);
                self.shared.notify(Notice::Saved { note_id });
                Ok(())
            }
            Err(e) => {
                tracing::error!("Saving note {} failed: {}", note_id, e);
                self.shared.notify(Notice::Failed {
                    note_id,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Cancel every pending timer of a note. Writes already under way finish.
    pub fn cancel_note(&self, note_id: Uuid) {
        let mut timers = self.shared.timers.lock().expect("autosave lock poisoned");
        timers.retain(|(id, field), pending| {
            if *id == note_id {
                tracing::debug!("Cancelled pending {:?} save for note {}", field, note_id);
                pending.handle.abort();
                false
            } else {
                true
            }
        });
        drop(timers);
        self.shared.prune_write_slots(Some(note_id));
    }

    /// Leaving `note_id` for another note.
    pub fn switch_note(&self, leaving: Uuid) {
        self.cancel_note(leaving);
    }

    /// Tear down: cancel every pending timer.
    pub fn shutdown(&self) {
        let mut timers = self.shared.timers.lock().expect("autosave lock poisoned");
        for (_, pending) in timers.drain() {
            pending.handle.abort();
        }
        drop(timers);
        self.shared.prune_write_slots(None);
    }

    pub fn is_pending(&self, note_id: Uuid, field: Field) -> bool {
        let timers = self.shared.timers.lock().expect("autosave lock poisoned");
        timers.contains_key(&(note_id, field))
    }
}
