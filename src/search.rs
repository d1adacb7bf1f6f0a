//! Search surface: debounced free-text search over the active backend.
//!
//! Queries go through an mpsc channel to a background task that waits for a
//! quiet period before dispatching, so a burst of keystrokes costs one backend
//! call. Results are published on a `watch` channel; results for a query that
//! has since been replaced are dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::cache::AppState;
use crate::config::Config;
use crate::error::StoreResult;
use crate::models::Note;
use crate::store::NoteStore;

struct Inner {
    store: Arc<dyn NoteStore>,
    state: Arc<AppState>,
    generation: AtomicU64,
    open: watch::Sender<bool>,
    results: watch::Sender<Vec<Note>>,
}

impl Inner {
    async fn run(&self, query: &str) -> StoreResult<Vec<Note>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!("Searching for {:?}", query);
        self.store.search_notes(query).await
    }

    fn publish(&self, generation: u64, notes: Vec<Note>) -> bool {
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!("Dropping results of superseded search {}", generation);
            return false;
        }
        self.results.send_replace(notes);
        true
    }
}

pub struct SearchService {
    inner: Arc<Inner>,
    query_tx: mpsc::UnboundedSender<(u64, String)>,
}

impl SearchService {
    /// Spawns the debounce task, which lives until the service is dropped.
    pub fn new(store: Arc<dyn NoteStore>, state: Arc<AppState>, debounce: Duration) -> Self {
        let (open, _) = watch::channel(false);
        let (results, _) = watch::channel(Vec::new());
        let inner = Arc::new(Inner {
            store,
            state,
            generation: AtomicU64::new(0),
            open,
            results,
        });

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::run_loop(inner.clone(), rx, debounce));
        Self {
            inner,
            query_tx: tx,
        }
    }

    pub fn from_config(store: Arc<dyn NoteStore>, state: Arc<AppState>, config: &Config) -> Self {
        Self::new(store, state, config.search_debounce())
    }

    async fn run_loop(
        inner: Arc<Inner>,
        mut rx: mpsc::UnboundedReceiver<(u64, String)>,
        debounce: Duration,
    ) {
        loop {
            let mut last = match rx.recv().await {
                Some(query) => query,
                None => break,
            };

            loop {
                match tokio::time::timeout(debounce, rx.recv()).await {
                    Ok(Some(query)) => last = query,
                    Ok(None) => return,
                    Err(_) => break,
                }
            }

            let (generation, query) = last;
            match inner.run(&query).await {
                Ok(notes) => {
                    inner.publish(generation, notes);
                }
                Err(e) => {
                    tracing::warn!("Search for {:?} failed: {}", query, e);
                }
            }
        }
    }

    pub fn open(&self) {
        self.inner.open.send_replace(true);
    }

    /// Close the surface and forget the current query and results.
    pub fn close(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.open.send_replace(false);
        self.inner.results.send_replace(Vec::new());
    }

    pub fn is_open(&self) -> bool {
        *self.inner.open.borrow()
    }

    pub fn open_state(&self) -> watch::Receiver<bool> {
        self.inner.open.subscribe()
    }

    pub fn results(&self) -> watch::Receiver<Vec<Note>> {
        self.inner.results.subscribe()
    }

    pub fn current_results(&self) -> Vec<Note> {
        self.inner.results.borrow().clone()
    }

    /// Typed query text. A blank query clears the results at once; anything
    /// else is searched after the debounce period.
    pub fn set_query(&self, query: impl Into<String>) {
        let query = query.into();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if query.trim().is_empty() {
            self.inner.results.send_replace(Vec::new());
        }
        if self.query_tx.send((generation, query)).is_err() {
            tracing::warn!("Search task has stopped");
        }
    }

    /// Search immediately, skipping the debounce.
    pub async fn search_now(&self, query: &str) -> StoreResult<Vec<Note>> {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let notes = self.inner.run(query).await?;
        self.inner.publish(generation, notes.clone());
        Ok(notes)
    }

    /// Jump to a result: select its notebook and the note, then close.
    pub fn select(&self, note: &Note) {
        self.inner.state.select(note.notebook_id, note.id);
        self.close();
    }
}
