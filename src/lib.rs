pub mod autosave;
pub mod bridge;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod search;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use store::{BackendKind, NoteStore, Storage};
