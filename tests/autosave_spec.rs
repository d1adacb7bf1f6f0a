mod support;

use std::sync::Arc;
use std::time::Duration;

use notekeeper::autosave::{Autosave, Field, Notice};
use notekeeper::cache::AppState;
use notekeeper::config::Config;
use notekeeper::models::*;
use notekeeper::NoteStore;
use support::RecordingStore;
use tokio::time::sleep;

struct Fixture {
    store: Arc<RecordingStore>,
    state: Arc<AppState>,
    autosave: Autosave,
    notebook: Notebook,
    note: Note,
}

async fn setup() -> Fixture {
    let store = Arc::new(RecordingStore::new());
    let (notebook, note) = store.seed().await;

    let state = Arc::new(AppState::new());
    state.set_notes(notebook.id, vec![note.clone()]);
    state.select(notebook.id, note.id);

    let autosave = Autosave::from_config(store.clone(), state.clone(), &Config::default());
    Fixture {
        store,
        state,
        autosave,
        notebook,
        note,
    }
}

/// Let spawned tasks run to their next await point.
async fn settle() {
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
}

mod debounce {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_of_title_edits_becomes_one_write() {
        let f = setup().await;

        f.autosave.edit_title(f.notebook.id, f.note.id, "A");
        sleep(Duration::from_millis(200)).await;
        f.autosave.edit_title(f.notebook.id, f.note.id, "AB");

        sleep(Duration::from_millis(999)).await;
        settle().await;
        assert!(f.store.updates().is_empty());

        sleep(Duration::from_millis(2)).await;
        settle().await;
        assert_eq!(
            f.store.updates(),
            vec![(f.note.id, UpdateNoteInput::title("AB"))]
        );

        let stored = f.store.get_note(f.note.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "AB");
        assert_eq!(stored.content, f.note.content);
    }

    #[tokio::test(start_paused = true)]
    async fn title_and_content_save_independently() {
        let f = setup().await;

        f.autosave.edit_title(f.notebook.id, f.note.id, "Plans");
        sleep(Duration::from_millis(300)).await;
        f.autosave
            .edit_content(f.notebook.id, f.note.id, "<p>Ship it</p>");
        assert!(f.autosave.is_pending(f.note.id, Field::Title));
        assert!(f.autosave.is_pending(f.note.id, Field::Content));

        sleep(Duration::from_millis(2000)).await;
        settle().await;

        assert_eq!(
            f.store.updates(),
            vec![
                (f.note.id, UpdateNoteInput::title("Plans")),
                (f.note.id, UpdateNoteInput::content("<p>Ship it</p>")),
            ]
        );
        assert!(!f.autosave.is_pending(f.note.id, Field::Title));
        assert!(!f.autosave.is_pending(f.note.id, Field::Content));
    }
}

mod ordering {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn slow_earlier_write_cannot_overwrite_a_later_edit() {
        let f = setup().await;
        f.store.stall_title("A", Duration::from_millis(2000));

        f.autosave.edit_title(f.notebook.id, f.note.id, "A");
        sleep(Duration::from_millis(1100)).await;
        f.autosave.edit_title(f.notebook.id, f.note.id, "AB");

        sleep(Duration::from_secs(5)).await;
        settle().await;

        assert_eq!(
            f.store.updates(),
            vec![
                (f.note.id, UpdateNoteInput::title("A")),
                (f.note.id, UpdateNoteInput::title("AB")),
            ]
        );
        let stored = f.store.get_note(f.note.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "AB");
        let cached = f.state.cached_note(f.notebook.id, f.note.id).unwrap();
        assert_eq!(cached.title, "AB");
    }

    #[tokio::test(start_paused = true)]
    async fn manual_save_waits_for_an_autosave_in_flight() {
        let f = setup().await;
        f.store.stall_title("Draft", Duration::from_millis(2000));

        f.autosave.edit_title(f.notebook.id, f.note.id, "Draft");
        sleep(Duration::from_millis(1100)).await;
        f.autosave
            .save_now(f.notebook.id, f.note.id, "Final", "<p>done</p>")
            .await
            .unwrap();

        let stored = f.store.get_note(f.note.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Final");
        assert_eq!(stored.content, "<p>done</p>");
    }
}

mod cancellation {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn switching_notes_drops_pending_writes() {
        let f = setup().await;

        f.autosave.edit_title(f.notebook.id, f.note.id, "Half typed");
        f.autosave.edit_content(f.notebook.id, f.note.id, "<p>draft</p>");
        sleep(Duration::from_millis(500)).await;

        f.autosave.switch_note(f.note.id);
        f.state.set_active_note(None);

        sleep(Duration::from_secs(5)).await;
        settle().await;
        assert!(f.store.updates().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn other_notes_keep_their_timers() {
        let f = setup().await;
        let other = f
            .store
            .create_note(CreateNoteInput {
                notebook_id: f.notebook.id,
                title: "Other".to_string(),
                content: None,
            })
            .await
            .unwrap();

        f.autosave.edit_title(f.notebook.id, f.note.id, "Left behind");
        f.autosave.edit_title(f.notebook.id, other.id, "Still saving");
        f.autosave.cancel_note(f.note.id);

        sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(
            f.store.updates(),
            vec![(other.id, UpdateNoteInput::title("Still saving"))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_everything() {
        let f = setup().await;

        f.autosave.edit_title(f.notebook.id, f.note.id, "Never");
        f.autosave.shutdown();

        sleep(Duration::from_secs(5)).await;
        settle().await;
        assert!(f.store.updates().is_empty());
    }
}

mod manual_save {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn writes_both_fields_once_and_notifies() {
        let f = setup().await;
        let mut notices = f.autosave.notices();

        f.autosave.edit_title(f.notebook.id, f.note.id, "Draft");
        f.autosave
            .save_now(f.notebook.id, f.note.id, "Final", "<p>done</p>")
            .await
            .unwrap();

        sleep(Duration::from_secs(5)).await;
        settle().await;

        assert_eq!(
            f.store.updates(),
            vec![(
                f.note.id,
                UpdateNoteInput {
                    title: Some("Final".to_string()),
                    content: Some("<p>done</p>".to_string()),
                }
            )]
        );
        assert_eq!(
            notices.recv().await.unwrap(),
            Notice::Saved { note_id: f.note.id }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_reported() {
        let f = setup().await;
        let mut notices = f.autosave.notices();
        f.store.fail_writes(true);

        let result = f
            .autosave
            .save_now(f.notebook.id, f.note.id, "Final", "")
            .await;
        assert!(result.is_err());

        match notices.recv().await.unwrap() {
            Notice::Failed { note_id, .. } => assert_eq!(note_id, f.note.id),
            other => panic!("expected failure notice, got {:?}", other),
        }
    }
}

mod reconciliation {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn cache_is_updated_optimistically_then_reloaded() {
        let f = setup().await;

        f.autosave.edit_title(f.notebook.id, f.note.id, "Optimistic");
        let cached = f.state.cached_note(f.notebook.id, f.note.id).unwrap();
        assert_eq!(cached.title, "Optimistic");
        assert!(f.store.updates().is_empty());

        sleep(Duration::from_millis(1100)).await;
        settle().await;

        let stored = f.store.get_note(f.note.id).await.unwrap().unwrap();
        let cached = f.state.cached_note(f.notebook.id, f.note.id).unwrap();
        assert_eq!(cached, stored);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_autosave_emits_a_notice() {
        let f = setup().await;
        let mut notices = f.autosave.notices();
        f.store.fail_writes(true);

        f.autosave
            .edit_content(f.notebook.id, f.note.id, "<p>lost?</p>");
        sleep(Duration::from_millis(1100)).await;
        settle().await;

        assert!(matches!(
            notices.recv().await.unwrap(),
            Notice::Failed { .. }
        ));
    }
}

mod indicator {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn stays_visible_for_the_hold_period() {
        let f = setup().await;
        let saving = f.autosave.saving();
        assert!(!*saving.borrow());

        f.autosave.edit_title(f.notebook.id, f.note.id, "Quick");
        sleep(Duration::from_millis(1001)).await;
        settle().await;
        assert!(*saving.borrow());

        sleep(Duration::from_millis(490)).await;
        settle().await;
        assert!(*saving.borrow());

        sleep(Duration::from_millis(20)).await;
        settle().await;
        assert!(!*saving.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn drops_at_once_when_the_write_fails() {
        let f = setup().await;
        let saving = f.autosave.saving();
        f.store.fail_writes(true);

        f.autosave.edit_title(f.notebook.id, f.note.id, "Doomed");
        sleep(Duration::from_millis(1001)).await;
        settle().await;
        assert!(!*saving.borrow());
    }
}
