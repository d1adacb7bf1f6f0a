use std::path::PathBuf;

use notekeeper::bridge::protocol::{INVALID_PARAMS, METHOD_NOT_FOUND};
use notekeeper::bridge::{BridgeClient, BridgeHost};
use notekeeper::db::{Database, ImageDir};
use notekeeper::models::*;
use notekeeper::{BackendKind, NoteStore, StoreError};
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct Harness {
    _dir: TempDir,
    socket: PathBuf,
    db_path: PathBuf,
    shutdown: Option<oneshot::Sender<()>>,
    host: JoinHandle<anyhow::Result<()>>,
}

impl Harness {
    async fn start() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let socket = dir.path().join("bridge.sock");
        let db_path = dir.path().join("notes.db");

        let db = Database::open(db_path.clone()).expect("Failed to open database");
        db.migrate().expect("Failed to migrate");
        let images = ImageDir::open(dir.path().join("images")).expect("Failed to open images");

        let host = BridgeHost::bind(&socket, db, images)
            .await
            .expect("Failed to bind host");
        let (tx, rx) = oneshot::channel::<()>();
        let host = tokio::spawn(host.serve(async {
            let _ = rx.await;
        }));

        Self {
            _dir: dir,
            socket,
            db_path,
            shutdown: Some(tx),
            host,
        }
    }

    async fn client(&self) -> BridgeClient {
        BridgeClient::connect(&self.socket)
            .await
            .expect("Failed to connect")
    }

    fn images_dir(&self) -> PathBuf {
        self._dir.path().join("images")
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.host.await.unwrap().unwrap();
        assert!(!self.socket.exists());
    }
}

mod contract {
    use super::*;

    #[tokio::test]
    async fn notebook_and_note_round_trip() {
        let harness = Harness::start().await;
        let client = harness.client().await;
        assert_eq!(client.kind(), BackendKind::Desktop);

        let work = client.create_notebook("Work").await.unwrap();
        let note = client
            .create_note(CreateNoteInput {
                notebook_id: work.id,
                title: UNTITLED_NOTE.to_string(),
                content: None,
            })
            .await
            .unwrap();
        assert_eq!(note.content, "");

        let listed = client.list_notes_by_notebook(work.id).await.unwrap();
        assert_eq!(listed, vec![note.clone()]);

        client
            .update_note(note.id, UpdateNoteInput::content("<p>Hello</p>"))
            .await
            .unwrap();
        let found = client.get_note(note.id).await.unwrap().unwrap();
        assert_eq!(found.content, "<p>Hello</p>");
        assert_eq!(found.title, UNTITLED_NOTE);
        assert!(found.updated_at > found.created_at);

        harness.stop().await;
    }

    #[tokio::test]
    async fn cascade_delete_over_the_bridge() {
        let harness = Harness::start().await;
        let client = harness.client().await;

        let doomed = client.create_notebook("Doomed").await.unwrap();
        for title in ["One", "Two"] {
            client
                .create_note(CreateNoteInput {
                    notebook_id: doomed.id,
                    title: title.to_string(),
                    content: None,
                })
                .await
                .unwrap();
        }

        client.delete_notebook(doomed.id).await.unwrap();

        let notebooks = client.list_notebooks().await.unwrap();
        assert!(notebooks.iter().all(|nb| nb.id != doomed.id));
        assert!(client
            .list_notes_by_notebook(doomed.id)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(client.get_notebook(doomed.id).await.unwrap(), None);

        harness.stop().await;
    }

    #[tokio::test]
    async fn search_is_case_insensitive() {
        let harness = Harness::start().await;
        let client = harness.client().await;

        let work = client.create_notebook("Work").await.unwrap();
        let note = client
            .create_note(CreateNoteInput {
                notebook_id: work.id,
                title: "Greeting".to_string(),
                content: Some("<p>Hello World</p>".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(client.search_notes("hello").await.unwrap(), vec![note]);
        assert!(client.search_notes("xyz").await.unwrap().is_empty());
        assert!(client.search_notes("").await.unwrap().is_empty());

        harness.stop().await;
    }

    #[tokio::test]
    async fn validation_errors_keep_their_kind() {
        let harness = Harness::start().await;
        let client = harness.client().await;

        match client.create_notebook("").await {
            Err(StoreError::Validation { field, .. }) => assert_eq!(field, "name"),
            other => panic!("expected validation error, got {:?}", other),
        }

        harness.stop().await;
    }

    #[tokio::test]
    async fn reports_the_database_path() {
        let harness = Harness::start().await;
        let client = harness.client().await;

        let path = client.storage_path().await.unwrap();
        assert_eq!(path, Some(harness.db_path.display().to_string()));

        harness.stop().await;
    }

    #[tokio::test]
    async fn images_are_files_next_to_the_database() {
        let harness = Harness::start().await;
        let client = harness.client().await;

        let url = client
            .upload_image(ImageUpload::new("cat.JPG", vec![9, 8, 7]))
            .await
            .unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with(".jpg"));
        assert_eq!(std::fs::read_dir(harness.images_dir()).unwrap().count(), 1);

        client.delete_image(&url).await.unwrap();
        assert_eq!(std::fs::read_dir(harness.images_dir()).unwrap().count(), 0);

        harness.stop().await;
    }
}

mod protocol {
    use super::*;

    #[tokio::test]
    async fn unknown_method_is_an_error_not_a_hangup() {
        let harness = Harness::start().await;
        let client = harness.client().await;

        match client.call("notes.explode", json!({})).await {
            Err(StoreError::Bridge { code, .. }) => assert_eq!(code, METHOD_NOT_FOUND),
            other => panic!("expected bridge error, got {:?}", other),
        }

        // Connection is still usable
        assert!(client.list_notebooks().await.unwrap().is_empty());

        harness.stop().await;
    }

    #[tokio::test]
    async fn malformed_params_are_rejected() {
        let harness = Harness::start().await;
        let client = harness.client().await;

        match client.call("notes.get", json!({ "id": "not-a-uuid" })).await {
            Err(StoreError::Bridge { code, .. }) => assert_eq!(code, INVALID_PARAMS),
            other => panic!("expected bridge error, got {:?}", other),
        }

        harness.stop().await;
    }

    #[tokio::test]
    async fn clients_share_one_database() {
        let harness = Harness::start().await;
        let writer = harness.client().await;
        let reader = harness.client().await;

        let work = writer.create_notebook("Shared").await.unwrap();
        assert_eq!(reader.get_notebook(work.id).await.unwrap(), Some(work));

        harness.stop().await;
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = BridgeClient::connect(&dir.path().join("missing.sock")).await;
        assert!(matches!(result, Err(StoreError::Transport(_))));
    }
}
