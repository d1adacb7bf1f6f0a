use notekeeper::models::*;
use notekeeper::store::LocalStore;
use notekeeper::{BackendKind, NoteStore, StoreError};
use speculate2::speculate;
use tokio_test::block_on;
use uuid::Uuid;

fn create_test_notebook(store: &LocalStore, name: &str) -> Notebook {
    block_on(store.create_notebook(name)).expect("Failed to create notebook")
}

fn create_test_note(store: &LocalStore, notebook_id: Uuid, title: &str, content: &str) -> Note {
    block_on(store.create_note(CreateNoteInput {
        notebook_id,
        title: title.to_string(),
        content: Some(content.to_string()),
    }))
    .expect("Failed to create note")
}

fn tick() {
    std::thread::sleep(std::time::Duration::from_millis(2));
}

speculate! {
    before {
        let store = LocalStore::in_memory();
    }

    it "reports the local backend kind" {
        assert_eq!(store.kind(), BackendKind::Local);
        assert_eq!(block_on(store.storage_path()).unwrap(), None);
    }

    describe "notebooks" {
        it "lists notebooks most recently updated first" {
            let a = create_test_notebook(&store, "A");
            tick();
            let b = create_test_notebook(&store, "B");
            tick();
            block_on(store.update_notebook(a.id, UpdateNotebookInput::rename("A2"))).unwrap();

            let listed = block_on(store.list_notebooks()).unwrap();
            let ids: Vec<Uuid> = listed.iter().map(|nb| nb.id).collect();
            assert_eq!(ids, vec![a.id, b.id]);
            assert_eq!(listed[0].name, "A2");
        }

        it "rejects a blank name" {
            let result = block_on(store.create_notebook(""));
            assert!(matches!(result, Err(StoreError::Validation { .. })));
            assert!(block_on(store.list_notebooks()).unwrap().is_empty());
        }

        it "ignores updates to unknown notebooks" {
            block_on(store.update_notebook(Uuid::new_v4(), UpdateNotebookInput::rename("Ghost"))).unwrap();
            assert!(block_on(store.list_notebooks()).unwrap().is_empty());
        }

        it "cascades notebook deletion to its notes" {
            let doomed = create_test_notebook(&store, "Doomed");
            let other = create_test_notebook(&store, "Other");
            create_test_note(&store, doomed.id, "One", "");
            create_test_note(&store, doomed.id, "Two", "");
            let kept = create_test_note(&store, other.id, "Kept", "");

            block_on(store.delete_notebook(doomed.id)).unwrap();

            assert!(block_on(store.get_notebook(doomed.id)).unwrap().is_none());
            assert!(block_on(store.list_notes_by_notebook(doomed.id)).unwrap().is_empty());
            assert_eq!(block_on(store.get_note(kept.id)).unwrap(), Some(kept));
        }
    }

    describe "notes" {
        it "creates an untitled note with empty content" {
            let work = create_test_notebook(&store, "Work");
            let note = block_on(store.create_note(CreateNoteInput {
                notebook_id: work.id,
                title: UNTITLED_NOTE.to_string(),
                content: None,
            })).unwrap();

            let listed = block_on(store.list_notes_by_notebook(work.id)).unwrap();
            assert_eq!(listed, vec![note]);
            assert_eq!(listed[0].content, "");
        }

        it "lists only the notebook's notes, newest first" {
            let work = create_test_notebook(&store, "Work");
            let home = create_test_notebook(&store, "Home");
            let older = create_test_note(&store, work.id, "Older", "");
            tick();
            let newer = create_test_note(&store, work.id, "Newer", "");
            create_test_note(&store, home.id, "Elsewhere", "");

            let ids: Vec<Uuid> = block_on(store.list_notes_by_notebook(work.id))
                .unwrap()
                .into_iter()
                .map(|n| n.id)
                .collect();
            assert_eq!(ids, vec![newer.id, older.id]);
        }

        it "updates only the supplied fields" {
            let work = create_test_notebook(&store, "Work");
            let note = create_test_note(&store, work.id, "Draft", "<p>body</p>");

            block_on(store.update_note(note.id, UpdateNoteInput::title("Final"))).unwrap();

            let found = block_on(store.get_note(note.id)).unwrap().unwrap();
            assert_eq!(found.title, "Final");
            assert_eq!(found.content, "<p>body</p>");
            assert!(found.updated_at > note.updated_at);
        }

        it "deletes a single note" {
            let work = create_test_notebook(&store, "Work");
            let note = create_test_note(&store, work.id, "Gone", "");
            block_on(store.delete_note(note.id)).unwrap();
            assert!(block_on(store.get_note(note.id)).unwrap().is_none());
        }
    }

    describe "search_notes" {
        it "matches case-insensitively in title or content" {
            let work = create_test_notebook(&store, "Work");
            let note = create_test_note(&store, work.id, UNTITLED_NOTE, "<p>Hello World</p>");

            let found = block_on(store.search_notes("hello")).unwrap();
            assert_eq!(found, vec![note]);
            assert!(block_on(store.search_notes("xyz")).unwrap().is_empty());
        }

        it "returns nothing for an empty query" {
            let work = create_test_notebook(&store, "Work");
            create_test_note(&store, work.id, "Anything", "");
            assert!(block_on(store.search_notes("")).unwrap().is_empty());
        }
    }

    describe "images" {
        it "inlines images as data URLs" {
            let url = block_on(store.upload_image(ImageUpload::new("dot.png", vec![1, 2, 3]))).unwrap();
            assert_eq!(url, "data:image/png;base64,AQID");
            block_on(store.delete_image(&url)).unwrap();
        }
    }

    describe "persistence" {
        it "reloads committed state from the snapshot" {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("local-store.json");

            let (work, note) = {
                let store = LocalStore::open(&path).unwrap();
                let work = create_test_notebook(&store, "Work");
                let note = create_test_note(&store, work.id, "Saved", "<p>kept</p>");
                (work, note)
            };

            let reopened = LocalStore::open(&path).unwrap();
            assert_eq!(block_on(reopened.get_notebook(work.id)).unwrap(), Some(work.clone()));
            assert_eq!(block_on(reopened.list_notes_by_notebook(work.id)).unwrap(), vec![note]);
            assert_eq!(
                block_on(reopened.storage_path()).unwrap(),
                Some(path.display().to_string())
            );
        }

        it "rolls back a unit of work whose flush fails" {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("local-store.json");
            let store = LocalStore::open(&path).unwrap();
            let work = create_test_notebook(&store, "Work");
            create_test_note(&store, work.id, "One", "");
            create_test_note(&store, work.id, "Two", "");

            // Block the temp file the flush writes through
            std::fs::create_dir(path.with_extension("json.tmp")).unwrap();

            assert!(block_on(store.delete_notebook(work.id)).is_err());
            assert!(block_on(store.get_notebook(work.id)).unwrap().is_some());
            assert_eq!(block_on(store.list_notes_by_notebook(work.id)).unwrap().len(), 2);
        }
    }
}
