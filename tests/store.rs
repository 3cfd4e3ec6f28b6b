use enumflags2::BitFlags;

use xdp_document_portal::ids::AppId;
use xdp_document_portal::permission::Permission;
use xdp_document_portal::store::DocumentStore;

fn temp_store() -> (tempfile::TempDir, DocumentStore) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("main");
    let store = DocumentStore::load(path).unwrap();
    (dir, store)
}

#[test]
fn create_doc_without_title_is_idempotent() {
    let (_dir, mut store) = temp_store();
    let first = store.create_doc("file:///home/u/a.txt", "");
    let second = store.create_doc("file:///home/u/a.txt", "");
    assert_eq!(first, second);
}

#[test]
fn titled_documents_for_the_same_uri_are_distinct() {
    let (_dir, mut store) = temp_store();
    let a = store.create_doc("file:///home/u/docs", "a.md");
    let b = store.create_doc("file:///home/u/docs", "b.md");
    assert_ne!(a, b);
}

#[test]
fn set_permissions_merge_ors_the_bitfield() {
    let (_dir, mut store) = temp_store();
    let doc = store.create_doc("file:///home/u/a.txt", "");
    let app = AppId::from("org.example.App");

    store.set_permissions(&doc, &app, Permission::Read.into(), true);
    store.set_permissions(&doc, &app, Permission::Write.into(), true);

    let effective = store.lookup_doc(&doc).unwrap().effective_permissions(&app);
    assert_eq!(effective, Permission::Read | Permission::Write);
}

#[test]
fn set_permissions_to_zero_removes_the_row_and_reverse_index() {
    let (_dir, mut store) = temp_store();
    let doc = store.create_doc("file:///home/u/a.txt", "");
    let app = AppId::from("org.example.App");

    store.set_permissions(&doc, &app, Permission::Read.into(), true);
    assert!(store.lookup_app(&app).contains(&doc));

    store.set_permissions(&doc, &app, BitFlags::empty(), true);
    assert!(!store.lookup_app(&app).contains(&doc));
    assert_eq!(
        store
            .lookup_doc(&doc)
            .unwrap()
            .effective_permissions(&app),
        BitFlags::empty()
    );
}

#[test]
fn delete_doc_cascades_its_permission_index_entries() {
    let (_dir, mut store) = temp_store();
    let doc = store.create_doc("file:///home/u/a.txt", "");
    let app = AppId::from("org.example.App");
    store.set_permissions(&doc, &app, Permission::Read.into(), true);

    assert!(store.delete_doc(&doc));
    assert!(store.lookup_doc(&doc).is_none());
    assert!(!store.lookup_app(&app).contains(&doc));
    assert!(!store.delete_doc(&doc), "deleting twice reports not-found");
}

#[test]
fn unsandboxed_host_app_id_holds_every_permission() {
    let (_dir, mut store) = temp_store();
    let doc = store.create_doc("file:///home/u/a.txt", "");
    let host = AppId::host();
    assert!(store
        .lookup_doc(&doc)
        .unwrap()
        .has_permissions(&host, BitFlags::all()));
}

#[test]
fn save_and_reload_round_trips_docs_and_permissions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("main");

    let doc;
    let app = AppId::from("org.example.App");
    {
        let mut store = DocumentStore::load(path.clone()).unwrap();
        doc = store.create_doc("file:///home/u/docs", "draft.md");
        store.set_permissions(&doc, &app, Permission::Read | Permission::Write, true);
        assert!(store.is_dirty());
        store.save().unwrap();
        assert!(!store.is_dirty());
    }

    let reloaded = DocumentStore::load(path).unwrap();
    let row = reloaded.lookup_doc(&doc).unwrap();
    assert_eq!(row.uri, "file:///home/u/docs");
    assert_eq!(row.title, "draft.md");
    assert_eq!(
        row.effective_permissions(&app),
        Permission::Read | Permission::Write
    );
    assert!(reloaded.lookup_app(&app).contains(&doc));
}

#[test]
fn list_operations_reflect_every_live_doc_app_and_uri() {
    let (_dir, mut store) = temp_store();
    let doc_a = store.create_doc("file:///home/u/a.txt", "");
    let doc_b = store.create_doc("file:///home/u/docs", "b.md");
    let app = AppId::from("org.example.App");
    store.set_permissions(&doc_b, &app, Permission::Read.into(), true);

    let docs = store.list_docs();
    assert!(docs.contains(&doc_a));
    assert!(docs.contains(&doc_b));
    assert!(store.list_apps().contains(&app));
    assert!(store.list_uris().contains(&"file:///home/u/a.txt".to_owned()));
}
