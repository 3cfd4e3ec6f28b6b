pub mod codec;
pub mod model;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use enumflags2::BitFlags;

use crate::ids::{random_document_id, AppId, DocumentId};
use crate::permission::Permission;
use crate::store::model::Document;

/// Durable mapping of documents and permissions, with reverse indices by
/// app-id and by titleless uri.
///
/// The original service keeps an immutable persisted snapshot with a
/// mutable staging layer on top, because its underlying value type
/// (GVariant) cannot be mutated in place. Rust's ownership model has no such
/// restriction, so the two layers collapse into one directly-mutated map;
/// `is_dirty`/`save` still behave exactly as documented; see DESIGN.md.
pub struct DocumentStore {
    path: PathBuf,
    docs: HashMap<DocumentId, Document>,
    apps: HashMap<AppId, HashSet<DocumentId>>,
    /// titleless uri -> doc-id, the "for each uri at most one titleless doc" index.
    uris: HashMap<String, DocumentId>,
    dirty: bool,
}

impl DocumentStore {
    pub fn load(path: PathBuf) -> std::io::Result<Self> {
        let persisted = codec::load(&path)?;
        let mut store = Self {
            path,
            docs: HashMap::new(),
            apps: HashMap::new(),
            uris: HashMap::new(),
            dirty: false,
        };
        for (id, doc) in persisted.docs {
            store.index_insert(&id, &doc);
            store.docs.insert(id, doc);
        }
        Ok(store)
    }

    fn index_insert(&mut self, id: &DocumentId, doc: &Document) {
        for app in doc.permissions.keys() {
            self.apps.entry(app.clone()).or_default().insert(id.clone());
        }
        if !doc.has_title() {
            self.uris.insert(doc.uri.clone(), id.clone());
        }
    }

    fn index_remove(&mut self, id: &DocumentId, doc: &Document) {
        for app in doc.permissions.keys() {
            if let Some(set) = self.apps.get_mut(app) {
                set.remove(id);
                if set.is_empty() {
                    self.apps.remove(app);
                }
            }
        }
        if !doc.has_title() {
            if self.uris.get(&doc.uri) == Some(id) {
                self.uris.remove(&doc.uri);
            }
        }
    }

    pub fn lookup_doc(&self, id: &DocumentId) -> Option<&Document> {
        self.docs.get(id)
    }

    pub fn lookup_app(&self, app: &AppId) -> Vec<DocumentId> {
        self.apps
            .get(app)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn lookup_uri(&self, uri: &str) -> Option<DocumentId> {
        self.uris.get(uri).cloned()
    }

    pub fn list_docs(&self) -> Vec<DocumentId> {
        self.docs.keys().cloned().collect()
    }

    pub fn list_apps(&self) -> Vec<AppId> {
        self.apps.keys().cloned().collect()
    }

    pub fn list_uris(&self) -> Vec<String> {
        self.uris.keys().cloned().collect()
    }

    /// Creates a document for `uri`/`title`. If `title` is empty and a
    /// titleless document for `uri` already exists, its id is returned
    /// instead of creating a duplicate (idempotent Add).
    pub fn create_doc(&mut self, uri: &str, title: &str) -> DocumentId {
        if title.is_empty() {
            if let Some(existing) = self.lookup_uri(uri) {
                return existing;
            }
        }

        let id = loop {
            let candidate = random_document_id();
            if !self.docs.contains_key(&candidate) {
                break candidate;
            }
        };

        let doc = Document::new(uri, title);
        self.index_insert(&id, &doc);
        self.docs.insert(id.clone(), doc);
        self.dirty = true;
        id
    }

    pub fn update_doc(&mut self, id: &DocumentId, uri: &str, title: &str) -> bool {
        let Some(doc) = self.docs.get(id).cloned() else {
            return false;
        };
        self.index_remove(id, &doc);
        let mut updated = doc;
        updated.uri = uri.to_owned();
        updated.title = title.to_owned();
        self.index_insert(id, &updated);
        self.docs.insert(id.clone(), updated);
        self.dirty = true;
        true
    }

    /// Cascades: removes the document and every permission index entry that
    /// referenced it.
    pub fn delete_doc(&mut self, id: &DocumentId) -> bool {
        let Some(doc) = self.docs.remove(id) else {
            return false;
        };
        self.index_remove(id, &doc);
        self.dirty = true;
        true
    }

    /// `merge=true` ORs `bits` onto the current row; `bits==0` always
    /// removes the row regardless of `merge`.
    pub fn set_permissions(
        &mut self,
        id: &DocumentId,
        app: &AppId,
        bits: BitFlags<Permission>,
        merge: bool,
    ) -> bool {
        let Some(doc) = self.docs.get_mut(id) else {
            return false;
        };

        let current = doc
            .permissions
            .get(app)
            .map(|b| BitFlags::<Permission>::from(*b))
            .unwrap_or_else(BitFlags::empty);
        let next = if merge { current | bits } else { bits };

        if next.is_empty() {
            if doc.permissions.remove(app).is_some() {
                if let Some(set) = self.apps.get_mut(app) {
                    set.remove(id);
                    if set.is_empty() {
                        self.apps.remove(app);
                    }
                }
            }
        } else {
            doc.permissions.insert(app.clone(), next.into());
            self.apps.entry(app.clone()).or_default().insert(id.clone());
        }
        self.dirty = true;
        true
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Persists the merged state atomically and clears the dirty flag.
    pub fn save(&mut self) -> std::io::Result<()> {
        let persisted = codec::PersistedState {
            docs: self.docs.clone(),
        };
        codec::save_atomic(&self.path, &persisted)?;
        self.dirty = false;
        Ok(())
    }
}
