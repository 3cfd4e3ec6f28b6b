use std::collections::HashMap;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use zbus::names::UniqueName;
use zbus::zvariant::{self, Value};

use crate::dispatch::ServiceState;
use crate::error::PortalError;
use crate::fd;
use crate::ids::DocumentId;
use crate::permission::{self, Permission};

/// An in-flight staged write: PrepareUpdate through FinishUpdate/AbortUpdate.
///
/// Keyed by the service's own read-only fd number, which doubles as the
/// update-id handed back to the caller (fd uniqueness gives update-id
/// uniqueness for free, the way the original service relies on it).
pub struct Update {
    pub owner: UniqueName<'static>,
    pub staging_path: PathBuf,
    pub readonly_fd: std::fs::File,
    pub ensure_create: bool,
}

/// Per-document update table, owned by the engine rather than by the
/// document (an Update holds a doc-id value, never a back-pointer).
#[derive(Default)]
pub struct UpdateTable {
    by_doc: HashMap<DocumentId, HashMap<u32, Update>>,
}

impl UpdateTable {
    pub fn insert(&mut self, doc: &DocumentId, update_id: u32, update: Update) {
        self.by_doc
            .entry(doc.clone())
            .or_default()
            .insert(update_id, update);
    }

    pub fn take(&mut self, doc: &DocumentId, update_id: u32) -> Option<Update> {
        let updates = self.by_doc.get_mut(doc)?;
        let update = updates.remove(&update_id);
        if updates.is_empty() {
            self.by_doc.remove(doc);
        }
        update
    }

    pub fn peek(&self, doc: &DocumentId, update_id: u32) -> Option<&Update> {
        self.by_doc.get(doc)?.get(&update_id)
    }

    pub fn any_pending(&self, doc: &DocumentId) -> bool {
        self.by_doc.get(doc).is_some_and(|m| !m.is_empty())
    }
}

pub struct DocumentInterface {
    pub state: std::sync::Arc<ServiceState>,
    pub id: DocumentId,
}

const ALLOWED_ATTRIBUTES: &[&str] = &[
    "standard::name",
    "standard::display-name",
    "standard::edit-name",
    "standard::copy-name",
    "standard::icon",
    "standard::symbolic-icon",
    "standard::content-type",
    "standard::size",
    "standard::allocated-size",
    "etag::value",
    "access::can-read",
    "access::can-write",
    "time::modified",
    "time::modified-usec",
    "time::access",
    "time::access-usec",
    "time::changed",
    "time::changed-usec",
    "time::created",
    "time::created-usec",
    "unix::device",
    "unix::inode",
    "unix::mode",
    "unix::nlink",
    "unix::uid",
    "unix::gid",
];

impl DocumentInterface {
    async fn caller_app_id(&self, sender: &UniqueName<'_>) -> Result<crate::ids::AppId, PortalError> {
        self.state.app_id_resolver.resolve(sender).await
    }

    fn uri_as_path(uri: &str) -> Result<PathBuf, PortalError> {
        uri.strip_prefix("file://")
            .map(PathBuf::from)
            .ok_or_else(|| PortalError::InvalidArgument(format!("unsupported uri `{uri}`")))
    }
}

#[zbus::interface(name = "org.freedesktop.portal.Document")]
impl DocumentInterface {
    async fn read(
        &self,
        #[zbus(header)] header: zbus::message::Header<'_>,
    ) -> Result<zvariant::OwnedFd, PortalError> {
        let sender = header
            .sender()
            .ok_or_else(|| PortalError::Failed("anonymous sender".into()))?;
        let app_id = self.caller_app_id(sender).await?;

        let mut store = self.state.store.lock().await;
        let doc = store
            .lookup_doc(&self.id)
            .ok_or_else(|| PortalError::NotFound(self.id.to_string()))?;
        if !doc.has_permissions(&app_id, Permission::Read.into()) {
            return Err(PortalError::NotAllowed("missing read permission".into()));
        }
        if doc.has_title() {
            return Err(PortalError::NotWritten(self.id.to_string()));
        }
        let path = Self::uri_as_path(&doc.uri)?;
        drop(store);

        let file = std::fs::OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(&path)
            .map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    PortalError::NoFile(path.display().to_string())
                } else {
                    PortalError::Failed(err.to_string())
                }
            })?;
        let owned: OwnedFd = file.into();
        Ok(zvariant::OwnedFd::from(owned))
    }

    async fn get_info(
        &self,
        #[zbus(header)] header: zbus::message::Header<'_>,
    ) -> Result<HashMap<String, zvariant::OwnedValue>, PortalError> {
        let sender = header
            .sender()
            .ok_or_else(|| PortalError::Failed("anonymous sender".into()))?;
        let app_id = self.caller_app_id(sender).await?;

        let store = self.state.store.lock().await;
        let doc = store
            .lookup_doc(&self.id)
            .ok_or_else(|| PortalError::NotFound(self.id.to_string()))?;
        if !doc.has_permissions(&app_id, Permission::Read.into()) {
            return Err(PortalError::NotAllowed("missing read permission".into()));
        }
        if doc.has_title() {
            return Err(PortalError::NotWritten(self.id.to_string()));
        }
        let path = Self::uri_as_path(&doc.uri)?;
        let effective = doc.effective_permissions(&app_id);
        drop(store);

        query_attributes(&path, effective)
    }

    #[zbus(out_args("update_id", "fd"))]
    async fn prepare_update(
        &self,
        #[zbus(header)] header: zbus::message::Header<'_>,
        _etag: &str,
        flags: Vec<String>,
    ) -> Result<(u32, zvariant::OwnedFd), PortalError> {
        let sender = header
            .sender()
            .ok_or_else(|| PortalError::Failed("anonymous sender".into()))?;
        let app_id = self.caller_app_id(sender).await?;
        let ensure_create = flags.iter().any(|f| f == "ensure-create");

        let store = self.state.store.lock().await;
        let doc = store
            .lookup_doc(&self.id)
            .ok_or_else(|| PortalError::NotFound(self.id.to_string()))?;
        if !doc.has_permissions(&app_id, Permission::Write.into()) {
            return Err(PortalError::NotAllowed("missing write permission".into()));
        }
        if ensure_create && !doc.has_title() {
            return Err(PortalError::Exists(self.id.to_string()));
        }

        let (staging_dir, basename) = if doc.has_title() {
            (Self::uri_as_path(&doc.uri)?, doc.title.clone())
        } else {
            let path = Self::uri_as_path(&doc.uri)?;
            let dir = path
                .parent()
                .ok_or_else(|| PortalError::Failed("uri has no parent".into()))?
                .to_path_buf();
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| PortalError::Failed("uri has no basename".into()))?
                .to_owned();
            (dir, name)
        };
        drop(store);

        let (writable, readonly, staging_path) = create_staging_file(&staging_dir, &basename)?;

        let writable_owned: OwnedFd = writable.into();
        let update_id = readonly.as_raw_fd() as u32;

        let mut updates = self.state.updates.lock().await;
        updates.insert(
            &self.id,
            update_id,
            Update {
                owner: sender.to_owned(),
                staging_path,
                readonly_fd: readonly,
                ensure_create,
            },
        );

        Ok((update_id, zvariant::OwnedFd::from(writable_owned)))
    }

    async fn finish_update(
        &self,
        #[zbus(header)] header: zbus::message::Header<'_>,
        update_id: u32,
    ) -> Result<(), PortalError> {
        let sender = header
            .sender()
            .ok_or_else(|| PortalError::Failed("anonymous sender".into()))?;

        let update = {
            let mut updates = self.state.updates.lock().await;
            match updates.peek(&self.id, update_id) {
                Some(update) if update.owner == *sender => {}
                _ => return Err(PortalError::NotFound(update_id.to_string())),
            }
            updates.take(&self.id, update_id).expect("checked above")
        };

        let mut store = self.state.store.lock().await;
        let doc = store
            .lookup_doc(&self.id)
            .ok_or_else(|| PortalError::NotFound(self.id.to_string()))?
            .clone();

        if doc.has_title() {
            let dir = Self::uri_as_path(&doc.uri)?;
            let (dest_path, dest_file) = materialize_with_suffix(&dir, &doc.title)?;
            if let Err(err) = copy_staging_into(&update, dest_file).await {
                let _ = std::fs::remove_file(&dest_path);
                return Err(err);
            }
            let new_uri = format!("file://{}", dest_path.display());
            store.update_doc(&self.id, &new_uri, "");
        } else {
            let dest_path = Self::uri_as_path(&doc.uri)?;
            if update.ensure_create && dest_path.exists() {
                return Err(PortalError::Exists(self.id.to_string()));
            }
            let tmp_path = dest_path.with_extension("xdp-finish-tmp");
            let tmp_file = std::fs::File::create(&tmp_path)?;
            if let Err(err) = copy_staging_into(&update, tmp_file).await {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(err);
            }
            std::fs::rename(&tmp_path, &dest_path)?;
        }

        drop(store);
        self.state.schedule_save();
        Ok(())
    }

    async fn abort_update(
        &self,
        #[zbus(header)] header: zbus::message::Header<'_>,
        update_id: u32,
    ) -> Result<(), PortalError> {
        let sender = header
            .sender()
            .ok_or_else(|| PortalError::Failed("anonymous sender".into()))?;

        let mut updates = self.state.updates.lock().await;
        match updates.peek(&self.id, update_id) {
            Some(update) if update.owner == *sender => {}
            _ => return Err(PortalError::NotFound(update_id.to_string())),
        }
        // Dropping the Update closes the readonly fd; the staging file was
        // already unlinked at PrepareUpdate time, so the destination was
        // never touched.
        updates.take(&self.id, update_id);
        Ok(())
    }

    async fn grant_permissions(
        &self,
        #[zbus(header)] header: zbus::message::Header<'_>,
        app: &str,
        permissions: Vec<String>,
    ) -> Result<(), PortalError> {
        let sender = header
            .sender()
            .ok_or_else(|| PortalError::Failed("anonymous sender".into()))?;
        let app_id = self.caller_app_id(sender).await?;
        let wanted = permission::parse_permissions(&permissions)?;

        let mut store = self.state.store.lock().await;
        let doc = store
            .lookup_doc(&self.id)
            .ok_or_else(|| PortalError::NotFound(self.id.to_string()))?;
        let can_grant = doc.has_permissions(&app_id, Permission::GrantPermissions.into())
            && doc.has_permissions(&app_id, wanted);
        if !can_grant {
            return Err(PortalError::NotAllowed("missing grant-permissions".into()));
        }

        let target = crate::ids::AppId::from(app);
        store.set_permissions(&self.id, &target, wanted, true);
        drop(store);
        self.state.schedule_save();
        Ok(())
    }

    async fn revoke_permissions(
        &self,
        #[zbus(header)] header: zbus::message::Header<'_>,
        app: &str,
        permissions: Vec<String>,
    ) -> Result<(), PortalError> {
        let sender = header
            .sender()
            .ok_or_else(|| PortalError::Failed("anonymous sender".into()))?;
        let app_id = self.caller_app_id(sender).await?;
        let target = crate::ids::AppId::from(app);
        let revoked = permission::parse_permissions(&permissions)?;

        let mut store = self.state.store.lock().await;
        let doc = store
            .lookup_doc(&self.id)
            .ok_or_else(|| PortalError::NotFound(self.id.to_string()))?;
        let allowed = doc.has_permissions(&app_id, Permission::GrantPermissions.into())
            || app_id == target;
        if !allowed {
            return Err(PortalError::NotAllowed(
                "missing grant-permissions or not self".into(),
            ));
        }

        let current = doc.effective_permissions(&target);
        store.set_permissions(&self.id, &target, current - revoked, false);
        drop(store);
        self.state.schedule_save();
        Ok(())
    }

    async fn delete(&self) -> Result<(), PortalError> {
        let updates = self.state.updates.lock().await;
        if updates.any_pending(&self.id) {
            return Err(PortalError::OperationsPending(self.id.to_string()));
        }
        drop(updates);

        let mut store = self.state.store.lock().await;
        if !store.delete_doc(&self.id) {
            return Err(PortalError::NotFound(self.id.to_string()));
        }
        drop(store);
        self.state.schedule_save();

        let object_server = self.state.connection.object_server();
        let path = crate::config::document_path(&self.id);
        let _ = object_server.remove::<DocumentInterface, _>(path).await;
        Ok(())
    }
}

/// `mkstemp("<dir>/.<basename>.XXXXXX")`, reopen read-only for the service's
/// own handle, then `unlink` immediately — matching PrepareUpdate's staging
/// algorithm. The writable half is handed to the caller.
fn create_staging_file(
    dir: &Path,
    basename: &str,
) -> Result<(std::fs::File, std::fs::File, PathBuf), PortalError> {
    std::fs::create_dir_all(dir)?;
    let named = tempfile::Builder::new()
        .prefix(&format!(".{basename}."))
        .rand_bytes(6)
        .tempfile_in(dir)
        .map_err(|err| PortalError::Failed(err.to_string()))?;

    let writable = named
        .reopen()
        .map_err(|err| PortalError::Failed(err.to_string()))?;
    let readonly = fd::reopen_read_only(named.as_raw_fd())?;
    let staging_path = named.path().to_path_buf();
    // `named` unlinks itself on drop, matching mkstemp + unlink.
    Ok((writable, readonly, staging_path))
}

async fn copy_staging_into(update: &Update, dest: std::fs::File) -> Result<(), PortalError> {
    let raw = update.readonly_fd.try_clone()?;
    let owned: OwnedFd = raw.into();
    let mut dest = tokio::fs::File::from_std(dest);
    fd::copy_fd_to_stream(owned, &mut dest).await?;
    Ok(())
}

/// Materializes a titled document: `dir/title`, then `dir/title.1`,
/// `dir/title.2`, ... until a `create_new` succeeds.
fn materialize_with_suffix(
    dir: &Path,
    title: &str,
) -> Result<(PathBuf, std::fs::File), PortalError> {
    std::fs::create_dir_all(dir)?;
    let mut attempt: u32 = 0;
    loop {
        let candidate = if attempt == 0 {
            dir.join(title)
        } else {
            dir.join(format!("{title}.{attempt}"))
        };
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(file) => return Ok((candidate, file)),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                attempt += 1;
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn query_attributes(
    path: &Path,
    effective: enumflags2::BitFlags<Permission>,
) -> Result<HashMap<String, zvariant::OwnedValue>, PortalError> {
    use std::os::unix::fs::MetadataExt;

    let metadata = std::fs::metadata(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            PortalError::NoFile(path.display().to_string())
        } else {
            PortalError::Failed(err.to_string())
        }
    })?;

    let mut attrs: HashMap<String, zvariant::OwnedValue> = HashMap::new();
    let put = |attrs: &mut HashMap<String, zvariant::OwnedValue>, key: &str, value: Value<'_>| {
        if let Ok(owned) = zvariant::OwnedValue::try_from(value) {
            attrs.insert(key.to_owned(), owned);
        }
    };

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_owned();
    put(&mut attrs, "standard::name", Value::new(name.clone()));
    put(&mut attrs, "standard::display-name", Value::new(name.clone()));
    // GIO defaults edit-name/copy-name to display-name when a file has no
    // override; we have no override source either, so do the same.
    put(&mut attrs, "standard::edit-name", Value::new(name.clone()));
    put(&mut attrs, "standard::copy-name", Value::new(name));

    let content_type = mime_guess::from_path(path)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_owned();
    let icon_name = icon_name_for_mime(&content_type);
    put(&mut attrs, "standard::icon", Value::new(icon_name.clone()));
    put(
        &mut attrs,
        "standard::symbolic-icon",
        Value::new(format!("{icon_name}-symbolic")),
    );
    put(&mut attrs, "standard::content-type", Value::new(content_type));

    put(&mut attrs, "standard::size", Value::new(metadata.size()));
    put(
        &mut attrs,
        "standard::allocated-size",
        Value::new(metadata.blocks() as u64 * 512),
    );

    // AND-ed with the caller's effective permissions: a reader never sees
    // can-write=true for a document it can't write.
    put(
        &mut attrs,
        "access::can-read",
        Value::new(effective.contains(Permission::Read)),
    );
    put(
        &mut attrs,
        "access::can-write",
        Value::new(effective.contains(Permission::Write)),
    );

    // Changes whenever the file's mtime or size changes; good enough for
    // the caller to detect "this has been written since I last read it".
    let etag = format!("{}:{}", metadata.mtime(), metadata.size());
    put(&mut attrs, "etag::value", Value::new(etag));

    put(&mut attrs, "time::modified", Value::new(metadata.mtime() as u64));
    put(
        &mut attrs,
        "time::modified-usec",
        Value::new((metadata.mtime_nsec() / 1000) as u64),
    );
    put(&mut attrs, "time::access", Value::new(metadata.atime() as u64));
    put(
        &mut attrs,
        "time::access-usec",
        Value::new((metadata.atime_nsec() / 1000) as u64),
    );
    put(&mut attrs, "time::changed", Value::new(metadata.ctime() as u64));
    put(
        &mut attrs,
        "time::changed-usec",
        Value::new((metadata.ctime_nsec() / 1000) as u64),
    );
    if let Ok(created) = metadata.created() {
        if let Ok(since_epoch) = created.duration_since(std::time::UNIX_EPOCH) {
            put(&mut attrs, "time::created", Value::new(since_epoch.as_secs()));
            put(
                &mut attrs,
                "time::created-usec",
                Value::new(since_epoch.subsec_micros() as u64),
            );
        }
    }
    put(&mut attrs, "unix::device", Value::new(metadata.dev()));
    put(&mut attrs, "unix::inode", Value::new(metadata.ino()));
    put(&mut attrs, "unix::mode", Value::new(metadata.mode()));
    put(&mut attrs, "unix::nlink", Value::new(metadata.nlink()));
    put(&mut attrs, "unix::uid", Value::new(metadata.uid()));
    put(&mut attrs, "unix::gid", Value::new(metadata.gid()));

    attrs.retain(|key, _| ALLOWED_ATTRIBUTES.contains(&key.as_str()));
    Ok(attrs)
}

/// A generic themed-icon name for a mime type's top-level category, the way
/// GIO's content-type-to-icon mapping falls back to a generic icon when no
/// more specific one is registered for the type.
fn icon_name_for_mime(content_type: &str) -> String {
    let generic = match content_type.split('/').next().unwrap_or_default() {
        "text" => "text-x-generic",
        "image" => "image-x-generic",
        "audio" => "audio-x-generic",
        "video" => "video-x-generic",
        "application" => "application-x-generic",
        _ => "text-x-generic",
    };
    generic.to_owned()
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::os::fd::AsRawFd;

    use super::*;

    #[test]
    fn staging_file_is_unlinked_and_shares_content() {
        let dir = tempfile::tempdir().unwrap();
        let (mut writable, readonly, staging_path) =
            create_staging_file(dir.path(), "draft.md").unwrap();
        assert!(!staging_path.exists(), "staging file must be unlinked immediately");

        writable.write_all(b"hello").unwrap();
        writable.flush().unwrap();

        let mut readonly = readonly;
        // The writable half and the service's read-only handle point at the
        // same unlinked inode, so a read from the start sees what was
        // written regardless of which fd wrote it.
        use std::io::Seek;
        readonly.seek(std::io::SeekFrom::Start(0)).unwrap();
        let mut buf = String::new();
        readonly.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "hello");
    }

    #[test]
    fn materialize_with_suffix_resolves_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let (first_path, _first) = materialize_with_suffix(dir.path(), "draft.md").unwrap();
        assert_eq!(first_path, dir.path().join("draft.md"));

        let (second_path, _second) = materialize_with_suffix(dir.path(), "draft.md").unwrap();
        assert_eq!(second_path, dir.path().join("draft.md.1"));

        let (third_path, _third) = materialize_with_suffix(dir.path(), "draft.md").unwrap();
        assert_eq!(third_path, dir.path().join("draft.md.2"));
    }

    #[test]
    fn update_table_scopes_ids_per_document() {
        let mut table = UpdateTable::default();
        let doc_a = DocumentId::from("aaaaaa");
        let doc_b = DocumentId::from("bbbbbb");

        let make_update = |dir: &Path| {
            let (_w, readonly, staging_path) = create_staging_file(dir, "x").unwrap();
            let id = readonly.as_raw_fd() as u32;
            (
                id,
                Update {
                    owner: zbus::names::UniqueName::try_from(":1.1").unwrap(),
                    staging_path,
                    readonly_fd: readonly,
                    ensure_create: false,
                },
            )
        };

        let dir = tempfile::tempdir().unwrap();
        let (id_a, update_a) = make_update(dir.path());
        table.insert(&doc_a, id_a, update_a);
        assert!(table.any_pending(&doc_a));
        assert!(!table.any_pending(&doc_b));

        assert!(table.take(&doc_b, id_a).is_none(), "wrong doc must not find it");
        assert!(table.take(&doc_a, id_a).is_some());
        assert!(!table.any_pending(&doc_a), "table entry is dropped once empty");
    }
}
