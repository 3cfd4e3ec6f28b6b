use std::os::fd::{AsFd, AsRawFd, OwnedFd as StdOwnedFd};
use std::sync::Arc;

use zbus::zvariant;

use crate::config;
use crate::dispatch::ServiceState;
use crate::document::DocumentInterface;
use crate::error::PortalError;
use crate::fd::{validate_local_fd, FdKind};
use crate::ids::DocumentId;
use crate::permission::Permission;

pub struct PortalInterface {
    pub state: Arc<ServiceState>,
}

impl PortalInterface {
    async fn require_host_caller(
        &self,
        header: &zbus::message::Header<'_>,
    ) -> Result<(), PortalError> {
        let sender = header
            .sender()
            .ok_or_else(|| PortalError::Failed("anonymous sender".into()))?;
        let app_id = self.state.app_id_resolver.resolve(sender).await?;
        if !app_id.is_host() {
            return Err(PortalError::NotAllowed(
                "sandboxed callers may not mutate the top-level registry".into(),
            ));
        }
        Ok(())
    }

    /// Registers the per-document object. `ObjectServer::at` itself reports
    /// "there's already an interface at this path" as `Ok(false)`, not an
    /// error, so a document reused by an idempotent `Add`/`AddLocal` simply
    /// returns `Ok(false)` here; any `Err` is a genuine registration
    /// failure and must propagate rather than being swallowed.
    async fn register_document_object(&self, id: &DocumentId) -> Result<bool, PortalError> {
        let iface = DocumentInterface {
            state: self.state.clone(),
            id: id.clone(),
        };
        self.state
            .connection
            .object_server()
            .at(config::document_path(id), iface)
            .await
            .map_err(|err| PortalError::Failed(err.to_string()))
    }

    /// Grants the caller `grant-permissions|read` (and `write` if the fd was
    /// opened O_RDWR) on a newly created document, when the caller is a
    /// sandboxed app. Unsandboxed callers already hold implicit full access.
    async fn implicit_local_grant(
        &self,
        id: &DocumentId,
        app_id: &crate::ids::AppId,
        writable: bool,
    ) {
        if app_id.is_host() {
            return;
        }
        let mut bits = Permission::Read | Permission::GrantPermissions;
        if writable {
            bits |= Permission::Write;
        }
        let mut store = self.state.store.lock().await;
        store.set_permissions(id, app_id, bits, true);
        drop(store);
        self.state.schedule_save();
    }
}

#[zbus::interface(name = "org.freedesktop.portal.DocumentPortal")]
impl PortalInterface {
    async fn add(
        &self,
        #[zbus(header)] header: zbus::message::Header<'_>,
        uri: &str,
    ) -> Result<String, PortalError> {
        self.require_host_caller(&header).await?;

        let mut store = self.state.store.lock().await;
        let id = store.create_doc(uri, "");
        drop(store);
        self.state.schedule_save();
        self.register_document_object(&id).await?;
        Ok(id.to_string())
    }

    async fn add_local(
        &self,
        #[zbus(header)] header: zbus::message::Header<'_>,
        fd: zvariant::OwnedFd,
    ) -> Result<String, PortalError> {
        let sender = header
            .sender()
            .ok_or_else(|| PortalError::Failed("anonymous sender".into()))?;
        let app_id = self.state.app_id_resolver.resolve(sender).await?;

        let std_fd: StdOwnedFd = fd.into();
        let path = validate_local_fd(std_fd.as_fd(), FdKind::Regular)?;
        let writable = is_writable(&std_fd);

        let uri = format!("file://{}", path.display());
        let mut store = self.state.store.lock().await;
        let id = store.create_doc(&uri, "");
        drop(store);
        self.state.schedule_save();

        self.register_document_object(&id).await?;
        self.implicit_local_grant(&id, &app_id, writable).await;
        Ok(id.to_string())
    }

    async fn new(
        &self,
        #[zbus(header)] header: zbus::message::Header<'_>,
        base_uri: &str,
        title: &str,
    ) -> Result<String, PortalError> {
        self.require_host_caller(&header).await?;
        if title.is_empty() {
            return Err(PortalError::InvalidArgument("title must not be empty".into()));
        }

        let mut store = self.state.store.lock().await;
        let id = store.create_doc(base_uri, title);
        drop(store);
        self.state.schedule_save();
        self.register_document_object(&id).await?;
        Ok(id.to_string())
    }

    async fn new_local(
        &self,
        #[zbus(header)] header: zbus::message::Header<'_>,
        dir_fd: zvariant::OwnedFd,
        title: &str,
    ) -> Result<String, PortalError> {
        if title.is_empty() {
            return Err(PortalError::InvalidArgument("title must not be empty".into()));
        }
        let sender = header
            .sender()
            .ok_or_else(|| PortalError::Failed("anonymous sender".into()))?;
        let app_id = self.state.app_id_resolver.resolve(sender).await?;

        let std_fd: StdOwnedFd = dir_fd.into();
        let path = validate_local_fd(std_fd.as_fd(), FdKind::Directory)?;
        let writable = is_writable(&std_fd);

        let uri = format!("file://{}", path.display());
        let mut store = self.state.store.lock().await;
        let id = store.create_doc(&uri, title);
        drop(store);
        self.state.schedule_save();

        self.register_document_object(&id).await?;
        self.implicit_local_grant(&id, &app_id, writable).await;
        Ok(id.to_string())
    }

    async fn remove(
        &self,
        #[zbus(header)] header: zbus::message::Header<'_>,
        id: &str,
    ) -> Result<(), PortalError> {
        self.require_host_caller(&header).await?;
        let doc_id = DocumentId::from(id);

        let mut store = self.state.store.lock().await;
        if !store.delete_doc(&doc_id) {
            return Err(PortalError::NotFound(id.to_owned()));
        }
        drop(store);
        self.state.schedule_save();

        let object_server = self.state.connection.object_server();
        let _ = object_server
            .remove::<DocumentInterface, _>(config::document_path(&doc_id))
            .await;
        Ok(())
    }
}

fn is_writable(fd: &StdOwnedFd) -> bool {
    let raw = fd.as_raw_fd();
    match nix::fcntl::fcntl(raw, nix::fcntl::FcntlArg::F_GETFL) {
        Ok(flags) => {
            let flags = nix::fcntl::OFlag::from_bits_truncate(flags);
            matches!(
                flags & nix::fcntl::OFlag::O_ACCMODE,
                nix::fcntl::OFlag::O_RDWR
            )
        }
        Err(_) => false,
    }
}
