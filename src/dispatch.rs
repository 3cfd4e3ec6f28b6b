use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use enumflags2::BitFlags;
use tokio::sync::Mutex;
use zbus::fdo::{DBusProxy, RequestNameFlags};

use crate::app_id::AppIdResolver;
use crate::config::{self, WELL_KNOWN_NAME};
use crate::document::UpdateTable;
use crate::portal::PortalInterface;
use crate::store::DocumentStore;

/// Process-wide state passed by reference to every interface method; no
/// global mutable state anywhere else.
pub struct ServiceState {
    pub connection: zbus::Connection,
    pub store: Mutex<DocumentStore>,
    pub updates: Mutex<UpdateTable>,
    pub app_id_resolver: Arc<AppIdResolver>,
    save_timer_armed: AtomicBool,
    /// Fires once, when the bus connection is observed to have gone away
    /// (the `NameOwnerChanged` signal stream ending). `main` awaits this
    /// alongside termination signals to run a final `Save` before exit.
    closed: tokio::sync::Notify,
}

impl ServiceState {
    /// Arms a one-shot 10-second flush on the first dirty transition; later
    /// mutations before the timer fires do not re-arm it.
    pub fn schedule_save(self: &Arc<Self>) {
        if self
            .save_timer_armed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let state = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(config::SAVE_DEBOUNCE).await;
            state.save_timer_armed.store(false, Ordering::Release);
            state.flush_now().await;
        });
    }

    pub async fn flush_now(&self) {
        let mut store = self.store.lock().await;
        if !store.is_dirty() {
            return;
        }
        if let Err(err) = store.save() {
            tracing::warn!("document store save failed: {err}");
        } else {
            tracing::debug!("document store flushed");
        }
    }

    /// Resolves once the bus connection has been observed closing. `main`
    /// selects on this to trigger the "Save on bus-connection close"
    /// shutdown flush.
    pub async fn connection_closed(&self) {
        self.closed.notified().await;
    }
}

/// Owns bus name acquisition, portal object export, and the
/// `NameOwnerChanged` subscription that invalidates the app-id cache.
pub struct Builder {
    name: String,
    store_path: Option<PathBuf>,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            name: WELL_KNOWN_NAME.to_owned(),
            store_path: None,
        }
    }

    pub fn with_store_path(mut self, path: PathBuf) -> Self {
        self.store_path = Some(path);
        self
    }

    pub async fn build(self) -> crate::Result<Arc<ServiceState>> {
        let connection = zbus::Connection::session().await?;

        let store_path = self.store_path.unwrap_or_else(config::store_path);
        let store = DocumentStore::load(store_path)?;

        let state = Arc::new(ServiceState {
            connection: connection.clone(),
            store: Mutex::new(store),
            updates: Mutex::new(UpdateTable::default()),
            app_id_resolver: AppIdResolver::new(connection.clone()),
            save_timer_armed: AtomicBool::new(false),
            closed: tokio::sync::Notify::new(),
        });

        let portal = PortalInterface {
            state: state.clone(),
        };
        connection
            .object_server()
            .at(config::PORTAL_PATH, portal)
            .await?;

        for existing in state.store.lock().await.list_docs() {
            let iface = crate::document::DocumentInterface {
                state: state.clone(),
                id: existing.clone(),
            };
            connection
                .object_server()
                .at(config::document_path(&existing), iface)
                .await?;
        }

        spawn_name_owner_watch(state.clone(), connection.clone()).await?;

        // No queueing, no stealing: a second instance simply fails to
        // acquire the name and exits, the same way the original service's
        // `g_bus_own_name` call (`G_BUS_NAME_OWNER_FLAGS_NONE`) treats
        // losing the name race as fatal rather than replacing the owner.
        let flags = BitFlags::from(RequestNameFlags::DoNotQueue);
        connection
            .request_name_with_flags(WELL_KNOWN_NAME, flags)
            .await?;
        tracing::info!("acquired {}", self.name);

        Ok(state)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

async fn spawn_name_owner_watch(
    state: Arc<ServiceState>,
    connection: zbus::Connection,
) -> zbus::Result<()> {
    let dbus_proxy = DBusProxy::new(&connection).await?;
    let mut stream = dbus_proxy.receive_name_owner_changed().await?;
    tokio::spawn(async move {
        use futures_util::StreamExt;
        while let Some(signal) = stream.next().await {
            let Ok(args) = signal.args() else { continue };
            if args.new_owner.is_none() {
                if let Ok(unique) = zbus::names::UniqueName::try_from(args.name.as_str()) {
                    state.app_id_resolver.on_name_vanished(&unique).await;
                }
            }
        }
        // The stream only ends when the underlying connection is dropped;
        // treat that as the bus connection closing.
        tracing::debug!("bus connection closed");
        state.closed.notify_one();
    });
    Ok(())
}
