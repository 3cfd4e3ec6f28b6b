use std::path::PathBuf;

/// Resolves the on-disk location of the document store's persisted database
/// file, honoring `XDG_DATA_HOME` the way the original service honors
/// `g_get_user_data_dir()`.
pub fn store_path() -> PathBuf {
    let data_home = dirs::data_dir().unwrap_or_else(|| PathBuf::from(".local/share"));
    data_home.join("xdg-document-portal").join("main")
}

pub const WELL_KNOWN_NAME: &str = "org.freedesktop.portal.DocumentPortal";
pub const PORTAL_PATH: &str = "/org/freedesktop/portal/document";
pub const PORTAL_INTERFACE: &str = "org.freedesktop.portal.DocumentPortal";
pub const DOCUMENT_INTERFACE: &str = "org.freedesktop.portal.Document";

pub fn document_path(id: &crate::ids::DocumentId) -> zbus::zvariant::ObjectPath<'static> {
    zbus::zvariant::ObjectPath::try_from(format!("{PORTAL_PATH}/{id}"))
        .expect("document id is always a valid path segment")
        .into_owned()
}

/// Debounce window between the first dirty mutation and the scheduled flush.
pub const SAVE_DEBOUNCE: std::time::Duration = std::time::Duration::from_secs(10);
