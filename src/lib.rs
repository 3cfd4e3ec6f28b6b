//! Per-user session-bus service brokering sandboxed file access through
//! opaque document handles.
//!
//! See [`dispatch::Builder`] for bootstrapping, [`portal::PortalInterface`]
//! for the top-level `Add`/`AddLocal`/`New`/`NewLocal`/`Remove` surface, and
//! [`document::DocumentInterface`] for the per-document `Read`/`GetInfo`/
//! `PrepareUpdate`/`FinishUpdate`/`AbortUpdate`/`GrantPermissions`/
//! `RevokePermissions`/`Delete` surface.

pub mod app_id;
pub mod config;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod fd;
pub mod ids;
pub mod permission;
pub mod portal;
pub mod store;

/// Bootstrap-time failures: bad bus connection, unreadable/uncreatable
/// store file. Distinct from [`error::PortalError`], which is the
/// D-Bus-facing error surfaced to callers once the service is running.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Zbus(zbus::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "i/o error: {err}"),
            Self::Zbus(err) => write!(f, "zbus error: {err}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<zbus::Error> for Error {
    fn from(err: zbus::Error) -> Self {
        Self::Zbus(err)
    }
}
