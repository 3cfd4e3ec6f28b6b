use zbus::DBusError;

/// Errors the document portal returns to callers, mapped onto the
/// `org.freedesktop.portal.document.*` D-Bus error names.
#[derive(Debug, DBusError, thiserror::Error)]
#[zbus(prefix = "org.freedesktop.portal.document")]
pub enum PortalError {
    /// Internal I/O failure, or any unexpected bus failure. The generic catch-all.
    #[error("{0}")]
    Failed(String),

    /// Caller lacks permission for the requested operation.
    #[error("not allowed: {0}")]
    NotAllowed(String),

    /// Unknown document id, update id, or permission name.
    #[error("not found: {0}")]
    NotFound(String),

    /// `ensure-create` was violated on an already-materialized document.
    #[error("already exists: {0}")]
    Exists(String),

    /// The underlying file is missing on open.
    #[error("no such file: {0}")]
    NoFile(String),

    /// Read/GetInfo was attempted on a still-titled (unmaterialized) document.
    #[error("document not written yet: {0}")]
    NotWritten(String),

    /// Bad fd, bad argument type, or an empty title where one is required.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Delete was attempted while an update is pending on the document.
    #[error("operations pending: {0}")]
    OperationsPending(String),

    #[error(transparent)]
    #[zbus(error)]
    ZBus(zbus::Error),
}

impl From<std::io::Error> for PortalError {
    fn from(err: std::io::Error) -> Self {
        Self::Failed(err.to_string())
    }
}

impl From<nix::Error> for PortalError {
    fn from(err: nix::Error) -> Self {
        Self::Failed(err.to_string())
    }
}
