use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::path::PathBuf;

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::stat::{lstat, SFlag};
use nix::unistd::readlink;
use tokio::io::AsyncWriteExt;

use crate::error::PortalError;

/// The kind of filesystem object a caller-supplied fd is required to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdKind {
    Regular,
    Directory,
}

fn invalid_fd() -> PortalError {
    PortalError::InvalidArgument("invalid fd".to_owned())
}

/// Validates a caller-supplied fd and resolves the absolute host path it
/// refers to, without ever surfacing *why* validation failed to the caller.
///
/// 1. `fstat` must succeed and match the required kind.
/// 2. The fd's access mode must be readable (not write-only).
/// 3. `/proc/self/fd/<n>` resolves, via `readlink`, to a path.
/// 4. `lstat` of that path must report the same (dev, ino) as the fd's `fstat`.
pub fn validate_local_fd(fd: BorrowedFd<'_>, want_kind: FdKind) -> Result<PathBuf, PortalError> {
    let raw = fd.as_raw_fd();

    let st = nix::sys::stat::fstat(raw).map_err(|_| invalid_fd())?;
    let mode = SFlag::from_bits_truncate(st.st_mode);
    let kind_ok = match want_kind {
        FdKind::Regular => mode.contains(SFlag::S_IFREG),
        FdKind::Directory => mode.contains(SFlag::S_IFDIR),
    };
    if !kind_ok {
        return Err(invalid_fd());
    }

    let flags = fcntl(raw, FcntlArg::F_GETFL).map_err(|_| invalid_fd())?;
    let flags = OFlag::from_bits_truncate(flags);
    let access = flags & OFlag::O_ACCMODE;
    if access == OFlag::O_WRONLY {
        return Err(invalid_fd());
    }

    let proc_path = PathBuf::from(format!("/proc/self/fd/{raw}"));
    let resolved = readlink(&proc_path).map_err(|_| invalid_fd())?;
    let resolved = PathBuf::from(resolved);

    let path_st = lstat(&resolved).map_err(|_| invalid_fd())?;
    if path_st.st_dev != st.st_dev || path_st.st_ino != st.st_ino {
        return Err(invalid_fd());
    }

    Ok(resolved)
}

/// Streams the full contents of an already-open, caller-owned fd into an
/// async writer. Does not close either end; EOF on the read side ends the
/// copy cleanly.
pub async fn copy_fd_to_stream<W>(fd: OwnedFd, mut out: W) -> Result<u64, PortalError>
where
    W: AsyncWriteExt + Unpin,
{
    let file = tokio::fs::File::from_std(std::fs::File::from(fd));
    let mut file = file;
    let copied = tokio::io::copy(&mut file, &mut out).await?;
    out.flush().await?;
    Ok(copied)
}

/// Reopens a raw fd read-only via `/proc/self/fd/<n>`, used to obtain the
/// service's own stable handle onto an unlinked staging file.
pub fn reopen_read_only(raw: RawFd) -> std::io::Result<std::fs::File> {
    let proc_path = format!("/proc/self/fd/{raw}");
    std::fs::OpenOptions::new().read(true).open(proc_path)
}
