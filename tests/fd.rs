use std::io::Write;
use std::os::fd::{AsFd, OwnedFd};

use xdp_document_portal::fd::{copy_fd_to_stream, validate_local_fd, FdKind};

fn open_readonly(path: &std::path::Path) -> std::fs::File {
    std::fs::OpenOptions::new().read(true).open(path).unwrap()
}

#[test]
fn validates_regular_readable_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.txt");
    std::fs::write(&path, b"hi").unwrap();

    let file = open_readonly(&path);
    let resolved = validate_local_fd(file.as_fd(), FdKind::Regular).unwrap();
    assert_eq!(resolved.canonicalize().unwrap(), path.canonicalize().unwrap());
}

#[test]
fn rejects_directory_fd_when_regular_wanted() {
    let dir = tempfile::tempdir().unwrap();
    let file = std::fs::File::open(dir.path()).unwrap();
    assert!(validate_local_fd(file.as_fd(), FdKind::Regular).is_err());
}

#[test]
fn rejects_regular_fd_when_directory_wanted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.txt");
    std::fs::write(&path, b"hi").unwrap();
    let file = open_readonly(&path);
    assert!(validate_local_fd(file.as_fd(), FdKind::Directory).is_err());
}

#[test]
fn rejects_write_only_fd() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.txt");
    let file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .open(&path)
        .unwrap();
    assert!(validate_local_fd(file.as_fd(), FdKind::Regular).is_err());
}

#[test]
fn validates_readable_directory() {
    let dir = tempfile::tempdir().unwrap();
    let file = std::fs::File::open(dir.path()).unwrap();
    let resolved = validate_local_fd(file.as_fd(), FdKind::Directory).unwrap();
    assert_eq!(
        resolved.canonicalize().unwrap(),
        dir.path().canonicalize().unwrap()
    );
}

#[tokio::test]
async fn copies_full_contents_regardless_of_chunking() {
    let dir = tempfile::tempdir().unwrap();
    let src_path = dir.path().join("src.bin");
    let dest_path = dir.path().join("dest.bin");
    let mut src = std::fs::File::create(&src_path).unwrap();
    let payload = vec![7u8; 256 * 1024];
    src.write_all(&payload).unwrap();
    drop(src);

    let file = open_readonly(&src_path);
    let owned: OwnedFd = file.into();
    let dest = tokio::fs::File::create(&dest_path).await.unwrap();

    let copied = copy_fd_to_stream(owned, dest).await.unwrap();
    assert_eq!(copied as usize, payload.len());

    let written = std::fs::read(&dest_path).unwrap();
    assert_eq!(written, payload);
}
