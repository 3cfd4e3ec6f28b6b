use serde::{Deserialize, Serialize};
use zbus::zvariant::Type;

/// The sandbox identity of a caller, resolved from its PID's cgroup scope.
///
/// The empty string is the owner/host sentinel: an unsandboxed caller.
#[derive(Debug, Clone, Serialize, Deserialize, Type, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppId(String);

impl AppId {
    pub fn host() -> Self {
        Self(String::new())
    }

    pub fn is_host(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AppId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for AppId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for AppId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The id of a document in the document store: 6 characters over `[A-Za-z0-9]`.
#[derive(Debug, Clone, Serialize, Deserialize, Type, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

const ID_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ID_LEN: usize = 6;

/// Draws a fresh random document id. Does not check for collisions; callers
/// retry against the store until a non-colliding id is found.
pub fn random_document_id() -> DocumentId {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let id: String = (0..ID_LEN)
        .map(|_| ID_CHARS[rng.gen_range(0..ID_CHARS.len())] as char)
        .collect();
    DocumentId::from(id)
}
