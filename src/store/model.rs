use std::collections::HashMap;

use enumflags2::BitFlags;
use serde::{Deserialize, Serialize};

use crate::ids::AppId;
use crate::permission::{Permission, PermissionBits};

/// A document registry row: a stable id binding a URI to an optional title.
///
/// See crate-level docs for title semantics (existing file vs. promise).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub uri: String,
    pub title: String,
    pub permissions: HashMap<AppId, PermissionBits>,
}

impl Document {
    pub fn new(uri: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            title: title.into(),
            permissions: HashMap::new(),
        }
    }

    pub fn has_title(&self) -> bool {
        !self.title.is_empty()
    }

    /// `has_permissions` per the engine's permission semantics: an empty
    /// app-id (the owning user) always holds every bit.
    pub fn has_permissions(&self, app: &AppId, bits: BitFlags<Permission>) -> bool {
        if app.is_host() {
            return true;
        }
        match self.permissions.get(app) {
            Some(existing) => BitFlags::<Permission>::from(*existing).contains(bits),
            None => bits.is_empty(),
        }
    }

    pub fn effective_permissions(&self, app: &AppId) -> BitFlags<Permission> {
        if app.is_host() {
            return BitFlags::all();
        }
        self.permissions
            .get(app)
            .map(|bits| BitFlags::<Permission>::from(*bits))
            .unwrap_or_else(BitFlags::empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_app_id_always_has_every_bit() {
        let doc = Document::new("file:///home/u/a.txt", "");
        assert!(doc.has_permissions(&AppId::host(), BitFlags::all()));
    }

    #[test]
    fn unknown_app_has_no_permissions() {
        let doc = Document::new("file:///home/u/a.txt", "");
        let app = AppId::from("org.example.App");
        assert!(doc.has_permissions(&app, BitFlags::empty()));
        assert!(!doc.has_permissions(&app, Permission::Read.into()));
        assert_eq!(doc.effective_permissions(&app), BitFlags::empty());
    }

    #[test]
    fn has_permissions_requires_every_requested_bit() {
        let mut doc = Document::new("file:///home/u/a.txt", "");
        let app = AppId::from("org.example.App");
        doc.permissions
            .insert(app.clone(), BitFlags::<Permission>::from(Permission::Read).into());

        assert!(doc.has_permissions(&app, Permission::Read.into()));
        assert!(!doc.has_permissions(&app, Permission::Read | Permission::Write));
    }

    #[test]
    fn has_title_reflects_the_title_field() {
        assert!(!Document::new("file:///home/u/a.txt", "").has_title());
        assert!(Document::new("file:///home/u/docs", "draft.md").has_title());
    }
}
