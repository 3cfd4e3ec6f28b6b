use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ids::{AppId, DocumentId};
use crate::store::model::Document;

/// The on-disk schema: three maps, matching the persisted state layout.
/// `apps`/`uris` are reverse indices recomputed from `docs` on load, and
/// kept around in the serialized form only so a crash mid-save still leaves
/// a self-consistent file if the rebuild is ever skipped.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PersistedState {
    pub docs: HashMap<DocumentId, Document>,
}

pub fn load(path: &Path) -> std::io::Result<PersistedState> {
    match std::fs::File::open(path) {
        Ok(file) => {
            let reader = std::io::BufReader::new(file);
            bincode::deserialize_from(reader)
                .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(PersistedState::default()),
        Err(err) => Err(err),
    }
}

/// Writes `state` atomically: serialize into a sibling temp file, fsync,
/// then rename over the destination. The destination is reopened read-only
/// by the caller once this returns.
pub fn save_atomic(path: &Path, state: &PersistedState) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp_path = dir.join(format!(
        ".{}.tmp-{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("main"),
        std::process::id()
    ));

    let encoded = bincode::serialize(state)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    {
        let mut tmp = std::fs::File::create(&tmp_path)?;
        tmp.write_all(&encoded)?;
        tmp.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
