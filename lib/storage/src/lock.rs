//! Process-wide serialization of access to database files.
//!
//! Every engine call takes a bare path, so the locking discipline lives
//! here: one `RwLock` per canonical path. Mutations (append, tombstone,
//! compact) hold the write side; queries, scans and stats hold the read
//! side, which keeps readers concurrent with each other but excluded
//! while compaction rewrites offsets underneath them.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};

static REGISTRY: OnceLock<Mutex<AHashMap<PathBuf, Arc<RwLock<()>>>>> = OnceLock::new();

/// Fetch (or create) the lock guarding one database file.
pub fn for_path(path: &Path) -> Arc<RwLock<()>> {
    let key = canonical_key(path);
    let registry = REGISTRY.get_or_init(|| Mutex::new(AHashMap::new()));
    let mut map = registry.lock();
    map.entry(key)
        .or_insert_with(|| Arc::new(RwLock::new(())))
        .clone()
}

/// Canonicalize so that aliases of one file share a lock. The file may
/// not exist yet, so fall back to canonicalizing the parent directory.
fn canonical_key(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_path_shares_a_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.vec");
        std::fs::write(&path, b"").unwrap();

        let a = for_path(&path);
        let b = for_path(&dir.path().join(".").join("db.vec"));
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_different_paths_do_not_share() {
        let dir = tempfile::tempdir().unwrap();
        let a = for_path(&dir.path().join("a.vec"));
        let b = for_path(&dir.path().join("b.vec"));
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
