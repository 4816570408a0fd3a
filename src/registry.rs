//! Scanner Registry (spec.md §4.6). Process-wide owner of every active
//! `DirectoryScanner`, keyed by `"{catalogue_path}##{root_path}"` exactly
//! as `original_source/FileScannerManager.cpp`'s `generateKey` does it.
//! One background `std::thread` per active scanner, joined on removal or
//! process shutdown — the same lifecycle `FileScannerManager`'s
//! `scanner_threads_` vector enforces in its destructor.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use once_cell::sync::Lazy;

use crate::error::IndexError;
use crate::scan_target::ScanTargetStore;
use crate::scanner::{ChangeKind, DirectoryScanner};

fn registry_key(catalogue_path: &Path, root: &Path) -> String {
    format!("{}##{}", catalogue_path.display(), root.display())
}

struct ScannerHandle {
    scanner: Arc<DirectoryScanner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

static REGISTRY: Lazy<Mutex<HashMap<String, Arc<ScannerHandle>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Registers a scanner for `(catalogue_path, root)`. Fails on a duplicate
/// key. Does not start it — call [`start`] separately.
pub fn add(catalogue_path: impl AsRef<Path>, root: impl AsRef<Path>, excluded_patterns: &[String]) -> Result<(), IndexError> {
    let catalogue_path = catalogue_path.as_ref();
    let root = root.as_ref();
    let scanner = DirectoryScanner::open(catalogue_path, root, excluded_patterns)?;
    let key = registry_key(scanner.catalogue_path(), scanner.root());

    let mut map = REGISTRY.lock().expect("registry mutex poisoned");
    if map.contains_key(&key) {
        return Err(IndexError::validation(format!("scanner '{key}' already registered")));
    }
    map.insert(
        key,
        Arc::new(ScannerHandle {
            scanner: Arc::new(scanner),
            worker: Mutex::new(None),
        }),
    );
    Ok(())
}

/// Closes and removes the scanner for `(catalogue_path, root)`. A no-op
/// if it isn't registered.
pub fn remove(catalogue_path: impl AsRef<Path>, root: impl AsRef<Path>) -> Result<(), IndexError> {
    let root = root.as_ref().canonicalize().unwrap_or_else(|_| root.as_ref().to_path_buf());
    let key = registry_key(catalogue_path.as_ref(), &root);

    let handle = {
        let mut map = REGISTRY.lock().expect("registry mutex poisoned");
        map.remove(&key)
    };

    if let Some(handle) = handle {
        handle.scanner.close();
        if let Some(worker) = handle.worker.lock().expect("scanner worker mutex poisoned").take() {
            let _ = worker.join();
        }
    }
    Ok(())
}

/// Spawns a background worker running the scanner's initial full scan,
/// then activates its live-update watcher.
pub fn start(catalogue_path: impl AsRef<Path>, root: impl AsRef<Path>) -> Result<(), IndexError> {
    let root = root.as_ref().canonicalize().map_err(IndexError::FileSystem)?;
    let key = registry_key(catalogue_path.as_ref(), &root);

    let handle = {
        let map = REGISTRY.lock().expect("registry mutex poisoned");
        map.get(&key).cloned()
    };
    let handle = handle.ok_or_else(|| IndexError::validation(format!("no such scanner '{key}'")))?;

    let scanner = Arc::clone(&handle.scanner);
    let worker = std::thread::spawn(move || {
        if let Err(e) = scanner.run_full_scan() {
            log::error!("initial scan failed for {}: {e}", scanner.root().display());
        }
        scanner.activate_watcher();
    });

    *handle.worker.lock().expect("scanner worker mutex poisoned") = Some(worker);
    Ok(())
}

/// Stops accepting live updates for `(catalogue_path, root)`. An
/// in-flight scan is allowed to complete; does not remove the scanner
/// from the registry.
pub fn stop(catalogue_path: impl AsRef<Path>, root: impl AsRef<Path>) -> Result<(), IndexError> {
    let root = root.as_ref().canonicalize().map_err(IndexError::FileSystem)?;
    let key = registry_key(catalogue_path.as_ref(), &root);

    let handle = {
        let map = REGISTRY.lock().expect("registry mutex poisoned");
        map.get(&key).cloned()
    };
    if let Some(handle) = handle {
        handle.scanner.close();
    }
    Ok(())
}

/// Forwards one live notification to every scanner whose `covers(path)`
/// is true. The map mutex is held only long enough to clone out the
/// candidate list, per spec.md §5.
pub fn on_file_change(path: &Path, kind: ChangeKind) {
    let candidates: Vec<Arc<DirectoryScanner>> = {
        let map = REGISTRY.lock().expect("registry mutex poisoned");
        map.values().map(|h| Arc::clone(&h.scanner)).collect()
    };
    for scanner in candidates {
        if scanner.covers(path) {
            scanner.on_change(path, kind);
        }
    }
}

/// Enumerates every user's catalogue file under `base_dir` (one
/// subdirectory per user id, each containing `catalogue.db`), registers
/// a scanner for every active `ScanTarget` found there, and starts each
/// one. Mirrors `original_source/FileScannerManager`'s startup sweep.
pub fn bootstrap(base_dir: impl AsRef<Path>, excluded_patterns: &[String]) -> Result<usize, IndexError> {
    let base_dir = base_dir.as_ref();
    let mut started = 0usize;

    let read_dir = match fs::read_dir(base_dir) {
        Ok(rd) => rd,
        Err(e) => {
            log::warn!("cannot read base directory {}: {e}", base_dir.display());
            return Ok(0);
        }
    };

    for entry in read_dir.flatten() {
        let user_dir = entry.path();
        if !user_dir.is_dir() {
            continue;
        }
        let db_path = user_dir.join("catalogue.db");
        if !db_path.is_file() {
            continue;
        }

        let store = ScanTargetStore::open(&db_path)?;
        for target in store.list(true)? {
            match add(&db_path, &target.directory_path, excluded_patterns) {
                Ok(()) => {
                    start(&db_path, &target.directory_path)?;
                    started += 1;
                }
                Err(e) => log::warn!(
                    "failed to bootstrap scanner for {} @ {}: {e}",
                    db_path.display(),
                    target.directory_path
                ),
            }
        }
    }

    Ok(started)
}

/// Closes every registered scanner and joins its worker thread. Intended
/// for process shutdown.
pub fn shutdown() {
    let handles: Vec<Arc<ScannerHandle>> = {
        let mut map = REGISTRY.lock().expect("registry mutex poisoned");
        map.drain().map(|(_, v)| v).collect()
    };
    for handle in handles {
        handle.scanner.close();
        if let Some(worker) = handle.worker.lock().expect("scanner worker mutex poisoned").take() {
            let _ = worker.join();
        }
    }
}

/// Number of registered scanners. Test/diagnostic use.
pub fn len() -> usize {
    REGISTRY.lock().expect("registry mutex poisoned").len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::tempdir;

    fn patterns() -> Vec<String> {
        crate::scanner::DEFAULT_EXCLUDED_PATTERNS.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    #[serial]
    fn add_rejects_duplicate_key() {
        shutdown();
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir(&root).unwrap();
        let db = dir.path().join("catalogue.db");

        add(&db, &root, &patterns()).unwrap();
        let second = add(&db, &root, &patterns());
        assert!(second.is_err());
        shutdown();
    }

    #[test]
    #[serial]
    fn on_file_change_only_reaches_covering_scanner() {
        shutdown();
        let dir = tempdir().unwrap();
        let root_a = dir.path().join("a");
        let root_b = dir.path().join("b");
        fs::create_dir(&root_a).unwrap();
        fs::create_dir(&root_b).unwrap();
        let db = dir.path().join("catalogue.db");

        add(&db, &root_a, &patterns()).unwrap();
        add(&db, &root_b, &patterns()).unwrap();
        start(&db, &root_a).unwrap();
        start(&db, &root_b).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(100));

        let target = root_a.join("x.txt");
        fs::write(&target, b"hi").unwrap();
        on_file_change(&target, ChangeKind::Create);
        std::thread::sleep(std::time::Duration::from_millis(50));

        let cat = crate::catalogue::FileCatalogue::open(&db).unwrap();
        assert!(cat.get(&target.to_string_lossy()).unwrap().is_some());

        shutdown();
    }

    #[test]
    #[serial]
    fn shutdown_clears_registry() {
        shutdown();
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir(&root).unwrap();
        let db = dir.path().join("catalogue.db");

        add(&db, &root, &patterns()).unwrap();
        assert_eq!(len(), 1);
        shutdown();
        assert_eq!(len(), 0);
    }
}
