//! The process-wide archive cache and the load operation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use kpack_archive::{Archive, KpackError, Result};

use crate::env::{EnvSnapshot, ENV_KPACK_DISABLE, ENV_KPACK_PATH, ENV_KPACK_PATH_PREFIX};
use crate::marker::Marker;
use crate::paths::{canonical_key, is_regular_file, resolve_marker_path};

/// Emit one diagnostic line when the cache's snapshotted debug flag is on.
macro_rules! kdebug {
    ($cache:expr, $($arg:tt)*) => {
        if $cache.env.debug {
            tracing::debug!(target: "kpack", $($arg)*);
        }
    };
}

/// Memoizes opened archives and answers load requests.
///
/// The environment snapshot is taken at construction and never refreshed.
/// The mutex guards only the two maps; it is released before any kernel is
/// fetched, so fetches from distinct archives run concurrently while other
/// threads keep populating the cache.
pub struct Cache {
    env: EnvSnapshot,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    /// Canonical archive path -> open handle.
    archives: FxHashMap<PathBuf, Arc<Archive>>,
    /// Canonical archive path -> architectures it advertises, derived once
    /// at open time so the arch-first search never re-queries the archive.
    archive_archs: FxHashMap<PathBuf, FxHashSet<String>>,
}

impl Cache {
    /// Snapshot the process environment and start with empty maps.
    pub fn new() -> Cache {
        Cache::with_env(EnvSnapshot::from_process_env())
    }

    /// Build a cache around an explicit snapshot.
    pub fn with_env(env: EnvSnapshot) -> Cache {
        let cache = Cache {
            env,
            inner: Mutex::new(CacheInner::default()),
        };
        kdebug!(
            cache,
            "cache created: disabled={}, debug={}, override_paths={}, prefix_paths={}",
            cache.env.disabled,
            cache.env.debug,
            cache.env.path_override.len(),
            cache.env.path_prefix.len()
        );
        cache
    }

    pub fn env(&self) -> &EnvSnapshot {
        &self.env
    }

    /// Number of archives currently memoized.
    pub fn cached_archive_count(&self) -> usize {
        self.inner.lock().archives.len()
    }

    /// Load the code object named by an embedded marker for the first
    /// architecture in `arch_list` found in any reachable archive.
    ///
    /// `metadata` is the marker bytes (the decoder stops at the encoded
    /// end, so a generous window is fine); `binary_path` is the host
    /// binary's file path, used to resolve relative marker paths;
    /// `arch_list` is ordered by descending priority.
    pub fn load_code_object(
        &self,
        metadata: &[u8],
        binary_path: &Path,
        arch_list: &[&str],
    ) -> Result<Vec<u8>> {
        if arch_list.is_empty() {
            return Err(KpackError::InvalidArgument);
        }

        if self.env.disabled {
            kdebug!(self, "loading disabled via {ENV_KPACK_DISABLE}");
            return Err(KpackError::NotImplemented);
        }

        let marker = match Marker::decode(metadata) {
            Ok(marker) => marker,
            Err(err) => {
                kdebug!(self, "failed to parse embedded marker: {err}");
                return Err(err);
            }
        };
        kdebug!(
            self,
            "marker parsed: kernel_name='{}', {} search paths",
            marker.kernel_name,
            marker.search_paths.len()
        );

        let search_paths = self.effective_search_paths(&marker, binary_path);

        let valid = self.open_and_memoize(&search_paths);
        if valid.is_empty() {
            kdebug!(
                self,
                "no loadable archive among {} search paths",
                search_paths.len()
            );
            return Err(KpackError::ArchiveNotFound);
        }

        self.arch_first_search(&marker, arch_list, &valid)
    }

    /// Override list wins outright; otherwise prefix paths come first and
    /// marker paths are resolved against the host binary.
    fn effective_search_paths(&self, marker: &Marker, binary_path: &Path) -> Vec<PathBuf> {
        if !self.env.path_override.is_empty() {
            kdebug!(
                self,
                "using {ENV_KPACK_PATH} override: {} paths",
                self.env.path_override.len()
            );
            return self.env.path_override.clone();
        }

        let mut search_paths = self.env.path_prefix.clone();
        if !search_paths.is_empty() {
            kdebug!(
                self,
                "prepending {} paths from {ENV_KPACK_PATH_PREFIX}",
                search_paths.len()
            );
        }

        for marker_path in &marker.search_paths {
            let resolved = resolve_marker_path(binary_path, marker_path);
            kdebug!(
                self,
                "resolved search path: {} -> {}",
                marker_path,
                resolved.display()
            );
            search_paths.push(resolved);
        }

        search_paths
    }

    /// Open every not-yet-cached path that exists, memoize the handle and
    /// its architecture set, and return the canonical paths now known to
    /// be valid, in search order. Per-path failures are skipped.
    fn open_and_memoize(&self, search_paths: &[PathBuf]) -> Vec<PathBuf> {
        let mut valid: Vec<PathBuf> = Vec::new();
        let mut inner = self.inner.lock();

        for path in search_paths {
            let key = canonical_key(path);
            if valid.contains(&key) {
                continue;
            }

            if inner.archives.contains_key(&key) {
                valid.push(key);
                continue;
            }

            if !is_regular_file(path) {
                kdebug!(self, "archive not found: {}", path.display());
                continue;
            }

            match Archive::open(path) {
                Ok(archive) => {
                    kdebug!(
                        self,
                        "opened and cached archive: {} ({} architectures)",
                        path.display(),
                        archive.architecture_count()
                    );
                    let archs: FxHashSet<String> =
                        archive.architectures().iter().cloned().collect();
                    inner.archive_archs.insert(key.clone(), archs);
                    inner.archives.insert(key.clone(), Arc::new(archive));
                    valid.push(key);
                }
                Err(err) => {
                    kdebug!(self, "failed to open archive {}: {}", path.display(), err);
                }
            }
        }

        valid
    }

    /// Outer loop architecture, inner loop archive: the highest-priority
    /// architecture wins even when it only appears in a later archive.
    fn arch_first_search(
        &self,
        marker: &Marker,
        arch_list: &[&str],
        valid: &[PathBuf],
    ) -> Result<Vec<u8>> {
        for arch in arch_list {
            kdebug!(self, "trying architecture: {arch}");

            for key in valid {
                // Map lookups only under the lock; the fetch runs outside it.
                let archive = {
                    let inner = self.inner.lock();
                    match inner.archive_archs.get(key) {
                        Some(archs) if archs.contains(*arch) => inner.archives.get(key).cloned(),
                        _ => None,
                    }
                };
                let Some(archive) = archive else {
                    continue;
                };
                kdebug!(self, "  archive {} has architecture", key.display());

                match archive.get_kernel(&marker.kernel_name, arch) {
                    Ok(code_object) => {
                        kdebug!(
                            self,
                            "  loaded code object: {} bytes ('{}' @ {arch})",
                            code_object.len(),
                            marker.kernel_name
                        );
                        return Ok(code_object);
                    }
                    Err(KpackError::KernelNotFound) => {
                        kdebug!(self, "  kernel not found in this archive");
                    }
                    Err(err) => {
                        kdebug!(self, "  error getting kernel: {err}");
                        return Err(err);
                    }
                }
            }
        }

        kdebug!(self, "no matching architecture found in any archive");
        Err(KpackError::ArchNotFound)
    }
}

impl Default for Cache {
    fn default() -> Cache {
        Cache::new()
    }
}
