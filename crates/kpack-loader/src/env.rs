//! Process-environment snapshot.
//!
//! All four variables are read exactly once, when a cache is created. The
//! snapshot is immutable afterwards, so later `setenv` calls in the host
//! process never change a live cache, and two caches may carry different
//! snapshots.

use std::env;
use std::ffi::OsStr;
use std::path::PathBuf;

/// Replaces the marker's search paths entirely when set.
pub const ENV_KPACK_PATH: &str = "ROCM_KPACK_PATH";
/// Archive paths tried before the marker's, unless the override is set.
pub const ENV_KPACK_PATH_PREFIX: &str = "ROCM_KPACK_PATH_PREFIX";
/// Truthy value makes every load report `NotImplemented`.
pub const ENV_KPACK_DISABLE: &str = "ROCM_KPACK_DISABLE";
/// Truthy value emits one diagnostic line per load decision point.
pub const ENV_KPACK_DEBUG: &str = "ROCM_KPACK_DEBUG";

#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    pub path_override: Vec<PathBuf>,
    pub path_prefix: Vec<PathBuf>,
    pub disabled: bool,
    pub debug: bool,
}

impl EnvSnapshot {
    pub fn from_process_env() -> EnvSnapshot {
        EnvSnapshot {
            path_override: split_path_list(env::var_os(ENV_KPACK_PATH).as_deref()),
            path_prefix: split_path_list(env::var_os(ENV_KPACK_PATH_PREFIX).as_deref()),
            disabled: is_truthy(env::var_os(ENV_KPACK_DISABLE).as_deref()),
            debug: is_truthy(env::var_os(ENV_KPACK_DEBUG).as_deref()),
        }
    }
}

/// Split on the platform path separator (`:` on POSIX, `;` on Windows),
/// discarding empty components.
fn split_path_list(value: Option<&OsStr>) -> Vec<PathBuf> {
    match value {
        Some(list) => env::split_paths(list)
            .filter(|p| !p.as_os_str().is_empty())
            .collect(),
        None => Vec::new(),
    }
}

/// Set AND non-empty AND first byte not `'0'`.
fn is_truthy(value: Option<&OsStr>) -> bool {
    match value {
        Some(v) => {
            let bytes = v.as_encoded_bytes();
            !bytes.is_empty() && bytes[0] != b'0'
        }
        None => false,
    }
}
