//! Runtime loader for kpack GPU code-object archives.
//!
//! A converted host binary carries a small embedded marker instead of its
//! device code. This crate parses that marker, resolves archive search
//! paths against the host binary's location (honoring the `ROCM_KPACK_*`
//! environment overrides), memoizes opened archives in a process-level
//! [`Cache`] and searches them architecture-first. The `ffi` module is the
//! C surface the GPU runtime links against.

pub mod binpath;
pub mod cache;
pub mod env;
pub mod ffi;
pub mod marker;
pub mod paths;

pub use cache::Cache;
pub use env::EnvSnapshot;
pub use marker::Marker;

pub use kpack_archive::{Archive, KpackError, Result};

use std::path::Path;

/// Open the archive at `path` and hand each architecture name to
/// `callback`, in TOC order. A `false` return halts the walk. The archive
/// is closed again before returning.
pub fn enumerate_architectures<P, F>(path: P, mut callback: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnMut(&str) -> bool,
{
    let archive = Archive::open(path)?;
    for arch in archive.architectures() {
        if !callback(arch) {
            break;
        }
    }
    Ok(())
}
