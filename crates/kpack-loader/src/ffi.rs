//! C ABI.
//!
//! Mirrors the `kpack.h` surface: opaque heap-owned handles, out-parameter
//! returns, and a closed set of numeric status codes. Kernel buffers are
//! `malloc`'d copies owned by the caller and released through
//! [`kpack_free_code_object`]; enumeration accessors hand out pointers that
//! stay valid until the owning handle is closed.

use std::ffi::{c_char, c_void, CStr, CString};
use std::path::Path;
use std::ptr;
use std::slice;

use kpack_archive::{Archive, KpackError};

use crate::binpath::discover_binary_path;
use crate::cache::Cache;
use crate::env::EnvSnapshot;
use crate::marker::MAX_METADATA_LEN;

/// Status codes returned by every entry point. Values are ABI-stable.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KpackStatus {
    Success = 0,
    InvalidArgument = 1,
    FileNotFound = 2,
    InvalidFormat = 3,
    UnsupportedVersion = 4,
    KernelNotFound = 5,
    DecompressionFailed = 6,
    OutOfMemory = 7,
    NotImplemented = 8,
    Io = 9,
    MsgpackParseFailed = 10,
    InvalidMetadata = 11,
    ArchiveNotFound = 12,
    ArchNotFound = 13,
    PathDiscoveryFailed = 14,
}

impl From<KpackError> for KpackStatus {
    fn from(err: KpackError) -> KpackStatus {
        match err {
            KpackError::InvalidArgument => KpackStatus::InvalidArgument,
            KpackError::FileNotFound => KpackStatus::FileNotFound,
            KpackError::InvalidFormat => KpackStatus::InvalidFormat,
            KpackError::UnsupportedVersion => KpackStatus::UnsupportedVersion,
            KpackError::KernelNotFound => KpackStatus::KernelNotFound,
            KpackError::DecompressionFailed => KpackStatus::DecompressionFailed,
            KpackError::OutOfMemory => KpackStatus::OutOfMemory,
            KpackError::NotImplemented => KpackStatus::NotImplemented,
            KpackError::Io => KpackStatus::Io,
            KpackError::MsgpackParseFailed => KpackStatus::MsgpackParseFailed,
            KpackError::InvalidMetadata => KpackStatus::InvalidMetadata,
            KpackError::ArchiveNotFound => KpackStatus::ArchiveNotFound,
            KpackError::ArchNotFound => KpackStatus::ArchNotFound,
            KpackError::PathDiscoveryFailed => KpackStatus::PathDiscoveryFailed,
        }
    }
}

/// Opaque archive handle. Holds NUL-terminated copies of the enumeration
/// strings so accessors can return `const char*` with handle lifetime.
pub struct KpackArchive {
    archive: Archive,
    arch_names: Vec<CString>,
    binary_names: Vec<CString>,
}

/// Opaque cache handle.
pub struct KpackCache {
    cache: Cache,
}

/// Per-architecture enumeration callback; returning `false` halts.
pub type KpackArchCallback =
    unsafe extern "C" fn(arch: *const c_char, user_data: *mut c_void) -> bool;

fn to_cstrings(names: &[String]) -> Vec<CString> {
    names
        .iter()
        // A TOC string with an interior NUL cannot cross the C boundary;
        // it is surfaced as an empty string rather than poisoning the open.
        .map(|name| CString::new(name.as_str()).unwrap_or_default())
        .collect()
}

/// Copy `bytes` into a `malloc`'d buffer the caller frees with
/// [`kpack_free_code_object`].
unsafe fn copy_to_malloc(bytes: &[u8]) -> Option<*mut c_void> {
    let ptr = libc::malloc(bytes.len().max(1));
    if ptr.is_null() {
        return None;
    }
    ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
    Some(ptr)
}

#[no_mangle]
pub unsafe extern "C" fn kpack_open(
    path: *const c_char,
    archive_out: *mut *mut KpackArchive,
) -> KpackStatus {
    if path.is_null() || archive_out.is_null() {
        return KpackStatus::InvalidArgument;
    }
    let path = match CStr::from_ptr(path).to_str() {
        Ok(path) => path,
        Err(_) => return KpackStatus::InvalidArgument,
    };

    match Archive::open(Path::new(path)) {
        Ok(archive) => {
            let arch_names = to_cstrings(archive.architectures());
            let binary_names = to_cstrings(archive.binaries());
            *archive_out = Box::into_raw(Box::new(KpackArchive {
                archive,
                arch_names,
                binary_names,
            }));
            KpackStatus::Success
        }
        Err(err) => err.into(),
    }
}

#[no_mangle]
pub unsafe extern "C" fn kpack_close(archive: *mut KpackArchive) {
    if !archive.is_null() {
        drop(Box::from_raw(archive));
    }
}

#[no_mangle]
pub unsafe extern "C" fn kpack_get_architecture_count(
    archive: *const KpackArchive,
    count: *mut usize,
) -> KpackStatus {
    if archive.is_null() || count.is_null() {
        return KpackStatus::InvalidArgument;
    }
    *count = (*archive).arch_names.len();
    KpackStatus::Success
}

#[no_mangle]
pub unsafe extern "C" fn kpack_get_architecture(
    archive: *const KpackArchive,
    index: usize,
    arch: *mut *const c_char,
) -> KpackStatus {
    if archive.is_null() || arch.is_null() {
        return KpackStatus::InvalidArgument;
    }
    match (&(*archive).arch_names).get(index) {
        Some(name) => {
            *arch = name.as_ptr();
            KpackStatus::Success
        }
        None => KpackStatus::InvalidArgument,
    }
}

#[no_mangle]
pub unsafe extern "C" fn kpack_get_binary_count(
    archive: *const KpackArchive,
    count: *mut usize,
) -> KpackStatus {
    if archive.is_null() || count.is_null() {
        return KpackStatus::InvalidArgument;
    }
    *count = (*archive).binary_names.len();
    KpackStatus::Success
}

#[no_mangle]
pub unsafe extern "C" fn kpack_get_binary(
    archive: *const KpackArchive,
    index: usize,
    binary: *mut *const c_char,
) -> KpackStatus {
    if archive.is_null() || binary.is_null() {
        return KpackStatus::InvalidArgument;
    }
    match (&(*archive).binary_names).get(index) {
        Some(name) => {
            *binary = name.as_ptr();
            KpackStatus::Success
        }
        None => KpackStatus::InvalidArgument,
    }
}

#[no_mangle]
pub unsafe extern "C" fn kpack_get_kernel(
    archive: *const KpackArchive,
    binary_name: *const c_char,
    arch: *const c_char,
    kernel_data: *mut *mut c_void,
    kernel_size: *mut usize,
) -> KpackStatus {
    if archive.is_null()
        || binary_name.is_null()
        || arch.is_null()
        || kernel_data.is_null()
        || kernel_size.is_null()
    {
        return KpackStatus::InvalidArgument;
    }
    let (Ok(binary_name), Ok(arch)) = (
        CStr::from_ptr(binary_name).to_str(),
        CStr::from_ptr(arch).to_str(),
    ) else {
        return KpackStatus::InvalidArgument;
    };

    match (*archive).archive.get_kernel(binary_name, arch) {
        Ok(bytes) => match copy_to_malloc(&bytes) {
            Some(ptr) => {
                *kernel_data = ptr;
                *kernel_size = bytes.len();
                KpackStatus::Success
            }
            None => KpackStatus::OutOfMemory,
        },
        Err(err) => err.into(),
    }
}

#[no_mangle]
pub unsafe extern "C" fn kpack_free_code_object(code_object: *mut c_void) {
    if !code_object.is_null() {
        libc::free(code_object);
    }
}

#[no_mangle]
pub unsafe extern "C" fn kpack_cache_create(cache_out: *mut *mut KpackCache) -> KpackStatus {
    if cache_out.is_null() {
        return KpackStatus::InvalidArgument;
    }

    let env = EnvSnapshot::from_process_env();
    if env.debug {
        // Route the kpack debug lines to stderr for hosts that never
        // install a subscriber of their own; a subscriber that is already
        // in place wins.
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(std::io::stderr)
            .try_init();
    }

    *cache_out = Box::into_raw(Box::new(KpackCache {
        cache: Cache::with_env(env),
    }));
    KpackStatus::Success
}

#[no_mangle]
pub unsafe extern "C" fn kpack_cache_destroy(cache: *mut KpackCache) {
    if !cache.is_null() {
        drop(Box::from_raw(cache));
    }
}

#[no_mangle]
pub unsafe extern "C" fn kpack_load_code_object(
    cache: *const KpackCache,
    metadata: *const c_void,
    binary_path: *const c_char,
    arch_list: *const *const c_char,
    arch_count: usize,
    code_object_out: *mut *mut c_void,
    code_object_size_out: *mut usize,
) -> KpackStatus {
    if cache.is_null()
        || metadata.is_null()
        || binary_path.is_null()
        || arch_list.is_null()
        || arch_count == 0
        || code_object_out.is_null()
        || code_object_size_out.is_null()
    {
        return KpackStatus::InvalidArgument;
    }

    // The marker carries no length; give the decoder a bounded window and
    // let it stop at the encoded end. The transformed binary keeps the
    // marker section well inside mapped memory.
    let metadata = slice::from_raw_parts(metadata as *const u8, MAX_METADATA_LEN);

    let Ok(binary_path) = CStr::from_ptr(binary_path).to_str() else {
        return KpackStatus::InvalidArgument;
    };

    let mut arches: Vec<&str> = Vec::with_capacity(arch_count);
    for &entry in slice::from_raw_parts(arch_list, arch_count) {
        if entry.is_null() {
            continue;
        }
        if let Ok(arch) = CStr::from_ptr(entry).to_str() {
            arches.push(arch);
        }
    }
    if arches.is_empty() {
        return KpackStatus::InvalidArgument;
    }

    match (*cache)
        .cache
        .load_code_object(metadata, Path::new(binary_path), &arches)
    {
        Ok(bytes) => match copy_to_malloc(&bytes) {
            Some(ptr) => {
                *code_object_out = ptr;
                *code_object_size_out = bytes.len();
                KpackStatus::Success
            }
            None => KpackStatus::OutOfMemory,
        },
        Err(err) => err.into(),
    }
}

#[no_mangle]
pub unsafe extern "C" fn kpack_enumerate_architectures(
    archive_path: *const c_char,
    callback: Option<KpackArchCallback>,
    user_data: *mut c_void,
) -> KpackStatus {
    let Some(callback) = callback else {
        return KpackStatus::InvalidArgument;
    };
    if archive_path.is_null() {
        return KpackStatus::InvalidArgument;
    }
    let Ok(archive_path) = CStr::from_ptr(archive_path).to_str() else {
        return KpackStatus::InvalidArgument;
    };

    match Archive::open(Path::new(archive_path)) {
        Ok(archive) => {
            for arch in archive.architectures() {
                let Ok(arch) = CString::new(arch.as_str()) else {
                    continue;
                };
                if !callback(arch.as_ptr(), user_data) {
                    break;
                }
            }
            KpackStatus::Success
        }
        Err(err) => err.into(),
    }
}

#[no_mangle]
pub unsafe extern "C" fn kpack_discover_binary_path(
    address_in_binary: *const c_void,
    path_out: *mut c_char,
    path_out_size: usize,
    offset_out: *mut usize,
) -> KpackStatus {
    if address_in_binary.is_null() || path_out.is_null() || path_out_size == 0 {
        return KpackStatus::InvalidArgument;
    }

    match discover_binary_path(address_in_binary as usize) {
        Ok((path, offset)) => {
            let bytes = path.as_bytes();
            // Strict bounds: a too-small buffer is an error, not truncation.
            if bytes.len() + 1 > path_out_size {
                return KpackStatus::InvalidArgument;
            }
            ptr::copy_nonoverlapping(bytes.as_ptr(), path_out as *mut u8, bytes.len());
            *path_out.add(bytes.len()) = 0;
            if !offset_out.is_null() {
                *offset_out = offset as usize;
            }
            KpackStatus::Success
        }
        Err(err) => err.into(),
    }
}
