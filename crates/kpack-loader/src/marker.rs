//! Host-binary marker decoding.
//!
//! The offline transformation tool embeds a small MessagePack map in each
//! converted host binary. The runtime receives a pointer to its first byte
//! and no length, so the decoder runs over a bounded window and stops at
//! the encoded end on its own.

use rmpv::Value;

use kpack_archive::toc::str_key;
use kpack_archive::{KpackError, Result};

/// Upper bound on the bytes handed to the marker decoder.
pub const MAX_METADATA_LEN: usize = 64 * 1024;

/// Decoded marker: the TOC key to look up and where to look for archives.
#[derive(Debug, Clone)]
pub struct Marker {
    pub kernel_name: String,
    /// Absolute, or relative to the host binary's directory. Never empty.
    pub search_paths: Vec<String>,
}

impl Marker {
    pub fn decode(bytes: &[u8]) -> Result<Marker> {
        let mut cursor = bytes;
        let root = rmpv::decode::read_value(&mut cursor)
            .map_err(|_| KpackError::MsgpackParseFailed)?;
        let root = root.as_map().ok_or(KpackError::InvalidMetadata)?;

        let kernel_name = str_key(root, "kernel_name")
            .and_then(Value::as_str)
            .ok_or(KpackError::InvalidMetadata)?
            .to_string();

        // Non-string elements are skipped so newer tools can extend the
        // array; an effectively empty list is still rejected.
        let search_paths: Vec<String> = str_key(root, "kpack_search_paths")
            .and_then(Value::as_array)
            .ok_or(KpackError::InvalidMetadata)?
            .iter()
            .filter_map(|p| p.as_str().map(str::to_string))
            .collect();
        if search_paths.is_empty() {
            return Err(KpackError::InvalidMetadata);
        }

        Ok(Marker {
            kernel_name,
            search_paths,
        })
    }
}
