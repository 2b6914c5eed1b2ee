use crate::error::{KpackError, Result};

/// Kpack v1 header magic.
pub const MAGIC: [u8; 4] = *b"KPAK";

/// The single supported on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Fixed header size: magic (4) + version (4) + toc_offset (8), little-endian.
pub const HEADER_LEN: usize = 16;

/// Safety cap on the compressed blob cached in memory at open time.
pub const MAX_ZSTD_BLOB_SIZE: u64 = 4 << 30;

/// Safety cap on the per-kernel frame count.
pub const MAX_FRAME_COUNT: u32 = 1 << 20;

/// Decoded fixed header.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub version: u32,
    pub toc_offset: u64,
}

impl Header {
    /// Parse the 16-byte fixed header. The toc_offset range check needs the
    /// file size and happens at the open call site.
    pub fn parse(bytes: &[u8; HEADER_LEN]) -> Result<Header> {
        if bytes[..4] != MAGIC {
            return Err(KpackError::InvalidFormat);
        }

        let mut word = [0u8; 4];
        word.copy_from_slice(&bytes[4..8]);
        let version = u32::from_le_bytes(word);
        if version != FORMAT_VERSION {
            return Err(KpackError::UnsupportedVersion);
        }

        let mut quad = [0u8; 8];
        quad.copy_from_slice(&bytes[8..16]);
        let toc_offset = u64::from_le_bytes(quad);

        Ok(Header {
            version,
            toc_offset,
        })
    }
}

/// How kernel payloads are stored in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompressionScheme {
    /// Raw blobs, one byte range per kernel.
    None,
    /// One zstd frame per kernel, concatenated into a single blob.
    ZstdPerKernel,
    /// Scheme written by a newer tool; lookups report `NotImplemented`.
    Other(String),
}

impl CompressionScheme {
    pub fn from_name(name: &str) -> CompressionScheme {
        match name {
            "none" => CompressionScheme::None,
            "zstd-per-kernel" => CompressionScheme::ZstdPerKernel,
            other => CompressionScheme::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            CompressionScheme::None => "none",
            CompressionScheme::ZstdPerKernel => "zstd-per-kernel",
            CompressionScheme::Other(name) => name,
        }
    }
}

/// Per-kernel TOC entry.
#[derive(Debug, Clone)]
pub struct KernelEntry {
    /// Index into the blob list (NoOp) or the frame index (zstd).
    pub ordinal: u32,
    /// Exact decompressed length; sizes the output buffer and is
    /// equality-checked after decompression.
    pub original_size: u64,
    /// Payload kind, `"hsaco"` in practice.
    pub kind: String,
}

/// Absolute file coordinates of an uncompressed kernel.
#[derive(Debug, Clone, Copy)]
pub struct BlobInfo {
    pub offset: u64,
    pub size: u64,
}

/// One compressed frame inside the cached blob.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameInfo {
    pub offset_in_blob: usize,
    pub compressed_size: u32,
}
