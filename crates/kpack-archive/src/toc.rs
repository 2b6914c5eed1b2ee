//! Table-of-contents decoding.
//!
//! The TOC is a MessagePack map at the tail of the archive. It is decoded
//! into a value tree and walked with explicit shape checks, so a structural
//! mismatch surfaces as `InvalidFormat` rather than disappearing into
//! deserializer machinery. Undecodable bytes are `MsgpackParseFailed`.

use rmpv::Value;
use rustc_hash::FxHashMap;

use crate::error::{KpackError, Result};
use crate::format::{BlobInfo, CompressionScheme, KernelEntry};

/// Decoded table of contents.
#[derive(Debug)]
pub struct Toc {
    /// Build-slice name recorded by the writer, informational.
    pub group_name: Option<String>,
    /// Architecture family recorded by the writer, informational.
    pub gfx_arch_family: Option<String>,
    /// Architectures present, in presentation order.
    pub gfx_arches: Vec<String>,
    pub scheme: CompressionScheme,
    /// Binary names in TOC insertion order, for enumeration.
    binaries: Vec<String>,
    index: FxHashMap<String, FxHashMap<String, KernelEntry>>,
    /// Kernel byte ranges, scheme `none` only.
    pub blobs: Vec<BlobInfo>,
    /// Compressed blob coordinates, scheme `zstd-per-kernel` only.
    pub zstd_offset: u64,
    pub zstd_size: u64,
}

impl Toc {
    /// Decode the TOC bytes read from `toc_offset` to end of file.
    pub fn decode(bytes: &[u8], toc_offset: u64) -> Result<Toc> {
        let mut cursor = bytes;
        let root = rmpv::decode::read_value(&mut cursor)
            .map_err(|_| KpackError::MsgpackParseFailed)?;
        let root = root.as_map().ok_or(KpackError::InvalidFormat)?;

        let scheme = str_key(root, "compression_scheme")
            .and_then(Value::as_str)
            .map(CompressionScheme::from_name)
            .ok_or(KpackError::InvalidFormat)?;

        let gfx_arches = str_key(root, "gfx_arches")
            .and_then(Value::as_array)
            .ok_or(KpackError::InvalidFormat)?
            .iter()
            .map(|arch| arch.as_str().map(str::to_string))
            .collect::<Option<Vec<String>>>()
            .ok_or(KpackError::InvalidFormat)?;

        let group_name = str_key(root, "group_name")
            .and_then(Value::as_str)
            .map(str::to_string);
        let gfx_arch_family = str_key(root, "gfx_arch_family")
            .and_then(Value::as_str)
            .map(str::to_string);

        let toc_map = str_key(root, "toc")
            .and_then(Value::as_map)
            .ok_or(KpackError::InvalidFormat)?;

        let mut binaries = Vec::with_capacity(toc_map.len());
        let mut index = FxHashMap::default();
        for (binary, arch_map) in toc_map {
            let binary = binary.as_str().ok_or(KpackError::InvalidFormat)?;
            let arch_map = arch_map.as_map().ok_or(KpackError::InvalidFormat)?;

            let mut entries: FxHashMap<String, KernelEntry> = FxHashMap::default();
            for (arch, entry) in arch_map {
                let arch = arch.as_str().ok_or(KpackError::InvalidFormat)?;
                entries.insert(arch.to_string(), decode_entry(entry)?);
            }

            binaries.push(binary.to_string());
            index.insert(binary.to_string(), entries);
        }

        let mut toc = Toc {
            group_name,
            gfx_arch_family,
            gfx_arches,
            scheme,
            binaries,
            index,
            blobs: Vec::new(),
            zstd_offset: 0,
            zstd_size: 0,
        };

        match &toc.scheme {
            CompressionScheme::None => {
                toc.blobs = str_key(root, "blobs")
                    .and_then(Value::as_array)
                    .ok_or(KpackError::InvalidFormat)?
                    .iter()
                    .map(decode_blob)
                    .collect::<Result<Vec<BlobInfo>>>()?;
            }
            CompressionScheme::ZstdPerKernel => {
                toc.zstd_offset = uint_key(root, "zstd_offset")?;
                toc.zstd_size = uint_key(root, "zstd_size")?;
                let end = toc
                    .zstd_offset
                    .checked_add(toc.zstd_size)
                    .ok_or(KpackError::InvalidFormat)?;
                if end > toc_offset {
                    return Err(KpackError::InvalidFormat);
                }
            }
            // Unknown scheme: nothing to validate here, lookups fail later.
            CompressionScheme::Other(_) => {}
        }

        Ok(toc)
    }

    pub fn entry(&self, binary: &str, arch: &str) -> Option<&KernelEntry> {
        self.index.get(binary)?.get(arch)
    }

    pub fn binaries(&self) -> &[String] {
        &self.binaries
    }
}

/// Find a string-keyed value in a MessagePack map.
pub fn str_key<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .map(|(_, v)| v)
}

fn uint_key(map: &[(Value, Value)], key: &str) -> Result<u64> {
    str_key(map, key)
        .and_then(Value::as_u64)
        .ok_or(KpackError::InvalidFormat)
}

fn decode_entry(entry: &Value) -> Result<KernelEntry> {
    let entry = entry.as_map().ok_or(KpackError::InvalidFormat)?;

    let ordinal = uint_key(entry, "ordinal")?;
    let ordinal = u32::try_from(ordinal).map_err(|_| KpackError::InvalidFormat)?;
    let original_size = uint_key(entry, "original_size")?;
    let kind = str_key(entry, "type")
        .and_then(Value::as_str)
        .ok_or(KpackError::InvalidFormat)?
        .to_string();

    Ok(KernelEntry {
        ordinal,
        original_size,
        kind,
    })
}

fn decode_blob(blob: &Value) -> Result<BlobInfo> {
    let blob = blob.as_map().ok_or(KpackError::InvalidFormat)?;
    Ok(BlobInfo {
        offset: uint_key(blob, "offset")?,
        size: uint_key(blob, "size")?,
    })
}
