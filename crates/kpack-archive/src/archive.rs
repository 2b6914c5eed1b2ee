//! The opened-archive handle.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::codec::Codec;
use crate::error::{KpackError, Result};
use crate::format::{CompressionScheme, Header, HEADER_LEN};
use crate::toc::Toc;

/// An open `.kpack` archive.
///
/// Cheap read-only queries (enumeration, TOC lookups) run lock-free because
/// everything they touch is populated before the handle is handed out.
/// Kernel fetches serialize on the per-handle mutex guarding the file
/// cursor and the decompression context, so one `Archive` can be shared
/// across threads. Dropping the handle closes the archive.
pub struct Archive {
    path: PathBuf,
    version: u32,
    toc: Toc,
    codec: Mutex<Codec>,
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("path", &self.path)
            .field("version", &self.version)
            .field("toc", &self.toc)
            .finish()
    }
}

impl Archive {
    /// Open an archive: validate the header, decode the TOC and, for
    /// compressed archives, cache the blob and build the frame index.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Archive> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => KpackError::FileNotFound,
            _ => KpackError::Io,
        })?;

        let mut header_bytes = [0u8; HEADER_LEN];
        file.read_exact(&mut header_bytes).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => KpackError::InvalidFormat,
            _ => KpackError::Io,
        })?;
        let header = Header::parse(&header_bytes)?;

        let file_size = file.metadata().map_err(|_| KpackError::Io)?.len();
        if header.toc_offset < HEADER_LEN as u64 || header.toc_offset >= file_size {
            return Err(KpackError::InvalidFormat);
        }

        file.seek(SeekFrom::Start(header.toc_offset))
            .map_err(|_| KpackError::Io)?;
        let toc_len =
            usize::try_from(file_size - header.toc_offset).map_err(|_| KpackError::OutOfMemory)?;
        let mut toc_bytes = Vec::new();
        toc_bytes
            .try_reserve_exact(toc_len)
            .map_err(|_| KpackError::OutOfMemory)?;
        toc_bytes.resize(toc_len, 0);
        file.read_exact(&mut toc_bytes).map_err(|_| KpackError::Io)?;

        let mut toc = Toc::decode(&toc_bytes, header.toc_offset)?;

        let codec = match &toc.scheme {
            CompressionScheme::None => Codec::new_noop(file, std::mem::take(&mut toc.blobs)),
            CompressionScheme::ZstdPerKernel => {
                Codec::new_zstd(file, toc.zstd_offset, toc.zstd_size)?
            }
            CompressionScheme::Other(_) => Codec::new_unsupported(file),
        };

        Ok(Archive {
            path: path.to_path_buf(),
            version: header.version,
            toc,
            codec: Mutex::new(codec),
        })
    }

    /// Look up `(binary, arch)` and return a freshly allocated copy of the
    /// decompressed kernel. The buffer is independent of the handle.
    pub fn get_kernel(&self, binary: &str, arch: &str) -> Result<Vec<u8>> {
        let entry = self
            .toc
            .entry(binary, arch)
            .ok_or(KpackError::KernelNotFound)?;

        let mut codec = self.codec.lock();
        codec.fetch(entry.ordinal, entry.original_size)
    }

    pub fn architecture_count(&self) -> usize {
        self.toc.gfx_arches.len()
    }

    pub fn architecture(&self, index: usize) -> Result<&str> {
        self.toc
            .gfx_arches
            .get(index)
            .map(String::as_str)
            .ok_or(KpackError::InvalidArgument)
    }

    /// All architectures, in TOC order.
    pub fn architectures(&self) -> &[String] {
        &self.toc.gfx_arches
    }

    pub fn binary_count(&self) -> usize {
        self.toc.binaries().len()
    }

    pub fn binary(&self, index: usize) -> Result<&str> {
        self.toc
            .binaries()
            .get(index)
            .map(String::as_str)
            .ok_or(KpackError::InvalidArgument)
    }

    /// All binary names, in TOC insertion order.
    pub fn binaries(&self) -> &[String] {
        self.toc.binaries()
    }

    pub fn compression_scheme(&self) -> &CompressionScheme {
        &self.toc.scheme
    }

    pub fn group_name(&self) -> Option<&str> {
        self.toc.group_name.as_deref()
    }

    pub fn gfx_arch_family(&self) -> Option<&str> {
        self.toc.gfx_arch_family.as_deref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}
