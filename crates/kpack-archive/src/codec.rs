//! Kernel payload access.
//!
//! One `Codec` per archive owns everything a kernel fetch mutates: the file
//! handle (shared seek cursor) and, for compressed archives, the cached
//! blob plus a reusable decompression context. The archive wraps the codec
//! in its per-handle mutex.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use zstd::zstd_safe::DCtx;

use crate::error::{KpackError, Result};
use crate::format::{BlobInfo, FrameInfo, MAX_FRAME_COUNT, MAX_ZSTD_BLOB_SIZE};

pub(crate) struct Codec {
    file: File,
    state: CodecState,
}

enum CodecState {
    NoOp {
        blobs: Vec<BlobInfo>,
    },
    Zstd {
        blob: Vec<u8>,
        frames: Vec<FrameInfo>,
        dctx: DCtx<'static>,
    },
    /// Compression scheme this runtime does not know.
    Unsupported,
}

impl Codec {
    pub fn new_noop(file: File, blobs: Vec<BlobInfo>) -> Codec {
        Codec {
            file,
            state: CodecState::NoOp { blobs },
        }
    }

    pub fn new_unsupported(file: File) -> Codec {
        Codec {
            file,
            state: CodecState::Unsupported,
        }
    }

    /// Read the whole compressed blob, walk its frame list with bounds
    /// checks, and set up the reusable decompression context.
    pub fn new_zstd(mut file: File, zstd_offset: u64, zstd_size: u64) -> Result<Codec> {
        if zstd_size > MAX_ZSTD_BLOB_SIZE {
            return Err(KpackError::InvalidFormat);
        }
        let blob_len = usize::try_from(zstd_size).map_err(|_| KpackError::InvalidFormat)?;

        file.seek(SeekFrom::Start(zstd_offset))
            .map_err(|_| KpackError::Io)?;
        let mut blob = alloc_buf(blob_len)?;
        file.read_exact(&mut blob).map_err(|_| KpackError::Io)?;

        if blob.len() < 4 {
            return Err(KpackError::InvalidFormat);
        }
        let mut word = [0u8; 4];
        word.copy_from_slice(&blob[..4]);
        let num_kernels = u32::from_le_bytes(word);
        if num_kernels > MAX_FRAME_COUNT {
            return Err(KpackError::InvalidFormat);
        }

        let mut frames = Vec::with_capacity(num_kernels as usize);
        let mut cursor = 4usize;
        for _ in 0..num_kernels {
            let header_end = cursor.checked_add(4).ok_or(KpackError::InvalidFormat)?;
            if header_end > blob.len() {
                return Err(KpackError::InvalidFormat);
            }
            word.copy_from_slice(&blob[cursor..header_end]);
            let compressed_size = u32::from_le_bytes(word);

            let frame_end = header_end
                .checked_add(compressed_size as usize)
                .ok_or(KpackError::InvalidFormat)?;
            if frame_end > blob.len() {
                return Err(KpackError::InvalidFormat);
            }

            frames.push(FrameInfo {
                offset_in_blob: header_end,
                compressed_size,
            });
            cursor = frame_end;
        }

        let dctx = DCtx::try_create().ok_or(KpackError::OutOfMemory)?;

        Ok(Codec {
            file,
            state: CodecState::Zstd { blob, frames, dctx },
        })
    }

    /// Produce the decompressed bytes for one kernel ordinal.
    pub fn fetch(&mut self, ordinal: u32, expected_size: u64) -> Result<Vec<u8>> {
        match &mut self.state {
            CodecState::NoOp { blobs } => fetch_noop(&mut self.file, blobs, ordinal),
            CodecState::Zstd { blob, frames, dctx } => {
                fetch_zstd(blob, frames, dctx, ordinal, expected_size)
            }
            CodecState::Unsupported => Err(KpackError::NotImplemented),
        }
    }
}

fn fetch_noop(file: &mut File, blobs: &[BlobInfo], ordinal: u32) -> Result<Vec<u8>> {
    let blob = blobs
        .get(ordinal as usize)
        .ok_or(KpackError::KernelNotFound)?;

    file.seek(SeekFrom::Start(blob.offset))
        .map_err(|_| KpackError::Io)?;

    let len = usize::try_from(blob.size).map_err(|_| KpackError::OutOfMemory)?;
    let mut out = alloc_buf(len)?;
    file.read_exact(&mut out).map_err(|_| KpackError::Io)?;
    Ok(out)
}

fn fetch_zstd(
    blob: &[u8],
    frames: &[FrameInfo],
    dctx: &mut DCtx<'static>,
    ordinal: u32,
    expected_size: u64,
) -> Result<Vec<u8>> {
    let frame = frames
        .get(ordinal as usize)
        .ok_or(KpackError::KernelNotFound)?;
    let input = &blob[frame.offset_in_blob..frame.offset_in_blob + frame.compressed_size as usize];

    let len = usize::try_from(expected_size).map_err(|_| KpackError::OutOfMemory)?;
    let mut out = alloc_buf(len)?;

    let written = dctx
        .decompress(&mut out[..], input)
        .map_err(|_| KpackError::DecompressionFailed)?;
    if written as u64 != expected_size {
        return Err(KpackError::DecompressionFailed);
    }

    Ok(out)
}

fn alloc_buf(len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| KpackError::OutOfMemory)?;
    buf.resize(len, 0);
    Ok(buf)
}
