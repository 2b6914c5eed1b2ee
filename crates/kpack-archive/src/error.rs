use thiserror::Error;

/// Error set shared by the whole kpack runtime.
///
/// Closed enumeration: every fallible operation in this workspace reports
/// one of these kinds and nothing else. Variants carry no payload because
/// the C ABI maps each one to a stable numeric code; human-readable detail
/// goes to the debug channel instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KpackError {
    #[error("invalid argument")]
    InvalidArgument,

    #[error("archive file not found")]
    FileNotFound,

    /// Magic mismatch, out-of-range toc_offset, structural TOC mismatch,
    /// blob overrun or safety-cap violation.
    #[error("invalid archive format")]
    InvalidFormat,

    #[error("unsupported archive version")]
    UnsupportedVersion,

    /// `(binary, arch)` pair absent from the TOC, or ordinal out of range.
    #[error("kernel not found")]
    KernelNotFound,

    /// The decompressor rejected the frame, or its output length did not
    /// match the recorded original size.
    #[error("decompression failed")]
    DecompressionFailed,

    #[error("out of memory")]
    OutOfMemory,

    /// Disabled via environment, unknown compression scheme, or a platform
    /// without binary-path discovery.
    #[error("not implemented")]
    NotImplemented,

    #[error("i/o error")]
    Io,

    /// TOC or marker bytes are not decodable as MessagePack.
    #[error("msgpack parse failed")]
    MsgpackParseFailed,

    /// Marker decoded but required fields are missing or ill-typed.
    #[error("invalid embedded metadata")]
    InvalidMetadata,

    /// No archive in the resolved search path list was openable.
    #[error("no archive found in search paths")]
    ArchiveNotFound,

    /// Every requested architecture was absent from every opened archive.
    #[error("architecture not found in any archive")]
    ArchNotFound,

    #[error("binary path discovery failed")]
    PathDiscoveryFailed,
}

pub type Result<T> = std::result::Result<T, KpackError>;
