//! Reader for `.kpack` GPU code-object archives.
//!
//! A `.kpack` file carries per-architecture GPU code objects for a set of
//! host binaries, indexed by a MessagePack table of contents. This crate
//! opens archives, decodes the TOC and hands out decompressed code objects.
//! Multi-archive search and host-binary metadata live in `kpack-loader`.

pub mod archive;
mod codec;
pub mod error;
pub mod fixtures;
pub mod format;
pub mod toc;

pub use archive::Archive;
pub use error::{KpackError, Result};
pub use format::{BlobInfo, CompressionScheme, Header, KernelEntry};
pub use toc::Toc;
