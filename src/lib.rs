//! A unified, read-only library for compressed and archival container
//! formats: ZIP, RAR (4/5), TAR (optionally gzip/bzip2/xz/zstd/lz4
//! compressed), 7z, and single-file compressed streams.
//!
//! Every format is read through the same [`reader::ArchiveReader`] trait,
//! with one registry (`registry::MemberRegistry`) resolving hardlinks and
//! symlinks the same way regardless of the underlying format. Decoding
//! itself is delegated to real external crates (`zip`, `tar`, `rawrxd`,
//! `sevenz_rust2`, the `flate2`/`bzip2`/`xz2`/`zstd`/`lz4_flex` codec
//! family) and, for RAR, the external `unrar` binary — this crate owns
//! format *unification*, not format decoding.

#![warn(missing_docs)]

pub mod config;
pub mod encoding;
pub mod error;
pub mod extract;
pub mod factory;
pub mod format;
pub mod io_helpers;
pub mod reader;
pub mod registry;
pub mod types;
pub mod unique_id;

#[cfg(feature = "rar")]
pub mod rar_crypto;

#[cfg(feature = "rar")]
pub mod deps;

pub use config::Config;
pub use error::{Error, Result};
pub use factory::{open_archive, open_compressed_stream};
pub use reader::{ArchiveReader, MemberRef, PostFilter, Selector};
pub use types::{
    ArchiveFormat, ArchiveId, ArchiveInfo, ArchiveMember, CompressionFormat, CreateSystem,
    MemberId, MemberKind,
};
