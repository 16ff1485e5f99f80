//! Per-format adapters (C6): each wraps a real external decoder crate (or,
//! for RAR, an external binary) behind the [`crate::reader::ArchiveReader`]
//! trait. See `SPEC_FULL.md` §4.5 for the grounding of each.

pub mod compressed_stream;

#[cfg(feature = "zip")]
pub mod zip;

#[cfg(feature = "tar")]
pub mod tar;

#[cfg(feature = "rar")]
pub mod rar;

#[cfg(feature = "sevenz")]
pub mod sevenz;
