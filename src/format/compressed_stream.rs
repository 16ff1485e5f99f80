//! Opens a single compressed stream (no container format) given a
//! compression tag. Shared by the TAR adapter (as the outer layer) and the
//! standalone single-file adapter.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::Result;
use crate::types::CompressionFormat;

/// Open `path` as a raw (uncompressed passthrough) or compressed stream
/// according to `format`. The returned reader is not necessarily seekable;
/// callers that need random access should check separately.
pub fn open_compressed_file(path: &Path, format: CompressionFormat) -> Result<Box<dyn Read>> {
    let file = BufReader::new(File::open(path)?);
    open_compressed(Box::new(file), format)
}

/// Wrap an already-open reader with the decompressor for `format`.
pub fn open_compressed(inner: Box<dyn Read>, format: CompressionFormat) -> Result<Box<dyn Read>> {
    match format {
        CompressionFormat::Gzip => open_gzip(inner),
        CompressionFormat::Bzip2 => open_bzip2(inner),
        CompressionFormat::Xz => open_xz(inner),
        CompressionFormat::Zstd => open_zstd(inner),
        CompressionFormat::Lz4 => open_lz4(inner),
    }
}

#[cfg(feature = "deflate")]
fn open_gzip(inner: Box<dyn Read>) -> Result<Box<dyn Read>> {
    Ok(Box::new(flate2::read::MultiGzDecoder::new(inner)))
}

#[cfg(not(feature = "deflate"))]
fn open_gzip(_inner: Box<dyn Read>) -> Result<Box<dyn Read>> {
    Err(crate::error::Error::PackageNotInstalled(
        "gzip support requires the `deflate` feature".into(),
    ))
}

#[cfg(feature = "bzip2")]
fn open_bzip2(inner: Box<dyn Read>) -> Result<Box<dyn Read>> {
    Ok(Box::new(bzip2::read::MultiBzDecoder::new(inner)))
}

#[cfg(not(feature = "bzip2"))]
fn open_bzip2(_inner: Box<dyn Read>) -> Result<Box<dyn Read>> {
    Err(crate::error::Error::PackageNotInstalled(
        "bzip2 support requires the `bzip2` feature".into(),
    ))
}

#[cfg(feature = "xz")]
fn open_xz(inner: Box<dyn Read>) -> Result<Box<dyn Read>> {
    Ok(Box::new(xz2::read::XzDecoder::new(inner)))
}

#[cfg(not(feature = "xz"))]
fn open_xz(_inner: Box<dyn Read>) -> Result<Box<dyn Read>> {
    Err(crate::error::Error::PackageNotInstalled(
        "xz support requires the `xz` feature".into(),
    ))
}

#[cfg(feature = "zstd")]
fn open_zstd(inner: Box<dyn Read>) -> Result<Box<dyn Read>> {
    Ok(Box::new(zstd::stream::Decoder::new(inner)?))
}

#[cfg(not(feature = "zstd"))]
fn open_zstd(_inner: Box<dyn Read>) -> Result<Box<dyn Read>> {
    Err(crate::error::Error::PackageNotInstalled(
        "zstd support requires the `zstd` feature".into(),
    ))
}

#[cfg(feature = "lz4")]
fn open_lz4(inner: Box<dyn Read>) -> Result<Box<dyn Read>> {
    Ok(Box::new(lz4_flex::frame::FrameDecoder::new(inner)))
}

#[cfg(not(feature = "lz4"))]
fn open_lz4(_inner: Box<dyn Read>) -> Result<Box<dyn Read>> {
    Err(crate::error::Error::PackageNotInstalled(
        "lz4 support requires the `lz4` feature".into(),
    ))
}

/// Sniff a compression tag from a filename extension (`.gz`, `.bz2`, `.xz`,
/// `.zst`, `.lz4`). Returns `None` for anything else (including plain
/// `.tar`).
pub fn sniff_extension(filename: &str) -> Option<CompressionFormat> {
    let lower = filename.to_ascii_lowercase();
    if lower.ends_with(".gz") || lower.ends_with(".tgz") {
        Some(CompressionFormat::Gzip)
    } else if lower.ends_with(".bz2") || lower.ends_with(".tbz2") {
        Some(CompressionFormat::Bzip2)
    } else if lower.ends_with(".xz") || lower.ends_with(".txz") {
        Some(CompressionFormat::Xz)
    } else if lower.ends_with(".zst") {
        Some(CompressionFormat::Zstd)
    } else if lower.ends_with(".lz4") {
        Some(CompressionFormat::Lz4)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_known_extensions() {
        assert_eq!(sniff_extension("a.tar.gz"), Some(CompressionFormat::Gzip));
        assert_eq!(sniff_extension("a.tgz"), Some(CompressionFormat::Gzip));
        assert_eq!(sniff_extension("a.tar.bz2"), Some(CompressionFormat::Bzip2));
        assert_eq!(sniff_extension("a.tar.xz"), Some(CompressionFormat::Xz));
        assert_eq!(sniff_extension("a.tar.zst"), Some(CompressionFormat::Zstd));
        assert_eq!(sniff_extension("a.tar"), None);
    }
}
