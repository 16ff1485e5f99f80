//! The unified error taxonomy used throughout this crate.

use std::io;

/// Any error produced while reading, iterating, or extracting an archive.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Structural parse failure, CRC mismatch on drain, or a bad trailer.
    #[error("corrupted archive: {0}")]
    Corrupted(String),

    /// A subtype of [`Error::Corrupted`] surfaced separately: the underlying
    /// stream ended before the format said it would.
    #[error("truncated archive: {0}")]
    Truncated(String),

    /// The archive (or a member) needs a password, the password given was
    /// wrong, or the headers are encrypted and no password was supplied.
    #[error("encrypted: {0}")]
    Encrypted(String),

    /// No member with that filename/id exists in this archive.
    #[error("member not found: {0}")]
    MemberNotFound(String),

    /// The member cannot be opened: it's not a file, its link target is
    /// dangling, or its type isn't supported for reading.
    #[error("member cannot be opened: {0}")]
    MemberCannotBeOpened(String),

    /// The operation isn't supported by this reader (e.g. `open` on a
    /// streaming-only reader, a password on a TAR archive).
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// An optional decoder backend or external binary (e.g. `unrar`) isn't
    /// available.
    #[error("package not installed: {0}")]
    PackageNotInstalled(String),

    /// A `post_filter` callback returned a member with a different
    /// `member_id` than the one it was given.
    #[error("filter returned a member with a different member_id: {0}")]
    FilterForgedIdentity(String),

    /// Extraction target escapes the destination root after normalization.
    #[error("refusing to extract outside destination root: {0}")]
    PathTraversal(String),

    /// I/O error not otherwise classified.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Catch-all, with the original cause preserved.
    #[error("archive error: {0}")]
    Generic(String),
}

impl Error {
    pub(crate) fn corrupted(msg: impl Into<String>) -> Self {
        Self::Corrupted(msg.into())
    }

    pub(crate) fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            e => io::Error::other(e),
        }
    }
}

/// Convenience alias used across this crate's public API.
pub type Result<T> = std::result::Result<T, Error>;
