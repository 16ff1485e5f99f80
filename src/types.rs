//! The archive-agnostic data model: [`ArchiveMember`] and its supporting types.

use std::collections::HashMap;

use chrono::NaiveDateTime;

/// A process-wide unique identifier for an archive reader instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchiveId(pub(crate) u64);

/// An identifier for a member, unique and monotonically increasing within one
/// archive (see [`crate::registry`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(pub(crate) u64);

impl MemberId {
    /// The raw numeric value of this id, for diagnostics and ordering.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// The format of an archive, as sniffed or declared at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    /// A ZIP archive.
    Zip,
    /// A RAR archive (version 4 or 5).
    Rar,
    /// A plain (uncompressed) TAR archive.
    Tar,
    /// A TAR archive compressed with gzip (`.tar.gz`, `.tgz`).
    TarGz,
    /// A TAR archive compressed with bzip2 (`.tar.bz2`).
    TarBz2,
    /// A TAR archive compressed with xz (`.tar.xz`).
    TarXz,
    /// A TAR archive compressed with zstd (`.tar.zst`).
    TarZstd,
    /// A TAR archive compressed with lz4 (`.tar.lz4`).
    TarLz4,
    /// A 7-Zip archive.
    SevenZip,
    /// A single compressed file with no container format.
    CompressedStream(CompressionFormat),
}

/// A transport compression codec, used both for TAR's outer layer and for
/// single-file compressed streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionFormat {
    /// gzip (RFC 1952)
    Gzip,
    /// bzip2
    Bzip2,
    /// xz / LZMA2
    Xz,
    /// Zstandard
    Zstd,
    /// LZ4 frame format
    Lz4,
}

/// The kind of entry an [`ArchiveMember`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    /// A regular file.
    File,
    /// A directory.
    Dir,
    /// A symbolic link; [`ArchiveMember::link_target`] holds the raw target.
    Symlink,
    /// A hard link; [`ArchiveMember::link_target`] holds the target filename.
    Hardlink,
    /// Anything else this crate doesn't interpret (device nodes, FIFOs, ...).
    Other,
}

/// The originating host OS recorded for a member, when the format tracks one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CreateSystem {
    /// FAT / MS-DOS
    Fat,
    /// OS/2 HPFS
    Os2Hpfs,
    /// Windows NTFS
    Ntfs,
    /// Unix and Unix-likes
    Unix,
    /// classic Mac OS
    Macintosh,
    /// not recorded, or not one of the above
    #[default]
    Unknown,
}

/// An opaque, per-format descriptor a member carries so its owning adapter
/// can later open a stream for it.
///
/// This deliberately isn't a trait object: adapters downcast their own
/// variant and never inspect another adapter's. See Design Notes in
/// `DESIGN.md` for why this is an enum rather than `Box<dyn Any>`.
#[derive(Debug, Clone)]
pub enum RawInfo {
    /// Index into the adapter's own per-archive entry table.
    Index(usize),
    /// No adapter-local payload is needed to re-open this member.
    None,
}

/// One logical entry in an archive: a file, directory, symlink, hardlink, or
/// something this crate doesn't interpret further.
#[derive(Debug, Clone)]
pub struct ArchiveMember {
    /// Original path as stored (slash-separated); may duplicate other
    /// members' filenames and may not be normalized.
    pub filename: String,
    /// Uncompressed size, if known.
    pub file_size: Option<u64>,
    /// Compressed (on-disk) size, if known.
    pub compress_size: Option<u64>,
    /// Last-modified time, naive (no timezone), if known.
    pub mtime: Option<NaiveDateTime>,
    /// The kind of entry this is.
    pub kind: MemberKind,
    /// POSIX permission bits, if known.
    pub mode: Option<u32>,
    /// CRC-32 of the plaintext, if known and verifiable. `None` for RAR5
    /// entries with password-tweaked checksums (see `extra`).
    pub crc32: Option<u32>,
    /// Human-readable compression method name (`"store"`, `"deflate"`, ...).
    pub compression_method: Option<String>,
    /// Per-entry comment, if the format supports one.
    pub comment: Option<String>,
    /// Whether this member's contents are encrypted.
    pub encrypted: bool,
    /// The host OS that created this entry, if recorded.
    pub create_system: CreateSystem,
    /// Format-specific descriptive fields not promoted to a named field.
    pub extra: HashMap<String, String>,
    /// Raw target string as stored (symlink target path, or hardlink's
    /// target filename).
    pub link_target: Option<String>,
    /// Resolved target, set by the registry's link-resolution pass.
    pub link_target_member: Option<MemberId>,
    /// Resolved terminal type of `link_target_member`.
    pub link_target_type: Option<MemberKind>,
    /// Opaque per-format descriptor, owned by this member.
    pub raw_info: RawInfo,
    /// Assigned on registration; unique and monotonically increasing within
    /// one archive.
    pub member_id: MemberId,
    /// Identifies the reader that registered this member.
    pub archive_id: ArchiveId,
}

impl ArchiveMember {
    /// True if this member is a regular file (the only kind `open()` and
    /// `iter_members_with_io` will hand back a stream for).
    pub fn is_file(&self) -> bool {
        self.kind == MemberKind::File
    }

    /// True if this member is a symlink or hardlink.
    pub fn is_link(&self) -> bool {
        matches!(self.kind, MemberKind::Symlink | MemberKind::Hardlink)
    }
}

/// Archive-level metadata returned by `get_archive_info()`.
#[derive(Debug, Clone)]
pub struct ArchiveInfo {
    /// The format of this archive.
    pub format: ArchiveFormat,
    /// Format version string, if the format has one worth surfacing (e.g.
    /// `"4"` / `"5"` for RAR).
    pub version: Option<String>,
    /// True if members share a compression context (opening one may require
    /// decompressing predecessors).
    pub is_solid: bool,
    /// Archive-level comment, if any.
    pub comment: Option<String>,
    /// Format-specific descriptive fields.
    pub extra: HashMap<String, String>,
}
