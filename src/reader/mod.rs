//! The reader contract (C5): [`ArchiveReader`], [`Selector`], and the
//! streaming-only narrowing wrapper.

mod streaming;

pub use streaming::StreamingOnlyWrapper;

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::{ArchiveFormat, ArchiveMember, MemberId};

/// Refers to a member either by its assigned id or by filename, for call
/// sites that don't already hold an [`ArchiveMember`].
#[derive(Debug, Clone)]
pub enum MemberRef {
    /// By assigned id.
    Id(MemberId),
    /// By exact filename (the latest-registered match wins, same as
    /// [`crate::registry::MemberRegistry::get_by_filename`]).
    Name(String),
}

impl From<MemberId> for MemberRef {
    fn from(id: MemberId) -> Self {
        MemberRef::Id(id)
    }
}

impl From<&str> for MemberRef {
    fn from(name: &str) -> Self {
        MemberRef::Name(name.to_string())
    }
}

impl From<String> for MemberRef {
    fn from(name: String) -> Self {
        MemberRef::Name(name)
    }
}

impl From<&ArchiveMember> for MemberRef {
    fn from(member: &ArchiveMember) -> Self {
        MemberRef::Id(member.member_id)
    }
}

/// Which members an iteration or extraction call should visit.
#[derive(Clone, Default)]
pub enum Selector {
    /// Every member currently known to the reader.
    #[default]
    All,
    /// Exactly these members, in the order given.
    Members(Vec<MemberRef>),
    /// Members for which this predicate returns `true`.
    Predicate(std::sync::Arc<dyn Fn(&ArchiveMember) -> bool + Send + Sync>),
}

impl std::fmt::Debug for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::All => write!(f, "Selector::All"),
            Selector::Members(m) => f.debug_tuple("Selector::Members").field(m).finish(),
            Selector::Predicate(_) => write!(f, "Selector::Predicate(..)"),
        }
    }
}

/// Rewrites or drops a member mid-iteration. Must preserve `member_id` on any
/// member it returns; returning one with a different id is a programming
/// error and is reported as [`Error::FilterForgedIdentity`].
pub type PostFilter = std::sync::Arc<dyn Fn(ArchiveMember) -> Option<ArchiveMember> + Send + Sync>;

pub(crate) fn check_filter_identity(original: MemberId, filtered: &ArchiveMember) -> Result<()> {
    if filtered.member_id != original {
        return Err(Error::FilterForgedIdentity(format!(
            "post_filter changed member_id {} to {}",
            original.as_u64(),
            filtered.member_id.as_u64()
        )));
    }
    Ok(())
}

/// Common behavior across every archive format this crate reads.
///
/// Two concrete shapes implement it: a per-format random-access reader
/// (`format::zip::ZipReader` and friends), and [`StreamingOnlyWrapper`],
/// which narrows any reader down to the streaming-only subset.
pub trait ArchiveReader {
    /// The format this reader was opened as.
    fn format(&self) -> ArchiveFormat;

    /// The path this reader was opened from.
    fn archive_path(&self) -> &str;

    /// The member list, if already known without further I/O (random-access
    /// readers return it once the underlying directory/header has been
    /// parsed; streaming readers return `None` until exhausted).
    fn members_if_available(&mut self) -> Option<Vec<ArchiveMember>>;

    /// The full member list, reading as much of the archive as needed.
    fn get_members(&mut self) -> Result<Vec<ArchiveMember>>;

    /// Iterate matching members, each with an optional stream of its
    /// contents (`None` for non-file members).
    fn iter_members_with_io<'a>(
        &'a mut self,
        selector: Selector,
        password: Option<&[u8]>,
        post_filter: Option<PostFilter>,
    ) -> Box<dyn Iterator<Item = Result<(ArchiveMember, Option<Box<dyn Read + 'a>>)>> + 'a>;

    /// Open a single member's contents for reading.
    fn open(&mut self, member: MemberRef, password: Option<&[u8]>) -> Result<Box<dyn Read + '_>>;

    /// Extract a single member to `dest`, returning the path written.
    fn extract(
        &mut self,
        member: MemberRef,
        dest: &Path,
        password: Option<&[u8]>,
    ) -> Result<PathBuf>;

    /// Extract matching members under `dest`, returning a map of original
    /// filename to the path written.
    fn extract_all(
        &mut self,
        selector: Selector,
        dest: &Path,
        password: Option<&[u8]>,
        post_filter: Option<PostFilter>,
    ) -> Result<HashMap<String, PathBuf>>;

    /// Release any held resources (subprocess, file handles). Idempotent.
    fn close(&mut self) -> Result<()>;

    /// True if this reader can look up and open members out of order.
    fn has_random_access(&self) -> bool;
}

/// Matches a member against a [`Selector`].
pub(crate) fn selector_matches(selector: &Selector, member: &ArchiveMember) -> bool {
    match selector {
        Selector::All => true,
        Selector::Members(refs) => refs.iter().any(|r| member_ref_matches(r, member)),
        Selector::Predicate(f) => f(member),
    }
}

pub(crate) fn member_ref_matches(r: &MemberRef, member: &ArchiveMember) -> bool {
    match r {
        MemberRef::Id(id) => *id == member.member_id,
        MemberRef::Name(name) => *name == member.filename,
    }
}
