//! [`StreamingOnlyWrapper`]: narrows any [`ArchiveReader`] down to the
//! streaming-only subset, for adapters backed by a non-seekable source.
//!
//! Grounded on `archivey.base_reader.StreamingOnlyArchiveReaderWrapper`,
//! which delegates the operations that make sense without random access and
//! raises on the rest.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::{ArchiveFormat, ArchiveMember};

use super::{ArchiveReader, MemberRef, PostFilter, Selector};

/// Wraps an inner reader and rejects the operations that require random
/// access (`get_members`, `open`, `extract`) with `Error::Unsupported`,
/// delegating everything else.
pub struct StreamingOnlyWrapper<R> {
    inner: R,
}

impl<R> StreamingOnlyWrapper<R>
where
    R: ArchiveReader,
{
    /// Wrap `inner`, forcing streaming-only semantics regardless of what it
    /// would otherwise support.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Recover the wrapped reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R> ArchiveReader for StreamingOnlyWrapper<R>
where
    R: ArchiveReader,
{
    fn format(&self) -> ArchiveFormat {
        self.inner.format()
    }

    fn archive_path(&self) -> &str {
        self.inner.archive_path()
    }

    fn members_if_available(&mut self) -> Option<Vec<ArchiveMember>> {
        self.inner.members_if_available()
    }

    fn get_members(&mut self) -> Result<Vec<ArchiveMember>> {
        Err(Error::Unsupported(
            "get_members() requires random access; this archive is streaming-only".into(),
        ))
    }

    fn iter_members_with_io<'a>(
        &'a mut self,
        selector: Selector,
        password: Option<&[u8]>,
        post_filter: Option<PostFilter>,
    ) -> Box<dyn Iterator<Item = Result<(ArchiveMember, Option<Box<dyn Read + 'a>>)>> + 'a> {
        self.inner.iter_members_with_io(selector, password, post_filter)
    }

    fn open(&mut self, _member: MemberRef, _password: Option<&[u8]>) -> Result<Box<dyn Read + '_>> {
        Err(Error::Unsupported(
            "open() requires random access; this archive is streaming-only".into(),
        ))
    }

    fn extract(
        &mut self,
        _member: MemberRef,
        _dest: &Path,
        _password: Option<&[u8]>,
    ) -> Result<PathBuf> {
        Err(Error::Unsupported(
            "extract() requires random access; this archive is streaming-only".into(),
        ))
    }

    fn extract_all(
        &mut self,
        selector: Selector,
        dest: &Path,
        password: Option<&[u8]>,
        post_filter: Option<PostFilter>,
    ) -> Result<HashMap<String, PathBuf>> {
        self.inner.extract_all(selector, dest, password, post_filter)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    fn has_random_access(&self) -> bool {
        false
    }
}
