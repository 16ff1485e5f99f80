//! TAR adapter (C6), wrapping the `tar` crate over a compressed-stream
//! opener selected by extension or an explicit compression tag.
//!
//! Grounded on `archivey.tar_reader.TarReader` (`original_source/src/archivey/tar_reader.py`).

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::extract::{ExtractionConfig, ExtractionHelper};
use crate::format::compressed_stream::{open_compressed_file, sniff_extension};
use crate::io_helpers::ExceptionTranslatingReader;
use crate::reader::{check_filter_identity, selector_matches, ArchiveReader, MemberRef, PostFilter, Selector};
use crate::registry::MemberRegistry;
use crate::types::{
    ArchiveFormat, ArchiveId, ArchiveInfo, ArchiveMember, CompressionFormat, CreateSystem, MemberKind,
    RawInfo,
};
use crate::unique_id::next_archive_id;

/// A TAR archive read member-by-member. The `tar` crate only gives a
/// streaming view of entries, so the member list is built incrementally as
/// the archive is walked once, then replayed from the registry on any
/// further call (mirroring `TarReader.iter_members_with_io`'s
/// re-iteration-from-cache behavior).
pub struct TarReader {
    path: String,
    archive_id: ArchiveId,
    archive_path: PathBuf,
    compression: Option<CompressionFormat>,
    registry: MemberRegistry,
    config: Config,
    fully_scanned: bool,
}

impl TarReader {
    /// Open `path` as a TAR archive, optionally with an outer compression
    /// layer sniffed from the extension or given explicitly.
    pub fn open(path: &Path, compression: Option<CompressionFormat>, config: Config) -> Result<Self> {
        let compression = compression.or_else(|| sniff_extension(&path.display().to_string()));
        let archive_id = next_archive_id();
        Ok(Self {
            path: path.display().to_string(),
            archive_id,
            archive_path: path.to_path_buf(),
            compression,
            registry: MemberRegistry::new(archive_id),
            config,
            fully_scanned: false,
        })
    }

    fn open_stream(&self) -> Result<Box<dyn Read>> {
        match self.compression {
            Some(fmt) => open_compressed_file(&self.archive_path, fmt),
            None => Ok(Box::new(BufReader::new(File::open(&self.archive_path)?))),
        }
    }

    fn scan_all(&mut self) -> Result<()> {
        if self.fully_scanned {
            return Ok(());
        }
        let stream = self.open_stream()?;
        let mut archive = tar::Archive::new(stream);
        let mut tail = Vec::new();
        for (index, entry) in archive.entries().map_err(translate_tar_error)?.enumerate() {
            let entry = entry.map_err(translate_tar_error)?;
            let member = tarinfo_to_member(&entry, index)?;
            self.registry.register(member);
        }
        if self.config.tar_check_integrity {
            // `tar::Archive::entries()` stops as soon as it sees one all-zero
            // header block; it never looks past it. The proper end-of-archive
            // marker is two such blocks, so anything non-zero in what's left
            // of the stream is trailer corruption the main loop never saw.
            let mut trailing = archive.into_inner();
            trailing.read_to_end(&mut tail).map_err(translate_tar_error)?;
            if tail.iter().any(|&b| b != 0) {
                return Err(Error::corrupted("non-zero bytes found in tar trailer"));
            }
        }
        self.registry.mark_all_registered();
        self.fully_scanned = true;
        Ok(())
    }

    /// Archive-level metadata. TAR itself carries no comment or version;
    /// `is_solid` is `true` whenever an outer compression layer is present,
    /// since later members can't be decoded without replaying earlier ones.
    pub fn get_archive_info(&self) -> ArchiveInfo {
        let format = match self.compression {
            Some(CompressionFormat::Gzip) => ArchiveFormat::TarGz,
            Some(CompressionFormat::Bzip2) => ArchiveFormat::TarBz2,
            Some(CompressionFormat::Xz) => ArchiveFormat::TarXz,
            Some(CompressionFormat::Zstd) => ArchiveFormat::TarZstd,
            Some(CompressionFormat::Lz4) => ArchiveFormat::TarLz4,
            None => ArchiveFormat::Tar,
        };
        ArchiveInfo {
            format,
            version: None,
            is_solid: self.compression.is_some(),
            comment: None,
            extra: HashMap::new(),
        }
    }

    fn resolve(&self, member_ref: &MemberRef) -> Result<ArchiveMember> {
        let member = match member_ref {
            MemberRef::Id(id) => self.registry.get(*id).cloned(),
            MemberRef::Name(name) => self.registry.get_by_filename(name).cloned(),
        };
        member.ok_or_else(|| Error::MemberNotFound(format!("{member_ref:?}")))
    }
}

fn tarinfo_to_member(entry: &tar::Entry<'_, Box<dyn Read>>, index: usize) -> Result<ArchiveMember> {
    let header = entry.header();
    let mut filename = entry
        .path()
        .map_err(|e| Error::corrupted(e.to_string()))?
        .to_string_lossy()
        .into_owned();

    let kind = match header.entry_type() {
        tar::EntryType::Directory => MemberKind::Dir,
        tar::EntryType::Regular | tar::EntryType::Continuous | tar::EntryType::GNUSparse => MemberKind::File,
        tar::EntryType::Symlink => MemberKind::Symlink,
        tar::EntryType::Link => MemberKind::Hardlink,
        _ => MemberKind::Other,
    };

    if kind == MemberKind::Dir && !filename.ends_with('/') {
        filename.push('/');
    }

    let link_target = entry
        .link_name()
        .ok()
        .flatten()
        .map(|p| p.to_string_lossy().into_owned());

    let mtime = header
        .mtime()
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs as i64, 0))
        .map(|dt| dt.naive_utc());

    let mode = header.mode().ok();

    let mut extra = HashMap::new();
    if let Ok(uid) = header.uid() {
        extra.insert("uid".to_string(), uid.to_string());
    }
    if let Ok(gid) = header.gid() {
        extra.insert("gid".to_string(), gid.to_string());
    }
    if let Some(username) = header.username().ok().flatten() {
        extra.insert("uname".to_string(), username.to_string());
    }

    Ok(ArchiveMember {
        filename,
        file_size: header.size().ok(),
        compress_size: None,
        mtime,
        kind,
        mode,
        crc32: None,
        compression_method: None,
        comment: None,
        encrypted: false,
        create_system: CreateSystem::Unix,
        extra,
        link_target,
        link_target_member: None,
        link_target_type: None,
        raw_info: RawInfo::Index(index),
        member_id: crate::types::MemberId(0),
        archive_id: ArchiveId(0),
    })
}

fn translate_tar_error(e: std::io::Error) -> Error {
    let msg = e.to_string();
    if msg.contains("unexpected end of file") || msg.contains("UnexpectedEof") {
        Error::Truncated(msg)
    } else if msg.contains("invalid") || msg.contains("archive header") {
        Error::corrupted(msg)
    } else {
        Error::Io(e)
    }
}

impl ArchiveReader for TarReader {
    fn format(&self) -> ArchiveFormat {
        self.get_archive_info().format
    }

    fn archive_path(&self) -> &str {
        &self.path
    }

    fn members_if_available(&mut self) -> Option<Vec<ArchiveMember>> {
        if self.fully_scanned {
            Some(self.registry.members())
        } else {
            None
        }
    }

    fn get_members(&mut self) -> Result<Vec<ArchiveMember>> {
        self.scan_all()?;
        Ok(self.registry.members())
    }

    fn iter_members_with_io<'a>(
        &'a mut self,
        selector: Selector,
        _password: Option<&[u8]>,
        post_filter: Option<PostFilter>,
    ) -> Box<dyn Iterator<Item = Result<(ArchiveMember, Option<Box<dyn Read + 'a>>)>> + 'a> {
        // Random access: re-walk the archive from disk, since `tar::Archive`
        // gives no indexed seek. `scan_all` runs first regardless of prior
        // call order so every member has already gone through
        // `MemberRegistry::register` (real unique ids, link resolution) by
        // the time anything is yielded here.
        if let Err(e) = self.scan_all() {
            return Box::new(std::iter::once(Err(e)));
        }

        let stream = match self.open_stream() {
            Ok(s) => s,
            Err(e) => return Box::new(std::iter::once(Err(e))),
        };
        let mut archive = tar::Archive::new(stream);
        let entries = match archive.entries() {
            Ok(e) => e,
            Err(e) => return Box::new(std::iter::once(Err(translate_tar_error(e)))),
        };

        let registry_snapshot = self.registry.members();

        Box::new(
            entries
                .enumerate()
                .filter_map(move |(index, entry)| {
                    let mut entry = match entry {
                        Ok(e) => e,
                        Err(e) => return Some(Err(translate_tar_error(e))),
                    };

                    let member = match registry_snapshot.get(index).cloned() {
                        Some(m) => m,
                        None => {
                            return Some(Err(Error::generic(
                                "tar member missing from registry during iteration",
                            )))
                        }
                    };

                    if !selector_matches(&selector, &member) {
                        return None;
                    }

                    let original_id = member.member_id;
                    let member = match &post_filter {
                        Some(f) => match f(member) {
                            Some(m) => m,
                            None => return None,
                        },
                        None => member,
                    };
                    if let Err(e) = check_filter_identity(original_id, &member) {
                        return Some(Err(e));
                    }

                    if !member.is_file() {
                        return Some(Ok((member, None)));
                    }

                    let mut buf = Vec::new();
                    if let Err(e) = entry.read_to_end(&mut buf) {
                        return Some(Err(translate_tar_error(e)));
                    }
                    let reader: Box<dyn Read + 'a> = Box::new(ExceptionTranslatingReader::new(
                        std::io::Cursor::new(buf),
                        |_| None,
                    ));
                    Some(Ok((member, Some(reader))))
                }),
        )
    }

    fn open(&mut self, member: MemberRef, _password: Option<&[u8]>) -> Result<Box<dyn Read + '_>> {
        self.scan_all()?;
        let member = self.resolve(&member)?;
        let member = if member.is_link() {
            let terminal_id = self
                .registry
                .resolve_terminal(member.member_id)
                .ok_or_else(|| Error::MemberCannotBeOpened(member.filename.clone()))?;
            self.registry
                .get(terminal_id)
                .cloned()
                .ok_or_else(|| Error::MemberCannotBeOpened(member.filename.clone()))?
        } else {
            member
        };
        if !member.is_file() {
            return Err(Error::MemberCannotBeOpened(member.filename));
        }
        let target_index = match member.raw_info {
            RawInfo::Index(idx) => idx,
            RawInfo::None => return Err(Error::generic("tar member missing raw index")),
        };

        let stream = self.open_stream()?;
        let mut archive = tar::Archive::new(stream);
        let mut entries = archive.entries().map_err(translate_tar_error)?;
        let entry = entries
            .nth(target_index)
            .ok_or_else(|| Error::MemberNotFound(member.filename.clone()))?
            .map_err(translate_tar_error)?;

        let mut buf = Vec::new();
        let mut entry = entry;
        entry.read_to_end(&mut buf).map_err(translate_tar_error)?;
        Ok(Box::new(std::io::Cursor::new(buf)))
    }

    fn extract(&mut self, member: MemberRef, dest: &Path, password: Option<&[u8]>) -> Result<PathBuf> {
        let member = self.resolve(&member)?;
        let cfg = ExtractionConfig {
            overwrite_mode: self.config.overwrite_mode,
            can_process_pending_extractions: false,
        };
        let mut helper = ExtractionHelper::new(dest, &cfg)?;
        let mut stream = if member.is_file() {
            Some(self.open(MemberRef::Id(member.member_id), password)?)
        } else {
            None
        };
        let path = helper.process_member(member, stream.as_deref_mut().map(|s| s as &mut dyn Read))?;
        helper.finish(self.config.extract_apply_mode, self.config.extract_apply_mtime)?;
        Ok(path)
    }

    fn extract_all(
        &mut self,
        selector: Selector,
        dest: &Path,
        password: Option<&[u8]>,
        post_filter: Option<PostFilter>,
    ) -> Result<HashMap<String, PathBuf>> {
        let cfg = ExtractionConfig {
            overwrite_mode: self.config.overwrite_mode,
            can_process_pending_extractions: true,
        };
        let mut helper = ExtractionHelper::new(dest, &cfg)?;
        let apply_mode = self.config.extract_apply_mode;
        let apply_mtime = self.config.extract_apply_mtime;

        for item in self.iter_members_with_io(selector, password, post_filter) {
            let (member, stream) = item?;
            let mut stream = stream;
            helper.process_member(member, stream.as_deref_mut())?;
        }

        helper.finish(apply_mode, apply_mtime)
    }

    fn close(&mut self) -> Result<()> {
        debug!(path = %self.path, "closing tar reader");
        Ok(())
    }

    fn has_random_access(&self) -> bool {
        true
    }
}
