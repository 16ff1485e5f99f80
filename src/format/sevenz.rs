//! 7-Zip adapter (C6), wrapping `sevenz_rust2::SevenZReader`.
//!
//! 7z has no dedicated reader in `original_source/` (the Python project
//! delegates to `py7zr` the same way); this adapter follows the same shape
//! as `format::zip` since both formats expose a central directory/header
//! that can be read once to build the full member list.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::extract::{ExtractionConfig, ExtractionHelper};
use crate::reader::{check_filter_identity, selector_matches, ArchiveReader, MemberRef, PostFilter, Selector};
use crate::registry::MemberRegistry;
use crate::types::{
    ArchiveFormat, ArchiveId, ArchiveInfo, ArchiveMember, CreateSystem, MemberKind, RawInfo,
};
use crate::unique_id::next_archive_id;

/// A 7z archive. Like ZIP, the whole index is read eagerly at open time.
pub struct SevenZReader {
    path: String,
    archive_id: ArchiveId,
    archive: sevenz_rust2::SevenZReader<File>,
    registry: MemberRegistry,
    config: Config,
}

impl SevenZReader {
    /// Open `path` as a 7z archive and register every entry.
    pub fn open(path: &Path, config: Config) -> Result<Self> {
        let file = File::open(path)?;
        let archive = sevenz_rust2::SevenZReader::new(file, sevenz_rust2::Password::empty())
            .map_err(translate_7z_error)?;
        let archive_id = next_archive_id();
        let mut reader = Self {
            path: path.display().to_string(),
            archive_id,
            archive,
            registry: MemberRegistry::new(archive_id),
            config,
        };
        reader.register_all()?;
        Ok(reader)
    }

    /// Open `path` as a 7z archive protected by `password`.
    pub fn open_with_password(path: &Path, password: &str, config: Config) -> Result<Self> {
        let file = File::open(path)?;
        let archive = sevenz_rust2::SevenZReader::new(file, sevenz_rust2::Password::from(password))
            .map_err(translate_7z_error)?;
        let archive_id = next_archive_id();
        let mut reader = Self {
            path: path.display().to_string(),
            archive_id,
            archive,
            registry: MemberRegistry::new(archive_id),
            config,
        };
        reader.register_all()?;
        Ok(reader)
    }

    fn register_all(&mut self) -> Result<()> {
        let entries: Vec<_> = self.archive.archive().files.clone();
        for (index, entry) in entries.iter().enumerate() {
            let member = entry_to_member(entry, index, self.archive_id);
            self.registry.register(member);
        }
        self.registry.mark_all_registered();
        Ok(())
    }

    fn resolve(&self, member_ref: &MemberRef) -> Result<ArchiveMember> {
        let member = match member_ref {
            MemberRef::Id(id) => self.registry.get(*id).cloned(),
            MemberRef::Name(name) => self.registry.get_by_filename(name).cloned(),
        };
        member.ok_or_else(|| Error::MemberNotFound(format!("{member_ref:?}")))
    }

    /// Archive-level metadata. 7z is always solid-capable; we report
    /// `is_solid: true` conservatively since folder boundaries aren't
    /// surfaced by `sevenz_rust2`'s public API.
    pub fn get_archive_info(&self) -> ArchiveInfo {
        ArchiveInfo {
            format: ArchiveFormat::SevenZip,
            version: None,
            is_solid: true,
            comment: None,
            extra: HashMap::new(),
        }
    }
}

fn entry_to_member(
    entry: &sevenz_rust2::ArchiveEntry,
    index: usize,
    archive_id: ArchiveId,
) -> ArchiveMember {
    let kind = if entry.is_directory() {
        MemberKind::Dir
    } else {
        MemberKind::File
    };

    ArchiveMember {
        filename: entry.name().to_string(),
        file_size: Some(entry.size()),
        compress_size: None,
        mtime: entry.last_modified_date().map(|t| t.naive_utc()),
        kind,
        mode: None,
        crc32: if entry.has_crc() { Some(entry.crc32()) } else { None },
        compression_method: None,
        comment: None,
        encrypted: entry.has_stream() && entry.is_encrypted(),
        create_system: CreateSystem::Unknown,
        extra: HashMap::new(),
        link_target: None,
        link_target_member: None,
        link_target_type: None,
        raw_info: RawInfo::Index(index),
        member_id: crate::types::MemberId(0),
        archive_id,
    }
}

fn translate_7z_error(e: sevenz_rust2::Error) -> Error {
    match e {
        sevenz_rust2::Error::PasswordRequired => Error::Encrypted("password required".into()),
        sevenz_rust2::Error::MaybeBadPassword(msg) => Error::Encrypted(msg.to_string()),
        other => Error::corrupted(other.to_string()),
    }
}

impl ArchiveReader for SevenZReader {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::SevenZip
    }

    fn archive_path(&self) -> &str {
        &self.path
    }

    fn members_if_available(&mut self) -> Option<Vec<ArchiveMember>> {
        Some(self.registry.members())
    }

    fn get_members(&mut self) -> Result<Vec<ArchiveMember>> {
        Ok(self.registry.members())
    }

    fn iter_members_with_io<'a>(
        &'a mut self,
        selector: Selector,
        _password: Option<&[u8]>,
        post_filter: Option<PostFilter>,
    ) -> Box<dyn Iterator<Item = Result<(ArchiveMember, Option<Box<dyn Read + 'a>>)>> + 'a> {
        let members: Vec<ArchiveMember> = self
            .registry
            .members()
            .into_iter()
            .filter(|m| selector_matches(&selector, m))
            .collect();

        let mut contents: HashMap<usize, Vec<u8>> = HashMap::new();
        for member in &members {
            if !member.is_file() {
                continue;
            }
            let RawInfo::Index(index) = member.raw_info else {
                continue;
            };
            let mut buf = Vec::new();
            if let Err(e) = self
                .archive
                .read_file(index, &mut buf)
                .map_err(translate_7z_error)
            {
                return Box::new(std::iter::once(Err(e)));
            }
            contents.insert(index, buf);
        }

        Box::new(members.into_iter().filter_map(move |member| {
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
            let RawInfo::Index(index) = member.raw_info else {
                return Some(Err(Error::generic("7z member missing raw index")));
            };
            let buf = contents.remove(&index).unwrap_or_default();
            let reader: Box<dyn Read + 'a> = Box::new(std::io::Cursor::new(buf));
            Some(Ok((member, Some(reader))))
        }))
    }

    fn open(&mut self, member: MemberRef, _password: Option<&[u8]>) -> Result<Box<dyn Read + '_>> {
        let member = self.resolve(&member)?;
        if !member.is_file() {
            return Err(Error::MemberCannotBeOpened(member.filename));
        }
        let RawInfo::Index(index) = member.raw_info else {
            return Err(Error::generic("7z member missing raw index"));
        };
        let mut buf = Vec::new();
        self.archive.read_file(index, &mut buf).map_err(translate_7z_error)?;
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
        debug!(path = %self.path, "closing 7z reader");
        Ok(())
    }

    fn has_random_access(&self) -> bool {
        true
    }
}
