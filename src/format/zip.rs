//! ZIP adapter (C6), wrapping the `zip` crate's `ZipArchive`/`ZipFile`.
//!
//! Grounded on `archivey.zip_reader.ZipReader` (`original_source/src/archivey/zip_reader.py`).

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Timelike};
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::extract::{ExtractionConfig, ExtractionHelper};
use crate::io_helpers::ExceptionTranslatingReader;
use crate::reader::{check_filter_identity, selector_matches, ArchiveReader, MemberRef, PostFilter, Selector};
use crate::registry::MemberRegistry;
use crate::types::{
    ArchiveFormat, ArchiveId, ArchiveInfo, ArchiveMember, CreateSystem, MemberKind, RawInfo,
};
use crate::unique_id::next_archive_id;

/// A fully opened ZIP archive: the whole central directory is read eagerly
/// at construction (the `zip` crate doesn't support a cheaper partial read),
/// so this reader always has random access.
pub struct ZipReader {
    path: String,
    archive_id: ArchiveId,
    archive: zip::ZipArchive<File>,
    registry: MemberRegistry,
    config: Config,
}

impl ZipReader {
    /// Open `path` as a ZIP archive, reading its central directory and
    /// registering every member.
    pub fn open(path: &Path, config: Config) -> Result<Self> {
        let file = File::open(path)?;
        let archive = zip::ZipArchive::new(file).map_err(translate_zip_open_error)?;
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
        let count = self.archive.len();
        for index in 0..count {
            let member = self.build_member(index)?;
            self.registry.register(member);
        }
        self.registry.mark_all_registered();
        Ok(())
    }

    fn decode_name(&self, raw: &[u8], is_utf8_flagged: bool) -> String {
        let (valid_utf8, _requires_utf8) = crate::encoding::detect_utf8(raw);
        if is_utf8_flagged || valid_utf8 {
            return String::from_utf8_lossy(raw).into_owned();
        }
        for enc in &self.config.zip_fallback_encodings {
            if let Ok(decoded) = enc.decode(raw) {
                return decoded;
            }
        }
        String::from_utf8_lossy(raw).into_owned()
    }

    fn build_member(&mut self, index: usize) -> Result<ArchiveMember> {
        let entry = self.archive.by_index(index).map_err(translate_zip_open_error)?;

        let filename = entry.name().to_string();
        let raw_name = entry.name_raw().to_vec();
        let is_utf8_flagged = entry.is_utf8_name();
        let mode = entry.unix_mode();
        let is_symlink = mode.map(|m| m & 0o170000 == 0o120000).unwrap_or(false);

        let kind = if entry.is_dir() {
            MemberKind::Dir
        } else if is_symlink {
            MemberKind::Symlink
        } else {
            MemberKind::File
        };

        let create_system = match entry.version_made_by().0 {
            0 => CreateSystem::Fat,
            3 => CreateSystem::Unix,
            6 => CreateSystem::Os2Hpfs,
            7 => CreateSystem::Macintosh,
            10 | 11 => CreateSystem::Ntfs,
            _ => CreateSystem::Unknown,
        };

        let mtime = entry
            .last_modified()
            .and_then(|dt| {
                chrono::NaiveDate::from_ymd_opt(dt.year() as i32, dt.month() as u32, dt.day() as u32)
                    .and_then(|d| d.and_hms_opt(dt.hour() as u32, dt.minute() as u32, dt.second() as u32))
            });

        let compression_method = Some(format!("{:?}", entry.compression()).to_lowercase());
        let encrypted = entry.encrypted();
        let file_size = Some(entry.size());
        let compress_size = Some(entry.compressed_size());
        let crc32 = if encrypted { None } else { Some(entry.crc32()) };
        let comment = {
            let c = entry.comment();
            if c.is_empty() {
                None
            } else {
                Some(self.decode_name(c.as_bytes(), true))
            }
        };

        let decoded_filename = if filename.is_empty() {
            self.decode_name(&raw_name, is_utf8_flagged)
        } else {
            filename
        };

        drop(entry);

        let link_target = if is_symlink {
            self.read_symlink_target(index)?
        } else {
            None
        };

        Ok(ArchiveMember {
            filename: decoded_filename,
            file_size,
            compress_size,
            mtime,
            kind,
            mode: mode.map(|m| m & 0o7777),
            crc32,
            compression_method,
            comment,
            encrypted,
            create_system,
            extra: HashMap::new(),
            link_target,
            link_target_member: None,
            link_target_type: None,
            raw_info: RawInfo::Index(index),
            member_id: crate::types::MemberId(0),
            archive_id: self.archive_id,
        })
    }

    fn read_symlink_target(&mut self, index: usize) -> Result<Option<String>> {
        let mut entry = self.archive.by_index(index).map_err(translate_zip_open_error)?;
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf)?;
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    /// Archive-level metadata: ZIP has no solid-compression concept, so
    /// `is_solid` is always `false`.
    pub fn get_archive_info(&self) -> ArchiveInfo {
        let comment_bytes = self.archive.comment();
        let comment = if comment_bytes.is_empty() {
            None
        } else {
            Some(self.decode_name(comment_bytes, true))
        };
        ArchiveInfo {
            format: ArchiveFormat::Zip,
            version: None,
            is_solid: false,
            comment,
            extra: HashMap::new(),
        }
    }

    fn raw_index(member: &ArchiveMember) -> Result<usize> {
        match member.raw_info {
            RawInfo::Index(idx) => Ok(idx),
            RawInfo::None => Err(Error::generic("zip member missing raw index")),
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

fn translate_zip_open_error(e: zip::result::ZipError) -> Error {
    match e {
        zip::result::ZipError::InvalidArchive(msg) => Error::corrupted(msg.to_string()),
        zip::result::ZipError::UnsupportedArchive(msg) => Error::Unsupported(msg.to_string()),
        zip::result::ZipError::FileNotFound => Error::MemberNotFound("zip entry".into()),
        zip::result::ZipError::InvalidPassword => Error::Encrypted("wrong password".into()),
        zip::result::ZipError::Io(e) => Error::Io(e),
        other => Error::generic(other.to_string()),
    }
}

fn translate_zip_read_error(e: &std::io::Error) -> Option<Error> {
    let msg = e.to_string();
    if msg.contains("password") {
        Some(Error::Encrypted(msg))
    } else if msg.contains("CRC") || msg.contains("invalid") {
        Some(Error::corrupted(msg))
    } else {
        None
    }
}

impl ArchiveReader for ZipReader {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Zip
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
        password: Option<&[u8]>,
        post_filter: Option<PostFilter>,
    ) -> Box<dyn Iterator<Item = Result<(ArchiveMember, Option<Box<dyn Read + 'a>>)>> + 'a> {
        let members: Vec<ArchiveMember> = self
            .registry
            .members()
            .into_iter()
            .filter(|m| selector_matches(&selector, m))
            .collect();
        let password = password.map(|p| p.to_vec());
        let archive = &mut self.archive;

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

            let index = match ZipReader::raw_index(&member) {
                Ok(i) => i,
                Err(e) => return Some(Err(e)),
            };
            let opened = match &password {
                Some(pw) => archive.by_index_decrypt(index, pw),
                None => archive.by_index(index),
            };
            match opened {
                Ok(entry) => {
                    let reader: Box<dyn Read + 'a> =
                        Box::new(ExceptionTranslatingReader::new(entry, translate_zip_read_error));
                    Some(Ok((member, Some(reader))))
                }
                Err(e) => Some(Err(translate_zip_open_error(e))),
            }
        }))
    }

    fn open(&mut self, member: MemberRef, password: Option<&[u8]>) -> Result<Box<dyn Read + '_>> {
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
        let index = Self::raw_index(&member)?;
        let entry = match password {
            Some(pw) => self.archive.by_index_decrypt(index, pw).map_err(translate_zip_open_error)?,
            None => self.archive.by_index(index).map_err(translate_zip_open_error)?,
        };
        Ok(Box::new(ExceptionTranslatingReader::new(entry, translate_zip_read_error)))
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
        debug!(path = %self.path, "closing zip reader");
        Ok(())
    }

    fn has_random_access(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_fixture_zip(path: &Path) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options: zip::write::FileOptions<()> =
            zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer.start_file("hello.txt", options).unwrap();
        writer.write_all(b"hello world").unwrap();
        writer.add_directory("dir/", options).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn reads_members_and_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let zip_path = tmp.path().join("fixture.zip");
        build_fixture_zip(&zip_path);

        let mut reader = ZipReader::open(&zip_path, Config::default()).unwrap();
        let members = reader.get_members().unwrap();
        assert_eq!(members.len(), 2);

        let mut contents = String::new();
        reader
            .open("hello.txt".into(), None)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "hello world");
    }
}
