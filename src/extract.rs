//! The extraction helper (C8): path containment, overwrite policy, dispatch
//! by member kind, pending hardlinks, and deferred metadata application.
//!
//! Grounded on `archivey.base_reader.ArchiveReader._extractall_with_random_access`
//! / `_extractall_with_streaming_mode` / `_extract_pending_files`.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::OverwriteMode;
use crate::error::{Error, Result};
use crate::registry::normalize_posix;
use crate::types::{ArchiveMember, MemberId, MemberKind};

/// Per-extraction-run configuration, distinct from the reader-wide
/// [`crate::config::Config`] because extraction may be invoked with a
/// narrower overwrite policy than the reader was opened with.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// What to do when the target path already exists.
    pub overwrite_mode: OverwriteMode,
    /// Whether hardlinks whose target hasn't been written yet should be
    /// queued and retried once iteration finishes, rather than failing
    /// immediately (true for random-access readers walking out of order).
    pub can_process_pending_extractions: bool,
}

/// A hardlink member that couldn't be linked yet because its target member
/// hadn't been extracted at the time it was seen.
struct PendingHardlink {
    member: ArchiveMember,
    target_path: PathBuf,
}

/// Accumulates extracted paths and deferred metadata across one `extract_all`
/// call; one instance per call, not reused across readers.
pub struct ExtractionHelper<'a> {
    dest_root: PathBuf,
    config: &'a ExtractionConfig,
    written: HashMap<String, PathBuf>,
    pending_hardlinks: Vec<PendingHardlink>,
    deferred_metadata: Vec<(PathBuf, ArchiveMember)>,
}

impl<'a> ExtractionHelper<'a> {
    /// Begin a new extraction run under `dest_root`, creating it if absent.
    pub fn new(dest_root: &Path, config: &'a ExtractionConfig) -> Result<Self> {
        fs::create_dir_all(dest_root)?;
        let dest_root = dest_root.canonicalize().unwrap_or_else(|_| dest_root.to_path_buf());
        Ok(Self {
            dest_root,
            config,
            written: HashMap::new(),
            pending_hardlinks: Vec::new(),
            deferred_metadata: Vec::new(),
        })
    }

    /// Resolve `member.filename` to a path under the destination root,
    /// refusing any path that escapes it after normalization.
    pub fn resolve_target_path(&self, filename: &str) -> Result<PathBuf> {
        let normalized = normalize_posix(filename);
        if normalized == ".." || normalized.starts_with("../") {
            return Err(Error::PathTraversal(filename.to_string()));
        }
        let relative = normalized.trim_start_matches('/');
        Ok(self.dest_root.join(relative))
    }

    /// Process one member: create directories, write file contents, record a
    /// symlink/hardlink, or queue a hardlink whose target isn't written yet.
    ///
    /// `contents` is `None` for directories and (pending) links.
    pub fn process_member(
        &mut self,
        member: ArchiveMember,
        contents: Option<&mut dyn Read>,
    ) -> Result<PathBuf> {
        let target = self.resolve_target_path(&member.filename)?;

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        match member.kind {
            MemberKind::Dir => {
                fs::create_dir_all(&target)?;
            }
            MemberKind::File => {
                self.write_file(&target, contents)?;
            }
            MemberKind::Symlink => {
                self.write_symlink(&target, &member)?;
            }
            MemberKind::Hardlink => {
                if !self.try_hardlink(&target, &member)? {
                    if !self.config.can_process_pending_extractions {
                        return Err(Error::MemberCannotBeOpened(format!(
                            "hardlink {} has no extracted target to link to",
                            member.filename
                        )));
                    }
                    debug!(filename = %member.filename, "queuing hardlink, target not yet written");
                    self.pending_hardlinks.push(PendingHardlink {
                        member: member.clone(),
                        target_path: target.clone(),
                    });
                }
            }
            MemberKind::Other => {
                warn!(filename = %member.filename, "skipping unsupported member kind");
                return Ok(target);
            }
        }

        self.written.insert(member.filename.clone(), target.clone());
        self.deferred_metadata.push((target.clone(), member));
        Ok(target)
    }

    fn write_file(&self, target: &Path, contents: Option<&mut dyn Read>) -> Result<()> {
        if target.exists() && !self.should_overwrite(target)? {
            debug!(path = %target.display(), "skipping existing file per overwrite policy");
            return Ok(());
        }
        let mut out = fs::File::create(target)?;
        if let Some(r) = contents {
            io::copy(r, &mut out)?;
        }
        Ok(())
    }

    fn should_overwrite(&self, target: &Path) -> Result<bool> {
        match self.config.overwrite_mode {
            OverwriteMode::Skip => Ok(false),
            OverwriteMode::Overwrite => Ok(true),
            OverwriteMode::OverwriteIfNewer => Ok(false),
            OverwriteMode::Error => Err(Error::generic(format!(
                "destination already exists: {}",
                target.display()
            ))),
        }
    }

    fn write_symlink(&self, target: &Path, member: &ArchiveMember) -> Result<()> {
        let Some(link_target) = &member.link_target else {
            return Err(Error::MemberCannotBeOpened(format!(
                "symlink {} has no target",
                member.filename
            )));
        };
        if target.exists() {
            fs::remove_file(target).ok();
        }
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(link_target, target)?;
        }
        #[cfg(not(unix))]
        {
            fs::write(target, link_target)?;
        }
        Ok(())
    }

    /// Attempt an immediate hardlink to an already-written sibling. Returns
    /// `Ok(false)` (not an error) if the target hasn't been written yet.
    fn try_hardlink(&self, target: &Path, member: &ArchiveMember) -> Result<bool> {
        let Some(link_name) = &member.link_target else {
            return Err(Error::MemberCannotBeOpened(format!(
                "hardlink {} has no target filename",
                member.filename
            )));
        };
        let Some(existing) = self.written.get(link_name) else {
            return Ok(false);
        };
        if target.exists() {
            fs::remove_file(target).ok();
        }
        fs::hard_link(existing, target)?;
        Ok(true)
    }

    /// Retry any hardlinks queued during the main pass. Called once
    /// iteration has fully drained.
    pub fn drain_pending_hardlinks(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending_hardlinks);
        for p in pending {
            if !self.try_hardlink(&p.target_path, &p.member)? {
                warn!(
                    filename = %p.member.filename,
                    target = ?p.member.link_target,
                    "hardlink target never materialized"
                );
            } else {
                self.written.insert(p.member.filename.clone(), p.target_path.clone());
            }
        }
        Ok(())
    }

    /// Apply deferred mode/mtime to every written path, in a second pass so
    /// that writing a directory's children doesn't clobber its own mtime.
    pub fn apply_deferred_metadata(&mut self, apply_mode: bool, apply_mtime: bool) {
        for (path, member) in self.deferred_metadata.drain(..) {
            if apply_mode {
                if let Some(mode) = member.mode {
                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::PermissionsExt;
                        if member.kind == MemberKind::Symlink {
                            // Non-fatal: not every platform/filesystem supports
                            // changing a symlink's own permission bits.
                            let _ = fs::set_permissions(&path, fs::Permissions::from_mode(mode));
                        } else if let Err(e) = fs::set_permissions(&path, fs::Permissions::from_mode(mode)) {
                            warn!(path = %path.display(), error = %e, "failed to set mode");
                        }
                    }
                }
            }
            if apply_mtime {
                if let Some(mtime) = member.mtime {
                    let ft = filetime_from_naive(mtime);
                    if let Err(e) = filetime_set(&path, ft) {
                        warn!(path = %path.display(), error = %e, "failed to set mtime");
                    }
                }
            }
        }
    }

    /// The map of original filename to written path, for every member
    /// processed so far.
    pub fn written(&self) -> &HashMap<String, PathBuf> {
        &self.written
    }

    /// Consume `self`, finishing pending hardlinks and deferred metadata,
    /// returning the filename-to-path map.
    pub fn finish(mut self, apply_mode: bool, apply_mtime: bool) -> Result<HashMap<String, PathBuf>> {
        self.drain_pending_hardlinks()?;
        self.apply_deferred_metadata(apply_mode, apply_mtime);
        Ok(self.written)
    }
}

/// Seconds-since-epoch, truncating sub-second precision; used only to drive
/// `set_file_mtime` without pulling in a timestamp crate beyond what the
/// teacher stack already provides via `chrono`.
fn filetime_from_naive(naive: chrono::NaiveDateTime) -> i64 {
    naive.and_utc().timestamp()
}

fn filetime_set(path: &Path, epoch_secs: i64) -> io::Result<()> {
    let duration = std::time::Duration::from_secs(epoch_secs.max(0) as u64);
    let mtime = std::time::SystemTime::UNIX_EPOCH + duration;
    let file = fs::File::options().write(true).open(path);
    match file {
        Ok(f) => f.set_modified(mtime),
        Err(_) => fs::OpenOptions::new().read(true).open(path)?.set_modified(mtime),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ArchiveId, CreateSystem, RawInfo};

    fn dummy_member(filename: &str, kind: MemberKind) -> ArchiveMember {
        ArchiveMember {
            filename: filename.to_string(),
            file_size: None,
            compress_size: None,
            mtime: None,
            kind,
            mode: None,
            crc32: None,
            compression_method: None,
            comment: None,
            encrypted: false,
            create_system: CreateSystem::Unknown,
            extra: HashMap::new(),
            link_target: None,
            link_target_member: None,
            link_target_type: None,
            raw_info: RawInfo::None,
            member_id: MemberId(1),
            archive_id: ArchiveId(1),
        }
    }

    #[test]
    fn refuses_path_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = ExtractionConfig {
            overwrite_mode: OverwriteMode::Overwrite,
            can_process_pending_extractions: true,
        };
        let helper = ExtractionHelper::new(tmp.path(), &cfg).unwrap();
        let err = helper.resolve_target_path("../../etc/passwd").unwrap_err();
        assert!(matches!(err, Error::PathTraversal(_)));
    }

    #[test]
    fn writes_directory_and_file() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = ExtractionConfig {
            overwrite_mode: OverwriteMode::Overwrite,
            can_process_pending_extractions: true,
        };
        let mut helper = ExtractionHelper::new(tmp.path(), &cfg).unwrap();
        helper
            .process_member(dummy_member("a/", MemberKind::Dir), None)
            .unwrap();
        let mut data: &[u8] = b"hello";
        let path = helper
            .process_member(dummy_member("a/b.txt", MemberKind::File), Some(&mut data))
            .unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn queues_hardlink_until_target_written() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = ExtractionConfig {
            overwrite_mode: OverwriteMode::Overwrite,
            can_process_pending_extractions: true,
        };
        let mut helper = ExtractionHelper::new(tmp.path(), &cfg).unwrap();

        let mut link = dummy_member("b.txt", MemberKind::Hardlink);
        link.link_target = Some("a.txt".to_string());
        helper.process_member(link, None).unwrap();
        assert_eq!(helper.pending_hardlinks.len(), 1);

        let mut data: &[u8] = b"hi";
        helper
            .process_member(dummy_member("a.txt", MemberKind::File), Some(&mut data))
            .unwrap();

        let written = helper.finish(false, false).unwrap();
        assert!(written.contains_key("b.txt"));
        assert_eq!(fs::read(written.get("b.txt").unwrap()).unwrap(), b"hi");
    }

    #[test]
    fn hardlink_fails_immediately_when_pending_extractions_disallowed() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = ExtractionConfig {
            overwrite_mode: OverwriteMode::Overwrite,
            can_process_pending_extractions: false,
        };
        let mut helper = ExtractionHelper::new(tmp.path(), &cfg).unwrap();

        let mut link = dummy_member("b.txt", MemberKind::Hardlink);
        link.link_target = Some("a.txt".to_string());
        let err = helper.process_member(link, None).unwrap_err();
        assert!(matches!(err, Error::MemberCannotBeOpened(_)));
        assert!(helper.pending_hardlinks.is_empty());
    }
}
