//! Reader configuration (C9).
//!
//! Mirrors `archivey.config.ArchiveyConfig` / `get_default_config()`: a plain
//! struct of knobs passed by value at open time, no file or environment
//! loading (that's left to the caller, same as the original).

use crate::encoding::Encoding;

/// What to do when an extraction target path already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwriteMode {
    /// Leave the existing file alone and skip this member.
    Skip,
    /// Always overwrite.
    #[default]
    Overwrite,
    /// Overwrite only if the member's `mtime` is newer than the file on disk.
    OverwriteIfNewer,
    /// Fail extraction with an error.
    Error,
}

/// Reader-wide configuration, passed to every format adapter at open time.
#[derive(Debug, Clone)]
pub struct Config {
    /// What to do when an extraction target already exists on disk.
    pub overwrite_mode: OverwriteMode,
    /// Whether the TAR adapter should read and validate the two trailing
    /// zero blocks after the last header (mirrors `tar_check_integrity`).
    pub tar_check_integrity: bool,
    /// Encodings tried in order when a ZIP filename/comment isn't flagged
    /// UTF-8, before falling back to lossy UTF-8.
    pub zip_fallback_encodings: Vec<Encoding>,
    /// Prefer the `rawrxd`-parsed member list over anything `unrar` itself
    /// reports, when both are available.
    pub rar_prefer_native_headers: bool,
    /// Apply file mode bits on extraction (no-op on non-Unix targets).
    pub extract_apply_mode: bool,
    /// Apply mtime on extraction.
    pub extract_apply_mtime: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            overwrite_mode: OverwriteMode::default(),
            tar_check_integrity: true,
            zip_fallback_encodings: vec![Encoding::Cp437, Encoding::ShiftJis],
            rar_prefer_native_headers: true,
            extract_apply_mode: true,
            extract_apply_mtime: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_overwrites_and_checks_tar_integrity() {
        let cfg = Config::default();
        assert_eq!(cfg.overwrite_mode, OverwriteMode::Overwrite);
        assert!(cfg.tar_check_integrity);
        assert!(!cfg.zip_fallback_encodings.is_empty());
    }
}
