//! Presence-probing for optional external collaborators (C11).
//!
//! Mirrors `archivey`'s own dependency-presence checks (it probes for
//! `rarfile`'s `UNRAR_TOOL` at import time); here it's a minimal in-process
//! check, not a standalone tool.

use std::sync::OnceLock;

use which::which;

/// True if the external `unrar` binary is on `PATH`. Cached after the first
/// call since `PATH` doesn't change mid-process.
pub fn unrar_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| which("unrar").is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrar_available_does_not_panic() {
        let _ = unrar_available();
    }
}
