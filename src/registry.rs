//! The member registry: indices plus hardlink/symlink resolution (C4).
//!
//! Grounded on `archivey.base_reader.ArchiveReader.register_member` /
//! `_resolve_link_target` (`original_source/src/archivey/base_reader.py`):
//! this is a line-for-line port of that algorithm into Rust, trading the
//! Python `dict`/`list` indices for `HashMap`s and swapping back-references
//! for `MemberId` lookups (see Design Notes in `DESIGN.md`).

use std::collections::HashMap;

use tracing::{error, warn};

use crate::types::{ArchiveId, ArchiveMember, MemberId, MemberKind};
use crate::unique_id::MemberIdGenerator;

/// Owns the member table of one reader: indices by id, exact filename, and
/// normalized path, plus hardlink/symlink resolution.
pub struct MemberRegistry {
    archive_id: ArchiveId,
    id_gen: MemberIdGenerator,
    by_id: HashMap<MemberId, ArchiveMember>,
    /// Insertion order, which is registration order, which is `member_id`
    /// order (see invariant in `SPEC_FULL.md` §3).
    order: Vec<MemberId>,
    by_filename: HashMap<String, Vec<MemberId>>,
    by_normalized_path: HashMap<String, MemberId>,
    all_registered: bool,
}

impl MemberRegistry {
    /// Create an empty registry for a freshly minted archive id.
    pub fn new(archive_id: ArchiveId) -> Self {
        Self {
            archive_id,
            id_gen: MemberIdGenerator::new(),
            by_id: HashMap::new(),
            order: Vec::new(),
            by_filename: HashMap::new(),
            by_normalized_path: HashMap::new(),
            all_registered: false,
        }
    }

    /// The id of the archive this registry belongs to.
    pub fn archive_id(&self) -> ArchiveId {
        self.archive_id
    }

    /// True once [`Self::mark_all_registered`] has been called; the set of
    /// members is then frozen.
    pub fn all_registered(&self) -> bool {
        self.all_registered
    }

    /// Register a freshly built member: assign its id, insert it into all
    /// three indices, and run link resolution.
    ///
    /// # Panics
    /// Panics if called after [`Self::mark_all_registered`] (an assertion
    /// violation per the contract in `SPEC_FULL.md` §4.3).
    pub fn register(&mut self, mut member: ArchiveMember) -> MemberId {
        assert!(
            !self.all_registered,
            "register() called on a frozen registry"
        );

        let id = self.id_gen.next();
        member.member_id = id;
        member.archive_id = self.archive_id;

        tracing::info!(filename = %member.filename, member_id = id.as_u64(), "registering member");

        self.by_filename
            .entry(member.filename.clone())
            .or_default()
            .push(id);
        // Insertion is already in `member_id` order since ids are minted
        // monotonically by `register`, so no extra sort is needed here
        // (unlike the Python original, which re-sorts defensively).

        let normalized = normalize_posix(&member.filename);
        let shadow = match self.by_normalized_path.get(&normalized) {
            Some(incumbent) => *incumbent < id,
            None => true,
        };
        if shadow {
            self.by_normalized_path.insert(normalized, id);
        }

        self.order.push(id);
        self.by_id.insert(id, member);

        self.resolve_link(id, &mut Vec::new());

        id
    }

    /// Freeze the registry: no further `register` calls are legal.
    pub fn mark_all_registered(&mut self) {
        self.all_registered = true;
    }

    /// Look up a member by id.
    pub fn get(&self, id: MemberId) -> Option<&ArchiveMember> {
        self.by_id.get(&id)
    }

    /// Look up the latest-registered member with this exact filename.
    pub fn get_by_filename(&self, filename: &str) -> Option<&ArchiveMember> {
        self.by_filename
            .get(filename)
            .and_then(|ids| ids.last())
            .and_then(|id| self.by_id.get(id))
    }

    /// All members, in `member_id` order.
    pub fn members(&self) -> Vec<ArchiveMember> {
        self.order
            .iter()
            .filter_map(|id| self.by_id.get(id).cloned())
            .collect()
    }

    /// Number of members currently registered.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True if no members have been registered yet.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Re-run link resolution for `id`. Idempotent and cheap once the
    /// registry is frozen; callers (`open`/`extract`) re-run it because a
    /// later registration may have shadowed an earlier target.
    pub fn reresolve(&mut self, id: MemberId) {
        self.resolve_link(id, &mut Vec::new());
    }

    /// Follow `id` through `link_target_member` until a non-link member is
    /// reached, per `open()`'s "resolves link members to their target
    /// transitively" contract. Returns `None` if `id` is unknown, or if any
    /// hop along the chain is unresolved (a dangling link).
    ///
    /// Resolution already stores the terminal target directly on each link
    /// (see `resolve_hardlink`/`resolve_symlink`), so this only needs to loop
    /// defensively against a future change that stops doing so.
    pub fn resolve_terminal(&self, id: MemberId) -> Option<MemberId> {
        let mut current = id;
        let mut hops = 0;
        loop {
            let member = self.by_id.get(&current)?;
            if !matches!(member.kind, MemberKind::Hardlink | MemberKind::Symlink) {
                return Some(current);
            }
            current = member.link_target_member?;
            hops += 1;
            if hops > self.order.len() + 1 {
                return None;
            }
        }
    }

    fn resolve_link(&mut self, id: MemberId, visited: &mut Vec<MemberId>) {
        let (kind, link_target, filename) = {
            let Some(m) = self.by_id.get(&id) else {
                return;
            };
            let Some(target) = m.link_target.clone() else {
                return;
            };
            (m.kind, target, m.filename.clone())
        };

        match kind {
            MemberKind::Hardlink => {
                let Some(resolved) = self.resolve_hardlink(id, &link_target) else {
                    warn!(%filename, target = %link_target, "hardlink target not found");
                    return;
                };
                let member = self.by_id.get_mut(&id).expect("member just looked up");
                member.link_target_member = Some(resolved.0);
                member.link_target_type = Some(resolved.1);
            }
            MemberKind::Symlink => {
                let normalized = normalize_posix(&join_posix(&dirname_posix(&filename), &link_target));
                self.resolve_symlink(id, &filename, &normalized, visited);
            }
            _ => {}
        }
    }

    /// Follow a hardlink's `link_target` (an exact filename) to the last
    /// member with that name and a strictly lower `member_id`, recursing
    /// through further hardlinks. Guaranteed to terminate: `member_id` is
    /// strictly decreasing at each step.
    fn resolve_hardlink(&mut self, id: MemberId, link_target: &str) -> Option<(MemberId, MemberKind)> {
        let candidate = self
            .by_filename
            .get(link_target)?
            .iter()
            .copied()
            .filter(|cid| *cid < id)
            .max()?;

        let candidate_kind = self.by_id.get(&candidate)?.kind;
        if candidate_kind == MemberKind::Hardlink {
            self.resolve_link(candidate, &mut Vec::new());
            let candidate_member = self.by_id.get(&candidate)?;
            let resolved = candidate_member.link_target_member?;
            let resolved_type = candidate_member.link_target_type?;
            Some((resolved, resolved_type))
        } else {
            Some((candidate, candidate_kind))
        }
    }

    fn resolve_symlink(
        &mut self,
        id: MemberId,
        filename: &str,
        normalized_target: &str,
        visited: &mut Vec<MemberId>,
    ) {
        let Some(&candidate) = self.by_normalized_path.get(normalized_target) else {
            warn!(%filename, target = %normalized_target, "symlink target not found");
            return;
        };

        let candidate_kind = match self.by_id.get(&candidate) {
            Some(m) => m.kind,
            None => return,
        };

        let final_target = if matches!(candidate_kind, MemberKind::Symlink | MemberKind::Hardlink) {
            if visited.contains(&id) {
                error!(%filename, "symlink loop detected");
                return;
            }
            visited.push(id);
            self.resolve_link(candidate, visited);
            let candidate_member = match self.by_id.get(&candidate) {
                Some(m) => m,
                None => return,
            };
            match (candidate_member.link_target_member, candidate_member.link_target_type) {
                (Some(target), Some(kind)) => (target, kind),
                _ => {
                    warn!(
                        %filename,
                        candidate = %candidate_member.filename,
                        "link target has no valid resolution"
                    );
                    return;
                }
            }
        } else {
            (candidate, candidate_kind)
        };

        let member = self.by_id.get_mut(&id).expect("member just looked up");
        member.link_target_member = Some(final_target.0);
        member.link_target_type = Some(final_target.1);
    }
}

/// POSIX `normpath`-equivalent: collapse `.`/`..` components and drop
/// trailing slashes, without touching the filesystem.
pub fn normalize_posix(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let absolute = path.starts_with('/');
    let mut stack: Vec<&str> = Vec::new();
    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                if matches!(stack.last(), Some(&last) if last != "..") {
                    stack.pop();
                } else if !absolute {
                    stack.push("..");
                }
            }
            other => stack.push(other),
        }
    }
    let joined = stack.join("/");
    match (absolute, joined.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// POSIX `dirname`-equivalent.
pub fn dirname_posix(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

/// POSIX `join`-equivalent: if `b` is absolute, it replaces `a` entirely.
pub fn join_posix(a: &str, b: &str) -> String {
    if b.starts_with('/') || a.is_empty() {
        b.to_string()
    } else if a.ends_with('/') {
        format!("{a}{b}")
    } else {
        format!("{a}/{b}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normpath_collapses_dot_dot() {
        assert_eq!(normalize_posix("a/b/../c"), "a/c");
        assert_eq!(normalize_posix("a/./b"), "a/b");
        assert_eq!(normalize_posix("a/b/"), "a/b");
        assert_eq!(normalize_posix("../a"), "../a");
        assert_eq!(normalize_posix("/a/../../b"), "/b");
        assert_eq!(normalize_posix(""), ".");
    }

    #[test]
    fn dirname_matches_posix() {
        assert_eq!(dirname_posix("a/b/c"), "a/b");
        assert_eq!(dirname_posix("c"), "");
        assert_eq!(dirname_posix("/c"), "/");
    }
}
