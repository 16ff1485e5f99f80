//! S2: a TAR with a hardlink chain `h -> g -> f`. Resolution must walk the
//! whole chain to the terminal regular file, and `open()` on any link in
//! the chain must yield that file's contents.

use std::io::Read;

use rc_archive::{ArchiveReader, Config, MemberKind};
use tar::{Builder, EntryType, Header};

fn build_hardlink_chain_tar(path: &std::path::Path) {
    let mut builder = Builder::new(Vec::new());

    let mut f_header = Header::new_gnu();
    f_header.set_size(1);
    f_header.set_mode(0o644);
    f_header.set_entry_type(EntryType::Regular);
    f_header.set_cksum();
    builder.append_data(&mut f_header, "f", &b"X"[..]).unwrap();

    let mut g_header = Header::new_gnu();
    g_header.set_size(0);
    g_header.set_mode(0o644);
    g_header.set_entry_type(EntryType::Link);
    g_header.set_cksum();
    builder.append_link(&mut g_header, "g", "f").unwrap();

    let mut h_header = Header::new_gnu();
    h_header.set_size(0);
    h_header.set_mode(0o644);
    h_header.set_entry_type(EntryType::Link);
    h_header.set_cksum();
    builder.append_link(&mut h_header, "h", "g").unwrap();

    let bytes = builder.into_inner().unwrap();
    std::fs::write(path, bytes).unwrap();
}

#[test]
fn hardlink_chain_resolves_to_terminal_file() {
    let tmp = tempfile::tempdir().unwrap();
    let tar_path = tmp.path().join("chain.tar");
    build_hardlink_chain_tar(&tar_path);

    let mut reader = rc_archive::format::tar::TarReader::open(&tar_path, None, Config::default()).unwrap();
    let members = reader.get_members().unwrap();
    assert_eq!(members.len(), 3);

    let f = members.iter().find(|m| m.filename == "f").unwrap();
    let g = members.iter().find(|m| m.filename == "g").unwrap();
    let h = members.iter().find(|m| m.filename == "h").unwrap();

    assert_eq!(g.kind, MemberKind::Hardlink);
    assert_eq!(h.kind, MemberKind::Hardlink);
    assert_eq!(g.link_target_member, Some(f.member_id));
    assert_eq!(h.link_target_member, Some(f.member_id));
    assert_eq!(h.link_target_type, Some(MemberKind::File));

    let mut contents = String::new();
    reader
        .open("h".into(), None)
        .unwrap()
        .read_to_string(&mut contents)
        .unwrap();
    assert_eq!(contents, "X");
}

#[test]
fn hardlink_chain_extracts_as_linked_files() {
    let tmp = tempfile::tempdir().unwrap();
    let tar_path = tmp.path().join("chain.tar");
    build_hardlink_chain_tar(&tar_path);

    let mut reader = rc_archive::format::tar::TarReader::open(&tar_path, None, Config::default()).unwrap();
    let dest = tmp.path().join("out");
    let written = reader
        .extract_all(rc_archive::Selector::All, &dest, None, None)
        .unwrap();

    let f_path = written.get("f").unwrap();
    let g_path = written.get("g").unwrap();
    let h_path = written.get("h").unwrap();

    assert_eq!(std::fs::read_to_string(f_path).unwrap(), "X");
    assert_eq!(std::fs::read_to_string(g_path).unwrap(), "X");
    assert_eq!(std::fs::read_to_string(h_path).unwrap(), "X");
}
