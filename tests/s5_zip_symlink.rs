//! S5: a ZIP symlink entry (mode `0o120777`, contents `"../outside"`).
//! The raw target string must survive unchanged, dereferencing must
//! never happen at extraction time, and an unresolvable target must
//! leave `link_target_member` unset rather than erroring.

use std::fs::File;
use std::io::Write;

use rc_archive::{ArchiveReader, Config, MemberKind, Selector};

fn build_symlink_zip(path: &std::path::Path) {
    let file = File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options: zip::write::FileOptions<()> = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o120777);
    writer.start_file("link", options).unwrap();
    writer.write_all(b"../outside").unwrap();
    writer.finish().unwrap();
}

#[test]
fn symlink_target_is_raw_and_unresolved() {
    let tmp = tempfile::tempdir().unwrap();
    let zip_path = tmp.path().join("symlink.zip");
    build_symlink_zip(&zip_path);

    let mut reader = rc_archive::format::zip::ZipReader::open(&zip_path, Config::default()).unwrap();
    let members = reader.get_members().unwrap();
    assert_eq!(members.len(), 1);

    let link = &members[0];
    assert_eq!(link.kind, MemberKind::Symlink);
    assert_eq!(link.link_target.as_deref(), Some("../outside"));
    assert!(link.link_target_member.is_none());
}

#[test]
#[cfg(unix)]
fn symlink_extracts_with_literal_target() {
    let tmp = tempfile::tempdir().unwrap();
    let zip_path = tmp.path().join("symlink.zip");
    build_symlink_zip(&zip_path);

    let mut reader = rc_archive::format::zip::ZipReader::open(&zip_path, Config::default()).unwrap();
    let dest = tmp.path().join("out");
    let written = reader
        .extract_all(Selector::All, &dest, None, None)
        .unwrap();

    let link_path = written.get("link").unwrap();
    let target = std::fs::read_link(link_path).unwrap();
    assert_eq!(target, std::path::Path::new("../outside"));
}
