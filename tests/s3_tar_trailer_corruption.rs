//! S3: a well-formed TAR with garbage bytes planted in its two trailing
//! zero blocks. `tar::Archive::entries()` stops at the first all-zero
//! header and never looks past it, so only an explicit integrity check
//! notices the corruption.

use rc_archive::{ArchiveReader, Config};
use tar::{Builder, EntryType, Header};

fn build_simple_tar() -> Vec<u8> {
    let mut builder = Builder::new(Vec::new());
    let mut header = Header::new_gnu();
    header.set_size(1);
    header.set_mode(0o644);
    header.set_entry_type(EntryType::Regular);
    header.set_cksum();
    builder.append_data(&mut header, "f", &b"X"[..]).unwrap();
    builder.into_inner().unwrap()
}

fn corrupt_trailer(bytes: &mut [u8]) {
    let len = bytes.len();
    assert!(len >= 1024, "expected at least two trailing zero blocks");
    bytes[len - 100] = 0xff;
}

#[test]
fn corrupted_trailer_is_caught_when_integrity_check_is_on() {
    let tmp = tempfile::tempdir().unwrap();
    let tar_path = tmp.path().join("corrupt.tar");
    let mut bytes = build_simple_tar();
    corrupt_trailer(&mut bytes);
    std::fs::write(&tar_path, &bytes).unwrap();

    let mut config = Config::default();
    assert!(config.tar_check_integrity);
    config.tar_check_integrity = true;

    let mut reader = rc_archive::format::tar::TarReader::open(&tar_path, None, config).unwrap();
    let err = reader.get_members().unwrap_err();
    assert!(matches!(err, rc_archive::Error::Corrupted(_)));
}

#[test]
fn corrupted_trailer_is_ignored_when_integrity_check_is_off() {
    let tmp = tempfile::tempdir().unwrap();
    let tar_path = tmp.path().join("corrupt.tar");
    let mut bytes = build_simple_tar();
    corrupt_trailer(&mut bytes);
    std::fs::write(&tar_path, &bytes).unwrap();

    let mut config = Config::default();
    config.tar_check_integrity = false;

    let mut reader = rc_archive::format::tar::TarReader::open(&tar_path, None, config).unwrap();
    let members = reader.get_members().unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].filename, "f");
}
