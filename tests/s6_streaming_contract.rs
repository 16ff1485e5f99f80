//! S6: a streaming-only TAR reader must not let one member's unread bytes
//! bleed into the next when the caller advances without draining.

use std::io::Read;

use rc_archive::reader::StreamingOnlyWrapper;
use rc_archive::{ArchiveReader, Config, Selector};
use tar::{Builder, EntryType, Header};

fn build_two_file_tar(path: &std::path::Path) {
    let mut builder = Builder::new(Vec::new());

    let mut a_header = Header::new_gnu();
    a_header.set_size(4);
    a_header.set_mode(0o644);
    a_header.set_entry_type(EntryType::Regular);
    a_header.set_cksum();
    builder.append_data(&mut a_header, "a", &b"AAAA"[..]).unwrap();

    let mut b_header = Header::new_gnu();
    b_header.set_size(4);
    b_header.set_mode(0o644);
    b_header.set_entry_type(EntryType::Regular);
    b_header.set_cksum();
    builder.append_data(&mut b_header, "b", &b"BBBB"[..]).unwrap();

    let bytes = builder.into_inner().unwrap();
    std::fs::write(path, bytes).unwrap();
}

#[test]
fn advancing_without_reading_does_not_leak_into_next_member() {
    let tmp = tempfile::tempdir().unwrap();
    let tar_path = tmp.path().join("two.tar");
    build_two_file_tar(&tar_path);

    let inner = rc_archive::format::tar::TarReader::open(&tar_path, None, Config::default()).unwrap();
    let mut reader = StreamingOnlyWrapper::new(inner);
    assert!(!reader.has_random_access());

    let mut iter = reader.iter_members_with_io(Selector::All, None, None);

    let (first_member, _first_stream) = iter.next().unwrap().unwrap();
    assert_eq!(first_member.filename, "a");
    // Deliberately drop the stream without reading a single byte.

    let (second_member, second_stream) = iter.next().unwrap().unwrap();
    assert_eq!(second_member.filename, "b");

    let mut contents = Vec::new();
    second_stream.unwrap().read_to_end(&mut contents).unwrap();
    assert_eq!(contents, b"BBBB");
}
