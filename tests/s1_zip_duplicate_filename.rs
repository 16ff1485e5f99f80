//! S1: a ZIP with two entries sharing a filename. The registry's
//! "latest shadows earlier" rule means lookups and extraction should
//! consistently resolve to the second entry, never a mix of the two.

use std::fs::File;
use std::io::{Read, Write};

use rc_archive::{ArchiveReader, Config, Selector};

fn build_duplicate_zip(path: &std::path::Path) {
    let file = File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options: zip::write::FileOptions<()> =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
    writer.start_file("a.txt", options).unwrap();
    writer.write_all(b"first").unwrap();
    writer.start_file("a.txt", options).unwrap();
    writer.write_all(b"second").unwrap();
    writer.finish().unwrap();
}

#[test]
fn duplicate_filename_latest_wins_everywhere() {
    let tmp = tempfile::tempdir().unwrap();
    let zip_path = tmp.path().join("dup.zip");
    build_duplicate_zip(&zip_path);

    let mut reader = rc_archive::format::zip::ZipReader::open(&zip_path, Config::default()).unwrap();

    let members = reader.get_members().unwrap();
    assert_eq!(members.len(), 2);
    assert!(members.iter().all(|m| m.filename == "a.txt"));

    let mut contents = String::new();
    reader
        .open("a.txt".into(), None)
        .unwrap()
        .read_to_string(&mut contents)
        .unwrap();
    assert_eq!(contents, "second");

    let dest = tmp.path().join("out");
    let written = reader
        .extract_all(Selector::All, &dest, None, None)
        .unwrap();
    assert_eq!(written.len(), 1);
    let extracted_path = written.get("a.txt").unwrap();
    assert_eq!(std::fs::read_to_string(extracted_path).unwrap(), "second");
}
