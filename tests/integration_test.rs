use polyglot::archive::{self, EntryCompression};
use polyglot::integrity::{digest_bytes, digest_file, HashAlgorithm, IntegrityStatus};
use polyglot::io_stream::reader::{OffsetSource, PolyglotReader, ReaderOptions};
use polyglot::io_stream::writer::PolyglotWriter;
use polyglot::io_stream::{CancelFlag, ProgressTracker};
use polyglot::payload::{PayloadInput, PayloadMode};
use polyglot::polyglot::{
    create, extract, ArchiveContents, CreateOptions, ExtractOptions, PartSelection,
};
use polyglot::recovery::discover::{discover_parts, Discovery};
use polyglot::recovery::scanner::{scan, Signature};
use polyglot::recovery::RecoveryMetadata;
use polyglot::{ContainerTemplate, PolyglotError};
use proptest::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn pk() -> Signature {
    Signature::new(b"PK".to_vec()).unwrap()
}

fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let p = dir.join(name);
    fs::write(&p, data).unwrap();
    p
}

#[test]
fn test_single_scenario_110_bytes() {
    let dir = tempdir().unwrap();
    let container = write_file(dir.path(), "c.mp4", &[0xAA; 100]);
    let payload = write_file(dir.path(), "p.bin", b"PKxxxxxxxx");
    let out = dir.path().join("out.mp4");

    let template = ContainerTemplate::open(&container).unwrap();
    let report = PolyglotWriter::default()
        .write_single(&template, &payload, &out, &mut ProgressTracker::new(0))
        .unwrap();
    assert_eq!(fs::metadata(&out).unwrap().len(), 110);
    assert_eq!(report.files[0].range.len(), 10);

    let mut recovered = Vec::new();
    let got = PolyglotReader::new(ReaderOptions { signature: Some(pk()), ..Default::default() })
        .extract_single(&out, &mut recovered, &mut ProgressTracker::new(0))
        .unwrap();
    assert_eq!(recovered, b"PKxxxxxxxx");
    assert_eq!(got.checksum, report.payload_checksum);
}

#[test]
fn test_split_scenario_25_in_tens() {
    let dir = tempdir().unwrap();
    let container = write_file(dir.path(), "c.mp4", &[0xAA; 100]);
    let data: Vec<u8> = b"PK".iter().copied().chain((0..23u8).map(|i| 0xC0 | i)).collect();
    let payload = write_file(dir.path(), "p.bin", &data);

    let template = ContainerTemplate::open(&container).unwrap();
    let report = PolyglotWriter::default()
        .write_split(&template, &payload, &dir.path().join("s.mp4"), 10, &mut ProgressTracker::new(0))
        .unwrap();
    let lens: Vec<u64> = report.files.iter().map(|f| f.range.len()).collect();
    assert_eq!(lens, vec![10, 10, 5]);

    let parts: Vec<PathBuf> = report.files.iter().map(|f| f.path.clone()).collect();
    let mut recovered = Vec::new();
    let got = PolyglotReader::new(ReaderOptions { signature: Some(pk()), ..Default::default() })
        .extract_and_combine(&parts, &mut recovered, &mut ProgressTracker::new(0))
        .unwrap();
    assert_eq!(recovered, data);
    assert_eq!(got.checksum, report.payload_checksum);
    assert!(got.parts.iter().skip(1).all(|p| p.source == OffsetSource::SharedPrefix));
}

#[test]
fn test_split_into_thousands_of_parts_roundtrips() {
    // More parts than the usual per-process descriptor limit.
    let dir = tempdir().unwrap();
    let container = write_file(dir.path(), "c.mp4", b"HDR");
    let data: Vec<u8> = (0..3000u32).map(|i| (i * 7 % 251) as u8).collect();
    let payload = write_file(dir.path(), "p.bin", &data);

    let template = ContainerTemplate::open(&container).unwrap();
    let report = PolyglotWriter::new(64, HashAlgorithm::Crc32)
        .write_split(&template, &payload, &dir.path().join("many.mp4"), 1, &mut ProgressTracker::new(0))
        .unwrap();
    assert_eq!(report.files.len(), 3000);
    assert!(dir.path().join("many_part0001.mp4").exists());
    assert!(dir.path().join("many_part3000.mp4").exists());

    let parts: Vec<PathBuf> = report.files.iter().map(|f| f.path.clone()).collect();
    let mut recovered = Vec::new();
    let got = PolyglotReader::new(ReaderOptions { container_size: Some(3), algorithm: HashAlgorithm::Crc32, ..Default::default() })
        .extract_and_combine(&parts, &mut recovered, &mut ProgressTracker::new(0))
        .unwrap();
    assert_eq!(recovered, data);
    assert_eq!(got.checksum, digest_bytes(HashAlgorithm::Crc32, &data));
}

#[test]
fn test_absent_signature_is_degraded_not_error() {
    let data = vec![0x55u8; 300];
    assert!(!scan(&data, &pk()).found);

    let dir = tempdir().unwrap();
    let a = write_file(dir.path(), "n_part1.mp4", &data);
    let b = write_file(dir.path(), "n_part2.mp4", &data);
    let mut out = Vec::new();
    let got = PolyglotReader::new(ReaderOptions { signature: Some(pk()), ..Default::default() })
        .extract_and_combine(&[a, b], &mut out, &mut ProgressTracker::new(0))
        .unwrap();
    assert!(got.is_degraded());
    assert!(got.parts.iter().all(|p| p.source == OffsetSource::Estimated));
}

#[test]
fn test_swapped_parts_are_reported_as_mismatch() {
    let dir = tempdir().unwrap();
    let container = write_file(dir.path(), "clip.mp4", &[0x10; 64]);
    let secret = write_file(dir.path(), "secret.bin", &(0..=255u8).cycle().take(3000).collect::<Vec<_>>());

    let opts = CreateOptions {
        part_size:   Some(1024),
        compression: EntryCompression::Stored,
        ..Default::default()
    };
    let created = create(
        &container,
        &[PayloadInput::new(&secret)],
        &dir.path().join("swap.mp4"),
        &opts,
        &mut ProgressTracker::new(0),
    )
    .unwrap();
    assert!(created.outputs.len() >= 3);

    let mut parts: Vec<PathBuf> = created.outputs.iter().map(|f| f.path.clone()).collect();
    parts.swap(0, 1);
    let ex = ExtractOptions { metadata: created.metadata_path.clone(), ..Default::default() };
    let report = extract(
        &PartSelection::Explicit(parts),
        &dir.path().join("swapped.zip"),
        &ex,
        &mut ProgressTracker::new(0),
    )
    .unwrap();
    assert!(report.integrity.is_mismatch());
    assert!(report.is_unconfirmed());
    assert!(dir.path().join("swapped.zip").exists());
}

#[test]
fn test_folder_roundtrip_through_parts() {
    let dir = tempdir().unwrap();
    let container = write_file(dir.path(), "movie.mov", &[0x42; 512]);
    let tree = dir.path().join("docs");
    fs::create_dir_all(tree.join("nested")).unwrap();
    fs::write(tree.join("readme.md"), b"# hidden docs\n").unwrap();
    fs::write(tree.join("nested/data.bin"), vec![9u8; 5000]).unwrap();

    let out_dir = dir.path().join("out");
    fs::create_dir_all(&out_dir).unwrap();
    let opts = CreateOptions {
        mode:      PayloadMode::FolderOrMultiple,
        part_size: Some(100),
        algorithm: HashAlgorithm::Sha256,
        ..Default::default()
    };
    let created = create(
        &container,
        &[PayloadInput::new(&tree)],
        &out_dir.join("movie"),
        &opts,
        &mut ProgressTracker::new(0),
    )
    .unwrap();
    assert!(created.outputs[0].path.to_string_lossy().ends_with(".mov"));
    assert_eq!(created.metadata.entries, ["nested/data.bin", "readme.md"]);

    let meta_path = created.metadata_path.clone().unwrap();
    let meta = RecoveryMetadata::load(&meta_path).unwrap();
    assert_eq!(meta.part_file_names.len(), created.outputs.len());
    assert_eq!(meta.container_size_bytes, 512);

    let unpack = dir.path().join("unpacked");
    let ex = ExtractOptions {
        metadata:  Some(meta_path),
        unpack_to: Some(unpack.clone()),
        ..Default::default()
    };
    let report = extract(&PartSelection::Recorded, &dir.path().join("payload.zip"), &ex, &mut ProgressTracker::new(0))
        .unwrap();
    assert!(matches!(report.integrity, IntegrityStatus::Verified(_)));
    assert!(report.payload.parts.iter().all(|p| p.source == OffsetSource::Recorded));
    assert_eq!(fs::read(unpack.join("readme.md")).unwrap(), b"# hidden docs\n");
    assert_eq!(fs::read(unpack.join("nested/data.bin")).unwrap(), vec![9u8; 5000]);
}

#[test]
fn test_direct_embed_without_signature_needs_metadata() {
    let dir = tempdir().unwrap();
    let container = write_file(dir.path(), "c.mp4", &[0xAA; 50]);
    let raw = write_file(dir.path(), "blob.dat", &[0x01; 80]);

    let opts = CreateOptions { mode: PayloadMode::DirectEmbedArchive, ..Default::default() };
    let created = create(&container, &[PayloadInput::new(&raw)], &dir.path().join("d.mp4"), &opts, &mut ProgressTracker::new(0))
        .unwrap();
    assert!(created.metadata.is_direct_embed);
    assert_eq!(created.metadata.signature, None);
    assert_eq!(created.metadata.embedded_name, "blob.dat");

    let poly = created.outputs[0].path.clone();
    let err = extract(
        &PartSelection::Single(poly.clone()),
        &dir.path().join("x.dat"),
        &ExtractOptions::default(),
        &mut ProgressTracker::new(0),
    )
    .unwrap_err();
    assert!(matches!(err, PolyglotError::NoPayloadSignature(_)));

    let ex = ExtractOptions { metadata: created.metadata_path.clone(), ..Default::default() };
    let report = extract(&PartSelection::Single(poly), &dir.path().join("x.dat"), &ex, &mut ProgressTracker::new(0))
        .unwrap();
    assert!(report.integrity.is_verified());
    assert_eq!(report.contents, ArchiveContents::Raw);
    assert_eq!(fs::read(dir.path().join("x.dat")).unwrap(), vec![0x01; 80]);
}

#[test]
fn test_existing_archive_is_embedded_verbatim() {
    let dir = tempdir().unwrap();
    let container = write_file(dir.path(), "c.mp4", &[0xAA; 40]);
    let file = write_file(dir.path(), "inner.txt", b"inner");
    let zip_path = dir.path().join("bundle.zip");
    let f = fs::File::create(&zip_path).unwrap();
    archive::pack(&[archive::PackEntry::new(&file, "inner.txt")], f, EntryCompression::Deflated, &zip_path).unwrap();

    let opts = CreateOptions { mode: PayloadMode::ExistingArchive, ..Default::default() };
    let created = create(&container, &[PayloadInput::new(&zip_path)], &dir.path().join("e.mp4"), &opts, &mut ProgressTracker::new(0))
        .unwrap();
    assert_eq!(created.metadata.payload_checksum, digest_file(HashAlgorithm::Blake3, &zip_path).unwrap());

    let poly = fs::read(&created.outputs[0].path).unwrap();
    assert_eq!(&poly[40..], fs::read(&zip_path).unwrap().as_slice());
}

#[test]
fn test_discovery_finds_created_parts() {
    let dir = tempdir().unwrap();
    let container = write_file(dir.path(), "c.mp4", &[0xAA; 10]);
    let payload = write_file(dir.path(), "p.bin", &[0x77; 120]);
    let opts = CreateOptions {
        mode:      PayloadMode::DirectEmbedArchive,
        part_size: Some(10),
        ..Default::default()
    };
    let created = create(&container, &[PayloadInput::new(&payload)], &dir.path().join("many.mp4"), &opts, &mut ProgressTracker::new(0))
        .unwrap();
    assert_eq!(created.outputs.len(), 12);
    assert!(created.outputs[0].path.ends_with("many_part01.mp4"));

    let Discovery::Candidates(found) = discover_parts(&created.outputs[5].path).unwrap() else {
        panic!("expected candidates");
    };
    let expected: Vec<PathBuf> = created.outputs.iter().map(|f| f.path.clone()).collect();
    assert_eq!(found, expected);
}

#[test]
fn test_missing_input_creates_nothing() {
    let dir = tempdir().unwrap();
    let container = write_file(dir.path(), "c.mp4", &[0xAA; 10]);
    let err = create(
        &container,
        &[PayloadInput::new(dir.path().join("nope"))],
        &dir.path().join("o.mp4"),
        &CreateOptions::default(),
        &mut ProgressTracker::new(0),
    )
    .unwrap_err();
    assert!(err.is_input_error());
    let names: Vec<_> = fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().file_name()).collect();
    assert_eq!(names.len(), 1);
}

#[test]
fn test_cancelled_create_leaves_only_inputs() {
    let dir = tempdir().unwrap();
    let container = write_file(dir.path(), "c.mp4", &[0xAA; 10]);
    let payload = write_file(dir.path(), "p.bin", &[0x77; 100]);
    let cancel = CancelFlag::new();
    cancel.cancel();
    let opts = CreateOptions { part_size: Some(10), cancel, ..Default::default() };
    let err = create(&container, &[PayloadInput::new(&payload)], &dir.path().join("x.mp4"), &opts, &mut ProgressTracker::new(0))
        .unwrap_err();
    assert!(matches!(err, PolyglotError::Cancelled));
    let mut names: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, ["c.mp4", "p.bin"]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_split_roundtrip_is_checksum_transparent(
        payload in proptest::collection::vec(any::<u8>(), 1..2000),
        part_size in 1u64..2500,
    ) {
        let dir = tempdir().unwrap();
        let container = write_file(dir.path(), "c.mp4", &[0xEE; 33]);
        let p = write_file(dir.path(), "p.bin", &payload);
        let template = ContainerTemplate::open(&container).unwrap();
        let report = PolyglotWriter::new(97, HashAlgorithm::Crc32)
            .write_split(&template, &p, &dir.path().join("r.mp4"), part_size, &mut ProgressTracker::new(0))
            .unwrap();

        let parts: Vec<PathBuf> = report.files.iter().map(|f| f.path.clone()).collect();
        let opts = ReaderOptions {
            container_size: Some(33),
            algorithm:      HashAlgorithm::Crc32,
            chunk_size:     97,
            ..Default::default()
        };
        let mut out = Vec::new();
        let got = PolyglotReader::new(opts)
            .extract_and_combine(&parts, &mut out, &mut ProgressTracker::new(0))
            .unwrap();
        prop_assert_eq!(&out, &payload);
        prop_assert_eq!(&got.checksum, &digest_bytes(HashAlgorithm::Crc32, &payload));
        prop_assert_eq!(got.checksum, report.payload_checksum);
    }
}
