use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::archive::{Codec, PackCodec};
use crate::cache::ArchiveCache;
use crate::cancel::{CancelFlag, NeverCancel};
use crate::compress::{Compression, MAX_DECOMPRESS_SIZE};
use crate::error::RecoveryError;
use crate::config::IndexConfig;
use crate::fileset::{read_filelist, read_manifest, FileEntry, Manifest, MANIFEST_ENTRY};
use crate::index::build::{build_index, BuildOptions};
use crate::hash::HashAlgorithm;
use crate::index::HashIndex;
use crate::rechunk::{FileRestorer, RechunkStats, Rechunker};
use crate::testutil::{day, file_names, pattern, SetBuilder};
use crate::volume::{list_containers_in_folder, FileType};

fn open_index(dir: &Path) -> HashIndex {
    let listing = list_containers_in_folder(dir, None).unwrap();
    let cache = Arc::new(ArchiveCache::new(dir, 8, None));
    let path = dir.join("index.txt");
    if !path.exists() {
        build_index(&cache, &listing, &path, &BuildOptions::default(), &NeverCancel, None).unwrap();
    }
    HashIndex::open(&path, &IndexConfig::default(), cache).unwrap()
}

fn rechunk(src: &Path, out: &Path, factor: usize) -> RechunkStats {
    let index = open_index(src);
    let listing = list_containers_in_folder(src, None).unwrap();
    let generations: Vec<&str> = listing
        .files_oldest_first()
        .into_iter()
        .map(|(n, _)| n.as_str())
        .collect();
    let mut rechunker = Rechunker::new(
        &index,
        out,
        "bk",
        PackCodec::new(Compression::Lz4),
        None,
        factor,
        1024 * 1024,
    )
    .unwrap();
    rechunker.run(&generations, &NeverCancel, None).unwrap()
}

/// Manifest and file list of every generation in `dir`, oldest first.
fn generations(dir: &Path) -> Vec<(Manifest, Vec<FileEntry>)> {
    let listing = list_containers_in_folder(dir, None).unwrap();
    let cache = ArchiveCache::new(dir, 8, None);
    listing
        .files_oldest_first()
        .into_iter()
        .map(|(name, _)| {
            let lease = cache.lease(name).unwrap();
            let mut archive = lease.lock();
            let manifest = read_manifest(archive.reader()).unwrap();
            let files = read_filelist(archive.reader()).unwrap();
            (manifest, files)
        })
        .collect()
}

/// Every block entry stored in the block volumes of `dir`.
fn stored_blocks(dir: &Path) -> Vec<String> {
    let listing = list_containers_in_folder(dir, None).unwrap();
    let codec = PackCodec::new(Compression::Lz4);
    let mut out = Vec::new();
    for (name, _) in listing.of_type(FileType::Blocks) {
        let reader = codec.open_read(&dir.join(name)).unwrap();
        out.extend(
            reader
                .entries()
                .iter()
                .filter(|e| e.name != MANIFEST_ENTRY)
                .map(|e| e.name.clone()),
        );
    }
    out
}

fn restore_all(dir: &Path, manifest: &Manifest, files: &[FileEntry], dest: &Path) -> Vec<Vec<u8>> {
    let index = open_index(dir);
    let restorer = FileRestorer::new(&index, manifest);
    files
        .iter()
        .map(|entry| {
            let path = dest.join(entry.path.trim_start_matches('/'));
            restorer.restore_file(entry, &path).unwrap();
            std::fs::read(&path).unwrap()
        })
        .collect()
}

#[test]
fn rechunked_set_restores_identically() {
    let src = tempfile::tempdir().unwrap();
    let mut set = SetBuilder::new(src.path(), "bk", 64);
    let contents = [pattern(1, 64 * 7 + 5), pattern(2, 30), pattern(3, 64 * 2), Vec::new()];
    let entries: Vec<_> = contents
        .iter()
        .enumerate()
        .map(|(i, c)| set.file(&format!("/f{i}"), c))
        .collect();
    set.generation(day(1), &entries);

    let out = tempfile::tempdir().unwrap();
    let stats = rechunk(src.path(), out.path(), 3);
    assert_eq!(stats.generations, 1);
    assert_eq!(stats.files, 4);
    assert_eq!(stats.files_failed, 0);
    assert!(!stats.interrupted);

    let gens = generations(out.path());
    assert_eq!(gens.len(), 1);
    let (manifest, files) = &gens[0];
    assert_eq!(manifest.blocksize, 64 * 3);
    assert_eq!(manifest.created, day(1));

    // 8 old blocks in groups of 3 give 3 new blocks: one blocklist.
    assert_eq!(files[0].blocklists.as_ref().unwrap().len(), 1);
    // Two old blocks collapse into one new block with the file's own hash.
    assert_eq!(files[2].blocklists, None);
    assert_eq!(files[2].blockhash, None);

    let restore_dir = tempfile::tempdir().unwrap();
    let restored = restore_all(out.path(), manifest, files, restore_dir.path());
    assert_eq!(restored, contents.to_vec());
}

#[test]
fn rechunking_is_deterministic() {
    let src = tempfile::tempdir().unwrap();
    let mut set = SetBuilder::new(src.path(), "bk", 64);
    let a = set.file("/a", &pattern(4, 64 * 9));
    let b = set.file("/b", &pattern(5, 64 * 4 + 1));
    set.generation(day(3), &[a, b]);

    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    rechunk(src.path(), first.path(), 2);
    rechunk(src.path(), second.path(), 2);

    let names = file_names(first.path());
    assert_eq!(names, file_names(second.path()));
    assert!(names.iter().any(|n| n.contains(".dblock.")));
    for name in &names {
        assert_eq!(
            std::fs::read(first.path().join(name)).unwrap(),
            std::fs::read(second.path().join(name)).unwrap(),
            "{name}"
        );
    }
}

#[test]
fn identical_groups_are_written_once_across_generations() {
    let src = tempfile::tempdir().unwrap();
    let mut set = SetBuilder::new(src.path(), "bk", 64);
    let shared = set.file("/shared", &pattern(6, 64 * 6));
    set.generation(day(1), std::slice::from_ref(&shared));
    let extra = set.file("/new", &pattern(7, 64 * 2));
    set.generation(day(2), &[shared.clone(), extra]);

    let out = tempfile::tempdir().unwrap();
    let stats = rechunk(src.path(), out.path(), 2);
    assert_eq!(stats.generations, 2);
    // The second generation reuses the three groups of /shared.
    assert_eq!(stats.groups_reused, 3);

    let gens = generations(out.path());
    assert_eq!(gens.len(), 2);
    let first = &gens[0].1[0];
    let again = &gens[1].1[0];
    assert_eq!(first.path, "/shared");
    assert_eq!(first.blocklists, again.blocklists);

    let blocks = stored_blocks(out.path());
    let unique: HashSet<&String> = blocks.iter().collect();
    assert_eq!(unique.len(), blocks.len(), "a block was stored twice");
}

#[test]
fn file_with_unreadable_block_is_left_out() {
    let src = tempfile::tempdir().unwrap();
    let mut set = SetBuilder::new(src.path(), "bk", 64);
    let good = set.file("/good", &pattern(8, 64 * 2));
    let bad_content = pattern(9, 64 * 4);
    let bad = set.file("/bad", &bad_content);
    set.generation(day(1), &[good, bad]);

    // Build the index, then drop the first block of /bad from it.
    drop(open_index(src.path()));
    let lost = HashAlgorithm::Sha256.digest(&bad_content[..64]).to_base64();
    let index_path = src.path().join("index.txt");
    let kept: String = std::fs::read_to_string(&index_path)
        .unwrap()
        .lines()
        .filter(|l| !l.starts_with(&lost))
        .map(|l| format!("{l}\n"))
        .collect();
    std::fs::write(&index_path, kept).unwrap();

    let out = tempfile::tempdir().unwrap();
    let stats = rechunk(src.path(), out.path(), 2);
    assert_eq!(stats.files, 2);
    assert_eq!(stats.files_failed, 1);
    assert_eq!(stats.errors[0].0, "/bad");

    let gens = generations(out.path());
    let paths: Vec<&str> = gens[0].1.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["/good"]);
}

#[test]
fn cancelled_run_reports_interruption() {
    let src = tempfile::tempdir().unwrap();
    let mut set = SetBuilder::new(src.path(), "bk", 64);
    let a = set.file("/a", &pattern(1, 64 * 3));
    set.generation(day(1), &[a]);
    let index = open_index(src.path());
    let listing = list_containers_in_folder(src.path(), None).unwrap();
    let gens: Vec<&str> = listing
        .files_oldest_first()
        .into_iter()
        .map(|(n, _)| n.as_str())
        .collect();

    let out = tempfile::tempdir().unwrap();
    let cancel = CancelFlag::new();
    cancel.cancel();
    let mut rechunker = Rechunker::new(
        &index,
        out.path(),
        "bk",
        PackCodec::new(Compression::Lz4),
        None,
        2,
        1024,
    )
    .unwrap();
    let stats = rechunker.run(&gens, &cancel, None).unwrap();
    assert!(stats.interrupted);
    assert_eq!(stats.generations, 0);
}

#[test]
fn zero_factor_is_rejected() {
    let src = tempfile::tempdir().unwrap();
    let mut set = SetBuilder::new(src.path(), "bk", 64);
    let a = set.file("/a", &pattern(1, 10));
    set.generation(day(1), &[a]);
    let index = open_index(src.path());
    let out = tempfile::tempdir().unwrap();
    let result = Rechunker::new(
        &index,
        out.path(),
        "bk",
        PackCodec::new(Compression::Lz4),
        None,
        0,
        1024,
    );
    assert!(matches!(result, Err(RecoveryError::Usage(_))));
}

#[test]
fn oversized_factors_are_rejected() {
    let src = tempfile::tempdir().unwrap();
    let mut set = SetBuilder::new(src.path(), "bk", 64);
    let a = set.file("/a", &pattern(1, 200));
    let gen = set.generation(day(1), &[a]);
    let index = open_index(src.path());
    let out = tempfile::tempdir().unwrap();
    let new = |factor| {
        Rechunker::new(
            &index,
            out.path(),
            "bk",
            PackCodec::new(Compression::Lz4),
            None,
            factor,
            1024,
        )
    };

    // Overflows u64 once multiplied by the block size.
    assert!(matches!(new(usize::MAX / 4), Err(RecoveryError::Usage(_))));

    // Fits in u64 but gives blocks that could not be decompressed again.
    let too_big = (MAX_DECOMPRESS_SIZE / 64 + 1) as usize;
    let mut rechunker = new(too_big).unwrap();
    let result = rechunker.run(&[gen.as_str()], &NeverCancel, None);
    assert!(matches!(result, Err(RecoveryError::Usage(_))));
    assert!(file_names(out.path()).is_empty());

    // The largest factor that still fits is accepted.
    let fits = (MAX_DECOMPRESS_SIZE / 64) as usize;
    let out = tempfile::tempdir().unwrap();
    let mut rechunker = Rechunker::new(
        &index,
        out.path(),
        "bk",
        PackCodec::new(Compression::Lz4),
        None,
        fits,
        1024,
    )
    .unwrap();
    let stats = rechunker.run(&[gen.as_str()], &NeverCancel, None).unwrap();
    assert_eq!(stats.files_failed, 0);
}
