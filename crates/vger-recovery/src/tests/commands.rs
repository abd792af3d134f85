use std::path::Path;

use zeroize::Zeroizing;

use crate::cancel::NeverCancel;
use crate::commands::{download, list, rechunk, recompress, restore, BackupSet};
use crate::compress::Compression;
use crate::crypto::{AesCipher, Cipher};
use crate::error::{RecoveryError, Result};
use crate::index::build::BuildOptions;
use crate::testutil::{day, file_names, pattern, test_config, test_kdf, MemoryBackend, SetBuilder};

fn no_passphrase() -> Result<Option<Zeroizing<String>>> {
    Ok(None)
}

fn two_generations(dir: &Path) -> Vec<Vec<u8>> {
    let mut set = SetBuilder::new(dir, "bk", 64);
    let contents = vec![pattern(1, 64 * 4 + 1), pattern(2, 12), pattern(3, 64 * 9)];
    let a = set.file("/home/u/a.txt", &contents[0]);
    let b = set.file("/home/u/b.md", &contents[1]);
    set.generation(day(1), &[SetBuilder::folder_entry("/home/u"), a.clone()]);
    let c = set.file("/home/u/sub/c.txt", &contents[2]);
    set.generation(day(2), &[SetBuilder::folder_entry("/home/u"), a, b, c]);
    contents
}

#[test]
fn versions_are_listed_newest_first() {
    let dir = tempfile::tempdir().unwrap();
    two_generations(dir.path());
    let set = BackupSet::open(dir.path(), &test_config(), None, no_passphrase).unwrap();

    let versions = list::list_versions(&set);
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].time, Some(day(2)));
    assert_eq!(versions[0].files, Some(4));
    assert_eq!(versions[1].files, Some(2));

    assert_eq!(set.resolve_version("1").unwrap(), versions[1].name);
    assert_eq!(set.resolve_version("20240102T120000Z").unwrap(), versions[0].name);
    assert!(matches!(set.resolve_version("2"), Err(RecoveryError::Usage(_))));
    assert!(matches!(set.resolve_version("soon"), Err(RecoveryError::Usage(_))));

    let txt = list::list_files(&set, "0", Some("*.txt")).unwrap();
    let paths: Vec<&str> = txt.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["/home/u/a.txt", "/home/u/sub/c.txt"]);
}

#[test]
fn restore_builds_the_index_on_demand() {
    let dir = tempfile::tempdir().unwrap();
    let contents = two_generations(dir.path());
    let config = test_config();
    let set = BackupSet::open(dir.path(), &config, None, no_passphrase).unwrap();
    let target = tempfile::tempdir().unwrap();

    let stats = restore::run(&set, &config, "0", Some(target.path()), None, &NeverCancel, None).unwrap();
    assert!(stats.errors.is_empty());
    assert_eq!(stats.files, 3);
    assert_eq!(stats.folders, 1);
    assert!(set.index_path(&config).exists());

    let root = target.path().join("home/u");
    assert_eq!(std::fs::read(root.join("a.txt")).unwrap(), contents[0]);
    assert_eq!(std::fs::read(root.join("b.md")).unwrap(), contents[1]);
    assert_eq!(std::fs::read(root.join("sub/c.txt")).unwrap(), contents[2]);
}

#[test]
fn restore_counts_files_it_cannot_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    two_generations(dir.path());
    let config = test_config();
    let set = BackupSet::open(dir.path(), &config, None, no_passphrase).unwrap();
    crate::commands::index::run(&set, &config, &BuildOptions::default(), &NeverCancel, None).unwrap();

    // An empty index: every file with content fails, the run goes on.
    std::fs::write(set.index_path(&config), "").unwrap();
    let set = BackupSet::open(dir.path(), &config, None, no_passphrase).unwrap();
    let target = tempfile::tempdir().unwrap();
    let stats =
        restore::run(&set, &config, "0", Some(target.path()), Some("*.txt"), &NeverCancel, None)
            .unwrap();
    assert_eq!(stats.files, 0);
    assert_eq!(stats.errors.len(), 2);
}

#[test]
fn rechunk_refuses_a_populated_output() {
    let dir = tempfile::tempdir().unwrap();
    let contents = two_generations(dir.path());
    let config = test_config();
    let set = BackupSet::open(dir.path(), &config, None, no_passphrase).unwrap();

    let result = rechunk::run(&set, &config, dir.path(), 2, None, &NeverCancel, None);
    assert!(matches!(result, Err(RecoveryError::Usage(_))));

    let out = tempfile::tempdir().unwrap();
    let stats = rechunk::run(&set, &config, out.path(), 4, None, &NeverCancel, None).unwrap();
    assert_eq!(stats.generations, 2);

    let rechunked = BackupSet::open(out.path(), &config, None, no_passphrase).unwrap();
    let target = tempfile::tempdir().unwrap();
    let stats =
        restore::run(&rechunked, &config, "0", Some(target.path()), None, &NeverCancel, None).unwrap();
    assert!(stats.errors.is_empty());
    assert_eq!(
        std::fs::read(target.path().join("home/u/sub/c.txt")).unwrap(),
        contents[2]
    );
}

#[test]
fn encrypted_sets_need_a_passphrase() {
    let plain = tempfile::tempdir().unwrap();
    two_generations(plain.path());
    let config = test_config();
    let set = BackupSet::open(plain.path(), &config, None, no_passphrase).unwrap();
    let sealed = tempfile::tempdir().unwrap();
    let cipher = AesCipher::new(Zeroizing::new("pw".into()), test_kdf());
    recompress::run(&set, sealed.path(), Compression::Lz4, Some(&cipher), &NeverCancel, None).unwrap();

    let mut asked = false;
    let locked = BackupSet::open(sealed.path(), &config, None, || {
        asked = true;
        Ok(None)
    })
    .unwrap();
    assert!(asked);
    assert!(matches!(
        locked.resolve_version("0").and_then(|v| locked.read_fileset(&v)),
        Err(RecoveryError::PassphraseRequired(_))
    ));

    let unlocked = BackupSet::open(sealed.path(), &config, None, || {
        Ok(Some(Zeroizing::new("pw".to_string())))
    })
    .unwrap();
    let files = list::list_files(&unlocked, "0", None).unwrap();
    assert_eq!(files.len(), 4);
}

#[test]
fn download_decrypts_and_skips_present_volumes() {
    let plain = tempfile::tempdir().unwrap();
    two_generations(plain.path());
    let config = test_config();
    let set = BackupSet::open(plain.path(), &config, None, no_passphrase).unwrap();
    let sealed = tempfile::tempdir().unwrap();
    let cipher = AesCipher::new(Zeroizing::new("pw".into()), test_kdf());
    recompress::run(&set, sealed.path(), Compression::Lz4, Some(&cipher), &NeverCancel, None).unwrap();

    let remote = MemoryBackend::new();
    for name in file_names(sealed.path()) {
        remote.insert(&name, std::fs::read(sealed.path().join(&name)).unwrap());
    }
    remote.insert("README.txt", b"not a volume".to_vec());

    let local = tempfile::tempdir().unwrap();
    let reader = AesCipher::new(Zeroizing::new("pw".into()), test_kdf());
    let stats = download::run(&remote, local.path(), None, Some(&reader), &NeverCancel, None).unwrap();
    assert_eq!(stats.downloaded, set.listing().volumes.len());
    assert_eq!(stats.decrypted, stats.downloaded);
    assert!(stats.errors.is_empty());

    // Decrypted copies carry the plain names of the original set.
    assert_eq!(file_names(local.path()), file_names(plain.path()));
    assert!(!file_names(local.path()).iter().any(|n| n.ends_with(reader.extension())));

    let again = download::run(&remote, local.path(), None, Some(&reader), &NeverCancel, None).unwrap();
    assert_eq!(again.downloaded, 0);
    assert_eq!(again.skipped, stats.downloaded);
}

#[test]
fn decrypted_download_restores_through_its_index_volumes() {
    let plain = tempfile::tempdir().unwrap();
    let contents = two_generations(plain.path());
    let config = test_config();
    let set = BackupSet::open(plain.path(), &config, None, no_passphrase).unwrap();
    assert!(!set.listing().indexes().is_empty());
    let sealed = tempfile::tempdir().unwrap();
    let cipher = AesCipher::new(Zeroizing::new("pw".into()), test_kdf());
    recompress::run(&set, sealed.path(), Compression::Lz4, Some(&cipher), &NeverCancel, None).unwrap();

    let remote = MemoryBackend::new();
    for name in file_names(sealed.path()) {
        remote.insert(&name, std::fs::read(sealed.path().join(&name)).unwrap());
    }
    let local = tempfile::tempdir().unwrap();
    download::run(&remote, local.path(), None, Some(&cipher), &NeverCancel, None).unwrap();

    let downloaded = BackupSet::open(local.path(), &config, None, no_passphrase).unwrap();
    let stats = crate::commands::index::run(&downloaded, &config, &BuildOptions::default(), &NeverCancel, None).unwrap();
    assert!(stats.errors.is_empty());
    let index = std::fs::read_to_string(downloaded.index_path(&config)).unwrap();
    assert!(!index.is_empty());
    assert!(!index.contains(&format!(".{}", cipher.extension())), "{index}");

    let target = tempfile::tempdir().unwrap();
    let restored = restore::run(&downloaded, &config, "0", Some(target.path()), None, &NeverCancel, None).unwrap();
    assert!(restored.errors.is_empty(), "{:?}", restored.errors);
    assert_eq!(restored.files, 3);
    let root = target.path().join("home/u");
    assert_eq!(std::fs::read(root.join("a.txt")).unwrap(), contents[0]);
    assert_eq!(std::fs::read(root.join("b.md")).unwrap(), contents[1]);
    assert_eq!(std::fs::read(root.join("sub/c.txt")).unwrap(), contents[2]);
}
