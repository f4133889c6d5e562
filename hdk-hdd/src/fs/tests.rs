use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use super::{
    Entry, EntryKind, ExtractOptions, ExtractOptionsBuilder, Filesystem, TreeWalker, compare_names,
    copy_to_host, destination_path, sanitize_component, sort_entries,
};
use crate::error::HddError;
use crate::partition::Region;
use crate::testutil::{MemoryDisk, UFS_BSIZE, UFS_MTIME, UfsImage};
use crate::ufs::{ROOTINO, UfsVolume};

fn named(name: &str) -> Entry {
    Entry {
        name: name.to_string(),
        kind: EntryKind::File,
        size: 0,
        atime: 0,
        mtime: 0,
        ctime: 0,
        node: 0,
        parent: 0,
        link_target: None,
    }
}

#[test]
fn dot_entries_sort_first_then_bytewise() {
    let mut entries: Vec<Entry> = ["b.txt", "..", "a.txt", ".", "B.txt", ".hidden"]
        .into_iter()
        .map(named)
        .collect();
    sort_entries(&mut entries);
    let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, [".", "..", ".hidden", "B.txt", "a.txt", "b.txt"]);
    assert_eq!(compare_names("..", "."), std::cmp::Ordering::Greater);
}

#[test]
fn reserved_and_invalid_names_are_sanitized() {
    assert_eq!(sanitize_component("CON"), "__CON");
    assert_eq!(sanitize_component("con.txt"), "__con.txt");
    assert_eq!(sanitize_component("Com1"), "__Com1");
    assert_eq!(sanitize_component("LPT9.log"), "__LPT9.log");
    assert_eq!(sanitize_component("CLOCK$"), "__CLOCK$");
    assert_eq!(sanitize_component("COM0"), "COM0");
    assert_eq!(sanitize_component("CONSOLE"), "CONSOLE");
    assert_eq!(sanitize_component("a:b?c*d"), "a_b_c_d");
    assert_eq!(sanitize_component("tab\there"), "tab_here");
    assert_eq!(sanitize_component("PARAM.SFO"), "PARAM.SFO");
}

#[test]
fn destination_path_joins_components() {
    let components = ["game".to_string(), "AUX".to_string(), "x:y".to_string()];
    assert_eq!(
        destination_path(Path::new("out"), &components, true),
        PathBuf::from("out").join("game").join("__AUX").join("x_y")
    );
    assert_eq!(
        destination_path(Path::new("out"), &components, false),
        PathBuf::from("out").join("game").join("AUX").join("x:y")
    );
}

#[test]
fn extract_options_default_to_restoring_and_sanitizing() {
    let built = ExtractOptionsBuilder::default().build().unwrap();
    assert!(built.restore_timestamps && built.sanitize_names);

    let plain = ExtractOptionsBuilder::default().sanitize_names(false).build().unwrap();
    assert!(plain.restore_timestamps);
    assert!(!plain.sanitize_names);
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 199) as u8).collect()
}

/// - `/game/PARAM.SFO`, `/game/USRDIR/EBOOT.BIN` (3 blocks)
/// - `/game/loop` -> `..` (cycle back to the root)
/// - `/link` -> `game`
/// - `/dangling` -> `nowhere`
/// - `/CON`
fn game_tree() -> (UfsImage, Vec<u8>) {
    let mut image = UfsImage::new();
    let eboot = patterned(3 * UFS_BSIZE - 17);
    let game = image.add_dir(ROOTINO, "game");
    image.add_file(game, "PARAM.SFO", b"PSF\x01");
    let usrdir = image.add_dir(game, "USRDIR");
    image.add_file(usrdir, "EBOOT.BIN", &eboot);
    image.add_symlink(game, "loop", "..");
    image.add_symlink(ROOTINO, "link", "game");
    image.add_symlink(ROOTINO, "dangling", "nowhere");
    image.add_file(ROOTINO, "CON", b"reserved");
    (image, eboot)
}

fn region(disk: &MemoryDisk) -> Region {
    Region::new(0, (disk.data.len() / 512) as u64)
}

#[test]
fn walker_yields_parents_before_children_and_reports_cycles() {
    let (image, _) = game_tree();
    let mut disk = MemoryDisk::new(image.bytes);
    let region = region(&disk);
    let mut volume = UfsVolume::open(&mut disk, region).unwrap();
    let root = volume.root().unwrap();

    let mut seen = Vec::new();
    let mut failures = Vec::new();
    for item in TreeWalker::new(&mut volume, "/", &root).unwrap() {
        match item {
            Ok(item) => seen.push(item.components.join("/")),
            Err(failure) => failures.push((failure.path, failure.error)),
        }
    }

    assert_eq!(
        seen,
        [
            "CON",
            "game",
            "game/PARAM.SFO",
            "game/USRDIR",
            "game/USRDIR/EBOOT.BIN",
            "link",
            "link/PARAM.SFO",
            "link/USRDIR",
            "link/USRDIR/EBOOT.BIN",
        ]
    );

    let paths: Vec<_> = failures.iter().map(|(path, _)| path.as_str()).collect();
    assert_eq!(paths, ["/dangling", "/game/loop", "/link/loop"]);
    assert!(matches!(failures[0].1, HddError::NotFound(_)));
    assert!(matches!(failures[1].1, HddError::RecursiveSymlink(_)));
    assert!(matches!(failures[2].1, HddError::RecursiveSymlink(_)));
}

#[test]
fn copy_tree_writes_files_and_restores_times() {
    let (image, eboot) = game_tree();
    let mut disk = MemoryDisk::new(image.bytes);
    let region = region(&disk);
    let mut volume = UfsVolume::open(&mut disk, region).unwrap();
    let out = tempfile::tempdir().unwrap();
    let dest = out.path().join("hdd0");

    let report = copy_to_host(&mut volume, "/", &dest, &ExtractOptions::default()).unwrap();
    assert_eq!(report.files, 5);
    assert_eq!(report.failures.len(), 3);
    assert_eq!(report.bytes, 2 * (4 + eboot.len() as u64) + 8);

    let copied = std::fs::read(dest.join("game/USRDIR/EBOOT.BIN")).unwrap();
    assert_eq!(copied, eboot);
    assert_eq!(std::fs::read(dest.join("link/PARAM.SFO")).unwrap(), b"PSF\x01");
    assert_eq!(std::fs::read(dest.join("__CON")).unwrap(), b"reserved");
    assert!(!dest.join("dangling").exists());

    let mtime = std::fs::metadata(dest.join("game/PARAM.SFO"))
        .unwrap()
        .modified()
        .unwrap();
    assert_eq!(mtime, SystemTime::UNIX_EPOCH + Duration::from_secs(UFS_MTIME as u64));
}

#[test]
fn copy_single_file_into_existing_directory() {
    let (image, _) = game_tree();
    let mut disk = MemoryDisk::new(image.bytes);
    let region = region(&disk);
    let mut volume = UfsVolume::open(&mut disk, region).unwrap();
    let out = tempfile::tempdir().unwrap();

    let options = ExtractOptionsBuilder::default()
        .restore_timestamps(false)
        .build()
        .unwrap();
    let report = copy_to_host(&mut volume, "/game/PARAM.SFO", out.path(), &options).unwrap();
    assert_eq!((report.files, report.bytes), (1, 4));
    assert_eq!(std::fs::read(out.path().join("PARAM.SFO")).unwrap(), b"PSF\x01");

    let renamed = out.path().join("param.bin");
    copy_to_host(&mut volume, "/link/PARAM.SFO", &renamed, &options).unwrap();
    assert_eq!(std::fs::read(renamed).unwrap(), b"PSF\x01");

    assert!(matches!(
        copy_to_host(&mut volume, "/missing", out.path(), &options),
        Err(HddError::NotFound(_))
    ));
}

#[test]
fn copy_subdirectory_into_existing_directory_uses_its_name() {
    let (image, eboot) = game_tree();
    let mut disk = MemoryDisk::new(image.bytes);
    let region = region(&disk);
    let mut volume = UfsVolume::open(&mut disk, region).unwrap();
    let out = tempfile::tempdir().unwrap();

    let report = copy_to_host(&mut volume, "/game/USRDIR", out.path(), &ExtractOptions::default()).unwrap();
    assert_eq!(report.files, 1);
    assert!(report.failures.is_empty());
    assert_eq!(std::fs::read(out.path().join("USRDIR/EBOOT.BIN")).unwrap(), eboot);
}
