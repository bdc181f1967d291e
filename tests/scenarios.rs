//! End-to-end scenarios driving the operation surface the way a mounted
//! filesystem would.

use extentfs::{ExtentFs, FileKind, FsError, Image};

const MIB: usize = 1 << 20;

fn fs_1mib() -> ExtentFs {
    ExtentFs::format(Image::anonymous(MIB).unwrap(), 32).unwrap()
}

#[test]
fn nested_directories_with_file_content() {
    let mut fs = fs_1mib();
    fs.mkdir("/a", 0o755).unwrap();
    fs.mkdir("/a/b", 0o755).unwrap();
    fs.create("/a/b/f", 0o644).unwrap();
    fs.write("/a/b/f", b"hello", 0).unwrap();

    let mut buf = [0u8; 5];
    assert_eq!(fs.read("/a/b/f", &mut buf, 0).unwrap(), 5);
    assert_eq!(&buf, b"hello");
    assert_eq!(fs.getattr("/a/b/f").unwrap().size, 5);
    assert_eq!(fs.getattr("/").unwrap().links, 3);
    assert_eq!(fs.getattr("/a").unwrap().links, 3);
    assert_eq!(fs.getattr("/a/b").unwrap().links, 2);
}

#[test]
fn writes_straddling_a_block_boundary() {
    let mut fs = fs_1mib();
    fs.create("/f", 0o644).unwrap();
    fs.truncate("/f", 8192).unwrap();
    fs.write("/f", b"X", 4095).unwrap();
    fs.write("/f", b"Y", 4096).unwrap();

    let mut pair = [0u8; 2];
    assert_eq!(fs.read("/f", &mut pair, 4095).unwrap(), 2);
    assert_eq!(&pair, b"XY");
    let mut last = [0xffu8; 1];
    assert_eq!(fs.read("/f", &mut last, 8191).unwrap(), 1);
    assert_eq!(last, [0]);
}

#[test]
fn shrunken_file_reads_short_with_zero_padding() {
    let mut fs = fs_1mib();
    fs.create("/f", 0o644).unwrap();
    fs.write("/f", &[b'A'; 4096], 0).unwrap();
    fs.truncate("/f", 1).unwrap();

    let mut buf = vec![0xffu8; 4096];
    let n = fs.read("/f", &mut buf, 0).unwrap();
    assert_eq!(n, 1);
    assert_eq!(buf[0], b'A');
    assert!(buf[1..].iter().all(|b| *b == 0));
}

#[test]
fn renaming_a_directory_carries_its_subtree() {
    let mut fs = fs_1mib();
    fs.mkdir("/a", 0o755).unwrap();
    fs.create("/a/f", 0o644).unwrap();
    fs.rename("/a", "/b").unwrap();

    assert_eq!(fs.getattr("/b/f").unwrap().size, 0);
    assert_eq!(fs.getattr("/a").unwrap_err(), FsError::NotFound);
    assert_eq!(fs.getattr("/a/f").unwrap_err(), FsError::NotFound);
    assert_eq!(fs.getattr("/b").unwrap().kind, FileKind::Directory);
}

#[test]
fn removing_a_tree_restores_free_counts() {
    let mut fs = fs_1mib();
    let before = fs.statfs();
    fs.mkdir("/a", 0o755).unwrap();
    fs.mkdir("/a/b", 0o755).unwrap();
    assert_eq!(fs.rmdir("/a").unwrap_err(), FsError::NotEmpty);
    fs.rmdir("/a/b").unwrap();
    fs.rmdir("/a").unwrap();
    let after = fs.statfs();
    assert_eq!(after.free_inodes, before.free_inodes);
    assert_eq!(after.free_blocks, before.free_blocks);
}

#[test]
fn rename_there_and_back_restores_the_directory() {
    let mut fs = fs_1mib();
    fs.create("/x", 0o644).unwrap();
    fs.write("/x", b"payload", 0).unwrap();
    let before = fs.statfs();
    fs.rename("/x", "/y").unwrap();
    assert_eq!(fs.getattr("/x").unwrap_err(), FsError::NotFound);
    fs.rename("/y", "/x").unwrap();
    let mut buf = [0u8; 7];
    assert_eq!(fs.read("/x", &mut buf, 0).unwrap(), 7);
    assert_eq!(&buf, b"payload");
    let after = fs.statfs();
    assert_eq!(after.free_inodes, before.free_inodes);
    assert_eq!(after.free_blocks, before.free_blocks);
}

#[test]
fn renaming_over_a_file_is_not_notempty() {
    let mut fs = fs_1mib();
    fs.create("/f", 0o644).unwrap();
    let single = fs.statfs();
    fs.rename("/f", "/g").unwrap();
    fs.create("/f", 0o644).unwrap();
    fs.rename("/g", "/f").unwrap();

    assert!(fs.getattr("/f").is_ok());
    assert_eq!(fs.getattr("/g").unwrap_err(), FsError::NotFound);
    let after = fs.statfs();
    assert_eq!(after.free_inodes, single.free_inodes);
    assert_eq!(after.free_blocks, single.free_blocks);
}

#[test]
fn readdir_lists_dot_entries_first() {
    let mut fs = fs_1mib();
    fs.mkdir("/d", 0o755).unwrap();
    fs.create("/d/one", 0o644).unwrap();
    fs.create("/d/two", 0o644).unwrap();
    let names: Vec<_> = fs
        .readdir("/d")
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec![".", "..", "one", "two"]);
}

#[test]
fn statfs_reflects_usage() {
    let mut fs = fs_1mib();
    let empty = fs.statfs();
    assert_eq!(empty.block_size, 4096);
    assert_eq!(empty.blocks, 256);
    assert_eq!(empty.inodes, 32);
    fs.create("/f", 0o644).unwrap();
    fs.write("/f", &[1u8; 10_000], 0).unwrap();
    let used = fs.statfs();
    // one extent block plus three data blocks
    assert_eq!(used.free_blocks, empty.free_blocks - 4);
    assert_eq!(used.free_inodes, empty.free_inodes - 1);
}

#[test]
fn every_inode_is_allocatable_and_no_more() {
    let mut fs = ExtentFs::format(Image::anonymous(MIB).unwrap(), 2).unwrap();
    fs.create("/only", 0o644).unwrap();
    assert_eq!(fs.create("/toomany", 0o644).unwrap_err(), FsError::NoSpace);
    fs.unlink("/only").unwrap();
    fs.create("/again", 0o644).unwrap();
}

#[test]
fn extent_slots_exhaust_with_nospace() {
    // Two files growing in lockstep cannot stay contiguous, so every growth
    // of /a consumes a fresh extent slot
    let mut fs = ExtentFs::format(Image::anonymous(8 * MIB).unwrap(), 16).unwrap();
    fs.create("/a", 0o644).unwrap();
    fs.create("/b", 0o644).unwrap();
    for i in 1..=512u64 {
        fs.truncate("/a", i * 4096).unwrap();
        fs.truncate("/b", i * 4096).unwrap();
    }
    let free = fs.statfs().free_blocks;
    assert_eq!(
        fs.truncate("/a", 513 * 4096).unwrap_err(),
        FsError::NoSpace
    );
    // The failed growth left no block behind
    assert_eq!(fs.statfs().free_blocks, free);
    assert_eq!(fs.getattr("/a").unwrap().size, 512 * 4096);
}

#[test]
fn filesystem_survives_a_remount() {
    let file = tempfile::NamedTempFile::new().unwrap();
    file.as_file().set_len(MIB as u64).unwrap();

    let img = Image::open(file.path()).unwrap();
    let mut fs = ExtentFs::format(img, 32).unwrap();
    fs.mkdir("/keep", 0o755).unwrap();
    fs.create("/keep/data", 0o644).unwrap();
    fs.write("/keep/data", b"persistent", 0).unwrap();
    fs.flush().unwrap();
    drop(fs);

    let img = Image::open(file.path()).unwrap();
    assert!(ExtentFs::is_present(&img));
    let fs = ExtentFs::open(img).unwrap();
    let mut buf = [0u8; 10];
    assert_eq!(fs.read("/keep/data", &mut buf, 0).unwrap(), 10);
    assert_eq!(&buf, b"persistent");
    assert_eq!(fs.getattr("/keep").unwrap().links, 2);
}

#[test]
fn unformatted_or_corrupt_images_do_not_mount() {
    let img = Image::anonymous(MIB).unwrap();
    assert_eq!(ExtentFs::open(img).unwrap_err(), FsError::BadMagic);
}
