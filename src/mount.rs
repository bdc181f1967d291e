//! The `mount.extentfs` tool mounts an extentfs image through FUSE.
//!
//! The kernel speaks in inode numbers while the filesystem core resolves
//! paths, so the bridge keeps a table from FUSE inode numbers to the paths
//! it has handed out. FUSE inode numbers are the on-disk ones shifted by
//! one, since the FUSE root must be 1.

use extentfs::{BLOCK_SIZE, ExtentFs, FileKind, FileStat, FsError, Image};
use fuser::{
    FUSE_ROOT_ID, FileAttr, FileType, Filesystem, KernelConfig, MountOption, ReplyAttr,
    ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyStatfs, ReplyWrite,
    Request, TimeOrNow,
};
use log::{error, info};
use std::collections::HashMap;
use std::env;
use std::ffi::{OsStr, c_int};
use std::path::PathBuf;
use std::process::exit;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Validity period of the attributes handed to the kernel.
const TTL: Duration = Duration::from_secs(1);

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// If true, print command line help.
    help: bool,
    /// If true, print the version and exit.
    version: bool,
    /// If true, flush the image to disk before unmounting.
    sync: bool,
    /// Path to the image file.
    image: Option<PathBuf>,
    /// Path to the mount point.
    mountpoint: Option<PathBuf>,
}

fn parse_args() -> Args {
    let mut res: Args = Default::default();
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "-h" | "--help" => res.help = true,
            "-V" | "--version" => res.version = true,
            "-s" | "--sync" => res.sync = true,
            _ => {
                if res.image.is_none() {
                    res.image = Some(PathBuf::from(arg));
                } else {
                    res.mountpoint = Some(PathBuf::from(arg));
                }
            }
        }
    }
    res
}

/// Prints the command's usage.
fn print_usage() {
    eprintln!("Usage:");
    eprintln!(" mount.extentfs [-h] [-V] [-s] image dir");
    eprintln!();
    eprintln!("Options:");
    eprintln!(" -h:\tprints usage");
    eprintln!(" -V:\tprints the version");
    eprintln!(" -s:\tflushes the image to disk on unmount");
    eprintln!(" image:\tthe filesystem image to mount");
    eprintln!(" dir:\tthe directory on which the filesystem is to be mounted");
}

/// Converts an on-disk inode number into a FUSE one.
fn fuse_ino(ino: u32) -> u64 {
    ino as u64 + 1
}

/// Converts a stored timestamp into a `SystemTime`.
fn system_time(sec: i64, nsec: i64) -> SystemTime {
    if sec < 0 {
        return UNIX_EPOCH;
    }
    UNIX_EPOCH + Duration::new(sec as u64, nsec.clamp(0, 999_999_999) as u32)
}

/// Converts a `SystemTime` into a stored timestamp.
fn time_pair(time: SystemTime) -> (i64, i64) {
    let d = time.duration_since(UNIX_EPOCH).unwrap_or_default();
    (d.as_secs() as i64, d.subsec_nanos() as i64)
}

fn attr_from(stat: &FileStat) -> FileAttr {
    let mtime = system_time(stat.mtime_sec, stat.mtime_nsec);
    FileAttr {
        ino: fuse_ino(stat.ino),
        size: stat.size,
        blocks: stat.blocks,
        atime: mtime,
        mtime,
        ctime: mtime,
        crtime: mtime,
        kind: match stat.kind {
            FileKind::Directory => FileType::Directory,
            FileKind::Regular => FileType::RegularFile,
        },
        perm: (stat.mode & 0o7777) as u16,
        nlink: stat.links,
        uid: 0,
        gid: 0,
        rdev: 0,
        blksize: BLOCK_SIZE as u32,
        flags: 0,
    }
}

/// The FUSE bridge around the filesystem core.
struct ExtentFuse {
    fs: ExtentFs,
    /// Flush the whole image before unmapping on unmount.
    sync: bool,
    /// Paths handed to the kernel, by FUSE inode number.
    paths: HashMap<u64, String>,
}

impl ExtentFuse {
    fn new(fs: ExtentFs, sync: bool) -> Self {
        Self {
            fs,
            sync,
            paths: HashMap::from([(FUSE_ROOT_ID, "/".to_owned())]),
        }
    }

    fn path_of(&self, ino: u64) -> Option<String> {
        self.paths.get(&ino).cloned()
    }

    /// Joins a directory path with an entry name. `None` when the name is
    /// not valid UTF-8; such names cannot exist in the filesystem.
    fn child_path(parent: &str, name: &OsStr) -> Option<String> {
        let name = name.to_str()?;
        if parent == "/" {
            Some(format!("/{name}"))
        } else {
            Some(format!("{parent}/{name}"))
        }
    }

    /// Resolves the path of the entry `name` under the FUSE inode `parent`.
    fn entry_path(&self, parent: u64, name: &OsStr) -> Result<String, FsError> {
        let parent_path = self.path_of(parent).ok_or(FsError::NotFound)?;
        Self::child_path(&parent_path, name).ok_or(FsError::NotFound)
    }

    /// Forgets `path` and everything below it.
    fn drop_path(&mut self, path: &str) {
        let prefix = format!("{path}/");
        self.paths
            .retain(|_, p| p != path && !p.starts_with(&prefix));
    }
}

impl Filesystem for ExtentFuse {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        Ok(())
    }

    fn destroy(&mut self) {
        if self.sync {
            if let Err(e) = self.fs.flush() {
                error!("msync: {e}");
            }
        }
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = match self.entry_path(parent, name) {
            Ok(path) => path,
            Err(e) => return reply.error(e.errno()),
        };
        match self.fs.getattr(&path) {
            Ok(stat) => {
                let attr = attr_from(&stat);
                self.paths.insert(attr.ino, path);
                reply.entry(&TTL, &attr, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let Some(path) = self.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        match self.fs.getattr(&path) {
            Ok(stat) => reply.attr(&TTL, &attr_from(&stat)),
            Err(e) => reply.error(e.errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        if let Some(size) = size {
            if let Err(e) = self.fs.truncate(&path, size) {
                return reply.error(e.errno());
            }
        }
        if let Some(mtime) = mtime {
            let (sec, nsec) = match mtime {
                TimeOrNow::SpecificTime(t) => time_pair(t),
                TimeOrNow::Now => time_pair(SystemTime::now()),
            };
            if let Err(e) = self.fs.utimens(&path, sec, nsec) {
                return reply.error(e.errno());
            }
        }
        match self.fs.getattr(&path) {
            Ok(stat) => reply.attr(&TTL, &attr_from(&stat)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let path = match self.entry_path(parent, name) {
            Ok(path) => path,
            Err(e) => return reply.error(e.errno()),
        };
        if let Err(e) = self.fs.mkdir(&path, mode & 0o7777) {
            return reply.error(e.errno());
        }
        match self.fs.getattr(&path) {
            Ok(stat) => {
                let attr = attr_from(&stat);
                self.paths.insert(attr.ino, path);
                reply.entry(&TTL, &attr, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let path = match self.entry_path(parent, name) {
            Ok(path) => path,
            Err(e) => return reply.error(e.errno()),
        };
        if let Err(e) = self.fs.create(&path, mode & 0o7777) {
            return reply.error(e.errno());
        }
        match self.fs.getattr(&path) {
            Ok(stat) => {
                let attr = attr_from(&stat);
                self.paths.insert(attr.ino, path);
                reply.created(&TTL, &attr, 0, 0, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.entry_path(parent, name) {
            Ok(path) => path,
            Err(e) => return reply.error(e.errno()),
        };
        match self.fs.unlink(&path) {
            Ok(()) => {
                self.drop_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.entry_path(parent, name) {
            Ok(path) => path,
            Err(e) => return reply.error(e.errno()),
        };
        match self.fs.rmdir(&path) {
            Ok(()) => {
                self.drop_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let from = match self.entry_path(parent, name) {
            Ok(path) => path,
            Err(e) => return reply.error(e.errno()),
        };
        let to = match self.entry_path(newparent, newname) {
            Ok(path) => path,
            Err(e) => return reply.error(e.errno()),
        };
        if let Err(e) = self.fs.rename(&from, &to) {
            return reply.error(e.errno());
        }
        // Rehome every path the kernel knows under the new name
        self.drop_path(&to);
        let from_prefix = format!("{from}/");
        for path in self.paths.values_mut() {
            if *path == from {
                *path = to.clone();
            } else if let Some(rest) = path.strip_prefix(&from_prefix) {
                *path = format!("{to}/{rest}");
            }
        }
        reply.ok();
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        let mut buf = vec![0u8; size as usize];
        match self.fs.read(&path, &mut buf, offset as u64) {
            Ok(n) => reply.data(&buf[..n]),
            Err(e) => reply.error(e.errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(path) = self.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        match self.fs.write(&path, data, offset as u64) {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        let entries = match self.fs.readdir(&path) {
            Ok(entries) => entries,
            Err(e) => return reply.error(e.errno()),
        };
        for (i, entry) in entries.iter().enumerate().skip(offset as usize) {
            let kind = match entry.kind {
                FileKind::Directory => FileType::Directory,
                FileKind::Regular => FileType::RegularFile,
            };
            if reply.add(fuse_ino(entry.ino), (i + 1) as i64, kind, &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let st = self.fs.statfs();
        reply.statfs(
            st.blocks,
            st.free_blocks,
            st.free_blocks,
            st.inodes,
            st.free_inodes,
            st.block_size,
            st.name_max,
            st.block_size,
        );
    }
}

fn main() {
    env_logger::init();
    let args = parse_args();
    if args.help {
        print_usage();
        exit(0);
    }
    if args.version {
        println!("mount.extentfs {}", env!("CARGO_PKG_VERSION"));
        exit(0);
    }
    let (Some(image), Some(mountpoint)) = (args.image, args.mountpoint) else {
        print_usage();
        exit(1);
    };
    let img = Image::open(&image).unwrap_or_else(|e| {
        eprintln!("mount.extentfs: {}: {e}", image.display());
        exit(1);
    });
    let fs = ExtentFs::open(img).unwrap_or_else(|e| {
        eprintln!("mount.extentfs: failed to mount the filesystem: {e}");
        exit(1);
    });
    info!("mounting {} on {}", image.display(), mountpoint.display());
    let bridge = ExtentFuse::new(fs, args.sync);
    let options = [MountOption::FSName("extentfs".to_owned())];
    if let Err(e) = fuser::mount2(bridge, &mountpoint, &options) {
        eprintln!("mount.extentfs: {e}");
        exit(1);
    }
}
