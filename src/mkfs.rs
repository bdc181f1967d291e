//! The `mkfs.extentfs` tool formats a disk image into an extentfs
//! filesystem.

use extentfs::{BLOCK_SIZE, ExtentFs, Image};
use log::LevelFilter;
use std::env;
use std::path::PathBuf;
use std::process::exit;

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// Number of inodes in the new filesystem.
    n_inodes: u64,
    /// If true, print command line help.
    help: bool,
    /// If true, overwrite an existing filesystem.
    force: bool,
    /// If true, flush the image contents to disk after formatting.
    sync: bool,
    /// If true, print progress details.
    verbose: bool,
    /// If true, zero out the whole image before laying out the filesystem.
    zero: bool,
    /// Path to the image file to format.
    image_path: Option<PathBuf>,
}

fn parse_args() -> Option<Args> {
    let mut res: Args = Default::default();
    let mut iter = env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-i" => res.n_inodes = iter.next()?.parse().ok()?,
            "-h" | "--help" => {
                res.help = true;
                // Skip the remaining arguments
                return Some(res);
            }
            "-f" => res.force = true,
            "-s" => res.sync = true,
            "-v" => res.verbose = true,
            "-z" => res.zero = true,
            _ => res.image_path = Some(PathBuf::from(arg)),
        }
    }
    if res.image_path.is_none() || res.n_inodes == 0 {
        return None;
    }
    Some(res)
}

/// Prints command help.
fn print_help(prog: &str) {
    println!("Usage: {prog} options image");
    println!();
    println!("Format the image file into an extentfs filesystem. The file must exist");
    println!("and its size must be a multiple of the block size - {BLOCK_SIZE} bytes.");
    println!();
    println!("Options:");
    println!("    -i num  number of inodes; required argument");
    println!("    -h      print help and exit");
    println!("    -f      force format - overwrite an existing filesystem");
    println!("    -s      sync image file contents to disk");
    println!("    -v      verbose output");
    println!("    -z      zero out image contents");
}

fn main() {
    let prog = env::args()
        .next()
        .unwrap_or_else(|| "mkfs.extentfs".to_owned());
    let Some(args) = parse_args() else {
        eprintln!("{prog}: bad usage");
        eprintln!("Try '{prog} -h' for more information.");
        exit(1);
    };
    if args.help {
        print_help(&prog);
        exit(0);
    }
    env_logger::Builder::new()
        .filter_level(if args.verbose {
            LevelFilter::Info
        } else {
            LevelFilter::Warn
        })
        .init();

    let image_path = args.image_path.unwrap();
    let mut img = Image::open(&image_path).unwrap_or_else(|e| {
        eprintln!("{prog}: {}: {e}", image_path.display());
        exit(1);
    });
    if !args.force && ExtentFs::is_present(&img) {
        eprintln!("{prog}: image already contains an extentfs filesystem; use -f to overwrite");
        exit(1);
    }
    if args.zero {
        img.fill(0);
    }
    let fs = ExtentFs::format(img, args.n_inodes).unwrap_or_else(|e| {
        eprintln!("{prog}: failed to format the image: {e}");
        exit(1);
    });
    if args.sync {
        if let Err(e) = fs.flush() {
            eprintln!("{prog}: msync: {e}");
            exit(1);
        }
    }
}
