//! CLI for the ubift forensic engine.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod fscmd;
mod mtd;
mod recovery;
mod render;
mod volume;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use ubift::{Image, ImageGeometry, PartitionKind, Ubi, UbiPartitioner, UbiVolume, Ubifs, UbifsOptions};

use render::OutputFormat;

#[derive(Parser)]
#[command(name = "ubift", version, about = "UBI/UBIFS forensic reconstruction")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Arguments every command shares: the dump and its geometry.
#[derive(Args)]
struct ImageArgs {
    /// Input flash memory dump.
    input: PathBuf,

    /// Erase block size in bytes; guessed from UBI headers when absent.
    #[arg(long)]
    blocksize: Option<u32>,

    /// Page size in bytes; guessed from UBI headers when absent.
    #[arg(long)]
    pagesize: Option<u32>,

    /// OOB bytes per page; when set, the spare area is stripped first.
    #[arg(long)]
    oob: Option<u32>,

    /// Log engine diagnostics to stderr.
    #[arg(long)]
    verbose: bool,
}

impl ImageArgs {
    /// Installs logging and opens the image.
    fn open(&self) -> Result<Image> {
        let level = if self.verbose {
            tracing_subscriber::filter::LevelFilter::DEBUG
        } else {
            tracing_subscriber::filter::LevelFilter::WARN
        };
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .without_time()
            .try_init();

        let data = std::fs::read(&self.input)
            .with_context(|| format!("cannot read {}", self.input.display()))?;
        let geometry = ImageGeometry {
            block_size: self.blocksize,
            page_size: self.pagesize,
            oob_size: self.oob.unwrap_or(0),
        };
        Ok(Image::open(data, geometry)?)
    }
}

/// Volume selection shared by the filesystem-level commands.
#[derive(Args)]
struct VolumeArgs {
    /// PEB offset of the UBI instance (see mtdls); any instance when absent.
    #[arg(long)]
    offset: Option<u32>,

    /// Volume name; the first volume when neither name nor index is given.
    #[arg(long)]
    volname: Option<String>,

    /// Volume-table index.
    #[arg(long)]
    volindex: Option<u32>,
}

#[derive(Subcommand)]
enum Command {
    /// List partitions, including UBI instances and unallocated space.
    Mtdls(ImageArgs),

    /// Dump the bytes of one partition to stdout.
    Mtdcat {
        #[command(flatten)]
        image: ImageArgs,
        /// Partition index from mtdls.
        index: usize,
    },

    /// Dump one physical erase block to stdout.
    Pebcat {
        #[command(flatten)]
        image: ImageArgs,
        /// Physical erase block number.
        index: u32,
    },

    /// List UBI instances and their volumes.
    Ubils(ImageArgs),

    /// List the LEB to PEB mapping of a volume.
    Lebls {
        #[command(flatten)]
        image: ImageArgs,
        #[command(flatten)]
        volume: VolumeArgs,
    },

    /// Dump one mapped logical erase block to stdout.
    Lebcat {
        #[command(flatten)]
        image: ImageArgs,
        #[command(flatten)]
        volume: VolumeArgs,
        /// Logical erase block number (see lebls).
        leb: u32,
        /// Print the backing headers instead of the data.
        #[arg(long)]
        headers: bool,
    },

    /// Dump a whole volume (its mapped LEBs, in order) to stdout.
    Ubicat {
        #[command(flatten)]
        image: ImageArgs,
        #[command(flatten)]
        volume: VolumeArgs,
        /// Print per-LEB header summaries instead of the data.
        #[arg(long)]
        headers: bool,
    },

    /// Print the superblock and master-node summary of a volume.
    Fsstat {
        #[command(flatten)]
        image: ImageArgs,
        #[command(flatten)]
        volume: VolumeArgs,
    },

    /// List directory entries.
    Fls {
        #[command(flatten)]
        image: ImageArgs,
        #[command(flatten)]
        volume: VolumeArgs,
        /// Print full unrolled paths instead of names.
        #[arg(long)]
        path: bool,
        /// Include extended-attribute entries.
        #[arg(long)]
        xentries: bool,
        /// Scan for signatures instead of walking the index.
        #[arg(long)]
        scan: bool,
        /// Only show deleted entries and their related names.
        #[arg(long)]
        deleted: bool,
        /// Output format.
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },

    /// List inodes.
    Ils {
        #[command(flatten)]
        image: ImageArgs,
        #[command(flatten)]
        volume: VolumeArgs,
        /// Scan for signatures instead of walking the index.
        #[arg(long)]
        scan: bool,
        /// Only show deleted inodes (link count zero).
        #[arg(long)]
        deleted: bool,
        /// Output format.
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },

    /// List the directory entries referring to an inode.
    Ffind {
        #[command(flatten)]
        image: ImageArgs,
        #[command(flatten)]
        volume: VolumeArgs,
        /// Inode number.
        inode: u32,
        /// Scan for signatures instead of walking the index.
        #[arg(long)]
        scan: bool,
        /// Print full unrolled paths instead of names.
        #[arg(long)]
        path: bool,
    },

    /// Dump the content of an inode.
    Icat {
        #[command(flatten)]
        image: ImageArgs,
        #[command(flatten)]
        volume: VolumeArgs,
        /// Inode number.
        inode: u32,
        /// Scan for signatures instead of walking the index.
        #[arg(long)]
        scan: bool,
        /// Write to a file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print the metadata of an inode.
    Istat {
        #[command(flatten)]
        image: ImageArgs,
        #[command(flatten)]
        volume: VolumeArgs,
        /// Inode number.
        inode: u32,
        /// Scan for signatures instead of walking the index.
        #[arg(long)]
        scan: bool,
    },

    /// List journal nodes: the log and the buds it references.
    Jls {
        #[command(flatten)]
        image: ImageArgs,
        #[command(flatten)]
        volume: VolumeArgs,
    },

    /// Extract all files of every UBIFS volume in the image.
    #[command(name = "ubift_recover")]
    UbiftRecover {
        #[command(flatten)]
        image: ImageArgs,
        /// Also recover deleted files into UBIFT_RECOVERED_FILES.
        #[arg(long)]
        deleted: bool,
        /// Dump raw volume data when a volume holds no UBIFS.
        #[arg(long)]
        raw: bool,
        /// Output directory.
        #[arg(long, default_value = "ubift_extracted")]
        output: PathBuf,
    },

    /// Report how much deleted data is still recoverable.
    #[command(name = "ubift_info")]
    UbiftInfo {
        #[command(flatten)]
        image: ImageArgs,
        /// Also list every deleted inode.
        #[arg(long = "inode_info")]
        inode_info: bool,
    },
}

fn main() {
    if let Err(err) = Cli::parse().dispatch() {
        eprintln!("ubift: {err:#}");
        std::process::exit(1);
    }
}

impl Cli {
    fn dispatch(self) -> Result<()> {
        match self.command {
            Command::Mtdls(image) => mtd::mtdls(&image),
            Command::Mtdcat { image, index } => mtd::mtdcat(&image, index),
            Command::Pebcat { image, index } => mtd::pebcat(&image, index),
            Command::Ubils(image) => volume::ubils(&image),
            Command::Lebls { image, volume } => volume::lebls(&image, &volume),
            Command::Lebcat { image, volume, leb, headers } => {
                volume::lebcat(&image, &volume, leb, headers)
            }
            Command::Ubicat { image, volume, headers } => {
                volume::ubicat(&image, &volume, headers)
            }
            Command::Fsstat { image, volume } => fscmd::fsstat(&image, &volume),
            Command::Fls { image, volume, path, xentries, scan, deleted, format } => {
                fscmd::fls(&image, &volume, path, xentries, scan, deleted, format)
            }
            Command::Ils { image, volume, scan, deleted, format } => {
                fscmd::ils(&image, &volume, scan, deleted, format)
            }
            Command::Ffind { image, volume, inode, scan, path } => {
                fscmd::ffind(&image, &volume, inode, scan, path)
            }
            Command::Icat { image, volume, inode, scan, output } => {
                fscmd::icat(&image, &volume, inode, scan, output.as_deref())
            }
            Command::Istat { image, volume, inode, scan } => {
                fscmd::istat(&image, &volume, inode, scan)
            }
            Command::Jls { image, volume } => fscmd::jls(&image, &volume),
            Command::UbiftRecover { image, deleted, raw, output } => {
                recovery::recover(&image, deleted, raw, &output)
            }
            Command::UbiftInfo { image, inode_info } => recovery::info(&image, inode_info),
        }
    }
}

/// Runs `action` on the volume the selector picks.
///
/// Volumes are searched across all UBI instances of the image; without a
/// name or index, the first volume of the first matching instance wins.
fn with_volume<T>(
    image: &Image,
    selector: &VolumeArgs,
    action: impl FnOnce(&UbiVolume<'_>) -> Result<T>,
) -> Result<T> {
    let partitions = UbiPartitioner::new().partition(image, false);
    for partition in partitions.iter().filter(|p| p.kind() == PartitionKind::Ubi) {
        let ubi = Ubi::new(image, *partition);
        if let Some(offset) = selector.offset {
            if ubi.peb_offset() != offset {
                continue;
            }
        }
        let found = if let Some(name) = &selector.volname {
            ubi.volume_by_name(name)
        } else if let Some(index) = selector.volindex {
            ubi.volume_by_index(index)
        } else {
            ubi.volumes().first()
        };
        if let Some(volume) = found {
            return action(volume);
        }
    }
    bail!("no matching UBI volume found")
}

/// Runs `action` on the UBIFS instance of the selected volume.
fn with_ubifs<T>(
    image: &Image,
    selector: &VolumeArgs,
    action: impl FnOnce(&Ubifs<'_>) -> Result<T>,
) -> Result<T> {
    with_volume(image, selector, |volume| {
        let ubifs = Ubifs::new(volume, UbifsOptions::default())?;
        action(&ubifs)
    })
}
