//! Command-line interface over flash image files.
//!
//! An image is the raw contents of a W25Qxx region: `block_count` sectors of
//! 4096 bytes. Every command loads it into the RAM flash simulator, runs the
//! filesystem on it, and writes it back if the command changed anything.

use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{debug, info};
use norfs::{boot_count, Error, MountOutcome, OpenFlags, RecoveryPolicy, Volume};
use norfs_adapters::{BlockCycles, BufferPool, NorFlashAdapter, VolumeConfig, W25qRamFlash};

const SECTOR_SIZE: usize = 4096;
const DEFAULT_BLOCK_COUNT: u32 = 128;

type ImageVolume = Volume<NorFlashAdapter<W25qRamFlash>, Vec<u8>>;

/// Inspect and modify norfs NOR flash images
#[derive(Parser, Debug)]
#[command(name = "norfs", version, about)]
pub struct Cli {
    /// Flash image file
    pub image: PathBuf,

    /// Number of 4096-byte blocks (default: 128 for `create`, the image size otherwise)
    #[arg(long, global = true)]
    pub block_count: Option<u32>,

    /// Compactions before the directory is relocated, -1 to never relocate
    #[arg(long, global = true, default_value_t = 500, allow_negative_numbers = true)]
    pub block_cycles: i32,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an erased image
    Create {
        /// Overwrite an existing image
        #[arg(long)]
        force: bool,
    },
    /// Write an empty filesystem, destroying all files
    Format,
    /// Run the boot sequence: mount (formatting per policy) and count one boot
    Boot {
        /// What to do when the image does not mount
        #[arg(long, value_enum, default_value_t = Policy::Format)]
        policy: Policy,
    },
    /// List files
    Ls,
    /// Print a file to stdout
    Cat {
        /// File name in the image
        name: String,
    },
    /// Copy a host file into the image
    Put {
        /// Host file to copy
        source: PathBuf,
        /// Name in the image (default: the host file name)
        name: Option<String>,
    },
    /// Delete a file
    Rm {
        /// File name in the image
        name: String,
    },
    /// Show geometry, usage and the boot counter
    Info,
}

/// Recovery policy names on the command line.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Policy {
    /// Format on any mount failure
    Format,
    /// Retry once, format only a corrupt or blank image
    Diagnose,
    /// Never format
    Never,
}

impl From<Policy> for RecoveryPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Format => RecoveryPolicy::FormatOnFailure,
            Policy::Diagnose => RecoveryPolicy::Diagnose,
            Policy::Never => RecoveryPolicy::Never,
        }
    }
}

pub fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Command::Create { force } => create(&cli, *force),
        Command::Format => {
            let mut volume = open_image(&cli)?;
            volume.format().context("formatting")?;
            save_image(&cli.image, volume)?;
            println!("Formatted {}", cli.image.display());
            Ok(())
        }
        Command::Boot { policy } => {
            let mut volume = open_image(&cli)?;
            let outcome = volume
                .mount_or_format((*policy).into())
                .context("mounting")?;
            if let MountOutcome::Formatted { cause } = outcome {
                println!("Mount failed ({cause}), formatted");
            }
            let count = boot_count::record_boot(&mut volume).context("recording boot")?;
            volume.unmount()?;
            save_image(&cli.image, volume)?;
            println!("Boot count: {count}");
            Ok(())
        }
        Command::Ls => {
            let mut volume = mounted(&cli)?;
            let mut total = 0u64;
            volume.list(|meta| {
                total += u64::from(meta.len());
                println!("{:>10}  {}", meta.len(), meta.name());
            })?;
            println!("{total} bytes");
            Ok(())
        }
        Command::Cat { name } => {
            let mut volume = mounted(&cli)?;
            let mut file = volume
                .open(name, OpenFlags::READ)
                .with_context(|| format!("opening {name}"))?;
            let mut stdout = io::stdout().lock();
            let mut buf = [0u8; 512];
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                stdout.write_all(&buf[..n])?;
            }
            file.close()?;
            stdout.flush()?;
            Ok(())
        }
        Command::Put { source, name } => {
            let data = fs::read(source).with_context(|| format!("reading {}", source.display()))?;
            let name = match name {
                Some(name) => name.clone(),
                None => source
                    .file_name()
                    .and_then(|n| n.to_str())
                    .context("source has no usable file name")?
                    .to_owned(),
            };
            let mut volume = mounted(&cli)?;
            let mut file = volume
                .open(&name, OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNC)
                .with_context(|| format!("creating {name}"))?;
            file.write(&data).with_context(|| format!("writing {name}"))?;
            file.close()?;
            volume.unmount()?;
            save_image(&cli.image, volume)?;
            println!("Wrote {} bytes to {name}", data.len());
            Ok(())
        }
        Command::Rm { name } => {
            let mut volume = mounted(&cli)?;
            volume.remove(name).with_context(|| format!("removing {name}"))?;
            volume.unmount()?;
            save_image(&cli.image, volume)?;
            Ok(())
        }
        Command::Info => info(&cli),
    }
}

fn config(cli: &Cli, block_count: u32) -> Result<VolumeConfig> {
    let cycles = BlockCycles::from_raw(cli.block_cycles)?;
    Ok(VolumeConfig::builder()
        .block_count(block_count)
        .block_cycles(cycles)
        .build()?)
}

fn create(cli: &Cli, force: bool) -> Result<()> {
    if cli.image.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", cli.image.display());
    }
    let block_count = cli.block_count.unwrap_or(DEFAULT_BLOCK_COUNT);
    let config = config(cli, block_count)?;
    let flash = W25qRamFlash::new(block_count as usize);
    fs::write(&cli.image, flash.image())
        .with_context(|| format!("writing {}", cli.image.display()))?;
    println!(
        "Created {} ({} blocks, {} bytes)",
        cli.image.display(),
        config.block_count(),
        config.capacity()
    );
    Ok(())
}

fn open_image(cli: &Cli) -> Result<ImageVolume> {
    let image = fs::read(&cli.image).with_context(|| format!("reading {}", cli.image.display()))?;
    if image.is_empty() || image.len() % SECTOR_SIZE != 0 {
        bail!(
            "{} is {} bytes, not a whole number of {SECTOR_SIZE}-byte sectors",
            cli.image.display(),
            image.len()
        );
    }
    let blocks = u32::try_from(image.len() / SECTOR_SIZE).context("image too large")?;
    if let Some(expected) = cli.block_count {
        if expected != blocks {
            bail!("image holds {blocks} blocks but --block-count is {expected}");
        }
    }

    let config = config(cli, blocks)?;
    debug!("loading {} ({} blocks)", cli.image.display(), blocks);
    let flash = W25qRamFlash::from_image(image)?;
    let device = NorFlashAdapter::new(flash, config)?;
    Ok(Volume::new(device, BufferPool::allocate(&config))?)
}

fn mounted(cli: &Cli) -> Result<ImageVolume> {
    let mut volume = open_image(cli)?;
    volume
        .mount()
        .with_context(|| format!("mounting {} (run `boot` or `format` first)", cli.image.display()))?;
    Ok(volume)
}

fn save_image(path: &Path, volume: ImageVolume) -> Result<()> {
    let (device, _) = volume.into_parts();
    let flash = device.into_inner();
    info!("saving {} ({} erases this run)", path.display(), flash.stats().erases);
    fs::write(path, flash.into_image()).with_context(|| format!("writing {}", path.display()))
}

fn info(cli: &Cli) -> Result<()> {
    let mut volume = open_image(cli)?;
    let config = *volume.config();
    println!("Image:        {}", cli.image.display());
    println!("Block size:   {}", config.block_size());
    println!("Block count:  {}", config.block_count());
    println!("Capacity:     {} bytes", config.capacity());
    match config.block_cycles().get() {
        Some(cycles) => println!("Block cycles: {cycles}"),
        None => println!("Block cycles: unbounded"),
    }

    match volume.mount() {
        Ok(()) => {
            let used = volume.used_blocks()?;
            let mut files = 0;
            volume.list(|_| files += 1)?;
            println!("Used blocks:  {used} of {}", config.block_count());
            println!("Files:        {files}");
            println!("Boot count:   {}", boot_count::read_boot_count(&mut volume)?);
        }
        Err(e @ (Error::NoFilesystem | Error::Corrupt | Error::Incompatible)) => {
            println!("Filesystem:   none ({e})");
        }
        Err(e @ Error::ForeignFilesystem) => {
            println!("Filesystem:   foreign ({e}); `boot --policy diagnose` leaves it intact");
        }
        Err(e) => return Err(e).context("mounting"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn run_args(image: &Path, args: &[&str]) -> Result<()> {
        let mut argv = vec!["norfs", image.to_str().unwrap()];
        argv.extend_from_slice(args);
        run(Cli::try_parse_from(argv)?)
    }

    fn boot_count_of(image: &Path) -> Result<u32> {
        let cli = Cli::try_parse_from(["norfs", image.to_str().unwrap(), "info"])?;
        let mut volume = mounted(&cli)?;
        Ok(boot_count::read_boot_count(&mut volume)?)
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_policy_names() {
        let cli = Cli::try_parse_from(["norfs", "x.img", "boot", "--policy", "diagnose"]).unwrap();
        assert!(matches!(cli.command, Command::Boot { policy: Policy::Diagnose }));
        assert_eq!(RecoveryPolicy::from(Policy::Format), RecoveryPolicy::default());
    }

    #[test]
    fn test_negative_block_cycles() {
        let cli = Cli::try_parse_from(["norfs", "x.img", "--block-cycles", "-1", "info"]).unwrap();
        assert_eq!(cli.block_cycles, -1);
        assert_eq!(config(&cli, 16).unwrap().block_cycles(), BlockCycles::UNBOUNDED);
    }

    #[test]
    fn test_boot_counts_across_runs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let image = dir.path().join("flash.img");
        run_args(&image, &["create", "--block-count", "16"])?;
        assert_eq!(fs::metadata(&image)?.len(), 16 * 4096);

        for _ in 0..3 {
            run_args(&image, &["boot"])?;
        }
        assert_eq!(boot_count_of(&image)?, 3);

        run_args(&image, &["format"])?;
        assert_eq!(boot_count_of(&image)?, 0);
        Ok(())
    }

    #[test]
    fn test_put_then_rm() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let image = dir.path().join("flash.img");
        let source = dir.path().join("notes.txt");
        fs::write(&source, b"remember the milk")?;

        run_args(&image, &["create", "--block-count", "16"])?;
        run_args(&image, &["format"])?;
        run_args(&image, &["put", source.to_str().unwrap()])?;

        let cli = Cli::try_parse_from(["norfs", image.to_str().unwrap(), "ls"])?;
        let mut volume = mounted(&cli)?;
        assert_eq!(volume.metadata("notes.txt")?.len(), 17);
        drop(volume);

        run_args(&image, &["rm", "notes.txt"])?;
        let mut volume = mounted(&cli)?;
        assert!(!volume.exists("notes.txt")?);
        Ok(())
    }

    #[test]
    fn test_mismatched_block_count_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let image = dir.path().join("flash.img");
        run_args(&image, &["create", "--block-count", "16"])?;
        assert!(run_args(&image, &["--block-count", "32", "format"]).is_err());
        assert!(run_args(&image, &["create"]).is_err());
        Ok(())
    }

    #[test]
    fn test_ls_needs_a_filesystem() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let image = dir.path().join("flash.img");
        run_args(&image, &["create", "--block-count", "16"])?;
        assert!(run_args(&image, &["ls"]).is_err());
        run_args(&image, &["info"])?;
        Ok(())
    }
}
