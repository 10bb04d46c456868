//! A small power-loss-safe filesystem for serial NOR flash.
//!
//! Metadata lives in pairs of blocks holding append-only logs of
//! CRC-protected commits; file data lives in copy-on-write block chains.
//! A commit either lands completely or is ignored on the next mount, so
//! cutting power at any point leaves the last committed state readable.
//!
//! # Layout
//!
//! ```text
//! block 0,1   anchor pair: superblock + location of the directory pair
//! block a,b   directory pair: file records and deletions
//! others      data chains, each block pointing back at its predecessor
//! ```
//!
//! The directory pair starts at blocks 2 and 3 and moves to fresh blocks
//! every `block_cycles` compactions to spread erase wear.
//!
//! # Quick Start
//!
//! ```
//! use norfs::{boot_count, OpenFlags, RecoveryPolicy, Volume};
//! use norfs_adapters::{NorFlashAdapter, StaticBuffers, VolumeConfig, W25qRamFlash};
//!
//! let config = VolumeConfig::w25q_reference();
//! let mut buffers: StaticBuffers<16, 16> = StaticBuffers::new();
//! let device = NorFlashAdapter::new(W25qRamFlash::new(128), config)?;
//! let mut volume = Volume::new(device, buffers.pool(&config)?)?;
//!
//! volume.mount_or_format(RecoveryPolicy::default())?;
//! let boots = boot_count::record_boot(&mut volume)?;
//! println!("boot #{boots}");
//!
//! volume.list(|file| println!("{} {}", file.name(), file.len()))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Features
//!
//! - `std`: standard library support (implies `alloc`)
//! - `alloc`: heap-allocated buffer pools
//! - `log`: logging through the `log` crate
//! - `defmt`: logging through `defmt` for embedded targets

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

#[macro_use]
mod fmt;

mod cache;
mod chain;
mod error;
mod file;
mod lookahead;
mod metadata;
mod record;
mod recovery;
mod volume;

pub mod boot_count;

pub use error::Error;
pub use file::{File, OpenFlags};
pub use record::{FileName, NAME_MAX};
pub use recovery::{MountOutcome, RecoveryPolicy};
pub use volume::{Metadata, Volume};

pub use embedded_io::SeekFrom;
pub use norfs_adapters;
