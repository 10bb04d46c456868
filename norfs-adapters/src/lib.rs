//! Block device layer for the norfs NOR flash filesystem.
//!
//! This crate holds everything between a filesystem and a NOR flash driver,
//! structured using hexagonal architecture (ports and adapters pattern).
//!
//! # Architecture
//!
//! ## Domain Layer (`domain`)
//! No driver dependencies:
//! - **Value Objects**: `VolumeConfig` (validated geometry), `BlockCycles`
//! - **Ports**: `BlockDevice`, block-addressed read / program / erase / sync
//! - **Policies**: `RetryPolicy`
//! - **Errors**: `ConfigError`, `DeviceError`
//!
//! ## Adapter Layer (`adapters`)
//! - **`NorFlashAdapter`**: implements `BlockDevice` over `embedded-storage`
//! - **`BufferPool`**: the four cache buffers a volume needs
//! - **`RamNorFlash`**: in-memory chip for tests and host tools
//!
//! # Quick Start
//!
//! The buffers are owned by whoever owns the volume, typically a local in
//! the firmware's `main` or a `StaticCell`:
//!
//! ```
//! use norfs_adapters::embedded_storage::nor_flash::NorFlash;
//! use norfs_adapters::{BlockDevice, ConfigError, NorFlashAdapter, ReferenceBuffers, VolumeConfig};
//!
//! fn bring_up<F: NorFlash>(w25q: F) -> Result<(), ConfigError> {
//!     let mut buffers = ReferenceBuffers::new();
//!     let config = VolumeConfig::w25q_reference();
//!     let device = NorFlashAdapter::new(w25q, config)?;
//!     let pool = buffers.pool(&config)?;
//!     assert_eq!(device.config().block_count(), 128);
//!     // hand `device` and `pool` to `norfs::Volume::new`
//!     drop(pool);
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `alloc`: heap-allocated buffer pools
//! - `std`: standard library support (implies `alloc`)
//! - `ram-flash`: the `RamNorFlash` simulator
//! - `log`: logging through the `log` crate
//! - `defmt`: logging through `defmt` for embedded targets

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

#[cfg(any(feature = "alloc", test))]
extern crate alloc;

#[macro_use]
mod fmt;

pub mod adapters;
pub mod domain;

pub use domain::{
    BlockCycles, BlockDevice, BufferKind, ConfigError, DeviceError, FlashFault, NoRetry,
    Operation, RetryPolicy, RetryTimes, VolumeConfig, VolumeConfigBuilder, MIN_BLOCK_COUNT,
    MIN_BLOCK_SIZE,
};

pub use adapters::{BufferPool, NorFlashAdapter, PoolSlices, ReferenceBuffers, StaticBuffers};

#[cfg(any(feature = "ram-flash", test))]
pub use adapters::{FaultPlan, FlashStats, RamFlashError, RamNorFlash, W25qRamFlash, ERASED_BYTE};

// Re-export embedded_storage so drivers and the filesystem agree on one version
pub use embedded_storage;
