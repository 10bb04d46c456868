//! Adapter layer - concrete implementations of the domain's port.
//!
//! ```text
//!     ┌──────────────────────────────────┐
//!     │      Domain Layer                │
//!     │  - BlockDevice (port)            │
//!     │  - VolumeConfig                  │
//!     └────────────┬─────────────────────┘
//!                  │ implements
//!                  ▼
//!     ┌──────────────────────────────────┐
//!     │      Adapter Layer               │  ◄── This module
//!     │  - NorFlashAdapter               │
//!     │  - BufferPool / StaticBuffers    │
//!     │  - RamNorFlash (ram-flash)       │
//!     └────────────┬─────────────────────┘
//!                  │ uses
//!                  ▼
//!     ┌──────────────────────────────────┐
//!     │  embedded-storage NorFlash       │
//!     └──────────────────────────────────┘
//! ```
//!
//! # Available Adapters
//!
//! - **`NorFlashAdapter`**: exposes any `NorFlash` chip as a `BlockDevice`
//! - **`StaticBuffers`**: compile-time sized cache buffers (no_std)
//! - **`BufferPool::allocate`**: runtime sized cache buffers (requires `alloc`)
//! - **`RamNorFlash`**: NOR flash simulator (requires `ram-flash`)

mod buffer_pool;
mod nor_flash_adapter;

#[cfg(any(feature = "ram-flash", test))]
mod ram_flash;

pub use buffer_pool::{BufferPool, PoolSlices, ReferenceBuffers, StaticBuffers};
pub use nor_flash_adapter::NorFlashAdapter;

#[cfg(any(feature = "ram-flash", test))]
pub use ram_flash::{
    FaultPlan, FlashStats, RamFlashError, RamNorFlash, W25qRamFlash, ERASED_BYTE,
};
