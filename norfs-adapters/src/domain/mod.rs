//! Domain layer - geometry, errors and the block device port.
//!
//! Nothing in here touches a flash driver. The layer defines:
//! - **Value Objects**: `VolumeConfig`, `BlockCycles`
//! - **Ports**: `BlockDevice`, the four callbacks a filesystem drives
//! - **Policies**: `RetryPolicy` for device faults
//! - **Domain Errors**: `ConfigError`, `DeviceError`
//!
//! ```text
//!     ┌──────────────────────────────────┐
//!     │      Filesystem (norfs)          │
//!     └────────────┬─────────────────────┘
//!                  │ read / program / erase / sync
//!                  ▼
//!     ┌──────────────────────────────────┐
//!     │      BlockDevice port            │  ◄── This layer
//!     │      VolumeConfig                │
//!     └────────────┬─────────────────────┘
//!                  │ implemented by
//!                  ▼
//!     ┌──────────────────────────────────┐
//!     │  NorFlashAdapter (adapters)      │
//!     └──────────────────────────────────┘
//! ```

pub mod error;
pub mod ports;
pub mod retry;
pub mod value_objects;

pub use error::{BufferKind, ConfigError, DeviceError, FlashFault, Operation};
pub use ports::BlockDevice;
pub use retry::{NoRetry, RetryPolicy, RetryTimes};
pub use value_objects::{
    BlockCycles, VolumeConfig, VolumeConfigBuilder, MIN_BLOCK_COUNT, MIN_BLOCK_SIZE,
};
