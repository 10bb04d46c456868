//! Ports - interfaces the domain exposes to the outside world.

mod block_device;

pub use block_device::BlockDevice;
