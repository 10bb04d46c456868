//! Value objects for the domain layer.
//!
//! Immutable, validated data shared between the adapter and the
//! filesystem. Validation happens once, at construction.

mod volume_config;

pub use volume_config::{
    BlockCycles, VolumeConfig, VolumeConfigBuilder, MIN_BLOCK_COUNT, MIN_BLOCK_SIZE,
};
