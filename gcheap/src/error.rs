use thiserror::Error;

use crate::allocator::AllocatorId;

#[derive(Error, Debug)]
pub enum GcError {
    #[error("out of memory allocating a {size} byte object")]
    OutOfMemory { size: usize },

    #[error("object is already registered with {allocator}")]
    DuplicateObject { allocator: AllocatorId },

    #[error("failed to spawn collector thread")]
    CollectorSpawn(#[source] std::io::Error),

    #[error("collector thread panicked")]
    CollectorPanicked,

    #[error("failed to parse configuration")]
    ConfigParse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, GcError>;
