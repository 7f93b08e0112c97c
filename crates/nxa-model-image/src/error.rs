use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ImageError>;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("out of memory allocating {len} bytes")]
    OutOfMemory { len: usize },

    #[error("invalid model image magic")]
    InvalidMagic,

    #[error("unsupported model image version {0}")]
    UnsupportedVersion(u16),

    #[error("invalid endianness tag {0}")]
    InvalidEndianness(u8),

    #[error("model image ends before the required bytes")]
    Truncated,

    #[error("destination region too small (payload is {needed} bytes, region holds {have})")]
    BufferTooSmall { needed: u64, have: u64 },

    #[error("corrupt pointer: offset {offset:#x} outside {payload_size}-byte payload")]
    CorruptPointer { offset: u64, payload_size: u64 },

    #[error("corrupt model image: {0}")]
    Corrupt(&'static str),

    #[error("utf-8 decoding failed: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}
