//! Error type for the kpack runtime, with stable numeric codes for the C surface.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, KpackError>;

/// Stable numeric error codes. These values are part of the C ABI and never
/// change meaning between releases.
pub mod code {
    pub const SUCCESS: u32 = 0;
    pub const INVALID_ARGUMENT: u32 = 1;
    pub const FILE_NOT_FOUND: u32 = 2;
    pub const INVALID_FORMAT: u32 = 3;
    pub const UNSUPPORTED_VERSION: u32 = 4;
    pub const KERNEL_NOT_FOUND: u32 = 5;
    pub const DECOMPRESSION_FAILED: u32 = 6;
    pub const OUT_OF_MEMORY: u32 = 7;
    pub const NOT_IMPLEMENTED: u32 = 8;
    pub const IO_ERROR: u32 = 9;
    pub const MSGPACK_PARSE_FAILED: u32 = 10;
    pub const INVALID_METADATA: u32 = 11;
    pub const ARCHIVE_NOT_FOUND: u32 = 12;
    pub const ARCH_NOT_FOUND: u32 = 13;
    pub const PATH_DISCOVERY_FAILED: u32 = 14;
}

/// Errors produced by the kpack runtime.
#[derive(Debug, Error)]
pub enum KpackError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("archive file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("invalid kpack format: {0}")]
    InvalidFormat(String),
    #[error("unsupported kpack version: {0} (supported: {supported})", supported = crate::format::KPACK_VERSION)]
    UnsupportedVersion(u32),
    #[error("kernel not found")]
    KernelNotFound,
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),
    #[error("out of memory")]
    OutOfMemory,
    #[error("not implemented")]
    NotImplemented,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOC parse failed: {0}")]
    MsgpackParseFailed(String),
    #[error("invalid embedded kernel metadata: {0}")]
    InvalidMetadata(&'static str),
    #[error("no kpack archive found on the search path")]
    ArchiveNotFound,
    #[error("no requested architecture available in any archive")]
    ArchNotFound,
    #[error("could not discover containing binary path")]
    PathDiscoveryFailed,
}

impl KpackError {
    /// Numeric code reported across the C ABI.
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            KpackError::InvalidArgument(_) => code::INVALID_ARGUMENT,
            KpackError::FileNotFound(_) => code::FILE_NOT_FOUND,
            KpackError::InvalidFormat(_) => code::INVALID_FORMAT,
            KpackError::UnsupportedVersion(_) => code::UNSUPPORTED_VERSION,
            KpackError::KernelNotFound => code::KERNEL_NOT_FOUND,
            KpackError::DecompressionFailed(_) => code::DECOMPRESSION_FAILED,
            KpackError::OutOfMemory => code::OUT_OF_MEMORY,
            KpackError::NotImplemented => code::NOT_IMPLEMENTED,
            KpackError::Io(_) => code::IO_ERROR,
            KpackError::MsgpackParseFailed(_) => code::MSGPACK_PARSE_FAILED,
            KpackError::InvalidMetadata(_) => code::INVALID_METADATA,
            KpackError::ArchiveNotFound => code::ARCHIVE_NOT_FOUND,
            KpackError::ArchNotFound => code::ARCH_NOT_FOUND,
            KpackError::PathDiscoveryFailed => code::PATH_DISCOVERY_FAILED,
        }
    }
}
