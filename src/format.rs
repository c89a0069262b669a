//! Kpack container format types and constants.
//!
//! Defines the fixed binary header layout, compression schemes, and index
//! entry types for the .kpack archive format. All multi-byte fields are
//! little-endian.

use std::io::Read;

use crate::error::{KpackError, Result};

/// Magic bytes at the start of every kpack file: "KPAK".
pub const KPACK_MAGIC: [u8; 4] = *b"KPAK";

/// The only format version this runtime accepts.
pub const KPACK_VERSION: u32 = 1;

/// Fixed header size: magic (4) + version (4) + TOC offset (8).
pub const HEADER_SIZE: usize = 16;

/// Upper bound on the cached zstd blob region (4 GiB).
pub const MAX_ZSTD_BLOB_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Upper bound on the per-archive kernel count.
pub const MAX_KERNEL_COUNT: usize = 1_048_576;

/// How kernel payloads are stored in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionScheme {
    /// Raw blobs at absolute file offsets.
    None,
    /// One zstd frame per kernel inside a single framed blob region.
    ZstdPerKernel,
}

impl CompressionScheme {
    /// Scheme name as it appears in the TOC `compression_scheme` field.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            CompressionScheme::None => "none",
            CompressionScheme::ZstdPerKernel => "zstd-per-kernel",
        }
    }

    pub(crate) fn from_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(CompressionScheme::None),
            "zstd-per-kernel" => Some(CompressionScheme::ZstdPerKernel),
            _ => None,
        }
    }
}

/// Locator for one raw kernel blob (`none` scheme).
#[derive(Debug, Clone, Copy)]
pub struct BlobInfo {
    /// Absolute file offset.
    pub offset: u64,
    /// Blob size in bytes.
    pub size: u64,
}

/// Locator for one zstd frame inside the cached blob (`zstd-per-kernel`).
#[derive(Debug, Clone, Copy)]
pub struct FrameInfo {
    /// Offset within the cached blob.
    pub offset_in_blob: u64,
    /// Compressed frame size in bytes.
    pub compressed_size: u32,
}

/// Parsed fixed header of a kpack file.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    /// Format version (must equal [`KPACK_VERSION`]).
    pub version: u32,
    /// Absolute file offset of the MessagePack TOC.
    pub toc_offset: u64,
}

impl Header {
    /// Read and validate the 16-byte header from the start of `reader`.
    pub fn read<R: Read>(reader: &mut R) -> Result<Header> {
        let mut raw = [0u8; HEADER_SIZE];
        reader.read_exact(&mut raw).map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                KpackError::InvalidFormat("file shorter than kpack header".to_string())
            } else {
                KpackError::Io(err)
            }
        })?;

        if raw[0..4] != KPACK_MAGIC {
            return Err(KpackError::InvalidFormat("bad magic: expected KPAK".to_string()));
        }

        let version = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        if version != KPACK_VERSION {
            return Err(KpackError::UnsupportedVersion(version));
        }

        let toc_offset = u64::from_le_bytes([
            raw[8], raw[9], raw[10], raw[11], raw[12], raw[13], raw[14], raw[15],
        ]);

        Ok(Header { version, toc_offset })
    }
}
