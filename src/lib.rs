//! kpack — runtime loader for content-addressed GPU code-object archives.
//!
//! Compiled GPU binaries embed lightweight metadata naming a .kpack archive
//! and a kernel; this crate resolves that metadata into an owned byte buffer
//! holding the code object for the running GPU architecture, so binaries
//! need not carry every architecture variant inline.
//!
//! This crate provides:
//! - **Format types** (`format`): header, compression schemes, constants.
//! - **Archive handle** (`archive`): [`Archive::open`] plus architecture /
//!   binary queries and thread-safe [`Archive::get_kernel`].
//! - **Kernel cache** (`cache`): [`KernelCache`] — process-wide archive
//!   memoization and the arch-first [`KernelCache::load_code_object`] search.
//! - **Discovery** (`procmaps`): [`discover_binary_path`] — map an
//!   in-process address to the mapped binary file and offset.
//! - **C surface** (`ffi`): the exported `kpack_*` ABI.

pub mod archive;
pub mod cache;
pub mod config;
pub mod error;
pub mod ffi;
pub mod format;
pub mod metadata;
pub mod paths;
pub mod procmaps;
pub mod toc;

pub use archive::{enumerate_architectures, Archive};
pub use cache::KernelCache;
pub use config::CacheConfig;
pub use error::{KpackError, Result};
pub use format::{CompressionScheme, KPACK_MAGIC, KPACK_VERSION};
pub use metadata::{HipkMetadata, MAX_METADATA_SIZE};
pub use procmaps::discover_binary_path;
