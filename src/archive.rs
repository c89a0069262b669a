//! Archive handle: open a .kpack file, parse header and TOC, build the
//! per-scheme kernel index, and fetch kernel payloads by (binary, arch).
//!
//! A handle is immutable after open except for the file cursor and the zstd
//! decompression context, which live behind one internal mutex so
//! [`Archive::get_kernel`] is safe to call from multiple threads. Fetched
//! kernels are returned as fresh owned buffers with no tie to the handle.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::error::{KpackError, Result};
use crate::format::{
    CompressionScheme, FrameInfo, Header, MAX_KERNEL_COUNT, MAX_ZSTD_BLOB_SIZE,
};
use crate::toc::Toc;

/// Scheme-specific kernel index, fixed at open time.
enum KernelIndex {
    /// `none`: the TOC blob locators are the index; payloads read from file.
    Raw,
    /// `zstd-per-kernel`: the framed blob is cached whole; frames located by
    /// `(offset_in_blob, compressed_size)`.
    Zstd { blob: Vec<u8>, frames: Vec<FrameInfo> },
}

/// File-position-bearing state. `seek + read` is not atomic and the zstd
/// context is single-threaded, so both serialize behind the same mutex.
struct ArchiveIo {
    file: BufReader<File>,
    zstd: Option<zstd::bulk::Decompressor<'static>>,
}

/// An opened kpack archive.
pub struct Archive {
    path: PathBuf,
    version: u32,
    toc: Toc,
    binary_names: Vec<String>,
    index: KernelIndex,
    io: Mutex<ArchiveIo>,
}

impl Archive {
    /// Open a .kpack file: validate the header, decode the TOC, and build the
    /// kernel index for the archive's compression scheme.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => KpackError::FileNotFound(path.to_path_buf()),
            _ => KpackError::Io(err),
        })?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let header = Header::read(&mut reader)?;
        if header.toc_offset >= file_size {
            return Err(KpackError::InvalidFormat(
                "TOC offset past end of file".to_string(),
            ));
        }

        let toc_len = usize::try_from(file_size - header.toc_offset)
            .map_err(|_| KpackError::InvalidFormat("TOC too large".to_string()))?;
        reader.seek(SeekFrom::Start(header.toc_offset))?;
        let mut toc_bytes = vec![0u8; toc_len];
        reader.read_exact(&mut toc_bytes)?;
        let toc = Toc::parse(&toc_bytes, file_size)?;

        let scheme = toc.scheme.unwrap_or(CompressionScheme::None);
        let (index, zstd) = match scheme {
            CompressionScheme::None => (KernelIndex::Raw, None),
            CompressionScheme::ZstdPerKernel => {
                let blob = read_zstd_blob(&mut reader, toc.zstd_offset, toc.zstd_size)?;
                let frames = build_frame_index(&blob)?;
                let zstd = zstd::bulk::Decompressor::new()
                    .map_err(|_| KpackError::OutOfMemory)?;
                (KernelIndex::Zstd { blob, frames }, Some(zstd))
            }
        };

        let archive = Archive {
            path: path.to_path_buf(),
            version: header.version,
            binary_names: toc.entries.keys().cloned().collect(),
            toc,
            index,
            io: Mutex::new(ArchiveIo { file: reader, zstd }),
        };
        archive.check_ordinals()?;

        debug!(
            path = %archive.path.display(),
            scheme = archive.scheme().name(),
            arches = archive.architecture_count(),
            binaries = archive.binary_count(),
            "opened kpack archive"
        );
        Ok(archive)
    }

    /// Every ordinal referenced by the TOC must address a real blob/frame.
    fn check_ordinals(&self) -> Result<()> {
        let limit = match &self.index {
            KernelIndex::Raw => self.toc.blobs.len(),
            KernelIndex::Zstd { frames, .. } => frames.len(),
        };
        for per_arch in self.toc.entries.values() {
            for entry in per_arch.values() {
                if entry.ordinal as usize >= limit {
                    return Err(KpackError::InvalidFormat(format!(
                        "kernel ordinal {} out of range ({} payloads)",
                        entry.ordinal, limit
                    )));
                }
            }
        }
        Ok(())
    }

    /// Path this archive was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Format version from the header (always 1 for an open handle).
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Build-slice name from the TOC; empty if not recorded.
    #[must_use]
    pub fn group_name(&self) -> &str {
        &self.toc.group_name
    }

    /// Architecture family from the TOC; empty if not recorded.
    #[must_use]
    pub fn arch_family(&self) -> &str {
        &self.toc.gfx_arch_family
    }

    /// Compression scheme of the payload section.
    #[must_use]
    pub fn scheme(&self) -> CompressionScheme {
        self.toc.scheme.unwrap_or(CompressionScheme::None)
    }

    /// Number of architectures declared by the archive.
    #[must_use]
    pub fn architecture_count(&self) -> usize {
        self.toc.gfx_arches.len()
    }

    /// Architecture name by position. `InvalidArgument` when out of range.
    pub fn architecture(&self, index: usize) -> Result<&str> {
        self.toc
            .gfx_arches
            .get(index)
            .map(String::as_str)
            .ok_or(KpackError::InvalidArgument("architecture index out of range"))
    }

    /// Iterator over the declared architectures in TOC order.
    pub fn architectures(&self) -> impl Iterator<Item = &str> {
        self.toc.gfx_arches.iter().map(String::as_str)
    }

    /// Number of binaries with kernels in the archive.
    #[must_use]
    pub fn binary_count(&self) -> usize {
        self.binary_names.len()
    }

    /// Binary name by position (sorted order). `InvalidArgument` when out of range.
    pub fn binary(&self, index: usize) -> Result<&str> {
        self.binary_names
            .get(index)
            .map(String::as_str)
            .ok_or(KpackError::InvalidArgument("binary index out of range"))
    }

    /// Fetch the kernel payload for `(binary_name, arch)`.
    ///
    /// Returns a freshly allocated buffer owned by the caller; its lifetime is
    /// independent of the archive. Safe to call concurrently on one handle.
    pub fn get_kernel(&self, binary_name: &str, arch: &str) -> Result<Vec<u8>> {
        let entry = self
            .toc
            .kernel(binary_name, arch)
            .ok_or(KpackError::KernelNotFound)?;

        match &self.index {
            KernelIndex::Raw => self.read_raw(entry.ordinal),
            KernelIndex::Zstd { blob, frames } => {
                self.decompress_frame(blob, frames, entry.ordinal, entry.original_size)
            }
        }
    }

    fn read_raw(&self, ordinal: u32) -> Result<Vec<u8>> {
        let info = self
            .toc
            .blobs
            .get(ordinal as usize)
            .copied()
            .ok_or(KpackError::KernelNotFound)?;
        let size = usize::try_from(info.size)
            .map_err(|_| KpackError::Io(std::io::ErrorKind::InvalidData.into()))?;

        let mut io = self.io.lock().unwrap_or_else(|e| e.into_inner());
        io.file.seek(SeekFrom::Start(info.offset))?;
        let mut payload = vec![0u8; size];
        io.file.read_exact(&mut payload)?;
        Ok(payload)
    }

    fn decompress_frame(
        &self,
        blob: &[u8],
        frames: &[FrameInfo],
        ordinal: u32,
        original_size: u64,
    ) -> Result<Vec<u8>> {
        let frame = frames
            .get(ordinal as usize)
            .copied()
            .ok_or(KpackError::KernelNotFound)?;
        let start = frame.offset_in_blob as usize;
        let compressed = &blob[start..start + frame.compressed_size as usize];
        let capacity = usize::try_from(original_size)
            .map_err(|_| KpackError::DecompressionFailed("kernel too large".to_string()))?;

        let mut io = self.io.lock().unwrap_or_else(|e| e.into_inner());
        let zstd = io
            .zstd
            .as_mut()
            .ok_or_else(|| KpackError::DecompressionFailed("no decoder context".to_string()))?;
        let payload = zstd
            .decompress(compressed, capacity)
            .map_err(|err| KpackError::DecompressionFailed(err.to_string()))?;
        drop(io);

        // Length oracle: the TOC's original_size must match exactly.
        if payload.len() as u64 != original_size {
            return Err(KpackError::DecompressionFailed(format!(
                "frame {} decoded to {} bytes, expected {}",
                ordinal,
                payload.len(),
                original_size
            )));
        }
        Ok(payload)
    }
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("path", &self.path)
            .field("scheme", &self.scheme().name())
            .field("architectures", &self.toc.gfx_arches)
            .field("binaries", &self.binary_names.len())
            .finish()
    }
}

/// Read the framed blob region into memory (whole-blob caching).
fn read_zstd_blob(
    reader: &mut BufReader<File>,
    offset: u64,
    size: u64,
) -> Result<Vec<u8>> {
    if size > MAX_ZSTD_BLOB_SIZE {
        return Err(KpackError::InvalidFormat(
            "zstd blob region exceeds 4 GiB".to_string(),
        ));
    }
    let len = usize::try_from(size)
        .map_err(|_| KpackError::InvalidFormat("zstd blob too large".to_string()))?;
    reader.seek(SeekFrom::Start(offset))?;
    let mut blob = vec![0u8; len];
    reader.read_exact(&mut blob)?;
    Ok(blob)
}

/// Parse the frame table: u32 LE count, then per frame a u32 LE compressed
/// length followed by that many payload bytes. Every prefix must fit inside
/// the blob.
fn build_frame_index(blob: &[u8]) -> Result<Vec<FrameInfo>> {
    let count = read_u32_le(blob, 0)
        .ok_or_else(|| KpackError::InvalidFormat("zstd blob missing frame count".to_string()))?
        as usize;
    if count > MAX_KERNEL_COUNT {
        return Err(KpackError::InvalidFormat(format!(
            "frame count {count} exceeds limit"
        )));
    }

    let mut frames = Vec::with_capacity(count);
    let mut pos = 4usize;
    for _ in 0..count {
        let len = read_u32_le(blob, pos).ok_or_else(|| {
            KpackError::InvalidFormat("truncated frame length prefix".to_string())
        })? as usize;
        pos += 4;
        let end = pos
            .checked_add(len)
            .filter(|end| *end <= blob.len())
            .ok_or_else(|| KpackError::InvalidFormat("frame extends past blob end".to_string()))?;
        frames.push(FrameInfo {
            offset_in_blob: pos as u64,
            compressed_size: len as u32,
        });
        pos = end;
    }
    Ok(frames)
}

fn read_u32_le(bytes: &[u8], pos: usize) -> Option<u32> {
    let raw: [u8; 4] = bytes.get(pos..pos + 4)?.try_into().ok()?;
    Some(u32::from_le_bytes(raw))
}

/// Open `path` and visit each declared architecture in order. The visitor
/// returns `false` to stop early.
pub fn enumerate_architectures<P, F>(path: P, mut visit: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnMut(&str) -> bool,
{
    let archive = Archive::open(path)?;
    for arch in archive.architectures() {
        if !visit(arch) {
            break;
        }
    }
    Ok(())
}
