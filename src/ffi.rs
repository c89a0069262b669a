//! C ABI over the kpack runtime.
//!
//! Every entry point is panic-free, validates its pointers, and reports the
//! stable numeric codes from [`crate::error::code`]. Handles are opaque boxes
//! owned by the caller and released with the matching close/destroy call.
//! Kernel buffers handed out here are `malloc`-backed so C callers release
//! them with the matching free call (or `free()` itself).
//!
//! # Safety
//!
//! Callers must pass valid, NUL-terminated strings where `*const c_char` is
//! expected, and must not use a handle after closing it. The embedded
//! metadata pointer passed to [`kpack_load_code_object`] must point to a
//! region with at least [`MAX_METADATA_SIZE`] readable bytes.

use std::ffi::{c_char, c_void, CStr, CString};
use std::path::Path;
use std::ptr;
use std::slice;

use crate::archive::{enumerate_architectures, Archive};
use crate::cache::KernelCache;
use crate::error::code;
use crate::metadata::MAX_METADATA_SIZE;
use crate::procmaps::discover_binary_path;

/// Opaque archive handle exposed through the C surface.
///
/// Architecture and binary names are materialized as NUL-terminated copies at
/// open time so the query functions can return pointers that stay valid until
/// [`kpack_close`].
pub struct KpackArchive {
    inner: Archive,
    arch_names: Vec<CString>,
    binary_names: Vec<CString>,
}

/// Opaque cache handle exposed through the C surface.
pub struct KpackCache {
    inner: KernelCache,
}

/// Architecture-enumeration callback: return `false` to stop early.
pub type KpackArchCallback =
    extern "C" fn(arch: *const c_char, user_data: *mut c_void) -> bool;

unsafe fn cstr_arg<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

fn to_cstring(name: &str) -> CString {
    CString::new(name).unwrap_or_default()
}

/// Copy `data` into a fresh `malloc` allocation; null on allocation failure.
unsafe fn copy_to_malloc(data: &[u8]) -> *mut c_void {
    let ptr = libc::malloc(data.len().max(1));
    if !ptr.is_null() {
        ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
    }
    ptr
}

/// Open a kpack archive for reading.
#[no_mangle]
pub unsafe extern "C" fn kpack_open(
    path: *const c_char,
    archive_out: *mut *mut KpackArchive,
) -> u32 {
    if archive_out.is_null() {
        return code::INVALID_ARGUMENT;
    }
    let Some(path) = cstr_arg(path) else {
        return code::INVALID_ARGUMENT;
    };

    match Archive::open(Path::new(path)) {
        Ok(inner) => {
            let arch_names = inner.architectures().map(to_cstring).collect();
            let binary_names = (0..inner.binary_count())
                .filter_map(|i| inner.binary(i).ok().map(to_cstring))
                .collect();
            let handle = Box::new(KpackArchive {
                inner,
                arch_names,
                binary_names,
            });
            *archive_out = Box::into_raw(handle);
            code::SUCCESS
        }
        Err(err) => err.code(),
    }
}

/// Close an archive and release its resources. Null is a no-op.
#[no_mangle]
pub unsafe extern "C" fn kpack_close(archive: *mut KpackArchive) {
    if !archive.is_null() {
        drop(Box::from_raw(archive));
    }
}

/// Number of architectures in the archive.
#[no_mangle]
pub unsafe extern "C" fn kpack_get_architecture_count(
    archive: *const KpackArchive,
    count: *mut usize,
) -> u32 {
    let (Some(archive), false) = (archive.as_ref(), count.is_null()) else {
        return code::INVALID_ARGUMENT;
    };
    *count = archive.arch_names.len();
    code::SUCCESS
}

/// Architecture name by index. The pointer is valid until [`kpack_close`].
#[no_mangle]
pub unsafe extern "C" fn kpack_get_architecture(
    archive: *const KpackArchive,
    index: usize,
    arch: *mut *const c_char,
) -> u32 {
    let (Some(archive), false) = (archive.as_ref(), arch.is_null()) else {
        return code::INVALID_ARGUMENT;
    };
    match archive.arch_names.get(index) {
        Some(name) => {
            *arch = name.as_ptr();
            code::SUCCESS
        }
        None => code::INVALID_ARGUMENT,
    }
}

/// Number of binaries with kernels in the archive.
#[no_mangle]
pub unsafe extern "C" fn kpack_get_binary_count(
    archive: *const KpackArchive,
    count: *mut usize,
) -> u32 {
    let (Some(archive), false) = (archive.as_ref(), count.is_null()) else {
        return code::INVALID_ARGUMENT;
    };
    *count = archive.binary_names.len();
    code::SUCCESS
}

/// Binary name by index. The pointer is valid until [`kpack_close`].
#[no_mangle]
pub unsafe extern "C" fn kpack_get_binary(
    archive: *const KpackArchive,
    index: usize,
    binary: *mut *const c_char,
) -> u32 {
    let (Some(archive), false) = (archive.as_ref(), binary.is_null()) else {
        return code::INVALID_ARGUMENT;
    };
    match archive.binary_names.get(index) {
        Some(name) => {
            *binary = name.as_ptr();
            code::SUCCESS
        }
        None => code::INVALID_ARGUMENT,
    }
}

/// Fetch a kernel payload as a fresh caller-owned buffer.
///
/// Safe to call concurrently on the same archive handle. Release the buffer
/// with [`kpack_free_kernel`].
#[no_mangle]
pub unsafe extern "C" fn kpack_get_kernel(
    archive: *const KpackArchive,
    binary_name: *const c_char,
    arch: *const c_char,
    kernel_data: *mut *mut c_void,
    kernel_size: *mut usize,
) -> u32 {
    if kernel_data.is_null() || kernel_size.is_null() {
        return code::INVALID_ARGUMENT;
    }
    *kernel_data = ptr::null_mut();
    *kernel_size = 0;
    let Some(archive) = archive.as_ref() else {
        return code::INVALID_ARGUMENT;
    };
    let (Some(binary_name), Some(arch)) = (cstr_arg(binary_name), cstr_arg(arch)) else {
        return code::INVALID_ARGUMENT;
    };

    match archive.inner.get_kernel(binary_name, arch) {
        Ok(payload) => {
            let ptr = copy_to_malloc(&payload);
            if ptr.is_null() {
                return code::OUT_OF_MEMORY;
            }
            *kernel_data = ptr;
            *kernel_size = payload.len();
            code::SUCCESS
        }
        Err(err) => err.code(),
    }
}

/// Release a buffer from [`kpack_get_kernel`]. Null is a no-op.
#[no_mangle]
pub unsafe extern "C" fn kpack_free_kernel(kernel_data: *mut c_void) {
    libc::free(kernel_data);
}

/// Create a kernel cache. Configuration is resolved from the environment
/// here, once; creation must finish before the cache is shared across
/// threads.
#[no_mangle]
pub unsafe extern "C" fn kpack_cache_create(cache_out: *mut *mut KpackCache) -> u32 {
    if cache_out.is_null() {
        return code::INVALID_ARGUMENT;
    }
    let cache = Box::new(KpackCache {
        inner: KernelCache::new(),
    });
    *cache_out = Box::into_raw(cache);
    code::SUCCESS
}

/// Destroy a cache and close every archive it holds. Not safe to call while
/// other threads still use the cache. Null is a no-op.
#[no_mangle]
pub unsafe extern "C" fn kpack_cache_destroy(cache: *mut KpackCache) {
    if !cache.is_null() {
        drop(Box::from_raw(cache));
    }
}

/// Resolve embedded kernel metadata into a code object for the first
/// matching architecture. Release the buffer with
/// [`kpack_free_code_object`]. On failure the outputs stay null/zero.
#[no_mangle]
pub unsafe extern "C" fn kpack_load_code_object(
    cache: *const KpackCache,
    hipk_metadata: *const c_void,
    binary_path: *const c_char,
    arch_list: *const *const c_char,
    arch_count: usize,
    code_object_out: *mut *mut c_void,
    code_object_size_out: *mut usize,
) -> u32 {
    if code_object_out.is_null() || code_object_size_out.is_null() {
        return code::INVALID_ARGUMENT;
    }
    *code_object_out = ptr::null_mut();
    *code_object_size_out = 0;
    let Some(cache) = cache.as_ref() else {
        return code::INVALID_ARGUMENT;
    };
    if hipk_metadata.is_null() || arch_list.is_null() || arch_count == 0 {
        return code::INVALID_ARGUMENT;
    }
    let Some(binary_path) = cstr_arg(binary_path) else {
        return code::INVALID_ARGUMENT;
    };

    // The record's length is unknown at this boundary; the caller guarantees
    // this much is readable and the decoder stops at the record's own end.
    let metadata = slice::from_raw_parts(hipk_metadata.cast::<u8>(), MAX_METADATA_SIZE);

    let arches: Vec<&str> = slice::from_raw_parts(arch_list, arch_count)
        .iter()
        .filter_map(|entry| cstr_arg(*entry))
        .collect();

    match cache
        .inner
        .load_code_object(metadata, Path::new(binary_path), &arches)
    {
        Ok(payload) => {
            let ptr = copy_to_malloc(&payload);
            if ptr.is_null() {
                return code::OUT_OF_MEMORY;
            }
            *code_object_out = ptr;
            *code_object_size_out = payload.len();
            code::SUCCESS
        }
        Err(err) => err.code(),
    }
}

/// Release a buffer from [`kpack_load_code_object`]. Null is a no-op.
#[no_mangle]
pub unsafe extern "C" fn kpack_free_code_object(code_object: *mut c_void) {
    libc::free(code_object);
}

/// Open `archive_path` and invoke `callback` for each architecture, in TOC
/// order, until the callback returns `false`.
#[no_mangle]
pub unsafe extern "C" fn kpack_enumerate_architectures(
    archive_path: *const c_char,
    callback: Option<KpackArchCallback>,
    user_data: *mut c_void,
) -> u32 {
    let (Some(path), Some(callback)) = (cstr_arg(archive_path), callback) else {
        return code::INVALID_ARGUMENT;
    };

    let result = enumerate_architectures(Path::new(path), |arch| {
        let name = to_cstring(arch);
        callback(name.as_ptr(), user_data)
    });
    match result {
        Ok(()) => code::SUCCESS,
        Err(err) => err.code(),
    }
}

/// Discover the filesystem path of the binary mapped at `address_in_binary`,
/// and optionally the file offset it corresponds to.
///
/// The path is copied NUL-terminated into `path_out`; a buffer too small for
/// it fails with `INVALID_ARGUMENT`.
#[no_mangle]
pub unsafe extern "C" fn kpack_discover_binary_path(
    address_in_binary: *const c_void,
    path_out: *mut c_char,
    path_out_size: usize,
    offset_out: *mut usize,
) -> u32 {
    if address_in_binary.is_null() || path_out.is_null() || path_out_size == 0 {
        return code::INVALID_ARGUMENT;
    }

    match discover_binary_path(address_in_binary as usize) {
        Ok((path, offset)) => {
            let bytes = os_path_bytes(&path);
            if bytes.len() + 1 > path_out_size {
                return code::INVALID_ARGUMENT;
            }
            ptr::copy_nonoverlapping(bytes.as_ptr(), path_out.cast::<u8>(), bytes.len());
            *path_out.add(bytes.len()) = 0;
            if !offset_out.is_null() {
                *offset_out = offset as usize;
            }
            code::SUCCESS
        }
        Err(err) => err.code(),
    }
}

#[cfg(unix)]
fn os_path_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn os_path_bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}
