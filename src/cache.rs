//! Process-wide kernel cache: memoizes open archives, indexes their
//! architectures, and runs the arch-first code-object search.
//!
//! The archive map is guarded by one mutex taken only for lookups and
//! insertions; the lock is released before any kernel fetch so concurrent
//! loads against different archives do not serialize on each other.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::archive::Archive;
use crate::config::{diag, CacheConfig};
use crate::error::{KpackError, Result};
use crate::metadata::HipkMetadata;
use crate::paths::{canonical_key, is_regular_file, resolve_relative};

#[derive(Default)]
struct CacheInner {
    /// Canonical archive path -> open handle. At most one handle per path.
    archives: HashMap<PathBuf, Arc<Archive>>,
    /// Canonical archive path -> architectures it declares, captured at open.
    archive_archs: HashMap<PathBuf, HashSet<String>>,
}

/// Thread-safe cache of open kpack archives plus the loader entry point.
pub struct KernelCache {
    config: CacheConfig,
    inner: Mutex<CacheInner>,
}

impl KernelCache {
    /// Create a cache with configuration resolved from the environment.
    /// The environment is read here, once; later loads never re-read it.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CacheConfig::from_env())
    }

    /// Create a cache with an explicit configuration.
    #[must_use]
    pub fn with_config(config: CacheConfig) -> Self {
        diag!(
            config,
            "cache created: disabled={}, debug={}, override_paths={}, prefix_paths={}",
            config.disabled,
            config.debug,
            config.path_override.len(),
            config.path_prefix.len()
        );
        KernelCache {
            config,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// The configuration snapshot this cache was created with.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Number of archives currently held open by the cache.
    #[must_use]
    pub fn archive_count(&self) -> usize {
        self.lock().archives.len()
    }

    /// Resolve embedded loader metadata into a code object for the best
    /// matching architecture.
    ///
    /// `hipk_metadata` is the embedded MessagePack record, `binary_path` the
    /// file that carries it (used to resolve relative archive paths), and
    /// `arch_list` the acceptable architectures in caller preference order.
    /// The returned buffer is owned by the caller and outlives the cache.
    pub fn load_code_object(
        &self,
        hipk_metadata: &[u8],
        binary_path: &Path,
        arch_list: &[&str],
    ) -> Result<Vec<u8>> {
        if arch_list.is_empty() {
            return Err(KpackError::InvalidArgument("empty architecture list"));
        }
        if self.config.disabled {
            diag!(self.config, "kpack disabled via {}", crate::config::ENV_KPACK_DISABLE);
            return Err(KpackError::NotImplemented);
        }

        let metadata = HipkMetadata::decode(hipk_metadata).map_err(|err| {
            diag!(self.config, "failed to parse embedded kernel metadata");
            err
        })?;
        diag!(
            self.config,
            "parsed kernel metadata: kernel_name='{}', {} search paths",
            metadata.kernel_name,
            metadata.search_paths.len()
        );

        let search_paths = self.effective_search_paths(&metadata, binary_path);
        let candidates = self.open_archives(&search_paths);
        if candidates.is_empty() {
            diag!(
                self.config,
                "no valid archives found in {} search paths",
                search_paths.len()
            );
            return Err(KpackError::ArchiveNotFound);
        }

        self.search_arch_first(&metadata.kernel_name, arch_list, &candidates)
    }

    /// Build the effective archive search list: the override replaces the
    /// embedded paths entirely; otherwise prefix paths come first, then the
    /// embedded paths resolved against the containing binary.
    fn effective_search_paths(
        &self,
        metadata: &HipkMetadata,
        binary_path: &Path,
    ) -> Vec<PathBuf> {
        if !self.config.path_override.is_empty() {
            diag!(
                self.config,
                "using {} override: {} paths",
                crate::config::ENV_KPACK_PATH,
                self.config.path_override.len()
            );
            return self.config.path_override.clone();
        }

        let mut paths = self.config.path_prefix.clone();
        if !paths.is_empty() {
            diag!(
                self.config,
                "prepending {} paths from {}",
                paths.len(),
                crate::config::ENV_KPACK_PATH_PREFIX
            );
        }
        for relative in &metadata.search_paths {
            let resolved = resolve_relative(binary_path, relative);
            diag!(
                self.config,
                "resolved search path: {} -> {}",
                relative,
                resolved.display()
            );
            paths.push(resolved);
        }
        paths
    }

    /// Open (or reuse) the archives on the search list, recording each one's
    /// architecture set. Returns cache keys in effective-path order without
    /// duplicates. A path that is missing or fails to open is skipped.
    fn open_archives(&self, search_paths: &[PathBuf]) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        let mut inner = self.lock();

        for path in search_paths {
            let key = canonical_key(path);
            if inner.archives.contains_key(&key) {
                if !candidates.contains(&key) {
                    candidates.push(key);
                }
                continue;
            }
            if !is_regular_file(path) {
                diag!(self.config, "archive not found: {}", path.display());
                continue;
            }
            match Archive::open(path) {
                Ok(archive) => {
                    diag!(self.config, "opened and cached archive: {}", path.display());
                    let archs: HashSet<String> =
                        archive.architectures().map(str::to_string).collect();
                    for arch in &archs {
                        diag!(self.config, "  architecture: {arch}");
                    }
                    inner.archives.insert(key.clone(), Arc::new(archive));
                    inner.archive_archs.insert(key.clone(), archs);
                    candidates.push(key);
                }
                Err(err) => {
                    diag!(
                        self.config,
                        "failed to open archive: {} ({})",
                        path.display(),
                        err
                    );
                }
            }
        }
        candidates
    }

    /// Architecture-first search: the outer loop is the caller's preference
    /// order so a better architecture in a later archive beats a worse one in
    /// an earlier archive. An archive that advertises an architecture but
    /// lacks this kernel falls through to the next candidate.
    fn search_arch_first(
        &self,
        kernel_name: &str,
        arch_list: &[&str],
        candidates: &[PathBuf],
    ) -> Result<Vec<u8>> {
        for arch in arch_list {
            diag!(self.config, "trying architecture: {arch}");
            for key in candidates {
                let archive = {
                    let inner = self.lock();
                    if !inner
                        .archive_archs
                        .get(key)
                        .is_some_and(|archs| archs.contains(*arch))
                    {
                        continue;
                    }
                    match inner.archives.get(key) {
                        Some(archive) => Arc::clone(archive),
                        None => continue,
                    }
                    // Lock released here, before the kernel fetch.
                };

                diag!(self.config, "  archive {} has architecture", key.display());
                match archive.get_kernel(kernel_name, arch) {
                    Ok(payload) => {
                        diag!(self.config, "  found kernel: {} bytes", payload.len());
                        return Ok(payload);
                    }
                    Err(KpackError::KernelNotFound) => {
                        diag!(self.config, "  kernel not found in this archive");
                    }
                    Err(err) => {
                        diag!(self.config, "  error getting kernel: {err}");
                        return Err(err);
                    }
                }
            }
        }

        diag!(self.config, "no matching architecture found in any archive");
        Err(KpackError::ArchNotFound)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for KernelCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KernelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelCache")
            .field("config", &self.config)
            .field("archives", &self.archive_count())
            .finish()
    }
}
