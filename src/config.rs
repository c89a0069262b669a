//! Loader configuration, resolved from the environment exactly once at cache
//! creation and frozen afterwards.

use std::env;
use std::path::PathBuf;

use crate::paths::split_path_list;

/// Replaces the embedded search paths entirely when set.
pub const ENV_KPACK_PATH: &str = "ROCM_KPACK_PATH";
/// Prepended to the embedded search paths (ignored when the override is set).
pub const ENV_KPACK_PATH_PREFIX: &str = "ROCM_KPACK_PATH_PREFIX";
/// Disables the loader entirely when enabled.
pub const ENV_KPACK_DISABLE: &str = "ROCM_KPACK_DISABLE";
/// Emits diagnostic lines to stderr when enabled.
pub const ENV_KPACK_DEBUG: &str = "ROCM_KPACK_DEBUG";

/// Snapshot of the recognized configuration values.
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Parsed `ROCM_KPACK_PATH`; non-empty means "use exactly these paths".
    pub path_override: Vec<PathBuf>,
    /// Parsed `ROCM_KPACK_PATH_PREFIX`.
    pub path_prefix: Vec<PathBuf>,
    /// Every load returns `NotImplemented` when true.
    pub disabled: bool,
    /// Diagnostic lines to stderr when true.
    pub debug: bool,
}

impl CacheConfig {
    /// Read the four recognized variables from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_values(
            env::var(ENV_KPACK_PATH).ok().as_deref(),
            env::var(ENV_KPACK_PATH_PREFIX).ok().as_deref(),
            env::var(ENV_KPACK_DISABLE).ok().as_deref(),
            env::var(ENV_KPACK_DEBUG).ok().as_deref(),
        )
    }

    /// Build a config from raw values (the environment-independent core of
    /// [`CacheConfig::from_env`]).
    #[must_use]
    pub fn from_values(
        path_override: Option<&str>,
        path_prefix: Option<&str>,
        disable: Option<&str>,
        debug: Option<&str>,
    ) -> Self {
        CacheConfig {
            path_override: path_override.map(split_path_list).unwrap_or_default(),
            path_prefix: path_prefix.map(split_path_list).unwrap_or_default(),
            disabled: flag_enabled(disable),
            debug: flag_enabled(debug),
        }
    }

    /// Emit one diagnostic line: always as a `tracing` debug event, and to
    /// stderr when the debug flag is set.
    pub(crate) fn diag(&self, msg: std::fmt::Arguments<'_>) {
        tracing::debug!(target: "kpack", "{msg}");
        if self.debug {
            eprintln!("kpack: {msg}");
        }
    }
}

/// A flag variable is enabled when non-empty and not starting with '0'.
fn flag_enabled(value: Option<&str>) -> bool {
    matches!(value, Some(v) if !v.is_empty() && !v.starts_with('0'))
}

/// Diagnostic logging gated on the config's debug flag.
macro_rules! diag {
    ($config:expr, $($arg:tt)*) => {
        $config.diag(format_args!($($arg)*))
    };
}
pub(crate) use diag;
