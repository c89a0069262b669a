//! Decoder for the application-embedded loader metadata ("HIPK" blob).
//!
//! Compiled binaries embed one MessagePack map naming the kernel and the
//! archive search paths. The blob is the first record of a concatenated
//! region, so decoding relies on MessagePack's self-delimiting framing and
//! ignores any trailing bytes.

use rmpv::Value;

use crate::error::{KpackError, Result};

/// Conservative upper bound on the embedded metadata record. Callers that do
/// not know the record's length (the C surface) read at most this much.
pub const MAX_METADATA_SIZE: usize = 64 * 1024;

/// Decoded loader metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HipkMetadata {
    /// Binary name to look up in archive TOCs.
    pub kernel_name: String,
    /// Archive paths to search, relative to the containing binary.
    pub search_paths: Vec<String>,
}

impl HipkMetadata {
    /// Decode one metadata record from the front of `bytes`.
    ///
    /// The root must be a map with a string `kernel_name` and a non-empty
    /// `kpack_search_paths` array; anything else is `InvalidMetadata`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = bytes;
        let root = rmpv::decode::read_value(&mut cursor)
            .map_err(|_| KpackError::InvalidMetadata("not a MessagePack record"))?;

        let map = match &root {
            Value::Map(pairs) => pairs.as_slice(),
            _ => return Err(KpackError::InvalidMetadata("root is not a map")),
        };

        let kernel_name = match find(map, "kernel_name") {
            Some(Value::String(s)) => match s.as_str() {
                Some(name) => name.to_string(),
                None => return Err(KpackError::InvalidMetadata("kernel_name is not UTF-8")),
            },
            _ => return Err(KpackError::InvalidMetadata("missing kernel_name")),
        };

        let search_paths: Vec<String> = match find(map, "kpack_search_paths") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => s.as_str().map(str::to_string),
                    _ => None,
                })
                .collect(),
            _ => return Err(KpackError::InvalidMetadata("missing kpack_search_paths")),
        };

        if search_paths.is_empty() {
            return Err(KpackError::InvalidMetadata("empty kpack_search_paths"));
        }

        Ok(HipkMetadata {
            kernel_name,
            search_paths,
        })
    }
}

fn find<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| matches!(k, Value::String(s) if s.as_str() == Some(key)))
        .map(|(_, v)| v)
}
