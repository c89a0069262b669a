//! TOC decoder: the MessagePack map at the tail of a kpack archive.
//!
//! The TOC is decoded dynamically (one `rmpv::Value` tree) rather than into a
//! rigid struct: unknown keys are ignored and wrong-typed optional values are
//! treated as absent. Only the fields required by the declared compression
//! scheme are validated strictly.

use std::collections::BTreeMap;

use rmpv::Value;

use crate::error::{KpackError, Result};
use crate::format::{BlobInfo, CompressionScheme};

/// Per-kernel entry from the nested `toc` map.
#[derive(Debug, Clone)]
pub struct KernelEntry {
    /// Payload kind, normally `"hsaco"`. Informational.
    pub kind: String,
    /// Index into the blob/frame array of the archive's compression scheme.
    pub ordinal: u32,
    /// Decompressed payload size in bytes.
    pub original_size: u64,
}

/// Decoded table of contents.
///
/// `entries` maps binary path -> architecture -> kernel entry. The outer map
/// is ordered so binary names enumerate deterministically.
#[derive(Debug, Default)]
pub struct Toc {
    pub group_name: String,
    pub gfx_arch_family: String,
    pub gfx_arches: Vec<String>,
    pub scheme: Option<CompressionScheme>,
    pub blobs: Vec<BlobInfo>,
    pub zstd_offset: u64,
    pub zstd_size: u64,
    pub entries: BTreeMap<String, BTreeMap<String, KernelEntry>>,
}

impl Toc {
    /// Decode the TOC from `bytes` (the tail of the archive file).
    ///
    /// `file_size` bounds the blob locators: a `none`-scheme blob or the zstd
    /// region extending past end-of-file is `InvalidFormat`.
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Toc> {
        let mut cursor = bytes;
        let root = rmpv::decode::read_value(&mut cursor)
            .map_err(|err| KpackError::MsgpackParseFailed(err.to_string()))?;

        let map = match &root {
            Value::Map(pairs) => pairs.as_slice(),
            _ => {
                return Err(KpackError::MsgpackParseFailed(
                    "TOC root is not a map".to_string(),
                ))
            }
        };

        let mut toc = Toc {
            group_name: get_str(map, "group_name").unwrap_or_default().to_string(),
            gfx_arch_family: get_str(map, "gfx_arch_family").unwrap_or_default().to_string(),
            gfx_arches: get_str_array(map, "gfx_arches"),
            ..Toc::default()
        };

        // Missing scheme decodes as "none"; an unrecognized name is rejected.
        let scheme_name = get_str(map, "compression_scheme").unwrap_or("none");
        let scheme = CompressionScheme::from_name(scheme_name).ok_or_else(|| {
            KpackError::InvalidFormat(format!("unknown compression scheme: {scheme_name}"))
        })?;
        toc.scheme = Some(scheme);

        match scheme {
            CompressionScheme::None => {
                toc.blobs = parse_blobs(map, file_size)?;
            }
            CompressionScheme::ZstdPerKernel => {
                toc.zstd_offset = get_uint(map, "zstd_offset")
                    .ok_or_else(|| KpackError::InvalidFormat("missing zstd_offset".to_string()))?;
                toc.zstd_size = get_uint(map, "zstd_size")
                    .ok_or_else(|| KpackError::InvalidFormat("missing zstd_size".to_string()))?;
                let end = toc.zstd_offset.checked_add(toc.zstd_size);
                if end.is_none() || end.unwrap_or(u64::MAX) > file_size {
                    return Err(KpackError::InvalidFormat(
                        "zstd blob region extends past end of file".to_string(),
                    ));
                }
            }
        }

        toc.entries = parse_entries(map);
        Ok(toc)
    }

    /// Look up the kernel entry for `(binary_name, arch)`.
    pub fn kernel(&self, binary_name: &str, arch: &str) -> Option<&KernelEntry> {
        self.entries.get(binary_name)?.get(arch)
    }
}

fn parse_blobs(map: &[(Value, Value)], file_size: u64) -> Result<Vec<BlobInfo>> {
    let raw = match get(map, "blobs") {
        Some(Value::Array(items)) => items,
        _ => return Err(KpackError::InvalidFormat("missing blobs array".to_string())),
    };

    let mut blobs = Vec::with_capacity(raw.len());
    for item in raw {
        let pairs = match item {
            Value::Map(pairs) => pairs.as_slice(),
            _ => return Err(KpackError::InvalidFormat("blob entry is not a map".to_string())),
        };
        let offset = get_uint(pairs, "offset")
            .ok_or_else(|| KpackError::InvalidFormat("blob entry missing offset".to_string()))?;
        let size = get_uint(pairs, "size")
            .ok_or_else(|| KpackError::InvalidFormat("blob entry missing size".to_string()))?;
        let end = offset.checked_add(size);
        if end.is_none() || end.unwrap_or(u64::MAX) > file_size {
            return Err(KpackError::InvalidFormat(
                "blob extends past end of file".to_string(),
            ));
        }
        blobs.push(BlobInfo { offset, size });
    }
    Ok(blobs)
}

fn parse_entries(map: &[(Value, Value)]) -> BTreeMap<String, BTreeMap<String, KernelEntry>> {
    let mut entries = BTreeMap::new();
    let raw = match get(map, "toc") {
        Some(Value::Map(pairs)) => pairs.as_slice(),
        _ => return entries,
    };

    for (binary_key, arch_map) in raw {
        let (Some(binary), Value::Map(arches)) = (as_str(binary_key), arch_map) else {
            continue;
        };
        let mut per_arch = BTreeMap::new();
        for (arch_key, entry_value) in arches {
            let (Some(arch), Value::Map(fields)) = (as_str(arch_key), entry_value) else {
                continue;
            };
            // Entries missing the required numeric fields are skipped, not fatal.
            let Some(ordinal) = get_uint(fields, "ordinal") else { continue };
            let Some(original_size) = get_uint(fields, "original_size") else { continue };
            let Ok(ordinal) = u32::try_from(ordinal) else { continue };
            per_arch.insert(
                arch.to_string(),
                KernelEntry {
                    kind: get_str(fields, "type").unwrap_or("hsaco").to_string(),
                    ordinal,
                    original_size,
                },
            );
        }
        if !per_arch.is_empty() {
            entries.insert(binary.to_string(), per_arch);
        }
    }
    entries
}

fn get<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| as_str(k) == Some(key))
        .map(|(_, v)| v)
}

fn as_str(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => s.as_str(),
        _ => None,
    }
}

fn get_str<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a str> {
    get(map, key).and_then(as_str)
}

fn get_uint(map: &[(Value, Value)], key: &str) -> Option<u64> {
    match get(map, key) {
        Some(Value::Integer(n)) => n.as_u64(),
        _ => None,
    }
}

fn get_str_array(map: &[(Value, Value)], key: &str) -> Vec<String> {
    match get(map, key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| as_str(v).map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}
