//! Shared test support: build .kpack archives in memory the way the producer
//! tooling lays them out, plus embedded-metadata helpers.

#![allow(dead_code)]

use std::io::Write;
use std::path::PathBuf;

use rmpv::Value;

/// One kernel to pack: (binary path, architecture, payload).
pub type KernelSpec<'a> = (&'a str, &'a str, Vec<u8>);

/// Build an uncompressed ("none" scheme) archive.
pub fn build_noop_archive(
    group: &str,
    family: &str,
    arches: &[&str],
    kernels: &[KernelSpec<'_>],
) -> Vec<u8> {
    let mut file = header_placeholder();

    let mut blobs = Vec::new();
    for (_, _, data) in kernels {
        let offset = file.len() as u64;
        file.extend_from_slice(data);
        blobs.push(Value::Map(vec![
            (Value::from("offset"), Value::from(offset)),
            (Value::from("size"), Value::from(data.len() as u64)),
        ]));
    }

    let toc = toc_value(group, family, arches, kernels, "none", |map| {
        map.push((Value::from("blobs"), Value::Array(blobs)));
    });
    finish_archive(file, &toc)
}

/// Build a "zstd-per-kernel" archive: one framed blob region holding a
/// count-prefixed sequence of length-prefixed zstd frames.
pub fn build_zstd_archive(
    group: &str,
    family: &str,
    arches: &[&str],
    kernels: &[KernelSpec<'_>],
) -> Vec<u8> {
    let mut file = header_placeholder();

    let mut blob = Vec::new();
    blob.extend_from_slice(&(kernels.len() as u32).to_le_bytes());
    for (_, _, data) in kernels {
        let frame = zstd::bulk::compress(data, 3).expect("zstd compress");
        blob.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        blob.extend_from_slice(&frame);
    }

    let zstd_offset = file.len() as u64;
    let zstd_size = blob.len() as u64;
    file.extend_from_slice(&blob);

    let toc = toc_value(group, family, arches, kernels, "zstd-per-kernel", |map| {
        map.push((Value::from("zstd_offset"), Value::from(zstd_offset)));
        map.push((Value::from("zstd_size"), Value::from(zstd_size)));
    });
    finish_archive(file, &toc)
}

/// The standard uncompressed fixture: 2 binaries, 3 kernels, gfx900/gfx906.
pub fn noop_fixture() -> Vec<u8> {
    build_noop_archive(
        "test",
        "gfx900X",
        &["gfx900", "gfx906"],
        &[
            ("lib/libtest.so", "gfx900", noop_kernel1()),
            ("lib/libtest.so", "gfx906", noop_kernel2()),
            ("bin/testapp", "gfx900", noop_kernel3()),
        ],
    )
}

/// The standard compressed fixture: 2 binaries, 3 kernels, gfx1100/gfx1101.
pub fn zstd_fixture() -> Vec<u8> {
    build_zstd_archive(
        "test",
        "gfx110X",
        &["gfx1100", "gfx1101"],
        &[
            ("lib/libhip.so", "gfx1100", zstd_kernel1()),
            ("lib/libhip.so", "gfx1101", zstd_kernel2()),
            ("bin/hiptest", "gfx1100", zstd_kernel3()),
        ],
    )
}

pub fn noop_kernel1() -> Vec<u8> {
    let mut data = b"KERNEL1_GFX900_DATA".to_vec();
    data.extend(std::iter::repeat(0u8).take(100));
    data
}

pub fn noop_kernel2() -> Vec<u8> {
    let mut data = b"KERNEL2_GFX906_DATA".to_vec();
    data.extend(std::iter::repeat(0u8).take(200));
    data
}

pub fn noop_kernel3() -> Vec<u8> {
    let mut data = b"KERNEL3_APP_GFX900".to_vec();
    data.extend(std::iter::repeat(0xFFu8).take(150));
    data
}

pub fn zstd_kernel1() -> Vec<u8> {
    let mut data = b"HIP_KERNEL_GFX1100_".to_vec();
    data.extend(std::iter::repeat(b'A').take(500));
    data.extend(std::iter::repeat(b'B').take(500));
    data
}

pub fn zstd_kernel2() -> Vec<u8> {
    let mut data = b"HIP_KERNEL_GFX1101_".to_vec();
    data.extend(std::iter::repeat(b'X').take(300));
    data.extend(std::iter::repeat(b'Y').take(300));
    data
}

pub fn zstd_kernel3() -> Vec<u8> {
    let mut data = b"TEST_APP_KERNEL___".to_vec();
    data.extend(std::iter::repeat(0x42u8).take(1000));
    data
}

/// Encode embedded loader metadata: {"kernel_name", "kpack_search_paths"}.
pub fn hipk_metadata(kernel_name: &str, search_paths: &[&str]) -> Vec<u8> {
    let paths: Vec<Value> = search_paths.iter().map(|p| Value::from(*p)).collect();
    encode_value(&Value::Map(vec![
        (Value::from("kernel_name"), Value::from(kernel_name)),
        (Value::from("kpack_search_paths"), Value::Array(paths)),
    ]))
}

/// Encode one MessagePack value to bytes.
pub fn encode_value(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, value).expect("msgpack encode");
    buf
}

/// Write archive bytes to a file inside `dir` and return its path.
pub fn write_archive(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).expect("create archive");
    file.write_all(bytes).expect("write archive");
    file.flush().expect("flush archive");
    path
}

/// 16-byte header with version 1 and a TOC-offset placeholder.
fn header_placeholder() -> Vec<u8> {
    let mut file = Vec::new();
    file.extend_from_slice(b"KPAK");
    file.extend_from_slice(&1u32.to_le_bytes());
    file.extend_from_slice(&0u64.to_le_bytes());
    file
}

/// Assemble the TOC map, letting `scheme_fields` add the per-scheme keys.
fn toc_value(
    group: &str,
    family: &str,
    arches: &[&str],
    kernels: &[KernelSpec<'_>],
    scheme: &str,
    scheme_fields: impl FnOnce(&mut Vec<(Value, Value)>),
) -> Value {
    let mut entries: Vec<(Value, Value)> = Vec::new();
    for (ordinal, (binary, arch, data)) in kernels.iter().enumerate() {
        let entry = Value::Map(vec![
            (Value::from("type"), Value::from("hsaco")),
            (Value::from("ordinal"), Value::from(ordinal as u32)),
            (Value::from("original_size"), Value::from(data.len() as u64)),
        ]);
        match entries.iter_mut().find(|(k, _)| k.as_str() == Some(*binary)) {
            Some((_, Value::Map(arch_map))) => arch_map.push((Value::from(*arch), entry)),
            _ => entries.push((
                Value::from(*binary),
                Value::Map(vec![(Value::from(*arch), entry)]),
            )),
        }
    }

    let mut map: Vec<(Value, Value)> = vec![
        (Value::from("compression_scheme"), Value::from(scheme)),
        (Value::from("group_name"), Value::from(group)),
        (Value::from("gfx_arch_family"), Value::from(family)),
        (
            Value::from("gfx_arches"),
            Value::Array(arches.iter().map(|a| Value::from(*a)).collect()),
        ),
    ];
    scheme_fields(&mut map);
    map.push((Value::from("toc"), Value::Map(entries)));
    Value::Map(map)
}

/// Append the TOC and backpatch its offset into the header.
fn finish_archive(mut file: Vec<u8>, toc: &Value) -> Vec<u8> {
    let toc_offset = file.len() as u64;
    rmpv::encode::write_value(&mut file, toc).expect("msgpack encode");
    file[8..16].copy_from_slice(&toc_offset.to_le_bytes());
    file
}
