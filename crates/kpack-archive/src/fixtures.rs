//! Synthetic archive builders for this workspace's test suites.
//!
//! Mirrors the layout the offline packing tool produces: fixed header,
//! payload padded to 64-byte boundaries, MessagePack TOC at the tail and a
//! back-patched `toc_offset`. The padding is cosmetic — the reader treats
//! `toc_offset` as the single source of truth — but keeping it makes the
//! fixtures byte-compatible with real archives.

use rmpv::Value;

use crate::format::{FORMAT_VERSION, MAGIC};

pub const BLOB_ALIGNMENT: usize = 64;

/// A fully built archive image plus the offsets tests need for targeted
/// corruption.
pub struct BuiltArchive {
    pub bytes: Vec<u8>,
    pub toc_offset: u64,
    /// Absolute offset of the compressed blob; zero for NoOp archives.
    pub zstd_offset: u64,
}

impl BuiltArchive {
    pub fn write_to(&self, path: &std::path::Path) {
        std::fs::write(path, &self.bytes).expect("write fixture archive");
    }
}

pub struct ArchiveBuilder {
    group_name: String,
    gfx_arch_family: String,
    gfx_arches: Vec<String>,
    compressed: bool,
    kernels: Vec<(String, String, Vec<u8>)>,
}

impl ArchiveBuilder {
    pub fn noop(group_name: &str, gfx_arch_family: &str, gfx_arches: &[&str]) -> ArchiveBuilder {
        ArchiveBuilder::new(group_name, gfx_arch_family, gfx_arches, false)
    }

    pub fn zstd(group_name: &str, gfx_arch_family: &str, gfx_arches: &[&str]) -> ArchiveBuilder {
        ArchiveBuilder::new(group_name, gfx_arch_family, gfx_arches, true)
    }

    fn new(
        group_name: &str,
        gfx_arch_family: &str,
        gfx_arches: &[&str],
        compressed: bool,
    ) -> ArchiveBuilder {
        ArchiveBuilder {
            group_name: group_name.to_string(),
            gfx_arch_family: gfx_arch_family.to_string(),
            gfx_arches: gfx_arches.iter().map(|a| a.to_string()).collect(),
            compressed,
            kernels: Vec::new(),
        }
    }

    pub fn kernel(mut self, binary: &str, arch: &str, data: Vec<u8>) -> ArchiveBuilder {
        self.kernels
            .push((binary.to_string(), arch.to_string(), data));
        self
    }

    pub fn build(self) -> BuiltArchive {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        pad(&mut bytes);

        let mut zstd_offset = 0u64;
        let mut scheme_fields: Vec<(Value, Value)> = Vec::new();

        if self.compressed {
            let mut blob = Vec::new();
            blob.extend_from_slice(&(self.kernels.len() as u32).to_le_bytes());
            for (_, _, data) in &self.kernels {
                let frame = zstd::bulk::compress(data, 3).expect("compress fixture kernel");
                blob.extend_from_slice(&(frame.len() as u32).to_le_bytes());
                blob.extend_from_slice(&frame);
            }

            zstd_offset = bytes.len() as u64;
            scheme_fields.push((
                Value::from("compression_scheme"),
                Value::from("zstd-per-kernel"),
            ));
            scheme_fields.push((Value::from("zstd_offset"), Value::from(zstd_offset)));
            scheme_fields.push((Value::from("zstd_size"), Value::from(blob.len() as u64)));
            bytes.extend_from_slice(&blob);
            pad(&mut bytes);
        } else {
            let mut blobs = Vec::with_capacity(self.kernels.len());
            for (_, _, data) in &self.kernels {
                let offset = bytes.len() as u64;
                bytes.extend_from_slice(data);
                pad(&mut bytes);
                blobs.push(Value::Map(vec![
                    (Value::from("offset"), Value::from(offset)),
                    (Value::from("size"), Value::from(data.len() as u64)),
                ]));
            }
            scheme_fields.push((Value::from("compression_scheme"), Value::from("none")));
            scheme_fields.push((Value::from("blobs"), Value::Array(blobs)));
        }

        // Group arches per binary, first-seen order on both levels.
        let mut toc_entries: Vec<(String, Vec<(Value, Value)>)> = Vec::new();
        for (ordinal, (binary, arch, data)) in self.kernels.iter().enumerate() {
            let entry = Value::Map(vec![
                (Value::from("type"), Value::from("hsaco")),
                (Value::from("ordinal"), Value::from(ordinal as u32)),
                (
                    Value::from("original_size"),
                    Value::from(data.len() as u64),
                ),
            ]);
            let arch_pair = (Value::from(arch.as_str()), entry);
            match toc_entries.iter_mut().find(|(b, _)| b == binary) {
                Some((_, arches)) => arches.push(arch_pair),
                None => toc_entries.push((binary.clone(), vec![arch_pair])),
            }
        }
        let toc_value = Value::Map(
            toc_entries
                .into_iter()
                .map(|(binary, arches)| (Value::from(binary), Value::Map(arches)))
                .collect(),
        );

        let mut root = vec![
            (Value::from("format_version"), Value::from(FORMAT_VERSION)),
            (Value::from("group_name"), Value::from(self.group_name)),
            (
                Value::from("gfx_arch_family"),
                Value::from(self.gfx_arch_family),
            ),
            (
                Value::from("gfx_arches"),
                Value::Array(self.gfx_arches.into_iter().map(Value::from).collect()),
            ),
        ];
        root.extend(scheme_fields);
        root.push((Value::from("toc"), toc_value));

        let toc_offset = bytes.len() as u64;
        rmpv::encode::write_value(&mut bytes, &Value::Map(root)).expect("encode fixture toc");
        bytes[8..16].copy_from_slice(&toc_offset.to_le_bytes());

        BuiltArchive {
            bytes,
            toc_offset,
            zstd_offset,
        }
    }
}

fn pad(bytes: &mut Vec<u8>) {
    let rem = bytes.len() % BLOB_ALIGNMENT;
    if rem != 0 {
        bytes.resize(bytes.len() + BLOB_ALIGNMENT - rem, 0);
    }
}

/// A `prefix` followed by `fill_len` copies of `fill`.
pub fn patterned(prefix: &[u8], fill: u8, fill_len: usize) -> Vec<u8> {
    let mut data = prefix.to_vec();
    data.resize(prefix.len() + fill_len, fill);
    data
}

/// The canonical uncompressed fixture (`test_noop.kpack`): two binaries,
/// three kernels with recognizable prefixes.
pub fn noop_fixture() -> BuiltArchive {
    ArchiveBuilder::noop("test", "gfx900X", &["gfx900", "gfx906"])
        .kernel(
            "lib/libtest.so",
            "gfx900",
            patterned(b"KERNEL1_GFX900_DATA", 0x00, 100),
        )
        .kernel(
            "lib/libtest.so",
            "gfx906",
            patterned(b"KERNEL2_GFX906_DATA", 0x00, 200),
        )
        .kernel(
            "bin/testapp",
            "gfx900",
            patterned(b"KERNEL3_APP_GFX900", 0xFF, 150),
        )
        .build()
}

/// The canonical compressed fixture (`test_zstd.kpack`).
pub fn zstd_fixture() -> BuiltArchive {
    ArchiveBuilder::zstd("test", "gfx110X", &["gfx1100", "gfx1101"])
        .kernel("lib/libhip.so", "gfx1100", zstd_kernel_1())
        .kernel(
            "lib/libhip.so",
            "gfx1101",
            patterned(&patterned(b"HIP_KERNEL_GFX1101_", b'X', 300), b'Y', 300),
        )
        .kernel(
            "bin/hiptest",
            "gfx1100",
            patterned(b"TEST_APP_KERNEL___", 0x42, 1000),
        )
        .build()
}

/// The `lib/libhip.so` @ gfx1100 payload: 1019 bytes of compressible data.
pub fn zstd_kernel_1() -> Vec<u8> {
    patterned(&patterned(b"HIP_KERNEL_GFX1100_", b'A', 500), b'B', 500)
}
