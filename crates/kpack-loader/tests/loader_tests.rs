mod common;

use std::path::PathBuf;

use serial_test::serial;
use tempfile::TempDir;

use common::marker_bytes;
use kpack_archive::fixtures::{self, ArchiveBuilder};
use kpack_loader::env::{ENV_KPACK_DISABLE, ENV_KPACK_PATH};
use kpack_loader::{enumerate_architectures, Cache, EnvSnapshot, KpackError};

/// A tempdir holding `test_noop.kpack` next to a fictitious host binary.
fn noop_setup() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    fixtures::noop_fixture().write_to(&dir.path().join("test_noop.kpack"));
    let host_binary = dir.path().join("testapp");
    (dir, host_binary)
}

#[test]
fn arch_priority_beats_archive_order_within_one_archive() {
    let (_dir, host) = noop_setup();
    let cache = Cache::with_env(EnvSnapshot::default());
    let marker = marker_bytes("lib/libtest.so", &["test_noop.kpack"]);

    // gfx906 outranks gfx900 here even though gfx900 sorts first.
    let code = cache
        .load_code_object(&marker, &host, &["gfx906", "gfx900"])
        .unwrap();
    assert_eq!(&code[..19], b"KERNEL2_GFX906_DATA");
    assert_eq!(code.len(), 219);
}

#[test]
fn unknown_arch_and_missing_archive() {
    let (_dir, host) = noop_setup();
    let cache = Cache::with_env(EnvSnapshot::default());

    let marker = marker_bytes("lib/libtest.so", &["test_noop.kpack"]);
    assert_eq!(
        cache
            .load_code_object(&marker, &host, &["gfx9999"])
            .unwrap_err(),
        KpackError::ArchNotFound
    );

    let marker = marker_bytes("lib/libtest.so", &["nonexistent.kpack"]);
    assert_eq!(
        cache
            .load_code_object(&marker, &host, &["gfx900"])
            .unwrap_err(),
        KpackError::ArchiveNotFound
    );
}

#[test]
fn override_path_wins_over_marker() {
    let (dir, host) = noop_setup();

    let env = EnvSnapshot {
        path_override: vec![dir.path().join("test_noop.kpack")],
        ..EnvSnapshot::default()
    };
    let cache = Cache::with_env(env);

    // The marker points nowhere useful; the override list is used alone.
    let marker = marker_bytes("lib/libtest.so", &["wrong/place.kpack"]);
    let code = cache
        .load_code_object(&marker, &host, &["gfx900"])
        .unwrap();
    assert_eq!(&code[..19], b"KERNEL1_GFX900_DATA");
}

#[test]
fn prefix_paths_are_tried_before_marker_paths() {
    let (_dir, host) = noop_setup();

    // Same binary/arch in a second archive; the prefix entry must win.
    let prefix_dir = TempDir::new().unwrap();
    let prefix_archive = prefix_dir.path().join("prefix.kpack");
    ArchiveBuilder::noop("prefix", "gfx900X", &["gfx900"])
        .kernel(
            "lib/libtest.so",
            "gfx900",
            fixtures::patterned(b"PREFIX_KERNEL_GFX900", 0x00, 30),
        )
        .build()
        .write_to(&prefix_archive);

    let env = EnvSnapshot {
        path_prefix: vec![prefix_archive],
        ..EnvSnapshot::default()
    };
    let cache = Cache::with_env(env);

    let marker = marker_bytes("lib/libtest.so", &["test_noop.kpack"]);
    let code = cache
        .load_code_object(&marker, &host, &["gfx900"])
        .unwrap();
    assert_eq!(&code[..20], b"PREFIX_KERNEL_GFX900");
}

#[test]
fn arch_first_search_spans_archives() {
    let dir = TempDir::new().unwrap();
    let host = dir.path().join("testapp");

    // gfx906 only exists in the archive listed second; it must still win
    // over gfx900 from the first archive.
    ArchiveBuilder::noop("a", "gfx900X", &["gfx900"])
        .kernel(
            "bin/app",
            "gfx900",
            fixtures::patterned(b"FIRST_ARCHIVE_GFX900", 0x00, 10),
        )
        .build()
        .write_to(&dir.path().join("a.kpack"));
    ArchiveBuilder::noop("b", "gfx900X", &["gfx906"])
        .kernel(
            "bin/app",
            "gfx906",
            fixtures::patterned(b"SECOND_ARCHIVE_GFX906", 0x00, 10),
        )
        .build()
        .write_to(&dir.path().join("b.kpack"));

    let cache = Cache::with_env(EnvSnapshot::default());
    let marker = marker_bytes("bin/app", &["a.kpack", "b.kpack"]);
    let code = cache
        .load_code_object(&marker, &host, &["gfx906", "gfx900"])
        .unwrap();
    assert_eq!(&code[..21], b"SECOND_ARCHIVE_GFX906");
}

#[test]
fn kernel_not_found_moves_to_the_next_archive() {
    let dir = TempDir::new().unwrap();
    let host = dir.path().join("testapp");

    // First archive advertises gfx900 but for a different binary.
    ArchiveBuilder::noop("a", "gfx900X", &["gfx900"])
        .kernel(
            "bin/other",
            "gfx900",
            fixtures::patterned(b"OTHER_BINARY", 0x00, 4),
        )
        .build()
        .write_to(&dir.path().join("a.kpack"));
    ArchiveBuilder::noop("b", "gfx900X", &["gfx900"])
        .kernel(
            "bin/app",
            "gfx900",
            fixtures::patterned(b"WANTED_KERNEL", 0x00, 4),
        )
        .build()
        .write_to(&dir.path().join("b.kpack"));

    let cache = Cache::with_env(EnvSnapshot::default());
    let marker = marker_bytes("bin/app", &["a.kpack", "b.kpack"]);
    let code = cache
        .load_code_object(&marker, &host, &["gfx900"])
        .unwrap();
    assert_eq!(&code[..13], b"WANTED_KERNEL");
}

#[test]
fn codec_errors_propagate_immediately() {
    let dir = TempDir::new().unwrap();
    let host = dir.path().join("testapp");

    // First archive's frame for (lib/libhip.so, gfx1100) is clobbered; a
    // healthy second archive must not mask the failure.
    let built = fixtures::zstd_fixture();
    let zo = built.zstd_offset as usize;
    let mut bytes = built.bytes.clone();
    for b in &mut bytes[zo + 8..zo + 12] {
        *b ^= 0xFF;
    }
    std::fs::write(dir.path().join("corrupt.kpack"), &bytes).unwrap();
    fixtures::zstd_fixture().write_to(&dir.path().join("good.kpack"));

    let cache = Cache::with_env(EnvSnapshot::default());
    let marker = marker_bytes("lib/libhip.so", &["corrupt.kpack", "good.kpack"]);
    assert_eq!(
        cache
            .load_code_object(&marker, &host, &["gfx1100"])
            .unwrap_err(),
        KpackError::DecompressionFailed
    );
}

#[test]
fn unopenable_archives_are_skipped() {
    let dir = TempDir::new().unwrap();
    let host = dir.path().join("testapp");

    // Not a kpack file at all; the loader should skip it and use the next.
    std::fs::write(dir.path().join("broken.kpack"), b"XXXXnot an archive").unwrap();
    fixtures::noop_fixture().write_to(&dir.path().join("test_noop.kpack"));

    let cache = Cache::with_env(EnvSnapshot::default());
    let marker = marker_bytes("lib/libtest.so", &["broken.kpack", "test_noop.kpack"]);
    let code = cache
        .load_code_object(&marker, &host, &["gfx900"])
        .unwrap();
    assert_eq!(&code[..19], b"KERNEL1_GFX900_DATA");
}

#[test]
fn disabled_snapshot_short_circuits() {
    let (_dir, host) = noop_setup();
    let env = EnvSnapshot {
        disabled: true,
        ..EnvSnapshot::default()
    };
    let cache = Cache::with_env(env);

    let marker = marker_bytes("lib/libtest.so", &["test_noop.kpack"]);
    assert_eq!(
        cache
            .load_code_object(&marker, &host, &["gfx900"])
            .unwrap_err(),
        KpackError::NotImplemented
    );
}

#[test]
fn invalid_arguments_and_bad_markers() {
    let (_dir, host) = noop_setup();
    let cache = Cache::with_env(EnvSnapshot::default());

    let marker = marker_bytes("lib/libtest.so", &["test_noop.kpack"]);
    assert_eq!(
        cache.load_code_object(&marker, &host, &[]).unwrap_err(),
        KpackError::InvalidArgument
    );

    assert_eq!(
        cache
            .load_code_object(&[0xc1, 0xc1], &host, &["gfx900"])
            .unwrap_err(),
        KpackError::MsgpackParseFailed
    );

    let no_paths = marker_bytes("lib/libtest.so", &[]);
    assert_eq!(
        cache
            .load_code_object(&no_paths, &host, &["gfx900"])
            .unwrap_err(),
        KpackError::InvalidMetadata
    );
}

#[test]
fn archives_are_memoized_per_canonical_path() {
    let (_dir, host) = noop_setup();
    let cache = Cache::with_env(EnvSnapshot::default());

    // Two spellings of the same file.
    let plain = marker_bytes("lib/libtest.so", &["test_noop.kpack"]);
    let dotted = marker_bytes("lib/libtest.so", &["./test_noop.kpack"]);

    for _ in 0..3 {
        cache.load_code_object(&plain, &host, &["gfx900"]).unwrap();
        cache.load_code_object(&dotted, &host, &["gfx906"]).unwrap();
    }
    assert_eq!(cache.cached_archive_count(), 1);
}

#[test]
fn concurrent_loads_share_one_archive() {
    let (_dir, host) = noop_setup();
    let cache = Cache::with_env(EnvSnapshot::default());
    let marker = marker_bytes("lib/libtest.so", &["test_noop.kpack"]);

    std::thread::scope(|scope| {
        for thread in 0..8 {
            let cache = &cache;
            let marker = &marker;
            let host = &host;
            scope.spawn(move || {
                for _ in 0..25 {
                    let (arches, prefix): (&[&str], &[u8]) = if thread % 2 == 0 {
                        (&["gfx900"], b"KERNEL1_GFX900_DATA")
                    } else {
                        (&["gfx906"], b"KERNEL2_GFX906_DATA")
                    };
                    let code = cache.load_code_object(marker, host, arches).unwrap();
                    assert_eq!(&code[..19], prefix);
                }
            });
        }
    });

    assert_eq!(cache.cached_archive_count(), 1);
}

#[test]
fn enumerate_architectures_walks_in_order() {
    let (dir, _host) = noop_setup();
    let path = dir.path().join("test_noop.kpack");

    let mut seen = Vec::new();
    enumerate_architectures(&path, |arch| {
        seen.push(arch.to_string());
        true
    })
    .unwrap();
    assert_eq!(seen, ["gfx900", "gfx906"]);

    // Early termination after the first entry.
    let mut seen = Vec::new();
    enumerate_architectures(&path, |arch| {
        seen.push(arch.to_string());
        false
    })
    .unwrap();
    assert_eq!(seen, ["gfx900"]);

    assert_eq!(
        enumerate_architectures(dir.path().join("absent.kpack"), |_| true).unwrap_err(),
        KpackError::FileNotFound
    );
}

#[test]
#[serial]
fn disable_env_is_snapshotted_at_creation() {
    let (_dir, host) = noop_setup();
    let marker = marker_bytes("lib/libtest.so", &["test_noop.kpack"]);

    std::env::set_var(ENV_KPACK_DISABLE, "1");
    let disabled_cache = Cache::new();
    std::env::set_var(ENV_KPACK_DISABLE, "0");
    let enabled_cache = Cache::new();
    std::env::remove_var(ENV_KPACK_DISABLE);

    // The first cache stays disabled even though the variable changed.
    assert_eq!(
        disabled_cache
            .load_code_object(&marker, &host, &["gfx900"])
            .unwrap_err(),
        KpackError::NotImplemented
    );
    enabled_cache
        .load_code_object(&marker, &host, &["gfx900"])
        .unwrap();
}

#[test]
#[serial]
fn override_env_is_read_at_creation() {
    let (dir, host) = noop_setup();

    std::env::set_var(ENV_KPACK_PATH, dir.path().join("test_noop.kpack"));
    let cache = Cache::new();
    std::env::remove_var(ENV_KPACK_PATH);

    let marker = marker_bytes("lib/libtest.so", &["wrong/place.kpack"]);
    let code = cache
        .load_code_object(&marker, &host, &["gfx906"])
        .unwrap();
    assert_eq!(&code[..19], b"KERNEL2_GFX906_DATA");
}
