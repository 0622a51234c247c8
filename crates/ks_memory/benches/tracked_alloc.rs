//! Overhead of the tracked allocation path over bare malloc.

#![allow(unsafe_code)]

use criterion::{Criterion, criterion_group, criterion_main};

// `cargo test` also runs the benchmark setup code, so keep debug runs small:
#[cfg(not(debug_assertions))]
const SIZES: &[usize] = &[16, 256, 4096, 65536];
#[cfg(debug_assertions)]
const SIZES: &[usize] = &[16];

criterion_group!(benches, bare_malloc, tracked_alloc);
criterion_main!(benches);

fn bare_malloc(c: &mut Criterion) {
    let mut group = c.benchmark_group("bare_malloc");
    for &size in SIZES {
        group.bench_function(format!("alloc_free_{size}"), |b| {
            b.iter(|| unsafe {
                let ptr = libc::malloc(std::hint::black_box(size));
                libc::free(ptr);
            });
        });
    }
}

fn tracked_alloc(c: &mut Criterion) {
    ks_memory::initialize("bench", &ks_memory::MonitorConfig::ENABLED);

    let mut group = c.benchmark_group("tracked_alloc");
    for &size in SIZES {
        group.bench_function(format!("alloc_free_{size}"), |b| {
            b.iter(|| unsafe {
                let ptr = ks_memory::track_alloc!(std::hint::black_box(size));
                ks_memory::tracked_free(ptr);
            });
        });
    }

    // One registration, then pure hot path: resolve again from a different
    // line to include the registry probe without the append.
    group.bench_function("alloc_free_registered_site", |b| {
        b.iter(|| unsafe {
            let ptr = ks_memory::tracked_alloc(256, "/src/bench_site.c", 42);
            ks_memory::tracked_free(ptr);
        });
    });
}
