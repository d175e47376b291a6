// Class creation benchmarks
//
// Run with: cargo bench -p classload-core --bench create_instance

use classload_core::{ClassLoader, InProcessBackend, MultiClassLoader, Registrar, Registry};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

trait Codec: Send + Sync {
    fn encode(&self, input: u64) -> u64;
}

#[derive(Default)]
struct Identity;

impl Codec for Identity {
    fn encode(&self, input: u64) -> u64 {
        input
    }
}

#[derive(Default)]
struct Rotate;

impl Codec for Rotate {
    fn encode(&self, input: u64) -> u64 {
        input.rotate_left(7)
    }
}

fn register_identity(registrar: &mut Registrar<'_>) {
    classload_core::register_class!(registrar, Identity => dyn Codec);
}

fn register_rotate(registrar: &mut Registrar<'_>) {
    classload_core::register_class!(registrar, Rotate => dyn Codec);
}

fn registry() -> Arc<Registry> {
    let backend = InProcessBackend::new()
        .with_library("libidentity.so", register_identity)
        .with_library("librotate.so", register_rotate);
    Arc::new(Registry::new(Arc::new(backend)))
}

fn benchmark_create_instance(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_instance");

    for on_demand in [false, true] {
        let loader = ClassLoader::builder("librotate.so")
            .on_demand(on_demand)
            .registry(registry())
            .build()
            .unwrap();

        // Hold one instance so on-demand mode measures creation, not open/close
        let _keep = loader.create_instance::<dyn Codec>("Rotate").unwrap();

        group.bench_with_input(
            BenchmarkId::new("class_loader", if on_demand { "on_demand" } else { "eager" }),
            &loader,
            |b, loader| {
                b.iter(|| {
                    let codec = loader.create_instance::<dyn Codec>(black_box("Rotate")).unwrap();
                    black_box(codec.encode(42))
                })
            },
        );
    }

    group.finish();
}

fn benchmark_on_demand_cycle(c: &mut Criterion) {
    let loader = ClassLoader::builder("libidentity.so")
        .on_demand(true)
        .registry(registry())
        .build()
        .unwrap();

    c.bench_function("on_demand_load_create_unload", |b| {
        b.iter(|| {
            let codec = loader.create_instance::<dyn Codec>("Identity").unwrap();
            black_box(codec.encode(1))
        })
    });
}

fn benchmark_multi_fallback(c: &mut Criterion) {
    let multi = MultiClassLoader::builder()
        .registry(registry())
        .library("libidentity.so")
        .library("librotate.so")
        .build()
        .unwrap();

    c.bench_function("multi_loader_fallback", |b| {
        b.iter(|| {
            let codec = multi.create_instance::<dyn Codec>(black_box("Rotate")).unwrap();
            black_box(codec.encode(42))
        })
    });
}

criterion_group!(
    benches,
    benchmark_create_instance,
    benchmark_on_demand_cycle,
    benchmark_multi_fallback
);
criterion_main!(benches);
