//! Wrap benchmarks
//!
//! Measures capability inspection, shape lookup and full proxy construction.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use foreign_proxy::handle::{ForeignObject, Value, WellKnownSymbol};
use foreign_proxy::{
    BridgeConfig, CapabilityFlags, HandleTable, PropertyKey, ProxyRuntime, RawHandle,
};
use std::sync::Arc;

fn setup() -> (Arc<HandleTable>, ProxyRuntime) {
    let table = Arc::new(HandleTable::new());
    let runtime = ProxyRuntime::new(table.clone(), BridgeConfig::default()).unwrap();
    (table, runtime)
}

fn map_like(table: &HandleTable) -> RawHandle {
    let mut object = ForeignObject::plain().with_number("size", 4.0);
    for name in ["get", "set", "has"] {
        let f = table.insert_function(|_, _, _| Ok(Value::Undefined));
        object = object.with_value(PropertyKey::named(name), f);
    }
    let iter = table.insert_function(|_, _, _| Ok(Value::Undefined));
    table.insert(object.with_value(PropertyKey::Symbol(WellKnownSymbol::Iterator), iter))
}

fn bench_inspect(c: &mut Criterion) {
    let (table, runtime) = setup();
    let plain = table.insert(ForeignObject::plain());
    let map = map_like(&table);

    let mut group = c.benchmark_group("inspect");
    group.bench_function("plain", |b| {
        b.iter(|| black_box(runtime.factory().compute_capabilities(plain).unwrap()))
    });
    group.bench_function("map_like", |b| {
        b.iter(|| black_box(runtime.factory().compute_capabilities(map).unwrap()))
    });
    group.finish();
}

fn bench_shape_lookup(c: &mut Criterion) {
    let (_, runtime) = setup();
    let masks: Vec<CapabilityFlags> = (0..64u32).map(CapabilityFlags::from_bits_retain).collect();
    for mask in &masks {
        runtime.registry().get_or_create_shape(*mask).unwrap();
    }

    c.bench_function("shape_lookup_hit", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % masks.len();
            black_box(runtime.registry().get_or_create_shape(masks[i]).unwrap())
        })
    });
}

fn bench_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("create");

    for receivers in [false, true].iter() {
        group.bench_with_input(BenchmarkId::new("map_like", receivers), receivers, |b, &bound| {
            let (table, runtime) = setup();
            let value = map_like(&table);
            let receiver = table.insert(ForeignObject::plain());

            b.iter(|| {
                let proxy = if bound {
                    runtime.create_with_this(value, receiver)
                } else {
                    runtime.create(value)
                };
                black_box(proxy.unwrap())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_inspect, bench_shape_lookup, bench_create);
criterion_main!(benches);
