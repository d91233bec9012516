use criterion::{criterion_group, criterion_main, Criterion};

use crange::{hazard_ptr, threading, CRange, SearchMode};

fn setup() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        threading::init(threading::Config::default());
    });
}

pub fn crange_inserts(ctx: &mut Criterion) {
    setup();
    let _attach = threading::attach_scoped();

    ctx.bench_function("crange-inserts", |b| {
        let map = CRange::<u64>::new(16);
        let mut key = 0_u64;

        b.iter(|| {
            map.add(key * 10, 5, key);
            key += 1;
        });
    });
}

pub fn crange_searches(ctx: &mut Criterion) {
    setup();
    let _attach = threading::attach_scoped();

    ctx.bench_function("crange-searches", |b| {
        let map = CRange::<u64>::new(16);
        for i in 0..10_000_u64 {
            map.add(i * 10, 5, i);
        }

        let mut key = 0_u64;
        b.iter(|| {
            let k = (key * 7) % 100_000;
            let _ = criterion::black_box(map.search(k, 1, SearchMode::Lookup));
            key += 1;
        });
    });
}

pub fn crange_replace_churn(ctx: &mut Criterion) {
    setup();
    let _attach = threading::attach_scoped();

    ctx.bench_function("crange-replace-churn", |b| {
        let map = CRange::<u64>::new(16);
        let mut round = 0_u64;

        b.iter(|| {
            let slot = round % 128;
            map.add(slot * 10, 10, round);
            round += 1;
        });
    });
}

pub fn hazard_protect(ctx: &mut Criterion) {
    setup();
    let _attach = threading::attach_scoped();

    ctx.bench_function("hazard-protect", |b| {
        let boxed = Box::into_raw(Box::new(13_u64));
        let shared = std::sync::atomic::AtomicPtr::new(boxed);

        b.iter(|| {
            let mut guard = hazard_ptr::guard();
            criterion::black_box(guard.protect_ptr(&shared));
        });

        unsafe { drop(Box::from_raw(boxed)) };
    });
}

criterion_group!(
    range_map,
    crange_inserts,
    crange_searches,
    crange_replace_churn
);

criterion_group!(reclaimers, hazard_protect);

criterion_main!(range_map, reclaimers);
