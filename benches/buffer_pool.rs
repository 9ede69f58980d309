//! Buffer pool and B+Tree benchmarks.
//!
//! Hit-path fetches, eviction churn through a small pool, and index
//! lookups and scans on top of the pool.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;
use tesseradb::{BPlusTree, BufferPoolManager, DiskManager, PageId};

fn setup_bpm(pool_size: usize) -> (Arc<BufferPoolManager>, TempDir) {
    let dir = TempDir::new().unwrap();
    let dm = DiskManager::create(dir.path().join("bench.db"))
        .unwrap()
        .with_sync_writes(false);
    (Arc::new(BufferPoolManager::new(pool_size, dm)), dir)
}

// =============================================================================
// Buffer pool
// =============================================================================

fn bench_fetch_hit(c: &mut Criterion) {
    let (bpm, _dir) = setup_bpm(64);
    let pid = bpm.new_page().unwrap().page_id();

    let mut group = c.benchmark_group("bpm/fetch_hit");
    group.throughput(Throughput::Elements(1));
    group.bench_function("read_guard", |b| {
        b.iter(|| {
            let guard = bpm.fetch_page_read(black_box(pid)).unwrap();
            black_box(guard.as_slice()[0])
        });
    });
    group.bench_function("write_guard", |b| {
        b.iter(|| {
            let mut guard = bpm.fetch_page_write(black_box(pid)).unwrap();
            let byte = guard.as_slice()[0];
            guard.as_mut_slice()[0] = byte.wrapping_add(1);
        });
    });
    group.finish();
}

/// Cycle a working set larger than the pool so every fetch evicts.
fn bench_eviction_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("bpm/eviction_churn");
    group.throughput(Throughput::Elements(1));

    for pool_size in [16, 64] {
        let (bpm, _dir) = setup_bpm(pool_size);
        let pages: Vec<PageId> = (0..pool_size * 4)
            .map(|_| bpm.new_page().unwrap().page_id())
            .collect();

        group.bench_with_input(BenchmarkId::new("frames", pool_size), &pages, |b, pages| {
            let mut next = 0usize;
            b.iter(|| {
                next = (next + 1) % pages.len();
                let mut guard = bpm.fetch_page_write(pages[next]).unwrap();
                guard.as_mut_slice()[0] = next as u8;
            });
        });
    }
    group.finish();
}

// =============================================================================
// B+Tree
// =============================================================================

fn populated_tree(bpm: &Arc<BufferPoolManager>, count: i64) -> BPlusTree<i64, u64> {
    let tree = BPlusTree::create("bench", Arc::clone(bpm)).unwrap();
    for key in 0..count {
        tree.insert(&key, &(key as u64)).unwrap();
    }
    tree
}

fn bench_btree_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree/point_lookup");
    group.throughput(Throughput::Elements(1));

    for count in [1_000i64, 50_000] {
        let (bpm, _dir) = setup_bpm(256);
        let tree = populated_tree(&bpm, count);
        group.bench_with_input(BenchmarkId::new("keys", count), &count, |b, &count| {
            let mut key = 0i64;
            b.iter(|| {
                key = (key + 7919) % count;
                black_box(tree.get_value(&key).unwrap())
            });
        });
    }
    group.finish();
}

fn bench_btree_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree/insert");
    group.throughput(Throughput::Elements(1));

    let (bpm, _dir) = setup_bpm(256);
    let tree = BPlusTree::<i64, u64>::create("bench", Arc::clone(&bpm)).unwrap();
    group.bench_function("sequential", |b| {
        let mut key = 0i64;
        b.iter(|| {
            key += 1;
            tree.insert(&key, &0).unwrap()
        });
    });
    group.finish();
}

fn bench_btree_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree/full_scan");
    let count = 20_000i64;
    group.throughput(Throughput::Elements(count as u64));

    let (bpm, _dir) = setup_bpm(256);
    let tree = populated_tree(&bpm, count);
    group.bench_function("20k", |b| {
        b.iter(|| black_box(tree.iter().unwrap().count()));
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_fetch_hit,
    bench_eviction_churn,
    bench_btree_lookup,
    bench_btree_insert,
    bench_btree_scan
);
criterion_main!(benches);
