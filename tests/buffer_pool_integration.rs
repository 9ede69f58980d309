//! Cross-component tests: buffer pool over a real file, across sessions and
//! threads.

use std::sync::Arc;
use std::thread;

use tempfile::tempdir;
use tesseradb::{BufferPoolManager, DiskManager, PageId};

fn create_bpm(pool_size: usize) -> (BufferPoolManager, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let dm = DiskManager::create(dir.path().join("test.db"))
        .unwrap()
        .with_sync_writes(false);
    (BufferPoolManager::new(pool_size, dm), dir)
}

#[test]
fn test_pages_survive_repeated_eviction() {
    let (bpm, _dir) = create_bpm(2);

    let page_ids: Vec<PageId> = (0u8..6)
        .map(|i| {
            let mut guard = bpm.new_page().unwrap();
            guard.as_mut_slice()[0] = i;
            guard.as_mut_slice()[1] = i.wrapping_mul(3);
            guard.page_id()
        })
        .collect();

    // two passes so every page is evicted and reloaded at least once
    for _ in 0..2 {
        for (i, &pid) in page_ids.iter().enumerate() {
            let guard = bpm.fetch_page_read(pid).unwrap();
            assert_eq!(guard.as_slice()[0], i as u8);
            assert_eq!(guard.as_slice()[1], (i as u8).wrapping_mul(3));
        }
    }
    assert!(bpm.stats().snapshot().pages_read >= 6);
}

#[test]
fn test_flush_and_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");
    let data = b"persistent!";

    let pid = {
        let bpm = BufferPoolManager::new(10, DiskManager::create(&path).unwrap());
        let mut guard = bpm.new_page().unwrap();
        guard.as_mut_slice()[..data.len()].copy_from_slice(data);
        let pid = guard.page_id();
        drop(guard);
        bpm.flush_all_pages().unwrap();
        pid
    };

    let bpm = BufferPoolManager::new(10, DiskManager::open(&path).unwrap());
    assert_eq!(bpm.page_count(), 0);
    let guard = bpm.fetch_page_read(pid).unwrap();
    assert_eq!(&guard.as_slice()[..data.len()], data);
}

#[test]
fn test_concurrent_writers_on_distinct_pages() {
    let (bpm, _dir) = create_bpm(10);
    let bpm = Arc::new(bpm);

    let page_ids: Vec<PageId> = (0..5).map(|_| bpm.new_page().unwrap().page_id()).collect();

    let handles: Vec<_> = page_ids
        .iter()
        .enumerate()
        .map(|(i, &pid)| {
            let bpm = Arc::clone(&bpm);
            thread::spawn(move || {
                for j in 0..50 {
                    let mut guard = bpm.fetch_page_write(pid).unwrap();
                    guard.as_mut_slice()[0] = ((i * 50 + j) % 256) as u8;
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for (i, &pid) in page_ids.iter().enumerate() {
        let guard = bpm.fetch_page_read(pid).unwrap();
        assert_eq!(guard.as_slice()[0], ((i * 50 + 49) % 256) as u8);
    }
}

#[test]
fn test_concurrent_readers_and_churn() {
    let (bpm, _dir) = create_bpm(4);
    let bpm = Arc::new(bpm);

    let page_ids: Vec<PageId> = (0u8..12)
        .map(|i| {
            let mut guard = bpm.new_page().unwrap();
            guard.as_mut_slice()[0] = i;
            guard.page_id()
        })
        .collect();
    let page_ids = Arc::new(page_ids);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let bpm = Arc::clone(&bpm);
            let page_ids = Arc::clone(&page_ids);
            thread::spawn(move || {
                for round in 0..200 {
                    let i = (t * 7 + round) % page_ids.len();
                    // a full pool is a legal outcome under contention
                    if let Some(guard) = bpm.checked_read_page(page_ids[i]) {
                        assert_eq!(guard.as_slice()[0], i as u8);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(page_ids.iter().all(|&pid| bpm.get_pin_count(pid).unwrap_or(0) == 0));
}

#[test]
fn test_stats_track_hits_and_evictions() {
    let (bpm, _dir) = create_bpm(2);
    let pid = bpm.new_page().unwrap().page_id();

    for _ in 0..5 {
        drop(bpm.fetch_page_read(pid).unwrap());
    }
    let stats = bpm.stats().snapshot();
    assert_eq!(stats.cache_hits, 5);
    assert_eq!(stats.pages_allocated, 1);

    drop(bpm.new_page().unwrap());
    drop(bpm.new_page().unwrap());
    assert!(bpm.stats().snapshot().evictions >= 1);
    assert!(bpm.stats().hit_rate() > 0.0);
}
