//! Buffer pool manager tests: pinning, eviction, guards and failure paths.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use tempfile::tempdir;
use tesseradb::common::BufferPoolConfig;
use tesseradb::storage::page::Page;
use tesseradb::{BufferPoolManager, DiskManager, Error, PageId, PageStore, Result};

const FRAMES: usize = 10;

fn create_bpm(pool_size: usize) -> (BufferPoolManager, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let dm = DiskManager::create(dir.path().join("test.db"))
        .unwrap()
        .with_sync_writes(false);
    (BufferPoolManager::new(pool_size, dm), dir)
}

fn put_str(data: &mut [u8], s: &str) {
    data[..s.len()].copy_from_slice(s.as_bytes());
    data[s.len()] = 0;
}

fn get_str(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

/// In-memory page store whose reads and writes can be switched to fail.
#[derive(Clone, Default)]
struct FlakyStore {
    pages: Arc<Mutex<HashMap<PageId, Page>>>,
    next_id: Arc<Mutex<u32>>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl FlakyStore {
    fn broken(what: &str) -> Error {
        Error::Io(io::Error::new(io::ErrorKind::Other, format!("injected {} failure", what)))
    }
}

impl PageStore for FlakyStore {
    fn read_page(&mut self, page_id: PageId, page: &mut Page) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::broken("read"));
        }
        let pages = self.pages.lock().unwrap();
        let stored = pages.get(&page_id).ok_or(Error::PageNotFound(page_id.0))?;
        page.copy_from(stored);
        Ok(())
    }

    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::broken("write"));
        }
        let mut copy = Page::new();
        copy.copy_from(page);
        self.pages.lock().unwrap().insert(page_id, copy);
        Ok(())
    }

    fn allocate_page(&mut self) -> Result<PageId> {
        let mut next = self.next_id.lock().unwrap();
        let page_id = PageId::new(*next);
        *next += 1;
        self.pages.lock().unwrap().insert(page_id, Page::new());
        Ok(page_id)
    }

    fn deallocate_page(&mut self, page_id: PageId) -> Result<()> {
        self.pages.lock().unwrap().remove(&page_id);
        Ok(())
    }
}

#[test]
fn test_write_read_delete() {
    let (bpm, _dir) = create_bpm(FRAMES);
    let pid = bpm.allocate_page_id().unwrap();

    {
        let mut guard = bpm.fetch_page_write(pid).unwrap();
        put_str(guard.as_mut_slice(), "Hello, world!");
        assert_eq!(get_str(guard.as_slice()), "Hello, world!");
    }
    for _ in 0..2 {
        let guard = bpm.fetch_page_read(pid).unwrap();
        assert_eq!(get_str(guard.as_slice()), "Hello, world!");
    }

    bpm.delete_page(pid).unwrap();
    assert!(!bpm.contains_page(pid));
    assert!(matches!(bpm.fetch_page_read(pid), Err(Error::PageNotFound(_))));
}

#[test]
fn test_two_frame_k2_evicts_unpinned_page() {
    let config = BufferPoolConfig {
        pool_size: 2,
        replacer_k: 2,
    };
    let dir = tempdir().unwrap();
    let dm = DiskManager::create(dir.path().join("k2.db")).unwrap();
    let bpm = BufferPoolManager::with_config(config, dm);

    let (p0, _) = bpm.pin_new_page().unwrap();
    let (p1, _) = bpm.pin_new_page().unwrap();
    assert_eq!((p0, p1), (PageId::new(0), PageId::new(1)));
    assert!(bpm.unpin_page(p0, false));

    let (p2, _) = bpm.pin_new_page().unwrap();
    assert_eq!(p2, PageId::new(2));
    assert!(!bpm.contains_page(p0));
    assert!(bpm.contains_page(p1));
    assert_eq!(bpm.stats().snapshot().evictions, 1);
}

#[test]
fn test_full_pool_rejects_then_recovers() {
    let (bpm, _dir) = create_bpm(2);
    let a = bpm.allocate_page_id().unwrap();
    let b = bpm.allocate_page_id().unwrap();
    let spare1 = bpm.allocate_page_id().unwrap();
    let spare2 = bpm.allocate_page_id().unwrap();

    {
        let mut ga = bpm.checked_write_page(a).unwrap();
        let mut gb = bpm.checked_write_page(b).unwrap();
        put_str(ga.as_mut_slice(), "alpha");
        put_str(gb.as_mut_slice(), "beta");
        assert_eq!(bpm.get_pin_count(a), Some(1));
        assert_eq!(bpm.get_pin_count(b), Some(1));

        assert!(bpm.checked_read_page(spare1).is_none());
        assert!(matches!(bpm.fetch_page_write(spare2), Err(Error::NoFreeFrames)));

        ga.drop_guard();
        gb.drop_guard();
        assert_eq!(bpm.get_pin_count(a), Some(0));
        assert_eq!(bpm.get_pin_count(b), Some(0));
    }

    // both dirty pages get written back on the way out
    drop(bpm.checked_read_page(spare1).unwrap());
    drop(bpm.checked_write_page(spare2).unwrap());
    assert_eq!(bpm.get_pin_count(a), None);
    assert_eq!(bpm.get_pin_count(b), None);

    let ga = bpm.fetch_page_read(a).unwrap();
    let gb = bpm.fetch_page_read(b).unwrap();
    assert_eq!(get_str(ga.as_slice()), "alpha");
    assert_eq!(get_str(gb.as_slice()), "beta");
}

#[test]
fn test_evicted_page_round_trips() {
    let (bpm, _dir) = create_bpm(FRAMES);

    let (pid, frame) = bpm.pin_new_page().unwrap();
    put_str(frame.page_mut().as_mut_slice(), "durable");
    assert!(bpm.unpin_page(pid, true));

    // cycle enough pages through the pool to push `pid` out
    for _ in 0..FRAMES * 2 {
        drop(bpm.new_page().unwrap());
    }
    assert!(!bpm.contains_page(pid));

    let guard = bpm.fetch_page_read(pid).unwrap();
    assert_eq!(get_str(guard.as_slice()), "durable");
}

#[test]
fn test_pinned_pages_block_fetches() {
    let (bpm, _dir) = create_bpm(FRAMES);

    let pid0 = bpm.allocate_page_id().unwrap();
    {
        let mut page0 = bpm.fetch_page_write(pid0).unwrap();
        put_str(page0.as_mut_slice(), "Hello");
    }

    let mut held: Vec<_> = (0..FRAMES).map(|_| bpm.new_page().unwrap()).collect();
    assert!(held.iter().all(|g| bpm.get_pin_count(g.page_id()) == Some(1)));

    for _ in 0..FRAMES {
        let pid = bpm.allocate_page_id().unwrap();
        assert!(bpm.checked_write_page(pid).is_none());
    }

    // release half, then refill all but one of the freed frames
    for _ in 0..FRAMES / 2 {
        let pid = held[0].page_id();
        held.remove(0);
        assert_eq!(bpm.get_pin_count(pid), Some(0));
    }
    for _ in 0..FRAMES / 2 - 1 {
        held.push(bpm.new_page().unwrap());
    }

    {
        let original = bpm.fetch_page_read(pid0).unwrap();
        assert_eq!(get_str(original.as_slice()), "Hello");
    }

    let _last = bpm.new_page().unwrap();
    assert!(bpm.checked_read_page(pid0).is_none());
}

#[test]
fn test_guard_drop_is_idempotent() {
    let (bpm, _dir) = create_bpm(FRAMES);
    let pid1 = bpm.allocate_page_id().unwrap();
    let pid2 = bpm.allocate_page_id().unwrap();

    {
        let mut read = bpm.fetch_page_read(pid1).unwrap();
        let mut write = bpm.fetch_page_write(pid2).unwrap();
        assert_eq!(bpm.get_pin_count(pid1), Some(1));
        assert_eq!(bpm.get_pin_count(pid2), Some(1));

        for _ in 0..2 {
            read.drop_guard();
            write.drop_guard();
            assert_eq!(bpm.get_pin_count(pid1), Some(0));
            assert_eq!(bpm.get_pin_count(pid2), Some(0));
        }
    }

    // would hang if a dropped guard still held its latch
    let _w1 = bpm.fetch_page_write(pid1).unwrap();
    let _w2 = bpm.fetch_page_write(pid2).unwrap();
}

#[test]
fn test_basic_guard_upgrade() {
    let (bpm, _dir) = create_bpm(FRAMES);
    let pid = bpm.allocate_page_id().unwrap();

    let basic = bpm.fetch_page_basic(pid).unwrap();
    let mut write = basic.upgrade_write();
    put_str(write.as_mut_slice(), "upgraded");
    assert!(write.is_dirty());
    drop(write);
    assert_eq!(bpm.get_pin_count(pid), Some(0));

    let read = bpm.fetch_page_basic(pid).unwrap().upgrade_read();
    assert_eq!(get_str(read.as_slice()), "upgraded");
    assert_eq!(bpm.get_pin_count(pid), Some(1));
}

#[test]
fn test_delete_pinned_page_fails() {
    let (bpm, _dir) = create_bpm(FRAMES);
    let guard = bpm.new_page().unwrap();
    let pid = guard.page_id();

    assert!(matches!(bpm.delete_page(pid), Err(Error::PagePinned(_))));
    drop(guard);
    bpm.delete_page(pid).unwrap();
    assert_eq!(bpm.free_frame_count(), FRAMES);

    // deleting a page that is not resident is fine
    let other = bpm.allocate_page_id().unwrap();
    bpm.delete_page(other).unwrap();
}

#[test]
fn test_flush_page_clears_dirty_flag() {
    let (bpm, _dir) = create_bpm(FRAMES);
    let pid = {
        let mut guard = bpm.new_page().unwrap();
        put_str(guard.as_mut_slice(), "flushed");
        guard.page_id()
    };

    assert!(bpm.flush_page(pid).unwrap());
    assert!(!bpm.flush_page(bpm.allocate_page_id().unwrap()).unwrap());
    bpm.flush_all_pages().unwrap();
    assert!(bpm.stats().snapshot().pages_written >= 1);
}

#[test]
fn test_failed_write_back_keeps_victim_resident() {
    let store = FlakyStore::default();
    let bpm = BufferPoolManager::new(1, store.clone());

    let pid = {
        let mut guard = bpm.new_page().unwrap();
        put_str(guard.as_mut_slice(), "precious");
        guard.page_id()
    };

    store.fail_writes.store(true, Ordering::SeqCst);
    assert!(matches!(bpm.new_page(), Err(Error::Io(_))));
    assert!(bpm.contains_page(pid));
    assert_eq!(bpm.get_pin_count(pid), Some(0));

    store.fail_writes.store(false, Ordering::SeqCst);
    drop(bpm.new_page().unwrap());
    assert!(!bpm.contains_page(pid));

    let guard = bpm.fetch_page_read(pid).unwrap();
    assert_eq!(get_str(guard.as_slice()), "precious");
}

#[test]
fn test_failed_read_returns_frame() {
    let store = FlakyStore::default();
    let bpm = BufferPoolManager::new(2, store.clone());
    let pid = bpm.allocate_page_id().unwrap();

    store.fail_reads.store(true, Ordering::SeqCst);
    assert!(matches!(bpm.fetch_page_read(pid), Err(Error::Io(_))));
    assert!(!bpm.contains_page(pid));
    assert_eq!(bpm.free_frame_count(), 2);

    store.fail_reads.store(false, Ordering::SeqCst);
    assert!(bpm.fetch_page_read(pid).is_ok());
}

/// A pinned page is never chosen as a victim, even with many readers racing
/// for the only frame.
#[test]
fn test_pinned_frame_is_never_evicted() {
    const ROUNDS: usize = 50;
    const READERS: usize = 4;

    let (bpm, _dir) = create_bpm(1);
    let bpm = Arc::new(bpm);

    for round in 0..ROUNDS {
        let winner = bpm.new_page().unwrap().page_id();
        let loser = bpm.new_page().unwrap().page_id();

        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let readers: Vec<_> = (0..READERS)
            .map(|_| {
                let bpm = Arc::clone(&bpm);
                let gate = Arc::clone(&gate);
                thread::spawn(move || {
                    let (open, cvar) = &*gate;
                    let mut ready = open.lock().unwrap();
                    while !*ready {
                        ready = cvar.wait(ready).unwrap();
                    }
                    drop(ready);

                    let _shared = bpm.fetch_page_read(winner).unwrap();
                    assert!(
                        bpm.checked_read_page(loser).is_none(),
                        "round {}: loser fetched while winner pinned",
                        round
                    );
                })
            })
            .collect();

        let held = bpm.fetch_page_read(winner).unwrap();
        {
            let (open, cvar) = &*gate;
            *open.lock().unwrap() = true;
            cvar.notify_all();
        }
        for reader in readers {
            reader.join().unwrap();
        }
        drop(held);
    }
}

/// Holding one write latch must not stop another page from being latched.
#[test]
fn test_independent_latches_do_not_deadlock() {
    let (bpm, _dir) = create_bpm(FRAMES);
    let bpm = Arc::new(bpm);

    let pid0 = bpm.new_page().unwrap().page_id();
    let pid1 = bpm.new_page().unwrap().page_id();

    let mut guard0 = bpm.fetch_page_write(pid0).unwrap();

    let started = Arc::new(AtomicBool::new(false));
    let child = {
        let bpm = Arc::clone(&bpm);
        let started = Arc::clone(&started);
        thread::spawn(move || {
            started.store(true, Ordering::SeqCst);
            let _blocked = bpm.fetch_page_write(pid0).unwrap();
        })
    };

    while !started.load(Ordering::SeqCst) {
        thread::yield_now();
    }
    thread::sleep(Duration::from_millis(50));

    let _guard1 = bpm.fetch_page_write(pid1).unwrap();
    guard0.drop_guard();
    child.join().unwrap();
}
