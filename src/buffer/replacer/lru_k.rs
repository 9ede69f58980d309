//! LRU-K replacement policy.
//!
//! Frames with fewer than K recorded accesses have an infinite backward
//! K-distance and are always evicted first, in plain LRU order. Frames with
//! K or more accesses live in a second list and are evicted LRU-style only
//! once no sub-K frame is evictable.
//!
//! Both lists are doubly linked through `prev`/`next` indices stored in a
//! per-frame node array, so moves and unlinks are O(1) without heap
//! allocation or raw pointers.

use parking_lot::Mutex;

use crate::common::{Error, FrameId, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    /// Fewer than K accesses.
    History,
    /// At least K accesses.
    Cache,
}

#[derive(Debug, Default, Clone, Copy)]
struct Node {
    access_count: usize,
    evictable: bool,
    list: Option<ListKind>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Head = most recently accessed, tail = eviction end.
#[derive(Debug, Default)]
struct FrameList {
    head: Option<usize>,
    tail: Option<usize>,
}

struct ReplacerState {
    nodes: Vec<Node>,
    history: FrameList,
    cache: FrameList,
    /// Number of tracked frames with `evictable == true`.
    curr_size: usize,
}

impl ReplacerState {
    fn list_mut(&mut self, kind: ListKind) -> &mut FrameList {
        match kind {
            ListKind::History => &mut self.history,
            ListKind::Cache => &mut self.cache,
        }
    }

    fn list(&self, kind: ListKind) -> &FrameList {
        match kind {
            ListKind::History => &self.history,
            ListKind::Cache => &self.cache,
        }
    }

    /// Detach `idx` from whichever list holds it.
    fn unlink(&mut self, idx: usize) {
        let Node {
            list, prev, next, ..
        } = self.nodes[idx];
        let Some(kind) = list else {
            return;
        };

        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.list_mut(kind).head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.list_mut(kind).tail = prev,
        }

        let node = &mut self.nodes[idx];
        node.list = None;
        node.prev = None;
        node.next = None;
    }

    fn push_front(&mut self, kind: ListKind, idx: usize) {
        debug_assert!(self.nodes[idx].list.is_none(), "frame already linked");
        let old_head = self.list(kind).head;

        let node = &mut self.nodes[idx];
        node.list = Some(kind);
        node.prev = None;
        node.next = old_head;

        match old_head {
            Some(h) => self.nodes[h].prev = Some(idx),
            None => self.list_mut(kind).tail = Some(idx),
        }
        self.list_mut(kind).head = Some(idx);
    }

    /// First evictable frame walking `kind` from the tail.
    fn find_victim(&self, kind: ListKind) -> Option<usize> {
        let mut cursor = self.list(kind).tail;
        while let Some(idx) = cursor {
            if self.nodes[idx].evictable {
                return Some(idx);
            }
            cursor = self.nodes[idx].prev;
        }
        None
    }

    fn forget(&mut self, idx: usize) {
        self.unlink(idx);
        self.nodes[idx] = Node::default();
    }
}

/// LRU-K replacer over a fixed number of frame slots.
///
/// # Thread Safety
/// All state sits behind one internal `parking_lot::Mutex`, so every method
/// takes `&self` and is a short critical section. The replacer does not know
/// about pin counts: the buffer pool only marks a frame evictable once its
/// pin count is 0.
///
/// # Example
/// ```
/// use tesseradb::buffer::LruKReplacer;
/// use tesseradb::common::FrameId;
///
/// let replacer = LruKReplacer::new(3, 2);
/// for id in 0..3 {
///     replacer.record_access(FrameId::new(id));
///     replacer.set_evictable(FrameId::new(id), true);
/// }
/// replacer.record_access(FrameId::new(0)); // frame 0 reaches K
/// assert_eq!(replacer.evict(), Some(FrameId::new(1)));
/// ```
pub struct LruKReplacer {
    state: Mutex<ReplacerState>,
    k: usize,
    num_frames: usize,
}

impl LruKReplacer {
    /// Create a replacer tracking frames `0..num_frames`.
    ///
    /// # Panics
    /// Panics if `k == 0`.
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "LRU-K needs k >= 1");
        Self {
            state: Mutex::new(ReplacerState {
                nodes: vec![Node::default(); num_frames],
                history: FrameList::default(),
                cache: FrameList::default(),
                curr_size: 0,
            }),
            k,
            num_frames,
        }
    }

    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    #[inline]
    fn check_frame(&self, frame_id: FrameId) -> usize {
        assert!(
            frame_id.0 < self.num_frames,
            "frame id {} out of range (replacer tracks {} frames)",
            frame_id,
            self.num_frames
        );
        frame_id.0
    }

    /// Record an access to `frame_id`.
    ///
    /// Below K accesses the frame moves to the front of the history list; at
    /// exactly K it migrates to the front of the cache list; past K it moves to
    /// the front of the cache list.
    ///
    /// # Panics
    /// Panics if `frame_id` is out of range.
    pub fn record_access(&self, frame_id: FrameId) {
        let idx = self.check_frame(frame_id);
        let mut state = self.state.lock();

        state.nodes[idx].access_count += 1;
        let target = if state.nodes[idx].access_count < self.k {
            ListKind::History
        } else {
            ListKind::Cache
        };

        state.unlink(idx);
        state.push_front(target, idx);
    }

    /// Mark `frame_id` as eligible (or not) for eviction.
    ///
    /// A no-op for a frame with no recorded access.
    ///
    /// # Panics
    /// Panics if `frame_id` is out of range.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let idx = self.check_frame(frame_id);
        let mut state = self.state.lock();

        let node = &mut state.nodes[idx];
        if node.access_count == 0 || node.evictable == evictable {
            return;
        }
        node.evictable = evictable;
        if evictable {
            state.curr_size += 1;
        } else {
            state.curr_size -= 1;
        }
    }

    /// Pick a victim and stop tracking it.
    ///
    /// The history list is scanned from its least-recent end first; the cache
    /// list only if no sub-K frame is evictable. Returns `None` when no
    /// tracked frame is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        if state.curr_size == 0 {
            return None;
        }

        let victim = state
            .find_victim(ListKind::History)
            .or_else(|| state.find_victim(ListKind::Cache))?;

        state.forget(victim);
        state.curr_size -= 1;
        Some(FrameId::new(victim))
    }

    /// Forget `frame_id` entirely, resetting its access history.
    ///
    /// A no-op for an untracked frame.
    ///
    /// # Errors
    /// Returns `Error::InvariantViolation` if the frame is tracked but not
    /// evictable.
    ///
    /// # Panics
    /// Panics if `frame_id` is out of range.
    pub fn remove(&self, frame_id: FrameId) -> Result<()> {
        let idx = self.check_frame(frame_id);
        let mut state = self.state.lock();

        let node = state.nodes[idx];
        if node.access_count == 0 {
            return Ok(());
        }
        if !node.evictable {
            return Err(Error::InvariantViolation(format!(
                "remove of non-evictable frame {}",
                frame_id
            )));
        }

        state.forget(idx);
        state.curr_size -= 1;
        Ok(())
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.state.lock().curr_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(id: usize) -> FrameId {
        FrameId::new(id)
    }

    #[test]
    fn test_sub_k_frames_evict_in_lru_order() {
        let replacer = LruKReplacer::new(4, 3);

        for id in [0, 1, 2] {
            replacer.record_access(f(id));
            replacer.set_evictable(f(id), true);
        }
        // 0 is touched again but stays below K
        replacer.record_access(f(0));

        assert_eq!(replacer.size(), 3);
        assert_eq!(replacer.evict(), Some(f(1)));
        assert_eq!(replacer.evict(), Some(f(2)));
        assert_eq!(replacer.evict(), Some(f(0)));
        assert_eq!(replacer.evict(), None);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_history_before_cache() {
        let replacer = LruKReplacer::new(3, 2);

        replacer.record_access(f(0));
        replacer.record_access(f(0)); // 0 in cache
        replacer.record_access(f(1)); // 1 in history
        replacer.set_evictable(f(0), true);
        replacer.set_evictable(f(1), true);

        assert_eq!(replacer.evict(), Some(f(1)));
        assert_eq!(replacer.evict(), Some(f(0)));
    }

    #[test]
    fn test_cache_list_is_lru_over_recent_access() {
        let replacer = LruKReplacer::new(3, 2);

        for id in [0, 1, 2] {
            replacer.record_access(f(id));
            replacer.record_access(f(id));
            replacer.set_evictable(f(id), true);
        }
        replacer.record_access(f(0));

        assert_eq!(replacer.evict(), Some(f(1)));
        assert_eq!(replacer.evict(), Some(f(2)));
        assert_eq!(replacer.evict(), Some(f(0)));
    }

    #[test]
    fn test_non_evictable_frames_are_skipped() {
        let replacer = LruKReplacer::new(3, 2);

        for id in [0, 1, 2] {
            replacer.record_access(f(id));
        }
        replacer.set_evictable(f(1), true);

        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(f(1)));
        assert_eq!(replacer.evict(), None);

        replacer.set_evictable(f(0), true);
        assert_eq!(replacer.evict(), Some(f(0)));
    }

    #[test]
    fn test_set_evictable_untracked_is_noop() {
        let replacer = LruKReplacer::new(2, 2);
        replacer.set_evictable(f(0), true);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_set_evictable_is_idempotent() {
        let replacer = LruKReplacer::new(2, 2);
        replacer.record_access(f(0));
        replacer.set_evictable(f(0), true);
        replacer.set_evictable(f(0), true);
        assert_eq!(replacer.size(), 1);
        replacer.set_evictable(f(0), false);
        replacer.set_evictable(f(0), false);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_evicted_frame_starts_fresh() {
        let replacer = LruKReplacer::new(2, 2);

        replacer.record_access(f(0));
        replacer.record_access(f(0));
        replacer.set_evictable(f(0), true);
        assert_eq!(replacer.evict(), Some(f(0)));

        // Back in history with a count of 1, so it loses to nothing in cache
        replacer.record_access(f(1));
        replacer.record_access(f(1));
        replacer.record_access(f(0));
        replacer.set_evictable(f(0), true);
        replacer.set_evictable(f(1), true);
        assert_eq!(replacer.evict(), Some(f(0)));
    }

    #[test]
    fn test_remove() {
        let replacer = LruKReplacer::new(3, 2);

        // untracked
        assert!(replacer.remove(f(2)).is_ok());

        replacer.record_access(f(0));
        assert!(matches!(
            replacer.remove(f(0)),
            Err(Error::InvariantViolation(_))
        ));

        replacer.set_evictable(f(0), true);
        replacer.record_access(f(1));
        replacer.set_evictable(f(1), true);
        replacer.remove(f(0)).unwrap();

        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(f(1)));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_out_of_range_frame_panics() {
        let replacer = LruKReplacer::new(2, 2);
        replacer.record_access(f(2));
    }
}
