//! LRU-K page replacement policy.
//!
//! The victim is the evictable frame with the largest backward k-distance:
//! the age of its k-th most recent access. Frames seen fewer than k times
//! have infinite distance and are evicted first, oldest single access
//! breaking the tie (classical LRU among that cohort).

use std::collections::{BTreeSet, HashMap, VecDeque};

use log::trace;
use parking_lot::Mutex;

use crate::common::types::FrameId;

/// Sort key for the evictable set. Lexicographic ordering puts the best
/// victim first: frames below k accesses sort ahead of full-history
/// frames, then by oldest retained access tick, then by frame id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct VictimKey {
    has_full_history: bool,
    oldest_tick: u64,
    frame_id: FrameId,
}

#[derive(Debug)]
struct FrameHistory {
    /// Most recent access first; capped at k entries.
    ticks: VecDeque<u64>,
    evictable: bool,
}

impl FrameHistory {
    fn victim_key(&self, frame_id: FrameId, k: usize) -> VictimKey {
        VictimKey {
            has_full_history: self.ticks.len() >= k,
            oldest_tick: *self.ticks.back().expect("frame history is never empty"),
            frame_id,
        }
    }
}

#[derive(Debug, Default)]
struct ReplacerState {
    frames: HashMap<FrameId, FrameHistory>,
    /// Evictable frames, best victim first. Entries are removed and
    /// re-inserted around every history or flag mutation so that keys in
    /// the set never change in place.
    candidates: BTreeSet<VictimKey>,
    /// Logical access clock; strictly monotonic, one tick per access.
    clock: u64,
}

/// Tracks per-frame access history and picks eviction victims.
///
/// All operations serialize on a single internal mutex.
pub struct LruKReplacer {
    num_frames: usize,
    k: usize,
    state: Mutex<ReplacerState>,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k >= 1, "LRU-K requires k >= 1");
        Self {
            num_frames,
            k,
            state: Mutex::new(ReplacerState::default()),
        }
    }

    /// Record an access to the given frame at the current tick, creating
    /// the entry on first access. Panics on an out-of-range frame id.
    pub fn record_access(&self, frame_id: FrameId) {
        assert!(
            (frame_id as usize) < self.num_frames,
            "frame id {} out of range for replacer of {} frames",
            frame_id,
            self.num_frames
        );

        let state = &mut *self.state.lock();
        state.clock += 1;
        let tick = state.clock;

        let history = state.frames.entry(frame_id).or_insert_with(|| FrameHistory {
            ticks: VecDeque::with_capacity(self.k),
            evictable: false,
        });

        if history.evictable && !history.ticks.is_empty() {
            state.candidates.remove(&history.victim_key(frame_id, self.k));
        }

        history.ticks.push_front(tick);
        if history.ticks.len() > self.k {
            history.ticks.pop_back();
        }

        if history.evictable {
            state.candidates.insert(history.victim_key(frame_id, self.k));
        }
    }

    /// Toggle whether a frame may be evicted. Panics on a frame the
    /// replacer has never seen.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let state = &mut *self.state.lock();
        let history = state
            .frames
            .get_mut(&frame_id)
            .expect("set_evictable on a frame unknown to the replacer");

        if history.evictable == evictable {
            return;
        }

        if history.evictable {
            state.candidates.remove(&history.victim_key(frame_id, self.k));
        }
        history.evictable = evictable;
        if evictable {
            state.candidates.insert(history.victim_key(frame_id, self.k));
        }
    }

    /// Evict the frame with the largest backward k-distance, discarding its
    /// access history. Returns `None` when no frame is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let state = &mut *self.state.lock();
        let key = state.candidates.pop_first()?;
        state.frames.remove(&key.frame_id);
        trace!("evicting frame {}", key.frame_id);
        Some(key.frame_id)
    }

    /// Forcibly drop an evictable frame and its history. Unknown frames are
    /// a silent no-op; a known non-evictable frame panics.
    pub fn remove(&self, frame_id: FrameId) {
        let state = &mut *self.state.lock();
        let Some(history) = state.frames.get(&frame_id) else {
            return;
        };
        assert!(history.evictable, "remove on a pinned frame");
        state.candidates.remove(&history.victim_key(frame_id, self.k));
        state.frames.remove(&frame_id);
    }

    /// Number of currently evictable frames.
    pub fn size(&self) -> usize {
        self.state.lock().candidates.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evict_prefers_partial_history() {
        let replacer = LruKReplacer::new(8, 2);

        // Frame 0 gets two accesses, frame 1 a single one.
        replacer.record_access(0);
        replacer.record_access(1);
        replacer.record_access(0);
        replacer.set_evictable(0, true);
        replacer.set_evictable(1, true);

        assert_eq!(replacer.size(), 2);
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(0));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_lru_among_infinite_distances() {
        let replacer = LruKReplacer::new(8, 2);

        // Accesses: A, B, C, A. Among the single-access frames B is older
        // than C; A has full history and loses to both.
        replacer.record_access(0); // A
        replacer.record_access(1); // B
        replacer.record_access(2); // C
        replacer.record_access(0); // A again
        for f in 0..3 {
            replacer.set_evictable(f, true);
        }

        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(0));
    }

    #[test]
    fn test_kth_access_ordering() {
        let replacer = LruKReplacer::new(8, 2);

        // Both frames reach full history; frame 0's second-most-recent
        // access (tick 1) is older than frame 1's (tick 2).
        replacer.record_access(0);
        replacer.record_access(1);
        replacer.record_access(0);
        replacer.record_access(1);
        replacer.set_evictable(0, true);
        replacer.set_evictable(1, true);

        assert_eq!(replacer.evict(), Some(0));
        assert_eq!(replacer.evict(), Some(1));
    }

    #[test]
    fn test_pinned_frames_are_not_candidates() {
        let replacer = LruKReplacer::new(4, 2);

        replacer.record_access(0);
        replacer.record_access(1);
        replacer.set_evictable(0, true);

        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(0));
        // Frame 1 was never marked evictable.
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_record_access_keeps_evictable_ordering() {
        let replacer = LruKReplacer::new(4, 2);

        replacer.record_access(0);
        replacer.record_access(1);
        replacer.set_evictable(0, true);
        replacer.set_evictable(1, true);

        // A fresh access to frame 0 while it sits in the candidate set must
        // reorder it behind frame 1.
        replacer.record_access(0);

        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(0));
    }

    #[test]
    fn test_remove_unknown_frame_is_noop() {
        let replacer = LruKReplacer::new(4, 2);
        replacer.remove(3);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    #[should_panic(expected = "pinned frame")]
    fn test_remove_non_evictable_panics() {
        let replacer = LruKReplacer::new(4, 2);
        replacer.record_access(0);
        replacer.remove(0);
    }

    #[test]
    #[should_panic(expected = "unknown to the replacer")]
    fn test_set_evictable_unknown_panics() {
        let replacer = LruKReplacer::new(4, 2);
        replacer.set_evictable(2, true);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_record_access_out_of_range_panics() {
        let replacer = LruKReplacer::new(4, 2);
        replacer.record_access(4);
    }
}
