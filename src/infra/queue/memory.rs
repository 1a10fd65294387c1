//! In-memory tiered queue with O(log n) insertion and lazy deletion.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::WorkItem;
use crate::util::serde::{Priority, TaskId};

/// Auto-compaction kicks in once tombstones exceed this count and outnumber live entries.
const COMPACTION_MIN_TOMBSTONES: usize = 64;

/// Heap entry. `seq` identifies one insertion; the entry is live only while
/// `QueueState::items` still holds that `seq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueEntry {
    order_key: u128,
    seq: u64,
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: reverse so the smallest key pops first.
        other
            .order_key
            .cmp(&self.order_key)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    seq: u64,
    priority: Priority,
}

#[derive(Default)]
struct QueueState {
    heaps: [BinaryHeap<QueueEntry>; 5],
    /// Live items by insertion `seq`.
    items: HashMap<u64, WorkItem>,
    index: HashMap<TaskId, Slot>,
    live: [usize; 5],
    /// Largest order key ever inserted per tier; requeues land behind it.
    tail: [u128; 5],
    tombstones: usize,
    next_seq: u64,
}

impl QueueState {
    fn insert(&mut self, item: WorkItem, order_key: u128) {
        let tier = item.priority;
        let seq = self.next_seq;
        self.next_seq += 1;

        if let Some(old) = self.index.insert(item.id.clone(), Slot { seq, priority: tier }) {
            // Same id queued twice: the older entry becomes a tombstone.
            self.items.remove(&old.seq);
            self.live[old.priority.index()] -= 1;
            self.tombstones += 1;
        }
        self.live[tier.index()] += 1;
        self.tail[tier.index()] = self.tail[tier.index()].max(order_key);
        self.items.insert(seq, item);
        self.heaps[tier.index()].push(QueueEntry { order_key, seq });
    }

    fn is_live(&self, entry: &QueueEntry) -> bool {
        self.items.contains_key(&entry.seq)
    }

    /// Drop dead entries sitting on top of a tier's heap.
    fn purge_top(&mut self, tier: Priority) {
        while let Some(top) = self.heaps[tier.index()].peek() {
            if self.is_live(top) {
                break;
            }
            self.heaps[tier.index()].pop();
            self.tombstones = self.tombstones.saturating_sub(1);
        }
    }

    fn pop_tier(&mut self, tier: Priority) -> Option<WorkItem> {
        self.purge_top(tier);
        let entry = self.heaps[tier.index()].pop()?;
        let item = self.items.remove(&entry.seq)?;
        self.index.remove(&item.id);
        self.live[tier.index()] -= 1;
        Some(item)
    }

    /// Tombstone the id's heap entry and hand back its item.
    fn remove(&mut self, id: &str) -> Option<WorkItem> {
        let slot = self.index.remove(id)?;
        self.live[slot.priority.index()] -= 1;
        self.tombstones += 1;
        self.items.remove(&slot.seq)
    }

    fn compact(&mut self) -> usize {
        let before: usize = self.heaps.iter().map(BinaryHeap::len).sum();
        for tier in Priority::ALL {
            let entries = std::mem::take(&mut self.heaps[tier.index()]);
            let kept: BinaryHeap<QueueEntry> =
                entries.into_iter().filter(|e| self.is_live(e)).collect();
            self.heaps[tier.index()] = kept;
        }
        self.tombstones = 0;
        let after: usize = self.heaps.iter().map(BinaryHeap::len).sum();
        before - after
    }

    fn maybe_compact(&mut self) {
        let live: usize = self.live.iter().sum();
        if self.tombstones > COMPACTION_MIN_TOMBSTONES && self.tombstones > live {
            let purged = self.compact();
            tracing::debug!(purged, "compacted tiered queue");
        }
    }

    fn clear_tier(&mut self, tier: Priority) {
        let heap = std::mem::take(&mut self.heaps[tier.index()]);
        let dead = heap.len().saturating_sub(self.live[tier.index()]);
        self.tombstones = self.tombstones.saturating_sub(dead);
        self.live[tier.index()] = 0;
        for entry in heap {
            if let Some(item) = self.items.remove(&entry.seq) {
                self.index.remove(&item.id);
            }
        }
    }
}

/// Per-tier count and share of the queued total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierShareOfQueue {
    /// Items queued in the tier.
    pub count: usize,
    /// Percentage of all queued items.
    pub percentage: f64,
}

/// Read snapshot of the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Items queued per tier.
    pub lengths: BTreeMap<Priority, usize>,
    /// Items queued overall.
    pub total: usize,
    /// Per-tier count and percentage.
    pub distribution: BTreeMap<Priority, TierShareOfQueue>,
}

/// Pending work partitioned into five min-heaps, one per tier, plus an id index.
///
/// All operations serialize on one coarse lock.
#[derive(Default)]
pub struct TieredQueue {
    state: Mutex<QueueState>,
}

impl TieredQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an item, ordered by its submission time within its tier.
    ///
    /// An item whose id is already queued replaces the earlier entry.
    pub fn put(&self, item: WorkItem) {
        let key = item.created_at_ms;
        self.state.lock().insert(item, key);
    }

    /// Reinsert an item at the back of its tier's current order.
    ///
    /// Used for denied, preempted and retried items; `created_at_ms` is kept.
    pub fn requeue(&self, item: WorkItem) {
        let mut state = self.state.lock();
        let key = state.tail[item.priority.index()];
        state.insert(item, key);
    }

    /// Pop the best item across all tiers.
    pub fn pop(&self) -> Option<WorkItem> {
        self.pop_from(&Priority::ALL)
    }

    /// Pop the best item from the first non-empty tier in `tiers`, in the given order.
    pub fn pop_from(&self, tiers: &[Priority]) -> Option<WorkItem> {
        let mut state = self.state.lock();
        tiers.iter().find_map(|&tier| state.pop_tier(tier))
    }

    /// Tombstone a queued item without touching the heap.
    ///
    /// Returns `false` when the id is not queued.
    pub fn remove(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        if state.remove(id).is_none() {
            return false;
        }
        state.maybe_compact();
        true
    }

    /// Move a queued item to another tier, at the back of that tier's order.
    ///
    /// Returns `false` when the id is not queued.
    pub fn update_priority(&self, id: &str, priority: Priority) -> bool {
        let mut state = self.state.lock();
        let Some(mut item) = state.remove(id) else {
            return false;
        };
        item.priority = priority;
        let key = state.tail[priority.index()];
        state.insert(item, key);
        state.maybe_compact();
        true
    }

    /// Look at the next item without removing it, for one tier or overall.
    pub fn peek(&self, tier: Option<Priority>) -> Option<WorkItem> {
        let mut state = self.state.lock();
        let tiers: &[Priority] = match tier {
            Some(ref t) => std::slice::from_ref(t),
            None => &Priority::ALL,
        };
        for &t in tiers {
            state.purge_top(t);
            if let Some(top) = state.heaps[t.index()].peek() {
                return state.items.get(&top.seq).cloned();
            }
        }
        None
    }

    /// Number of live queued items.
    pub fn len(&self) -> usize {
        self.state.lock().live.iter().sum()
    }

    /// Number of live items in one tier.
    pub fn len_of(&self, tier: Priority) -> usize {
        self.state.lock().live[tier.index()]
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the id is queued.
    pub fn contains(&self, id: &str) -> bool {
        self.state.lock().index.contains_key(id)
    }

    /// Current tier of a queued id.
    pub fn tier_of(&self, id: &str) -> Option<Priority> {
        self.state.lock().index.get(id).map(|slot| slot.priority)
    }

    /// Physically purge tombstoned entries by rebuilding every heap.
    ///
    /// Returns the number of entries dropped.
    pub fn cleanup_deleted(&self) -> usize {
        self.state.lock().compact()
    }

    /// Live items in scheduling order, for one tier or overall.
    pub fn waiting(&self, tier: Option<Priority>) -> Vec<WorkItem> {
        let state = self.state.lock();
        let tiers: &[Priority] = match tier {
            Some(ref t) => std::slice::from_ref(t),
            None => &Priority::ALL,
        };
        let mut items = Vec::with_capacity(state.index.len());
        for &t in tiers {
            let mut entries: Vec<QueueEntry> = state.heaps[t.index()]
                .iter()
                .filter(|e| state.is_live(e))
                .copied()
                .collect();
            // Heap order is reversed; sorting descending yields pop order.
            entries.sort_unstable_by(|a, b| b.cmp(a));
            items.extend(entries.iter().filter_map(|e| state.items.get(&e.seq).cloned()));
        }
        items
    }

    /// Drop every queued item, for one tier or overall.
    pub fn clear(&self, tier: Option<Priority>) {
        let mut state = self.state.lock();
        match tier {
            Some(t) => state.clear_tier(t),
            None => {
                let next_seq = state.next_seq;
                *state = QueueState {
                    next_seq,
                    ..QueueState::default()
                };
            }
        }
    }

    /// Snapshot of per-tier lengths and distribution.
    pub fn status(&self) -> QueueStatus {
        let state = self.state.lock();
        let total: usize = state.live.iter().sum();
        let mut lengths = BTreeMap::new();
        let mut distribution = BTreeMap::new();
        for tier in Priority::ALL {
            let count = state.live[tier.index()];
            lengths.insert(tier, count);
            #[allow(clippy::cast_precision_loss)]
            let percentage = count as f64 / total.max(1) as f64 * 100.0;
            distribution.insert(tier, TierShareOfQueue { count, percentage });
        }
        QueueStatus {
            lengths,
            total,
            distribution,
        }
    }
}
