//! Indexed binary min-heap for Dijkstra-style searches.
//!
//! Unlike `std::collections::BinaryHeap`, every element is addressable by an
//! external id after insertion: `decrease_key`, removal tests and payload
//! lookup all work by id. Settled elements stay queryable (distance label and
//! payload survive `delete_min`), which is what parent-chain reconstruction
//! and stall propagation need.
//!
//! Layout:
//! - `insertions` is an append-only record per inserted id, holding the
//!   current tree slot (0 = out of the tree), the weight and the payload.
//! - `tree` is a 1-indexed binary heap over insertion indices; slot 0 is a
//!   sentinel. Weights are duplicated into the tree so sift operations touch
//!   one array.
//! - `index` maps id → insertion index, either a flat array over a known id
//!   space or a hash map.

use rustc_hash::FxHashMap;

/// Id-to-insertion-record index, chosen at construction.
///
/// `Dense` is the hot path: a flat array sized by the id space, right for
/// contiguous ids such as original-edge numbers. `Sparse` falls back to a
/// hash map when the id space is large or unbounded.
#[derive(Debug, Clone)]
pub enum IndexStorage {
    Dense(Vec<u32>),
    Sparse(FxHashMap<u32, u32>),
}

impl IndexStorage {
    #[inline]
    fn get(&self, id: u32) -> u32 {
        match self {
            // Out-of-range or stale entries resolve to "not inserted" via the
            // insertion-record check in `was_inserted`.
            IndexStorage::Dense(positions) => {
                positions.get(id as usize).copied().unwrap_or(u32::MAX)
            }
            IndexStorage::Sparse(positions) => positions.get(&id).copied().unwrap_or(u32::MAX),
        }
    }

    #[inline]
    fn set(&mut self, id: u32, insertion: u32) {
        match self {
            IndexStorage::Dense(positions) => positions[id as usize] = insertion,
            IndexStorage::Sparse(positions) => {
                positions.insert(id, insertion);
            }
        }
    }

    fn clear(&mut self) {
        match self {
            // Stale dense entries are benign: `was_inserted` validates the id
            // against the insertion record, so no wipe is needed.
            IndexStorage::Dense(_) => {}
            IndexStorage::Sparse(positions) => positions.clear(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Insertion<D> {
    id: u32,
    /// Current tree slot; 0 means the element has been removed from the tree.
    slot: u32,
    weight: i32,
    data: D,
}

#[derive(Debug, Clone, Copy)]
struct TreeEntry {
    insertion: u32,
    weight: i32,
}

/// Binary min-heap addressable by element id.
#[derive(Debug)]
pub struct IndexedHeap<D> {
    insertions: Vec<Insertion<D>>,
    tree: Vec<TreeEntry>,
    index: IndexStorage,
}

impl<D: Copy> IndexedHeap<D> {
    /// Heap over the contiguous id space `0..id_space`.
    pub fn dense(id_space: usize) -> Self {
        Self {
            insertions: Vec::new(),
            tree: vec![SENTINEL],
            index: IndexStorage::Dense(vec![0; id_space]),
        }
    }

    /// Heap over an arbitrary id space, indexed through a hash map.
    pub fn sparse() -> Self {
        Self {
            insertions: Vec::new(),
            tree: vec![SENTINEL],
            index: IndexStorage::Sparse(FxHashMap::default()),
        }
    }

    /// Number of elements currently in the tree.
    #[inline]
    pub fn len(&self) -> usize {
        self.tree.len() - 1
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tree.len() == 1
    }

    /// Full reset: insertion records and the id index are dropped.
    pub fn clear(&mut self) {
        self.insertions.clear();
        self.tree.truncate(1);
        self.index.clear();
    }

    /// True iff `insert` was called for `id` since the last `clear`.
    #[inline]
    pub fn was_inserted(&self, id: u32) -> bool {
        let insertion = self.index.get(id) as usize;
        insertion < self.insertions.len() && self.insertions[insertion].id == id
    }

    /// True iff `id` has left the tree via `delete_min` or `delete_all`.
    #[inline]
    pub fn was_removed(&self, id: u32) -> bool {
        self.insertions[self.insertion_of(id)].slot == 0
    }

    /// Insert a new element. `id` must not have been inserted before.
    pub fn insert(&mut self, id: u32, weight: i32, data: D) {
        debug_assert!(!self.was_inserted(id));
        let insertion = self.insertions.len() as u32;
        let slot = self.tree.len() as u32;
        self.insertions.push(Insertion {
            id,
            slot,
            weight,
            data,
        });
        self.tree.push(TreeEntry { insertion, weight });
        self.index.set(id, insertion);
        self.upheap(slot as usize);
    }

    /// Id of the minimum-weight element.
    #[inline]
    pub fn min(&self) -> u32 {
        debug_assert!(!self.is_empty());
        self.insertions[self.tree[1].insertion as usize].id
    }

    /// Weight of the minimum-weight element.
    #[inline]
    pub fn min_key(&self) -> i32 {
        debug_assert!(!self.is_empty());
        self.tree[1].weight
    }

    /// Remove the minimum-weight element and return its id. The element stays
    /// queryable through `key`/`data`.
    pub fn delete_min(&mut self) -> u32 {
        debug_assert!(!self.is_empty());
        let removed = self.tree[1].insertion as usize;
        let last = self.tree[self.tree.len() - 1];
        self.tree.pop();
        if self.tree.len() > 1 {
            self.tree[1] = last;
            self.downheap(1);
        }
        self.insertions[removed].slot = 0;
        self.insertions[removed].id
    }

    /// Remove every element from the tree in one sweep. Insertion records and
    /// the id index stay intact, so `was_inserted`, `key` and `data` keep
    /// answering for everything seen this session.
    pub fn delete_all(&mut self) {
        for slot in 1..self.tree.len() {
            self.insertions[self.tree[slot].insertion as usize].slot = 0;
        }
        self.tree.truncate(1);
    }

    /// Lower the weight of a live element. `weight` must not exceed the
    /// element's current weight.
    pub fn decrease_key(&mut self, id: u32, weight: i32) {
        let insertion = self.insertion_of(id);
        let slot = self.insertions[insertion].slot as usize;
        debug_assert!(slot != 0, "decrease_key on a removed element");
        debug_assert!(weight <= self.insertions[insertion].weight);
        self.insertions[insertion].weight = weight;
        self.tree[slot].weight = weight;
        self.upheap(slot);
    }

    /// Current weight of an inserted element (live or removed).
    #[inline]
    pub fn key(&self, id: u32) -> i32 {
        self.insertions[self.insertion_of(id)].weight
    }

    /// Overwrite the weight of a removed element. The element is not in the
    /// tree, so the heap order is untouched; this is the only way to lower a
    /// label after settlement.
    pub fn set_removed_key(&mut self, id: u32, weight: i32) {
        let insertion = self.insertion_of(id);
        debug_assert!(self.insertions[insertion].slot == 0);
        self.insertions[insertion].weight = weight;
    }

    /// Payload of an inserted element.
    #[inline]
    pub fn data(&self, id: u32) -> &D {
        &self.insertions[self.insertion_of(id)].data
    }

    /// Mutable payload access. Weights are not reachable through this; use
    /// `decrease_key` or `set_removed_key`.
    #[inline]
    pub fn data_mut(&mut self, id: u32) -> &mut D {
        let insertion = self.insertion_of(id);
        &mut self.insertions[insertion].data
    }

    #[inline]
    fn insertion_of(&self, id: u32) -> usize {
        debug_assert!(self.was_inserted(id));
        self.index.get(id) as usize
    }

    /// Sift the entry at `slot` up. Carries the rising entry in a register
    /// and refills the hole at the end, keeping the slot back-pointers of
    /// every displaced entry correct along the way.
    fn upheap(&mut self, mut slot: usize) {
        let rising = self.tree[slot].insertion;
        let weight = self.tree[slot].weight;
        let mut parent = slot >> 1;
        while self.tree[parent].weight > weight {
            self.tree[slot] = self.tree[parent];
            self.insertions[self.tree[slot].insertion as usize].slot = slot as u32;
            slot = parent;
            parent >>= 1;
        }
        self.tree[slot] = TreeEntry {
            insertion: rising,
            weight,
        };
        self.insertions[rising as usize].slot = slot as u32;
    }

    /// Sift the entry at `slot` down, same hole technique as `upheap`.
    fn downheap(&mut self, mut slot: usize) {
        let dropping = self.tree[slot].insertion;
        let weight = self.tree[slot].weight;
        let len = self.tree.len();
        let mut child = slot << 1;
        while child < len {
            let right = child + 1;
            if right < len && self.tree[child].weight > self.tree[right].weight {
                child = right;
            }
            if weight <= self.tree[child].weight {
                break;
            }
            self.tree[slot] = self.tree[child];
            self.insertions[self.tree[slot].insertion as usize].slot = slot as u32;
            slot = child;
            child <<= 1;
        }
        self.tree[slot] = TreeEntry {
            insertion: dropping,
            weight,
        };
        self.insertions[dropping as usize].slot = slot as u32;
    }
}

/// Slot 0 of the tree. The weight stops `upheap` at the root without a
/// bounds check; the insertion index is never read.
const SENTINEL: TreeEntry = TreeEntry {
    insertion: u32::MAX,
    weight: i32::MIN,
};

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Heap order plus index consistency: every tree entry's weight dominates
    /// its parent's, and every live insertion record points back at its slot.
    fn check<D: Copy>(heap: &IndexedHeap<D>) {
        for slot in 2..heap.tree.len() {
            assert!(
                heap.tree[slot].weight >= heap.tree[slot >> 1].weight,
                "heap order violated at slot {}",
                slot
            );
        }
        for slot in 1..heap.tree.len() {
            let insertion = &heap.insertions[heap.tree[slot].insertion as usize];
            assert_eq!(insertion.slot as usize, slot);
            assert_eq!(insertion.weight, heap.tree[slot].weight);
        }
    }

    #[test]
    fn insert_and_delete_min_sorts() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let mut heap: IndexedHeap<()> = IndexedHeap::dense(256);
            let n = rng.gen_range(1..=200usize);
            for id in 0..n as u32 {
                heap.insert(id, rng.gen_range(0..1000), ());
                check(&heap);
            }
            assert_eq!(heap.len(), n);
            let mut previous = i32::MIN;
            while !heap.is_empty() {
                let weight = heap.min_key();
                let id = heap.delete_min();
                assert!(weight >= previous, "delete_min out of order");
                assert!(heap.was_removed(id));
                assert_eq!(heap.key(id), weight);
                previous = weight;
            }
        }
    }

    #[test]
    fn decrease_key_reorders() {
        let mut heap: IndexedHeap<u32> = IndexedHeap::dense(16);
        heap.insert(3, 30, 103);
        heap.insert(5, 50, 105);
        heap.insert(9, 90, 109);
        assert_eq!(heap.min(), 3);

        heap.decrease_key(9, 10);
        check(&heap);
        assert_eq!(heap.min(), 9);
        assert_eq!(heap.min_key(), 10);
        assert_eq!(*heap.data(9), 109);

        // Equal weight is allowed.
        heap.decrease_key(9, 10);
        assert_eq!(heap.min_key(), 10);

        assert_eq!(heap.delete_min(), 9);
        assert_eq!(heap.delete_min(), 3);
        assert_eq!(heap.delete_min(), 5);
        assert!(heap.is_empty());
    }

    #[test]
    fn removed_elements_stay_queryable() {
        let mut heap: IndexedHeap<&str> = IndexedHeap::dense(8);
        heap.insert(2, 20, "two");
        heap.insert(4, 40, "four");

        assert_eq!(heap.delete_min(), 2);
        assert!(heap.was_inserted(2));
        assert!(heap.was_removed(2));
        assert!(!heap.was_removed(4));
        assert_eq!(heap.key(2), 20);
        assert_eq!(*heap.data(2), "two");

        heap.set_removed_key(2, 5);
        assert_eq!(heap.key(2), 5);
        *heap.data_mut(2) = "ghost";
        assert_eq!(*heap.data(2), "ghost");
        // The tree never saw the overwrite.
        assert_eq!(heap.min(), 4);
        check(&heap);
    }

    #[test]
    fn delete_all_keeps_records() {
        let mut heap: IndexedHeap<u32> = IndexedHeap::dense(32);
        for id in 0..10 {
            heap.insert(id, (10 - id) as i32, id);
        }
        heap.delete_all();
        assert!(heap.is_empty());
        for id in 0..10 {
            assert!(heap.was_inserted(id));
            assert!(heap.was_removed(id));
            assert_eq!(heap.key(id), (10 - id) as i32);
            assert_eq!(*heap.data(id), id);
        }
        assert!(!heap.was_inserted(10));
    }

    #[test]
    fn clear_resets_session() {
        let mut heap: IndexedHeap<()> = IndexedHeap::dense(8);
        heap.insert(1, 10, ());
        heap.insert(2, 20, ());
        heap.delete_min();
        heap.clear();
        assert!(heap.is_empty());
        assert!(!heap.was_inserted(1));
        assert!(!heap.was_inserted(2));
        // Reuse after clear; stale dense index entries must not leak through.
        heap.insert(2, 7, ());
        assert!(heap.was_inserted(2));
        assert!(!heap.was_inserted(1));
        assert_eq!(heap.min(), 2);
        assert_eq!(heap.min_key(), 7);
    }

    #[test]
    fn sparse_matches_dense() {
        let mut rng = StdRng::seed_from_u64(99);
        let mut dense: IndexedHeap<u32> = IndexedHeap::dense(1 << 20);
        let mut sparse: IndexedHeap<u32> = IndexedHeap::sparse();
        // Spread ids far apart; the dense array still covers them, the sparse
        // map never allocates for the gaps.
        let ids: Vec<u32> = (0..300).map(|i| i * 3001).collect();
        for &id in &ids {
            let weight = rng.gen_range(0..10_000);
            dense.insert(id, weight, id);
            sparse.insert(id, weight, id);
        }
        for _ in 0..100 {
            assert_eq!(dense.min(), sparse.min());
            assert_eq!(dense.min_key(), sparse.min_key());
            assert_eq!(dense.delete_min(), sparse.delete_min());
        }
        for &id in &ids {
            assert_eq!(dense.was_removed(id), sparse.was_removed(id));
            assert_eq!(dense.key(id), sparse.key(id));
        }
    }
}
