//! Turn-aware point-to-point queries over a CH turn graph.
//!
//! Search states are oriented edges: "standing at node `n`, having arrived
//! (or about to depart) via original-edge slot `local`". Both directions run
//! Dijkstra over those states with turn-penalty composition, meeting at
//! nodes; the forward heap keys states by arrival slots, the backward heap
//! by departure slots, and both use the shared per-node id blocks of the
//! graph's original-edge numbering.
//!
//! The searches are single-shot: call [`TurnQuery::clear`] between queries.
//! The heaps, the stall queue and their allocations are reused across
//! queries.

use std::collections::VecDeque;

use crate::graph::{TurnGraph, RESTRICTED_TURN};
use crate::heap::IndexedHeap;

/// Distance returned when no path connects the seeds.
pub const NO_PATH: i32 = i32::MAX;

/// Per-state search record: parent chain, position, stall mark.
#[derive(Debug, Clone, Copy)]
struct SearchEntry {
    /// Original-edge key of the predecessor state in the same heap; `None`
    /// at a seed.
    parent: Option<u32>,
    /// Stored edge traversed to reach this state.
    parent_edge: u32,
    /// Node the state resides at.
    node: u32,
    /// Local index within the node's original-edge block.
    local: u8,
    /// Proven sub-optimal; must not relax further.
    stalled: bool,
}

/// Best known meeting of the two searches. `inward` is the forward-heap
/// state, `outward` the backward-heap state.
#[derive(Debug, Clone, Copy)]
struct Middle {
    inward: u32,
    outward: u32,
}

#[derive(Debug, Clone, Copy)]
struct StallItem {
    node: u32,
    local: u8,
    distance: i32,
}

/// The forward/backward asymmetry of one settling step: which direction bit
/// an edge must carry, the argument order of the penalty lookup, which
/// degree bounds the meeting and stall scans, and the in/out assignment of
/// the meeting record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

impl Direction {
    #[inline]
    fn opposite(self) -> Direction {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }

    #[inline]
    fn allows(self, forward: bool, backward: bool) -> bool {
        match self {
            Direction::Forward => forward,
            Direction::Backward => backward,
        }
    }

    /// Turn cost between the settled state's slot and a candidate slot; the
    /// backward search reads the table transposed.
    #[inline]
    fn penalty<G: TurnGraph>(self, graph: &G, node: u32, state_local: u8, other_local: u8) -> u8 {
        match self {
            Direction::Forward => graph.penalty(node, state_local, other_local),
            Direction::Backward => graph.penalty(node, other_local, state_local),
        }
    }

    /// Slot count the meeting scan enumerates: the opposite heap's
    /// coordinate space at this node.
    #[inline]
    fn meeting_degree<G: TurnGraph>(self, graph: &G, node: u32) -> u8 {
        match self {
            Direction::Forward => graph.original_out_degree(node),
            Direction::Backward => graph.original_in_degree(node),
        }
    }

    /// Slot count the stall scan enumerates: this heap's own coordinate
    /// space at a neighbouring node.
    #[inline]
    fn stall_degree<G: TurnGraph>(self, graph: &G, node: u32) -> u8 {
        match self {
            Direction::Forward => graph.original_in_degree(node),
            Direction::Backward => graph.original_out_degree(node),
        }
    }

    #[inline]
    fn meeting(self, settled: u32, opposite: u32) -> Middle {
        match self {
            Direction::Forward => Middle {
                inward: settled,
                outward: opposite,
            },
            Direction::Backward => Middle {
                inward: opposite,
                outward: settled,
            },
        }
    }
}

/// Settled/stalled counters for one query.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryStats {
    pub forward_settled: usize,
    pub backward_settled: usize,
    pub stalled: usize,
}

/// Parent-edge chains of a finite query result: `up` walks the forward heap
/// from the meeting state back to the source seed, `down` the backward heap
/// back to the target seed. Shortcut edges are not unpacked here.
#[derive(Debug, Clone, Default)]
pub struct Path {
    pub up: Vec<u32>,
    pub down: Vec<u32>,
}

/// Bidirectional turn-aware query engine over a read-only graph.
pub struct TurnQuery<'a, G> {
    graph: &'a G,
    forward: IndexedHeap<SearchEntry>,
    backward: IndexedHeap<SearchEntry>,
    stall_queue: VecDeque<StallItem>,
    middle: Option<Middle>,
    stall_on_demand: bool,
    stats: QueryStats,
}

impl<'a, G: TurnGraph> TurnQuery<'a, G> {
    /// Query engine with stall-on-demand enabled (the production
    /// configuration).
    pub fn new(graph: &'a G) -> Self {
        Self::with_stalling(graph, true)
    }

    /// Reference configuration without the stall optimisation; explores more
    /// states but carries no assumptions about the hierarchy.
    pub fn without_stalling(graph: &'a G) -> Self {
        Self::with_stalling(graph, false)
    }

    fn with_stalling(graph: &'a G, stall_on_demand: bool) -> Self {
        let states = graph.num_original_edges();
        Self {
            graph,
            forward: IndexedHeap::dense(states),
            backward: IndexedHeap::dense(states),
            stall_queue: VecDeque::new(),
            middle: None,
            stall_on_demand,
            stats: QueryStats::default(),
        }
    }

    /// Minimum cost among paths that enter `source2` via the edge
    /// `(source, source2)` and leave `target2` via the edge
    /// `(target2, target)`, or [`NO_PATH`].
    pub fn bidir_search(&mut self, source: u32, source2: u32, target: u32, target2: u32) -> i32 {
        debug_assert!((source as usize) < self.graph.num_nodes());
        debug_assert!((source2 as usize) < self.graph.num_nodes());
        debug_assert!((target as usize) < self.graph.num_nodes());
        debug_assert!((target2 as usize) < self.graph.num_nodes());
        tracing::trace!(source, source2, target, target2, "bidirectional turn query");

        init_heap(self.graph, &mut self.forward, source, source2, Direction::Forward);
        init_heap(self.graph, &mut self.backward, target, target2, Direction::Backward);

        let mut target_distance = NO_PATH;
        if self.forward.is_empty() || self.backward.is_empty() {
            return target_distance;
        }
        if source == target2 && source2 == target {
            // Both heaps were seeded with the same oriented edge; the answer
            // is that edge alone.
            debug_assert_eq!(self.forward.min_key(), self.backward.min_key());
            return self.forward.min_key();
        }

        let stall = self.stall_on_demand;
        while self.forward.len() + self.backward.len() > 0 {
            if !self.forward.is_empty() {
                compute_step(
                    self.graph,
                    &mut self.forward,
                    &self.backward,
                    Direction::Forward,
                    stall,
                    &mut self.stall_queue,
                    &mut self.middle,
                    &mut self.stats,
                    &mut target_distance,
                );
            }
            if !self.backward.is_empty() {
                compute_step(
                    self.graph,
                    &mut self.backward,
                    &self.forward,
                    Direction::Backward,
                    stall,
                    &mut self.stall_queue,
                    &mut self.middle,
                    &mut self.stats,
                    &mut target_distance,
                );
            }
        }

        target_distance
    }

    /// Same contract as [`bidir_search`](Self::bidir_search), settling the
    /// forward heap only. Slower; serves as the reference oracle for the
    /// bidirectional search.
    pub fn unidir_search(&mut self, source: u32, source2: u32, target: u32, target2: u32) -> i32 {
        debug_assert!((source as usize) < self.graph.num_nodes());
        debug_assert!((source2 as usize) < self.graph.num_nodes());
        debug_assert!((target as usize) < self.graph.num_nodes());
        debug_assert!((target2 as usize) < self.graph.num_nodes());

        init_heap(self.graph, &mut self.forward, source, source2, Direction::Forward);
        init_heap(self.graph, &mut self.backward, target, target2, Direction::Backward);

        let mut target_distance = NO_PATH;
        if self.forward.is_empty() || self.backward.is_empty() {
            return target_distance;
        }
        if source == target2 && source2 == target {
            debug_assert_eq!(self.forward.min_key(), self.backward.min_key());
            return self.forward.min_key();
        }

        let stall = self.stall_on_demand;
        while !self.forward.is_empty() {
            compute_step(
                self.graph,
                &mut self.forward,
                &self.backward,
                Direction::Forward,
                stall,
                &mut self.stall_queue,
                &mut self.middle,
                &mut self.stats,
                &mut target_distance,
            );
        }

        target_distance
    }

    /// Fill `path` with the parent-edge chains of the last finite result.
    /// Requires that the preceding search found a path.
    pub fn get_path(&self, path: &mut Path) {
        path.up.clear();
        path.down.clear();
        let Some(middle) = self.middle else {
            debug_assert!(false, "get_path without a finite search result");
            return;
        };

        let mut cursor = Some(middle.inward);
        while let Some(state) = cursor {
            debug_assert!(self.forward.was_inserted(state));
            let entry = self.forward.data(state);
            path.up.push(entry.parent_edge);
            cursor = entry.parent;
        }

        let mut cursor = Some(middle.outward);
        while let Some(state) = cursor {
            debug_assert!(self.backward.was_inserted(state));
            let entry = self.backward.data(state);
            path.down.push(entry.parent_edge);
            cursor = entry.parent;
        }
    }

    /// Reset for the next query. Allocations are kept.
    pub fn clear(&mut self) {
        self.forward.clear();
        self.backward.clear();
        self.stall_queue.clear();
        self.middle = None;
        self.stats = QueryStats::default();
    }

    pub fn stats(&self) -> &QueryStats {
        &self.stats
    }
}

/// Seed `heap` with the oriented edge `(node, node2)`: every non-shortcut
/// stored edge at `node` that reaches `node2` in the direction's sense. The
/// resulting states reside at `node2`, weighted by the edge distance, with
/// no parent.
///
/// One pass over `node`'s list is enough. The graph stores each street in
/// both endpoint lists with the direction bits and locals mirrored (see
/// [`TurnGraph`]), so the copy at `node2` carries the same distance and
/// resolves to the same state as the copy scanned here.
fn init_heap<G: TurnGraph>(
    graph: &G,
    heap: &mut IndexedHeap<SearchEntry>,
    node: u32,
    node2: u32,
    dir: Direction,
) {
    for edge in graph.edge_range(node) {
        let data = graph.edge_data(edge);
        if !dir.allows(data.forward, data.backward) || data.shortcut || graph.target(edge) != node2
        {
            continue;
        }
        let local = graph.original_edge_target(edge);
        let state = graph.first_original_edge(node2) + local as u32;
        let entry = SearchEntry {
            parent: None,
            parent_edge: edge,
            node: node2,
            local,
            stalled: false,
        };
        if !heap.was_inserted(state) {
            heap.insert(state, data.distance as i32, entry);
        } else if (data.distance as i32) < heap.key(state) {
            heap.decrease_key(state, data.distance as i32);
            *heap.data_mut(state) = entry;
        }
    }
}

/// Settle one state of `own`: check for meetings against `other`, cut the
/// search off once the frontier passes the best known meeting, otherwise
/// relax outgoing edges with turn-penalty composition and, when enabled,
/// stall states that a settled neighbour proves sub-optimal.
#[allow(clippy::too_many_arguments)]
fn compute_step<G: TurnGraph>(
    graph: &G,
    own: &mut IndexedHeap<SearchEntry>,
    other: &IndexedHeap<SearchEntry>,
    dir: Direction,
    stall_on_demand: bool,
    stall_queue: &mut VecDeque<StallItem>,
    middle: &mut Option<Middle>,
    stats: &mut QueryStats,
    target_distance: &mut i32,
) {
    let settled = own.delete_min();
    let distance = own.key(settled);
    // Copy, not borrow: inserts below may reallocate the record store.
    let entry = *own.data(settled);
    match dir {
        Direction::Forward => stats.forward_settled += 1,
        Direction::Backward => stats.backward_settled += 1,
    }

    if stall_on_demand && entry.stalled {
        return;
    }

    // Meeting scan: every opposite-heap state at this node closes a path.
    let first = graph.first_original_edge(entry.node);
    for opposite_local in 0..dir.meeting_degree(graph, entry.node) {
        let opposite = first + opposite_local as u32;
        if other.was_inserted(opposite) && !other.data(opposite).stalled {
            let penalty = dir.penalty(graph, entry.node, entry.local, opposite_local);
            if penalty == RESTRICTED_TURN {
                continue;
            }
            let met = other.key(opposite) + penalty as i32 + distance;
            if met < *target_distance {
                tracing::trace!(node = entry.node, distance = met, "meeting improved");
                *middle = Some(dir.meeting(settled, opposite));
                *target_distance = met;
            }
        }
    }

    // Frontier beyond the best meeting cannot improve it.
    if distance > *target_distance {
        own.delete_all();
        return;
    }

    for edge in graph.edge_range(entry.node) {
        let data = graph.edge_data(edge);
        let to = graph.target(edge);
        debug_assert!(data.distance > 0);
        let first_to = graph.first_original_edge(to);
        let local_to = graph.original_edge_target(edge);

        if stall_on_demand && dir.opposite().allows(data.forward, data.backward) {
            // Does some state already seen at `to` reach this node more
            // cheaply through the reverse of this edge?
            let mut shorter = i32::MAX;
            for inward in 0..dir.stall_degree(graph, to) {
                let candidate = first_to + inward as u32;
                if own.was_inserted(candidate) {
                    let penalty = dir.penalty(graph, to, inward, local_to);
                    if penalty == RESTRICTED_TURN {
                        continue;
                    }
                    shorter = shorter.min(own.key(candidate) + penalty as i32 + data.distance as i32);
                }
            }
            if shorter < distance {
                tracing::trace!(node = entry.node, shorter, "stalling settled state");
                // The settled element is out of the tree; its label can be
                // overwritten in place.
                own.set_removed_key(settled, shorter);
                own.data_mut(settled).stalled = true;
                stats.stalled += 1;
                stall_queue.push_back(StallItem {
                    node: entry.node,
                    local: entry.local,
                    distance: shorter,
                });
                stall_bfs(graph, own, dir, stall_queue, stats);
                break;
            }
        }

        if dir.allows(data.forward, data.backward) {
            let penalty =
                dir.penalty(graph, entry.node, entry.local, graph.original_edge_source(edge));
            if penalty == RESTRICTED_TURN {
                continue;
            }
            let state = first_to + local_to as u32;
            let next = SearchEntry {
                parent: Some(settled),
                parent_edge: edge,
                node: to,
                local: local_to,
                stalled: false,
            };
            let to_distance = distance + penalty as i32 + data.distance as i32;
            if !own.was_inserted(state) {
                own.insert(state, to_distance, next);
            } else if to_distance <= own.key(state) {
                // `<=` on purpose: refreshes the parent chain and clears the
                // stall mark of a revived state.
                if own.was_removed(state) {
                    own.set_removed_key(state, to_distance);
                } else {
                    own.decrease_key(state, to_distance);
                }
                *own.data_mut(state) = next;
            }
        }
    }
}

/// Breadth-first stall propagation: push the proven-sub-optimal label along
/// the search direction, lowering and stalling every state it improves.
/// Settled states are updated in place, queued states through a decrease.
fn stall_bfs<G: TurnGraph>(
    graph: &G,
    own: &mut IndexedHeap<SearchEntry>,
    dir: Direction,
    queue: &mut VecDeque<StallItem>,
    stats: &mut QueryStats,
) {
    while let Some(item) = queue.pop_front() {
        for edge in graph.edge_range(item.node) {
            let data = graph.edge_data(edge);
            if !dir.allows(data.forward, data.backward) {
                continue;
            }
            let to = graph.target(edge);
            let state = graph.first_original_edge(to) + graph.original_edge_target(edge) as u32;
            if !own.was_inserted(state) || own.data(state).stalled {
                continue;
            }
            let penalty =
                dir.penalty(graph, item.node, item.local, graph.original_edge_source(edge));
            if penalty == RESTRICTED_TURN {
                continue;
            }
            let to_distance = item.distance + penalty as i32 + data.distance as i32;
            if to_distance < own.key(state) {
                if own.was_removed(state) {
                    own.set_removed_key(state, to_distance);
                } else {
                    own.decrease_key(state, to_distance);
                }
                own.data_mut(state).stalled = true;
                stats.stalled += 1;
                queue.push_back(StallItem {
                    node: to,
                    local: graph.original_edge_target(edge),
                    distance: to_distance,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{CsrTurnGraph, TurnGraphBuilder};

    fn diamond(penalty_at_1: Option<u8>) -> CsrTurnGraph {
        let mut builder = TurnGraphBuilder::new(4);
        let e0 = builder.one_way(0, 1, 10);
        let e1 = builder.one_way(1, 2, 20);
        builder.one_way(0, 3, 12);
        builder.one_way(3, 2, 25);
        if let Some(p) = penalty_at_1 {
            builder.turn_penalty(1, e0, e1, p);
        }
        builder.finish().unwrap()
    }

    #[test]
    fn trivial_identity_returns_seed_cost() {
        let graph = diamond(None);
        let mut query = TurnQuery::new(&graph);
        assert_eq!(query.bidir_search(0, 1, 1, 0), 10);
        query.clear();
        assert_eq!(query.unidir_search(0, 1, 1, 0), 10);
    }

    #[test]
    fn unseedable_query_has_no_path() {
        let graph = diamond(None);
        let mut query = TurnQuery::new(&graph);
        // No edge from 2 to 0 exists, so the forward heap stays empty.
        assert_eq!(query.bidir_search(2, 0, 2, 1), NO_PATH);
    }

    #[test]
    fn restricted_turn_blocks_the_only_path() {
        let graph = diamond(Some(RESTRICTED_TURN));
        let mut query = TurnQuery::new(&graph);
        // Exiting via 1→2 requires the forbidden turn at node 1.
        assert_eq!(query.bidir_search(0, 1, 2, 1), NO_PATH);
        query.clear();
        assert_eq!(query.unidir_search(0, 1, 2, 1), NO_PATH);
    }

    #[test]
    fn turn_penalty_is_added_once() {
        let graph = diamond(Some(5));
        let mut query = TurnQuery::new(&graph);
        assert_eq!(query.bidir_search(0, 1, 2, 1), 35);
        query.clear();
        assert_eq!(query.unidir_search(0, 1, 2, 1), 35);
    }

    #[test]
    fn clear_resets_between_queries() {
        let graph = diamond(Some(5));
        let mut query = TurnQuery::new(&graph);
        assert_eq!(query.bidir_search(0, 1, 2, 1), 35);
        assert!(query.stats().forward_settled > 0);
        query.clear();
        assert_eq!(query.stats().forward_settled, 0);
        assert_eq!(query.bidir_search(0, 1, 2, 1), 35);
    }

    #[test]
    fn stall_prunes_expensive_arrival() {
        // Two-way streets, zero penalties. The direct street 1–3 is far more
        // expensive than the detour over node 2, so the state arriving at 3
        // via the direct street settles late and gets stalled by the
        // already-settled detour states. A long exit street keeps the
        // meeting distance high enough that the expensive state still
        // settles.
        let mut builder = TurnGraphBuilder::new(5);
        builder.two_way(0, 1, 10);
        builder.two_way(1, 3, 100);
        builder.two_way(1, 2, 10);
        builder.two_way(2, 3, 10);
        builder.two_way(3, 4, 1000);
        let graph = builder.finish().unwrap();

        let mut stalling = TurnQuery::new(&graph);
        let with_stall = stalling.bidir_search(0, 1, 4, 3);
        assert_eq!(with_stall, 10 + 10 + 10 + 1000);
        assert!(stalling.stats().stalled > 0, "expected the expensive arrival to stall");

        let mut plain = TurnQuery::without_stalling(&graph);
        assert_eq!(plain.bidir_search(0, 1, 4, 3), with_stall);
        plain.clear();
        assert_eq!(plain.unidir_search(0, 1, 4, 3), with_stall);
    }

    #[test]
    fn decrease_key_reroutes_parent_chain() {
        // Entering node 1 directly makes the exit street expensive (turn
        // penalty 10); looping 1→3→1 re-enters on a street with a free turn.
        // The loop is cheaper overall, so the exit state is decreased after
        // its first relaxation and the parent chain must follow the loop.
        let mut builder = TurnGraphBuilder::new(4);
        let s = builder.one_way(0, 1, 10);
        let q = builder.one_way(1, 3, 1);
        let r = builder.one_way(3, 1, 5);
        let p = builder.one_way(1, 2, 5);
        builder.turn_penalty(1, s, p, 10);
        let graph = builder.finish().unwrap();

        let mut query = TurnQuery::new(&graph);
        // 10 + 1 + 5 + 5 beats 10 + penalty 10 + 5.
        assert_eq!(query.bidir_search(0, 1, 2, 1), 21);

        let mut path = Path::default();
        query.get_path(&mut path);
        let mut streets: Vec<u32> = path
            .up
            .iter()
            .chain(path.down.iter())
            .map(|&e| graph.edge_data(e).id)
            .collect();
        streets.sort_unstable();
        assert_eq!(streets, vec![s, q, r, p]);

        query.clear();
        assert_eq!(query.unidir_search(0, 1, 2, 1), 21);
    }
}
