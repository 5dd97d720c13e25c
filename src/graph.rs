//! Turn-expanded CH road graph surface and a flat CSR implementation.
//!
//! The query engine only needs read access: stored-edge adjacency, per-edge
//! attributes, the original-edge numbering and the turn-penalty table. That
//! surface is the [`TurnGraph`] trait; [`CsrTurnGraph`] is the in-memory
//! implementation, built through [`TurnGraphBuilder`].
//!
//! Original-edge numbering: node `n` owns the id block
//! `first_original_edge(n) .. first_original_edge(n) + max(in_deg, out_deg)`.
//! A street occupies one slot of that block at each endpoint; for a two-way
//! street the slot serves as both the arrival and the departure coordinate,
//! which is what lets forward states (arrival slots) and backward states
//! (departure slots) share the block.

use std::ops::Range;

use anyhow::{bail, ensure, Result};
use serde::{Deserialize, Serialize};

/// Penalty value marking a forbidden turn. Wire constant of the penalty
/// table; every other value is an additive weight.
pub const RESTRICTED_TURN: u8 = 255;

/// Attributes of one stored edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeData {
    pub distance: u32,
    /// Traversable from the stored source to the stored target.
    pub forward: bool,
    /// Traversable from the stored target to the stored source.
    pub backward: bool,
    pub shortcut: bool,
    /// Street id, shared by the two stored copies of a street.
    pub id: u32,
}

/// Read-only capability set the query engine consumes. The graph is
/// immutable for the duration of a query.
///
/// Implementations must store every street in both endpoints' edge lists,
/// with the direction bits and the endpoint locals mirrored between the two
/// copies. The engine scans a single node's list and relies on seeing both
/// orientations of every incident street there.
pub trait TurnGraph {
    fn num_nodes(&self) -> usize;
    /// Total size of all original-edge id blocks; sizes the search heaps.
    fn num_original_edges(&self) -> usize;
    /// Stored edges leaving `node`, as a range of edge ids.
    fn edge_range(&self, node: u32) -> Range<u32>;
    fn target(&self, edge: u32) -> u32;
    fn edge_data(&self, edge: u32) -> EdgeData;
    /// Base of the node's original-edge id block.
    fn first_original_edge(&self, node: u32) -> u32;
    /// Local original-edge index at the edge's stored source node.
    fn original_edge_source(&self, edge: u32) -> u8;
    /// Local original-edge index at the edge's stored target node.
    fn original_edge_target(&self, edge: u32) -> u8;
    fn original_in_degree(&self, node: u32) -> u8;
    fn original_out_degree(&self, node: u32) -> u8;
    /// Turn cost at `node` from arrival slot `in_local` to departure slot
    /// `out_local`; `RESTRICTED_TURN` forbids the turn.
    fn penalty(&self, node: u32, in_local: u8, out_local: u8) -> u8;
}

/// Turn-expanded graph in flat CSR arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrTurnGraph {
    n_original_edges: u32,
    /// CSR offsets over stored edges, `n_nodes + 1` entries.
    offsets: Vec<u32>,
    targets: Vec<u32>,
    edges: Vec<EdgeData>,
    source_local: Vec<u8>,
    target_local: Vec<u8>,
    first_original: Vec<u32>,
    in_degree: Vec<u8>,
    out_degree: Vec<u8>,
    /// Per-node square penalty matrix (block × block), prefix-addressed.
    penalty_offsets: Vec<u32>,
    penalties: Vec<u8>,
}

impl CsrTurnGraph {
    #[inline]
    fn block(&self, node: u32) -> u8 {
        self.in_degree[node as usize].max(self.out_degree[node as usize])
    }
}

impl TurnGraph for CsrTurnGraph {
    #[inline]
    fn num_nodes(&self) -> usize {
        self.first_original.len()
    }

    #[inline]
    fn num_original_edges(&self) -> usize {
        self.n_original_edges as usize
    }

    #[inline]
    fn edge_range(&self, node: u32) -> Range<u32> {
        self.offsets[node as usize]..self.offsets[node as usize + 1]
    }

    #[inline]
    fn target(&self, edge: u32) -> u32 {
        self.targets[edge as usize]
    }

    #[inline]
    fn edge_data(&self, edge: u32) -> EdgeData {
        self.edges[edge as usize]
    }

    #[inline]
    fn first_original_edge(&self, node: u32) -> u32 {
        self.first_original[node as usize]
    }

    #[inline]
    fn original_edge_source(&self, edge: u32) -> u8 {
        self.source_local[edge as usize]
    }

    #[inline]
    fn original_edge_target(&self, edge: u32) -> u8 {
        self.target_local[edge as usize]
    }

    #[inline]
    fn original_in_degree(&self, node: u32) -> u8 {
        self.in_degree[node as usize]
    }

    #[inline]
    fn original_out_degree(&self, node: u32) -> u8 {
        self.out_degree[node as usize]
    }

    #[inline]
    fn penalty(&self, node: u32, in_local: u8, out_local: u8) -> u8 {
        let block = self.block(node) as usize;
        debug_assert!((in_local as usize) < block && (out_local as usize) < block);
        let base = self.penalty_offsets[node as usize] as usize;
        self.penalties[base + in_local as usize * block + out_local as usize]
    }
}

#[derive(Debug, Clone, Copy)]
enum StreetKind {
    OneWay,
    TwoWay,
    Shortcut {
        forward: bool,
        backward: bool,
        source_local: u8,
        target_local: u8,
    },
}

#[derive(Debug, Clone, Copy)]
struct Street {
    from: u32,
    to: u32,
    distance: u32,
    kind: StreetKind,
}

#[derive(Debug, Clone, Copy)]
struct PendingPenalty {
    via: u32,
    in_street: u32,
    out_street: u32,
    penalty: u8,
}

/// Builds a [`CsrTurnGraph`] from streets and turn penalties.
///
/// Every street is stored twice, once in each endpoint's adjacency list with
/// the direction bits mirrored, so both search directions only ever scan one
/// list. Local slot assignment and all input validation happen in
/// [`finish`](TurnGraphBuilder::finish).
#[derive(Debug, Default)]
pub struct TurnGraphBuilder {
    n_nodes: u32,
    streets: Vec<Street>,
    pending: Vec<PendingPenalty>,
}

impl TurnGraphBuilder {
    pub fn new(n_nodes: u32) -> Self {
        Self {
            n_nodes,
            streets: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Street traversable only from `from` to `to`. Returns the street id.
    pub fn one_way(&mut self, from: u32, to: u32, distance: u32) -> u32 {
        self.push(Street {
            from,
            to,
            distance,
            kind: StreetKind::OneWay,
        })
    }

    /// Street traversable in both directions. Returns the street id.
    pub fn two_way(&mut self, from: u32, to: u32, distance: u32) -> u32 {
        self.push(Street {
            from,
            to,
            distance,
            kind: StreetKind::TwoWay,
        })
    }

    /// Shortcut edge produced by contraction. Shortcuts do not own slots in
    /// the original-edge blocks; `source_local`/`target_local` name the
    /// endpoint slots of the first and last original edge of the unpacked
    /// path.
    pub fn shortcut(
        &mut self,
        from: u32,
        to: u32,
        distance: u32,
        forward: bool,
        backward: bool,
        source_local: u8,
        target_local: u8,
    ) -> u32 {
        self.push(Street {
            from,
            to,
            distance,
            kind: StreetKind::Shortcut {
                forward,
                backward,
                source_local,
                target_local,
            },
        })
    }

    /// Cost of turning at `via` from street `in_street` onto `out_street`.
    /// Pass [`RESTRICTED_TURN`] to forbid the turn. Validated in `finish`.
    pub fn turn_penalty(&mut self, via: u32, in_street: u32, out_street: u32, penalty: u8) {
        self.pending.push(PendingPenalty {
            via,
            in_street,
            out_street,
            penalty,
        });
    }

    fn push(&mut self, street: Street) -> u32 {
        let id = self.streets.len() as u32;
        self.streets.push(street);
        id
    }

    pub fn finish(self) -> Result<CsrTurnGraph> {
        let n = self.n_nodes as usize;

        for (id, street) in self.streets.iter().enumerate() {
            ensure!(
                street.from < self.n_nodes && street.to < self.n_nodes,
                "street {} endpoints ({}, {}) out of node range {}",
                id,
                street.from,
                street.to,
                self.n_nodes
            );
            ensure!(street.from != street.to, "street {} is a self loop", id);
            ensure!(street.distance > 0, "street {} has zero distance", id);
        }

        // Count slots per node: two-way incidences share one slot for both
        // coordinate spaces, one-way incidences take a slot on one side only.
        let mut shared = vec![0u32; n];
        let mut extra_in = vec![0u32; n];
        let mut extra_out = vec![0u32; n];
        for street in &self.streets {
            match street.kind {
                StreetKind::OneWay => {
                    extra_out[street.from as usize] += 1;
                    extra_in[street.to as usize] += 1;
                }
                StreetKind::TwoWay => {
                    shared[street.from as usize] += 1;
                    shared[street.to as usize] += 1;
                }
                StreetKind::Shortcut { .. } => {}
            }
        }

        let mut in_degree = vec![0u8; n];
        let mut out_degree = vec![0u8; n];
        for node in 0..n {
            let ins = shared[node] + extra_in[node];
            let outs = shared[node] + extra_out[node];
            ensure!(
                ins <= u8::MAX as u32 && outs <= u8::MAX as u32,
                "node {} exceeds the {} original-edge slots per side",
                node,
                u8::MAX
            );
            in_degree[node] = ins as u8;
            out_degree[node] = outs as u8;
        }

        // Assign slots: shared slots first, then the one-way remainder of
        // each coordinate space.
        let mut next_shared = vec![0u32; n];
        let mut next_in = shared.clone();
        let mut next_out = shared.clone();
        let mut local_at_from = vec![0u8; self.streets.len()];
        let mut local_at_to = vec![0u8; self.streets.len()];
        for (id, street) in self.streets.iter().enumerate() {
            let (from, to) = (street.from as usize, street.to as usize);
            match street.kind {
                StreetKind::OneWay => {
                    local_at_from[id] = next_out[from] as u8;
                    next_out[from] += 1;
                    local_at_to[id] = next_in[to] as u8;
                    next_in[to] += 1;
                }
                StreetKind::TwoWay => {
                    local_at_from[id] = next_shared[from] as u8;
                    next_shared[from] += 1;
                    local_at_to[id] = next_shared[to] as u8;
                    next_shared[to] += 1;
                }
                StreetKind::Shortcut {
                    source_local,
                    target_local,
                    ..
                } => {
                    local_at_from[id] = source_local;
                    local_at_to[id] = target_local;
                }
            }
        }

        // Block layout and penalty matrices.
        let mut first_original = vec![0u32; n];
        let mut penalty_offsets = vec![0u32; n + 1];
        let mut next_original = 0u32;
        let mut next_penalty = 0u32;
        for node in 0..n {
            first_original[node] = next_original;
            penalty_offsets[node] = next_penalty;
            let block = in_degree[node].max(out_degree[node]) as u32;
            next_original += block;
            next_penalty += block * block;
        }
        penalty_offsets[n] = next_penalty;
        let mut penalties = vec![0u8; next_penalty as usize];

        for (id, street) in self.streets.iter().enumerate() {
            if let StreetKind::Shortcut { .. } = street.kind {
                let from_block = in_degree[street.from as usize].max(out_degree[street.from as usize]);
                let to_block = in_degree[street.to as usize].max(out_degree[street.to as usize]);
                ensure!(
                    local_at_from[id] < from_block && local_at_to[id] < to_block,
                    "shortcut {} endpoint locals exceed the nodes' slot blocks",
                    id
                );
            }
        }

        for entry in &self.pending {
            ensure!(
                entry.via < self.n_nodes,
                "turn penalty via node {} out of range",
                entry.via
            );
            let in_local = self.arrival_slot(entry.in_street, entry.via, &local_at_from, &local_at_to)?;
            let out_local =
                self.departure_slot(entry.out_street, entry.via, &local_at_from, &local_at_to)?;
            let block = in_degree[entry.via as usize].max(out_degree[entry.via as usize]) as usize;
            let base = penalty_offsets[entry.via as usize] as usize;
            penalties[base + in_local as usize * block + out_local as usize] = entry.penalty;
        }

        // Stored edges: each street lands in both endpoint lists with the
        // direction bits and locals mirrored.
        struct Stored {
            from: u32,
            to: u32,
            data: EdgeData,
            source_local: u8,
            target_local: u8,
        }
        let mut stored = Vec::with_capacity(self.streets.len() * 2);
        for (id, street) in self.streets.iter().enumerate() {
            let (forward, backward, shortcut) = match street.kind {
                StreetKind::OneWay => (true, false, false),
                StreetKind::TwoWay => (true, true, false),
                StreetKind::Shortcut {
                    forward, backward, ..
                } => (forward, backward, true),
            };
            let data = EdgeData {
                distance: street.distance,
                forward,
                backward,
                shortcut,
                id: id as u32,
            };
            stored.push(Stored {
                from: street.from,
                to: street.to,
                data,
                source_local: local_at_from[id],
                target_local: local_at_to[id],
            });
            stored.push(Stored {
                from: street.to,
                to: street.from,
                data: EdgeData {
                    forward: backward,
                    backward: forward,
                    ..data
                },
                source_local: local_at_to[id],
                target_local: local_at_from[id],
            });
        }
        stored.sort_by_key(|edge| edge.from);

        let mut offsets = vec![0u32; n + 1];
        for edge in &stored {
            offsets[edge.from as usize + 1] += 1;
        }
        for node in 0..n {
            offsets[node + 1] += offsets[node];
        }

        Ok(CsrTurnGraph {
            n_original_edges: next_original,
            offsets,
            targets: stored.iter().map(|edge| edge.to).collect(),
            edges: stored.iter().map(|edge| edge.data).collect(),
            source_local: stored.iter().map(|edge| edge.source_local).collect(),
            target_local: stored.iter().map(|edge| edge.target_local).collect(),
            first_original,
            in_degree,
            out_degree,
            penalty_offsets,
            penalties,
        })
    }

    /// Slot under which `street` arrives at `via`, or an error if it cannot.
    fn arrival_slot(
        &self,
        street: u32,
        via: u32,
        local_at_from: &[u8],
        local_at_to: &[u8],
    ) -> Result<u8> {
        let Some(s) = self.streets.get(street as usize) else {
            bail!("turn penalty references unknown street {}", street);
        };
        match s.kind {
            StreetKind::OneWay if s.to == via => Ok(local_at_to[street as usize]),
            StreetKind::TwoWay if s.from == via => Ok(local_at_from[street as usize]),
            StreetKind::TwoWay if s.to == via => Ok(local_at_to[street as usize]),
            StreetKind::Shortcut { .. } => {
                bail!("turn penalties attach to original edges, not shortcut {}", street)
            }
            _ => bail!("street {} cannot arrive at node {}", street, via),
        }
    }

    /// Slot under which `street` departs `via`, or an error if it cannot.
    fn departure_slot(
        &self,
        street: u32,
        via: u32,
        local_at_from: &[u8],
        local_at_to: &[u8],
    ) -> Result<u8> {
        let Some(s) = self.streets.get(street as usize) else {
            bail!("turn penalty references unknown street {}", street);
        };
        match s.kind {
            StreetKind::OneWay if s.from == via => Ok(local_at_from[street as usize]),
            StreetKind::TwoWay if s.from == via => Ok(local_at_from[street as usize]),
            StreetKind::TwoWay if s.to == via => Ok(local_at_to[street as usize]),
            StreetKind::Shortcut { .. } => {
                bail!("turn penalties attach to original edges, not shortcut {}", street)
            }
            _ => bail!("street {} cannot depart node {}", street, via),
        }
    }
}
