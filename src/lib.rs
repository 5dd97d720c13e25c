//! turn-route: turn-aware shortest-path queries over contraction-hierarchy
//! road graphs.
//!
//! Query states are oriented edges, not nodes: "at node `n`, arrived (or
//! about to depart) via original-edge slot `i`". That is what makes turn
//! penalties and turn restrictions composable along the search, since the
//! cost of leaving a node depends on how it was entered.
//!
//! Components:
//! - `heap`: indexed binary min-heap with `decrease_key`, removal tests and
//!   payload lookup by element id, the backbone of both search directions
//! - `graph`: the read-only graph surface the engine consumes, plus a flat
//!   CSR implementation and its builder
//! - `query`: bidirectional (and reference unidirectional) search with
//!   turn-penalty composition and stall-on-demand pruning
//! - `validate`: randomized agreement checks between the two searches
//!
//! Key principle: the graph is immutable during a query; each query engine
//! owns its heaps, so independent engines may run on independent threads
//! over one shared graph without synchronisation.

pub mod graph;
pub mod heap;
pub mod query;
pub mod validate;

pub use graph::{CsrTurnGraph, EdgeData, TurnGraph, TurnGraphBuilder, RESTRICTED_TURN};
pub use heap::{IndexStorage, IndexedHeap};
pub use query::{Path, QueryStats, TurnQuery, NO_PATH};
