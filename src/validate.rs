//! Randomized cross-checks between the two search strategies.
//!
//! The bidirectional search must agree with the unidirectional reference on
//! every query; that is the primary correctness oracle. Stall-on-demand is
//! checked separately on zero-penalty graphs, where its domination argument
//! holds regardless of the hierarchy: with no turn costs, a cheaper arrival
//! at a node dominates every continuation, so pruning must not change any
//! distance. On graphs with turn costs the stall heuristic assumes a
//! contracted hierarchy, so the agreement checks there run with stalling
//! disabled.

use anyhow::{bail, ensure, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::graph::{CsrTurnGraph, TurnGraph, TurnGraphBuilder, RESTRICTED_TURN};
use crate::query::{Path, TurnQuery, NO_PATH};

/// Shape of a generated random graph.
#[derive(Debug, Clone)]
pub struct RandomGraphConfig {
    pub nodes: u32,
    pub streets: usize,
    /// Probability that a street is two-way.
    pub two_way_share: f64,
    /// Probability that a sampled turn is forbidden.
    pub restricted_share: f64,
    /// Upper bound for sampled turn penalties; 0 leaves the whole penalty
    /// table at zero.
    pub max_penalty: u8,
}

/// Outcome of an agreement run.
#[derive(Debug, Clone, Copy)]
pub struct AgreementReport {
    pub queries: usize,
    pub reachable: usize,
}

/// Generate a random turn graph. Per-node street count is capped so the
/// original-edge blocks stay small.
pub fn random_graph(config: &RandomGraphConfig, rng: &mut StdRng) -> Result<CsrTurnGraph> {
    ensure!(config.nodes >= 2, "need at least two nodes");
    let mut builder = TurnGraphBuilder::new(config.nodes);
    let mut degree = vec![0u32; config.nodes as usize];
    // (street, from, to, two_way)
    let mut streets: Vec<(u32, u32, u32, bool)> = Vec::new();

    let mut attempts = 0;
    while streets.len() < config.streets && attempts < config.streets * 20 {
        attempts += 1;
        let from = rng.gen_range(0..config.nodes);
        let to = rng.gen_range(0..config.nodes);
        if from == to || degree[from as usize] >= 6 || degree[to as usize] >= 6 {
            continue;
        }
        let distance = rng.gen_range(1..=100);
        let two_way = rng.gen_bool(config.two_way_share);
        let street = if two_way {
            builder.two_way(from, to, distance)
        } else {
            builder.one_way(from, to, distance)
        };
        degree[from as usize] += 1;
        degree[to as usize] += 1;
        streets.push((street, from, to, two_way));
    }

    if config.max_penalty > 0 || config.restricted_share > 0.0 {
        for via in 0..config.nodes {
            let arriving: Vec<u32> = streets
                .iter()
                .filter(|&&(_, f, t, two_way)| t == via || (two_way && f == via))
                .map(|&(s, ..)| s)
                .collect();
            let departing: Vec<u32> = streets
                .iter()
                .filter(|&&(_, f, t, two_way)| f == via || (two_way && t == via))
                .map(|&(s, ..)| s)
                .collect();
            for &in_street in &arriving {
                for &out_street in &departing {
                    if rng.gen_bool(config.restricted_share) {
                        builder.turn_penalty(via, in_street, out_street, RESTRICTED_TURN);
                    } else if config.max_penalty > 0 {
                        builder.turn_penalty(
                            via,
                            in_street,
                            out_street,
                            rng.gen_range(0..=config.max_penalty),
                        );
                    }
                }
            }
        }
    }

    builder.finish()
}

/// Run random oriented queries and require the bidirectional and the
/// unidirectional search to return the same distance every time. Finite
/// results additionally have to reconstruct to non-empty parent chains.
pub fn check_agreement<G: TurnGraph>(
    graph: &G,
    queries: usize,
    seed: u64,
    stalling: bool,
) -> Result<AgreementReport> {
    let candidates = seed_candidates(graph);
    ensure!(!candidates.is_empty(), "graph has no traversable streets");

    let mut rng = StdRng::seed_from_u64(seed);
    let mut engine = if stalling {
        TurnQuery::new(graph)
    } else {
        TurnQuery::without_stalling(graph)
    };
    let mut reference = if stalling {
        TurnQuery::new(graph)
    } else {
        TurnQuery::without_stalling(graph)
    };
    let mut path = Path::default();
    let mut reachable = 0;

    for _ in 0..queries {
        let (source, source2) = candidates[rng.gen_range(0..candidates.len())];
        let (target2, target) = candidates[rng.gen_range(0..candidates.len())];
        engine.clear();
        reference.clear();
        let bidir = engine.bidir_search(source, source2, target, target2);
        let unidir = reference.unidir_search(source, source2, target, target2);
        if bidir != unidir {
            bail!(
                "bidirectional {} and unidirectional {} disagree for ({} -> {}) ... ({} -> {})",
                bidir,
                unidir,
                source,
                source2,
                target2,
                target
            );
        }
        if bidir != NO_PATH {
            reachable += 1;
            if !(source == target2 && source2 == target) {
                engine.get_path(&mut path);
                ensure!(
                    !path.up.is_empty() && !path.down.is_empty(),
                    "finite distance {} but empty parent chain",
                    bidir
                );
            }
        }
    }

    Ok(AgreementReport { queries, reachable })
}

/// On a zero-penalty graph, stall-on-demand must not change any distance.
/// Returns the total number of states the stalling engine pruned, as
/// evidence the optimisation was actually exercised.
pub fn check_stalling<G: TurnGraph>(graph: &G, queries: usize, seed: u64) -> Result<usize> {
    let candidates = seed_candidates(graph);
    ensure!(!candidates.is_empty(), "graph has no traversable streets");

    let mut rng = StdRng::seed_from_u64(seed);
    let mut stalling = TurnQuery::new(graph);
    let mut plain = TurnQuery::without_stalling(graph);
    let mut pruned = 0;

    for _ in 0..queries {
        let (source, source2) = candidates[rng.gen_range(0..candidates.len())];
        let (target2, target) = candidates[rng.gen_range(0..candidates.len())];
        stalling.clear();
        plain.clear();
        let fast = stalling.bidir_search(source, source2, target, target2);
        let reference = plain.bidir_search(source, source2, target, target2);
        if fast != reference {
            bail!(
                "stalling changed the distance ({} vs {}) for ({} -> {}) ... ({} -> {})",
                fast,
                reference,
                source,
                source2,
                target2,
                target
            );
        }
        pruned += stalling.stats().stalled;
    }

    Ok(pruned)
}

/// Every oriented pair `(node, node2)` connected by a traversable original
/// edge; usable as either end of a query.
fn seed_candidates<G: TurnGraph>(graph: &G) -> Vec<(u32, u32)> {
    let mut candidates = Vec::new();
    for node in 0..graph.num_nodes() as u32 {
        for edge in graph.edge_range(node) {
            let data = graph.edge_data(edge);
            if data.forward && !data.shortcut {
                candidates.push((node, graph.target(edge)));
            }
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_way_graphs_with_penalties_agree() {
        let config = RandomGraphConfig {
            nodes: 40,
            streets: 90,
            two_way_share: 0.0,
            restricted_share: 0.1,
            max_penalty: 4,
        };
        for seed in 0..4 {
            let mut rng = StdRng::seed_from_u64(seed);
            let graph = random_graph(&config, &mut rng).unwrap();
            let report = check_agreement(&graph, 60, seed ^ 0x5eed, false).unwrap();
            assert_eq!(report.queries, 60);
        }
    }

    #[test]
    fn mixed_graphs_with_penalties_agree_without_stalling() {
        let config = RandomGraphConfig {
            nodes: 30,
            streets: 70,
            two_way_share: 0.5,
            restricted_share: 0.05,
            max_penalty: 6,
        };
        for seed in 0..4 {
            let mut rng = StdRng::seed_from_u64(100 + seed);
            let graph = random_graph(&config, &mut rng).unwrap();
            check_agreement(&graph, 60, seed, false).unwrap();
        }
    }

    #[test]
    fn zero_penalty_graphs_agree_with_stalling() {
        let config = RandomGraphConfig {
            nodes: 30,
            streets: 70,
            two_way_share: 0.8,
            restricted_share: 0.0,
            max_penalty: 0,
        };
        for seed in 0..4 {
            let mut rng = StdRng::seed_from_u64(200 + seed);
            let graph = random_graph(&config, &mut rng).unwrap();
            check_agreement(&graph, 60, seed, true).unwrap();
        }
    }

    #[test]
    fn stalling_preserves_zero_penalty_distances() {
        let config = RandomGraphConfig {
            nodes: 40,
            streets: 100,
            two_way_share: 1.0,
            restricted_share: 0.0,
            max_penalty: 0,
        };
        let mut pruned_total = 0;
        for seed in 0..4 {
            let mut rng = StdRng::seed_from_u64(300 + seed);
            let graph = random_graph(&config, &mut rng).unwrap();
            pruned_total += check_stalling(&graph, 60, seed).unwrap();
        }
        assert!(pruned_total > 0, "stall-on-demand never fired across all runs");
    }

    #[test]
    fn sparse_graph_reports_unreachable_pairs() {
        // Two disconnected components; most cross-component queries must
        // come back as NO_PATH, and both searches must agree on that too.
        let mut builder = TurnGraphBuilder::new(6);
        builder.one_way(0, 1, 10);
        builder.one_way(1, 2, 10);
        builder.one_way(3, 4, 10);
        builder.one_way(4, 5, 10);
        let graph = builder.finish().unwrap();
        let report = check_agreement(&graph, 50, 42, true).unwrap();
        assert!(report.reachable < report.queries);
    }
}
