// Topological layering (Kahn's algorithm)
//
// Shared by the auto-resolver and the orchestrator. Deterministic: nodes are
// processed in input order, never via hash-map iteration. On a cycle the sort
// stops and reports the remaining nodes unplaced; callers decide how hard to
// fail.

use std::collections::HashSet;

/// Result of a layered sort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layers {
    /// Layer k can execute once every layer < k has settled.
    pub layers: Vec<Vec<String>>,
    /// Nodes that could not be placed (members of at least one cycle).
    pub unplaced: Vec<String>,
}

/// Sort `nodes` into execution layers given `edges` of (source, target)
/// pairs, where the target depends on the source. Edges naming unknown
/// nodes and self-edges are ignored; duplicate edges count once.
pub fn layered_sort(nodes: &[String], edges: &[(String, String)]) -> Layers {
    let index_of = |name: &str| nodes.iter().position(|n| n == name);

    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut in_degree: Vec<usize> = vec![0; nodes.len()];
    let mut seen: HashSet<(usize, usize)> = HashSet::new();

    for (source, target) in edges {
        let (Some(s), Some(t)) = (index_of(source), index_of(target)) else {
            continue;
        };
        if s == t || !seen.insert((s, t)) {
            continue;
        }
        adjacency[s].push(t);
        in_degree[t] += 1;
    }

    let mut placed = vec![false; nodes.len()];
    let mut remaining = nodes.len();
    let mut layers = Vec::new();

    while remaining > 0 {
        let ready: Vec<usize> = (0..nodes.len())
            .filter(|&i| !placed[i] && in_degree[i] == 0)
            .collect();

        // No zero-in-degree node left: every remaining node is on a cycle.
        if ready.is_empty() {
            break;
        }

        for &i in &ready {
            placed[i] = true;
            remaining -= 1;
            for &t in &adjacency[i] {
                in_degree[t] -= 1;
            }
        }
        layers.push(ready.iter().map(|&i| nodes[i].clone()).collect());
    }

    let unplaced = (0..nodes.len())
        .filter(|&i| !placed[i])
        .map(|i| nodes[i].clone())
        .collect();

    Layers { layers, unplaced }
}
