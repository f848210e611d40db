//! Execution order of dependent rules.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::catalog::HeelRuleDefinition;
use crate::run::{RunError, RunResult};

/// Order dependent rules so that every rule runs after the rules it
/// `depends_on`. Ties go to the lowest rule id, so the order is stable
/// across runs. Dependencies outside `rules` are ignored.
pub fn dependent_order(rules: &[&HeelRuleDefinition]) -> RunResult<Vec<i64>> {
    let mut graph: DiGraph<i64, ()> = DiGraph::new();
    let mut nodes: HashMap<i64, NodeIndex> = HashMap::new();

    for rule in rules {
        nodes.insert(rule.id, graph.add_node(rule.id));
    }
    for rule in rules {
        for dep in &rule.depends_on {
            if let (Some(&from), Some(&to)) = (nodes.get(dep), nodes.get(&rule.id)) {
                graph.add_edge(from, to, ());
            }
        }
    }

    for component in tarjan_scc(&graph) {
        let cyclic = component.len() > 1
            || component
                .first()
                .is_some_and(|&n| graph.find_edge(n, n).is_some());
        if cyclic {
            let mut ids: Vec<i64> = component.iter().map(|&n| graph[n]).collect();
            ids.sort_unstable();
            let ids: Vec<String> = ids.iter().map(i64::to_string).collect();
            return Err(RunError::Configuration(format!(
                "dependent rules form a cycle: {}",
                ids.join(", ")
            )));
        }
    }

    let mut in_degree: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|n| (n, graph.neighbors_directed(n, Direction::Incoming).count()))
        .collect();
    let mut ready: BinaryHeap<Reverse<(i64, NodeIndex)>> = in_degree
        .iter()
        .filter(|&(_, &deg)| deg == 0)
        .map(|(&n, _)| Reverse((graph[n], n)))
        .collect();

    let mut order = Vec::with_capacity(rules.len());
    while let Some(Reverse((id, node))) = ready.pop() {
        order.push(id);
        for next in graph.neighbors_directed(node, Direction::Outgoing) {
            if let Some(deg) = in_degree.get_mut(&next) {
                *deg -= 1;
                if *deg == 0 {
                    ready.push(Reverse((graph[next], next)));
                }
            }
        }
    }
    Ok(order)
}
