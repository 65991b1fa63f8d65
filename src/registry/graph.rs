//! Dependency graph ordering.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::{Result, StagehandError};
use crate::registry::stage::Stage;

/// Positions of `stages` in dependency order (each stage after all its deps).
///
/// Unknown dependency names are ignored here; structural validation reports them.
pub fn topological_order(stages: &[Stage]) -> Result<Vec<usize>> {
    let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(stages.len(), stages.len());
    let nodes: HashMap<&str, NodeIndex> = stages
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), graph.add_node(i)))
        .collect();

    for stage in stages {
        let to = nodes[stage.name.as_str()];
        for dep in &stage.depends_on {
            if let Some(&from) = nodes.get(dep.as_str()) {
                graph.add_edge(from, to, ());
            }
        }
    }

    toposort(&graph, None)
        .map(|order| order.into_iter().map(|n| graph[n]).collect())
        .map_err(|cycle| StagehandError::DependencyCycle(stages[graph[cycle.node_id()]].name.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::stage::{FixAction, ResourceClass};

    fn stage(name: &str, deps: &[&str]) -> Stage {
        let mut s = Stage::new(name, ResourceClass::CpuParallel, FixAction::new("true"));
        s.depends_on = deps.iter().map(|d| d.to_string()).collect();
        s
    }

    #[test]
    fn test_linear_chain() {
        let stages = vec![stage("c", &["b"]), stage("b", &["a"]), stage("a", &[])];
        assert_eq!(topological_order(&stages).unwrap(), vec![2, 1, 0]);
    }

    #[test]
    fn test_order_is_deterministic() {
        let stages = vec![stage("a", &[]), stage("b", &[]), stage("c", &["a", "b"])];
        let first = topological_order(&stages).unwrap();
        let second = topological_order(&stages).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        assert_eq!(*first.last().unwrap(), 2);
    }

    #[test]
    fn test_cycle_names_a_member() {
        let stages = vec![stage("x", &["y"]), stage("y", &["x"]), stage("z", &[])];
        match topological_order(&stages) {
            Err(StagehandError::DependencyCycle(name)) => assert!(name == "x" || name == "y"),
            other => panic!("expected cycle, got {:?}", other),
        }
    }
}
