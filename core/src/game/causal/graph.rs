use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rand::Rng;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CausalGraphError {
    #[error("causal graph contains a cycle through: {}", nodes.join(", "))]
    Cycle { nodes: Vec<String> },
    #[error("unknown causal node '{0}'")]
    UnknownNode(String),
    #[error("causal node '{0}' is declared twice")]
    DuplicateNode(String),
    #[error("probability of '{name}' must lie in [0, 1], got {value}")]
    InvalidProbability { name: String, value: f64 },
    #[error("influence {from} -> {to} has invalid delta {delta}")]
    InvalidInfluence { from: String, to: String, delta: f64 },
}

/// One authoritative draw of every node in a graph.
pub type Realisation = BTreeMap<String, bool>;

#[derive(Debug, Clone)]
struct Node {
    name: String,
    probability: f64,
    /// `(parent index, delta)` applied when the parent came out true.
    parents: Vec<(usize, f64)>,
}

/// Validated DAG of binary events, stored in topological order.
#[derive(Debug, Clone)]
pub struct CausalGraph {
    nodes: Vec<Node>,
}

#[derive(Debug, Clone, Default)]
pub struct CausalGraphBuilder {
    nodes: Vec<(String, f64)>,
    influences: Vec<(String, String, f64)>,
}

impl CausalGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, name: impl Into<String>, probability: f64) -> Self {
        self.nodes.push((name.into(), probability));
        self
    }

    /// When `from` is realised true, `to` is drawn with its probability shifted by `delta`.
    pub fn influence(mut self, from: impl Into<String>, to: impl Into<String>, delta: f64) -> Self {
        self.influences.push((from.into(), to.into(), delta));
        self
    }

    pub fn build(self) -> Result<CausalGraph, CausalGraphError> {
        let mut index = BTreeMap::new();
        for (position, (name, probability)) in self.nodes.iter().enumerate() {
            if !(0.0..=1.0).contains(probability) {
                return Err(CausalGraphError::InvalidProbability {
                    name: name.clone(),
                    value: *probability,
                });
            }
            if index.insert(name.clone(), position).is_some() {
                return Err(CausalGraphError::DuplicateNode(name.clone()));
            }
        }

        let count = self.nodes.len();
        let mut parents: Vec<Vec<(usize, f64)>> = vec![Vec::new(); count];
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut in_degree = vec![0usize; count];
        for (from, to, delta) in &self.influences {
            let source = *index
                .get(from)
                .ok_or_else(|| CausalGraphError::UnknownNode(from.clone()))?;
            let target = *index
                .get(to)
                .ok_or_else(|| CausalGraphError::UnknownNode(to.clone()))?;
            if !delta.is_finite() || delta.abs() > 1.0 {
                return Err(CausalGraphError::InvalidInfluence {
                    from: from.clone(),
                    to: to.clone(),
                    delta: *delta,
                });
            }
            parents[target].push((source, *delta));
            children[source].push(target);
            in_degree[target] += 1;
        }

        // Kahn's algorithm; declaration order breaks ties so the layout is stable.
        let mut queue: VecDeque<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(count);
        while let Some(current) = queue.pop_front() {
            order.push(current);
            for &child in &children[current] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    queue.push_back(child);
                }
            }
        }

        if order.len() != count {
            let placed: BTreeSet<usize> = order.iter().copied().collect();
            let nodes = (0..count)
                .filter(|i| !placed.contains(i))
                .map(|i| self.nodes[i].0.clone())
                .collect();
            return Err(CausalGraphError::Cycle { nodes });
        }

        let mut position = vec![0usize; count];
        for (sorted, &original) in order.iter().enumerate() {
            position[original] = sorted;
        }
        let nodes = order
            .iter()
            .map(|&original| Node {
                name: self.nodes[original].0.clone(),
                probability: self.nodes[original].1,
                parents: parents[original]
                    .iter()
                    .map(|&(parent, delta)| (position[parent], delta))
                    .collect(),
            })
            .collect();
        Ok(CausalGraph { nodes })
    }
}

impl CausalGraph {
    pub fn builder() -> CausalGraphBuilder {
        CausalGraphBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node names in evaluation order.
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|node| node.name.as_str())
    }

    pub(crate) fn sample_into<R: Rng + ?Sized>(&self, rng: &mut R, outcomes: &mut Vec<bool>) {
        outcomes.clear();
        for node in &self.nodes {
            let shift: f64 = node
                .parents
                .iter()
                .filter(|(parent, _)| outcomes[*parent])
                .map(|(_, delta)| delta)
                .sum();
            let probability = (node.probability + shift).clamp(0.0, 1.0);
            outcomes.push(rng.gen_bool(probability));
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Realisation {
        let mut outcomes = Vec::with_capacity(self.nodes.len());
        self.sample_into(rng, &mut outcomes);
        self.nodes
            .iter()
            .zip(outcomes)
            .map(|(node, value)| (node.name.clone(), value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn nodes_are_sorted_after_their_parents() {
        let graph = CausalGraph::builder()
            .node("riots", 0.2)
            .node("famine", 0.3)
            .influence("famine", "riots", 0.4)
            .build()
            .expect("acyclic");
        let names: Vec<&str> = graph.node_names().collect();
        assert_eq!(names, vec!["famine", "riots"]);
    }

    #[test]
    fn cycles_are_rejected_at_build_time() {
        let err = CausalGraph::builder()
            .node("a", 0.5)
            .node("b", 0.5)
            .node("c", 0.5)
            .influence("a", "b", 0.1)
            .influence("b", "a", 0.1)
            .build()
            .expect_err("cycle");
        assert_eq!(
            err,
            CausalGraphError::Cycle {
                nodes: vec!["a".to_string(), "b".to_string()]
            }
        );

        let self_loop = CausalGraph::builder()
            .node("a", 0.5)
            .influence("a", "a", 0.1)
            .build();
        assert!(matches!(self_loop, Err(CausalGraphError::Cycle { .. })));
    }

    #[test]
    fn configuration_errors_are_typed() {
        let unknown = CausalGraph::builder().node("a", 0.5).influence("a", "z", 0.1).build();
        assert_eq!(unknown.expect_err("unknown"), CausalGraphError::UnknownNode("z".to_string()));
        let duplicate = CausalGraph::builder().node("a", 0.5).node("a", 0.1).build();
        assert_eq!(duplicate.expect_err("dup"), CausalGraphError::DuplicateNode("a".to_string()));
        let invalid = CausalGraph::builder().node("a", 1.5).build();
        assert!(matches!(invalid, Err(CausalGraphError::InvalidProbability { .. })));
    }

    #[test]
    fn certain_parents_shift_children() {
        let graph = CausalGraph::builder()
            .node("drought", 1.0)
            .node("famine", 0.0)
            .influence("drought", "famine", 1.0)
            .build()
            .expect("graph");
        let mut rng = StdRng::seed_from_u64(3);
        let realisation = graph.sample(&mut rng);
        assert!(realisation["drought"]);
        assert!(realisation["famine"]);
    }
}
