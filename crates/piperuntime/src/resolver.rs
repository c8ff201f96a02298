//! Dependency resolution: topological leveling, cycle detection and the
//! critical path.

use crate::registry::ExecutorRegistry;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use pipecore::{NodeId, WorkflowDefinition, WorkflowError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Result of resolving a workflow's dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOrder {
    /// Flat topological order (levels concatenated).
    pub order: Vec<NodeId>,
    /// Groups of nodes whose dependencies are all in earlier groups.
    pub levels: Vec<Vec<NodeId>>,
    /// node id -> prerequisite node ids
    pub dependencies: HashMap<NodeId, Vec<NodeId>>,
    /// Longest chain from a trigger to a terminal node.
    pub critical_path: Vec<NodeId>,
}

impl ExecutionOrder {
    pub fn dependencies_of(&self, node_id: &str) -> &[NodeId] {
        self.dependencies
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn level_of(&self, node_id: &str) -> Option<usize> {
        self.levels
            .iter()
            .position(|level| level.iter().any(|id| id == node_id))
    }

    /// Sum of executor estimates along the critical path. Nodes without an
    /// executor or an estimate count as zero.
    pub fn estimate_duration(
        &self,
        workflow: &WorkflowDefinition,
        registry: &ExecutorRegistry,
    ) -> Duration {
        let nodes = workflow.node_index();
        self.critical_path
            .iter()
            .filter_map(|id| nodes.get(id.as_str()))
            .filter_map(|node| {
                registry
                    .get(node.node_type)
                    .and_then(|executor| executor.estimate_duration(node))
            })
            .sum()
    }
}

/// Dependency graph over one workflow. Node indices follow declaration
/// order, which keeps every output deterministic.
pub struct DependencyResolver<'a> {
    workflow: &'a WorkflowDefinition,
    graph: DiGraph<&'a str, ()>,
}

impl<'a> DependencyResolver<'a> {
    /// Build the graph; fails if an edge references a missing node.
    pub fn new(workflow: &'a WorkflowDefinition) -> Result<Self, WorkflowError> {
        let mut graph = DiGraph::new();
        let mut node_to_index = HashMap::new();

        for node in &workflow.nodes {
            let idx = graph.add_node(node.id.as_str());
            node_to_index.insert(node.id.as_str(), idx);
        }

        for edge in &workflow.edges {
            let from_idx = node_to_index
                .get(edge.source.as_str())
                .ok_or_else(|| WorkflowError::NodeNotFound(edge.source.clone()))?;
            let to_idx = node_to_index
                .get(edge.target.as_str())
                .ok_or_else(|| WorkflowError::NodeNotFound(edge.target.clone()))?;

            graph.add_edge(*from_idx, *to_idx, ());
        }

        Ok(Self { workflow, graph })
    }

    pub fn resolve(&self) -> Result<ExecutionOrder, WorkflowError> {
        let dependencies = self.dependency_map();
        let levels = self.level()?;
        let order = levels.iter().flatten().cloned().collect();
        let critical_path = self.critical_path(&levels);

        Ok(ExecutionOrder {
            order,
            levels,
            dependencies,
            critical_path,
        })
    }

    fn id(&self, idx: NodeIndex) -> NodeId {
        self.graph[idx].to_string()
    }

    /// Distinct prerequisites of `idx`, in edge declaration order.
    fn prerequisites(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut deps: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .collect();
        // petgraph walks adjacency newest-first
        deps.reverse();
        let mut seen = HashSet::new();
        deps.retain(|dep| seen.insert(*dep));
        deps
    }

    fn dependency_map(&self) -> HashMap<NodeId, Vec<NodeId>> {
        self.graph
            .node_indices()
            .map(|idx| {
                let deps = self
                    .prerequisites(idx)
                    .into_iter()
                    .map(|dep| self.id(dep))
                    .collect();
                (self.id(idx), deps)
            })
            .collect()
    }

    /// Breadth-first leveling (Kahn's algorithm, one level at a time).
    fn level(&self) -> Result<Vec<Vec<NodeId>>, WorkflowError> {
        let node_count = self.graph.node_count();
        let mut remaining: Vec<HashSet<NodeIndex>> = self
            .graph
            .node_indices()
            .map(|idx| self.prerequisites(idx).into_iter().collect())
            .collect();
        let mut visited = vec![false; node_count];
        let mut levels = Vec::new();

        let mut current: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|idx| remaining[idx.index()].is_empty())
            .collect();

        while !current.is_empty() {
            if levels.len() >= node_count {
                break;
            }

            for idx in &current {
                visited[idx.index()] = true;
            }

            let mut next = Vec::new();
            for &idx in &current {
                for dependent in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                    let deps = &mut remaining[dependent.index()];
                    if deps.remove(&idx) && deps.is_empty() && !visited[dependent.index()] {
                        next.push(dependent);
                    }
                }
            }
            next.sort();
            next.dedup();

            levels.push(current.iter().map(|idx| self.id(*idx)).collect());
            current = next;
        }

        if visited.iter().any(|v| !v) {
            return Err(WorkflowError::CyclicDependency {
                nodes: self.cycle_members(&visited),
            });
        }

        Ok(levels)
    }

    /// Nodes that sit on a cycle; falls back to everything left unvisited.
    fn cycle_members(&self, visited: &[bool]) -> Vec<NodeId> {
        let mut members: Vec<NodeIndex> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0]))
            .flatten()
            .collect();

        if members.is_empty() {
            members = self
                .graph
                .node_indices()
                .filter(|idx| !visited[idx.index()])
                .collect();
        }

        members.sort();
        members.into_iter().map(|idx| self.id(idx)).collect()
    }

    /// Longest trigger-to-terminal chain over the (acyclic) graph.
    fn critical_path(&self, levels: &[Vec<NodeId>]) -> Vec<NodeId> {
        let nodes = self.workflow.node_index();
        let position: HashMap<&str, NodeIndex> = self
            .graph
            .node_indices()
            .map(|idx| (self.graph[idx], idx))
            .collect();

        let count = self.graph.node_count();
        // Length of the longest path from a node to a terminal (0 = none reachable)
        let mut best = vec![0usize; count];
        let mut next: Vec<Option<NodeIndex>> = vec![None; count];

        for id in levels.iter().rev().flatten() {
            let Some(&idx) = position.get(id.as_str()) else {
                continue;
            };
            let mut successors: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(idx, Direction::Outgoing)
                .collect();
            successors.sort();
            successors.dedup();

            let terminal = successors.is_empty()
                || nodes
                    .get(id.as_str())
                    .is_some_and(|node| node.node_type.is_terminal());

            let mut length = usize::from(terminal);
            for succ in successors {
                if best[succ.index()] > 0 && best[succ.index()] + 1 > length {
                    length = best[succ.index()] + 1;
                    next[idx.index()] = Some(succ);
                }
            }
            best[idx.index()] = length;
        }

        let triggers: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|idx| {
                nodes
                    .get(self.graph[*idx])
                    .is_some_and(|node| node.node_type.is_trigger())
            })
            .collect();

        let starts = if triggers.is_empty() {
            self.graph
                .node_indices()
                .filter(|idx| {
                    self.graph
                        .neighbors_directed(*idx, Direction::Incoming)
                        .next()
                        .is_none()
                })
                .collect()
        } else {
            triggers
        };

        let mut start = None;
        for idx in starts {
            if best[idx.index()] > start.map_or(0, |s: NodeIndex| best[s.index()]) {
                start = Some(idx);
            }
        }

        let mut path = Vec::new();
        let mut cursor = start;
        while let Some(idx) = cursor {
            path.push(self.id(idx));
            cursor = next[idx.index()];
        }
        path
    }
}

/// Resolve a workflow into its execution order.
pub fn resolve(workflow: &WorkflowDefinition) -> Result<ExecutionOrder, WorkflowError> {
    DependencyResolver::new(workflow)?.resolve()
}
