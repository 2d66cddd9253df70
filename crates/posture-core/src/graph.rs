//! Control dependency and impact graph.
//!
//! Nodes are controls or capabilities. An impact edge `A → B` means a
//! failure of A impacts B; it is declared either as `A blocks B` or as
//! `B depends_on A`. The graph is a DAG, validated once at load and
//! read-only afterwards.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pack::ControlPack;
use crate::taxonomy::ControlId;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("duplicate graph node: {node}")]
    DuplicateNode { node: String },

    #[error("edge references unknown node: {node}")]
    UnknownNode { node: String },

    #[error("control node {node} is not defined in pack {pack}")]
    ForeignControl { node: String, pack: String },

    #[error("dependency cycle detected involving: {nodes:?}")]
    Cycle { nodes: Vec<String> },
}

pub type GraphResult<T> = std::result::Result<T, GraphError>;

// ---------------------------------------------------------------------------
// Declarative source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Control,
    Capability,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// `from` blocks `to`: failure of `from` impacts `to`.
    Blocks,
    /// `from` depends on `to`: failure of `to` impacts `from`.
    DependsOn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDef {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDef {
    pub from: String,
    pub to: String,
    pub relation: Relation,
}

/// Graph file contents as declared in a control pack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphSource {
    pub nodes: Vec<NodeDef>,
    pub edges: Vec<EdgeDef>,
}

// ---------------------------------------------------------------------------
// Impact report
// ---------------------------------------------------------------------------

/// A node reached from a failing control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactedNode {
    pub id: String,
    pub kind: NodeKind,
    /// Shortest number of impact edges from any failing control.
    pub distance: usize,
    /// Failing control the shortest path starts from.
    pub source: String,
    /// Node ids from `source` to `id`, inclusive.
    pub path: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactReport {
    /// Failing controls present in the graph, sorted.
    pub roots: Vec<String>,
    /// Downstream nodes ordered by `(distance, id)`.
    pub impacted: Vec<ImpactedNode>,
}

impl ImpactReport {
    pub fn capabilities(&self) -> impl Iterator<Item = &ImpactedNode> {
        self.impacted
            .iter()
            .filter(|n| n.kind == NodeKind::Capability)
    }
}

// ---------------------------------------------------------------------------
// ImpactGraph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ImpactGraph {
    nodes: BTreeMap<String, NodeDef>,
    /// `node → {nodes its failure impacts}`
    downstream: BTreeMap<String, BTreeSet<String>>,
    /// `node → {nodes whose failure impacts it}`
    upstream: BTreeMap<String, BTreeSet<String>>,
}

impl ImpactGraph {
    /// Build and validate a graph against the active pack.
    pub fn build(source: &GraphSource, pack: &ControlPack) -> GraphResult<Self> {
        let mut graph = Self::default();
        for node in &source.nodes {
            if node.kind == NodeKind::Control {
                let known = ControlId::is_canonical(&node.id) && pack.contains(&node.id);
                if !known {
                    return Err(GraphError::ForeignControl {
                        node: node.id.clone(),
                        pack: pack.key(),
                    });
                }
            }
            graph.add_node(node.clone())?;
        }
        for edge in &source.edges {
            let (from, to) = match edge.relation {
                Relation::Blocks => (&edge.from, &edge.to),
                Relation::DependsOn => (&edge.to, &edge.from),
            };
            graph.add_impact_edge(from, to)?;
        }
        Ok(graph)
    }

    fn add_node(&mut self, node: NodeDef) -> GraphResult<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode { node: node.id });
        }
        self.downstream.entry(node.id.clone()).or_default();
        self.upstream.entry(node.id.clone()).or_default();
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Add `from → to`, rejecting unknown endpoints and cycles.
    fn add_impact_edge(&mut self, from: &str, to: &str) -> GraphResult<()> {
        for node in [from, to] {
            if !self.nodes.contains_key(node) {
                return Err(GraphError::UnknownNode {
                    node: node.to_string(),
                });
            }
        }
        if from == to {
            return Err(GraphError::Cycle {
                nodes: vec![from.to_string()],
            });
        }

        self.downstream
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
        self.upstream
            .entry(to.to_string())
            .or_default()
            .insert(from.to_string());

        if let Some(cycle) = self.path_between(to, from) {
            if let Some(set) = self.downstream.get_mut(from) {
                set.remove(to);
            }
            if let Some(set) = self.upstream.get_mut(to) {
                set.remove(from);
            }
            return Err(GraphError::Cycle { nodes: cycle });
        }
        Ok(())
    }

    /// DFS for a downstream path `start →* target`.
    fn path_between(&self, start: &str, target: &str) -> Option<Vec<String>> {
        let mut stack = vec![(start.to_string(), vec![start.to_string()])];
        let mut seen = BTreeSet::new();
        while let Some((node, path)) = stack.pop() {
            if node == target {
                return Some(path);
            }
            if !seen.insert(node.clone()) {
                continue;
            }
            if let Some(next) = self.downstream.get(&node) {
                for n in next.iter().rev() {
                    let mut p = path.clone();
                    p.push(n.clone());
                    stack.push((n.clone(), p));
                }
            }
        }
        None
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.downstream.values().map(BTreeSet::len).sum()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Nodes directly impacted by a failure of `id`.
    pub fn direct_dependents(&self, id: &str) -> Vec<&str> {
        self.downstream
            .get(id)
            .map(|s| s.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Nodes whose failure directly impacts `id`.
    pub fn direct_blockers(&self, id: &str) -> Vec<&str> {
        self.upstream
            .get(id)
            .map(|s| s.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Downstream impact of a set of failing controls.
    ///
    /// Multi-source BFS with roots and neighbours visited in sorted order,
    /// so every impacted node carries its shortest distance and a stable
    /// source. Failing ids absent from the graph are ignored. A root is
    /// reported only when another root blocks it, at its distance from the
    /// nearest such root.
    pub fn impact_of<'a>(&self, failing: impl IntoIterator<Item = &'a str>) -> ImpactReport {
        let roots: BTreeSet<&str> = failing
            .into_iter()
            .filter(|id| self.nodes.contains_key(*id))
            .collect();

        let mut parent: BTreeMap<&str, &str> = BTreeMap::new();
        let mut origin: BTreeMap<&str, (&str, usize)> = BTreeMap::new();
        // Root reached from another root: (source, distance, predecessor).
        let mut blocked_roots: BTreeMap<&str, (&str, usize, &str)> = BTreeMap::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        for &root in &roots {
            origin.insert(root, (root, 0));
            queue.push_back(root);
        }

        while let Some(node) = queue.pop_front() {
            let (source, dist) = origin[node];
            let Some(next) = self.downstream.get(node) else {
                continue;
            };
            for n in next {
                let n = n.as_str();
                if roots.contains(n) {
                    // Acyclic, so a root never reaches itself and the first
                    // visit in BFS order is the shortest.
                    blocked_roots.entry(n).or_insert((source, dist + 1, node));
                    continue;
                }
                if origin.contains_key(n) {
                    continue;
                }
                origin.insert(n, (source, dist + 1));
                parent.insert(n, node);
                queue.push_back(n);
            }
        }

        let chain = |end: &str| {
            let mut path = vec![end.to_string()];
            let mut cur = end;
            while let Some(&p) = parent.get(cur) {
                path.push(p.to_string());
                cur = p;
            }
            path.reverse();
            path
        };

        let downstream = origin
            .iter()
            .filter(|(_, (_, dist))| *dist > 0)
            .map(|(id, (source, dist))| (*id, *source, *dist, chain(*id)));
        let upstream_blocked = blocked_roots.iter().map(|(id, (source, dist, via))| {
            let mut path = chain(*via);
            path.push(id.to_string());
            (*id, *source, *dist, path)
        });

        let mut impacted: Vec<ImpactedNode> = downstream
            .chain(upstream_blocked)
            .filter_map(|(id, source, distance, path)| {
                let def = self.nodes.get(id)?;
                Some(ImpactedNode {
                    id: id.to_string(),
                    kind: def.kind,
                    distance,
                    source: source.to_string(),
                    path,
                })
            })
            .collect();
        impacted.sort_by(|a, b| a.distance.cmp(&b.distance).then_with(|| a.id.cmp(&b.id)));

        ImpactReport {
            roots: roots.into_iter().map(String::from).collect(),
            impacted,
        }
    }

    /// Nodes ordered so that blockers precede what they block.
    ///
    /// Kahn's algorithm; among ready nodes the smallest id goes first.
    pub fn topological_order(&self) -> GraphResult<Vec<String>> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .nodes
            .keys()
            .map(|id| (id.as_str(), self.upstream.get(id).map_or(0, BTreeSet::len)))
            .collect();
        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut sorted = Vec::with_capacity(self.nodes.len());
        while let Some(node) = ready.pop_first() {
            sorted.push(node.to_string());
            if let Some(next) = self.downstream.get(node) {
                for n in next {
                    if let Some(deg) = in_degree.get_mut(n.as_str()) {
                        *deg -= 1;
                        if *deg == 0 {
                            ready.insert(n.as_str());
                        }
                    }
                }
            }
        }

        if sorted.len() != self.nodes.len() {
            let remaining = in_degree
                .into_iter()
                .filter(|(_, deg)| *deg > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            return Err(GraphError::Cycle { nodes: remaining });
        }
        Ok(sorted)
    }
}
