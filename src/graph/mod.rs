use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::{Display, Formatter, Result as FmtResult};

use anyhow::{Context, Result};
use tracing::*;

use crate::{sha256_hex, CanonError, NodeRule, PruneResult, Score};

mod dag;
pub use dag::*;

mod floor;
pub use floor::*;

mod matrix;
pub use matrix::*;

/// What a node stands for: original content, or a marker left by the DAG rewriter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Plain,
    /// Leaf standing for one half of a removed co-bound.
    Virtual { magnet: String },
    /// Per-parent copy of a node that had several parents.
    Mirror { arity: usize, magnet: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: String,
    pub label: String,
    pub kind: NodeKind,
    /// Hop distance from the root of the last floor grouping.
    pub floor: Option<usize>,
    pub data: BTreeMap<String, String>,
}

impl Node {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind: NodeKind::Plain,
            floor: None,
            data: BTreeMap::new(),
        }
    }

    pub fn virtual_node(id: impl Into<String>, magnet: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Virtual {
                magnet: magnet.into(),
            },
            ..Self::new(id, "")
        }
    }

    pub fn mirror(
        id: impl Into<String>,
        label: impl Into<String>,
        arity: usize,
        magnet: impl Into<String>,
    ) -> Self {
        Self {
            kind: NodeKind::Mirror {
                arity,
                magnet: magnet.into(),
            },
            ..Self::new(id, label)
        }
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self.kind, NodeKind::Virtual { .. })
    }

    pub fn is_mirror(&self) -> bool {
        matches!(self.kind, NodeKind::Mirror { .. })
    }

    pub fn magnet(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Plain => None,
            NodeKind::Virtual { magnet } | NodeKind::Mirror { magnet, .. } => Some(magnet),
        }
    }

    /// The label as it appears in a serialized tree, marker suffix included.
    pub fn render_label(&self) -> String {
        match &self.kind {
            NodeKind::Plain => self.label.clone(),
            NodeKind::Virtual { magnet } => format!("{}*{{{}}}", self.label, magnet),
            NodeKind::Mirror { arity, magnet } => {
                format!("{}#{}{{{}}}", self.label, arity, magnet)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub id: String,
    pub id_a: String,
    pub id_b: String,
    pub modality: String,
    pub directed: bool,
}

impl Edge {
    pub fn new(id: impl Into<String>, id_a: impl Into<String>, id_b: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            id_a: id_a.into(),
            id_b: id_b.into(),
            modality: "1".to_string(),
            directed: false,
        }
    }

    pub fn with_modality(mut self, modality: impl Into<String>) -> Self {
        self.modality = modality.into();
        self
    }

    pub fn directed(mut self) -> Self {
        self.directed = true;
        self
    }

    pub fn other_end(&self, id: &str) -> Option<&str> {
        if self.id_a == id {
            Some(&self.id_b)
        } else if self.id_b == id {
            Some(&self.id_a)
        } else {
            None
        }
    }

    pub fn replace_end(&mut self, old: &str, new: &str) -> bool {
        if self.id_a == old {
            self.id_a = new.to_string();
            true
        } else if self.id_b == old {
            self.id_b = new.to_string();
            true
        } else {
            false
        }
    }
}

/// One adjacency record of the router: leaving through `edge` reaches `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub edge: String,
    pub to: String,
}

/// A labeled multigraph stored as id-keyed arenas plus an adjacency router.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub id: String,
    nodes: BTreeMap<String, Node>,
    edges: BTreeMap<String, Edge>,
    router: BTreeMap<String, Vec<Route>>,
    floored_by: Option<String>,
    magnets: BTreeMap<(String, String), String>,
    prune_result: Option<PruneResult>,
}

impl Graph {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.get(id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn contains_edge(&self, id: &str) -> bool {
        self.edges.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Adjacency records leaving `id`, empty for unknown nodes.
    pub fn routes(&self, id: &str) -> &[Route] {
        self.router.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn prune_result(&self) -> Option<&PruneResult> {
        self.prune_result.as_ref()
    }

    pub(crate) fn set_prune_result(&mut self, result: PruneResult) {
        self.prune_result = Some(result);
    }

    pub fn ordered_nodes_ids(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    pub fn add_node(&mut self, node: Node) -> Result<(), CanonError> {
        if self.nodes.contains_key(&node.id) {
            return Err(CanonError::DuplicateNode(node.id));
        }
        self.router.insert(node.id.clone(), Vec::new());
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    pub fn add_nodes(&mut self, nodes: impl IntoIterator<Item = Node>) -> Result<(), CanonError> {
        nodes.into_iter().try_for_each(|node| self.add_node(node))
    }

    /// Removes a node together with every edge touching it.
    pub fn remove_node(&mut self, id: &str) -> Result<Node, CanonError> {
        let incident: Vec<String> = self
            .edges
            .values()
            .filter(|edge| edge.id_a == id || edge.id_b == id)
            .map(|edge| edge.id.clone())
            .collect();
        for id_edge in incident {
            self.remove_edge(&id_edge)?;
        }
        self.router.remove(id);
        self.nodes
            .remove(id)
            .ok_or_else(|| CanonError::UnknownNode(id.to_string()))
    }

    pub fn add_edge(&mut self, edge: Edge) -> Result<(), CanonError> {
        if self.edges.contains_key(&edge.id) {
            return Err(CanonError::DuplicateEdge(edge.id));
        }
        for end in [&edge.id_a, &edge.id_b] {
            if !self.nodes.contains_key(end) {
                return Err(CanonError::UnknownNode(end.clone()));
            }
        }
        self.router.entry(edge.id_a.clone()).or_default().push(Route {
            edge: edge.id.clone(),
            to: edge.id_b.clone(),
        });
        if !edge.directed {
            self.router.entry(edge.id_b.clone()).or_default().push(Route {
                edge: edge.id.clone(),
                to: edge.id_a.clone(),
            });
        }
        self.edges.insert(edge.id.clone(), edge);
        Ok(())
    }

    pub fn add_edges(&mut self, edges: impl IntoIterator<Item = Edge>) -> Result<(), CanonError> {
        edges.into_iter().try_for_each(|edge| self.add_edge(edge))
    }

    pub fn remove_edge(&mut self, id: &str) -> Result<Edge, CanonError> {
        let edge = self
            .edges
            .remove(id)
            .ok_or_else(|| CanonError::UnknownEdge(id.to_string()))?;
        for end in [&edge.id_a, &edge.id_b] {
            if let Some(routes) = self.router.get_mut(end) {
                routes.retain(|route| route.edge != id);
            }
        }
        Ok(edge)
    }

    /// Detaches the `old` end of an edge and reattaches it to `new`, keeping the edge id.
    pub fn switch_edge(&mut self, id_edge: &str, old: &str, new: &str) -> Result<(), CanonError> {
        let mut edge = self
            .edges
            .get(id_edge)
            .cloned()
            .ok_or_else(|| CanonError::UnknownEdge(id_edge.to_string()))?;
        if !edge.replace_end(old, new) {
            return Err(CanonError::UnknownNode(old.to_string()));
        }
        trace!("Switching edge {id_edge} from {old} to {new}");
        self.remove_edge(id_edge)?;
        self.add_edge(edge)
    }

    /// Copies every node and edge of `other` into `self`, renaming ids to `id@suffix`.
    ///
    /// When a renamed id is already taken, a hash-derived salt is appended until it is free.
    ///
    /// # Returns
    ///
    /// * The mapping from node ids of `other` to their new ids in `self`.
    pub fn include_graph(&mut self, other: &Graph, suffix: &str) -> Result<BTreeMap<String, String>> {
        let mut old_to_new = BTreeMap::new();
        for (id, node) in &other.nodes {
            let new_id = fresh_id(&format!("{id}@{suffix}"), |id| self.nodes.contains_key(id));
            let mut copy = node.clone();
            copy.id = new_id.clone();
            self.add_node(copy)?;
            old_to_new.insert(id.clone(), new_id);
        }
        for (id, edge) in &other.edges {
            let new_id = fresh_id(&format!("{id}@{suffix}"), |id| self.edges.contains_key(id));
            let mut copy = edge.clone();
            copy.id = new_id;
            copy.id_a = translate(&old_to_new, &edge.id_a)?;
            copy.id_b = translate(&old_to_new, &edge.id_b)?;
            self.add_edge(copy)
                .context(format!("While including graph {} with suffix {suffix}", other.id))?;
        }
        Ok(old_to_new)
    }

    pub fn degree(&self, id: &str) -> usize {
        self.routes(id).len()
    }

    /// Degree of `id` plus the degrees of every walk endpoint up to `order` extra hops.
    ///
    /// Neighbors are counted with multiplicity, so a vertex reached twice counts twice.
    pub fn n_degree(&self, id: &str, order: usize) -> usize {
        let mut degree = self.degree(id);
        let mut bases = vec![id.to_string()];
        for _ in 0..order {
            let neighbors: Vec<String> = bases
                .iter()
                .flat_map(|base| self.routes(base).iter().map(|route| route.to.clone()))
                .collect();
            degree += neighbors.iter().map(|id| self.degree(id)).sum::<usize>();
            bases = neighbors;
        }
        degree
    }

    pub fn is_leaf(&self, id: &str) -> bool {
        self.degree(id) == 1
    }

    /// Scores every node with a node-scoped rule.
    pub fn score_nodes(&self, rule: &NodeRule) -> Result<BTreeMap<String, Score>> {
        let mut scores = BTreeMap::new();
        for id in self.nodes.keys() {
            let score = rule
                .score(self, id)
                .context(format!("While scoring node {id} with `{rule}`"))?;
            trace!("Node #{id}: {score:?}");
            scores.insert(id.clone(), score);
        }
        Ok(scores)
    }

    /// Assigns a connected-component index (from 1) to every node.
    ///
    /// Components are discovered from the smallest unmarked id, so the numbering is stable.
    pub fn mark_connex_compounds(&self) -> BTreeMap<String, usize> {
        let mut marks: BTreeMap<String, usize> = BTreeMap::new();
        let mut index = 0;
        for id in self.nodes.keys() {
            if marks.contains_key(id) {
                continue;
            }
            index += 1;
            marks.insert(id.clone(), index);
            let mut queue = VecDeque::from([id.clone()]);
            while let Some(current) = queue.pop_front() {
                for route in self.routes(&current) {
                    if !marks.contains_key(&route.to) {
                        marks.insert(route.to.clone(), index);
                        queue.push_back(route.to.clone());
                    }
                }
            }
        }
        marks
    }

    /// Splits the graph into one owned subgraph per connected component.
    pub fn split_connex_compounds(&self) -> Result<Vec<Graph>> {
        let marks = self.mark_connex_compounds();
        let count = marks.values().copied().max().unwrap_or(0);
        if count == 1 {
            return Ok(vec![self.clone()]);
        }
        let mut components = Vec::with_capacity(count);
        for index in 1..=count {
            let mut component = self.clone();
            for (id, mark) in &marks {
                if *mark != index {
                    component.remove_node(id)?;
                }
            }
            components.push(component);
        }
        debug!("Split graph {} into {} components", self.id, components.len());
        Ok(components)
    }

    /// Copy of the graph with every node and edge id passed through `rename`.
    pub fn relabeled(&self, rename: impl Fn(&str) -> String) -> Result<Graph> {
        let mut graph = Graph::new(self.id.clone());
        for node in self.nodes.values() {
            let mut copy = node.clone();
            copy.id = rename(&node.id);
            copy.floor = None;
            graph.add_node(copy)?;
        }
        for edge in self.edges.values() {
            let mut copy = edge.clone();
            copy.id = rename(&edge.id);
            copy.id_a = rename(&edge.id_a);
            copy.id_b = rename(&edge.id_b);
            graph.add_edge(copy)?;
        }
        Ok(graph)
    }

    pub(crate) fn cached_magnet(&self, id: &str) -> Option<&String> {
        let root = self.floored_by.as_ref()?;
        self.magnets.get(&(root.clone(), id.to_string()))
    }

    pub(crate) fn cache_magnet(&mut self, id: &str, magnet: String) {
        if let Some(root) = self.floored_by.clone() {
            self.magnets.insert((root, id.to_string()), magnet);
        }
    }
}

impl Display for Graph {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        writeln!(f, "graph {} ({} nodes, {} edges)", self.id, self.nodes.len(), self.edges.len())?;
        for node in self.nodes.values() {
            write!(f, "  {} [{}]", node.id, node.render_label())?;
            if let Some(floor) = node.floor {
                write!(f, " floor {floor}")?;
            }
            writeln!(f)?;
        }
        for edge in self.edges.values() {
            writeln!(f, "  {}: {} -- {} ({})", edge.id, edge.id_a, edge.id_b, edge.modality)?;
        }
        Ok(())
    }
}

fn fresh_id(base: &str, taken: impl Fn(&str) -> bool) -> String {
    let mut candidate = base.to_string();
    let mut salt = 0usize;
    while taken(&candidate) {
        salt += 1;
        let digest = sha256_hex(&format!("{base}{salt}"));
        candidate = format!("{base}-{}", &digest[..12]);
    }
    candidate
}

fn translate(old_to_new: &BTreeMap<String, String>, id: &str) -> Result<String, CanonError> {
    old_to_new
        .get(id)
        .cloned()
        .ok_or_else(|| CanonError::UnknownNode(id.to_string()))
}

/// Unique ids of every node reachable from `id` in `graph` without crossing `blocked`.
pub(crate) fn reachable_from(graph: &Graph, id: &str, blocked: &BTreeSet<String>) -> BTreeSet<String> {
    let mut seen = BTreeSet::from([id.to_string()]);
    let mut queue = VecDeque::from([id.to_string()]);
    while let Some(current) = queue.pop_front() {
        for route in graph.routes(&current) {
            if blocked.contains(&route.to) || seen.contains(&route.to) {
                continue;
            }
            seen.insert(route.to.clone());
            queue.push_back(route.to.clone());
        }
    }
    seen
}

#[cfg(test)]
pub(crate) fn labeled_graph(nodes: &[(&str, &str)], edges: &[(&str, &str)]) -> Graph {
    let mut graph = Graph::new("test");
    for (id, label) in nodes {
        graph.add_node(Node::new(*id, *label)).unwrap();
    }
    for (i, (a, b)) in edges.iter().enumerate() {
        graph.add_edge(Edge::new((i + 1).to_string(), *a, *b)).unwrap();
    }
    graph
}
