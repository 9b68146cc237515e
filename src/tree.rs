use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter, Result as FmtResult};

use anyhow::{Context, Result};
use tracing::*;

use crate::{sha224_hex, CanonError, Graph, Node, Score, TreeRule};

/// A rooted, ordered tree built from an acyclic (sub)graph.
///
/// Children are kept in canonical order once the tree has been scored.
#[derive(Debug, Clone)]
pub struct Tree {
    pub root: Node,
    children: Option<Vec<(Tree, String)>>,
    pub parent_modality: Option<String>,
    score: Option<Score>,
    trace: Option<String>,
}

impl Tree {
    /// # Arguments
    ///
    /// * `root` - A copy of the node the tree is centered on.
    /// * `children` - `None` for a leaf, otherwise each child with the modality of the edge
    ///   leading to it.
    /// * `parent_modality` - The modality of the edge this tree hangs from, if any.
    pub fn new(root: Node, children: Option<Vec<(Tree, String)>>, parent_modality: Option<String>) -> Self {
        Self {
            root,
            children,
            parent_modality,
            score: None,
            trace: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    pub fn children(&self) -> &[(Tree, String)] {
        self.children.as_deref().unwrap_or(&[])
    }

    pub fn score(&self) -> Option<&Score> {
        self.score.as_ref()
    }

    pub fn is_scored(&self) -> bool {
        self.score.is_some()
    }

    /// Leaves count 1; a childless branch counts as a leaf.
    pub fn depth(&self) -> usize {
        match &self.children {
            None => 1,
            Some(children) => 1 + children.iter().map(|(child, _)| child.depth()).max().unwrap_or(0),
        }
    }

    pub fn size(&self) -> usize {
        1 + self.children().iter().map(|(child, _)| child.size()).sum::<usize>()
    }

    /// Every node with its depth below the root, in pre-order.
    ///
    /// With `depth_max`, nodes deeper than the limit are skipped.
    pub fn enumerate_nodes(&self, depth_max: Option<usize>) -> Vec<(&Node, usize)> {
        let mut nodes = Vec::new();
        self.collect_nodes(depth_max, 0, &mut nodes);
        nodes
    }

    fn collect_nodes<'a>(&'a self, depth_max: Option<usize>, depth: usize, nodes: &mut Vec<(&'a Node, usize)>) {
        nodes.push((&self.root, depth));
        if depth_max.map_or(true, |max| depth < max) {
            for (child, _) in self.children() {
                child.collect_nodes(depth_max, depth + 1, nodes);
            }
        }
    }

    /// Scores every subtree bottom-up and sorts children by `(score, serialization)`.
    pub fn score_tree(&mut self, rule: &TreeRule) -> Result<(), CanonError> {
        if let Some(children) = &mut self.children {
            for (child, _) in children.iter_mut() {
                child.score_tree(rule)?;
            }
            children.sort_by(|(a, _), (b, _)| (&a.score, &a.trace).cmp(&(&b.score, &b.trace)));
        }
        self.trace = None;
        self.trace = Some(self.render());
        self.score = Some(rule.score(self)?);
        Ok(())
    }

    fn render(&self) -> String {
        if let Some(trace) = &self.trace {
            return trace.clone();
        }
        match &self.children {
            None => self.root.render_label(),
            Some(children) => {
                let branches: Vec<String> = children
                    .iter()
                    .map(|(child, modality)| format!("{}:{}", child.render(), modality))
                    .collect();
                format!("({}){}", branches.join(", "), self.root.render_label())
            }
        }
    }

    /// SHA-224 of the serialization.
    pub fn hashtree(&self) -> String {
        sha224_hex(&self.to_string())
    }

    /// Node ids in pre-order, following the canonical child order.
    pub fn order_sequence(&self) -> Vec<String> {
        self.enumerate_nodes(None)
            .into_iter()
            .map(|(node, _)| node.id.clone())
            .collect()
    }

    /// Maps each original vertex id to the sorted hashes of every subtree rooted at one of its copies.
    ///
    /// Copies grafted by the rewriter carry an `@suffix` that is stripped here, while
    /// synthetic mirror and virtual nodes are dropped.
    pub fn map_node(&self) -> BTreeMap<String, Vec<String>> {
        let mut mapping = BTreeMap::from([(self.root.id.clone(), vec![self.hashtree()])]);
        for (child, _) in self.children() {
            for (id, hashes) in child.map_node() {
                let Some(original) = original_id(&id) else { continue };
                let entry = mapping.entry(original.to_string()).or_default();
                entry.extend(hashes);
                entry.sort();
            }
        }
        mapping
    }
}

fn original_id(id: &str) -> Option<&str> {
    let base = id.split('@').next().unwrap_or(id);
    (!base.contains('#') && !base.contains('*')).then_some(base)
}

impl Display for Tree {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.render())
    }
}

impl Graph {
    /// Builds the tree hanging from `root`, never crossing a node of `ids_ignore`.
    ///
    /// A node reached from a parent with no other route is a leaf. Otherwise its children are
    /// all its neighbors except the parent, ignored nodes and its own ancestors, so the
    /// graph should be acyclic for the result to be meaningful.
    pub fn to_tree(&self, root: &str, ids_ignore: &BTreeSet<String>) -> Result<Tree> {
        if !self.contains_node(root) {
            return Err(CanonError::UnknownNode(root.to_string()))
                .context(format!("While building a tree in graph {}", self.id));
        }
        let mut ignore = ids_ignore.clone();
        self.build_tree(root, None, &mut ignore)
    }

    fn build_tree(&self, id: &str, origin: Option<(&str, &str)>, ignore: &mut BTreeSet<String>) -> Result<Tree> {
        let node = self
            .node(id)
            .cloned()
            .ok_or_else(|| CanonError::UnknownNode(id.to_string()))?;
        let parent_modality = origin.map(|(_, modality)| modality.to_string());
        if origin.is_some() && self.is_leaf(id) {
            return Ok(Tree::new(node, None, parent_modality));
        }

        let origin_id = origin.map(|(origin_id, _)| origin_id);
        let inserted = origin_id.map_or(false, |origin_id| ignore.insert(origin_id.to_string()));
        let mut children = Vec::new();
        for route in self.routes(id) {
            if Some(route.to.as_str()) == origin_id || ignore.contains(&route.to) {
                continue;
            }
            let modality = self
                .edge(&route.edge)
                .map(|edge| edge.modality.clone())
                .ok_or_else(|| CanonError::UnknownEdge(route.edge.clone()))?;
            let child = self.build_tree(&route.to, Some((id, &modality)), ignore)?;
            children.push((child, modality));
        }
        if inserted {
            if let Some(origin_id) = origin_id {
                ignore.remove(origin_id);
            }
        }
        trace!("Tree rooted on {id}: {} children", children.len());
        Ok(Tree::new(node, Some(children), parent_modality))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::labeled_graph;
    use crate::{DEFAULT_BRANCH_RULE, DEFAULT_MAGNET_RULE};

    fn star() -> Graph {
        // C(O)(N)H
        labeled_graph(
            &[("1", "C"), ("2", "O"), ("3", "N"), ("4", "H")],
            &[("1", "2"), ("1", "3"), ("1", "4")],
        )
    }

    #[test]
    fn test_serialization_is_canonical() {
        let rule = TreeRule::compile(DEFAULT_MAGNET_RULE).unwrap();
        let mut tree = star().to_tree("1", &BTreeSet::new()).unwrap();
        tree.score_tree(&rule).unwrap();
        assert_eq!(tree.to_string(), "(H:1, N:1, O:1)C");
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.size(), 4);
        assert_eq!(tree.order_sequence(), vec!["1", "4", "3", "2"]);

        let relabeled = star().relabeled(|id| format!("x{id}")).unwrap();
        let mut other = relabeled.to_tree("x1", &BTreeSet::new()).unwrap();
        other.score_tree(&rule).unwrap();
        assert_eq!(tree.to_string(), other.to_string());
        assert_eq!(tree.hashtree(), other.hashtree());
    }

    #[test]
    fn test_leaf_and_childless_roots() {
        let rule = TreeRule::compile(DEFAULT_BRANCH_RULE).unwrap();
        let graph = star();
        let mut from_leaf = graph.to_tree("2", &BTreeSet::new()).unwrap();
        from_leaf.score_tree(&rule).unwrap();
        assert_eq!(from_leaf.to_string(), "((H:1, N:1)C:1)O");

        let ignore = BTreeSet::from(["1".to_string()]);
        let mut lonely = graph.to_tree("2", &ignore).unwrap();
        lonely.score_tree(&rule).unwrap();
        assert_eq!(lonely.to_string(), "()O");
        assert_eq!(lonely.depth(), 1);
    }

    #[test]
    fn test_modalities_are_rendered() {
        let mut graph = star();
        graph.remove_edge("1").unwrap();
        graph
            .add_edge(crate::Edge::new("double", "1", "2").with_modality("2"))
            .unwrap();
        let mut tree = graph.to_tree("1", &BTreeSet::new()).unwrap();
        tree.score_tree(&TreeRule::compile(DEFAULT_BRANCH_RULE).unwrap()).unwrap();
        assert_eq!(tree.to_string(), "(H:1, N:1, O:2)C");
    }

    #[test]
    fn test_enumerate_with_depth_limit() {
        let graph = labeled_graph(
            &[("a", "A"), ("b", "B"), ("c", "C")],
            &[("a", "b"), ("b", "c")],
        );
        let tree = graph.to_tree("a", &BTreeSet::new()).unwrap();
        assert_eq!(tree.enumerate_nodes(None).len(), 3);
        let shallow: Vec<&str> = tree
            .enumerate_nodes(Some(1))
            .into_iter()
            .map(|(node, _)| node.id.as_str())
            .collect();
        assert_eq!(shallow, vec!["a", "b"]);
    }

    #[test]
    fn test_map_node_strips_copies() {
        let mut graph = labeled_graph(&[("a", "A")], &[]);
        graph.add_node(Node::new("b@#1_0", "B")).unwrap();
        graph.add_node(Node::mirror("#1_0", ".", 2, "m")).unwrap();
        graph.add_edge(crate::Edge::new("1", "a", "#1_0")).unwrap();
        graph.add_edge(crate::Edge::new("2", "#1_0", "b@#1_0")).unwrap();
        let mut tree = graph.to_tree("a", &BTreeSet::new()).unwrap();
        tree.score_tree(&TreeRule::compile(DEFAULT_MAGNET_RULE).unwrap()).unwrap();
        let mapping = tree.map_node();
        assert_eq!(mapping.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(mapping["b"], vec![sha224_hex("B")]);
    }
}
