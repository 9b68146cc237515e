use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use tracing::*;

use super::{reachable_from, Edge, Graph, Inbound, Node};
use crate::{sha256_hex, CanonError, Score, TreeRule, DEFAULT_DAG_RULE, DEFAULT_MAGNET_RULE};

lazy_static! {
    static ref MAGNET_RULE: TreeRule =
        TreeRule::compile(DEFAULT_MAGNET_RULE).expect("the magnet rule is well formed");
    static ref DAG_RULE: TreeRule =
        TreeRule::compile(DEFAULT_DAG_RULE).expect("the default DAG rule is well formed");
}

/// Settings of a DAG rewriting.
#[derive(Debug, Clone)]
pub struct DagOptions {
    /// Elects the parent keeping an in-bound's subtree in compact mode.
    pub branch_rule: TreeRule,
    /// Nodes removed before rewriting.
    pub ids_ignore: BTreeSet<String>,
    /// Resolve in-bounds by electing one parent instead of duplicating the subtree.
    pub compact: bool,
    /// Replace magnets by their SHA-256.
    pub allow_hashes: bool,
}

impl Default for DagOptions {
    fn default() -> Self {
        Self {
            branch_rule: DAG_RULE.clone(),
            ids_ignore: BTreeSet::new(),
            compact: false,
            allow_hashes: true,
        }
    }
}

impl DagOptions {
    pub fn with_branch_rule(mut self, rule: TreeRule) -> Self {
        self.branch_rule = rule;
        self
    }

    pub fn ignoring(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.ids_ignore.extend(ids);
        self
    }

    pub fn compact(mut self, compact: bool) -> Self {
        self.compact = compact;
        self
    }

    pub fn allow_hashes(mut self, allow_hashes: bool) -> Self {
        self.allow_hashes = allow_hashes;
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum InboundMode<'r> {
    Duplicate,
    Elect(&'r TreeRule),
}

/// `(arity, magnet of the node, sorted hashes of the parents' magnets)`
pub type InboundScore = (usize, String, String);

impl Graph {
    /// Rewrites the graph, seen from `root`, into an acyclic graph.
    ///
    /// Nodes are grouped by floor, then anomalies are fixed deepest floor first: every
    /// co-bound is split into two virtual leaves, and every in-bound gets one mirror per
    /// parent. The receiver is left untouched.
    pub fn to_dag(&self, root: &str, options: &DagOptions) -> Result<Graph> {
        let mut graph = self.clone();
        graph.magnets.clear();
        for id in &options.ids_ignore {
            if graph.contains_node(id) {
                graph.remove_node(id)?;
            }
        }
        graph.reset_floor();
        graph
            .group_by_floor(root)
            .context(format!("While rewriting graph {} from {root}", self.id))?;
        graph.remove_unfloored()?;

        let cobounds_nb = graph.find_cobounds().len();
        let inbounds_nb = graph.find_inbounds().len();
        let edit_nb = cobounds_nb + inbounds_nb;
        debug!("Rewriting from {root}: {cobounds_nb} co-bounds, {inbounds_nb} in-bounds");

        let mode = if options.compact {
            InboundMode::Elect(&options.branch_rule)
        } else {
            InboundMode::Duplicate
        };
        let mut id_virtual = 0;
        let mut id_mirror = 1;
        for step in 0..edit_nb {
            if graph.find_cobounds().len() > cobounds_nb || graph.find_inbounds().len() > inbounds_nb {
                return Err(CanonError::RewriteInvariant(format!(
                    "anomalies grew during rewriting step {step} from {root}"
                ))
                .into());
            }
            let (cobounds, cobound_floors) = graph.cobounds_by_floor()?;
            let (inbounds, inbound_floors) = graph.inbounds_by_floor()?;
            let Some(floor) = cobound_floors.iter().chain(&inbound_floors).max().copied() else {
                break;
            };

            if let Some(bucket) = cobounds.get(&floor) {
                let scored = graph.score_cobounds(bucket, options.allow_hashes)?;
                if let Some((magnet, id_edge)) = scored.into_iter().max() {
                    trace!("Step {step}: fixing co-bound {id_edge} on floor {floor}");
                    graph.fix_cobound(
                        &id_edge,
                        &format!("*{id_virtual}"),
                        &format!("*{}", id_virtual + 1),
                        &magnet,
                    )?;
                    id_virtual += 2;
                }
            } else if let Some(bucket) = inbounds.get(&floor) {
                let scored = graph.score_inbounds(bucket, options.allow_hashes)?;
                if let Some((_, inbound)) = scored.into_iter().max() {
                    trace!("Step {step}: fixing in-bound {} on floor {floor}", inbound.id);
                    graph.fix_inbound(&inbound, &format!("#{id_mirror}"), mode, options.allow_hashes)?;
                    id_mirror += 1;
                }
            }
        }

        if !graph.find_cobounds().is_empty() || !graph.find_inbounds().is_empty() {
            return Err(CanonError::RewriteInvariant(format!(
                "anomalies left after rewriting graph {} from {root}",
                self.id
            ))
            .into());
        }

        graph.reset_floor();
        graph.group_by_floor(root)?;
        graph.remove_unfloored()?;
        Ok(graph)
    }

    /// Fingerprint of everything hanging strictly below `id` in the current floor grouping.
    ///
    /// Magnets are cached per `(root of the grouping, node)` and never invalidated.
    pub fn get_magnet(&mut self, id: &str, allow_hashes: bool) -> Result<String> {
        if !self.is_floored() {
            return Err(CanonError::Unfloored("compute a magnet").into());
        }
        if let Some(magnet) = self.cached_magnet(id) {
            return Ok(magnet.clone());
        }
        let ignore = self.nodes_not_below(self.floor_of(id));
        let mut tree = self.to_tree(id, &ignore)?;
        tree.score_tree(&MAGNET_RULE)?;
        let mut magnet = format!("_{tree}_");
        if allow_hashes {
            magnet = format!("_{}_", sha256_hex(&magnet));
        }
        trace!("Magnet of {id}: {magnet}");
        self.cache_magnet(id, magnet.clone());
        Ok(magnet)
    }

    fn nodes_not_below(&self, floor: Option<usize>) -> BTreeSet<String> {
        self.nodes()
            .filter(|node| match (node.floor, floor) {
                (Some(other), Some(floor)) => other <= floor,
                _ => true,
            })
            .map(|node| node.id.clone())
            .collect()
    }

    /// Scores co-bounds by the sorted magnets of their ends, joined by the edge modality.
    ///
    /// # Returns
    ///
    /// * `(magnet, edge id)` pairs in ascending order.
    pub fn score_cobounds(&mut self, cobounds: &[String], allow_hashes: bool) -> Result<Vec<(String, String)>> {
        let mut scored = Vec::with_capacity(cobounds.len());
        for id_edge in cobounds {
            let edge = self
                .edge(id_edge)
                .cloned()
                .ok_or_else(|| CanonError::UnknownEdge(id_edge.clone()))?;
            let mut magnets = [
                self.get_magnet(&edge.id_a, allow_hashes)?,
                self.get_magnet(&edge.id_b, allow_hashes)?,
            ];
            magnets.sort();
            scored.push((magnets.join(&format!("-{}-", edge.modality)), id_edge.clone()));
        }
        scored.sort();
        Ok(scored)
    }

    /// Replaces a co-bound edge by two virtual leaves, one hanging from each end.
    pub fn fix_cobound(&mut self, id_edge: &str, id_virtual_a: &str, id_virtual_b: &str, magnet: &str) -> Result<()> {
        let edge = self.remove_edge(id_edge)?;
        let floor = self
            .floor_of(&edge.id_a)
            .ok_or(CanonError::Unfloored("fix a co-bound"))?
            + 1;
        for id_virtual in [id_virtual_a, id_virtual_b] {
            let mut node = Node::virtual_node(id_virtual, magnet);
            node.floor = Some(floor);
            self.add_node(node)?;
        }
        self.add_edges([
            Edge {
                id: format!("*{id_edge}_a"),
                id_b: id_virtual_a.to_string(),
                ..edge.clone()
            },
            Edge {
                id: format!("*{id_edge}_b"),
                id_a: id_virtual_b.to_string(),
                ..edge
            },
        ])?;
        Ok(())
    }

    pub fn score_inbounds(&mut self, inbounds: &[Inbound], allow_hashes: bool) -> Result<Vec<(InboundScore, Inbound)>> {
        let mut scored = Vec::with_capacity(inbounds.len());
        for inbound in inbounds {
            let magnet = self.get_magnet(&inbound.id, allow_hashes)?;
            let mut parent_hashes = Vec::with_capacity(inbound.upstairs.len());
            for id_edge in &inbound.upstairs {
                let parent = self.parent_through(id_edge, &inbound.id)?;
                parent_hashes.push(sha256_hex(&self.get_magnet(&parent, allow_hashes)?));
            }
            parent_hashes.sort();
            let score = (inbound.upstairs.len(), magnet, parent_hashes.join(" "));
            scored.push((score, inbound.clone()));
        }
        Ok(scored)
    }

    fn parent_through(&self, id_edge: &str, id: &str) -> Result<String, CanonError> {
        self.edge(id_edge)
            .and_then(|edge| edge.other_end(id))
            .map(str::to_string)
            .ok_or_else(|| CanonError::UnknownEdge(id_edge.to_string()))
    }

    fn fix_inbound(&mut self, inbound: &Inbound, id_mirror: &str, mode: InboundMode, allow_hashes: bool) -> Result<()> {
        let Inbound { floor, id, upstairs } = inbound;
        let roots: BTreeSet<String> = self
            .nodes()
            .filter(|node| matches!(node.floor, Some(f) if f < *floor))
            .map(|node| node.id.clone())
            .collect();
        let magnet = self.get_magnet(id, allow_hashes)?;
        let fixed = match mode {
            InboundMode::Duplicate => self.duplicate_inbound(inbound, id_mirror, &roots, &magnet, allow_hashes),
            InboundMode::Elect(rule) => self.elect_inbound(inbound, id_mirror, &roots, &magnet, rule),
        };
        fixed.context(format!("While fixing in-bound {id} ({} parents) on floor {floor}", upstairs.len()))
    }

    /// Gives every parent its own mirror, each carrying a full copy of the subtree.
    fn duplicate_inbound(
        &mut self,
        inbound: &Inbound,
        id_mirror: &str,
        roots: &BTreeSet<String>,
        magnet: &str,
        allow_hashes: bool,
    ) -> Result<()> {
        let Inbound { floor, id, upstairs } = inbound;
        let descendants: BTreeSet<String> = self
            .to_tree(id, roots)?
            .enumerate_nodes(None)
            .into_iter()
            .map(|(node, _)| node.id.clone())
            .collect();
        let options = DagOptions::default()
            .ignoring(
                self.nodes()
                    .filter(|node| !descendants.contains(&node.id))
                    .map(|node| node.id.clone()),
            )
            .allow_hashes(allow_hashes);
        let mut subdag = self.to_dag(id, &options)?;
        for id_sub in subdag.ordered_nodes_ids() {
            let shifted = subdag.floor_of(&id_sub).map(|f| f + floor + 1);
            subdag.set_floor(&id_sub, shifted);
        }

        for (i, id_edge) in upstairs.iter().enumerate() {
            let id_n_mirror = format!("{id_mirror}_{i}");
            let mut mirror = Node::mirror(&id_n_mirror, ".", upstairs.len(), magnet);
            mirror.floor = Some(*floor);
            self.add_node(mirror)?;
            self.switch_edge(id_edge, id, &id_n_mirror)?;
            let translating = self.include_graph(&subdag, &id_n_mirror)?;
            let copy = translating
                .get(id)
                .ok_or_else(|| CanonError::UnknownNode(format!("{id}@{id_n_mirror}")))?;
            self.add_edge(Edge::new(format!("e{id_n_mirror}"), id_n_mirror.as_str(), copy.as_str()))?;
        }

        if let Some(root) = self.floored_by().map(str::to_string) {
            let alive = reachable_from(self, &root, &BTreeSet::new());
            for id_old in descendants.iter().filter(|id_old| !alive.contains(*id_old)) {
                self.remove_node(id_old)?;
            }
        }
        Ok(())
    }

    /// Gives every parent a mirror, then hands the whole subtree to the parent whose tree
    /// scores lowest.
    fn elect_inbound(
        &mut self,
        inbound: &Inbound,
        id_mirror: &str,
        roots: &BTreeSet<String>,
        magnet: &str,
        rule: &TreeRule,
    ) -> Result<()> {
        let Inbound { floor, id, upstairs } = inbound;
        let node = self
            .node(id)
            .cloned()
            .ok_or_else(|| CanonError::UnknownNode(id.clone()))?;
        let outgoing: Vec<String> = self
            .routes(id)
            .iter()
            .filter(|route| matches!(self.floor_of(&route.to), Some(f) if f > *floor))
            .map(|route| route.edge.clone())
            .collect();

        let mut candidates: Vec<(Score, String, String)> = Vec::with_capacity(upstairs.len());
        for (i, id_edge) in upstairs.iter().enumerate() {
            let id_n_mirror = format!("{id_mirror}_{i}");
            let mut mirror = Node::mirror(&id_n_mirror, &node.label, upstairs.len(), magnet);
            mirror.data = node.data.clone();
            mirror.floor = Some(*floor);
            self.add_node(mirror)?;
            self.cache_magnet(&id_n_mirror, magnet.to_string());

            let mut edge = self.remove_edge(id_edge)?;
            let parent = edge
                .other_end(id)
                .map(str::to_string)
                .ok_or_else(|| CanonError::UnknownEdge(id_edge.clone()))?;
            edge.replace_end(id, &id_n_mirror);
            edge.id = format!("#{id_n_mirror}");
            self.add_edge(edge)?;

            let mut tree = self.to_tree(&parent, roots)?;
            tree.score_tree(rule)?;
            candidates.push((tree.score().cloned().unwrap_or_default(), parent, id_n_mirror));
        }

        candidates.sort();
        let (_, parent, winner) = candidates
            .into_iter()
            .next()
            .ok_or_else(|| CanonError::RewriteInvariant(format!("in-bound {id} has no parent")))?;
        trace!("Parent {parent} keeps the subtree of {id} through {winner}");
        for id_edge in outgoing {
            self.switch_edge(&id_edge, id, &winner)?;
        }
        self.remove_node(id)?;
        Ok(())
    }

    /// Per node, its floor and the serialization of everything hanging below it.
    pub fn score_dag(&self) -> Result<BTreeMap<String, (usize, String)>> {
        if !self.is_floored() {
            return Err(CanonError::Unfloored("score a DAG").into());
        }
        let mut scores = BTreeMap::new();
        for node in self.nodes() {
            let Some(floor) = node.floor else { continue };
            let mut tree = self.to_tree(&node.id, &self.nodes_not_below(Some(floor)))?;
            tree.score_tree(&MAGNET_RULE)?;
            scores.insert(node.id.clone(), (floor, tree.to_string()));
        }
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::super::labeled_graph;
    use super::*;

    fn diamond() -> Graph {
        labeled_graph(
            &[("A", "A"), ("B", "B"), ("C", "C"), ("D", "D"), ("E", "E")],
            &[("A", "B"), ("A", "C"), ("B", "D"), ("C", "D"), ("D", "E")],
        )
    }

    fn assert_acyclic(dag: &Graph) {
        assert!(dag.find_cobounds().is_empty());
        assert!(dag.find_inbounds().is_empty());
        assert_eq!(dag.edge_count() + 1, dag.node_count());
    }

    #[test]
    fn test_magnet_needs_floors() {
        let mut graph = diamond();
        assert!(graph.get_magnet("D", false).is_err());
        graph.group_by_floor("A").unwrap();
        assert_eq!(graph.get_magnet("D", false).unwrap(), "_(E:1)D_");
        assert_eq!(graph.get_magnet("E", false).unwrap(), "_()E_");
        let hashed = graph.get_magnet("B", true).unwrap();
        assert_eq!(hashed.len(), 66);
        assert!(hashed.starts_with('_') && hashed.ends_with('_'));
    }

    #[test]
    fn test_cobound_becomes_virtual_leaves() {
        let graph = labeled_graph(
            &[("A", "A"), ("B", "B"), ("C", "C"), ("D", "D")],
            &[("A", "B"), ("B", "C"), ("B", "D"), ("C", "D")],
        );
        let dag = graph.to_dag("A", &DagOptions::default().allow_hashes(false)).unwrap();
        assert_acyclic(&dag);
        assert!(!dag.contains_edge("4"));
        let va = dag.node("*0").unwrap();
        assert_eq!(va.magnet(), Some("_()C_-1-_()D_"));
        assert_eq!(va.floor, Some(3));
        assert_eq!(dag.edge("*4_a").unwrap().id_a, "C");
        assert_eq!(dag.edge("*4_b").unwrap().id_b, "D");
        // the receiver is untouched
        assert_eq!(graph.edge_count(), 4);
        assert!(!graph.is_floored());
    }

    #[test]
    fn test_inbound_duplication() {
        let dag = diamond().to_dag("A", &DagOptions::default()).unwrap();
        assert_acyclic(&dag);
        assert_eq!(dag.node_count(), 9);
        assert!(!dag.contains_node("D"));
        for mirror in ["#1_0", "#1_1"] {
            let node = dag.node(mirror).unwrap();
            assert_eq!(node.label, ".");
            assert_eq!(node.floor, Some(2));
            assert!(matches!(node.kind, crate::NodeKind::Mirror { arity: 2, .. }));
            assert_eq!(dag.floor_of(&format!("D@{mirror}")), Some(3));
            assert_eq!(dag.floor_of(&format!("E@{mirror}")), Some(4));
        }
    }

    #[test]
    fn test_inbound_election() {
        let dag = diamond()
            .to_dag("A", &DagOptions::default().compact(true).allow_hashes(false))
            .unwrap();
        assert_acyclic(&dag);
        assert_eq!(dag.node_count(), 6);
        // B wins the election on its label, so E now hangs from B's mirror
        let edge = dag.edge("5").unwrap();
        assert_eq!(edge.other_end("E"), Some("#1_0"));
        assert_eq!(dag.edge("##1_0").unwrap().other_end("#1_0"), Some("B"));
        let mirror = dag.node("#1_1").unwrap();
        assert_eq!(mirror.render_label(), "D#2{_(E:1)D_}");
    }

    #[test]
    fn test_ignored_and_unreachable_nodes_are_dropped() {
        let graph = labeled_graph(
            &[("a", "A"), ("b", "B"), ("c", "C"), ("z", "Z")],
            &[("a", "b"), ("b", "c")],
        );
        let dag = graph
            .to_dag("a", &DagOptions::default().ignoring(["c".to_string()]))
            .unwrap();
        assert_eq!(dag.ordered_nodes_ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_score_dag() {
        let mut graph = diamond();
        assert!(graph.score_dag().is_err());
        graph.group_by_floor("A").unwrap();
        let scores = graph.score_dag().unwrap();
        assert_eq!(scores["D"], (2, "(E:1)D".to_string()));
        assert_eq!(scores["E"], (3, "()E".to_string()));
    }
}
