use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter, Result as FmtResult};

use anyhow::{Context, Result};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::*;

use crate::graph::reachable_from;
use crate::{
    sha256_hex, CanonError, DagOptions, Graph, NodeRule, Tree, TreeRule, DEFAULT_BRANCH_RULE,
    DEFAULT_CANDIDATE_RULE, DEFAULT_DAG_RULE,
};

/// How a graph is canonicalized. Rules are kept as text and compiled on use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonConfig {
    pub candidate_rule: String,
    pub branch_rule: String,
    pub dag_rule: String,
    pub allow_hashes: bool,
    pub compress: bool,
    pub compact: bool,
    pub delimiter: String,
}

impl Default for CanonConfig {
    fn default() -> Self {
        Self {
            candidate_rule: DEFAULT_CANDIDATE_RULE.to_string(),
            branch_rule: DEFAULT_BRANCH_RULE.to_string(),
            dag_rule: DEFAULT_DAG_RULE.to_string(),
            allow_hashes: true,
            compress: true,
            compact: false,
            delimiter: "|".to_string(),
        }
    }
}

impl CanonConfig {
    pub fn candidate_rule(mut self, rule: impl Into<String>) -> Self {
        self.candidate_rule = rule.into();
        self
    }

    pub fn branch_rule(mut self, rule: impl Into<String>) -> Self {
        self.branch_rule = rule.into();
        self
    }

    pub fn dag_rule(mut self, rule: impl Into<String>) -> Self {
        self.dag_rule = rule.into();
        self
    }

    pub fn allow_hashes(mut self, allow_hashes: bool) -> Self {
        self.allow_hashes = allow_hashes;
        self
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn compact(mut self, compact: bool) -> Self {
        self.compact = compact;
        self
    }

    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }
}

/// Allegiance of every non-candidate node after pruning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneResult {
    /// Candidate id to the nodes only it can reach.
    pub mastered: BTreeMap<String, Vec<String>>,
    /// Nodes reached by several candidates.
    pub unmastered: Vec<String>,
}

/// A canonical form. Two graphs are isomorphic exactly when their canonical forms are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CGraph(String);

impl CGraph {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Fixed-length fingerprint of the canonical form.
    pub fn hash(&self) -> String {
        sha256_hex(&self.0)
    }
}

impl From<String> for CGraph {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for CGraph {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for CGraph {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

/// Floods a claim from every candidate through the non-candidate nodes.
///
/// A node reached by exactly one candidate is mastered by it; a node reached by several
/// is unmastered. The result is also stored on the graph.
pub fn prune_graph(graph: &mut Graph, candidates: &[String]) -> PruneResult {
    let blocked: BTreeSet<String> = candidates.iter().cloned().collect();
    let mut claims: BTreeMap<String, Vec<&String>> = BTreeMap::new();
    for candidate in candidates {
        for id in reachable_from(graph, candidate, &blocked) {
            if !blocked.contains(&id) {
                claims.entry(id).or_default().push(candidate);
            }
        }
    }

    let mut result = PruneResult::default();
    for (id, masters) in claims {
        match masters.as_slice() {
            [master] => result.mastered.entry((*master).clone()).or_default().push(id),
            _ => result.unmastered.push(id),
        }
    }
    debug!(
        "Pruning: {} candidates, {} unmastered nodes",
        candidates.len(),
        result.unmastered.len()
    );
    graph.set_prune_result(result.clone());
    result
}

/// The ids with the highest candidate score.
fn root_candidates(graph: &Graph, rule: &NodeRule) -> Result<Vec<String>> {
    let scores = graph.score_nodes(rule)?;
    let Some(best) = scores.values().max() else {
        return Err(CanonError::NoCandidate.into());
    };
    Ok(scores
        .iter()
        .filter(|(_, score)| *score == best)
        .map(|(id, _)| id.clone())
        .collect())
}

fn map_candidates<F>(ids: &[String], f: F) -> Result<Vec<Tree>>
where
    F: Fn(&str) -> Result<Tree> + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        ids.par_iter().map(|id| f(id)).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        ids.iter().map(|id| f(id)).collect()
    }
}

/// Builds the canonical tree of a connected graph.
///
/// Candidates are the best nodes under the candidate rule. Each one is turned into a
/// restricted tree that skips nodes shared with other candidates, and the best trees
/// are elected. Each elected root then produces a full tree, and the smallest
/// serialization wins. The input graph is not modified.
pub fn to_canonic_tree(graph: &Graph, config: &CanonConfig) -> Result<Tree> {
    let candidate_rule = NodeRule::compile(&config.candidate_rule)?;
    let branch_rule = TreeRule::compile(&config.branch_rule)?;
    let dag_rule = TreeRule::compile(&config.dag_rule)?;
    if graph.is_empty() {
        return Err(CanonError::NoCandidate.into());
    }

    let mut graph = graph.clone();
    let candidates = root_candidates(&graph, &candidate_rule)
        .context(format!("While scoring candidates with `{candidate_rule}`"))?;
    debug!("Root candidates: {candidates:?}");

    let pruned = prune_graph(&mut graph, &candidates);
    let mut unmastered: BTreeSet<String> = pruned.unmastered.into_iter().collect();
    unmastered.extend(candidates.iter().cloned());
    if candidates.iter().all(|id| graph.is_leaf(id)) {
        unmastered.clear();
    }

    let restricted = DagOptions::default()
        .with_branch_rule(branch_rule.clone())
        .allow_hashes(config.allow_hashes);
    let trees = map_candidates(&candidates, |id| {
        let mut tree = graph.to_dag(id, &restricted)?.to_tree(id, &unmastered)?;
        tree.score_tree(&branch_rule)?;
        trace!("Restricted tree of {id}: {tree}");
        Ok(tree)
    })?;
    let best = trees.iter().filter_map(Tree::score).max();
    let elected: Vec<String> = candidates
        .iter()
        .zip(&trees)
        .filter(|(_, tree)| tree.score() == best)
        .map(|(id, _)| id.clone())
        .collect();
    debug!("Elected roots: {elected:?}");

    let full = DagOptions::default()
        .with_branch_rule(dag_rule)
        .compact(config.compact)
        .allow_hashes(config.allow_hashes);
    let no_ignore = BTreeSet::new();
    let trees = map_candidates(&elected, |id| {
        let mut tree = graph.to_dag(id, &full)?.to_tree(id, &no_ignore)?;
        tree.score_tree(&branch_rule)?;
        Ok(tree)
    })?;

    let mut winner: Option<(String, Tree)> = None;
    for tree in trees {
        let trace = tree.to_string();
        if winner.as_ref().map_or(true, |(best, _)| trace < *best) {
            winner = Some((trace, tree));
        }
    }
    let (_, tree) = winner.ok_or(CanonError::NoCandidate)?;
    info!("Canonical root of graph {}: {}", graph.id, tree.root.id);
    Ok(tree)
}

/// Canonical form of a connected graph, magnets compressed when configured.
pub fn to_cgraph(graph: &Graph, config: &CanonConfig) -> Result<CGraph> {
    let tree = to_canonic_tree(graph, config)?;
    let output = tree.to_string();
    Ok(CGraph(if config.compress {
        compress_cgraph(&output)
    } else {
        output
    }))
}

/// Canonical trace of any graph: the sorted canonical forms of its connected components,
/// joined by the configured delimiter.
pub fn scott_trace(graph: &Graph, config: &CanonConfig) -> Result<String> {
    let mut cgraphs = Vec::new();
    for component in graph.split_connex_compounds()? {
        cgraphs.push(to_cgraph(&component, config)?.into_inner());
    }
    cgraphs.sort();
    Ok(cgraphs.join(&config.delimiter))
}

/// Replaces the content of every top-level `{...}` by a short `$k` alias, numbered in
/// order of first appearance. Braces nested inside a magnet are dropped.
pub fn compress_cgraph(cgraph: &str) -> String {
    let mut output = String::with_capacity(cgraph.len());
    let mut aliases: BTreeMap<String, usize> = BTreeMap::new();
    let mut magnet = String::new();
    let mut in_magnet = false;
    let mut depth = 0usize;

    for symbol in cgraph.chars() {
        if !in_magnet {
            output.push(symbol);
            in_magnet = symbol == '{';
            continue;
        }
        match symbol {
            '{' => depth += 1,
            '}' if depth == 0 => {
                let next = aliases.len() + 1;
                let alias = *aliases.entry(std::mem::take(&mut magnet)).or_insert(next);
                output.push_str(&format!("${alias}}}"));
                in_magnet = false;
            }
            '}' => depth -= 1,
            _ => magnet.push(symbol),
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::labeled_graph;
    use crate::Edge;

    fn alphabetic() -> CanonConfig {
        CanonConfig::default().candidate_rule("1/(ord($label[0]))")
    }

    #[test]
    fn test_cobound_trace() {
        let graph = labeled_graph(
            &[("A", "A"), ("B", "B"), ("C", "C"), ("D", "D")],
            &[("A", "B"), ("B", "C"), ("B", "D"), ("C", "D")],
        );
        let cgraph = to_cgraph(&graph, &alphabetic()).unwrap();
        assert_eq!(cgraph.as_str(), "(((*{$1}:1)C:1, (*{$1}:1)D:1)B:1)A");
    }

    #[test]
    fn test_inbound_trace() {
        let graph = labeled_graph(
            &[("A", "A"), ("B", "B"), ("C", "C"), ("D", "D"), ("E", "E")],
            &[("A", "B"), ("A", "C"), ("B", "D"), ("C", "D"), ("D", "E")],
        );
        let cgraph = to_cgraph(&graph, &alphabetic().compact(true)).unwrap();
        assert_eq!(cgraph.as_str(), "((D#2{$1}:1)C:1, ((E:1)D#2{$1}:1)B:1)A");
    }

    #[test]
    fn test_multiple_inbound_trace() {
        let graph = labeled_graph(
            &[("A", "A"), ("B", "B"), ("C", "C"), ("D", "D"), ("E", "E"), ("F", "F")],
            &[
                ("A", "B"),
                ("A", "C"),
                ("A", "F"),
                ("B", "D"),
                ("C", "D"),
                ("F", "D"),
                ("D", "E"),
            ],
        );
        let config = alphabetic().compact(true).branch_rule("-$depth");
        let cgraph = to_cgraph(&graph, &config).unwrap();
        assert_eq!(
            cgraph.as_str(),
            "(((E:1)D#3{$1}:1)B:1, (D#3{$1}:1)C:1, (D#3{$1}:1)F:1)A"
        );
    }

    #[test]
    fn test_degenerate_graphs() {
        let config = CanonConfig::default();
        assert!(matches!(
            to_cgraph(&Graph::new("empty"), &config)
                .unwrap_err()
                .downcast_ref::<CanonError>(),
            Some(CanonError::NoCandidate)
        ));
        assert_eq!(scott_trace(&Graph::new("empty"), &config).unwrap(), "");

        let single = labeled_graph(&[("x", "A")], &[]);
        assert_eq!(to_cgraph(&single, &config).unwrap().as_str(), "()A");
    }

    #[test]
    fn test_bad_rules_are_reported() {
        let graph = labeled_graph(&[("x", "A")], &[]);
        let err = to_cgraph(&graph, &CanonConfig::default().candidate_rule("$nope")).unwrap_err();
        assert_eq!(
            err.downcast_ref::<CanonError>(),
            Some(&CanonError::UnknownAttribute("$nope".to_string()))
        );
    }

    #[test]
    fn test_relabeling_invariance() {
        // Two fused rings with a tail: co-bounds, in-bounds and ties between candidates.
        let graph = labeled_graph(
            &[
                ("1", "C"),
                ("2", "C"),
                ("3", "C"),
                ("4", "C"),
                ("5", "C"),
                ("6", "N"),
                ("7", "C"),
                ("8", "O"),
            ],
            &[
                ("1", "2"),
                ("2", "3"),
                ("3", "4"),
                ("4", "1"),
                ("3", "5"),
                ("5", "6"),
                ("6", "4"),
                ("6", "7"),
                ("7", "8"),
            ],
        );
        let config = CanonConfig::default();
        let expected = to_cgraph(&graph, &config).unwrap();
        let renames: [fn(&str) -> String; 3] = [
            |id| format!("v{id}"),
            |id| format!("{}", 100 - id.parse::<i32>().unwrap_or(0)),
            |id| id.chars().rev().collect::<String>() + "z",
        ];
        for rename in renames {
            let relabeled = graph.relabeled(rename).unwrap();
            assert_eq!(to_cgraph(&relabeled, &config).unwrap(), expected);
        }
        assert_eq!(expected.hash().len(), 64);
    }

    #[test]
    fn test_discrimination() {
        let config = CanonConfig::default();
        // K3,3 and the triangular prism are both 3-regular on 6 unlabeled vertices.
        let nodes = [("1", "."), ("2", "."), ("3", "."), ("4", "."), ("5", "."), ("6", ".")];
        let k33 = labeled_graph(
            &nodes,
            &[
                ("1", "4"),
                ("1", "5"),
                ("1", "6"),
                ("2", "4"),
                ("2", "5"),
                ("2", "6"),
                ("3", "4"),
                ("3", "5"),
                ("3", "6"),
            ],
        );
        let prism = labeled_graph(
            &nodes,
            &[
                ("1", "2"),
                ("2", "3"),
                ("3", "1"),
                ("4", "5"),
                ("5", "6"),
                ("6", "4"),
                ("1", "4"),
                ("2", "5"),
                ("3", "6"),
            ],
        );
        assert_ne!(to_cgraph(&k33, &config).unwrap(), to_cgraph(&prism, &config).unwrap());

        let ethanol = labeled_graph(&[("1", "C"), ("2", "C"), ("3", "O")], &[("1", "2"), ("2", "3")]);
        let ether = labeled_graph(&[("1", "C"), ("2", "O"), ("3", "C")], &[("1", "2"), ("2", "3")]);
        assert_ne!(to_cgraph(&ethanol, &config).unwrap(), to_cgraph(&ether, &config).unwrap());

        let mut double = ethanol.clone();
        double.remove_edge("2").unwrap();
        double.add_edge(Edge::new("2", "2", "3").with_modality("2")).unwrap();
        assert_ne!(to_cgraph(&ethanol, &config).unwrap(), to_cgraph(&double, &config).unwrap());
    }

    #[test]
    fn test_components_compose() {
        let config = CanonConfig::default();
        let left = labeled_graph(&[("1", "C"), ("2", "O")], &[("1", "2")]);
        let right = labeled_graph(
            &[("a", "N"), ("b", "C"), ("c", "C")],
            &[("a", "b"), ("b", "c"), ("c", "a")],
        );
        let mut union = left.clone();
        union.include_graph(&right, "r").unwrap();

        let mut parts = vec![
            to_cgraph(&left, &config).unwrap().into_inner(),
            to_cgraph(&right, &config).unwrap().into_inner(),
        ];
        parts.sort();
        assert_eq!(scott_trace(&union, &config).unwrap(), parts.join("|"));
        assert_eq!(
            scott_trace(&union, &config.clone().delimiter(".")).unwrap(),
            parts.join(".")
        );
    }

    #[test]
    fn test_prune_graph() {
        // a - x - b, a - y
        let mut graph = labeled_graph(
            &[("a", "A"), ("b", "B"), ("x", "X"), ("y", "Y")],
            &[("a", "x"), ("x", "b"), ("a", "y")],
        );
        let result = prune_graph(&mut graph, &["a".to_string(), "b".to_string()]);
        assert_eq!(result.unmastered, vec!["x"]);
        assert_eq!(result.mastered["a"], vec!["y"]);
        assert!(!result.mastered.contains_key("b"));
        assert_eq!(graph.prune_result(), Some(&result));
    }

    #[test]
    fn test_compress_cgraph() {
        assert_eq!(compress_cgraph("a{xy}b{zz}c{xy}"), "a{$1}b{$2}c{$1}");
        assert_eq!(compress_cgraph("({a{b}c}:1)D"), "({$1}:1)D");
        assert_eq!(compress_cgraph("no magnets"), "no magnets");

        let raw = "((D#2{_(E:1)D_}:1)C:1, (*{_()C_-1-_()D_}:1)B:1)A";
        let once = compress_cgraph(raw);
        assert_eq!(once, "((D#2{$1}:1)C:1, (*{$2}:1)B:1)A");
        assert_eq!(compress_cgraph(&once), once);
    }
}
