use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use tracing::*;

use super::Graph;
use crate::{to_canonic_tree, CanonConfig, DagOptions, TreeRule, DEFAULT_BRANCH_RULE};

pub type AdjacencyMatrix = Vec<Vec<i64>>;

/// Integer weight of an edge modality: its numeric value, else the sum of its character codes.
pub fn modality_to_int(modality: &str) -> i64 {
    modality
        .trim()
        .parse()
        .unwrap_or_else(|_| modality.chars().map(|c| c as i64).sum())
}

impl Graph {
    /// The adjacency matrix of the graph along with the vertex order of its rows.
    ///
    /// # Arguments
    ///
    /// * `canonic` - Order vertices by their place in the canonical tree instead of by id.
    /// * `fast` - Keep id order inside groups of indistinguishable vertices instead of
    ///   searching every ordering for the smallest matrix.
    pub fn adjacency_matrix(&self, canonic: bool, fast: bool) -> Result<(Vec<String>, AdjacencyMatrix)> {
        let order = if canonic {
            self.canonic_order(fast)
                .context(format!("While ordering the vertices of graph {}", self.id))?
        } else {
            self.ordered_nodes_ids()
        };
        let matrix = self.matrix_for(&order);
        Ok((order, matrix))
    }

    fn matrix_for(&self, order: &[String]) -> AdjacencyMatrix {
        let index: BTreeMap<&str, usize> = order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
        let mut matrix = vec![vec![0; order.len()]; order.len()];
        for edge in self.edges.values() {
            let (Some(&a), Some(&b)) = (index.get(edge.id_a.as_str()), index.get(edge.id_b.as_str())) else {
                continue;
            };
            let weight = modality_to_int(&edge.modality);
            matrix[a][b] = weight;
            if !edge.directed {
                matrix[b][a] = weight;
            }
        }
        matrix
    }

    fn canonic_order(&self, fast: bool) -> Result<Vec<String>> {
        let config = CanonConfig::default();
        let mut keys: BTreeMap<String, (String, String, String)> = BTreeMap::new();
        for component in self.split_connex_compounds()? {
            let tree = to_canonic_tree(&component, &config)?;
            let trace = tree.to_string();
            let mapping = tree.map_node();
            for id in component.ordered_nodes_ids() {
                let hashes = mapping.get(&id).map(|hashes| hashes.join(",")).unwrap_or_default();
                keys.insert(id, (trace.clone(), hashes, String::new()));
            }
        }

        let mut counts: BTreeMap<(String, String, String), usize> = BTreeMap::new();
        for key in keys.values() {
            *counts.entry(key.clone()).or_default() += 1;
        }
        let rule = TreeRule::compile(DEFAULT_BRANCH_RULE)?;
        let no_ignore = BTreeSet::new();
        for (id, key) in keys.iter_mut() {
            if counts[key] > 1 {
                let mut tree = self.to_dag(id, &DagOptions::default())?.to_tree(id, &no_ignore)?;
                tree.score_tree(&rule)?;
                key.2 = tree.hashtree();
            }
        }

        let mut groups: BTreeMap<&(String, String, String), Vec<String>> = BTreeMap::new();
        for (id, key) in &keys {
            groups.entry(key).or_default().push(id.clone());
        }
        let groups: Vec<Vec<String>> = groups.into_values().collect();
        let tied = groups.iter().filter(|group| group.len() > 1).count();
        debug!("Canonic order of graph {}: {} groups, {tied} tied", self.id, groups.len());

        if fast || tied == 0 {
            return Ok(groups.into_iter().flatten().collect());
        }
        let mut best = None;
        self.search_orderings(&groups, &mut Vec::new(), &mut best);
        Ok(best.map(|(_, order)| order).unwrap_or_default())
    }

    /// Tries every ordering inside every group and keeps the one with the smallest matrix.
    fn search_orderings(
        &self,
        groups: &[Vec<String>],
        prefix: &mut Vec<String>,
        best: &mut Option<(AdjacencyMatrix, Vec<String>)>,
    ) {
        let Some((group, rest)) = groups.split_first() else {
            let matrix = self.matrix_for(prefix);
            if best.as_ref().map_or(true, |(smallest, _)| matrix < *smallest) {
                *best = Some((matrix, prefix.clone()));
            }
            return;
        };
        for ordering in permutations(group) {
            let len = prefix.len();
            prefix.extend(ordering);
            self.search_orderings(rest, prefix, best);
            prefix.truncate(len);
        }
    }
}

fn permutations(items: &[String]) -> Vec<Vec<String>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut result = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let mut rest = items.to_vec();
        rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, item.clone());
            result.push(tail);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::super::labeled_graph;
    use super::*;
    use crate::Edge;

    #[test]
    fn test_modality_to_int() {
        assert_eq!(modality_to_int("2"), 2);
        assert_eq!(modality_to_int(" 3 "), 3);
        assert_eq!(modality_to_int("ar"), 97 + 114);
        assert_eq!(modality_to_int(""), 0);
    }

    #[test]
    fn test_raw_matrix() {
        let mut graph = labeled_graph(&[("a", "A"), ("b", "B"), ("c", "C")], &[("a", "b")]);
        graph.add_edge(Edge::new("2", "b", "c").with_modality("2")).unwrap();
        let (order, matrix) = graph.adjacency_matrix(false, false).unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(matrix, vec![vec![0, 1, 0], vec![1, 0, 2], vec![0, 2, 0]]);

        graph.add_edge(Edge::new("3", "c", "a").directed()).unwrap();
        let (_, matrix) = graph.adjacency_matrix(false, false).unwrap();
        assert_eq!(matrix[2][0], 1);
        assert_eq!(matrix[0][2], 0);
    }

    #[test]
    fn test_canonic_matrix_ignores_ids() {
        // Acetic acid skeleton: C-C(=O)-O with two extra hydrogens on the methyl.
        let mut graph = labeled_graph(
            &[("1", "C"), ("2", "C"), ("3", "O"), ("4", "O"), ("5", "H"), ("6", "H")],
            &[("1", "2"), ("2", "4"), ("1", "5"), ("1", "6")],
        );
        graph.add_edge(Edge::new("double", "2", "3").with_modality("2")).unwrap();

        let (order, matrix) = graph.adjacency_matrix(true, false).unwrap();
        assert_eq!(order.len(), 6);
        let relabeled = graph.relabeled(|id| format!("z{id}")).unwrap();
        let (other_order, other_matrix) = relabeled.adjacency_matrix(true, false).unwrap();
        assert_eq!(matrix, other_matrix);

        let labels = |graph: &Graph, order: &[String]| -> Vec<String> {
            order.iter().map(|id| graph.node(id).unwrap().label.clone()).collect()
        };
        assert_eq!(labels(&graph, &order), labels(&relabeled, &other_order));
    }

    #[test]
    fn test_permutations() {
        let items: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let all = permutations(&items);
        assert_eq!(all.len(), 6);
        assert_eq!(all[0], items);
        assert_eq!(permutations(&[]), vec![Vec::<String>::new()]);
    }
}
