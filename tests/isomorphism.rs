use std::collections::BTreeSet;

use canonic::*;
use proptest::prelude::*;

const LABELS: [&str; 3] = ["C", "N", "O"];

/// Small labeled graph with nodes `v0..vn`, no loops and no parallel edges.
fn build(labels: &[usize], pairs: &[(usize, usize, u8)]) -> Graph {
    let n = labels.len();
    let mut graph = Graph::new("random");
    for (i, label) in labels.iter().enumerate() {
        graph.add_node(Node::new(format!("v{i}"), LABELS[*label])).unwrap();
    }
    let mut seen = BTreeSet::new();
    for (a, b, modality) in pairs {
        let (a, b) = (a % n, b % n);
        if a == b || !seen.insert((a.min(b), a.max(b))) {
            continue;
        }
        let edge = Edge::new(format!("e{}", seen.len()), format!("v{a}"), format!("v{b}")).with_modality(modality.to_string());
        graph.add_edge(edge).unwrap();
    }
    graph
}

fn random_graph() -> impl Strategy<Value = Graph> {
    (1usize..7).prop_flat_map(|n| {
        (
            proptest::collection::vec(0usize..LABELS.len(), n),
            proptest::collection::vec((0usize..n, 0usize..n, 1u8..3), 0..(2 * n)),
        )
            .prop_map(|(labels, pairs)| build(&labels, &pairs))
    })
}

/// The graph with its node ids permuted and its edge ids reversed.
fn shuffled(graph: &Graph, permutation: &[usize]) -> Graph {
    let edges = graph.edge_count();
    graph
        .relabeled(|id| {
            let (prefix, index) = id.split_at(1);
            let index: usize = index.parse().unwrap();
            match prefix {
                "v" => format!("n{}", permutation[index]),
                _ => format!("x{}", edges - index),
            }
        })
        .unwrap()
}

fn graph_and_permutation() -> impl Strategy<Value = (Graph, Vec<usize>)> {
    random_graph().prop_flat_map(|graph| {
        let n = graph.node_count();
        (Just(graph), Just((0..n).collect::<Vec<_>>()).prop_shuffle())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn trace_ignores_ids((graph, permutation) in graph_and_permutation()) {
        let config = CanonConfig::default();
        let renamed = shuffled(&graph, &permutation);
        prop_assert_eq!(scott_trace(&graph, &config).unwrap(), scott_trace(&renamed, &config).unwrap());
    }

    #[test]
    fn uncompressed_trace_ignores_ids((graph, permutation) in graph_and_permutation()) {
        let config = CanonConfig::default().compress(false).allow_hashes(false);
        let renamed = shuffled(&graph, &permutation);
        prop_assert_eq!(scott_trace(&graph, &config).unwrap(), scott_trace(&renamed, &config).unwrap());
    }

    #[test]
    fn union_trace_ignores_component_order(left in random_graph(), right in random_graph()) {
        let config = CanonConfig::default();
        let mut left_first = Graph::new("union");
        left_first.include_graph(&left, "a").unwrap();
        left_first.include_graph(&right, "b").unwrap();
        let mut right_first = Graph::new("union");
        right_first.include_graph(&right, "a").unwrap();
        right_first.include_graph(&left, "b").unwrap();

        let trace = scott_trace(&left_first, &config).unwrap();
        prop_assert_eq!(&trace, &scott_trace(&right_first, &config).unwrap());
        let components = left.split_connex_compounds().unwrap().len() + right.split_connex_compounds().unwrap().len();
        prop_assert_eq!(trace.split('|').count(), components);
    }
}

#[test]
fn isomers_are_told_apart() {
    let config = CanonConfig::default();
    let trace = |smiles: &str| scott_trace(&smiles_to_graph(smiles, false).unwrap(), &config).unwrap();
    assert_eq!(trace("CC(C)O"), trace("OC(C)C"));
    assert_ne!(trace("CC(C)O"), trace("CCCO"));
    assert_eq!(trace("c1ccncc1"), trace("n1ccccc1"));
    assert_ne!(trace("c1ccncc1"), trace("c1cnccc1C"));
}
