use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use tracing::*;

use crate::{to_cgraph, CGraph, CanonConfig, Graph};

/// The neighborhood of `root` up to `size` hops, with every edge between kept vertices.
pub fn extract_subgraph(graph: &Graph, root: &str, size: usize) -> Result<Graph> {
    let mut subgraph = graph.clone();
    subgraph.reset_floor();
    subgraph.group_by_floor(root)?;
    let far: Vec<String> = subgraph
        .nodes()
        .filter(|node| node.floor.map_or(true, |floor| floor > size))
        .map(|node| node.id.clone())
        .collect();
    for id in &far {
        subgraph.remove_node(id)?;
    }
    subgraph.reset_floor();
    subgraph.id = format!("{}:{root}", graph.id);
    trace!("Fragment of {root} (size {size}): {} nodes", subgraph.node_count());
    Ok(subgraph)
}

/// One fragment per vertex, keyed by the vertex it is centered on.
pub fn fragment_graph(graph: &Graph, size: usize) -> Result<Vec<(String, Graph)>> {
    graph
        .ordered_nodes_ids()
        .into_iter()
        .map(|id| extract_subgraph(graph, &id, size).map(|fragment| (id, fragment)))
        .collect()
}

/// The canonical form of the fragment centered on each vertex.
pub fn map_cgraph(graph: &Graph, size: usize, config: &CanonConfig) -> Result<BTreeMap<String, CGraph>> {
    let mut mapping = BTreeMap::new();
    for (id, fragment) in fragment_graph(graph, size)? {
        let cgraph = to_cgraph(&fragment, config).context(format!("While canonizing the fragment of {id}"))?;
        mapping.insert(id, cgraph);
    }
    Ok(mapping)
}

/// How many vertices share each fragment canonical form.
pub fn fragment_projection(graph: &Graph, size: usize, config: &CanonConfig) -> Result<BTreeMap<CGraph, usize>> {
    let mut projection = BTreeMap::new();
    for cgraph in map_cgraph(graph, size, config)?.into_values() {
        *projection.entry(cgraph).or_insert(0) += 1;
    }
    Ok(projection)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NgramMode {
    /// One sequence per minimum-hop path from the root.
    Linear,
    /// Fragments grouped by their distance to the root.
    Radial,
}

impl FromStr for NgramMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linear" => Ok(Self::Linear),
            "radial" => Ok(Self::Radial),
            _ => bail!("Unknown n-gram mode '{s}', expected 'linear' or 'radial'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ngrams {
    Linear(Vec<Vec<CGraph>>),
    Radial(BTreeMap<usize, Vec<CGraph>>),
}

/// Sequences of fragment canonical forms seen around `root`.
///
/// # Arguments
///
/// * `window` - Vertices closer than `window` hops to the root take part.
/// * `fragment_size` - Radius of the fragment canonized for each vertex.
pub fn extract_ngrams(
    graph: &Graph,
    root: &str,
    mode: NgramMode,
    window: usize,
    fragment_size: usize,
    config: &CanonConfig,
) -> Result<Ngrams> {
    ngrams_around(graph, root, mode, window, &mut |id| {
        to_cgraph(&extract_subgraph(graph, id, fragment_size)?, config)
    })
}

/// [`extract_ngrams`] from every vertex, with each fragment canonized only once.
pub fn enum_ngrams(
    graph: &Graph,
    mode: NgramMode,
    window: usize,
    fragment_size: usize,
    config: &CanonConfig,
) -> Result<Vec<Ngrams>> {
    let mapping = map_cgraph(graph, fragment_size, config)?;
    let mut lookup = |id: &str| {
        mapping
            .get(id)
            .cloned()
            .with_context(|| format!("No fragment for vertex {id}"))
    };
    let mut result = Vec::new();
    for id in graph.ordered_nodes_ids() {
        result.push(ngrams_around(graph, &id, mode, window, &mut lookup)?);
    }
    debug!("Enumerated n-grams from {} roots", result.len());
    Ok(result)
}

fn ngrams_around(
    graph: &Graph,
    root: &str,
    mode: NgramMode,
    window: usize,
    fragment_of: &mut dyn FnMut(&str) -> Result<CGraph>,
) -> Result<Ngrams> {
    let mut floored = graph.clone();
    floored.reset_floor();
    let floors = floored.group_by_floor(root)?;
    let level_max = floors.keys().max().map_or(0, |max| window.min(*max));

    let mut fragments = BTreeMap::new();
    for floor in 0..level_max {
        for id in &floors[&floor] {
            fragments.insert(id.clone(), fragment_of(id)?);
        }
    }

    match mode {
        NgramMode::Linear => {
            let mut ngrams = Vec::new();
            for floor in 1..level_max {
                for id in &floors[&floor] {
                    for path in graph.enumerate_simple_paths(root, id)? {
                        ngrams.push(path.iter().map(|id| fragments[id].clone()).collect());
                    }
                }
            }
            Ok(Ngrams::Linear(ngrams))
        }
        NgramMode::Radial => Ok(Ngrams::Radial(
            (0..level_max)
                .map(|floor| (floor, floors[&floor].iter().map(|id| fragments[id].clone()).collect()))
                .collect(),
        )),
    }
}
