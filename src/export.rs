use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use std::io::Write;

use anyhow::{bail, Context, Result};
use tracing::*;

use crate::{map_cgraph, modality_to_int, AdjacencyMatrix, CGraph, CanonConfig, Edge, Graph, NodeKind};

/// Writes the DOT text of a graph to `output_dot` and optionally renders it as an image.
///
/// # Arguments
///
/// * `graph` - Any graph, including one rewritten by [`Graph::to_dag`].
/// * `compress_magnets` - Whether magnet labels are aliased, as in [`to_dot`].
/// * `output_dot` - The path to save the DOT file.
/// * `output_image` - Optional path to save the rendered image (e.g., "dag.png"). Needs
///   Graphviz `dot` on the path.
pub fn visualize_graph(
    graph: &Graph,
    compress_magnets: bool,
    output_dot: &str,
    output_image: Option<&str>,
) -> Result<()> {
    let mut file = std::fs::File::create(output_dot).context(format!("Failed to create DOT file {output_dot}"))?;
    file.write_all(to_dot(graph, compress_magnets).as_bytes())
        .context(format!("Failed to write DOT file {output_dot}"))?;
    info!("DOT file saved to {output_dot}");

    if let Some(image_path) = output_image {
        let status = std::process::Command::new("dot")
            .args(["-Tpng", output_dot, "-o", image_path])
            .status()
            .context("Failed to execute Graphviz 'dot' command")?;
        if !status.success() {
            bail!("Graphviz 'dot' command failed with status: {status}");
        }
        info!("Image rendered to {image_path}");
    }
    Ok(())
}

/// DOT representation of a graph.
///
/// Mirror and virtual nodes are labeled `#` or `*` followed by their magnet, which is
/// replaced by a short `$k` alias when `compress_magnets` is set.
pub fn to_dot(graph: &Graph, compress_magnets: bool) -> String {
    let mut aliases: BTreeMap<&str, String> = BTreeMap::new();
    let mut dot = String::new();
    let _ = writeln!(dot, "graph \"{}\" {{", escape(&graph.id));

    for node in graph.nodes() {
        let (label, style) = match &node.kind {
            NodeKind::Plain => (if node.label.is_empty() { ".".to_string() } else { node.label.clone() }, ""),
            NodeKind::Virtual { magnet } => (format!("*{}", alias(&mut aliases, magnet, compress_magnets)), ", shape=box"),
            NodeKind::Mirror { magnet, .. } => (
                format!("#{}", alias(&mut aliases, magnet, compress_magnets)),
                ", shape=box, style=dashed",
            ),
        };
        let _ = writeln!(dot, "    \"{}\" [label=\"{}\"{style}];", escape(&node.id), escape(&label));
    }

    for edge in graph.edges() {
        let arrow = if edge.directed { ", dir=forward" } else { "" };
        let _ = writeln!(
            dot,
            "    \"{}\" -- \"{}\" [label=\"{}\"{arrow}];",
            escape(&edge.id_a),
            escape(&edge.id_b),
            escape(&edge.modality)
        );
    }

    let _ = writeln!(dot, "}}");
    dot
}

fn alias<'a>(aliases: &mut BTreeMap<&'a str, String>, magnet: &'a str, compress: bool) -> String {
    if !compress {
        return magnet.to_string();
    }
    let next = format!("${}", aliases.len() + 1);
    aliases.entry(magnet).or_insert(next).clone()
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Matrix view of a graph for learning pipelines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Axe {
    /// Vertex ids, in the row order of every matrix.
    pub order: Vec<String>,
    /// Adjacency matrix.
    pub adjacency: AdjacencyMatrix,
    /// Canonical form of the fragment centered on each vertex.
    pub features: Vec<CGraph>,
    /// Per-edge embedding at both `[i][j]` and `[j][i]`, zero-filled elsewhere.
    pub embeddings: Vec<Vec<Vec<i64>>>,
}

/// [`to_axe_with`] embedding each edge as its integer modality.
pub fn to_axe(graph: &Graph, fragment_size: usize, config: &CanonConfig) -> Result<Axe> {
    to_axe_with(graph, fragment_size, config, |edge| vec![modality_to_int(&edge.modality)])
}

pub fn to_axe_with(
    graph: &Graph,
    fragment_size: usize,
    config: &CanonConfig,
    embed: impl Fn(&Edge) -> Vec<i64>,
) -> Result<Axe> {
    let (order, adjacency) = graph.adjacency_matrix(false, true)?;
    let mut fragments = map_cgraph(graph, fragment_size, config)?;
    let features = order
        .iter()
        .map(|id| {
            fragments
                .remove(id)
                .with_context(|| format!("No fragment for vertex {id}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let index: BTreeMap<&str, usize> = order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
    let mut cells: BTreeMap<(usize, usize), Vec<i64>> = BTreeMap::new();
    let mut dimension = 0;
    for edge in graph.edges() {
        let embedding = embed(edge);
        dimension = dimension.max(embedding.len());
        let (i, j) = (index[edge.id_a.as_str()], index[edge.id_b.as_str()]);
        cells.insert((i, j), embedding.clone());
        cells.insert((j, i), embedding);
    }

    let size = order.len();
    let embeddings = (0..size)
        .map(|i| {
            (0..size)
                .map(|j| cells.remove(&(i, j)).unwrap_or_else(|| vec![0; dimension]))
                .collect()
        })
        .collect();
    Ok(Axe {
        order,
        adjacency,
        features,
        embeddings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::labeled_graph;
    use crate::DagOptions;

    #[test]
    fn test_dot_of_plain_graph() {
        let mut graph = labeled_graph(&[("a", "C"), ("b", "")], &[]);
        graph.add_edge(Edge::new("1", "a", "b").with_modality("2")).unwrap();
        let dot = to_dot(&graph, true);
        assert!(dot.starts_with("graph \"test\" {"));
        assert!(dot.contains("\"a\" [label=\"C\"];"));
        assert!(dot.contains("\"b\" [label=\".\"];"));
        assert!(dot.contains("\"a\" -- \"b\" [label=\"2\"];"));
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn test_dot_of_rewritten_graph() {
        let graph = labeled_graph(
            &[("A", "A"), ("B", "B"), ("C", "C"), ("D", "D")],
            &[("A", "B"), ("B", "C"), ("B", "D"), ("C", "D")],
        );
        let dag = graph.to_dag("A", &DagOptions::default().allow_hashes(false)).unwrap();
        let compressed = to_dot(&dag, true);
        assert_eq!(compressed.matches("[label=\"*$1\", shape=box]").count(), 2);

        let raw = to_dot(&dag, false);
        assert!(raw.contains("*_()C_-1-_()D_"));
    }

    #[test]
    fn test_visualize_writes_dot_file() {
        let graph = labeled_graph(&[("a", "C"), ("b", "O")], &[("a", "b")]);
        let path = std::env::temp_dir().join(format!("canonic-{}.dot", std::process::id()));
        let path = path.to_str().unwrap();
        visualize_graph(&graph, false, path, None).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), to_dot(&graph, false));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_axe() {
        let mut graph = labeled_graph(&[("1", "C"), ("2", "O"), ("3", "H")], &[("1", "3")]);
        graph.add_edge(Edge::new("2", "1", "2").with_modality("2")).unwrap();
        let axe = to_axe(&graph, 1, &CanonConfig::default()).unwrap();
        assert_eq!(axe.order, vec!["1", "2", "3"]);
        assert_eq!(axe.adjacency[0], vec![0, 2, 1]);
        assert_eq!(axe.features.len(), 3);
        assert_eq!(axe.embeddings[0][1], vec![2]);
        assert_eq!(axe.embeddings[1][0], vec![2]);
        assert_eq!(axe.embeddings[1][2], vec![0]);
    }
}
