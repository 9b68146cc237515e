use anyhow::{Context, Result};
use thiserror::Error;
use tracing::*;

use crate::{Edge, Graph, Node};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DimacsError {
    #[error("No 'p edge <vertices> <edges>' header found")]
    MissingHeader,
    #[error("Malformed problem line '{0}'")]
    BadHeader(String),
    #[error("Malformed edge line {0}: '{1}'")]
    BadEdge(usize, String),
}

/// Parses a DIMACS edge file.
///
/// Vertices are `1..=V`, labeled `"."`. Edges are numbered from 1 in file order with
/// modality `"1"`. Comment lines and anything before the problem line are skipped.
pub fn parse_dimacs(text: &str) -> Result<Graph> {
    let mut lines = text.lines().enumerate();
    let header = lines
        .by_ref()
        .map(|(_, line)| line.trim())
        .find(|line| line.starts_with("p "))
        .ok_or(DimacsError::MissingHeader)?;

    let fields: Vec<&str> = header.split_whitespace().collect();
    let (vertices, edges) = match fields.as_slice() {
        [_, _, vertices, edges] => (
            vertices
                .parse::<usize>()
                .map_err(|_| DimacsError::BadHeader(header.to_string()))?,
            edges
                .parse::<usize>()
                .map_err(|_| DimacsError::BadHeader(header.to_string()))?,
        ),
        _ => return Err(DimacsError::BadHeader(header.to_string()).into()),
    };

    let mut graph = Graph::new("");
    graph.add_nodes((1..=vertices).map(|id| Node::new(id.to_string(), ".")))?;
    let mut id_edge = 1;
    for (number, line) in lines {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["e", a, b] => {
                graph
                    .add_edge(Edge::new(id_edge.to_string(), *a, *b))
                    .context(DimacsError::BadEdge(number + 1, line.to_string()))?;
                id_edge += 1;
            }
            ["e", ..] => return Err(DimacsError::BadEdge(number + 1, line.to_string()).into()),
            _ => {}
        }
    }
    if graph.edge_count() != edges {
        warn!("DIMACS header announced {edges} edges, found {}", graph.edge_count());
    }
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dimacs() {
        let text = "c a triangle with a tail\np edge 4 4\ne 1 2\ne 2 3\ne 3 1\ne 3 4\n";
        let graph = parse_dimacs(text).unwrap();
        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.edge_count(), 4);
        assert_eq!(graph.node("4").unwrap().label, ".");
        let edge = graph.edge("4").unwrap();
        assert_eq!((edge.id_a.as_str(), edge.id_b.as_str()), ("3", "4"));
        assert_eq!(edge.modality, "1");
    }

    #[test]
    fn test_dimacs_errors() {
        let err = parse_dimacs("e 1 2").unwrap_err();
        assert_eq!(err.downcast_ref::<DimacsError>(), Some(&DimacsError::MissingHeader));

        let err = parse_dimacs("p edge three 1").unwrap_err();
        assert!(matches!(err.downcast_ref::<DimacsError>(), Some(DimacsError::BadHeader(_))));

        let err = parse_dimacs("p edge 2 1\ne 1 5").unwrap_err();
        assert!(matches!(err.downcast_ref::<DimacsError>(), Some(DimacsError::BadEdge(2, _))));
    }
}
