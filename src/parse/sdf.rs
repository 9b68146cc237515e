use anyhow::{Context, Result};
use thiserror::Error;
use tracing::*;

use crate::{Edge, Graph, Node};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MolError {
    #[error("Missing counts line")]
    MissingCounts,
    #[error("Malformed counts line '{0}'")]
    BadCounts(String),
    #[error("Malformed atom line {0}: '{1}'")]
    BadAtom(usize, String),
    #[error("Malformed bond line {0}: '{1}'")]
    BadBond(usize, String),
    #[error("Expected {expected} lines of atoms and bonds, found {found}")]
    Truncated { expected: usize, found: usize },
}

/// Fixed-width field of a V2000 line, trimmed.
fn column(line: &str, start: usize, end: usize) -> &str {
    line.get(start..end.min(line.len())).unwrap_or("").trim()
}

/// Parses one MDL V2000 block.
///
/// Atoms become nodes `1..=n` labeled with their symbol; bonds become edges numbered
/// from 1 whose modality is the bond type column. With `ignore_hydrogens`, hydrogen atoms
/// and their bonds are skipped.
pub fn parse_mol(text: &str, ignore_hydrogens: bool) -> Result<Graph> {
    let lines: Vec<&str> = text.lines().collect();
    let counts_index = lines
        .iter()
        .position(|line| line.trim_end().ends_with("V2000"))
        .unwrap_or(3);
    let counts = lines.get(counts_index).ok_or(MolError::MissingCounts)?;
    let parse_count = |start| {
        column(counts, start, start + 3)
            .parse::<usize>()
            .map_err(|_| MolError::BadCounts(counts.to_string()))
    };
    let (atoms_nb, bonds_nb) = (parse_count(0)?, parse_count(3)?);
    let name = counts_index.checked_sub(3).and_then(|i| lines.get(i)).map_or("", |name| name.trim());

    let body = &lines[counts_index + 1..];
    if body.len() < atoms_nb + bonds_nb {
        return Err(MolError::Truncated {
            expected: atoms_nb + bonds_nb,
            found: body.len(),
        }
        .into());
    }

    let mut graph = Graph::new(name);
    for (i, line) in body[..atoms_nb].iter().enumerate() {
        let symbol = line
            .split_whitespace()
            .nth(3)
            .filter(|symbol| symbol.chars().all(char::is_alphabetic))
            .ok_or_else(|| MolError::BadAtom(i + 1, line.to_string()))?;
        if ignore_hydrogens && symbol == "H" {
            continue;
        }
        graph.add_node(Node::new((i + 1).to_string(), symbol))?;
    }

    let mut id_edge = 1;
    for (i, line) in body[atoms_nb..atoms_nb + bonds_nb].iter().enumerate() {
        let bad_bond = || MolError::BadBond(i + 1, line.to_string());
        let (a, b, kind) = (column(line, 0, 3), column(line, 3, 6), column(line, 6, 9));
        if a.parse::<usize>().is_err() || b.parse::<usize>().is_err() || kind.is_empty() {
            return Err(bad_bond().into());
        }
        if !graph.contains_node(a) || !graph.contains_node(b) {
            if ignore_hydrogens {
                continue;
            }
            return Err(bad_bond().into());
        }
        graph
            .add_edge(Edge::new(id_edge.to_string(), a, b).with_modality(kind))
            .context(bad_bond())?;
        id_edge += 1;
    }
    trace!("Parsed molecule '{}': {} atoms, {} bonds", graph.id, graph.node_count(), graph.edge_count());
    Ok(graph)
}

/// Parses every molecule of an SDF text. Records are separated by `$$$$` and data
/// fields after `M  END` are ignored.
pub fn from_sdf(text: &str, ignore_hydrogens: bool) -> Result<Vec<Graph>> {
    let mut graphs = Vec::new();
    for (i, record) in text.split("$$$$").enumerate() {
        if record.trim().is_empty() {
            continue;
        }
        let record = record
            .strip_prefix("\r\n")
            .or_else(|| record.strip_prefix('\n'))
            .unwrap_or(record);
        let block = record.split("M  END").next().unwrap_or(record);
        graphs.push(parse_mol(block, ignore_hydrogens).context(format!("While parsing SDF record {}", i + 1))?);
    }
    debug!("Parsed {} molecules from SDF", graphs.len());
    Ok(graphs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WATER: &str = "water
  hand-written

  3  2  0  0  0  0  0  0  0  0999 V2000
    0.0000    0.0000    0.0000 O   0  0  0  0  0  0  0  0  0  0  0  0
    0.9572    0.0000    0.0000 H   0  0  0  0  0  0  0  0  0  0  0  0
   -0.2400    0.9266    0.0000 H   0  0  0  0  0  0  0  0  0  0  0  0
  1  2  1  0
  1  3  1  0
M  END
";

    #[test]
    fn test_parse_mol() {
        let graph = parse_mol(WATER, false).unwrap();
        assert_eq!(graph.id, "water");
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.node("1").unwrap().label, "O");
        assert_eq!(graph.edge("2").unwrap().id_b, "3");

        let heavy = parse_mol(WATER, true).unwrap();
        assert_eq!(heavy.node_count(), 1);
        assert_eq!(heavy.edge_count(), 0);
    }

    #[test]
    fn test_from_sdf() {
        let text = format!("{WATER}> <NAME>\nwater\n\n$$$$\n{WATER}$$$$\n");
        let graphs = from_sdf(&text, false).unwrap();
        assert_eq!(graphs.len(), 2);
        assert!(graphs.iter().all(|graph| graph.edge_count() == 2));
        assert_eq!(graphs[1].id, "water");
    }

    #[test]
    fn test_truncated_mol() {
        let text: String = WATER.lines().take(6).map(|line| format!("{line}\n")).collect();
        let err = parse_mol(&text, false).unwrap_err();
        assert_eq!(
            err.downcast_ref::<MolError>(),
            Some(&MolError::Truncated { expected: 5, found: 2 })
        );
    }
}
