mod dimacs;
pub use dimacs::*;

mod dot;
pub use dot::*;

mod sdf;
pub use sdf::*;

mod smiles;
pub use smiles::*;

use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context, Result};

use crate::Graph;

/// Text formats graphs can be read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    Dimacs,
    Dot,
    Sdf,
    /// One SMILES string per line.
    Smiles,
}

impl FromStr for GraphFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dimacs" => Ok(Self::Dimacs),
            "dot" | "gv" => Ok(Self::Dot),
            "sdf" | "mol" => Ok(Self::Sdf),
            "smiles" | "smi" => Ok(Self::Smiles),
            _ => bail!("Unknown graph format '{s}'"),
        }
    }
}

impl GraphFormat {
    /// Guesses the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|extension| extension.to_str())
            .and_then(|extension| extension.parse().ok())
    }
}

/// Parses every graph held by `text`.
pub fn parse_graphs(text: &str, format: GraphFormat, ignore_hydrogens: bool) -> Result<Vec<Graph>> {
    match format {
        GraphFormat::Dimacs => Ok(vec![parse_dimacs(text)?]),
        GraphFormat::Dot => from_dot(text),
        GraphFormat::Sdf => from_sdf(text, ignore_hydrogens),
        GraphFormat::Smiles => text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| smiles_to_graph(line, ignore_hydrogens))
            .collect(),
    }
}

/// Reads and parses a graph file.
pub fn read_graphs(path: impl AsRef<Path>, format: GraphFormat, ignore_hydrogens: bool) -> Result<Vec<Graph>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
    parse_graphs(&text, format, ignore_hydrogens).context(format!("While parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formats() {
        assert_eq!("DOT".parse::<GraphFormat>().unwrap(), GraphFormat::Dot);
        assert_eq!(GraphFormat::from_path(Path::new("x/benzene.smi")), Some(GraphFormat::Smiles));
        assert_eq!(GraphFormat::from_path(Path::new("graph")), None);
        assert!("xml".parse::<GraphFormat>().is_err());
    }

    #[test]
    fn test_parse_smiles_lines() {
        let graphs = parse_graphs("CCO\n\n  c1ccccc1 \n", GraphFormat::Smiles, true).unwrap();
        assert_eq!(graphs.len(), 2);
        assert_eq!(graphs[1].id, "c1ccccc1");
        assert_eq!(graphs[1].node_count(), 6);
    }
}
