use std::collections::BTreeMap;

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, digit1, one_of, satisfy},
    combinator::{all_consuming, map, map_res, opt, recognize},
    multi::{many0_count, many1_count},
    sequence::{pair, preceded, tuple},
    IResult,
};
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use thiserror::Error;
use tracing::*;

use crate::{Edge, Graph, Node};

lazy_static! {
    /// Default valences of the organic subset, lowest first.
    static ref VALENCES: BTreeMap<&'static str, &'static [usize]> = BTreeMap::from([
        ("B", &[3][..]),
        ("C", &[4][..]),
        ("N", &[3, 5][..]),
        ("O", &[2][..]),
        ("P", &[3, 5][..]),
        ("S", &[2, 4, 6][..]),
        ("F", &[1][..]),
        ("Cl", &[1][..]),
        ("Br", &[1][..]),
        ("I", &[1][..]),
    ]);
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SmilesError {
    #[error("Branch start '(' at position {0} without a current atom")]
    BranchNoCurrentAtom(usize),
    #[error("Branch end ')' at position {0} without a matching '('")]
    BranchEndNoStart(usize),
    #[error("Ring closure '{0}' at position {1} without a current atom")]
    RingClosureNoCurrentAtom(String, usize),
    #[error("Malformed ring label at position {0}")]
    BadRingLabel(usize),
    #[error("Ring closure '{0}' is never closed")]
    UnclosedRing(u8),
    #[error("Unclosed bracket '[' at position {0}")]
    UnclosedBracket(usize),
    #[error("Invalid bracket atom '[{0}]'")]
    BadBracket(String),
    #[error("Unknown atom '{0}' at position {1}")]
    UnknownAtom(String, usize),
    #[error("Unclosed branch")]
    UnclosedBranch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bond {
    Single,
    Double,
    Triple,
    Aromatic,
}

impl Bond {
    fn from_symbol(symbol: char) -> Option<Self> {
        match symbol {
            '-' => Some(Bond::Single),
            '=' => Some(Bond::Double),
            '#' => Some(Bond::Triple),
            ':' => Some(Bond::Aromatic),
            _ => None,
        }
    }

    /// Contribution to the valence of either end. Aromatic bonds count once here and
    /// aromatic atoms get one more in [`Atom::implicit_hydrogens`].
    pub fn order(&self) -> usize {
        match self {
            Bond::Single | Bond::Aromatic => 1,
            Bond::Double => 2,
            Bond::Triple => 3,
        }
    }

    /// Edge modality of the bond: its order, or `4` when aromatic.
    pub fn modality(&self) -> &'static str {
        match self {
            Bond::Single => "1",
            Bond::Double => "2",
            Bond::Triple => "3",
            Bond::Aromatic => "4",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    /// Element symbol with its normal case, `*` for a wildcard or `R` for a substituent.
    pub symbol: String,
    pub aromatic: bool,
    /// Hydrogen count written inside brackets. `None` for organic-subset atoms, whose
    /// hydrogens are implied by their valence.
    pub hydrogens: Option<usize>,
    pub charge: i32,
}

impl Atom {
    fn organic(symbol: &str, aromatic: bool) -> Self {
        Self {
            symbol: symbol.to_string(),
            aromatic,
            hydrogens: None,
            charge: 0,
        }
    }

    pub fn is_aromatic(&self) -> bool {
        self.aromatic
    }

    /// Hydrogens to add so that the atom reaches its smallest default valence.
    pub fn implicit_hydrogens(&self, bond_orders: usize) -> usize {
        if let Some(hydrogens) = self.hydrogens {
            return hydrogens;
        }
        let used = bond_orders + usize::from(self.aromatic);
        VALENCES
            .get(self.symbol.as_str())
            .and_then(|valences| valences.iter().find(|valence| **valence >= used))
            .map_or(0, |valence| valence - used)
    }
}

pub type MoleculeGraph = UnGraph<Atom, Bond>;

type Res<'a, T> = IResult<&'a str, T, nom::error::Error<&'a str>>;

fn element_symbol(input: &str) -> Res<(String, bool)> {
    alt((
        map(alt((tag("se"), tag("as"))), |s: &str| (capitalize(s), true)),
        map(
            recognize(pair(satisfy(|c| c.is_ascii_uppercase()), opt(satisfy(|c| c.is_ascii_lowercase())))),
            |s: &str| (s.to_string(), false),
        ),
        map(one_of("bcnops"), |c| (c.to_ascii_uppercase().to_string(), true)),
        map(char('*'), |_| ("*".to_string(), false)),
    ))(input)
}

fn charge(input: &str) -> Res<i32> {
    alt((
        map(
            pair(one_of("+-"), map_res(digit1, str::parse::<i32>)),
            |(sign, n)| if sign == '-' { -n } else { n },
        ),
        map(many1_count(char('+')), |n| n as i32),
        map(many1_count(char('-')), |n| -(n as i32)),
    ))(input)
}

/// `[isotope? symbol chirality? hydrogens? charge? class?]`, without the brackets.
fn bracket_atom(input: &str) -> Res<Atom> {
    map(
        tuple((
            opt(digit1),
            element_symbol,
            many0_count(char('@')),
            opt(preceded(char('H'), opt(map_res(digit1, str::parse::<usize>)))),
            opt(charge),
            opt(preceded(char(':'), digit1)),
        )),
        |(_, (symbol, aromatic), _, hydrogens, charge, _)| Atom {
            symbol,
            aromatic,
            hydrogens: Some(hydrogens.map_or(0, |count| count.unwrap_or(1))),
            charge: charge.unwrap_or(0),
        },
    )(input)
}

fn capitalize(symbol: &str) -> String {
    let mut chars = symbol.chars();
    chars
        .next()
        .map(|first| first.to_ascii_uppercase().to_string() + chars.as_str())
        .unwrap_or_default()
}

/// Parses a SMILES string into a MoleculeGraph.
///
/// Stereochemistry markers are ignored. Two aromatic atoms written next to each other are
/// joined by an aromatic bond unless a bond symbol says otherwise.
///
/// # Arguments
///
/// * `smiles` - The SMILES string to parse.
pub fn parse_smiles(smiles: &str) -> Result<MoleculeGraph> {
    parse_smiles_helper(smiles).context(format!("Failed to parse SMILES string {smiles}"))
}

fn connect(graph: &mut MoleculeGraph, a: NodeIndex, b: NodeIndex, bond: Option<Bond>) {
    let bond = bond.unwrap_or(if graph[a].is_aromatic() && graph[b].is_aromatic() {
        Bond::Aromatic
    } else {
        Bond::Single
    });
    graph.add_edge(a, b, bond);
}

fn parse_smiles_helper(smiles: &str) -> Result<MoleculeGraph, SmilesError> {
    let mut graph = MoleculeGraph::new_undirected();
    let mut current_atom: Option<NodeIndex> = None;
    let mut bond: Option<Bond> = None;
    let mut branch_stack: Vec<NodeIndex> = Vec::new();
    let mut ring_map: BTreeMap<u8, (NodeIndex, Option<Bond>)> = BTreeMap::new();

    let chars: Vec<char> = smiles.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '(' => {
                branch_stack.push(current_atom.ok_or(SmilesError::BranchNoCurrentAtom(i))?);
                i += 1;
            }
            ')' => {
                current_atom = Some(branch_stack.pop().ok_or(SmilesError::BranchEndNoStart(i))?);
                i += 1;
            }
            '-' | '=' | '#' | ':' => {
                bond = Bond::from_symbol(c);
                i += 1;
            }
            '%' | '0'..='9' => {
                let (label, width) = if c == '%' {
                    let digits: String = chars.iter().skip(i + 1).take(2).collect();
                    let label = digits
                        .parse::<u8>()
                        .ok()
                        .filter(|_| digits.len() == 2)
                        .ok_or(SmilesError::BadRingLabel(i))?;
                    (label, 3)
                } else {
                    (c.to_digit(10).unwrap_or(0) as u8, 1)
                };
                let atom = current_atom.ok_or_else(|| SmilesError::RingClosureNoCurrentAtom(label.to_string(), i))?;
                match ring_map.remove(&label) {
                    Some((start_atom, opening_bond)) => {
                        connect(&mut graph, atom, start_atom, bond.or(opening_bond));
                    }
                    None => {
                        ring_map.insert(label, (atom, bond));
                    }
                }
                bond = None;
                i += width;
            }
            '[' => {
                let end = chars[i..]
                    .iter()
                    .position(|&x| x == ']')
                    .map(|offset| i + offset)
                    .ok_or(SmilesError::UnclosedBracket(i))?;
                let content: String = chars[i + 1..end].iter().collect();
                let (_, atom) =
                    all_consuming(bracket_atom)(content.as_str()).map_err(|_| SmilesError::BadBracket(content.clone()))?;
                let new_atom = graph.add_node(atom);
                if let Some(prev_atom) = current_atom {
                    connect(&mut graph, prev_atom, new_atom, bond.take());
                }
                current_atom = Some(new_atom);
                i = end + 1;
            }
            '@' | '/' | '\\' => {
                i += 1;
            }
            '.' => {
                current_atom = None;
                bond = None;
                i += 1;
            }
            _ => {
                let two: String = chars.iter().skip(i).take(2).collect();
                let (atom, width) = match (c, two.as_str()) {
                    (_, "Cl") | (_, "Br") => (Atom::organic(&two, false), 2),
                    ('B' | 'C' | 'N' | 'O' | 'P' | 'S' | 'F' | 'I' | 'R' | '*', _) => {
                        (Atom::organic(&c.to_string(), false), 1)
                    }
                    ('b' | 'c' | 'n' | 'o' | 'p' | 's', _) => {
                        (Atom::organic(&c.to_ascii_uppercase().to_string(), true), 1)
                    }
                    _ => return Err(SmilesError::UnknownAtom(c.to_string(), i)),
                };
                let new_atom = graph.add_node(atom);
                if let Some(prev_atom) = current_atom {
                    connect(&mut graph, prev_atom, new_atom, bond.take());
                }
                current_atom = Some(new_atom);
                i += width;
            }
        }
    }

    if !branch_stack.is_empty() {
        return Err(SmilesError::UnclosedBranch);
    }
    if let Some(label) = ring_map.keys().next() {
        return Err(SmilesError::UnclosedRing(*label));
    }
    Ok(graph)
}

/// Converts a molecule into a [`Graph`].
///
/// Atoms become nodes `1..=n` labeled by their symbol, bonds become edges numbered from 1
/// with the bond modality. Unless `ignore_hydrogens` is set, implicit and bracket
/// hydrogens are then added as `H` nodes bound by single edges.
pub fn molecule_to_graph(molecule: &MoleculeGraph, ignore_hydrogens: bool) -> Result<Graph> {
    let mut graph = Graph::new("");
    let id_of = |index: NodeIndex| (index.index() + 1).to_string();
    for index in molecule.node_indices() {
        graph.add_node(Node::new(id_of(index), molecule[index].symbol.clone()))?;
    }

    let mut id_edge = 0;
    for edge in molecule.edge_references() {
        id_edge += 1;
        graph.add_edge(
            Edge::new(id_edge.to_string(), id_of(edge.source()), id_of(edge.target()))
                .with_modality(edge.weight().modality()),
        )?;
    }

    if !ignore_hydrogens {
        let mut id_node = molecule.node_count();
        for index in molecule.node_indices() {
            let orders = molecule.edges(index).map(|edge| edge.weight().order()).sum();
            for _ in 0..molecule[index].implicit_hydrogens(orders) {
                id_node += 1;
                id_edge += 1;
                graph.add_node(Node::new(id_node.to_string(), "H"))?;
                graph.add_edge(Edge::new(id_edge.to_string(), id_of(index), id_node.to_string()))?;
            }
        }
    }
    Ok(graph)
}

/// Parses a SMILES string straight into a [`Graph`], see [`molecule_to_graph`].
pub fn smiles_to_graph(smiles: &str, ignore_hydrogens: bool) -> Result<Graph> {
    let molecule = parse_smiles(smiles)?;
    let mut graph = molecule_to_graph(&molecule, ignore_hydrogens)?;
    graph.id = smiles.to_string();
    trace!("{smiles}: {} nodes, {} edges", graph.node_count(), graph.edge_count());
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(molecule: &MoleculeGraph) -> Vec<&str> {
        molecule.node_indices().map(|i| molecule[i].symbol.as_str()).collect()
    }

    #[test]
    fn test_parse_ethanol() {
        let molecule = parse_smiles("CCO").unwrap();
        assert_eq!(labels(&molecule), vec!["C", "C", "O"]);
        let edges: Vec<_> = molecule.edge_references().collect();
        assert_eq!(edges.len(), 2);
        assert!(edges.iter().all(|edge| *edge.weight() == Bond::Single));
    }

    #[test]
    fn test_parse_rings() {
        let cyclohexane = parse_smiles("C1CCCCC1").unwrap();
        assert_eq!(cyclohexane.edge_count(), 6);
        for node in cyclohexane.node_indices() {
            assert_eq!(cyclohexane.edges(node).count(), 2);
        }

        let benzene = parse_smiles("c1ccccc1").unwrap();
        assert_eq!(benzene.edge_count(), 6);
        assert!(benzene.edge_references().all(|edge| *edge.weight() == Bond::Aromatic));
        assert!(benzene.node_indices().all(|node| benzene[node].is_aromatic()));

        let biphenyl = parse_smiles("c1ccccc1-c2ccccc2").unwrap();
        let singles = biphenyl
            .edge_references()
            .filter(|edge| *edge.weight() == Bond::Single)
            .count();
        assert_eq!(singles, 1);

        let cyclohexene = parse_smiles("C=1CCCCC=1").unwrap();
        assert_eq!(
            cyclohexene
                .edge_references()
                .filter(|edge| *edge.weight() == Bond::Double)
                .count(),
            1
        );
    }

    #[test]
    fn test_parse_isobutane() {
        let molecule = parse_smiles("CC(C)C").unwrap();
        assert_eq!(molecule.node_count(), 4);
        assert_eq!(molecule.edges(NodeIndex::new(1)).count(), 3);
    }

    #[test]
    fn test_bracket_atoms() {
        let molecule = parse_smiles("[NH4+].[Cl-]").unwrap();
        assert_eq!(labels(&molecule), vec!["N", "Cl"]);
        assert_eq!(molecule[NodeIndex::new(0)].hydrogens, Some(4));
        assert_eq!(molecule[NodeIndex::new(0)].charge, 1);
        assert_eq!(molecule[NodeIndex::new(1)].charge, -1);
        assert_eq!(molecule.edge_count(), 0);

        let pyrrole = parse_smiles("c1cc[nH]c1").unwrap();
        assert_eq!(pyrrole[NodeIndex::new(3)].symbol, "N");
        assert!(pyrrole[NodeIndex::new(3)].aromatic);
        assert_eq!(pyrrole[NodeIndex::new(3)].hydrogens, Some(1));

        let iron = parse_smiles("[56Fe+++]").unwrap();
        assert_eq!(iron[NodeIndex::new(0)].symbol, "Fe");
        assert_eq!(iron[NodeIndex::new(0)].charge, 3);
    }

    #[test]
    fn test_smiles_errors() {
        let error = |smiles: &str| parse_smiles_helper(smiles).unwrap_err();
        assert_eq!(error("(C)"), SmilesError::BranchNoCurrentAtom(0));
        assert_eq!(error("CC)"), SmilesError::BranchEndNoStart(2));
        assert_eq!(error("C1CC"), SmilesError::UnclosedRing(1));
        assert_eq!(error("C[NH4"), SmilesError::UnclosedBracket(1));
        assert_eq!(error("CX"), SmilesError::UnknownAtom("X".to_string(), 1));
        assert_eq!(error("C(C"), SmilesError::UnclosedBranch);
        assert!(matches!(error("C[4]"), SmilesError::BadBracket(_)));
        assert_eq!(error("C%1C"), SmilesError::BadRingLabel(1));
        assert!(parse_smiles("1CC").is_err());
    }

    #[test]
    fn test_implicit_hydrogens() {
        let ethanol = smiles_to_graph("CCO", false).unwrap();
        assert_eq!(ethanol.node_count(), 9);
        assert_eq!(ethanol.edge_count(), 8);
        assert_eq!(ethanol.id, "CCO");
        assert_eq!(ethanol.node("4").unwrap().label, "H");

        let heavy = smiles_to_graph("CCO", true).unwrap();
        assert_eq!(heavy.node_count(), 3);

        assert_eq!(smiles_to_graph("c1ccccc1", false).unwrap().node_count(), 12);
        assert_eq!(smiles_to_graph("C=O", false).unwrap().node_count(), 4);
        assert_eq!(smiles_to_graph("c1ccncc1", false).unwrap().node_count(), 11);
        assert_eq!(smiles_to_graph("[NH4+]", false).unwrap().node_count(), 5);

        let formaldehyde = smiles_to_graph("C=O", true).unwrap();
        assert_eq!(formaldehyde.edge("1").unwrap().modality, "2");
    }
}
