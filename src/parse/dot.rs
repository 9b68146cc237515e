use std::collections::BTreeMap;

use anyhow::{Context, Result};
use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, take_while1},
    character::complete::{char, multispace0, none_of},
    combinator::{all_consuming, map, opt, recognize, value},
    error::{context, convert_error, VerboseError},
    multi::{many0, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};
use thiserror::Error;
use tracing::*;

use crate::{Edge, Graph, Node};

type Res<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DotError {
    #[error("Invalid DOT text:\n{0}")]
    Syntax(String),
    #[error("Unterminated block comment")]
    UnterminatedComment,
}

#[derive(Debug, Clone, PartialEq)]
enum Statement {
    Node(String, BTreeMap<String, String>),
    Edges(Vec<String>, BTreeMap<String, String>),
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
struct DotGraph {
    id: String,
    statements: Vec<Statement>,
}

fn ws<'a, T>(inner: impl FnMut(&'a str) -> Res<'a, T>) -> impl FnMut(&'a str) -> Res<'a, T> {
    delimited(multispace0, inner, multispace0)
}

fn identifier(input: &str) -> Res<String> {
    alt((
        delimited(
            char('"'),
            map(
                opt(escaped_transform(
                    none_of("\\\""),
                    '\\',
                    alt((value("\"", char('"')), value("\\", char('\\')), value("\n", char('n')))),
                )),
                Option::unwrap_or_default,
            ),
            char('"'),
        ),
        map(
            recognize(pair(
                opt(char('-')),
                take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '.'),
            )),
            String::from,
        ),
    ))(input)
}

fn attribute(input: &str) -> Res<(String, String)> {
    separated_pair(ws(identifier), char('='), ws(identifier))(input)
}

fn attributes(input: &str) -> Res<BTreeMap<String, String>> {
    map(
        many0(ws(delimited(
            char('['),
            terminated(separated_list0(ws(alt((char(','), char(';')))), attribute), multispace0),
            char(']'),
        ))),
        |lists| lists.into_iter().flatten().collect(),
    )(input)
}

fn edge_op(input: &str) -> Res<&str> {
    ws(alt((tag("--"), tag("->"))))(input)
}

fn statement(input: &str) -> Res<Statement> {
    alt((
        map(
            pair(
                ws(alt((tag("graph"), tag("node"), tag("edge")))),
                preceded(multispace0, delimited(char('['), is_not("]"), char(']'))),
            ),
            |_| Statement::Ignored,
        ),
        map(
            pair(separated_list1(edge_op, ws(identifier)), attributes),
            |(ids, attrs)| {
                if ids.len() > 1 {
                    Statement::Edges(ids, attrs)
                } else {
                    Statement::Node(ids.into_iter().next().unwrap_or_default(), attrs)
                }
            },
        ),
    ))(input)
}

fn statement_line(input: &str) -> Res<Statement> {
    alt((
        map(attribute, |_| Statement::Ignored),
        statement,
    ))(input)
}

fn dot_graph(input: &str) -> Res<DotGraph> {
    map(
        tuple((
            ws(opt(tag("strict"))),
            context("graph keyword", ws(alt((tag("digraph"), tag("graph"))))),
            opt(ws(identifier)),
            context(
                "graph body",
                delimited(
                    ws(char('{')),
                    many0(terminated(ws(statement_line), opt(ws(char(';'))))),
                    ws(char('}')),
                ),
            ),
        )),
        |(_, _, id, statements)| DotGraph {
            id: id.unwrap_or_default(),
            statements,
        },
    )(input)
}

/// Removes `//` line comments, `#` preprocessor lines and `/* */` block comments,
/// leaving quoted strings untouched.
fn strip_comments(text: &str) -> Result<String, DotError> {
    let mut output = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut line_start = true;
    while let Some(c) = chars.next() {
        if in_string {
            output.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    output.push(escaped);
                }
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                output.push(c);
            }
            ('/', Some('/')) => {
                while chars.next_if(|&next| next != '\n').is_some() {}
            }
            ('#', _) if line_start => {
                while chars.next_if(|&next| next != '\n').is_some() {}
            }
            ('/', Some('*')) => {
                chars.next();
                let mut previous = ' ';
                loop {
                    match chars.next() {
                        Some('/') if previous == '*' => break,
                        Some(next) => previous = next,
                        None => return Err(DotError::UnterminatedComment),
                    }
                }
                output.push(' ');
            }
            _ => output.push(c),
        }
        line_start = c == '\n' || (line_start && c.is_whitespace());
    }
    Ok(output)
}

/// Parses every graph of a DOT text.
///
/// Node statements set labels from the `label` attribute, edge statements take their
/// modality from `weight`. Nodes first seen in an edge get an empty label, and every edge
/// is undirected, numbered from 1 in order of appearance.
pub fn from_dot(text: &str) -> Result<Vec<Graph>> {
    let text = strip_comments(text)?;
    let (_, parsed) = all_consuming(preceded(multispace0, many0(ws(dot_graph))))(text.as_str())
        .map_err(|e| match e {
            nom::Err::Error(e) | nom::Err::Failure(e) => DotError::Syntax(convert_error(text.as_str(), e)),
            nom::Err::Incomplete(_) => DotError::Syntax("incomplete input".to_string()),
        })?;
    parsed
        .into_iter()
        .map(|dot| {
            let id = dot.id.clone();
            build_graph(dot).context(format!("While building DOT graph '{id}'"))
        })
        .collect()
}

/// Parses a DOT text holding exactly one graph.
pub fn parse_dot(text: &str) -> Result<Graph> {
    let mut graphs = from_dot(text)?;
    if graphs.len() != 1 {
        return Err(DotError::Syntax(format!("expected one graph, found {}", graphs.len())).into());
    }
    Ok(graphs.remove(0))
}

fn build_graph(dot: DotGraph) -> Result<Graph> {
    let mut labels: BTreeMap<String, String> = BTreeMap::new();
    let mut edges: Vec<(String, String, String)> = Vec::new();
    for statement in dot.statements {
        match statement {
            Statement::Node(id, attrs) => {
                let label = attrs.get("label").cloned().unwrap_or_default();
                labels.insert(id, label);
            }
            Statement::Edges(ids, attrs) => {
                let modality = attrs.get("weight").cloned().unwrap_or_else(|| "1".to_string());
                for id in &ids {
                    labels.entry(id.clone()).or_default();
                }
                for window in ids.windows(2) {
                    edges.push((window[0].clone(), window[1].clone(), modality.clone()));
                }
            }
            Statement::Ignored => {}
        }
    }

    let mut graph = Graph::new(dot.id);
    graph.add_nodes(labels.into_iter().map(|(id, label)| Node::new(id, label)))?;
    for (i, (a, b, modality)) in edges.into_iter().enumerate() {
        graph.add_edge(Edge::new((i + 1).to_string(), a, b).with_modality(modality))?;
    }
    debug!(
        "Parsed DOT graph '{}': {} nodes, {} edges",
        graph.id,
        graph.node_count(),
        graph.edge_count()
    );
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dot() {
        let text = r#"
            // labeled triangle, one double edge
            strict graph "mol 1" {
                layout=neato;
                node [shape=circle];
                a [label=C];
                b [label="O", color=red]
                a -- b [weight=2];
                b -- c -- a
            }
        "#;
        let graph = parse_dot(text).unwrap();
        assert_eq!(graph.id, "mol 1");
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.node("a").unwrap().label, "C");
        assert_eq!(graph.node("b").unwrap().label, "O");
        assert_eq!(graph.node("c").unwrap().label, "");
        assert_eq!(graph.edge_count(), 3);
        assert_eq!(graph.edge("1").unwrap().modality, "2");
        let last = graph.edge("3").unwrap();
        assert_eq!((last.id_a.as_str(), last.id_b.as_str()), ("c", "a"));
        assert!(!last.directed);
    }

    #[test]
    fn test_several_graphs_and_comments() {
        let text = "graph { 1 -- 2 } /* second\n one */ digraph g { x -> y; y -> x }";
        let graphs = from_dot(text).unwrap();
        assert_eq!(graphs.len(), 2);
        assert_eq!(graphs[0].id, "");
        assert_eq!(graphs[1].id, "g");
        assert_eq!(graphs[1].edge_count(), 2);
        assert!(parse_dot(text).is_err());
    }

    #[test]
    fn test_dot_errors() {
        assert!(matches!(
            from_dot("graph { a -- b ").unwrap_err().downcast_ref::<DotError>(),
            Some(DotError::Syntax(_))
        ));
        assert_eq!(
            from_dot("graph { /* a -- b }").unwrap_err().downcast_ref::<DotError>(),
            Some(&DotError::UnterminatedComment)
        );
    }
}
