//! A small expression language for scoring nodes and trees.
//!
//! A rule is a list of expressions separated by `>`. Each expression yields one component
//! of the score, and scores compare lexicographically, so later expressions only break
//! ties left by earlier ones.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use lazy_static::lazy_static;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1, multispace0, one_of, satisfy},
    combinator::{all_consuming, consumed, map, map_res, opt, recognize},
    error::{convert_error, VerboseError},
    multi::{many0, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

use crate::{CanonError, Graph, Tree};

type Res<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

/// A dynamically typed rule value.
///
/// Values are totally ordered: `None` first, then numbers (compared numerically whatever
/// their representation), then strings, then tuples (compared lexicographically).
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Int(i64),
    Float(f64),
    Str(String),
    Tuple(Vec<Value>),
}

/// The score of a node or a tree: one value per rule expression.
pub type Score = Vec<Value>;

impl Value {
    fn rank(&self) -> u8 {
        match self {
            Value::None => 0,
            Value::Int(_) | Value::Float(_) => 1,
            Value::Str(_) => 2,
            Value::Tuple(_) => 3,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Tuple(_) => "tuple",
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Tuple(a), Value::Tuple(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => a.rank().cmp(&b.rank()),
            },
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Value::None => write!(f, "None"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Eq,
    Ne,
}

impl BinOp {
    fn from_symbol(symbol: &str) -> Self {
        match symbol {
            "+" => BinOp::Add,
            "-" => BinOp::Sub,
            "*" => BinOp::Mul,
            "/" => BinOp::Div,
            "%" => BinOp::Mod,
            "<" => BinOp::Lt,
            "<=" => BinOp::Le,
            "==" => BinOp::Eq,
            _ => BinOp::Ne,
        }
    }
}

/// What the parser produces, before names are checked against a scope.
#[derive(Debug, Clone, PartialEq)]
enum Syntax {
    Int(i64),
    Float(f64),
    Str(String),
    Attr(String),
    Path(String),
    Call(String, Vec<Syntax>),
    Neg(Box<Syntax>),
    Binary(BinOp, Box<Syntax>, Box<Syntax>),
    Index(Box<Syntax>, Box<Syntax>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attribute {
    Degree,
    Label,
    Bounds,
    NodeId,
    Depth,
    Size,
    Lexic,
    RootLabel,
    RootId,
    ParentModality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    Ord,
    Len,
    Abs,
    Int,
    Float,
    Str,
    Log,
    Sqrt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Node,
    Tree,
}

lazy_static! {
    static ref NODE_ATTRIBUTES: BTreeMap<&'static str, Attribute> = BTreeMap::from([
        ("$degree", Attribute::Degree),
        ("$label", Attribute::Label),
        ("$bounds", Attribute::Bounds),
        ("degree", Attribute::Degree),
        ("label", Attribute::Label),
        ("id_node", Attribute::NodeId),
        ("node.id", Attribute::NodeId),
        ("node.label", Attribute::Label),
    ]);
    static ref TREE_ATTRIBUTES: BTreeMap<&'static str, Attribute> = BTreeMap::from([
        ("$depth", Attribute::Depth),
        ("$size", Attribute::Size),
        ("$lexic", Attribute::Lexic),
        ("$root.label", Attribute::RootLabel),
        ("$root.id", Attribute::RootId),
        ("depth", Attribute::Depth),
        ("size", Attribute::Size),
        ("lexic", Attribute::Lexic),
        ("tree.parent_modality", Attribute::ParentModality),
        ("tree.root.label", Attribute::RootLabel),
        ("tree.root.id", Attribute::RootId),
    ]);
    static ref BUILTINS: BTreeMap<&'static str, Builtin> = BTreeMap::from([
        ("ord", Builtin::Ord),
        ("len", Builtin::Len),
        ("abs", Builtin::Abs),
        ("int", Builtin::Int),
        ("float", Builtin::Float),
        ("str", Builtin::Str),
        ("math.log", Builtin::Log),
        ("math.sqrt", Builtin::Sqrt),
    ]);
}

/// A scope-checked expression, ready for evaluation.
#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Const(Value),
    Attr(Attribute),
    DegreeOf(Box<Expr>),
    NDegree(Box<Expr>, Box<Expr>),
    Builtin(Builtin, Vec<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Index(Box<Expr>, Box<Expr>),
}

/// What a rule is evaluated against.
enum Subject<'a> {
    Node { graph: &'a Graph, id: &'a str },
    Tree(&'a Tree),
}

#[derive(Debug, Clone, PartialEq)]
struct Term {
    source: String,
    expr: Expr,
}

#[derive(Debug, Clone, PartialEq)]
struct Rule {
    source: String,
    terms: Vec<Term>,
}

impl Rule {
    fn compile(source: &str, scope: Scope) -> Result<Self, CanonError> {
        let terms = parse_rule(source)?
            .into_iter()
            .map(|(text, syntax)| {
                Ok(Term {
                    source: text.trim().to_string(),
                    expr: resolve(syntax, scope)?,
                })
            })
            .collect::<Result<Vec<_>, CanonError>>()?;
        Ok(Self {
            source: source.trim().to_string(),
            terms,
        })
    }

    fn score(&self, subject: &Subject) -> Result<Score, CanonError> {
        self.terms
            .iter()
            .map(|term| {
                eval(&term.expr, subject).map_err(|reason| CanonError::RuleEval {
                    expr: term.source.clone(),
                    reason,
                })
            })
            .collect()
    }
}

/// A rule scoring a node within its graph.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRule(Rule);

impl NodeRule {
    pub fn compile(source: &str) -> Result<Self, CanonError> {
        Rule::compile(source, Scope::Node).map(Self)
    }

    pub fn score(&self, graph: &Graph, id: &str) -> Result<Score, CanonError> {
        self.0.score(&Subject::Node { graph, id })
    }

    pub fn source(&self) -> &str {
        &self.0.source
    }
}

/// A rule scoring a (sub)tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeRule(Rule);

impl TreeRule {
    pub fn compile(source: &str) -> Result<Self, CanonError> {
        Rule::compile(source, Scope::Tree).map(Self)
    }

    pub fn score(&self, tree: &Tree) -> Result<Score, CanonError> {
        self.0.score(&Subject::Tree(tree))
    }

    pub fn source(&self) -> &str {
        &self.0.source
    }
}

impl FromStr for NodeRule {
    type Err = CanonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::compile(s)
    }
}

impl FromStr for TreeRule {
    type Err = CanonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::compile(s)
    }
}

impl Display for NodeRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0.source)
    }
}

impl Display for TreeRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0.source)
    }
}

// ---------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> Res<'a, O>
where
    F: FnMut(&'a str) -> Res<'a, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn parse_rule(source: &str) -> Result<Vec<(&str, Syntax)>, CanonError> {
    match all_consuming(ws(separated_list1(char('>'), consumed(parse_expr))))(source) {
        Ok((_, terms)) => Ok(terms),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(CanonError::RuleSyntax {
            rule: source.to_string(),
            reason: convert_error(source, e),
        }),
        Err(nom::Err::Incomplete(_)) => Err(CanonError::RuleSyntax {
            rule: source.to_string(),
            reason: "incomplete input".to_string(),
        }),
    }
}

fn parse_identifier(input: &str) -> Res<&str> {
    recognize(pair(
        satisfy(|c| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_'),
    ))(input)
}

fn parse_dotted(input: &str) -> Res<String> {
    map(separated_list1(char('.'), parse_identifier), |parts| parts.join("."))(input)
}

fn parse_number(input: &str) -> Res<Syntax> {
    map_res(
        recognize(pair(digit1, opt(pair(char('.'), digit1)))),
        |text: &str| -> Result<Syntax, String> {
            if text.contains('.') {
                text.parse().map(Syntax::Float).map_err(|e| format!("{e}"))
            } else {
                text.parse().map(Syntax::Int).map_err(|e| format!("{e}"))
            }
        },
    )(input)
}

fn parse_string_literal(input: &str) -> Res<Syntax> {
    map(
        alt((
            delimited(char('\''), take_while(|c| c != '\''), char('\'')),
            delimited(char('"'), take_while(|c| c != '"'), char('"')),
        )),
        |content: &str| Syntax::Str(content.to_string()),
    )(input)
}

fn parse_attribute(input: &str) -> Res<Syntax> {
    map(preceded(char('$'), parse_dotted), |name| Syntax::Attr(format!("${name}")))(input)
}

fn parse_path_or_call(input: &str) -> Res<Syntax> {
    let (input, name) = parse_dotted(input)?;
    let (input, args) = opt(delimited(
        ws(char('(')),
        separated_list0(ws(char(',')), parse_expr),
        ws(char(')')),
    ))(input)?;
    Ok((
        input,
        match args {
            Some(args) => Syntax::Call(name, args),
            None => Syntax::Path(name),
        },
    ))
}

fn parse_primary(input: &str) -> Res<Syntax> {
    ws(alt((
        parse_number,
        parse_string_literal,
        delimited(char('('), parse_expr, char(')')),
        parse_attribute,
        parse_path_or_call,
    )))(input)
}

fn parse_postfix(input: &str) -> Res<Syntax> {
    let (input, base) = parse_primary(input)?;
    let (input, indices) = many0(delimited(ws(char('[')), parse_expr, ws(char(']'))))(input)?;
    Ok((
        input,
        indices
            .into_iter()
            .fold(base, |acc, index| Syntax::Index(Box::new(acc), Box::new(index))),
    ))
}

fn parse_unary(input: &str) -> Res<Syntax> {
    alt((
        map(preceded(ws(char('-')), parse_unary), |inner| Syntax::Neg(Box::new(inner))),
        parse_postfix,
    ))(input)
}

fn fold_binary(first: Syntax, rest: Vec<(char, Syntax)>) -> Syntax {
    rest.into_iter().fold(first, |acc, (op, rhs)| {
        Syntax::Binary(BinOp::from_symbol(&op.to_string()), Box::new(acc), Box::new(rhs))
    })
}

fn parse_product(input: &str) -> Res<Syntax> {
    let (input, first) = parse_unary(input)?;
    let (input, rest) = many0(pair(ws(one_of("*/%")), parse_unary))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn parse_sum(input: &str) -> Res<Syntax> {
    let (input, first) = parse_product(input)?;
    let (input, rest) = many0(pair(ws(one_of("+-")), parse_product))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn parse_expr(input: &str) -> Res<Syntax> {
    let (input, (lhs, comparison)) = tuple((
        parse_sum,
        opt(pair(
            ws(alt((tag("<="), tag("=="), tag("!="), tag("<")))),
            parse_sum,
        )),
    ))(input)?;
    Ok((
        input,
        match comparison {
            Some((op, rhs)) => Syntax::Binary(BinOp::from_symbol(op), Box::new(lhs), Box::new(rhs)),
            None => lhs,
        },
    ))
}

// ---------------------------------------------------------------------
// Name resolution
// ---------------------------------------------------------------------

fn attributes(scope: Scope) -> &'static BTreeMap<&'static str, Attribute> {
    match scope {
        Scope::Node => &NODE_ATTRIBUTES,
        Scope::Tree => &TREE_ATTRIBUTES,
    }
}

fn resolve(syntax: Syntax, scope: Scope) -> Result<Expr, CanonError> {
    let resolve_box = |inner: Box<Syntax>| resolve(*inner, scope).map(Box::new);
    Ok(match syntax {
        Syntax::Int(i) => Expr::Const(Value::Int(i)),
        Syntax::Float(x) => Expr::Const(Value::Float(x)),
        Syntax::Str(s) => Expr::Const(Value::Str(s)),
        Syntax::Attr(name) if name == "$root" && scope == Scope::Tree => {
            return Err(CanonError::RuleSyntax {
                rule: name,
                reason: "`$root` must be followed by `.label` or `.id`".to_string(),
            })
        }
        Syntax::Attr(name) | Syntax::Path(name) => match attributes(scope).get(name.as_str()) {
            Some(attribute) => Expr::Attr(*attribute),
            None => return Err(CanonError::UnknownAttribute(name)),
        },
        Syntax::Call(name, args) => resolve_call(name, args, scope)?,
        Syntax::Neg(inner) => Expr::Neg(resolve_box(inner)?),
        Syntax::Binary(op, lhs, rhs) => Expr::Binary(op, resolve_box(lhs)?, resolve_box(rhs)?),
        Syntax::Index(base, index) => Expr::Index(resolve_box(base)?, resolve_box(index)?),
    })
}

fn resolve_call(name: String, args: Vec<Syntax>, scope: Scope) -> Result<Expr, CanonError> {
    let mut args = args
        .into_iter()
        .map(|arg| resolve(arg, scope))
        .collect::<Result<Vec<_>, _>>()?;
    let arity_error = |expected: &str| CanonError::RuleSyntax {
        rule: name.clone(),
        reason: format!("expected {expected} argument(s)"),
    };
    match (name.as_str(), scope) {
        ("graph.degree", Scope::Node) => match args.pop() {
            Some(id) if args.is_empty() => Ok(Expr::DegreeOf(Box::new(id))),
            _ => Err(arity_error("1")),
        },
        ("graph.n_degree", Scope::Node) => {
            if args.len() != 2 {
                return Err(arity_error("2"));
            }
            let order = args.pop().map(Box::new);
            let id = args.pop().map(Box::new);
            match (id, order) {
                (Some(id), Some(order)) => Ok(Expr::NDegree(id, order)),
                _ => Err(arity_error("2")),
            }
        }
        ("tree.depth", Scope::Tree) if args.is_empty() => Ok(Expr::Attr(Attribute::Depth)),
        ("tree.size", Scope::Tree) if args.is_empty() => Ok(Expr::Attr(Attribute::Size)),
        (builtin, _) => match BUILTINS.get(builtin) {
            Some(Builtin::Log) if args.is_empty() || args.len() > 2 => Err(arity_error("1 or 2")),
            Some(Builtin::Log) => Ok(Expr::Builtin(Builtin::Log, args)),
            Some(builtin) if args.len() == 1 => Ok(Expr::Builtin(*builtin, args)),
            Some(_) => Err(arity_error("1")),
            None => Err(CanonError::UnknownAttribute(format!("{name}()"))),
        },
    }
}

// ---------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------

fn eval(expr: &Expr, subject: &Subject) -> Result<Value, String> {
    match expr {
        Expr::Const(value) => Ok(value.clone()),
        Expr::Attr(attribute) => eval_attribute(*attribute, subject),
        Expr::DegreeOf(id) => {
            let (graph, id) = graph_and_id(subject, eval(id, subject)?)?;
            Ok(Value::Int(graph.degree(&id) as i64))
        }
        Expr::NDegree(id, order) => {
            let (graph, id) = graph_and_id(subject, eval(id, subject)?)?;
            match eval(order, subject)? {
                Value::Int(order) if order >= 0 => Ok(Value::Int(graph.n_degree(&id, order as usize) as i64)),
                other => Err(format!("n_degree order must be a non-negative int, got {other}")),
            }
        }
        Expr::Builtin(builtin, args) => {
            let args = args
                .iter()
                .map(|arg| eval(arg, subject))
                .collect::<Result<Vec<_>, _>>()?;
            call_builtin(*builtin, args)
        }
        Expr::Neg(inner) => match eval(inner, subject)? {
            Value::Int(i) => i.checked_neg().map(Value::Int).ok_or_else(|| "integer overflow".to_string()),
            Value::Float(x) => Ok(Value::Float(-x)),
            other => Err(format!("bad operand type for unary -: '{}'", other.type_name())),
        },
        Expr::Binary(op, lhs, rhs) => binary(*op, eval(lhs, subject)?, eval(rhs, subject)?),
        Expr::Index(base, index) => index_value(eval(base, subject)?, eval(index, subject)?),
    }
}

fn eval_attribute(attribute: Attribute, subject: &Subject) -> Result<Value, String> {
    match (attribute, subject) {
        (Attribute::Degree, Subject::Node { graph, id }) => Ok(Value::Int(graph.degree(id) as i64)),
        (Attribute::Label, Subject::Node { graph, id }) => graph
            .node(id)
            .map(|node| Value::Str(node.label.clone()))
            .ok_or_else(|| format!("unknown node {id}")),
        (Attribute::Bounds, Subject::Node { graph, id }) => {
            let (inbounds, cobounds) = graph.evaluate_bounds(id).map_err(|e| e.to_string())?;
            Ok(Value::Tuple(vec![
                Value::Int(-(inbounds as i64)),
                Value::Int(-(cobounds as i64)),
            ]))
        }
        (Attribute::NodeId, Subject::Node { id, .. }) => Ok(Value::Str(id.to_string())),
        (Attribute::Depth, Subject::Tree(tree)) => Ok(Value::Int(tree.depth() as i64)),
        (Attribute::Size, Subject::Tree(tree)) => Ok(Value::Int(tree.size() as i64)),
        (Attribute::Lexic, Subject::Tree(tree)) => Ok(Value::Str(tree.to_string())),
        (Attribute::RootLabel, Subject::Tree(tree)) => Ok(Value::Str(tree.root.label.clone())),
        (Attribute::RootId, Subject::Tree(tree)) => Ok(Value::Str(tree.root.id.clone())),
        (Attribute::ParentModality, Subject::Tree(tree)) => Ok(tree
            .parent_modality
            .clone()
            .map(Value::Str)
            .unwrap_or(Value::None)),
        (attribute, _) => Err(format!("{attribute:?} is not available here")),
    }
}

fn graph_and_id<'a>(subject: &Subject<'a>, id: Value) -> Result<(&'a Graph, String), String> {
    match (subject, id) {
        (Subject::Node { graph, .. }, Value::Str(id)) if graph.contains_node(&id) => Ok((*graph, id)),
        (Subject::Node { .. }, Value::Str(id)) => Err(format!("unknown node {id}")),
        (Subject::Node { .. }, other) => Err(format!("node id must be a str, got {}", other.type_name())),
        (Subject::Tree(_), _) => Err("graph is not available when scoring trees".to_string()),
    }
}

fn call_builtin(builtin: Builtin, mut args: Vec<Value>) -> Result<Value, String> {
    let arg = args.remove(0);
    match (builtin, arg) {
        (Builtin::Ord, Value::Str(s)) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Value::Int(c as i64)),
                _ => Err(format!("ord() expected a character, but string of length {} found", s.chars().count())),
            }
        }
        (Builtin::Len, Value::Str(s)) => Ok(Value::Int(s.chars().count() as i64)),
        (Builtin::Len, Value::Tuple(items)) => Ok(Value::Int(items.len() as i64)),
        (Builtin::Abs, Value::Int(i)) => i.checked_abs().map(Value::Int).ok_or_else(|| "integer overflow".to_string()),
        (Builtin::Abs, Value::Float(x)) => Ok(Value::Float(x.abs())),
        (Builtin::Int, Value::Int(i)) => Ok(Value::Int(i)),
        (Builtin::Int, Value::Float(x)) if x.is_finite() => Ok(Value::Int(x.trunc() as i64)),
        (Builtin::Int, Value::Str(s)) => s
            .trim()
            .parse()
            .map(Value::Int)
            .map_err(|_| format!("invalid literal for int(): '{s}'")),
        (Builtin::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
        (Builtin::Float, Value::Float(x)) => Ok(Value::Float(x)),
        (Builtin::Float, Value::Str(s)) => s
            .trim()
            .parse()
            .map(Value::Float)
            .map_err(|_| format!("could not convert string to float: '{s}'")),
        (Builtin::Str, value) => Ok(Value::Str(value.to_string())),
        (Builtin::Log, value) => {
            let x = value.as_f64().ok_or_else(|| format!("log() of a {}", value.type_name()))?;
            if x <= 0.0 {
                return Err("math domain error".to_string());
            }
            match args.pop() {
                None => Ok(Value::Float(x.ln())),
                Some(base) => match base.as_f64() {
                    Some(b) if b > 0.0 && b != 1.0 => Ok(Value::Float(x.ln() / b.ln())),
                    _ => Err("math domain error".to_string()),
                },
            }
        }
        (Builtin::Sqrt, value) => match value.as_f64() {
            Some(x) if x >= 0.0 => Ok(Value::Float(x.sqrt())),
            Some(_) => Err("math domain error".to_string()),
            None => Err(format!("sqrt() of a {}", value.type_name())),
        },
        (builtin, value) => Err(format!("{builtin:?} does not accept a {}", value.type_name())),
    }
}

fn binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, String> {
    let overflow = || "integer overflow".to_string();
    match op {
        BinOp::Lt => return Ok(Value::Int((lhs < rhs) as i64)),
        BinOp::Le => return Ok(Value::Int((lhs <= rhs) as i64)),
        BinOp::Eq => return Ok(Value::Int((lhs == rhs) as i64)),
        BinOp::Ne => return Ok(Value::Int((lhs != rhs) as i64)),
        _ => {}
    }
    match (op, &lhs, &rhs) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => return Ok(Value::Str(format!("{a}{b}"))),
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            return Ok(Value::Tuple(a.iter().chain(b).cloned().collect()))
        }
        (BinOp::Add, Value::Int(a), Value::Int(b)) => return a.checked_add(*b).map(Value::Int).ok_or_else(overflow),
        (BinOp::Sub, Value::Int(a), Value::Int(b)) => return a.checked_sub(*b).map(Value::Int).ok_or_else(overflow),
        (BinOp::Mul, Value::Int(a), Value::Int(b)) => return a.checked_mul(*b).map(Value::Int).ok_or_else(overflow),
        (BinOp::Mod, Value::Int(_), Value::Int(0)) | (BinOp::Div, _, Value::Int(0)) => {
            return Err("division by zero".to_string())
        }
        (BinOp::Mod, Value::Int(a), Value::Int(b)) => {
            let r = a % b;
            return Ok(Value::Int(if r != 0 && (r < 0) != (*b < 0) { r + b } else { r }));
        }
        _ => {}
    }
    let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) else {
        return Err(format!(
            "unsupported operand types for {op:?}: '{}' and '{}'",
            lhs.type_name(),
            rhs.type_name()
        ));
    };
    match op {
        BinOp::Add => Ok(Value::Float(a + b)),
        BinOp::Sub => Ok(Value::Float(a - b)),
        BinOp::Mul => Ok(Value::Float(a * b)),
        BinOp::Div | BinOp::Mod if b == 0.0 => Err("division by zero".to_string()),
        BinOp::Div => Ok(Value::Float(a / b)),
        _ => Ok(Value::Float(a - b * (a / b).floor())),
    }
}

fn index_value(base: Value, index: Value) -> Result<Value, String> {
    let Value::Int(index) = index else {
        return Err(format!("indices must be integers, not {}", index.type_name()));
    };
    let position = |len: usize| -> Result<usize, String> {
        let resolved = if index < 0 { len as i64 + index } else { index };
        if resolved < 0 || resolved >= len as i64 {
            Err(format!("index {index} out of range"))
        } else {
            Ok(resolved as usize)
        }
    };
    match base {
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::Str(chars[position(chars.len())?].to_string()))
        }
        Value::Tuple(mut items) => {
            let at = position(items.len())?;
            Ok(items.swap_remove(at))
        }
        other => Err(format!("'{}' object is not subscriptable", other.type_name())),
    }
}
