use thiserror::Error;

/// Failures raised by the graph model, the rule engine and the canonicalization pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CanonError {
    #[error("Node '{0}' already exists in this graph")]
    DuplicateNode(String),
    #[error("Edge '{0}' already exists in this graph")]
    DuplicateEdge(String),
    #[error("Node '{0}' is unknown")]
    UnknownNode(String),
    #[error("Edge '{0}' is unknown")]
    UnknownEdge(String),
    #[error("Cannot {0} on an unfloored graph")]
    Unfloored(&'static str),
    #[error("Unknown attribute definition: {0}")]
    UnknownAttribute(String),
    #[error("Malformed rule '{rule}': {reason}")]
    RuleSyntax { rule: String, reason: String },
    #[error("Failed to evaluate '{expr}': {reason}")]
    RuleEval { expr: String, reason: String },
    #[error("Graph has no root candidate")]
    NoCandidate,
    #[error("Rewriting invariant violated: {0}")]
    RewriteInvariant(String),
}
