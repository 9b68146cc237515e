use std::str::FromStr;
use tracing::Level;

mod error;
pub use error::*;

mod digest;
pub use digest::*;

mod graph;
pub use graph::*;

mod tree;
pub use tree::*;

mod rule;
pub use rule::*;

mod canonize;
pub use canonize::*;

mod fragment;
pub use fragment::*;

mod export;
pub use export::*;

mod parse;
pub use parse::*;

mod memoize;
pub use memoize::*;

/// Candidate rule used when none is given: the most connected vertices are root candidates.
pub const DEFAULT_CANDIDATE_RULE: &str = "$degree";
/// Rule ordering the branches of the final tree.
pub const DEFAULT_BRANCH_RULE: &str = "$depth > tree.parent_modality > $lexic";
/// Rule electing the parent that keeps an in-bound's subtree in compact mode.
pub const DEFAULT_DAG_RULE: &str = "$root.label > $depth > $lexic";
/// Rule ordering the outward trees that magnets are built from.
pub const DEFAULT_MAGNET_RULE: &str = "$depth > $lexic";

/// Installs a global `tracing` subscriber printing events at `level` and above.
///
/// Unknown levels fall back to `info`. Calling this more than once is harmless.
pub fn init_logging(level: &str) {
    let level = Level::from_str(level).unwrap_or(Level::INFO);
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}
