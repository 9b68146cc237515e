use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use canonic::*;
use clap::{Args, Parser, Subcommand};
use tracing::*;

#[derive(Parser, Debug)]
#[command(name = "canonic", about = "Canonical traces of labeled graphs")]
struct Cli {
    /// Lowest level of the log events printed to stderr.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
    #[command(flatten)]
    canon: CanonArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct CanonArgs {
    /// Rule scoring the root candidates.
    #[arg(long, global = true, default_value = DEFAULT_CANDIDATE_RULE)]
    candidate_rule: String,
    /// Rule electing the roots and ordering branches.
    #[arg(long, global = true, default_value = DEFAULT_BRANCH_RULE)]
    branch_rule: String,
    /// Rule choosing the parent that keeps an in-bound subtree in compact mode.
    #[arg(long, global = true, default_value = DEFAULT_DAG_RULE)]
    dag_rule: String,
    /// Keep in-bound subtrees under a single parent instead of duplicating them.
    #[arg(long, global = true)]
    compact: bool,
    /// Leave magnet bodies inline instead of aliasing them.
    #[arg(long, global = true)]
    no_compress: bool,
    /// Never hash parent magnets.
    #[arg(long, global = true)]
    no_hashes: bool,
    /// Separator between the traces of connected components.
    #[arg(long, global = true, default_value = "|")]
    delimiter: String,
    /// Drop hydrogen atoms when reading molecules.
    #[arg(long, global = true)]
    ignore_hydrogens: bool,
}

impl CanonArgs {
    fn config(&self) -> CanonConfig {
        CanonConfig::default()
            .candidate_rule(self.candidate_rule.as_str())
            .branch_rule(self.branch_rule.as_str())
            .dag_rule(self.dag_rule.as_str())
            .compact(self.compact)
            .compress(!self.no_compress)
            .allow_hashes(!self.no_hashes)
            .delimiter(self.delimiter.as_str())
    }
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Graph file to read.
    file: PathBuf,
    /// dimacs, dot, sdf or smiles. Guessed from the extension when omitted.
    #[arg(long)]
    format: Option<GraphFormat>,
}

impl InputArgs {
    fn read(&self, ignore_hydrogens: bool) -> Result<Vec<Graph>> {
        let format = match self.format {
            Some(format) => format,
            None => GraphFormat::from_path(&self.file)
                .with_context(|| format!("Cannot guess the format of {}, use --format", self.file.display()))?,
        };
        read_graphs(&self.file, format, ignore_hydrogens)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the canonical trace of every graph in a file.
    Trace {
        #[command(flatten)]
        input: InputArgs,
        /// Print the SHA-256 of each trace after it.
        #[arg(long)]
        hash: bool,
    },
    /// Print the canonical trace of a SMILES string.
    Smiles { smiles: String },
    /// Print the canonical adjacency matrix of every graph in a file.
    Matrix {
        #[command(flatten)]
        input: InputArgs,
        /// Skip the search among tied vertex orders.
        #[arg(long)]
        fast: bool,
    },
    /// Count the canonical fragments of radius `size` of every graph in a file.
    Fragments {
        #[command(flatten)]
        input: InputArgs,
        #[arg(long, default_value_t = 2)]
        size: usize,
    },
    /// Write the graphs of a file as DOT.
    Dot {
        #[command(flatten)]
        input: InputArgs,
        /// Alias magnet labels the way compressed traces do.
        #[arg(long)]
        compress_magnets: bool,
        /// Write the DOT text of a single graph to this file instead of stdout.
        #[arg(long)]
        output: Option<String>,
        /// Also render the written DOT file to this PNG with Graphviz.
        #[arg(long, requires = "output")]
        image: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    let config = cli.canon.config();
    let ignore_hydrogens = cli.canon.ignore_hydrogens;

    match &cli.command {
        Command::Trace { input, hash } => {
            for graph in input.read(ignore_hydrogens)? {
                let trace = scott_trace(&graph, &config).context(format!("While canonizing '{}'", graph.id))?;
                if *hash {
                    println!("{}\t{trace}\t{}", graph.id, sha256_hex(&trace));
                } else {
                    println!("{}\t{trace}", graph.id);
                }
            }
        }
        Command::Smiles { smiles } => {
            let graph = smiles_to_graph(smiles, ignore_hydrogens)?;
            println!("{}", scott_trace(&graph, &config)?);
        }
        Command::Matrix { input, fast } => {
            for graph in input.read(ignore_hydrogens)? {
                let (order, matrix) = graph.adjacency_matrix(true, *fast)?;
                println!("{}\t{}", graph.id, order.join(" "));
                for row in matrix {
                    let row: Vec<String> = row.iter().map(i64::to_string).collect();
                    println!("{}", row.join(" "));
                }
            }
        }
        Command::Fragments { input, size } => {
            for graph in input.read(ignore_hydrogens)? {
                let projection = fragment_projection(&graph, *size, &config)?;
                info!("'{}' has {} distinct fragments", graph.id, projection.len());
                for (cgraph, count) in projection {
                    println!("{}\t{count}\t{cgraph}", graph.id);
                }
            }
        }
        Command::Dot {
            input,
            compress_magnets,
            output: Some(output),
            image,
        } => {
            let graphs = input.read(ignore_hydrogens)?;
            let [graph] = graphs.as_slice() else {
                bail!("--output needs a file holding one graph, found {}", graphs.len());
            };
            visualize_graph(graph, *compress_magnets, output, image.as_deref())?;
        }
        Command::Dot {
            input,
            compress_magnets,
            output: None,
            ..
        } => {
            for graph in input.read(ignore_hydrogens)? {
                println!("{}", to_dot(&graph, *compress_magnets));
            }
        }
    }
    Ok(())
}
