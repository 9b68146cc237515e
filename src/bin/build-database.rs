use anyhow::Result;
use canonic::*;
use clap::Parser;

/// Adds a canonical trace and its hash to every SMILES of a CSV database.
#[derive(Parser, Debug)]
#[command(name = "build-database")]
struct Cli {
    #[arg(default_value = "molecules.csv")]
    input: String,
    #[arg(default_value = "canonic-molecules.csv")]
    output: String,
    /// Header name or 0-based index of the SMILES column.
    #[arg(long, default_value = "SMILES")]
    column: String,
    #[arg(long)]
    ignore_hydrogens: bool,
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let mut memo = TraceMemo::new(CanonConfig::default(), cli.ignore_hydrogens);
    let summary = canonize_csv(&cli.input, &cli.output, &cli.column, &mut memo)?;
    println!("{} molecules written, {} skipped", summary.written, summary.skipped);
    Ok(())
}
