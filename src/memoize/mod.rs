use std::collections::BTreeMap;
use std::fs::File;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use csv::{ReaderBuilder, StringRecord, Writer};
use lazy_static::lazy_static;
use tracing::*;

use crate::{scott_trace, sha256_hex, smiles_to_graph, CanonConfig};

/// Caches the canonical trace of every SMILES string seen so far.
#[derive(Debug, Clone, Default)]
pub struct TraceMemo {
    config: CanonConfig,
    ignore_hydrogens: bool,
    traces: BTreeMap<String, String>,
    hits: usize,
}

impl TraceMemo {
    pub fn new(config: CanonConfig, ignore_hydrogens: bool) -> Self {
        Self {
            config,
            ignore_hydrogens,
            ..Self::default()
        }
    }

    /// The trace of the molecule written as `smiles`, computed once per distinct string.
    pub fn trace(&mut self, smiles: &str) -> Result<String> {
        if let Some(trace) = self.traces.get(smiles) {
            self.hits += 1;
            return Ok(trace.clone());
        }
        let graph = smiles_to_graph(smiles, self.ignore_hydrogens)?;
        let trace = scott_trace(&graph, &self.config).context(format!("While canonizing {smiles}"))?;
        self.traces.insert(smiles.to_string(), trace.clone());
        Ok(trace)
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// How many lookups were answered from the cache.
    pub fn hits(&self) -> usize {
        self.hits
    }
}

lazy_static! {
    static ref SHARED_MEMO: Mutex<TraceMemo> = Mutex::new(TraceMemo::default());
}

/// Trace of a SMILES string with the default configuration, memoized process-wide.
pub fn smiles_trace(smiles: &str) -> Result<String> {
    SHARED_MEMO
        .lock()
        .map_err(|_| anyhow!("Trace memo lock poisoned"))?
        .trace(smiles)
}

/// Finds `column` among the headers, by name first, then as a 0-based index.
fn column_index(headers: &StringRecord, column: &str) -> Result<usize> {
    headers
        .iter()
        .position(|header| header.trim() == column)
        .or_else(|| column.parse().ok().filter(|index| *index < headers.len()))
        .with_context(|| format!("No column '{column}' in headers {headers:?}"))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CsvSummary {
    pub written: usize,
    pub skipped: usize,
}

/// Canonicalizes the SMILES strings of one CSV column.
///
/// The output has the columns `Trace`, `Hash` and `Input`. Empty cells and molecules that
/// fail to parse or canonicalize are logged and skipped.
pub fn canonize_csv(input: &str, output: &str, column: &str, memo: &mut TraceMemo) -> Result<CsvSummary> {
    let file = File::open(input).context(format!("Failed to open {input}"))?;
    let mut reader = ReaderBuilder::new().has_headers(true).flexible(true).from_reader(file);
    let index = column_index(reader.headers()?, column)?;

    let mut writer = Writer::from_writer(File::create(output).context(format!("Failed to create {output}"))?);
    writer.write_record(["Trace", "Hash", "Input"])?;

    let mut summary = CsvSummary::default();
    for (line, result) in reader.records().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(err) => {
                warn!("Skipping unreadable record {}: {err}", line + 1);
                summary.skipped += 1;
                continue;
            }
        };
        let smiles = record.get(index).unwrap_or("").trim();
        if smiles.is_empty() {
            warn!("Skipping record {} with an empty SMILES: {record:?}", line + 1);
            summary.skipped += 1;
            continue;
        }
        match memo.trace(smiles) {
            Ok(trace) => {
                let hash = sha256_hex(&trace);
                writer.write_record([trace.as_str(), hash.as_str(), smiles])?;
                summary.written += 1;
            }
            Err(err) => {
                warn!("Skipping record {} ({smiles}): {err:#}", line + 1);
                summary.skipped += 1;
            }
        }
    }
    writer.flush()?;
    info!(
        "Canonical traces written to {output}: {} rows, {} skipped, {} cache hits",
        summary.written,
        summary.skipped,
        memo.hits()
    );
    Ok(summary)
}
