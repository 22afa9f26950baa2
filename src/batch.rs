// Record source and sink for the batch driver
// CSV keeps the flat column schema, JSONL also carries enrichment metadata

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::record::TransactionRecord;

pub const CSV_HEADER: [&str; 5] = ["Date", "Description", "Amount", "Account", "Category"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    Csv,
    JsonLines,
}

impl RecordFormat {
    /// `.jsonl` / `.ndjson` are JSON Lines, anything else is CSV
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("jsonl") || ext.eq_ignore_ascii_case("ndjson") => {
                RecordFormat::JsonLines
            }
            _ => RecordFormat::Csv,
        }
    }
}

/// Flat CSV row borrowed from a record (metadata has no CSV column)
#[derive(Serialize)]
struct CsvRow<'a> {
    #[serde(rename = "Date")]
    date: &'a str,
    #[serde(rename = "Description")]
    description: &'a str,
    #[serde(rename = "Amount")]
    amount: &'a str,
    #[serde(rename = "Account")]
    account: &'a str,
    #[serde(rename = "Category")]
    category: &'a str,
}

impl<'a> From<&'a TransactionRecord> for CsvRow<'a> {
    fn from(tx: &'a TransactionRecord) -> Self {
        CsvRow {
            date: &tx.date,
            description: &tx.description,
            amount: &tx.amount,
            account: &tx.account,
            category: &tx.category,
        }
    }
}

// ============================================================================
// SOURCE
// ============================================================================

pub fn read_records(path: &Path) -> Result<Vec<TransactionRecord>> {
    match RecordFormat::from_path(path) {
        RecordFormat::Csv => read_csv(path),
        RecordFormat::JsonLines => read_jsonl(path),
    }
}

pub fn read_csv(path: &Path) -> Result<Vec<TransactionRecord>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_path(path)
        .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;

    let mut records = Vec::new();
    for (index, result) in rdr.deserialize().enumerate() {
        let record: TransactionRecord = result
            .with_context(|| format!("Failed to deserialize CSV row {}", index + 2))?;
        records.push(record);
    }

    Ok(records)
}

pub fn read_jsonl(path: &Path) -> Result<Vec<TransactionRecord>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open JSONL file: {}", path.display()))?;

    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {}", index + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: TransactionRecord = serde_json::from_str(&line)
            .with_context(|| format!("Failed to parse JSONL line {}", index + 1))?;
        records.push(record);
    }

    Ok(records)
}

// ============================================================================
// SINK
// ============================================================================

/// Write records to `path`, or stdout when `path` is `-`
pub fn write_records(path: &Path, records: &[TransactionRecord]) -> Result<()> {
    let writer = open_output(path)?;
    match RecordFormat::from_path(path) {
        RecordFormat::Csv => write_csv(writer, records),
        RecordFormat::JsonLines => write_jsonl(writer, records),
    }
}

pub fn write_csv<W: Write>(writer: W, records: &[TransactionRecord]) -> Result<()> {
    let mut csv_writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(writer);

    // Always write header, even with zero rows
    if records.is_empty() {
        csv_writer.write_record(CSV_HEADER).context("CSV write error")?;
    }

    for tx in records {
        csv_writer.serialize(CsvRow::from(tx)).context("CSV write error")?;
    }

    csv_writer.flush().context("Failed to flush CSV output")?;
    Ok(())
}

pub fn write_jsonl<W: Write>(mut writer: W, records: &[TransactionRecord]) -> Result<()> {
    for tx in records {
        serde_json::to_writer(&mut writer, tx).context("JSONL write error")?;
        writer.write_all(b"\n").context("JSONL write error")?;
    }
    writer.flush().context("Failed to flush JSONL output")?;
    Ok(())
}

fn open_output(path: &Path) -> Result<Box<dyn Write>> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(BufWriter::new(std::io::stdout().lock())));
    }

    let file = File::create(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;
    Ok(Box::new(BufWriter::new(file)))
}
