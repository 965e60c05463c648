//! Build an index file from a sorted CSV stream.
//!
//! Each input line is `key,value`. The key size is taken from the first line;
//! every later key must have the same length or be shorter.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, ValueEnum};
use pagetree::{AttributeDescriptor, Format, Record, Writer};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum InputFormat {
    Csv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Atom,
    Pair,
    Block,
    Blob,
}

impl From<OutputFormat> for Format {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Atom => Format::Atom,
            OutputFormat::Pair => Format::Pair,
            OutputFormat::Block => Format::Block,
            OutputFormat::Blob => Format::Blob,
        }
    }
}

#[derive(Parser)]
#[command(name = "pagetree-load", version, about = "Create an index file OUTPUT from INPUT")]
struct Cli {
    /// Format of INPUT
    #[arg(short = 'I', long, value_enum, default_value = "csv")]
    input_format: InputFormat,

    /// Format of OUTPUT
    #[arg(short = 'O', long, value_enum, default_value = "blob")]
    output_format: OutputFormat,

    /// Number of records in INPUT
    num_records: u64,

    /// Input file; `-` reads standard input
    input: String,

    /// Index file to create
    output: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("pagetree-load: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let input: Box<dyn BufRead> = if cli.input == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(&cli.input).with_context(|| format!("cannot open {}", cli.input))?;
        Box::new(BufReader::new(file))
    };

    let records = match cli.input_format {
        InputFormat::Csv => from_csv(input, cli.output_format.into(), cli.num_records, &cli.output)?,
    };
    log::info!("Wrote {} records to {:?}", records, cli.output);
    Ok(())
}

/// Split a CSV line into key and value.
///
/// The value loses its leading spaces and line terminator.
fn split_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_end_matches(['\n', '\r']);
    let (key, value) = line.split_once(',')?;
    if key.is_empty() {
        return None;
    }
    Some((key, value.trim_start_matches(' ')))
}

/// Attributes of the output file, derived from the first input line
fn attributes(format: Format, records: u64, key: &str, value: &str) -> AttributeDescriptor {
    match format {
        Format::Atom => AttributeDescriptor::atom(key.len(), records),
        Format::Pair => AttributeDescriptor::pair(key.len(), records),
        Format::Block => AttributeDescriptor::block(key.len(), value.len(), records),
        Format::Blob => AttributeDescriptor::blob(key.len(), records),
    }
}

fn from_csv<R: BufRead>(input: R, format: Format, records: u64, output: &Path) -> Result<u64> {
    let mut writer: Option<Writer> = None;

    for (index, line) in input.lines().enumerate() {
        let lineno = index + 1;
        let line = line.with_context(|| format!("cannot read line {}", lineno))?;
        let (key, value) = split_line(&line)
            .ok_or_else(|| anyhow!("line {} is not `key,value`: {:?}", lineno, line))?;

        let writer = match writer.as_mut() {
            Some(writer) => writer,
            None => {
                let attr = attributes(format, records, key, value);
                let created = Writer::create(output, attr)
                    .with_context(|| format!("cannot create {:?}", output))?;
                writer.insert(created)
            }
        };

        let attr = writer.attr();
        let record = match format {
            Format::Atom => Record::atom(key.as_bytes()),
            Format::Pair => {
                if value.len() != attr.key_size() {
                    bail!("line {}: 'pair' format requires keys and values of the same size", lineno);
                }
                Record::pair(key.as_bytes(), value.as_bytes())
            }
            Format::Block => {
                if value.len() != attr.value_size() {
                    bail!("line {}: 'block' format requires all values to be the same size", lineno);
                }
                Record::block(key.as_bytes(), value.as_bytes())
            }
            Format::Blob => Record::blob(key.as_bytes(), value.as_bytes()),
        };

        writer.put(&record).with_context(|| format!("line {}", lineno))?;
    }

    let writer = writer.ok_or_else(|| anyhow!("input is empty"))?;
    writer.finish().context("cannot finish index file")?;
    Ok(records)
}
