//! Print the description of an index file as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use pagetree::index::Level;
use pagetree::{Format, Reader};
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "pagetree-dump", version, about = "Describe the index file INPUT")]
struct Cli {
    /// Also print every record
    #[arg(long)]
    records: bool,

    /// Index file to describe
    input: PathBuf,
}

#[derive(Serialize)]
struct Dump {
    pagetree: Description,
}

#[derive(Serialize)]
struct Description {
    numlevels: usize,
    pagesize: usize,
    branching_factor: u64,
    leaf: LeafGeometry,
    value_offset: u64,
    levels: Vec<Level>,
    attr: AttrDescription,
    #[serde(skip_serializing_if = "Option::is_none")]
    records: Option<Vec<RecordDescription>>,
}

#[derive(Serialize)]
struct LeafGeometry {
    record_size: usize,
    records_per_page: u64,
    pages: u64,
    offset: u64,
}

#[derive(Serialize)]
struct AttrDescription {
    records: u64,
    ksize: usize,
    vsize: Option<usize>,
    format: &'static str,
}

#[derive(Serialize)]
struct RecordDescription {
    key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("pagetree-dump: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let reader = Reader::open(&cli.input).with_context(|| format!("cannot open {:?}", cli.input))?;
    let dump = describe(&reader, cli.records)?;

    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &dump)?;
    writeln!(stdout)?;

    reader.close()?;
    Ok(())
}

fn describe(reader: &Reader, with_records: bool) -> Result<Dump> {
    let layout = reader.layout();
    let attr = reader.attr();

    let format = match attr.format() {
        Format::Block if reader.inline_block() => "block (inline)",
        format => format.name(),
    };
    let vsize = (attr.format() == Format::Block).then(|| attr.value_size());

    let records = if with_records {
        let mut described = Vec::with_capacity(attr.record_count() as usize);
        for record in reader.records() {
            let record = record?;
            described.push(RecordDescription {
                key: String::from_utf8_lossy(record.key()).into_owned(),
                value: record.value().map(|v| String::from_utf8_lossy(v).into_owned()),
            });
        }
        Some(described)
    } else {
        None
    };

    Ok(Dump {
        pagetree: Description {
            numlevels: layout.num_levels(),
            pagesize: layout.page_size,
            branching_factor: layout.branching_factor,
            leaf: LeafGeometry {
                record_size: layout.leaf_record_size,
                records_per_page: layout.records_per_leaf_page,
                pages: layout.leaf_pages,
                offset: layout.leaf_offset,
            },
            value_offset: layout.value_offset,
            levels: layout.levels.clone(),
            attr: AttrDescription {
                records: attr.record_count(),
                ksize: attr.key_size(),
                vsize,
                format,
            },
            records,
        },
    })
}
