use anyhow::{Context, bail};
use clap::Parser;
use kmer_table::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Build a k-mer table from reference sequences and report shared k-mers
/// with query sequences.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Reference FASTA/FASTQ(.gz) path
    #[arg(short, long)]
    reference: PathBuf,

    /// Query FASTA/FASTQ(.gz) path; without it the table is only built
    #[arg(short, long)]
    query: Option<PathBuf>,

    /// K-mer length
    #[arg(short = 'k', long, default_value_t = 11)]
    k: usize,

    /// Spacing model such as 1101 (overrides -k)
    #[arg(long)]
    spacing: Option<String>,

    /// Alphabet: nuc|prot
    #[arg(long, default_value = "nuc")]
    alphabet: String,

    /// Save the reference table as `.kmt`
    #[arg(long)]
    save_table: Option<PathBuf>,

    /// Output TSV path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Threads used for matching
    #[arg(long)]
    threads: Option<usize>,
}

fn parse_alphabet(s: &str) -> anyhow::Result<Alphabet> {
    match s {
        "nuc" | "dna" | "nucleotide" => Ok(Alphabet::nucleotide()),
        "prot" | "protein" => Ok(Alphabet::protein()),
        other => bail!("unknown alphabet {other:?} (expected nuc|prot)"),
    }
}

fn read_sequences(path: &Path) -> anyhow::Result<Vec<Vec<u8>>> {
    let mut reader = needletail::parse_fastx_file(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut seqs = Vec::new();
    while let Some(record) = reader.next() {
        let record = record.with_context(|| format!("parsing {}", path.display()))?;
        seqs.push(record.seq().into_owned());
    }
    Ok(seqs)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let base = parse_alphabet(&args.alphabet)?;
    let kmer_alphabet = match &args.spacing {
        Some(model) => KmerAlphabet::spaced(base, model)?,
        None => KmerAlphabet::new(base, args.k)?,
    };

    let cfg = match args.threads {
        Some(n) => BuildConfig::default().threads(n),
        None => BuildConfig::default(),
    };

    let references = read_sequences(&args.reference)?;
    let mut builder = TableBuilder::new(kmer_alphabet.clone(), cfg);
    for (i, seq) in references.iter().enumerate() {
        builder.push_sequence(u32::try_from(i)?, seq)?;
    }
    let table = builder.build();
    info!(
        references = references.len(),
        kmers = table.num_kmers(),
        occurrences = table.num_occurrences(),
        storage = ?table.storage_kind(),
        "built reference table"
    );

    if let Some(path) = &args.save_table {
        KmerTableWriter::new(&table).write_to(path)?;
        info!("saved table to {}", path.display());
    }

    let Some(query_path) = &args.query else {
        return Ok(());
    };
    let queries = read_sequences(query_path)?;
    let query_table = KmerTable::from_sequences(kmer_alphabet, &queries)?;
    let matches = table.match_table(&query_table)?;
    info!(queries = queries.len(), matches = matches.len(), "matched queries");

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(std::io::stdout().lock())),
    };
    writeln!(out, "ref_id\tref_pos\tquery_id\tquery_pos")?;
    for m in &matches {
        writeln!(out, "{}\t{}\t{}\t{}", m.ref_id, m.ref_pos, m.query_id, m.query_pos)?;
    }
    out.flush()?;
    Ok(())
}
