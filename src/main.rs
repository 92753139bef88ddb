use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

use polyglot::archive::EntryCompression;
use polyglot::config::{self, DEFAULT_LOG_FILTER, ENV_CHUNK_SIZE, ENV_HASH, ENV_LOG};
use polyglot::integrity::{HashAlgorithm, IntegrityStatus};
use polyglot::io_stream::{CancelFlag, Progress, ProgressTracker};
use polyglot::payload::{PayloadInput, PayloadMode};
use polyglot::polyglot::{
    self as ops, ArchiveContents, CreateOptions, ExtractOptions, PartSelection, PartStatus,
};
use polyglot::recovery::scanner::{Fallback, Signature};

#[derive(Parser)]
#[command(name = "polyglot", version, about = "Hide payloads after media containers and recover them")]
struct Cli {
    /// More log output (-v info, -vv debug); POLYGLOT_LOG overrides
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Hide the progress bar
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append a payload to a media container, optionally split across parts
    Create {
        /// Media file whose bytes prefix every output
        #[arg(short, long)]
        container: PathBuf,
        /// Output file; split parts are numbered after it
        #[arg(short, long)]
        output: PathBuf,
        /// Payload mode: single, folder, archive, direct
        #[arg(short, long, default_value = "single", value_parser = parse_mode)]
        mode: PayloadMode,
        /// In single mode, embed .zip/.7z/.rar inputs without re-wrapping
        #[arg(long)]
        bypass: bool,
        /// Store entries uncompressed instead of deflating
        #[arg(long)]
        store: bool,
        /// Entry name inside the archive (single mode)
        #[arg(long)]
        name: Option<String>,
        /// Split the payload into parts of at most this size, e.g. 4G
        #[arg(short, long, value_parser = parse_size)]
        split: Option<u64>,
        /// Checksum algorithm: blake3, sha256, crc32
        #[arg(long, env = ENV_HASH, default_value = "blake3", value_parser = parse_hash)]
        hash: HashAlgorithm,
        /// Copy chunk size
        #[arg(long, env = ENV_CHUNK_SIZE, default_value = "16M", value_parser = parse_chunk)]
        chunk_size: usize,
        /// Do not write <output>_recovery.json
        #[arg(long)]
        no_metadata: bool,
        /// Files or directories to hide
        #[arg(required = true, num_args = 1..)]
        input: Vec<PathBuf>,
    },
    /// Recover the payload from a polyglot or a set of parts
    Extract {
        /// Polyglot file, or one part when used with --discover
        input: Option<PathBuf>,
        /// Where to write the recovered payload
        #[arg(short, long)]
        output: PathBuf,
        /// Recovery metadata written by `create`
        #[arg(long)]
        metadata: Option<PathBuf>,
        /// Parts in order
        #[arg(long, num_args = 1.., conflicts_with_all = ["input", "discover"])]
        parts: Vec<PathBuf>,
        /// Find sibling parts of INPUT
        #[arg(short, long, requires = "input")]
        discover: bool,
        /// Combine discovered parts without asking
        #[arg(short, long)]
        yes: bool,
        /// Payload signature: zip, 7z, rar, pk or hex bytes
        #[arg(long, value_parser = parse_signature)]
        signature: Option<Signature>,
        /// Offset guess when a part has no signature: half, tenth
        #[arg(long, default_value = "half", value_parser = parse_fallback)]
        fallback: Fallback,
        /// Checksum algorithm when no metadata is given
        #[arg(long, env = ENV_HASH, default_value = "blake3", value_parser = parse_hash)]
        hash: HashAlgorithm,
        #[arg(long, env = ENV_CHUNK_SIZE, default_value = "16M", value_parser = parse_chunk)]
        chunk_size: usize,
        /// Unpack the recovered archive into this directory
        #[arg(long)]
        unpack: Option<PathBuf>,
    },
    /// Show size, checksum, signature offset and entries of a file
    Inspect {
        input: PathBuf,
        #[arg(long, default_value = "zip", value_parser = parse_signature)]
        signature: Signature,
        #[arg(long, env = ENV_HASH, default_value = "blake3", value_parser = parse_hash)]
        hash: HashAlgorithm,
    },
    /// Re-hash every output listed in a recovery metadata file
    Verify {
        metadata: PathBuf,
        #[arg(long, env = ENV_CHUNK_SIZE, default_value = "16M", value_parser = parse_chunk)]
        chunk_size: usize,
    },
}

fn parse_mode(s: &str) -> Result<PayloadMode, String> {
    s.parse().map_err(|e| format!("{}", e))
}

fn parse_hash(s: &str) -> Result<HashAlgorithm, String> {
    s.parse().map_err(|e| format!("{}", e))
}

fn parse_signature(s: &str) -> Result<Signature, String> {
    s.parse().map_err(|e| format!("{}", e))
}

fn parse_fallback(s: &str) -> Result<Fallback, String> {
    s.parse().map_err(|e| format!("{}", e))
}

fn parse_size(s: &str) -> Result<u64, String> {
    config::parse_byte_size(s).map_err(|e| format!("{}", e))
}

fn parse_chunk(s: &str) -> Result<usize, String> {
    config::parse_chunk_size(s).map_err(|e| format!("{}", e))
}

/// How a successful run ended.
enum Outcome {
    Clean,
    /// Output written, but integrity is not confirmed.
    Unconfirmed,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default = match cli.verbose {
        0 => DEFAULT_LOG_FILTER,
        1 => "polyglot=info",
        _ => "polyglot=debug",
    };
    let filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new(default));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::uptime())
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_flag.cancel()) {
        warn!(error = %e, "could not install Ctrl-C handler");
    }

    match run(cli, cancel) {
        Ok(Outcome::Clean) => ExitCode::SUCCESS,
        Ok(Outcome::Unconfirmed) => ExitCode::from(2),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, cancel: CancelFlag) -> Result<Outcome> {
    let pb = progress_bar(cli.quiet);
    let mut observer = |p: &Progress| {
        pb.set_length(p.total_expected);
        pb.set_position(p.bytes_copied);
    };

    match cli.command {

        // ── Create ───────────────────────────────────────────────────────────
        Commands::Create {
            container, output, mode, bypass, store, name, split, hash, chunk_size, no_metadata, input,
        } => {
            let inputs: Vec<PayloadInput> = match (name, input.as_slice()) {
                (Some(n), [one]) => vec![PayloadInput::named(one, n)],
                (Some(_), _) => bail!("--name needs exactly one input"),
                (None, _) => input.iter().map(PayloadInput::new).collect(),
            };
            let opts = CreateOptions {
                mode,
                bypass_wrapping: bypass,
                compression:     if store { EntryCompression::Stored } else { EntryCompression::Deflated },
                part_size:       split,
                algorithm:       hash,
                chunk_size,
                write_metadata:  !no_metadata,
                cancel,
            };
            let mut tracker = ProgressTracker::with_observer(0, &mut observer);
            let report = ops::create(&container, &inputs, &output, &opts, &mut tracker)
                .with_context(|| format!("creating {}", output.display()))?;
            pb.finish_and_clear();

            for f in &report.outputs {
                println!(
                    "  wrote   {}  ({} B, payload {}..{}, {})",
                    f.path.display(), f.total_len(), f.range.start, f.range.end, f.checksum
                );
            }
            println!("Payload: {} B, {}", report.metadata.payload_size_bytes, report.payload_checksum());
            if let Some(meta) = &report.metadata_path {
                println!("Recovery metadata: {}", meta.display());
            }
            Ok(Outcome::Clean)
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract {
            input, output, metadata, parts, discover, yes, signature, fallback, hash, chunk_size, unpack,
        } => {
            let selection = match (input, parts.is_empty()) {
                (_, false) => PartSelection::Explicit(parts),
                (Some(from), true) if discover => PartSelection::Discover { from, confirmed: yes },
                (Some(p), true) => PartSelection::Single(p),
                (None, true) if metadata.is_some() => PartSelection::Recorded,
                (None, true) => bail!("give an input file, --parts, or --metadata"),
            };
            let opts = ExtractOptions {
                metadata,
                signature,
                fallback,
                algorithm: hash,
                chunk_size,
                unpack_to: unpack,
                cancel,
            };
            let mut tracker = ProgressTracker::with_observer(0, &mut observer);
            let result = ops::extract(&selection, &output, &opts, &mut tracker);
            pb.finish_and_clear();

            let report = match result {
                Err(polyglot::PolyglotError::UnconfirmedParts(found)) => {
                    println!("Found {} parts:", found.len());
                    for p in &found {
                        println!("  {}", p.display());
                    }
                    bail!("re-run with --yes to combine them in this order, or pass --parts");
                }
                other => other.with_context(|| format!("extracting to {}", output.display()))?,
            };

            for s in &report.payload.parts {
                println!(
                    "  read    {}  (offset {} [{}], {} B)",
                    s.path.display(), s.offset, s.source.name(), s.len
                );
            }
            println!("Recovered: {} ({} B)", report.output.display(), report.payload.bytes_written);
            match &report.contents {
                ArchiveContents::Entries(names) => {
                    println!("Archive entries ({}):", names.len());
                    for n in names {
                        println!("  {}", n);
                    }
                }
                ArchiveContents::Raw => println!("Payload is not a ZIP archive; written as-is"),
                ArchiveContents::Malformed(reason) => println!("Payload looks like ZIP but is malformed: {}", reason),
            }
            if let Some(dir) = &report.unpacked {
                println!("Unpacked to: {}", dir.display());
            }

            match &report.integrity {
                IntegrityStatus::Verified(c) => println!("Checksum OK: {}", c),
                IntegrityStatus::Unchecked(c) => println!("Checksum: {} (nothing recorded to compare)", c),
                IntegrityStatus::Mismatch { expected, actual } => {
                    println!("CHECKSUM MISMATCH: expected {}, got {}", expected, actual);
                }
            }
            if report.payload.is_degraded() {
                println!("WARNING: some payload offsets were estimated; the output may be corrupt");
            }
            if report.is_unconfirmed() {
                println!("Completed, but integrity is NOT confirmed");
                return Ok(Outcome::Unconfirmed);
            }
            Ok(Outcome::Clean)
        }

        // ── Inspect ──────────────────────────────────────────────────────────
        Commands::Inspect { input, signature, hash } => {
            let r = ops::inspect(&input, &signature, hash)
                .with_context(|| format!("inspecting {}", input.display()))?;
            println!("── Polyglot ─────────────────────────────────────────────");
            println!("  Path           {}", r.path.display());
            println!("  Size           {} B", r.size);
            println!("  Checksum       {}", r.checksum);
            println!("  Signature      {}", r.signature);
            match r.offset {
                Some(o) => println!("  Payload at     {} ({} B)", o, r.size - o),
                None    => println!("  Payload at     not found"),
            }
            match &r.contents {
                Some(ArchiveContents::Entries(names)) => {
                    println!("  Entries        {}", names.len());
                    for n in names.iter().take(5) {
                        println!("    {}", n);
                    }
                    if names.len() > 5 {
                        println!("    … {} more", names.len() - 5);
                    }
                }
                Some(ArchiveContents::Malformed(reason)) => println!("  Archive        malformed: {}", reason),
                Some(ArchiveContents::Raw) | None => {}
            }
            Ok(Outcome::Clean)
        }

        // ── Verify ───────────────────────────────────────────────────────────
        Commands::Verify { metadata, chunk_size } => {
            let report = ops::verify_parts(&metadata, chunk_size)
                .with_context(|| format!("verifying {}", metadata.display()))?;
            for p in &report.parts {
                let verdict = match &p.status {
                    PartStatus::Checked(IntegrityStatus::Verified(_)) => "ok".to_string(),
                    PartStatus::Checked(IntegrityStatus::Mismatch { actual, .. }) => format!("MISMATCH ({})", actual),
                    PartStatus::Checked(IntegrityStatus::Unchecked(_)) => "unchecked".to_string(),
                    PartStatus::Missing => "MISSING".to_string(),
                    PartStatus::Truncated { len } => format!("TRUNCATED ({} B)", len),
                };
                println!("  {:<40} {}", p.path.display(), verdict);
            }
            if report.all_verified() {
                println!("All {} outputs verified", report.parts.len());
                Ok(Outcome::Clean)
            } else {
                println!("Verification failed");
                Ok(Outcome::Unconfirmed)
            }
        }
    }
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb
}
