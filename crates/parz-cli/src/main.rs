use std::fs;
use std::io::{self, BufWriter, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use parz_core::{
    BackendPreference, CodecKind, CompressionPipeline, PipelineConfig, RunStats, SourceRetention,
    decode_members, destination_for,
};
use tracing_subscriber::EnvFilter;

const STDIO_BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Parser)]
#[command(
    name = "parz",
    version,
    about = "Parallel block compressor",
    long_about = "Split a file into blocks, compress them on parallel workers and write \
                  one gzip, bzip2 or lzip member per block, in order."
)]
struct Cli {
    /// Source file, or `-` to compress stdin to stdout.
    source: PathBuf,

    /// Destination path (defaults to <source> plus the codec extension).
    destination: Option<PathBuf>,

    /// Block size (supports suffixes K/M/G, e.g. 900K, 10M).
    #[arg(short, long, value_parser = parse_size)]
    block_size: Option<usize>,

    /// Compression level.
    #[arg(short = 'c', long = "compression", default_value_t = 6)]
    level: u32,

    /// Number of worker threads (defaults to CPU count).
    #[arg(short = 't', long, default_value_t = num_cpus::get())]
    threads: usize,

    /// Container format.
    #[arg(long, value_enum, conflicts_with_all = ["gzip", "bzip2", "lzip"])]
    codec: Option<CodecArg>,

    /// Use gzip compression (default).
    #[arg(short = 'z', long, conflicts_with_all = ["bzip2", "lzip"])]
    gzip: bool,

    /// Use bzip2 compression.
    #[arg(short = 'j', long, conflicts_with = "lzip")]
    bzip2: bool,

    /// Use lzip compression.
    #[arg(long)]
    lzip: bool,

    /// Where compression runs.
    #[arg(long, value_enum, default_value_t = BackendArg::Auto)]
    backend: BackendArg,

    /// Keep the source file.
    #[arg(short, long)]
    keep: bool,

    /// Log per-block progress.
    #[arg(short, long)]
    verbose: bool,

    /// Print timings only.
    #[arg(short = 'T', long)]
    timing: bool,

    /// Print run statistics as JSON (on stderr when compressing stdin).
    #[arg(long, conflicts_with = "timing")]
    stats_json: bool,

    /// Pause reading once this many finished blocks wait for a slower predecessor.
    #[arg(long)]
    max_pending: Option<usize>,

    /// Decode every member of SOURCE and report instead of compressing.
    #[arg(long)]
    test: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CodecArg {
    Gzip,
    Bzip2,
    Lzip,
}

impl From<CodecArg> for CodecKind {
    fn from(value: CodecArg) -> Self {
        match value {
            CodecArg::Gzip => CodecKind::Gzip,
            CodecArg::Bzip2 => CodecKind::Bzip2,
            CodecArg::Lzip => CodecKind::Lzip,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    Auto,
    Native,
    External,
}

impl From<BackendArg> for BackendPreference {
    fn from(value: BackendArg) -> Self {
        match value {
            BackendArg::Auto => BackendPreference::Auto,
            BackendArg::Native => BackendPreference::Native,
            BackendArg::External => BackendPreference::External,
        }
    }
}

impl Cli {
    fn requested_codec(&self) -> Option<CodecKind> {
        if let Some(codec) = self.codec {
            Some(codec.into())
        } else if self.bzip2 {
            Some(CodecKind::Bzip2)
        } else if self.lzip {
            Some(CodecKind::Lzip)
        } else if self.gzip {
            Some(CodecKind::Gzip)
        } else {
            None
        }
    }

    fn is_stdio(&self) -> bool {
        self.source.as_os_str() == "-"
    }

    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            codec: self.requested_codec().unwrap_or(CodecKind::Gzip),
            level: self.level,
            workers: self.threads,
            block_size: self.block_size,
            backend: self.backend.into(),
            source_retention: if self.keep {
                SourceRetention::Keep
            } else {
                SourceRetention::Discard
            },
            max_pending_frames: self.max_pending,
            verbose: self.verbose,
            ..PipelineConfig::default()
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(error) = run(&cli) {
        eprintln!("parz: {error}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if cli.test {
        return test_command(cli);
    }

    let pipeline = CompressionPipeline::new(cli.pipeline_config())?;
    if cli.is_stdio() {
        stream_command(cli, &pipeline)
    } else {
        file_command(cli, &pipeline)
    }
}

fn file_command(
    cli: &Cli,
    pipeline: &CompressionPipeline,
) -> Result<(), Box<dyn std::error::Error>> {
    let codec = pipeline.config().codec;
    let destination = cli
        .destination
        .clone()
        .unwrap_or_else(|| destination_for(&cli.source, codec));

    let stats = pipeline.compress_file(&cli.source, &destination)?;
    report(cli, &stats, &cli.source, &destination)
}

fn stream_command(
    cli: &Cli,
    pipeline: &CompressionPipeline,
) -> Result<(), Box<dyn std::error::Error>> {
    if cli.destination.is_some() {
        return Err("a destination cannot be given when compressing stdin".into());
    }
    let stdout = io::stdout();
    if stdout.is_terminal() {
        return Err("refusing to write compressed data to a terminal".into());
    }

    let writer = BufWriter::with_capacity(STDIO_BUFFER_SIZE, stdout.lock());
    let (writer, stats) = pipeline.compress_stream(io::stdin().lock(), writer)?;
    writer.into_inner().map_err(|err| err.into_error())?.flush()?;

    // Compressed bytes own stdout, so every report goes to stderr.
    if cli.stats_json {
        eprintln!("{}", serde_json::to_string(&stats)?);
    } else if cli.timing || cli.verbose {
        print_timing(&mut io::stderr(), &stats)?;
    }
    Ok(())
}

fn test_command(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let codec = cli
        .requested_codec()
        .or_else(|| codec_from_extension(&cli.source))
        .ok_or("cannot tell the container format; pass --codec")?;

    let started_at = Instant::now();
    let data = fs::read(&cli.source)?;
    let members = decode_members(codec, &data)?;
    let restored: u64 = members.iter().map(|member| member.len() as u64).sum();

    println!(
        "{}: ok ({codec}, {} members, {} -> {}, {})",
        cli.source.display(),
        members.len(),
        format_bytes(data.len() as u64),
        format_bytes(restored),
        format_duration(started_at.elapsed()),
    );
    Ok(())
}

fn report(
    cli: &Cli,
    stats: &RunStats,
    source: &Path,
    destination: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = io::stdout().lock();
    if cli.stats_json {
        writeln!(stdout, "{}", serde_json::to_string_pretty(stats)?)?;
    } else if cli.timing {
        print_timing(&mut stdout, stats)?;
    } else if cli.verbose {
        print_summary(&mut stdout, stats, source, destination)?;
    }
    Ok(())
}

fn print_timing(out: &mut impl Write, stats: &RunStats) -> io::Result<()> {
    writeln!(
        out,
        "{} in {} ({:.3}x)",
        format_bytes(stats.input_bytes),
        format_duration(stats.elapsed()),
        stats.compression_ratio()
    )
}

fn print_summary(
    out: &mut impl Write,
    stats: &RunStats,
    source: &Path,
    destination: &Path,
) -> io::Result<()> {
    let elapsed_secs = stats.elapsed().as_secs_f64().max(1e-6);
    let read_bps = stats.input_bytes as f64 / elapsed_secs;

    writeln!(out, "compression complete")?;
    writeln!(out, "  source: {}", source.display())?;
    writeln!(out, "  output: {}", destination.display())?;
    writeln!(
        out,
        "  codec: {} level {} ({})",
        stats.codec, stats.level, stats.backend
    )?;
    writeln!(out, "  elapsed: {}", format_duration(stats.elapsed()))?;
    writeln!(out, "  input bytes: {}", format_bytes(stats.input_bytes))?;
    writeln!(out, "  output bytes: {}", format_bytes(stats.output_bytes))?;
    writeln!(out, "  ratio: {:.3}x", stats.compression_ratio())?;
    writeln!(out, "  throughput: {}/s", format_rate(read_bps))?;
    writeln!(
        out,
        "  blocks: {} x {} | peak reorder depth {}",
        stats.blocks,
        format_bytes(stats.block_size as u64),
        stats.peak_pending
    )?;
    writeln!(out, "  worker runtime:")?;
    for worker in &stats.worker_runtime {
        writeln!(
            out,
            "    w{:02} blocks {:>6} | busy {:>8} | util {:>6.2}%",
            worker.worker_id,
            worker.blocks_completed,
            format_duration(Duration::from_micros(worker.busy_us)),
            worker.utilization * 100.0,
        )?;
    }
    Ok(())
}

fn codec_from_extension(path: &Path) -> Option<CodecKind> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    [CodecKind::Gzip, CodecKind::Bzip2, CodecKind::Lzip]
        .into_iter()
        .find(|codec| codec.extension().trim_start_matches('.') == extension)
}

fn parse_size(value: &str) -> Result<usize, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("size cannot be empty".to_string());
    }

    let split_at = trimmed
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (num_part, suffix_part) = trimmed.split_at(split_at);
    if num_part.is_empty() {
        return Err(format!("invalid size: {value}"));
    }

    let base: usize = num_part
        .parse()
        .map_err(|_| format!("invalid size number: {value}"))?;

    let multiplier = match suffix_part.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1usize,
        "k" | "kb" => 1024usize,
        "m" | "mb" => 1024usize * 1024usize,
        "g" | "gb" => 1024usize * 1024usize * 1024usize,
        other => {
            return Err(format!("invalid size suffix '{other}' in '{value}'"));
        }
    };

    match base.checked_mul(multiplier) {
        Some(0) => Err("block size must be at least 1 byte".to_string()),
        Some(size) => Ok(size),
        None => Err(format!("size overflow: {value}")),
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0usize;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[unit])
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

fn format_rate(bytes_per_second: f64) -> String {
    if !bytes_per_second.is_finite() || bytes_per_second <= 0.0 {
        return "0 B".to_string();
    }
    format_bytes(bytes_per_second as u64)
}

fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let millis = duration.subsec_millis();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else if minutes > 0 {
        format!("{minutes:02}:{seconds:02}")
    } else {
        format!("{seconds}.{millis:03}s")
    }
}
