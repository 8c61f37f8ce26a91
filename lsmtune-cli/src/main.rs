//! LsmTune command-line driver

use anyhow::{bail, Context, Result};
use clap::builder::BoolishValueParser;
use clap::{Args, Parser, Subcommand, ValueEnum};
use lsmtune_core::params::{BenchConfig, CompactionPri, CompactionStyle, PinningTier};
use lsmtune_core::runner::Runner;
use lsmtune_core::workload::{
    KeyDistribution, QueryMix, TraceGenerator, TraceReader, DEFAULT_KEY_SIZE, DEFAULT_VALUE_SIZE,
};
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

const MIB: u64 = 1024 * 1024;

#[derive(Parser)]
#[command(
    name = "lsmtune",
    version,
    about = "Replay key-value traces against a tunable LSM engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Debug logging (overrides RUST_LOG)
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one benchmark: replay a trace, wait for compactions, write the report
    Run(RunArgs),
    /// Write a synthetic trace
    Generate(GenerateArgs),
}

/// Flags override values from `--config`, which override the defaults
#[derive(Args)]
struct RunArgs {
    /// JSON configuration file; missing fields keep their defaults
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Trace to replay [default: workload.txt]
    #[arg(short = 'w', long = "workload", value_name = "PATH")]
    workload: Option<PathBuf>,

    /// Plain-text report [default: output.txt]
    #[arg(short = 'o', long = "output", value_name = "PATH")]
    output: Option<PathBuf>,

    /// Also write the report as JSON
    #[arg(long, value_name = "PATH")]
    json: Option<PathBuf>,

    /// Database directory [default: ./db]
    #[arg(long = "path", value_name = "PATH")]
    db_path: Option<PathBuf>,

    /// Print a progress marker every N operations, 0 disables [default: 100000]
    #[arg(long = "interval")]
    log_interval: Option<u64>,

    /// Destroy and recreate the database [default: 1]
    #[arg(short = 'd', long = "destroy", value_parser = BoolishValueParser::new())]
    destroy: Option<bool>,

    /// Drop the OS page cache before opening [default: 1]
    #[arg(long = "cc", value_parser = BoolishValueParser::new())]
    clear_cache: Option<bool>,

    /// Collect engine statistics [default: 1]
    #[arg(long = "stat", value_parser = BoolishValueParser::new())]
    statistics: Option<bool>,

    /// Size ratio between levels [default: 10]
    #[arg(short = 'T', long = "size_ratio")]
    size_ratio: Option<f64>,

    /// Pages in the memory buffer [default: 4096]
    #[arg(short = 'P', long = "buffer_size_in_pages")]
    buffer_size_in_pages: Option<u64>,

    /// Entries per page [default: 4]
    #[arg(short = 'B', long = "entries_per_page")]
    entries_per_page: Option<u64>,

    /// Size of one entry in bytes [default: 1024]
    #[arg(short = 'E', long = "entry_size")]
    entry_size: Option<u64>,

    /// Buffer size in bytes, overrides P*B*E when non-zero [default: 0]
    #[arg(short = 'M', long = "memory_size")]
    buffer_size: Option<u64>,

    /// Ratio between file and memtable size [default: 1]
    #[arg(short = 'f', long = "file_to_memtable_size_ratio")]
    file_to_memtable_size_ratio: Option<u32>,

    /// Compaction priority [1: min overlapping ratio, 2: by compensated size,
    /// 3: oldest largest seq first, 4: oldest smallest seq first, 5: round robin]
    #[arg(short = 'c', long = "compaction_pri", value_parser = clap::value_parser!(u8).range(1..=5))]
    compaction_pri: Option<u8>,

    /// Compaction style [1: level, 2: universal, 3: fifo, 4: none]
    #[arg(short = 'C', long = "compaction_style", value_parser = clap::value_parser!(u8).range(1..=4))]
    compaction_style: Option<u8>,

    /// Bloom filter bits per key, 0 disables the filter [default: 10]
    #[arg(short = 'b', long = "bits_per_key")]
    bits_per_key: Option<f64>,

    /// Block cache size in MiB [default: 32]
    #[arg(long = "bb")]
    block_cache_mib: Option<u64>,

    /// Strict block cache capacity limit [default: 1]
    #[arg(long = "bb_strict", value_parser = BoolishValueParser::new())]
    strict_capacity_limit: Option<bool>,

    /// Cache index and filter blocks with high priority [default: 1]
    #[arg(long = "cache_metadata_high_pri", value_parser = BoolishValueParser::new())]
    cache_metadata_high_pri: Option<bool>,

    /// Metadata pinning [1: none, 2: flushed and similar, 3: all]
    #[arg(long = "metadata_pinning", value_parser = clap::value_parser!(u8).range(1..=3))]
    metadata_pinning: Option<u8>,

    /// Share of the block cache reserved for high priority blocks [default: 0.5]
    #[arg(long = "cache_high_priority_ratio")]
    cache_high_priority_ratio: Option<f64>,
}

impl RunArgs {
    fn into_config(self) -> Result<BenchConfig> {
        let mut config = match &self.config {
            Some(path) => BenchConfig::from_json_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => BenchConfig::default(),
        };

        macro_rules! apply {
            ($args:ident, $config:ident; $($flag:ident => $field:ident),* $(,)?) => {
                $(if let Some(value) = $args.$flag {
                    $config.$field = value;
                })*
            };
        }
        let args = self;
        apply! {
            args, config;
            workload => workload_path,
            output => output_path,
            db_path => db_path,
            log_interval => log_interval,
            destroy => destroy_database,
            clear_cache => clear_system_cache,
            statistics => enable_statistics,
            size_ratio => size_ratio,
            buffer_size_in_pages => buffer_size_in_pages,
            entries_per_page => entries_per_page,
            entry_size => entry_size,
            buffer_size => buffer_size,
            file_to_memtable_size_ratio => file_to_memtable_size_ratio,
            bits_per_key => bits_per_key,
            strict_capacity_limit => strict_capacity_limit,
            cache_metadata_high_pri => cache_index_and_filter_blocks_with_high_priority,
            cache_high_priority_ratio => cache_high_priority_ratio,
        }

        if args.json.is_some() {
            config.json_output_path = args.json;
        }
        if let Some(mib) = args.block_cache_mib {
            config.capacity = mib
                .checked_mul(MIB)
                .with_context(|| format!("block cache of {} MiB overflows", mib))?;
        }
        if let Some(choice) = args.compaction_pri {
            config.compaction_pri = CompactionPri::from_choice(choice)
                .with_context(|| format!("invalid compaction priority {}", choice))?;
        }
        if let Some(choice) = args.compaction_style {
            config.compaction_style = CompactionStyle::from_choice(choice)
                .with_context(|| format!("invalid compaction style {}", choice))?;
        }
        if let Some(choice) = args.metadata_pinning {
            config.metadata_pinning = PinningTier::from_choice(choice)
                .with_context(|| format!("invalid metadata pinning {}", choice))?;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Distribution {
    Uniform,
    Zipf,
}

#[derive(Args)]
struct GenerateArgs {
    /// Trace to write
    #[arg(short = 'o', long = "output", value_name = "PATH", default_value = "workload.txt")]
    output: PathBuf,

    /// Number of inserts of fresh random keys
    #[arg(short = 'I', long, default_value_t = 0)]
    inserts: u64,

    /// Number of query-phase operations over the preloaded keys
    #[arg(short = 'Q', long, default_value_t = 0)]
    queries: u64,

    /// Existing trace whose inserted keys the queries draw from;
    /// defaults to the keys inserted by this invocation
    #[arg(long, value_name = "PATH")]
    preload: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_KEY_SIZE)]
    key_size: usize,

    #[arg(long, default_value_t = DEFAULT_VALUE_SIZE)]
    value_size: usize,

    /// Key choice for queries
    #[arg(long, value_enum, default_value_t = Distribution::Uniform)]
    distribution: Distribution,

    /// Zipf exponent
    #[arg(long, default_value_t = 1.0)]
    zipf_alpha: f64,

    /// Relative weight of point queries
    #[arg(long, default_value_t = 100)]
    point_queries: u32,

    /// Relative weight of updates
    #[arg(long, default_value_t = 0)]
    updates: u32,

    /// Relative weight of deletes
    #[arg(long, default_value_t = 0)]
    deletes: u32,

    /// Relative weight of range scans
    #[arg(long, default_value_t = 0)]
    range_scans: u32,

    /// Preloaded keys covered by one range scan
    #[arg(long, default_value_t = 16)]
    scan_length: usize,

    /// Seed for reproducible traces
    #[arg(long)]
    seed: Option<u64>,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn run_cmd(args: RunArgs) -> Result<()> {
    let config = args.into_config()?;
    let runner = Runner::new(config);

    let stdout = io::stdout();
    let mut console = stdout.lock();
    let report = runner.run(&mut console).context("benchmark run failed")?;

    info!(
        operations = report.workload.operations,
        unknown = report.workload.unknown_ops,
        output = %runner.config().output_path.display(),
        "Report written"
    );
    Ok(())
}

fn generate_cmd(args: GenerateArgs) -> Result<()> {
    if args.inserts == 0 && args.queries == 0 {
        bail!("nothing to generate: pass --inserts and/or --queries");
    }
    if args.inserts == 0 && args.preload.is_none() {
        bail!("--queries without --inserts needs --preload to draw keys from");
    }
    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    // Extending the preload trace in place must not truncate it
    let extend = match &args.preload {
        Some(preload) => same_file(preload, &args.output),
        None => false,
    };

    let mut generator = TraceGenerator::new(args.key_size, args.value_size, args.seed);
    {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(extend)
            .truncate(!extend)
            .open(&args.output)
            .with_context(|| format!("creating {}", args.output.display()))?;
        let mut out = BufWriter::new(file);
        generator.write_insertions(&mut out, args.inserts)?;
    }
    info!(
        inserts = args.inserts,
        output = %args.output.display(),
        extend,
        "Wrote insertions"
    );

    if args.queries == 0 {
        return Ok(());
    }

    let preload = args.preload.as_ref().unwrap_or(&args.output);
    let keys = TraceGenerator::load_keys(TraceReader::open(preload)?)
        .with_context(|| format!("loading keys from {}", preload.display()))?;

    let distribution = match args.distribution {
        Distribution::Uniform => KeyDistribution::Uniform,
        Distribution::Zipf => KeyDistribution::Zipf(args.zipf_alpha),
    };
    let mix = QueryMix {
        point_queries: args.point_queries,
        updates: args.updates,
        deletes: args.deletes,
        range_scans: args.range_scans,
        scan_length: args.scan_length,
    };

    let file = OpenOptions::new()
        .append(true)
        .open(&args.output)
        .with_context(|| format!("opening {}", args.output.display()))?;
    let mut out = BufWriter::new(file);
    generator.write_queries(&mut out, &keys, args.queries, distribution, mix)?;
    info!(
        queries = args.queries,
        preloaded_keys = keys.len(),
        output = %args.output.display(),
        "Wrote queries"
    );
    Ok(())
}

/// Both paths exist and resolve to the same file
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run(args) => run_cmd(args),
        Commands::Generate(args) => generate_cmd(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Commands {
        Cli::try_parse_from(std::iter::once("lsmtune").chain(args.iter().copied()))
            .unwrap()
            .command
    }

    fn generate(args: &[&str]) -> Result<()> {
        let mut full = vec!["generate"];
        full.extend_from_slice(args);
        match parse(&full) {
            Commands::Generate(args) => generate_cmd(args),
            Commands::Run(_) => unreachable!(),
        }
    }

    fn run_config(args: &[&str]) -> Result<BenchConfig> {
        let mut full = vec!["run"];
        full.extend_from_slice(args);
        match parse(&full) {
            Commands::Run(args) => args.into_config(),
            Commands::Generate(_) => unreachable!(),
        }
    }

    #[test]
    fn test_generate_extends_preload_in_place() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trace.txt");
        let path_str = path.to_str().unwrap();

        generate(&["-o", path_str, "--inserts", "50", "--seed", "1"]).unwrap();
        let inserts = fs::read_to_string(&path).unwrap();
        assert_eq!(inserts.lines().count(), 50);

        generate(&["-o", path_str, "--preload", path_str, "--queries", "10", "--seed", "2"])
            .unwrap();
        let trace = fs::read_to_string(&path).unwrap();
        assert_eq!(trace.lines().count(), 60);
        assert!(trace.starts_with(&inserts));
        assert!(trace.lines().skip(50).all(|line| line.starts_with("Q ")));
    }

    #[test]
    fn test_generate_from_other_preload_replaces_output() {
        let dir = TempDir::new().unwrap();
        let preload = dir.path().join("load.txt");
        let output = dir.path().join("queries.txt");
        fs::write(&output, "stale\n").unwrap();

        generate(&["-o", preload.to_str().unwrap(), "--inserts", "20"]).unwrap();
        generate(&[
            "-o",
            output.to_str().unwrap(),
            "--preload",
            preload.to_str().unwrap(),
            "--queries",
            "5",
        ])
        .unwrap();

        let queries = fs::read_to_string(&output).unwrap();
        assert_eq!(queries.lines().count(), 5);
        assert!(!queries.contains("stale"));
        assert_eq!(fs::read_to_string(&preload).unwrap().lines().count(), 20);
    }

    #[test]
    fn test_queries_without_key_source_leave_output_alone() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trace.txt");
        fs::write(&path, "I a 1\n").unwrap();

        let err = generate(&["-o", path.to_str().unwrap(), "--queries", "5"]).unwrap_err();
        assert!(err.to_string().contains("--preload"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "I a 1\n");
    }

    #[test]
    fn test_run_flags_override_defaults() {
        let config = run_config(&["-T", "4", "-E", "128", "--bb", "8", "-C", "2"]).unwrap();
        assert_eq!(config.size_ratio, 4.0);
        assert_eq!(config.entry_size, 128);
        assert_eq!(config.capacity, 8 * MIB);
        assert_eq!(config.compaction_style, CompactionStyle::Universal);
        assert_eq!(config.entries_per_page, 4);
    }

    #[test]
    fn test_oversized_inputs_rejected() {
        let err = run_config(&["--bb", "18446744073709551"]).unwrap_err();
        assert!(err.to_string().contains("overflows"));

        let err = run_config(&["-E", "4294967296", "-B", "4294967296"]).unwrap_err();
        assert!(format!("{:#}", err).contains("block size overflows"));
    }
}
