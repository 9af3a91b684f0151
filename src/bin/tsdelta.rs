//! Command-line inspection tool for the tsdelta cache core.
//!
//! Loads configuration from (in precedence order): defaults, config file, environment variables
//! (`TSDELTA__*`), and CLI flags. Computes missing sub-ranges for a cached extent list, or parses
//! a CSV file through the tabular parser and reports (and optionally persists) the resulting
//! dataset.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use config::{Config, Environment, File};
use tracing::{debug, info};
use tsdelta::error::TimeseriesError;
use tsdelta::persistence::save_dataset;
use tsdelta::utils::{now_ns, SECOND};
use tsdelta::{
    CoreConfig, Extent, ExtentList, FieldDataType, FieldDefinition, FieldRole, SeriesFields,
    SplicePolicy, TabularParser, TimeRangeQuery, Timestamp,
};

// ---------- CLI ----------

/// Time-series delta cache inspection tool.
#[derive(Parser, Debug)]
#[command(name = "tsdelta", version, about)]
pub struct Cli {
    /// Path to config file (TOML). If omitted, `tsdelta.toml` is loaded when present.
    #[arg(long, env = "TSDELTA_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Do not load any config file; use defaults + env + CLI only.
    #[arg(long, default_value_t = false, global = true)]
    pub no_config: bool,

    /// Load and validate config (file + env + CLI), print the effective values, then exit.
    #[arg(long, default_value_t = false)]
    pub validate_config: bool,

    /// Point budget for size cropping (0 disables).
    #[arg(long, env = "TSDELTA_MAX_POINTS", global = true)]
    pub max_points: Option<usize>,

    /// Default backfill tolerance in seconds.
    #[arg(long, env = "TSDELTA_BACKFILL_TOLERANCE_SECS", global = true)]
    pub backfill_tolerance_secs: Option<u64>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the sub-ranges of `--want` missing from `--have` (all times in epoch seconds).
    Deltas {
        /// Cached coverage, e.g. `0-100,200-300`.
        #[arg(long, default_value = "")]
        have: String,
        /// Requested range, e.g. `0-400`.
        #[arg(long)]
        want: String,
        /// Step in seconds.
        #[arg(long, default_value_t = 1)]
        step: u64,
        /// Split gaps into pieces no wider than this many seconds.
        #[arg(long, conflicts_with_all = ["splice_aligned", "splice_max_points"])]
        splice_max_range: Option<u64>,
        /// Split gaps at multiples of this many seconds.
        #[arg(long, conflicts_with_all = ["splice_max_range", "splice_max_points"])]
        splice_aligned: Option<u64>,
        /// Split gaps into pieces of at most this many timestamps.
        #[arg(long, conflicts_with_all = ["splice_max_range", "splice_aligned"])]
        splice_max_points: Option<usize>,
    },
    /// Parse a CSV file whose header declares `name:role:type` per column.
    Inspect {
        path: PathBuf,
        /// Query start, epoch seconds.
        #[arg(long, default_value_t = 0)]
        start: u64,
        /// Query end, epoch seconds (defaults to now).
        #[arg(long)]
        end: Option<u64>,
        /// Query step in seconds.
        #[arg(long, default_value_t = 60)]
        step: u64,
        /// Crop the dataset to `START-END` (epoch seconds) after parsing.
        #[arg(long)]
        crop: Option<String>,
        /// Write the cache encoding of the final dataset to this path.
        #[arg(long)]
        cache_out: Option<PathBuf>,
    },
}

// ---------- File/env config (all optional for partial config) ----------

/// Pool section in config file.
#[derive(Debug, Default, serde::Deserialize)]
pub struct PoolFileConfig {
    pub max_buffer_bytes: Option<usize>,
    pub max_map_entries: Option<usize>,
    pub max_set_entries: Option<usize>,
    pub max_pooled: Option<usize>,
}

/// Top-level config as read from file + env. Every field optional for layering.
#[derive(Debug, Default, serde::Deserialize)]
pub struct FileConfig {
    pub max_points: Option<usize>,
    pub backfill_tolerance_secs: Option<u64>,
    pub pool: Option<PoolFileConfig>,
}

/// Load merged config. CLI overrides file/env.
fn load_config(cli: &Cli) -> Result<CoreConfig, String> {
    let mut builder = Config::builder();

    if !cli.no_config {
        if let Some(ref path) = cli.config {
            if !path.exists() {
                return Err(format!("config file not found: {}", path.display()));
            }
            builder = builder.add_source(File::from(path.as_path()).required(false));
        } else {
            let default_path = PathBuf::from("tsdelta.toml");
            if default_path.exists() {
                builder = builder.add_source(File::from(default_path.as_path()).required(false));
            }
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("TSDELTA")
            .separator("__")
            .try_parsing(true)
            .ignore_empty(true),
    );

    let merged = builder.build().map_err(|e| e.to_string())?;
    let partial: FileConfig = merged.try_deserialize().map_err(|e| e.to_string())?;

    let mut cfg = CoreConfig::default();
    merge_into_core_config(&mut cfg, &partial);

    if let Some(n) = cli.max_points {
        cfg.max_points = n;
    }
    if let Some(secs) = cli.backfill_tolerance_secs {
        cfg.backfill_tolerance = Duration::from_secs(secs);
    }
    if cfg.pool.max_pooled == 0 {
        return Err("pool.max_pooled must be at least 1".to_string());
    }
    Ok(cfg)
}

/// Merge file/env partial config onto `CoreConfig`. Only overwrites fields that are `Some`.
fn merge_into_core_config(base: &mut CoreConfig, partial: &FileConfig) {
    if let Some(n) = partial.max_points {
        base.max_points = n;
    }
    if let Some(secs) = partial.backfill_tolerance_secs {
        base.backfill_tolerance = Duration::from_secs(secs);
    }
    if let Some(p) = &partial.pool {
        if let Some(n) = p.max_buffer_bytes {
            base.pool.max_buffer_bytes = n;
        }
        if let Some(n) = p.max_map_entries {
            base.pool.max_map_entries = n;
        }
        if let Some(n) = p.max_set_entries {
            base.pool.max_set_entries = n;
        }
        if let Some(n) = p.max_pooled {
            base.pool.max_pooled = n;
        }
    }
}

// ---------- deltas ----------

fn parse_extent(s: &str) -> Result<Extent, String> {
    let (a, b) = s
        .trim()
        .split_once('-')
        .ok_or_else(|| format!("invalid extent {:?}: expected START-END", s))?;
    let start: u64 = a.trim().parse().map_err(|e| format!("invalid extent {:?}: {}", s, e))?;
    let end: u64 = b.trim().parse().map_err(|e| format!("invalid extent {:?}: {}", s, e))?;
    if start > end {
        return Err(format!("invalid extent {:?}: start after end", s));
    }
    Ok(Extent::new(secs_to_ns(start)?, secs_to_ns(end)?))
}

fn secs_to_ns(secs: u64) -> Result<Timestamp, String> {
    secs.checked_mul(SECOND)
        .ok_or_else(|| format!("timestamp {} out of range", secs))
}

fn parse_extent_list(s: &str) -> Result<ExtentList, String> {
    s.split(',')
        .filter(|p| !p.trim().is_empty())
        .map(parse_extent)
        .collect()
}

fn run_deltas(
    have: &str,
    want: &str,
    step: u64,
    policy: Option<SplicePolicy>,
) -> Result<(), String> {
    let step = Duration::from_secs(step);
    let have = parse_extent_list(have)?.compress(step);
    let want = parse_extent(want)?;
    let mut missing = have.calculate_deltas(&want, step);
    if let Some(policy) = policy {
        missing = missing.splice(step, policy);
    }
    debug!(have = %have, gaps = missing.len(), "computed deltas");
    for e in missing.iter() {
        println!("{}-{}", e.start / SECOND, e.end / SECOND);
    }
    Ok(())
}

// ---------- inspect ----------

fn coerce_type(t: &str) -> FieldDataType {
    match t {
        "unix_s" => FieldDataType::DateTimeUnixSecs,
        "unix_ms" => FieldDataType::DateTimeUnixMilli,
        "unix_ns" => FieldDataType::DateTimeUnixNano,
        "float" | "double" => FieldDataType::Float64,
        "int" => FieldDataType::Int64,
        "uint" => FieldDataType::Uint64,
        "bool" => FieldDataType::Bool,
        _ => FieldDataType::String,
    }
}

/// Reads roles from a header row of `name:role:type` cells.
fn classify_header(
    rows: &[Vec<String>],
    _: Option<&TimeRangeQuery>,
) -> tsdelta::error::Result<SeriesFields> {
    let header = rows.first().ok_or(TimeseriesError::InvalidBody)?;
    let mut sf = SeriesFields::default();
    for (pos, cell) in header.iter().enumerate() {
        let mut parts = cell.splitn(3, ':');
        let name = parts.next().unwrap_or_default().trim();
        let role = parts.next().unwrap_or("value").trim();
        let provider_type = parts.next().unwrap_or("string").trim();
        let role = match role {
            "timestamp" => FieldRole::Timestamp,
            "tag" => FieldRole::Tag,
            "value" => FieldRole::Value,
            "untracked" => FieldRole::Untracked,
            "result" => {
                sf.result_name_column = Some(pos);
                continue;
            }
            _ => return Err(TimeseriesError::InvalidBody),
        };
        let mut fd = FieldDefinition::new(name, FieldDataType::Unknown, role, pos);
        fd.provider_type = provider_type.to_string();
        match role {
            FieldRole::Timestamp => sf.timestamp = fd,
            FieldRole::Tag => sf.tags.push(fd),
            FieldRole::Value => sf.values.push(fd),
            FieldRole::Untracked => sf.untracked.push(fd),
        }
    }
    Ok(sf)
}

fn parse_timestamp(cell: &str, fd: &FieldDefinition) -> tsdelta::error::Result<Timestamp> {
    let v: u64 = cell.trim().parse().map_err(|e: std::num::ParseIntError| {
        TimeseriesError::InvalidTimestamp {
            value: cell.to_string(),
            reason: e.to_string(),
        }
    })?;
    let scale = match fd.data_type {
        FieldDataType::DateTimeUnixMilli => 1_000_000,
        FieldDataType::DateTimeUnixNano => 1,
        _ => SECOND,
    };
    v.checked_mul(scale).ok_or_else(|| TimeseriesError::InvalidTimestamp {
        value: cell.to_string(),
        reason: "out of range".to_string(),
    })
}

fn run_inspect(
    cfg: &CoreConfig,
    path: &Path,
    start: u64,
    end: Option<u64>,
    step: u64,
    crop: Option<&str>,
    cache_out: Option<&Path>,
) -> Result<(), String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| format!("invalid csv in {}: {}", path.display(), e))?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        rows.push(record.iter().map(str::to_string).collect());
    }

    let now = now_ns();
    let end = match end {
        Some(e) => secs_to_ns(e)?,
        None => now,
    };
    let mut trq = TimeRangeQuery::new("inspect", secs_to_ns(start)?, end, Duration::from_secs(step));
    trq.normalize_extent(now.max(end));

    let parser = TabularParser::builder()
        .field_classifier(classify_header)
        .type_coercer(coerce_type)
        .timestamp_parser(parse_timestamp)
        .first_data_row(1)
        .build()
        .map_err(|e| e.to_string())?;
    let mut ds = parser.to_dataset(&rows, Some(&trq)).map_err(|e| e.to_string())?;

    if let Some(c) = crop {
        let e = parse_extent(c)?;
        ds.crop_to_range(&e);
    }
    if cfg.max_points > 0 {
        let used = trq.extent;
        ds.crop_to_size(cfg.max_points, now.max(end), &used);
    }

    println!("results={}", ds.results.len());
    println!("series={}", ds.series_count());
    println!("points={}", ds.value_count());
    println!("timestamps={}", ds.timestamp_count());
    println!("size_bytes={}", ds.size());
    let extents: Vec<String> = ds
        .extent_list
        .iter()
        .map(|e| format!("{}-{}", e.start / SECOND, e.end / SECOND))
        .collect();
    println!("extents={}", extents.join(","));

    if let Some(out) = cache_out {
        let written = save_dataset(&ds, out).map_err(|e| e.to_string())?;
        info!(path = %written.display(), "wrote cache encoding");
    }
    Ok(())
}

// ---------- Main ----------

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli).map_err(|e| {
        eprintln!("config error: {}", e);
        e
    })?;

    if cli.validate_config {
        println!("max_points={}", cfg.max_points);
        println!("backfill_tolerance_secs={}", cfg.backfill_tolerance.as_secs());
        println!("pool.max_buffer_bytes={}", cfg.pool.max_buffer_bytes);
        println!("pool.max_map_entries={}", cfg.pool.max_map_entries);
        println!("pool.max_set_entries={}", cfg.pool.max_set_entries);
        println!("pool.max_pooled={}", cfg.pool.max_pooled);
        return Ok(());
    }

    tsdelta::pool::install(cfg.pool);

    match cli.command {
        Some(Command::Deltas {
            have,
            want,
            step,
            splice_max_range,
            splice_aligned,
            splice_max_points,
        }) => {
            let policy = splice_max_range
                .map(|s| SplicePolicy::MaxRange(Duration::from_secs(s)))
                .or(splice_aligned.map(|s| SplicePolicy::Aligned(Duration::from_secs(s))))
                .or(splice_max_points.map(SplicePolicy::MaxPoints));
            run_deltas(&have, &want, step, policy).map_err(|e| {
                eprintln!("deltas failed: {}", e);
                e
            })?;
        }
        Some(Command::Inspect {
            path,
            start,
            end,
            step,
            crop,
            cache_out,
        }) => {
            run_inspect(&cfg, &path, start, end, step, crop.as_deref(), cache_out.as_deref()).map_err(
                |e| {
                    eprintln!("inspect failed: {}", e);
                    e
                },
            )?;
        }
        None => {
            eprintln!("no command given; see --help");
            return Err("no command given".into());
        }
    }
    Ok(())
}
