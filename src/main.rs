//! inodb - a filesystem inventory for disk usage and compliance queries.
//!
//! Usage:
//!   inodb scan LOCATOR...        Scan (or rescan) roots into the inventory
//!   inodb find LOCATOR...        List paths matching filters
//!   inodb du LOCATOR...          Total size and inode count
//!   inodb report [LOCATOR...]    Usage per user and group
//!   inodb check LOCATOR...       Run a compliance check
//!   inodb export LOCATOR...      Export a nested JSON tree
//!   inodb --help                 Show help
//!
//! Roots that were never scanned are scanned on first use.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inodb_core::{IndexConfig, Locator, OwnerKind};
use inodb_query::{
    Check, DuCache, FindFilter, OwnerFilter, RootReport, export_json, export_tree, find, report,
    report_all, summarise_tags,
};
use inodb_store::{Inventory, PathId, Pipeline};

#[derive(Parser)]
#[command(
    name = "inodb",
    version,
    about = "Filesystem inventory for disk usage, ownership and compliance queries",
    long_about = "inodb keeps an incremental index of one or more filesystem trees in a \
                  SQLite database. Roots are given as paths, file:// URLs or \
                  tape://<namespace>/<path> locators."
)]
struct Cli {
    /// Configuration file (defaults to <config dir>/inodb/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Inventory database, overriding the configuration
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan roots into the inventory
    Scan {
        #[arg(required = true)]
        roots: Vec<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List indexed paths matching all filters
    Find {
        #[arg(required = true)]
        roots: Vec<String>,

        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Total size and inode count of indexed paths matching all filters
    Du {
        #[arg(required = true)]
        roots: Vec<String>,

        #[command(flatten)]
        filter: FilterArgs,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Usage per (user, group), largest first
    Report {
        /// Roots to report on (defaults to every scanned root plus tags)
        roots: Vec<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Report paths that break a rule
    Check {
        #[arg(required = true)]
        roots: Vec<String>,

        /// Flag entries not owned by this group
        #[arg(long, value_name = "GROUP", conflicts_with = "dir_group_readable")]
        group: Option<String>,

        /// Flag directories the group can neither read nor enter
        #[arg(long, required_unless_present = "group")]
        dir_group_readable: bool,
    },

    /// Export indexed trees as nested JSON
    Export {
        #[arg(required = true)]
        roots: Vec<String>,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct FilterArgs {
    /// Only entries last modified longer ago than this (e.g. "30d", "1y")
    #[arg(long)]
    older_than: Option<String>,

    /// Owner name or uid; repeatable, prefix with '!' or '-' to exclude
    #[arg(short, long, allow_hyphen_values = true)]
    user: Vec<String>,

    /// Group name or gid; repeatable, prefix with '!' or '-' to exclude
    #[arg(short, long, allow_hyphen_values = true)]
    group: Vec<String>,

    /// Drop entries with this name and everything beneath them
    #[arg(short, long)]
    exclude: Vec<String>,

    /// "+N" or "N" for at least N bytes, "-N" for less than N (e.g. "+1G", "-10K")
    #[arg(short, long, allow_hyphen_values = true)]
    size: Option<String>,
}

impl FilterArgs {
    fn build(self) -> Result<FindFilter> {
        let mut filter = FindFilter {
            exclude: self.exclude,
            ..FindFilter::default()
        };
        if let Some(age) = self.older_than {
            filter.older_than = Some(parse_duration(&age)?);
        }
        if !self.user.is_empty() {
            filter.users = Some(OwnerFilter::parse(OwnerKind::User, &self.user)?);
        }
        if !self.group.is_empty() {
            filter.groups = Some(OwnerFilter::parse(OwnerKind::Group, &self.group)?);
        }
        if let Some(size) = self.size {
            filter.size = Some(parse_signed_size(&size)?);
        }
        Ok(filter)
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => IndexConfig::load(path)?,
        None => IndexConfig::discover()?,
    };
    if let Some(database) = cli.database {
        config.database = database;
    }
    tracing::debug!(database = %config.database.display(), tags = config.tags.len(), "Configuration loaded");

    let mut inventory = Inventory::from_config(&config)
        .with_context(|| format!("Cannot open inventory {}", config.database.display()))?;
    let pipeline = Pipeline::from_config(&config);

    match cli.command {
        Command::Scan { roots, format } => run_scan(&mut inventory, &pipeline, &roots, format)?,
        Command::Find { roots, filter } => {
            let roots = resolve_roots(&mut inventory, &pipeline, &roots)?;
            for path in find(&inventory, &roots, &filter.build()?)? {
                println!("{path}");
            }
        }
        Command::Du {
            roots,
            filter,
            format,
        } => {
            let roots = resolve_roots(&mut inventory, &pipeline, &roots)?;
            let cache = DuCache::from_config(&config);
            let totals = cache.du(&inventory, &roots, &filter.build()?)?;
            match format {
                OutputFormat::Text => println!(
                    "{}  {} inodes",
                    format_size(totals.size),
                    totals.inodes
                ),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&totals)?),
            }
        }
        Command::Report { roots, format } => {
            run_report(&mut inventory, &pipeline, &config, &roots, format)?
        }
        Command::Check {
            roots,
            group,
            dir_group_readable,
        } => {
            let check = match group {
                Some(group) => match OwnerKind::Group.resolve(&group) {
                    Some(gid) => Check::GroupOwnership { gid },
                    None => bail!("Unknown group '{group}'"),
                },
                None if dir_group_readable => Check::DirectoryGroupReadable,
                None => bail!("No check selected"),
            };
            let roots = resolve_roots(&mut inventory, &pipeline, &roots)?;
            for path in check.run(&inventory, &roots)? {
                println!("{path}");
            }
        }
        Command::Export { roots, output } => {
            let roots = resolve_roots(&mut inventory, &pipeline, &roots)?;
            let json = export_json(&export_tree(&inventory, &roots)?, true)?;
            match output {
                Some(output_path) => {
                    std::fs::write(&output_path, json)
                        .with_context(|| format!("Cannot write {}", output_path.display()))?;
                    eprintln!("Exported to {}", output_path.display());
                }
                None => println!("{json}"),
            }
        }
    }

    Ok(())
}

/// Install the stderr log subscriber. `RUST_LOG` overrides `verbose`.
fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn parse_locator(root: &str) -> Result<Locator> {
    Locator::parse(root).with_context(|| format!("Invalid root '{root}'"))
}

/// Resolve roots to inventory ids, scanning any that were never indexed.
fn resolve_roots(inventory: &mut Inventory, pipeline: &Pipeline, roots: &[String]) -> Result<Vec<PathId>> {
    roots
        .iter()
        .map(|root| {
            let locator = parse_locator(root)?;
            pipeline
                .autoscan(inventory, &locator)
                .with_context(|| format!("Cannot index {locator}"))
        })
        .collect()
}

fn run_scan(inventory: &mut Inventory, pipeline: &Pipeline, roots: &[String], format: OutputFormat) -> Result<()> {
    let mut summaries = Vec::with_capacity(roots.len());
    for root in roots {
        let locator = parse_locator(root)?;
        let summary = pipeline
            .scan(inventory, &locator)
            .with_context(|| format!("Scan of {locator} failed"))?;
        if let OutputFormat::Text = format {
            println!(
                "{}: {} records, {} new, {} removed, {} unlinked in {:.2}s",
                summary.locator,
                summary.records,
                summary.inserted,
                summary.swept,
                summary.unresolved,
                summary.elapsed.as_secs_f64()
            );
        }
        summaries.push(summary);
    }
    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    }
    Ok(())
}

fn run_report(
    inventory: &mut Inventory,
    pipeline: &Pipeline,
    config: &IndexConfig,
    roots: &[String],
    format: OutputFormat,
) -> Result<()> {
    let (reports, tags) = if roots.is_empty() {
        (
            report_all(inventory)?,
            summarise_tags(inventory, pipeline, &config.tags)?,
        )
    } else {
        let ids = resolve_roots(inventory, pipeline, roots)?;
        (report(inventory, &ids)?, Vec::new())
    };

    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({ "tags": tags, "total": reports });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            if !tags.is_empty() {
                println!("Tags");
                for tag in &tags {
                    println!(
                        "  {:<24} {:>12} {:>12} inodes  {}",
                        tag.tag,
                        format_size(tag.size),
                        tag.inodes,
                        tag.description.as_deref().unwrap_or("")
                    );
                }
                println!();
            }
            for root in &reports {
                print_root_report(root);
            }
        }
    }
    Ok(())
}

fn print_root_report(root: &RootReport) {
    println!(
        "{}  {}  {} inodes",
        root.path,
        format_size(root.total_size()),
        root.total_inodes()
    );
    for row in &root.rows {
        let user = row
            .user
            .clone()
            .or_else(|| row.uid.map(|id| id.to_string()))
            .unwrap_or_else(|| "?".to_string());
        let group = row
            .group
            .clone()
            .or_else(|| row.gid.map(|id| id.to_string()))
            .unwrap_or_else(|| "?".to_string());
        println!(
            "  {:<16} {:<16} {:>12} {:>12} inodes  last seen {}",
            user,
            group,
            format_size(row.size),
            row.inodes,
            row.last_seen.map(format_timestamp).unwrap_or_default()
        );
    }
    println!();
}

/// Format size in human-readable form.
fn format_size(bytes: f64) -> String {
    humansize::format_size(bytes.max(0.0) as u64, humansize::BINARY)
}

fn format_timestamp(seconds: f64) -> String {
    chrono::DateTime::from_timestamp(seconds.floor() as i64, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}

/// Parse a signed size (e.g. "+1G", "-10K", "500").
fn parse_signed_size(s: &str) -> Result<i64> {
    let s = s.trim();
    let (negative, magnitude) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let bytes = i64::try_from(parse_size(magnitude)?).context("Size is too large")?;
    Ok(if negative { -bytes } else { bytes })
}

/// Parse a size string (e.g., "1K", "10MB", "1GiB").
fn parse_size(s: &str) -> Result<u64> {
    let upper = s.trim().to_uppercase();
    let digits_end = upper
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(upper.len());
    let (num, unit) = upper.split_at(digits_end);
    let num: f64 = num.parse().with_context(|| format!("Invalid size '{s}'"))?;

    let multiplier: u64 = match unit.trim_end_matches("IB").trim_end_matches('B') {
        "" => 1,
        "K" => 1 << 10,
        "M" => 1 << 20,
        "G" => 1 << 30,
        "T" => 1 << 40,
        "P" => 1 << 50,
        _ => bail!("Unknown size unit in '{s}'"),
    };

    Ok((num * multiplier as f64) as u64)
}

/// Parse a duration string (e.g., "1y", "6m", "30d", "1w").
fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();

    let (num, multiplier) = if let Some(n) = s.strip_suffix('y') {
        (n, 365.0 * 24.0 * 60.0 * 60.0)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 30.0 * 24.0 * 60.0 * 60.0)
    } else if let Some(n) = s.strip_suffix('w') {
        (n, 7.0 * 24.0 * 60.0 * 60.0)
    } else if let Some(n) = s.strip_suffix('d') {
        (n, 24.0 * 60.0 * 60.0)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 60.0 * 60.0)
    } else {
        (s.as_str(), 24.0 * 60.0 * 60.0) // Default to days
    };
    let num: f64 = num
        .parse()
        .with_context(|| format!("Invalid duration '{s}'"))?;
    if !num.is_finite() || num < 0.0 {
        bail!("Invalid duration '{s}'");
    }

    match Duration::try_from_secs_f64(num * multiplier) {
        Ok(duration) => Ok(duration),
        Err(e) => bail!("Duration '{s}' out of range: {e}"),
    }
}
