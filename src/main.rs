//! Metaindex CLI
//!
//! Command-line interface over a local index database:
//! - Insert block metadata from JSON
//! - Look up and query blocks
//! - Inspect partitions and tenant stats
//! - Apply retention

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use metaindex::block::{BlockIdGenerator, BlockList, BlockMeta};
use metaindex::config::{generate_default_config, parse_duration, Config};
use metaindex::index::Index;
use metaindex::query::MetadataQuery;
use metaindex::storage::{open_database, SqliteStore};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "metaindex")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Partitioned block metadata index")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Index database, overrides the config
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

/// Query arguments shared by `query` and `labels`
#[derive(clap::Args)]
pub struct QueryArgs {
    /// Label selector, e.g. '{service_name="api"}'
    #[arg(default_value = "{}")]
    expr: String,
    /// Tenants to query (repeatable)
    #[arg(short, long, required = true)]
    tenant: Vec<String>,
    /// Label names to keep (repeatable)
    #[arg(short, long)]
    label: Vec<String>,
    /// Range start: RFC 3339, Unix ms or "now"
    #[arg(long)]
    from: Option<String>,
    /// Range end: RFC 3339, Unix ms or "now"
    #[arg(long)]
    to: Option<String>,
    /// Range length when --from is not given (e.g. 1h, 7d)
    #[arg(long, default_value = "1h")]
    last: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the index tables
    Init,

    /// Insert blocks from a JSON file (one block or an array)
    Insert {
        path: PathBuf,
        /// Skip blocks that already exist instead of failing
        #[arg(long)]
        ignore_existing: bool,
    },

    /// Look up blocks by ID
    Find {
        #[arg(short, long, default_value = "")]
        tenant: String,
        #[arg(short, long, default_value = "0")]
        shard: u32,
        ids: Vec<String>,
    },

    /// Blocks with datasets matching a selector
    Query(QueryArgs),

    /// Label sets of datasets matching a selector
    Labels(QueryArgs),

    /// Time span of a tenant's data
    Stats { tenant: String },

    /// List partitions and their tenants
    Partitions,

    /// Delete data past its retention period
    Truncate,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(db) = &cli.db {
        config.storage.db_path = db.to_string_lossy().to_string();
    }
    init_tracing(&config);
    config.validate()?;

    if let Commands::Config { output } = &cli.command {
        let content = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, content)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("Wrote default config to {}", path.display());
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    let mut conn = open_database(&PathBuf::from(&config.storage.db_path))?;
    let index = Index::new(SqliteStore::new(), config.to_index_config()?);
    index.init(&conn)?;
    index.restore(&conn)?;

    match cli.command {
        Commands::Init => {
            println!("Initialized index at {}", config.storage.db_path);
        }

        Commands::Insert {
            path,
            ignore_existing,
        } => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let blocks: Vec<BlockMeta> = match serde_json::from_str(&content) {
                Ok(blocks) => blocks,
                Err(_) => vec![serde_json::from_str(&content)
                    .with_context(|| format!("parsing {}", path.display()))?],
            };

            let ids = BlockIdGenerator::new();
            let tx = conn.transaction()?;
            let mut inserted = 0;
            for mut block in blocks {
                if block.id.is_empty() {
                    block.id = ids.generate()?;
                }
                let id = block.id.clone();
                match index.insert_block(&tx, block) {
                    Ok(()) => inserted += 1,
                    Err(metaindex::index::IndexError::BlockExists) if ignore_existing => {
                        tracing::warn!(block = %id, "Skipping existing block");
                    }
                    Err(e) => return Err(e).with_context(|| format!("inserting block {}", id)),
                }
            }
            tx.commit()?;
            println!("Inserted {} blocks", inserted);
        }

        Commands::Find { tenant, shard, ids } => {
            let blocks = index.find_blocks(&conn, &BlockList::new(tenant, shard, ids))?;
            print_blocks(&cli.format, &blocks)?;
        }

        Commands::Query(args) => {
            let query = build_query(&args)?;
            let blocks = index.query_metadata(&conn, &query)?;
            print_blocks(&cli.format, &blocks)?;
        }

        Commands::Labels(args) => {
            let query = build_query(&args)?;
            let labels = index.query_metadata_labels(&conn, &query)?;
            if cli.format == "json" {
                print_json(&labels)?;
            } else {
                for set in labels {
                    let pairs: Vec<String> = set
                        .labels
                        .iter()
                        .map(|p| format!("{}={:?}", p.name, p.value))
                        .collect();
                    println!("{{{}}}", pairs.join(", "));
                }
            }
        }

        Commands::Stats { tenant } => {
            let stats = index.get_tenant_stats(&tenant)?;
            if cli.format == "json" {
                print_json(&stats)?;
            } else if !stats.data_ingested {
                println!("No data for tenant {:?}", tenant);
            } else {
                println!("Tenant:  {}", tenant);
                println!("Oldest:  {}", format_time(stats.oldest_profile_time));
                println!("Newest:  {}", format_time(stats.newest_profile_time));
            }
        }

        Commands::Partitions => {
            let partitions = index.partitions()?;
            if cli.format == "json" {
                #[derive(Serialize)]
                struct Row<'a> {
                    key: &'a str,
                    start_time: i64,
                    end_time: i64,
                    tenants: &'a [String],
                }
                let rows: Vec<Row> = partitions
                    .iter()
                    .map(|p| Row {
                        key: p.key().as_str(),
                        start_time: p.start_time(),
                        end_time: p.end_time(),
                        tenants: p.tenants(),
                    })
                    .collect();
                print_json(&rows)?;
            } else {
                println!("{:<20} {:<22} {}", "Partition", "Start", "Tenants");
                println!("{}", "-".repeat(60));
                for p in partitions {
                    let tenants: Vec<&str> = p
                        .tenants()
                        .iter()
                        .map(|t| if t.is_empty() { "<anonymous>" } else { t.as_str() })
                        .collect();
                    println!(
                        "{:<20} {:<22} {}",
                        p.key(),
                        format_time(p.start_time()),
                        tenants.join(", ")
                    );
                }
            }
        }

        Commands::Truncate => {
            let mut policy = config.retention_policy(Utc::now().timestamp_millis())?;
            let tx = conn.transaction()?;
            let tombstones = index.truncate_index(&tx, &mut policy)?;
            tx.commit()?;
            for t in &tombstones {
                println!("Deleted {} / {:?}", t.partition, t.tenant);
            }
            println!("Applied {} tombstones", tombstones.len());
        }

        Commands::Config { .. } => {}
    }

    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("metaindex={}", config.logging.level).into());
    let json = config.logging.format == "json";

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

fn parse_time(s: &str) -> anyhow::Result<i64> {
    if s == "now" {
        return Ok(Utc::now().timestamp_millis());
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    match s.parse::<i64>() {
        Ok(ms) => Ok(ms),
        Err(_) => bail!("Invalid timestamp format: {}", s),
    }
}

fn build_query(args: &QueryArgs) -> anyhow::Result<MetadataQuery> {
    let end = match &args.to {
        Some(s) => parse_time(s)?,
        None => Utc::now().timestamp_millis(),
    };
    let start = match &args.from {
        Some(s) => parse_time(s)?,
        None => end - parse_duration(&args.last)?.as_millis() as i64,
    };
    if start > end {
        bail!("Range start is after its end");
    }

    let mut query = MetadataQuery::new(args.expr.clone(), start, end);
    for tenant in &args.tenant {
        query = query.tenant(tenant.clone());
    }
    for label in &args.label {
        query = query.label(label.clone());
    }
    Ok(query)
}

fn format_time(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_blocks(format: &str, blocks: &[BlockMeta]) -> anyhow::Result<()> {
    if format == "json" {
        return print_json(blocks);
    }
    if blocks.is_empty() {
        println!("No blocks found.");
        return Ok(());
    }
    println!(
        "{:<28} {:<12} {:>5} {:<22} {:>8}",
        "ID", "Tenant", "Shard", "Min time", "Datasets"
    );
    println!("{}", "-".repeat(80));
    for b in blocks {
        println!(
            "{:<28} {:<12} {:>5} {:<22} {:>8}",
            b.id,
            b.tenant_name(),
            b.shard,
            format_time(b.min_time),
            b.datasets.len()
        );
    }
    Ok(())
}
