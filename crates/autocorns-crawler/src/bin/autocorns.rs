//! autocorns: Crypto Unicorns crawlers and leaderboard tools
//!
//! Results go to stdout as NDJSON, error records to stderr (or `--errors`),
//! and logs to stderr. Set `RUST_LOG` to change log levels.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::Address;
use alloy_provider::{Provider, ProviderBuilder};
use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use autocorns_core::merge::merge;
use autocorns_core::rarity::{apply_rarity_multipliers, multipliers_from_records};
use autocorns_core::score::score_events;
use autocorns_core::{
    ndjson, CheckpointRecord, CheckpointStore, EventLog, FetchOutcome, LeaderboardRow,
    MergeRules, MergedRecord, Payload, RecordKind, ScoringRules, WorkItem,
};
use autocorns_crawler::kinds::{Dna, DnaReport, Metadata, MythicBodyParts, Shadowcorn};
use autocorns_crawler::{run_stage, CrawlerConfig, FetchKind, FetchMode, FetchPipeline, RpcCaller, StageIo};
use autocorns_moonstream::{
    event_params, session_params, LeaderboardClient, MoonstreamConfig, QueryClient,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Network {
    Polygon,
    Mumbai,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Multicall,
    Pool,
}

impl From<Mode> for FetchMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Multicall => FetchMode::Multicall,
            Mode::Pool => FetchMode::Pool,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Collection {
    Unicorns,
    Shadowcorns,
}

/// Dark Forest choices query, only published for Mumbai
const CHOICES_QUERY: &str = "garden_of_forking_path_choices";

#[derive(Parser, Debug)]
#[command(name = "autocorns")]
#[command(about = "Crypto Unicorns data crawlers and leaderboard tools", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Chain access and crawl tuning, layered over the network preset or `--config`
#[derive(Args, Debug, Clone)]
struct ChainArgs {
    /// JSON-RPC endpoint
    #[arg(long, env = "AUTOCORNS_RPC_URL")]
    rpc_url: Option<String>,

    #[arg(long, value_enum, default_value = "polygon")]
    network: Network,

    /// Crawler config JSON; replaces the network preset
    #[arg(long)]
    config: Option<PathBuf>,

    /// Crypto Unicorns contract address
    #[arg(long)]
    unicorns: Option<Address>,

    /// Shadowcorns contract address
    #[arg(long)]
    shadowcorns: Option<Address>,

    /// Multicall2 contract address
    #[arg(long)]
    multicall: Option<Address>,

    /// Block to read at (default: chain head)
    #[arg(long)]
    block_number: Option<u64>,

    #[arg(long)]
    chunk_size: Option<usize>,

    /// Concurrent calls in pool mode
    #[arg(short = 'j', long)]
    num_workers: Option<usize>,

    /// Seconds to wait for a pool-mode batch
    #[arg(short = 't', long)]
    timeout: Option<u64>,

    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Attempts per call or chunk, 0 for no limit
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Fraction of fresh checkpoint records to refetch anyway
    #[arg(long)]
    leak_rate: Option<f64>,

    #[arg(long)]
    leak_seed: Option<u64>,

    /// Hide progress bars
    #[arg(long)]
    no_progress: bool,
}

impl ChainArgs {
    fn crawler_config(&self) -> anyhow::Result<CrawlerConfig> {
        let mut config = match (&self.config, self.network) {
            (Some(path), _) => CrawlerConfig::load(path)
                .with_context(|| format!("loading crawler config {}", path.display()))?,
            (None, Network::Polygon) => CrawlerConfig::polygon(),
            (None, Network::Mumbai) => CrawlerConfig::mumbai(),
        };

        if let Some(url) = &self.rpc_url {
            config.rpc_url = url.clone();
        }
        if self.unicorns.is_some() {
            config.unicorns = self.unicorns;
        }
        if self.shadowcorns.is_some() {
            config.shadowcorns = self.shadowcorns;
        }
        if let Some(address) = self.multicall {
            config.multicall = address;
        }
        if self.block_number.is_some() {
            config.block_number = self.block_number;
        }
        if let Some(size) = self.chunk_size {
            config.chunk_size = size;
        }
        if let Some(workers) = self.num_workers {
            config.num_workers = workers;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(mode) = self.mode {
            config.fetch_mode = mode.into();
        }
        if let Some(attempts) = self.max_attempts {
            config.retry.max_attempts = attempts;
        }
        if let Some(rate) = self.leak_rate {
            config.leak_rate = rate;
        }
        if self.leak_seed.is_some() {
            config.leak_seed = self.leak_seed;
        }

        config.validate()?;
        Ok(config)
    }

    fn pipeline(&self) -> anyhow::Result<FetchPipeline<RpcCaller<impl Provider>>> {
        let config = self.crawler_config()?;
        let provider = ProviderBuilder::new().connect_http(config.rpc_url.parse()?);
        info!(rpc = %config.rpc_url, mode = ?config.fetch_mode, "Connected to RPC");
        Ok(FetchPipeline::new(RpcCaller::new(provider), config)?.with_progress(!self.no_progress))
    }
}

#[derive(Args, Debug, Clone)]
struct RangeArgs {
    /// First token ID
    #[arg(long)]
    start: u64,

    /// Last token ID, inclusive (default: --start)
    #[arg(long)]
    end: Option<u64>,
}

impl RangeArgs {
    fn items(&self) -> anyhow::Result<Vec<WorkItem>> {
        Ok(WorkItem::range(self.start, self.end.unwrap_or(self.start))?)
    }
}

#[derive(Args, Debug, Clone)]
struct CheckpointArgs {
    /// NDJSON checkpoint of earlier results
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Rewrite the checkpoint with this run's results
    #[arg(short = 'u', long)]
    update_checkpoint: bool,
}

#[derive(Args, Debug, Clone)]
struct OutputArgs {
    /// Write error records here instead of stderr
    #[arg(long)]
    errors: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct MoonstreamArgs {
    /// Moonstream access token
    #[arg(long, env = "MOONSTREAM_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Moonstream config JSON
    #[arg(long)]
    moonstream_config: Option<PathBuf>,

    /// Query API URL
    #[arg(long)]
    api: Option<String>,

    /// Engine API URL
    #[arg(long)]
    engine_api: Option<String>,

    /// Seconds between result polls
    #[arg(long)]
    interval: Option<f64>,

    /// Result polls before giving up, 0 for no limit
    #[arg(long)]
    max_retries: Option<u32>,

    /// Update requests to send before giving up
    #[arg(long)]
    update_attempts: Option<u32>,
}

impl MoonstreamArgs {
    fn config(&self, default_interval: f64, default_max_retries: u32) -> anyhow::Result<MoonstreamConfig> {
        let mut config = match &self.moonstream_config {
            Some(path) => MoonstreamConfig::load(path)?,
            None => MoonstreamConfig {
                interval_secs: default_interval,
                max_retries: default_max_retries,
                ..MoonstreamConfig::default()
            },
        };
        if let Some(token) = &self.access_token {
            config.access_token = token.clone();
        }
        if let Some(api) = &self.api {
            config.api_url = api.clone();
        }
        if let Some(engine) = &self.engine_api {
            config.engine_api_url = engine.clone();
        }
        if let Some(interval) = self.interval {
            config.interval_secs = interval;
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(update_attempts) = self.update_attempts {
            config.update_attempts = update_attempts;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl unicorn DNA
    Dnas {
        #[command(flatten)]
        range: RangeArgs,
        #[command(flatten)]
        checkpoint: CheckpointArgs,
        #[command(flatten)]
        chain: ChainArgs,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Crawl unicorn lifecycle stage and class
    Metadata {
        #[command(flatten)]
        range: RangeArgs,
        #[command(flatten)]
        checkpoint: CheckpointArgs,
        #[command(flatten)]
        chain: ChainArgs,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Count mythic body parts for DNA records from `dnas`
    MythicBodyParts {
        /// Output of the `dnas` command
        #[arg(long)]
        dnas: PathBuf,
        #[command(flatten)]
        checkpoint: CheckpointArgs,
        #[command(flatten)]
        chain: ChainArgs,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Crawl DNA migration reports, or verify an earlier report file
    DnaReport {
        #[arg(long, required_unless_present = "from")]
        start: Option<u64>,
        #[arg(long)]
        end: Option<u64>,
        /// Earlier `dna-report` output to verify against
        #[arg(long, conflicts_with = "start")]
        from: Option<PathBuf>,
        #[command(flatten)]
        chain: ChainArgs,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Join metadata with mythic body-part counts
    Merge {
        #[arg(long)]
        metadata: PathBuf,
        #[arg(long)]
        mythic_body_parts: PathBuf,
        /// Merge rules JSON (hidden classes)
        #[arg(long)]
        rules: Option<PathBuf>,
    },

    /// Score breeding and hatching events into a leaderboard
    Sob {
        /// Output of the `merge` command
        #[arg(long)]
        merged: PathBuf,
        /// Event query results (`moonstream-events` output)
        #[arg(long)]
        events: PathBuf,
        /// Scoring rules JSON
        #[arg(long)]
        rules: Option<PathBuf>,
        #[arg(short, long)]
        outfile: Option<PathBuf>,
    },

    /// Run a Moonstream query for game events and save the results
    MoonstreamEvents {
        #[arg(short = 'n', long)]
        query_name: String,
        /// Starting unix timestamp
        #[arg(long)]
        start: i64,
        /// Ending unix timestamp (default: now)
        #[arg(long)]
        end: Option<i64>,
        #[arg(short, long)]
        outfile: Option<PathBuf>,
        #[command(flatten)]
        moonstream: MoonstreamArgs,
    },

    /// Print the number of minted tokens in a collection
    TotalSupply {
        #[arg(long, value_enum, default_value = "unicorns")]
        collection: Collection,
        #[command(flatten)]
        chain: ChainArgs,
    },

    /// Fetch the player choices made in one Dark Forest session
    ChoicesForSession {
        /// Dark Forest contract address
        #[arg(short = 'a', long)]
        address: Address,
        #[arg(long)]
        session_id: u64,
        #[arg(long, value_enum, default_value = "mumbai")]
        network: Network,
        #[arg(short, long)]
        outfile: Option<PathBuf>,
        #[command(flatten)]
        moonstream: MoonstreamArgs,
    },

    /// Shadowcorn utilities
    Shadowcorns {
        #[command(subcommand)]
        command: ShadowcornsCommand,
    },

    /// Build and push the Throwing Shade leaderboard with rarity multipliers
    ThrowingShade {
        #[arg(long, default_value = "Shadowcorns_Throwing_Shade_Leaderboard")]
        query_name: String,
        #[arg(long)]
        leaderboard_id: Uuid,
        /// Shadowcorn metadata checkpoint (`shadowcorns crawl` output); updated in place
        #[arg(long)]
        metadata: PathBuf,
        /// Scoring rules JSON (rarity multipliers)
        #[arg(long)]
        rules: Option<PathBuf>,
        /// Print the leaderboard instead of pushing it
        #[arg(long)]
        dry_run: bool,
        #[command(flatten)]
        moonstream: MoonstreamArgs,
        #[command(flatten)]
        chain: ChainArgs,
    },
}

#[derive(Subcommand, Debug)]
enum ShadowcornsCommand {
    /// Crawl metadata for every minted Shadowcorn
    Crawl {
        #[command(flatten)]
        checkpoint: CheckpointArgs,
        #[command(flatten)]
        chain: ChainArgs,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Print one Shadowcorn's metadata
    Metadata {
        #[arg(short = 'i', long)]
        token_id: u64,
        #[command(flatten)]
        chain: ChainArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("autocorns=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Dnas {
            range,
            checkpoint,
            chain,
            output,
        } => crawl::<Dna>(&chain, &checkpoint, &output, range.items()?).await,
        Command::Metadata {
            range,
            checkpoint,
            chain,
            output,
        } => crawl::<Metadata>(&chain, &checkpoint, &output, range.items()?).await,
        Command::MythicBodyParts {
            dnas,
            checkpoint,
            chain,
            output,
        } => {
            let items = items_from_file(&dnas, RecordKind::Dna)?;
            crawl::<MythicBodyParts>(&chain, &checkpoint, &output, items).await
        }
        Command::DnaReport {
            start,
            end,
            from,
            chain,
            output,
        } => {
            let items = match (from, start) {
                (Some(path), _) => items_from_file(&path, RecordKind::DnaReport)?,
                (None, Some(start)) => WorkItem::range(start, end.unwrap_or(start))?,
                (None, None) => anyhow::bail!("either --start or --from is required"),
            };
            let no_checkpoint = CheckpointArgs {
                checkpoint: None,
                update_checkpoint: false,
            };
            crawl::<DnaReport>(&chain, &no_checkpoint, &output, items).await
        }
        Command::Merge {
            metadata,
            mythic_body_parts,
            rules,
        } => handle_merge(&metadata, &mythic_body_parts, rules.as_deref()),
        Command::Sob {
            merged,
            events,
            rules,
            outfile,
        } => handle_sob(&merged, &events, rules.as_deref(), outfile.as_deref()),
        Command::MoonstreamEvents {
            query_name,
            start,
            end,
            outfile,
            moonstream,
        } => handle_moonstream_events(&moonstream, &query_name, start, end, outfile.as_deref()).await,
        Command::TotalSupply { collection, chain } => handle_total_supply(&chain, collection).await,
        Command::ChoicesForSession {
            address,
            session_id,
            network,
            outfile,
            moonstream,
        } => handle_choices_for_session(&moonstream, network, address, session_id, outfile.as_deref()).await,
        Command::Shadowcorns { command } => match command {
            ShadowcornsCommand::Crawl {
                checkpoint,
                chain,
                output,
            } => handle_shadowcorns_crawl(&chain, &checkpoint, &output).await,
            ShadowcornsCommand::Metadata { token_id, chain } => {
                handle_shadowcorn_metadata(&chain, token_id).await
            }
        },
        Command::ThrowingShade {
            query_name,
            leaderboard_id,
            metadata,
            rules,
            dry_run,
            moonstream,
            chain,
        } => {
            handle_throwing_shade(
                &chain,
                &moonstream,
                &query_name,
                leaderboard_id,
                &metadata,
                rules.as_deref(),
                dry_run,
            )
            .await
        }
    }
}

/// Run one checkpointed crawl and write its outputs
async fn crawl<K: FetchKind>(
    chain: &ChainArgs,
    checkpoint: &CheckpointArgs,
    output: &OutputArgs,
    items: Vec<WorkItem>,
) -> anyhow::Result<()> {
    let pipeline = chain.pipeline()?;
    let store = checkpoint.checkpoint.as_ref().map(CheckpointStore::new);
    let errors: Box<dyn Write> = match &output.errors {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(std::io::stderr().lock()),
    };

    let io = StageIo {
        checkpoint: store.as_ref(),
        update_checkpoint: checkpoint.update_checkpoint,
        records: std::io::stdout().lock(),
        errors,
    };
    run_stage::<K, _, _, _>(&pipeline, items, io).await?;
    Ok(())
}

/// Work items derived from an upstream stage's records of `kind`
fn items_from_file(path: &Path, kind: RecordKind) -> anyhow::Result<Vec<WorkItem>> {
    let records: Vec<CheckpointRecord> = ndjson::read_lines(path)?;
    let items: Vec<WorkItem> = records
        .iter()
        .filter(|r| r.kind() == kind)
        .filter_map(WorkItem::from_record)
        .collect();
    info!(path = %path.display(), records = records.len(), items = items.len(), "Loaded work items");
    Ok(items)
}

fn handle_merge(metadata: &Path, mythic_body_parts: &Path, rules: Option<&Path>) -> anyhow::Result<()> {
    let rules = match rules {
        Some(path) => MergeRules::load(path)?,
        None => MergeRules::default(),
    };
    let metadata: Vec<CheckpointRecord> = ndjson::read_lines(metadata)?;
    let mythic_body_parts: Vec<CheckpointRecord> = ndjson::read_lines(mythic_body_parts)?;

    let report = merge(&metadata, &mythic_body_parts, &rules);
    write_stdout(&report.merged)?;
    ndjson::write_lines(std::io::stderr().lock(), &report.errors)?;

    info!(merged = report.merged.len(), missing = report.errors.len(), "Merge finished");
    Ok(())
}

fn handle_sob(
    merged: &Path,
    events: &Path,
    rules: Option<&Path>,
    outfile: Option<&Path>,
) -> anyhow::Result<()> {
    let rules = match rules {
        Some(path) => ScoringRules::load(path)?,
        None => ScoringRules::default(),
    };
    let merged: Vec<MergedRecord> = ndjson::read_lines(merged)?;
    let events = EventLog::load(events)?;

    let scores = score_events(&events.data, &merged, &rules);
    info!(rules = %rules.version, players = scores.len(), events = events.data.len(), "Scored events");
    write_json(outfile, &scores)
}

async fn handle_moonstream_events(
    moonstream: &MoonstreamArgs,
    query_name: &str,
    start: i64,
    end: Option<i64>,
    outfile: Option<&Path>,
) -> anyhow::Result<()> {
    let config = moonstream.config(2.0, 0)?;
    let client = QueryClient::new(&config)?;
    let end = match end {
        Some(end) => end,
        None => SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64,
    };

    let results = client.update_and_fetch(query_name, event_params(start, end)).await?;
    write_json(outfile, &results)
}

async fn handle_total_supply(chain: &ChainArgs, collection: Collection) -> anyhow::Result<()> {
    let pipeline = chain.pipeline()?;
    let contract = match collection {
        Collection::Unicorns => pipeline.config().unicorns_address()?,
        Collection::Shadowcorns => pipeline.config().shadowcorns_address()?,
    };
    let block = pipeline.block_number().await?;
    let supply = pipeline.total_supply(contract, block).await?;
    info!(?collection, %contract, block, supply, "Total supply");
    write_json(None, &supply)
}

async fn handle_choices_for_session(
    moonstream: &MoonstreamArgs,
    network: Network,
    address: Address,
    session_id: u64,
    outfile: Option<&Path>,
) -> anyhow::Result<()> {
    let query_name = match network {
        Network::Mumbai => CHOICES_QUERY,
        Network::Polygon => anyhow::bail!("no choices query is published for {:?}", network),
    };

    let mut config = moonstream.config(2.0, 0)?;
    if moonstream.update_attempts.is_none() {
        config.update_attempts = config.max_retries.max(1);
    }
    let client = QueryClient::new(&config)?;

    let params = session_params(&address.to_string(), &session_id.to_string());
    let results = client.update_and_fetch(query_name, params).await?;
    write_json(outfile, &results)
}

async fn handle_shadowcorns_crawl(
    chain: &ChainArgs,
    checkpoint: &CheckpointArgs,
    output: &OutputArgs,
) -> anyhow::Result<()> {
    let pipeline = chain.pipeline()?;
    let block = pipeline.block_number().await?;
    let supply = pipeline
        .total_supply(pipeline.config().shadowcorns_address()?, block)
        .await?;
    info!(supply, block, "Shadowcorn supply");

    let items = if supply == 0 {
        Vec::new()
    } else {
        WorkItem::range(1, supply)?
    };

    let mut chain = chain.clone();
    chain.block_number = Some(block);
    crawl::<Shadowcorn>(&chain, checkpoint, output, items).await
}

async fn handle_shadowcorn_metadata(chain: &ChainArgs, token_id: u64) -> anyhow::Result<()> {
    let pipeline = chain.pipeline()?;
    let block = pipeline.block_number().await?;
    let outcomes = pipeline
        .fetch::<Shadowcorn>(&[WorkItem::new(token_id)], block)
        .await?;

    match outcomes.into_iter().next() {
        Some(FetchOutcome::Success(CheckpointRecord {
            payload: Payload::Shadowcorn { metadata, .. },
            ..
        })) => write_json(None, &metadata),
        Some(FetchOutcome::Failure(error)) => anyhow::bail!(error.error),
        _ => anyhow::bail!("no metadata returned for Shadowcorn {}", token_id),
    }
}

async fn handle_throwing_shade(
    chain: &ChainArgs,
    moonstream: &MoonstreamArgs,
    query_name: &str,
    leaderboard_id: Uuid,
    metadata: &Path,
    rules: Option<&Path>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let moonstream_config = moonstream.config(30.0, 100)?;
    let rules = match rules {
        Some(path) => ScoringRules::load(path)?,
        None => ScoringRules::default(),
    };

    let query = QueryClient::new(&moonstream_config)?;
    let results = query.update_and_fetch(query_name, json!({})).await?;
    let mut rows: Vec<LeaderboardRow> =
        serde_json::from_value(results.get("data").cloned().unwrap_or_else(|| Value::Array(Vec::new())))?;
    info!(rows = rows.len(), query = query_name, "Leaderboard rows retrieved");

    let pipeline = chain.pipeline()?;
    let block = pipeline.block_number().await?;
    let supply = pipeline
        .total_supply(pipeline.config().shadowcorns_address()?, block)
        .await?;
    let items = if supply == 0 {
        Vec::new()
    } else {
        WorkItem::range(1, supply)?
    };

    let store = CheckpointStore::new(metadata);
    let existing = store.load()?.records;
    let report = pipeline.run::<Shadowcorn>(items, existing).await?;
    store.save(&report.records)?;
    if !report.errors.is_empty() {
        warn!(count = report.errors.len(), "Some Shadowcorn metadata could not be fetched");
        ndjson::write_lines(std::io::stderr().lock(), &report.errors)?;
    }

    let multipliers = multipliers_from_records(&report.records, &rules.rarity_multipliers);
    let missing = apply_rarity_multipliers(&mut rows, &multipliers)?;
    if !missing.is_empty() {
        warn!(count = missing.len(), "Rows without a rarity multiplier kept multiplier 1.0");
    }

    if dry_run {
        return write_json(None, &rows);
    }

    let leaderboard = LeaderboardClient::new(&moonstream_config)?;
    leaderboard.push_scores(leaderboard_id, &rows).await?;
    Ok(())
}

fn write_stdout<T: serde::Serialize>(items: &[T]) -> anyhow::Result<()> {
    ndjson::write_lines(std::io::stdout().lock(), items)?;
    Ok(())
}

fn write_json<T: serde::Serialize>(outfile: Option<&Path>, value: &T) -> anyhow::Result<()> {
    match outfile {
        Some(path) => {
            let mut writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer(&mut writer, value)?;
            writer.flush()?;
            info!(path = %path.display(), "Wrote output");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            serde_json::to_writer(&mut stdout, value)?;
            writeln!(stdout)?;
        }
    }
    Ok(())
}
