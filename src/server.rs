use crate::{
    event::EventCanonicalizer,
    ledger::{AddressEncoder, Amount},
    pipeline::{
        resilience::{ResilienceConfig, ResilienceController},
        Pipeline, PipelineConfig, PipelineSummary,
    },
    receiver::filesystem::FilesystemBlockSource,
    snapshot::{
        audit::{audit, AuditReport},
        fetch_snapshot,
        json::JsonSnapshotSource,
        reconcile::{reconcile, ReconcileSummary},
        retry::FetchPolicies,
        SnapshotAnchor,
    },
    staking::{context::IndexerContext, initialize_total_supply},
    store::IndexerStore,
};
use clap::Args;
use std::{
    convert::Infallible,
    path::{Path, PathBuf},
    process,
    sync::Arc,
    time::Duration,
};
use tokio::fs::{create_dir_all, metadata};
use tracing::{debug, info, instrument};
use tracing_subscriber::filter::LevelFilter;

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Path to directory of `<height>-<hash>.json` block files
    #[arg(short, long, default_value = concat!(env!("HOME"), "/.staking-indexer/blocks"))]
    pub blocks_dir: PathBuf,
    /// Path to directory for rocksdb
    #[arg(short, long, default_value = concat!(env!("HOME"), "/.staking-indexer/database"))]
    pub database_dir: PathBuf,
    /// Path to directory for logs
    #[arg(short, long, default_value = concat!(env!("HOME"), "/.staking-indexer/logs"))]
    pub log_dir: PathBuf,
    /// Max file log level
    #[arg(long, default_value_t = LevelFilter::DEBUG)]
    pub log_level: LevelFilter,
    /// Max stdout log level
    #[arg(long, default_value_t = LevelFilter::INFO)]
    pub log_level_stdout: LevelFilter,
    /// SS58 network prefix used to encode 32-byte accounts
    #[arg(long, env = "SS58_PREFIX", default_value_t = 1284)]
    pub ss58_prefix: u16,
    /// Total token supply, used when the store has none
    #[arg(long, env = "TOTAL_SUPPLY", default_value = "0")]
    pub total_supply: Amount,
    /// First block to index when the store has no cursor
    #[arg(long, env = "START_BLOCK", default_value_t = 0)]
    pub start_block: u32,
    /// Last block to index
    #[arg(long, env = "END_BLOCK")]
    pub end_block: Option<u32>,
    /// Keep polling the blocks directory for new blocks
    #[arg(long, default_value_t = false)]
    pub follow: bool,
    /// Seconds between polls when following
    #[arg(long, default_value_t = 6)]
    pub poll_interval: u64,
    /// Chain staking-state dump used for the head reconciliation
    #[arg(long)]
    pub chain_snapshot: Option<PathBuf>,
    /// YAML file overriding the data source fallback settings
    #[arg(long)]
    pub resilience_config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ReconcileArgs {
    /// Chain staking-state dump to merge into the store
    #[arg(short, long)]
    pub snapshot: PathBuf,
    /// Block the dump must be anchored at; defaults to its head
    #[arg(long)]
    pub block: Option<u32>,
    /// Path to directory for rocksdb
    #[arg(short, long, default_value = concat!(env!("HOME"), "/.staking-indexer/database"))]
    pub database_dir: PathBuf,
    /// SS58 network prefix used to encode 32-byte accounts
    #[arg(long, env = "SS58_PREFIX", default_value_t = 1284)]
    pub ss58_prefix: u16,
    /// Total token supply, used when neither the store nor the dump has one
    #[arg(long, env = "TOTAL_SUPPLY", default_value = "0")]
    pub total_supply: Amount,
    /// Max stdout log level
    #[arg(long, default_value_t = LevelFilter::INFO)]
    pub log_level_stdout: LevelFilter,
}

#[derive(Args, Debug, Clone)]
pub struct AuditArgs {
    /// Chain staking-state dump to compare the store against
    #[arg(short, long)]
    pub snapshot: PathBuf,
    /// Block the dump must be anchored at; defaults to its head
    #[arg(long)]
    pub block: Option<u32>,
    /// Path to directory for rocksdb
    #[arg(short, long, default_value = concat!(env!("HOME"), "/.staking-indexer/database"))]
    pub database_dir: PathBuf,
    /// Open the database as a read-only secondary at this path, so a running
    /// server keeps its lock
    #[arg(long)]
    pub secondary_dir: Option<PathBuf>,
    /// SS58 network prefix used to encode 32-byte accounts
    #[arg(long, env = "SS58_PREFIX", default_value_t = 1284)]
    pub ss58_prefix: u16,
    /// Max stdout log level
    #[arg(long, default_value_t = LevelFilter::INFO)]
    pub log_level_stdout: LevelFilter,
}

#[derive(Args, Debug, Clone)]
pub struct SummaryArgs {
    /// Path to directory for rocksdb
    #[arg(short, long, default_value = concat!(env!("HOME"), "/.staking-indexer/database"))]
    pub database_dir: PathBuf,
    /// Open the database as a read-only secondary at this path, so a running
    /// server keeps its lock
    #[arg(long)]
    pub secondary_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct IndexerConfiguration {
    pub blocks_dir: PathBuf,
    pub database_dir: PathBuf,
    pub log_file: PathBuf,
    pub log_level: LevelFilter,
    pub log_level_stdout: LevelFilter,
    pub encoder: AddressEncoder,
    pub total_supply: Amount,
    pub chain_snapshot: Option<PathBuf>,
    pub pipeline: PipelineConfig,
    pub resilience: ResilienceConfig,
}

#[instrument]
pub async fn handle_command_line_arguments(
    args: ServerArgs,
) -> anyhow::Result<IndexerConfiguration> {
    debug!("Parsing server args");
    if let Some(end_block) = args.end_block {
        if end_block < args.start_block {
            anyhow::bail!(
                "end block {end_block} is below start block {}",
                args.start_block
            );
        }
    }

    let encoder = AddressEncoder::new(args.ss58_prefix)?;
    let resilience = match &args.resilience_config {
        Some(path) => {
            info!("Reading resilience config from {}", path.display());
            ResilienceConfig::from_yaml_file(path)?
        }
        None => ResilienceConfig::default(),
    };

    create_dir_if_non_existent(&args.blocks_dir).await?;
    create_dir_if_non_existent(&args.log_dir).await?;

    let mut log_number = 0;
    let mut log_file = args.log_dir.join("staking-indexer-0.log");
    while metadata(&log_file).await.is_ok() {
        log_number += 1;
        log_file = args
            .log_dir
            .join(format!("staking-indexer-{log_number}.log"));
    }

    Ok(IndexerConfiguration {
        blocks_dir: args.blocks_dir,
        database_dir: args.database_dir,
        log_file,
        log_level: args.log_level,
        log_level_stdout: args.log_level_stdout,
        encoder,
        total_supply: args.total_supply,
        chain_snapshot: args.chain_snapshot,
        pipeline: PipelineConfig {
            start_block: args.start_block,
            end_block: args.end_block,
            follow: args.follow,
            poll_interval: Duration::from_secs(args.poll_interval),
            fetch_policies: FetchPolicies::default(),
        },
        resilience,
    })
}

/// Index blocks until the source is exhausted, the end block is reached, or
/// the process is signalled
pub async fn run(
    config: IndexerConfiguration,
    store: Arc<IndexerStore>,
) -> anyhow::Result<PipelineSummary> {
    let total_supply = initialize_total_supply(
        store.as_ref(),
        &config.total_supply,
        config.pipeline.start_block,
    )?;
    if total_supply.is_zero() {
        info!("Total supply unknown, percentages stay at zero until reconciliation");
    }

    let source = FilesystemBlockSource::new(&config.blocks_dir)?;
    let mut pipeline = Pipeline::new(
        store,
        source,
        EventCanonicalizer::new(config.encoder),
        IndexerContext::new(total_supply),
        ResilienceController::new(config.resilience.clone()),
        config.pipeline.clone(),
    )?;
    if let Some(path) = &config.chain_snapshot {
        pipeline = pipeline.with_chain(Arc::new(JsonSnapshotSource::from_file(path)?));
    }

    tokio::select! {
        summary = pipeline.run() => {
            let summary = summary?;
            info!(
                "Indexed {} blocks in {} batches: {} actions applied, {} events dropped",
                summary.blocks, summary.batches, summary.applied, summary.rejected
            );
            Ok(summary)
        }
        signal = wait_for_signal() => match signal? {},
    }
}

/// Merge a chain staking-state dump into the store once
pub async fn reconcile_snapshot(args: &ReconcileArgs) -> anyhow::Result<ReconcileSummary> {
    let encoder = AddressEncoder::new(args.ss58_prefix)?;
    let store = IndexerStore::new(&args.database_dir)?;
    let source = JsonSnapshotSource::from_file(&args.snapshot)?;
    let anchor = args
        .block
        .map_or(SnapshotAnchor::Head, SnapshotAnchor::Block);

    let snapshot = fetch_snapshot(&source, anchor, &FetchPolicies::default()).await?;
    reconcile(&store, &encoder, &snapshot, &args.total_supply)
}

/// Compare a chain staking-state dump with the store, read-only
pub async fn audit_snapshot(args: &AuditArgs) -> anyhow::Result<AuditReport> {
    let encoder = AddressEncoder::new(args.ss58_prefix)?;
    let store = match &args.secondary_dir {
        Some(secondary) => IndexerStore::new_read_only(&args.database_dir, secondary)?,
        None => IndexerStore::new(&args.database_dir)?,
    };
    let source = JsonSnapshotSource::from_file(&args.snapshot)?;
    let anchor = args
        .block
        .map_or(SnapshotAnchor::Head, SnapshotAnchor::Block);

    let snapshot = fetch_snapshot(&source, anchor, &FetchPolicies::default()).await?;
    audit(&store, &encoder, &snapshot)
}

/// Exits the process on SIGTERM or SIGINT
async fn wait_for_signal() -> anyhow::Result<Infallible> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    let code = tokio::select! {
        _ = term.recv() => {
            info!("Received SIGTERM");
            100
        },
        _ = int.recv() => {
            info!("Received SIGINT");
            101
        },
    };
    process::exit(code)
}

pub async fn create_dir_if_non_existent(path: &Path) -> anyhow::Result<()> {
    if metadata(path).await.is_err() {
        create_dir_all(path).await?;
    }
    Ok(())
}
