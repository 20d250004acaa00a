use clap::{Parser, Subcommand};
use staking_indexer::{
    server::{
        self, create_dir_if_non_existent, handle_command_line_arguments, AuditArgs,
        ReconcileArgs, SummaryArgs,
    },
    staking::store::StakingStore,
    store::IndexerStore,
};
use std::sync::Arc;
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "staking-indexer", author, version, about, long_about = Some("Staking Indexer\n\n\
Incrementally aggregate delegator and collator stake from parachain staking events"))]
struct Cli {
    #[command(subcommand)]
    command: IndexerCommand,
}

#[derive(Subcommand, Debug)]
enum IndexerCommand {
    /// Index staking events from a blocks directory
    Server(server::ServerArgs),
    /// Merge a chain staking-state dump into the store
    Reconcile(ReconcileArgs),
    /// Compare a chain staking-state dump with the store
    Audit(AuditArgs),
    /// Print the global stake totals as JSON
    Summary(SummaryArgs),
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    match Cli::parse().command {
        IndexerCommand::Server(args) => {
            let config = handle_command_line_arguments(args).await?;

            // setup tracing
            if let Some(parent) = config.log_file.parent() {
                create_dir_if_non_existent(parent).await?;
            }

            let log_file = std::fs::File::create(&config.log_file)?;
            let file_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(log_file);

            let stdout_layer = tracing_subscriber::fmt::layer();
            tracing_subscriber::registry()
                .with(stdout_layer.with_filter(config.log_level_stdout))
                .with(file_layer.with_filter(config.log_level))
                .init();

            let db = Arc::new(IndexerStore::new(&config.database_dir)?);
            server::run(config, db).await?;
            Ok(())
        }
        IndexerCommand::Reconcile(args) => {
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_filter(args.log_level_stdout))
                .init();

            let summary = server::reconcile_snapshot(&args).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        IndexerCommand::Audit(args) => {
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_filter(args.log_level_stdout))
                .init();

            let report = server::audit_snapshot(&args).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_clean() {
                std::process::exit(1);
            }
            Ok(())
        }
        IndexerCommand::Summary(args) => {
            let store = match &args.secondary_dir {
                Some(secondary) => IndexerStore::new_read_only(&args.database_dir, secondary)?,
                None => IndexerStore::new(&args.database_dir)?,
            };

            match store.get_total_stake()? {
                Some(total) => println!("{}", serde_json::to_string_pretty(&total)?),
                None => println!("null"),
            }
            Ok(())
        }
    }
}
