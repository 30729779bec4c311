use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use custody_ledger::config::{AttributionStrategy, Config};
use custody_ledger::csv::{write_balances, write_transactions};
use custody_ledger::feed::TonCenterFeed;
use custody_ledger::notify::LogSink;
use custody_ledger::reconcile::{AddressBookAttribution, Attribution, MemoAttribution};
use custody_ledger::shutdown::{Shutdown, Signals};
use custody_ledger::transfer::{self, TransferQueue};
use custody_ledger::wallet::TonAddressValidator;
use custody_ledger::{Ledger, Reconciler, SqliteLedger, TxStatus, Wallet};

#[derive(Debug, Parser)]
#[command(name = "custody-ledger", version, about = "Custodial deposit reconciliation and balance ledger")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "custody.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll the chain feed and credit deposits until interrupted
    Run,
    /// Write account balances to stdout as csv
    Balances,
    /// Write processed transactions to stdout as csv
    Transactions {
        /// confirmed, amount_too_small or unattributed
        #[arg(long)]
        status: Option<TxStatus>,
    },
}

type BoxError = Box<dyn std::error::Error>;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<(), BoxError> {
    match cli.command {
        Command::Run => run(Config::load(&cli.config)?).await,
        Command::Balances => {
            let config = Config::read(&cli.config)?;
            let ledger = SqliteLedger::open(&config.ledger.database_url, 1).await?;
            let balances = ledger.balances().await?;
            ledger.close().await;
            write_balances(std::io::stdout().lock(), balances)?;
            Ok(())
        }
        Command::Transactions { status } => {
            let config = Config::read(&cli.config)?;
            let ledger = SqliteLedger::open(&config.ledger.database_url, 1).await?;
            let transactions = ledger.transactions(status).await?;
            ledger.close().await;
            write_transactions(std::io::stdout().lock(), &transactions)?;
            Ok(())
        }
    }
}

async fn run(config: Config) -> Result<(), BoxError> {
    if config.feed.api_key.is_empty() {
        warn!("no indexer api key configured, requests may be rate limited");
    }

    let ledger = Arc::new(
        SqliteLedger::open(&config.ledger.database_url, config.ledger.max_connections).await?,
    );
    let feed = Arc::new(TonCenterFeed::new(
        config.feed.endpoint.as_str(),
        config.feed.api_key.as_str(),
        config.feed_timeout(),
    )?);
    let attribution: Arc<dyn Attribution> = match config.attribution.strategy {
        AttributionStrategy::Memo => {
            Arc::new(MemoAttribution::new(config.attribution.memo_prefix.as_str()))
        }
        AttributionStrategy::Address => Arc::new(
            config
                .attribution
                .addresses
                .clone()
                .into_iter()
                .collect::<AddressBookAttribution>(),
        ),
    };
    let sink = Arc::new(LogSink);
    let (queue, pending) = TransferQueue::new();

    // handed to the messaging front end
    let wallet = Arc::new(Wallet::new(
        ledger.clone(),
        Arc::new(queue),
        sink.clone(),
        Arc::new(TonAddressValidator::default()),
    ));
    let reconciler = Reconciler::new(feed, ledger.clone(), attribution, sink, config.reconciler()?);

    let mut signals = Signals::new()?;
    let shutdown = Shutdown::new();
    let drain = tokio::spawn(transfer::drain(pending));
    let sweeper = tokio::spawn(sweep_sessions(
        wallet.clone(),
        config.session_ttl(),
        shutdown.subscribe(),
    ));
    let reconcile = {
        let stop = shutdown.subscribe();
        tokio::spawn(async move { reconciler.run(stop).await })
    };

    let signal = signals.recv().await?;
    info!(signal, "shutdown requested");
    shutdown.trigger();

    reconcile.await?;
    sweeper.await?;
    // last sender gone: the drain finishes what is queued and stops
    drop(wallet);
    drain.await?;
    ledger.close().await;

    info!("shutdown complete");
    Ok(())
}

async fn sweep_sessions(wallet: Arc<Wallet>, ttl: Duration, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                wallet.purge_expired(ttl);
            }
        }
    }
}
