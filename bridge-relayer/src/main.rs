//! The bridge relayer binary.
//!
//! ## Usage
//! ```sh
//! bridge start --root-chain-address 0x… --staking-info-address 0x… --state-sender-address 0x…
//! bridge purge-queue --queue clerk
//! bridge unsafe-reset-all --home ~/.heimdalld
//! ```
use std::sync::Arc;

use bridge_core::queue::Domain;
use bridge_relayer::broker::{Broker, SledQueueBackend};
use bridge_relayer::config::{BridgeConfig, CommonArgs};
use bridge_relayer::context::BridgeContext;
use bridge_relayer::listener::childchain::ChildChainHandler;
use bridge_relayer::listener::heimdall::{HeimdallHandler, HeimdallHeaderSource};
use bridge_relayer::listener::rootchain::RootChainHandler;
use bridge_relayer::listener::{ChainHeaderSource, ChainListener};
use bridge_relayer::processor::checkpoint::CheckpointProcessor;
use bridge_relayer::processor::clerk::ClerkProcessor;
use bridge_relayer::processor::milestone::MilestoneProcessor;
use bridge_relayer::processor::staking::StakingProcessor;
use bridge_relayer::processor::{DomainProcessor, ProcessorService};
use bridge_relayer::store::BridgeStore;
use clap::{Parser, Subcommand};
use log::{error, info};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Bridge relayer CLI
#[derive(Parser, Debug)]
#[command(
    name = "bridge",
    about = "Relays checkpoints, state syncs and staking events between the root, child and consensus chains"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the listeners and processors until interrupted
    Start(BridgeConfig),

    /// Delete the bridge store, dropping all progress and queued messages
    UnsafeResetAll(CommonArgs),

    /// Empty one queue, or all of them
    PurgeQueue {
        #[command(flatten)]
        common: CommonArgs,

        /// Queue to purge, by routing key or full queue name
        #[arg(long)]
        queue: Option<Domain>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Start(config) => start(config).await,
        Command::UnsafeResetAll(common) => {
            let path = common.bridge_db_path();
            if reset_all(&common)? {
                info!("✅ Removed bridge store at {}", path.display());
            } else {
                info!("No bridge store at {}", path.display());
            }
            Ok(())
        }
        Command::PurgeQueue { common, queue } => {
            let removed = purge_queues(&common, queue)?;
            match queue {
                Some(domain) => info!("✅ Purged {removed} messages from {}", domain.queue_name()),
                None => info!("✅ Purged {removed} messages from all queues"),
            }
            Ok(())
        }
    }
}

fn reset_all(common: &CommonArgs) -> anyhow::Result<bool> {
    Ok(BridgeStore::destroy(common.bridge_db_path())?)
}

fn purge_queues(common: &CommonArgs, queue: Option<Domain>) -> anyhow::Result<usize> {
    let store = BridgeStore::open(common.bridge_db_path())?;
    let broker = Broker::new(Arc::new(SledQueueBackend::new(store.db())));
    broker.initialize_queues()?;
    Ok(broker.purge(queue)?)
}

async fn start(config: BridgeConfig) -> anyhow::Result<()> {
    info!("🚀 Starting bridge relayer...");
    let ctx = BridgeContext::connect(config).await?;
    info!("🔑 Relaying as {}", ctx.address());
    ctx.report_consensus_state().await;

    let cancel = CancellationToken::new();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let config = &ctx.config;
    let listeners = [
        ChainListener::new(
            Arc::new(ChainHeaderSource::new("root chain", ctx.root_chain.clone())),
            Arc::new(RootChainHandler::new(ctx.clone())),
            config.syncer_poll_interval,
            cancel.child_token(),
        ),
        ChainListener::new(
            Arc::new(ChainHeaderSource::new("child chain", ctx.child_chain.clone())),
            Arc::new(ChildChainHandler::new(ctx.broker.clone())),
            config.checkpointer_poll_interval,
            cancel.child_token(),
        ),
        ChainListener::new(
            Arc::new(HeimdallHeaderSource::new(ctx.heimdall.clone())),
            Arc::new(HeimdallHandler::new(ctx.clone())),
            config
                .checkpointer_poll_interval
                .min(config.syncer_poll_interval),
            cancel.child_token(),
        ),
    ];
    tasks.extend(listeners.into_iter().map(|listener| tokio::spawn(listener.run())));

    let processors: [Arc<dyn DomainProcessor>; 3] = [
        Arc::new(CheckpointProcessor::new(ctx.clone())),
        Arc::new(ClerkProcessor::new(ctx.clone())),
        Arc::new(StakingProcessor::new(ctx.clone())),
    ];
    for processor in processors {
        let service = ProcessorService::new(processor, ctx.broker.clone(), config.worker_pool_size);
        tasks.push(tokio::spawn(service.run(cancel.child_token())));
    }

    tasks.extend(Arc::new(MilestoneProcessor::new(ctx.clone())).spawn_timers(cancel.child_token()));

    tokio::signal::ctrl_c().await?;
    info!("Received interrupt, shutting down");
    cancel.cancel();

    for task in tasks {
        if let Err(e) = task.await {
            error!("❌ Task failed during shutdown: {e}");
        }
    }
    info!("✅ Bridge relayer stopped");
    Ok(())
}
