//! Command-line and environment configuration.
//!
//! Every option can be given as a flag or through the environment variable named next to
//! it. Durations accept `humantime` syntax such as `5m` or `1010s`.

use std::path::PathBuf;
use std::time::Duration;

use alloy::primitives::Address;
use bridge_core::checkpoint::CheckpointParams;
use clap::Args;

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Node home directory
    #[arg(long, env = "BRIDGE_HOME", default_value = ".heimdalld")]
    pub home: PathBuf,

    /// Bridge store directory (defaults to `{home}/bridge/storage`)
    #[arg(long, env = "BRIDGE_DB")]
    pub bridge_db: Option<PathBuf>,

    /// Child chain id
    #[arg(long, env = "BOR_CHAIN_ID", default_value = "15001")]
    pub bor_chain_id: String,
}

impl CommonArgs {
    /// The bridge store location.
    pub fn bridge_db_path(&self) -> PathBuf {
        self.bridge_db
            .clone()
            .unwrap_or_else(|| self.home.join("bridge").join("storage"))
    }
}

/// Everything `start` needs.
#[derive(Args, Debug, Clone)]
pub struct BridgeConfig {
    /// Store location and chain id
    #[command(flatten)]
    pub common: CommonArgs,

    /// Consensus chain REST server
    #[arg(long, env = "HEIMDALL_REST_SERVER", default_value = "http://0.0.0.0:1317")]
    pub heimdall_rest_url: String,

    /// Tendermint RPC endpoint of the consensus chain
    #[arg(long, env = "TENDERMINT_RPC_URL", default_value = "http://0.0.0.0:26657")]
    pub tendermint_rpc_url: String,

    /// Consensus chain id used in signed transactions
    #[arg(long, env = "HEIMDALL_CHAIN_ID", default_value = "heimdall-15001")]
    pub heimdall_chain_id: String,

    /// Root chain JSON-RPC endpoint
    #[arg(long, env = "ETH_RPC_URL", default_value = "http://localhost:9545")]
    pub root_chain_rpc_url: String,

    /// Child chain JSON-RPC endpoint
    #[arg(long, env = "BOR_RPC_URL", default_value = "http://localhost:8545")]
    pub child_chain_rpc_url: String,

    /// Path to the hex encoded secp256k1 validator key
    #[arg(long, env = "SIGNING_KEY_PATH", default_value = ".signer")]
    pub signing_key_path: String,

    /// Root chain checkpoint contract
    #[arg(long, env = "ROOT_CHAIN_ADDRESS")]
    pub root_chain_address: Address,

    /// Root chain staking info contract
    #[arg(long, env = "STAKING_INFO_ADDRESS")]
    pub staking_info_address: Address,

    /// Root chain state sender contract
    #[arg(long, env = "STATE_SENDER_ADDRESS")]
    pub state_sender_address: Address,

    /// Child chain state receiver contract
    #[arg(
        long,
        env = "STATE_RECEIVER_ADDRESS",
        default_value = "0x0000000000000000000000000000000000001001"
    )]
    pub state_receiver_address: Address,

    /// Header polling interval for the root and child chain listeners
    #[arg(long, env = "CHECKPOINTER_POLL_INTERVAL", default_value = "5m", value_parser = humantime::parse_duration)]
    pub checkpointer_poll_interval: Duration,

    /// Polling interval for the consensus chain listener
    #[arg(long, env = "SYNCER_POLL_INTERVAL", default_value = "1m", value_parser = humantime::parse_duration)]
    pub syncer_poll_interval: Duration,

    /// Interval of the no-ack timer
    #[arg(long, env = "NOACK_POLL_INTERVAL", default_value = "1010s", value_parser = humantime::parse_duration)]
    pub no_ack_poll_interval: Duration,

    /// Time without a checkpoint before a no-ack rotation slot opens
    #[arg(long, env = "NOACK_WAIT_TIME", default_value = "1800s", value_parser = humantime::parse_duration)]
    pub no_ack_wait_time: Duration,

    /// Interval of the milestone proposal poll
    #[arg(long, env = "MILESTONE_POLL_INTERVAL", default_value = "30s", value_parser = humantime::parse_duration)]
    pub milestone_poll_interval: Duration,

    /// Fallback average checkpoint length
    #[arg(long, env = "AVG_CHECKPOINT_LENGTH", default_value_t = 256)]
    pub avg_checkpoint_length: u64,

    /// Fallback maximum checkpoint length
    #[arg(long, env = "MAX_CHECKPOINT_LENGTH", default_value_t = 1024)]
    pub max_checkpoint_length: u64,

    /// Fallback checkpoint buffer time
    #[arg(long, env = "CHECKPOINT_BUFFER_TIME", default_value = "1000s", value_parser = humantime::parse_duration)]
    pub checkpoint_buffer_time: Duration,

    /// Fallback child block interval between header block ids
    #[arg(long, env = "CHILD_BLOCK_INTERVAL", default_value_t = 10_000)]
    pub child_block_interval: u64,

    /// Child chain sprint length
    #[arg(long, env = "SPRINT_LENGTH", default_value_t = 64)]
    pub sprint_length: u64,

    /// Child blocks required on top of a milestone before proposing it
    #[arg(long, env = "MILESTONE_CONFIRMATIONS", default_value_t = 16)]
    pub milestone_confirmations: u64,

    /// Child blocks past the latest milestone before a timeout is raised
    #[arg(long, env = "MILESTONE_BUFFER_LENGTH", default_value_t = 320)]
    pub milestone_buffer_length: u64,

    /// Height the first milestone must start at
    #[arg(long, env = "MILESTONE_GENESIS_HEIGHT", default_value_t = 0)]
    pub milestone_genesis_height: u64,

    /// Root chain confirmations before logs are relayed
    #[arg(long, env = "MAIN_CHAIN_CONFIRMATIONS", default_value_t = 6)]
    pub main_chain_confirmations: u64,

    /// State-sync payload limit up to the override height, in bytes
    #[arg(long, env = "LEGACY_MAX_STATE_SYNC_SIZE", default_value_t = 100_000)]
    pub legacy_max_state_sync_size: usize,

    /// State-sync payload limit after the override height, in bytes
    #[arg(long, env = "MAX_STATE_SYNC_SIZE", default_value_t = 30_000)]
    pub max_state_sync_size: usize,

    /// Consensus chain height from which the smaller state-sync limit applies
    #[arg(long, env = "SPAN_OVERRIDE_HEIGHT", default_value_t = 0)]
    pub span_override_height: u64,

    /// Bound on building and sending one transaction
    #[arg(long, env = "TX_TIMEOUT", default_value = "1m", value_parser = humantime::parse_duration)]
    pub tx_timeout: Duration,

    /// Bound on waiting for a submitted transaction's confirmation
    #[arg(long, env = "COMMIT_TIMEOUT", default_value = "2m", value_parser = humantime::parse_duration)]
    pub commit_timeout: Duration,

    /// Messages handled concurrently per queue
    #[arg(long, env = "WORKER_POOL_SIZE", default_value_t = 16)]
    pub worker_pool_size: usize,
}

impl BridgeConfig {
    /// Checkpoint parameters used when the consensus chain cannot be asked for them.
    pub fn fallback_checkpoint_params(&self) -> CheckpointParams {
        CheckpointParams {
            checkpoint_buffer_time_nanos: u64::try_from(self.checkpoint_buffer_time.as_nanos())
                .unwrap_or(u64::MAX),
            avg_checkpoint_length: self.avg_checkpoint_length,
            max_checkpoint_length: self.max_checkpoint_length,
            child_block_interval: self.child_block_interval,
        }
    }

    /// Size limit for state-sync payloads at consensus-chain `height`.
    pub fn state_sync_size_limit(&self, height: u64) -> usize {
        bridge_core::clerk::state_sync_size_limit(
            height,
            self.span_override_height,
            self.max_state_sync_size,
            self.legacy_max_state_sync_size,
        )
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: BridgeConfig,
    }

    fn parse(extra: &[&str]) -> BridgeConfig {
        let mut args = vec![
            "bridge",
            "--root-chain-address",
            "0x0000000000000000000000000000000000000001",
            "--staking-info-address",
            "0x0000000000000000000000000000000000000002",
            "--state-sender-address",
            "0x0000000000000000000000000000000000000003",
        ];
        args.extend_from_slice(extra);
        TestCli::try_parse_from(args).unwrap().config
    }

    #[test]
    fn we_can_parse_defaults() {
        let config = parse(&[]);
        assert_eq!(config.heimdall_rest_url, "http://0.0.0.0:1317");
        assert_eq!(config.common.bor_chain_id, "15001");
        assert_eq!(config.checkpointer_poll_interval, Duration::from_secs(300));
        assert_eq!(config.no_ack_poll_interval, Duration::from_secs(1010));
        assert_eq!(config.no_ack_wait_time, Duration::from_secs(1800));
        assert_eq!(config.sprint_length, 64);
        assert_eq!(config.worker_pool_size, 16);
        assert_eq!(
            config.common.bridge_db_path(),
            PathBuf::from(".heimdalld/bridge/storage")
        );
    }

    #[test]
    fn we_can_override_durations_and_the_store_path() {
        let config = parse(&["--syncer-poll-interval", "15s", "--bridge-db", "/tmp/db"]);
        assert_eq!(config.syncer_poll_interval, Duration::from_secs(15));
        assert_eq!(config.common.bridge_db_path(), PathBuf::from("/tmp/db"));
    }

    #[test]
    fn fallback_params_carry_the_buffer_time() {
        let params = parse(&[]).fallback_checkpoint_params();
        assert_eq!(params.checkpoint_buffer_time(), Duration::from_secs(1000));
        assert_eq!(params.avg_checkpoint_length, 256);
    }

    #[test]
    fn we_cannot_start_without_contract_addresses() {
        assert!(TestCli::try_parse_from(["bridge"]).is_err());
    }
}
