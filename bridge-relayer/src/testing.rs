//! In-memory stand-ins for the chains, the consensus chain and the broadcaster.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use bridge_core::checkpoint::{BufferedCheckpoint, CheckpointParams, HeaderBlock};
use bridge_core::event::{ChainHeader, ContractLog};
use bridge_core::milestone::Milestone;
use bridge_core::msgs::{BridgeMsg, StdTx};
use bridge_core::staking::{Account, Validator};
use clap::Parser;

use crate::broadcaster::{self, ChildChainCall, TxBroadcast};
use crate::broker::{Broker, MemoryQueueBackend};
use crate::chain::{self, ChainClient, HeaderStream};
use crate::config::BridgeConfig;
use crate::context::BridgeContext;
use crate::contracts::{self, ChildChainCaller, RootChainCaller};
use crate::heimdall::{
    self, BroadcastResult, CommitSignatures, ConfirmedTx, HeimdallApi, NodeStatus, OldTxModule,
    SearchedTx, Span, TxSearchResult,
};
use crate::signer::BridgeSigner;
use crate::store::BridgeStore;

/// Header block id spacing used by [`MockRootChain`]. Matches the configured default.
pub const CHILD_BLOCK_INTERVAL: u64 = 10_000;

/// Chain id of the mocked child chain.
pub const CHILD_CHAIN_ID: u64 = 15001;

/// A deterministic validator key.
pub fn test_signer() -> BridgeSigner {
    BridgeSigner::from_bytes(&[0x11; 32]).unwrap()
}

#[derive(Parser)]
struct TestCli {
    #[command(flatten)]
    config: BridgeConfig,
}

/// The default configuration with placeholder contract addresses.
pub fn test_config() -> BridgeConfig {
    TestCli::try_parse_from([
        "bridge",
        "--root-chain-address",
        "0x0000000000000000000000000000000000000001",
        "--staking-info-address",
        "0x0000000000000000000000000000000000000002",
        "--state-sender-address",
        "0x0000000000000000000000000000000000000003",
    ])
    .unwrap()
    .config
}

/// A header whose hash and roots are derived from its number.
pub fn test_header(number: u64) -> ChainHeader {
    let seed = B256::left_padding_from(&number.to_be_bytes());
    ChainHeader {
        chain_id: CHILD_CHAIN_ID,
        number,
        hash: alloy::primitives::keccak256(seed),
        timestamp: 1_700_000_000 + number * 2,
        transactions_root: alloy::primitives::keccak256([seed.as_slice(), b"tx".as_slice()].concat()),
        receipts_root: alloy::primitives::keccak256([seed.as_slice(), b"rx".as_slice()].concat()),
    }
}

/// A chain backed by a header map and a list of logs. It cannot push heads.
#[derive(Debug, Default)]
pub struct MockChainClient {
    headers: Mutex<BTreeMap<u64, ChainHeader>>,
    logs: Mutex<Vec<ContractLog>>,
    log_queries: Mutex<Vec<(u64, u64)>>,
}

impl MockChainClient {
    /// Adds a header for every number in `numbers`.
    pub fn add_headers(&self, numbers: RangeInclusive<u64>) {
        let mut headers = self.headers.lock().unwrap();
        for number in numbers {
            headers.insert(number, test_header(number));
        }
    }

    /// The stored header at `number`.
    pub fn header(&self, number: u64) -> Option<ChainHeader> {
        self.headers.lock().unwrap().get(&number).cloned()
    }

    /// Adds a log returned by matching filters.
    pub fn push_log(&self, log: ContractLog) {
        self.logs.lock().unwrap().push(log);
    }

    /// Every `(from, to)` range logs were filtered over.
    pub fn log_queries(&self) -> Vec<(u64, u64)> {
        self.log_queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn chain_id(&self) -> u64 {
        CHILD_CHAIN_ID
    }

    async fn subscribe_new_heads(&self) -> chain::Result<HeaderStream> {
        Err(chain::Error::SubscriptionUnsupported)
    }

    async fn latest_header(&self) -> chain::Result<ChainHeader> {
        self.headers
            .lock()
            .unwrap()
            .values()
            .next_back()
            .cloned()
            .ok_or(chain::Error::MissingBlock {
                block: "latest".to_string(),
            })
    }

    async fn header_by_number(&self, number: u64) -> chain::Result<Option<ChainHeader>> {
        Ok(self.header(number))
    }

    async fn filter_logs(
        &self,
        addresses: &[Address],
        from: u64,
        to: u64,
    ) -> chain::Result<Vec<ContractLog>> {
        self.log_queries.lock().unwrap().push((from, to));
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| addresses.contains(&log.address))
            .filter(|log| (from..=to).contains(&log.block_number))
            .cloned()
            .collect())
    }
}

/// The root-chain checkpoint contract.
#[derive(Debug, Default)]
pub struct MockRootChain {
    current_header_block: Mutex<u64>,
    header_blocks: Mutex<HashMap<u64, HeaderBlock>>,
    last_child_block: Mutex<u64>,
    submissions: Mutex<Vec<(Bytes, Bytes, Bytes)>>,
}

impl MockRootChain {
    /// Stores `block` as header block `id` and moves the next id past it.
    pub fn set_header_block(&self, id: u64, block: HeaderBlock) {
        self.header_blocks.lock().unwrap().insert(id, block);
        *self.current_header_block.lock().unwrap() = id + CHILD_BLOCK_INTERVAL;
    }

    /// Sets the last committed child block.
    pub fn set_last_child_block(&self, block: u64) {
        *self.last_child_block.lock().unwrap() = block;
    }

    /// Every `(vote, sigs, tx_data)` submitted.
    pub fn submissions(&self) -> Vec<(Bytes, Bytes, Bytes)> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl RootChainCaller for MockRootChain {
    async fn current_header_block(&self) -> contracts::Result<u64> {
        Ok(*self.current_header_block.lock().unwrap())
    }

    async fn header_block(&self, id: u64) -> contracts::Result<HeaderBlock> {
        Ok(self
            .header_blocks
            .lock()
            .unwrap()
            .get(&id)
            .copied()
            .unwrap_or_default())
    }

    async fn last_child_block(&self) -> contracts::Result<u64> {
        Ok(*self.last_child_block.lock().unwrap())
    }

    async fn submit_header_block(
        &self,
        vote: Bytes,
        sigs: Bytes,
        tx_data: Bytes,
    ) -> contracts::Result<B256> {
        let mut submissions = self.submissions.lock().unwrap();
        submissions.push((vote, sigs, tx_data));
        Ok(B256::with_last_byte(submissions.len() as u8))
    }
}

/// The child-chain state receiver.
#[derive(Debug, Default)]
pub struct MockChildChain {
    proposed: Mutex<Vec<u64>>,
}

impl MockChildChain {
    /// Every state id proposed.
    pub fn proposed(&self) -> Vec<u64> {
        self.proposed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChildChainCaller for MockChildChain {
    async fn propose_state(&self, id: u64) -> contracts::Result<B256> {
        self.proposed.lock().unwrap().push(id);
        Ok(B256::left_padding_from(&id.to_be_bytes()))
    }
}

/// The consensus chain's REST and RPC endpoints.
#[derive(Debug)]
pub struct MockHeimdall {
    account: Mutex<Option<Account>>,
    account_queries: Mutex<usize>,
    broadcasts: Mutex<Vec<StdTx>>,
    rejection: Mutex<Option<(u32, String)>>,
    status: Mutex<NodeStatus>,
    search_pages: Mutex<HashMap<String, VecDeque<Vec<SearchedTx>>>>,
    searches: Mutex<Vec<(String, u32)>>,
    searched_ranges: Mutex<Vec<(String, u64, u64)>>,
    failing_searches: Mutex<HashSet<String>>,
    proposers: Mutex<Vec<Validator>>,
    current_proposer: Mutex<Option<Validator>>,
    validators: Mutex<HashMap<u64, Validator>>,
    buffered: Mutex<Option<BufferedCheckpoint>>,
    latest_checkpoint: Mutex<Option<HeaderBlock>>,
    latest_span: Mutex<Option<Span>>,
    last_no_ack: Mutex<u64>,
    params: Mutex<Option<CheckpointParams>>,
    milestone: Mutex<(Option<Milestone>, u64)>,
    milestone_proposers: Mutex<Vec<Validator>>,
    old_txs: Mutex<HashSet<(B256, u64)>>,
    txs: Mutex<HashMap<String, ConfirmedTx>>,
    commits: Mutex<HashMap<u64, CommitSignatures>>,
    mempool: Mutex<Vec<Vec<u8>>>,
}

impl Default for MockHeimdall {
    fn default() -> Self {
        Self {
            account: Mutex::default(),
            account_queries: Mutex::default(),
            broadcasts: Mutex::default(),
            rejection: Mutex::default(),
            status: Mutex::new(NodeStatus {
                latest_block_height: 1,
                catching_up: false,
            }),
            search_pages: Mutex::default(),
            searches: Mutex::default(),
            searched_ranges: Mutex::default(),
            failing_searches: Mutex::default(),
            proposers: Mutex::default(),
            current_proposer: Mutex::default(),
            validators: Mutex::default(),
            buffered: Mutex::default(),
            latest_checkpoint: Mutex::default(),
            latest_span: Mutex::default(),
            last_no_ack: Mutex::default(),
            params: Mutex::default(),
            milestone: Mutex::default(),
            milestone_proposers: Mutex::default(),
            old_txs: Mutex::default(),
            txs: Mutex::default(),
            commits: Mutex::default(),
            mempool: Mutex::default(),
        }
    }
}

impl MockHeimdall {
    fn malformed(what: &str) -> heimdall::Error {
        heimdall::Error::Malformed {
            url: "mock://heimdall".to_string(),
            message: format!("no {what}"),
        }
    }

    /// Sets the signer's account.
    pub fn set_account(&self, account: Account) {
        *self.account.lock().unwrap() = Some(account);
    }

    /// How many times the account was fetched.
    pub fn account_queries(&self) -> usize {
        *self.account_queries.lock().unwrap()
    }

    /// Every accepted transaction.
    pub fn broadcasts(&self) -> Vec<StdTx> {
        self.broadcasts.lock().unwrap().clone()
    }

    /// Makes the next broadcast fail with `code` and `log`.
    pub fn reject_next_broadcast(&self, code: u32, log: &str) {
        *self.rejection.lock().unwrap() = Some((code, log.to_string()));
    }

    /// Sets the node status.
    pub fn set_status(&self, status: NodeStatus) {
        *self.status.lock().unwrap() = status;
    }

    /// Queues a result page for searches on `action`.
    pub fn push_search_page(&self, action: &str, txs: Vec<SearchedTx>) {
        self.search_pages
            .lock()
            .unwrap()
            .entry(action.to_string())
            .or_default()
            .push_back(txs);
    }

    /// Every `(action, page)` searched.
    pub fn searches(&self) -> Vec<(String, u32)> {
        self.searches.lock().unwrap().clone()
    }

    /// Every `(action, minheight, maxheight)` searched with a height range.
    pub fn searched_ranges(&self) -> Vec<(String, u64, u64)> {
        self.searched_ranges.lock().unwrap().clone()
    }

    /// Makes the next search on `action` fail without consuming its pages.
    pub fn fail_next_search(&self, action: &str) {
        self.failing_searches
            .lock()
            .unwrap()
            .insert(action.to_string());
    }

    /// Sets the checkpoint proposer order.
    pub fn set_proposers(&self, proposers: Vec<Validator>) {
        *self.proposers.lock().unwrap() = proposers;
    }

    /// Sets the current proposer.
    pub fn set_current_proposer(&self, proposer: Option<Validator>) {
        *self.current_proposer.lock().unwrap() = proposer;
    }

    /// Adds a validator to the set.
    pub fn set_validator(&self, validator: Validator) {
        self.validators
            .lock()
            .unwrap()
            .insert(validator.id, validator);
    }

    /// Sets the buffered checkpoint.
    pub fn set_buffered_checkpoint(&self, checkpoint: Option<BufferedCheckpoint>) {
        *self.buffered.lock().unwrap() = checkpoint;
    }

    /// Sets the latest checkpoint.
    pub fn set_latest_checkpoint(&self, checkpoint: Option<HeaderBlock>) {
        *self.latest_checkpoint.lock().unwrap() = checkpoint;
    }

    /// Sets the current span.
    pub fn set_latest_span(&self, span: Option<Span>) {
        *self.latest_span.lock().unwrap() = span;
    }

    /// Sets the time of the last no-ack.
    pub fn set_last_no_ack(&self, time: u64) {
        *self.last_no_ack.lock().unwrap() = time;
    }

    /// Sets the checkpoint params. Without them the params query fails.
    pub fn set_checkpoint_params(&self, params: CheckpointParams) {
        *self.params.lock().unwrap() = Some(params);
    }

    /// Sets the latest milestone and the milestone count.
    pub fn set_latest_milestone(&self, milestone: Option<Milestone>, count: u64) {
        *self.milestone.lock().unwrap() = (milestone, count);
    }

    /// Sets the milestone proposer order.
    pub fn set_milestone_proposers(&self, proposers: Vec<Validator>) {
        *self.milestone_proposers.lock().unwrap() = proposers;
    }

    /// Marks `(tx_hash, log_index)` as processed in every module.
    pub fn mark_old_tx(&self, tx_hash: B256, log_index: u64) {
        self.old_txs.lock().unwrap().insert((tx_hash, log_index));
    }

    /// Stores a confirmed transaction under `hash`.
    pub fn set_tx(&self, hash: &str, tx: ConfirmedTx) {
        self.txs.lock().unwrap().insert(hash.to_string(), tx);
    }

    /// Adds an encoded transaction to the mempool.
    pub fn add_unconfirmed_tx(&self, tx: Vec<u8>) {
        self.mempool.lock().unwrap().push(tx);
    }

    /// Stores the commit signatures at `height`.
    pub fn set_commit(&self, height: u64, commit: CommitSignatures) {
        self.commits.lock().unwrap().insert(height, commit);
    }
}

#[async_trait]
impl HeimdallApi for MockHeimdall {
    async fn buffered_checkpoint(&self) -> heimdall::Result<Option<BufferedCheckpoint>> {
        Ok(self.buffered.lock().unwrap().clone())
    }

    async fn latest_checkpoint(&self) -> heimdall::Result<Option<HeaderBlock>> {
        Ok(*self.latest_checkpoint.lock().unwrap())
    }

    async fn last_no_ack(&self) -> heimdall::Result<u64> {
        Ok(*self.last_no_ack.lock().unwrap())
    }

    async fn checkpoint_params(&self) -> heimdall::Result<CheckpointParams> {
        self.params
            .lock()
            .unwrap()
            .ok_or_else(|| Self::malformed("checkpoint params"))
    }

    async fn proposers(&self, count: u64) -> heimdall::Result<Vec<Validator>> {
        let proposers = self.proposers.lock().unwrap();
        Ok(proposers.iter().take(count as usize).cloned().collect())
    }

    async fn current_proposer(&self) -> heimdall::Result<Option<Validator>> {
        Ok(self.current_proposer.lock().unwrap().clone())
    }

    async fn validator(&self, id: u64) -> heimdall::Result<Option<Validator>> {
        Ok(self.validators.lock().unwrap().get(&id).cloned())
    }

    async fn dividend_account_root(&self) -> heimdall::Result<B256> {
        Ok(B256::repeat_byte(0xda))
    }

    async fn is_old_tx(
        &self,
        _module: OldTxModule,
        tx_hash: B256,
        log_index: u64,
    ) -> heimdall::Result<bool> {
        Ok(self.old_txs.lock().unwrap().contains(&(tx_hash, log_index)))
    }

    async fn latest_milestone(&self) -> heimdall::Result<Option<Milestone>> {
        Ok(self.milestone.lock().unwrap().0.clone())
    }

    async fn milestone_count(&self) -> heimdall::Result<u64> {
        Ok(self.milestone.lock().unwrap().1)
    }

    async fn milestone_proposers(&self, count: u64) -> heimdall::Result<Vec<Validator>> {
        let proposers = self.milestone_proposers.lock().unwrap();
        Ok(proposers.iter().take(count as usize).cloned().collect())
    }

    async fn latest_span(&self) -> heimdall::Result<Option<Span>> {
        Ok(self.latest_span.lock().unwrap().clone())
    }

    async fn account(&self, address: Address) -> heimdall::Result<Option<Account>> {
        *self.account_queries.lock().unwrap() += 1;
        Ok(self
            .account
            .lock()
            .unwrap()
            .filter(|account| account.address == address))
    }

    async fn search_txs(
        &self,
        tags: &[(String, String)],
        page: u32,
        _limit: u32,
    ) -> heimdall::Result<TxSearchResult> {
        let action = tags
            .iter()
            .find(|(key, _)| key == "message.action")
            .map(|(_, value)| value.clone())
            .unwrap_or_default();
        self.searches.lock().unwrap().push((action.clone(), page));
        let height = |key: &str| {
            tags.iter()
                .find(|(tag, _)| tag == key)
                .and_then(|(_, value)| value.parse::<u64>().ok())
        };
        if let (Some(from), Some(to)) = (height("tx.minheight"), height("tx.maxheight")) {
            self.searched_ranges
                .lock()
                .unwrap()
                .push((action.clone(), from, to));
        }
        if self.failing_searches.lock().unwrap().remove(&action) {
            return Err(Self::malformed("search results"));
        }
        let txs = self
            .search_pages
            .lock()
            .unwrap()
            .get_mut(&action)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default();
        Ok(TxSearchResult { txs })
    }

    async fn broadcast_tx(&self, tx: &StdTx) -> heimdall::Result<BroadcastResult> {
        if let Some((code, log)) = self.rejection.lock().unwrap().take() {
            return Err(heimdall::Error::Rejected { code, log });
        }
        let mut broadcasts = self.broadcasts.lock().unwrap();
        broadcasts.push(tx.clone());
        Ok(BroadcastResult {
            tx_hash: format!("{:064X}", broadcasts.len()),
        })
    }

    async fn status(&self) -> heimdall::Result<NodeStatus> {
        Ok(*self.status.lock().unwrap())
    }

    async fn tx(&self, hash: &str) -> heimdall::Result<Option<ConfirmedTx>> {
        Ok(self.txs.lock().unwrap().get(hash).cloned())
    }

    async fn commit(&self, height: u64) -> heimdall::Result<CommitSignatures> {
        self.commits
            .lock()
            .unwrap()
            .get(&height)
            .cloned()
            .ok_or_else(|| Self::malformed("commit"))
    }

    async fn unconfirmed_txs(&self) -> heimdall::Result<Vec<Vec<u8>>> {
        Ok(self.mempool.lock().unwrap().clone())
    }
}

/// Records what would have been broadcast.
#[derive(Debug)]
pub struct MockBroadcaster {
    address: Address,
    heimdall_msgs: Mutex<Vec<BridgeMsg>>,
    child_chain_calls: Mutex<Vec<ChildChainCall>>,
}

impl MockBroadcaster {
    /// A broadcaster sending from `address`.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            heimdall_msgs: Mutex::default(),
            child_chain_calls: Mutex::default(),
        }
    }

    /// Every consensus-chain message sent.
    pub fn heimdall_msgs(&self) -> Vec<BridgeMsg> {
        self.heimdall_msgs.lock().unwrap().clone()
    }

    /// Every child-chain call sent.
    pub fn child_chain_calls(&self) -> Vec<ChildChainCall> {
        self.child_chain_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TxBroadcast for MockBroadcaster {
    fn address(&self) -> Address {
        self.address
    }

    async fn broadcast_to_heimdall(&self, msg: BridgeMsg) -> broadcaster::Result<String> {
        let mut msgs = self.heimdall_msgs.lock().unwrap();
        msgs.push(msg);
        Ok(format!("{:064X}", msgs.len()))
    }

    async fn broadcast_to_child_chain(&self, call: ChildChainCall) -> broadcaster::Result<B256> {
        let mut calls = self.child_chain_calls.lock().unwrap();
        calls.push(call);
        Ok(B256::with_last_byte(calls.len() as u8))
    }
}

/// A [`BridgeContext`] wired to mocks, a temporary store and the in-memory broker.
pub struct TestHarness {
    /// The context under test.
    pub ctx: Arc<BridgeContext>,
    /// The root chain.
    pub root_chain: Arc<MockChainClient>,
    /// The child chain.
    pub child_chain: Arc<MockChainClient>,
    /// The consensus chain.
    pub heimdall: Arc<MockHeimdall>,
    /// The root-chain checkpoint contract.
    pub root_contract: Arc<MockRootChain>,
    /// The broadcaster.
    pub broadcaster: Arc<MockBroadcaster>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    /// A harness with the default configuration.
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// A harness with `config`.
    pub fn with_config(config: BridgeConfig) -> Self {
        let signer = test_signer();
        let broker = Arc::new(Broker::new(Arc::new(MemoryQueueBackend::default())));
        broker.initialize_queues().unwrap();

        let root_chain = Arc::new(MockChainClient::default());
        let child_chain = Arc::new(MockChainClient::default());
        let heimdall = Arc::new(MockHeimdall::default());
        let root_contract = Arc::new(MockRootChain::default());
        let broadcaster = Arc::new(MockBroadcaster::new(signer.address()));

        let ctx = BridgeContext::from_parts(
            config,
            BridgeStore::temporary().unwrap(),
            broker,
            heimdall.clone(),
            root_chain.clone(),
            child_chain.clone(),
            root_contract.clone(),
            broadcaster.clone(),
            &signer,
        );

        Self {
            ctx,
            root_chain,
            child_chain,
            heimdall,
            root_contract,
            broadcaster,
        }
    }

    /// The validator's address.
    pub fn address(&self) -> Address {
        self.ctx.address()
    }

    /// A header at `number`.
    pub fn header(&self, number: u64) -> ChainHeader {
        test_header(number)
    }
}
