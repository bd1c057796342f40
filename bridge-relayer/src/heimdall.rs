//! # Consensus-Chain Client
//!
//! Read access to the consensus chain's REST surface and its Tendermint RPC, plus
//! transaction broadcast. Everything the processors ask the consensus chain goes through
//! the [`HeimdallApi`] trait so that tests can substitute a scripted chain.
//!
//! REST responses arrive wrapped as `{height, result}`. A missing entry, reported either as
//! `404` or as a `null` result, is not an error: it means there is nothing to act on yet.

use alloy::primitives::{Address, B256};
use alloy::rlp::{Encodable, Header};
use async_trait::async_trait;
use base64::Engine;
use bridge_core::checkpoint::{BufferedCheckpoint, CheckpointParams, HeaderBlock};
use bridge_core::event::StringEvent;
use bridge_core::milestone::Milestone;
use bridge_core::msgs::StdTx;
use bridge_core::staking::{Account, Validator};
use bridge_core::string_u64;
use log::debug;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use snafu::{ResultExt, Snafu};

/// Bytes of the type prefix in front of an encoded consensus-chain transaction.
pub const PULP_PREFIX_LENGTH: usize = 4;

/// Tendermint's vote type for precommits.
const PRECOMMIT_TYPE: u8 = 2;

/// Message kind the root chain expects in the second field of a vote.
const VOTE_KIND: &str = "vote";

/// Bytes of the transaction digest carried in a vote.
const VOTE_DATA_LENGTH: usize = 20;

/// Errors raised while talking to the consensus chain.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The request could not be completed.
    #[snafu(display("Request to {url} failed: {source}"))]
    Http {
        /// Requested URL.
        url: String,
        /// Underlying HTTP error.
        source: reqwest::Error,
    },

    /// The server answered with an unexpected status.
    #[snafu(display("Request to {url} returned status {status}"))]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The body could not be decoded.
    #[snafu(display("Failed to decode response from {url}: {source}"))]
    Decode {
        /// Requested URL.
        url: String,
        /// Underlying decode error.
        source: serde_json::Error,
    },

    /// A field that must be present was missing or malformed.
    #[snafu(display("Malformed response from {url}: {message}"))]
    Malformed {
        /// Requested URL.
        url: String,
        /// What was wrong.
        message: String,
    },

    /// The consensus chain refused a broadcast transaction.
    #[snafu(display("Transaction rejected with code {code}: {log}"))]
    Rejected {
        /// ABCI response code.
        code: u32,
        /// Raw log explaining the rejection.
        log: String,
    },
}

/// Result alias for consensus-chain calls.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether the chain rejected a transaction because the signer's sequence was stale.
    pub fn is_sequence_mismatch(&self) -> bool {
        match self {
            Error::Rejected { code, log } => *code == 4 || is_sequence_mismatch_log(log),
            _ => false,
        }
    }
}

/// Whether a rejection log reports a stale account sequence.
pub fn is_sequence_mismatch_log(log: &str) -> bool {
    let log = log.to_lowercase();
    log.contains("invalid sequence")
        || log.contains("incorrect account sequence")
        || log.contains("signature verification failed")
}

/// Modules that keep an old-transaction index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OldTxModule {
    /// Staking events.
    Staking,
    /// State-sync records.
    Clerk,
    /// Fee top-ups.
    Topup,
}

impl OldTxModule {
    fn path(&self) -> &'static str {
        match self {
            OldTxModule::Staking => "/staking/isoldtx",
            OldTxModule::Clerk => "/clerk/isoldtx",
            OldTxModule::Topup => "/topup/isoldtx",
        }
    }
}

/// Node sync state from Tendermint `/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStatus {
    /// Latest committed height.
    pub latest_block_height: u64,
    /// Whether the node is still syncing.
    pub catching_up: bool,
}

/// One page of a transaction search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TxSearchResult {
    /// Matching transactions on this page.
    #[serde(default)]
    pub txs: Vec<SearchedTx>,
}

/// A transaction returned by search.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchedTx {
    /// Inclusion height.
    #[serde(with = "string_u64")]
    pub height: u64,
    /// Hex transaction hash.
    pub txhash: String,
    /// Per-message logs with their events.
    #[serde(default)]
    pub logs: Vec<TxLog>,
}

/// The log of one message in a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TxLog {
    /// Events the message emitted.
    #[serde(default)]
    pub events: Vec<StringEvent>,
}

impl SearchedTx {
    /// Events of every message in the transaction.
    pub fn events(&self) -> impl Iterator<Item = &StringEvent> {
        self.logs.iter().flat_map(|log| log.events.iter())
    }
}

/// A confirmed transaction with its encoded bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedTx {
    /// Inclusion height.
    pub height: u64,
    /// Encoded transaction as stored by the chain.
    pub tx: Vec<u8>,
}

impl ConfirmedTx {
    /// The transaction body without its type prefix, as the root chain expects it.
    pub fn payload(&self) -> &[u8] {
        self.tx.get(PULP_PREFIX_LENGTH..).unwrap_or_default()
    }
}

/// Signatures committing a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSignatures {
    /// Consensus chain id.
    pub chain_id: String,
    /// Committed height.
    pub height: u64,
    /// Commit round.
    pub round: u64,
    /// Signatures of the validators that signed, ordered by validator address.
    pub signatures: Vec<Vec<u8>>,
}

impl CommitSignatures {
    /// The precommit sign bytes the root chain checks the signatures against.
    ///
    /// This is the RLP list `[chain_id, "vote", height, round, type, data]` where `data` is the
    /// first 20 bytes of the sha256 of the checkpoint transaction data.
    pub fn vote_bytes(&self, tx_data: &[u8]) -> Vec<u8> {
        let digest = Sha256::digest(tx_data);
        let vote_data = &digest[..VOTE_DATA_LENGTH];
        let chain_id = self.chain_id.as_str();
        let fields: [&dyn Encodable; 6] = [
            &chain_id,
            &VOTE_KIND,
            &self.height,
            &self.round,
            &PRECOMMIT_TYPE,
            &vote_data,
        ];

        let payload_length = fields.iter().map(|field| field.length()).sum();
        let mut out = Vec::with_capacity(payload_length + 3);
        Header {
            list: true,
            payload_length,
        }
        .encode(&mut out);
        for field in fields {
            field.encode(&mut out);
        }
        out
    }

    /// Every signature, concatenated in validator address order.
    pub fn concatenated_signatures(&self) -> Vec<u8> {
        self.signatures.concat()
    }
}

/// The child chain's current producer span.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Span {
    /// Span id.
    #[serde(rename = "span_id", with = "string_u64")]
    pub id: u64,
    /// First child block of the span.
    #[serde(with = "string_u64")]
    pub start_block: u64,
    /// Last child block of the span.
    #[serde(with = "string_u64")]
    pub end_block: u64,
    /// Child chain id.
    pub bor_chain_id: String,
}

/// Outcome of a broadcast accepted into the mempool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastResult {
    /// Transaction hash.
    pub tx_hash: String,
}

/// The consensus chain as the relayer sees it.
#[async_trait]
pub trait HeimdallApi: Send + Sync {
    /// The checkpoint awaiting root-chain commitment, if any.
    async fn buffered_checkpoint(&self) -> Result<Option<BufferedCheckpoint>>;

    /// The latest acknowledged checkpoint.
    async fn latest_checkpoint(&self) -> Result<Option<HeaderBlock>>;

    /// Unix time of the last no-ack, `0` if none.
    async fn last_no_ack(&self) -> Result<u64>;

    /// Checkpoint module parameters.
    async fn checkpoint_params(&self) -> Result<CheckpointParams>;

    /// The next `count` proposers, current proposer first.
    async fn proposers(&self, count: u64) -> Result<Vec<Validator>>;

    /// The current proposer.
    async fn current_proposer(&self) -> Result<Option<Validator>>;

    /// A validator by id.
    async fn validator(&self, id: u64) -> Result<Option<Validator>>;

    /// Root of the dividend account tree.
    async fn dividend_account_root(&self) -> Result<B256>;

    /// Whether `(tx_hash, log_index)` was already applied by `module`.
    async fn is_old_tx(&self, module: OldTxModule, tx_hash: B256, log_index: u64) -> Result<bool>;

    /// The current milestone.
    async fn latest_milestone(&self) -> Result<Option<Milestone>>;

    /// Number of milestones stored.
    async fn milestone_count(&self) -> Result<u64>;

    /// The next `count` milestone proposers.
    async fn milestone_proposers(&self, count: u64) -> Result<Vec<Validator>>;

    /// The latest producer span.
    async fn latest_span(&self) -> Result<Option<Span>>;

    /// The signer's account, if it exists on chain.
    async fn account(&self, address: Address) -> Result<Option<Account>>;

    /// Searches transactions by event tags.
    async fn search_txs(&self, tags: &[(String, String)], page: u32, limit: u32)
        -> Result<TxSearchResult>;

    /// Broadcasts a signed transaction without waiting for inclusion.
    async fn broadcast_tx(&self, tx: &StdTx) -> Result<BroadcastResult>;

    /// Node sync state.
    async fn status(&self) -> Result<NodeStatus>;

    /// A confirmed transaction by hash.
    async fn tx(&self, hash: &str) -> Result<Option<ConfirmedTx>>;

    /// The signatures committing `height`.
    async fn commit(&self, height: u64) -> Result<CommitSignatures>;

    /// Encoded transactions waiting in the node's mempool.
    async fn unconfirmed_txs(&self) -> Result<Vec<Vec<u8>>>;
}

/// `{height, result}` response envelope.
#[derive(Deserialize)]
struct HeightWrapped<T> {
    result: Option<T>,
}

/// Body of `/checkpoint/last-no-ack`.
#[derive(Deserialize)]
struct LastNoAck {
    #[serde(with = "string_u64")]
    result: u64,
}

/// Body of `/milestone/count`.
#[derive(Deserialize)]
struct MilestoneCount {
    #[serde(with = "string_u64")]
    count: u64,
}

/// Tendermint JSON-RPC envelope.
#[derive(Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
}

#[derive(Deserialize)]
struct RpcStatus {
    sync_info: RpcSyncInfo,
}

#[derive(Deserialize)]
struct RpcSyncInfo {
    #[serde(with = "string_u64")]
    latest_block_height: u64,
    #[serde(default)]
    catching_up: bool,
}

#[derive(Deserialize)]
struct RpcTx {
    #[serde(with = "string_u64")]
    height: u64,
    tx: String,
}

#[derive(Deserialize)]
struct RpcUnconfirmedTxs {
    #[serde(default)]
    txs: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct RpcCommit {
    signed_header: RpcSignedHeader,
}

#[derive(Deserialize)]
struct RpcSignedHeader {
    header: RpcCommitHeader,
    commit: RpcCommitBody,
}

#[derive(Deserialize)]
struct RpcCommitHeader {
    chain_id: String,
    #[serde(with = "string_u64")]
    height: u64,
}

#[derive(Deserialize)]
struct RpcCommitBody {
    #[serde(default, with = "string_u64")]
    round: u64,
    #[serde(default, alias = "precommits")]
    signatures: Vec<Option<RpcCommitSig>>,
}

#[derive(Deserialize)]
struct RpcCommitSig {
    #[serde(default)]
    validator_address: String,
    #[serde(default)]
    signature: Option<String>,
}

/// Body of `POST /txs`.
#[derive(Serialize)]
struct BroadcastRequest<'a> {
    tx: &'a StdTx,
    mode: &'static str,
}

#[derive(Deserialize)]
struct BroadcastResponse {
    #[serde(default)]
    txhash: String,
    #[serde(default)]
    code: u32,
    #[serde(default)]
    raw_log: String,
}

/// [`HeimdallApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HeimdallClient {
    http: Client,
    rest_url: String,
    rpc_url: String,
}

impl HeimdallClient {
    /// Creates a client for the given REST and Tendermint RPC base URLs.
    pub fn new(rest_url: impl Into<String>, rpc_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            rest_url: rest_url.into().trim_end_matches('/').to_string(),
            rpc_url: rpc_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// GETs `url`, returning `None` on `404`.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: String,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        debug!("GET {url}");
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .context(HttpSnafu { url: url.clone() })?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => return Ok(None),
            status if !status.is_success() => {
                return Err(Error::Status {
                    url,
                    status: status.as_u16(),
                })
            }
            _ => {}
        }

        let body = response
            .bytes()
            .await
            .context(HttpSnafu { url: url.clone() })?;
        serde_json::from_slice(&body)
            .map(Some)
            .context(DecodeSnafu { url })
    }

    /// GETs a height-wrapped REST resource.
    async fn rest<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        self.rest_with_query(path, &[]).await
    }

    async fn rest_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        let url = format!("{}{}", self.rest_url, path);
        let wrapped: Option<HeightWrapped<T>> = self.get_json(url, query).await?;
        Ok(wrapped.and_then(|wrapped| wrapped.result))
    }

    /// Like [`Self::rest`], but a missing result is an error.
    async fn rest_required<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.rest(path).await?.ok_or_else(|| Error::Malformed {
            url: format!("{}{}", self.rest_url, path),
            message: "missing result".to_string(),
        })
    }

    async fn rpc<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<Option<T>> {
        let url = format!("{}{}", self.rpc_url, path);
        let envelope: Option<RpcEnvelope<T>> = self.get_json(url, query).await?;
        Ok(envelope.and_then(|envelope| envelope.result))
    }
}

#[async_trait]
impl HeimdallApi for HeimdallClient {
    async fn buffered_checkpoint(&self) -> Result<Option<BufferedCheckpoint>> {
        self.rest("/checkpoint/buffer").await
    }

    async fn latest_checkpoint(&self) -> Result<Option<HeaderBlock>> {
        let checkpoint: Option<BufferedCheckpoint> =
            self.rest("/checkpoint/latest-checkpoint").await?;
        Ok(checkpoint.map(|checkpoint| HeaderBlock {
            root: checkpoint.root_hash,
            start: checkpoint.start_block,
            end: checkpoint.end_block,
            created_at: checkpoint.timestamp,
            proposer: checkpoint.proposer,
        }))
    }

    async fn last_no_ack(&self) -> Result<u64> {
        let last: Option<LastNoAck> = self.rest("/checkpoint/last-no-ack").await?;
        Ok(last.map(|last| last.result).unwrap_or_default())
    }

    async fn checkpoint_params(&self) -> Result<CheckpointParams> {
        self.rest_required("/checkpoint/params").await
    }

    async fn proposers(&self, count: u64) -> Result<Vec<Validator>> {
        Ok(self
            .rest(&format!("/staking/proposer/{count}"))
            .await?
            .unwrap_or_default())
    }

    async fn current_proposer(&self) -> Result<Option<Validator>> {
        self.rest("/staking/current-proposer").await
    }

    async fn validator(&self, id: u64) -> Result<Option<Validator>> {
        self.rest(&format!("/staking/validator/{id}")).await
    }

    async fn dividend_account_root(&self) -> Result<B256> {
        self.rest_required("/staking/dividend-account-root").await
    }

    async fn is_old_tx(&self, module: OldTxModule, tx_hash: B256, log_index: u64) -> Result<bool> {
        let query = [
            ("txhash", tx_hash.to_string()),
            ("logindex", log_index.to_string()),
        ];
        Ok(self
            .rest_with_query(module.path(), &query)
            .await?
            .unwrap_or(false))
    }

    async fn latest_milestone(&self) -> Result<Option<Milestone>> {
        self.rest("/milestone/latest").await
    }

    async fn milestone_count(&self) -> Result<u64> {
        let count: Option<MilestoneCount> = self.rest("/milestone/count").await?;
        Ok(count.map(|count| count.count).unwrap_or_default())
    }

    async fn milestone_proposers(&self, count: u64) -> Result<Vec<Validator>> {
        Ok(self
            .rest(&format!("/staking/milestoneProposer/{count}"))
            .await?
            .unwrap_or_default())
    }

    async fn latest_span(&self) -> Result<Option<Span>> {
        self.rest("/bor/latest-span").await
    }

    async fn account(&self, address: Address) -> Result<Option<Account>> {
        let value: Option<serde_json::Value> =
            self.rest(&format!("/auth/accounts/{address}")).await?;
        value
            .map(Account::from_json)
            .transpose()
            .context(DecodeSnafu {
                url: format!("{}/auth/accounts/{address}", self.rest_url),
            })
    }

    async fn search_txs(
        &self,
        tags: &[(String, String)],
        page: u32,
        limit: u32,
    ) -> Result<TxSearchResult> {
        let url = format!("{}/txs", self.rest_url);
        let mut query: Vec<(&str, String)> = tags
            .iter()
            .map(|(key, value)| (key.as_str(), value.clone()))
            .collect();
        query.push(("page", page.to_string()));
        query.push(("limit", limit.to_string()));

        Ok(self.get_json(url, &query).await?.unwrap_or_default())
    }

    async fn broadcast_tx(&self, tx: &StdTx) -> Result<BroadcastResult> {
        let url = format!("{}/txs", self.rest_url);
        let response = self
            .http
            .post(&url)
            .json(&BroadcastRequest { tx, mode: "async" })
            .send()
            .await
            .context(HttpSnafu { url: url.clone() })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .context(HttpSnafu { url: url.clone() })?;
        let parsed: BroadcastResponse =
            serde_json::from_slice(&body).context(DecodeSnafu { url: url.clone() })?;

        if parsed.code != 0 {
            return Err(Error::Rejected {
                code: parsed.code,
                log: parsed.raw_log,
            });
        }
        if !status.is_success() {
            return Err(Error::Status {
                url,
                status: status.as_u16(),
            });
        }

        Ok(BroadcastResult {
            tx_hash: parsed.txhash,
        })
    }

    async fn status(&self) -> Result<NodeStatus> {
        let status: RpcStatus = self.rpc("/status", &[]).await?.ok_or_else(|| Error::Malformed {
            url: format!("{}/status", self.rpc_url),
            message: "missing result".to_string(),
        })?;
        Ok(NodeStatus {
            latest_block_height: status.sync_info.latest_block_height,
            catching_up: status.sync_info.catching_up,
        })
    }

    async fn tx(&self, hash: &str) -> Result<Option<ConfirmedTx>> {
        let hash = if hash.starts_with("0x") {
            hash.to_string()
        } else {
            format!("0x{hash}")
        };
        let Some(tx) = self.rpc::<RpcTx>("/tx", &[("hash", hash)]).await? else {
            return Ok(None);
        };

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(tx.tx.as_bytes())
            .map_err(|e| Error::Malformed {
                url: format!("{}/tx", self.rpc_url),
                message: e.to_string(),
            })?;
        Ok(Some(ConfirmedTx {
            height: tx.height,
            tx: bytes,
        }))
    }

    async fn commit(&self, height: u64) -> Result<CommitSignatures> {
        let url = format!("{}/commit", self.rpc_url);
        let commit: RpcCommit = self
            .rpc("/commit", &[("height", height.to_string())])
            .await?
            .ok_or_else(|| Error::Malformed {
                url: url.clone(),
                message: format!("no commit at height {height}"),
            })?;

        decode_commit(commit).map_err(|message| Error::Malformed { url, message })
    }

    async fn unconfirmed_txs(&self) -> Result<Vec<Vec<u8>>> {
        let url = format!("{}/unconfirmed_txs", self.rpc_url);
        let pending: Option<RpcUnconfirmedTxs> = self.rpc("/unconfirmed_txs", &[]).await?;
        let engine = base64::engine::general_purpose::STANDARD;
        pending
            .and_then(|pending| pending.txs)
            .unwrap_or_default()
            .into_iter()
            .map(|tx| {
                engine.decode(tx.as_bytes()).map_err(|e| Error::Malformed {
                    url: url.clone(),
                    message: e.to_string(),
                })
            })
            .collect()
    }
}

/// Flattens a Tendermint commit into the signatures of validators that signed, sorted by
/// validator address as the root chain requires.
fn decode_commit(commit: RpcCommit) -> Result<CommitSignatures, String> {
    let engine = base64::engine::general_purpose::STANDARD;
    let mut signed = commit
        .signed_header
        .commit
        .signatures
        .into_iter()
        .flatten()
        .filter_map(|sig| Some((sig.validator_address, sig.signature?)))
        .filter(|(_, signature)| !signature.is_empty())
        .map(|(address, signature)| {
            let address = hex::decode(&address).map_err(|e| format!("{address}: {e}"))?;
            let signature = engine
                .decode(signature.as_bytes())
                .map_err(|e| e.to_string())?;
            Ok((address, signature))
        })
        .collect::<Result<Vec<_>, String>>()?;
    signed.sort_by(|(left, _), (right, _)| left.cmp(right));

    Ok(CommitSignatures {
        chain_id: commit.signed_header.header.chain_id,
        height: commit.signed_header.header.height,
        round: commit.signed_header.commit.round,
        signatures: signed.into_iter().map(|(_, signature)| signature).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn we_can_unwrap_the_height_envelope() {
        let body = r#"{"height":"12","result":{"result":1700000000}}"#;
        let wrapped: HeightWrapped<LastNoAck> = serde_json::from_str(body).unwrap();
        assert_eq!(wrapped.result.unwrap().result, 1_700_000_000);

        let empty: HeightWrapped<LastNoAck> =
            serde_json::from_str(r#"{"height":"12","result":null}"#).unwrap();
        assert!(empty.result.is_none());
    }

    #[test]
    fn we_can_read_search_results() {
        let body = r#"{
            "total_count": "1",
            "txs": [{
                "height": "120",
                "txhash": "ABCD",
                "logs": [{"msg_index": 0, "events": [
                    {"type": "message", "attributes": [{"key": "action", "value": "checkpoint"}]},
                    {"type": "checkpoint", "attributes": [
                        {"key": "start-block", "value": "0"},
                        {"key": "end-block", "value": "255"}
                    ]}
                ]}]
            }]
        }"#;
        let result: TxSearchResult = serde_json::from_str(body).unwrap();
        let tx = &result.txs[0];
        assert_eq!(tx.height, 120);

        let checkpoint = tx.events().find(|event| event.kind == "checkpoint").unwrap();
        assert_eq!(checkpoint.u64_attribute("end-block"), Some(255));
    }

    #[test]
    fn we_can_decode_commits_in_both_formats() {
        let sig = base64::engine::general_purpose::STANDARD.encode([7u8; 65]);
        let modern = format!(
            r#"{{"signed_header":{{"header":{{"chain_id":"heimdall-15001","height":"10"}},
            "commit":{{"round":"1","signatures":[{{"signature":"{sig}"}},{{"signature":null}}]}}}}}}"#
        );
        let legacy = format!(
            r#"{{"signed_header":{{"header":{{"chain_id":"heimdall-15001","height":"10"}},
            "commit":{{"precommits":[null,{{"signature":"{sig}"}}]}}}}}}"#
        );

        let modern = decode_commit(serde_json::from_str(&modern).unwrap()).unwrap();
        assert_eq!(modern.round, 1);
        assert_eq!(modern.signatures, vec![vec![7u8; 65]]);

        let legacy = decode_commit(serde_json::from_str(&legacy).unwrap()).unwrap();
        assert_eq!(legacy.round, 0);
        assert_eq!(legacy.signatures.len(), 1);
    }

    #[test]
    fn we_can_build_the_vote_the_root_chain_verifies() {
        // Vote and transaction data of a checkpoint submitted at height 3248.
        let tx_data = hex::decode(
            "f84394b1bf4473c6b1918a6e37408e1c14df81281411a883543ff8835441f7a07d2842c304\
             4740cfe1e1a5f782bfd3b91de0c634e9933524b5e3daacc854f49b845d94796f",
        )
        .unwrap();
        let commit = CommitSignatures {
            chain_id: "heimdall-93rQwK".into(),
            height: 3248,
            round: 0,
            signatures: vec![vec![1, 2], vec![3]],
        };

        assert_eq!(
            hex::encode(commit.vote_bytes(&tx_data)),
            "ef8f6865696d64616c6c2d39337251774b84766f7465820cb0800294907eb68cd3480777e3fd\
             e8897fb1373de6e982cc"
        );
        assert_eq!(commit.concatenated_signatures(), vec![1, 2, 3]);
    }

    #[test]
    fn we_can_order_commit_signatures_by_validator_address() {
        let engine = base64::engine::general_purpose::STANDARD;
        let (low, high) = (engine.encode([1u8; 65]), engine.encode([2u8; 65]));
        let body = format!(
            r#"{{"signed_header":{{"header":{{"chain_id":"heimdall-15001","height":"10"}},
            "commit":{{"round":"0","signatures":[
                {{"validator_address":"B1BF4473C6B1918A6E37408E1C14DF81281411A8","signature":"{high}"}},
                {{"validator_address":"","signature":null}},
                {{"validator_address":"A03D8F5AF7413E4FD5A37FDE9286E390EF8F3C07","signature":"{low}"}}
            ]}}}}}}"#
        );

        let commit = decode_commit(serde_json::from_str(&body).unwrap()).unwrap();
        assert_eq!(commit.signatures, vec![vec![1u8; 65], vec![2u8; 65]]);
    }

    #[test]
    fn we_can_read_an_empty_mempool() {
        let empty: RpcUnconfirmedTxs =
            serde_json::from_str(r#"{"n_txs":"0","total":"0","txs":null}"#).unwrap();
        assert!(empty.txs.is_none());

        let pending: RpcUnconfirmedTxs =
            serde_json::from_str(r#"{"n_txs":"1","total":"1","txs":["AQID"]}"#).unwrap();
        assert_eq!(pending.txs.unwrap(), vec!["AQID".to_string()]);
    }

    #[test]
    fn we_can_strip_the_transaction_prefix() {
        let tx = ConfirmedTx {
            height: 1,
            tx: vec![1, 2, 3, 4, 5, 6],
        };
        assert_eq!(tx.payload(), &[5, 6]);
        assert!(ConfirmedTx { height: 1, tx: vec![1] }.payload().is_empty());
    }

    #[test]
    fn we_can_detect_sequence_mismatches() {
        assert!(Error::Rejected {
            code: 4,
            log: String::new()
        }
        .is_sequence_mismatch());
        assert!(is_sequence_mismatch_log(
            "unauthorized: Invalid sequence. Got 7, expected 8"
        ));
        assert!(!Error::Rejected {
            code: 5,
            log: "insufficient funds".into()
        }
        .is_sequence_mismatch());
    }
}
