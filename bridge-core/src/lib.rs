//! # Bridge Core
//!
//! Shared domain types and the deterministic rules of the bridge. Nothing in this crate
//! performs I/O: listeners, processors and the broadcaster in `bridge-relayer` feed it
//! data they fetched and act on the decisions it returns.
//!
//! ## Modules
//! - [`event`]: chain events produced by the listeners.
//! - [`queue`]: broker routing keys, queue names and the queued message envelope.
//! - [`checkpoint`]: checkpoint range selection, no-ack timing and commit decisions.
//! - [`milestone`]: milestone proposals and the vote and persistence rules applied to them.
//! - [`clerk`]: state-sync records and their replay guard.
//! - [`msgs`]: messages sent to the consensus chain.
//! - [`staking`]: validator, proposer and account views of the consensus chain.

pub mod checkpoint;
pub mod clerk;
pub mod event;
pub mod milestone;
pub mod msgs;
pub mod queue;
pub mod staking;

/// Serde helpers for integers the consensus chain encodes as JSON strings.
pub mod string_u64;
