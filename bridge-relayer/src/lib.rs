//! # Bridge Relayer
//!
//! Runs beside a consensus-chain validator and carries state between three chains: the root
//! chain, the child chain and the consensus chain.
//!
//! ## Pipeline
//! 1. A [`listener`] per chain watches new heads and publishes detected events.
//! 2. The [`broker`] routes each event to the queue of its domain.
//! 3. A [`processor`] per domain decides whether an event warrants an outbound transaction.
//! 4. The [`broadcaster`] signs and submits that transaction.
//!
//! Each validator runs its own relayer, so every processor is idempotent and most
//! duplicate submissions are rejected on chain.

/// Retry helpers with exponential backoff for calls to flaky endpoints.
pub mod backoff;

/// Signing and submission of consensus-chain and child-chain transactions.
///
/// The broadcaster caches the signer's account sequence and refetches it whenever a
/// submission fails.
pub mod broadcaster;

/// The topic exchange and the durable per-domain queues between listeners and processors.
pub mod broker;

/// Access to the EVM chains: new heads, headers by number and log filtering.
pub mod chain;

/// Command line and environment configuration.
pub mod config;

/// The shared application context.
pub mod context;

/// Root-chain and child-chain contract bindings built with `sol!`.
pub mod contracts;

/// Client for the consensus chain's REST server and Tendermint RPC.
pub mod heimdall;

/// Chain listeners that turn new heads into queued events.
pub mod listener;

/// Per-domain processors and the checkpoint engine.
pub mod processor;

/// The validator's signing key.
pub mod signer;

/// Local progress and replay markers, persisted in `sled`.
pub mod store;

/// Mocks shared by the unit tests.
#[cfg(test)]
pub mod testing;
