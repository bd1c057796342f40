//! # Bridge Store
//!
//! A `sled` database holding the relayer's local progress:
//!
//! - the last root-chain block scanned for logs (`rootchain-last-block`);
//! - the last consensus-chain height scanned for events (`heimdall-last-block`);
//! - the sequences of state-sync records already relayed;
//! - the ids of state-sync records already proposed to the child chain.
//!
//! Each key space has a single writer. The same database hosts the durable broker's queue
//! trees, so the store is opened once per process and shared through [`BridgeStore::db`].

use std::path::{Path, PathBuf};

use log::{debug, error};
use snafu::{ResultExt, Snafu};

/// Tree holding relayed state-sync sequences.
const RELAYED_SEQUENCES_TREE: &str = "clerk_relayed_sequences";

/// Tree holding record ids proposed to the child chain.
const PROPOSED_STATES_TREE: &str = "clerk_proposed_states";

/// Errors raised by the bridge store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The database could not be opened.
    ///
    /// - **Cause:** The path is not writable or another process holds the lock.
    /// - **Solution:** Check `--bridge-db` and make sure no other relayer uses the same path.
    #[snafu(display("Failed to open bridge store at {}: {source}", path.display()))]
    Open {
        /// Path of the database.
        path: PathBuf,
        /// Underlying sled error.
        source: sled::Error,
    },

    /// A read or write failed.
    #[snafu(display("Bridge store operation on '{key}' failed: {source}"))]
    Operation {
        /// Key or tree being accessed.
        key: String,
        /// Underlying sled error.
        source: sled::Error,
    },

    /// A stored value is not the expected 8-byte height.
    #[snafu(display("Corrupt value under '{key}': expected 8 bytes, found {length}"))]
    CorruptValue {
        /// Key being read.
        key: String,
        /// Length of the stored value.
        length: usize,
    },

    /// The store directory could not be removed.
    #[snafu(display("Failed to remove bridge store at {}: {source}", path.display()))]
    Remove {
        /// Path of the database.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Result alias for store operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Progress keys, one per listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKey {
    /// Root-chain log scanning.
    RootChainLastBlock,
    /// Consensus-chain event scanning.
    HeimdallLastBlock,
}

impl ProgressKey {
    /// The stored key name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressKey::RootChainLastBlock => "rootchain-last-block",
            ProgressKey::HeimdallLastBlock => "heimdall-last-block",
        }
    }
}

/// The relayer's local key-value store.
#[derive(Debug)]
pub struct BridgeStore {
    db: sled::Db,
    path: PathBuf,
}

impl BridgeStore {
    /// Opens, or creates, the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = sled::open(&path).context(OpenSnafu { path: path.clone() })?;
        debug!("Opened bridge store at {}", path.display());
        Ok(Self { db, path })
    }

    /// Opens a throwaway in-memory store.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .context(OpenSnafu {
                path: PathBuf::from(":memory:"),
            })?;
        Ok(Self {
            db,
            path: PathBuf::new(),
        })
    }

    /// Handle to the underlying database, for components that keep their own trees.
    pub fn db(&self) -> sled::Db {
        self.db.clone()
    }

    /// Path the store was opened at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The last processed height for `key`.
    pub fn last_block(&self, key: ProgressKey) -> Result<Option<u64>> {
        let name = key.as_str();
        let Some(value) = self.db.get(name).context(OperationSnafu { key: name })? else {
            return Ok(None);
        };

        let bytes: [u8; 8] = value.as_ref().try_into().map_err(|_| Error::CorruptValue {
            key: name.to_string(),
            length: value.len(),
        })?;
        Ok(Some(u64::from_be_bytes(bytes)))
    }

    /// Persists the last processed height for `key`.
    pub fn set_last_block(&self, key: ProgressKey, height: u64) -> Result<()> {
        let name = key.as_str();
        self.db
            .insert(name, height.to_be_bytes().to_vec())
            .context(OperationSnafu { key: name })?;
        self.db.flush().context(OperationSnafu { key: name })?;
        Ok(())
    }

    /// Whether a state-sync sequence was already relayed from this node.
    pub fn has_relayed_sequence(&self, sequence: u128) -> Result<bool> {
        self.has_marker(RELAYED_SEQUENCES_TREE, &sequence.to_be_bytes())
    }

    /// Records a state-sync sequence as relayed.
    pub fn mark_relayed_sequence(&self, sequence: u128) -> Result<()> {
        self.set_marker(RELAYED_SEQUENCES_TREE, &sequence.to_be_bytes())
    }

    /// Whether record `id` was already proposed to the child chain from this node.
    pub fn has_proposed_state(&self, id: u64) -> Result<bool> {
        self.has_marker(PROPOSED_STATES_TREE, &id.to_be_bytes())
    }

    /// Records `id` as proposed to the child chain.
    pub fn mark_proposed_state(&self, id: u64) -> Result<()> {
        self.set_marker(PROPOSED_STATES_TREE, &id.to_be_bytes())
    }

    fn has_marker(&self, tree: &str, key: &[u8]) -> Result<bool> {
        self.db
            .open_tree(tree)
            .and_then(|tree| tree.contains_key(key))
            .context(OperationSnafu { key: tree })
    }

    fn set_marker(&self, tree: &str, key: &[u8]) -> Result<()> {
        self.db
            .open_tree(tree)
            .and_then(|tree| tree.insert(key, Vec::<u8>::new()))
            .context(OperationSnafu { key: tree })?;
        self.db.flush().context(OperationSnafu { key: tree })?;
        Ok(())
    }

    /// Deletes the store directory at `path`.
    ///
    /// The store must not be open in this process.
    pub fn destroy(path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(path).context(RemoveSnafu {
            path: path.to_path_buf(),
        })?;
        Ok(true)
    }
}

impl Drop for BridgeStore {
    fn drop(&mut self) {
        if let Err(e) = self.db.flush() {
            error!("❌ Failed to flush bridge store on shutdown: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn we_can_persist_progress_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage");

        {
            let store = BridgeStore::open(&path).unwrap();
            assert_eq!(store.last_block(ProgressKey::RootChainLastBlock).unwrap(), None);
            store
                .set_last_block(ProgressKey::RootChainLastBlock, 1234)
                .unwrap();
            store.set_last_block(ProgressKey::HeimdallLastBlock, 99).unwrap();
        }

        let store = BridgeStore::open(&path).unwrap();
        assert_eq!(
            store.last_block(ProgressKey::RootChainLastBlock).unwrap(),
            Some(1234)
        );
        assert_eq!(
            store.last_block(ProgressKey::HeimdallLastBlock).unwrap(),
            Some(99)
        );
    }

    #[test]
    fn we_can_track_relayed_sequences() {
        let store = BridgeStore::temporary().unwrap();
        assert!(!store.has_relayed_sequence(1_000_001).unwrap());
        store.mark_relayed_sequence(1_000_001).unwrap();
        assert!(store.has_relayed_sequence(1_000_001).unwrap());
        assert!(!store.has_relayed_sequence(1_000_002).unwrap());
    }

    #[test]
    fn proposed_states_are_tracked_separately_from_sequences() {
        let store = BridgeStore::temporary().unwrap();
        store.mark_proposed_state(42).unwrap();
        assert!(store.has_proposed_state(42).unwrap());
        assert!(!store.has_proposed_state(43).unwrap());
        assert!(!store.has_relayed_sequence(42).unwrap());
    }

    #[test]
    fn we_cannot_read_a_corrupt_height() {
        let store = BridgeStore::temporary().unwrap();
        store.db().insert("heimdall-last-block", b"abc".as_slice()).unwrap();
        assert!(matches!(
            store.last_block(ProgressKey::HeimdallLastBlock),
            Err(Error::CorruptValue { length: 3, .. })
        ));
    }

    #[test]
    fn we_can_destroy_a_store_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage");
        drop(BridgeStore::open(&path).unwrap());

        assert!(BridgeStore::destroy(&path).unwrap());
        assert!(!path.exists());
        assert!(!BridgeStore::destroy(&path).unwrap());
    }
}
