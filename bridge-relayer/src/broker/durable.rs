//! Queues persisted in `sled`.
//!
//! Every queue owns three trees. `queue_{name}` holds pending messages under
//! `"item" ‖ be_u64(index)` and the index counter under `last_item_idx`.
//! `queue_{name}_inflight` and `queue_{name}_dead` hold messages by delivery tag.

use bridge_core::queue::QueuedMessage;
use log::trace;
use sled::transaction::{ConflictableTransactionResult, TransactionalTree};
use sled::{Db, Transactional, Tree};
use snafu::ResultExt;

use super::{CodecSnafu, Error, QueueBackend, Result, StorageSnafu, TransactionSnafu};

const ITEM_PREFIX: &[u8; 4] = b"item";
const LAST_ITEM_IDX: &str = "last_item_idx";

/// The trees backing one queue.
struct QueueTrees {
    pending: Tree,
    inflight: Tree,
    dead: Tree,
}

/// A [`QueueBackend`] stored in a `sled` database.
#[derive(Debug, Clone)]
pub struct SledQueueBackend {
    db: Db,
}

impl SledQueueBackend {
    /// Stores queues in `db`, usually the bridge store's database.
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn trees(&self, queue: &str) -> Result<QueueTrees> {
        let open = |name: String| self.db.open_tree(name).context(StorageSnafu { queue });
        Ok(QueueTrees {
            pending: open(format!("queue_{queue}"))?,
            inflight: open(format!("queue_{queue}_inflight"))?,
            dead: open(format!("queue_{queue}_dead"))?,
        })
    }

    fn flush(&self, queue: &str) -> Result<()> {
        self.db.flush().context(StorageSnafu { queue })?;
        Ok(())
    }

    /// Moves an inflight message back to the tail of its queue, counting a failed attempt when `counted`.
    fn put_back(&self, queue: &str, tag: u64, counted: bool) -> Result<()> {
        let trees = self.trees(queue)?;
        let value = trees
            .inflight
            .get(tag_key(tag))
            .context(StorageSnafu { queue })?
            .ok_or_else(|| Error::UnknownDelivery {
                queue: queue.to_string(),
                tag,
            })?;
        let mut message: QueuedMessage =
            serde_json::from_slice(&value).context(CodecSnafu { queue })?;
        message.redelivered = true;
        if counted {
            message.requeue_count = message.requeue_count.saturating_add(1);
        }
        let bytes = serde_json::to_vec(&message).context(CodecSnafu { queue })?;

        (&trees.inflight, &trees.pending)
            .transaction(
                |(inflight, pending)| -> ConflictableTransactionResult<(), std::io::Error> {
                    inflight.remove(tag_key(tag))?;
                    append_pending(pending, &bytes)?;
                    Ok(())
                },
            )
            .context(TransactionSnafu { queue })?;
        self.flush(queue)
    }
}

fn item_key(index: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(ITEM_PREFIX.len() + 8);
    key.extend_from_slice(ITEM_PREFIX);
    key.extend_from_slice(&index.to_be_bytes());
    key
}

fn tag_key(tag: u64) -> Vec<u8> {
    tag.to_be_bytes().to_vec()
}

fn decode_index(bytes: &[u8]) -> u64 {
    let mut output = [0u8; 8];
    let tail = bytes.len().saturating_sub(8);
    let tail = &bytes[tail..];
    output[8 - tail.len()..].copy_from_slice(tail);
    u64::from_be_bytes(output)
}

/// Appends `value` to the pending tree inside a transaction.
fn append_pending(
    pending: &TransactionalTree,
    value: &[u8],
) -> ConflictableTransactionResult<u64, std::io::Error> {
    let last_item_idx = match pending.get(LAST_ITEM_IDX)? {
        Some(v) => decode_index(&v),
        None => 0u64,
    };
    let next_idx = last_item_idx + 1;
    pending.insert(LAST_ITEM_IDX, next_idx.to_be_bytes().to_vec())?;
    pending.insert(item_key(next_idx), value.to_vec())?;
    Ok(next_idx)
}

impl QueueBackend for SledQueueBackend {
    fn declare(&self, queue: &str) -> Result<()> {
        self.trees(queue).map(|_| ())
    }

    fn push(&self, queue: &str, message: &QueuedMessage) -> Result<()> {
        let trees = self.trees(queue)?;
        let bytes = serde_json::to_vec(message).context(CodecSnafu { queue })?;
        let index = trees
            .pending
            .transaction(|pending| append_pending(pending, &bytes))
            .context(TransactionSnafu { queue })?;
        trace!("enqueued item {index} on {queue}");
        self.flush(queue)
    }

    fn take(&self, queue: &str) -> Result<Option<(u64, QueuedMessage)>> {
        let trees = self.trees(queue)?;
        loop {
            let Some(entry) = trees.pending.scan_prefix(ITEM_PREFIX).next() else {
                return Ok(None);
            };
            let (key, value) = entry.context(StorageSnafu { queue })?;
            let tag = decode_index(&key);

            let moved = (&trees.pending, &trees.inflight)
                .transaction(
                    |(pending, inflight)| -> ConflictableTransactionResult<bool, std::io::Error> {
                        match pending.remove(key.clone())? {
                            Some(value) => {
                                inflight.insert(tag_key(tag), value)?;
                                Ok(true)
                            }
                            None => Ok(false),
                        }
                    },
                )
                .context(TransactionSnafu { queue })?;
            if !moved {
                continue;
            }
            self.flush(queue)?;

            let message = serde_json::from_slice(&value).context(CodecSnafu { queue })?;
            return Ok(Some((tag, message)));
        }
    }

    fn ack(&self, queue: &str, tag: u64) -> Result<()> {
        let trees = self.trees(queue)?;
        trees
            .inflight
            .remove(tag_key(tag))
            .context(StorageSnafu { queue })?
            .ok_or_else(|| Error::UnknownDelivery {
                queue: queue.to_string(),
                tag,
            })?;
        self.flush(queue)
    }

    fn requeue(&self, queue: &str, tag: u64) -> Result<()> {
        self.put_back(queue, tag, true)
    }

    fn dead_letter(&self, queue: &str, tag: u64) -> Result<()> {
        let trees = self.trees(queue)?;
        let moved = (&trees.inflight, &trees.dead)
            .transaction(
                |(inflight, dead)| -> ConflictableTransactionResult<bool, std::io::Error> {
                    match inflight.remove(tag_key(tag))? {
                        Some(value) => {
                            dead.insert(tag_key(tag), value)?;
                            Ok(true)
                        }
                        None => Ok(false),
                    }
                },
            )
            .context(TransactionSnafu { queue })?;
        if !moved {
            return Err(Error::UnknownDelivery {
                queue: queue.to_string(),
                tag,
            });
        }
        self.flush(queue)
    }

    fn purge(&self, queue: &str) -> Result<usize> {
        let trees = self.trees(queue)?;
        let mut removed = 0;
        for entry in trees.pending.scan_prefix(ITEM_PREFIX) {
            let (key, _) = entry.context(StorageSnafu { queue })?;
            trees.pending.remove(key).context(StorageSnafu { queue })?;
            removed += 1;
        }
        removed += trees.inflight.len();
        trees.inflight.clear().context(StorageSnafu { queue })?;
        self.flush(queue)?;
        Ok(removed)
    }

    fn recover(&self, queue: &str) -> Result<usize> {
        let trees = self.trees(queue)?;
        let tags = trees
            .inflight
            .iter()
            .keys()
            .map(|key| key.map(|key| decode_index(&key)))
            .collect::<Result<Vec<_>, _>>()
            .context(StorageSnafu { queue })?;
        for tag in &tags {
            self.put_back(queue, *tag, false)?;
        }
        Ok(tags.len())
    }

    fn len(&self, queue: &str) -> Result<usize> {
        Ok(self.trees(queue)?.pending.scan_prefix(ITEM_PREFIX).count())
    }

    fn dead_letter_count(&self, queue: &str) -> Result<usize> {
        Ok(self.trees(queue)?.dead.len())
    }
}
