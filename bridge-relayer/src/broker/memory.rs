//! Queues held in process memory.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use bridge_core::queue::QueuedMessage;

use super::{Error, QueueBackend, Result};

#[derive(Debug, Default)]
struct MemoryQueue {
    pending: VecDeque<(u64, QueuedMessage)>,
    inflight: BTreeMap<u64, QueuedMessage>,
    dead: Vec<QueuedMessage>,
    last_item_idx: u64,
}

impl MemoryQueue {
    fn append(&mut self, message: QueuedMessage) {
        self.last_item_idx += 1;
        self.pending.push_back((self.last_item_idx, message));
    }

    fn settle(&mut self, queue: &str, tag: u64) -> Result<QueuedMessage> {
        self.inflight.remove(&tag).ok_or_else(|| Error::UnknownDelivery {
            queue: queue.to_string(),
            tag,
        })
    }
}

/// A [`QueueBackend`] that forgets everything when dropped.
#[derive(Debug, Default)]
pub struct MemoryQueueBackend {
    queues: Mutex<HashMap<String, MemoryQueue>>,
}

impl MemoryQueueBackend {
    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, MemoryQueue>>> {
        self.queues.lock().map_err(|_| Error::Poisoned)
    }

    fn with_queue<T>(&self, queue: &str, f: impl FnOnce(&mut MemoryQueue) -> Result<T>) -> Result<T> {
        let mut queues = self.lock()?;
        let entry = queues.get_mut(queue).ok_or_else(|| Error::UnknownQueue {
            queue: queue.to_string(),
        })?;
        f(entry)
    }
}

impl QueueBackend for MemoryQueueBackend {
    fn declare(&self, queue: &str) -> Result<()> {
        self.lock()?.entry(queue.to_string()).or_default();
        Ok(())
    }

    fn push(&self, queue: &str, message: &QueuedMessage) -> Result<()> {
        self.with_queue(queue, |q| {
            q.append(message.clone());
            Ok(())
        })
    }

    fn take(&self, queue: &str) -> Result<Option<(u64, QueuedMessage)>> {
        self.with_queue(queue, |q| {
            Ok(q.pending.pop_front().map(|(tag, message)| {
                q.inflight.insert(tag, message.clone());
                (tag, message)
            }))
        })
    }

    fn ack(&self, queue: &str, tag: u64) -> Result<()> {
        self.with_queue(queue, |q| q.settle(queue, tag).map(|_| ()))
    }

    fn requeue(&self, queue: &str, tag: u64) -> Result<()> {
        self.with_queue(queue, |q| {
            let mut message = q.settle(queue, tag)?;
            message.redelivered = true;
            message.requeue_count = message.requeue_count.saturating_add(1);
            q.append(message);
            Ok(())
        })
    }

    fn dead_letter(&self, queue: &str, tag: u64) -> Result<()> {
        self.with_queue(queue, |q| {
            let message = q.settle(queue, tag)?;
            q.dead.push(message);
            Ok(())
        })
    }

    fn purge(&self, queue: &str) -> Result<usize> {
        self.with_queue(queue, |q| {
            let removed = q.pending.len() + q.inflight.len();
            q.pending.clear();
            q.inflight.clear();
            Ok(removed)
        })
    }

    fn recover(&self, queue: &str) -> Result<usize> {
        self.with_queue(queue, |q| {
            let tags: Vec<u64> = q.inflight.keys().copied().collect();
            for tag in &tags {
                let mut message = q.settle(queue, *tag)?;
                message.redelivered = true;
                q.append(message);
            }
            Ok(tags.len())
        })
    }

    fn len(&self, queue: &str) -> Result<usize> {
        self.with_queue(queue, |q| Ok(q.pending.len()))
    }

    fn dead_letter_count(&self, queue: &str) -> Result<usize> {
        self.with_queue(queue, |q| Ok(q.dead.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn we_cannot_use_an_undeclared_queue() {
        let backend = MemoryQueueBackend::default();
        assert!(matches!(
            backend.len("queue.name.clerk"),
            Err(Error::UnknownQueue { .. })
        ));
        backend.declare("queue.name.clerk").unwrap();
        assert_eq!(backend.len("queue.name.clerk").unwrap(), 0);
    }
}
