//! Per-address queue of pre-committed nonce pairs
//!
//! Each address owns a head/tail cursor and entries stored at
//! `de(address, index)` for `head <= index < tail`. Enqueue writes at the
//! tail, dequeue reads and deletes at the head, so an entry can be handed
//! out once at most.

use tracing::debug;

use tessera_core::{KvStore, PubDe};

use crate::coordinator::Coordinator;
use crate::error::{Result, TssError};
use crate::events::Event;
use crate::keys;
use crate::types::DeQueue;

impl<S: KvStore> Coordinator<S> {
    pub fn get_de_queue(&self, address: &str) -> Result<DeQueue> {
        Ok(self.read(&keys::de_queue(address))?.unwrap_or_default())
    }

    fn set_de_queue(&mut self, address: &str, queue: &DeQueue) {
        self.write(keys::de_queue(address), queue);
    }

    pub fn de_count(&self, address: &str) -> Result<u64> {
        Ok(self.get_de_queue(address)?.len())
    }

    /// Queued entries starting `offset` places after the head
    pub fn list_des(&self, address: &str, offset: u64, limit: u64) -> Result<Vec<PubDe>> {
        let queue = self.get_de_queue(address)?;
        let start = queue.head.saturating_add(offset).min(queue.tail);
        let end = start.saturating_add(limit).min(queue.tail);
        let mut des = Vec::with_capacity((end - start) as usize);
        for index in start..end {
            if let Some(de) = self.read(&keys::de(address, index))? {
                des.push(de);
            }
        }
        Ok(des)
    }

    /// Append `des` to the tail of the queue
    pub fn enqueue_des(&mut self, address: &str, des: &[PubDe]) -> Result<()> {
        let mut queue = self.get_de_queue(address)?;
        let len = queue.len() + des.len() as u64;
        if len > self.params.max_de_size {
            return Err(TssError::DELimitExceeded {
                address: address.to_string(),
                len,
                max: self.params.max_de_size,
            });
        }

        for de in des {
            let seen = keys::de_seen(address, de);
            if self.store.has(&seen) {
                return Err(TssError::DEAlreadySubmitted(de.key_hex()));
            }
            // Marked before the write so duplicates inside one batch are caught too
            self.store.set(seen, Vec::new());
            self.write(keys::de(address, queue.tail), de);
            queue.tail += 1;
        }
        self.set_de_queue(address, &queue);

        self.emit(Event::DESubmitted {
            address: address.to_string(),
            count: des.len() as u64,
        });
        self.metrics.increment("tss_de_submitted", des.len() as u64);
        debug!(address, count = des.len(), queued = queue.len(), "DEs enqueued");
        Ok(())
    }

    /// Pop the oldest entry
    pub fn dequeue_de(&mut self, address: &str) -> Result<PubDe> {
        let mut queue = self.get_de_queue(address)?;
        if queue.is_empty() {
            return Err(TssError::DENotFound(address.to_string()));
        }

        let key = keys::de(address, queue.head);
        let de: PubDe = self
            .read(&key)?
            .ok_or_else(|| TssError::Corrupted(format!("missing DE {} of {}", queue.head, address)))?;
        self.store.delete(&key);
        queue.head += 1;
        self.set_de_queue(address, &queue);

        self.emit(Event::DEDequeued {
            address: address.to_string(),
            pub_de: de,
        });
        Ok(de)
    }

    /// Drain every queued entry
    pub fn reset_de(&mut self, address: &str) -> Result<u64> {
        let mut drained = 0;
        while !self.get_de_queue(address)?.is_empty() {
            self.dequeue_de(address)?;
            drained += 1;
        }
        debug!(address, drained, "DE queue reset");
        Ok(drained)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Params;
    use crate::types::BlockContext;
    use tessera_core::{signing::derive_de, MemStore};

    fn coordinator(max_de_size: u64) -> Coordinator<MemStore> {
        let params = Params {
            max_de_size,
            ..Params::default()
        };
        Coordinator::new(MemStore::new(), params, BlockContext::new("test")).unwrap()
    }

    fn des(from: u64, n: u64) -> Vec<PubDe> {
        (from..from + n).map(|i| derive_de(b"pool", i).unwrap().pub_de).collect()
    }

    #[test]
    fn test_fifo_order() {
        let mut c = coordinator(10);
        let batch = des(0, 3);
        c.enqueue_des("alice", &batch).unwrap();
        assert_eq!(c.de_count("alice").unwrap(), 3);
        for expected in &batch {
            assert_eq!(&c.dequeue_de("alice").unwrap(), expected);
        }
        assert!(matches!(c.dequeue_de("alice"), Err(TssError::DENotFound(_))));
        let queue = c.get_de_queue("alice").unwrap();
        assert_eq!((queue.head, queue.tail), (3, 3));
    }

    #[test]
    fn test_limit_counts_existing_entries() {
        let mut c = coordinator(4);
        c.enqueue_des("alice", &des(0, 3)).unwrap();
        assert!(matches!(
            c.enqueue_des("alice", &des(3, 2)),
            Err(TssError::DELimitExceeded { len: 5, max: 4, .. })
        ));
        c.dequeue_de("alice").unwrap();
        c.enqueue_des("alice", &des(3, 2)).unwrap();
        assert_eq!(c.de_count("alice").unwrap(), 4);
    }

    #[test]
    fn test_resubmitted_de_rejected() {
        let mut c = coordinator(10);
        let batch = des(0, 2);
        c.enqueue_des("alice", &batch).unwrap();
        c.dequeue_de("alice").unwrap();
        // Dequeued entries stay spent
        assert!(matches!(
            c.enqueue_des("alice", &batch[..1]),
            Err(TssError::DEAlreadySubmitted(_))
        ));
        assert!(matches!(
            c.enqueue_des("alice", &[batch[1], batch[1]]),
            Err(TssError::DEAlreadySubmitted(_))
        ));
    }

    #[test]
    fn test_copied_de_does_not_block_owner() {
        let mut c = coordinator(10);
        let batch = des(0, 2);
        // Someone else front-runs with the owner's public DEs
        c.enqueue_des("mallory", &batch).unwrap();
        c.enqueue_des("alice", &batch).unwrap();
        assert_eq!(c.de_count("alice").unwrap(), 2);
        assert_eq!(c.dequeue_de("alice").unwrap(), batch[0]);
    }

    #[test]
    fn test_reset_and_list() {
        let mut c = coordinator(10);
        let batch = des(0, 5);
        c.enqueue_des("alice", &batch).unwrap();
        assert_eq!(c.list_des("alice", 1, 2).unwrap(), batch[1..3].to_vec());
        assert_eq!(c.list_des("alice", 4, 10).unwrap(), batch[4..].to_vec());
        assert!(c.list_des("alice", 9, 1).unwrap().is_empty());

        assert_eq!(c.reset_de("alice").unwrap(), 5);
        assert_eq!(c.de_count("alice").unwrap(), 0);
        let dequeued = c
            .take_events()
            .into_iter()
            .filter(|e| matches!(e, Event::DEDequeued { .. }))
            .count();
        assert_eq!(dequeued, 5);
    }

    #[test]
    fn test_queues_are_per_address() {
        let mut c = coordinator(10);
        c.enqueue_des("alice", &des(0, 1)).unwrap();
        c.enqueue_des("bob", &des(1, 2)).unwrap();
        assert_eq!(c.de_count("alice").unwrap(), 1);
        assert_eq!(c.de_count("bob").unwrap(), 2);
    }
}
