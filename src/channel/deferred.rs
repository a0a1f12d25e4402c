// src/channel/deferred.rs
//! FIFO of messages produced before the channel is established.

use crate::config::{ChannelConfig, OverflowPolicy};
use crate::error::BridgeError;
use crate::protocol::{Destination, Payload};
use log::warn;
use std::collections::VecDeque;

/// An outbound message captured while unconnected.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredMessage {
    pub destination: Destination,
    pub payload: Payload,
}

/// Enqueue-order buffer. No priorities, no coalescing, no deduplication.
#[derive(Debug)]
pub struct DeferredQueue {
    entries: VecDeque<DeferredMessage>,
    limit: Option<usize>,
    overflow: OverflowPolicy,
    evicted: u64,
}

impl DeferredQueue {
    pub fn new(config: &ChannelConfig) -> Self {
        Self {
            entries: VecDeque::new(),
            limit: config.deferred_limit,
            overflow: config.overflow,
            evicted: 0,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(&ChannelConfig::default())
    }

    pub fn enqueue(&mut self, message: DeferredMessage) -> Result<(), BridgeError> {
        if let Some(limit) = self.limit {
            if self.entries.len() >= limit {
                match self.overflow {
                    OverflowPolicy::RejectNew => {
                        warn!(
                            "DeferredQueue: full at {} messages, rejecting {:?}",
                            limit, message.payload
                        );
                        return Err(BridgeError::QueueFull { limit });
                    }
                    OverflowPolicy::DropOldest => {
                        if let Some(oldest) = self.entries.pop_front() {
                            self.evicted += 1;
                            warn!(
                                "DeferredQueue: full at {} messages, evicted oldest {:?}",
                                limit, oldest.payload
                            );
                        }
                    }
                }
            }
        }
        self.entries.push_back(message);
        Ok(())
    }

    /// Removes and returns the oldest message.
    pub fn pop_front(&mut self) -> Option<DeferredMessage> {
        self.entries.pop_front()
    }

    /// Puts a message back at the head, ahead of everything still queued.
    pub fn push_front(&mut self, message: DeferredMessage) {
        self.entries.push_front(message);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of messages discarded by the `DropOldest` policy.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeferredMessage> {
        self.entries.iter()
    }
}
