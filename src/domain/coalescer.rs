//! Ordered buffer merging queued payloads into as few transmissions as
//! possible.
//!
//! The coalescer is not synchronized on its own. It lives inside a
//! [`BucketState`](crate::application::bucket::BucketState) and is only
//! touched while that bucket's lock is held.

use crate::domain::config::CoalescerConfig;
use std::collections::VecDeque;

/// A queued text payload. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPayload {
    content: String,
    length: usize,
}

impl PendingPayload {
    /// Wrap `content`, measuring its length in characters.
    pub fn new(content: impl Into<String>) -> Self {
        let content = content.into();
        let length = content.chars().count();
        Self { content, length }
    }

    /// The payload text.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Whether the payload has no content.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// One merged transmission produced by [`Coalescer::drain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Payloads joined by the configured separator
    pub content: String,
    /// Number of payloads merged into `content`
    pub payloads: usize,
    /// Payloads still queued after this batch
    pub remaining: usize,
}

/// FIFO buffer of outbound payloads for one endpoint.
///
/// # Example
/// ```
/// use dispatch_throttle::{Coalescer, CoalescerConfig};
///
/// let mut coalescer = Coalescer::new(CoalescerConfig::new(20, 10, "\n").unwrap());
/// assert_eq!(coalescer.append("hello"), 0);
/// assert_eq!(coalescer.append("world"), 2); // 11 chars crosses the soft limit
///
/// let batch = coalescer.drain().unwrap();
/// assert_eq!(batch.content, "hello\nworld");
/// assert_eq!(batch.remaining, 0);
/// assert!(coalescer.drain().is_none());
/// ```
#[derive(Debug, Clone)]
pub struct Coalescer {
    config: CoalescerConfig,
    queue: VecDeque<PendingPayload>,
    /// Sum of queued lengths plus one separator between each neighbour pair.
    running_length: usize,
}

impl Coalescer {
    /// Create an empty coalescer.
    pub fn new(config: CoalescerConfig) -> Self {
        Self {
            config,
            queue: VecDeque::new(),
            running_length: 0,
        }
    }

    /// Enqueue a payload and report whether a flush is due.
    ///
    /// An empty payload enqueues nothing, which lets callers check the
    /// backlog. Returns `0` while the backlog is below the soft limit,
    /// otherwise the number of queued payloads.
    pub fn append(&mut self, payload: impl Into<String>) -> usize {
        let payload = PendingPayload::new(payload);
        if !payload.is_empty() {
            if !self.queue.is_empty() {
                self.running_length += self.config.separator_len();
            }
            self.running_length += payload.len();
            self.queue.push_back(payload);
        }
        self.backlog_signal()
    }

    /// Remove, in order, as many payloads as fit in one transmission.
    ///
    /// Always removes at least one payload when the queue is non-empty, even
    /// one that alone exceeds the maximum payload size. Returns `None` if the
    /// queue was empty.
    pub fn drain(&mut self) -> Option<Batch> {
        let first = self.queue.pop_front()?;
        let separator_len = self.config.separator_len();
        let mut length = first.length;
        let mut content = first.content;
        let mut payloads = 1;

        while let Some(next) = self.queue.front() {
            let merged = length + separator_len + next.length;
            if merged > self.config.max_payload {
                break;
            }
            if let Some(next) = self.queue.pop_front() {
                content.push_str(&self.config.separator);
                content.push_str(&next.content);
                length = merged;
                payloads += 1;
            }
        }

        self.running_length = if self.queue.is_empty() {
            0
        } else {
            self.running_length - length - separator_len
        };

        Some(Batch {
            content,
            payloads,
            remaining: self.queue.len(),
        })
    }

    /// Number of queued payloads.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Characters a single merged transmission of the whole queue would need.
    pub fn running_length(&self) -> usize {
        self.running_length
    }

    /// The configuration this coalescer was built with.
    pub fn config(&self) -> &CoalescerConfig {
        &self.config
    }

    fn backlog_signal(&self) -> usize {
        if self.running_length < self.config.soft_limit {
            0
        } else {
            self.queue.len()
        }
    }
}
