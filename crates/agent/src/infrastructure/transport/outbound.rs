//! Local outbound buffer used while the link is down.

use std::collections::{HashSet, VecDeque};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use gamelink_domain::{Message, MessageId};

pub const DEFAULT_OUTBOUND_CAPACITY: usize = 10_000;

/// What to do when the queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Evict the oldest queued message to make room.
    #[default]
    DropOldest,
    /// Refuse the new message.
    RejectNew,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "dropoldest" => Ok(Self::DropOldest),
            "rejectnew" => Ok(Self::RejectNew),
            other => Err(format!("unknown overflow policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// Queued after evicting this message.
    Evicted(MessageId),
    Rejected,
}

/// Bounded FIFO of messages waiting to be sent.
///
/// Items are only removed once they were sent, so a failed send leaves the
/// item and everything behind it in place.
pub struct OutboundQueue {
    items: Mutex<VecDeque<Message>>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOUND_CAPACITY, OverflowPolicy::default())
    }
}

impl OutboundQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            policy,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn push(&self, message: Message) -> Enqueued {
        let mut items = self.lock();
        if items.len() < self.capacity {
            items.push_back(message);
            return Enqueued::Queued;
        }

        match self.policy {
            OverflowPolicy::RejectNew => Enqueued::Rejected,
            OverflowPolicy::DropOldest => {
                let evicted = items.pop_front().map(|m| m.id());
                items.push_back(message);
                match evicted {
                    Some(id) => Enqueued::Evicted(id),
                    None => Enqueued::Queued,
                }
            }
        }
    }

    /// Copy of the head, left in place.
    pub fn front(&self) -> Option<Message> {
        self.lock().front().cloned()
    }

    /// Pop the head if it is still `id`.
    ///
    /// The head can change under a sender when `DropOldest` evicts it.
    pub fn remove_front(&self, id: MessageId) -> bool {
        let mut items = self.lock();
        if items.front().map(Message::id) == Some(id) {
            items.pop_front();
            true
        } else {
            false
        }
    }

    pub fn ids(&self) -> Vec<MessageId> {
        self.lock().iter().map(Message::id).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Message>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded memory of recently received message ids.
///
/// Used to keep inbound messages from being echoed back out and to drop
/// duplicates of a command that was delivered twice.
pub struct RecentIds {
    inner: Mutex<(HashSet<MessageId>, VecDeque<MessageId>)>,
    capacity: usize,
}

impl RecentIds {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new((HashSet::new(), VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    /// Record `id`. Returns `false` if it was already known.
    pub fn remember(&self, id: MessageId) -> bool {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let (set, order) = &mut *guard;
        if !set.insert(id) {
            return false;
        }
        order.push_back(id);
        if order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                set.remove(&oldest);
            }
        }
        true
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .0
            .contains(&id)
    }
}
