//! In-process publish/subscribe bus.
//!
//! `publish` is synchronous: it returns after every matching subscriber ran.
//! Subscribers that have real work to do register with
//! [`MessageBus::subscribe_queued`] and drain a channel on their own task, so
//! the publisher is never blocked on them.
//!
//! The subscriber list is copy-on-write. Registration swaps in a new `Arc`'d
//! vector under a short write lock; `publish` clones the current `Arc` and
//! iterates that snapshot without holding any lock, so handlers may freely
//! subscribe, unsubscribe or publish re-entrantly.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use gamelink_domain::{Message, MessageError, MessageKind, MessagePayload, ServerId};
use tokio::sync::mpsc;

use crate::clock::{ClockPort, SystemClock};

type Handler = Arc<dyn Fn(&Message) -> anyhow::Result<()> + Send + Sync>;

/// Which messages a subscriber wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageFilter {
    All,
    Kind(MessageKind),
    Type(&'static str),
    /// Any of several message types.
    Types(&'static [&'static str]),
}

impl MessageFilter {
    /// Filter on a concrete payload type.
    pub fn of<T: MessagePayload>() -> Self {
        Self::Type(T::MESSAGE_TYPE)
    }

    pub fn matches(&self, message: &Message) -> bool {
        match self {
            Self::All => true,
            Self::Kind(kind) => message.kind() == *kind,
            Self::Type(tag) => message.message_type() == *tag,
            Self::Types(tags) => tags.iter().any(|tag| *tag == message.message_type()),
        }
    }
}

/// Outcome of a single `publish`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

impl PublishReport {
    pub fn matched(&self) -> usize {
        self.delivered + self.failed
    }
}

struct Subscriber {
    id: u64,
    filter: MessageFilter,
    handler: Handler,
}

struct BusInner {
    subscribers: RwLock<Arc<Vec<Arc<Subscriber>>>>,
    next_id: AtomicU64,
    clock: Arc<dyn ClockPort>,
}

impl BusInner {
    fn snapshot(&self) -> Arc<Vec<Arc<Subscriber>>> {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remove(&self, id: u64) {
        let mut guard = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if guard.iter().any(|s| s.id == id) {
            let next: Vec<_> = guard.iter().filter(|s| s.id != id).cloned().collect();
            *guard = Arc::new(next);
        }
    }
}

/// Process-local message bus. Cloning shares the same subscriber set.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock::new()))
    }
}

impl MessageBus {
    pub fn new(clock: Arc<dyn ClockPort>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(Arc::new(Vec::new())),
                next_id: AtomicU64::new(1),
                clock,
            }),
        }
    }

    pub fn clock(&self) -> &Arc<dyn ClockPort> {
        &self.inner.clock
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.snapshot().len()
    }

    /// Register `handler` for messages matching `filter`.
    ///
    /// The handler runs on the publisher's call stack. Dropping the returned
    /// [`Subscription`] removes it.
    pub fn subscribe<F>(&self, filter: MessageFilter, handler: F) -> Subscription
    where
        F: Fn(&Message) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Arc::new(Subscriber {
            id,
            filter,
            handler: Arc::new(handler),
        });

        let mut guard = self
            .inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(subscriber);
        *guard = Arc::new(next);

        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Register a handler that receives the decoded payload of `T`.
    pub fn subscribe_to<T, F>(&self, handler: F) -> Subscription
    where
        T: MessagePayload,
        F: Fn(&Message, T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(MessageFilter::of::<T>(), move |message| {
            let payload = message.payload::<T>()?;
            handler(message, payload)
        })
    }

    /// Register a subscriber whose handler only enqueues.
    ///
    /// Messages land on a bounded channel that the caller drains on its own
    /// task. A full or closed channel counts as a failed delivery for that
    /// message.
    pub fn subscribe_queued(
        &self,
        filter: MessageFilter,
        capacity: usize,
    ) -> (Subscription, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let subscription = self.subscribe(filter, move |message| {
            tx.try_send(message.clone()).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => anyhow::anyhow!("subscriber queue is full"),
                mpsc::error::TrySendError::Closed(_) => {
                    anyhow::anyhow!("subscriber queue is closed")
                }
            })
        });
        (subscription, rx)
    }

    /// Deliver `message` to every matching subscriber.
    ///
    /// A subscriber that errors or panics is logged and skipped; the rest
    /// still run and nothing reaches the caller.
    pub fn publish(&self, message: &Message) -> PublishReport {
        let snapshot = self.inner.snapshot();
        let mut report = PublishReport::default();

        for subscriber in snapshot.iter().filter(|s| s.filter.matches(message)) {
            let handler = &subscriber.handler;
            match panic::catch_unwind(AssertUnwindSafe(|| handler(message))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    tracing::warn!(
                        message_type = %message.message_type(),
                        message_id = %message.id(),
                        subscriber = subscriber.id,
                        error = %e,
                        "Subscriber failed to handle message"
                    );
                }
                Err(panic) => {
                    report.failed += 1;
                    tracing::error!(
                        message_type = %message.message_type(),
                        message_id = %message.id(),
                        subscriber = subscriber.id,
                        panic = %panic_message(panic.as_ref()),
                        "Subscriber panicked while handling message"
                    );
                }
            }
        }

        tracing::trace!(
            message_type = %message.message_type(),
            delivered = report.delivered,
            failed = report.failed,
            "Published message"
        );
        report
    }

    /// Build a command for `target` stamped with this bus's clock.
    pub fn create_command<T: MessagePayload>(
        &self,
        target: ServerId,
        configure: impl FnOnce(&mut T),
    ) -> Result<Message, MessageError> {
        Message::command::<T>(target, self.inner.clock.now(), configure)
    }

    /// Build an event stamped with this bus's clock.
    pub fn create_event<T: MessagePayload>(
        &self,
        server_id: Option<ServerId>,
        configure: impl FnOnce(&mut T),
    ) -> Result<Message, MessageError> {
        Message::event::<T>(server_id, self.inner.clock.now(), configure)
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Handle returned by `subscribe*`. Dropping it deregisters the subscriber.
#[must_use = "dropping a Subscription immediately unsubscribes"]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Keep the subscriber registered for the lifetime of the bus.
    pub fn detach(mut self) {
        self.bus = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
