//! Event bus - fans desktop events out to subscribers.
//!
//! Publishing never blocks: each subscriber has a bounded buffer, and when a
//! subscriber falls behind the oldest buffered event is shed and counted.
//! Each subscriber owns its queue, and only events passing its predicate
//! take up room in it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures_util::stream::{self, Stream};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info};

use duckbot_core::{DesktopEvent, EventKind};

/// Event bus errors.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Event bus is closed")]
    Closed,
}

type Predicate = Box<dyn Fn(&DesktopEvent) -> bool + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-subscriber buffer.
struct Slot {
    queue: Mutex<VecDeque<DesktopEvent>>,
    notify: Notify,
    predicate: Predicate,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl Slot {
    /// Buffer an event, shedding the oldest when full. Returns true on shed.
    fn push(&self, event: DesktopEvent, capacity: usize) -> bool {
        let shed = {
            let mut queue = lock(&self.queue);
            let shed = if queue.len() >= capacity {
                queue.pop_front();
                true
            } else {
                false
            };
            queue.push_back(event);
            shed
        };
        if shed {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        shed
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

struct BusState {
    next_seq: u64,
    next_subscriber: u64,
    subscribers: HashMap<u64, Arc<Slot>>,
    closed: bool,
}

struct BusInner {
    capacity: usize,
    state: Mutex<BusState>,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl BusInner {
    fn unsubscribe(&self, id: u64) {
        if lock(&self.state).subscribers.remove(&id).is_some() {
            debug!(subscriber = id, "Subscriber cancelled");
        }
    }
}

/// Counters exposed for metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub published: u64,
    pub dropped: u64,
    pub subscribers: usize,
}

/// Fan-out bus for desktop events. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                capacity: capacity.max(1),
                state: Mutex::new(BusState {
                    next_seq: 0,
                    next_subscriber: 0,
                    subscribers: HashMap::new(),
                    closed: false,
                }),
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Publish an event to every matching subscriber.
    ///
    /// Assigns and returns the event's sequence number. Never waits on
    /// subscribers.
    pub fn publish(&self, mut event: DesktopEvent) -> Result<u64, BusError> {
        let mut state = lock(&self.inner.state);
        if state.closed {
            return Err(BusError::Closed);
        }
        state.next_seq += 1;
        let seq = state.next_seq;
        event.seq = seq;

        // Delivering under the state lock keeps each subscriber's buffer in
        // sequence order even with concurrent publishers.
        for (id, slot) in &state.subscribers {
            if !(slot.predicate)(&event) {
                continue;
            }
            if slot.push(event.clone(), self.inner.capacity) {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(subscriber = *id, seq, "Subscriber lagging, dropped oldest event");
            }
        }
        drop(state);

        self.inner.published.fetch_add(1, Ordering::Relaxed);
        debug!(seq, kind = event.kind().as_str(), "Event published");
        Ok(seq)
    }

    /// Subscribe to events matching a predicate.
    pub fn subscribe<F>(&self, predicate: F) -> Subscription
    where
        F: Fn(&DesktopEvent) -> bool + Send + Sync + 'static,
    {
        let slot = Arc::new(Slot {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            predicate: Box::new(predicate),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        let mut state = lock(&self.inner.state);
        state.next_subscriber += 1;
        let id = state.next_subscriber;
        if state.closed {
            slot.close();
        } else {
            state.subscribers.insert(id, slot.clone());
        }
        debug!(subscriber = id, "Subscriber registered");

        Subscription {
            id,
            slot,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribe to every event.
    pub fn subscribe_all(&self) -> Subscription {
        self.subscribe(|_| true)
    }

    /// Subscribe to events of the given kinds.
    pub fn subscribe_kinds(&self, kinds: &[EventKind]) -> Subscription {
        let kinds = kinds.to_vec();
        self.subscribe(move |event| kinds.contains(&event.kind()))
    }

    /// Close the bus. Subscribers drain what is buffered, then end.
    pub fn close(&self) {
        let mut state = lock(&self.inner.state);
        if state.closed {
            return;
        }
        state.closed = true;
        for slot in state.subscribers.values() {
            slot.close();
        }
        state.subscribers.clear();
        info!("Event bus closed");
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner.state).closed
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            subscribers: lock(&self.inner.state).subscribers.len(),
        }
    }
}

/// A subscriber's view of the bus. Dropping it unsubscribes immediately.
pub struct Subscription {
    id: u64,
    slot: Arc<Slot>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Wait for the next event. Returns `None` once the bus is closed and
    /// the buffer is drained.
    pub async fn recv(&mut self) -> Option<DesktopEvent> {
        loop {
            if let Some(event) = self.try_recv() {
                return Some(event);
            }
            if self.slot.closed.load(Ordering::Acquire) {
                // Close may have raced with a final push.
                return self.try_recv();
            }
            self.slot.notify.notified().await;
        }
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<DesktopEvent> {
        lock(&self.slot.queue).pop_front()
    }

    /// Events shed from this subscriber's buffer so far.
    pub fn dropped(&self) -> u64 {
        self.slot.dropped.load(Ordering::Relaxed)
    }

    /// Turn the subscription into a stream of events.
    pub fn into_stream(self) -> impl Stream<Item = DesktopEvent> + Send {
        stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_subscriber_sees_publish_order() {
        let bus = EventBus::new(1024);
        let mut sub = bus.subscribe_all();

        let mut producers = Vec::new();
        for p in 0..4 {
            let bus = bus.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..100 {
                    bus.publish(DesktopEvent::window_focused(format!("app-{p}-{i}")))
                        .unwrap();
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }

        let mut last = 0;
        for _ in 0..400 {
            let event = sub.recv().await.unwrap();
            assert!(event.seq > last, "seq {} after {}", event.seq, last);
            last = event.seq;
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest() {
        let bus = EventBus::new(4);
        let mut sub = bus.subscribe_all();

        for i in 0..10 {
            bus.publish(DesktopEvent::workspace_changed(i.to_string()))
                .unwrap();
        }

        assert_eq!(sub.dropped(), 6);
        assert_eq!(bus.stats().dropped, 6);
        let seqs: Vec<u64> = std::iter::from_fn(|| sub.try_recv())
            .map(|e| e.seq)
            .collect();
        assert_eq!(seqs, vec![7, 8, 9, 10]);
    }

    #[tokio::test]
    async fn test_predicate_filters() {
        let bus = EventBus::new(16);
        let mut voice = bus.subscribe_kinds(&[EventKind::VoiceCommand]);

        bus.publish(DesktopEvent::window_focused("editor")).unwrap();
        bus.publish(DesktopEvent::voice_command("open terminal"))
            .unwrap();

        let event = voice.recv().await.unwrap();
        assert_eq!(event.kind(), EventKind::VoiceCommand);
        assert!(voice.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let bus = EventBus::new(16);
        let sub = bus.subscribe_all();
        assert_eq!(bus.stats().subscribers, 1);
        drop(sub);
        assert_eq!(bus.stats().subscribers, 0);
        // Publishing with no subscribers still succeeds.
        assert_eq!(bus.publish(DesktopEvent::window_focused("x")).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends_stream() {
        let bus = EventBus::new(16);
        let stream = bus.subscribe_all().into_stream();
        bus.publish(DesktopEvent::window_focused("a")).unwrap();
        bus.publish(DesktopEvent::window_focused("b")).unwrap();
        bus.close();

        let events: Vec<DesktopEvent> = stream.collect().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(
            bus.publish(DesktopEvent::window_focused("c")),
            Err(BusError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_recv_wakes_on_publish() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe_all();
        let waiter = tokio::spawn(async move { sub.recv().await.map(|e| e.seq) });
        tokio::task::yield_now().await;
        bus.publish(DesktopEvent::window_focused("a")).unwrap();
        assert_eq!(waiter.await.unwrap(), Some(1));
    }
}
