//! # Broadcast Hub
//!
//! Fans one ordered, single-pass segment sequence out to a fixed set of
//! subscribers. Each subscriber owns a bounded queue fed by the publisher's
//! sequential dispatch loop, so every subscriber sees the same events in the same
//! order, terminal signal last.
//!
//! There is no buffering or replay: a subscription only receives events
//! dispatched after it was registered. Whoever assembles a pipeline must register
//! every subscriber before handing the publisher to the producer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::{Segment, SourceError};

/// Event delivered to hub subscribers.
#[derive(Debug, Clone)]
pub enum HubEvent {
    Segment(Arc<Segment>),
    /// The producer finished successfully. Nothing follows.
    Finished,
    /// The producer failed. Nothing follows.
    Failed(SourceError),
}

#[derive(Default)]
struct Registry {
    senders: Vec<mpsc::Sender<HubEvent>>,
    terminated: bool,
}

struct HubShared {
    registry: Mutex<Registry>,
    capacity: usize,
    emitted: AtomicU64,
}

/// Subscription side of the hub. Cheap to clone.
#[derive(Clone)]
pub struct BroadcastHub {
    shared: Arc<HubShared>,
}

impl BroadcastHub {
    /// Creates a hub and its only publisher. `capacity` bounds each subscriber queue.
    pub fn new(capacity: usize) -> (Self, HubPublisher) {
        let shared = Arc::new(HubShared {
            registry: Mutex::new(Registry::default()),
            capacity: capacity.max(1),
            emitted: AtomicU64::new(0),
        });
        let hub = Self {
            shared: Arc::clone(&shared),
        };
        let publisher = HubPublisher {
            shared,
            terminated: false,
        };
        (hub, publisher)
    }

    /// Registers a subscriber. It receives only events dispatched from now on;
    /// after the terminal signal it receives nothing and sees a closed queue.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.shared.capacity);
        let mut registry = self.shared.registry.lock();
        if registry.terminated {
            debug!("Subscription registered after the terminal signal");
        } else {
            registry.senders.push(tx);
        }
        Subscription { rx, segments: 0 }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.registry.lock().senders.len()
    }

    /// Number of segments the publisher has emitted so far.
    pub fn emitted(&self) -> u64 {
        self.shared.emitted.load(Ordering::Acquire)
    }
}

/// Receiving end of one hub subscriber.
pub struct Subscription {
    rx: mpsc::Receiver<HubEvent>,
    segments: u64,
}

impl Subscription {
    /// Next event, or `None` once the hub has closed this queue.
    pub async fn recv(&mut self) -> Option<HubEvent> {
        let event = self.rx.recv().await;
        if let Some(HubEvent::Segment(_)) = &event {
            self.segments += 1;
        }
        event
    }

    /// Number of segments received through this subscription.
    pub fn segments_received(&self) -> u64 {
        self.segments
    }
}

/// Producer side of the hub. Exactly one exists per hub.
///
/// The terminal methods consume the publisher, so nothing can be emitted after a
/// terminal signal. Dropping it without one closes every subscriber queue.
pub struct HubPublisher {
    shared: Arc<HubShared>,
    terminated: bool,
}

impl HubPublisher {
    /// Delivers a segment to every current subscriber, in order.
    ///
    /// Returns `false` once no subscriber is listening any more, so producers may
    /// stop early.
    pub async fn emit(&mut self, segment: Segment) -> bool {
        let sequence_number = segment.sequence_number();
        let event = HubEvent::Segment(Arc::new(segment));
        let delivered = self.dispatch(event).await;
        self.shared.emitted.fetch_add(1, Ordering::AcqRel);
        trace!(sequence_number, delivered, "Segment dispatched");
        delivered > 0
    }

    pub async fn complete_success(mut self) {
        let delivered = self.dispatch(HubEvent::Finished).await;
        debug!(delivered, "Hub finished");
        self.seal();
    }

    pub async fn complete_failure(mut self, error: SourceError) {
        let delivered = self.dispatch(HubEvent::Failed(error)).await;
        debug!(delivered, "Hub failed");
        self.seal();
    }

    pub fn has_subscribers(&self) -> bool {
        self.shared
            .registry
            .lock()
            .senders
            .iter()
            .any(|tx| !tx.is_closed())
    }

    async fn dispatch(&self, event: HubEvent) -> usize {
        // Snapshot so the lock is never held across an await.
        let senders = self.shared.registry.lock().senders.clone();

        let mut delivered = 0;
        for tx in &senders {
            if tx.send(event.clone()).await.is_ok() {
                delivered += 1;
            }
        }

        if delivered < senders.len() {
            let mut registry = self.shared.registry.lock();
            registry.senders.retain(|tx| !tx.is_closed());
            debug!(
                remaining = registry.senders.len(),
                "Pruned closed hub subscribers"
            );
        }
        delivered
    }

    fn seal(&mut self) {
        self.terminated = true;
        let mut registry = self.shared.registry.lock();
        registry.terminated = true;
        registry.senders.clear();
    }
}

impl Drop for HubPublisher {
    fn drop(&mut self) {
        if !self.terminated {
            warn!("Hub publisher dropped without a terminal signal");
            self.seal();
        }
    }
}
