//! Datastore lifecycle events.
//!
//! Datastores do not own an event bus. They are handed an
//! [`EventPublisher`] and report what happens to them through it:
//!
//! - [`NoopPublisher`] discards everything
//! - [`BroadcastPublisher`] forwards events to any number of
//!   `tokio::sync::broadcast` subscribers

use tokio::sync::broadcast;
use tracing::trace;

use crate::data::Coords;
use crate::storage::StorageKind;

/// Identifier of a datastore within the process.
pub type DatastoreId = u64;

/// Something that happened to a datastore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatastoreEvent {
    /// A datastore was created; it has no storage yet.
    Created { id: DatastoreId },

    /// A storage backend was attached.
    StorageAttached { id: DatastoreId, kind: StorageKind },

    /// An image was stored.
    ImageAdded { id: DatastoreId, coords: Coords },

    /// The summary metadata was replaced.
    SummaryChanged { id: DatastoreId },

    /// The datastore was closed. Published once.
    Closed { id: DatastoreId },
}

impl DatastoreEvent {
    pub fn datastore_id(&self) -> DatastoreId {
        match self {
            DatastoreEvent::Created { id }
            | DatastoreEvent::StorageAttached { id, .. }
            | DatastoreEvent::ImageAdded { id, .. }
            | DatastoreEvent::SummaryChanged { id }
            | DatastoreEvent::Closed { id } => *id,
        }
    }
}

/// Capability to publish datastore events.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: &DatastoreEvent);
}

/// Publisher that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: &DatastoreEvent) {}
}

/// Default number of events a slow subscriber may fall behind by.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Publisher backed by a tokio broadcast channel.
///
/// Publishing never blocks. Events published while nobody is subscribed are
/// dropped, and subscribers that fall more than the channel capacity behind
/// observe `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<DatastoreEvent>,
}

impl BroadcastPublisher {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DatastoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: &DatastoreEvent) {
        if self.sender.send(event.clone()).is_err() {
            trace!(?event, "No subscribers for datastore event");
        }
    }
}
