//! Fan-out of server events to the members of one room.
//!
//! The event is encoded once and the shared frame is pushed onto each
//! recipient's unbounded queue. Delivery is fire-and-forget: no acks, no
//! retries, no backpressure. A recipient whose queue is gone is counted as
//! a dropped delivery and skipped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::protocol::{ConnectionId, ProtocolError, ServerEvent};
use crate::registry::ConnectionRegistry;
use crate::room::Room;

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Events fanned out (one per broadcast call)
    pub broadcasts: u64,
    /// Frames queued to individual recipients
    pub deliveries: u64,
    /// Frames whose recipient queue was already closed
    pub dropped: u64,
}

/// Stats are tracked via atomics so broadcasting never takes a stats lock.
#[derive(Default)]
struct AtomicBroadcastStats {
    broadcasts: AtomicU64,
    deliveries: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Clone)]
pub struct Broadcaster {
    registry: ConnectionRegistry,
    stats: Arc<AtomicBroadcastStats>,
}

impl Broadcaster {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self {
            registry,
            stats: Arc::new(AtomicBroadcastStats::default()),
        }
    }

    /// Deliver `event` to every member of `room` except `exclude`.
    ///
    /// Call while holding the room lock so that broadcasts leave in the
    /// order their mutations were applied. Returns the number of frames
    /// queued.
    pub async fn broadcast_to_room(
        &self,
        room: &Room,
        event: &ServerEvent,
        exclude: Option<&ConnectionId>,
    ) -> Result<usize, ProtocolError> {
        let frame = event.encode()?;
        let recipients = self
            .registry
            .senders(room.member_ids().filter(|id| Some(*id) != exclude))
            .await;

        let mut delivered = 0;
        for (connection_id, sender) in recipients {
            if sender.send(frame.clone()).is_ok() {
                delivered += 1;
            } else {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "Dropped {} for {connection_id} in room {}: connection closing",
                    event.name(),
                    room.key()
                );
            }
        }

        self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.stats.deliveries.fetch_add(delivered as u64, Ordering::Relaxed);
        log::trace!(
            "Broadcast {} to {delivered} member(s) of room {}",
            event.name(),
            room.key()
        );
        Ok(delivered)
    }

    /// Lock-free snapshot of the counters.
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            broadcasts: self.stats.broadcasts.load(Ordering::Relaxed),
            deliveries: self.stats.deliveries.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
        }
    }
}
