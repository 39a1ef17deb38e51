//! # LogWriter: event renderer over `tracing`
//!
//! A subscriber that turns every bus [`Event`] into one structured `tracing`
//! record. Install any `tracing` subscriber (e.g. `tracing-subscriber::fmt`) to see
//! the output.
//!
//! ## Example output (fmt layer)
//! ```text
//! INFO  format=sewer-1 "format loaded"
//! INFO  format=sewer-1 instance=6f1c.. origin=(0.0, 0.0, 0.0) "cache ready"
//! INFO  format=sewer-1 instance=6f1c.. players=1 "instance started"
//! DEBUG instance=6f1c.. room=a entity=entity#3 reason=killed "mob removed"
//! INFO  instance=6f1c.. keys=1 "key dropped"
//! INFO  instance=6f1c.. door=gate keys=2 outcome=unlocked "key used"
//! WARN  subscriber=audit reason=full "subscriber overflow"
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let format_id = e.format.as_deref().unwrap_or("-");
        let instance = e.instance.map(|i| i.to_string()).unwrap_or_default();
        let room = e.room.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        let party = e.players.as_ref().map_or(0, |p| p.len());

        match e.kind {
            EventKind::FormatLoaded => info!(format = format_id, "format loaded"),
            EventKind::FormatRejected => warn!(format = format_id, reason, "format rejected"),
            EventKind::FormatRemoved => info!(format = format_id, "format removed"),
            EventKind::CacheReady => {
                info!(format = format_id, %instance, origin = ?e.location, "cache ready");
            }
            EventKind::Start => info!(format = format_id, %instance, players = party, "instance started"),
            EventKind::CheckoutExhausted => warn!(format = format_id, players = party, "checkout exhausted"),
            EventKind::TotalCompletion => info!(format = format_id, %instance, "dungeon complete"),
            EventKind::InstanceDisposed => info!(format = format_id, %instance, reason, "instance disposed"),
            EventKind::InstanceFailed => error!(format = format_id, %instance, reason, "instance failed"),
            EventKind::TransitionCancelled => {
                debug!(format = format_id, %instance, room, transition = reason, "transition cancelled");
            }
            EventKind::RoomPlayerEnter => {
                debug!(%instance, room, player = ?e.player, "player entered room");
            }
            EventKind::RoomPopulated => {
                debug!(%instance, room, mobs = e.count.unwrap_or(0), "room populated");
            }
            EventKind::RoomCompleted => info!(%instance, room, "room completed"),
            EventKind::MobSpawned => {
                debug!(%instance, room, entity = ?e.entity, kind = ?e.entity_kind, "mob spawned");
            }
            EventKind::MobKilled => debug!(%instance, room, entity = ?e.entity, reason, "mob removed"),
            EventKind::KeyDropped => info!(%instance, keys = ?e.keys, at = ?e.location, "key dropped"),
            EventKind::KeyPickedUp => {
                info!(%instance, keys = ?e.keys, player = ?e.player, reason, "key pickup");
            }
            EventKind::KeyUsed => {
                info!(%instance, door = ?e.door, keys = ?e.keys, outcome = reason, "key used");
            }
            EventKind::SubscriberOverflow => {
                warn!(subscriber = e.subscriber.unwrap_or("-"), reason, "subscriber overflow");
            }
            EventKind::SubscriberPanicked => {
                error!(subscriber = e.subscriber.unwrap_or("-"), reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log_writer"
    }
}
