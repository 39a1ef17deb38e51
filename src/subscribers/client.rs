//! # ClientNotifier: push progression updates to players
//!
//! Translates progression events into [`ClientPayload`]s, encodes them with a
//! [`Codec`] and hands the bytes to a [`ClientSink`], once per party member.
//!
//! ```text
//! KeyDropped / KeyPickedUp / KeyUsed ─► KeyCount { keys }
//! RoomCompleted                      ─► RoomCleared { room }
//! TotalCompletion                    ─► DungeonComplete
//! ```
//! Other events are ignored. Encoding failures are logged and the payload is skipped.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::codec::Codec;
use crate::core::InstanceId;
use crate::events::{Event, EventKind};
use crate::host::PlayerId;
use crate::subscribers::Subscribe;

/// Client-facing progression payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientPayload {
    KeyCount { instance: InstanceId, keys: u32 },
    RoomCleared { instance: InstanceId, room: String },
    DungeonComplete { instance: InstanceId, format: String },
}

/// Delivers encoded bytes to one player on a channel.
pub trait ClientSink: Send + Sync + 'static {
    fn send(&self, channel: &str, player: PlayerId, payload: &[u8]);
}

/// Subscriber that notifies party members about progression.
pub struct ClientNotifier {
    codec: Arc<dyn Codec<ClientPayload>>,
    sink: Arc<dyn ClientSink>,
}

impl ClientNotifier {
    pub fn new(codec: Arc<dyn Codec<ClientPayload>>, sink: Arc<dyn ClientSink>) -> Self {
        Self { codec, sink }
    }

    fn payload(e: &Event) -> Option<ClientPayload> {
        let instance = e.instance?;
        match e.kind {
            EventKind::KeyDropped | EventKind::KeyPickedUp | EventKind::KeyUsed => {
                Some(ClientPayload::KeyCount {
                    instance,
                    keys: e.keys?,
                })
            }
            EventKind::RoomCompleted => Some(ClientPayload::RoomCleared {
                instance,
                room: e.room.as_deref()?.to_string(),
            }),
            EventKind::TotalCompletion => Some(ClientPayload::DungeonComplete {
                instance,
                format: e.format.as_deref().unwrap_or_default().to_string(),
            }),
            _ => None,
        }
    }
}

#[async_trait]
impl Subscribe for ClientNotifier {
    async fn on_event(&self, e: &Event) {
        let Some(payload) = Self::payload(e) else {
            return;
        };
        let Some(players) = e.players.as_deref().filter(|p| !p.is_empty()) else {
            return;
        };

        let mut buf = Vec::new();
        if let Err(err) = self.codec.encode(&mut buf, &payload) {
            tracing::warn!(label = err.as_label(), error = %err, "client payload dropped");
            return;
        }
        for player in players {
            self.sink.send(self.codec.channel(), *player, &buf);
        }
    }

    fn name(&self) -> &'static str {
        "client_notifier"
    }
}
