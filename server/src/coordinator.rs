use futures::{Sink, Stream};
use mukatte_protocol::{Identity, JoinResponse};
use std::{sync::Arc, time::Duration};

use crate::error::CoordinatorError;
use crate::registry::{RelayLink, RoomRegistry};
use crate::relay::{self, Payload, RelayError, SpawnedRelay};

/// Composition root: turns requests into registry and relay operations.
#[derive(Clone)]
pub struct Coordinator {
    registry: Arc<RoomRegistry>,
    idle_timeout: Duration,
}

impl Coordinator {
    pub fn new(registry: Arc<RoomRegistry>, idle_timeout: Duration) -> Self {
        Coordinator {
            registry,
            idle_timeout,
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Seats the caller (or re-identifies them) and returns their view of the room.
    pub fn join(&self, room: &str, token: &str) -> Result<JoinResponse, CoordinatorError> {
        let identity: Identity = token.parse()?;
        let seat = self.registry.resolve_slot(room, identity)?;
        Ok(JoinResponse {
            your_card: seat.target_card,
            images: seat.cards,
        })
    }

    /// Tears down the room the caller sits in. Returns the room's name.
    pub fn leave(&self, token: &str) -> Result<String, CoordinatorError> {
        let identity: Identity = token.parse()?;
        let room = self
            .registry
            .find_room_by_identity(identity)
            .ok_or(CoordinatorError::NotInAnyRoom)?;
        self.registry.remove_room(&room);
        Ok(room)
    }

    /// Checks that the caller may open a live connection to `room`.
    ///
    /// Done before the websocket upgrade so a refusal is still a plain
    /// HTTP error.
    pub fn prepare_relay(&self, room: &str, token: &str) -> Result<RelayLink, CoordinatorError> {
        let identity: Identity = token.parse()?;
        self.registry.relay_link(room, identity)
    }

    /// Runs the relay duties for an already validated link until the
    /// connection ends.
    pub async fn run_relay<St, Si>(&self, link: RelayLink, stream: St, sink: Si)
    where
        St: Stream<Item = Result<Payload, RelayError>> + Send + 'static,
        Si: Sink<Payload, Error = RelayError> + Send + 'static,
    {
        let spawned = relay::spawn_duties(
            stream,
            sink,
            link.inbox.clone(),
            link.peer_inbox.sender(),
            self.idle_timeout,
        );
        let (duties, inbound, outbound) = spawned.into_parts();
        let Some(generation) = self.registry.register_duties(&link, duties) else {
            tracing::debug!(room = %link.room, "room gone before relay attached");
            return;
        };
        let peers = self
            .registry
            .with_room(&link.room, |r| r.occupied())
            .unwrap_or(0);
        tracing::info!(
            room = %link.room,
            slot = link.slot.index(),
            generation,
            peers,
            "relay attached"
        );

        match SpawnedRelay::finished(inbound, outbound).await {
            Ok(()) => tracing::info!(room = %link.room, slot = link.slot.index(), "relay closed"),
            Err(RelayError::Aborted) => {
                tracing::debug!(room = %link.room, slot = link.slot.index(), "relay aborted")
            }
            Err(e) => {
                tracing::warn!(room = %link.room, slot = link.slot.index(), "relay ended: {e}")
            }
        }
        self.registry.mark_closed(&link, generation);
    }

    /// Validates and then drives a live connection on a background task.
    pub fn attach_relay<St, Si>(
        &self,
        room: &str,
        token: &str,
        stream: St,
        sink: Si,
    ) -> Result<(), CoordinatorError>
    where
        St: Stream<Item = Result<Payload, RelayError>> + Send + 'static,
        Si: Sink<Payload, Error = RelayError> + Send + 'static,
    {
        let link = self.prepare_relay(room, token)?;
        let this = self.clone();
        tokio::spawn(async move { this.run_relay(link, stream, sink).await });
        Ok(())
    }
}
