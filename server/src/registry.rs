//! Room registry and slot assignment.
//!
//! The registry map is guarded by one mutex and each room by its own, so
//! unrelated rooms never wait on each other. Locks are always taken map
//! first, room second, and never held across an `.await`.

use mukatte_protocol::{CardSet, Identity};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use std::{collections::HashMap, sync::Arc};

use crate::deck::{self, CardCatalog, EntropySource};
use crate::error::CoordinatorError;
use crate::relay::{Mailbox, RelayDuties, RelayState};

/// One of the two player positions of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotIndex {
    First,
    Second,
}

impl SlotIndex {
    pub const ALL: [SlotIndex; 2] = [SlotIndex::First, SlotIndex::Second];

    pub fn index(self) -> usize {
        match self {
            SlotIndex::First => 0,
            SlotIndex::Second => 1,
        }
    }

    /// The other slot. Only meaningful because a room has exactly two.
    pub fn peer(self) -> SlotIndex {
        match self {
            SlotIndex::First => SlotIndex::Second,
            SlotIndex::Second => SlotIndex::First,
        }
    }
}

#[derive(Debug)]
pub struct Slot {
    occupant: Option<Identity>,
    target_card: Option<String>,
    inbox: Option<Mailbox>,
    relay: RelayState,
    duties: Option<RelayDuties>,
    generation: u64,
}

impl Slot {
    fn empty() -> Self {
        Slot {
            occupant: None,
            target_card: None,
            inbox: None,
            relay: RelayState::Unattached,
            duties: None,
            generation: 0,
        }
    }

    pub fn occupant(&self) -> Option<Identity> {
        self.occupant
    }

    pub fn relay_state(&self) -> RelayState {
        self.relay
    }
}

#[derive(Debug)]
pub struct Room {
    pub name: String,
    pub cards: CardSet,
    slots: [Slot; 2],
    /// Set when the room has been taken out of the registry; holders of a
    /// stale `Arc` must not mutate it any further.
    removed: bool,
}

impl Room {
    fn new(name: String, cards: CardSet) -> Self {
        Room {
            name,
            cards,
            slots: [Slot::empty(), Slot::empty()],
            removed: false,
        }
    }

    pub fn slot(&self, index: SlotIndex) -> &Slot {
        &self.slots[index.index()]
    }

    fn slot_mut(&mut self, index: SlotIndex) -> &mut Slot {
        &mut self.slots[index.index()]
    }

    pub fn slot_of(&self, identity: Identity) -> Option<SlotIndex> {
        SlotIndex::ALL
            .into_iter()
            .find(|i| self.slot(*i).occupant == Some(identity))
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.occupant.is_some()).count()
    }

    /// Queue feeding `index`, created on first use by either side.
    fn inbox(&mut self, index: SlotIndex) -> Mailbox {
        self.slot_mut(index)
            .inbox
            .get_or_insert_with(Mailbox::new)
            .clone()
    }
}

/// Outcome of [`RoomRegistry::resolve_slot`].
#[derive(Debug, Clone)]
pub struct SlotAssignment {
    pub slot: SlotIndex,
    pub is_new_claim: bool,
    pub target_card: String,
    pub cards: CardSet,
}

/// Everything a live connection for one slot needs.
///
/// Bound to the room instance it was issued for, not just its name, so a
/// link outliving its room never touches a newer room of the same name.
#[derive(Debug, Clone)]
pub struct RelayLink {
    pub room: String,
    pub slot: SlotIndex,
    pub identity: Identity,
    pub inbox: Mailbox,
    pub peer_inbox: Mailbox,
    handle: Arc<Mutex<Room>>,
}

impl RelayLink {
    /// Runs `f` against the link's slot while the room is live and the
    /// slot still belongs to the link's identity.
    fn with_slot<R>(&self, f: impl FnOnce(&mut Slot) -> R) -> Option<R> {
        let mut r = self.handle.lock();
        if r.removed || r.slot(self.slot).occupant != Some(self.identity) {
            return None;
        }
        Some(f(r.slot_mut(self.slot)))
    }
}

pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Arc<Mutex<Room>>>>,
    catalog: Arc<dyn CardCatalog>,
    /// Leaf lock: may be taken while holding a room, never the other way round.
    entropy: Mutex<Box<dyn EntropySource>>,
}

impl RoomRegistry {
    pub fn new(catalog: Arc<dyn CardCatalog>) -> Self {
        Self::with_entropy(catalog, Box::new(OsRng))
    }

    pub fn with_entropy(
        catalog: Arc<dyn CardCatalog>,
        entropy: Box<dyn EntropySource>,
    ) -> Self {
        RoomRegistry {
            rooms: Mutex::new(HashMap::new()),
            catalog,
            entropy: Mutex::new(entropy),
        }
    }

    fn room(&self, name: &str) -> Option<Arc<Mutex<Room>>> {
        self.rooms.lock().get(name).cloned()
    }

    /// Existing room, or a freshly dealt one inserted under `name`.
    ///
    /// The board is dealt outside the map lock; if another request created
    /// the room meanwhile, its board wins and ours is discarded.
    fn room_or_create(&self, name: &str) -> Result<Arc<Mutex<Room>>, CoordinatorError> {
        if let Some(room) = self.room(name) {
            return Ok(room);
        }
        let catalog = self.catalog.card_names()?;
        let cards = deck::generate_card_set(&catalog, &mut **self.entropy.lock())?;
        let mut rooms = self.rooms.lock();
        let room = rooms.entry(name.to_string()).or_insert_with(|| {
            tracing::info!(room = name, "room created");
            Arc::new(Mutex::new(Room::new(name.to_string(), cards)))
        });
        Ok(room.clone())
    }

    /// Seats `identity` in `room`, creating the room on first reference.
    pub fn resolve_slot(
        &self,
        room_name: &str,
        identity: Identity,
    ) -> Result<SlotAssignment, CoordinatorError> {
        loop {
            let room = self.room_or_create(room_name)?;
            let mut r = room.lock();
            if r.removed {
                // lost a race with remove_room; start over on a fresh room
                continue;
            }

            if let Some(slot) = r.slot_of(identity) {
                tracing::debug!(room = room_name, slot = slot.index(), "slot re-identified");
                return Ok(SlotAssignment {
                    slot,
                    is_new_claim: false,
                    target_card: r.slot(slot).target_card.clone().unwrap_or_default(),
                    cards: r.cards.clone(),
                });
            }

            let Some(slot) = SlotIndex::ALL
                .into_iter()
                .find(|i| r.slot(*i).occupant.is_none())
            else {
                return Err(CoordinatorError::RoomFull(room_name.to_string()));
            };

            let drawn = deck::draw_target_card(&r.cards, &mut **self.entropy.lock());
            let target_card = match drawn {
                Ok(card) => card,
                Err(e) => {
                    drop(r);
                    self.discard_if_empty(room_name, &room);
                    return Err(e.into());
                }
            };
            let s = r.slot_mut(slot);
            s.occupant = Some(identity);
            s.target_card = Some(target_card.clone());
            tracing::info!(room = room_name, slot = slot.index(), "slot claimed");

            return Ok(SlotAssignment {
                slot,
                is_new_claim: true,
                target_card,
                cards: r.cards.clone(),
            });
        }
    }

    /// Takes `room` back out of the map if nobody got seated in it.
    fn discard_if_empty(&self, room_name: &str, room: &Arc<Mutex<Room>>) {
        let mut rooms = self.rooms.lock();
        if !rooms.get(room_name).is_some_and(|r| Arc::ptr_eq(r, room)) {
            return;
        }
        let mut r = room.lock();
        if !r.removed && r.occupied() == 0 {
            r.removed = true;
            rooms.remove(room_name);
            tracing::debug!(room = room_name, "empty room discarded");
        }
    }

    /// Deletes the room, its slots and any relay attached to them.
    pub fn remove_room(&self, room_name: &str) -> bool {
        let Some(room) = self.rooms.lock().remove(room_name) else {
            return false;
        };
        let mut r = room.lock();
        r.removed = true;
        for slot in r.slots.iter_mut() {
            if let Some(duties) = slot.duties.take() {
                duties.abort();
            }
            slot.relay = RelayState::Closed;
        }
        tracing::info!(room = room_name, "room removed");
        true
    }

    pub fn find_room_by_identity(&self, identity: Identity) -> Option<String> {
        let rooms = self.rooms.lock();
        rooms
            .values()
            .find(|room| room.lock().slot_of(identity).is_some())
            .map(|room| room.lock().name.clone())
    }

    /// Queues for a live connection of `identity` in `room_name`.
    pub fn relay_link(
        &self,
        room_name: &str,
        identity: Identity,
    ) -> Result<RelayLink, CoordinatorError> {
        let room = self
            .room(room_name)
            .ok_or_else(|| CoordinatorError::RoomNotFound(room_name.to_string()))?;
        let mut r = room.lock();
        if r.removed {
            return Err(CoordinatorError::RoomNotFound(room_name.to_string()));
        }
        let slot = r.slot_of(identity).ok_or_else(|| {
            CoordinatorError::SlotIdentityInvalid(format!("not seated in room {room_name:?}"))
        })?;
        Ok(RelayLink {
            room: room_name.to_string(),
            slot,
            identity,
            inbox: r.inbox(slot),
            peer_inbox: r.inbox(slot.peer()),
            handle: room.clone(),
        })
    }

    /// Records a new live connection for the slot and returns its generation.
    ///
    /// Any duties of an earlier connection for the same slot are stopped.
    /// Returns `None` (and stops `duties`) if the room or seat is gone.
    pub fn register_duties(&self, link: &RelayLink, duties: RelayDuties) -> Option<u64> {
        // on `None` the closure is dropped unrun, and `duties` with it
        link.with_slot(move |slot| {
            if let Some(previous) = slot.duties.replace(duties) {
                tracing::info!(room = %link.room, slot = link.slot.index(), "relay superseded");
                previous.abort();
            }
            slot.generation += 1;
            slot.relay = RelayState::Attached;
            slot.generation
        })
    }

    /// Marks the slot's connection closed unless a newer one replaced it.
    pub fn mark_closed(&self, link: &RelayLink, generation: u64) {
        link.with_slot(|slot| {
            if slot.generation == generation {
                slot.relay = RelayState::Closed;
                slot.duties = None;
            }
        });
    }

    pub fn relay_state(&self, room_name: &str, identity: Identity) -> Option<RelayState> {
        let room = self.room(room_name)?;
        let r = room.lock();
        r.slot_of(identity).map(|i| r.slot(i).relay_state())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().len()
    }

    /// Runs `f` against the room if it exists.
    pub fn with_room<R>(&self, room_name: &str, f: impl FnOnce(&Room) -> R) -> Option<R> {
        let room = self.room(room_name)?;
        let r = room.lock();
        Some(f(&r))
    }
}
