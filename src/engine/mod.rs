mod availability;
mod bookings;
mod conflict;
mod controls;
mod error;
mod grants;
mod nesting;
mod queries;
mod requests;
mod rooms;

pub use availability::{free_windows, merge_overlapping, occupant_at, subtract_intervals};
pub use error::{Entity, EngineError, Transition};
pub use requests::*;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, oneshot, OwnedRwLockWriteGuard, RwLock, RwLockReadGuard};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is already queued,
/// then does one fsync for the whole batch and answers every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} events: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so a partial batch never leaks into the next one.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

pub struct Engine {
    pub(super) rooms: DashMap<Ulid, SharedRoomState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: booking/permission/alarm id → room id
    pub(super) entity_to_room: DashMap<Ulid, Ulid>,
    /// Held shared by every mutation and exclusively by compaction, so a
    /// snapshot never misses an append that lands in the file it replaces.
    /// Always taken before any room lock.
    pub(super) gate: RwLock<()>,
}

/// A room's write lock plus the shared mutation gate.
pub(super) struct RoomLease<'a> {
    _gate: RwLockReadGuard<'a, ()>,
    room: OwnedRwLockWriteGuard<RoomState>,
}

impl std::ops::Deref for RoomLease<'_> {
    type Target = RoomState;

    fn deref(&self) -> &RoomState {
        &self.room
    }
}

impl std::ops::DerefMut for RoomLease<'_> {
    fn deref_mut(&mut self) -> &mut RoomState {
        &mut self.room
    }
}

/// A booking or grant id claimed in the entity index ahead of its create
/// event. Dropped without `commit` (a failed guard or append), the claim is
/// released again.
pub(super) struct IdReservation<'a> {
    index: &'a DashMap<Ulid, Ulid>,
    id: Ulid,
    committed: bool,
}

impl IdReservation<'_> {
    pub(super) fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for IdReservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.index.remove(&self.id);
        }
    }
}

/// Apply an event to a room. The caller holds the room lock.
/// Registry events are handled at the map level, not here.
fn apply_to_room(rs: &mut RoomState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::RoomStatusChanged { status, .. } => rs.status = *status,
        Event::BookingCreated(booking) => {
            entity_map.insert(booking.id, rs.id);
            rs.insert_booking(booking.clone());
        }
        Event::BookingTransitioned { id, status, .. } => {
            if let Some(b) = rs.booking_mut(*id) {
                b.status = *status;
            }
            if !status.is_live() {
                rs.deactivate_dependents(*id);
            }
        }
        Event::BookingRevised { booking, .. } => {
            // Re-insert so the sort order follows a moved check-in.
            rs.remove_booking(booking.id);
            if !booking.is_live() {
                rs.deactivate_dependents(booking.id);
            }
            rs.insert_booking(booking.clone());
        }
        Event::BookingDeleted { id, .. } => {
            rs.remove_booking(*id);
            entity_map.remove(id);
            for dependent in rs.remove_dependents(*id) {
                entity_map.remove(&dependent);
            }
        }
        Event::AccessGranted(access) => {
            entity_map.insert(access.id, rs.id);
            rs.access.push(access.clone());
        }
        Event::AccessRevised(access) => {
            if let Some(slot) = rs.access.iter_mut().find(|a| a.id == access.id) {
                *slot = access.clone();
            }
        }
        Event::AccessRevoked { id, .. } => {
            rs.access.retain(|a| a.id != *id);
            entity_map.remove(id);
        }
        Event::AlarmSet(alarm) => {
            entity_map.insert(alarm.id, rs.id);
            rs.alarms.push(alarm.clone());
        }
        Event::AlarmRevised(alarm) => {
            if let Some(slot) = rs.alarms.iter_mut().find(|a| a.id == alarm.id) {
                *slot = alarm.clone();
            }
        }
        Event::AlarmRemoved { id, .. } => {
            rs.alarms.retain(|a| a.id != *id);
            entity_map.remove(id);
        }
        Event::ControlsChanged { room_id, change, by, at } => {
            rs.controls
                .get_or_insert_with(|| RoomControlState::empty(*room_id, *at, *by))
                .apply(change, *at, *by);
        }
        Event::RoomRegistered { .. } | Event::RoomRemoved { .. } => {}
    }
}

/// Drop every index entry that points into a room that is going away.
pub(super) fn unindex_room(rs: &RoomState, entity_map: &DashMap<Ulid, Ulid>) {
    let ids = rs
        .bookings
        .iter()
        .map(|b| b.id)
        .chain(rs.access.iter().map(|a| a.id))
        .chain(rs.alarms.iter().map(|a| a.id));
    for id in ids {
        entity_map.remove(&id);
    }
}

pub(super) fn require_elevated(actor: &Actor, action: &'static str) -> Result<(), EngineError> {
    if actor.is_elevated() {
        Ok(())
    } else {
        Err(EngineError::Forbidden { user: actor.user_id, action })
    }
}

pub(super) fn require_owner_or_elevated(
    actor: &Actor,
    owner: Ulid,
    action: &'static str,
) -> Result<(), EngineError> {
    if actor.owns_or_elevated(owner) {
        Ok(())
    } else {
        Err(EngineError::Forbidden { user: actor.user_id, action })
    }
}

/// The room an event belongs to.
fn event_room_id(event: &Event) -> Ulid {
    match event {
        Event::RoomRegistered { id, .. }
        | Event::RoomStatusChanged { id, .. }
        | Event::RoomRemoved { id } => *id,
        Event::BookingCreated(b) | Event::BookingRevised { booking: b, .. } => b.room_id,
        Event::AccessGranted(a) | Event::AccessRevised(a) => a.room_id,
        Event::AlarmSet(a) | Event::AlarmRevised(a) => a.room_id,
        Event::BookingTransitioned { room_id, .. }
        | Event::BookingDeleted { room_id, .. }
        | Event::AccessRevoked { room_id, .. }
        | Event::AlarmRemoved { room_id, .. }
        | Event::ControlsChanged { room_id, .. } => *room_id,
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let entity_to_room = DashMap::new();
        // Rebuild plain owned state first; locks are only introduced once replay is done.
        let mut replayed: HashMap<Ulid, RoomState> = HashMap::new();
        for event in &events {
            match event {
                Event::RoomRegistered { id, number, status } => {
                    replayed.insert(*id, RoomState::new(*id, number.clone(), *status));
                }
                Event::RoomRemoved { id } => {
                    if let Some(rs) = replayed.remove(id) {
                        unindex_room(&rs, &entity_to_room);
                    }
                }
                other => {
                    if let Some(rs) = replayed.get_mut(&event_room_id(other)) {
                        apply_to_room(rs, other, &entity_to_room);
                    }
                }
            }
        }
        tracing::info!(
            "replayed {} events into {} rooms ({} bookings/grants indexed)",
            events.len(),
            replayed.len(),
            entity_to_room.len()
        );

        let rooms = DashMap::new();
        for (id, rs) in replayed {
            rooms.insert(id, Arc::new(RwLock::new(rs)));
        }

        Ok(Self {
            rooms,
            wal_tx,
            notify,
            entity_to_room,
            gate: RwLock::new(()),
        })
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Unavailable(e.to_string()))
    }

    pub fn get_room_handle(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn room_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_room.get(entity_id).map(|e| *e.value())
    }

    /// Subscribe to every event logged against one room.
    pub fn subscribe(&self, room_id: Ulid) -> broadcast::Receiver<Event> {
        self.notify.subscribe(room_id)
    }

    /// WAL-append + apply + notify in one call. The caller holds the room's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.entity_to_room);
        self.notify.send(rs.id, event);
        Ok(())
    }

    /// Claim `id` for a new entity on `room_id`. Ids are unique across all
    /// rooms, so this must run with the room lock already held.
    pub(super) fn reserve_id(
        &self,
        id: Ulid,
        room_id: Ulid,
    ) -> Result<IdReservation<'_>, EngineError> {
        match self.entity_to_room.entry(id) {
            Entry::Occupied(_) => Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(room_id);
                Ok(IdReservation { index: &self.entity_to_room, id, committed: false })
            }
        }
    }

    /// Get a room and acquire its write lock. A room removed while we waited is `NotFound`.
    pub(super) async fn room_write(&self, room_id: Ulid) -> Result<RoomLease<'_>, EngineError> {
        let gate = self.gate.read().await;
        let rs = self
            .get_room_handle(&room_id)
            .ok_or(EngineError::NotFound(Entity::Room, room_id))?;
        let room = rs.write_owned().await;
        if room.retired {
            return Err(EngineError::NotFound(Entity::Room, room_id));
        }
        Ok(RoomLease { _gate: gate, room })
    }

    /// Lookup entity → room, then acquire that room's write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity: Entity,
        entity_id: Ulid,
    ) -> Result<RoomLease<'_>, EngineError> {
        let room_id = self
            .room_for_entity(&entity_id)
            .ok_or(EngineError::NotFound(entity, entity_id))?;
        self.room_write(room_id)
            .await
            .map_err(|_| EngineError::NotFound(entity, entity_id))
    }

    /// Handles to every room, snapshotted so no map shard stays locked across an await.
    pub(super) fn room_handles(&self) -> Vec<SharedRoomState> {
        self.rooms.iter().map(|e| e.value().clone()).collect()
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.gate.write().await;
        let mut events = Vec::new();
        for handle in self.room_handles() {
            let guard = handle.read().await;
            if guard.retired {
                continue;
            }
            events.push(Event::RoomRegistered {
                id: guard.id,
                number: guard.number.clone(),
                status: guard.status,
            });
            events.extend(guard.bookings.iter().cloned().map(Event::BookingCreated));
            events.extend(guard.access.iter().cloned().map(Event::AccessGranted));
            events.extend(guard.alarms.iter().cloned().map(Event::AlarmSet));
            if let Some(c) = &guard.controls {
                let mut changes = vec![ControlChange::DoNotDisturb(c.dnd)];
                changes.extend(c.lighting.clone().map(ControlChange::Lighting));
                changes.extend(c.climate.clone().map(ControlChange::Climate));
                changes.extend(c.curtains.clone().map(ControlChange::Curtains));
                for change in changes {
                    events.push(Event::ControlsChanged {
                        room_id: guard.id,
                        change,
                        by: c.changed_by,
                        at: c.updated_at,
                    });
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Unavailable(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
