//! Room directory: the latest list of joinable rooms

use super::room::Room;
use crate::signaling::channel::SignalSink;
use crate::signaling::protocol::{ClientMessage, RoomInfo};
use crate::Result;
use std::collections::{HashMap, HashSet};
use tokio::sync::watch;
use tracing::debug;

/// Latest room list, observable through a watch channel
pub struct RoomDirectory {
    rooms: watch::Sender<Vec<Room>>,
}

impl Default for RoomDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomDirectory {
    pub fn new() -> Self {
        let (rooms, _) = watch::channel(Vec::new());
        Self { rooms }
    }

    /// Ask the server for the current room list
    pub fn request_refresh(&self, sink: &dyn SignalSink) -> Result<()> {
        debug!("Requesting room directory");
        sink.send(ClientMessage::GetAvailableRooms)
    }

    /// Replace the list from an `available_rooms` message
    ///
    /// Server order is kept; duplicate ids are dropped.
    pub fn apply(
        &self,
        room_ids: Vec<String>,
        mut room_info: Option<HashMap<String, RoomInfo>>,
    ) -> Vec<Room> {
        let mut seen = HashSet::new();
        let rooms: Vec<Room> = room_ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .map(|id| {
                let info = room_info.as_mut().and_then(|map| map.remove(&id));
                Room::new(id, info)
            })
            .collect();

        debug!(count = rooms.len(), "Room directory updated");
        self.rooms.send_replace(rooms.clone());
        rooms
    }

    /// Snapshot of the current list
    pub fn rooms(&self) -> Vec<Room> {
        self.rooms.borrow().clone()
    }

    pub fn find(&self, room_id: &str) -> Option<Room> {
        self.rooms
            .borrow()
            .iter()
            .find(|room| room.room_id == room_id)
            .cloned()
    }

    /// Receive every future list update
    pub fn subscribe(&self) -> watch::Receiver<Vec<Room>> {
        self.rooms.subscribe()
    }
}
