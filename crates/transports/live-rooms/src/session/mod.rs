//! Room membership: directory, session state and the event dispatcher

pub mod controller;
pub mod directory;
pub mod room;

pub use controller::RoomController;
pub use directory::RoomDirectory;
pub use room::{Room, RoomKind, RoomSession, RoomStatus, ARTIST_ROOM_PREFIX};
