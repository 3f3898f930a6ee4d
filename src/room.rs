use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ROOM_NAME: &str = "Daedalus Lounge";

/// One monitored room.
///
/// `updating` is the trigger: while it is set, the monitor loop will take a
/// fresh snapshot and overwrite `current_occupancy` and `picture`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Room {
    pub id: i64,
    pub name: String,
    pub updating: bool,
    pub description: String,
    pub location: String,
    pub last_updated: Option<DateTime<Utc>>,
    pub current_occupancy: Option<u32>,
    pub total_occupancy: u32,
    pub computer_access: bool,
    pub whiteboard_access: bool,
    pub permitted_volume: String,
    pub picture: Option<String>,
}

/// Values used to create the room row the first time the daemon starts.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomSeed {
    pub name: String,
    pub description: String,
    pub location: String,
    pub total_occupancy: u32,
    pub updating: bool,
    pub computer_access: bool,
    pub whiteboard_access: bool,
    pub permitted_volume: String,
}

impl Default for RoomSeed {
    fn default() -> Self {
        Self {
            name: DEFAULT_ROOM_NAME.to_string(),
            description: "Lounge for Daedalus Honors students".to_string(),
            location: "Hunter North building, 10th floor.".to_string(),
            total_occupancy: 15,
            updating: true,
            computer_access: false,
            whiteboard_access: true,
            permitted_volume: "There are no audio restrictions.".to_string(),
        }
    }
}

impl RoomSeed {
    /// Builds the row this seed would insert, before an id is assigned.
    pub(crate) fn to_room(&self, id: i64) -> Room {
        Room {
            id,
            name: self.name.clone(),
            updating: self.updating,
            description: self.description.clone(),
            location: self.location.clone(),
            last_updated: Some(Utc::now()),
            current_occupancy: None,
            total_occupancy: self.total_occupancy,
            computer_access: self.computer_access,
            whiteboard_access: self.whiteboard_access,
            permitted_volume: self.permitted_volume.clone(),
            picture: None,
        }
    }
}

/// Object storage key for a room's latest snapshot. Each capture overwrites
/// the previous one.
pub fn object_key(room_id: i64) -> String {
    format!("room-{}.jpg", room_id)
}
