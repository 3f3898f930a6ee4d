use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;

use crate::room::{Room, RoomSeed};
use crate::open_db_connection;

pub trait RoomStore {
    /// Returns the room named by `seed`, inserting it first if it does not exist.
    /// An existing row is returned as stored; the seed does not overwrite it.
    fn seed(&mut self, seed: &RoomSeed) -> Result<Room>;

    fn find_by_name(&mut self, name: &str) -> Result<Option<Room>>;

    /// Sets `updating` on the named room. Returns false if no room matched.
    fn request_update(&mut self, name: &str) -> Result<bool>;

    /// Takes the pending request for one pass. Returns false if `updating` is
    /// not set or another pass already holds an unexpired claim. `updating`
    /// itself stays set until `record_occupancy`.
    fn claim_update(&mut self, room_id: i64) -> Result<bool>;

    /// Drops a claim after a failed pass so the next poll retries.
    fn release_claim(&mut self, room_id: i64) -> Result<()>;

    /// Single-writer commit of one pipeline pass: stores the reading and
    /// clears `updating` and the claim.
    fn record_occupancy(&mut self, room_id: i64, occupancy: u32, picture_url: &str) -> Result<()>;
}

/// Claims older than this are treated as abandoned by a crashed process.
pub const CLAIM_LEASE_SECS: i64 = 300;

fn claim_lease() -> Duration {
    Duration::seconds(CLAIM_LEASE_SECS)
}

pub struct SqliteRoomStore {
    conn: Connection,
}

const ROOM_COLUMNS: &str = "id, name, updating, description, location, last_updated, \
     current_occupancy, total_occupancy, computer_access, whiteboard_access, \
     permitted_volume, picture";

impl SqliteRoomStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS rooms (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              name TEXT NOT NULL UNIQUE,
              updating INTEGER NOT NULL DEFAULT 0,
              description TEXT NOT NULL,
              location TEXT NOT NULL,
              last_updated TEXT,
              current_occupancy INTEGER,
              total_occupancy INTEGER NOT NULL,
              computer_access INTEGER NOT NULL,
              whiteboard_access INTEGER NOT NULL,
              permitted_volume TEXT NOT NULL,
              picture TEXT,
              claimed_at TEXT
            );
            "#,
        )?;

        // Databases created before passes were claimed lack the column.
        let has_claim: bool = self.conn.query_row(
            "SELECT COUNT(*) FROM pragma_table_info('rooms') WHERE name = 'claimed_at'",
            [],
            |row| row.get::<_, i64>(0).map(|count| count > 0),
        )?;
        if !has_claim {
            self.conn
                .execute_batch("ALTER TABLE rooms ADD COLUMN claimed_at TEXT;")?;
        }
        Ok(())
    }
}

fn room_from_row(row: &Row<'_>) -> rusqlite::Result<Room> {
    Ok(Room {
        id: row.get(0)?,
        name: row.get(1)?,
        updating: row.get(2)?,
        description: row.get(3)?,
        location: row.get(4)?,
        last_updated: row.get(5)?,
        current_occupancy: row.get(6)?,
        total_occupancy: row.get(7)?,
        computer_access: row.get(8)?,
        whiteboard_access: row.get(9)?,
        permitted_volume: row.get(10)?,
        picture: row.get(11)?,
    })
}

impl RoomStore for SqliteRoomStore {
    fn seed(&mut self, seed: &RoomSeed) -> Result<Room> {
        if let Some(room) = self.find_by_name(&seed.name)? {
            return Ok(room);
        }
        self.conn.execute(
            r#"
            INSERT INTO rooms(name, updating, description, location, last_updated,
                              total_occupancy, computer_access, whiteboard_access,
                              permitted_volume)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                seed.name,
                seed.updating,
                seed.description,
                seed.location,
                Utc::now(),
                seed.total_occupancy,
                seed.computer_access,
                seed.whiteboard_access,
                seed.permitted_volume
            ],
        )?;
        log::info!("created room '{}'", seed.name);
        self.find_by_name(&seed.name)?
            .ok_or_else(|| anyhow!("room '{}' missing after insert", seed.name))
    }

    fn find_by_name(&mut self, name: &str) -> Result<Option<Room>> {
        let sql = format!("SELECT {} FROM rooms WHERE name = ?1 LIMIT 1", ROOM_COLUMNS);
        let room = self
            .conn
            .query_row(&sql, params![name], room_from_row)
            .optional()?;
        Ok(room)
    }

    fn request_update(&mut self, name: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute("UPDATE rooms SET updating = 1 WHERE name = ?1", params![name])?;
        Ok(changed > 0)
    }

    fn claim_update(&mut self, room_id: i64) -> Result<bool> {
        let now = Utc::now();
        let changed = self.conn.execute(
            r#"
            UPDATE rooms
               SET claimed_at = ?1
             WHERE id = ?2
               AND updating = 1
               AND (claimed_at IS NULL OR claimed_at < ?3)
            "#,
            params![now, room_id, now - claim_lease()],
        )?;
        Ok(changed > 0)
    }

    fn release_claim(&mut self, room_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE rooms SET claimed_at = NULL WHERE id = ?1",
            params![room_id],
        )?;
        Ok(())
    }

    fn record_occupancy(&mut self, room_id: i64, occupancy: u32, picture_url: &str) -> Result<()> {
        let changed = self.conn.execute(
            r#"
            UPDATE rooms
               SET current_occupancy = ?1, picture = ?2, updating = 0, last_updated = ?3,
                   claimed_at = NULL
             WHERE id = ?4
            "#,
            params![occupancy, picture_url, Utc::now(), room_id],
        )?;
        if changed == 0 {
            return Err(anyhow!("no room with id {}", room_id));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryRoomStore {
    rooms: Vec<Room>,
    claimed: HashSet<i64>,
}

impl RoomStore for InMemoryRoomStore {
    fn seed(&mut self, seed: &RoomSeed) -> Result<Room> {
        if let Some(room) = self.rooms.iter().find(|room| room.name == seed.name) {
            return Ok(room.clone());
        }
        let id = self.rooms.iter().map(|room| room.id).max().unwrap_or(0) + 1;
        let room = seed.to_room(id);
        self.rooms.push(room.clone());
        Ok(room)
    }

    fn find_by_name(&mut self, name: &str) -> Result<Option<Room>> {
        Ok(self.rooms.iter().find(|room| room.name == name).cloned())
    }

    fn request_update(&mut self, name: &str) -> Result<bool> {
        match self.rooms.iter_mut().find(|room| room.name == name) {
            Some(room) => {
                room.updating = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn claim_update(&mut self, room_id: i64) -> Result<bool> {
        let pending = self
            .rooms
            .iter()
            .any(|room| room.id == room_id && room.updating);
        Ok(pending && self.claimed.insert(room_id))
    }

    fn release_claim(&mut self, room_id: i64) -> Result<()> {
        self.claimed.remove(&room_id);
        Ok(())
    }

    fn record_occupancy(&mut self, room_id: i64, occupancy: u32, picture_url: &str) -> Result<()> {
        let room = self
            .rooms
            .iter_mut()
            .find(|room| room.id == room_id)
            .ok_or_else(|| anyhow!("no room with id {}", room_id))?;
        room.current_occupancy = Some(occupancy);
        room.picture = Some(picture_url.to_string());
        room.updating = false;
        room.last_updated = Some(Utc::now());
        self.claimed.remove(&room_id);
        Ok(())
    }
}
