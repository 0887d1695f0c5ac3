//! Room registry: the set of live game rooms, their seats, and the
//! numeric id allocator.
//!
//! The registry is plain owned state; every mutation happens on the
//! server's single event loop. Emptied rooms are not destroyed inline but
//! flagged for the scheduler to reap after its iteration, and each room
//! owns at most one AI targeting task whose handle dies with the room.

use log::info;
use shared::{Difficulty, GameState, RoomSummary};
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// One of the two participant slots in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seat {
    Human { user_id: u32, username: String },
    Ai,
}

/// One authoritative game session.
pub struct Room {
    pub id: String,
    /// Seat A drives the left paddle, seat B the right.
    pub seats: [Option<Seat>; 2],
    pub state: GameState,
    pub ai_enabled: bool,
    pub ai_difficulty: Difficulty,
    pub created_at: Instant,
    /// The targeting refresh task for AI rooms. At most one per room;
    /// replaced on difficulty change, aborted on destruction.
    pub ai_timer: Option<JoinHandle<()>>,
}

impl Room {
    fn new(id: String, ai_enabled: bool) -> Self {
        Self {
            id,
            seats: [None, None],
            state: GameState::new(),
            ai_enabled,
            ai_difficulty: Difficulty::Medium,
            created_at: Instant::now(),
            ai_timer: None,
        }
    }

    pub fn human_count(&self) -> usize {
        self.seats
            .iter()
            .flatten()
            .filter(|s| matches!(s, Seat::Human { .. }))
            .count()
    }

    /// Whether the room has two effective participants and its physics
    /// should advance this tick.
    pub fn is_playable(&self) -> bool {
        self.human_count() == 2 || (self.ai_enabled && self.human_count() >= 1)
    }

    /// A room with no humans is garbage regardless of the AI seat.
    pub fn is_empty(&self) -> bool {
        self.human_count() == 0
    }

    /// Returns the seat index a user occupies, if any.
    pub fn seat_of(&self, user_id: u32) -> Option<usize> {
        self.seats.iter().position(|s| {
            matches!(s, Some(Seat::Human { user_id: id, .. }) if *id == user_id)
        })
    }

    pub fn seated_humans(&self) -> Vec<(u32, String)> {
        self.seats
            .iter()
            .flatten()
            .filter_map(|s| match s {
                Seat::Human { user_id, username } => Some((*user_id, username.clone())),
                Seat::Ai => None,
            })
            .collect()
    }

    fn occupy_first_free(&mut self, user_id: u32, username: String) -> Option<usize> {
        let idx = self.seats.iter().position(|s| s.is_none())?;
        self.seats[idx] = Some(Seat::Human { user_id, username });
        Some(idx)
    }

    pub fn abort_ai_timer(&mut self) {
        if let Some(handle) = self.ai_timer.take() {
            handle.abort();
        }
    }
}

/// Outcome of a join attempt, answered to the requester only.
#[derive(Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined { first_seat: bool, ai_enabled: bool },
    /// Idempotent re-join: the caller already holds this seat.
    AlreadySeated { first_seat: bool, ai_enabled: bool },
    RoomFull,
    UnknownRoom,
}

pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
    next_numeric_id: u32,
    /// Released numeric ids, kept sorted ascending so the smallest is
    /// always reused first.
    free_ids: Vec<u32>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: HashMap::new(),
            next_numeric_id: 1,
            free_ids: Vec::new(),
        }
    }

    /// A requested name may itself be `room{n}`, so every candidate is
    /// checked against the live table: occupied free-list entries are
    /// kept for when that room dies, occupied counter values are burned.
    fn alloc_numeric_id(&mut self) -> String {
        let mut i = 0;
        while i < self.free_ids.len() {
            let candidate = format!("room{}", self.free_ids[i]);
            if !self.rooms.contains_key(&candidate) {
                self.free_ids.remove(i);
                return candidate;
            }
            i += 1;
        }
        loop {
            let n = self.next_numeric_id;
            self.next_numeric_id += 1;
            let candidate = format!("room{}", n);
            if !self.rooms.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn release_numeric_id(&mut self, room_id: &str) {
        if let Some(n) = room_id.strip_prefix("room").and_then(|s| s.parse::<u32>().ok()) {
            // Only ids the counter has passed belong to the free-list;
            // a destroyed user-named `room9` must not fast-forward the
            // unnamed sequence.
            if n == 0 || n >= self.next_numeric_id {
                return;
            }
            let pos = self.free_ids.partition_point(|&f| f < n);
            if self.free_ids.get(pos) != Some(&n) {
                self.free_ids.insert(pos, n);
            }
        }
    }

    /// Resolves a requested room name to a unique live id. Purely numeric
    /// names are parenthesized so they cannot collide with the numeric
    /// per-user unicast namespace; collisions with live rooms get an
    /// ascending suffix.
    fn resolve_name(&self, requested: &str) -> String {
        let base = if !requested.is_empty() && requested.chars().all(|c| c.is_ascii_digit()) {
            format!("({})", requested)
        } else {
            requested.to_string()
        };

        let mut candidate = base.clone();
        let mut n = 2;
        while self.rooms.contains_key(&candidate) {
            candidate = format!("{}-{}", base, n);
            n += 1;
        }
        candidate
    }

    /// Creates a room and seats the creator in seat A. AI mode fills seat
    /// B with the pseudo-seat and defaults difficulty to medium.
    pub fn create_room(
        &mut self,
        requested: Option<&str>,
        ai: bool,
        user_id: u32,
        username: &str,
    ) -> String {
        let id = match requested {
            Some(name) if !name.is_empty() => self.resolve_name(name),
            _ => self.alloc_numeric_id(),
        };

        let mut room = Room::new(id.clone(), ai);
        room.seats[0] = Some(Seat::Human {
            user_id,
            username: username.to_string(),
        });
        if ai {
            room.seats[1] = Some(Seat::Ai);
        }

        info!("Room {} created by {} (ai: {})", id, username, ai);
        self.rooms.insert(id.clone(), room);
        id
    }

    pub fn join_room(&mut self, room_id: &str, user_id: u32, username: &str) -> JoinOutcome {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return JoinOutcome::UnknownRoom;
        };

        if let Some(idx) = room.seat_of(user_id) {
            return JoinOutcome::AlreadySeated {
                first_seat: idx == 0,
                ai_enabled: room.ai_enabled,
            };
        }

        match room.occupy_first_free(user_id, username.to_string()) {
            Some(idx) => {
                info!("{} joined {} as seat {}", username, room_id, idx);
                JoinOutcome::Joined {
                    first_seat: idx == 0,
                    ai_enabled: room.ai_enabled,
                }
            }
            None => JoinOutcome::RoomFull,
        }
    }

    /// Vacates the user's seat. Returns true if the seat was held. The
    /// emptied room is left for the scheduler's reap pass.
    pub fn leave_room(&mut self, room_id: &str, user_id: u32) -> bool {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return false;
        };
        match room.seat_of(user_id) {
            Some(idx) => {
                room.seats[idx] = None;
                info!("User {} left {}", user_id, room_id);
                true
            }
            None => false,
        }
    }

    /// Removes the room outright: aborts its AI timer and returns its
    /// numeric id to the free-list.
    pub fn destroy_room(&mut self, room_id: &str) -> Option<Room> {
        let mut room = self.rooms.remove(room_id)?;
        room.abort_ai_timer();
        self.release_numeric_id(room_id);
        info!("Room {} destroyed", room_id);
        Some(room)
    }

    /// Ids of rooms with zero human occupants, collected for the reap
    /// pass so destruction never happens mid-iteration.
    pub fn empty_room_ids(&self) -> Vec<String> {
        self.rooms
            .values()
            .filter(|r| r.is_empty())
            .map(|r| r.id.clone())
            .collect()
    }

    pub fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn get_mut(&mut self, room_id: &str) -> Option<&mut Room> {
        self.rooms.get_mut(room_id)
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.rooms.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn lobby_info(&self) -> Vec<RoomSummary> {
        self.rooms
            .values()
            .map(|room| RoomSummary {
                room_id: room.id.clone(),
                players: room
                    .seated_humans()
                    .into_iter()
                    .map(|(_, name)| name)
                    .collect(),
                ai_enabled: room.ai_enabled,
            })
            .collect()
    }

    #[cfg(test)]
    pub fn free_list(&self) -> &[u32] {
        &self.free_ids
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
