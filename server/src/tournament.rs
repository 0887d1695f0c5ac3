//! Tournament lobbies: pre-bracket registration pools.
//!
//! A lobby waits for its roster to fill, at which point the manager
//! reports it ready and the dispatch layer signals every member. Bracket
//! generation itself happens elsewhere; this module only owns
//! registration, host election, and the ready transition.

use log::info;
use shared::{TournamentMember, TournamentSummary};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Bracket sizes a lobby may be created with.
pub const VALID_CAPACITIES: [usize; 5] = [4, 8, 16, 32, 64];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Waiting,
    /// Roster is full; the start signal has been (or is being) sent.
    Ready,
}

#[derive(Debug)]
pub struct Tournament {
    pub id: String,
    pub name: String,
    pub capacity: usize,
    pub kind: String,
    /// Exactly one member has `is_host` whenever the roster is non-empty.
    pub roster: Vec<TournamentMember>,
    pub status: Status,
}

impl Tournament {
    pub fn is_full(&self) -> bool {
        self.roster.len() >= self.capacity
    }

    pub fn member(&self, user_id: u32) -> Option<&TournamentMember> {
        self.roster.iter().find(|m| m.user_id == user_id)
    }

    pub fn summary(&self) -> TournamentSummary {
        TournamentSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            capacity: self.capacity,
            kind: self.kind.clone(),
            players: self.roster.clone(),
            started: self.status == Status::Ready,
        }
    }
}

/// Outcome of a join attempt. Rejections are silent on the wire except
/// for the requester's own state query.
#[derive(Debug, PartialEq, Eq)]
pub enum TournamentJoin {
    /// Joined; `now_full` means the ready signal should fire.
    Joined { now_full: bool },
    AlreadyJoined,
    Full,
    Unknown,
}

#[derive(Debug, PartialEq, Eq)]
pub enum TournamentLeave {
    /// Removed; the lobby still exists (possibly with a new host, and
    /// re-opened for registration if it had filled).
    Removed,
    /// Removed and the roster emptied, so the lobby was destroyed.
    Destroyed,
    NotMember,
    Unknown,
}

pub struct TournamentRegistry {
    tournaments: HashMap<String, Tournament>,
}

impl TournamentRegistry {
    pub fn new() -> Self {
        Self {
            tournaments: HashMap::new(),
        }
    }

    fn resolve_name(&self, requested: &str) -> String {
        let mut candidate = requested.to_string();
        let mut n = 2;
        while self.tournaments.values().any(|t| t.name == candidate) {
            candidate = format!("{}-{}", requested, n);
            n += 1;
        }
        candidate
    }

    fn derive_id(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let mut id = format!("t-{}", millis);
        let mut n = 2;
        while self.tournaments.contains_key(&id) {
            id = format!("t-{}-{}", millis, n);
            n += 1;
        }
        id
    }

    /// Creates a lobby with the creator as host. Returns `None` for
    /// capacities outside the bracket set.
    pub fn create(
        &mut self,
        name: &str,
        capacity: usize,
        kind: &str,
        user_id: u32,
        username: &str,
    ) -> Option<&Tournament> {
        if !VALID_CAPACITIES.contains(&capacity) {
            return None;
        }

        let name = self.resolve_name(name);
        let id = self.derive_id();
        let tournament = Tournament {
            id: id.clone(),
            name: name.clone(),
            capacity,
            kind: kind.to_string(),
            roster: vec![TournamentMember {
                user_id,
                username: username.to_string(),
                is_host: true,
            }],
            status: Status::Waiting,
        };

        info!("Tournament {} ({}) created by {}", name, id, username);
        self.tournaments.insert(id.clone(), tournament);
        self.tournaments.get(&id)
    }

    pub fn join(&mut self, id: &str, user_id: u32, username: &str) -> TournamentJoin {
        let Some(tournament) = self.tournaments.get_mut(id) else {
            return TournamentJoin::Unknown;
        };

        if tournament.member(user_id).is_some() {
            return TournamentJoin::AlreadyJoined;
        }
        if tournament.is_full() {
            return TournamentJoin::Full;
        }

        tournament.roster.push(TournamentMember {
            user_id,
            username: username.to_string(),
            is_host: false,
        });

        let now_full = tournament.is_full();
        if now_full {
            tournament.status = Status::Ready;
            info!("Tournament {} is full, signalling start", tournament.name);
        }
        TournamentJoin::Joined { now_full }
    }

    /// Removes a roster entry. Destroys an emptied lobby, promotes the
    /// first remaining member when the host left, and re-opens
    /// registration if the roster had filled.
    pub fn remove_player(&mut self, user_id: u32, id: &str) -> TournamentLeave {
        let Some(tournament) = self.tournaments.get_mut(id) else {
            return TournamentLeave::Unknown;
        };

        let before = tournament.roster.len();
        tournament.roster.retain(|m| m.user_id != user_id);
        if tournament.roster.len() == before {
            return TournamentLeave::NotMember;
        }

        if tournament.roster.is_empty() {
            let name = tournament.name.clone();
            self.tournaments.remove(id);
            info!("Tournament {} emptied and destroyed", name);
            return TournamentLeave::Destroyed;
        }

        if !tournament.roster.iter().any(|m| m.is_host) {
            tournament.roster[0].is_host = true;
            info!(
                "Tournament {}: host left, {} promoted",
                tournament.name, tournament.roster[0].username
            );
        }

        if tournament.status == Status::Ready && !tournament.is_full() {
            tournament.status = Status::Waiting;
            info!("Tournament {} re-opened for registration", tournament.name);
        }

        TournamentLeave::Removed
    }

    /// Point-to-point membership lookup for one user.
    pub fn current_for(&self, user_id: u32) -> Option<&Tournament> {
        self.tournaments
            .values()
            .find(|t| t.member(user_id).is_some())
    }

    pub fn get(&self, id: &str) -> Option<&Tournament> {
        self.tournaments.get(id)
    }

    pub fn list(&self) -> Vec<TournamentSummary> {
        self.tournaments.values().map(|t| t.summary()).collect()
    }

    pub fn len(&self) -> usize {
        self.tournaments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tournaments.is_empty()
    }
}

impl Default for TournamentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
