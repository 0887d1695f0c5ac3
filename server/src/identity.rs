//! Identity routing: which transport address currently represents an
//! authenticated user, and which room that user wants state pushes for.
//!
//! Seat occupancy lives in the room registry and is keyed by user id, so
//! a reconnecting user lands back on their existing seat simply by
//! authenticating again; only the address in this table changes. The
//! viewer binding survives a reconnect and is resynchronized by the
//! client's next `RoomImIn` declaration.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Identity carried by a verified connect token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: u32,
    pub username: String,
}

/// Verifies the credential presented at connect time. Credential issuance
/// is out of scope; the server only consumes tokens.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Option<UserIdentity>;
}

/// Shared-secret token format: `<id>:<username>:<secret>`. Stands in for
/// the JWT layer of the surrounding service.
pub struct SharedSecretVerifier {
    secret: String,
}

impl SharedSecretVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl TokenVerifier for SharedSecretVerifier {
    fn verify(&self, token: &str) -> Option<UserIdentity> {
        let mut parts = token.splitn(3, ':');
        let id = parts.next()?.parse::<u32>().ok()?;
        let username = parts.next()?;
        let secret = parts.next()?;
        if username.is_empty() || secret != self.secret {
            return None;
        }
        Some(UserIdentity {
            id,
            username: username.to_string(),
        })
    }
}

/// What happens to a seat when its connection goes silent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectPolicy {
    /// Log the disconnect and leave the seat occupied (default).
    Never,
    /// Vacate the seat as soon as the connection is declared dead.
    Immediate,
    /// Vacate after the user has been absent for the given duration.
    Grace(Duration),
}

#[derive(Debug)]
struct Connection {
    username: String,
    addr: SocketAddr,
    last_seen: Instant,
    viewing: Option<String>,
}

/// Routes server-initiated packets to the right address per user.
pub struct IdentityRouter {
    connections: HashMap<u32, Connection>,
}

impl IdentityRouter {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }

    /// Binds (or rebinds, on reconnect) a verified user to an address.
    /// The viewer binding is preserved across the rebind.
    pub fn connect(&mut self, identity: &UserIdentity, addr: SocketAddr) {
        let viewing = self
            .connections
            .get(&identity.id)
            .and_then(|c| c.viewing.clone());

        info!("User {} ({}) connected from {}", identity.username, identity.id, addr);
        self.connections.insert(
            identity.id,
            Connection {
                username: identity.username.clone(),
                addr,
                last_seen: Instant::now(),
                viewing,
            },
        );
    }

    pub fn disconnect(&mut self, user_id: u32) -> bool {
        if let Some(conn) = self.connections.remove(&user_id) {
            info!("User {} ({}) disconnected", conn.username, user_id);
            true
        } else {
            false
        }
    }

    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.connections
            .iter()
            .find(|(_, conn)| conn.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn username_of(&self, user_id: u32) -> Option<&str> {
        self.connections.get(&user_id).map(|c| c.username.as_str())
    }

    pub fn addr_of(&self, user_id: u32) -> Option<SocketAddr> {
        self.connections.get(&user_id).map(|c| c.addr)
    }

    pub fn all_addrs(&self) -> Vec<SocketAddr> {
        self.connections.values().map(|c| c.addr).collect()
    }

    /// Marks the connection alive; called on every inbound packet.
    pub fn touch(&mut self, user_id: u32) {
        if let Some(conn) = self.connections.get_mut(&user_id) {
            conn.last_seen = Instant::now();
        }
    }

    /// Records which room the user wants `GameUpdate` pushes for. This is
    /// independent of seating.
    pub fn set_viewing(&mut self, user_id: u32, room_id: &str) {
        if let Some(conn) = self.connections.get_mut(&user_id) {
            conn.viewing = Some(room_id.to_string());
        }
    }

    pub fn viewing_of(&self, user_id: u32) -> Option<&str> {
        self.connections
            .get(&user_id)
            .and_then(|c| c.viewing.as_deref())
    }

    /// Addresses of everyone currently watching the given room.
    pub fn viewers_of(&self, room_id: &str) -> Vec<SocketAddr> {
        self.connections
            .values()
            .filter(|c| c.viewing.as_deref() == Some(room_id))
            .map(|c| c.addr)
            .collect()
    }

    /// Drops every binding pointing at a destroyed room and returns the
    /// affected addresses so they can be told to stop rendering it.
    pub fn clear_viewers_of(&mut self, room_id: &str) -> Vec<SocketAddr> {
        let mut affected = Vec::new();
        for conn in self.connections.values_mut() {
            if conn.viewing.as_deref() == Some(room_id) {
                conn.viewing = None;
                affected.push(conn.addr);
            }
        }
        affected
    }

    /// Users that have been silent past the timeout. Removal and seat
    /// policy are the caller's decision.
    pub fn stale_users(&self, timeout: Duration) -> Vec<u32> {
        self.connections
            .iter()
            .filter(|(_, conn)| conn.last_seen.elapsed() > timeout)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for IdentityRouter {
    fn default() -> Self {
        Self::new()
    }
}
