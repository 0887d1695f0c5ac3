//! UDP transport and the single event loop that owns all orchestrator
//! state.
//!
//! Every registry (rooms, tournaments, identities) is a private field of
//! [`Server`] and is mutated only inside `run()`. Auxiliary tasks (the
//! socket receiver, the outbound sender queue, and each AI room's
//! targeting timer) talk to the loop over channels, never touching the
//! state directly. The loop multiplexes inbound packets, the fixed-rate
//! match tick, and a once-a-second staleness sweep.

use crate::ai::{self, DifficultyProfile};
use crate::identity::{DisconnectPolicy, IdentityRouter, TokenVerifier};
use crate::persistence::{
    adjust_stats_resilient, record_match_resilient, MatchRecord, MatchStore,
};
use crate::physics::{self, Side};
use crate::rooms::{JoinOutcome, RoomRegistry, Seat};
use crate::tournament::{TournamentJoin, TournamentLeave, TournamentRegistry};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{Difficulty, Packet, PADDLE_MAX_Y};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// How long a connection may stay silent before it is declared dead.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Messages funneled into the event loop from auxiliary tasks.
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    /// A room's targeting timer fired.
    RefreshAiTarget {
        room_id: String,
    },
    #[allow(dead_code)]
    Shutdown,
}

/// Outbound work handed to the sender task. Delivery is fire-and-forget;
/// the tick never waits on a slow client.
#[derive(Debug)]
enum Outbound {
    Send {
        packet: Packet,
        addr: SocketAddr,
    },
    SendMany {
        packet: Packet,
        addrs: Vec<SocketAddr>,
    },
}

/// Runtime knobs, surfaced as CLI flags in `main`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tick_rate: u32,
    pub win_score: u32,
    pub disconnect_policy: DisconnectPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            win_score: shared::DEFAULT_WIN_SCORE,
            disconnect_policy: DisconnectPolicy::Never,
        }
    }
}

/// The match/session orchestrator.
pub struct Server {
    socket: Arc<UdpSocket>,
    verifier: Arc<dyn TokenVerifier>,
    store: Arc<dyn MatchStore>,

    rooms: RoomRegistry,
    tournaments: TournamentRegistry,
    identities: IdentityRouter,
    /// Users whose seats fall due for vacating under the grace policy.
    pending_vacates: Vec<(u32, Instant)>,

    config: ServerConfig,
    rng: StdRng,
    tick_count: u64,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    out_tx: mpsc::UnboundedSender<Outbound>,
    out_rx: mpsc::UnboundedReceiver<Outbound>,
}

impl Server {
    pub async fn new(
        addr: &str,
        config: ServerConfig,
        verifier: Arc<dyn TokenVerifier>,
        store: Arc<dyn MatchStore>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            verifier,
            store,
            rooms: RoomRegistry::new(),
            tournaments: TournamentRegistry::new(),
            identities: IdentityRouter::new(),
            pending_vacates: Vec::new(),
            config,
            rng: StdRng::from_entropy(),
            tick_count: 0,
            server_tx,
            server_rx,
            out_tx,
            out_rx,
        })
    }

    /// The address the orchestrator is actually bound to; useful when
    /// binding to port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawns the task that continuously listens for inbound datagrams.
    fn spawn_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if server_tx
                                .send(ServerMessage::PacketReceived { packet, addr })
                                .is_err()
                            {
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns the task that drains the outbound queue onto the socket.
    fn spawn_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let mut out_rx = std::mem::replace(&mut self.out_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                match message {
                    Outbound::Send { packet, addr } => {
                        Self::send_impl(&socket, &packet, addr).await;
                    }
                    Outbound::SendMany { packet, addrs } => {
                        for addr in addrs {
                            Self::send_impl(&socket, &packet, addr).await;
                        }
                    }
                }
            }
        });
    }

    async fn send_impl(socket: &UdpSocket, packet: &Packet, addr: SocketAddr) {
        match serialize(packet) {
            Ok(data) => {
                if let Err(e) = socket.send_to(&data, addr).await {
                    error!("Failed to send packet to {}: {}", addr, e);
                }
            }
            Err(e) => error!("Failed to serialize outbound packet: {}", e),
        }
    }

    fn send(&self, packet: Packet, addr: SocketAddr) {
        if self.out_tx.send(Outbound::Send { packet, addr }).is_err() {
            error!("Outbound queue closed");
        }
    }

    fn send_many(&self, packet: Packet, addrs: Vec<SocketAddr>) {
        if addrs.is_empty() {
            return;
        }
        if self.out_tx.send(Outbound::SendMany { packet, addrs }).is_err() {
            error!("Outbound queue closed");
        }
    }

    fn broadcast(&self, packet: Packet) {
        self.send_many(packet, self.identities.all_addrs());
    }

    fn broadcast_lobby(&self) {
        self.broadcast(Packet::LobbyUpdate {
            rooms: self.rooms.lobby_info(),
        });
    }

    fn broadcast_tournaments(&self) {
        self.broadcast(Packet::TournamentLobbyInfo {
            tournaments: self.tournaments.list(),
        });
    }

    /// Main loop: inbound events, the match tick, and the stale sweep,
    /// all serviced on this single task.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_receiver();
        self.spawn_sender();

        let mut tick_interval = interval(Duration::from_secs_f64(
            1.0 / self.config.tick_rate as f64,
        ));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sweep_interval = interval(Duration::from_secs(1));

        info!(
            "Server started ({} Hz, first to {})",
            self.config.tick_rate, self.config.win_score
        );

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr);
                        }
                        Some(ServerMessage::RefreshAiTarget { room_id }) => {
                            self.refresh_ai_target(&room_id);
                        }
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    self.tick();
                },

                _ = sweep_interval.tick() => {
                    self.sweep_stale_connections();
                },
            }
        }

        Ok(())
    }

    // ---- inbound dispatch -------------------------------------------------

    fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        if let Packet::Connect { token } = packet {
            self.handle_connect(&token, addr);
            return;
        }

        // Everything past the handshake requires an authenticated sender.
        let Some(user_id) = self.identities.find_by_addr(addr) else {
            warn!("Dropping packet from unauthenticated {}", addr);
            return;
        };
        self.identities.touch(user_id);
        let username = self
            .identities
            .username_of(user_id)
            .unwrap_or_default()
            .to_string();

        match packet {
            Packet::CreateRoom { name, ai } => {
                self.handle_create_room(name.as_deref(), ai, user_id, &username, addr);
            }
            Packet::JoinRoomGame { room_id } => {
                self.handle_join_room(&room_id, user_id, &username, addr);
            }
            Packet::RoomImIn { room_id } => {
                self.identities.set_viewing(user_id, &room_id);
            }
            Packet::PaddleMove { room_id, y } => {
                self.handle_paddle_move(&room_id, user_id, y);
            }
            Packet::SetDifficulty { room_id, level } => {
                self.handle_set_difficulty(&room_id, &level);
            }
            Packet::LeaveRoom { room_id } => {
                if self.rooms.leave_room(&room_id, user_id) {
                    self.broadcast_lobby();
                }
            }
            Packet::CreateTournament { name, capacity, kind } => {
                self.handle_create_tournament(&name, capacity, &kind, user_id, &username, addr);
            }
            Packet::JoinTournament { id } => {
                self.handle_join_tournament(&id, user_id, &username, addr);
            }
            Packet::LeaveTournament { id } => {
                self.handle_leave_tournament(&id, user_id, addr);
            }
            Packet::CheckTournamentLobbies => {
                self.send(
                    Packet::TournamentLobbyInfo {
                        tournaments: self.tournaments.list(),
                    },
                    addr,
                );
            }
            Packet::CurrentTournament => {
                self.send(
                    Packet::CurrentTournamentInfo {
                        tournament: self.tournaments.current_for(user_id).map(|t| t.summary()),
                    },
                    addr,
                );
            }
            Packet::Disconnect => {
                self.apply_disconnect(user_id);
            }
            Packet::Connect { .. } => unreachable!("handled above"),
            other => {
                warn!("Unexpected packet from {}: {:?}", addr, other);
            }
        }
    }

    fn handle_connect(&mut self, token: &str, addr: SocketAddr) {
        match self.verifier.verify(token) {
            Some(identity) => {
                let user_id = identity.id;
                self.identities.connect(&identity, addr);
                // A returning user is no longer a vacate candidate.
                self.pending_vacates.retain(|(id, _)| *id != user_id);

                self.send(Packet::Connected { user_id }, addr);
                self.send(
                    Packet::LobbyUpdate {
                        rooms: self.rooms.lobby_info(),
                    },
                    addr,
                );
            }
            None => {
                warn!("Rejected connection from {}: invalid token", addr);
                self.send(
                    Packet::Rejected {
                        reason: "invalid token".to_string(),
                    },
                    addr,
                );
            }
        }
    }

    fn handle_create_room(
        &mut self,
        name: Option<&str>,
        ai: bool,
        user_id: u32,
        username: &str,
        addr: SocketAddr,
    ) {
        let room_id = self.rooms.create_room(name, ai, user_id, username);
        if ai {
            self.restart_ai_timer(&room_id);
        }

        self.send(
            Packet::RoomJoinedInfo {
                room_id: room_id.clone(),
                first_seat: true,
                ai_enabled: ai,
            },
            addr,
        );
        if ai {
            self.send(Packet::GameReady { room_id }, addr);
        } else {
            self.send(Packet::WaitingForOpponent { room_id }, addr);
        }
        self.broadcast_lobby();
    }

    fn handle_join_room(&mut self, room_id: &str, user_id: u32, username: &str, addr: SocketAddr) {
        match self.rooms.join_room(room_id, user_id, username) {
            JoinOutcome::Joined { first_seat, ai_enabled } => {
                self.send(
                    Packet::RoomJoinedInfo {
                        room_id: room_id.to_string(),
                        first_seat,
                        ai_enabled,
                    },
                    addr,
                );

                let room = self.rooms.get(room_id);
                if room.map(|r| r.is_playable()).unwrap_or(false) {
                    let participants: Vec<SocketAddr> = room
                        .map(|r| r.seated_humans())
                        .unwrap_or_default()
                        .into_iter()
                        .filter_map(|(id, _)| self.identities.addr_of(id))
                        .collect();
                    self.send_many(
                        Packet::GameReady {
                            room_id: room_id.to_string(),
                        },
                        participants,
                    );
                } else {
                    self.send(
                        Packet::WaitingForOpponent {
                            room_id: room_id.to_string(),
                        },
                        addr,
                    );
                }
                self.broadcast_lobby();
            }
            JoinOutcome::AlreadySeated { first_seat, ai_enabled } => {
                // Idempotent re-join: confirm the existing seat to the
                // caller alone, no occupancy change.
                self.send(
                    Packet::RoomJoinedInfo {
                        room_id: room_id.to_string(),
                        first_seat,
                        ai_enabled,
                    },
                    addr,
                );
            }
            JoinOutcome::RoomFull => {
                self.send(
                    Packet::RoomFull {
                        room_id: room_id.to_string(),
                    },
                    addr,
                );
            }
            JoinOutcome::UnknownRoom => {
                // Joining a nonexistent room creates it with the caller
                // as seat A.
                self.handle_create_room(Some(room_id), false, user_id, username, addr);
            }
        }
    }

    fn handle_paddle_move(&mut self, room_id: &str, user_id: u32, y: f32) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };
        if room.state.ended {
            return;
        }
        let clamped = y.clamp(0.0, PADDLE_MAX_Y);
        match room.seat_of(user_id) {
            Some(0) => room.state.left.y = clamped,
            Some(_) => room.state.right.y = clamped,
            None => {}
        }
    }

    fn handle_set_difficulty(&mut self, room_id: &str, level: &str) {
        let Ok(difficulty) = level.parse::<Difficulty>() else {
            debug!("Ignoring unknown difficulty {:?} for {}", level, room_id);
            return;
        };
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };
        if !room.ai_enabled {
            return;
        }

        room.ai_difficulty = difficulty;
        info!("Difficulty for {} set to {:?}", room_id, difficulty);
        // Only the targeting cadence restarts; the current target and
        // paddle position carry over.
        self.restart_ai_timer(room_id);
    }

    fn handle_create_tournament(
        &mut self,
        name: &str,
        capacity: usize,
        kind: &str,
        user_id: u32,
        username: &str,
        addr: SocketAddr,
    ) {
        match self.tournaments.create(name, capacity, kind, user_id, username) {
            Some(tournament) => {
                let summary = tournament.summary();
                self.send(
                    Packet::CurrentTournamentInfo {
                        tournament: Some(summary),
                    },
                    addr,
                );
                self.broadcast_tournaments();
            }
            None => {
                self.send(
                    Packet::Rejected {
                        reason: format!("invalid tournament capacity {}", capacity),
                    },
                    addr,
                );
            }
        }
    }

    fn handle_join_tournament(&mut self, id: &str, user_id: u32, username: &str, addr: SocketAddr) {
        match self.tournaments.join(id, user_id, username) {
            TournamentJoin::Joined { now_full } => {
                let summary = self.tournaments.get(id).map(|t| t.summary());
                self.send(
                    Packet::CurrentTournamentInfo {
                        tournament: summary,
                    },
                    addr,
                );
                self.broadcast_tournaments();

                if now_full {
                    let members: Vec<SocketAddr> = self
                        .tournaments
                        .get(id)
                        .map(|t| t.roster.clone())
                        .unwrap_or_default()
                        .into_iter()
                        .filter_map(|m| self.identities.addr_of(m.user_id))
                        .collect();
                    self.send_many(
                        Packet::StartTournament {
                            id: id.to_string(),
                            started: true,
                        },
                        members,
                    );
                }
            }
            // Silent on the wire; the client learns the truth from its
            // next state query.
            TournamentJoin::AlreadyJoined | TournamentJoin::Full | TournamentJoin::Unknown => {
                debug!("Ignored tournament join by {} for {}", user_id, id);
            }
        }
    }

    fn handle_leave_tournament(&mut self, id: &str, user_id: u32, addr: SocketAddr) {
        match self.tournaments.remove_player(user_id, id) {
            TournamentLeave::Removed | TournamentLeave::Destroyed => {
                self.send(Packet::CurrentTournamentInfo { tournament: None }, addr);
                self.broadcast_tournaments();
            }
            TournamentLeave::NotMember | TournamentLeave::Unknown => {}
        }
    }

    // ---- AI timers --------------------------------------------------------

    /// (Re)starts the targeting timer for an AI room at its current
    /// difficulty's cadence. The previous timer, if any, is aborted
    /// first, so a room never has two.
    fn restart_ai_timer(&mut self, room_id: &str) {
        let server_tx = self.server_tx.clone();
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };
        room.abort_ai_timer();

        let refresh = DifficultyProfile::for_level(room.ai_difficulty).refresh_interval;
        let id = room_id.to_string();
        room.ai_timer = Some(tokio::spawn(async move {
            let mut timer = interval(refresh);
            // The first tick fires immediately; skip it so the cadence
            // starts one full interval out.
            timer.tick().await;
            loop {
                timer.tick().await;
                if server_tx
                    .send(ServerMessage::RefreshAiTarget { room_id: id.clone() })
                    .is_err()
                {
                    break;
                }
            }
        }));
    }

    fn refresh_ai_target(&mut self, room_id: &str) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            // Timer message raced with room destruction; the aborted
            // task sends nothing further.
            return;
        };
        if room.ai_enabled && !room.state.ended {
            ai::retarget(&mut room.state, room.ai_difficulty, &mut self.rng);
        }
    }

    // ---- the match tick ---------------------------------------------------

    fn tick(&mut self) {
        self.tick_count += 1;

        for room_id in self.rooms.ids() {
            self.step_room(&room_id);
        }
        self.reap_empty_rooms();
        self.process_due_vacates();

        if self.tick_count % 600 == 0 && !self.rooms.is_empty() {
            debug!(
                "Tick {}: {} rooms, {} connections",
                self.tick_count,
                self.rooms.len(),
                self.identities.len()
            );
        }
    }

    /// Advances one room: AI movement, physics, viewer unicast, and
    /// finish handling. Isolated per room so one room's trouble never
    /// stalls the rest of the pass.
    fn step_room(&mut self, room_id: &str) {
        let (outcome, state) = {
            let Some(room) = self.rooms.get_mut(room_id) else {
                return;
            };
            if !room.is_playable() || room.state.ended {
                return;
            }

            if room.ai_enabled {
                ai::advance_paddle(&mut room.state, room.ai_difficulty);
            }
            let outcome = physics::step(&mut room.state, self.config.win_score, &mut self.rng);
            (outcome, room.state.clone())
        };

        // Only clients whose viewer binding names this room get the push.
        self.send_many(
            Packet::GameUpdate {
                room_id: room_id.to_string(),
                state,
            },
            self.identities.viewers_of(room_id),
        );

        if let Some(winner) = outcome.winner {
            self.finish_room(room_id, winner);
        }
    }

    /// Terminal handling for a won room: persist the result, notify the
    /// participants and viewers, destroy the room in the same pass.
    fn finish_room(&mut self, room_id: &str, winner: Side) {
        let Some(room) = self.rooms.get(room_id) else {
            return;
        };

        let humans = room.seated_humans();
        let duration_seconds = room.created_at.elapsed().as_secs();
        let (score_left, score_right) = (room.state.left.score, room.state.right.score);

        // Results are persisted for human-vs-human rooms only; a
        // scripted opponent has no row to update.
        let record = match (&room.seats[0], &room.seats[1]) {
            (
                Some(Seat::Human { user_id: p1, .. }),
                Some(Seat::Human { user_id: p2, .. }),
            ) => {
                let winner_id = match winner {
                    Side::Left => *p1,
                    Side::Right => *p2,
                };
                Some((
                    MatchRecord {
                        player1_id: *p1,
                        player2_id: *p2,
                        player1_score: score_left,
                        player2_score: score_right,
                        winner_id,
                        duration_seconds,
                    },
                    winner_id,
                    if winner_id == *p1 { *p2 } else { *p1 },
                ))
            }
            _ => None,
        };

        if let Some((record, winner_id, loser_id)) = record {
            record_match_resilient(self.store.as_ref(), &record);
            adjust_stats_resilient(self.store.as_ref(), winner_id, 1, 0);
            adjust_stats_resilient(self.store.as_ref(), loser_id, 0, 1);
        }

        info!(
            "Room {} finished {}-{} after {}s",
            room_id, score_left, score_right, duration_seconds
        );

        let mut recipients: Vec<SocketAddr> = humans
            .iter()
            .filter_map(|(id, _)| self.identities.addr_of(*id))
            .collect();
        for addr in self.identities.clear_viewers_of(room_id) {
            if !recipients.contains(&addr) {
                recipients.push(addr);
            }
        }
        self.send_many(
            Packet::GameEnded {
                room_id: room_id.to_string(),
            },
            recipients,
        );

        self.rooms.destroy_room(room_id);
        self.broadcast_lobby();
    }

    /// Destroys rooms whose last human vacated, after the step pass.
    fn reap_empty_rooms(&mut self) {
        let empty = self.rooms.empty_room_ids();
        if empty.is_empty() {
            return;
        }

        for room_id in &empty {
            self.rooms.destroy_room(room_id);
            let stale_viewers = self.identities.clear_viewers_of(room_id);
            self.send_many(
                Packet::GameEnded {
                    room_id: room_id.clone(),
                },
                stale_viewers,
            );
        }
        self.broadcast_lobby();
    }

    // ---- disconnect handling ---------------------------------------------

    fn sweep_stale_connections(&mut self) {
        for user_id in self.identities.stale_users(CONNECTION_TIMEOUT) {
            info!("Connection for user {} timed out", user_id);
            self.apply_disconnect(user_id);
        }
    }

    /// Tears down the connection and applies the configured seat policy.
    /// Under the default `Never` policy the seat stays occupied and a
    /// reconnect lands back on it.
    fn apply_disconnect(&mut self, user_id: u32) {
        self.identities.disconnect(user_id);
        match self.config.disconnect_policy {
            DisconnectPolicy::Never => {}
            DisconnectPolicy::Immediate => self.vacate_all_seats(user_id),
            DisconnectPolicy::Grace(grace) => {
                if !self.pending_vacates.iter().any(|(id, _)| *id == user_id) {
                    self.pending_vacates.push((user_id, Instant::now() + grace));
                }
            }
        }
    }

    fn process_due_vacates(&mut self) {
        if self.pending_vacates.is_empty() {
            return;
        }
        let now = Instant::now();
        let due: Vec<u32> = self
            .pending_vacates
            .iter()
            .filter(|(_, deadline)| *deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        self.pending_vacates.retain(|(_, deadline)| *deadline > now);

        for user_id in due {
            // Reconnection cancels the vacate.
            if self.identities.addr_of(user_id).is_some() {
                continue;
            }
            self.vacate_all_seats(user_id);
        }
    }

    fn vacate_all_seats(&mut self, user_id: u32) {
        let mut changed = false;
        for room_id in self.rooms.ids() {
            if self.rooms.leave_room(&room_id, user_id) {
                changed = true;
            }
        }
        if changed {
            self.broadcast_lobby();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SharedSecretVerifier;
    use crate::persistence::MemoryStore;
    use crate::rooms::JoinOutcome;
    use shared::FIELD_HEIGHT;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    async fn test_server(config: ServerConfig) -> (Server, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let server = Server::new(
            "127.0.0.1:0",
            config,
            Arc::new(SharedSecretVerifier::new("secret")),
            Arc::clone(&store) as Arc<dyn MatchStore>,
        )
        .await
        .unwrap();
        (server, store)
    }

    fn connect(server: &mut Server, id: u32, name: &str, port: u16) {
        server.handle_packet(
            Packet::Connect {
                token: format!("{}:{}:secret", id, name),
            },
            addr(port),
        );
    }

    #[tokio::test]
    async fn test_handshake_rejects_bad_token() {
        let (mut server, _) = test_server(ServerConfig::default()).await;

        server.handle_packet(
            Packet::Connect {
                token: "1:alice:wrong".to_string(),
            },
            addr(4000),
        );
        assert!(server.identities.is_empty());

        connect(&mut server, 1, "alice", 4000);
        assert_eq!(server.identities.find_by_addr(addr(4000)), Some(1));
    }

    #[tokio::test]
    async fn test_packets_from_unauthenticated_addr_are_dropped() {
        let (mut server, _) = test_server(ServerConfig::default()).await;

        server.handle_packet(
            Packet::CreateRoom {
                name: Some("r1".to_string()),
                ai: false,
            },
            addr(4000),
        );
        assert!(server.rooms.is_empty());
    }

    #[tokio::test]
    async fn test_create_ai_room_and_idempotent_rejoin() {
        let (mut server, _) = test_server(ServerConfig::default()).await;
        connect(&mut server, 1, "alice", 4000);

        server.handle_packet(
            Packet::CreateRoom {
                name: Some("r1".to_string()),
                ai: true,
            },
            addr(4000),
        );

        let room = server.rooms.get("r1").unwrap();
        assert!(room.ai_enabled);
        assert_eq!(room.seat_of(1), Some(0));
        assert!(room.ai_timer.is_some());

        // Re-join returns the existing seat, no duplicate.
        server.handle_packet(
            Packet::JoinRoomGame {
                room_id: "r1".to_string(),
            },
            addr(4000),
        );
        assert_eq!(server.rooms.get("r1").unwrap().human_count(), 1);
    }

    #[tokio::test]
    async fn test_join_missing_room_creates_it() {
        let (mut server, _) = test_server(ServerConfig::default()).await;
        connect(&mut server, 1, "alice", 4000);

        server.handle_packet(
            Packet::JoinRoomGame {
                room_id: "pickup".to_string(),
            },
            addr(4000),
        );

        let room = server.rooms.get("pickup").unwrap();
        assert!(!room.ai_enabled);
        assert_eq!(room.seat_of(1), Some(0));
    }

    #[tokio::test]
    async fn test_third_join_is_rejected() {
        let (mut server, _) = test_server(ServerConfig::default()).await;
        connect(&mut server, 1, "alice", 4000);
        connect(&mut server, 2, "bob", 4001);
        connect(&mut server, 3, "carol", 4002);

        server.handle_packet(
            Packet::CreateRoom {
                name: Some("r1".to_string()),
                ai: false,
            },
            addr(4000),
        );
        server.handle_packet(
            Packet::JoinRoomGame {
                room_id: "r1".to_string(),
            },
            addr(4001),
        );
        server.handle_packet(
            Packet::JoinRoomGame {
                room_id: "r1".to_string(),
            },
            addr(4002),
        );

        let room = server.rooms.get("r1").unwrap();
        assert_eq!(room.human_count(), 2);
        assert_eq!(room.seat_of(3), None);
    }

    #[tokio::test]
    async fn test_paddle_move_clamped_and_seat_routed() {
        let (mut server, _) = test_server(ServerConfig::default()).await;
        connect(&mut server, 1, "alice", 4000);
        connect(&mut server, 2, "bob", 4001);

        server.handle_packet(
            Packet::CreateRoom {
                name: Some("r1".to_string()),
                ai: false,
            },
            addr(4000),
        );
        server.handle_packet(
            Packet::JoinRoomGame {
                room_id: "r1".to_string(),
            },
            addr(4001),
        );

        server.handle_packet(
            Packet::PaddleMove {
                room_id: "r1".to_string(),
                y: FIELD_HEIGHT * 2.0,
            },
            addr(4000),
        );
        server.handle_packet(
            Packet::PaddleMove {
                room_id: "r1".to_string(),
                y: -50.0,
            },
            addr(4001),
        );

        let room = server.rooms.get("r1").unwrap();
        assert_eq!(room.state.left.y, PADDLE_MAX_Y);
        assert_eq!(room.state.right.y, 0.0);
    }

    #[tokio::test]
    async fn test_unknown_difficulty_is_noop() {
        let (mut server, _) = test_server(ServerConfig::default()).await;
        connect(&mut server, 1, "alice", 4000);
        server.handle_packet(
            Packet::CreateRoom {
                name: Some("r1".to_string()),
                ai: true,
            },
            addr(4000),
        );

        server.handle_packet(
            Packet::SetDifficulty {
                room_id: "r1".to_string(),
                level: "nightmare".to_string(),
            },
            addr(4000),
        );
        assert_eq!(server.rooms.get("r1").unwrap().ai_difficulty, Difficulty::Medium);

        server.handle_packet(
            Packet::SetDifficulty {
                room_id: "r1".to_string(),
                level: "hard".to_string(),
            },
            addr(4000),
        );
        assert_eq!(server.rooms.get("r1").unwrap().ai_difficulty, Difficulty::Hard);
    }

    #[tokio::test]
    async fn test_viewer_binding_does_not_touch_seats() {
        let (mut server, _) = test_server(ServerConfig::default()).await;
        connect(&mut server, 1, "alice", 4000);
        connect(&mut server, 2, "bob", 4001);

        server.handle_packet(
            Packet::CreateRoom {
                name: Some("r1".to_string()),
                ai: true,
            },
            addr(4000),
        );
        // Bob watches a room he is not seated in.
        server.handle_packet(
            Packet::RoomImIn {
                room_id: "r1".to_string(),
            },
            addr(4001),
        );

        assert_eq!(server.identities.viewers_of("r1"), vec![addr(4001)]);
        assert_eq!(server.rooms.get("r1").unwrap().human_count(), 1);
    }

    #[tokio::test]
    async fn test_physics_frozen_without_two_participants() {
        let (mut server, _) = test_server(ServerConfig::default()).await;
        connect(&mut server, 1, "alice", 4000);
        server.handle_packet(
            Packet::CreateRoom {
                name: Some("r1".to_string()),
                ai: false,
            },
            addr(4000),
        );

        let before = server.rooms.get("r1").unwrap().state.ball;
        server.tick();
        server.tick();
        let after = server.rooms.get("r1").unwrap().state.ball;

        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_match_finishes_records_once_and_room_is_reaped() {
        let mut config = ServerConfig::default();
        config.win_score = 1;
        let (mut server, store) = test_server(config).await;
        connect(&mut server, 1, "alice", 4000);
        connect(&mut server, 2, "bob", 4001);

        server.handle_packet(
            Packet::CreateRoom {
                name: Some("r1".to_string()),
                ai: false,
            },
            addr(4000),
        );
        server.handle_packet(
            Packet::JoinRoomGame {
                room_id: "r1".to_string(),
            },
            addr(4001),
        );

        // Park both paddles out of the ball's path and let the rally run
        // until someone concedes the single winning goal.
        {
            let room = server.rooms.get_mut("r1").unwrap();
            room.state.left.y = 300.0;
            room.state.right.y = 300.0;
            room.state.ball.y = 50.0;
            room.state.ball.vy = 0.0;
        }
        for _ in 0..1000 {
            server.tick();
            if !server.rooms.contains("r1") {
                break;
            }
        }

        assert!(!server.rooms.contains("r1"));
        let matches = store.matches();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].player1_id, 1);
        assert_eq!(matches[0].player2_id, 2);

        let (w1, l1) = store.stats_of(matches[0].winner_id);
        assert_eq!((w1, l1), (1, 0));
        let loser = if matches[0].winner_id == 1 { 2 } else { 1 };
        assert_eq!(store.stats_of(loser), (0, 1));
    }

    #[tokio::test]
    async fn test_ai_match_is_not_persisted() {
        let mut config = ServerConfig::default();
        config.win_score = 1;
        let (mut server, store) = test_server(config).await;
        connect(&mut server, 1, "alice", 4000);

        server.handle_packet(
            Packet::CreateRoom {
                name: Some("r1".to_string()),
                ai: true,
            },
            addr(4000),
        );
        {
            let room = server.rooms.get_mut("r1").unwrap();
            room.state.left.y = 300.0;
            room.state.right.y = 300.0;
            room.state.ball.y = 50.0;
            room.state.ball.vy = 0.0;
            // Freeze the scripted paddle where it stands.
            room.state.ai_target_y = 300.0;
        }
        for _ in 0..1000 {
            server.tick();
            if !server.rooms.contains("r1") {
                break;
            }
        }

        assert!(!server.rooms.contains("r1"));
        assert!(store.matches().is_empty());
    }

    #[tokio::test]
    async fn test_empty_room_reaped_and_id_recycled() {
        let (mut server, _) = test_server(ServerConfig::default()).await;
        connect(&mut server, 1, "alice", 4000);

        server.handle_packet(
            Packet::CreateRoom { name: None, ai: false },
            addr(4000),
        );
        assert!(server.rooms.contains("room1"));

        server.handle_packet(
            Packet::LeaveRoom {
                room_id: "room1".to_string(),
            },
            addr(4000),
        );
        assert!(server.rooms.contains("room1"));

        server.tick();
        assert!(!server.rooms.contains("room1"));

        server.handle_packet(
            Packet::CreateRoom { name: None, ai: false },
            addr(4000),
        );
        assert!(server.rooms.contains("room1"));
    }

    #[tokio::test]
    async fn test_viewer_binding_cleared_when_room_dies() {
        let (mut server, _) = test_server(ServerConfig::default()).await;
        connect(&mut server, 1, "alice", 4000);
        connect(&mut server, 2, "bob", 4001);

        server.handle_packet(
            Packet::CreateRoom {
                name: Some("r1".to_string()),
                ai: false,
            },
            addr(4000),
        );
        server.handle_packet(
            Packet::RoomImIn {
                room_id: "r1".to_string(),
            },
            addr(4001),
        );

        server.handle_packet(
            Packet::LeaveRoom {
                room_id: "r1".to_string(),
            },
            addr(4000),
        );
        server.tick();

        assert_eq!(server.identities.viewing_of(2), None);
    }

    #[tokio::test]
    async fn test_tournament_full_cycle() {
        let (mut server, _) = test_server(ServerConfig::default()).await;
        for (id, name, port) in [(1, "alice", 4000), (2, "bob", 4001), (3, "carol", 4002), (4, "dave", 4003), (5, "eve", 4004)] {
            connect(&mut server, id, name, port);
        }

        server.handle_packet(
            Packet::CreateTournament {
                name: "cup".to_string(),
                capacity: 4,
                kind: "single-elimination".to_string(),
            },
            addr(4000),
        );
        let tid = server.tournaments.current_for(1).unwrap().id.clone();

        for port in [4001, 4002, 4003] {
            server.handle_packet(Packet::JoinTournament { id: tid.clone() }, addr(port));
        }
        assert!(server.tournaments.get(&tid).unwrap().is_full());

        // Fifth entrant bounces off the full roster.
        server.handle_packet(Packet::JoinTournament { id: tid.clone() }, addr(4004));
        assert_eq!(server.tournaments.get(&tid).unwrap().roster.len(), 4);

        // Host leaves; exactly one member is promoted.
        server.handle_packet(Packet::LeaveTournament { id: tid.clone() }, addr(4000));
        let tournament = server.tournaments.get(&tid).unwrap();
        assert_eq!(tournament.roster.iter().filter(|m| m.is_host).count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_policy_never_keeps_seat() {
        let (mut server, _) = test_server(ServerConfig::default()).await;
        connect(&mut server, 1, "alice", 4000);
        server.handle_packet(
            Packet::CreateRoom {
                name: Some("r1".to_string()),
                ai: true,
            },
            addr(4000),
        );

        server.handle_packet(Packet::Disconnect, addr(4000));
        server.tick();

        // Seat survives; the room is not empty and stays live.
        assert!(server.rooms.contains("r1"));
        assert_eq!(server.rooms.get("r1").unwrap().seat_of(1), Some(0));
    }

    #[tokio::test]
    async fn test_disconnect_policy_immediate_vacates() {
        let mut config = ServerConfig::default();
        config.disconnect_policy = DisconnectPolicy::Immediate;
        let (mut server, _) = test_server(config).await;
        connect(&mut server, 1, "alice", 4000);
        server.handle_packet(
            Packet::CreateRoom {
                name: Some("r1".to_string()),
                ai: true,
            },
            addr(4000),
        );

        server.handle_packet(Packet::Disconnect, addr(4000));
        server.tick();

        assert!(!server.rooms.contains("r1"));
    }

    #[tokio::test]
    async fn test_grace_vacate_cancelled_by_reconnect() {
        let mut config = ServerConfig::default();
        config.disconnect_policy = DisconnectPolicy::Grace(Duration::from_secs(0));
        let (mut server, _) = test_server(config).await;
        connect(&mut server, 1, "alice", 4000);
        server.handle_packet(
            Packet::CreateRoom {
                name: Some("r1".to_string()),
                ai: true,
            },
            addr(4000),
        );

        server.handle_packet(Packet::Disconnect, addr(4000));
        // Reconnect before the vacate lands.
        connect(&mut server, 1, "alice", 4005);
        server.tick();

        assert!(server.rooms.contains("r1"));
        assert_eq!(server.rooms.get("r1").unwrap().seat_of(1), Some(0));

        // Rejoin via the new address still finds the seat.
        assert_eq!(
            server.rooms.join_room("r1", 1, "alice"),
            JoinOutcome::AlreadySeated {
                first_seat: true,
                ai_enabled: true
            }
        );
    }

    #[tokio::test]
    async fn test_grace_vacate_fires_after_deadline() {
        let mut config = ServerConfig::default();
        config.disconnect_policy = DisconnectPolicy::Grace(Duration::from_secs(0));
        let (mut server, _) = test_server(config).await;
        connect(&mut server, 1, "alice", 4000);
        server.handle_packet(
            Packet::CreateRoom {
                name: Some("r1".to_string()),
                ai: true,
            },
            addr(4000),
        );

        server.handle_packet(Packet::Disconnect, addr(4000));
        server.tick();

        // Zero grace means the vacate is due on the very next tick and
        // the emptied room is reaped on the one after.
        server.tick();
        assert!(!server.rooms.contains("r1"));
    }
}
