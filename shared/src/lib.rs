use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const FIELD_WIDTH: f32 = 800.0;
pub const FIELD_HEIGHT: f32 = 400.0;
pub const BALL_RADIUS: f32 = 10.0;
pub const BALL_SPEED: f32 = 2.0;
pub const PADDLE_WIDTH: f32 = 10.0;
pub const PADDLE_HEIGHT: f32 = 100.0;
pub const PADDLE_MAX_Y: f32 = FIELD_HEIGHT - PADDLE_HEIGHT;
pub const LEFT_PADDLE_X: f32 = 10.0;
pub const RIGHT_PADDLE_X: f32 = 780.0;
pub const DEFAULT_WIN_SCORE: u32 = 5;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Ball {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub radius: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Paddle {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub score: u32,
}

impl Paddle {
    pub fn new(x: f32) -> Self {
        Self {
            x,
            y: (FIELD_HEIGHT - PADDLE_HEIGHT) / 2.0,
            width: PADDLE_WIDTH,
            height: PADDLE_HEIGHT,
            score: 0,
        }
    }

    /// Leading edge the ball reflects off: right face for the left
    /// paddle, left face for the right paddle.
    pub fn leading_edge(&self) -> f32 {
        if self.x < FIELD_WIDTH / 2.0 {
            self.x + self.width
        } else {
            self.x
        }
    }

    pub fn covers_y(&self, y: f32) -> bool {
        y >= self.y && y <= self.y + self.height
    }
}

/// Authoritative per-room simulation state, broadcast verbatim to viewers.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GameState {
    pub ball: Ball,
    pub left: Paddle,
    pub right: Paddle,
    /// Where the scripted opponent is currently steering the right paddle.
    pub ai_target_y: f32,
    pub ended: bool,
}

impl GameState {
    pub fn new() -> Self {
        Self {
            ball: Ball {
                x: FIELD_WIDTH / 2.0,
                y: FIELD_HEIGHT / 2.0,
                vx: BALL_SPEED,
                vy: BALL_SPEED,
                radius: BALL_RADIUS,
            },
            left: Paddle::new(LEFT_PADDLE_X),
            right: Paddle::new(RIGHT_PADDLE_X),
            ai_target_y: (FIELD_HEIGHT - PADDLE_HEIGHT) / 2.0,
            ended: false,
        }
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

/// Scripted-opponent difficulty. Unknown levels fail to parse and the
/// requesting operation becomes a no-op.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl FromStr for Difficulty {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            _ => Err(()),
        }
    }
}

/// One row of the lobby listing broadcast on every occupancy change.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RoomSummary {
    pub room_id: String,
    pub players: Vec<String>,
    pub ai_enabled: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TournamentMember {
    pub user_id: u32,
    pub username: String,
    pub is_host: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TournamentSummary {
    pub id: String,
    pub name: String,
    pub capacity: usize,
    pub kind: String,
    pub players: Vec<TournamentMember>,
    pub started: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    // Client -> server
    Connect {
        token: String,
    },
    CreateRoom {
        name: Option<String>,
        ai: bool,
    },
    JoinRoomGame {
        room_id: String,
    },
    RoomImIn {
        room_id: String,
    },
    PaddleMove {
        room_id: String,
        y: f32,
    },
    SetDifficulty {
        room_id: String,
        level: String,
    },
    LeaveRoom {
        room_id: String,
    },
    CreateTournament {
        name: String,
        capacity: usize,
        kind: String,
    },
    JoinTournament {
        id: String,
    },
    LeaveTournament {
        id: String,
    },
    CheckTournamentLobbies,
    CurrentTournament,
    Disconnect,

    // Server -> client
    Connected {
        user_id: u32,
    },
    Rejected {
        reason: String,
    },
    LobbyUpdate {
        rooms: Vec<RoomSummary>,
    },
    GameUpdate {
        room_id: String,
        state: GameState,
    },
    GameEnded {
        room_id: String,
    },
    RoomJoinedInfo {
        room_id: String,
        first_seat: bool,
        ai_enabled: bool,
    },
    RoomFull {
        room_id: String,
    },
    WaitingForOpponent {
        room_id: String,
    },
    GameReady {
        room_id: String,
    },
    TournamentLobbyInfo {
        tournaments: Vec<TournamentSummary>,
    },
    CurrentTournamentInfo {
        tournament: Option<TournamentSummary>,
    },
    StartTournament {
        id: String,
        started: bool,
    },
}
