//! Scripted-opponent control for the right paddle.
//!
//! Two cadences per AI room: a slow targeting refresh that predicts where
//! the ball will cross the paddle plane, and a fast per-tick movement step
//! that chases the last target at a capped speed. The refresh runs on its
//! own tokio task (owned by the room, see `rooms.rs`) so its interval can
//! differ per difficulty without touching the match tick.

use rand::Rng;
use shared::{Difficulty, GameState, FIELD_HEIGHT, PADDLE_MAX_Y};
use std::time::Duration;

/// Tuning knobs for one difficulty level.
#[derive(Debug, Clone, Copy)]
pub struct DifficultyProfile {
    /// Max paddle travel per physics tick.
    pub paddle_speed: f32,
    /// Total width of the uniform aim error applied to predictions.
    pub error_range: f32,
    /// How often the target is recomputed.
    pub refresh_interval: Duration,
}

impl DifficultyProfile {
    pub fn for_level(level: Difficulty) -> Self {
        match level {
            Difficulty::Easy => Self {
                paddle_speed: 3.0,
                error_range: 40.0,
                refresh_interval: Duration::from_millis(1500),
            },
            Difficulty::Medium => Self {
                paddle_speed: 5.0,
                error_range: 20.0,
                refresh_interval: Duration::from_millis(1000),
            },
            Difficulty::Hard => Self {
                paddle_speed: 8.0,
                error_range: 5.0,
                refresh_interval: Duration::from_millis(500),
            },
        }
    }
}

/// Recomputes `ai_target_y` from the current ball trajectory.
///
/// When the ball is headed toward the AI paddle the crossing point is
/// projected linearly, clamped to the field, and perturbed by a uniform
/// error from the difficulty profile. A ball moving away relaxes the
/// target to field center.
pub fn retarget(state: &mut GameState, level: Difficulty, rng: &mut impl Rng) {
    let profile = DifficultyProfile::for_level(level);
    let ball = state.ball;
    let paddle = state.right;

    if ball.vx > 0.0 {
        let ticks_to_reach = (paddle.x - ball.x) / ball.vx;
        let predicted = ball.y + ball.vy * ticks_to_reach;
        let clamped = predicted.clamp(0.0, PADDLE_MAX_Y);
        let error = rng.gen_range(-profile.error_range / 2.0..=profile.error_range / 2.0);
        state.ai_target_y = clamped + error;
    } else {
        state.ai_target_y = (FIELD_HEIGHT - paddle.height) / 2.0;
    }
}

/// Moves the AI paddle toward the current target, never overshooting.
/// Called once per physics tick, before the ball is stepped.
pub fn advance_paddle(state: &mut GameState, level: Difficulty) {
    let speed = DifficultyProfile::for_level(level).paddle_speed;
    let paddle = &mut state.right;

    if paddle.y < state.ai_target_y {
        paddle.y += speed.min(state.ai_target_y - paddle.y);
    } else if paddle.y > state.ai_target_y {
        paddle.y -= speed.min(paddle.y - state.ai_target_y);
    }
}
