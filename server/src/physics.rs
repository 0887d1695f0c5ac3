//! Pure per-tick Pong simulation for one room.
//!
//! The step has no knowledge of transport, timers, or persistence. The
//! caller feeds it a mutable [`GameState`] and reads goal/win events off
//! the returned [`StepOutcome`].

use rand::Rng;
use shared::{GameState, BALL_SPEED, FIELD_HEIGHT, FIELD_WIDTH};

/// Which paddle an event belongs to. Seat A drives the left paddle,
/// seat B (human or AI) the right one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// What happened during one physics step.
#[derive(Debug, Default, Clone, Copy)]
pub struct StepOutcome {
    /// Side that scored this tick, if any.
    pub goal: Option<Side>,
    /// Side that just reached the win threshold, if any.
    pub winner: Option<Side>,
}

/// Advances the room state by one tick.
///
/// Paddle contact is a plane-crossing test over the ball's travel this
/// tick rather than an exact-position compare, so collisions hold up at
/// any ball speed or tick rate. A ball that passes a paddle is left
/// unclamped; the goal-line check below is what ends the rally.
pub fn step(state: &mut GameState, win_score: u32, rng: &mut impl Rng) -> StepOutcome {
    let mut outcome = StepOutcome::default();
    if state.ended {
        return outcome;
    }

    let prev_x = state.ball.x;
    state.ball.x += state.ball.vx;
    state.ball.y += state.ball.vy;

    if state.ball.y <= 0.0 || state.ball.y >= FIELD_HEIGHT {
        state.ball.vy = -state.ball.vy;
    }

    let left_plane = state.left.leading_edge();
    if state.ball.vx < 0.0
        && prev_x >= left_plane
        && state.ball.x <= left_plane
        && state.left.covers_y(state.ball.y)
    {
        state.ball.x = left_plane;
        state.ball.vx = -state.ball.vx;
    }

    let right_plane = state.right.leading_edge();
    if state.ball.vx > 0.0
        && prev_x <= right_plane
        && state.ball.x >= right_plane
        && state.right.covers_y(state.ball.y)
    {
        state.ball.x = right_plane;
        state.ball.vx = -state.ball.vx;
    }

    if state.ball.x < 0.0 {
        state.right.score += 1;
        outcome.goal = Some(Side::Right);
        reset_ball(state, rng);
        if state.right.score >= win_score {
            state.ended = true;
            outcome.winner = Some(Side::Right);
        }
    } else if state.ball.x > FIELD_WIDTH {
        state.left.score += 1;
        outcome.goal = Some(Side::Left);
        reset_ball(state, rng);
        if state.left.score >= win_score {
            state.ended = true;
            outcome.winner = Some(Side::Left);
        }
    }

    outcome
}

/// Serves from center, horizontal direction reversed from the rally that
/// just ended, vertical direction randomized.
fn reset_ball(state: &mut GameState, rng: &mut impl Rng) {
    state.ball.x = FIELD_WIDTH / 2.0;
    state.ball.y = FIELD_HEIGHT / 2.0;
    state.ball.vx = if state.ball.vx > 0.0 {
        -BALL_SPEED
    } else {
        BALL_SPEED
    };
    state.ball.vy = if rng.gen_bool(0.5) {
        BALL_SPEED
    } else {
        -BALL_SPEED
    };
}
