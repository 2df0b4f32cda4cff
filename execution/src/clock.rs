//! Wall-clock phase of a draw.
//!
//! A draw accepts tickets until `draw_date - lock_window`, after which it is observed as
//! locked. Completion, once recorded, overrides any time-based phase. The clock is a pure
//! function of its inputs; callers re-evaluate it on every poll.

use lotto_types::{Draw, DrawPhase};

/// Default lock window: ticket sales close one minute before the draw.
pub const LOCK_WINDOW_MS: u64 = 60_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawClock {
    lock_window_ms: u64,
}

impl Default for DrawClock {
    fn default() -> Self {
        Self::new(LOCK_WINDOW_MS)
    }
}

impl DrawClock {
    pub fn new(lock_window_ms: u64) -> Self {
        Self { lock_window_ms }
    }

    pub fn lock_window_ms(&self) -> u64 {
        self.lock_window_ms
    }

    /// Phase implied by the clock alone.
    ///
    /// Locked when `draw_date - now <= lock_window`, including any time after the draw date.
    pub fn phase(&self, now_ms: u64, draw_date_ms: u64, is_completed: bool) -> DrawPhase {
        if is_completed {
            return DrawPhase::Completed;
        }
        if now_ms.saturating_add(self.lock_window_ms) >= draw_date_ms {
            DrawPhase::Locked
        } else {
            DrawPhase::Open
        }
    }

    /// Phase of a stored draw: the later of its persisted status and the clock phase.
    pub fn observe(&self, draw: &Draw, now_ms: u64) -> DrawPhase {
        let clock = self.phase(now_ms, draw.draw_date_ms, draw.is_completed());
        clock.max(DrawPhase::from(draw.status))
    }

    /// Instant at which ticket sales close.
    pub fn locks_at_ms(&self, draw_date_ms: u64) -> u64 {
        draw_date_ms.saturating_sub(self.lock_window_ms)
    }

    /// Signed countdown to the draw; negative once the draw date has passed.
    pub fn time_remaining_ms(now_ms: u64, draw_date_ms: u64) -> i64 {
        let remaining = draw_date_ms as i128 - now_ms as i128;
        remaining.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }
}
