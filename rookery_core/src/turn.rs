//! Turn ownership and think-time arithmetic.
//!
//! White moves when an even number of half-moves has been played (starting
//! at 0), Black when the count is odd. The think budget is a fixed fraction
//! of the side's remaining clock, floored to whole seconds.

use rookery_env::{Color, ThinkBudget};

/// Returns true if `color` is to move after `half_moves` half-moves.
pub fn is_our_turn(color: Color, half_moves: usize) -> bool {
    match color {
        Color::White => half_moves % 2 == 0,
        Color::Black => half_moves % 2 == 1,
    }
}

/// Seconds to spend on the next move: `floor(remaining_ms * proportion / 1000)`.
///
/// Negative or non-finite proportions yield a zero budget.
pub fn think_budget(remaining_ms: u64, proportion: f64) -> ThinkBudget {
    if !proportion.is_finite() || proportion <= 0.0 {
        return ThinkBudget::from_secs(0);
    }
    let secs = (remaining_ms as f64 * proportion / 1000.0).floor();
    ThinkBudget::from_secs(secs as u64)
}
