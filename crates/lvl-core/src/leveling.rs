use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

pub const XP_PER_LEVEL: u64 = 1_000;

pub fn level_for(total_xp: u64) -> u64 {
    total_xp / XP_PER_LEVEL
}

/// Share of the current level already earned, floored. Never reaches 100: an
/// exact level-up resets the remainder to zero.
pub fn progress_percentage(total_xp: u64) -> u8 {
    ((total_xp % XP_PER_LEVEL) * 100 / XP_PER_LEVEL) as u8
}

/// Levels entered when the total moves from `old_total` to `new_total`,
/// i.e. `(level(old), level(new)]`. Empty when no boundary is crossed.
pub fn crossed_levels(old_total: u64, new_total: u64) -> RangeInclusive<u64> {
    let previous = level_for(old_total);
    let current = level_for(new_total);
    if current <= previous {
        // start > end yields an empty range
        return 1..=0;
    }
    (previous + 1)..=current
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub total_xp: u64,
    pub level: u64,
    pub percentage: u8,
    pub xp_into_level: u64,
    pub xp_to_next_level: u64,
}

impl Progress {
    pub fn from_total(total_xp: u64) -> Self {
        let xp_into_level = total_xp % XP_PER_LEVEL;
        Self {
            total_xp,
            level: level_for(total_xp),
            percentage: progress_percentage(total_xp),
            xp_into_level,
            xp_to_next_level: XP_PER_LEVEL - xp_into_level,
        }
    }
}
