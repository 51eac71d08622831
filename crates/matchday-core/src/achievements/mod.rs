// Achievement badges derived from match history, and the award-once step
// that credits their XP.

pub mod awards;
pub mod streaks;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use streaks::{MatchAppearance, StreakKind, StreakScope};
use streaks::{hat_tricks_by_league, streak_length, HAT_TRICKS_PER_SET};

/// Streak tiers and the XP bonus attached to each badge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AchievementBonuses {
    /// Streak lengths that unlock a badge, ascending.
    pub streak_tiers: Vec<u32>,
    /// Bonus XP for each entry of `streak_tiers`.
    pub streak_bonus: Vec<i64>,
    /// Bonus XP per completed set of hat-tricks in one league.
    pub hat_trick_set_bonus: i64,
}

impl Default for AchievementBonuses {
    fn default() -> Self {
        AchievementBonuses {
            streak_tiers: vec![3, 5, 10],
            streak_bonus: vec![10, 25, 50],
            hat_trick_set_bonus: 20,
        }
    }
}

/// An unlocked badge. `id` is the key of the award-once marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    pub id: String,
    pub title: String,
    pub xp_bonus: i64,
}

/// Everything derived from one player's history. Recomputing it is always
/// safe; nothing here is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementReport {
    pub matches_played: usize,
    pub streaks: BTreeMap<StreakKind, u32>,
    /// Hat-tricks in the player's best league.
    pub best_league_hat_tricks: u32,
    /// Completed hat-trick sets in the best league.
    pub hat_trick_sets: u32,
    pub badges: Vec<Badge>,
}

/// Derive streaks, hat-trick counts and unlocked badges from a
/// chronologically ordered history.
pub fn evaluate(history: &[MatchAppearance], bonuses: &AchievementBonuses) -> AchievementReport {
    let streaks: BTreeMap<StreakKind, u32> = StreakKind::ALL
        .iter()
        .map(|&kind| (kind, streak_length(history, kind)))
        .collect();

    let best_league_hat_tricks = hat_tricks_by_league(history)
        .into_values()
        .max()
        .unwrap_or(0);
    let hat_trick_sets = best_league_hat_tricks / HAT_TRICKS_PER_SET;

    let mut badges = Vec::new();
    for (&kind, &length) in &streaks {
        for (&tier, &bonus) in bonuses.streak_tiers.iter().zip(&bonuses.streak_bonus) {
            if length >= tier {
                badges.push(Badge {
                    id: format!("{}_{tier}", kind.slug()),
                    title: format!("{} x{tier}", kind.title()),
                    xp_bonus: bonus,
                });
            }
        }
    }
    for set in 1..=hat_trick_sets {
        badges.push(Badge {
            id: format!("hat_trick_set_{set}"),
            title: format!("Hat-trick hero ({} hat-tricks)", set * HAT_TRICKS_PER_SET),
            xp_bonus: bonuses.hat_trick_set_bonus,
        });
    }

    AchievementReport {
        matches_played: history.len(),
        streaks,
        best_league_hat_tricks,
        hat_trick_sets,
        badges,
    }
}
