// Streak and count analytics over a player's published match history.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{LeagueId, MatchId, TeamResult};

/// Goals in one match that count as a hat-trick.
pub const HAT_TRICK_GOALS: u32 = 3;

/// Hat-tricks within one league needed for each hat-trick badge.
pub const HAT_TRICKS_PER_SET: u32 = 3;

/// One published match from a single player's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchAppearance {
    pub match_id: MatchId,
    pub league_id: LeagueId,
    pub played_at: DateTime<Utc>,
    pub result: TeamResult,
    pub goals: u32,
    pub assists: u32,
    /// Goals conceded by the player's team.
    pub team_conceded: u32,
    pub votes_received: u32,
}

/// Whether a streak is counted inside each league or across the whole
/// history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakScope {
    League,
    Career,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakKind {
    Win,
    Scoring,
    Assist,
    Motm,
    CleanSheetWin,
}

impl StreakKind {
    pub const ALL: [StreakKind; 5] = [
        StreakKind::Win,
        StreakKind::Scoring,
        StreakKind::Assist,
        StreakKind::Motm,
        StreakKind::CleanSheetWin,
    ];

    pub fn scope(&self) -> StreakScope {
        match self {
            StreakKind::Win | StreakKind::Scoring | StreakKind::Assist => StreakScope::League,
            StreakKind::Motm | StreakKind::CleanSheetWin => StreakScope::Career,
        }
    }

    /// Whether a single appearance keeps this streak alive.
    pub fn qualifies(&self, m: &MatchAppearance) -> bool {
        match self {
            StreakKind::Win => m.result == TeamResult::Win,
            StreakKind::Scoring => m.goals >= 1,
            StreakKind::Assist => m.assists >= 1,
            StreakKind::Motm => m.votes_received >= 1,
            StreakKind::CleanSheetWin => m.result == TeamResult::Win && m.team_conceded == 0,
        }
    }

    pub fn slug(&self) -> &'static str {
        match self {
            StreakKind::Win => "win_streak",
            StreakKind::Scoring => "scoring_streak",
            StreakKind::Assist => "assist_streak",
            StreakKind::Motm => "motm_streak",
            StreakKind::CleanSheetWin => "clean_sheet_win_streak",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            StreakKind::Win => "Winning run",
            StreakKind::Scoring => "On target",
            StreakKind::Assist => "Playmaker",
            StreakKind::Motm => "Crowd favourite",
            StreakKind::CleanSheetWin => "Shut-out specialist",
        }
    }
}

impl fmt::Display for StreakKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Longest run of consecutive `true` values.
pub fn longest_run<I: IntoIterator<Item = bool>>(flags: I) -> u32 {
    let mut best = 0;
    let mut current = 0;
    for hit in flags {
        if hit {
            current += 1;
            best = best.max(current);
        } else {
            current = 0;
        }
    }
    best
}

/// Split a chronological history into per-league histories, each still in
/// chronological order.
fn by_league(history: &[MatchAppearance]) -> BTreeMap<LeagueId, Vec<&MatchAppearance>> {
    let mut leagues: BTreeMap<LeagueId, Vec<&MatchAppearance>> = BTreeMap::new();
    for m in history {
        leagues.entry(m.league_id).or_default().push(m);
    }
    leagues
}

/// Longest streak of `kind` in `history`, which must be in chronological
/// order. League-scoped kinds are measured per league and the best league
/// wins; a run never continues across a match in a different league.
pub fn streak_length(history: &[MatchAppearance], kind: StreakKind) -> u32 {
    match kind.scope() {
        StreakScope::Career => longest_run(history.iter().map(|m| kind.qualifies(m))),
        StreakScope::League => by_league(history)
            .values()
            .map(|games| longest_run(games.iter().map(|m| kind.qualifies(m))))
            .max()
            .unwrap_or(0),
    }
}

/// Hat-tricks scored, per league.
pub fn hat_tricks_by_league(history: &[MatchAppearance]) -> BTreeMap<LeagueId, u32> {
    let mut counts = BTreeMap::new();
    for m in history.iter().filter(|m| m.goals >= HAT_TRICK_GOALS) {
        *counts.entry(m.league_id).or_insert(0) += 1;
    }
    counts
}
