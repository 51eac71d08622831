// Domain records shared by the store, the match lifecycle and settlement.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type PlayerId = i64;
pub type MatchId = i64;
pub type LeagueId = i64;
pub type SeasonId = i64;

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Lifecycle status of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Scheduled,
    ResultUploaded,
    RevisionRequested,
    ResultPublished,
}

impl MatchStatus {
    /// Column value stored in `matches.status`.
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Scheduled => "SCHEDULED",
            MatchStatus::ResultUploaded => "RESULT_UPLOADED",
            MatchStatus::RevisionRequested => "REVISION_REQUESTED",
            MatchStatus::ResultPublished => "RESULT_PUBLISHED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SCHEDULED" => Some(MatchStatus::Scheduled),
            "RESULT_UPLOADED" => Some(MatchStatus::ResultUploaded),
            "REVISION_REQUESTED" => Some(MatchStatus::RevisionRequested),
            "RESULT_PUBLISHED" => Some(MatchStatus::ResultPublished),
            _ => None,
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of a match a player lines up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamSide {
    Home,
    Away,
}

impl TeamSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TeamSide::Home => "home",
            TeamSide::Away => "away",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "home" => Some(TeamSide::Home),
            "away" => Some(TeamSide::Away),
            _ => None,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            TeamSide::Home => TeamSide::Away,
            TeamSide::Away => TeamSide::Home,
        }
    }
}

impl fmt::Display for TeamSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a match from one team's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamResult {
    Win,
    Draw,
    Lose,
}

impl TeamResult {
    /// Result for a team that scored `scored` and conceded `conceded`.
    pub fn from_goals(scored: u32, conceded: u32) -> Self {
        match scored.cmp(&conceded) {
            std::cmp::Ordering::Greater => TeamResult::Win,
            std::cmp::Ordering::Less => TeamResult::Lose,
            std::cmp::Ordering::Equal => TeamResult::Draw,
        }
    }
}

/// Roles a captain may hand to one player of their own side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PickCategory {
    DefensiveImpact,
    Mentality,
}

impl PickCategory {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "defensiveImpact" | "defensive_impact" | "defense" => Some(PickCategory::DefensiveImpact),
            "mentality" => Some(PickCategory::Mentality),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// The two captain picks held by one side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidePicks {
    pub defensive_impact: Option<PlayerId>,
    pub mentality: Option<PlayerId>,
}

impl SidePicks {
    pub fn get(&self, category: PickCategory) -> Option<PlayerId> {
        match category {
            PickCategory::DefensiveImpact => self.defensive_impact,
            PickCategory::Mentality => self.mentality,
        }
    }
}

/// Suggested correction submitted by a captain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedScore {
    pub home_goals: u32,
    pub away_goals: u32,
    pub submitted_by: PlayerId,
}

/// A scheduled or played match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub league_id: LeagueId,
    pub season_id: Option<SeasonId>,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub home_players: BTreeSet<PlayerId>,
    pub away_players: BTreeSet<PlayerId>,
    pub home_captain: PlayerId,
    pub away_captain: PlayerId,
    pub home_goals: Option<u32>,
    pub away_goals: Option<u32>,
    pub status: MatchStatus,
    pub home_confirmed: bool,
    pub away_confirmed: bool,
    pub suggested: Option<SuggestedScore>,
    pub result_uploaded_at: Option<DateTime<Utc>>,
    pub result_published_at: Option<DateTime<Utc>>,
    pub home_picks: SidePicks,
    pub away_picks: SidePicks,
}

impl Match {
    /// Side the player lines up on, if they are on either roster.
    pub fn side_of(&self, player_id: PlayerId) -> Option<TeamSide> {
        if self.home_players.contains(&player_id) {
            Some(TeamSide::Home)
        } else if self.away_players.contains(&player_id) {
            Some(TeamSide::Away)
        } else {
            None
        }
    }

    pub fn captain(&self, side: TeamSide) -> PlayerId {
        match side {
            TeamSide::Home => self.home_captain,
            TeamSide::Away => self.away_captain,
        }
    }

    /// Side captained by `player_id`, if any.
    pub fn captained_side(&self, player_id: PlayerId) -> Option<TeamSide> {
        if self.home_captain == player_id {
            Some(TeamSide::Home)
        } else if self.away_captain == player_id {
            Some(TeamSide::Away)
        } else {
            None
        }
    }

    pub fn picks(&self, side: TeamSide) -> &SidePicks {
        match side {
            TeamSide::Home => &self.home_picks,
            TeamSide::Away => &self.away_picks,
        }
    }

    pub fn roster(&self, side: TeamSide) -> &BTreeSet<PlayerId> {
        match side {
            TeamSide::Home => &self.home_players,
            TeamSide::Away => &self.away_players,
        }
    }

    /// Every player on either roster, home first.
    pub fn participants(&self) -> Vec<PlayerId> {
        self.home_players
            .iter()
            .chain(self.away_players.iter())
            .copied()
            .collect()
    }

    /// Goals scored and conceded by `side`, if a result exists.
    pub fn score_for(&self, side: TeamSide) -> Option<(u32, u32)> {
        let (home, away) = (self.home_goals?, self.away_goals?);
        Some(match side {
            TeamSide::Home => (home, away),
            TeamSide::Away => (away, home),
        })
    }

    pub fn result_for(&self, side: TeamSide) -> Option<TeamResult> {
        self.score_for(side)
            .map(|(scored, conceded)| TeamResult::from_goals(scored, conceded))
    }

    pub fn is_published(&self) -> bool {
        self.status == MatchStatus::ResultPublished
    }
}

/// Raw per-player numbers for one match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatLine {
    pub goals: u32,
    pub assists: u32,
    pub clean_sheets: u32,
}

/// Ledger row for one (match, player) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerMatchStatistic {
    pub match_id: MatchId,
    pub player_id: PlayerId,
    pub stats: StatLine,
    /// XP already credited to the player for this match.
    pub xp_awarded: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub match_id: MatchId,
    pub voter_id: PlayerId,
    pub candidate_id: PlayerId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub display_name: String,
    pub is_guest: bool,
    pub xp: i64,
    /// Badge ids whose XP bonus has already been credited.
    pub achievements: BTreeSet<String>,
}

// ---------------------------------------------------------------------------
// Request-side types
// ---------------------------------------------------------------------------

/// Authenticated caller as resolved by the auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub player_id: PlayerId,
    /// Whether the caller administers the league the request targets.
    pub is_league_admin: bool,
}

impl Caller {
    pub fn player(player_id: PlayerId) -> Self {
        Caller {
            player_id,
            is_league_admin: false,
        }
    }

    pub fn admin(player_id: PlayerId) -> Self {
        Caller {
            player_id,
            is_league_admin: true,
        }
    }
}

/// Who a stat submission is about, before resolution to a canonical id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Participant {
    Registered {
        #[serde(rename = "playerId")]
        player_id: PlayerId,
    },
    Guest { name: String },
}

/// Input to match scheduling.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMatch {
    pub league_id: LeagueId,
    #[serde(default)]
    pub season_id: Option<SeasonId>,
    #[serde(default)]
    pub scheduled_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduled_end: Option<DateTime<Utc>>,
    pub home_players: Vec<PlayerId>,
    pub away_players: Vec<PlayerId>,
    pub home_captain: PlayerId,
    pub away_captain: PlayerId,
}
