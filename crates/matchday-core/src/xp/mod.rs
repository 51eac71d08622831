// XP formula: the one function that turns a player's match into XP.

pub mod rates;
pub mod settlement;

use serde::{Deserialize, Serialize};

use crate::model::{StatLine, TeamResult};
use rates::XpRates;

/// Everything the formula looks at for one (match, player).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct XpInput {
    pub result: TeamResult,
    pub stats: StatLine,
    pub votes_received: u32,
    pub defensive_impact: bool,
    pub mentality: bool,
}

/// Itemized XP for one (match, player). `total()` is what gets settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XpBreakdown {
    pub base: i64,
    pub goals: i64,
    pub assists: i64,
    pub clean_sheets: i64,
    pub votes: i64,
    pub defensive_impact: i64,
    pub mentality: i64,
}

impl XpBreakdown {
    pub fn total(&self) -> i64 {
        self.base
            + self.goals
            + self.assists
            + self.clean_sheets
            + self.votes
            + self.defensive_impact
            + self.mentality
    }
}

/// Compute the XP a player earns for one match.
///
/// Only per-vote XP is counted for MOTM; there is no separate bonus for
/// finishing top of the vote. Both captain picks may apply to the same
/// player.
pub fn compute_match_xp(rates: &XpRates, input: &XpInput) -> XpBreakdown {
    let r = input.result;
    XpBreakdown {
        base: rates.base.for_result(r),
        goals: i64::from(input.stats.goals) * rates.goal.for_result(r),
        assists: i64::from(input.stats.assists) * rates.assist.for_result(r),
        clean_sheets: i64::from(input.stats.clean_sheets) * rates.clean_sheet,
        votes: i64::from(input.votes_received) * rates.motm_vote.for_result(r),
        defensive_impact: if input.defensive_impact {
            rates.defensive_impact.for_result(r)
        } else {
            0
        },
        mentality: if input.mentality {
            rates.mentality.for_result(r)
        } else {
            0
        },
    }
}
