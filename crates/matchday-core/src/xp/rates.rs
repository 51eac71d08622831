// XP rate table. This is the only place rate values live; every settlement,
// preview and report reads them from here.

use serde::{Deserialize, Serialize};

use crate::model::TeamResult;

/// One rate that varies with the team result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRates {
    pub win: i64,
    pub draw: i64,
    pub lose: i64,
}

impl ResultRates {
    pub const fn new(win: i64, draw: i64, lose: i64) -> Self {
        ResultRates { win, draw, lose }
    }

    pub fn for_result(&self, result: TeamResult) -> i64 {
        match result {
            TeamResult::Win => self.win,
            TeamResult::Draw => self.draw,
            TeamResult::Lose => self.lose,
        }
    }
}

/// Full rate table used by [`super::compute_match_xp`].
///
/// Missing keys in `[xp]` fall back to the built-in values, so a config can
/// override a single rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct XpRates {
    /// Flat XP for the team result.
    pub base: ResultRates,
    pub goal: ResultRates,
    pub assist: ResultRates,
    pub motm_vote: ResultRates,
    pub defensive_impact: ResultRates,
    pub mentality: ResultRates,
    /// Per clean sheet, independent of the result.
    pub clean_sheet: i64,
}

impl Default for XpRates {
    fn default() -> Self {
        XpRates {
            base: ResultRates::new(30, 15, 5),
            goal: ResultRates::new(3, 2, 1),
            assist: ResultRates::new(2, 1, 1),
            motm_vote: ResultRates::new(2, 1, 1),
            defensive_impact: ResultRates::new(2, 1, 1),
            mentality: ResultRates::new(2, 1, 1),
            clean_sheet: 5,
        }
    }
}

impl XpRates {
    /// Every rate with its dotted config key, for validation and reporting.
    pub fn named_rates(&self) -> Vec<(String, i64)> {
        let tables = [
            ("base", &self.base),
            ("goal", &self.goal),
            ("assist", &self.assist),
            ("motm_vote", &self.motm_vote),
            ("defensive_impact", &self.defensive_impact),
            ("mentality", &self.mentality),
        ];
        let mut out = Vec::with_capacity(tables.len() * 3 + 1);
        for (name, rates) in tables {
            out.push((format!("{name}.win"), rates.win));
            out.push((format!("{name}.draw"), rates.draw));
            out.push((format!("{name}.lose"), rates.lose));
        }
        out.push(("clean_sheet".to_string(), self.clean_sheet));
        out
    }
}
