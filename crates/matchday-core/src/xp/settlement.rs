// Delta settlement against the statistic ledger.
//
// `xp_awarded` on each (match, player) row is what has already been paid.
// Settling computes the current XP with `compute_match_xp`, credits only the
// difference, and overwrites `xp_awarded`, so any number of re-runs converge
// on the same total.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::rates::XpRates;
use super::{compute_match_xp, XpBreakdown, XpInput};
use crate::db::{ledger, matches};
use crate::error::{MatchdayError, Result};
use crate::model::{Match, MatchId, PlayerId};

/// Result of settling (or previewing) one (match, player).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementOutcome {
    pub match_id: MatchId,
    pub player_id: PlayerId,
    pub breakdown: XpBreakdown,
    /// `xp_awarded` before this run.
    pub previous_xp: i64,
    /// `xp_awarded` after this run (equal to `breakdown.total()`).
    pub new_xp: i64,
    pub delta: i64,
    /// Player's running XP after the delta. `None` for previews.
    pub player_xp: Option<i64>,
}

/// Gather the formula inputs for `player_id` from the match row and the
/// ledger. Fails if the player is not on either roster or the match has no
/// result.
pub fn xp_input(conn: &Connection, m: &Match, player_id: PlayerId) -> Result<XpInput> {
    let side = m.side_of(player_id).ok_or(MatchdayError::NotParticipant {
        player_id,
        match_id: m.id,
    })?;
    let result = m.result_for(side).ok_or(MatchdayError::ResultNotUploaded { match_id: m.id })?;
    let stats = ledger::load_stat(conn, m.id, player_id)?
        .map(|s| s.stats)
        .unwrap_or_default();
    let votes_received = ledger::votes_received(conn, m.id, player_id)?;
    let picks = m.picks(side);

    Ok(XpInput {
        result,
        stats,
        votes_received,
        defensive_impact: picks.defensive_impact == Some(player_id),
        mentality: picks.mentality == Some(player_id),
    })
}

fn load_fresh(conn: &Connection, match_id: MatchId) -> Result<Match> {
    matches::load_match(conn, match_id)?.ok_or(MatchdayError::NotFound {
        entity: "match",
        id: match_id,
    })
}

/// Settle one player of an already loaded, published match.
fn settle_one(
    conn: &Connection,
    rates: &XpRates,
    m: &Match,
    player_id: PlayerId,
    now: DateTime<Utc>,
) -> Result<SettlementOutcome> {
    let breakdown = compute_match_xp(rates, &xp_input(conn, m, player_id)?);
    let new_xp = breakdown.total();
    let existing = ledger::load_stat(conn, m.id, player_id)?;
    let previous_xp = existing.as_ref().map(|s| s.xp_awarded).unwrap_or(0);
    let delta = new_xp - previous_xp;

    let player_xp = ledger::apply_xp_delta(conn, player_id, delta)?;
    if existing.is_none() || delta != 0 {
        ledger::set_xp_awarded(conn, m.id, player_id, new_xp, now)?;
    }

    debug!(
        match_id = m.id,
        player_id, previous_xp, new_xp, delta, player_xp, "settled player"
    );

    Ok(SettlementOutcome {
        match_id: m.id,
        player_id,
        breakdown,
        previous_xp,
        new_xp,
        delta,
        player_xp: Some(player_xp),
    })
}

/// Re-settle the given players of a published match. The match is read
/// fresh from `conn`, so changes made earlier in the same transaction are
/// taken into account. Duplicate ids are settled once.
pub fn settle_players(
    conn: &Connection,
    rates: &XpRates,
    match_id: MatchId,
    players: &[PlayerId],
    now: DateTime<Utc>,
) -> Result<Vec<SettlementOutcome>> {
    let m = load_fresh(conn, match_id)?;
    if !m.is_published() {
        return Err(MatchdayError::InvalidTransition {
            action: "settle XP",
            status: m.status,
        });
    }

    let unique: BTreeSet<PlayerId> = players.iter().copied().collect();
    let mut outcomes = Vec::with_capacity(unique.len());
    for player_id in unique {
        outcomes.push(settle_one(conn, rates, &m, player_id, now)?);
    }

    let net: i64 = outcomes.iter().map(|o| o.delta).sum();
    info!(match_id, players = outcomes.len(), net_delta = net, "settlement applied");
    Ok(outcomes)
}

/// Re-settle every participant of a published match.
pub fn settle_all(
    conn: &Connection,
    rates: &XpRates,
    match_id: MatchId,
    now: DateTime<Utc>,
) -> Result<Vec<SettlementOutcome>> {
    let participants = load_fresh(conn, match_id)?.participants();
    settle_players(conn, rates, match_id, &participants, now)
}

/// Compute what settlement would do for every participant without writing.
/// Works on any match that has a result, published or not.
pub fn preview_all(conn: &Connection, rates: &XpRates, match_id: MatchId) -> Result<Vec<SettlementOutcome>> {
    let m = load_fresh(conn, match_id)?;
    let mut outcomes = Vec::new();
    for player_id in m.participants() {
        let breakdown = compute_match_xp(rates, &xp_input(conn, &m, player_id)?);
        let previous_xp = ledger::load_stat(conn, m.id, player_id)?
            .map(|s| s.xp_awarded)
            .unwrap_or(0);
        outcomes.push(SettlementOutcome {
            match_id,
            player_id,
            breakdown,
            previous_xp,
            new_xp: breakdown.total(),
            delta: breakdown.total() - previous_xp,
            player_xp: None,
        });
    }
    Ok(outcomes)
}
