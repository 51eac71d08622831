// Award-once crediting of badge XP, keyed by (player, badge id).

use rusqlite::Connection;
use tracing::info;

use super::{evaluate, AchievementBonuses, AchievementReport, Badge};
use crate::db::{ledger, matches};
use crate::error::{MatchdayError, Result};
use crate::model::PlayerId;

/// Credit every badge in `badges` the player has not been credited for yet.
/// The marker set and the XP move together inside the caller's transaction.
/// Returns only the badges credited by this call.
pub fn award_once(conn: &Connection, player_id: PlayerId, badges: &[Badge]) -> Result<Vec<Badge>> {
    let player = ledger::load_player(conn, player_id)?.ok_or(MatchdayError::NotFound {
        entity: "player",
        id: player_id,
    })?;

    let mut markers = player.achievements;
    let mut awarded = Vec::new();
    for badge in badges {
        if !markers.insert(badge.id.clone()) {
            continue;
        }
        ledger::apply_xp_delta(conn, player_id, badge.xp_bonus)?;
        info!(player_id, badge = %badge.id, bonus = badge.xp_bonus, "achievement awarded");
        awarded.push(badge.clone());
    }

    if !awarded.is_empty() {
        ledger::save_markers(conn, player_id, &markers)?;
    }
    Ok(awarded)
}

/// Recompute the player's achievements from the store and credit new ones.
pub fn award_for_player(
    conn: &Connection,
    bonuses: &AchievementBonuses,
    player_id: PlayerId,
) -> Result<(AchievementReport, Vec<Badge>)> {
    let history = matches::published_history(conn, player_id)?;
    let report = evaluate(&history, bonuses);
    let awarded = award_once(conn, player_id, &report.badges)?;
    Ok((report, awarded))
}
