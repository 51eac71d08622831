// Player, statistic-ledger and vote rows.
//
// Every function takes a plain `&Connection` so it can run inside the
// caller's transaction.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{decode_ts, encode_ts};
use crate::model::{LeagueId, MatchId, Player, PlayerId, PlayerMatchStatistic, StatLine, Vote};

// ---------------------------------------------------------------------------
// Players
// ---------------------------------------------------------------------------

/// Register a player with zero XP. Returns the new row id.
pub fn insert_player(conn: &Connection, display_name: &str) -> Result<PlayerId> {
    let id = conn
        .query_row(
            "INSERT INTO players (display_name) VALUES (?1) RETURNING id",
            params![display_name],
            |row| row.get(0),
        )
        .context("failed to insert player")?;
    Ok(id)
}

/// Normalized key identifying a guest across submissions.
pub fn guest_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Return the player row mirroring guest `name`, creating it on first use.
pub fn resolve_guest(conn: &Connection, name: &str) -> Result<PlayerId> {
    let key = guest_key(name);
    let id = conn
        .query_row(
            "INSERT INTO players (display_name, guest_key) VALUES (?1, ?2)
             ON CONFLICT(guest_key) DO UPDATE SET display_name = players.display_name
             RETURNING id",
            params![name.trim(), key],
            |row| row.get(0),
        )
        .context("failed to resolve guest player")?;
    Ok(id)
}

pub fn load_player(conn: &Connection, id: PlayerId) -> Result<Option<Player>> {
    let row = conn
        .query_row(
            "SELECT id, display_name, guest_key IS NOT NULL, xp, achievements
             FROM players WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get::<_, PlayerId>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()
        .context("failed to load player")?;

    let Some((id, display_name, is_guest, xp, achievements_json)) = row else {
        return Ok(None);
    };
    let achievements: BTreeSet<String> = serde_json::from_str(&achievements_json)
        .context("failed to deserialize achievement markers")?;
    Ok(Some(Player {
        id,
        display_name,
        is_guest,
        xp,
        achievements,
    }))
}

pub fn player_exists(conn: &Connection, id: PlayerId) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM players WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )
        .context("failed to check player existence")?;
    Ok(exists)
}

/// Add `delta` to the player's running XP, clamping at zero. Returns the new
/// total.
pub fn apply_xp_delta(conn: &Connection, player_id: PlayerId, delta: i64) -> Result<i64> {
    let xp = conn
        .query_row(
            "UPDATE players SET xp = MAX(0, xp + ?2) WHERE id = ?1 RETURNING xp",
            params![player_id, delta],
            |row| row.get(0),
        )
        .with_context(|| format!("failed to apply xp delta to player {player_id}"))?;
    Ok(xp)
}

/// Replace the player's achievement marker set.
pub fn save_markers(conn: &Connection, player_id: PlayerId, markers: &BTreeSet<String>) -> Result<()> {
    let json = serde_json::to_string(markers).context("failed to serialize markers")?;
    conn.execute(
        "UPDATE players SET achievements = ?2 WHERE id = ?1",
        params![player_id, json],
    )
    .context("failed to save achievement markers")?;
    Ok(())
}

/// Players ordered by running XP, highest first.
pub fn top_players(conn: &Connection, limit: usize) -> Result<Vec<Player>> {
    let mut stmt = conn
        .prepare("SELECT id FROM players ORDER BY xp DESC, id LIMIT ?1")
        .context("failed to prepare top_players query")?;
    let ids = stmt
        .query_map(params![limit as i64], |row| row.get::<_, PlayerId>(0))
        .context("failed to query top players")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to map top player rows")?;

    let mut players = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(player) = load_player(conn, id)? {
            players.push(player);
        }
    }
    Ok(players)
}

// ---------------------------------------------------------------------------
// League admins
// ---------------------------------------------------------------------------

pub fn grant_league_admin(conn: &Connection, league_id: LeagueId, player_id: PlayerId) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO league_admins (league_id, player_id) VALUES (?1, ?2)",
        params![league_id, player_id],
    )
    .context("failed to grant league admin")?;
    Ok(())
}

pub fn league_admins(conn: &Connection, league_id: LeagueId) -> Result<Vec<PlayerId>> {
    let mut stmt = conn
        .prepare("SELECT player_id FROM league_admins WHERE league_id = ?1 ORDER BY player_id")
        .context("failed to prepare league_admins query")?;
    let admins = stmt
        .query_map(params![league_id], |row| row.get(0))
        .context("failed to query league admins")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to map league admin rows")?;
    Ok(admins)
}

// ---------------------------------------------------------------------------
// Statistic ledger
// ---------------------------------------------------------------------------

/// Insert or overwrite the raw stats for (match, player). `xp_awarded` is
/// left untouched on update; only settlement moves it.
pub fn upsert_stats(
    conn: &Connection,
    match_id: MatchId,
    player_id: PlayerId,
    stats: &StatLine,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO player_match_stats (match_id, player_id, goals, assists, clean_sheets, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(match_id, player_id) DO UPDATE SET
            goals        = excluded.goals,
            assists      = excluded.assists,
            clean_sheets = excluded.clean_sheets,
            updated_at   = excluded.updated_at",
        params![
            match_id,
            player_id,
            stats.goals,
            stats.assists,
            stats.clean_sheets,
            encode_ts(now),
        ],
    )
    .context("failed to upsert player match stats")?;
    Ok(())
}

pub fn load_stat(
    conn: &Connection,
    match_id: MatchId,
    player_id: PlayerId,
) -> Result<Option<PlayerMatchStatistic>> {
    let stat = conn
        .query_row(
            "SELECT goals, assists, clean_sheets, xp_awarded
             FROM player_match_stats WHERE match_id = ?1 AND player_id = ?2",
            params![match_id, player_id],
            |row| {
                Ok(PlayerMatchStatistic {
                    match_id,
                    player_id,
                    stats: StatLine {
                        goals: row.get(0)?,
                        assists: row.get(1)?,
                        clean_sheets: row.get(2)?,
                    },
                    xp_awarded: row.get(3)?,
                })
            },
        )
        .optional()
        .context("failed to load player match stats")?;
    Ok(stat)
}

/// Record `xp` as the amount already paid for (match, player), creating a
/// zero-stat row for participants who never had stats entered.
pub fn set_xp_awarded(
    conn: &Connection,
    match_id: MatchId,
    player_id: PlayerId,
    xp: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO player_match_stats (match_id, player_id, xp_awarded, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(match_id, player_id) DO UPDATE SET
            xp_awarded = excluded.xp_awarded,
            updated_at = excluded.updated_at",
        params![match_id, player_id, xp, encode_ts(now)],
    )
    .context("failed to record xp_awarded")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Votes
// ---------------------------------------------------------------------------

/// Delete the voter's live vote for the match. Returns the candidate it was
/// for, or `None` if there was no vote.
pub fn delete_vote(conn: &Connection, match_id: MatchId, voter_id: PlayerId) -> Result<Option<PlayerId>> {
    let previous = conn
        .query_row(
            "DELETE FROM votes WHERE match_id = ?1 AND voter_id = ?2 RETURNING candidate_id",
            params![match_id, voter_id],
            |row| row.get(0),
        )
        .optional()
        .context("failed to delete vote")?;
    Ok(previous)
}

pub fn insert_vote(
    conn: &Connection,
    match_id: MatchId,
    voter_id: PlayerId,
    candidate_id: PlayerId,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO votes (match_id, voter_id, candidate_id, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![match_id, voter_id, candidate_id, encode_ts(now)],
    )
    .context("failed to insert vote")?;
    Ok(())
}

pub fn load_vote(conn: &Connection, match_id: MatchId, voter_id: PlayerId) -> Result<Option<Vote>> {
    let vote = conn
        .query_row(
            "SELECT candidate_id, created_at FROM votes WHERE match_id = ?1 AND voter_id = ?2",
            params![match_id, voter_id],
            |row| {
                let created_at: String = row.get(1)?;
                Ok(Vote {
                    match_id,
                    voter_id,
                    candidate_id: row.get(0)?,
                    created_at: decode_ts(&created_at)?,
                })
            },
        )
        .optional()
        .context("failed to load vote")?;
    Ok(vote)
}

/// Live votes naming `player_id` as candidate in the match.
pub fn votes_received(conn: &Connection, match_id: MatchId, player_id: PlayerId) -> Result<u32> {
    let count = conn
        .query_row(
            "SELECT COUNT(*) FROM votes WHERE match_id = ?1 AND candidate_id = ?2",
            params![match_id, player_id],
            |row| row.get(0),
        )
        .context("failed to count votes received")?;
    Ok(count)
}

/// Live votes grouped by candidate, most votes first.
pub fn vote_tally(conn: &Connection, match_id: MatchId) -> Result<Vec<(PlayerId, u32)>> {
    let mut stmt = conn
        .prepare(
            "SELECT candidate_id, COUNT(*) AS votes FROM votes WHERE match_id = ?1
             GROUP BY candidate_id ORDER BY votes DESC, candidate_id",
        )
        .context("failed to prepare vote_tally query")?;
    let tally = stmt
        .query_map(params![match_id], |row| Ok((row.get(0)?, row.get(1)?)))
        .context("failed to query vote tally")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to map vote tally rows")?;
    Ok(tally)
}
