// Match rows, rosters and the captain-confirmation columns.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{decode_ts, encode_ts};
use crate::achievements::MatchAppearance;
use crate::model::{
    LeagueId, Match, MatchId, MatchStatus, PickCategory, PlayerId, SeasonId, SidePicks,
    SuggestedScore, TeamResult, TeamSide,
};

/// Validated scheduling input.
pub struct MatchRow<'a> {
    pub league_id: LeagueId,
    pub season_id: Option<SeasonId>,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub home_players: &'a BTreeSet<PlayerId>,
    pub away_players: &'a BTreeSet<PlayerId>,
    pub home_captain: PlayerId,
    pub away_captain: PlayerId,
}

pub fn insert_match(conn: &Connection, row: &MatchRow<'_>) -> Result<MatchId> {
    let id: MatchId = conn
        .query_row(
            "INSERT INTO matches
                (league_id, season_id, scheduled_start, scheduled_end, home_captain, away_captain)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             RETURNING id",
            params![
                row.league_id,
                row.season_id,
                encode_ts(row.scheduled_start),
                encode_ts(row.scheduled_end),
                row.home_captain,
                row.away_captain,
            ],
            |r| r.get(0),
        )
        .context("failed to insert match")?;

    for (side, players) in [
        (TeamSide::Home, row.home_players),
        (TeamSide::Away, row.away_players),
    ] {
        for &player_id in players {
            conn.execute(
                "INSERT INTO match_players (match_id, player_id, side) VALUES (?1, ?2, ?3)",
                params![id, player_id, side.as_str()],
            )
            .context("failed to insert roster entry")?;
        }
    }

    Ok(id)
}

const MATCH_COLUMNS: &str = "id, league_id, season_id, scheduled_start, scheduled_end,
    home_captain, away_captain, home_goals, away_goals, status,
    home_confirmed, away_confirmed, suggested_home_goals, suggested_away_goals, suggested_by,
    result_uploaded_at, result_published_at,
    home_defensive_pick, home_mentality_pick, away_defensive_pick, away_mentality_pick";

fn opt_ts(raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(decode_ts).transpose()
}

fn match_from_row(row: &Row<'_>) -> rusqlite::Result<Match> {
    let status_raw: String = row.get(9)?;
    let status = MatchStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            9,
            rusqlite::types::Type::Text,
            format!("unknown match status {status_raw}").into(),
        )
    })?;

    let suggested = match (
        row.get::<_, Option<u32>>(12)?,
        row.get::<_, Option<u32>>(13)?,
        row.get::<_, Option<PlayerId>>(14)?,
    ) {
        (Some(home_goals), Some(away_goals), Some(submitted_by)) => Some(SuggestedScore {
            home_goals,
            away_goals,
            submitted_by,
        }),
        _ => None,
    };

    Ok(Match {
        id: row.get(0)?,
        league_id: row.get(1)?,
        season_id: row.get(2)?,
        scheduled_start: decode_ts(&row.get::<_, String>(3)?)?,
        scheduled_end: decode_ts(&row.get::<_, String>(4)?)?,
        home_players: BTreeSet::new(),
        away_players: BTreeSet::new(),
        home_captain: row.get(5)?,
        away_captain: row.get(6)?,
        home_goals: row.get(7)?,
        away_goals: row.get(8)?,
        status,
        home_confirmed: row.get(10)?,
        away_confirmed: row.get(11)?,
        suggested,
        result_uploaded_at: opt_ts(row.get(15)?)?,
        result_published_at: opt_ts(row.get(16)?)?,
        home_picks: SidePicks {
            defensive_impact: row.get(17)?,
            mentality: row.get(18)?,
        },
        away_picks: SidePicks {
            defensive_impact: row.get(19)?,
            mentality: row.get(20)?,
        },
    })
}

/// Load a match with both rosters. Reads inside the caller's transaction
/// see that transaction's own writes, so this is the "fresh read" used by
/// every state transition.
pub fn load_match(conn: &Connection, id: MatchId) -> Result<Option<Match>> {
    let sql = format!("SELECT {MATCH_COLUMNS} FROM matches WHERE id = ?1");
    let Some(mut m) = conn
        .query_row(&sql, params![id], match_from_row)
        .optional()
        .context("failed to load match")?
    else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare("SELECT player_id, side FROM match_players WHERE match_id = ?1")
        .context("failed to prepare roster query")?;
    let entries = stmt
        .query_map(params![id], |row| {
            Ok((row.get::<_, PlayerId>(0)?, row.get::<_, String>(1)?))
        })
        .context("failed to query roster")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to map roster rows")?;

    for (player_id, side) in entries {
        match TeamSide::parse(&side) {
            Some(TeamSide::Home) => {
                m.home_players.insert(player_id);
            }
            Some(TeamSide::Away) => {
                m.away_players.insert(player_id);
            }
            None => anyhow::bail!("match {id} has roster entry with unknown side {side}"),
        }
    }

    Ok(Some(m))
}

/// Put a player on one side's roster. The (match, player) primary key keeps
/// the two rosters disjoint.
pub fn add_to_roster(conn: &Connection, match_id: MatchId, player_id: PlayerId, side: TeamSide) -> Result<()> {
    conn.execute(
        "INSERT INTO match_players (match_id, player_id, side) VALUES (?1, ?2, ?3)
         ON CONFLICT(match_id, player_id) DO NOTHING",
        params![match_id, player_id, side.as_str()],
    )
    .context("failed to add player to roster")?;
    Ok(())
}

/// Enter a result on an unpublished match: goals set, status moved to
/// RESULT_UPLOADED, confirmations and any suggestion cleared.
pub fn upload_result(conn: &Connection, id: MatchId, home: u32, away: u32, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE matches SET
            home_goals = ?2, away_goals = ?3,
            status = 'RESULT_UPLOADED',
            home_confirmed = 0, away_confirmed = 0,
            suggested_home_goals = NULL, suggested_away_goals = NULL, suggested_by = NULL,
            result_uploaded_at = ?4
         WHERE id = ?1",
        params![id, home, away, encode_ts(now)],
    )
    .context("failed to upload match result")?;
    Ok(())
}

/// Correct the goals of an already published match without touching status
/// or confirmations.
pub fn correct_published_goals(conn: &Connection, id: MatchId, home: u32, away: u32) -> Result<()> {
    conn.execute(
        "UPDATE matches SET home_goals = ?2, away_goals = ?3
         WHERE id = ?1 AND status = 'RESULT_PUBLISHED'",
        params![id, home, away],
    )
    .context("failed to correct published goals")?;
    Ok(())
}

/// Set one side's confirmation flag. The other flag is read from the row
/// being updated, so publication is decided from the current stored state in
/// the same statement. Returns `true` if the row moved to RESULT_PUBLISHED.
pub fn confirm_side(conn: &Connection, id: MatchId, side: TeamSide, now: DateTime<Utc>) -> Result<bool> {
    let (own, other) = match side {
        TeamSide::Home => ("home_confirmed", "away_confirmed"),
        TeamSide::Away => ("away_confirmed", "home_confirmed"),
    };
    let sql = format!(
        "UPDATE matches SET
            {own} = 1,
            status = CASE WHEN {other} = 1 THEN 'RESULT_PUBLISHED' ELSE status END,
            result_published_at = CASE WHEN {other} = 1 THEN ?2 ELSE result_published_at END
         WHERE id = ?1 AND status = 'RESULT_UPLOADED'
         RETURNING status"
    );
    let status: Option<String> = conn
        .query_row(&sql, params![id, encode_ts(now)], |row| row.get(0))
        .optional()
        .context("failed to record captain confirmation")?;
    Ok(status.as_deref() == Some(MatchStatus::ResultPublished.as_str()))
}

pub fn record_suggestion(conn: &Connection, id: MatchId, suggestion: &SuggestedScore) -> Result<()> {
    conn.execute(
        "UPDATE matches SET
            suggested_home_goals = ?2, suggested_away_goals = ?3, suggested_by = ?4,
            status = 'REVISION_REQUESTED',
            home_confirmed = 0, away_confirmed = 0
         WHERE id = ?1",
        params![
            id,
            suggestion.home_goals,
            suggestion.away_goals,
            suggestion.submitted_by
        ],
    )
    .context("failed to record suggested score")?;
    Ok(())
}

pub fn set_pick(
    conn: &Connection,
    id: MatchId,
    side: TeamSide,
    category: PickCategory,
    player_id: PlayerId,
) -> Result<()> {
    let column = match (side, category) {
        (TeamSide::Home, PickCategory::DefensiveImpact) => "home_defensive_pick",
        (TeamSide::Home, PickCategory::Mentality) => "home_mentality_pick",
        (TeamSide::Away, PickCategory::DefensiveImpact) => "away_defensive_pick",
        (TeamSide::Away, PickCategory::Mentality) => "away_mentality_pick",
    };
    conn.execute(
        &format!("UPDATE matches SET {column} = ?2 WHERE id = ?1"),
        params![id, player_id],
    )
    .context("failed to set captain pick")?;
    Ok(())
}

/// The player's published matches in chronological order, annotated for
/// streak evaluation.
pub fn published_history(conn: &Connection, player_id: PlayerId) -> Result<Vec<MatchAppearance>> {
    let mut stmt = conn
        .prepare(
            "SELECT m.id, m.league_id, m.scheduled_start, mp.side, m.home_goals, m.away_goals,
                    COALESCE(s.goals, 0), COALESCE(s.assists, 0),
                    (SELECT COUNT(*) FROM votes v
                      WHERE v.match_id = m.id AND v.candidate_id = mp.player_id)
             FROM match_players mp
             JOIN matches m ON m.id = mp.match_id
             LEFT JOIN player_match_stats s
                    ON s.match_id = m.id AND s.player_id = mp.player_id
             WHERE mp.player_id = ?1 AND m.status = 'RESULT_PUBLISHED'
             ORDER BY m.scheduled_start, m.id",
        )
        .context("failed to prepare history query")?;

    let rows = stmt
        .query_map(params![player_id], |row| {
            let side_raw: String = row.get(3)?;
            let home_goals: u32 = row.get(4)?;
            let away_goals: u32 = row.get(5)?;
            let (scored, conceded) = if side_raw == TeamSide::Home.as_str() {
                (home_goals, away_goals)
            } else {
                (away_goals, home_goals)
            };
            Ok(MatchAppearance {
                match_id: row.get(0)?,
                league_id: row.get(1)?,
                played_at: decode_ts(&row.get::<_, String>(2)?)?,
                result: TeamResult::from_goals(scored, conceded),
                goals: row.get(6)?,
                assists: row.get(7)?,
                team_conceded: conceded,
                votes_received: row.get(8)?,
            })
        })
        .context("failed to query match history")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to map match history rows")?;

    Ok(rows)
}

/// One row of a league leaderboard.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LeagueStanding {
    pub player_id: PlayerId,
    pub display_name: String,
    pub xp: i64,
    pub matches_played: u32,
}

/// Sum of XP settled per player over the league's published matches.
pub fn league_standings(conn: &Connection, league_id: LeagueId, limit: usize) -> Result<Vec<LeagueStanding>> {
    let mut stmt = conn
        .prepare(
            "SELECT s.player_id, p.display_name, SUM(s.xp_awarded) AS total, COUNT(*)
             FROM player_match_stats s
             JOIN matches m ON m.id = s.match_id
             JOIN players p ON p.id = s.player_id
             WHERE m.league_id = ?1 AND m.status = 'RESULT_PUBLISHED'
             GROUP BY s.player_id, p.display_name
             ORDER BY total DESC, s.player_id
             LIMIT ?2",
        )
        .context("failed to prepare league standings query")?;
    let rows = stmt
        .query_map(params![league_id, limit as i64], |row| {
            Ok(LeagueStanding {
                player_id: row.get(0)?,
                display_name: row.get(1)?,
                xp: row.get(2)?,
                matches_played: row.get(3)?,
            })
        })
        .context("failed to query league standings")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to map league standing rows")?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ledger, Database};
    use chrono::TimeZone;

    fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory database should open")
    }

    /// Helper: two-a-side match between four fresh players.
    fn seed_match(db: &Database) -> (MatchId, Vec<PlayerId>) {
        db.write(|conn| {
            let ids = (0..4)
                .map(|i| ledger::insert_player(conn, &format!("P{i}")))
                .collect::<Result<Vec<_>>>()?;
            let home: BTreeSet<_> = ids[..2].iter().copied().collect();
            let away: BTreeSet<_> = ids[2..].iter().copied().collect();
            let id = insert_match(
                conn,
                &MatchRow {
                    league_id: 1,
                    season_id: None,
                    scheduled_start: Utc.with_ymd_and_hms(2026, 3, 1, 18, 0, 0).unwrap(),
                    scheduled_end: Utc.with_ymd_and_hms(2026, 3, 1, 19, 0, 0).unwrap(),
                    home_players: &home,
                    away_players: &away,
                    home_captain: ids[0],
                    away_captain: ids[2],
                },
            )?;
            Ok::<_, anyhow::Error>((id, ids))
        })
        .unwrap()
    }

    #[test]
    fn insert_and_load_match_round_trip() {
        let db = test_db();
        let (id, ids) = seed_match(&db);
        let m = db.read(|conn| load_match(conn, id)).unwrap().unwrap();
        assert_eq!(m.status, MatchStatus::Scheduled);
        assert_eq!(m.home_players, ids[..2].iter().copied().collect());
        assert_eq!(m.away_players, ids[2..].iter().copied().collect());
        assert_eq!(m.home_goals, None);
        assert!(!m.home_confirmed && !m.away_confirmed);
        assert_eq!(m.scheduled_start, Utc.with_ymd_and_hms(2026, 3, 1, 18, 0, 0).unwrap());
    }

    #[test]
    fn load_missing_match_returns_none() {
        let db = test_db();
        assert!(db.read(|conn| load_match(conn, 99)).unwrap().is_none());
    }

    #[test]
    fn confirm_publishes_only_after_both_sides() {
        let db = test_db();
        let (id, _) = seed_match(&db);
        let now = Utc::now();
        db.write(|conn| upload_result(conn, id, 2, 1, now)).unwrap();

        assert!(!db.write(|conn| confirm_side(conn, id, TeamSide::Home, now)).unwrap());
        // Re-confirming the same side is a no-op for publication.
        assert!(!db.write(|conn| confirm_side(conn, id, TeamSide::Home, now)).unwrap());
        assert!(db.write(|conn| confirm_side(conn, id, TeamSide::Away, now)).unwrap());

        let m = db.read(|conn| load_match(conn, id)).unwrap().unwrap();
        assert_eq!(m.status, MatchStatus::ResultPublished);
        assert!(m.home_confirmed && m.away_confirmed);
        assert!(m.result_published_at.is_some());
    }

    #[test]
    fn confirm_is_ignored_unless_result_uploaded() {
        let db = test_db();
        let (id, _) = seed_match(&db);
        assert!(!db.write(|conn| confirm_side(conn, id, TeamSide::Home, Utc::now())).unwrap());
        let m = db.read(|conn| load_match(conn, id)).unwrap().unwrap();
        assert!(!m.home_confirmed);
    }

    #[test]
    fn published_status_requires_both_flags_at_schema_level() {
        let db = test_db();
        let (id, _) = seed_match(&db);
        let result = db.write(|conn| {
            conn.execute(
                "UPDATE matches SET status = 'RESULT_PUBLISHED', home_confirmed = 1 WHERE id = ?1",
                params![id],
            )
            .context("forced publish")
        });
        assert!(result.is_err());
    }

    #[test]
    fn negative_goals_rejected_by_schema() {
        let db = test_db();
        let (id, _) = seed_match(&db);
        let result = db.write(|conn| {
            conn.execute("UPDATE matches SET home_goals = -1 WHERE id = ?1", params![id])
                .context("negative goals")
        });
        assert!(result.is_err());
    }

    #[test]
    fn suggestion_moves_to_revision_requested() {
        let db = test_db();
        let (id, ids) = seed_match(&db);
        let now = Utc::now();
        db.write(|conn| {
            upload_result(conn, id, 1, 1, now)?;
            confirm_side(conn, id, TeamSide::Home, now)?;
            record_suggestion(
                conn,
                id,
                &SuggestedScore {
                    home_goals: 2,
                    away_goals: 1,
                    submitted_by: ids[2],
                },
            )
        })
        .unwrap();

        let m = db.read(|conn| load_match(conn, id)).unwrap().unwrap();
        assert_eq!(m.status, MatchStatus::RevisionRequested);
        assert_eq!((m.home_goals, m.away_goals), (Some(1), Some(1)));
        assert!(!m.home_confirmed);
        assert_eq!(m.suggested.unwrap().submitted_by, ids[2]);
    }

    #[test]
    fn roster_sides_stay_disjoint() {
        let db = test_db();
        let (id, ids) = seed_match(&db);
        db.write(|conn| add_to_roster(conn, id, ids[0], TeamSide::Away))
            .unwrap();
        let m = db.read(|conn| load_match(conn, id)).unwrap().unwrap();
        assert!(m.home_players.contains(&ids[0]));
        assert!(!m.away_players.contains(&ids[0]));
    }

    #[test]
    fn picks_are_stored_per_side() {
        let db = test_db();
        let (id, ids) = seed_match(&db);
        db.write(|conn| {
            set_pick(conn, id, TeamSide::Home, PickCategory::Mentality, ids[1])?;
            set_pick(conn, id, TeamSide::Away, PickCategory::DefensiveImpact, ids[3])
        })
        .unwrap();
        let m = db.read(|conn| load_match(conn, id)).unwrap().unwrap();
        assert_eq!(m.home_picks.mentality, Some(ids[1]));
        assert_eq!(m.home_picks.defensive_impact, None);
        assert_eq!(m.away_picks.defensive_impact, Some(ids[3]));
    }
}
