// SQLite persistence layer for matches, the statistic ledger, votes and
// player XP.

pub mod ledger;
pub mod matches;

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, TransactionBehavior};

/// SQLite-backed store. All access goes through one connection guarded by a
/// mutex; writes additionally run inside IMMEDIATE transactions so the write
/// lock is held from the first read, which is what keeps concurrent
/// settlements of the same (match, player) from reading a stale
/// `xp_awarded`.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        if path != ":memory:" {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("failed to create database directory {}", parent.display())
                    })?;
                }
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(SCHEMA)
            .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    /// Run `f` inside an IMMEDIATE transaction. Commits when `f` returns
    /// `Ok`; any error drops the transaction, which rolls it back.
    pub fn write<T, E>(&self, f: impl FnOnce(&Connection) -> Result<T, E>) -> Result<T, E>
    where
        E: From<anyhow::Error>,
    {
        let mut conn = self.conn();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to begin transaction")?;
        let value = f(&tx)?;
        tx.commit().context("failed to commit transaction")?;
        Ok(value)
    }

    /// Run read-only queries against the connection without a transaction.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        let conn = self.conn();
        f(&conn)
    }
}

/// Canonical timestamp encoding. Fixed width UTC so lexical order in SQL
/// matches chronological order.
pub(crate) fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn decode_ts(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS players (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        display_name TEXT NOT NULL,
        guest_key    TEXT UNIQUE,
        xp           INTEGER NOT NULL DEFAULT 0 CHECK (xp >= 0),
        achievements TEXT NOT NULL DEFAULT '[]',
        created_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    );

    CREATE TABLE IF NOT EXISTS league_admins (
        league_id INTEGER NOT NULL,
        player_id INTEGER NOT NULL REFERENCES players(id),
        PRIMARY KEY (league_id, player_id)
    );

    CREATE TABLE IF NOT EXISTS matches (
        id                   INTEGER PRIMARY KEY AUTOINCREMENT,
        league_id            INTEGER NOT NULL,
        season_id            INTEGER,
        scheduled_start      TEXT NOT NULL,
        scheduled_end        TEXT NOT NULL,
        home_captain         INTEGER NOT NULL REFERENCES players(id),
        away_captain         INTEGER NOT NULL REFERENCES players(id),
        home_goals           INTEGER CHECK (home_goals IS NULL OR home_goals >= 0),
        away_goals           INTEGER CHECK (away_goals IS NULL OR away_goals >= 0),
        status               TEXT NOT NULL DEFAULT 'SCHEDULED',
        home_confirmed       INTEGER NOT NULL DEFAULT 0,
        away_confirmed       INTEGER NOT NULL DEFAULT 0,
        suggested_home_goals INTEGER,
        suggested_away_goals INTEGER,
        suggested_by         INTEGER REFERENCES players(id),
        result_uploaded_at   TEXT,
        result_published_at  TEXT,
        home_defensive_pick  INTEGER REFERENCES players(id),
        home_mentality_pick  INTEGER REFERENCES players(id),
        away_defensive_pick  INTEGER REFERENCES players(id),
        away_mentality_pick  INTEGER REFERENCES players(id),
        CHECK ((status = 'RESULT_PUBLISHED') = (home_confirmed = 1 AND away_confirmed = 1))
    );

    CREATE TABLE IF NOT EXISTS match_players (
        match_id  INTEGER NOT NULL REFERENCES matches(id),
        player_id INTEGER NOT NULL REFERENCES players(id),
        side      TEXT NOT NULL CHECK (side IN ('home', 'away')),
        PRIMARY KEY (match_id, player_id)
    );

    CREATE TABLE IF NOT EXISTS player_match_stats (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        match_id     INTEGER NOT NULL REFERENCES matches(id),
        player_id    INTEGER NOT NULL REFERENCES players(id),
        goals        INTEGER NOT NULL DEFAULT 0 CHECK (goals >= 0),
        assists      INTEGER NOT NULL DEFAULT 0 CHECK (assists >= 0),
        clean_sheets INTEGER NOT NULL DEFAULT 0 CHECK (clean_sheets >= 0),
        xp_awarded   INTEGER NOT NULL DEFAULT 0,
        updated_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        UNIQUE (match_id, player_id)
    );

    CREATE TABLE IF NOT EXISTS votes (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        match_id     INTEGER NOT NULL REFERENCES matches(id),
        voter_id     INTEGER NOT NULL REFERENCES players(id),
        candidate_id INTEGER NOT NULL REFERENCES players(id),
        created_at   TEXT NOT NULL,
        UNIQUE (match_id, voter_id),
        CHECK (voter_id <> candidate_id)
    );

    CREATE INDEX IF NOT EXISTS idx_matches_league ON matches(league_id, status);
    CREATE INDEX IF NOT EXISTS idx_match_players_player ON match_players(player_id);
    CREATE INDEX IF NOT EXISTS idx_votes_candidate ON votes(match_id, candidate_id);
";

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory database should open")
    }

    #[test]
    fn open_creates_tables() {
        let db = test_db();
        let tables: Vec<String> = db.read(|conn| {
            conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap()
                .query_map([], |row| row.get(0))
                .unwrap()
                .collect::<Result<Vec<_>, _>>()
                .unwrap()
        });

        for expected in [
            "league_admins",
            "match_players",
            "matches",
            "player_match_stats",
            "players",
            "votes",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn open_is_idempotent_on_file_database() {
        let path = std::env::temp_dir().join("matchday_db_reopen.db");
        let _ = std::fs::remove_file(&path);
        let path_str = path.to_string_lossy().into_owned();
        {
            let db = Database::open(&path_str).unwrap();
            db.write(|conn| ledger::insert_player(conn, "Alex")).unwrap();
        }
        let db = Database::open(&path_str).unwrap();
        let count: i64 = db.read(|conn| {
            conn.query_row("SELECT COUNT(*) FROM players", [], |row| row.get(0))
                .unwrap()
        });
        assert_eq!(count, 1);
        drop(db);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn write_rolls_back_on_error() {
        let db = test_db();
        let result: Result<()> = db.write(|conn| {
            ledger::insert_player(conn, "Rolled back")?;
            anyhow::bail!("abort after insert")
        });
        assert!(result.is_err());
        let count: i64 = db.read(|conn| {
            conn.query_row("SELECT COUNT(*) FROM players", [], |row| row.get(0))
                .unwrap()
        });
        assert_eq!(count, 0);
    }

    #[test]
    fn foreign_keys_enforced() {
        let db = test_db();
        let result = db.write(|conn| {
            conn.execute("INSERT INTO league_admins (league_id, player_id) VALUES (1, 999)", [])
                .context("insert admin")
        });
        assert!(result.is_err(), "foreign key violation should be rejected");
    }

    #[test]
    fn timestamps_round_trip_and_sort() {
        let early = DateTime::parse_from_rfc3339("2026-03-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let late = DateTime::parse_from_rfc3339("2026-03-01T10:00:00+00:00")
            .unwrap()
            .with_timezone(&Utc);
        assert!(encode_ts(early) < encode_ts(late));
        assert_eq!(decode_ts(&encode_ts(late)).unwrap(), late);
    }
}
