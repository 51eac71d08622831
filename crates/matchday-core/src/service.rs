// League service: the entry point the surrounding system calls.
//
// Every mutating operation runs in one IMMEDIATE transaction and collects
// its cache/broadcast/notification side effects while doing so. The effects
// are dispatched only after commit. Achievement awarding follows settlement
// in its own transaction.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use rusqlite::Connection;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::achievements::awards::award_for_player;
use crate::achievements::{evaluate, AchievementReport, Badge};
use crate::config::Config;
use crate::db::matches::{self, LeagueStanding, MatchRow};
use crate::db::{ledger, Database};
use crate::error::{MatchdayError, Result};
use crate::hooks::{league_prefix, player_prefix, EventAction, Hooks, NotificationKind, SideEffects};
use crate::model::{
    Caller, LeagueId, Match, MatchId, MatchStatus, NewMatch, Participant, PickCategory, Player,
    PlayerId, SuggestedScore, TeamSide,
};
use crate::payload::StatSubmission;
use crate::xp::settlement::{preview_all, settle_all, settle_players, SettlementOutcome};

/// State of a match after a lifecycle operation, plus any settlement it
/// triggered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchUpdate {
    pub state: Match,
    pub settlements: Vec<SettlementOutcome>,
    /// Badges credited by the award step that followed settlement.
    pub awarded: BTreeMap<PlayerId, Vec<Badge>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteChange {
    pub match_id: MatchId,
    pub voter_id: PlayerId,
    pub previous: Option<PlayerId>,
    pub current: Option<PlayerId>,
    pub settlements: Vec<SettlementOutcome>,
    pub awarded: BTreeMap<PlayerId, Vec<Badge>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyEntry {
    pub candidate_id: PlayerId,
    pub votes: u32,
}

pub struct LeagueService {
    db: Database,
    config: Config,
    hooks: Hooks,
}

fn require_match(conn: &Connection, id: MatchId) -> Result<Match> {
    matches::load_match(conn, id)?.ok_or(MatchdayError::NotFound { entity: "match", id })
}

fn require_player(conn: &Connection, id: PlayerId) -> Result<()> {
    if ledger::player_exists(conn, id)? {
        Ok(())
    } else {
        Err(MatchdayError::NotFound { entity: "player", id })
    }
}

fn require_admin(caller: &Caller) -> Result<()> {
    if caller.is_league_admin {
        Ok(())
    } else {
        Err(MatchdayError::NotAdmin {
            player_id: caller.player_id,
        })
    }
}

fn require_captain(caller: &Caller, m: &Match) -> Result<TeamSide> {
    m.captained_side(caller.player_id).ok_or(MatchdayError::NotCaptain {
        player_id: caller.player_id,
        match_id: m.id,
    })
}

fn require_participant(m: &Match, player_id: PlayerId) -> Result<TeamSide> {
    m.side_of(player_id).ok_or(MatchdayError::NotParticipant {
        player_id,
        match_id: m.id,
    })
}

impl LeagueService {
    pub fn new(db: Database, config: Config, hooks: Hooks) -> Self {
        LeagueService { db, config, hooks }
    }

    /// Open the store named by `config.db_path` and build a service on it.
    pub fn open(config: Config, hooks: Hooks) -> Result<Self> {
        let db = Database::open(&config.db_path)?;
        Ok(Self::new(db, config, hooks))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Run `f` in a write transaction and dispatch the side effects it
    /// collected once the transaction has committed.
    fn mutate<T>(&self, f: impl FnOnce(&Connection, &mut SideEffects) -> Result<T>) -> Result<T> {
        let mut effects = SideEffects::default();
        let value = self.db.write(|conn| f(conn, &mut effects))?;
        self.hooks.dispatch(effects);
        Ok(value)
    }

    fn fetch<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.db.read(f)
    }

    /// Award step run after settlement. Each player gets their own
    /// transaction; a failure is logged and leaves settlement untouched.
    fn award_after_settlement(
        &self,
        league_id: LeagueId,
        match_id: MatchId,
        settlements: &[SettlementOutcome],
    ) -> BTreeMap<PlayerId, Vec<Badge>> {
        let players: BTreeSet<PlayerId> = settlements.iter().map(|o| o.player_id).collect();
        let mut awarded = BTreeMap::new();
        for player_id in players {
            let result = self.mutate(|conn, effects| {
                let (_, badges) = award_for_player(conn, &self.config.achievements, player_id)?;
                if !badges.is_empty() {
                    effects.invalidate(player_prefix(player_id));
                    effects.event(match_id, league_id, Some(player_id), EventAction::AchievementUnlocked);
                }
                Ok(badges)
            });
            match result {
                Ok(badges) if !badges.is_empty() => {
                    awarded.insert(player_id, badges);
                }
                Ok(_) => {}
                Err(e) => warn!(player_id, match_id, "achievement award failed: {e}"),
            }
        }
        awarded
    }

    // -----------------------------------------------------------------------
    // Players
    // -----------------------------------------------------------------------

    pub fn register_player(&self, display_name: &str) -> Result<PlayerId> {
        let name = display_name.trim();
        if name.is_empty() {
            return Err(MatchdayError::InvalidPayload {
                message: "display name must not be empty".into(),
            });
        }
        let id = self.mutate(|conn, _| Ok(ledger::insert_player(conn, name)?))?;
        info!(player_id = id, "player registered");
        Ok(id)
    }

    pub fn grant_league_admin(&self, league_id: LeagueId, player_id: PlayerId) -> Result<()> {
        self.mutate(|conn, effects| {
            require_player(conn, player_id)?;
            ledger::grant_league_admin(conn, league_id, player_id)?;
            effects.invalidate(league_prefix(league_id));
            Ok(())
        })
    }

    pub fn get_player(&self, player_id: PlayerId) -> Result<Player> {
        self.fetch(|conn| {
            ledger::load_player(conn, player_id)?.ok_or(MatchdayError::NotFound {
                entity: "player",
                id: player_id,
            })
        })
    }

    pub fn get_match(&self, match_id: MatchId) -> Result<Match> {
        self.fetch(|conn| require_match(conn, match_id))
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    pub fn create_match(&self, caller: &Caller, new: NewMatch) -> Result<Match> {
        require_admin(caller)?;
        let start = new.scheduled_start.ok_or(MatchdayError::MissingMatchTiming {
            field: "scheduledStart",
        })?;
        let end = new.scheduled_end.ok_or(MatchdayError::MissingMatchTiming {
            field: "scheduledEnd",
        })?;
        if end <= start {
            return Err(MatchdayError::InvalidSchedule {
                message: format!("end {end} is not after start {start}"),
            });
        }

        let home: BTreeSet<PlayerId> = new.home_players.iter().copied().collect();
        let away: BTreeSet<PlayerId> = new.away_players.iter().copied().collect();
        let roster_error = |message: String| MatchdayError::InvalidRoster { message };
        if home.is_empty() || away.is_empty() {
            return Err(roster_error("both rosters need at least one player".into()));
        }
        if let Some(both) = home.intersection(&away).next() {
            return Err(roster_error(format!("player {both} is on both rosters")));
        }
        if !home.contains(&new.home_captain) {
            return Err(roster_error(format!("home captain {} is not on the home roster", new.home_captain)));
        }
        if !away.contains(&new.away_captain) {
            return Err(roster_error(format!("away captain {} is not on the away roster", new.away_captain)));
        }

        let m = self.mutate(|conn, effects| {
            for &player_id in home.iter().chain(away.iter()) {
                require_player(conn, player_id)?;
            }
            let id = matches::insert_match(
                conn,
                &MatchRow {
                    league_id: new.league_id,
                    season_id: new.season_id,
                    scheduled_start: start,
                    scheduled_end: end,
                    home_players: &home,
                    away_players: &away,
                    home_captain: new.home_captain,
                    away_captain: new.away_captain,
                },
            )?;
            effects.invalidate(league_prefix(new.league_id));
            effects.event(id, new.league_id, None, EventAction::MatchCreated);
            require_match(conn, id)
        })?;

        info!(match_id = m.id, league_id = m.league_id, "match scheduled");
        Ok(m)
    }

    // -----------------------------------------------------------------------
    // Result lifecycle
    // -----------------------------------------------------------------------

    /// Enter goals. On an unpublished match this (re)starts confirmation;
    /// on a published match it corrects the score and re-settles everyone.
    pub fn upload_result(&self, caller: &Caller, match_id: MatchId, home_goals: u32, away_goals: u32) -> Result<MatchUpdate> {
        require_admin(caller)?;
        let now = Utc::now();
        let rates = &self.config.xp;

        let (state, settlements) = self.mutate(|conn, effects| {
            let m = require_match(conn, match_id)?;
            let settlements = if m.is_published() {
                matches::correct_published_goals(conn, match_id, home_goals, away_goals)?;
                let settled = settle_all(conn, rates, match_id, now)?;
                effects.touch(m.league_id, match_id, m.participants());
                settled
            } else {
                matches::upload_result(conn, match_id, home_goals, away_goals, now)?;
                for side in [TeamSide::Home, TeamSide::Away] {
                    effects.notify(
                        m.captain(side),
                        NotificationKind::ResultConfirmationRequest,
                        match_id,
                        caller.player_id,
                        format!("Result {home_goals}-{away_goals} uploaded, please confirm"),
                    );
                }
                effects.touch(m.league_id, match_id, []);
                Vec::new()
            };
            effects.event(match_id, m.league_id, None, EventAction::ResultUploaded);
            Ok((require_match(conn, match_id)?, settlements))
        })?;

        info!(
            match_id,
            home_goals,
            away_goals,
            status = %state.status,
            resettled = settlements.len(),
            "result uploaded"
        );
        let awarded = self.award_after_settlement(state.league_id, match_id, &settlements);
        Ok(MatchUpdate {
            state,
            settlements,
            awarded,
        })
    }

    /// Record the calling captain's confirmation. Publication, and the
    /// settlement it triggers, happen in the same transaction when the
    /// other side has already confirmed.
    pub fn confirm_result(&self, caller: &Caller, match_id: MatchId) -> Result<MatchUpdate> {
        let now = Utc::now();
        let rates = &self.config.xp;

        let (state, settlements) = self.mutate(|conn, effects| {
            let m = require_match(conn, match_id)?;
            let side = require_captain(caller, &m)?;
            match m.status {
                MatchStatus::ResultUploaded => {}
                MatchStatus::Scheduled => return Err(MatchdayError::ResultNotUploaded { match_id }),
                status => {
                    return Err(MatchdayError::InvalidTransition {
                        action: "confirm result",
                        status,
                    })
                }
            }

            let published = matches::confirm_side(conn, match_id, side, now)?;
            effects.notify(
                m.captain(side.opposite()),
                NotificationKind::CaptainConfirmed,
                match_id,
                caller.player_id,
                format!("The {side} captain confirmed the result"),
            );
            effects.event(match_id, m.league_id, Some(caller.player_id), EventAction::CaptainConfirmed);

            let settlements = if published {
                effects.event(match_id, m.league_id, None, EventAction::ResultPublished);
                effects.touch(m.league_id, match_id, m.participants());
                settle_all(conn, rates, match_id, now)?
            } else {
                effects.touch(m.league_id, match_id, []);
                Vec::new()
            };
            Ok((require_match(conn, match_id)?, settlements))
        })?;

        info!(
            match_id,
            captain = caller.player_id,
            published = state.is_published(),
            "captain confirmed result"
        );
        let awarded = self.award_after_settlement(state.league_id, match_id, &settlements);
        Ok(MatchUpdate {
            state,
            settlements,
            awarded,
        })
    }

    /// A captain disputes the uploaded score. Goals are left as they are;
    /// league admins are asked to re-upload.
    pub fn suggest_revision(&self, caller: &Caller, match_id: MatchId, home_goals: u32, away_goals: u32) -> Result<Match> {
        let state = self.mutate(|conn, effects| {
            let m = require_match(conn, match_id)?;
            require_captain(caller, &m)?;
            match m.status {
                MatchStatus::ResultUploaded | MatchStatus::RevisionRequested => {}
                MatchStatus::Scheduled => return Err(MatchdayError::ResultNotUploaded { match_id }),
                status => {
                    return Err(MatchdayError::InvalidTransition {
                        action: "suggest a revision",
                        status,
                    })
                }
            }

            matches::record_suggestion(
                conn,
                match_id,
                &SuggestedScore {
                    home_goals,
                    away_goals,
                    submitted_by: caller.player_id,
                },
            )?;
            for admin in ledger::league_admins(conn, m.league_id)? {
                effects.notify(
                    admin,
                    NotificationKind::CaptainRevisionSuggested,
                    match_id,
                    caller.player_id,
                    format!("Captain suggests {home_goals}-{away_goals} instead"),
                );
            }
            effects.event(match_id, m.league_id, Some(caller.player_id), EventAction::RevisionRequested);
            effects.touch(m.league_id, match_id, []);
            require_match(conn, match_id)
        })?;

        info!(match_id, captain = caller.player_id, home_goals, away_goals, "revision requested");
        Ok(state)
    }

    // -----------------------------------------------------------------------
    // Votes
    // -----------------------------------------------------------------------

    /// Cast, change or (with `None`) withdraw the caller's MOTM vote.
    pub fn record_vote(&self, caller: &Caller, match_id: MatchId, candidate: Option<PlayerId>) -> Result<VoteChange> {
        let voter_id = caller.player_id;
        if candidate == Some(voter_id) {
            return Err(MatchdayError::SelfVote);
        }
        let now = Utc::now();
        let rates = &self.config.xp;

        let (league_id, previous, settlements) = self.mutate(|conn, effects| {
            let m = require_match(conn, match_id)?;
            require_participant(&m, voter_id)?;
            if m.status == MatchStatus::Scheduled {
                return Err(MatchdayError::InvalidTransition {
                    action: "vote",
                    status: m.status,
                });
            }
            if let Some(candidate_id) = candidate {
                require_participant(&m, candidate_id)?;
            }

            let previous = ledger::delete_vote(conn, match_id, voter_id)?;
            if let Some(candidate_id) = candidate {
                ledger::insert_vote(conn, match_id, voter_id, candidate_id, now)?;
            }

            let affected: Vec<PlayerId> = previous.into_iter().chain(candidate).collect();
            let settlements = if m.is_published() && !affected.is_empty() {
                settle_players(conn, rates, match_id, &affected, now)?
            } else {
                Vec::new()
            };

            if let Some(candidate_id) = candidate.filter(|&c| Some(c) != previous) {
                effects.notify(
                    candidate_id,
                    NotificationKind::MotmVote,
                    match_id,
                    voter_id,
                    "You received a Man of the Match vote",
                );
            }
            effects.event(match_id, m.league_id, Some(voter_id), EventAction::VoteUpdated);
            effects.touch(m.league_id, match_id, affected);
            Ok((m.league_id, previous, settlements))
        })?;

        debug!(match_id, voter_id, ?previous, current = ?candidate, "vote recorded");
        let awarded = self.award_after_settlement(league_id, match_id, &settlements);
        Ok(VoteChange {
            match_id,
            voter_id,
            previous,
            current: candidate,
            settlements,
            awarded,
        })
    }

    /// Live votes per candidate, most votes first.
    pub fn vote_tally(&self, match_id: MatchId) -> Result<Vec<TallyEntry>> {
        self.fetch(|conn| {
            require_match(conn, match_id)?;
            Ok(ledger::vote_tally(conn, match_id)?
                .into_iter()
                .map(|(candidate_id, votes)| TallyEntry { candidate_id, votes })
                .collect())
        })
    }

    /// Candidates tied on the most votes. Empty when nobody has voted.
    pub fn motm_leaders(&self, match_id: MatchId) -> Result<Vec<PlayerId>> {
        let tally = self.vote_tally(match_id)?;
        let Some(top) = tally.first().map(|e| e.votes) else {
            return Ok(Vec::new());
        };
        Ok(tally
            .iter()
            .take_while(|e| e.votes == top)
            .map(|e| e.candidate_id)
            .collect())
    }

    // -----------------------------------------------------------------------
    // Stats and captain picks
    // -----------------------------------------------------------------------

    /// Store raw stats. Guests are resolved to their mirrored player row and
    /// put on the submitted side's roster. Published matches are re-settled
    /// for the affected players in the same transaction.
    pub fn submit_stats(&self, caller: &Caller, match_id: MatchId, submissions: &[StatSubmission]) -> Result<MatchUpdate> {
        if submissions.is_empty() {
            return Err(MatchdayError::InvalidPayload {
                message: "no stat entries submitted".into(),
            });
        }
        let now = Utc::now();
        let rates = &self.config.xp;

        let (state, settlements) = self.mutate(|conn, effects| {
            let m = require_match(conn, match_id)?;
            let captain_of = m.captained_side(caller.player_id);
            if !caller.is_league_admin && captain_of.is_none() {
                return Err(MatchdayError::NotCaptain {
                    player_id: caller.player_id,
                    match_id,
                });
            }

            let mut affected = Vec::with_capacity(submissions.len());
            for submission in submissions {
                let player_id = match &submission.participant {
                    Participant::Registered { player_id } => {
                        require_player(conn, *player_id)?;
                        *player_id
                    }
                    Participant::Guest { name } => ledger::resolve_guest(conn, name)?,
                };

                let side = match (m.side_of(player_id), submission.side) {
                    (Some(on), Some(asked)) if on != asked => {
                        return Err(MatchdayError::InvalidRoster {
                            message: format!("player {player_id} plays {on}, not {asked}"),
                        })
                    }
                    (Some(on), _) => on,
                    (None, Some(asked)) => {
                        matches::add_to_roster(conn, match_id, player_id, asked)?;
                        asked
                    }
                    (None, None) => {
                        return Err(MatchdayError::NotParticipant { player_id, match_id })
                    }
                };
                if !caller.is_league_admin && captain_of != Some(side) {
                    return Err(MatchdayError::NotCaptain {
                        player_id: caller.player_id,
                        match_id,
                    });
                }

                ledger::upsert_stats(conn, match_id, player_id, &submission.stats, now)?;
                effects.event(match_id, m.league_id, Some(player_id), EventAction::StatsUpdated);
                affected.push(player_id);
            }

            let settlements = if m.is_published() {
                settle_players(conn, rates, match_id, &affected, now)?
            } else {
                Vec::new()
            };
            effects.touch(m.league_id, match_id, affected);
            Ok((require_match(conn, match_id)?, settlements))
        })?;

        info!(match_id, entries = submissions.len(), resettled = settlements.len(), "stats submitted");
        let awarded = self.award_after_settlement(state.league_id, match_id, &settlements);
        Ok(MatchUpdate {
            state,
            settlements,
            awarded,
        })
    }

    /// Hand one of the caller's side picks to a player on their own roster,
    /// replacing any previous holder.
    pub fn set_captain_pick(
        &self,
        caller: &Caller,
        match_id: MatchId,
        category: PickCategory,
        player_id: PlayerId,
    ) -> Result<MatchUpdate> {
        let now = Utc::now();
        let rates = &self.config.xp;

        let (state, settlements) = self.mutate(|conn, effects| {
            let m = require_match(conn, match_id)?;
            let side = require_captain(caller, &m)?;
            if !m.roster(side).contains(&player_id) {
                return Err(MatchdayError::InvalidRoster {
                    message: format!("player {player_id} is not on the {side} roster"),
                });
            }

            let previous = m.picks(side).get(category);
            matches::set_pick(conn, match_id, side, category, player_id)?;

            let affected: Vec<PlayerId> = previous.into_iter().chain([player_id]).collect();
            let settlements = if m.is_published() {
                settle_players(conn, rates, match_id, &affected, now)?
            } else {
                Vec::new()
            };
            effects.event(match_id, m.league_id, Some(player_id), EventAction::PickUpdated);
            effects.touch(m.league_id, match_id, affected);
            Ok((require_match(conn, match_id)?, settlements))
        })?;

        info!(match_id, captain = caller.player_id, ?category, player_id, "captain pick set");
        let awarded = self.award_after_settlement(state.league_id, match_id, &settlements);
        Ok(MatchUpdate {
            state,
            settlements,
            awarded,
        })
    }

    // -----------------------------------------------------------------------
    // Settlement
    // -----------------------------------------------------------------------

    /// What settling every participant would do right now. Writes nothing
    /// and works before publication.
    pub fn preview_match_xp(&self, match_id: MatchId) -> Result<Vec<SettlementOutcome>> {
        self.fetch(|conn| preview_all(conn, &self.config.xp, match_id))
    }

    /// Re-run settlement for every participant of a published match.
    pub fn resettle_match(&self, match_id: MatchId) -> Result<MatchUpdate> {
        let now = Utc::now();
        let rates = &self.config.xp;

        let (state, settlements) = self.mutate(|conn, effects| {
            let m = require_match(conn, match_id)?;
            let settlements = settle_all(conn, rates, match_id, now)?;
            let moved: Vec<PlayerId> = settlements
                .iter()
                .filter(|o| o.delta != 0)
                .map(|o| o.player_id)
                .collect();
            if !moved.is_empty() {
                effects.event(match_id, m.league_id, None, EventAction::XpSettled);
                effects.touch(m.league_id, match_id, moved);
            }
            Ok((m, settlements))
        })?;

        let net: i64 = settlements.iter().map(|o| o.delta).sum();
        info!(match_id, players = settlements.len(), net_delta = net, "match re-settled");
        let awarded = self.award_after_settlement(state.league_id, match_id, &settlements);
        Ok(MatchUpdate {
            state,
            settlements,
            awarded,
        })
    }

    // -----------------------------------------------------------------------
    // Achievements
    // -----------------------------------------------------------------------

    pub fn evaluate_achievements(&self, player_id: PlayerId) -> Result<AchievementReport> {
        self.fetch(|conn| {
            require_player(conn, player_id)?;
            let history = matches::published_history(conn, player_id)?;
            Ok(evaluate(&history, &self.config.achievements))
        })
    }

    /// Credit every unlocked badge the player has not been credited for.
    pub fn award_achievements(&self, player_id: PlayerId) -> Result<Vec<Badge>> {
        let awarded = self.mutate(|conn, effects| {
            let (_, awarded) = award_for_player(conn, &self.config.achievements, player_id)?;
            if !awarded.is_empty() {
                effects.invalidate(player_prefix(player_id));
            }
            Ok(awarded)
        })?;
        info!(player_id, awarded = awarded.len(), "achievements awarded");
        Ok(awarded)
    }

    // -----------------------------------------------------------------------
    // Rankings
    // -----------------------------------------------------------------------

    pub fn global_leaderboard(&self, limit: usize) -> Result<Vec<Player>> {
        self.fetch(|conn| Ok(ledger::top_players(conn, limit)?))
    }

    /// League standings, served through the response cache.
    pub fn league_leaderboard(&self, league_id: LeagueId, limit: usize) -> Result<Vec<LeagueStanding>> {
        let key = format!("{}leaderboard:{limit}", league_prefix(league_id));
        self.cached(&key, || {
            self.fetch(|conn| Ok(matches::league_standings(conn, league_id, limit)?))
        })
    }

    fn cached<T>(&self, key: &str, load: impl FnOnce() -> Result<T>) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        if let Some(hit) = self.hooks.cache.get(key) {
            match serde_json::from_value(hit) {
                Ok(value) => {
                    debug!(key, "cache hit");
                    return Ok(value);
                }
                Err(e) => warn!(key, "discarding undecodable cache entry: {e}"),
            }
        }

        let value = load()?;
        match serde_json::to_value(&value) {
            Ok(json) => {
                if let Err(e) = self.hooks.cache.set(key, json, self.config.cache_ttl) {
                    warn!(key, "cache store failed: {e:#}");
                }
            }
            Err(e) => warn!(key, "failed to encode cache entry: {e}"),
        }
        Ok(value)
    }
}
