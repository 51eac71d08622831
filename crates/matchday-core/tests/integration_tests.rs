// Integration tests for the league core.
//
// These tests drive `LeagueService` end to end through its public API with
// an in-memory store: scheduling, the captain confirmation protocol, votes,
// stat submission, delta settlement, achievements and the collaborator hooks.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use serde_json::json;
use tokio::sync::mpsc;

use matchday_core::config::Config;
use matchday_core::db::ledger;
use matchday_core::hooks::{
    ChannelEventSink, ChannelNotificationSink, EventAction, EventSink, Hooks, MemoryCache,
    Notification, NotificationKind, NotificationSink, NullCache, RealtimeEvent,
};
use matchday_core::model::{Caller, MatchId, MatchStatus, NewMatch, PickCategory, PlayerId, StatLine, TeamSide};
use matchday_core::model::TeamResult;
use matchday_core::payload::{parse_goals, parse_pick, parse_stat_submissions, parse_vote, StatSubmission};
use matchday_core::xp::{compute_match_xp, XpInput};
use matchday_core::{LeagueService, MatchdayError};

// ===========================================================================
// Test helpers
// ===========================================================================

/// A league with one admin and two fixed squads of four.
struct League {
    service: LeagueService,
    admin: Caller,
    home: Vec<PlayerId>,
    away: Vec<PlayerId>,
}

impl League {
    fn with_hooks(hooks: Hooks) -> Self {
        let service = LeagueService::open(Config::default(), hooks).expect("in-memory service");
        let admin_id = service.register_player("Admin").unwrap();
        service.grant_league_admin(1, admin_id).unwrap();
        service.grant_league_admin(2, admin_id).unwrap();
        let squad = |prefix: &str| -> Vec<PlayerId> {
            (1..=4)
                .map(|i| service.register_player(&format!("{prefix}{i}")).unwrap())
                .collect()
        };
        let home = squad("Home ");
        let away = squad("Away ");
        League {
            service,
            admin: Caller::admin(admin_id),
            home,
            away,
        }
    }

    fn new() -> Self {
        Self::with_hooks(Hooks::default())
    }

    fn home_captain(&self) -> Caller {
        Caller::player(self.home[0])
    }

    fn away_captain(&self) -> Caller {
        Caller::player(self.away[0])
    }

    /// Schedule a match `day` days into the season.
    fn schedule(&self, league_id: i64, day: i64) -> MatchId {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 18, 0, 0).unwrap() + Duration::days(day);
        self.service
            .create_match(
                &self.admin,
                NewMatch {
                    league_id,
                    season_id: None,
                    scheduled_start: Some(start),
                    scheduled_end: Some(start + Duration::hours(1)),
                    home_players: self.home.clone(),
                    away_players: self.away.clone(),
                    home_captain: self.home[0],
                    away_captain: self.away[0],
                },
            )
            .expect("match should schedule")
            .id
    }

    fn publish(&self, match_id: MatchId, home_goals: u32, away_goals: u32) {
        self.service
            .upload_result(&self.admin, match_id, home_goals, away_goals)
            .unwrap();
        self.service.confirm_result(&self.home_captain(), match_id).unwrap();
        let update = self.service.confirm_result(&self.away_captain(), match_id).unwrap();
        assert_eq!(update.state.status, MatchStatus::ResultPublished);
    }

    fn stats(&self, match_id: MatchId, player_id: PlayerId, goals: u32, assists: u32) {
        self.service
            .submit_stats(
                &self.admin,
                match_id,
                &[StatSubmission::registered(
                    player_id,
                    StatLine {
                        goals,
                        assists,
                        clean_sheets: 0,
                    },
                )],
            )
            .unwrap();
    }

    fn xp(&self, player_id: PlayerId) -> i64 {
        self.service.get_player(player_id).unwrap().xp
    }
}

struct FailingHooks;

impl EventSink for FailingHooks {
    fn publish(&self, _event: &RealtimeEvent) -> anyhow::Result<()> {
        anyhow::bail!("broadcast transport unavailable")
    }
}

impl NotificationSink for FailingHooks {
    fn notify(&self, _notification: &Notification) -> anyhow::Result<()> {
        anyhow::bail!("mailer unavailable")
    }
}

// ===========================================================================
// Settlement scenarios
// ===========================================================================

#[test]
fn full_match_scenario_awards_44_then_retracts_a_goal() {
    let league = League::new();
    let m = league.schedule(1, 0);
    let p = league.home[1];

    league.service.upload_result(&league.admin, m, 3, 0).unwrap();
    league.stats(m, p, 2, 1);
    league
        .service
        .record_vote(&Caller::player(league.home[2]), m, Some(p))
        .unwrap();
    league
        .service
        .record_vote(&Caller::player(league.away[1]), m, Some(p))
        .unwrap();
    league
        .service
        .set_captain_pick(&league.home_captain(), m, PickCategory::Mentality, p)
        .unwrap();

    // Nothing is paid before publication.
    assert_eq!(league.xp(p), 0);

    league.service.confirm_result(&league.home_captain(), m).unwrap();
    let update = league.service.confirm_result(&league.away_captain(), m).unwrap();
    let outcome = update
        .settlements
        .iter()
        .find(|o| o.player_id == p)
        .expect("P settled on publication");
    assert_eq!(outcome.new_xp, 30 + 6 + 2 + 4 + 2);
    assert_eq!(league.xp(p), 44);

    league.stats(m, p, 1, 1);
    assert_eq!(league.xp(p), 41);
}

#[test]
fn resettlement_is_idempotent() {
    let league = League::new();
    let m = league.schedule(1, 0);
    league.stats(m, league.away[2], 1, 0);
    league.publish(m, 1, 1);

    let before: Vec<i64> = league
        .home
        .iter()
        .chain(&league.away)
        .map(|&p| league.xp(p))
        .collect();

    for _ in 0..3 {
        let update = league.service.resettle_match(m).unwrap();
        assert!(update.settlements.iter().all(|o| o.delta == 0));
    }

    let after: Vec<i64> = league
        .home
        .iter()
        .chain(&league.away)
        .map(|&p| league.xp(p))
        .collect();
    assert_eq!(before, after);
}

#[test]
fn stat_change_moves_xp_by_formula_difference() {
    let league = League::new();
    let m = league.schedule(1, 0);
    let p = league.away[3];
    league.publish(m, 0, 2);

    let preview_a = league.service.preview_match_xp(m).unwrap();
    let xp_a = preview_a.iter().find(|o| o.player_id == p).unwrap().new_xp;
    let before = league.xp(p);

    league.stats(m, p, 2, 3);
    let preview_b = league.service.preview_match_xp(m).unwrap();
    let xp_b = preview_b.iter().find(|o| o.player_id == p).unwrap().new_xp;

    assert_eq!(league.xp(p) - before, xp_b - xp_a);
    assert!(preview_b.iter().all(|o| o.delta == 0));
}

#[test]
fn correcting_published_goals_resettles_everyone() {
    let league = League::new();
    let m = league.schedule(1, 0);
    league.publish(m, 2, 1);
    assert_eq!(league.xp(league.home[3]), 30);
    assert_eq!(league.xp(league.away[3]), 5);

    let update = league.service.upload_result(&league.admin, m, 1, 1).unwrap();
    assert_eq!(update.state.status, MatchStatus::ResultPublished);
    assert_eq!(update.settlements.len(), 8);
    assert_eq!(league.xp(league.home[3]), 15);
    assert_eq!(league.xp(league.away[3]), 15);
}

#[test]
fn player_xp_never_goes_negative() {
    let league = League::new();
    let m = league.schedule(1, 0);
    let p = league.home[2];
    league.stats(m, p, 4, 0);
    league.publish(m, 4, 0);
    assert_eq!(league.xp(p), 30 + 12);

    // XP spent elsewhere leaves less than the retraction about to happen.
    league
        .service
        .database()
        .write(|conn| ledger::apply_xp_delta(conn, p, -40))
        .unwrap();
    league.stats(m, p, 0, 0);
    assert_eq!(league.xp(p), 0);
}

#[test]
fn preview_does_not_require_publication() {
    let league = League::new();
    let m = league.schedule(1, 0);
    assert!(matches!(
        league.service.preview_match_xp(m).unwrap_err(),
        MatchdayError::ResultNotUploaded { .. }
    ));

    league.service.upload_result(&league.admin, m, 0, 1).unwrap();
    let preview = league.service.preview_match_xp(m).unwrap();
    assert_eq!(preview.len(), 8);
    assert!(preview.iter().all(|o| o.player_xp.is_none()));
    assert_eq!(league.xp(league.away[1]), 0);

    assert!(matches!(
        league.service.resettle_match(m).unwrap_err(),
        MatchdayError::InvalidTransition { .. }
    ));
}

// ===========================================================================
// Confirmation protocol
// ===========================================================================

#[test]
fn confirmation_gates_publication() {
    let league = League::new();
    let m = league.schedule(1, 0);

    let early = league.service.confirm_result(&league.home_captain(), m).unwrap_err();
    assert!(matches!(early, MatchdayError::ResultNotUploaded { .. }));

    league.service.upload_result(&league.admin, m, 1, 0).unwrap();

    let outsider = league
        .service
        .confirm_result(&Caller::player(league.home[1]), m)
        .unwrap_err();
    assert!(matches!(outsider, MatchdayError::NotCaptain { .. }));

    let first = league.service.confirm_result(&league.home_captain(), m).unwrap();
    assert_eq!(first.state.status, MatchStatus::ResultUploaded);
    assert!(first.state.home_confirmed && !first.state.away_confirmed);

    // Confirming twice is harmless and still does not publish.
    let again = league.service.confirm_result(&league.home_captain(), m).unwrap();
    assert_eq!(again.state.status, MatchStatus::ResultUploaded);
    assert_eq!(league.xp(league.home[1]), 0);

    let second = league.service.confirm_result(&league.away_captain(), m).unwrap();
    assert_eq!(second.state.status, MatchStatus::ResultPublished);
    assert!(second.state.result_published_at.is_some());
    assert_eq!(league.xp(league.home[1]), 30);
}

#[test]
fn reupload_clears_confirmations_and_suggestion() {
    let league = League::new();
    let m = league.schedule(1, 0);
    league.service.upload_result(&league.admin, m, 1, 0).unwrap();
    league.service.confirm_result(&league.home_captain(), m).unwrap();
    league
        .service
        .suggest_revision(&league.away_captain(), m, 1, 1)
        .unwrap();

    let update = league.service.upload_result(&league.admin, m, 1, 1).unwrap();
    let state = update.state;
    assert_eq!(state.status, MatchStatus::ResultUploaded);
    assert!(!state.home_confirmed && !state.away_confirmed);
    assert!(state.suggested.is_none());
    assert_eq!((state.home_goals, state.away_goals), (Some(1), Some(1)));
}

#[test]
fn non_admin_cannot_enter_goals() {
    let league = League::new();
    let m = league.schedule(1, 0);
    let err = league
        .service
        .upload_result(&league.home_captain(), m, 5, 0)
        .unwrap_err();
    assert!(matches!(err, MatchdayError::NotAdmin { .. }));
    assert!(err.is_validation());
}

#[test]
fn goals_payload_validation() {
    assert_eq!(parse_goals(&json!({"homeGoals": "2", "awayGoals": 1})).unwrap(), (2, 1));
    let err = parse_goals(&json!({"homeGoals": "two", "awayGoals": 1})).unwrap_err();
    assert!(matches!(err, MatchdayError::InvalidGoals { .. }));
}

#[test]
fn missing_timing_is_rejected() {
    let league = League::new();
    let err = league
        .service
        .create_match(
            &league.admin,
            NewMatch {
                league_id: 1,
                scheduled_start: Some(Utc::now()),
                home_players: league.home.clone(),
                away_players: league.away.clone(),
                home_captain: league.home[0],
                away_captain: league.away[0],
                ..NewMatch::default()
            },
        )
        .unwrap_err();
    assert!(matches!(
        err,
        MatchdayError::MissingMatchTiming {
            field: "scheduledEnd"
        }
    ));
}

// ===========================================================================
// Votes
// ===========================================================================

#[test]
fn switching_vote_moves_vote_xp_between_candidates() {
    let league = League::new();
    let m = league.schedule(1, 0);
    let (v, c, d) = (league.home[3], league.away[2], league.away[3]);
    league.publish(m, 0, 1);

    league.service.record_vote(&Caller::player(v), m, Some(c)).unwrap();
    let c_with_vote = league.xp(c);
    let d_before = league.xp(d);

    let change = league.service.record_vote(&Caller::player(v), m, Some(d)).unwrap();
    assert_eq!(change.previous, Some(c));
    assert_eq!(change.current, Some(d));
    // Winning side: 2 XP per vote.
    assert_eq!(league.xp(c), c_with_vote - 2);
    assert_eq!(league.xp(d), d_before + 2);

    let tally = league.service.vote_tally(m).unwrap();
    assert_eq!(tally.len(), 1);
    assert_eq!((tally[0].candidate_id, tally[0].votes), (d, 1));
    assert_eq!(league.service.motm_leaders(m).unwrap(), vec![d]);
}

#[test]
fn withdrawing_a_vote_is_idempotent() {
    let league = League::new();
    let m = league.schedule(1, 0);
    league.publish(m, 1, 1);
    let voter = Caller::player(league.home[1]);

    let none = league.service.record_vote(&voter, m, None).unwrap();
    assert_eq!(none.previous, None);

    league.service.record_vote(&voter, m, Some(league.away[1])).unwrap();
    assert_eq!(league.xp(league.away[1]), 15 + 1);
    let cleared = league.service.record_vote(&voter, m, None).unwrap();
    assert_eq!(cleared.previous, Some(league.away[1]));
    assert_eq!(league.xp(league.away[1]), 15);
    assert!(league.service.vote_tally(m).unwrap().is_empty());
}

#[test]
fn self_votes_and_outsiders_are_rejected() {
    let league = League::new();
    let m = league.schedule(1, 0);
    league.service.upload_result(&league.admin, m, 1, 0).unwrap();

    let me = league.home[1];
    let err = league.service.record_vote(&Caller::player(me), m, Some(me)).unwrap_err();
    assert!(matches!(err, MatchdayError::SelfVote));

    let stranger = league.service.register_player("Stranger").unwrap();
    let err = league
        .service
        .record_vote(&Caller::player(stranger), m, Some(me))
        .unwrap_err();
    assert!(matches!(err, MatchdayError::NotParticipant { .. }));

    assert_eq!(parse_vote(&json!({"votedForId": me})).unwrap(), Some(me));
}

// ===========================================================================
// Stats, guests and picks
// ===========================================================================

#[test]
fn guest_stats_resolve_to_one_player_across_matches() {
    let league = League::new();
    let m1 = league.schedule(1, 0);
    let m2 = league.schedule(1, 7);

    let body = json!([
        {"guestName": "Sam Ringer", "side": "home", "goals": "1"},
        {"playerId": league.home[1], "assists": 2}
    ]);
    let entries = parse_stat_submissions(&body).unwrap();
    let update = league
        .service
        .submit_stats(&league.home_captain(), m1, &entries)
        .unwrap();
    let guest_id = *update
        .state
        .home_players
        .difference(&league.home.iter().copied().collect::<BTreeSet<_>>())
        .next()
        .expect("guest added to home roster");

    let again = parse_stat_submissions(&json!({"guestName": "sam  ringer", "side": "home"})).unwrap();
    let update = league.service.submit_stats(&league.admin, m2, &again).unwrap();
    assert!(update.state.home_players.contains(&guest_id));

    let guest = league.service.get_player(guest_id).unwrap();
    assert!(guest.is_guest);

    league.publish(m1, 1, 0);
    assert_eq!(league.xp(guest_id), 30 + 3);
}

#[test]
fn guest_cannot_join_the_other_side() {
    let league = League::new();
    let m = league.schedule(1, 0);
    let entry = [StatSubmission::guest("Pat", TeamSide::Away, StatLine::default())];
    league.service.submit_stats(&league.admin, m, &entry).unwrap();

    let wrong = [StatSubmission::guest("Pat", TeamSide::Home, StatLine::default())];
    let err = league.service.submit_stats(&league.admin, m, &wrong).unwrap_err();
    assert!(matches!(err, MatchdayError::InvalidRoster { .. }));
}

#[test]
fn both_picks_may_go_to_one_player() {
    let league = League::new();
    let m = league.schedule(1, 0);
    let p = league.away[2];
    for body in [
        json!({"category": "defensiveImpact", "playerId": p}),
        json!({"category": "mentality", "playerId": p.to_string()}),
    ] {
        let (category, player_id) = parse_pick(&body).unwrap();
        league
            .service
            .set_captain_pick(&league.away_captain(), m, category, player_id)
            .unwrap();
    }
    league.publish(m, 2, 2);
    assert_eq!(league.xp(p), 15 + 1 + 1);
}

// ===========================================================================
// Achievements
// ===========================================================================

#[test]
fn hat_trick_badge_unlocks_at_third_hat_trick_in_one_league() {
    let league = League::new();
    let p = league.home[1];

    for day in 0..2 {
        let m = league.schedule(1, day);
        league.stats(m, p, 3, 0);
        league.publish(m, 3, 0);
    }
    // A hat-trick in another league does not complete the league-1 set.
    let other = league.schedule(2, 2);
    league.stats(other, p, 3, 0);
    league.publish(other, 3, 0);

    let report = league.service.evaluate_achievements(p).unwrap();
    assert_eq!(report.best_league_hat_tricks, 2);
    assert_eq!(report.hat_trick_sets, 0);

    let m = league.schedule(1, 3);
    league.stats(m, p, 3, 0);
    league.publish(m, 3, 0);

    let player = league.service.get_player(p).unwrap();
    assert!(player.achievements.contains("hat_trick_set_1"));
    assert!(player.achievements.contains("win_streak_3"));
    assert!(player.achievements.contains("scoring_streak_3"));
    // Clean-sheet wins count across leagues.
    assert!(player.achievements.contains("clean_sheet_win_streak_3"));

    // Awarding again credits nothing.
    let xp = player.xp;
    assert!(league.service.award_achievements(p).unwrap().is_empty());
    assert_eq!(league.xp(p), xp);
}

#[test]
fn win_streak_breaks_on_a_draw() {
    let league = League::new();
    let p = league.away[1];
    for (day, (home, away)) in [(0, 1), (0, 2), (1, 1), (0, 1)].into_iter().enumerate() {
        let m = league.schedule(1, day as i64);
        league.publish(m, home, away);
    }
    let report = league.service.evaluate_achievements(p).unwrap();
    assert_eq!(report.matches_played, 4);
    assert_eq!(report.streaks[&matchday_core::achievements::StreakKind::Win], 2);
    assert!(report.badges.is_empty());
}

// ===========================================================================
// Hooks and concurrency
// ===========================================================================

#[test]
fn hook_failures_do_not_roll_back_settlement() {
    let failing = Arc::new(FailingHooks);
    let league = League::with_hooks(Hooks {
        cache: Arc::new(NullCache),
        events: failing.clone(),
        notifications: failing,
    });
    let m = league.schedule(1, 0);
    league.publish(m, 2, 0);
    assert_eq!(league.xp(league.home[2]), 30);
    assert_eq!(
        league.service.get_match(m).unwrap().status,
        MatchStatus::ResultPublished
    );
}

#[tokio::test]
async fn realtime_events_and_notifications_reach_channels() {
    let (event_tx, mut event_rx) = mpsc::channel(128);
    let (note_tx, mut note_rx) = mpsc::channel(128);
    let league = League::with_hooks(Hooks {
        cache: Arc::new(MemoryCache::new()),
        events: Arc::new(ChannelEventSink::new(event_tx)),
        notifications: Arc::new(ChannelNotificationSink::new(note_tx)),
    });
    let m = league.schedule(1, 0);
    league.service.upload_result(&league.admin, m, 1, 0).unwrap();
    league
        .service
        .record_vote(&Caller::player(league.away[1]), m, Some(league.home[2]))
        .unwrap();
    drop(league);

    let mut actions = Vec::new();
    while let Some(event) = event_rx.recv().await {
        assert_eq!(event.match_id, m);
        actions.push(event.action);
    }
    assert_eq!(
        actions,
        vec![
            EventAction::MatchCreated,
            EventAction::ResultUploaded,
            EventAction::VoteUpdated
        ]
    );

    let mut kinds = Vec::new();
    while let Some(note) = note_rx.recv().await {
        kinds.push(note.kind);
    }
    assert_eq!(
        kinds,
        vec![
            NotificationKind::ResultConfirmationRequest,
            NotificationKind::ResultConfirmationRequest,
            NotificationKind::MotmVote
        ]
    );
}

#[test]
fn concurrent_stat_edits_settle_to_the_last_committed_line() {
    for _ in 0..5 {
        let league = League::new();
        let rates = league.service.config().xp.clone();
        let p = league.home[1];
        let m = league.schedule(1, 0);
        league.publish(m, 1, 0);
        let before = league.xp(p);

        std::thread::scope(|scope| {
            for goals in 0..8 {
                let league = &league;
                scope.spawn(move || league.stats(m, p, goals, 0));
            }
        });

        let stat = league
            .service
            .database()
            .read(|conn| ledger::load_stat(conn, m, p))
            .unwrap()
            .expect("stat row should exist");
        let expected = compute_match_xp(
            &rates,
            &XpInput {
                result: TeamResult::Win,
                stats: stat.stats,
                votes_received: 0,
                defensive_impact: false,
                mentality: false,
            },
        )
        .total();
        assert_eq!(stat.xp_awarded, expected);
        assert_eq!(league.xp(p), before + expected);

        let outcome = league
            .service
            .preview_match_xp(m)
            .unwrap()
            .into_iter()
            .find(|o| o.player_id == p)
            .unwrap();
        assert_eq!(outcome.delta, 0);
    }
}

#[test]
fn simultaneous_captain_confirmations_publish_once() {
    for _ in 0..10 {
        let league = League::new();
        let p = league.home[1];
        let m = league.schedule(1, 0);
        league.service.upload_result(&league.admin, m, 2, 0).unwrap();
        let before = league.xp(p);

        let updates: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = [league.home_captain(), league.away_captain()]
                .into_iter()
                .map(|captain| {
                    let service = &league.service;
                    scope.spawn(move || service.confirm_result(&captain, m).unwrap())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let publishing: Vec<_> = updates.iter().filter(|u| !u.settlements.is_empty()).collect();
        assert_eq!(publishing.len(), 1);
        assert_eq!(publishing[0].state.status, MatchStatus::ResultPublished);

        let state = league.service.get_match(m).unwrap();
        assert_eq!(state.status, MatchStatus::ResultPublished);
        assert!(state.home_confirmed && state.away_confirmed);
        assert_eq!(league.xp(p), before + 30);
    }
}

#[test]
fn duplicate_simultaneous_votes_leave_one_live_vote() {
    let league = League::new();
    let m = league.schedule(1, 0);
    league.publish(m, 0, 1);
    let (voter, candidate) = (league.home[2], league.away[2]);
    let before = league.xp(candidate);

    std::thread::scope(|scope| {
        for _ in 0..8 {
            let service = &league.service;
            scope.spawn(move || {
                service
                    .record_vote(&Caller::player(voter), m, Some(candidate))
                    .unwrap()
            });
        }
    });

    let tally = league.service.vote_tally(m).unwrap();
    assert_eq!(tally.len(), 1);
    assert_eq!((tally[0].candidate_id, tally[0].votes), (candidate, 1));
    let vote = league
        .service
        .database()
        .read(|conn| ledger::load_vote(conn, m, voter))
        .unwrap()
        .expect("vote should be live");
    assert_eq!(vote.candidate_id, candidate);
    // Winning side: 2 XP per vote.
    assert_eq!(league.xp(candidate), before + 2);
}
