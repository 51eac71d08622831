// Rendering of command results as tables, JSON or CSV.

use anyhow::Result;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Row, Table};
use serde::Serialize;

use matchday_core::achievements::AchievementReport;
use matchday_core::db::matches::LeagueStanding;
use matchday_core::model::Player;
use matchday_core::service::TallyEntry;
use matchday_core::xp::settlement::SettlementOutcome;

pub fn render_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn new_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(header.to_vec());
    table
}

pub fn render_settlement_table(outcomes: &[SettlementOutcome]) -> String {
    let mut table = new_table(&[
        "Player", "Base", "Stats", "Votes", "Picks", "Paid", "Now", "Delta", "Total",
    ]);
    for o in outcomes {
        let b = &o.breakdown;
        let delta = Cell::new(format!("{:+}", o.delta));
        let delta = match o.delta {
            d if d > 0 => delta.fg(Color::Green),
            d if d < 0 => delta.fg(Color::Red),
            _ => delta,
        };
        table.add_row(Row::from(vec![
            Cell::new(o.player_id.to_string()),
            Cell::new(b.base.to_string()),
            Cell::new((b.goals + b.assists + b.clean_sheets).to_string()),
            Cell::new(b.votes.to_string()),
            Cell::new((b.defensive_impact + b.mentality).to_string()),
            Cell::new(o.previous_xp.to_string()),
            Cell::new(o.new_xp.to_string()),
            delta,
            Cell::new(
                o.player_xp
                    .map(|x| x.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]));
    }
    table.to_string()
}

pub fn settlement_to_csv(outcomes: &[SettlementOutcome]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record([
        "player_id",
        "base",
        "goals",
        "assists",
        "clean_sheets",
        "votes",
        "defensive_impact",
        "mentality",
        "previous_xp",
        "new_xp",
        "delta",
    ])?;
    for o in outcomes {
        let b = &o.breakdown;
        writer.write_record([
            o.player_id.to_string(),
            b.base.to_string(),
            b.goals.to_string(),
            b.assists.to_string(),
            b.clean_sheets.to_string(),
            b.votes.to_string(),
            b.defensive_impact.to_string(),
            b.mentality.to_string(),
            o.previous_xp.to_string(),
            o.new_xp.to_string(),
            o.delta.to_string(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

pub fn render_tally_table(tally: &[TallyEntry]) -> String {
    let mut table = new_table(&["Candidate", "Votes"]);
    for e in tally {
        table.add_row(vec![e.candidate_id.to_string(), e.votes.to_string()]);
    }
    table.to_string()
}

pub fn tally_to_csv(tally: &[TallyEntry]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(["candidate_id", "votes"])?;
    for e in tally {
        writer.write_record([e.candidate_id.to_string(), e.votes.to_string()])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

pub fn render_report(report: &AchievementReport) -> String {
    let mut streaks = new_table(&["Streak", "Longest"]);
    for (kind, len) in &report.streaks {
        streaks.add_row(vec![kind.to_string(), len.to_string()]);
    }
    streaks.add_row(vec![
        "hat_tricks (best league)".to_string(),
        report.best_league_hat_tricks.to_string(),
    ]);
    let mut out = format!("{} published matches\n\n{streaks}", report.matches_played);
    if !report.badges.is_empty() {
        let mut badges = new_table(&["Badge", "Title", "Bonus"]);
        for b in &report.badges {
            badges.add_row(vec![b.id.clone(), b.title.clone(), format!("+{}", b.xp_bonus)]);
        }
        out.push_str(&format!("\n\n{badges}"));
    }
    out
}

pub fn render_global_table(players: &[Player]) -> String {
    let mut table = new_table(&["#", "Player", "Name", "XP", "Badges"]);
    for (i, p) in players.iter().enumerate() {
        table.add_row(vec![
            (i + 1).to_string(),
            p.id.to_string(),
            p.display_name.clone(),
            p.xp.to_string(),
            p.achievements.len().to_string(),
        ]);
    }
    table.to_string()
}

pub fn global_to_csv(players: &[Player]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(["rank", "player_id", "display_name", "xp", "badges"])?;
    for (i, p) in players.iter().enumerate() {
        writer.write_record([
            (i + 1).to_string(),
            p.id.to_string(),
            p.display_name.clone(),
            p.xp.to_string(),
            p.achievements.len().to_string(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

pub fn render_league_table(standings: &[LeagueStanding]) -> String {
    let mut table = new_table(&["#", "Player", "Name", "XP", "Played"]);
    for (i, s) in standings.iter().enumerate() {
        table.add_row(vec![
            (i + 1).to_string(),
            s.player_id.to_string(),
            s.display_name.clone(),
            s.xp.to_string(),
            s.matches_played.to_string(),
        ]);
    }
    table.to_string()
}

pub fn league_to_csv(standings: &[LeagueStanding]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(["rank", "player_id", "display_name", "xp", "matches_played"])?;
    for (i, s) in standings.iter().enumerate() {
        writer.write_record([
            (i + 1).to_string(),
            s.player_id.to_string(),
            s.display_name.clone(),
            s.xp.to_string(),
            s.matches_played.to_string(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}
