// Matchday operator CLI.
//
// Startup sequence:
// 1. Install and load config (seeded from defaults on first run)
// 2. Initialize tracing (log to file, not terminal)
// 3. Open the ledger and build the league service
// 4. Spawn a task that drains realtime events into the log
// 5. Run the command on a blocking thread
// 6. Drop the service so the event channel closes, then wait for the drain

mod output;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;
use tracing::{info, warn};

use matchday_core::config;
use matchday_core::hooks::{ChannelEventSink, Hooks, LogSink, MemoryCache, RealtimeEvent};
use matchday_core::model::{LeagueId, MatchId, PlayerId};
use matchday_core::LeagueService;

use output::*;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Debug, Parser)]
#[command(name = "matchday", about = "League match, vote and XP ledger maintenance")]
struct Cli {
    /// Directory holding config/ (and optionally defaults/).
    #[arg(short, long, default_value = ".")]
    base_dir: PathBuf,
    /// Override the database path from the config file.
    #[arg(long)]
    db: Option<String>,
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Register a player and print the new id.
    Register {
        name: String,
    },
    /// Make a player an admin of a league.
    GrantAdmin {
        #[arg(long)]
        league: LeagueId,
        #[arg(long)]
        player: PlayerId,
    },
    /// Show the XP each participant would settle at, without writing.
    Preview {
        #[arg(long = "match")]
        match_id: MatchId,
    },
    /// Re-run delta settlement for a published match.
    Resettle {
        #[arg(long = "match")]
        match_id: MatchId,
    },
    /// Live MOTM votes per candidate.
    Tally {
        #[arg(long = "match")]
        match_id: MatchId,
    },
    /// Streaks and unlocked badges for a player.
    Achievements {
        #[arg(long)]
        player: PlayerId,
    },
    /// Credit badges the player has not been credited for yet.
    Award {
        #[arg(long)]
        player: PlayerId,
    },
    /// Players by XP, globally or within one league.
    Leaderboard {
        #[arg(long)]
        league: Option<LeagueId>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load config
    let source = config::ensure_config_file(&cli.base_dir).context("failed to install config")?;
    let mut config = config::load_config_from(&cli.base_dir).context("failed to load configuration")?;
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }

    // 2. Initialize tracing
    let log_path = init_tracing(&cli.base_dir, &config.log_filter)?;
    info!(?source, log = %log_path.display(), "matchday starting: {:?}", cli.command);

    // 3. Open the ledger
    let (event_tx, event_rx) = mpsc::channel::<RealtimeEvent>(EVENT_CHANNEL_CAPACITY);
    let hooks = Hooks {
        cache: Arc::new(MemoryCache::new()),
        events: Arc::new(ChannelEventSink::new(event_tx)),
        notifications: Arc::new(LogSink),
    };
    let db_path = config.db_path.clone();
    let service = LeagueService::open(config, hooks)
        .with_context(|| format!("failed to open ledger at {db_path}"))?;
    info!("ledger opened at {db_path}");

    // 4. Drain realtime events
    let drain = tokio::spawn(drain_events(event_rx));

    // 5. Run the command
    let format = cli.output;
    let command = cli.command;
    let rendered = tokio::task::spawn_blocking(move || {
        let result = run(&service, command, format);
        drop(service);
        result
    })
    .await
    .context("command task panicked")??;

    // 6. Wait for the drain to see the closed channel
    let forwarded = drain.await.context("event drain task panicked")?;
    info!(forwarded, "matchday finished");

    println!("{rendered}");
    Ok(())
}

fn run(service: &LeagueService, command: Commands, format: OutputFormat) -> Result<String> {
    let rendered = match command {
        Commands::Register { name } => service.register_player(&name)?.to_string(),
        Commands::GrantAdmin { league, player } => {
            service.grant_league_admin(league, player)?;
            format!("player {player} administers league {league}")
        }
        Commands::Preview { match_id } => {
            let outcomes = service.preview_match_xp(match_id)?;
            match format {
                OutputFormat::Table => render_settlement_table(&outcomes),
                OutputFormat::Json => render_json(&outcomes)?,
                OutputFormat::Csv => settlement_to_csv(&outcomes)?,
            }
        }
        Commands::Resettle { match_id } => {
            let update = service.resettle_match(match_id)?;
            match format {
                OutputFormat::Table => render_settlement_table(&update.settlements),
                OutputFormat::Json => render_json(&update)?,
                OutputFormat::Csv => settlement_to_csv(&update.settlements)?,
            }
        }
        Commands::Tally { match_id } => {
            let tally = service.vote_tally(match_id)?;
            match format {
                OutputFormat::Table => render_tally_table(&tally),
                OutputFormat::Json => render_json(&tally)?,
                OutputFormat::Csv => tally_to_csv(&tally)?,
            }
        }
        Commands::Achievements { player } => {
            let report = service.evaluate_achievements(player)?;
            match format {
                OutputFormat::Json => render_json(&report)?,
                _ => render_report(&report),
            }
        }
        Commands::Award { player } => {
            let awarded = service.award_achievements(player)?;
            match format {
                OutputFormat::Json => render_json(&awarded)?,
                _ if awarded.is_empty() => format!("nothing new for player {player}"),
                _ => awarded
                    .iter()
                    .map(|b| format!("{} (+{} XP)", b.id, b.xp_bonus))
                    .collect::<Vec<_>>()
                    .join("\n"),
            }
        }
        Commands::Leaderboard {
            league: Some(league),
            limit,
        } => {
            let standings = service.league_leaderboard(league, limit)?;
            match format {
                OutputFormat::Table => render_league_table(&standings),
                OutputFormat::Json => render_json(&standings)?,
                OutputFormat::Csv => league_to_csv(&standings)?,
            }
        }
        Commands::Leaderboard { league: None, limit } => {
            let players = service.global_leaderboard(limit)?;
            match format {
                OutputFormat::Table => render_global_table(&players),
                OutputFormat::Json => render_json(&players)?,
                OutputFormat::Csv => global_to_csv(&players)?,
            }
        }
    };
    Ok(rendered)
}

/// Log every realtime event until all senders are gone. Returns how many
/// were seen.
async fn drain_events(mut rx: mpsc::Receiver<RealtimeEvent>) -> usize {
    let mut count = 0;
    while let Some(event) = rx.recv().await {
        match serde_json::to_string(&event) {
            Ok(json) => info!("realtime event: {json}"),
            Err(e) => warn!("failed to encode realtime event: {e}"),
        }
        count += 1;
    }
    count
}

/// Route tracing to `logs/matchday.log` under `base_dir`, appending so runs
/// accumulate. `RUST_LOG` wins over the configured filter. Returns the log
/// file path.
fn init_tracing(base_dir: &Path, default_filter: &str) -> Result<PathBuf> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = base_dir.join("logs");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create {}", log_dir.display()))?;
    let log_path = log_dir.join("matchday.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .with_context(|| format!("invalid log filter {default_filter:?}"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(log_path)
}
