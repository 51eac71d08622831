// Configuration loading and parsing (matchday.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::achievements::AchievementBonuses;
use crate::xp::rates::XpRates;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub xp: XpRates,
    pub achievements: AchievementBonuses,
    pub cache_ttl: Duration,
    pub log_filter: String,
}

impl Default for Config {
    /// In-memory store with the built-in rate table. Used by tests and by
    /// embedders that do not ship a config file.
    fn default() -> Self {
        Config {
            db_path: ":memory:".into(),
            xp: XpRates::default(),
            achievements: AchievementBonuses::default(),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            log_filter: DEFAULT_LOG_FILTER.into(),
        }
    }
}

const CONFIG_FILE: &str = "matchday.toml";
const DEFAULT_CACHE_TTL_SECS: u64 = 60;
const DEFAULT_LOG_FILTER: &str = "matchday=info,warn";

// ---------------------------------------------------------------------------
// matchday.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire matchday.toml file.
#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    database: DatabaseSection,
    #[serde(default)]
    xp: XpRates,
    #[serde(default)]
    achievements: AchievementBonuses,
    #[serde(default)]
    cache: CacheSection,
    #[serde(default)]
    logging: LoggingSection,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    /// Empty means "use the platform data directory".
    #[serde(default)]
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CacheSection {
    ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        CacheSection {
            ttl_secs: DEFAULT_CACHE_TTL_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct LoggingSection {
    filter: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        LoggingSection {
            filter: DEFAULT_LOG_FILTER.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/matchday.toml` relative to
/// the given `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-copy defaults.
/// Prefer `load_config` which installs the file first.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE);
    let text = read_file(&path)?;
    parse_config(&text, &path)
}

/// Parse and validate config text. `path` is only used for error messages.
pub fn parse_config(text: &str, path: &Path) -> Result<Config, ConfigError> {
    let file: ConfigFile = toml::from_str(text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config = Config {
        db_path: resolve_db_path(&file.database.path)?,
        xp: file.xp,
        achievements: file.achievements,
        cache_ttl: Duration::from_secs(file.cache.ttl_secs),
        log_filter: file.logging.filter,
    };

    validate(&config)?;

    Ok(config)
}

/// Contents of `defaults/matchday.toml`, compiled in for installs that ship
/// without a `defaults/` directory.
pub const BUNDLED_DEFAULTS: &str = include_str!("../defaults/matchday.toml");

/// Where the installed config came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// `config/matchday.toml` was already present and is left untouched.
    Existing,
    /// Copied from `defaults/matchday.toml`.
    Defaults(PathBuf),
    /// Written from the compiled-in defaults.
    Bundled,
}

/// Make sure `config/matchday.toml` exists under `base_dir`. A missing file
/// is seeded from `defaults/matchday.toml` when that exists, otherwise from
/// [`BUNDLED_DEFAULTS`]. An existing file is never overwritten, including
/// one created by a concurrent process between the check and the write.
pub fn ensure_config_file(base_dir: &Path) -> Result<ConfigSource, ConfigError> {
    let config_dir = base_dir.join("config");
    let target = config_dir.join(CONFIG_FILE);
    if target.is_file() {
        return Ok(ConfigSource::Existing);
    }

    let seed = base_dir.join("defaults").join(CONFIG_FILE);
    let (content, source) = if seed.is_file() {
        let text = std::fs::read_to_string(&seed).map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read {}: {e}", seed.display()),
        })?;
        (text, ConfigSource::Defaults(seed))
    } else {
        (BUNDLED_DEFAULTS.to_string(), ConfigSource::Bundled)
    };

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create {}: {e}", config_dir.display()),
    })?;

    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&target)
    {
        Ok(mut dest) => {
            std::io::Write::write_all(&mut dest, content.as_bytes()).map_err(|e| {
                ConfigError::DefaultsCopyError {
                    message: format!("failed to write {}: {e}", target.display()),
                }
            })?;
            Ok(source)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(ConfigSource::Existing),
        Err(e) => Err(ConfigError::DefaultsCopyError {
            message: format!("failed to create {}: {e}", target.display()),
        }),
    }
}

/// Install the config under `base_dir` if needed, then load it.
pub fn load_config(base_dir: &Path) -> Result<Config, ConfigError> {
    ensure_config_file(base_dir)?;
    load_config_from(base_dir)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

/// An empty `database.path` falls back to `<data dir>/matchday.db`.
fn resolve_db_path(configured: &str) -> Result<String, ConfigError> {
    if !configured.trim().is_empty() {
        return Ok(configured.to_string());
    }
    let dirs = directories::ProjectDirs::from("", "", "matchday").ok_or_else(|| {
        ConfigError::ValidationError {
            field: "database.path".into(),
            message: "no home directory available; set an explicit path".into(),
        }
    })?;
    Ok(dirs
        .data_dir()
        .join("matchday.db")
        .to_string_lossy()
        .into_owned())
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    // Every rate must be non-negative.
    for (name, val) in config.xp.named_rates() {
        if val < 0 {
            return Err(ConfigError::ValidationError {
                field: format!("xp.{name}"),
                message: format!("must be >= 0, got {val}"),
            });
        }
    }

    let ach = &config.achievements;
    if ach.streak_tiers.is_empty() {
        return Err(ConfigError::ValidationError {
            field: "achievements.streak_tiers".into(),
            message: "must list at least one tier".into(),
        });
    }
    if ach.streak_tiers.len() != ach.streak_bonus.len() {
        return Err(ConfigError::ValidationError {
            field: "achievements.streak_bonus".into(),
            message: format!(
                "expected {} entries to match streak_tiers, got {}",
                ach.streak_tiers.len(),
                ach.streak_bonus.len()
            ),
        });
    }
    if ach.streak_tiers[0] == 0 || ach.streak_tiers.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ConfigError::ValidationError {
            field: "achievements.streak_tiers".into(),
            message: "must be positive and strictly increasing".into(),
        });
    }
    if ach.streak_bonus.iter().any(|b| *b < 0) || ach.hat_trick_set_bonus < 0 {
        return Err(ConfigError::ValidationError {
            field: "achievements".into(),
            message: "bonuses must be >= 0".into(),
        });
    }

    if config.cache_ttl.is_zero() {
        return Err(ConfigError::ValidationError {
            field: "cache.ttl_secs".into(),
            message: "must be > 0".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
