// Boundary normalization for the loosely typed request bodies.
//
// Clients send numbers as JSON numbers or numeric strings and stat bodies
// as either one object or an array. Everything is turned into typed values
// here, before any lifecycle or settlement code sees it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MatchdayError, Result};
use crate::model::{Participant, PickCategory, PlayerId, StatLine, TeamSide};

/// One normalized stat line from a submission body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatSubmission {
    pub participant: Participant,
    /// Roster side. Required for guests who are not on a roster yet;
    /// registered players are looked up on the match.
    pub side: Option<TeamSide>,
    pub stats: StatLine,
}

impl StatSubmission {
    pub fn registered(player_id: PlayerId, stats: StatLine) -> Self {
        StatSubmission {
            participant: Participant::Registered { player_id },
            side: None,
            stats,
        }
    }

    pub fn guest(name: impl Into<String>, side: TeamSide, stats: StatLine) -> Self {
        StatSubmission {
            participant: Participant::Guest { name: name.into() },
            side: Some(side),
            stats,
        }
    }
}

fn invalid(message: impl Into<String>) -> MatchdayError {
    MatchdayError::InvalidPayload {
        message: message.into(),
    }
}

/// Non-negative integer from a JSON number or numeric string.
fn count_value(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    }
}

/// Positive id from a JSON number or numeric string.
fn id_value(value: &Value) -> Option<PlayerId> {
    let id = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }?;
    (id > 0).then_some(id)
}

/// Optional count field: absent or null means zero.
fn count_field(obj: &serde_json::Map<String, Value>, field: &str) -> Result<u32> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(0),
        Some(v) => count_value(v)
            .ok_or_else(|| invalid(format!("`{field}` must be a non-negative integer, got {v}"))),
    }
}

fn stat_item(item: &Value) -> Result<StatSubmission> {
    let obj = item
        .as_object()
        .ok_or_else(|| invalid("stat entry must be an object"))?;

    let side = match obj.get("side") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(
            TeamSide::parse(s).ok_or_else(|| invalid(format!("unknown side `{s}`")))?,
        ),
        Some(v) => return Err(invalid(format!("`side` must be a string, got {v}"))),
    };

    let player = obj.get("playerId").filter(|v| !v.is_null());
    let guest = obj.get("guestName").filter(|v| !v.is_null());
    let participant = match (player, guest) {
        (Some(id), None) => Participant::Registered {
            player_id: id_value(id).ok_or_else(|| invalid(format!("invalid playerId {id}")))?,
        },
        (None, Some(Value::String(name))) if !name.trim().is_empty() => {
            if side.is_none() {
                return Err(invalid(format!("guest `{name}` needs a side")));
            }
            Participant::Guest {
                name: name.trim().to_string(),
            }
        }
        (Some(_), Some(_)) => return Err(invalid("entry names both playerId and guestName")),
        _ => return Err(invalid("entry needs a playerId or a guestName")),
    };

    Ok(StatSubmission {
        participant,
        side,
        stats: StatLine {
            goals: count_field(obj, "goals")?,
            assists: count_field(obj, "assists")?,
            clean_sheets: count_field(obj, "cleanSheets")?,
        },
    })
}

/// Normalize a stats body (one object or an array of objects).
pub fn parse_stat_submissions(body: &Value) -> Result<Vec<StatSubmission>> {
    match body {
        Value::Array(items) if items.is_empty() => Err(invalid("no stat entries submitted")),
        Value::Array(items) => items.iter().map(stat_item).collect(),
        Value::Object(_) => Ok(vec![stat_item(body)?]),
        other => Err(invalid(format!("stats body must be an object or array, got {other}"))),
    }
}

/// `{homeGoals, awayGoals}` → (home, away).
pub fn parse_goals(body: &Value) -> Result<(u32, u32)> {
    let field = |name: &str| -> Result<u32> {
        let value = body.get(name).ok_or_else(|| MatchdayError::InvalidGoals {
            message: format!("`{name}` is required"),
        })?;
        count_value(value).ok_or_else(|| MatchdayError::InvalidGoals {
            message: format!("`{name}` must be a non-negative integer, got {value}"),
        })
    };
    Ok((field("homeGoals")?, field("awayGoals")?))
}

/// `{votedForId}` → candidate. Null or absent clears the vote.
pub fn parse_vote(body: &Value) -> Result<Option<PlayerId>> {
    match body.get("votedForId") {
        None | Some(Value::Null) => Ok(None),
        Some(v) => id_value(v)
            .map(Some)
            .ok_or_else(|| invalid(format!("invalid votedForId {v}"))),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPick {
    category: String,
    player_id: Value,
}

/// `{category, playerId}` → (category, player).
pub fn parse_pick(body: &Value) -> Result<(PickCategory, PlayerId)> {
    let raw: RawPick =
        serde_json::from_value(body.clone()).map_err(|e| invalid(format!("invalid pick body: {e}")))?;
    let category = PickCategory::parse(&raw.category)
        .ok_or_else(|| invalid(format!("unknown pick category `{}`", raw.category)))?;
    let player_id =
        id_value(&raw.player_id).ok_or_else(|| invalid(format!("invalid playerId {}", raw.player_id)))?;
    Ok((category, player_id))
}
