//! Data contracts exchanged between pipeline stages.
//!
//! Field names follow the snake_case JSON produced by the upstream matching
//! workflow (`matched_board`, `price_cny`, `match_degree`, ...). Deserializers
//! are lenient: a malformed value degrades to a default instead of failing the
//! whole document.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::price::{de_price, normalize_matched_boards};

/// Reason the upstream matcher attaches when no board fits a demand.
pub const NO_BOARD_REASON: &str = "未找到相关功能板卡";

/// English spelling of [`NO_BOARD_REASON`], accepted on input.
pub const NO_BOARD_REASON_EN: &str = "no board found";

/// Returns true when `reason` is the "no board found" sentinel.
pub fn is_no_board_reason(reason: &str) -> bool {
    let reason = reason.trim();
    reason == NO_BOARD_REASON || reason.eq_ignore_ascii_case(NO_BOARD_REASON_EN)
}

/// A functional requirement extracted from a specification document.
///
/// Identified by its verbatim text (`original`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Demand {
    #[serde(default, deserialize_with = "de_string_or_null")]
    pub original: String,
    #[serde(
        default,
        alias = "Channels_type",
        alias = "channelType",
        skip_serializing_if = "Option::is_none"
    )]
    pub channel_type: Option<String>,
    #[serde(
        default,
        alias = "requiredChannelCount",
        deserialize_with = "de_lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub required_channel_count: Option<f64>,
}

impl Demand {
    pub fn new(original: impl Into<String>) -> Self {
        Self {
            original: original.into(),
            channel_type: None,
            required_channel_count: None,
        }
    }
}

/// Reference to a board inside a coverage record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardRef {
    #[serde(default, deserialize_with = "de_opt_string")]
    pub id: Option<String>,
}

/// One matcher result used for coverage analysis: a demand type and the
/// boards matched against it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageRecord {
    #[serde(default, alias = "Channels_type", alias = "channelType")]
    pub channel_type: Option<String>,
    #[serde(default, deserialize_with = "de_vec_or_null")]
    pub matched_board: Vec<BoardRef>,
}

/// A proposed (demand, board) pairing from the external matcher.
///
/// Keys the matcher emits beyond the named fields land in `extra`; only scalar
/// values from it survive into output rows (see [`scalar_attributes`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateAssignment {
    #[serde(default, deserialize_with = "de_string_or_null")]
    pub original: String,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub match_degree: Option<f64>,
    #[serde(default, deserialize_with = "de_price")]
    pub price_cny: f64,
    #[serde(default, deserialize_with = "de_map_or_null")]
    pub requirement_specification: Map<String, Value>,
    #[serde(default, deserialize_with = "de_map_or_null")]
    pub board_specification: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance: Option<Value>,
    #[serde(default, alias = "description ", deserialize_with = "de_string_or_null")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One row of a matched-board group as fed to the selector and reconciler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchedBoardRow {
    #[serde(default, deserialize_with = "de_opt_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "de_string_or_null")]
    pub original: String,
    #[serde(default, deserialize_with = "de_price")]
    pub price_cny: f64,
    #[serde(default, deserialize_with = "de_quantity")]
    pub quantity: u32,
    #[serde(default, deserialize_with = "de_price")]
    pub total_amount_cny: f64,
    #[serde(default, deserialize_with = "de_string_or_null")]
    pub reason: String,
    #[serde(default, alias = "description ", deserialize_with = "de_string_or_null")]
    pub description: String,
    #[serde(
        default,
        deserialize_with = "de_lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub match_degree: Option<f64>,
}

impl MatchedBoardRow {
    /// Row marking `original` as having no matching board.
    pub fn no_board(original: impl Into<String>) -> Self {
        Self {
            original: original.into(),
            reason: NO_BOARD_REASON.to_string(),
            ..Self::default()
        }
    }

    pub fn is_no_board(&self) -> bool {
        is_no_board_reason(&self.reason)
    }

    /// Amount this row costs: the explicit total when present, otherwise unit
    /// price times quantity (at least one unit).
    pub fn effective_total(&self) -> f64 {
        if self.total_amount_cny > 0.0 {
            self.total_amount_cny
        } else {
            self.price_cny * f64::from(self.quantity.max(1))
        }
    }
}

/// Candidates proposed for one originating demand or category.
///
/// When the matcher tags the group with the demand it answers (`original`),
/// the pipeline normalizes the rows against that demand before selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateGroup {
    #[serde(
        default,
        deserialize_with = "de_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub original: Option<String>,
    #[serde(default, deserialize_with = "de_vec_or_null")]
    pub matched_board: Vec<MatchedBoardRow>,
}

impl CandidateGroup {
    pub fn new(matched_board: Vec<MatchedBoardRow>) -> Self {
        Self {
            original: None,
            matched_board,
        }
    }

    pub fn for_demand(original: impl Into<String>, matched_board: Vec<MatchedBoardRow>) -> Self {
        Self {
            original: Some(original.into()),
            matched_board,
        }
    }

    /// Rows normalized against the group's demand; untagged groups are
    /// returned unchanged.
    pub fn normalized(&self) -> CandidateGroup {
        match &self.original {
            Some(original) => CandidateGroup {
                original: Some(original.clone()),
                matched_board: normalize_matched_boards(original, self.matched_board.clone()),
            },
            None => self.clone(),
        }
    }
}

/// Scalar value carried in an output row's additional attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
}

impl AttributeValue {
    /// Converts a JSON scalar; arrays, objects and null yield `None`.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(AttributeValue::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(AttributeValue::Integer(i)),
                None => n.as_f64().map(AttributeValue::Number),
            },
            Value::String(s) => Some(AttributeValue::Text(s.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }
}

/// Projects `extra` onto its scalar entries, skipping every key in `denied`.
pub fn scalar_attributes(
    extra: &Map<String, Value>,
    denied: &[&str],
) -> BTreeMap<String, AttributeValue> {
    let mut attributes = BTreeMap::new();
    for (key, value) in extra {
        if denied.contains(&key.as_str()) {
            continue;
        }
        match AttributeValue::from_json(value) {
            Some(attr) => {
                attributes.insert(key.clone(), attr);
            }
            None if !value.is_null() => {
                tracing::debug!("Dropping non-scalar attribute '{}'", key);
            }
            None => {}
        }
    }
    attributes
}

/// Reads an optional identifier given as a string or a number.
pub fn de_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Reads a number given as a JSON number or numeric string.
pub fn de_lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(lenient_f64))
}

/// Reads a unit count; missing, negative or malformed values become 0.
pub fn de_quantity<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(lenient_f64)
        .filter(|q| q.is_finite() && *q > 0.0)
        .map(|q| q.round().min(f64::from(u32::MAX)) as u32)
        .unwrap_or(0))
}

/// Reads text where `null` means empty. Numbers and booleans keep their
/// JSON spelling; arrays and objects are dropped.
pub fn de_string_or_null<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other @ (Value::Array(_) | Value::Object(_))) => {
            tracing::debug!("Ignoring non-text value {}", other);
            String::new()
        }
        Some(Value::Null) | None => String::new(),
    })
}

/// Reads an object where `null` (or any non-object) means empty.
pub fn de_map_or_null<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    })
}

/// Reads a list where `null` means empty.
pub fn de_vec_or_null<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

pub(crate) fn lenient_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}
