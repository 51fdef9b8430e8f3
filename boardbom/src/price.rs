//! Price parsing and matched-board row normalization.
//!
//! Quotes arrive as plain numbers or as strings such as `"￥1,250.00"`.
//! Anything that cannot be read as a decimal CNY amount becomes 0 and is
//! logged as a data-quality warning; it never fails the run.

use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::sync::LazyLock;

use crate::schema::MatchedBoardRow;

/// Currency glyphs stripped from the front of price strings.
pub const CURRENCY_GLYPHS: &[char] = &['￥', '¥', '$', '€', '£'];

static TRAILING_DECIMAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*$").expect("valid trailing decimal pattern"));

/// Parses a price string, returning `None` when no amount can be recovered.
pub fn parse_price_str(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches(|c: char| CURRENCY_GLYPHS.contains(&c) || c.is_whitespace())
        .chars()
        .filter(|c| *c != ',')
        .collect();

    if cleaned.is_empty() {
        return None;
    }
    if let Ok(value) = cleaned.trim().parse::<f64>() {
        return Some(value).filter(|v| v.is_finite());
    }

    // "单价 250.5" or "CNY 99"
    if let Some(value) = TRAILING_DECIMAL
        .captures(&cleaned)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
    {
        return Some(value);
    }

    // "250元"
    let digits: String = cleaned
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    digits.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Reads a price from any JSON value. Missing values are 0 without a warning;
/// present but unreadable values are 0 with one.
pub fn parse_price(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()).unwrap_or(0.0),
        Value::String(s) if s.trim().is_empty() => 0.0,
        Value::String(s) => parse_price_str(s).unwrap_or_else(|| {
            tracing::warn!("Unparsable price '{}', using 0", s);
            0.0
        }),
        other => {
            tracing::warn!("Unparsable price {}, using 0", other);
            0.0
        }
    }
}

/// Serde adapter for price fields.
pub fn de_price<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().map(parse_price).unwrap_or(0.0))
}

/// Rounds an amount to cents.
pub fn round2(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Prepares the matcher's boards for one demand before selection.
///
/// Every row is stamped with `original`, stale totals are dropped, missing
/// quantities default to one unit and `total_amount_cny` is recomputed from
/// quantity and unit price when both are positive. An empty list becomes a
/// single "no board found" row so the demand stays visible downstream.
pub fn normalize_matched_boards(
    original: &str,
    boards: Vec<MatchedBoardRow>,
) -> Vec<MatchedBoardRow> {
    if boards.is_empty() {
        tracing::debug!("No boards matched '{}'", original);
        return vec![MatchedBoardRow::no_board(original)];
    }

    boards
        .into_iter()
        .map(|mut row| {
            row.original = original.to_string();
            row.total_amount_cny = 0.0;
            if row.quantity == 0 {
                row.quantity = 1;
            }
            if row.price_cny > 0.0 {
                row.total_amount_cny = round2(f64::from(row.quantity) * row.price_cny);
            }
            row
        })
        .collect()
}
