//! Quantity Sizer
//!
//! For each unmet requirement, picks the best-matching board variant and
//! works out how many units cover the requested channel count.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::price::round2;
use crate::schema::{scalar_attributes, AttributeValue, CandidateAssignment, Demand, MatchedBoardRow};

/// Suffix marking a specification field as a channel count.
pub const CHANNEL_COUNT_SUFFIX: &str = "_channel_count";

/// Description used for requirements with no candidate board.
pub const NOT_FOUND_DESCRIPTION: &str = "no matching board found";

/// Candidate keys never copied into a sized row's attributes.
const RESERVED_KEYS: &[&str] = &[
    "requirement_specification",
    "board_specification",
    "compliance",
    "status",
    "quantity",
    "total_amount_cny",
];

static DESCRIPTION_CHANNELS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\s*(?:通道|路|channels?\b|ch\b|lanes?\b)")
        .expect("valid channel description pattern")
});

/// What to divide by when the board's channel count is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroBoardCountPolicy {
    /// Divide by the requirement's own count, so one board is ordered.
    #[default]
    UseRequirement,
    /// Divide by one, so one board per requested channel is ordered.
    ConstantOne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingStatus {
    SingleChoice,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingOptions {
    pub zero_board_count_policy: ZeroBoardCountPolicy,
    pub enable_description_fallback: bool,
}

impl Default for SizingOptions {
    fn default() -> Self {
        Self {
            zero_board_count_policy: ZeroBoardCountPolicy::UseRequirement,
            enable_description_fallback: true,
        }
    }
}

/// A best-match board projected out of its candidate assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizedBoard {
    pub original: String,
    pub id: Option<String>,
    pub description: String,
    pub match_degree: Option<f64>,
    pub price_cny: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttributeValue>,
    pub status: SizingStatus,
    pub quantity: u32,
}

impl SizedBoard {
    fn from_candidate(candidate: &CandidateAssignment, quantity: u32) -> Self {
        Self {
            original: candidate.original.clone(),
            id: candidate.id.clone(),
            description: candidate.description.clone(),
            match_degree: candidate.match_degree,
            price_cny: candidate.price_cny,
            reason: candidate.reason.clone(),
            attributes: scalar_attributes(&candidate.extra, RESERVED_KEYS),
            status: SizingStatus::SingleChoice,
            quantity,
        }
    }

    pub fn total_amount_cny(&self) -> f64 {
        round2(f64::from(self.quantity) * self.price_cny)
    }

    /// Per-demand priced row for reconciliation.
    pub fn to_matched_row(&self) -> MatchedBoardRow {
        MatchedBoardRow {
            id: self.id.clone(),
            original: self.original.clone(),
            price_cny: self.price_cny,
            quantity: self.quantity,
            total_amount_cny: self.total_amount_cny(),
            reason: self.reason.clone().unwrap_or_default(),
            description: self.description.clone(),
            match_degree: self.match_degree,
        }
    }
}

/// Stand-in row for a requirement no candidate matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardPlaceholder {
    pub original: String,
    pub description: String,
    pub status: SizingStatus,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SizedRow {
    Board(SizedBoard),
    Placeholder(BoardPlaceholder),
}

impl SizedRow {
    pub fn original(&self) -> &str {
        match self {
            SizedRow::Board(b) => &b.original,
            SizedRow::Placeholder(p) => &p.original,
        }
    }

    pub fn quantity(&self) -> u32 {
        match self {
            SizedRow::Board(b) => b.quantity,
            SizedRow::Placeholder(p) => p.quantity,
        }
    }

    pub fn board(&self) -> Option<&SizedBoard> {
        match self {
            SizedRow::Board(b) => Some(b),
            SizedRow::Placeholder(_) => None,
        }
    }
}

/// `ceil(requirement / board)` with the divisor floored to one.
pub fn units_needed(requirement_channels: f64, board_channels: f64) -> u32 {
    let divisor = if board_channels.is_finite() && board_channels >= 1.0 {
        board_channels
    } else {
        1.0
    };
    if !requirement_channels.is_finite() || requirement_channels <= 0.0 {
        return 0;
    }
    (requirement_channels / divisor).ceil().min(f64::from(u32::MAX)) as u32
}

/// First positive channel count in a specification map, in document order.
pub fn first_channel_count(spec: &Map<String, Value>) -> Option<f64> {
    spec.iter()
        .filter(|(key, _)| key.to_ascii_lowercase().ends_with(CHANNEL_COUNT_SUFFIX))
        .find_map(|(_, field)| {
            field
                .get("value")
                .filter(|v| v.is_number())
                .and_then(Value::as_f64)
                .filter(|v| v.is_finite() && *v > 0.0)
        })
}

/// Channel count stated in free text, e.g. "8通道", "16路" or "4 channels".
pub fn channels_from_description(description: &str) -> Option<f64> {
    DESCRIPTION_CHANNELS
        .captures(description)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|n| *n > 0)
        .map(f64::from)
}

#[derive(Debug, Clone, Default)]
pub struct QuantitySizer {
    options: SizingOptions,
}

impl QuantitySizer {
    pub fn new(options: SizingOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SizingOptions {
        &self.options
    }

    /// Candidate for `original` with the strictly highest match degree; the
    /// first one wins ties. Candidates without a degree never qualify.
    pub fn best_match<'a>(
        original: &str,
        candidates: &'a [CandidateAssignment],
    ) -> Option<&'a CandidateAssignment> {
        let mut best: Option<&CandidateAssignment> = None;
        let mut highest = f64::NEG_INFINITY;
        for candidate in candidates.iter().filter(|c| c.original == original) {
            if let Some(degree) = candidate.match_degree {
                if degree > highest {
                    highest = degree;
                    best = Some(candidate);
                }
            }
        }
        best
    }

    /// Board channel count used as the divisor, after fallbacks.
    fn board_channels(&self, best: &CandidateAssignment, requirement_channels: f64) -> f64 {
        let mut board_channels = first_channel_count(&best.board_specification).unwrap_or(0.0);

        if board_channels <= 0.0 && self.options.enable_description_fallback {
            if let Some(parsed) = channels_from_description(&best.description) {
                tracing::debug!(
                    "Board {:?}: channel count {} taken from description",
                    best.id,
                    parsed
                );
                board_channels = parsed;
            }
        }

        if board_channels <= 0.0 {
            board_channels = match self.options.zero_board_count_policy {
                ZeroBoardCountPolicy::UseRequirement if requirement_channels > 0.0 => {
                    requirement_channels
                }
                ZeroBoardCountPolicy::UseRequirement | ZeroBoardCountPolicy::ConstantOne => 1.0,
            };
            tracing::warn!(
                "Board {:?} for '{}' has no channel count, dividing by {}",
                best.id,
                best.original,
                board_channels
            );
        }
        board_channels
    }

    /// Sizes one requirement and appends the resulting row to `out`.
    pub fn size_into(
        &self,
        requirement: &Demand,
        candidates: &[CandidateAssignment],
        out: &mut Vec<SizedRow>,
    ) {
        let original = requirement.original.as_str();
        let Some(best) = Self::best_match(original, candidates) else {
            tracing::info!("No candidate board for requirement '{}'", original);
            let requested = requirement.required_channel_count.unwrap_or(0.0);
            out.push(SizedRow::Placeholder(BoardPlaceholder {
                original: original.to_string(),
                description: NOT_FOUND_DESCRIPTION.to_string(),
                status: SizingStatus::SingleChoice,
                quantity: units_needed(requested, 1.0),
            }));
            return;
        };

        let requirement_channels = first_channel_count(&best.requirement_specification).unwrap_or(0.0);
        let board_channels = self.board_channels(best, requirement_channels);
        let quantity = units_needed(requirement_channels, board_channels);

        tracing::debug!(
            "Sized '{}': {} / {} -> {} x {:?}",
            original,
            requirement_channels,
            board_channels,
            quantity,
            best.id
        );
        out.push(SizedRow::Board(SizedBoard::from_candidate(best, quantity)));
    }

    /// Sizes every requirement, preserving their order.
    pub fn size_all(&self, requirements: &[Demand], candidates: &[CandidateAssignment]) -> Vec<SizedRow> {
        let mut out = Vec::with_capacity(requirements.len());
        for requirement in requirements {
            self.size_into(requirement, candidates, &mut out);
        }
        out
    }
}
