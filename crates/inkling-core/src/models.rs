//! Core data models used throughout Inkling.
//!
//! Two families of types live here:
//!
//! - **Records** ([`Fragment`], [`Story`], [`Tag`], [`HistoryRecord`],
//!   [`StoredSuggestion`], [`FragmentRelation`]) read from and written to
//!   the datastore.
//! - **Result shapes** ([`AnalysisResult`], [`RelationAnalysisResult`])
//!   produced by extraction from streamed model output.
//!
//! Result shapes are lenient: every field has a serde default, `null` reads as
//! empty, numeric fields accept floats and quoted numbers, and every enum has
//! an `Unknown` catch-all. This typed view is for display and checks only;
//! history stores the extracted JSON verbatim. Conformance is reported
//! separately by [`crate::shape`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of characters kept by [`preview`].
pub const PREVIEW_CHARS: usize = 50;

/// Color given to stories and tags created without one.
pub const DEFAULT_COLOR: &str = "#6366f1";

/// An atomic user-authored inspiration note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_id: Option<String>,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default)]
    pub created_at: String,
}

impl Fragment {
    /// Builds a fragment carrying only the fields the prompt assembler reads.
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            story_id: None,
            sort_order: 0,
            created_at: String::new(),
        }
    }
}

/// A user-defined grouping container for fragments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub color: String,
    pub created_at: String,
}

/// A user-defined label attachable to many fragments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub color: String,
    pub created_at: String,
}

/// The two analysis modes and their prompt/temperature presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    /// Thematic groups plus three creative suggestions for a focus fragment.
    Simple,
    /// Relations, smart groups, timeline, themes, and ranked suggestions.
    Relation,
}

impl AnalysisMode {
    /// Temperature used when no override is configured. Simple grouping
    /// favours variety, relation analysis favours structural consistency.
    pub fn default_temperature(self) -> f32 {
        match self {
            AnalysisMode::Simple => 0.8,
            AnalysisMode::Relation => 0.6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisMode::Simple => "simple",
            AnalysisMode::Relation => "relation",
        }
    }
}

/// A `(system, user)` instruction pair for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisPrompt {
    pub system: String,
    pub user: String,
}

// ============ Simple mode ============

/// One association group from simple analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisGroup {
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub label: String,
    #[serde(rename = "fragmentIds", default, deserialize_with = "lenient::nullable")]
    pub fragment_ids: Vec<String>,
}

/// Simple-mode result: association groups and creative suggestions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub groups: Vec<AnalysisGroup>,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub suggestions: Vec<String>,
}

// ============ Relation mode ============

/// Pairwise relation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationType {
    Similar,
    Contrast,
    Sequence,
    Causal,
    Thematic,
    Emotional,
    Reference,
    #[default]
    #[serde(other)]
    Unknown,
}

impl RelationType {
    pub const ALL: [RelationType; 7] = [
        RelationType::Similar,
        RelationType::Contrast,
        RelationType::Sequence,
        RelationType::Causal,
        RelationType::Thematic,
        RelationType::Emotional,
        RelationType::Reference,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RelationType::Similar => "similar",
            RelationType::Contrast => "contrast",
            RelationType::Sequence => "sequence",
            RelationType::Causal => "causal",
            RelationType::Thematic => "thematic",
            RelationType::Emotional => "emotional",
            RelationType::Reference => "reference",
            RelationType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(RelationType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .unwrap_or(RelationType::Unknown))
    }
}

/// A typed, weighted link between two fragments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub source_fragment_id: String,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub target_fragment_id: String,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub relation_type: RelationType,
    #[serde(default, deserialize_with = "lenient::float")]
    pub strength: f64,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient::float")]
    pub ai_confidence: f64,
}

/// A named cluster of fragments with descriptive metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmartGroup {
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub fragment_ids: Vec<String>,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub color: String,
    #[serde(default, deserialize_with = "lenient::float")]
    pub confidence: f64,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub key_themes: Vec<String>,
}

/// Position of a fragment within a classic narrative arc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NarrativeRole {
    Setup,
    Inciting,
    Rising,
    Climax,
    Falling,
    Resolution,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Neighbouring fragments of a timeline event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimelineConnections {
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub before: Vec<String>,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub after: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub fragment_id: String,
    #[serde(default, deserialize_with = "lenient::int")]
    pub position: i64,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub narrative_role: NarrativeRole,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub connections: TimelineConnections,
}

/// A logical break between two consecutive events, with a fill suggestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimelineGap {
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub after_fragment_id: String,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub before_fragment_id: String,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub suggestion: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub events: Vec<TimelineEvent>,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub gaps: Vec<TimelineGap>,
}

/// Importance tier of a theme cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeLevel {
    Primary,
    Secondary,
    Tertiary,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThemeCluster {
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub level: ThemeLevel,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub keywords: Vec<String>,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub fragment_ids: Vec<String>,
    #[serde(default, deserialize_with = "lenient::int")]
    pub heat_score: i64,
}

/// A recommended relation the user may accept or reject.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationSuggestion {
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub source_fragment_id: String,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub target_fragment_id: String,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub source_preview: String,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub target_preview: String,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub relation_type: RelationType,
    #[serde(default, deserialize_with = "lenient::float")]
    pub confidence: f64,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub reason: String,
}

/// Deep-mode result. A superset of the simple shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationAnalysisResult {
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub relations: Vec<Relation>,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub groups: Vec<SmartGroup>,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub timeline: Timeline,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub themes: Vec<ThemeCluster>,
    #[serde(default, deserialize_with = "lenient::nullable")]
    pub suggestions: Vec<RelationSuggestion>,
}

impl RelationAnalysisResult {
    /// Converts the suggestions into the shape persisted as pending records.
    pub fn new_suggestions(&self) -> Vec<NewSuggestion> {
        self.suggestions
            .iter()
            .map(|s| NewSuggestion {
                source_fragment_id: s.source_fragment_id.clone(),
                target_fragment_id: s.target_fragment_id.clone(),
                relation_type: s.relation_type,
                confidence: s.confidence,
                reason: s.reason.clone(),
            })
            .collect()
    }
}

// ============ History ============

/// Input for a write-once analysis history record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewHistoryRecord {
    pub fragment_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_fragment_id: Option<String>,
    pub result: serde_json::Value,
    #[serde(default)]
    pub raw_text: Option<String>,
}

/// A stored analysis run. No update operation exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub fragment_ids: Vec<String>,
    pub target_fragment_id: Option<String>,
    pub result: serde_json::Value,
    pub raw_text: Option<String>,
    pub created_at: String,
}

// ============ Suggestions & relations ============

/// Lifecycle of a stored relation suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionStatus {
    Pending,
    Accepted,
    Rejected,
}

impl SuggestionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SuggestionStatus::Pending => "pending",
            SuggestionStatus::Accepted => "accepted",
            SuggestionStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for SuggestionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "pending" => Ok(SuggestionStatus::Pending),
            "accepted" => Ok(SuggestionStatus::Accepted),
            "rejected" => Ok(SuggestionStatus::Rejected),
            other => anyhow::bail!("unknown suggestion status: {}", other),
        }
    }
}

/// A suggestion as submitted for storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSuggestion {
    pub source_fragment_id: String,
    pub target_fragment_id: String,
    #[serde(default)]
    pub relation_type: RelationType,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reason: String,
}

/// A stored suggestion with previews derived from the fragment contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSuggestion {
    pub id: String,
    pub source_fragment_id: String,
    pub target_fragment_id: String,
    pub source_preview: String,
    pub target_preview: String,
    pub relation_type: RelationType,
    pub confidence: f64,
    pub reason: String,
    pub status: SuggestionStatus,
}

/// Input for a user-created relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRelation {
    pub source_fragment_id: String,
    pub target_fragment_id: String,
    pub relation_type: RelationType,
    #[serde(default)]
    pub strength: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A confirmed relation between two fragments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentRelation {
    pub id: String,
    pub source_fragment_id: String,
    pub target_fragment_id: String,
    pub relation_type: RelationType,
    pub strength: f64,
    pub description: Option<String>,
    pub ai_generated: bool,
    pub created_at: String,
}

/// First [`PREVIEW_CHARS`] characters of `content` followed by `"..."`.
pub fn preview(content: &str) -> String {
    let mut out: String = content.chars().take(PREVIEW_CHARS).collect();
    out.push_str("...");
    out
}

/// Field deserializers for result shapes. Model output often writes `null`
/// for empty sections and floats or quoted numbers for integer fields.
mod lenient {
    use serde::de::{Deserialize, Deserializer, Error};
    use serde_json::Value;

    /// `null` reads as the default value.
    pub fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + Default,
    {
        Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
    }

    fn number(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Numbers, numeric strings and `null`.
    pub fn float<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(0.0),
            other => number(&other)
                .ok_or_else(|| D::Error::custom(format!("expected a number, got {other}"))),
        }
    }

    /// Integers, floats rounded to the nearest integer, numeric strings and `null`.
    pub fn int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(0),
            Value::Number(n) if n.is_i64() => Ok(n.as_i64().unwrap_or_default()),
            other => number(&other)
                .map(|f| f.round() as i64)
                .ok_or_else(|| D::Error::custom(format!("expected an integer, got {other}"))),
        }
    }
}
