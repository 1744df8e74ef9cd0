//! Record models shared by the providers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default page size for history, event and episode queries.
pub const DEFAULT_PAGE_LIMIT: usize = 10;

/// Single conversational message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role or origin for the message.
    pub role: String,
    /// Message content.
    pub content: String,
    /// Creation timestamp.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Message stamped with the current time.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Computed summary of one conversation session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: Uuid,
    pub session_id: String,
    pub summary: String,
    pub key_topics: Vec<String>,
    pub decisions: Vec<String>,
    pub message_count: usize,
    pub token_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Notable event remembered independently of any conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub description: String,
    pub context: serde_json::Value,
    /// Importance in [0, 1].
    pub importance: f32,
    pub timestamp: DateTime<Utc>,
}

/// Input for creating a key event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewKeyEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub description: String,
    #[serde(default)]
    pub context: serde_json::Value,
    pub importance: f32,
    /// Defaults to now.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl NewKeyEvent {
    pub fn new(event_type: impl Into<String>, description: impl Into<String>, importance: f32) -> Self {
        Self {
            event_type: event_type.into(),
            description: description.into(),
            context: serde_json::Value::Null,
            importance,
            timestamp: None,
        }
    }
}

/// Partial update for a key event. The id is never changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct KeyEventUpdate {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub description: Option<String>,
    pub context: Option<serde_json::Value>,
    pub importance: Option<f32>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Coarse sentiment label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    /// Numeric value used for trend averaging.
    pub fn score(self) -> f32 {
        match self {
            Sentiment::Positive => 1.0,
            Sentiment::Neutral => 0.0,
            Sentiment::Negative => -1.0,
        }
    }
}

/// Latest emotional signal for a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmotionalRecord {
    pub session_id: String,
    pub sentiment: Sentiment,
    pub satisfaction: f32,
    pub frustration: f32,
    pub timestamp: DateTime<Utc>,
}

/// Emotion trend over a time window, oldest-first.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmotionTrend {
    pub average_sentiment: f32,
    pub satisfaction: Vec<f32>,
    pub frustration: Vec<f32>,
    pub timestamps: Vec<DateTime<Utc>>,
}

/// Kind of record surfaced by episode search and the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeKind {
    Summary,
    Event,
}

/// Derived timeline row; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineEntry {
    pub kind: EpisodeKind,
    pub id: Uuid,
    pub description: String,
    pub importance: f32,
    pub timestamp: DateTime<Utc>,
}

/// Scored episode search result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpisodeHit {
    pub kind: EpisodeKind,
    pub id: Uuid,
    pub content: String,
    pub score: f32,
    pub timestamp: DateTime<Utc>,
}

/// Filters for conversation history.
#[derive(Debug, Clone, Default)]
pub struct HistoryOptions {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// Case-insensitive; a summary matches when it shares any topic.
    pub topics: Vec<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Filters for key event listing.
#[derive(Debug, Clone, Default)]
pub struct KeyEventQuery {
    pub types: Vec<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub min_importance: Option<f32>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Options for episode search.
#[derive(Debug, Clone, Default)]
pub struct EpisodeSearchOptions {
    /// Defaults to 0.1.
    pub min_score: Option<f32>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Durable per-user attribute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileFact {
    pub key: String,
    pub value: serde_json::Value,
    pub confidence: f32,
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for upserting a profile fact.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProfileFact {
    pub key: String,
    pub value: serde_json::Value,
    /// Defaults to 1.0.
    pub confidence: Option<f32>,
    pub source: Option<String>,
}

impl NewProfileFact {
    pub fn new(key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            confidence: None,
            source: None,
        }
    }
}

/// Metadata for a stored object blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Clamp a score into [0, 1], mapping NaN to 0.
pub(crate) fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Inclusive time window check with open bounds.
pub(crate) fn in_window(
    timestamp: DateTime<Utc>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> bool {
    start.is_none_or(|start| timestamp >= start) && end.is_none_or(|end| timestamp <= end)
}
