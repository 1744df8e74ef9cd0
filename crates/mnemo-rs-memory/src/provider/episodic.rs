//! In-process episodic memory backend.
//!
//! Records live in per-user arenas keyed by id. Secondary indices (summary by
//! session, events by type) are maintained on every write so lookups do not
//! scan the arena.

use super::{EpisodicMemory, Lifecycle, Provider, logged};
use crate::error::MemoryError;
use crate::health::HealthStatus;
use crate::model::{
    ConversationSummary, DEFAULT_PAGE_LIMIT, EmotionTrend, EmotionalRecord, EpisodeHit,
    EpisodeKind, EpisodeSearchOptions, HistoryOptions, KeyEvent, KeyEventQuery, KeyEventUpdate,
    Message, NewKeyEvent, TimelineEntry, clamp_unit, in_window,
};
use crate::text::{
    estimate_tokens, extract_decisions, extract_keywords, term_overlap_score, truncate_chars,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use mnemo_rs_config::MemoryDomain;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use uuid::Uuid;

/// Number of keywords kept as summary topics.
const KEY_TOPIC_COUNT: usize = 5;
/// Leading characters quoted from the first and last message.
const SUMMARY_SNIPPET_CHARS: usize = 100;
/// Maximum decisions extracted per summary.
const MAX_DECISIONS: usize = 5;
/// Default minimum overlap score for episode search.
const DEFAULT_MIN_SCORE: f32 = 0.1;
/// Fixed timeline importance for summaries.
const SUMMARY_TIMELINE_IMPORTANCE: f32 = 0.5;

#[derive(Debug, Default)]
struct UserEpisodes {
    conversations: HashMap<String, Vec<Message>>,
    summaries: HashMap<Uuid, ConversationSummary>,
    summary_by_session: HashMap<String, Uuid>,
    events: HashMap<Uuid, KeyEvent>,
    events_by_type: HashMap<String, HashSet<Uuid>>,
    emotions: HashMap<String, EmotionalRecord>,
}

impl UserEpisodes {
    fn index_event(&mut self, event: &KeyEvent) {
        self.events_by_type
            .entry(event.event_type.clone())
            .or_default()
            .insert(event.id);
    }

    fn unindex_event(&mut self, event_type: &str, id: Uuid) {
        if let Some(ids) = self.events_by_type.get_mut(event_type) {
            ids.remove(&id);
            if ids.is_empty() {
                self.events_by_type.remove(event_type);
            }
        }
    }

    fn remove_summary_for(&mut self, session_id: &str) -> bool {
        match self.summary_by_session.remove(session_id) {
            Some(id) => self.summaries.remove(&id).is_some(),
            None => false,
        }
    }
}

/// Episodic memory held in process memory.
#[derive(Debug)]
pub struct InMemoryEpisodicMemory {
    lifecycle: Lifecycle,
    users: RwLock<HashMap<String, UserEpisodes>>,
}

impl Default for InMemoryEpisodicMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEpisodicMemory {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::new(MemoryDomain::Episodic),
            users: RwLock::new(HashMap::new()),
        }
    }

    fn read_user<T>(
        &self,
        user_id: &str,
        f: impl FnOnce(&UserEpisodes) -> T,
    ) -> Result<T, MemoryError> {
        self.lifecycle.ensure_ready()?;
        let users = self.users.read();
        let empty = UserEpisodes::default();
        Ok(f(users.get(user_id).unwrap_or(&empty)))
    }

    fn write_user<T>(
        &self,
        user_id: &str,
        f: impl FnOnce(&mut UserEpisodes) -> T,
    ) -> Result<T, MemoryError> {
        self.lifecycle.ensure_ready()?;
        let mut users = self.users.write();
        Ok(f(users.entry(user_id.to_string()).or_default()))
    }
}

/// Build a summary from a session's messages.
fn build_summary(session_id: &str, messages: &[Message]) -> ConversationSummary {
    let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
    let key_topics = extract_keywords(contents.iter().copied(), KEY_TOPIC_COUNT);
    let decisions = extract_decisions(contents.iter().copied(), MAX_DECISIONS, SUMMARY_SNIPPET_CHARS);
    let token_count = contents.iter().map(|content| estimate_tokens(content)).sum();
    let summary = match (messages.first(), messages.last()) {
        (Some(first), Some(last)) if messages.len() > 1 => format!(
            "Conversation started with {}: \"{}\". It ended with {}: \"{}\".",
            first.role,
            truncate_chars(first.content.trim(), SUMMARY_SNIPPET_CHARS),
            last.role,
            truncate_chars(last.content.trim(), SUMMARY_SNIPPET_CHARS),
        ),
        (Some(first), _) => format!(
            "Conversation of a single message from {}: \"{}\".",
            first.role,
            truncate_chars(first.content.trim(), SUMMARY_SNIPPET_CHARS),
        ),
        _ => String::new(),
    };
    let timestamp = messages
        .iter()
        .map(|message| message.timestamp)
        .max()
        .unwrap_or_else(Utc::now);
    ConversationSummary {
        id: Uuid::new_v4(),
        session_id: session_id.to_string(),
        summary,
        key_topics,
        decisions,
        message_count: messages.len(),
        token_count,
        timestamp,
    }
}

/// Apply offset/limit pagination.
fn paginate<T>(items: Vec<T>, offset: usize, limit: Option<usize>) -> Vec<T> {
    items
        .into_iter()
        .skip(offset)
        .take(limit.unwrap_or(DEFAULT_PAGE_LIMIT))
        .collect()
}

#[async_trait]
impl Provider for InMemoryEpisodicMemory {
    fn name(&self) -> &str {
        "memory"
    }

    async fn initialize(&self) -> Result<(), MemoryError> {
        if self.lifecycle.should_initialize()? {
            self.lifecycle.mark_ready();
            info!("initialized episodic memory (backend=memory)");
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), MemoryError> {
        if self.lifecycle.mark_shutdown() {
            self.users.write().clear();
            info!("episodic memory shutdown");
        }
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        let started = Instant::now();
        let users = self.users.read();
        let summaries: usize = users.values().map(|user| user.summaries.len()).sum();
        let events: usize = users.values().map(|user| user.events.len()).sum();
        self.lifecycle.health(
            started,
            serde_json::json!({
                "users": users.len(),
                "summaries": summaries,
                "events": events,
            }),
        )
    }
}

#[async_trait]
impl EpisodicMemory for InMemoryEpisodicMemory {
    async fn add_conversation(
        &self,
        user_id: &str,
        session_id: &str,
        messages: Vec<Message>,
    ) -> Result<(), MemoryError> {
        let count = messages.len();
        self.write_user(user_id, |user| {
            user.conversations.insert(session_id.to_string(), messages);
        })?;
        debug!(
            "stored conversation (user_id={}, session_id={}, messages={})",
            user_id, session_id, count
        );
        Ok(())
    }

    async fn get_conversation(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Vec<Message>>, MemoryError> {
        self.read_user(user_id, |user| user.conversations.get(session_id).cloned())
    }

    async fn delete_conversation(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<bool, MemoryError> {
        let removed = self.write_user(user_id, |user| {
            let had_messages = user.conversations.remove(session_id).is_some();
            let had_summary = user.remove_summary_for(session_id);
            had_messages || had_summary
        })?;
        debug!(
            "deleted conversation (user_id={}, session_id={}, existed={})",
            user_id, session_id, removed
        );
        Ok(removed)
    }

    async fn summarize_conversation(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<ConversationSummary, MemoryError> {
        let result = self.write_user(user_id, |user| {
            if let Some(existing) = user
                .summary_by_session
                .get(session_id)
                .and_then(|id| user.summaries.get(id))
            {
                return Ok(existing.clone());
            }
            let Some(messages) = user
                .conversations
                .get(session_id)
                .filter(|messages| !messages.is_empty())
            else {
                return Err(MemoryError::ConversationNotFound {
                    user_id: user_id.to_string(),
                    session_id: session_id.to_string(),
                });
            };
            let summary = build_summary(session_id, messages);
            user.summary_by_session
                .insert(session_id.to_string(), summary.id);
            user.summaries.insert(summary.id, summary.clone());
            debug!(
                "summarized conversation (user_id={}, session_id={}, messages={}, tokens={})",
                user_id, session_id, summary.message_count, summary.token_count
            );
            Ok(summary)
        })?;
        logged(MemoryDomain::Episodic, "summarize_conversation", user_id, result)
    }

    async fn get_conversation_history(
        &self,
        user_id: &str,
        options: HistoryOptions,
    ) -> Result<Vec<ConversationSummary>, MemoryError> {
        let topics: HashSet<String> = options.topics.iter().map(|t| t.to_lowercase()).collect();
        let mut summaries = self.read_user(user_id, |user| {
            user.summaries
                .values()
                .filter(|summary| in_window(summary.timestamp, options.start_date, options.end_date))
                .filter(|summary| {
                    topics.is_empty()
                        || summary
                            .key_topics
                            .iter()
                            .any(|topic| topics.contains(&topic.to_lowercase()))
                })
                .cloned()
                .collect::<Vec<_>>()
        })?;
        summaries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(paginate(summaries, options.offset, options.limit))
    }

    async fn add_key_event(&self, user_id: &str, event: NewKeyEvent) -> Result<Uuid, MemoryError> {
        let event = KeyEvent {
            id: Uuid::new_v4(),
            event_type: event.event_type,
            description: event.description,
            context: event.context,
            importance: clamp_unit(event.importance),
            timestamp: event.timestamp.unwrap_or_else(Utc::now),
        };
        let id = event.id;
        self.write_user(user_id, |user| {
            user.index_event(&event);
            user.events.insert(id, event);
        })?;
        debug!("added key event (user_id={}, event_id={})", user_id, id);
        Ok(id)
    }

    async fn update_key_event(
        &self,
        user_id: &str,
        event_id: Uuid,
        update: KeyEventUpdate,
    ) -> Result<KeyEvent, MemoryError> {
        let result = self.write_user(user_id, |user| {
            let Some(mut event) = user.events.remove(&event_id) else {
                return Err(MemoryError::EventNotFound(event_id));
            };
            user.unindex_event(&event.event_type, event_id);
            if let Some(event_type) = update.event_type {
                event.event_type = event_type;
            }
            if let Some(description) = update.description {
                event.description = description;
            }
            if let Some(context) = update.context {
                event.context = context;
            }
            if let Some(importance) = update.importance {
                event.importance = clamp_unit(importance);
            }
            if let Some(timestamp) = update.timestamp {
                event.timestamp = timestamp;
            }
            user.index_event(&event);
            user.events.insert(event_id, event.clone());
            Ok(event)
        })?;
        logged(MemoryDomain::Episodic, "update_key_event", user_id, result)
    }

    async fn delete_key_event(&self, user_id: &str, event_id: Uuid) -> Result<(), MemoryError> {
        let result = self.write_user(user_id, |user| {
            let Some(event) = user.events.remove(&event_id) else {
                return Err(MemoryError::EventNotFound(event_id));
            };
            user.unindex_event(&event.event_type, event_id);
            Ok(())
        })?;
        logged(MemoryDomain::Episodic, "delete_key_event", user_id, result)
    }

    async fn get_key_events(
        &self,
        user_id: &str,
        query: KeyEventQuery,
    ) -> Result<Vec<KeyEvent>, MemoryError> {
        let mut events = self.read_user(user_id, |user| {
            let candidates: Vec<&KeyEvent> = if query.types.is_empty() {
                user.events.values().collect()
            } else {
                query
                    .types
                    .iter()
                    .collect::<HashSet<_>>()
                    .into_iter()
                    .filter_map(|event_type| user.events_by_type.get(event_type))
                    .flatten()
                    .filter_map(|id| user.events.get(id))
                    .collect()
            };
            candidates
                .into_iter()
                .filter(|event| in_window(event.timestamp, query.start_date, query.end_date))
                .filter(|event| {
                    query
                        .min_importance
                        .is_none_or(|min| event.importance >= min)
                })
                .cloned()
                .collect::<Vec<_>>()
        })?;
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(paginate(events, query.offset, query.limit))
    }

    async fn search_episodes(
        &self,
        user_id: &str,
        query: &str,
        options: EpisodeSearchOptions,
    ) -> Result<Vec<EpisodeHit>, MemoryError> {
        let min_score = options.min_score.unwrap_or(DEFAULT_MIN_SCORE);
        let window = |timestamp| in_window(timestamp, options.start_date, options.end_date);
        let mut hits = self.read_user(user_id, |user| {
            let summary_hits = user.summaries.values().filter_map(|summary| {
                let target = format!("{} {}", summary.summary, summary.key_topics.join(" "));
                let score = term_overlap_score(query, &target);
                (score >= min_score && window(summary.timestamp)).then(|| EpisodeHit {
                    kind: EpisodeKind::Summary,
                    id: summary.id,
                    content: summary.summary.clone(),
                    score,
                    timestamp: summary.timestamp,
                })
            });
            let event_hits = user.events.values().filter_map(|event| {
                let context = match &event.context {
                    serde_json::Value::Null => String::new(),
                    serde_json::Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                let target = format!("{} {} {}", event.event_type, event.description, context);
                let score = term_overlap_score(query, &target);
                (score >= min_score && window(event.timestamp)).then(|| EpisodeHit {
                    kind: EpisodeKind::Event,
                    id: event.id,
                    content: event.description.clone(),
                    score,
                    timestamp: event.timestamp,
                })
            });
            summary_hits.chain(event_hits).collect::<Vec<_>>()
        })?;
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(b.timestamp.cmp(&a.timestamp))
        });
        hits.truncate(options.limit.unwrap_or(DEFAULT_PAGE_LIMIT));
        debug!(
            "episode search (user_id={}, terms={}, hits={})",
            user_id,
            query.split_whitespace().count(),
            hits.len()
        );
        Ok(hits)
    }

    async fn get_timeline(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimelineEntry>, MemoryError> {
        let mut entries = self.read_user(user_id, |user| {
            let summaries = user
                .summaries
                .values()
                .filter(|summary| in_window(summary.timestamp, Some(start), Some(end)))
                .map(|summary| TimelineEntry {
                    kind: EpisodeKind::Summary,
                    id: summary.id,
                    description: summary.summary.clone(),
                    importance: SUMMARY_TIMELINE_IMPORTANCE,
                    timestamp: summary.timestamp,
                });
            let events = user
                .events
                .values()
                .filter(|event| in_window(event.timestamp, Some(start), Some(end)))
                .map(|event| TimelineEntry {
                    kind: EpisodeKind::Event,
                    id: event.id,
                    description: event.description.clone(),
                    importance: event.importance,
                    timestamp: event.timestamp,
                });
            summaries.chain(events).collect::<Vec<_>>()
        })?;
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }

    async fn record_emotion(
        &self,
        user_id: &str,
        record: EmotionalRecord,
    ) -> Result<(), MemoryError> {
        debug!(
            "recorded emotion (user_id={}, session_id={}, sentiment={:?})",
            user_id, record.session_id, record.sentiment
        );
        self.write_user(user_id, |user| {
            user.emotions.insert(record.session_id.clone(), record);
        })
    }

    async fn get_emotion(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<EmotionalRecord>, MemoryError> {
        self.read_user(user_id, |user| user.emotions.get(session_id).cloned())
    }

    async fn get_emotion_trend(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<EmotionTrend, MemoryError> {
        let mut records = self.read_user(user_id, |user| {
            user.emotions
                .values()
                .filter(|record| in_window(record.timestamp, Some(start), Some(end)))
                .cloned()
                .collect::<Vec<_>>()
        })?;
        if records.is_empty() {
            return Ok(EmotionTrend::default());
        }
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let total: f32 = records.iter().map(|record| record.sentiment.score()).sum();
        Ok(EmotionTrend {
            average_sentiment: total / records.len() as f32,
            satisfaction: records.iter().map(|record| record.satisfaction).collect(),
            frustration: records.iter().map(|record| record.frustration).collect(),
            timestamps: records.iter().map(|record| record.timestamp).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{InMemoryEpisodicMemory, build_summary};
    use crate::model::{KeyEventQuery, Message, NewKeyEvent};
    use crate::provider::{EpisodicMemory, Provider};
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;

    #[test]
    fn summary_quotes_first_and_last_message() {
        let messages = vec![
            Message::new("user", "How do I rotate the database credentials?"),
            Message::new("assistant", "Use the vault CLI and restart the app."),
        ];
        let summary = build_summary("s1", &messages);
        assert!(summary.summary.contains("rotate the database credentials"));
        assert!(summary.summary.contains("restart the app"));
        assert_eq!(summary.message_count, 2);
        assert!(summary.token_count > 0);
    }

    #[test]
    fn single_message_summary_is_one_sentence() {
        let summary = build_summary("s1", &[Message::new("user", "ping")]);
        assert_eq!(
            summary.summary,
            "Conversation of a single message from user: \"ping\"."
        );
    }

    #[tokio::test]
    async fn event_type_index_follows_updates() {
        let provider = InMemoryEpisodicMemory::new();
        provider.initialize().await.expect("init");
        let id = provider
            .add_key_event("u1", NewKeyEvent::new("issue", "login broken", 0.4))
            .await
            .expect("add");
        provider
            .update_key_event(
                "u1",
                id,
                crate::model::KeyEventUpdate {
                    event_type: Some("milestone".to_string()),
                    ..Default::default()
                },
            )
            .await
            .expect("update");

        let issues = provider
            .get_key_events(
                "u1",
                KeyEventQuery {
                    types: vec!["issue".to_string()],
                    ..KeyEventQuery::default()
                },
            )
            .await
            .expect("query");
        assert!(issues.is_empty());
        let milestones = provider
            .get_key_events(
                "u1",
                KeyEventQuery {
                    types: vec!["milestone".to_string()],
                    ..KeyEventQuery::default()
                },
            )
            .await
            .expect("query");
        assert_eq!(milestones.len(), 1);
        assert_eq!(milestones[0].id, id);
    }

    #[tokio::test]
    async fn timeline_is_newest_first() {
        let provider = InMemoryEpisodicMemory::new();
        provider.initialize().await.expect("init");
        let now = Utc::now();
        let mut older = NewKeyEvent::new("note", "older", 0.2);
        older.timestamp = Some(now - Duration::hours(2));
        let mut newer = NewKeyEvent::new("note", "newer", 0.8);
        newer.timestamp = Some(now - Duration::hours(1));
        provider.add_key_event("u1", older).await.expect("add");
        provider.add_key_event("u1", newer).await.expect("add");

        let timeline = provider
            .get_timeline("u1", now - Duration::days(1), now)
            .await
            .expect("timeline");
        let descriptions: Vec<_> = timeline.iter().map(|e| e.description.as_str()).collect();
        assert_eq!(descriptions, vec!["newer", "older"]);
    }
}
