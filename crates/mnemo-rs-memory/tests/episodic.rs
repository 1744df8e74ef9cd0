//! Episodic memory scenarios.

use chrono::{DateTime, Duration, Utc};
use mnemo_rs_memory::{
    EmotionTrend, EmotionalRecord, EpisodeKind, EpisodeSearchOptions, EpisodicMemory,
    HistoryOptions, InMemoryEpisodicMemory, KeyEventQuery, KeyEventUpdate, MemoryError, Message,
    NewKeyEvent, Provider, Sentiment,
};
use pretty_assertions::assert_eq;
use uuid::Uuid;

async fn ready() -> InMemoryEpisodicMemory {
    let memory = InMemoryEpisodicMemory::new();
    memory.initialize().await.expect("initialize");
    memory
}

fn conversation() -> Vec<Message> {
    vec![
        Message::new("user", "Planning the database migration for billing"),
        Message::new("assistant", "The billing migration needs a rollback plan"),
        Message::new("user", "We decided to run the migration on Sunday"),
    ]
}

/// Summarizing twice should return the stored summary.
#[tokio::test]
async fn summary_is_computed_once() {
    let memory = ready().await;
    memory
        .add_conversation("u1", "s1", conversation())
        .await
        .expect("add");
    let first = memory.summarize_conversation("u1", "s1").await.expect("summary");
    let second = memory.summarize_conversation("u1", "s1").await.expect("summary");
    assert_eq!(first, second);
    assert_eq!(first.message_count, 3);
    assert!(!first.key_topics.is_empty());
    assert!(first.key_topics.iter().any(|topic| topic == "migration"));
    assert!(!first.decisions.is_empty());
}

/// Summarizing an unknown session is an error.
#[tokio::test]
async fn unknown_session_cannot_be_summarized() {
    let memory = ready().await;
    let err = memory
        .summarize_conversation("u1", "missing")
        .await
        .expect_err("missing");
    assert!(matches!(err, MemoryError::ConversationNotFound { .. }));
}

/// Importance floor above every event yields nothing.
#[tokio::test]
async fn importance_floor_filters_events() {
    let memory = ready().await;
    memory
        .add_key_event("u1", NewKeyEvent::new("milestone", "shipped v1", 0.5))
        .await
        .expect("event");
    memory
        .add_key_event("u1", NewKeyEvent::new("milestone", "shipped v2", 0.9))
        .await
        .expect("event");
    let query = KeyEventQuery {
        min_importance: Some(0.95),
        ..KeyEventQuery::default()
    };
    assert!(memory.get_key_events("u1", query).await.expect("events").is_empty());
    let all = memory
        .get_key_events("u1", KeyEventQuery::default())
        .await
        .expect("events");
    assert_eq!(all.len(), 2);
}

/// Deleting a conversation keeps key events searchable.
#[tokio::test]
async fn deleting_conversation_keeps_events() {
    let memory = ready().await;
    memory
        .add_conversation("u1", "s1", conversation())
        .await
        .expect("add");
    memory.summarize_conversation("u1", "s1").await.expect("summary");
    memory
        .add_key_event("u1", NewKeyEvent::new("decision", "billing migration on Sunday", 0.8))
        .await
        .expect("event");
    assert!(memory.delete_conversation("u1", "s1").await.expect("delete"));
    assert_eq!(memory.get_conversation("u1", "s1").await.expect("get"), None);

    let hits = memory
        .search_episodes("u1", "billing migration", EpisodeSearchOptions::default())
        .await
        .expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].content, "billing migration on Sunday");
}

/// A window with no emotion records gives an empty trend.
#[tokio::test]
async fn empty_emotion_trend() {
    let memory = ready().await;
    let now = Utc::now();
    memory
        .record_emotion(
            "u1",
            EmotionalRecord {
                session_id: "s1".to_string(),
                sentiment: Sentiment::Positive,
                satisfaction: 0.9,
                frustration: 0.1,
                timestamp: now - Duration::days(10),
            },
        )
        .await
        .expect("record");
    let trend = memory
        .get_emotion_trend("u1", now - Duration::days(1), now)
        .await
        .expect("trend");
    assert_eq!(trend, EmotionTrend::default());
}

/// Users never see each other's episodes.
#[tokio::test]
async fn episodes_are_isolated_per_user() {
    let memory = ready().await;
    memory
        .add_key_event("u1", NewKeyEvent::new("note", "secret project kickoff", 0.7))
        .await
        .expect("event");
    let hits = memory
        .search_episodes("u2", "secret project kickoff", EpisodeSearchOptions::default())
        .await
        .expect("search");
    assert!(hits.is_empty());
}

fn emotion(
    session_id: &str,
    sentiment: Sentiment,
    satisfaction: f32,
    at: DateTime<Utc>,
) -> EmotionalRecord {
    EmotionalRecord {
        session_id: session_id.to_string(),
        sentiment,
        satisfaction,
        frustration: 1.0 - satisfaction,
        timestamp: at,
    }
}

/// An empty message list counts as no conversation.
#[tokio::test]
async fn empty_conversation_cannot_be_summarized() {
    let memory = ready().await;
    memory.add_conversation("u1", "s1", Vec::new()).await.expect("add");
    let err = memory
        .summarize_conversation("u1", "s1")
        .await
        .expect_err("empty");
    assert!(matches!(err, MemoryError::ConversationNotFound { .. }));

    memory
        .add_conversation("u1", "s1", conversation())
        .await
        .expect("add");
    let summary = memory.summarize_conversation("u1", "s1").await.expect("summary");
    assert_eq!(summary.message_count, 3);
}

/// Adding a conversation again replaces its messages.
#[tokio::test]
async fn add_conversation_replaces_messages() {
    let memory = ready().await;
    memory
        .add_conversation("u1", "s1", conversation())
        .await
        .expect("add");
    memory
        .add_conversation("u1", "s1", vec![Message::new("user", "Start over")])
        .await
        .expect("replace");
    let messages = memory
        .get_conversation("u1", "s1")
        .await
        .expect("get")
        .expect("present");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "Start over");
    let summary = memory.summarize_conversation("u1", "s1").await.expect("summary");
    assert_eq!(summary.message_count, 1);
}

/// History pages default to ten summaries, newest first.
#[tokio::test]
async fn history_paginates_with_default_limit() {
    let memory = ready().await;
    for index in 0..12 {
        let session = format!("s{index}");
        memory
            .add_conversation("u1", &session, vec![Message::new("user", "weekly sync notes")])
            .await
            .expect("add");
        memory.summarize_conversation("u1", &session).await.expect("summary");
    }
    let first = memory
        .get_conversation_history("u1", HistoryOptions::default())
        .await
        .expect("history");
    assert_eq!(first.len(), 10);
    assert!(first.windows(2).all(|pair| pair[0].timestamp >= pair[1].timestamp));

    let rest = memory
        .get_conversation_history(
            "u1",
            HistoryOptions {
                offset: 10,
                ..HistoryOptions::default()
            },
        )
        .await
        .expect("history");
    assert_eq!(rest.len(), 2);

    let small = memory
        .get_conversation_history(
            "u1",
            HistoryOptions {
                limit: Some(3),
                offset: 1,
                ..HistoryOptions::default()
            },
        )
        .await
        .expect("history");
    assert_eq!(small.len(), 3);
}

/// Topic filters match case-insensitively and date filters bound the window.
#[tokio::test]
async fn history_filters_by_topic_and_date() {
    let memory = ready().await;
    memory
        .add_conversation(
            "u1",
            "infra",
            vec![Message::new("user", "Kubernetes cluster upgrade tonight")],
        )
        .await
        .expect("add");
    memory
        .add_conversation("u1", "food", vec![Message::new("user", "Pasta recipe with basil")])
        .await
        .expect("add");
    memory.summarize_conversation("u1", "infra").await.expect("summary");
    memory.summarize_conversation("u1", "food").await.expect("summary");

    let by_topic = memory
        .get_conversation_history(
            "u1",
            HistoryOptions {
                topics: vec!["KUBERNETES".to_string()],
                ..HistoryOptions::default()
            },
        )
        .await
        .expect("history");
    assert_eq!(by_topic.len(), 1);
    assert_eq!(by_topic[0].session_id, "infra");

    let future = memory
        .get_conversation_history(
            "u1",
            HistoryOptions {
                start_date: Some(Utc::now() + Duration::hours(1)),
                ..HistoryOptions::default()
            },
        )
        .await
        .expect("history");
    assert!(future.is_empty());

    let past = memory
        .get_conversation_history(
            "u1",
            HistoryOptions {
                end_date: Some(Utc::now() - Duration::hours(1)),
                ..HistoryOptions::default()
            },
        )
        .await
        .expect("history");
    assert!(past.is_empty());

    let window = memory
        .get_conversation_history(
            "u1",
            HistoryOptions {
                start_date: Some(Utc::now() - Duration::hours(1)),
                end_date: Some(Utc::now() + Duration::hours(1)),
                ..HistoryOptions::default()
            },
        )
        .await
        .expect("history");
    assert_eq!(window.len(), 2);
}

/// Updates merge fields and keep the event id.
#[tokio::test]
async fn update_key_event_merges_fields() {
    let memory = ready().await;
    let id = memory
        .add_key_event("u1", NewKeyEvent::new("milestone", "beta launch", 0.6))
        .await
        .expect("event");
    let updated = memory
        .update_key_event(
            "u1",
            id,
            KeyEventUpdate {
                description: Some("public beta launch".to_string()),
                ..KeyEventUpdate::default()
            },
        )
        .await
        .expect("update");
    assert_eq!(updated.id, id);
    assert_eq!(updated.description, "public beta launch");
    assert_eq!(updated.event_type, "milestone");
    assert_eq!(updated.importance, 0.6);

    let retyped = memory
        .update_key_event(
            "u1",
            id,
            KeyEventUpdate {
                event_type: Some("release".to_string()),
                ..KeyEventUpdate::default()
            },
        )
        .await
        .expect("update");
    assert_eq!(retyped.id, id);
    let releases = memory
        .get_key_events(
            "u1",
            KeyEventQuery {
                types: vec!["release".to_string()],
                ..KeyEventQuery::default()
            },
        )
        .await
        .expect("events");
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].id, id);
    let milestones = memory
        .get_key_events(
            "u1",
            KeyEventQuery {
                types: vec!["milestone".to_string()],
                ..KeyEventQuery::default()
            },
        )
        .await
        .expect("events");
    assert!(milestones.is_empty());
}

/// Update and delete of an unknown event both fail with its id.
#[tokio::test]
async fn missing_key_event_is_reported() {
    let memory = ready().await;
    let missing = Uuid::new_v4();
    let err = memory
        .update_key_event("u1", missing, KeyEventUpdate::default())
        .await
        .expect_err("missing");
    assert!(matches!(err, MemoryError::EventNotFound(id) if id == missing));
    let err = memory
        .delete_key_event("u1", missing)
        .await
        .expect_err("missing");
    assert!(matches!(err, MemoryError::EventNotFound(id) if id == missing));

    let id = memory
        .add_key_event("u1", NewKeyEvent::new("note", "one-off", 0.3))
        .await
        .expect("event");
    memory.delete_key_event("u1", id).await.expect("delete");
    let err = memory.delete_key_event("u1", id).await.expect_err("deleted");
    assert!(matches!(err, MemoryError::EventNotFound(_)));
}

/// The timeline merges summaries at fixed importance with events, newest first.
#[tokio::test]
async fn timeline_merges_summaries_and_events() {
    let memory = ready().await;
    let now = Utc::now();
    memory
        .add_conversation("u1", "s1", conversation())
        .await
        .expect("add");
    let summary = memory.summarize_conversation("u1", "s1").await.expect("summary");
    let event_id = memory
        .add_key_event(
            "u1",
            NewKeyEvent {
                timestamp: Some(now - Duration::hours(2)),
                ..NewKeyEvent::new("decision", "chose Sunday", 0.9)
            },
        )
        .await
        .expect("event");
    memory
        .add_key_event(
            "u1",
            NewKeyEvent {
                timestamp: Some(now - Duration::days(5)),
                ..NewKeyEvent::new("note", "outside the window", 0.4)
            },
        )
        .await
        .expect("event");

    let timeline = memory
        .get_timeline("u1", now - Duration::days(1), now + Duration::hours(1))
        .await
        .expect("timeline");
    assert_eq!(timeline.len(), 2);
    assert_eq!(timeline[0].kind, EpisodeKind::Summary);
    assert_eq!(timeline[0].id, summary.id);
    assert_eq!(timeline[0].importance, 0.5);
    assert_eq!(timeline[1].kind, EpisodeKind::Event);
    assert_eq!(timeline[1].id, event_id);
    assert_eq!(timeline[1].importance, 0.9);
}

/// Trends average sentiment and list series oldest first.
#[tokio::test]
async fn emotion_trend_over_records() {
    let memory = ready().await;
    let now = Utc::now();
    let (t1, t2, t3) = (now - Duration::days(3), now - Duration::days(2), now - Duration::days(1));
    for record in [
        emotion("s3", Sentiment::Positive, 0.8, t1),
        emotion("s1", Sentiment::Positive, 0.9, t3),
        emotion("s2", Sentiment::Negative, 0.2, t2),
    ] {
        memory.record_emotion("u1", record).await.expect("record");
    }
    memory
        .record_emotion("u1", emotion("s2", Sentiment::Neutral, 0.5, t2))
        .await
        .expect("overwrite");
    let current = memory
        .get_emotion("u1", "s2")
        .await
        .expect("get")
        .expect("present");
    assert_eq!(current.sentiment, Sentiment::Neutral);

    let trend = memory
        .get_emotion_trend("u1", now - Duration::days(4), now)
        .await
        .expect("trend");
    assert!((trend.average_sentiment - 2.0 / 3.0).abs() < 1e-5);
    assert_eq!(trend.timestamps, vec![t1, t2, t3]);
    assert_eq!(trend.satisfaction, vec![0.8, 0.5, 0.9]);
    assert_eq!(trend.frustration.len(), 3);
}
