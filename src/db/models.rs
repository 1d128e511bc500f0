// Data models — Rust structs that map to database rows.
//
// These are the types that flow through the application. They're separate
// from the database queries so other modules can use them without depending
// on rusqlite directly.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::registry::TopicId;

/// A borderline-similarity candidate parked for external review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingReviewItem {
    pub id: i64,
    pub date: NaiveDate,
    pub label: String,
    pub review_id: String,
    pub nearest_topic_id: TopicId,
    pub similarity: f64,
    pub queued_at: String,
    pub resolved_at: Option<String>,
}

/// A review that exhausted provider retries and was skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnprocessedReview {
    pub date: NaiveDate,
    pub review_id: String,
    pub reason: String,
    pub recorded_at: String,
}
