//! End-of-session scoring, the saved record, and dashboard statistics.

use crate::model::{InterviewSetup, Turn};
use crate::oracle::{FeedbackOracle, InterviewScore};
use crate::session::SessionOutcome;
use crate::store::{NewSessionRecord, SessionRecord, SessionStore, StoreError};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

pub const SCORE_UNAVAILABLE_SUMMARY: &str =
    "We could not score this interview right now. Your transcript has been kept.";

const RECENT_LIMIT: usize = 5;

/// Scores the transcript, or returns a zero score with a notice when the
/// oracle fails.
pub async fn score_or_placeholder(
    oracle: &dyn FeedbackOracle,
    setup: &InterviewSetup,
    turns: &[Turn],
) -> InterviewScore {
    match oracle
        .score(&setup.role, setup.difficulty.as_str(), turns)
        .await
    {
        Ok(score) => score,
        Err(e) => {
            tracing::error!("Scoring failed: {:#}", e);
            InterviewScore {
                score: 0,
                summary: SCORE_UNAVAILABLE_SUMMARY.to_string(),
            }
        }
    }
}

/// Whole minutes, rounded, never below one.
pub fn elapsed_minutes(elapsed: Duration) -> u32 {
    let minutes = (elapsed.as_secs() + 30) / 60;
    minutes.clamp(1, u32::MAX as u64) as u32
}

/// A scored interview waiting to be saved. Stays in memory until a save
/// succeeds, so a failed save can simply be retried.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub setup: InterviewSetup,
    pub turns: Vec<Turn>,
    pub score: InterviewScore,
    pub duration_minutes: u32,
    pub date: DateTime<Utc>,
    saved_id: Option<String>,
}

impl SessionReport {
    pub fn new(setup: InterviewSetup, turns: Vec<Turn>, score: InterviewScore, elapsed: Duration) -> Self {
        Self {
            setup,
            turns,
            score,
            duration_minutes: elapsed_minutes(elapsed),
            date: Utc::now(),
            saved_id: None,
        }
    }

    /// `None` when the session never started.
    pub async fn from_outcome(outcome: &SessionOutcome, oracle: &dyn FeedbackOracle) -> Option<Self> {
        let setup = outcome.plan.as_ref()?.setup().clone();
        let score = score_or_placeholder(oracle, &setup, &outcome.turns).await;
        Some(Self::new(setup, outcome.turns.clone(), score, outcome.elapsed))
    }

    pub fn to_record(&self, user_id: &str) -> NewSessionRecord {
        NewSessionRecord {
            user_id: user_id.to_string(),
            role: self.setup.role.clone(),
            difficulty: self.setup.difficulty,
            date: self.date,
            duration_minutes: self.duration_minutes,
            score: self.score.score,
            summary: self.score.summary.clone(),
            turns: self.turns.clone(),
        }
    }

    /// Saves once. Calling again after a success returns the same id without
    /// writing a duplicate.
    pub async fn save(&mut self, store: &dyn SessionStore, user_id: &str) -> Result<String, StoreError> {
        if let Some(id) = &self.saved_id {
            return Ok(id.clone());
        }
        let id = store.save(self.to_record(user_id)).await?;
        self.saved_id = Some(id.clone());
        Ok(id)
    }

    pub fn saved_id(&self) -> Option<&str> {
        self.saved_id.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DashboardStats {
    pub total_interviews: usize,
    pub average_score: u32,
    pub average_duration_minutes: u32,
    pub role_counts: BTreeMap<String, usize>,
    pub most_frequent_role: Option<String>,
    /// Ids of the newest records.
    pub recent: Vec<String>,
}

impl DashboardStats {
    /// `records` must be newest first, as returned by [`SessionStore::list`].
    pub fn from_records(records: &[SessionRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }
        let total = records.len();
        let average = |sum: u64| (sum as f64 / total as f64).round() as u32;

        let mut role_counts = BTreeMap::new();
        for record in records {
            *role_counts.entry(record.role.clone()).or_insert(0) += 1;
        }
        // Ties go to the alphabetically first role.
        let most_frequent_role = role_counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(role, _)| role.clone());

        Self {
            total_interviews: total,
            average_score: average(records.iter().map(|r| r.score as u64).sum()),
            average_duration_minutes: average(records.iter().map(|r| r.duration_minutes as u64).sum()),
            role_counts,
            most_frequent_role,
            recent: records.iter().take(RECENT_LIMIT).map(|r| r.id.clone()).collect(),
        }
    }
}
