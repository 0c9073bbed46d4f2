// src/engine/similarity.rs

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::error::EngineError;
use crate::models::similarity::{ContentKind, DuplicateCheck, SimilarityRecord};
use crate::store::SimilarityStore;
use crate::utils::vector::cosine_similarity;

/// Bounded per-(user, content kind) embedding history with a cosine
/// duplicate test.
///
/// Exact text matching fails against paraphrased model output, so the test
/// is approximate: any stored vector at or above the threshold marks the
/// candidate a duplicate. The history is capped with FIFO eviction; recent
/// items are the behaviorally relevant ones and an unbounded history would
/// make the linear scan degrade forever.
pub struct SimilarityCache {
    store: Arc<dyn SimilarityStore>,
    config: Config,
}

impl SimilarityCache {
    pub fn new(store: Arc<dyn SimilarityStore>, config: Config) -> Self {
        Self { store, config }
    }

    /// Stored vectors for the exact (user, week, kind) key.
    pub async fn vectors(
        &self,
        user_id: i64,
        week: i32,
        kind: ContentKind,
    ) -> Result<Vec<Vec<f32>>, EngineError> {
        self.store.vectors(user_id, week, kind).await
    }

    /// Cross-week fallback: the most recent vectors for the user, bounded
    /// for cost control.
    pub async fn recent_vectors(
        &self,
        user_id: i64,
        kind: ContentKind,
        limit: usize,
    ) -> Result<Vec<Vec<f32>>, EngineError> {
        self.store.recent_vectors(user_id, kind, limit).await
    }

    /// Compares `candidate` against the week-scoped history, falling back
    /// to the recent cross-week history when the week set is empty. Scores
    /// are returned for the generation audit log.
    pub async fn is_duplicate(
        &self,
        candidate: &[f32],
        user_id: i64,
        week: i32,
        kind: ContentKind,
        threshold: f32,
    ) -> Result<DuplicateCheck, EngineError> {
        let mut history = self.vectors(user_id, week, kind).await?;
        if history.is_empty() {
            history = self
                .recent_vectors(user_id, kind, self.config.recent_fallback_limit)
                .await?;
        }

        let scores: Vec<f32> = history
            .iter()
            .map(|stored| cosine_similarity(candidate, stored))
            .collect();
        let duplicate = scores.iter().any(|&s| s >= threshold);
        Ok(DuplicateCheck { duplicate, scores })
    }

    /// Records an accepted item, then synchronously trims the (user, kind)
    /// partition back down to the retention bound.
    pub async fn add(
        &self,
        user_id: i64,
        week: i32,
        kind: ContentKind,
        text_hash: &str,
        embedding: Vec<f32>,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let record = SimilarityRecord {
            user_id,
            week,
            content_kind: kind,
            text_hash: text_hash.to_string(),
            embedding,
            created_at: now,
        };
        self.store.insert(&record).await?;

        let evicted = self
            .store
            .evict_oldest(user_id, kind, self.config.keep_recent)
            .await?;
        if evicted > 0 {
            tracing::debug!(
                "Evicted {} old similarity records for user {} ({})",
                evicted,
                user_id,
                kind.as_str()
            );
        }
        Ok(())
    }

    /// Direct eviction entry point, mainly for operator tooling.
    pub async fn evict_oldest(
        &self,
        user_id: i64,
        kind: ContentKind,
        keep_recent: usize,
    ) -> Result<u64, EngineError> {
        self.store.evict_oldest(user_id, kind, keep_recent).await
    }
}
