// src/engine/generation.rs

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::engine::profile::RateLimitedProfile;
use crate::engine::similarity::SimilarityCache;
use crate::error::EngineError;
use crate::models::generation::{GeneratedCandidate, GenerationAttemptLog, GenerationFailure};
use crate::models::profile::Profile;
use crate::models::similarity::ContentKind;
use crate::store::GenerationLogStore;

/// Caller-supplied seam around the external language-model + retrieval
/// collaborator. One call produces one validated candidate (text plus
/// embedding) or a classified failure.
///
/// Cancellation is by dropping the future: the gate performs no cache or
/// profile writes between starting a generator call and deciding on its
/// result, so an abandoned in-flight attempt leaves no partial state.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self) -> Result<GeneratedCandidate, GenerationFailure>;
}

/// Bounded-retry generation with duplicate gating.
///
/// Every attempt is recorded in the audit log before the retry/stop
/// decision, so failures stay diagnosable even when the user only sees a
/// generic "try again later".
pub struct GenerationGate {
    cache: Arc<SimilarityCache>,
    logs: Arc<dyn GenerationLogStore>,
    config: Config,
}

impl GenerationGate {
    pub fn new(cache: Arc<SimilarityCache>, logs: Arc<dyn GenerationLogStore>, config: Config) -> Self {
        Self { cache, logs, config }
    }

    /// Consumes the daily quota matching `kind` (flip quota for
    /// flashcards, quiz quota for quiz content), then generates. Callers
    /// that consume quota elsewhere (e.g. quiz content consumed at session
    /// creation) should call `generate_with_dedup` directly.
    pub async fn generate_with_quota(
        &self,
        limiter: &RateLimitedProfile,
        profile: &mut Profile,
        week: i32,
        kind: ContentKind,
        generator: &dyn Generator,
        now: DateTime<Utc>,
    ) -> Result<GeneratedCandidate, EngineError> {
        match kind {
            ContentKind::Flashcard => limiter.try_consume_flip_quota(profile, now).await?,
            ContentKind::Quiz => limiter.try_consume_quiz_quota(profile, now).await?,
        }
        self.generate_with_dedup(profile.user_id, week, kind, generator, now)
            .await
    }

    /// Calls the generator up to the configured attempt bound, rejecting
    /// near-duplicates against the similarity cache. Returns the first
    /// accepted candidate, or `GenerationExhausted` once the bound is
    /// spent; never returns partial or unvalidated content.
    pub async fn generate_with_dedup(
        &self,
        user_id: i64,
        week: i32,
        kind: ContentKind,
        generator: &dyn Generator,
        now: DateTime<Utc>,
    ) -> Result<GeneratedCandidate, EngineError> {
        let max_attempts = self.config.generation_max_attempts;

        for attempt_number in 1..=max_attempts {
            let mut entry = GenerationAttemptLog {
                user_id,
                content_kind: kind,
                attempt_number,
                week,
                prompt_hash: String::new(),
                parsing_succeeded: false,
                validation_succeeded: false,
                duplicate_detected: false,
                similarity_scores: Vec::new(),
                error_kind: None,
                created_at: now,
            };

            let candidate = match generator.generate().await {
                Ok(candidate) => candidate,
                Err(failure) => {
                    match &failure {
                        GenerationFailure::Parse(msg) => {
                            entry.error_kind = Some(format!("parse: {}", msg));
                        }
                        GenerationFailure::Validation(msg) => {
                            entry.parsing_succeeded = true;
                            entry.error_kind = Some(format!("validation: {}", msg));
                        }
                        GenerationFailure::Dependency(msg) => {
                            entry.error_kind = Some(format!("dependency: {}", msg));
                        }
                    }
                    tracing::debug!(
                        "Generation attempt {}/{} failed for user {}: {:?}",
                        attempt_number,
                        max_attempts,
                        user_id,
                        failure
                    );
                    self.append_audit(&entry).await;
                    continue;
                }
            };

            entry.prompt_hash = candidate.prompt_hash.clone();
            entry.parsing_succeeded = true;
            entry.validation_succeeded = true;

            let check = match self
                .cache
                .is_duplicate(
                    &candidate.embedding,
                    user_id,
                    week,
                    kind,
                    self.config.similarity_threshold,
                )
                .await
            {
                Ok(check) => check,
                Err(e) => {
                    // A broken similarity store must not let unchecked
                    // content through; fail the attempt instead.
                    entry.error_kind = Some(format!("dedup check: {}", e));
                    self.append_audit(&entry).await;
                    continue;
                }
            };
            entry.similarity_scores = check.scores;

            if check.duplicate {
                entry.duplicate_detected = true;
                tracing::debug!(
                    "Duplicate candidate on attempt {}/{} for user {}",
                    attempt_number,
                    max_attempts,
                    user_id
                );
                self.append_audit(&entry).await;
                continue;
            }

            if let Err(e) = self
                .cache
                .add(
                    user_id,
                    week,
                    kind,
                    &candidate.text_hash(),
                    candidate.embedding.clone(),
                    now,
                )
                .await
            {
                entry.error_kind = Some(format!("cache write: {}", e));
                self.append_audit(&entry).await;
                continue;
            }

            self.append_audit(&entry).await;
            return Ok(candidate);
        }

        Err(EngineError::GenerationExhausted {
            attempts: max_attempts,
        })
    }

    /// Audit writes are mandatory in intent but best-effort in practice: a
    /// failed write is logged and swallowed so it can never take down a
    /// generation that would otherwise succeed.
    async fn append_audit(&self, entry: &GenerationAttemptLog) {
        if let Err(e) = self.logs.append(entry).await {
            tracing::warn!(
                "Failed to write generation audit entry (user {}, attempt {}): {}",
                entry.user_id,
                entry.attempt_number,
                e
            );
        }
    }
}

impl GeneratedCandidate {
    /// Content hash recorded next to the embedding. FNV-1a is enough here:
    /// the hash only disambiguates records in operator queries, the
    /// duplicate decision itself is embedding-based.
    pub fn text_hash(&self) -> String {
        const OFFSET: u64 = 0xcbf29ce484222325;
        const PRIME: u64 = 0x100000001b3;
        let mut hash = OFFSET;
        for byte in self.text.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(PRIME);
        }
        format!("{:016x}", hash)
    }
}
