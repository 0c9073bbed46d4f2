// src/lib.rs
//
// Gamification session & anti-duplication engine for the learning backend:
// timed quiz sessions with bounded retries, per-user daily quotas with lazy
// timezone-aware reset, streak/badge bookkeeping, and an embedding-
// similarity duplicate gate in front of AI-generated content. The HTTP
// layer, document chunking, and model providers live elsewhere and talk to
// this crate through the seams in `store` and `engine::generation`.

pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod store;
pub mod utils;

pub use config::Config;
pub use engine::generation::{GenerationGate, Generator};
pub use engine::profile::RateLimitedProfile;
pub use engine::session::QuizSessionEngine;
pub use engine::similarity::SimilarityCache;
pub use error::{EngineError, QuotaKind};
