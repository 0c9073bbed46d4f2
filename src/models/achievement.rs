// src/models/achievement.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Master record per badge code. Created lazily the first time a code is
/// granted to any user; idempotent by unique code.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AchievementDefinition {
    pub code: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Human-readable metadata used when a badge code is granted before its
/// definition exists.
#[derive(Debug, Clone)]
pub struct BadgeMeta {
    pub name: String,
    pub description: String,
}

impl BadgeMeta {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    /// Fallback metadata derived from the code itself, e.g. for codes
    /// granted by an operator script that never shipped display copy.
    pub fn derived(code: &str) -> Self {
        let name = code
            .split(['-', '_'])
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            description: format!("Awarded for: {}", name),
            name,
        }
    }
}
