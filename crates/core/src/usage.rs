//! Rough accounting of voice-AI usage, measured in characters of agent output.

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const FREE_TIER_CHARACTERS: u64 = 10_000;
const MODERATE_USAGE: u64 = 5_000;
const HIGH_USAGE: u64 = 8_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageLevel {
    Normal,
    Moderate,
    High,
}

impl UsageLevel {
    pub fn message(self) -> &'static str {
        match self {
            UsageLevel::Normal => "Usage within normal range",
            UsageLevel::Moderate => "Moderate usage - monitor your quota",
            UsageLevel::High => "High usage - approaching free tier limit",
        }
    }
}

#[derive(Debug, Clone)]
pub struct UsageTracker {
    characters: u64,
    started_at: DateTime<Utc>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self {
            characters: 0,
            started_at: Utc::now(),
        }
    }

    pub fn record_response(&mut self, text: &str) {
        self.characters += text.chars().count() as u64;
    }

    pub fn characters(&self) -> u64 {
        self.characters
    }

    pub fn elapsed_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }

    pub fn level(&self) -> UsageLevel {
        match self.characters {
            c if c > HIGH_USAGE => UsageLevel::High,
            c if c > MODERATE_USAGE => UsageLevel::Moderate,
            _ => UsageLevel::Normal,
        }
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}
