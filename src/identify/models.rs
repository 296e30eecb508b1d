//! Data models for content identification.

use serde::{Deserialize, Serialize};

/// Metadata provider a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderKind {
    Radarr,
    Sonarr,
    Tmdb,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Radarr => "RADARR",
            ProviderKind::Sonarr => "SONARR",
            ProviderKind::Tmdb => "TMDB",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of content on the disc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaKind {
    Movie,
    Tv,
    Unknown,
}

/// A title candidate fetched from a metadata provider.
///
/// Transient: fetched per identification attempt, never persisted beyond
/// the job that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentificationCandidate {
    pub title: String,
    pub year: Option<i32>,
    /// Provider-scoped external id (TMDB id, TVDB id).
    pub external_id: String,
    pub provider: ProviderKind,
    pub runtime_minutes: Option<u32>,
}

/// Confidence band derived from the score and configured thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    /// Low-confidence results route to manual review instead of auto-rip.
    pub fn needs_review(&self) -> bool {
        matches!(self, ConfidenceBand::Low)
    }
}

/// Scored identification outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResult {
    pub candidate: IdentificationCandidate,
    /// 0..=100.
    pub score: u8,
    pub band: ConfidenceBand,
}

/// Detail record fetched by external id after a candidate wins.
///
/// Fetched by id, never by a second title search, so the displayed metadata
/// cannot drift away from the matched record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateDetails {
    pub title: String,
    pub year: Option<i32>,
    pub runtime_minutes: Option<u32>,
    pub poster_url: Option<String>,
    pub overview: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_needs_review() {
        assert!(!ConfidenceBand::High.needs_review());
        assert!(!ConfidenceBand::Medium.needs_review());
        assert!(ConfidenceBand::Low.needs_review());
    }

    #[test]
    fn test_provider_kind_serialization() {
        let json = serde_json::to_string(&ProviderKind::Radarr).unwrap();
        assert_eq!(json, "\"RADARR\"");
        let back: ProviderKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ProviderKind::Radarr);
    }
}
