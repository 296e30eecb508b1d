//! Identification engine.
//!
//! Combines label parsing, track classification and provider scoring into
//! the `identify` contract used by the rip pipeline. Called pre-rip with
//! scanned tracks and, in hands-free mode, again post-rip with the measured
//! runtime of the extracted file.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::IdentificationSettings;
use crate::label::{parse_label, LabelRules, ParsedLabel};
use crate::makemkv::Track;

use super::models::{CandidateDetails, IdentificationCandidate, MediaKind, ScoreResult};
use super::providers::MetadataProvider;
use super::scorer;

/// Outcome of a pre-rip identification pass.
#[derive(Debug, Clone)]
pub struct Identification {
    pub media_kind: MediaKind,
    /// Best scored candidate, `None` when every provider failed or returned
    /// nothing. The caller treats `None` as Low confidence.
    pub score: Option<ScoreResult>,
    /// Tracks the pipeline should extract.
    pub selected_tracks: Vec<Track>,
    pub decoy_detected: bool,
    pub parsed_label: ParsedLabel,
}

/// Scores provider candidates against the disc label and track layout.
pub struct IdentificationEngine {
    /// Providers in priority order; index is the provider rank used by the
    /// scorer and tie-breaks.
    providers: Vec<Arc<dyn MetadataProvider>>,
    cfg: IdentificationSettings,
    label_rules: LabelRules,
}

impl IdentificationEngine {
    pub fn new(
        providers: Vec<Arc<dyn MetadataProvider>>,
        cfg: IdentificationSettings,
        label_rules: LabelRules,
    ) -> Self {
        Self {
            providers,
            cfg,
            label_rules,
        }
    }

    /// Pre-rip identification from the scanned track list.
    pub async fn identify(
        &self,
        disc_label: &str,
        tracks: &[Track],
        media_hint: MediaKind,
        main_feature_only: bool,
    ) -> Identification {
        let parsed = parse_label(disc_label, &self.label_rules);
        let decoy = scorer::detect_decoy_playlists(tracks, &self.cfg);
        let media_kind = scorer::classify_media(tracks, media_hint, &self.cfg);

        if decoy {
            warn!(
                "decoy playlists detected on '{disc_label}', selection will be runtime-driven"
            );
        }

        match media_kind {
            MediaKind::Tv => {
                let selected = scorer::episode_tracks(tracks, &self.cfg);
                let score = self.search_and_score(&parsed, None).await;
                info!(
                    "identified '{}' as TV with {} episode tracks",
                    parsed.title,
                    selected.len()
                );
                Identification {
                    media_kind,
                    score,
                    selected_tracks: selected,
                    decoy_detected: decoy,
                    parsed_label: parsed,
                }
            }
            _ => {
                // Score against the longest feature so runtime proximity is
                // meaningful before we know which track we will extract.
                let disc_runtime = tracks
                    .iter()
                    .filter(|t| t.duration_secs >= self.cfg.movie_min_secs)
                    .map(|t| t.duration_secs)
                    .max();
                let score = self.search_and_score(&parsed, disc_runtime).await;
                let candidate_runtime = score
                    .as_ref()
                    .and_then(|s| s.candidate.runtime_minutes)
                    .map(|m| m as u64 * 60);
                let selected = scorer::select_movie_tracks(
                    tracks,
                    candidate_runtime,
                    main_feature_only,
                    &self.cfg,
                );
                Identification {
                    media_kind: MediaKind::Movie,
                    score,
                    selected_tracks: selected,
                    decoy_detected: decoy,
                    parsed_label: parsed,
                }
            }
        }
    }

    /// Post-rip identification from the extracted file's measured runtime.
    pub async fn identify_runtime(
        &self,
        disc_label: &str,
        measured_secs: u64,
    ) -> Option<ScoreResult> {
        let parsed = parse_label(disc_label, &self.label_rules);
        self.search_and_score(&parsed, Some(measured_secs)).await
    }

    /// Fetch display metadata for a winning candidate from its own
    /// provider, by external id.
    pub async fn refine(&self, score: &ScoreResult) -> Option<CandidateDetails> {
        let provider = self
            .providers
            .iter()
            .find(|p| p.kind() == score.candidate.provider)?;
        match provider.details(&score.candidate.external_id).await {
            Ok(details) => Some(details),
            Err(e) => {
                warn!("metadata refinement failed: {e}");
                None
            }
        }
    }

    /// Query every provider in priority order and score the pool.
    ///
    /// Provider failures degrade the result rather than failing the job:
    /// the disc can still rip and route to review at Low confidence.
    async fn search_and_score(
        &self,
        label: &ParsedLabel,
        disc_runtime_secs: Option<u64>,
    ) -> Option<ScoreResult> {
        if self.providers.is_empty() {
            warn!("no metadata providers configured, skipping identification");
            return None;
        }

        let mut pool: Vec<(IdentificationCandidate, usize)> = Vec::new();
        for (rank, provider) in self.providers.iter().enumerate() {
            match provider.search(&label.title).await {
                Ok(candidates) => {
                    pool.extend(candidates.into_iter().map(|c| (c, rank)));
                }
                Err(e) => warn!("{e}"),
            }
        }

        let best = scorer::pick_best(&pool, label, disc_runtime_secs, &self.cfg);
        if let Some(result) = &best {
            info!(
                "best candidate '{}' ({}) scored {} [{:?}]",
                result.candidate.title, result.candidate.provider, result.score, result.band
            );
        } else {
            warn!("no candidates for '{}'", label.title);
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identify::models::ProviderKind;
    use crate::identify::IdentifyError;
    use async_trait::async_trait;

    struct FakeProvider {
        kind: ProviderKind,
        candidates: Vec<IdentificationCandidate>,
        fail: bool,
    }

    #[async_trait]
    impl MetadataProvider for FakeProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn search(&self, _query: &str) -> Result<Vec<IdentificationCandidate>, IdentifyError> {
            if self.fail {
                return Err(IdentifyError::Provider {
                    provider: self.kind,
                    message: "unreachable".to_string(),
                });
            }
            Ok(self.candidates.clone())
        }

        async fn details(&self, _external_id: &str) -> Result<CandidateDetails, IdentifyError> {
            Err(IdentifyError::Provider {
                provider: self.kind,
                message: "not implemented".to_string(),
            })
        }
    }

    fn engine(providers: Vec<Arc<dyn MetadataProvider>>) -> IdentificationEngine {
        IdentificationEngine::new(
            providers,
            IdentificationSettings::default(),
            LabelRules::default(),
        )
    }

    fn track(index: u32, duration_secs: u64) -> Track {
        Track {
            index,
            duration_secs,
            size_bytes: None,
            playlist: None,
        }
    }

    fn radarr_candidate(title: &str, runtime: u32) -> IdentificationCandidate {
        IdentificationCandidate {
            title: title.to_string(),
            year: Some(2008),
            external_id: "1726".to_string(),
            provider: ProviderKind::Radarr,
            runtime_minutes: Some(runtime),
        }
    }

    #[tokio::test]
    async fn test_identify_movie_selects_runtime_matched_track() {
        let provider = Arc::new(FakeProvider {
            kind: ProviderKind::Radarr,
            candidates: vec![radarr_candidate("Iron Man", 120)],
            fail: false,
        });
        let engine = engine(vec![provider]);
        // The track matching the 120m runtime is not the longest.
        let tracks = vec![track(0, 7500), track(1, 7210), track(2, 600)];

        let id = engine
            .identify("IRON_MAN", &tracks, MediaKind::Unknown, true)
            .await;

        assert_eq!(id.media_kind, MediaKind::Movie);
        assert_eq!(id.selected_tracks.len(), 1);
        assert_eq!(id.selected_tracks[0].index, 1);
        let score = id.score.unwrap();
        assert_eq!(score.candidate.title, "Iron Man");
        assert!(score.score >= 75);
    }

    #[tokio::test]
    async fn test_identify_tv_selects_episode_band() {
        let engine = engine(vec![]);
        let tracks = vec![
            track(0, 1300),
            track(1, 1320),
            track(2, 1310),
            track(3, 1290),
            track(4, 7200),
        ];

        let id = engine
            .identify("SOME_SHOW_S1", &tracks, MediaKind::Unknown, true)
            .await;

        assert_eq!(id.media_kind, MediaKind::Tv);
        assert_eq!(id.selected_tracks.len(), 4);
        assert!(id.score.is_none());
    }

    #[tokio::test]
    async fn test_provider_failure_degrades_to_no_score() {
        let provider = Arc::new(FakeProvider {
            kind: ProviderKind::Radarr,
            candidates: vec![],
            fail: true,
        });
        let engine = engine(vec![provider]);
        let tracks = vec![track(0, 7200)];

        let id = engine
            .identify("IRON_MAN", &tracks, MediaKind::Unknown, true)
            .await;

        assert!(id.score.is_none());
        // Still selects a track so the rip can proceed to review.
        assert_eq!(id.selected_tracks.len(), 1);
    }

    #[tokio::test]
    async fn test_identify_runtime_post_rip() {
        let provider = Arc::new(FakeProvider {
            kind: ProviderKind::Radarr,
            candidates: vec![radarr_candidate("Iron Man", 120)],
            fail: false,
        });
        let engine = engine(vec![provider]);

        let score = engine.identify_runtime("IRON_MAN", 7205).await.unwrap();
        assert_eq!(score.candidate.title, "Iron Man");
        assert!(score.score >= 75);
    }
}
