//! Scoring and track-selection logic.
//!
//! Pure functions over scanned tracks and provider candidates. Decoy
//! playlist detection, TV/movie classification and the weighted candidate
//! score all live here so they can be tested without providers or a drive.

use crate::config::IdentificationSettings;
use crate::label::ParsedLabel;
use crate::makemkv::Track;

use super::models::{ConfidenceBand, IdentificationCandidate, MediaKind, ScoreResult};

// Score components. The exact-title bonus is deliberately large relative to
// the rest so a sequel/reboot with a closer runtime cannot outrank an exact
// title match.
const EXACT_TITLE_BONUS: u8 = 40;
const RUNTIME_MAX: u8 = 40;
const RUNTIME_NEAR_MISS: u8 = 10;
const YEAR_MAX: u8 = 15;
const YEAR_STEP: u8 = 5;

/// Detect decoy-playlist copy protection.
///
/// Fires when at least `decoy_min_tracks` feature-length tracks sit within
/// `decoy_epsilon_secs` of the longest of them. On such discs the label and
/// "longest track" signals are unreliable and selection must be driven by
/// runtime proximity against provider metadata.
pub fn detect_decoy_playlists(tracks: &[Track], cfg: &IdentificationSettings) -> bool {
    let features: Vec<&Track> = tracks
        .iter()
        .filter(|t| t.duration_secs >= cfg.movie_min_secs)
        .collect();
    let Some(max_secs) = features.iter().map(|t| t.duration_secs).max() else {
        return false;
    };
    let clustered = features
        .iter()
        .filter(|t| max_secs - t.duration_secs <= cfg.decoy_epsilon_secs)
        .count();
    clustered >= cfg.decoy_min_tracks
}

/// Tracks whose duration falls in the episode band
/// `[tv_min_episode_secs, movie_min_secs)`.
pub fn episode_tracks(tracks: &[Track], cfg: &IdentificationSettings) -> Vec<Track> {
    tracks
        .iter()
        .filter(|t| t.duration_secs >= cfg.tv_min_episode_secs && t.duration_secs < cfg.movie_min_secs)
        .cloned()
        .collect()
}

/// Classify the disc as TV or movie.
///
/// An explicit hint short-circuits classification; otherwise the disc is TV
/// when the episode-band track count exceeds `tv_track_threshold`.
pub fn classify_media(tracks: &[Track], hint: MediaKind, cfg: &IdentificationSettings) -> MediaKind {
    match hint {
        MediaKind::Movie => MediaKind::Movie,
        MediaKind::Tv => {
            if episode_tracks(tracks, cfg).is_empty() {
                MediaKind::Movie
            } else {
                MediaKind::Tv
            }
        }
        MediaKind::Unknown => {
            if episode_tracks(tracks, cfg).len() > cfg.tv_track_threshold {
                MediaKind::Tv
            } else {
                MediaKind::Movie
            }
        }
    }
}

/// Select the track(s) to extract for a movie disc.
///
/// With a known candidate runtime, the feature-length track closest to it
/// wins (the only reliable signal on decoy-playlist discs). Without one the
/// longest track wins, with multi-angle ties broken toward the lowest
/// playlist name; when `main_feature_only` is off and no runtime is known,
/// every feature-length track is kept.
pub fn select_movie_tracks(
    tracks: &[Track],
    candidate_runtime_secs: Option<u64>,
    main_feature_only: bool,
    cfg: &IdentificationSettings,
) -> Vec<Track> {
    let mut features: Vec<&Track> = tracks
        .iter()
        .filter(|t| t.duration_secs >= cfg.movie_min_secs)
        .collect();
    if features.is_empty() {
        // Nothing feature-length; fall back to whatever is longest.
        return tracks
            .iter()
            .max_by_key(|t| t.duration_secs)
            .cloned()
            .into_iter()
            .collect();
    }

    if let Some(runtime) = candidate_runtime_secs {
        features.sort_by_key(|t| {
            (
                t.duration_secs.abs_diff(runtime),
                playlist_sort_key(t),
                t.index,
            )
        });
        return vec![features[0].clone()];
    }

    if !main_feature_only {
        let mut all: Vec<Track> = features.iter().map(|t| (*t).clone()).collect();
        all.sort_by_key(|t| t.index);
        return all;
    }

    // Longest track, preferring the lowest playlist among same-length
    // angles (the primary-language angle on US releases).
    let longest = features
        .iter()
        .map(|t| t.duration_secs)
        .max()
        .unwrap_or_default();
    let mut angles: Vec<&Track> = features
        .iter()
        .copied()
        .filter(|t| longest - t.duration_secs <= cfg.angle_epsilon_secs)
        .collect();
    angles.sort_by_key(|t| (playlist_sort_key(t), t.index));
    vec![angles[0].clone()]
}

fn playlist_sort_key(track: &Track) -> String {
    // Missing playlist names sort after any real one.
    track.playlist.clone().unwrap_or_else(|| "~".to_string())
}

/// Compute the weighted score for one candidate. Saturates at 100.
pub fn score_candidate(
    candidate: &IdentificationCandidate,
    label: &ParsedLabel,
    disc_runtime_secs: Option<u64>,
    provider_rank: usize,
    cfg: &IdentificationSettings,
) -> u8 {
    let mut score: u32 = 0;

    if candidate.title.trim().eq_ignore_ascii_case(label.title.trim()) {
        score += EXACT_TITLE_BONUS as u32;
    }

    if let (Some(disc_secs), Some(runtime_min)) = (disc_runtime_secs, candidate.runtime_minutes) {
        score += runtime_component(disc_secs, runtime_min, cfg.runtime_tolerance_secs) as u32;
    }

    if let (Some(label_year), Some(cand_year)) = (label.year, candidate.year) {
        let delta = label_year.abs_diff(cand_year);
        score += YEAR_MAX.saturating_sub(YEAR_STEP.saturating_mul(delta.min(255) as u8)) as u32;
    }

    score += provider_base(provider_rank) as u32;

    score.min(100) as u8
}

/// Runtime proximity: full marks at zero delta, linear decay toward the
/// tolerance, a flat near-miss floor out to twice the tolerance, zero
/// beyond. Monotonically non-increasing in the delta.
fn runtime_component(disc_secs: u64, candidate_minutes: u32, tolerance_secs: u64) -> u8 {
    let tolerance = tolerance_secs.max(1);
    let delta = disc_secs.abs_diff(candidate_minutes as u64 * 60);
    if delta >= tolerance * 2 {
        return 0;
    }
    let decayed = RUNTIME_MAX as i64 - (RUNTIME_MAX as i64 * delta as i64 / tolerance as i64);
    decayed.clamp(RUNTIME_NEAR_MISS as i64, RUNTIME_MAX as i64) as u8
}

/// Base score by provider priority: local library providers are configured
/// ahead of generic search and get a small head start.
fn provider_base(rank: usize) -> u8 {
    match rank {
        0 => 5,
        1 => 3,
        _ => 1,
    }
}

/// Band a score against the configured thresholds.
pub fn band_for(score: u8, cfg: &IdentificationSettings) -> ConfidenceBand {
    if score >= cfg.high_confidence_cutoff {
        ConfidenceBand::High
    } else if score >= cfg.confidence_threshold {
        ConfidenceBand::Medium
    } else {
        ConfidenceBand::Low
    }
}

/// Score all candidates and pick the winner.
///
/// Ties resolve by provider priority (lower rank wins), then by smaller
/// runtime delta.
pub fn pick_best(
    candidates: &[(IdentificationCandidate, usize)],
    label: &ParsedLabel,
    disc_runtime_secs: Option<u64>,
    cfg: &IdentificationSettings,
) -> Option<ScoreResult> {
    let mut scored: Vec<(u8, usize, u64, &IdentificationCandidate)> = candidates
        .iter()
        .map(|(candidate, rank)| {
            let score = score_candidate(candidate, label, disc_runtime_secs, *rank, cfg);
            let delta = match (disc_runtime_secs, candidate.runtime_minutes) {
                (Some(disc), Some(minutes)) => disc.abs_diff(minutes as u64 * 60),
                _ => u64::MAX,
            };
            (score, *rank, delta, candidate)
        })
        .collect();

    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

    scored.first().map(|(score, _, _, candidate)| ScoreResult {
        candidate: (*candidate).clone(),
        score: *score,
        band: band_for(*score, cfg),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identify::models::ProviderKind;

    fn cfg() -> IdentificationSettings {
        IdentificationSettings::default()
    }

    fn track(index: u32, duration_secs: u64) -> Track {
        Track {
            index,
            duration_secs,
            size_bytes: None,
            playlist: None,
        }
    }

    fn candidate(title: &str, year: Option<i32>, runtime_minutes: Option<u32>) -> IdentificationCandidate {
        IdentificationCandidate {
            title: title.to_string(),
            year,
            external_id: "1".to_string(),
            provider: ProviderKind::Radarr,
            runtime_minutes,
        }
    }

    fn label(title: &str, year: Option<i32>) -> ParsedLabel {
        ParsedLabel {
            title: title.to_string(),
            year,
        }
    }

    #[test]
    fn test_decoy_detection_fires_on_cluster() {
        // 10 near-identical feature-length decoys plus some extras.
        let mut tracks: Vec<Track> = (0..10).map(|i| track(i, 7200 + i as u64 * 10)).collect();
        tracks.push(track(20, 300));
        assert!(detect_decoy_playlists(&tracks, &cfg()));
    }

    #[test]
    fn test_decoy_detection_ignores_small_clusters() {
        let tracks: Vec<Track> = (0..4).map(|i| track(i, 7200 + i as u64 * 10)).collect();
        assert!(!detect_decoy_playlists(&tracks, &cfg()));
    }

    #[test]
    fn test_decoy_detection_ignores_spread_durations() {
        // 10 feature-length tracks but spread far apart.
        let tracks: Vec<Track> = (0..10).map(|i| track(i, 3000 + i as u64 * 600)).collect();
        assert!(!detect_decoy_playlists(&tracks, &cfg()));
    }

    #[test]
    fn test_tv_classification_from_episode_band() {
        // The documented shape: four episode-length tracks and one feature.
        let tracks = vec![
            track(0, 1300),
            track(1, 1320),
            track(2, 1310),
            track(3, 1290),
            track(4, 7200),
        ];
        assert_eq!(
            classify_media(&tracks, MediaKind::Unknown, &cfg()),
            MediaKind::Tv
        );
        let episodes = episode_tracks(&tracks, &cfg());
        assert_eq!(episodes.len(), 4);
        assert!(episodes.iter().all(|t| t.index != 4));
    }

    #[test]
    fn test_movie_classification_below_threshold() {
        let tracks = vec![track(0, 1300), track(1, 1320), track(2, 7200)];
        assert_eq!(
            classify_media(&tracks, MediaKind::Unknown, &cfg()),
            MediaKind::Movie
        );
    }

    #[test]
    fn test_movie_hint_short_circuits() {
        let tracks = vec![
            track(0, 1300),
            track(1, 1320),
            track(2, 1310),
            track(3, 1290),
            track(4, 1305),
        ];
        assert_eq!(
            classify_media(&tracks, MediaKind::Movie, &cfg()),
            MediaKind::Movie
        );
    }

    #[test]
    fn test_tv_hint_falls_back_without_episodes() {
        let tracks = vec![track(0, 7200)];
        assert_eq!(
            classify_media(&tracks, MediaKind::Tv, &cfg()),
            MediaKind::Movie
        );
    }

    #[test]
    fn test_runtime_selection_beats_longest_track() {
        // Decoy-style disc: the longest track is not the one matching the
        // provider runtime.
        let tracks = vec![track(0, 7400), track(1, 7210), track(2, 7390)];
        let selected = select_movie_tracks(&tracks, Some(7200), true, &cfg());
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].index, 1);
    }

    #[test]
    fn test_longest_track_without_runtime() {
        let tracks = vec![track(0, 6000), track(1, 7400), track(2, 300)];
        let selected = select_movie_tracks(&tracks, None, true, &cfg());
        assert_eq!(selected[0].index, 1);
    }

    #[test]
    fn test_angle_tie_prefers_lowest_playlist() {
        let mut a = track(0, 7200);
        a.playlist = Some("00801.mpls".to_string());
        let mut b = track(1, 7202);
        b.playlist = Some("00800.mpls".to_string());
        let selected = select_movie_tracks(&[a, b], None, true, &cfg());
        assert_eq!(selected[0].index, 1);
    }

    #[test]
    fn test_all_features_kept_when_not_main_feature_only() {
        let tracks = vec![track(0, 7200), track(1, 3000), track(2, 300)];
        let selected = select_movie_tracks(&tracks, None, false, &cfg());
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn test_runtime_component_monotone() {
        let mut last = u8::MAX;
        for delta in (0..1200).step_by(30) {
            let score = runtime_component(7200 + delta, 120, 300);
            assert!(score <= last, "runtime component increased at delta {delta}");
            last = score;
        }
        assert_eq!(runtime_component(7200, 120, 300), RUNTIME_MAX);
        assert_eq!(runtime_component(7200 + 700, 120, 300), 0);
    }

    #[test]
    fn test_exact_title_beats_runtime_proximity() {
        let label = label("Iron Man", None);
        let exact = candidate("Iron Man", None, Some(115));
        let close_runtime = candidate("Iron Man 2", None, Some(120));
        let exact_score = score_candidate(&exact, &label, Some(7200), 0, &cfg());
        let other_score = score_candidate(&close_runtime, &label, Some(7200), 0, &cfg());
        assert!(exact_score > other_score);
    }

    #[test]
    fn test_year_bonus_decays() {
        let label = label("Dune", Some(2021));
        let same_year = candidate("Dune", Some(2021), None);
        let off_by_two = candidate("Dune", Some(2023), None);
        let far = candidate("Dune", Some(1984), None);
        let s0 = score_candidate(&same_year, &label, None, 0, &cfg());
        let s2 = score_candidate(&off_by_two, &label, None, 0, &cfg());
        let s_far = score_candidate(&far, &label, None, 0, &cfg());
        assert!(s0 > s2);
        assert!(s2 > s_far);
    }

    #[test]
    fn test_score_bounded_to_100() {
        let label = label("Iron Man", Some(2008));
        let perfect = candidate("Iron Man", Some(2008), Some(120));
        assert!(score_candidate(&perfect, &label, Some(7200), 0, &cfg()) <= 100);
    }

    #[test]
    fn test_banding_thresholds() {
        let c = cfg();
        assert_eq!(band_for(95, &c), ConfidenceBand::High);
        assert_eq!(band_for(90, &c), ConfidenceBand::High);
        assert_eq!(band_for(80, &c), ConfidenceBand::Medium);
        assert_eq!(band_for(75, &c), ConfidenceBand::Medium);
        assert_eq!(band_for(74, &c), ConfidenceBand::Low);
    }

    #[test]
    fn test_tie_break_by_provider_priority() {
        let label = label("Iron Man", None);
        let mut first = candidate("Iron Man", None, Some(120));
        first.external_id = "radarr-1".to_string();
        let mut second = candidate("Iron Man", None, Some(120));
        second.provider = ProviderKind::Tmdb;
        second.external_id = "tmdb-1".to_string();

        // Equal scoring inputs except for provider rank; force equal scores
        // by probing both orders.
        let winner_ab = pick_best(
            &[(first.clone(), 0), (second.clone(), 0)],
            &label,
            Some(7200),
            &cfg(),
        )
        .unwrap();
        assert_eq!(winner_ab.candidate.external_id, "radarr-1");

        let winner_ranked = pick_best(
            &[(second.clone(), 1), (first.clone(), 0)],
            &label,
            Some(7200),
            &cfg(),
        )
        .unwrap();
        assert_eq!(winner_ranked.candidate.external_id, "radarr-1");
    }

    #[test]
    fn test_tie_break_by_runtime_delta() {
        let label = label("Something Else", None);
        // Both deltas land in the flat near-miss region (240s and 360s
        // against a 300s tolerance), so the scores are identical and only
        // the delta tie-break separates them.
        let mut near = candidate("Near", None, Some(116));
        near.external_id = "near".to_string();
        let mut far = candidate("Far", None, Some(114));
        far.external_id = "far".to_string();

        let near_score = score_candidate(&near, &label, Some(7200), 0, &cfg());
        let far_score = score_candidate(&far, &label, Some(7200), 0, &cfg());
        assert_eq!(near_score, far_score);

        let winner = pick_best(
            &[(far.clone(), 0), (near.clone(), 0)],
            &label,
            Some(7200),
            &cfg(),
        )
        .unwrap();
        assert_eq!(winner.candidate.external_id, "near");
    }
}
