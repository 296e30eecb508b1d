//! Content identification.
//!
//! Scores metadata-provider candidates against the parsed disc label and
//! track durations, classifies TV vs movie discs, and detects decoy-playlist
//! protection.

mod engine;
mod models;
mod providers;
mod scorer;

pub use engine::{Identification, IdentificationEngine};
pub use models::{
    CandidateDetails, ConfidenceBand, IdentificationCandidate, MediaKind, ProviderKind,
    ScoreResult,
};
pub use providers::{MetadataProvider, RadarrProvider, SonarrProvider, TmdbProvider};
pub use scorer::{
    band_for, classify_media, detect_decoy_playlists, episode_tracks, pick_best,
    select_movie_tracks,
};

use thiserror::Error;

/// Failure talking to a metadata provider.
///
/// Never fatal to a job: identification degrades to Low confidence and the
/// job routes to manual review instead.
#[derive(Debug, Error)]
pub enum IdentifyError {
    #[error("{provider} provider request failed: {message}")]
    Provider {
        provider: ProviderKind,
        message: String,
    },
}
