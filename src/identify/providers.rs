//! Metadata provider clients.
//!
//! Thin HTTP clients for Radarr, Sonarr and TMDB. Each returns candidates in
//! a common shape; priority between providers is decided by the order they
//! are handed to the engine, not in here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::models::{CandidateDetails, IdentificationCandidate, ProviderKind};
use super::IdentifyError;

/// How many lookup results are worth scoring per provider.
const MAX_CANDIDATES: usize = 10;

/// A queryable metadata source.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Search candidates by (cleaned) title text.
    async fn search(&self, query: &str) -> Result<Vec<IdentificationCandidate>, IdentifyError>;

    /// Fetch display metadata for a specific candidate by its external id.
    async fn details(&self, external_id: &str) -> Result<CandidateDetails, IdentifyError>;
}

fn http_client(timeout_secs: u64) -> Result<Client, IdentifyError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| IdentifyError::Provider {
            provider: ProviderKind::Tmdb,
            message: format!("failed to build HTTP client: {e}"),
        })
}

fn provider_error(provider: ProviderKind, e: impl std::fmt::Display) -> IdentifyError {
    IdentifyError::Provider {
        provider,
        message: e.to_string(),
    }
}

// =============================================================================
// Radarr
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RadarrMovie {
    title: String,
    year: Option<i32>,
    tmdb_id: Option<i64>,
    /// Minutes.
    runtime: Option<u32>,
    overview: Option<String>,
    remote_poster: Option<String>,
}

/// Radarr `movie/lookup` client.
pub struct RadarrProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RadarrProvider {
    pub fn new(base_url: String, api_key: String, timeout_secs: u64) -> Result<Self, IdentifyError> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn lookup(&self, params: &[(&str, &str)]) -> Result<Vec<RadarrMovie>, IdentifyError> {
        let url = format!("{}/api/v3/movie/lookup", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .query(params)
            .send()
            .await
            .map_err(|e| provider_error(ProviderKind::Radarr, e))?;

        if !response.status().is_success() {
            return Err(provider_error(
                ProviderKind::Radarr,
                format!("lookup returned {}", response.status()),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| provider_error(ProviderKind::Radarr, e))
    }
}

#[async_trait]
impl MetadataProvider for RadarrProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Radarr
    }

    async fn search(&self, query: &str) -> Result<Vec<IdentificationCandidate>, IdentifyError> {
        let movies = self.lookup(&[("term", query)]).await?;
        Ok(movies
            .into_iter()
            .filter_map(|m| {
                let tmdb_id = m.tmdb_id?;
                Some(IdentificationCandidate {
                    title: m.title,
                    year: m.year,
                    external_id: tmdb_id.to_string(),
                    provider: ProviderKind::Radarr,
                    runtime_minutes: m.runtime.filter(|r| *r > 0),
                })
            })
            .take(MAX_CANDIDATES)
            .collect())
    }

    async fn details(&self, external_id: &str) -> Result<CandidateDetails, IdentifyError> {
        // Radarr resolves `tmdb:<id>` terms to the exact record.
        let term = format!("tmdb:{external_id}");
        let movies = self.lookup(&[("term", term.as_str())]).await?;
        let movie = movies.into_iter().next().ok_or_else(|| {
            provider_error(ProviderKind::Radarr, format!("no record for tmdb id {external_id}"))
        })?;
        Ok(CandidateDetails {
            title: movie.title,
            year: movie.year,
            runtime_minutes: movie.runtime.filter(|r| *r > 0),
            poster_url: movie.remote_poster,
            overview: movie.overview,
        })
    }
}

// =============================================================================
// Sonarr
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SonarrSeries {
    title: String,
    year: Option<i32>,
    tvdb_id: Option<i64>,
    /// Minutes per episode.
    runtime: Option<u32>,
    overview: Option<String>,
    remote_poster: Option<String>,
}

/// Sonarr `series/lookup` client.
pub struct SonarrProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl SonarrProvider {
    pub fn new(base_url: String, api_key: String, timeout_secs: u64) -> Result<Self, IdentifyError> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn lookup(&self, term: &str) -> Result<Vec<SonarrSeries>, IdentifyError> {
        let url = format!("{}/api/v3/series/lookup", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .query(&[("term", term)])
            .send()
            .await
            .map_err(|e| provider_error(ProviderKind::Sonarr, e))?;

        if !response.status().is_success() {
            return Err(provider_error(
                ProviderKind::Sonarr,
                format!("lookup returned {}", response.status()),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| provider_error(ProviderKind::Sonarr, e))
    }
}

#[async_trait]
impl MetadataProvider for SonarrProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Sonarr
    }

    async fn search(&self, query: &str) -> Result<Vec<IdentificationCandidate>, IdentifyError> {
        let series = self.lookup(query).await?;
        Ok(series
            .into_iter()
            .filter_map(|s| {
                let tvdb_id = s.tvdb_id?;
                Some(IdentificationCandidate {
                    title: s.title,
                    year: s.year,
                    external_id: tvdb_id.to_string(),
                    provider: ProviderKind::Sonarr,
                    runtime_minutes: s.runtime.filter(|r| *r > 0),
                })
            })
            .take(MAX_CANDIDATES)
            .collect())
    }

    async fn details(&self, external_id: &str) -> Result<CandidateDetails, IdentifyError> {
        let series = self.lookup(&format!("tvdb:{external_id}")).await?;
        let series = series.into_iter().next().ok_or_else(|| {
            provider_error(ProviderKind::Sonarr, format!("no record for tvdb id {external_id}"))
        })?;
        Ok(CandidateDetails {
            title: series.title,
            year: series.year,
            runtime_minutes: series.runtime.filter(|r| *r > 0),
            poster_url: series.remote_poster,
            overview: series.overview,
        })
    }
}

// =============================================================================
// TMDB
// =============================================================================

const TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";
const TMDB_IMAGE_BASE: &str = "https://image.tmdb.org/t/p/w500";

#[derive(Debug, Deserialize)]
struct TmdbSearchResponse {
    results: Vec<TmdbSearchResult>,
}

#[derive(Debug, Deserialize)]
struct TmdbSearchResult {
    id: i64,
    title: String,
    /// `YYYY-MM-DD`, frequently empty.
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TmdbMovieDetails {
    title: String,
    release_date: Option<String>,
    runtime: Option<u32>,
    poster_path: Option<String>,
    overview: Option<String>,
}

fn release_year(release_date: Option<&str>) -> Option<i32> {
    release_date?.get(0..4)?.parse().ok()
}

/// Direct TMDB search, used as the generic fallback behind the local
/// library providers.
pub struct TmdbProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl TmdbProvider {
    pub fn new(api_key: String, timeout_secs: u64) -> Result<Self, IdentifyError> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            base_url: TMDB_BASE_URL.to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl MetadataProvider for TmdbProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Tmdb
    }

    async fn search(&self, query: &str) -> Result<Vec<IdentificationCandidate>, IdentifyError> {
        let url = format!("{}/search/movie", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str()), ("query", query)])
            .send()
            .await
            .map_err(|e| provider_error(ProviderKind::Tmdb, e))?;

        if !response.status().is_success() {
            return Err(provider_error(
                ProviderKind::Tmdb,
                format!("search returned {}", response.status()),
            ));
        }

        let parsed: TmdbSearchResponse = response
            .json()
            .await
            .map_err(|e| provider_error(ProviderKind::Tmdb, e))?;

        Ok(parsed
            .results
            .into_iter()
            .map(|r| IdentificationCandidate {
                year: release_year(r.release_date.as_deref()),
                title: r.title,
                external_id: r.id.to_string(),
                provider: ProviderKind::Tmdb,
                // Search results carry no runtime; details do.
                runtime_minutes: None,
            })
            .take(MAX_CANDIDATES)
            .collect())
    }

    async fn details(&self, external_id: &str) -> Result<CandidateDetails, IdentifyError> {
        let url = format!("{}/movie/{}", self.base_url, external_id);
        let response = self
            .client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| provider_error(ProviderKind::Tmdb, e))?;

        if !response.status().is_success() {
            return Err(provider_error(
                ProviderKind::Tmdb,
                format!("details returned {}", response.status()),
            ));
        }

        let movie: TmdbMovieDetails = response
            .json()
            .await
            .map_err(|e| provider_error(ProviderKind::Tmdb, e))?;

        Ok(CandidateDetails {
            year: release_year(movie.release_date.as_deref()),
            title: movie.title,
            runtime_minutes: movie.runtime.filter(|r| *r > 0),
            poster_url: movie.poster_path.map(|p| format!("{TMDB_IMAGE_BASE}{p}")),
            overview: movie.overview,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_year_parsing() {
        assert_eq!(release_year(Some("2008-05-02")), Some(2008));
        assert_eq!(release_year(Some("")), None);
        assert_eq!(release_year(Some("bad")), None);
        assert_eq!(release_year(None), None);
    }

    #[test]
    fn test_radarr_lookup_deserialization() {
        let body = r#"[
            {"title": "Iron Man", "year": 2008, "tmdbId": 1726, "runtime": 126,
             "overview": "Tony Stark.", "remotePoster": "http://img/p.jpg"},
            {"title": "No Id", "year": 2010, "runtime": 0}
        ]"#;
        let movies: Vec<RadarrMovie> = serde_json::from_str(body).unwrap();
        assert_eq!(movies.len(), 2);
        assert_eq!(movies[0].tmdb_id, Some(1726));
        assert_eq!(movies[0].runtime, Some(126));
        assert!(movies[1].tmdb_id.is_none());
    }

    #[test]
    fn test_tmdb_search_deserialization() {
        let body = r#"{"results": [
            {"id": 603, "title": "The Matrix", "release_date": "1999-03-30"},
            {"id": 604, "title": "The Matrix Reloaded", "release_date": ""}
        ]}"#;
        let parsed: TmdbSearchResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(release_year(parsed.results[0].release_date.as_deref()), Some(1999));
        assert_eq!(release_year(parsed.results[1].release_date.as_deref()), None);
    }
}
