use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub device: Option<String>,
    pub makemkv_bin: Option<String>,
    pub ffprobe_bin: Option<String>,

    // Feature configs
    pub paths: Option<PathsConfig>,
    pub ripping: Option<RippingConfig>,
    pub identification: Option<IdentificationConfig>,
    pub label: Option<LabelConfig>,
    pub providers: Option<ProvidersConfig>,
    pub background: Option<BackgroundConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PathsConfig {
    pub raw: Option<String>,
    pub movies: Option<String>,
    pub tv: Option<String>,
    pub review: Option<String>,
    pub backup: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RippingConfig {
    /// "smart", "always_backup" or "direct_only".
    pub strategy: Option<String>,
    pub auto_rip: Option<bool>,
    pub hands_free: Option<bool>,
    pub countdown_secs: Option<u64>,
    pub eject_when_done: Option<bool>,
    pub main_feature_only: Option<bool>,
    pub stall_timeout_secs: Option<u64>,
    pub kill_grace_secs: Option<u64>,
    pub min_output_bytes: Option<u64>,
    pub min_backup_bytes_bluray: Option<u64>,
    pub min_backup_bytes_dvd: Option<u64>,
    pub progress_save_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct IdentificationConfig {
    pub runtime_tolerance_secs: Option<u64>,
    pub confidence_threshold: Option<u8>,
    pub high_confidence_cutoff: Option<u8>,
    pub decoy_min_tracks: Option<usize>,
    pub decoy_epsilon_secs: Option<u64>,
    pub tv_min_episode_secs: Option<u64>,
    pub movie_min_secs: Option<u64>,
    pub tv_track_threshold: Option<usize>,
    pub angle_epsilon_secs: Option<u64>,
    pub uncertain_suppress_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct LabelConfig {
    pub studio_tokens: Option<Vec<String>>,
    pub region_tokens: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ProvidersConfig {
    pub radarr: Option<ArrConfig>,
    pub sonarr: Option<ArrConfig>,
    pub tmdb_api_key: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArrConfig {
    pub url: String,
    pub api_key: String,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BackgroundConfig {
    pub digest_interval_hours: Option<u64>,
    pub event_retention_days: Option<u64>,
    pub prune_interval_hours: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
