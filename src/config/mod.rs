mod file_config;

pub use file_config::{
    ArrConfig, BackgroundConfig, FileConfig, IdentificationConfig, LabelConfig, PathsConfig,
    ProvidersConfig, RippingConfig,
};

use crate::label::LabelRules;
use crate::ripper::RipStrategy;
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::str::FromStr;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub device: Option<String>,
    pub makemkv_bin: Option<String>,
    pub ffprobe_bin: Option<String>,
    pub media_root: Option<PathBuf>,
}

/// Fully resolved application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub device: String,
    pub makemkv_bin: String,
    pub ffprobe_bin: String,

    // Feature configs (with defaults)
    pub paths: LibraryPaths,
    pub ripping: RippingSettings,
    pub identification: IdentificationSettings,
    pub label_rules: LabelRules,
    pub providers: ProviderSettings,
    pub background: BackgroundSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        // Validate db_dir exists
        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let device = file
            .device
            .or_else(|| cli.device.clone())
            .unwrap_or_else(|| "/dev/sr0".to_string());
        let makemkv_bin = file
            .makemkv_bin
            .or_else(|| cli.makemkv_bin.clone())
            .unwrap_or_else(|| "makemkvcon".to_string());
        let ffprobe_bin = file
            .ffprobe_bin
            .or_else(|| cli.ffprobe_bin.clone())
            .unwrap_or_else(|| "ffprobe".to_string());

        // Library paths default under the media root.
        let media_root = cli
            .media_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("/mnt/media"));
        let p = file.paths.unwrap_or_default();
        let paths = LibraryPaths {
            raw: p
                .raw
                .map(PathBuf::from)
                .unwrap_or_else(|| media_root.join("rips/raw")),
            movies: p
                .movies
                .map(PathBuf::from)
                .unwrap_or_else(|| media_root.join("movies")),
            tv: p
                .tv
                .map(PathBuf::from)
                .unwrap_or_else(|| media_root.join("tv")),
            review: p
                .review
                .map(PathBuf::from)
                .unwrap_or_else(|| media_root.join("rips/review")),
            backup: p
                .backup
                .map(PathBuf::from)
                .unwrap_or_else(|| media_root.join("rips/backup")),
        };

        let r = file.ripping.unwrap_or_default();
        let strategy = match r.strategy.as_deref() {
            Some(value) => match RipStrategy::from_str(value) {
                Ok(strategy) => strategy,
                Err(_) => bail!("Unknown rip strategy: {value:?}"),
            },
            None => RipStrategy::Smart,
        };
        let ripping = RippingSettings {
            strategy,
            auto_rip: r.auto_rip.unwrap_or(true),
            hands_free: r.hands_free.unwrap_or(false),
            countdown_secs: r.countdown_secs.unwrap_or(20),
            eject_when_done: r.eject_when_done.unwrap_or(true),
            main_feature_only: r.main_feature_only.unwrap_or(true),
            stall_timeout_secs: r.stall_timeout_secs.unwrap_or(600),
            kill_grace_secs: r.kill_grace_secs.unwrap_or(5),
            min_output_bytes: r.min_output_bytes.unwrap_or(100_000_000),
            min_backup_bytes_bluray: r.min_backup_bytes_bluray.unwrap_or(1_000_000_000),
            min_backup_bytes_dvd: r.min_backup_bytes_dvd.unwrap_or(100_000_000),
            progress_save_interval_secs: r.progress_save_interval_secs.unwrap_or(5),
        };

        let i = file.identification.unwrap_or_default();
        let identification = IdentificationSettings {
            runtime_tolerance_secs: i.runtime_tolerance_secs.unwrap_or(300),
            confidence_threshold: i.confidence_threshold.unwrap_or(75),
            high_confidence_cutoff: i.high_confidence_cutoff.unwrap_or(90),
            decoy_min_tracks: i.decoy_min_tracks.unwrap_or(10),
            decoy_epsilon_secs: i.decoy_epsilon_secs.unwrap_or(120),
            tv_min_episode_secs: i.tv_min_episode_secs.unwrap_or(1200),
            movie_min_secs: i.movie_min_secs.unwrap_or(2700),
            tv_track_threshold: i.tv_track_threshold.unwrap_or(3),
            angle_epsilon_secs: i.angle_epsilon_secs.unwrap_or(5),
            uncertain_suppress_secs: i.uncertain_suppress_secs.unwrap_or(60),
        };

        let l = file.label.unwrap_or_default();
        let defaults = LabelRules::default();
        let label_rules = LabelRules {
            studio_tokens: l.studio_tokens.unwrap_or(defaults.studio_tokens),
            region_tokens: l.region_tokens.unwrap_or(defaults.region_tokens),
        };

        let pv = file.providers.unwrap_or_default();
        let providers = ProviderSettings {
            radarr: pv.radarr.map(|a| ArrEndpoint {
                url: a.url,
                api_key: a.api_key,
            }),
            sonarr: pv.sonarr.map(|a| ArrEndpoint {
                url: a.url,
                api_key: a.api_key,
            }),
            tmdb_api_key: pv.tmdb_api_key,
            timeout_secs: pv.timeout_secs.unwrap_or(10),
        };

        let b = file.background.unwrap_or_default();
        let background = BackgroundSettings {
            digest_interval_hours: b.digest_interval_hours.unwrap_or(168),
            event_retention_days: b.event_retention_days.unwrap_or(90),
            prune_interval_hours: b.prune_interval_hours.unwrap_or(24),
        };

        Ok(Self {
            db_dir,
            device,
            makemkv_bin,
            ffprobe_bin,
            paths,
            ripping,
            identification,
            label_rules,
            providers,
            background,
        })
    }

    pub fn history_db_path(&self) -> PathBuf {
        self.db_dir.join("history.db")
    }

    pub fn review_db_path(&self) -> PathBuf {
        self.db_dir.join("review_queue.db")
    }

    pub fn job_snapshot_path(&self) -> PathBuf {
        self.db_dir.join("current_job.json")
    }
}

/// Where rips, finished media and temporary areas live.
#[derive(Debug, Clone)]
pub struct LibraryPaths {
    /// Raw tool output before post-processing.
    pub raw: PathBuf,
    pub movies: PathBuf,
    pub tv: PathBuf,
    /// Holding area for rips needing manual identification.
    pub review: PathBuf,
    /// Temporary area for full-disc backups.
    pub backup: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RippingSettings {
    pub strategy: RipStrategy,
    pub auto_rip: bool,
    pub hands_free: bool,
    pub countdown_secs: u64,
    pub eject_when_done: bool,
    pub main_feature_only: bool,
    pub stall_timeout_secs: u64,
    pub kill_grace_secs: u64,
    /// Smallest plausible output file; anything below this on a "successful"
    /// run counts as a silent failure.
    pub min_output_bytes: u64,
    pub min_backup_bytes_bluray: u64,
    pub min_backup_bytes_dvd: u64,
    pub progress_save_interval_secs: u64,
}

impl Default for RippingSettings {
    fn default() -> Self {
        Self {
            strategy: RipStrategy::Smart,
            auto_rip: true,
            hands_free: false,
            countdown_secs: 20,
            eject_when_done: true,
            main_feature_only: true,
            stall_timeout_secs: 600,
            kill_grace_secs: 5,
            min_output_bytes: 100_000_000,
            min_backup_bytes_bluray: 1_000_000_000,
            min_backup_bytes_dvd: 100_000_000,
            progress_save_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdentificationSettings {
    pub runtime_tolerance_secs: u64,
    pub confidence_threshold: u8,
    pub high_confidence_cutoff: u8,
    /// Feature-length tracks clustered this tightly, this many times, mean
    /// decoy-playlist protection.
    pub decoy_min_tracks: usize,
    pub decoy_epsilon_secs: u64,
    pub tv_min_episode_secs: u64,
    pub movie_min_secs: u64,
    /// Episode-band track count must exceed this to classify as TV.
    pub tv_track_threshold: usize,
    /// Same-duration window treated as alternate angles of one feature.
    pub angle_epsilon_secs: u64,
    /// Delay before an uncertain-id notification fires; corrections within
    /// the window suppress it.
    pub uncertain_suppress_secs: u64,
}

impl Default for IdentificationSettings {
    fn default() -> Self {
        Self {
            runtime_tolerance_secs: 300,
            confidence_threshold: 75,
            high_confidence_cutoff: 90,
            decoy_min_tracks: 10,
            decoy_epsilon_secs: 120,
            tv_min_episode_secs: 1200,
            movie_min_secs: 2700,
            tv_track_threshold: 3,
            angle_epsilon_secs: 5,
            uncertain_suppress_secs: 60,
        }
    }
}

/// Metadata provider endpoints. Presence decides which providers run;
/// priority is Radarr, Sonarr, then TMDB.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub radarr: Option<ArrEndpoint>,
    pub sonarr: Option<ArrEndpoint>,
    pub tmdb_api_key: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ArrEndpoint {
    pub url: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct BackgroundSettings {
    pub digest_interval_hours: u64,
    pub event_retention_days: u64,
    pub prune_interval_hours: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_temp_db_dir() -> TempDir {
        TempDir::new().unwrap()
    }

    #[test]
    fn test_resolve_cli_only() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            device: Some("/dev/sr1".to_string()),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.db_dir, temp_dir.path());
        assert_eq!(config.device, "/dev/sr1");
        assert_eq!(config.makemkv_bin, "makemkvcon");
        assert_eq!(config.ripping.strategy, RipStrategy::Smart);
        assert_eq!(config.ripping.countdown_secs, 20);
        assert_eq!(config.identification.confidence_threshold, 75);
        assert_eq!(config.background.digest_interval_hours, 168);
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            device: Some("/dev/sr0".to_string()),
            ..Default::default()
        };
        let file = FileConfig {
            device: Some("/dev/sr2".to_string()),
            ripping: Some(RippingConfig {
                strategy: Some("direct_only".to_string()),
                countdown_secs: Some(5),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file)).unwrap();

        assert_eq!(config.device, "/dev/sr2");
        assert_eq!(config.ripping.strategy, RipStrategy::DirectOnly);
        assert_eq!(config.ripping.countdown_secs, 5);
        // CLI value used when TOML doesn't specify
        assert!(config.ripping.auto_rip);
    }

    #[test]
    fn test_resolve_missing_db_dir_error() {
        let cli = CliConfig::default();
        let result = AppConfig::resolve(&cli, None);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("db_dir must be specified"));
    }

    #[test]
    fn test_resolve_nonexistent_db_dir_error() {
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/nonexistent/path/that/should/not/exist")),
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("does not exist"));
    }

    #[test]
    fn test_resolve_invalid_strategy_error() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        };
        let file = FileConfig {
            ripping: Some(RippingConfig {
                strategy: Some("aggressive".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli, Some(file));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Unknown rip strategy"));
    }

    #[test]
    fn test_paths_default_under_media_root() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            media_root: Some(PathBuf::from("/srv/media")),
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli, None).unwrap();
        assert_eq!(config.paths.raw, PathBuf::from("/srv/media/rips/raw"));
        assert_eq!(config.paths.movies, PathBuf::from("/srv/media/movies"));
        assert_eq!(config.paths.backup, PathBuf::from("/srv/media/rips/backup"));
    }

    #[test]
    fn test_db_path_helpers() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.history_db_path(), temp_dir.path().join("history.db"));
        assert_eq!(
            config.review_db_path(),
            temp_dir.path().join("review_queue.db")
        );
        assert_eq!(
            config.job_snapshot_path(),
            temp_dir.path().join("current_job.json")
        );
    }
}
