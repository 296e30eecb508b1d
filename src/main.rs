use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ripmill::background::BackgroundRunner;
use ripmill::config::{AppConfig, CliConfig, FileConfig};
use ripmill::history::{ActivityLogger, HistoryStore, SqliteHistoryStore};
use ripmill::identify::{
    IdentificationEngine, MetadataProvider, RadarrProvider, SonarrProvider, TmdbProvider,
};
use ripmill::makemkv::MakemkvClient;
use ripmill::notify::ChannelNotifier;
use ripmill::probe::FfprobeProbe;
use ripmill::review::SqliteReviewQueueStore;
use ripmill::ripper::{DiscTool, FileJobStore, FsLibrary, RipOrchestrator};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")"))]
struct CliArgs {
    /// Path to a TOML config file. Values there override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory for the job snapshot, history and review databases.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Optical drive device path.
    #[clap(long)]
    pub device: Option<String>,

    /// Path to the makemkvcon binary.
    #[clap(long)]
    pub makemkv_bin: Option<String>,

    /// Path to the ffprobe binary.
    #[clap(long)]
    pub ffprobe_bin: Option<String>,

    /// Root under which default library paths are derived.
    #[clap(long, value_parser = parse_path)]
    pub media_root: Option<PathBuf>,

    /// Scan the drive immediately on startup instead of waiting for the
    /// insertion hook.
    #[clap(long, default_value_t = false)]
    pub scan_on_start: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    info!(
        "ripmill {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH")
    );

    let file_config = cli_args
        .config
        .as_ref()
        .map(|path| FileConfig::load(path))
        .transpose()?;
    let cli = CliConfig {
        db_dir: cli_args.db_dir,
        device: cli_args.device,
        makemkv_bin: cli_args.makemkv_bin,
        ffprobe_bin: cli_args.ffprobe_bin,
        media_root: cli_args.media_root,
    };
    let config = AppConfig::resolve(&cli, file_config)?;

    info!("Opening history database at {:?}...", config.history_db_path());
    let history: Arc<dyn HistoryStore> =
        Arc::new(SqliteHistoryStore::new(&config.history_db_path())?);
    ActivityLogger::new(history.clone()).service_started();
    let review = Arc::new(SqliteReviewQueueStore::new(&config.review_db_path())?);
    let job_store = Arc::new(FileJobStore::new(config.job_snapshot_path()));

    // Providers in priority order: local library providers first, generic
    // search last.
    let mut providers: Vec<Arc<dyn MetadataProvider>> = Vec::new();
    if let Some(radarr) = &config.providers.radarr {
        info!("Radarr provider configured at {}", radarr.url);
        providers.push(Arc::new(RadarrProvider::new(
            radarr.url.clone(),
            radarr.api_key.clone(),
            config.providers.timeout_secs,
        )?));
    }
    if let Some(sonarr) = &config.providers.sonarr {
        info!("Sonarr provider configured at {}", sonarr.url);
        providers.push(Arc::new(SonarrProvider::new(
            sonarr.url.clone(),
            sonarr.api_key.clone(),
            config.providers.timeout_secs,
        )?));
    }
    if let Some(api_key) = &config.providers.tmdb_api_key {
        info!("TMDB provider configured");
        providers.push(Arc::new(TmdbProvider::new(
            api_key.clone(),
            config.providers.timeout_secs,
        )?));
    }
    let engine = Arc::new(IdentificationEngine::new(
        providers,
        config.identification.clone(),
        config.label_rules.clone(),
    ));

    let tool: Arc<dyn DiscTool> = Arc::new(MakemkvClient::new(config.makemkv_bin.clone()));
    let probe = Arc::new(FfprobeProbe::new(config.ffprobe_bin.clone()));
    let notifier = Arc::new(ChannelNotifier::new(64));
    let library = Arc::new(FsLibrary::new(
        config.paths.movies.clone(),
        config.paths.tv.clone(),
        config.paths.review.clone(),
    ));

    let orchestrator = RipOrchestrator::new(
        config.clone(),
        tool,
        engine,
        probe,
        job_store,
        history.clone(),
        review,
        notifier.clone(),
        library,
    );

    // A rip interrupted by a restart picks up from its snapshot.
    orchestrator.clone().recover_on_startup().await?;

    // Notification delivery is an external concern; the default consumer
    // just surfaces events in the log.
    let mut events = notifier.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!("notification: {}", serde_json::to_string(&event).unwrap_or_default());
        }
    });

    let shutdown = tokio_util::sync::CancellationToken::new();
    let background = BackgroundRunner::new(history, notifier, config.background.clone());
    tokio::spawn(background.run(shutdown.clone()));

    if cli_args.scan_on_start {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.scan_and_identify().await {
                error!("startup scan failed: {e:#}");
            }
        });
    }

    info!("Ready; watching {} for rip jobs", config.device);
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    shutdown.cancel();
    Ok(())
}
