use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use sha2::{Digest, Sha256};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gridforge_cli::api::create_router;
use gridforge_cli::state::AppState;
use gridforge_core::job::format_elapsed;
use gridforge_core::{
    create_bot_client, create_job_store, load_config, validate_config, validate_for_generation,
    BannedWordValidator, Config, DiscordTransport, JobConfig, JobError, JobRunner, Progress,
    Transport,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "gridforge", version, about = "Bulk image generation through chat bots")]
struct Cli {
    /// Configuration file
    #[arg(long, short, env = "GRIDFORGE_CONFIG", default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create or resume an album and generate its images
    Generate(GenerateArgs),
    /// Serve albums and the status API over HTTP
    Serve,
}

/// Command line overrides of the `[generation]` and `[output]` sections.
#[derive(Debug, Args, Default)]
struct GenerateArgs {
    /// Album to create or resume
    #[arg(long)]
    album: Option<String>,
    /// Prompt or prompt file (repeatable; replaces the configured list)
    #[arg(long = "prompt", short = 'p')]
    prompts: Vec<String>,
    #[arg(long)]
    upscale: bool,
    #[arg(long)]
    variation: bool,
    #[arg(long)]
    download: bool,
    #[arg(long)]
    thumbnail: bool,
    /// Parallel lanes (0 = bot maximum)
    #[arg(long)]
    concurrency: Option<usize>,
}

impl GenerateArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(album) = &self.album {
            config.output.album = album.clone();
        }
        if !self.prompts.is_empty() {
            config.generation.prompts = self.prompts.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.generation.concurrency = concurrency;
        }
        config.generation.upscale |= self.upscale;
        config.generation.variation |= self.variation;
        config.output.download |= self.download;
        config.output.thumbnail |= self.thumbnail;
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    if let Err(e) = run(cli).await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run(cli: Cli) -> Result<()> {
    info!("Loading configuration from {:?}", cli.config);
    let mut config = load_config(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

    match cli.command {
        Command::Generate(args) => {
            args.apply(&mut config);
            generate(config).await
        }
        Command::Serve => serve(config).await,
    }
}

/// Short fingerprint of the effective configuration (secrets excluded).
fn config_fingerprint(config: &Config) -> String {
    let sanitized = gridforge_core::SanitizedConfig::from(config);
    let json = serde_json::to_string(&sanitized).unwrap_or_default();
    let hash = format!("{:x}", Sha256::digest(json.as_bytes()));
    hash[..16].to_string()
}

async fn generate(config: Config) -> Result<()> {
    validate_for_generation(&config).context("Configuration validation failed")?;
    info!(
        version = VERSION,
        config_hash = %config_fingerprint(&config),
        bot = config.generation.bot.as_str(),
        "Starting generation"
    );

    let transport: Arc<dyn Transport> = Arc::new(
        DiscordTransport::new(config.discord.clone()).context("Failed to create Discord transport")?,
    );
    let validator = Arc::new(BannedWordValidator::new(&config.generation.banned_words));
    let client = create_bot_client(
        config.generation.bot,
        Arc::clone(&transport),
        validator,
        &config.discord.channel,
    );
    let store = create_job_store(&config.store, &config.output.dir)
        .context("Failed to open job store")?;

    let job_config = JobConfig::from_config(&config);
    info!(album = %job_config.id, dir = %job_config.album_dir().display(), "Album");

    let runner = JobRunner::new(client, store)
        .with_downloader(transport)
        .with_progress(Arc::new(|progress: Progress| {
            info!(
                "Progress {:.1}% (about {} left)",
                progress.percentage,
                format_elapsed(progress.estimated)
            );
        }));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested, stopping generation");
        on_signal.cancel();
    });

    match runner.run_job(&job_config, &cancel).await {
        Ok(outcome) => {
            info!(
                album = %outcome.id,
                status = %outcome.status,
                percentage = outcome.percentage,
                images = outcome.images,
                "Generation ended"
            );
            Ok(())
        }
        Err(JobError::Aborted(e)) => {
            bail!("generation aborted, the account needs attention: {}", e)
        }
        Err(e) => Err(e).context("Generation failed"),
    }
}

async fn serve(config: Config) -> Result<()> {
    validate_config(&config).context("Configuration validation failed")?;
    info!(
        version = VERSION,
        config_hash = %config_fingerprint(&config),
        "Configuration loaded successfully"
    );
    info!("Output directory: {:?}", config.output.dir);

    let store = create_job_store(&config.store, &config.output.dir)
        .context("Failed to open job store")?;
    let addr = SocketAddr::new(config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config, store));
    let app = create_router(state);

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_generate_flags() {
        let cli = Cli::try_parse_from([
            "gridforge",
            "--config",
            "my.toml",
            "generate",
            "--album",
            "foxes",
            "-p",
            "a red fox",
            "-p",
            "prompts.txt",
            "--upscale",
            "--concurrency",
            "2",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("my.toml"));
        let Command::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(args.album.as_deref(), Some("foxes"));
        assert_eq!(args.prompts.len(), 2);
        assert!(args.upscale);
        assert!(!args.variation);
    }

    #[test]
    fn test_overrides_apply_to_config() {
        let mut config = Config::default();
        config.generation.prompts = vec!["configured".to_string()];
        config.generation.variation = true;

        let args = GenerateArgs {
            album: Some("foxes".to_string()),
            prompts: vec!["cli prompt".to_string()],
            download: true,
            concurrency: Some(1),
            ..Default::default()
        };
        args.apply(&mut config);

        assert_eq!(config.output.album, "foxes");
        assert_eq!(config.generation.prompts, vec!["cli prompt".to_string()]);
        assert_eq!(config.generation.concurrency, 1);
        assert!(config.generation.variation);
        assert!(config.output.download);
        assert!(!config.output.thumbnail);
    }

    #[test]
    fn test_fingerprint_ignores_token() {
        let mut a = Config::default();
        a.discord.token = "one".to_string();
        let mut b = Config::default();
        b.discord.token = "two".to_string();
        assert_eq!(config_fingerprint(&a), config_fingerprint(&b));
        assert_eq!(config_fingerprint(&a).len(), 16);
    }
}
