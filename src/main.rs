use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tracing_subscriber::{fmt, EnvFilter};

mod actions;
mod controller;
mod gif;
mod logs;
mod models;
mod preprocess;
mod samples;
mod server;
mod session;
mod settings;
mod source;
mod view;

use settings::{resolve_app_config, CliOverrides, EnvConfig, FileConfig};

#[derive(Debug, Parser)]
#[command(name = "celebrity_qa")]
#[command(about = "Celebrity detection and Q/A service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP service.
    Serve {
        #[arg(long)]
        listen: Option<String>,
        /// TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        samples_dir: Option<PathBuf>,
        #[arg(long)]
        model: Option<String>,
        /// Dotenv file to load before reading the environment.
        #[arg(long)]
        env_file: Option<PathBuf>,
    },
    /// Copy one image per celebrity folder of a dataset into the samples directory.
    SetupSamples {
        #[arg(long)]
        dataset: PathBuf,
        #[arg(long, default_value = "samples")]
        samples: PathBuf,
    },
    /// Assemble screenshots into a looping walkthrough GIF.
    MakeGif {
        #[arg(long, default_value = "demo_walkthrough.gif")]
        output: PathBuf,
        /// Directory the frame names are relative to.
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        #[arg(long, default_value_t = gif::DEFAULT_FRAME_MS)]
        frame_ms: u32,
        #[arg(long, default_value_t = gif::DEFAULT_WIDTH)]
        width: u32,
        /// Frames in order. Defaults to the walkthrough screenshots.
        frames: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { listen, config, samples_dir, model, env_file } => {
            let loaded = match &env_file {
                Some(path) => dotenvy::from_path(path).map(|_| path.clone()),
                None => dotenvy::dotenv(),
            };
            if let Err(e) = loaded {
                tracing::debug!(error = %e, "no dotenv file loaded");
            }

            let file = match config {
                Some(path) => FileConfig::load(&path)?,
                None => FileConfig::default(),
            };
            let cfg = resolve_app_config(&CliOverrides { listen, samples_dir, model }, &file, &EnvConfig::from_env());
            if cfg.api_key_missing() {
                tracing::warn!("{} not configured; detection and Q/A calls will fail", settings::API_KEY_ENV);
            }

            let metrics = match PrometheusBuilder::new().install_recorder() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::warn!(error = %e, "metrics recorder not installed");
                    None
                }
            };

            let addr: SocketAddr = cfg.listen.parse()?;
            let modules = models::Modules::load(&cfg);
            let library = samples::SampleLibrary::new(cfg.samples_dir.clone(), cfg.sample_exclusions.clone());
            tracing::info!(dir = %library.dir().display(), samples = library.list().len(), "sample gallery loaded");
            let controller = controller::Controller::new(modules, library, cfg.api_key_missing());
            session::spawn_idle_sweep(controller.store.clone(), cfg.session_idle_ttl);
            let state = server::AppState { controller: Arc::new(controller), metrics };
            server::serve(addr, state).await?;
        }
        Commands::SetupSamples { dataset, samples: out_dir } => {
            let copied = samples::populate_from_dataset(&dataset, &out_dir)?;
            tracing::info!(count = copied.len(), dir = %out_dir.display(), "all samples populated");
        }
        Commands::MakeGif { output, dir, frame_ms, width, frames } => {
            let frames: Vec<PathBuf> = if frames.is_empty() {
                gif::WALKTHROUGH_FRAMES.iter().map(|f| dir.join(f)).collect()
            } else {
                frames.iter().map(|f| dir.join(f)).collect()
            };
            let outcome = gif::assemble(&frames, &output, frame_ms, width)?;
            match outcome.written {
                Some(path) => tracing::info!(path = %path.display(), frames = outcome.frames, "gif created"),
                None => tracing::warn!("no images found to create gif"),
            }
        }
    }
    Ok(())
}
