//! Pickscript: scripted pick-and-place demonstration collection.
//!
//! Subcommands:
//!
//! - `collect`  -- Run the scripted policy until enough successful episodes
//!   are stored, then save the store
//! - `snapshot` -- Reset the environment, idle briefly, and record a GIF
//! - `inspect`  -- Summarise a saved episode store

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pickscript::config::DemoConfig;
use pickscript::env::{AnyEnv, Environment, KinematicTableEnv, RemoteSimEnv, ResetRequest};
use pickscript::policy::{Action, TaskVariant};
use pickscript::trajectory::{CollectionPlan, EpisodeCollector, EpisodeStore};
use pickscript::video::VideoRecorder;

/// Zero-action steps taken by `snapshot` before filming.
const SNAPSHOT_STEPS: usize = 10;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Scripted pick-and-place demonstrations for offline RL.
#[derive(Parser)]
#[command(name = "pickscript", version, about)]
struct Cli {
    /// Path to a JSON configuration file (uses defaults if not provided).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the task variant.
    #[arg(long, global = true)]
    task: Option<TaskVariant>,

    /// Base URL of a remote simulator; the kinematic table is used otherwise.
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect successful demonstrations and save them.
    Collect {
        /// Number of successful episodes to collect.
        #[arg(long)]
        episodes: Option<usize>,

        /// Random seed for the environment and action noise.
        #[arg(long)]
        seed: Option<u64>,

        /// Path to save the episode store.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Reset the environment, idle, and record the cameras to a GIF.
    Snapshot {
        /// Where to write the GIF.
        #[arg(long, default_value = "videos/snapshot.gif")]
        output: PathBuf,
    },

    /// Inspect a saved episode store.
    Inspect {
        /// Path to the episode store.
        #[arg(default_value = "demos.bin")]
        path: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Entrypoint
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing (reads RUST_LOG env var, defaults to info).
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str::<DemoConfig>(&text)
                .with_context(|| format!("Failed to parse config from {}", path.display()))?
        }
        None => DemoConfig::default(),
    };
    if let Some(task) = cli.task {
        config.task = task;
    }
    if let Some(url) = cli.server {
        config.env.server_url = Some(url);
    }

    match cli.command {
        Commands::Collect {
            episodes,
            seed,
            output,
        } => {
            if let Some(n) = episodes {
                config.episodes = n;
            }
            if let Some(s) = seed {
                config.seed = s;
            }
            if let Some(o) = output {
                config.output = o;
            }
            config.validate()?;
            cmd_collect(&config).await
        }
        Commands::Snapshot { output } => {
            config.validate()?;
            cmd_snapshot(&config, &output).await
        }
        Commands::Inspect { path } => cmd_inspect(&path),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_collect(config: &DemoConfig) -> Result<()> {
    tracing::info!(
        task = %config.task,
        episodes = config.episodes,
        episode_length = config.episode_length,
        seed = config.seed,
        "Collecting demonstrations"
    );

    let mut env = create_env(config);
    let mut store = EpisodeStore::new(config.episodes, config.episode_length);
    let mut recorder = VideoRecorder::new(
        config.save_video.then(|| config.video_dir.clone()),
        config.env.render_cameras.clone(),
        config.env.render_size,
    );
    let mut collector = EpisodeCollector::from_config(config);

    let summary = collector
        .collect(
            &mut env,
            &mut store,
            &mut recorder,
            &CollectionPlan::from_config(config),
        )
        .await?;

    store.save_to_file(&config.output)?;
    tracing::info!(
        attempts = summary.attempts,
        successes = summary.successes,
        success_rate = format!("{:.1}%", summary.success_rate() * 100.0),
        path = %config.output.display(),
        "Collection finished"
    );
    Ok(())
}

async fn cmd_snapshot(config: &DemoConfig, output: &Path) -> Result<()> {
    let mut env = create_env(config);
    env.reset().await.context("Failed to reset environment")?;

    let dir = output.parent().map(Path::to_path_buf).unwrap_or_default();
    let name = output
        .file_name()
        .and_then(|n| n.to_str())
        .context("Snapshot output needs a file name")?;
    let mut recorder = VideoRecorder::new(
        Some(dir),
        config.env.render_cameras.clone(),
        config.env.render_size,
    );
    recorder.begin(name);

    for _ in 0..SNAPSHOT_STEPS {
        env.step(&Action::IDLE).await?;
        let size = recorder.frame_size();
        let views = env.render(size, size, recorder.cameras()).await?;
        recorder.record(views);
    }

    match recorder.finish() {
        Some(path) => tracing::info!(path = %path.display(), "Snapshot written"),
        None => tracing::warn!("No snapshot written"),
    }
    Ok(())
}

fn cmd_inspect(path: &Path) -> Result<()> {
    let store = EpisodeStore::load_from_file(path)?;

    println!("Episode store: {}", path.display());
    println!("  Capacity: {}", store.capacity());
    println!("  Episodes: {}", store.len());
    println!("  Episode length: {}", store.episode_length());
    println!("  Transitions: {}", store.num_transitions());
    println!("  Full: {}", store.is_full());
    println!();

    for (slot, ep) in store.chronological().enumerate() {
        println!(
            "  [{slot}] {id} {task} attempt {attempt} at {at}",
            id = ep.short_id(),
            task = ep.task,
            attempt = ep.attempt,
            at = ep.collected_at.format("%Y-%m-%d %H:%M:%S UTC"),
        );
        println!(
            "      return {:.3}, peak reward {:.3}",
            ep.total_reward(),
            ep.peak_reward()
        );
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Environment construction
// ---------------------------------------------------------------------------

fn create_env(config: &DemoConfig) -> AnyEnv {
    match &config.env.server_url {
        Some(url) => {
            tracing::info!(url = %url, "Using remote simulator");
            AnyEnv::Remote(RemoteSimEnv::new(
                url,
                ResetRequest {
                    task: config.task,
                    horizon: config.horizon,
                    image_size: config.image_size,
                    camera: config.env.camera.clone(),
                },
            ))
        }
        None => {
            tracing::info!("Using kinematic table simulator");
            AnyEnv::Kinematic(KinematicTableEnv::new(
                config.task,
                config.horizon,
                config.image_size,
                config.seed,
            ))
        }
    }
}
