use std::path::PathBuf;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::policy::TaskVariant;

/// Complete configuration for a demonstration-collection run. Read once at
/// startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Which task to script.
    pub task: TaskVariant,
    /// Environment time limit in steps (default: 200).
    pub horizon: usize,
    /// Steps per rollout (default: 200).
    pub episode_length: usize,
    /// Number of successful episodes to collect; also the store capacity
    /// (default: 10).
    pub episodes: usize,
    /// Square camera resolution of image observations (default: 84).
    pub image_size: u32,
    /// Fraction of the rollout after which steps are flagged sparse
    /// (default: 0.8).
    pub sparse_prop: f64,
    /// Record every Nth attempt; 0 disables (default: 10).
    pub record_frequency: usize,
    /// Seed for every random source (default: 1).
    pub seed: u64,
    /// Write GIFs of recorded attempts (default: true).
    pub save_video: bool,
    /// Where GIFs go.
    pub video_dir: PathBuf,
    /// Where the episode store is written.
    pub output: PathBuf,
    /// Give up after this many attempts. Unbounded when absent.
    pub max_attempts: Option<usize>,
    pub env: EnvConfig,
}

/// Simulator backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    /// Base URL of a remote simulator. The in-process kinematic table is used
    /// when absent.
    pub server_url: Option<String>,
    /// Camera providing image observations.
    pub camera: String,
    /// Cameras tiled into each recorded video frame.
    pub render_cameras: Vec<String>,
    /// Square resolution of recorded video frames (default: 256).
    pub render_size: u32,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            task: TaskVariant::BlockedPickPlace,
            horizon: 200,
            episode_length: 200,
            episodes: 10,
            image_size: 84,
            sparse_prop: 0.8,
            record_frequency: 10,
            seed: 1,
            save_video: true,
            video_dir: PathBuf::from("videos"),
            output: PathBuf::from("demos.bin"),
            max_attempts: None,
            env: EnvConfig::default(),
        }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            camera: "agentview".into(),
            render_cameras: vec!["agentview".into(), "sideview".into()],
            render_size: 256,
        }
    }
}

impl DemoConfig {
    /// Reject settings no run could use.
    pub fn validate(&self) -> Result<()> {
        if self.episode_length == 0 {
            bail!("episode_length must be positive");
        }
        if self.episodes == 0 {
            bail!("episodes must be positive");
        }
        if self.image_size == 0 {
            bail!("image_size must be positive");
        }
        if !(0.0..=1.0).contains(&self.sparse_prop) {
            bail!("sparse_prop must lie in [0, 1], got {}", self.sparse_prop);
        }
        Ok(())
    }
}
