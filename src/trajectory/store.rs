//! Fixed-capacity circular store of accepted episodes.
//!
//! Episodes are appended whole; once the store is full the oldest slot is
//! overwritten. The whole store is persisted as a single `bincode` snapshot.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use super::types::Episode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeStore {
    capacity: usize,
    episode_length: usize,
    episodes: Vec<Episode>,
    /// Slot the next episode is written to.
    idx: usize,
    full: bool,
}

impl EpisodeStore {
    pub fn new(capacity: usize, episode_length: usize) -> Self {
        Self {
            capacity,
            episode_length,
            episodes: Vec::with_capacity(capacity),
            idx: 0,
            full: false,
        }
    }

    /// Append one whole episode.
    ///
    /// Fails if the episode does not have exactly `episode_length` steps or
    /// if the store has no capacity.
    pub fn add(&mut self, episode: Episode) -> Result<()> {
        if self.capacity == 0 {
            bail!("episode store has zero capacity");
        }
        if episode.len() != self.episode_length {
            bail!(
                "episode has {} steps, store expects {}",
                episode.len(),
                self.episode_length
            );
        }

        if self.episodes.len() < self.capacity {
            self.episodes.push(episode);
        } else {
            self.episodes[self.idx] = episode;
        }
        self.idx = (self.idx + 1) % self.capacity;
        self.full = self.full || self.idx == 0;
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn episode_length(&self) -> usize {
        self.episode_length
    }

    pub fn idx(&self) -> usize {
        self.idx
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    /// Episodes in slot order.
    pub fn episodes(&self) -> &[Episode] {
        &self.episodes
    }

    /// Episodes oldest first.
    pub fn chronological(&self) -> impl Iterator<Item = &Episode> {
        let split = if self.full { self.idx } else { 0 };
        self.episodes[split..].iter().chain(self.episodes[..split].iter())
    }

    pub fn num_transitions(&self) -> usize {
        self.episodes.iter().map(Episode::len).sum()
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Write the whole store as one binary snapshot.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        bincode::serialize_into(BufWriter::new(file), self)
            .context("Failed to serialize episode store")?;
        tracing::info!(
            path = %path.display(),
            episodes = self.len(),
            transitions = self.num_transitions(),
            "Saved episode store"
        );
        Ok(())
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let store: Self = bincode::deserialize_from(BufReader::new(file))
            .context("Failed to deserialize episode store")?;
        tracing::info!(
            path = %path.display(),
            episodes = store.len(),
            "Loaded episode store"
        );
        Ok(store)
    }
}
