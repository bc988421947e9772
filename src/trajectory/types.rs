//! Transition, episode and rollout records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::env::{ImageObs, Observation};
use crate::policy::{Phase, TaskVariant};

/// A step reward above this marks the rollout as successful.
pub const SUCCESS_REWARD: f64 = 0.99;

pub fn is_success_reward(reward: f64) -> bool {
    reward > SUCCESS_REWARD
}

/// Tolerance absorbing float error in `sparse_prop * episode_length`.
const SPARSE_EPSILON: f64 = 1e-9;

/// First step index flagged sparse: `ceil(sparse_prop * episode_length)`.
pub fn sparse_boundary(episode_length: usize, sparse_prop: f64) -> usize {
    (sparse_prop * episode_length as f64 - SPARSE_EPSILON).ceil().max(0.0) as usize
}

/// 1.0 for steps at or past `sparse_prop * episode_length`, else 0.0.
pub fn sparse_flag(step: usize, episode_length: usize, sparse_prop: f64) -> f32 {
    if step >= sparse_boundary(episode_length, sparse_prop) {
        1.0
    } else {
        0.0
    }
}

/// `done`, except on the step that hits the time limit, where it is 0 so that
/// truncation is not mistaken for termination.
pub fn done_no_max(done: bool, step: usize, max_episode_steps: usize) -> f32 {
    if step + 1 == max_episode_steps {
        0.0
    } else if done {
        1.0
    } else {
        0.0
    }
}

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

/// One recorded step. Flags are stored as floats, ready for masking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub lowdim: Vec<f32>,
    pub image: ImageObs,
    pub action: [f32; 4],
    pub reward: f64,
    pub sparse: f32,
    pub next_lowdim: Vec<f32>,
    pub next_image: ImageObs,
    pub done: f32,
    pub done_no_max: f32,
}

impl Transition {
    pub fn new(
        obs: Observation,
        action: [f32; 4],
        reward: f64,
        sparse: f32,
        next: Observation,
        done: bool,
        done_no_max: f32,
    ) -> Self {
        Self {
            lowdim: obs.lowdim,
            image: obs.image,
            action,
            reward,
            sparse,
            next_lowdim: next.lowdim,
            next_image: next.image,
            done: if done { 1.0 } else { 0.0 },
            done_no_max,
        }
    }
}

// ---------------------------------------------------------------------------
// Rollout
// ---------------------------------------------------------------------------

/// Everything one attempt produced, successful or not.
#[derive(Debug, Clone)]
pub struct Rollout {
    pub transitions: Vec<Transition>,
    /// The phase that drove each step.
    pub phases: Vec<Phase>,
    pub total_reward: f64,
    pub success: bool,
}

// ---------------------------------------------------------------------------
// Episode
// ---------------------------------------------------------------------------

/// A successful rollout, as committed to the episode store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    /// Unique identifier (UUID v4).
    pub id: String,
    pub task: TaskVariant,
    /// Zero-based attempt number that produced this episode.
    pub attempt: usize,
    pub collected_at: DateTime<Utc>,
    pub transitions: Vec<Transition>,
}

impl Episode {
    pub fn new(task: TaskVariant, attempt: usize, transitions: Vec<Transition>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task,
            attempt,
            collected_at: Utc::now(),
            transitions,
        }
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn total_reward(&self) -> f64 {
        self.transitions.iter().map(|t| t.reward).sum()
    }

    pub fn peak_reward(&self) -> f64 {
        self.transitions
            .iter()
            .map(|t| t.reward)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// First eight characters of the id, or the whole id if shorter.
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }

    /// Whether any step crossed the success threshold.
    pub fn is_successful(&self) -> bool {
        self.transitions.iter().any(|t| is_success_reward(t.reward))
    }
}
