//! Core environment trait and shared types.
//!
//! Every simulator backend (the in-process kinematic table, a remote physics
//! server, ...) implements the [`Environment`] trait so that the episode
//! collector can drive rollouts uniformly.

use image::RgbImage;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::policy::Action;

// ---------------------------------------------------------------------------
// Raw simulator state
// ---------------------------------------------------------------------------

/// Named physical quantities reported by the simulator after every reset or
/// step. Read by the phase machine, never by the learner.
#[derive(Debug, Clone, PartialEq)]
pub struct RawState {
    /// Centre of the manipulated object (the cube).
    pub object_pos: Vector3<f64>,
    /// End-effector position.
    pub eef_pos: Vector3<f64>,
    /// Finger joint positions. Its norm shrinks as the jaws close.
    pub gripper_qpos: Vec<f64>,
    /// Magnitude of the contact force measured at the gripper.
    pub contact_force: f64,
    /// Fixed landmark of the task, e.g. the bin centre. Only present for
    /// variants that deliver the object somewhere.
    pub landmark: Option<Vector3<f64>>,
}

impl RawState {
    /// Euclidean norm of the finger joint positions.
    pub fn gripper_opening(&self) -> f64 {
        self.gripper_qpos.iter().map(|q| q * q).sum::<f64>().sqrt()
    }
}

// ---------------------------------------------------------------------------
// Observations
// ---------------------------------------------------------------------------

/// A camera observation stored channel-first (`C x H x W`) as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageObs {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub data: Vec<u8>,
}

impl ImageObs {
    /// An all-black image of the given shape.
    pub fn blank(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
            data: vec![0; channels * height * width],
        }
    }

    /// Convert an interleaved RGB image into channel-first layout.
    pub fn from_rgb(img: &RgbImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let mut data = vec![0u8; 3 * h * w];
        for (x, y, px) in img.enumerate_pixels() {
            for c in 0..3 {
                data[c * h * w + y as usize * w + x as usize] = px.0[c];
            }
        }
        Self {
            channels: 3,
            height: h,
            width: w,
            data,
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        [self.channels, self.height, self.width]
    }
}

/// What the learner sees: a low-dimensional proprioceptive vector plus an
/// image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub lowdim: Vec<f32>,
    pub image: ImageObs,
}

/// Result of `Environment::reset`.
#[derive(Debug, Clone)]
pub struct ResetOutcome {
    pub raw: RawState,
    pub obs: Observation,
}

/// Result of `Environment::step`.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub raw: RawState,
    pub obs: Observation,
    pub reward: f64,
    pub done: bool,
    /// Arbitrary extra information from the simulator.
    pub info: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Environment trait
// ---------------------------------------------------------------------------

/// The simulator contract.
///
/// Calls are awaited one at a time by the collector; implementations never
/// see overlapping requests.
#[allow(async_fn_in_trait)]
pub trait Environment: Send + Sync {
    /// Start a new rollout.
    async fn reset(&mut self) -> anyhow::Result<ResetOutcome>;

    /// Apply a 4-component action (`dx, dy, dz, gripper`, each in `[-1, 1]`).
    async fn step(&mut self, action: &Action) -> anyhow::Result<StepOutcome>;

    /// Render the current scene from each named camera.
    async fn render(
        &mut self,
        width: u32,
        height: u32,
        cameras: &[String],
    ) -> anyhow::Result<Vec<RgbImage>>;

    /// The environment's time limit in steps.
    fn max_episode_steps(&self) -> usize;
}
