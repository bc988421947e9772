//! Simulator abstractions and concrete backends.
//!
//! Every backend implements the [`Environment`] trait so that the episode
//! collector can drive it uniformly.
//!
//! Included backends:
//! - **Kinematic table** ([`kinematic`]) -- an in-process model of the
//!   gripper, cube and bin. Deterministic per seed; used for tests and dry
//!   runs.
//! - **Remote simulator** ([`remote`]) -- a physics simulator behind a small
//!   JSON-over-HTTP protocol.

pub mod kinematic;
pub mod remote;
pub mod traits;

pub use kinematic::KinematicTableEnv;
pub use remote::{RemoteSimEnv, ResetRequest};
pub use traits::{Environment, ImageObs, Observation, RawState, ResetOutcome, StepOutcome};

use image::RgbImage;

use crate::policy::Action;

// ---------------------------------------------------------------------------
// AnyEnv
// ---------------------------------------------------------------------------

/// The backend chosen at startup. `Environment` has async methods, so it is
/// dispatched by enum rather than through `dyn`.
pub enum AnyEnv {
    Kinematic(KinematicTableEnv),
    Remote(RemoteSimEnv),
}

impl Environment for AnyEnv {
    async fn reset(&mut self) -> anyhow::Result<ResetOutcome> {
        match self {
            Self::Kinematic(e) => e.reset().await,
            Self::Remote(e) => e.reset().await,
        }
    }

    async fn step(&mut self, action: &Action) -> anyhow::Result<StepOutcome> {
        match self {
            Self::Kinematic(e) => e.step(action).await,
            Self::Remote(e) => e.step(action).await,
        }
    }

    async fn render(
        &mut self,
        width: u32,
        height: u32,
        cameras: &[String],
    ) -> anyhow::Result<Vec<RgbImage>> {
        match self {
            Self::Kinematic(e) => e.render(width, height, cameras).await,
            Self::Remote(e) => e.render(width, height, cameras).await,
        }
    }

    fn max_episode_steps(&self) -> usize {
        match self {
            Self::Kinematic(e) => e.max_episode_steps(),
            Self::Remote(e) => e.max_episode_steps(),
        }
    }
}
