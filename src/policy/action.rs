//! Turning a target position into a bounded, noise-perturbed action.

use nalgebra::Vector3;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::phase::Gripper;

/// Proportional gain applied to the displacement.
pub const DISPLACEMENT_GAIN: f64 = 5.0;
/// Half-width of the uniform exploration noise on each translational axis.
pub const TRANSLATION_NOISE: f64 = 0.15;
/// Half-width of the uniform lateral jitter while lifting.
pub const LIFT_JITTER: f64 = 0.25;
/// Vertical command while lifting.
pub const LIFT_ASCENT: f64 = 1.0;

/// A 4-component command: `dx, dy, dz, gripper`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Action(pub [f64; 4]);

impl Action {
    /// The command issued once after reset to let the scene settle.
    pub const SETTLE: Action = Action([0.0, 0.0, 0.0, 1.0]);
    pub const IDLE: Action = Action([0.0; 4]);

    pub fn translation(&self) -> Vector3<f64> {
        Vector3::new(self.0[0], self.0[1], self.0[2])
    }

    pub fn gripper(&self) -> f64 {
        self.0[3]
    }

    pub fn max_abs(&self) -> f64 {
        self.0.iter().fold(0.0_f64, |m, c| m.max(c.abs()))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn to_f32(&self) -> [f32; 4] {
        self.0.map(|c| c as f32)
    }
}

/// Synthesize the action for one step.
///
/// The displacement is scaled, perturbed and clipped per axis. In lift mode
/// the lateral components are replaced by fresh jitter and the vertical one
/// by full ascent. Three noise draws are always taken; lift mode takes two
/// more.
///
/// # Panics
///
/// If any component of the result exceeds 1 in magnitude.
pub fn synthesize<R: Rng + ?Sized>(
    displacement: &Vector3<f64>,
    gripper: Gripper,
    lift_active: bool,
    rng: &mut R,
) -> Action {
    let mut translation = displacement * DISPLACEMENT_GAIN;
    for c in translation.iter_mut() {
        *c += rng.gen_range(-TRANSLATION_NOISE..TRANSLATION_NOISE);
        *c = c.clamp(-1.0, 1.0);
    }

    let action = if lift_active {
        let jx = rng.gen_range(-LIFT_JITTER..LIFT_JITTER);
        let jy = rng.gen_range(-LIFT_JITTER..LIFT_JITTER);
        Action([jx, jy, LIFT_ASCENT, gripper.command()])
    } else {
        Action([translation.x, translation.y, translation.z, gripper.command()])
    };

    assert!(
        action.max_abs() <= 1.0,
        "synthesized action out of bounds: {:?}",
        action.0
    );
    action
}
