//! Per-task parameterisation of the shared phase machine.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::phase::Phase;

/// The two supported pick tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TaskVariant {
    /// Pick a cube blocked against a wall and drop it into a bin.
    BlockedPickPlace,
    /// Pick a cube next to an indicator box and hold it aloft.
    IndicatorBoxBlock,
}

impl TaskVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BlockedPickPlace => "blocked_pick_place",
            Self::IndicatorBoxBlock => "indicator_box_block",
        }
    }

    /// The constants and topology for this variant.
    pub fn profile(self) -> VariantProfile {
        match self {
            Self::BlockedPickPlace => VariantProfile {
                entry: Entry::Staging(Vector3::new(0.0, 0.08, 0.82)),
                side_step_offset: 0.01,
                hover_height: 0.026,
                post_lift: PostLift::Deliver,
            },
            Self::IndicatorBoxBlock => VariantProfile {
                entry: Entry::ApproachSide,
                side_step_offset: 0.11,
                hover_height: 0.03,
                post_lift: PostLift::Halt,
            },
        }
    }
}

impl std::fmt::Display for TaskVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a rollout begins, and where a regrasp abort returns to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Entry {
    /// Reach a fixed point in the world frame first.
    Staging(Vector3<f64>),
    /// Reach the object's height at a lateral lane derived from its initial
    /// position.
    ApproachSide,
}

/// What happens once the object has been lifted clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostLift {
    /// Carry to the landmark, then open.
    Deliver,
    /// Freeze in place.
    Halt,
}

/// Everything that differs between variants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariantProfile {
    pub entry: Entry,
    /// Added to the object's y coordinate while side-stepping.
    pub side_step_offset: f64,
    /// Height above the object centre used while repositioning.
    pub hover_height: f64,
    pub post_lift: PostLift,
}

impl VariantProfile {
    pub fn entry_phase(&self) -> Phase {
        match self.entry {
            Entry::Staging(_) => Phase::Staging,
            Entry::ApproachSide => Phase::ApproachSide,
        }
    }

    pub fn post_lift_phase(&self) -> Phase {
        match self.post_lift {
            PostLift::Deliver => Phase::Deliver,
            PostLift::Halt => Phase::Halt,
        }
    }

    /// Whether `phase` belongs to this variant's sequence.
    pub fn uses(&self, phase: Phase) -> bool {
        match phase {
            Phase::Staging | Phase::ApproachSide => phase == self.entry_phase(),
            Phase::Deliver | Phase::Halt => phase == self.post_lift_phase(),
            Phase::Release => self.post_lift == PostLift::Deliver,
            _ => true,
        }
    }
}

/// Lateral lane the indicator task approaches on, chosen from the object's
/// initial y coordinate.
pub fn approach_lane(initial_y: f64) -> f64 {
    if initial_y < -0.1 {
        -0.3
    } else if initial_y < 0.0 {
        -0.2
    } else if initial_y < 0.1 {
        -0.1
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_bands() {
        assert_eq!(approach_lane(-0.15), -0.3);
        assert_eq!(approach_lane(-0.1), -0.2);
        assert_eq!(approach_lane(-0.01), -0.2);
        assert_eq!(approach_lane(0.0), -0.1);
        assert_eq!(approach_lane(0.099), -0.1);
        assert_eq!(approach_lane(0.1), 0.0);
    }

    #[test]
    fn profiles_select_their_phases() {
        let pp = TaskVariant::BlockedPickPlace.profile();
        assert_eq!(pp.entry_phase(), Phase::Staging);
        assert_eq!(pp.post_lift_phase(), Phase::Deliver);
        assert!(pp.uses(Phase::Release));
        assert!(!pp.uses(Phase::Halt));
        assert!(!pp.uses(Phase::ApproachSide));

        let ib = TaskVariant::IndicatorBoxBlock.profile();
        assert_eq!(ib.entry_phase(), Phase::ApproachSide);
        assert_eq!(ib.post_lift_phase(), Phase::Halt);
        assert!(!ib.uses(Phase::Release));
        assert!(!ib.uses(Phase::Staging));
        assert!(ib.uses(Phase::Lift));
    }

    #[test]
    fn variant_names_parse_from_json() {
        let v: TaskVariant = serde_json::from_str("\"indicator_box_block\"").unwrap();
        assert_eq!(v, TaskVariant::IndicatorBoxBlock);
        assert_eq!(TaskVariant::BlockedPickPlace.to_string(), "blocked_pick_place");
    }
}
