//! Discrete control phases and the gripper command.

use serde::{Deserialize, Serialize};

/// A control mode of the scripted policy.
///
/// Not every variant uses every phase: pick-and-place enters through
/// [`Phase::Staging`] and finishes with [`Phase::Deliver`] / [`Phase::Release`],
/// the indicator task enters through [`Phase::ApproachSide`] and finishes with
/// [`Phase::Halt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Reach a fixed staging point beside the workspace.
    Staging,
    /// Reach a point level with the object, offset along the lateral axis.
    ApproachSide,
    /// Slide laterally into the object until contact is felt.
    SideStep,
    /// Rise to hover height, jaws open.
    MoveUp,
    /// Move over the object at hover height.
    PositionOver,
    /// Descend onto the object.
    Descend,
    /// Close the jaws.
    Close,
    /// Ascend at full speed with lateral jitter.
    Lift,
    /// Carry the object over the landmark at constant altitude.
    Deliver,
    /// Open the jaws over the landmark.
    Release,
    /// Hold position.
    Halt,
}

impl Phase {
    /// Position along the nominal sequence. Used to check that the machine only
    /// moves forward (apart from regrasp aborts).
    pub fn rank(self) -> u8 {
        match self {
            Self::Staging | Self::ApproachSide => 0,
            Self::SideStep => 1,
            Self::MoveUp => 2,
            Self::PositionOver => 3,
            Self::Descend => 4,
            Self::Close => 5,
            Self::Lift => 6,
            Self::Deliver | Self::Halt => 7,
            Self::Release => 8,
        }
    }
}

/// Magnitude of the gripper channel of every action.
pub const GRIPPER_MAGNITUDE: f64 = 1.0;

/// Jaw command. Positive actuation closes the jaws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gripper {
    Open,
    Closed,
}

impl Gripper {
    /// The value written into the fourth action component.
    pub fn command(self) -> f64 {
        match self {
            Self::Open => -GRIPPER_MAGNITUDE,
            Self::Closed => GRIPPER_MAGNITUDE,
        }
    }
}
