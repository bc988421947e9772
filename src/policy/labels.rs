//! Short diagnostic labels for phases, for log output only.

use super::phase::Phase;

pub fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Staging | Phase::ApproachSide => "sidereach",
        Phase::SideStep => "sidestep",
        Phase::MoveUp => "moveup",
        Phase::PositionOver => "positioning",
        Phase::Descend => "blockreach",
        Phase::Close => "grabbing",
        Phase::Lift => "lifting",
        Phase::Deliver => "position",
        Phase::Release => "drop",
        Phase::Halt => "HALT",
    }
}
