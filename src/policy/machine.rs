//! The scripted phase machine.
//!
//! Each step the machine
//!   1. runs the handler of the current phase, which may update the sticky
//!      destination and gripper command and decides whether lift mode is on,
//!   2. measures the displacement from the end effector to the destination,
//!   3. walks the ordered [`TRANSITIONS`] table, applying every rule whose
//!      source phase matches the (possibly just updated) current phase.
//!
//! Handlers say *what to do* in a phase; the table says *when to leave it*.
//! The command returned for a step is always the one computed before any
//! transition fired, so the new phase takes effect on the following step.

use anyhow::{bail, Result};
use nalgebra::Vector3;

use crate::env::RawState;

use super::phase::{Gripper, Phase};
use super::variant::{approach_lane, Entry, TaskVariant, VariantProfile};

/// Distance under which a positional target counts as reached.
pub const REACH_TOLERANCE: f64 = 0.02;
/// Contact force above which the side-step has hit the object.
pub const CONTACT_FORCE_THRESHOLD: f64 = 1.0;
/// Finger joint norm under which the jaws count as closed on the object.
pub const GRASP_CLOSURE_THRESHOLD: f64 = 0.045;
/// End-effector/object separation above which a lift has dropped the object.
pub const DROP_DISTANCE: f64 = 0.1;
/// End-effector height above which the lift is complete.
pub const LIFT_CLEAR_HEIGHT: f64 = 0.95;

// ---------------------------------------------------------------------------
// Per-episode context
// ---------------------------------------------------------------------------

/// Scratch state of one rollout. Created at reset, dropped at episode end.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskContext {
    pub phase: Phase,
    /// Current jaw command. Persists until a handler overrides it.
    pub gripper: Gripper,
    /// Whether the last handler asked for lift-mode synthesis.
    pub lift_active: bool,
    /// Current target. Persists until a handler overrides it.
    pub destination: Vector3<f64>,
    /// Lateral lane for the side approach, fixed at episode start.
    pub approach_y: Option<f64>,
}

/// The output of one control step.
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    /// The phase whose handler produced this command.
    pub phase: Phase,
    pub destination: Vector3<f64>,
    /// `destination - eef_pos`, before any gain or noise.
    pub displacement: Vector3<f64>,
    pub gripper: Gripper,
    pub lift_active: bool,
}

/// What a phase handler asks for. `None` keeps the previous value.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PhaseCommand {
    destination: Option<Vector3<f64>>,
    gripper: Option<Gripper>,
    lift_active: bool,
}

impl PhaseCommand {
    fn goto(destination: Vector3<f64>) -> Self {
        Self {
            destination: Some(destination),
            gripper: None,
            lift_active: false,
        }
    }

    fn with_gripper(mut self, gripper: Gripper) -> Self {
        self.gripper = Some(gripper);
        self
    }

    fn hold(gripper: Gripper) -> Self {
        Self {
            destination: None,
            gripper: Some(gripper),
            lift_active: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Transition table
// ---------------------------------------------------------------------------

/// Where a transition leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    To(Phase),
    /// The variant's entry phase.
    Entry,
    /// The variant's post-lift phase.
    PostLift,
}

/// What a transition predicate gets to look at.
struct Probe<'a> {
    raw: &'a RawState,
    /// Distance to the destination computed this step.
    distance: f64,
}

struct Transition {
    from: Phase,
    to: Next,
    when: fn(&Probe<'_>) -> bool,
}

fn reached(p: &Probe<'_>) -> bool {
    p.distance < REACH_TOLERANCE
}

fn lifted_clear(p: &Probe<'_>) -> bool {
    p.raw.eef_pos.z > LIFT_CLEAR_HEIGHT
}

fn jaws_closed(p: &Probe<'_>) -> bool {
    p.raw.gripper_opening() < GRASP_CLOSURE_THRESHOLD
}

fn object_lost(p: &Probe<'_>) -> bool {
    (p.raw.eef_pos - p.raw.object_pos).norm() > DROP_DISTANCE
}

fn contact(p: &Probe<'_>) -> bool {
    p.raw.contact_force > CONTACT_FORCE_THRESHOLD
}

/// Evaluated top to bottom every step. A rule sees the phase as left by the
/// rules above it, so `Close -> Lift -> entry` can happen within one step,
/// while forward rules are listed latest-phase-first and never chain.
const TRANSITIONS: &[Transition] = &[
    Transition { from: Phase::Deliver, to: Next::To(Phase::Release), when: reached },
    Transition { from: Phase::Lift, to: Next::PostLift, when: lifted_clear },
    Transition { from: Phase::Close, to: Next::To(Phase::Lift), when: jaws_closed },
    Transition { from: Phase::Lift, to: Next::Entry, when: object_lost },
    Transition { from: Phase::Descend, to: Next::To(Phase::Close), when: reached },
    Transition { from: Phase::PositionOver, to: Next::To(Phase::Descend), when: reached },
    Transition { from: Phase::MoveUp, to: Next::To(Phase::PositionOver), when: reached },
    Transition { from: Phase::SideStep, to: Next::To(Phase::MoveUp), when: contact },
    Transition { from: Phase::Staging, to: Next::To(Phase::SideStep), when: reached },
    Transition { from: Phase::ApproachSide, to: Next::To(Phase::SideStep), when: reached },
];

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

/// One scripted controller, parameterised by a [`VariantProfile`].
#[derive(Debug, Clone)]
pub struct PhaseMachine {
    variant: TaskVariant,
    profile: VariantProfile,
    ctx: TaskContext,
}

impl PhaseMachine {
    /// Start a rollout. `initial` is the first state the controller sees; the
    /// approach lane is derived from it.
    pub fn new(variant: TaskVariant, initial: &RawState) -> Self {
        let profile = variant.profile();
        let approach_y = match profile.entry {
            Entry::ApproachSide => Some(approach_lane(initial.object_pos.y)),
            Entry::Staging(_) => None,
        };
        Self {
            variant,
            profile,
            ctx: TaskContext {
                phase: profile.entry_phase(),
                gripper: Gripper::Open,
                lift_active: false,
                destination: Vector3::zeros(),
                approach_y,
            },
        }
    }

    pub fn phase(&self) -> Phase {
        self.ctx.phase
    }

    pub fn context(&self) -> &TaskContext {
        &self.ctx
    }

    /// Run one control step against `raw`.
    ///
    /// Fails if the machine is in a phase its variant does not define; that
    /// is a logic bug and the caller is expected to abort.
    pub fn step(&mut self, raw: &RawState) -> Result<Directive> {
        let phase = self.ctx.phase;
        let cmd = self.command(phase, raw)?;

        if let Some(destination) = cmd.destination {
            self.ctx.destination = destination;
        }
        if let Some(gripper) = cmd.gripper {
            self.ctx.gripper = gripper;
        }
        self.ctx.lift_active = cmd.lift_active;

        let displacement = self.ctx.destination - raw.eef_pos;
        let directive = Directive {
            phase,
            destination: self.ctx.destination,
            displacement,
            gripper: self.ctx.gripper,
            lift_active: self.ctx.lift_active,
        };

        self.transition(raw, displacement.norm());
        Ok(directive)
    }

    fn transition(&mut self, raw: &RawState, distance: f64) {
        let probe = Probe { raw, distance };
        for rule in TRANSITIONS {
            if rule.from != self.ctx.phase || !(rule.when)(&probe) {
                continue;
            }
            let next = match rule.to {
                Next::To(phase) => phase,
                Next::Entry => self.profile.entry_phase(),
                Next::PostLift => self.profile.post_lift_phase(),
            };
            if rule.to == Next::Entry {
                tracing::warn!(
                    task = %self.variant,
                    separation = (raw.eef_pos - raw.object_pos).norm(),
                    "object lost during lift, regrasping"
                );
            }
            self.ctx.phase = next;
        }
    }

    fn command(&self, phase: Phase, raw: &RawState) -> Result<PhaseCommand> {
        if !self.profile.uses(phase) {
            bail!("phase {phase:?} is not part of the {} sequence", self.variant);
        }
        let obj = raw.object_pos;
        let cmd = match phase {
            Phase::Staging => match self.profile.entry {
                Entry::Staging(point) => PhaseCommand::goto(point),
                Entry::ApproachSide => bail!("staging phase without a staging point"),
            },
            Phase::ApproachSide => {
                let Some(lane) = self.ctx.approach_y else {
                    bail!("side approach without an approach lane");
                };
                PhaseCommand::goto(Vector3::new(obj.x, lane, obj.z))
            }
            Phase::SideStep => {
                PhaseCommand::goto(obj + Vector3::new(0.0, self.profile.side_step_offset, 0.0))
            }
            Phase::MoveUp => {
                let mut target = raw.eef_pos;
                target.z = obj.z + self.profile.hover_height;
                PhaseCommand::goto(target).with_gripper(Gripper::Open)
            }
            Phase::PositionOver => {
                PhaseCommand::goto(obj + Vector3::new(0.0, 0.0, self.profile.hover_height))
                    .with_gripper(Gripper::Open)
            }
            Phase::Descend => PhaseCommand::goto(obj).with_gripper(Gripper::Open),
            Phase::Close => PhaseCommand::hold(Gripper::Closed),
            Phase::Lift => PhaseCommand {
                lift_active: true,
                ..PhaseCommand::hold(Gripper::Closed)
            },
            Phase::Deliver => {
                let Some(mut target) = raw.landmark else {
                    bail!("delivery requires a landmark in the raw state");
                };
                target.z = raw.eef_pos.z;
                PhaseCommand::goto(target).with_gripper(Gripper::Closed)
            }
            Phase::Release => PhaseCommand::hold(Gripper::Open),
            Phase::Halt => PhaseCommand::goto(raw.eef_pos),
        };
        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(object: [f64; 3], eef: [f64; 3]) -> RawState {
        RawState {
            object_pos: Vector3::from(object),
            eef_pos: Vector3::from(eef),
            gripper_qpos: vec![0.04, -0.04],
            contact_force: 0.0,
            landmark: Some(Vector3::new(0.1, 0.28, 0.8)),
        }
    }

    fn machine_in(variant: TaskVariant, phase: Phase, raw: &RawState) -> PhaseMachine {
        let mut m = PhaseMachine::new(variant, raw);
        m.ctx.phase = phase;
        m
    }

    #[test]
    fn starts_in_entry_phase_with_open_jaws() {
        let raw = state([0.0, -0.05, 0.82], [-0.1, 0.0, 1.0]);
        let pp = PhaseMachine::new(TaskVariant::BlockedPickPlace, &raw);
        assert_eq!(pp.phase(), Phase::Staging);
        assert_eq!(pp.context().gripper, Gripper::Open);
        assert!(pp.context().approach_y.is_none());

        let ib = PhaseMachine::new(TaskVariant::IndicatorBoxBlock, &raw);
        assert_eq!(ib.phase(), Phase::ApproachSide);
        assert_eq!(ib.context().approach_y, Some(-0.2));
    }

    #[test]
    fn staging_targets_fixed_point_then_advances() {
        let raw = state([0.0, -0.05, 0.82], [0.005, 0.08, 0.82]);
        let mut m = PhaseMachine::new(TaskVariant::BlockedPickPlace, &raw);
        let d = m.step(&raw).unwrap();
        assert_eq!(d.phase, Phase::Staging);
        assert_eq!(d.destination, Vector3::new(0.0, 0.08, 0.82));
        assert_eq!(m.phase(), Phase::SideStep);
    }

    #[test]
    fn approach_side_uses_lane() {
        let raw = state([0.02, 0.05, 0.82], [0.0, 0.0, 1.0]);
        let mut m = PhaseMachine::new(TaskVariant::IndicatorBoxBlock, &raw);
        let d = m.step(&raw).unwrap();
        assert_eq!(d.destination, Vector3::new(0.02, -0.1, 0.82));
        assert_eq!(m.phase(), Phase::ApproachSide);
    }

    #[test]
    fn side_step_offsets_differ_per_variant() {
        let raw = state([0.0, 0.0, 0.82], [0.0, 0.3, 0.82]);
        let mut pp = machine_in(TaskVariant::BlockedPickPlace, Phase::SideStep, &raw);
        assert!((pp.step(&raw).unwrap().destination.y - 0.01).abs() < 1e-12);
        let mut ib = machine_in(TaskVariant::IndicatorBoxBlock, Phase::SideStep, &raw);
        assert!((ib.step(&raw).unwrap().destination.y - 0.11).abs() < 1e-12);
    }

    #[test]
    fn contact_threshold_is_strict() {
        let mut raw = state([0.0, 0.0, 0.82], [0.0, 0.3, 0.82]);
        raw.contact_force = 1.0;
        let mut m = machine_in(TaskVariant::BlockedPickPlace, Phase::SideStep, &raw);
        m.step(&raw).unwrap();
        assert_eq!(m.phase(), Phase::SideStep);

        raw.contact_force = 1.0001;
        m.step(&raw).unwrap();
        assert_eq!(m.phase(), Phase::MoveUp);
    }

    #[test]
    fn move_up_keeps_lateral_position_and_opens() {
        let raw = state([0.0, 0.0, 0.82], [0.01, 0.03, 0.82]);
        let mut m = machine_in(TaskVariant::IndicatorBoxBlock, Phase::MoveUp, &raw);
        m.ctx.gripper = Gripper::Closed;
        let d = m.step(&raw).unwrap();
        assert_eq!((d.destination.x, d.destination.y), (0.01, 0.03));
        assert!((d.destination.z - 0.85).abs() < 1e-12);
        assert_eq!(d.gripper, Gripper::Open);
        assert_eq!(m.phase(), Phase::MoveUp);
        // The caller's raw state is untouched.
        assert_eq!(raw.eef_pos, Vector3::new(0.01, 0.03, 0.82));
    }

    #[test]
    fn reposition_descend_and_close_chain_on_reach() {
        let raw = state([0.0, 0.0, 0.82], [0.0, 0.0, 0.846]);
        let mut m = machine_in(TaskVariant::BlockedPickPlace, Phase::PositionOver, &raw);
        m.step(&raw).unwrap();
        assert_eq!(m.phase(), Phase::Descend);

        let raw = state([0.0, 0.0, 0.82], [0.0, 0.0, 0.83]);
        m.step(&raw).unwrap();
        assert_eq!(m.phase(), Phase::Close);
    }

    #[test]
    fn close_keeps_destination_and_waits_for_jaws() {
        let raw = state([0.0, 0.0, 0.82], [0.0, 0.0, 0.83]);
        let mut m = machine_in(TaskVariant::BlockedPickPlace, Phase::Descend, &raw);
        let descend = m.step(&raw).unwrap();
        assert_eq!(m.phase(), Phase::Close);

        let d = m.step(&raw).unwrap();
        assert_eq!(d.phase, Phase::Close);
        assert_eq!(d.destination, descend.destination);
        assert_eq!(d.gripper, Gripper::Closed);
        assert_eq!(m.phase(), Phase::Close);

        let mut closed = raw.clone();
        closed.gripper_qpos = vec![0.024, -0.024];
        m.step(&closed).unwrap();
        assert_eq!(m.phase(), Phase::Lift);
    }

    #[test]
    fn lift_sets_lift_mode_and_holds_grip() {
        let raw = state([0.0, 0.0, 0.9], [0.0, 0.0, 0.9]);
        let mut m = machine_in(TaskVariant::IndicatorBoxBlock, Phase::Lift, &raw);
        let d = m.step(&raw).unwrap();
        assert!(d.lift_active);
        assert_eq!(d.gripper, Gripper::Closed);
        assert_eq!(m.phase(), Phase::Lift);
    }

    #[test]
    fn lift_clears_at_height_into_post_lift_phase() {
        let raw = state([0.0, 0.0, 0.951], [0.0, 0.0, 0.951]);
        let mut pp = machine_in(TaskVariant::BlockedPickPlace, Phase::Lift, &raw);
        let d = pp.step(&raw).unwrap();
        assert_eq!(d.phase, Phase::Lift);
        assert_eq!(pp.phase(), Phase::Deliver);
        let next = pp.step(&raw).unwrap();
        assert_eq!(next.phase, Phase::Deliver);
        assert!(!next.lift_active);

        let mut ib = machine_in(TaskVariant::IndicatorBoxBlock, Phase::Lift, &raw);
        ib.step(&raw).unwrap();
        assert_eq!(ib.phase(), Phase::Halt);
    }

    #[test]
    fn lift_at_exact_clear_height_keeps_lifting() {
        let raw = state([0.0, 0.0, 0.95], [0.0, 0.0, 0.95]);
        let mut m = machine_in(TaskVariant::IndicatorBoxBlock, Phase::Lift, &raw);
        m.step(&raw).unwrap();
        assert_eq!(m.phase(), Phase::Lift);
    }

    #[test]
    fn losing_object_during_lift_returns_to_entry() {
        let raw = state([0.0, 0.0, 0.82], [0.0, 0.0, 0.93]);
        let mut pp = machine_in(TaskVariant::BlockedPickPlace, Phase::Lift, &raw);
        pp.step(&raw).unwrap();
        assert_eq!(pp.phase(), Phase::Staging);

        let mut ib = machine_in(TaskVariant::IndicatorBoxBlock, Phase::Lift, &raw);
        ib.step(&raw).unwrap();
        assert_eq!(ib.phase(), Phase::ApproachSide);
    }

    #[test]
    fn deliver_holds_altitude_over_landmark_then_releases() {
        let raw = state([0.0, 0.0, 1.0], [0.0, 0.0, 1.0]);
        let mut m = machine_in(TaskVariant::BlockedPickPlace, Phase::Deliver, &raw);
        let d = m.step(&raw).unwrap();
        assert_eq!(d.destination, Vector3::new(0.1, 0.28, 1.0));
        assert_eq!(d.gripper, Gripper::Closed);
        assert_eq!(m.phase(), Phase::Deliver);

        let over = state([0.1, 0.28, 1.0], [0.1, 0.285, 1.0]);
        m.step(&over).unwrap();
        assert_eq!(m.phase(), Phase::Release);
        let d = m.step(&over).unwrap();
        assert_eq!(d.gripper, Gripper::Open);
        assert_eq!(m.phase(), Phase::Release);
    }

    #[test]
    fn close_lift_regrasp_chain_in_one_step() {
        // Jaws shut on nothing while the object is far away.
        let mut raw = state([0.0, 0.0, 0.82], [0.0, 0.0, 1.0]);
        raw.gripper_qpos = vec![0.024, -0.024];
        for (variant, entry) in [
            (TaskVariant::BlockedPickPlace, Phase::Staging),
            (TaskVariant::IndicatorBoxBlock, Phase::ApproachSide),
        ] {
            let mut m = machine_in(variant, Phase::Close, &raw);
            let d = m.step(&raw).unwrap();
            assert_eq!(d.phase, Phase::Close);
            assert!(!d.lift_active);
            assert_eq!(m.phase(), entry);
        }
    }

    #[test]
    fn halt_freezes_in_place() {
        let raw = state([0.0, 0.0, 1.0], [0.03, -0.02, 0.97]);
        let mut m = machine_in(TaskVariant::IndicatorBoxBlock, Phase::Halt, &raw);
        m.ctx.gripper = Gripper::Closed;
        let d = m.step(&raw).unwrap();
        assert_eq!(d.displacement, Vector3::zeros());
        assert_eq!(d.gripper, Gripper::Closed);
        assert!(!d.lift_active);
        assert_eq!(m.phase(), Phase::Halt);
    }

    #[test]
    fn foreign_phase_is_an_error() {
        let raw = state([0.0, 0.0, 0.82], [0.0, 0.0, 1.0]);
        let mut m = machine_in(TaskVariant::IndicatorBoxBlock, Phase::Release, &raw);
        assert!(m.step(&raw).is_err());
        let mut m = machine_in(TaskVariant::BlockedPickPlace, Phase::ApproachSide, &raw);
        assert!(m.step(&raw).is_err());
    }

    #[test]
    fn delivery_without_landmark_is_an_error() {
        let mut raw = state([0.0, 0.0, 1.0], [0.0, 0.0, 1.0]);
        raw.landmark = None;
        let mut m = machine_in(TaskVariant::BlockedPickPlace, Phase::Deliver, &raw);
        assert!(m.step(&raw).is_err());
    }
}
