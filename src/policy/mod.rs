//! The scripted pick policy.
//!
//! - [`phase`] -- the [`Phase`] tags and the [`Gripper`] command.
//! - [`variant`] -- [`TaskVariant`] and the per-variant [`VariantProfile`].
//! - [`machine`] -- the [`PhaseMachine`]: per-phase handlers plus an ordered
//!   transition table.
//! - [`action`] -- scaling, noise and clipping of the final [`Action`].
//! - [`labels`] -- human-readable phase names for logs.

pub mod action;
pub mod labels;
pub mod machine;
pub mod phase;
pub mod variant;

pub use action::{synthesize, Action};
pub use labels::phase_label;
pub use machine::{Directive, PhaseMachine, TaskContext};
pub use phase::{Gripper, Phase};
pub use variant::{TaskVariant, VariantProfile};
