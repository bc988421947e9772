//! Recording scripted rollouts and keeping the successful ones.
//!
//! This module provides:
//! - [`types::Transition`], [`types::Episode`], [`types::Rollout`] -- what a
//!   rollout produces, step by step and as a whole.
//! - [`store::EpisodeStore`] -- a fixed-capacity circular store of accepted
//!   episodes with binary persistence.
//! - [`collector::EpisodeCollector`] -- the loop that drives the phase
//!   machine against an environment and commits successful rollouts.

pub mod collector;
pub mod store;
pub mod types;

pub use collector::{CollectionPlan, CollectionSummary, EpisodeCollector};
pub use store::EpisodeStore;
pub use types::{Episode, Rollout, Transition};
