//! Pickscript: scripted pick-and-place demonstrations for offline RL.
//!
//! A phase-based controller drives a gripper through reach, grasp, lift and
//! place, perturbs its commands with seeded noise, and keeps the rollouts that
//! reach the goal as fixed-length episodes.

pub mod config;
pub mod env;
pub mod policy;
pub mod trajectory;
pub mod video;
