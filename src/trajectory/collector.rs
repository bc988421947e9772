//! Episode collection: driving scripted rollouts and keeping the good ones.
//!
//! The [`EpisodeCollector`] runs each attempt by repeatedly:
//!   1. asking the [`PhaseMachine`] for a target and gripper command,
//!   2. synthesizing a bounded, noise-perturbed action,
//!   3. stepping the environment,
//!   4. recording the transition.
//!
//! An attempt always runs its full length. Only attempts in which some step
//! earned a success reward are committed to the [`EpisodeStore`]; the rest
//! are dropped whole.

use anyhow::{bail, Context, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::config::DemoConfig;
use crate::env::Environment;
use crate::policy::{self, phase_label, Action, PhaseMachine, TaskVariant};
use crate::trajectory::store::EpisodeStore;
use crate::trajectory::types::{
    done_no_max, is_success_reward, sparse_flag, Episode, Rollout, Transition,
};
use crate::video::VideoRecorder;

/// Steps between periodic progress reports.
const REPORT_EVERY: usize = 10;

/// How many episodes to collect and which attempts to film.
#[derive(Debug, Clone)]
pub struct CollectionPlan {
    pub target_episodes: usize,
    /// Film every Nth attempt; 0 films none.
    pub record_frequency: usize,
    pub max_attempts: Option<usize>,
}

impl CollectionPlan {
    pub fn from_config(config: &DemoConfig) -> Self {
        Self {
            target_episodes: config.episodes,
            record_frequency: config.record_frequency,
            max_attempts: config.max_attempts,
        }
    }

    fn records(&self, attempt: usize) -> bool {
        self.record_frequency > 0 && attempt % self.record_frequency == 0
    }
}

/// Outcome of a whole collection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionSummary {
    pub attempts: usize,
    pub successes: usize,
}

impl CollectionSummary {
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            return 0.0;
        }
        self.successes as f64 / self.attempts as f64
    }
}

/// Drives scripted rollouts of one task.
#[derive(Debug, Clone)]
pub struct EpisodeCollector {
    task: TaskVariant,
    episode_length: usize,
    sparse_prop: f64,
    /// Sole source of action noise.
    rng: ChaCha8Rng,
}

impl EpisodeCollector {
    pub fn new(task: TaskVariant, episode_length: usize, sparse_prop: f64, seed: u64) -> Self {
        Self {
            task,
            episode_length,
            sparse_prop,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn from_config(config: &DemoConfig) -> Self {
        Self::new(
            config.task,
            config.episode_length,
            config.sparse_prop,
            config.seed,
        )
    }

    /// Attempt rollouts until `plan.target_episodes` have succeeded, committing
    /// each success to `store`.
    pub async fn collect<E: Environment>(
        &mut self,
        env: &mut E,
        store: &mut EpisodeStore,
        recorder: &mut VideoRecorder,
        plan: &CollectionPlan,
    ) -> Result<CollectionSummary> {
        if plan.target_episodes > store.capacity() {
            bail!(
                "target of {} episodes exceeds store capacity {}",
                plan.target_episodes,
                store.capacity()
            );
        }

        let mut summary = CollectionSummary {
            attempts: 0,
            successes: 0,
        };

        while summary.successes < plan.target_episodes {
            if plan.max_attempts.is_some_and(|max| summary.attempts >= max) {
                bail!(
                    "gave up after {} attempts with {} of {} episodes collected",
                    summary.attempts,
                    summary.successes,
                    plan.target_episodes
                );
            }

            let attempt = summary.attempts;
            let filmed = plan.records(attempt);
            if filmed {
                recorder.begin(&format!("demo_{attempt}.gif"));
            }
            let rollout = self
                .rollout(env, filmed.then_some(&mut *recorder))
                .await
                .with_context(|| format!("attempt {attempt} failed"))?;
            if filmed {
                recorder.finish();
            }
            summary.attempts += 1;

            if rollout.success {
                store.add(Episode::new(self.task, attempt, rollout.transitions))?;
                summary.successes += 1;
                info!(attempt, stored = store.len(), next_slot = store.idx(), "episode committed");
            }
            info!(
                task = %self.task,
                successes = summary.successes,
                attempts = summary.attempts,
                reward = rollout.total_reward,
                "attempt finished"
            );
        }

        Ok(summary)
    }

    /// Run one full-length scripted rollout. When a recorder is given and
    /// active, every step is rendered into it.
    pub async fn rollout<E: Environment>(
        &mut self,
        env: &mut E,
        mut recorder: Option<&mut VideoRecorder>,
    ) -> Result<Rollout> {
        let reset = env.reset().await.context("environment reset failed")?;
        let mut obs = reset.obs;
        // Let the scene settle before the controller takes over; the first
        // recorded observation stays the reset one.
        let settle = env.step(&Action::SETTLE).await.context("settle step failed")?;
        let mut raw = settle.raw;

        let mut machine = PhaseMachine::new(self.task, &raw);
        let max_steps = env.max_episode_steps();

        let mut transitions = Vec::with_capacity(self.episode_length);
        let mut phases = Vec::with_capacity(self.episode_length);
        let mut total_reward = 0.0;
        let mut success = false;

        for step in 0..self.episode_length {
            let directive = machine.step(&raw)?;
            let action = policy::synthesize(
                &directive.displacement,
                directive.gripper,
                directive.lift_active,
                &mut self.rng,
            );

            let out = env
                .step(&action)
                .await
                .with_context(|| format!("environment step {step} failed"))?;

            if let Some(rec) = recorder.as_deref_mut().filter(|r| r.is_active()) {
                let size = rec.frame_size();
                let views = env.render(size, size, rec.cameras()).await?;
                rec.record(views);
            }

            let current = std::mem::replace(&mut obs, out.obs);
            transitions.push(Transition::new(
                current,
                action.to_f32(),
                out.reward,
                sparse_flag(step, self.episode_length, self.sparse_prop),
                obs.clone(),
                out.done,
                done_no_max(out.done, step, max_steps),
            ));
            phases.push(directive.phase);

            if step % REPORT_EVERY == 0 {
                debug!(step, reward = out.reward, phase = phase_label(machine.phase()), "progress");
            }
            total_reward += out.reward;
            success |= is_success_reward(out.reward);
            raw = out.raw;
        }

        Ok(Rollout {
            transitions,
            phases,
            total_reward,
            success,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
