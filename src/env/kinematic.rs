//! In-process kinematic table-top simulator.
//!
//! A deliberately small model of a parallel-jaw gripper over a table with one
//! cube (and, for pick-and-place, a bin). It is not a physics engine: the end
//! effector moves by the commanded delta, the cube blocks lateral entry at its
//! own height and reports a contact force proportional to penetration, jaws
//! close onto the cube when aligned, and a grasped cube follows the gripper.
//! That is enough to exercise every phase of the scripted policy and to run
//! the whole collection pipeline without an external simulator.

use anyhow::{bail, Result};
use image::{Rgb, RgbImage};
use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::traits::{Environment, ImageObs, Observation, RawState, ResetOutcome, StepOutcome};
use crate::policy::{Action, TaskVariant};

const TABLE_Z: f64 = 0.8;
const CUBE_HALF: f64 = 0.02;
/// Half-size of the region around the cube centre the jaws cannot enter
/// sideways.
const FOOTPRINT: f64 = 0.025;
const CONTACT_STIFFNESS: f64 = 400.0;
/// Metres per step at full command.
const MAX_SPEED: f64 = 0.05;
const EEF_CLEARANCE: f64 = 0.005;
const EEF_HOME: [f64; 3] = [-0.1, 0.0, 1.0];
const WORKSPACE_X: (f64, f64) = (-0.4, 0.4);
const WORKSPACE_Y: (f64, f64) = (-0.5, 0.5);
const WORKSPACE_Z_MAX: f64 = 1.3;

const FINGER_OPEN: f64 = 0.04;
/// Finger position when closed on the cube.
const FINGER_ON_CUBE: f64 = 0.024;
const FINGER_SPEED: f64 = 0.008;
const RELEASE_MARGIN: f64 = 0.004;
const GRASP_TOLERANCE_XY: f64 = 0.02;
const GRASP_TOLERANCE_Z: f64 = 0.025;

const BIN_CENTER: [f64; 3] = [0.1, 0.28, TABLE_Z];
const BIN_HALF: f64 = 0.1;
/// Height the indicator task must lift the cube above the table.
const HOLD_HEIGHT: f64 = 0.1;

const SEED_SALT: u64 = 0x9E37_79B9_7F4A_7C15;

/// The kinematic table environment.
#[derive(Debug, Clone)]
pub struct KinematicTableEnv {
    task: TaskVariant,
    horizon: usize,
    image_size: u32,
    rng: ChaCha8Rng,
    fixed_spawn: Option<Vector3<f64>>,
    eef: Vector3<f64>,
    cube: Vector3<f64>,
    finger: f64,
    /// Cube position relative to the end effector while grasped.
    grasp_offset: Option<Vector3<f64>>,
    contact_force: f64,
    steps: usize,
}

impl KinematicTableEnv {
    pub fn new(task: TaskVariant, horizon: usize, image_size: u32, seed: u64) -> Self {
        Self {
            task,
            horizon,
            image_size,
            rng: ChaCha8Rng::seed_from_u64(seed ^ SEED_SALT),
            fixed_spawn: None,
            eef: Vector3::from(EEF_HOME),
            cube: Vector3::new(0.0, 0.0, TABLE_Z + CUBE_HALF),
            finger: FINGER_OPEN,
            grasp_offset: None,
            contact_force: 0.0,
            steps: 0,
        }
    }

    /// Always spawn the cube at `(x, y)` on the table instead of sampling.
    pub fn with_fixed_spawn(mut self, x: f64, y: f64) -> Self {
        self.fixed_spawn = Some(Vector3::new(x, y, TABLE_Z + CUBE_HALF));
        self
    }

    pub fn is_grasped(&self) -> bool {
        self.grasp_offset.is_some()
    }

    fn bin(&self) -> Option<Vector3<f64>> {
        match self.task {
            TaskVariant::BlockedPickPlace => Some(Vector3::from(BIN_CENTER)),
            TaskVariant::IndicatorBoxBlock => None,
        }
    }

    fn spawn(&mut self) -> Vector3<f64> {
        if let Some(p) = self.fixed_spawn {
            return p;
        }
        let x = self.rng.gen_range(-0.05..0.05);
        let y = match self.task {
            TaskVariant::BlockedPickPlace => self.rng.gen_range(-0.1..0.0),
            TaskVariant::IndicatorBoxBlock => self.rng.gen_range(-0.12..0.12),
        };
        Vector3::new(x, y, TABLE_Z + CUBE_HALF)
    }

    // -- dynamics ------------------------------------------------------------

    fn advance(&mut self, action: &Action) {
        let old = self.eef;
        let mut new = old + action.translation() * MAX_SPEED;
        new.x = new.x.clamp(WORKSPACE_X.0, WORKSPACE_X.1);
        new.y = new.y.clamp(WORKSPACE_Y.0, WORKSPACE_Y.1);
        new.z = new.z.clamp(TABLE_Z + EEF_CLEARANCE, WORKSPACE_Z_MAX);

        // A free cube stops the jaws from entering its footprint sideways.
        self.contact_force = 0.0;
        if self.grasp_offset.is_none() {
            let depth = footprint_depth(&new, &self.cube);
            let beside = new.z < self.cube.z + CUBE_HALF;
            if depth > 0.0 && beside && footprint_depth(&old, &self.cube) <= 0.0 {
                self.contact_force = CONTACT_STIFFNESS * depth;
                new.x = old.x;
                new.y = old.y;
            }
        }
        self.eef = new;

        let command = action.gripper();
        if command > 0.0 {
            self.close_fingers();
        } else if command < 0.0 {
            self.open_fingers();
        }

        if let Some(offset) = self.grasp_offset {
            self.cube = self.eef + offset;
        }
    }

    fn aligned(&self) -> bool {
        let d = self.cube - self.eef;
        d.xy().norm() < GRASP_TOLERANCE_XY && d.z.abs() < GRASP_TOLERANCE_Z
    }

    fn close_fingers(&mut self) {
        let gripping = self.grasp_offset.is_some();
        let can_grip = !gripping && self.finger >= FINGER_ON_CUBE - 1e-9 && self.aligned();
        let floor = if gripping || can_grip { FINGER_ON_CUBE } else { 0.0 };
        self.finger = (self.finger - FINGER_SPEED).max(floor);
        if can_grip && self.finger <= FINGER_ON_CUBE + 1e-9 {
            self.finger = FINGER_ON_CUBE;
            self.grasp_offset = Some(self.cube - self.eef);
        }
    }

    fn open_fingers(&mut self) {
        self.finger = (self.finger + FINGER_SPEED).min(FINGER_OPEN);
        if self.grasp_offset.is_some() && self.finger > FINGER_ON_CUBE + RELEASE_MARGIN {
            self.grasp_offset = None;
            let floor = if self.in_bin() { BIN_CENTER[2] } else { TABLE_Z };
            self.cube.z = floor + CUBE_HALF;
        }
    }

    fn in_bin(&self) -> bool {
        self.bin().is_some_and(|bin| {
            (self.cube.x - bin.x).abs() < BIN_HALF && (self.cube.y - bin.y).abs() < BIN_HALF
        })
    }

    fn reward(&self) -> f64 {
        let grasped = self.grasp_offset.is_some();
        let success = match self.task {
            TaskVariant::BlockedPickPlace => {
                !grasped && self.in_bin() && self.cube.z < TABLE_Z + 2.0 * CUBE_HALF + 1e-6
            }
            TaskVariant::IndicatorBoxBlock => {
                grasped && self.cube.z > TABLE_Z + HOLD_HEIGHT
            }
        };
        if success {
            return 1.0;
        }
        let reach = 1.0 - (10.0 * (self.cube - self.eef).norm()).tanh();
        let mut shaped = 0.25 * reach;
        if grasped {
            shaped += 0.25;
            if let Some(bin) = self.bin() {
                shaped += 0.25 * (1.0 - (10.0 * (self.cube - bin).xy().norm()).tanh());
            }
        }
        shaped
    }

    // -- observation ---------------------------------------------------------

    fn raw_state(&self) -> RawState {
        RawState {
            object_pos: self.cube,
            eef_pos: self.eef,
            gripper_qpos: vec![self.finger, -self.finger],
            contact_force: self.contact_force,
            landmark: self.bin(),
        }
    }

    fn observation(&self) -> Result<Observation> {
        let lowdim = [
            self.eef.x,
            self.eef.y,
            self.eef.z,
            self.cube.x,
            self.cube.y,
            self.cube.z,
            self.finger,
            -self.finger,
            self.contact_force,
        ]
        .iter()
        .map(|&v| v as f32)
        .collect();
        let image = self.draw("agentview", self.image_size, self.image_size)?;
        Ok(Observation {
            lowdim,
            image: ImageObs::from_rgb(&image),
        })
    }

    fn draw(&self, camera: &str, width: u32, height: u32) -> Result<RgbImage> {
        let view = View::for_camera(camera)?;
        let mut img = RgbImage::from_pixel(width, height, Rgb([200, 200, 200]));
        if let Some(bin) = self.bin() {
            let top = Vector3::new(bin.x, bin.y, bin.z + 0.05);
            view.fill(&mut img, &bin, &top, BIN_HALF, Rgb([140, 90, 40]));
        }
        view.fill(&mut img, &self.cube, &self.cube, CUBE_HALF, Rgb([200, 30, 30]));
        let jaw = Vector3::new(self.eef.x, self.eef.y, self.eef.z + 0.01);
        view.fill(&mut img, &self.eef, &jaw, self.finger.max(0.008), Rgb([30, 60, 200]));
        Ok(img)
    }
}

/// How far `p` is inside the cube's lateral footprint (positive = inside).
fn footprint_depth(p: &Vector3<f64>, cube: &Vector3<f64>) -> f64 {
    (FOOTPRINT - (p.x - cube.x).abs()).min(FOOTPRINT - (p.y - cube.y).abs())
}

/// A fixed orthographic camera.
struct View {
    /// Horizontal image axis spans y.
    y_range: (f64, f64),
    /// Vertical image axis spans x (top-down) or z (side).
    v_range: (f64, f64),
    top_down: bool,
}

impl View {
    fn for_camera(camera: &str) -> Result<Self> {
        match camera {
            "agentview" | "birdview" => Ok(Self {
                y_range: WORKSPACE_Y,
                v_range: WORKSPACE_X,
                top_down: true,
            }),
            "sideview" | "frontview" => Ok(Self {
                y_range: WORKSPACE_Y,
                v_range: (0.7, WORKSPACE_Z_MAX),
                top_down: false,
            }),
            other => bail!("unknown camera '{other}'"),
        }
    }

    /// Fill the projection of the box spanning `lo..hi` grown by `half`.
    fn fill(&self, img: &mut RgbImage, lo: &Vector3<f64>, hi: &Vector3<f64>, half: f64, color: Rgb<u8>) {
        let (w, h) = (img.width() as f64, img.height() as f64);
        let col = |y: f64| (y - self.y_range.0) / (self.y_range.1 - self.y_range.0) * w;
        let row = |v: f64| {
            let t = (v - self.v_range.0) / (self.v_range.1 - self.v_range.0);
            if self.top_down { t * h } else { (1.0 - t) * h }
        };
        let (v_lo, v_hi, v_grow) = if self.top_down {
            (lo.x, hi.x, half)
        } else {
            (lo.z, hi.z, CUBE_HALF.min(half))
        };
        let (c0, c1) = (col(lo.y - half), col(hi.y + half));
        let (r0, r1) = {
            let (a, b) = (row(v_lo - v_grow), row(v_hi + v_grow));
            (a.min(b), a.max(b))
        };
        let clamp_x = |v: f64| v.clamp(0.0, w) as u32;
        let clamp_y = |v: f64| v.clamp(0.0, h) as u32;
        for y in clamp_y(r0)..clamp_y(r1) {
            for x in clamp_x(c0)..clamp_x(c1) {
                img.put_pixel(x, y, color);
            }
        }
    }
}

impl Environment for KinematicTableEnv {
    async fn reset(&mut self) -> Result<ResetOutcome> {
        self.steps = 0;
        self.eef = Vector3::from(EEF_HOME);
        self.cube = self.spawn();
        self.finger = FINGER_OPEN;
        self.grasp_offset = None;
        self.contact_force = 0.0;

        tracing::debug!(
            task = %self.task,
            cube_x = self.cube.x,
            cube_y = self.cube.y,
            "kinematic table reset"
        );

        Ok(ResetOutcome {
            raw: self.raw_state(),
            obs: self.observation()?,
        })
    }

    async fn step(&mut self, action: &Action) -> Result<StepOutcome> {
        if action.max_abs() > 1.0 {
            bail!("action out of range: {:?}", action.0);
        }
        self.steps += 1;
        self.advance(action);

        Ok(StepOutcome {
            raw: self.raw_state(),
            obs: self.observation()?,
            reward: self.reward(),
            done: self.steps >= self.horizon,
            info: serde_json::json!({
                "grasped": self.grasp_offset.is_some(),
                "in_bin": self.in_bin(),
                "steps": self.steps,
            }),
        })
    }

    async fn render(&mut self, width: u32, height: u32, cameras: &[String]) -> Result<Vec<RgbImage>> {
        cameras
            .iter()
            .map(|camera| self.draw(camera, width, height))
            .collect()
    }

    fn max_episode_steps(&self) -> usize {
        self.horizon
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle() -> Action {
        Action::IDLE
    }

    #[tokio::test]
    async fn reset_spawns_cube_on_table() {
        let mut env = KinematicTableEnv::new(TaskVariant::BlockedPickPlace, 50, 32, 3);
        for _ in 0..10 {
            let out = env.reset().await.unwrap();
            let cube = out.raw.object_pos;
            assert!((cube.z - (TABLE_Z + CUBE_HALF)).abs() < 1e-12);
            assert!((-0.1..0.0).contains(&cube.y));
            assert!(out.raw.landmark.is_some());
            assert_eq!(out.obs.lowdim.len(), 9);
            assert_eq!(out.obs.image.shape(), [3, 32, 32]);
        }
    }

    #[tokio::test]
    async fn indicator_task_has_no_landmark() {
        let mut env = KinematicTableEnv::new(TaskVariant::IndicatorBoxBlock, 50, 16, 3);
        let out = env.reset().await.unwrap();
        assert!(out.raw.landmark.is_none());
    }

    #[tokio::test]
    async fn same_seed_same_spawns() {
        let mut a = KinematicTableEnv::new(TaskVariant::IndicatorBoxBlock, 50, 8, 9);
        let mut b = KinematicTableEnv::new(TaskVariant::IndicatorBoxBlock, 50, 8, 9);
        for _ in 0..5 {
            assert_eq!(a.reset().await.unwrap().raw, b.reset().await.unwrap().raw);
        }
    }

    #[tokio::test]
    async fn pushing_into_cube_sideways_produces_contact() {
        let mut env =
            KinematicTableEnv::new(TaskVariant::IndicatorBoxBlock, 50, 8, 1).with_fixed_spawn(0.0, 0.0);
        env.reset().await.unwrap();
        env.eef = Vector3::new(0.0, -0.05, TABLE_Z + CUBE_HALF);

        let out = env.step(&Action([0.0, 1.0, 0.0, -1.0])).await.unwrap();
        assert!(out.raw.contact_force > 1.0);
        // Blocked: lateral position unchanged.
        assert!((out.raw.eef_pos.y + 0.05).abs() < 1e-12);

        let out = env.step(&Action([0.0, -1.0, 0.0, -1.0])).await.unwrap();
        assert_eq!(out.raw.contact_force, 0.0);
    }

    #[tokio::test]
    async fn jaws_can_enter_from_above() {
        let mut env =
            KinematicTableEnv::new(TaskVariant::IndicatorBoxBlock, 50, 8, 1).with_fixed_spawn(0.0, 0.0);
        env.reset().await.unwrap();
        env.eef = Vector3::new(0.0, 0.0, 0.87);
        let out = env.step(&Action([0.0, 0.0, -1.0, -1.0])).await.unwrap();
        assert_eq!(out.raw.contact_force, 0.0);
        assert!((out.raw.eef_pos.z - 0.82).abs() < 1e-9);
    }

    #[tokio::test]
    async fn closing_on_aligned_cube_grasps_and_lifts_it() {
        let mut env =
            KinematicTableEnv::new(TaskVariant::IndicatorBoxBlock, 50, 8, 1).with_fixed_spawn(0.0, 0.0);
        env.reset().await.unwrap();
        env.eef = Vector3::new(0.0, 0.0, 0.82);

        let close = Action([0.0, 0.0, 0.0, 1.0]);
        let first = env.step(&close).await.unwrap();
        assert!(first.raw.gripper_opening() >= 0.045);
        let second = env.step(&close).await.unwrap();
        assert!(second.raw.gripper_opening() < 0.045);
        assert!(env.is_grasped());

        let mut last = second;
        for _ in 0..3 {
            last = env.step(&Action([0.0, 0.0, 1.0, 1.0])).await.unwrap();
        }
        assert!(last.raw.object_pos.z > 0.95);
        assert_eq!(last.reward, 1.0);
    }

    #[tokio::test]
    async fn closing_on_nothing_shuts_jaws_fully() {
        let mut env =
            KinematicTableEnv::new(TaskVariant::BlockedPickPlace, 50, 8, 1).with_fixed_spawn(0.0, -0.05);
        env.reset().await.unwrap();
        for _ in 0..6 {
            env.step(&Action([0.0, 0.0, 0.0, 1.0])).await.unwrap();
        }
        assert!(!env.is_grasped());
        assert_eq!(env.finger, 0.0);
    }

    #[tokio::test]
    async fn releasing_over_bin_succeeds() {
        let mut env =
            KinematicTableEnv::new(TaskVariant::BlockedPickPlace, 50, 8, 1).with_fixed_spawn(0.0, -0.05);
        env.reset().await.unwrap();
        env.eef = Vector3::new(BIN_CENTER[0], BIN_CENTER[1], 1.0);
        env.cube = env.eef;
        env.finger = FINGER_ON_CUBE;
        env.grasp_offset = Some(Vector3::zeros());

        let held = env.step(&Action([0.0, 0.0, 0.0, 1.0])).await.unwrap();
        assert!(held.reward < 0.99);
        let out = env.step(&Action([0.0, 0.0, 0.0, -1.0])).await.unwrap();
        assert!(!env.is_grasped());
        assert_eq!(out.reward, 1.0);
    }

    #[tokio::test]
    async fn done_at_horizon() {
        let mut env = KinematicTableEnv::new(TaskVariant::BlockedPickPlace, 3, 8, 1);
        env.reset().await.unwrap();
        assert!(!env.step(&idle()).await.unwrap().done);
        assert!(!env.step(&idle()).await.unwrap().done);
        assert!(env.step(&idle()).await.unwrap().done);
    }

    #[tokio::test]
    async fn rejects_out_of_range_actions() {
        let mut env = KinematicTableEnv::new(TaskVariant::BlockedPickPlace, 3, 8, 1);
        env.reset().await.unwrap();
        assert!(env.step(&Action([1.5, 0.0, 0.0, 0.0])).await.is_err());
    }

    #[tokio::test]
    async fn renders_requested_cameras() {
        let mut env = KinematicTableEnv::new(TaskVariant::BlockedPickPlace, 3, 8, 1);
        env.reset().await.unwrap();
        let frames = env
            .render(64, 48, &["agentview".to_string(), "sideview".to_string()])
            .await
            .unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].dimensions(), (64, 48));
        assert!(env.render(8, 8, &["ceiling".to_string()]).await.is_err());
    }
}
