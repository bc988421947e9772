//! Adapter for an external physics simulator reachable over HTTP.
//!
//! The server is expected to expose three endpoints:
//! - `POST {base_url}/reset`  -- body: [`ResetRequest`]
//! - `POST {base_url}/step`   -- body: `{"action": [dx, dy, dz, gripper]}`
//! - `POST {base_url}/render` -- body: `{"width", "height", "cameras"}`
//!
//! Reset and step answer with JSON matching [`ServerResponse`]; render answers
//! with [`RenderResponse`].

use anyhow::{bail, Context, Result};
use image::RgbImage;
use nalgebra::Vector3;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::traits::{Environment, ImageObs, Observation, RawState, ResetOutcome, StepOutcome};
use crate::policy::{Action, TaskVariant};

/// Simulator construction parameters sent with every reset.
#[derive(Debug, Clone, Serialize)]
pub struct ResetRequest {
    pub task: TaskVariant,
    pub horizon: usize,
    pub image_size: u32,
    pub camera: String,
}

/// A simulator reachable over HTTP.
#[derive(Debug)]
pub struct RemoteSimEnv {
    base_url: String,
    http: reqwest::Client,
    settings: ResetRequest,
}

/// The contact force may come back as a scalar or as a force vector.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ForceReading {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl ForceReading {
    fn magnitude(&self) -> f64 {
        match self {
            Self::Scalar(f) => f.abs(),
            Self::Vector(v) => v.iter().map(|c| c * c).sum::<f64>().sqrt(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireRawState {
    cube_pos: [f64; 3],
    robot0_eef_pos: [f64; 3],
    robot0_gripper_qpos: Vec<f64>,
    gripper_force: ForceReading,
    #[serde(default)]
    bin_pos: Option<[f64; 3]>,
}

impl From<WireRawState> for RawState {
    fn from(w: WireRawState) -> Self {
        RawState {
            object_pos: Vector3::from(w.cube_pos),
            eef_pos: Vector3::from(w.robot0_eef_pos),
            gripper_qpos: w.robot0_gripper_qpos,
            contact_force: w.gripper_force.magnitude(),
            landmark: w.bin_pos.map(Vector3::from),
        }
    }
}

/// The JSON shape returned by reset and step.
#[derive(Debug, Deserialize)]
struct ServerResponse {
    raw_state: WireRawState,
    lowdim: Vec<f32>,
    image: ImageObs,
    #[serde(default)]
    reward: f64,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    info: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WireFrame {
    width: u32,
    height: u32,
    /// Interleaved RGB bytes, row-major.
    data: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct RenderResponse {
    frames: Vec<WireFrame>,
}

impl RemoteSimEnv {
    pub fn new(base_url: &str, settings: ResetRequest) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            settings,
        }
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, endpoint: &str, body: &B) -> Result<R> {
        self.http
            .post(format!("{}/{endpoint}", self.base_url))
            .json(body)
            .send()
            .await
            .with_context(|| format!("failed to reach simulator on {endpoint}"))?
            .error_for_status()
            .with_context(|| format!("simulator rejected {endpoint}"))?
            .json()
            .await
            .with_context(|| format!("failed to parse simulator {endpoint} response"))
    }
}

fn check_image(image: &ImageObs) -> Result<()> {
    let expected: usize = image.shape().iter().product();
    if image.data.len() != expected {
        bail!(
            "image payload has {} bytes, shape {:?} needs {expected}",
            image.data.len(),
            image.shape()
        );
    }
    Ok(())
}

impl Environment for RemoteSimEnv {
    async fn reset(&mut self) -> Result<ResetOutcome> {
        let resp: ServerResponse = self.post("reset", &self.settings).await?;
        check_image(&resp.image)?;

        tracing::debug!(url = %self.base_url, task = %self.settings.task, "remote simulator reset");

        Ok(ResetOutcome {
            raw: resp.raw_state.into(),
            obs: Observation {
                lowdim: resp.lowdim,
                image: resp.image,
            },
        })
    }

    async fn step(&mut self, action: &Action) -> Result<StepOutcome> {
        let body = serde_json::json!({ "action": action.as_slice() });
        let resp: ServerResponse = self.post("step", &body).await?;
        check_image(&resp.image)?;

        Ok(StepOutcome {
            raw: resp.raw_state.into(),
            obs: Observation {
                lowdim: resp.lowdim,
                image: resp.image,
            },
            reward: resp.reward,
            done: resp.done,
            info: resp.info.unwrap_or(serde_json::Value::Null),
        })
    }

    async fn render(&mut self, width: u32, height: u32, cameras: &[String]) -> Result<Vec<RgbImage>> {
        let body = serde_json::json!({ "width": width, "height": height, "cameras": cameras });
        let resp: RenderResponse = self.post("render", &body).await?;
        resp.frames
            .into_iter()
            .map(|f| {
                RgbImage::from_raw(f.width, f.height, f.data)
                    .context("render frame size does not match its dimensions")
            })
            .collect()
    }

    fn max_episode_steps(&self) -> usize {
        self.settings.horizon
    }
}
