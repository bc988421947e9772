//! GIF recording of selected rollouts, for eyeballing what the policy does.
//!
//! Recording never interferes with collection: encoding or file errors are
//! logged and the frames dropped.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::codecs::gif::{GifEncoder, Repeat};
use image::{imageops, Delay, DynamicImage, Frame, RgbImage};

const FRAME_DELAY_MS: u32 = 50;

#[derive(Debug)]
struct Recording {
    path: PathBuf,
    frames: Vec<RgbImage>,
}

/// Collects frames between [`begin`](Self::begin) and
/// [`finish`](Self::finish) and writes them out as one animated GIF.
#[derive(Debug)]
pub struct VideoRecorder {
    /// `None` disables recording altogether.
    dir: Option<PathBuf>,
    cameras: Vec<String>,
    frame_size: u32,
    current: Option<Recording>,
}

impl VideoRecorder {
    pub fn new(dir: Option<PathBuf>, cameras: Vec<String>, frame_size: u32) -> Self {
        Self {
            dir,
            cameras,
            frame_size,
            current: None,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, Vec::new(), 0)
    }

    pub fn cameras(&self) -> &[String] {
        &self.cameras
    }

    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    /// Whether frames passed to [`record`](Self::record) are being kept.
    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    /// Start a new recording named `file_name` inside the output directory.
    /// A no-op when recording is disabled.
    pub fn begin(&mut self, file_name: &str) {
        if let Some(dir) = &self.dir {
            self.current = Some(Recording {
                path: dir.join(file_name),
                frames: Vec::new(),
            });
        }
    }

    /// Add one frame, made of the given camera views placed side by side.
    pub fn record(&mut self, views: Vec<RgbImage>) {
        if let Some(rec) = self.current.as_mut() {
            if let Some(frame) = tile(&views) {
                rec.frames.push(frame);
            }
        }
    }

    /// Write the current recording. Returns the file written, if any.
    pub fn finish(&mut self) -> Option<PathBuf> {
        let rec = self.current.take()?;
        if rec.frames.is_empty() {
            return None;
        }
        match write_gif(&rec.path, rec.frames) {
            Ok(()) => {
                tracing::debug!(path = %rec.path.display(), "wrote rollout video");
                Some(rec.path)
            }
            Err(err) => {
                tracing::warn!(path = %rec.path.display(), error = %err, "failed to write rollout video");
                None
            }
        }
    }
}

/// Place views left to right on one canvas.
fn tile(views: &[RgbImage]) -> Option<RgbImage> {
    if views.is_empty() {
        return None;
    }
    let width = views.iter().map(|v| v.width()).sum();
    let height = views.iter().map(|v| v.height()).max().unwrap_or(0);
    let mut canvas = RgbImage::new(width, height);
    let mut x = 0i64;
    for view in views {
        imageops::replace(&mut canvas, view, x, 0);
        x += i64::from(view.width());
    }
    Some(canvas)
}

fn write_gif(path: &Path, frames: Vec<RgbImage>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut encoder = GifEncoder::new(BufWriter::new(file));
    encoder.set_repeat(Repeat::Infinite)?;
    encoder
        .encode_frames(frames.into_iter().map(|f| {
            Frame::from_parts(
                DynamicImage::ImageRgb8(f).into_rgba8(),
                0,
                0,
                Delay::from_numer_denom_ms(FRAME_DELAY_MS, 1),
            )
        }))
        .context("Failed to encode GIF")?;
    Ok(())
}
