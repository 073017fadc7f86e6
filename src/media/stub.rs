//! Synthetic camera for `stub://` sources.
//!
//! Produces a slowly shifting gradient so snapshots have real pixels to draw
//! on without camera hardware.

use image::{Rgba, RgbaImage};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{FrameFeed, MediaStream, MediaTrack};

pub struct SyntheticCamera {
    width: u32,
    height: u32,
    frame_count: Cell<u64>,
    live: Arc<AtomicBool>,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_count: Cell::new(0),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Wrap the camera in a single-track stream labelled `label`.
    pub fn into_stream(mut self, label: &str) -> MediaStream {
        let track = MediaTrack::new(label);
        self.live = track.liveness();
        log::info!(
            "synthetic camera {} ready ({}x{})",
            label,
            self.width,
            self.height
        );
        MediaStream::new(vec![track], Box::new(self))
    }

    fn render(&self, n: u64) -> RgbaImage {
        let shift = (n % 256) as u32;
        let (w, h) = (self.width.max(1), self.height.max(1));
        RgbaImage::from_fn(self.width, self.height, |x, y| {
            let r = ((x * 255 / w + shift) % 256) as u8;
            let g = (y * 255 / h) as u8;
            Rgba([r, g, 96, 255])
        })
    }
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new(1280, 720)
    }
}

impl FrameFeed for SyntheticCamera {
    fn latest_frame(&self) -> Option<RgbaImage> {
        if !self.live.load(Ordering::SeqCst) || self.width == 0 || self.height == 0 {
            return None;
        }
        let n = self.frame_count.get() + 1;
        self.frame_count.set(n);
        Some(self.render(n))
    }

    fn native_size(&self) -> (u32, u32) {
        if self.live.load(Ordering::SeqCst) {
            (self.width, self.height)
        } else {
            (0, 0)
        }
    }
}
