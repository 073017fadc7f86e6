//! Video sources.
//!
//! The session shows exactly one source at a time: a device camera, an
//! IP camera's MJPEG stream, or the detection server's proxied stream.
//!
//! This module is responsible for:
//! - Acquiring media tracks for the requested capture constraints
//! - Exposing the most recent decoded frame and its native dimensions
//! - Releasing tracks on teardown
//!
//! This module MUST NOT:
//! - Know about detections or the overlay
//! - Keep frames beyond the latest one

use anyhow::{anyhow, Context, Result};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use url::Url;

pub mod mjpeg;
mod stub;

pub use mjpeg::MjpegFeed;
pub use stub::SyntheticCamera;

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    DeviceCamera,
    IpStream,
    ServerStream,
}

impl SourceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceMode::DeviceCamera => "camera",
            SourceMode::IpStream => "ip",
            SourceMode::ServerStream => "server",
        }
    }
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "camera" | "device" | "device_camera" => Ok(SourceMode::DeviceCamera),
            "ip" | "ip_stream" | "mjpeg" => Ok(SourceMode::IpStream),
            "server" | "server_stream" => Ok(SourceMode::ServerStream),
            other => Err(anyhow!(
                "unknown source mode '{}'; expected camera, ip or server",
                other
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacingMode {
    User,
    Environment,
}

impl FromStr for FacingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" | "front" => Ok(FacingMode::User),
            "environment" | "rear" | "back" => Ok(FacingMode::Environment),
            other => Err(anyhow!("unknown facing mode '{}'", other)),
        }
    }
}

/// Preferred capture settings. Devices may deliver something else.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub facing: FacingMode,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            ideal_width: 1280,
            ideal_height: 720,
            facing: FacingMode::Environment,
        }
    }
}

/// One acquired track. Liveness is shared with whatever produces its frames,
/// so stopping the track also stops the producer.
#[derive(Clone, Debug)]
pub struct MediaTrack {
    id: u64,
    label: String,
    live: Arc<AtomicBool>,
}

impl MediaTrack {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed),
            label: label.into(),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            log::debug!("track {} ({}) stopped", self.id, self.label);
        }
    }

    pub(crate) fn liveness(&self) -> Arc<AtomicBool> {
        self.live.clone()
    }
}

/// Decoded frames from a source.
pub trait FrameFeed {
    /// Most recent decoded frame, if any.
    fn latest_frame(&self) -> Option<RgbaImage>;
    /// Native (intrinsic) frame dimensions; `(0, 0)` until the first frame.
    fn native_size(&self) -> (u32, u32);
    /// Load failure reported by the source, if any.
    fn error(&self) -> Option<String> {
        None
    }
}

pub struct MediaStream {
    tracks: Vec<MediaTrack>,
    feed: Box<dyn FrameFeed>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>, feed: Box<dyn FrameFeed>) -> Self {
        Self { tracks, feed }
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn live_track_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_live()).count()
    }

    pub fn feed(&self) -> &dyn FrameFeed {
        self.feed.as_ref()
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

impl Drop for MediaStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Media acquisition seam.
pub trait MediaDevices {
    /// Acquire the device camera.
    fn get_user_media(&mut self, constraints: &CaptureConstraints) -> Result<MediaStream>;

    /// Open a network video stream by URL.
    fn open_stream(&mut self, url: &str) -> Result<MediaStream> {
        open_stream_url(url)
    }
}

/// Devices backed by a configured camera spec: `stub://...` for a synthetic
/// camera, or an `http(s)://` MJPEG endpoint for a network camera.
#[derive(Clone, Debug)]
pub struct SystemDevices {
    camera: String,
}

impl SystemDevices {
    pub fn new(camera: impl Into<String>) -> Self {
        Self {
            camera: camera.into(),
        }
    }
}

impl MediaDevices for SystemDevices {
    fn get_user_media(&mut self, constraints: &CaptureConstraints) -> Result<MediaStream> {
        if self.camera.starts_with("stub://") {
            return Ok(SyntheticCamera::new(constraints.ideal_width, constraints.ideal_height)
                .into_stream(&self.camera));
        }
        let url = Url::parse(&self.camera)
            .with_context(|| format!("camera device '{}' unavailable", self.camera))?;
        match url.scheme() {
            "http" | "https" => open_stream_url(url.as_str()),
            other => Err(anyhow!(
                "camera device '{}' unavailable: unsupported scheme '{}'",
                self.camera,
                other
            )),
        }
    }
}

/// Open `stub://` or `http(s)://` stream URLs.
pub fn open_stream_url(url: &str) -> Result<MediaStream> {
    if url.starts_with("stub://") {
        return Ok(SyntheticCamera::default().into_stream(url));
    }
    let parsed = Url::parse(url).with_context(|| format!("parse stream url '{}'", url))?;
    match parsed.scheme() {
        "http" | "https" => {
            let track = MediaTrack::new(parsed.as_str());
            let feed = MjpegFeed::open(parsed.as_str(), track.liveness())?;
            Ok(MediaStream::new(vec![track], Box::new(feed)))
        }
        other => Err(anyhow!(
            "unsupported stream scheme '{}'; expected http(s) or stub",
            other
        )),
    }
}

/// The source currently shown to the user.
pub struct ActiveSource {
    pub mode: SourceMode,
    pub origin: String,
    stream: MediaStream,
}

#[derive(Default)]
pub struct VideoSurface {
    active: Option<ActiveSource>,
}

impl VideoSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the source. The previous one is stopped first.
    pub fn attach(&mut self, mode: SourceMode, origin: impl Into<String>, stream: MediaStream) {
        self.clear();
        self.active = Some(ActiveSource {
            mode,
            origin: origin.into(),
            stream,
        });
    }

    /// Stop every track and detach.
    pub fn clear(&mut self) {
        if let Some(source) = self.active.take() {
            source.stream.stop();
            log::info!("{} source detached ({})", source.mode, source.origin);
        }
    }

    pub fn active(&self) -> Option<&ActiveSource> {
        self.active.as_ref()
    }

    pub fn is_attached(&self) -> bool {
        self.active.is_some()
    }

    pub fn mode(&self) -> Option<SourceMode> {
        self.active.as_ref().map(|a| a.mode)
    }

    pub fn native_dimensions(&self) -> (u32, u32) {
        self.active
            .as_ref()
            .map(|a| a.stream.feed().native_size())
            .unwrap_or((0, 0))
    }

    pub fn current_frame(&self) -> Option<RgbaImage> {
        self.active.as_ref()?.stream.feed().latest_frame()
    }

    pub fn feed_error(&self) -> Option<String> {
        self.active.as_ref()?.stream.feed().error()
    }

    pub fn live_track_count(&self) -> usize {
        self.active
            .as_ref()
            .map(|a| a.stream.live_track_count())
            .unwrap_or(0)
    }
}
