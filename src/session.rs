//! Camera session controller.
//!
//! Owns every piece of per-session state and runs it on one thread:
//! the active video source, the detection connection, the demo simulator,
//! the overlay renderer and the latest frame. Background readers only hand
//! data over; every state transition happens inside `tick` or one of the
//! control methods below.
//!
//! The session is responsible for:
//! - Acquiring exactly one video source at a time
//! - Choosing between live and simulated detections
//! - Tearing everything down on stop or drop
//!
//! The session MUST NOT:
//! - Run the simulator while the live stream is connected
//! - Leave timers or live tracks behind after teardown

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::rc::Rc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::config::{SourceSettings, TelemetryConfig};
use crate::frame::DetectionFrame;
use crate::media::{CaptureConstraints, MediaDevices, SourceMode, SystemDevices, VideoSurface};
use crate::overlay::{OverlayElement, OverlayRenderer, OverlayToggles};
use crate::simulate::{SimulatedDetectionGenerator, SimulationGate};
use crate::snapshot::{
    load_font, DownloadDir, SnapshotArtifact, SnapshotCompositor, SnapshotOptions, SnapshotSink,
};
use crate::timers::{SessionTimer, TimerQueue};
use crate::transform::CoordinateTransformer;
use crate::transport::{
    ConnectionManager, ConnectionState, ConnectionStats, ConnectionUpdate, Connector, FixedDelay,
    WsConnector,
};

// ----------------------------------------------------------------------------
// Latest frame
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameOrigin {
    Live,
    Simulated,
}

/// Single slot for the most recent frame. Newer frames replace older ones
/// whether or not the older one was ever rendered.
#[derive(Clone, Debug, Default)]
pub struct LatestFrame {
    slot: Option<(DetectionFrame, FrameOrigin)>,
}

impl LatestFrame {
    pub fn set(&mut self, frame: DetectionFrame, origin: FrameOrigin) {
        self.slot = Some((frame, origin));
    }

    pub fn get(&self) -> Option<&DetectionFrame> {
        self.slot.as_ref().map(|(frame, _)| frame)
    }

    pub fn origin(&self) -> Option<FrameOrigin> {
        self.slot.as_ref().map(|(_, origin)| *origin)
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }
}

// ----------------------------------------------------------------------------
// Fullscreen
// ----------------------------------------------------------------------------

/// Platform fullscreen control. The session never assumes a request
/// succeeded; it mirrors whatever the platform reports.
pub trait FullscreenApi {
    fn request_fullscreen(&mut self) -> Result<()>;
    fn exit_fullscreen(&mut self) -> Result<()>;
    fn is_fullscreen(&self) -> bool;
}

/// Fullscreen for headless runs: requests take effect immediately.
#[derive(Clone, Debug, Default)]
pub struct HeadlessDisplay {
    fullscreen: bool,
}

impl FullscreenApi for HeadlessDisplay {
    fn request_fullscreen(&mut self) -> Result<()> {
        self.fullscreen = true;
        Ok(())
    }

    fn exit_fullscreen(&mut self) -> Result<()> {
        self.fullscreen = false;
        Ok(())
    }

    fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }
}

// ----------------------------------------------------------------------------
// Status
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionStatus {
    pub mode: SourceMode,
    pub streaming: bool,
    pub connection: ConnectionState,
    pub overlay_enabled: bool,
    pub show_boxes: bool,
    pub show_labels: bool,
    pub fullscreen: bool,
    pub simulator_running: bool,
    pub last_error: Option<String>,
    pub frame_id: Option<u64>,
    pub frame_origin: Option<FrameOrigin>,
    pub animal_count: usize,
    pub overlay_elements: usize,
    pub live_tracks: usize,
    pub pending_timers: usize,
    pub stats: ConnectionStats,
}

// ----------------------------------------------------------------------------
// Controller
// ----------------------------------------------------------------------------

/// External collaborators a session talks to.
pub struct SessionBackends {
    pub clock: Rc<dyn Clock>,
    pub connector: Box<dyn Connector>,
    pub devices: Box<dyn MediaDevices>,
    pub snapshots: Box<dyn SnapshotSink>,
    pub fullscreen: Box<dyn FullscreenApi>,
}

impl SessionBackends {
    /// Real clock, WebSocket transport, configured camera and download dir.
    pub fn system(config: &TelemetryConfig) -> Self {
        Self {
            clock: Rc::new(SystemClock::new()),
            connector: Box::new(WsConnector::new()),
            devices: Box::new(SystemDevices::new(config.sources.camera.clone())),
            snapshots: Box::new(DownloadDir::new(config.snapshot_dir.clone())),
            fullscreen: Box::new(HeadlessDisplay::default()),
        }
    }
}

pub struct CameraSessionController {
    clock: Rc<dyn Clock>,
    timers: TimerQueue<SessionTimer>,
    connection: ConnectionManager,
    simulator: SimulatedDetectionGenerator,
    renderer: OverlayRenderer,
    compositor: SnapshotCompositor,
    snapshots: Box<dyn SnapshotSink>,
    devices: Box<dyn MediaDevices>,
    display: Box<dyn FullscreenApi>,
    surface: VideoSurface,
    latest: LatestFrame,
    detection_url: String,
    sources: SourceSettings,
    capture: CaptureConstraints,
    mode: SourceMode,
    streaming: bool,
    overlay_enabled: bool,
    fullscreen: bool,
    last_error: Option<String>,
    reported_feed_error: Option<String>,
}

impl CameraSessionController {
    pub fn new(config: &TelemetryConfig, backends: SessionBackends) -> Self {
        let transformer = CoordinateTransformer::new(config.overlay.default_frame_size);
        let fullscreen = backends.fullscreen.is_fullscreen();
        Self {
            timers: TimerQueue::new(backends.clock.clone()),
            clock: backends.clock,
            connection: ConnectionManager::new(
                backends.connector,
                Box::new(FixedDelay::new(config.reconnect_delay)),
            ),
            simulator: SimulatedDetectionGenerator::new(
                config.simulation_interval,
                config.overlay.default_frame_size,
            ),
            renderer: OverlayRenderer::new(transformer, config.overlay.toggles),
            compositor: SnapshotCompositor::new(transformer, SnapshotOptions::default()),
            snapshots: backends.snapshots,
            devices: backends.devices,
            display: backends.fullscreen,
            surface: VideoSurface::new(),
            latest: LatestFrame::default(),
            detection_url: config.detection_url.clone(),
            sources: config.sources.clone(),
            capture: config.capture,
            mode: SourceMode::DeviceCamera,
            streaming: false,
            overlay_enabled: config.overlay.enabled,
            fullscreen,
            last_error: None,
            reported_feed_error: None,
        }
    }

    /// Session with system backends. A configured overlay font replaces the
    /// embedded one.
    pub fn from_config(config: &TelemetryConfig) -> Result<Self> {
        let mut session = Self::new(config, SessionBackends::system(config));
        if let Some(path) = &config.overlay.font_path {
            session.compositor.set_font(load_font(path)?);
            log::info!("overlay font loaded from {}", path.display());
        }
        Ok(session)
    }

    // ---- Control ----

    /// Start streaming from `mode`, replacing any current source.
    ///
    /// On failure the session stays stopped and the message is kept in
    /// `last_error`; calling `start` again retries.
    pub fn start(&mut self, mode: SourceMode) -> Result<()> {
        self.release_source();
        self.mode = mode;

        let (origin, acquired) = match mode {
            SourceMode::DeviceCamera => (
                self.sources.camera.clone(),
                self.devices
                    .get_user_media(&self.capture)
                    .map_err(|e| anyhow!("unable to access camera: {:#}", e)),
            ),
            SourceMode::IpStream => {
                let url = self.sources.ip_stream_url.clone();
                let stream = self
                    .devices
                    .open_stream(&url)
                    .map_err(|e| anyhow!("failed to load IP stream {}: {:#}", url, e));
                (url, stream)
            }
            SourceMode::ServerStream => {
                let url = self.sources.server_stream_url.clone();
                let stream = self
                    .devices
                    .open_stream(&url)
                    .map_err(|e| anyhow!("failed to load server stream {}: {:#}", url, e));
                (url, stream)
            }
        };

        let stream = match acquired {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("{:#}", e);
                self.last_error = Some(format!("{:#}", e));
                // The detection connection is independent of the video source.
                self.sync_simulator();
                self.refresh_overlay();
                return Err(e);
            }
        };

        log::info!("{} source started ({})", mode, origin);
        self.surface.attach(mode, origin, stream);
        self.streaming = true;
        self.last_error = None;
        self.reported_feed_error = None;

        let url = self.detection_url.clone();
        self.connection.open(&url, &mut self.timers);
        self.sync_simulator();
        self.refresh_overlay();
        Ok(())
    }

    /// Stop everything: media tracks, connection, simulator, timers.
    pub fn stop(&mut self) {
        let was_streaming = self.streaming;
        self.release_source();
        self.connection.close(&mut self.timers);
        self.simulator.stop(&mut self.timers);
        self.timers.cancel_all();
        self.latest.clear();
        self.renderer.clear();
        if was_streaming {
            log::info!("session stopped");
        }
    }

    /// Select a source mode. While streaming this restarts on the new source;
    /// the detection connection is kept.
    pub fn switch_mode(&mut self, mode: SourceMode) -> Result<()> {
        if !self.streaming {
            self.mode = mode;
            return Ok(());
        }
        if self.mode == mode {
            return Ok(());
        }
        self.start(mode)
    }

    pub fn set_overlay_enabled(&mut self, enabled: bool) {
        if self.overlay_enabled == enabled {
            return;
        }
        self.overlay_enabled = enabled;
        self.sync_simulator();
        self.refresh_overlay();
    }

    pub fn set_toggles(&mut self, toggles: OverlayToggles) {
        self.renderer.set_toggles(toggles);
        self.refresh_overlay();
    }

    pub fn toggle_fullscreen(&mut self) -> Result<()> {
        if self.display.is_fullscreen() {
            self.display.exit_fullscreen()?;
        } else {
            self.display.request_fullscreen()?;
        }
        self.on_fullscreen_change(self.display.is_fullscreen());
        Ok(())
    }

    /// Mirror a platform-reported fullscreen change.
    pub fn on_fullscreen_change(&mut self, fullscreen: bool) {
        if self.fullscreen != fullscreen {
            log::debug!("fullscreen {}", if fullscreen { "entered" } else { "exited" });
        }
        self.fullscreen = fullscreen;
    }

    // ---- Loop ----

    /// One pass of the session loop: transport events first, then due timers,
    /// then source health. Returns whether the overlay was re-rendered.
    pub fn tick(&mut self) -> bool {
        let mut changed = false;

        for update in self.connection.poll(&mut self.timers) {
            match update {
                ConnectionUpdate::State(state) => {
                    log::debug!("connection now {}", state);
                    self.sync_simulator();
                }
                ConnectionUpdate::Frame(frame) => {
                    self.latest.set(frame, FrameOrigin::Live);
                    changed = true;
                }
            }
        }

        for (id, timer) in self.timers.take_due() {
            match timer {
                SessionTimer::Reconnect => {
                    self.connection.on_reconnect_timer(id, &mut self.timers);
                    self.sync_simulator();
                }
                SessionTimer::SimulationTick => {
                    if let Some(frame) = self.simulator.on_tick(id, self.clock.as_ref()) {
                        self.latest.set(frame, FrameOrigin::Simulated);
                        changed = true;
                    }
                }
            }
        }

        if let Some(error) = self.surface.feed_error() {
            if self.reported_feed_error.as_deref() != Some(error.as_str()) {
                log::warn!("{}", error);
                self.last_error = Some(error.clone());
                self.reported_feed_error = Some(error);
            }
        }

        let display_fullscreen = self.display.is_fullscreen();
        if display_fullscreen != self.fullscreen {
            self.on_fullscreen_change(display_fullscreen);
        }

        if changed {
            self.refresh_overlay();
        }
        changed
    }

    /// How long the loop may sleep before the next timer is due, capped at `max`.
    pub fn next_wakeup(&self, max: Duration) -> Duration {
        self.timers
            .time_until_next()
            .map(|d| d.min(max))
            .unwrap_or(max)
    }

    // ---- Output ----

    pub fn overlay(&self) -> &[OverlayElement] {
        self.renderer.elements()
    }

    /// Export the current video frame with the overlay burned in exactly as
    /// shown: disabled overlay or hidden boxes/labels stay out of the image.
    /// `Ok(None)` when no video frame is available.
    pub fn take_snapshot(&mut self) -> Result<Option<SnapshotArtifact>> {
        let video = self.surface.current_frame();
        self.compositor.export(
            video.as_ref(),
            self.latest.get(),
            self.overlay_enabled.then(|| self.renderer.toggles()),
            self.clock.epoch_millis(),
            self.snapshots.as_mut(),
        )
    }

    pub fn status(&self) -> SessionStatus {
        let toggles = self.renderer.toggles();
        SessionStatus {
            mode: self.mode,
            streaming: self.streaming,
            connection: self.connection.state(),
            overlay_enabled: self.overlay_enabled,
            show_boxes: toggles.show_boxes,
            show_labels: toggles.show_labels,
            fullscreen: self.fullscreen,
            simulator_running: self.simulator.is_running(),
            last_error: self.last_error.clone(),
            frame_id: self.latest.get().map(|f| f.frame_id),
            frame_origin: self.latest.origin(),
            animal_count: self.latest.get().map(|f| f.animal_count()).unwrap_or(0),
            overlay_elements: self.renderer.elements().len(),
            live_tracks: self.surface.live_track_count(),
            pending_timers: self.timers.pending(),
            stats: self.connection.stats(),
        }
    }

    pub fn mode(&self) -> SourceMode {
        self.mode
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        self.connection.stats()
    }

    pub fn simulator_running(&self) -> bool {
        self.simulator.is_running()
    }

    pub fn latest_frame(&self) -> Option<&DetectionFrame> {
        self.latest.get()
    }

    pub fn latest_origin(&self) -> Option<FrameOrigin> {
        self.latest.origin()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.pending()
    }

    pub fn live_track_count(&self) -> usize {
        self.surface.live_track_count()
    }

    pub fn native_dimensions(&self) -> (u32, u32) {
        self.surface.native_dimensions()
    }

    // ---- Internals ----

    fn release_source(&mut self) {
        self.surface.clear();
        self.streaming = false;
        self.reported_feed_error = None;
    }

    fn sync_simulator(&mut self) {
        let gate = SimulationGate {
            capturing: self.streaming,
            overlay_enabled: self.overlay_enabled,
            live_connected: self.connection.is_connected(),
        };
        self.simulator.sync(gate, &mut self.timers);
    }

    fn refresh_overlay(&mut self) {
        if self.overlay_enabled && self.streaming {
            self.renderer.render(self.latest.get());
        } else {
            self.renderer.clear();
        }
    }
}

impl Drop for CameraSessionController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::entity;
    use crate::frame::FrameSize;

    fn frame(id: u64, tracks: &[u64]) -> DetectionFrame {
        DetectionFrame::new(
            id,
            0.0,
            10.0,
            tracks
                .iter()
                .map(|&t| entity(t, "cow", [10.0 * t as f64, 10.0, 10.0 * t as f64 + 50.0, 60.0]))
                .collect(),
            Some(FrameSize::new(1280.0, 720.0)),
        )
    }

    #[test]
    fn latest_frame_replaces_previous() {
        let mut latest = LatestFrame::default();
        latest.set(frame(1, &[1, 2]), FrameOrigin::Simulated);
        latest.set(frame(2, &[2, 3]), FrameOrigin::Live);
        assert_eq!(latest.get().unwrap().track_ids(), vec![2, 3]);
        assert_eq!(latest.origin(), Some(FrameOrigin::Live));
        latest.clear();
        assert!(latest.get().is_none());
    }

    #[test]
    fn headless_display_toggles() {
        let mut display = HeadlessDisplay::default();
        assert!(!display.is_fullscreen());
        display.request_fullscreen().unwrap();
        assert!(display.is_fullscreen());
        display.exit_fullscreen().unwrap();
        assert!(!display.is_fullscreen());
    }
}
