//! Herd telemetry client
//!
//! Live detection overlay for a livestock camera feed. The client keeps a
//! streaming connection to a remote animal detector, draws each tracked
//! animal's box and identity over the video, and falls back to a demo herd
//! when no detector is reachable.
//!
//! # Architecture
//!
//! Everything stateful runs on one thread inside `CameraSessionController`.
//! Background threads (WebSocket readers, MJPEG readers) only report through
//! channels or "latest value" slots, so there is a single writer for every
//! state machine.
//!
//! # Module Structure
//!
//! - `frame`: detection frame model (DetectionFrame, TrackedEntity, BBox)
//! - `transform`: detector space to viewport percent / canvas pixels
//! - `transport`: connection state machine, wire format, WebSocket transport
//! - `simulate`: demo detections when no live stream is connected
//! - `overlay`: per-entity overlay elements and the class palette
//! - `snapshot`: PNG export with the overlay burned in
//! - `media`: video sources (device camera, IP stream, server stream)
//! - `session`: the controller tying it all together
//! - `clock`, `timers`: time source and the session's timer queue
//! - `config`: file + environment configuration
//! - `ui`: terminal stage display for the binaries

pub mod clock;
pub mod config;
pub mod frame;
pub mod media;
pub mod overlay;
pub mod session;
pub mod simulate;
pub mod snapshot;
pub mod timers;
pub mod transform;
pub mod transport;
pub mod ui;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TelemetryConfig;
pub use frame::{BBox, DetectionFrame, FrameSize, TrackedEntity, DEFAULT_FRAME_SIZE};
pub use media::{CaptureConstraints, FacingMode, MediaDevices, MediaStream, SourceMode};
pub use overlay::{class_color, Color, OverlayElement, OverlayRenderer, OverlayToggles};
pub use session::{
    CameraSessionController, FrameOrigin, FullscreenApi, HeadlessDisplay, SessionBackends,
    SessionStatus,
};
pub use simulate::{SimulatedDetectionGenerator, SimulationGate};
pub use snapshot::{DownloadDir, SnapshotArtifact, SnapshotCompositor, SnapshotSink};
pub use timers::{SessionTimer, TimerId, TimerQueue};
pub use transform::{
    to_canvas_pixels, to_viewport_percent, CanvasRect, CoordinateTransformer, ViewportRect,
};
pub use transport::{
    parse_detection_message, ConnectionManager, ConnectionState, ConnectionStats, Connector,
    ReconnectPolicy, Transport, TransportEvent, TransportEventKind, TransportId,
};
