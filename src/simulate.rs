//! Demo-mode detection stream.
//!
//! When no live detector is connected the session still needs something to
//! draw, so the simulator emits frames for a small fixed herd on a repeating
//! timer. Each animal drifts along a smooth periodic path with its own phase,
//! which keeps the boxes moving without jitter.
//!
//! The simulator runs only while the `SimulationGate` is open:
//! capture active, overlay enabled, live stream not connected. The session
//! re-evaluates the gate synchronously whenever one of those inputs changes,
//! and a closed gate cancels the timer on the spot.

use rand::Rng;
use std::f64::consts::{PI, TAU};
use std::time::Duration;

use crate::clock::Clock;
use crate::frame::{BBox, DetectionFrame, FrameSize, TrackedEntity, DEFAULT_FRAME_SIZE};
use crate::timers::{SessionTimer, TimerId, TimerQueue};

pub const DEFAULT_SIMULATION_INTERVAL: Duration = Duration::from_millis(100);

/// Confidence jitter applied per frame, +/-.
const CONFIDENCE_JITTER: f64 = 0.03;

/// Inputs that decide whether demo frames should be produced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimulationGate {
    pub capturing: bool,
    pub overlay_enabled: bool,
    pub live_connected: bool,
}

impl SimulationGate {
    pub fn is_open(&self) -> bool {
        self.capturing && self.overlay_enabled && !self.live_connected
    }
}

#[derive(Clone, Debug)]
struct HerdMember {
    track_id: u64,
    entity_id: &'static str,
    class_name: &'static str,
    /// Resting box in `DEFAULT_FRAME_SIZE` coordinates.
    home: [f64; 4],
    amplitude: (f64, f64),
    period_s: f64,
    confidence: f64,
    identity_confidence: f64,
    is_identified: bool,
    health_score: Option<f64>,
    behavior: Option<&'static str>,
}

fn demo_herd() -> Vec<HerdMember> {
    vec![
        HerdMember {
            track_id: 1,
            entity_id: "BOV_0001",
            class_name: "Cow",
            home: [120.0, 150.0, 380.0, 420.0],
            amplitude: (40.0, 18.0),
            period_s: 9.0,
            confidence: 0.93,
            identity_confidence: 0.94,
            is_identified: true,
            health_score: Some(0.92),
            behavior: Some("grazing"),
        },
        HerdMember {
            track_id: 2,
            entity_id: "BOV_0002",
            class_name: "cow",
            home: [520.0, 200.0, 760.0, 460.0],
            amplitude: (55.0, 12.0),
            period_s: 11.0,
            confidence: 0.88,
            identity_confidence: 0.89,
            is_identified: true,
            health_score: Some(0.87),
            behavior: Some("walking"),
        },
        HerdMember {
            track_id: 3,
            entity_id: "OVI_0001",
            class_name: "Sheep",
            home: [860.0, 320.0, 1020.0, 470.0],
            amplitude: (25.0, 20.0),
            period_s: 7.0,
            confidence: 0.84,
            identity_confidence: 0.81,
            is_identified: true,
            health_score: Some(0.95),
            behavior: Some("resting"),
        },
        HerdMember {
            track_id: 4,
            entity_id: "TEMP_0004",
            class_name: "goat",
            home: [300.0, 480.0, 430.0, 620.0],
            amplitude: (30.0, 15.0),
            period_s: 6.0,
            confidence: 0.71,
            identity_confidence: 0.42,
            is_identified: false,
            health_score: None,
            behavior: None,
        },
    ]
}

pub struct SimulatedDetectionGenerator {
    interval: Duration,
    frame_size: FrameSize,
    herd: Vec<HerdMember>,
    timer: Option<TimerId>,
    next_frame_id: u64,
}

impl SimulatedDetectionGenerator {
    pub fn new(interval: Duration, frame_size: FrameSize) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            frame_size: frame_size.or(DEFAULT_FRAME_SIZE),
            herd: demo_herd(),
            timer: None,
            next_frame_id: 1,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_some()
    }

    /// Start or stop to match `gate`. Returns whether the simulator runs afterwards.
    pub fn sync(&mut self, gate: SimulationGate, timers: &mut TimerQueue<SessionTimer>) -> bool {
        match (gate.is_open(), self.is_running()) {
            (true, false) => self.start(timers),
            (false, true) => self.stop(timers),
            _ => {}
        }
        self.is_running()
    }

    pub fn start(&mut self, timers: &mut TimerQueue<SessionTimer>) {
        if self.timer.is_some() {
            return;
        }
        log::info!(
            "demo detections started ({} ms interval)",
            self.interval.as_millis()
        );
        self.timer = Some(timers.schedule_repeating(self.interval, SessionTimer::SimulationTick));
    }

    pub fn stop(&mut self, timers: &mut TimerQueue<SessionTimer>) {
        if let Some(id) = self.timer.take() {
            timers.cancel(id);
            log::info!("demo detections stopped");
        }
    }

    /// Produce the frame for a `SimulationTick`. Ticks from a timer this
    /// generator no longer owns yield nothing.
    pub fn on_tick(&mut self, id: TimerId, clock: &dyn Clock) -> Option<DetectionFrame> {
        if self.timer != Some(id) {
            return None;
        }
        Some(self.frame_at(clock.now(), clock.wall_time()))
    }

    /// Frame for the herd at `elapsed` since the clock origin.
    pub fn frame_at(&mut self, elapsed: Duration, timestamp: f64) -> DetectionFrame {
        let t = elapsed.as_secs_f64();
        let sx = self.frame_size.width / DEFAULT_FRAME_SIZE.width;
        let sy = self.frame_size.height / DEFAULT_FRAME_SIZE.height;
        let mut rng = rand::thread_rng();

        let entities = self
            .herd
            .iter()
            .map(|member| {
                let omega = TAU / member.period_s;
                // Distinct phase per track so the herd does not move in lockstep.
                let phase = member.track_id as f64 * 1.3;
                let angle = omega * t + phase;
                let (ax, ay) = (member.amplitude.0 * sx, member.amplitude.1 * sy);

                let home = BBox::new(
                    member.home[0] * sx,
                    member.home[1] * sy,
                    member.home[2] * sx,
                    member.home[3] * sy,
                );
                let bbox = home.shifted_within(ax * angle.sin(), ay * angle.cos(), self.frame_size);

                let velocity = (ax * omega * angle.cos(), -ay * omega * angle.sin());
                let direction = velocity.1.atan2(velocity.0) * 180.0 / PI;
                let jitter = rng.gen_range(-CONFIDENCE_JITTER..=CONFIDENCE_JITTER);

                TrackedEntity {
                    track_id: member.track_id,
                    entity_id: member.entity_id.to_string(),
                    class_name: member.class_name.to_string(),
                    bbox,
                    confidence: (member.confidence + jitter).clamp(0.0, 1.0),
                    identity_confidence: member.identity_confidence,
                    is_identified: member.is_identified,
                    velocity,
                    direction: direction.rem_euclid(360.0),
                    health_score: member.health_score,
                    behavior: member.behavior.map(str::to_string),
                }
            })
            .collect();

        let frame_id = self.next_frame_id;
        self.next_frame_id += 1;
        DetectionFrame::new(
            frame_id,
            timestamp,
            1.0 / self.interval.as_secs_f64(),
            entities,
            Some(self.frame_size),
        )
    }
}

impl Default for SimulatedDetectionGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_SIMULATION_INTERVAL, DEFAULT_FRAME_SIZE)
    }
}
