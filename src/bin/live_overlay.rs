//! live_overlay - run a camera session with the live detection overlay
//!
//! Connects to the configured detector, shows demo detections while it is
//! unreachable, and optionally writes periodic snapshots. Ctrl-C tears the
//! session down cleanly.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use herd_telemetry::ui::{status_line, Ui};
use herd_telemetry::{CameraSessionController, OverlayToggles, SourceMode, TelemetryConfig};

const MAX_IDLE: Duration = Duration::from_millis(20);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Video source (camera|ip|server).
    #[arg(long, env = "HERD_SOURCE", default_value = "camera")]
    source: String,
    /// Stop after this many seconds (0 runs until Ctrl-C).
    #[arg(long, default_value_t = 0)]
    seconds: u64,
    /// Write a snapshot every N seconds (0 disables).
    #[arg(long, default_value_t = 0)]
    snapshot_every: u64,
    /// Write one last snapshot before shutting down.
    #[arg(long)]
    snapshot_on_exit: bool,
    /// Start with the overlay disabled.
    #[arg(long)]
    no_overlay: bool,
    /// Hide bounding boxes.
    #[arg(long)]
    hide_boxes: bool,
    /// Hide identity and class labels.
    #[arg(long)]
    hide_labels: bool,
    /// Log a status line every N seconds (0 disables).
    #[arg(long, default_value_t = 5)]
    status_every: u64,
    /// Print every rendered overlay as a JSON line on stdout.
    #[arg(long)]
    json: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let source: SourceMode = args.source.parse()?;
    let ui = Ui::detect(Some(&args.ui), !std::io::stdout().is_terminal());

    let cfg = {
        let _stage = ui.stage("Load configuration");
        TelemetryConfig::load()?
    };
    log::info!(
        "detector {} | reconnect every {} ms | snapshots to {}",
        cfg.detection_url,
        cfg.reconnect_delay.as_millis(),
        cfg.snapshot_dir.display()
    );

    let mut session = {
        let _stage = ui.stage("Prepare session");
        CameraSessionController::from_config(&cfg)?
    };
    session.set_toggles(OverlayToggles {
        show_boxes: cfg.overlay.toggles.show_boxes && !args.hide_boxes,
        show_labels: cfg.overlay.toggles.show_labels && !args.hide_labels,
    });
    if args.no_overlay {
        session.set_overlay_enabled(false);
    }

    {
        let mut stage = ui.stage(&format!("Start {} source", source));
        if let Err(e) = session.start(source) {
            stage.fail(format!("{:#}", e));
            return Err(e);
        }
    }

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))
        .context("install Ctrl-C handler")?;

    let started = Instant::now();
    let deadline = (args.seconds > 0).then(|| started + Duration::from_secs(args.seconds));
    let status_every = (args.status_every > 0).then(|| Duration::from_secs(args.status_every));
    let snapshot_every =
        (args.snapshot_every > 0).then(|| Duration::from_secs(args.snapshot_every));
    let mut last_status = started;
    let mut last_snapshot = started;

    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if deadline.is_some_and(|d| now >= d) {
            break;
        }

        if session.tick() && args.json {
            let line = serde_json::json!({
                "frame_id": session.latest_frame().map(|f| f.frame_id),
                "origin": session.latest_origin(),
                "elements": session.overlay(),
            });
            println!("{}", line);
        }

        if status_every.is_some_and(|every| now.duration_since(last_status) >= every) {
            log::info!("{}", status_line(&session.status()));
            last_status = now;
        }
        if snapshot_every.is_some_and(|every| now.duration_since(last_snapshot) >= every) {
            write_snapshot(&mut session);
            last_snapshot = now;
        }

        std::thread::sleep(session.next_wakeup(MAX_IDLE));
    }

    if args.snapshot_on_exit {
        write_snapshot(&mut session);
    }

    let stats = session.connection_stats();
    {
        let _stage = ui.stage("Tear down session");
        session.stop();
    }
    log::info!(
        "session ended after {:.1}s: {} frames received, {} malformed dropped, {} reconnects; {} live tracks, {} pending timers",
        started.elapsed().as_secs_f64(),
        stats.frames_received,
        stats.malformed_dropped,
        stats.reconnects_scheduled,
        session.live_track_count(),
        session.pending_timers()
    );
    Ok(())
}

fn write_snapshot(session: &mut CameraSessionController) {
    match session.take_snapshot() {
        Ok(Some(artifact)) => log::info!(
            "saved {} ({}x{})",
            artifact.location.display(),
            artifact.width,
            artifact.height
        ),
        Ok(None) => log::info!("no video frame yet; snapshot skipped"),
        Err(e) => log::warn!("snapshot failed: {:#}", e),
    }
}
