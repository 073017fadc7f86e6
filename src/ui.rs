//! Terminal presentation for the binaries: stage spinners and one-line
//! session summaries.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::time::{Duration, Instant};

use crate::session::{FrameOrigin, SessionStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    pub fn parse(flag: Option<&str>) -> Self {
        match flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    pretty: bool,
}

impl Ui {
    /// `quiet` suppresses spinners in auto mode, e.g. when logging at debug.
    pub fn new(mode: UiMode, is_tty: bool, quiet: bool) -> Self {
        let pretty = is_tty
            && match mode {
                UiMode::Pretty => true,
                UiMode::Auto => !quiet,
                UiMode::Plain => false,
            };
        Self { pretty }
    }

    /// Decide from the process's stderr.
    pub fn detect(flag: Option<&str>, quiet: bool) -> Self {
        Self::new(UiMode::parse(flag), std::io::stderr().is_terminal(), quiet)
    }

    pub fn is_pretty(&self) -> bool {
        self.pretty
    }

    /// Announce a stage; completion is reported when the guard drops.
    pub fn stage(&self, name: &str) -> Stage {
        let spinner = if self.pretty {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            spinner.set_style(
                ProgressStyle::with_template("{spinner} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            spinner.set_message(format!("{name}…"));
            Some(spinner)
        } else {
            eprintln!("==> {}", name);
            None
        };
        Stage {
            name: name.to_string(),
            started: Instant::now(),
            spinner,
            outcome: None,
        }
    }
}

pub struct Stage {
    name: String,
    started: Instant,
    spinner: Option<ProgressBar>,
    outcome: Option<String>,
}

impl Stage {
    /// Update the spinner text while the stage runs.
    pub fn progress(&self, message: &str) {
        if let Some(spinner) = &self.spinner {
            spinner.set_message(format!("{}: {}", self.name, message));
        }
    }

    /// Mark the stage failed; reported instead of the checkmark.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.outcome = Some(reason.into());
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        let elapsed = format_elapsed(self.started.elapsed());
        let message = match &self.outcome {
            None => format!("✔ {} ({})", self.name, elapsed),
            Some(reason) => format!("✘ {} ({}): {}", self.name, elapsed, reason),
        };
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

/// `ip | connected | live #412 (3 animals, 3 boxes)`
pub fn status_line(status: &SessionStatus) -> String {
    let source = if status.streaming {
        status.mode.to_string()
    } else {
        format!("{} (stopped)", status.mode)
    };
    let frame = match (status.frame_id, status.frame_origin) {
        (Some(id), Some(origin)) => {
            let origin = match origin {
                FrameOrigin::Live => "live",
                FrameOrigin::Simulated => "demo",
            };
            format!(
                "{} #{} ({} animals, {} boxes)",
                origin, id, status.animal_count, status.overlay_elements
            )
        }
        _ => "no detections".to_string(),
    };
    let mut line = format!("{} | {} | {}", source, status.connection, frame);
    if !status.overlay_enabled {
        line.push_str(" | overlay off");
    }
    if let Some(error) = &status.last_error {
        line.push_str(" | error: ");
        line.push_str(error);
    }
    line
}

fn format_elapsed(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::SourceMode;
    use crate::transport::{ConnectionState, ConnectionStats};

    fn status() -> SessionStatus {
        SessionStatus {
            mode: SourceMode::IpStream,
            streaming: true,
            connection: ConnectionState::Connected,
            overlay_enabled: true,
            show_boxes: true,
            show_labels: true,
            fullscreen: false,
            simulator_running: false,
            last_error: None,
            frame_id: Some(412),
            frame_origin: Some(FrameOrigin::Live),
            animal_count: 3,
            overlay_elements: 3,
            live_tracks: 1,
            pending_timers: 0,
            stats: ConnectionStats::default(),
        }
    }

    #[test]
    fn plain_mode_never_pretty() {
        assert!(!Ui::new(UiMode::Plain, true, false).is_pretty());
        assert!(!Ui::new(UiMode::Pretty, false, false).is_pretty());
        assert!(Ui::new(UiMode::Auto, true, false).is_pretty());
        assert!(!Ui::new(UiMode::Auto, true, true).is_pretty());
        assert_eq!(UiMode::parse(Some("pretty")), UiMode::Pretty);
    }

    #[test]
    fn status_line_summarises_session() {
        assert_eq!(
            status_line(&status()),
            "ip | connected | live #412 (3 animals, 3 boxes)"
        );
        let mut stopped = status();
        stopped.streaming = false;
        stopped.frame_id = None;
        stopped.overlay_enabled = false;
        stopped.last_error = Some("unable to access camera".into());
        assert_eq!(
            status_line(&stopped),
            "ip (stopped) | connected | no detections | overlay off | error: unable to access camera"
        );
    }

    #[test]
    fn elapsed_formatting() {
        assert_eq!(format_elapsed(Duration::from_millis(250)), "250ms");
        assert_eq!(format_elapsed(Duration::from_millis(1500)), "1.50s");
    }
}
