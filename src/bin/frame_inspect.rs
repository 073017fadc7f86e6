//! frame_inspect - validate detection messages and print their overlay layout
//!
//! Reads newline-delimited detection messages from a file or stdin. Each valid
//! message is printed as one JSON line holding the overlay elements it would
//! produce; malformed messages are reported on stderr.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;

use herd_telemetry::{
    parse_detection_message, CanvasRect, CoordinateTransformer, FrameSize, OverlayElement,
    OverlayRenderer, OverlayToggles, DEFAULT_FRAME_SIZE,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Input file with one detection message per line (stdin when omitted).
    input: Option<PathBuf>,
    /// Also report pixel rectangles for a WIDTHxHEIGHT display container.
    #[arg(long, value_parser = parse_size, value_name = "WxH")]
    container: Option<FrameSize>,
    /// Frame size assumed when a message omits one.
    #[arg(long, value_parser = parse_size, value_name = "WxH")]
    default_frame_size: Option<FrameSize>,
    /// Hide bounding boxes.
    #[arg(long)]
    hide_boxes: bool,
    /// Hide labels.
    #[arg(long)]
    hide_labels: bool,
    /// Fail on the first malformed message.
    #[arg(long)]
    strict: bool,
}

#[derive(Serialize)]
struct InspectedFrame<'a> {
    frame_id: u64,
    timestamp: f64,
    animal_count: usize,
    identified: usize,
    elements: &'a [OverlayElement],
    #[serde(skip_serializing_if = "Option::is_none")]
    pixels: Option<Vec<CanvasRect>>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let reader: Box<dyn BufRead> = match &args.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("open {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let transformer =
        CoordinateTransformer::new(args.default_frame_size.unwrap_or(DEFAULT_FRAME_SIZE));
    let mut renderer = OverlayRenderer::new(
        transformer,
        OverlayToggles {
            show_boxes: !args.hide_boxes,
            show_labels: !args.hide_labels,
        },
    );

    let (mut accepted, mut rejected) = (0usize, 0usize);
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("read input")?;
        if line.trim().is_empty() {
            continue;
        }
        let frame = match parse_detection_message(line.as_bytes()) {
            Ok(frame) => frame,
            Err(e) => {
                rejected += 1;
                if args.strict {
                    return Err(e.context(format!("line {}", index + 1)));
                }
                eprintln!("line {}: {:#}", index + 1, e);
                continue;
            }
        };
        accepted += 1;

        let elements = renderer.render(Some(&frame));
        let pixels = args
            .container
            .map(|container| elements.iter().map(|e| e.pixel_rect(container)).collect());
        let out = InspectedFrame {
            frame_id: frame.frame_id,
            timestamp: frame.timestamp,
            animal_count: frame.animal_count(),
            identified: frame.identified_count(),
            elements,
            pixels,
        };
        println!("{}", serde_json::to_string(&out)?);
    }

    eprintln!("{} frames, {} malformed", accepted, rejected);
    Ok(())
}

fn parse_size(raw: &str) -> Result<FrameSize, String> {
    let parsed = raw
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("expected WIDTHxHEIGHT"))
        .and_then(|(w, h)| {
            let w: f64 = w.trim().parse().context("width")?;
            let h: f64 = h.trim().parse().context("height")?;
            Ok(FrameSize::new(w, h))
        })
        .map_err(|e| format!("{:#}", e))?;
    if !parsed.is_valid() {
        return Err(format!("'{}' must be two positive numbers", raw));
    }
    Ok(parsed)
}
