//! Snapshot export.
//!
//! Burns the current overlay into the current video frame at the video's
//! native resolution and delivers the result as `snapshot-<epoch-ms>.png`.
//!
//! Boxes are placed with `to_canvas_pixels` against the native buffer size, so
//! the exported image lines up with the on-screen overlay regardless of how
//! large the video is displayed.

use ab_glyph::FontArc;
use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::frame::{DetectionFrame, FrameSize};
use crate::overlay::{class_color, identity_label_text, OverlayToggles};
use crate::transform::CoordinateTransformer;

const LABEL_TEXT_COLOR: image::Rgba<u8> = image::Rgba([255, 255, 255, 255]);

static EMBEDDED_FONT: &[u8] = include_bytes!("../assets/DejaVuSansMono.ttf");

pub fn snapshot_filename(epoch_ms: u64) -> String {
    format!("snapshot-{}.png", epoch_ms)
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("encode snapshot png")?;
    Ok(bytes)
}

/// Label font shipped with the crate (DejaVu Sans Mono).
pub fn embedded_font() -> Result<FontArc> {
    FontArc::try_from_slice(EMBEDDED_FONT).map_err(|e| anyhow!("embedded overlay font: {}", e))
}

pub fn load_font(path: &Path) -> Result<FontArc> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("read overlay font {}", path.display()))?;
    FontArc::try_from_vec(bytes).map_err(|e| anyhow!("invalid font {}: {}", path.display(), e))
}

/// Where finished snapshots go.
pub trait SnapshotSink {
    /// Store `png` under `filename` and report where it ended up.
    fn deliver(&mut self, filename: &str, png: &[u8]) -> Result<PathBuf>;
}

/// Writes snapshots into a local download directory.
#[derive(Clone, Debug)]
pub struct DownloadDir {
    dir: PathBuf,
}

impl DownloadDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }
}

impl SnapshotSink for DownloadDir {
    fn deliver(&mut self, filename: &str, png: &[u8]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create snapshot dir {}", self.dir.display()))?;
        let path = self.dir.join(filename);
        std::fs::write(&path, png)
            .with_context(|| format!("write snapshot {}", path.display()))?;
        Ok(path)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotArtifact {
    pub filename: String,
    pub location: PathBuf,
    pub width: u32,
    pub height: u32,
    pub byte_len: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SnapshotOptions {
    /// Box outline thickness at 720p; scaled with the native height.
    pub line_thickness: u32,
    /// Label plate height at 720p; scaled with the native height.
    pub label_height: u32,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            line_thickness: 3,
            label_height: 22,
        }
    }
}

pub struct SnapshotCompositor {
    transformer: CoordinateTransformer,
    options: SnapshotOptions,
    font: Option<FontArc>,
}

impl SnapshotCompositor {
    /// Compositor using the embedded label font.
    pub fn new(transformer: CoordinateTransformer, options: SnapshotOptions) -> Self {
        let font = match embedded_font() {
            Ok(font) => Some(font),
            Err(e) => {
                log::warn!("{:#}; snapshot labels will have no text", e);
                None
            }
        };
        Self {
            transformer,
            options,
            font,
        }
    }

    /// Replace the label font, e.g. with one loaded through `load_font`.
    pub fn set_font(&mut self, font: FontArc) {
        self.font = Some(font);
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Copy `video` and burn in whatever `overlay` shows: boxes when
    /// `show_boxes`, identity label plates when `show_labels`. `None` means the
    /// overlay is disabled. Returns `None` when the video has no decoded frame yet.
    pub fn compose(
        &self,
        video: &RgbaImage,
        frame: Option<&DetectionFrame>,
        overlay: Option<OverlayToggles>,
    ) -> Option<RgbaImage> {
        let (width, height) = video.dimensions();
        if width == 0 || height == 0 {
            return None;
        }
        let mut canvas = video.clone();
        if let (Some(toggles), Some(frame)) = (overlay, frame) {
            self.draw_frame(&mut canvas, frame, toggles);
        }
        Some(canvas)
    }

    /// Compose and hand the PNG to `sink`. A missing or empty video frame is
    /// a no-op and returns `Ok(None)`.
    pub fn export(
        &self,
        video: Option<&RgbaImage>,
        frame: Option<&DetectionFrame>,
        overlay: Option<OverlayToggles>,
        epoch_ms: u64,
        sink: &mut dyn SnapshotSink,
    ) -> Result<Option<SnapshotArtifact>> {
        let Some(image) = video.and_then(|v| self.compose(v, frame, overlay)) else {
            log::debug!("snapshot skipped: no decoded video frame yet");
            return Ok(None);
        };
        let png = encode_png(&image)?;
        let filename = snapshot_filename(epoch_ms);
        let location = sink.deliver(&filename, &png)?;
        log::info!(
            "snapshot {} ({}x{}, {} bytes)",
            location.display(),
            image.width(),
            image.height(),
            png.len()
        );
        Ok(Some(SnapshotArtifact {
            filename,
            location,
            width: image.width(),
            height: image.height(),
            byte_len: png.len(),
        }))
    }

    // imageproc clips every primitive to the canvas; coordinates stay unclipped.
    fn draw_frame(&self, canvas: &mut RgbaImage, frame: &DetectionFrame, toggles: OverlayToggles) {
        let (width, height) = canvas.dimensions();
        let native = FrameSize::new(width as f64, height as f64);
        let scale = (height as f64 / 720.0).max(0.25);
        let thickness = ((self.options.line_thickness as f64 * scale).round() as u32).max(1);
        let label_height = ((self.options.label_height as f64 * scale).round() as u32).max(8);
        let text_scale = label_height.saturating_sub(4).max(6) as f32;

        for entity in &frame.entities {
            if !entity.bbox.is_well_formed() {
                continue;
            }
            let rect = self
                .transformer
                .to_canvas_pixels(&entity.bbox, frame.frame_size, native);
            let color = class_color(&entity.class_name).to_rgba(255);

            let left = rect.x.round() as i64;
            let top = rect.y.round() as i64;
            let right = (rect.x + rect.width).round() as i64;
            let bottom = (rect.y + rect.height).round() as i64;
            if right <= left || bottom <= top {
                continue;
            }
            if right <= 0 || bottom <= 0 || left >= width as i64 || top >= height as i64 {
                continue;
            }
            let (x, y) = (left as i32, top as i32);
            let (w, h) = ((right - left) as u32, (bottom - top) as u32);

            if toggles.show_boxes {
                for t in 0..thickness {
                    let inner_w = w.saturating_sub(2 * t);
                    let inner_h = h.saturating_sub(2 * t);
                    if inner_w == 0 || inner_h == 0 {
                        break;
                    }
                    let r = Rect::at(x + t as i32, y + t as i32).of_size(inner_w, inner_h);
                    draw_hollow_rect_mut(canvas, r, color);
                }
            }

            if !toggles.show_labels {
                continue;
            }
            // Identity label plate above the box, or just inside it at the top edge.
            let text = identity_label_text(entity);
            let plate_y = if y >= label_height as i32 {
                y - label_height as i32
            } else {
                y
            };
            let text_w = match &self.font {
                Some(font) => text_size(text_scale, font, &text).0,
                None => text.chars().count() as u32 * (label_height as f64 * 0.55).ceil() as u32,
            };
            draw_filled_rect_mut(
                canvas,
                Rect::at(x, plate_y).of_size(text_w + 8, label_height),
                color,
            );
            if let Some(font) = &self.font {
                draw_text_mut(canvas, LABEL_TEXT_COLOR, x + 4, plate_y + 2, text_scale, font, &text);
            }
        }
    }
}

impl Default for SnapshotCompositor {
    fn default() -> Self {
        Self::new(CoordinateTransformer::default(), SnapshotOptions::default())
    }
}
