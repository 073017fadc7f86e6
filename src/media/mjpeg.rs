//! MJPEG-over-HTTP video feed.
//!
//! Serves both IP cameras and the detection server's proxied stream. A reader
//! thread pulls the multipart body (or polls a single-JPEG endpoint), decodes
//! each JPEG and keeps only the newest frame.
//!
//! The reader MUST NOT retain more than the latest frame.

use anyhow::{anyhow, Context, Result};
use image::RgbaImage;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::FrameFeed;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(5);
const SNAPSHOT_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Default)]
struct FeedState {
    frame: Option<RgbaImage>,
    error: Option<String>,
    frames_decoded: u64,
}

pub struct MjpegFeed {
    url: String,
    state: Arc<Mutex<FeedState>>,
    live: Arc<AtomicBool>,
}

impl MjpegFeed {
    /// Start reading `url`. The reader exits once `live` is cleared.
    pub fn open(url: &str, live: Arc<AtomicBool>) -> Result<Self> {
        let state = Arc::new(Mutex::new(FeedState::default()));
        let reader = FeedReader {
            url: url.to_string(),
            state: state.clone(),
            live: live.clone(),
        };
        thread::Builder::new()
            .name("mjpeg-feed".to_string())
            .spawn(move || reader.run())
            .context("spawn mjpeg reader")?;
        log::info!("mjpeg feed opening {}", url);
        Ok(Self {
            url: url.to_string(),
            state,
            live,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn frames_decoded(&self) -> u64 {
        self.state.lock().map(|s| s.frames_decoded).unwrap_or(0)
    }
}

impl FrameFeed for MjpegFeed {
    fn latest_frame(&self) -> Option<RgbaImage> {
        if !self.live.load(Ordering::SeqCst) {
            return None;
        }
        self.state.lock().ok()?.frame.clone()
    }

    fn native_size(&self) -> (u32, u32) {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.frame.as_ref().map(|f| f.dimensions()))
            .unwrap_or((0, 0))
    }

    fn error(&self) -> Option<String> {
        self.state.lock().ok()?.error.clone()
    }
}

struct FeedReader {
    url: String,
    state: Arc<Mutex<FeedState>>,
    live: Arc<AtomicBool>,
}

impl FeedReader {
    fn run(self) {
        if let Err(e) = self.pump() {
            if self.live.load(Ordering::SeqCst) {
                log::warn!("mjpeg feed {} failed: {:#}", self.url, e);
                if let Ok(mut state) = self.state.lock() {
                    state.error = Some(format!("failed to load stream {}: {:#}", self.url, e));
                }
            }
        }
    }

    fn pump(&self) -> Result<()> {
        let agent = ureq::AgentBuilder::new().timeout_read(READ_TIMEOUT).build();
        let response = agent
            .get(&self.url)
            .call()
            .with_context(|| format!("connect to {}", self.url))?;
        let multipart = response
            .header("Content-Type")
            .map(|ct| ct.to_ascii_lowercase().contains("multipart"))
            .unwrap_or(false);

        if multipart {
            let mut scanner = JpegScanner::new(response.into_reader());
            while self.live.load(Ordering::SeqCst) {
                let jpeg = scanner.next_jpeg()?;
                self.publish(&jpeg)?;
            }
            return Ok(());
        }

        // Single-image endpoint: use the body we already have, then poll.
        let mut body = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES as u64)
            .read_to_end(&mut body)
            .context("read jpeg body")?;
        self.publish(&body)?;
        while self.live.load(Ordering::SeqCst) {
            thread::sleep(SNAPSHOT_POLL_INTERVAL);
            let mut body = Vec::new();
            agent
                .get(&self.url)
                .call()
                .with_context(|| format!("poll {}", self.url))?
                .into_reader()
                .take(MAX_JPEG_BYTES as u64)
                .read_to_end(&mut body)
                .context("read jpeg body")?;
            self.publish(&body)?;
        }
        Ok(())
    }

    fn publish(&self, jpeg: &[u8]) -> Result<()> {
        if jpeg.is_empty() {
            return Err(anyhow!("empty image payload"));
        }
        let frame = image::load_from_memory(jpeg)
            .context("decode stream frame")?
            .into_rgba8();
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("feed state poisoned"))?;
        state.frames_decoded += 1;
        state.frame = Some(frame);
        Ok(())
    }
}

/// Splits a multipart MJPEG body into JPEG payloads by SOI/EOI markers,
/// ignoring part headers.
struct JpegScanner<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: Read> JpegScanner<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = [0u8; 8192];
        loop {
            if let Some((start, end)) = jpeg_span(&self.buffer) {
                let jpeg = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(jpeg);
            }
            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);
            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                // No complete image in a sane amount of data; resync on the tail.
                let keep = self.buffer.len() - 1;
                self.buffer.drain(..keep);
            }
        }
    }
}

fn jpeg_span(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let body = &buffer[start + 2..];
    let end = body.windows(2).position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn tiny_jpeg() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(8, 4, image::Rgb([200, 10, 10]));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Jpeg)
            .unwrap();
        out
    }

    #[test]
    fn span_finds_marked_payload() {
        let data = [0x00, 0x11, 0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9, 0x33];
        assert_eq!(jpeg_span(&data), Some((2, 8)));
        assert_eq!(jpeg_span(&data[..5]), None);
    }

    #[test]
    fn scanner_splits_multipart_body() {
        let jpeg = tiny_jpeg();
        let mut body = Vec::new();
        for _ in 0..2 {
            body.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
            body.extend_from_slice(&jpeg);
            body.extend_from_slice(b"\r\n");
        }
        let mut scanner = JpegScanner::new(Cursor::new(body));
        let first = scanner.next_jpeg().unwrap();
        let second = scanner.next_jpeg().unwrap();
        assert_eq!(first, jpeg);
        assert_eq!(second, jpeg);
        assert!(scanner.next_jpeg().is_err());
    }

    #[test]
    fn publish_keeps_latest_frame() {
        let reader = FeedReader {
            url: "http://camera.local/stream".to_string(),
            state: Arc::new(Mutex::new(FeedState::default())),
            live: Arc::new(AtomicBool::new(true)),
        };
        reader.publish(&tiny_jpeg()).unwrap();
        reader.publish(&tiny_jpeg()).unwrap();
        let state = reader.state.lock().unwrap();
        assert_eq!(state.frames_decoded, 2);
        assert_eq!(state.frame.as_ref().unwrap().dimensions(), (8, 4));
        drop(state);
        assert!(reader.publish(b"not a jpeg").is_err());
    }

    #[test]
    fn unreachable_stream_reports_error() {
        let live = Arc::new(AtomicBool::new(true));
        let feed = MjpegFeed::open("http://127.0.0.1:1/stream", live).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while feed.error().is_none() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert!(feed.error().unwrap().contains("failed to load stream"));
        assert_eq!(feed.native_size(), (0, 0));
    }
}
