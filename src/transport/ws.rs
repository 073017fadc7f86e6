//! WebSocket transport.
//!
//! Each transport owns one reader thread. The thread performs the blocking
//! handshake, then forwards frames to the session loop as `TransportEvent`s.
//! The socket read timeout bounds how long the thread takes to notice that
//! the transport was closed.
//!
//! The thread MUST NOT touch connection state; it only reports.

use anyhow::{anyhow, Context, Result};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};
use url::Url;

use super::connection::{
    Connector, EventSink, Transport, TransportEvent, TransportEventKind, TransportId,
};

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(250);

/// Opens `ws://` / `wss://` detection streams.
#[derive(Clone, Debug)]
pub struct WsConnector {
    read_timeout: Duration,
}

impl WsConnector {
    pub fn new() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout.max(Duration::from_millis(10));
        self
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for WsConnector {
    fn connect(
        &mut self,
        url: &str,
        id: TransportId,
        sink: EventSink,
    ) -> Result<Box<dyn Transport>> {
        let parsed = Url::parse(url).context("parse detection stream url")?;
        match parsed.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(anyhow!(
                    "unsupported detection stream scheme '{}'; expected ws or wss",
                    other
                ))
            }
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let reader = Reader {
            url: parsed.to_string(),
            id,
            sink,
            cancelled: cancelled.clone(),
            read_timeout: self.read_timeout,
        };
        thread::Builder::new()
            .name(format!("detection-ws-{}", id.0))
            .spawn(move || reader.run())
            .context("spawn detection stream reader")?;

        Ok(Box::new(WsTransport { id, cancelled }))
    }
}

/// Handle to a reader thread. Closing flags the thread; it is never joined,
/// since a handshake in progress can block for as long as the OS allows.
pub struct WsTransport {
    id: TransportId,
    cancelled: Arc<AtomicBool>,
}

impl Transport for WsTransport {
    fn id(&self) -> TransportId {
        self.id
    }

    fn close(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

struct Reader {
    url: String,
    id: TransportId,
    sink: EventSink,
    cancelled: Arc<AtomicBool>,
    read_timeout: Duration,
}

impl Reader {
    fn run(self) {
        let mut socket = match tungstenite::connect(self.url.as_str()) {
            Ok((socket, _response)) => socket,
            Err(e) => {
                self.emit(TransportEventKind::Error(format!("connect failed: {}", e)));
                return;
            }
        };
        if self.is_cancelled() {
            let _ = socket.close(None);
            return;
        }
        if let Err(e) = set_read_timeout(&socket, self.read_timeout) {
            log::debug!("transport {}: {}", self.id.0, e);
        }
        self.emit(TransportEventKind::Opened);

        loop {
            if self.is_cancelled() {
                let _ = socket.close(None);
                let _ = socket.flush();
                return;
            }
            match socket.read() {
                Ok(Message::Text(text)) => self.emit(TransportEventKind::Message(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => self.emit(TransportEventKind::Message(text)),
                    Err(_) => {
                        log::warn!("transport {}: dropping non-UTF-8 binary frame", self.id.0)
                    }
                },
                Ok(Message::Close(frame)) => {
                    self.emit(TransportEventKind::Closed {
                        reason: frame.map(|f| f.reason.to_string()),
                    });
                    return;
                }
                Ok(_) => {}
                Err(tungstenite::Error::Io(e))
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) => {}
                Err(tungstenite::Error::ConnectionClosed) => {
                    self.emit(TransportEventKind::Closed { reason: None });
                    return;
                }
                Err(e) => {
                    self.emit(TransportEventKind::Error(e.to_string()));
                    return;
                }
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn emit(&self, kind: TransportEventKind) {
        if self.is_cancelled() {
            return;
        }
        // A closed receiver means the session is gone; nothing left to tell.
        let _ = self.sink.send(TransportEvent {
            transport: self.id,
            kind,
        });
    }
}

fn set_read_timeout(
    socket: &WebSocket<MaybeTlsStream<TcpStream>>,
    timeout: Duration,
) -> Result<()> {
    match socket.get_ref() {
        MaybeTlsStream::Plain(stream) => stream
            .set_read_timeout(Some(timeout))
            .context("set websocket read timeout"),
        _ => Err(anyhow!("read timeout not supported for this stream type")),
    }
}
