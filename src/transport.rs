//! Transport adapter
//!
//! The boundary the core consumes: a reader yielding one message's worth of
//! bytes per frame, and a writer accepting one frame at a time. Frame
//! boundaries are transport-defined; the core never looks inside them. The
//! concrete binding carried here is a WebSocket (text frames); an in-memory
//! channel pair is provided for driving the session runtime in tests.

use {
    async_trait::async_trait,
    futures_util::{
        stream::{SplitSink, SplitStream},
        SinkExt, StreamExt,
    },
    thiserror::Error,
    tokio::sync::mpsc,
    warp::ws::{Message as WsMessage, WebSocket},
};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("connection closed")]
    ConnectionClosed,
}

/// Inbound half of a transport. One `next_frame` yields exactly one
/// encodable message's worth of bytes; `None` is EOF (half-close).
#[async_trait]
pub trait TransportReader: Send {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>>;
}

/// Outbound half of a transport. The session runtime drives this from a
/// single writer task, so implementations need not serialize writes
/// themselves.
#[async_trait]
pub trait TransportWriter: Send {
    async fn send_frame(&mut self, frame: String) -> Result<(), TransportError>;
}

/// Reader half of a warp WebSocket
pub struct WsReader {
    inner: SplitStream<WebSocket>,
}

/// Writer half of a warp WebSocket
pub struct WsWriter {
    inner: SplitSink<WebSocket, WsMessage>,
}

/// Split a warp WebSocket into the core's reader/writer halves
pub fn split_websocket(ws: WebSocket) -> (WsReader, WsWriter) {
    let (sink, stream) = ws.split();
    (WsReader { inner: stream }, WsWriter { inner: sink })
}

#[async_trait]
impl TransportReader for WsReader {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.inner.next().await {
                Some(Ok(msg)) => {
                    if msg.is_text() {
                        return Some(
                            msg.to_str()
                                .map(|s| s.to_string())
                                .map_err(|_| TransportError::WebSocket("non-utf8 frame".into())),
                        );
                    }
                    if msg.is_close() {
                        return None;
                    }
                    // ping/pong/binary frames carry no messages
                }
                Some(Err(e)) => return Some(Err(TransportError::WebSocket(e.to_string()))),
                None => return None,
            }
        }
    }
}

#[async_trait]
impl TransportWriter for WsWriter {
    async fn send_frame(&mut self, frame: String) -> Result<(), TransportError> {
        self.inner
            .send(WsMessage::text(frame))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }
}

/// In-memory transport reader backed by an unbounded channel
pub struct ChannelReader {
    rx: mpsc::UnboundedReceiver<String>,
}

/// In-memory transport writer backed by an unbounded channel
pub struct ChannelWriter {
    tx: mpsc::UnboundedSender<String>,
}

/// Build an in-memory transport: feed frames through the returned sender,
/// observe outbound frames on the returned receiver.
pub fn channel_transport() -> (
    mpsc::UnboundedSender<String>,
    mpsc::UnboundedReceiver<String>,
    ChannelReader,
    ChannelWriter,
) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    (
        in_tx,
        out_rx,
        ChannelReader { rx: in_rx },
        ChannelWriter { tx: out_tx },
    )
}

#[async_trait]
impl TransportReader for ChannelReader {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        self.rx.recv().await.map(Ok)
    }
}

#[async_trait]
impl TransportWriter for ChannelWriter {
    async fn send_frame(&mut self, frame: String) -> Result<(), TransportError> {
        self.tx
            .send(frame)
            .map_err(|e| TransportError::Channel(e.to_string()))
    }
}
