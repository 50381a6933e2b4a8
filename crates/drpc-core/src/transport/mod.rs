//! Connections and the transport seam.
//!
//! A [`Connection`] owns one byte stream to a peer. Outbound frames are
//! queued to a writer task, so sends from many callers go out in program
//! order without holding a lock across I/O. Inbound bytes are fed through a
//! [`FrameDecoder`] by a reader task and each complete frame is handed to a
//! [`FrameHandler`].
//!
//! # Shutdown
//!
//! [`Connection::close`] signals both tasks through a `watch` channel. A
//! protocol violation, a handler error or peer EOF closes the connection
//! from the reader side.

pub mod tcp;

pub use tcp::TcpConnector;

use crate::config::WireConfig;
use crate::error::{Result, RpcError};
use crate::protocol::{encode_frame, write_frame, FrameDecoder, RpcMessage};
use crate::serializer::Serializer;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use uuid::Uuid;

/// Receives every complete inbound frame of a connection.
#[async_trait::async_trait]
pub trait FrameHandler: Send + Sync + 'static {
    /// Handle one frame body.
    ///
    /// Returning an error closes the connection. Reserve that for frames
    /// that cannot be understood at all.
    async fn on_frame(&self, connection: &Connection, frame: Bytes) -> Result<()>;

    /// Called once after the connection has closed.
    fn on_closed(&self, _connection: &Connection) {}
}

/// Opens connections to provider addresses.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, address: &str, handler: Arc<dyn FrameHandler>) -> Result<Connection>;
}

struct ConnectionInner {
    id: Uuid,
    address: String,
    outbound: mpsc::UnboundedSender<Bytes>,
    shutdown_tx: watch::Sender<bool>,
    closed: AtomicBool,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
}

/// Handle to one live transport. Cheap to clone; clones share the link.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("address", &self.inner.address)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Connection {}

impl Connection {
    /// Take ownership of a stream and start its reader and writer tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<S>(stream: S, address: impl Into<String>, handler: Arc<dyn FrameHandler>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let connection = Self {
            inner: Arc::new(ConnectionInner {
                id: Uuid::new_v4(),
                address: address.into(),
                outbound,
                shutdown_tx,
                closed: AtomicBool::new(false),
                frames_sent: AtomicU64::new(0),
                frames_received: AtomicU64::new(0),
            }),
        };

        let (reader, writer) = tokio::io::split(stream);
        tokio::spawn(Self::write_loop(
            writer,
            outbound_rx,
            shutdown_rx.clone(),
            connection.address().to_string(),
        ));
        tokio::spawn(Self::read_loop(
            reader,
            connection.clone(),
            handler,
            shutdown_rx,
        ));

        debug!("Connection {} to {} started", connection.id(), connection.address());
        connection
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Peer address this connection was opened for.
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of frames queued for sending so far.
    pub fn frames_sent(&self) -> u64 {
        self.inner.frames_sent.load(Ordering::Relaxed)
    }

    /// Number of complete frames read from the peer so far.
    pub fn frames_received(&self) -> u64 {
        self.inner.frames_received.load(Ordering::Relaxed)
    }

    /// Queue an encoded frame for sending.
    pub fn send(&self, frame: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        self.inner
            .outbound
            .send(frame)
            .map_err(|_| self.closed_error())?;
        self.inner.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Serialize, frame and queue a message.
    pub fn send_message(&self, serializer: &dyn Serializer, message: &RpcMessage) -> Result<()> {
        let body = serializer.serialize(message)?;
        self.send(encode_frame(&body)?)
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            debug!("Closing connection {} to {}", self.id(), self.address());
        }
        let _ = self.inner.shutdown_tx.send(true);
    }

    fn closed_error(&self) -> RpcError {
        RpcError::ConnectionClosed {
            address: self.inner.address.clone(),
        }
    }

    async fn write_loop<W: AsyncWrite + Unpin>(
        mut writer: W,
        mut outbound_rx: mpsc::UnboundedReceiver<Bytes>,
        mut shutdown_rx: watch::Receiver<bool>,
        address: String,
    ) {
        loop {
            tokio::select! {
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if let Err(e) = write_frame(&mut writer, &frame).await {
                        warn!("Write to {} failed: {}", address, e);
                        break;
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }
        let _ = writer.shutdown().await;
    }

    async fn read_loop<R: AsyncRead + Unpin>(
        mut reader: R,
        connection: Connection,
        handler: Arc<dyn FrameHandler>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; WireConfig::READ_CHUNK_SIZE];

        'read: loop {
            let n = tokio::select! {
                result = reader.read(&mut buf) => match result {
                    Ok(0) => {
                        debug!("Peer {} closed the connection", connection.address());
                        break;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        debug!("Read from {} failed: {}", connection.address(), e);
                        break;
                    }
                },
                _ = shutdown_rx.changed() => break,
            };

            decoder.extend(&buf[..n]);
            for frame in decoder.frames() {
                let result = match frame {
                    Ok(frame) => {
                        connection.inner.frames_received.fetch_add(1, Ordering::Relaxed);
                        handler.on_frame(&connection, frame).await
                    }
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    warn!("Closing connection to {}: {}", connection.address(), e);
                    break 'read;
                }
            }
        }

        connection.close();
        handler.on_closed(&connection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every frame it sees.
    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<Bytes>>,
        closed: AtomicBool,
    }

    #[async_trait::async_trait]
    impl FrameHandler for Recorder {
        async fn on_frame(&self, _connection: &Connection, frame: Bytes) -> Result<()> {
            if frame.as_ref() == b"bad" {
                return Err(RpcError::protocol("bad frame"));
            }
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }

        fn on_closed(&self, _connection: &Connection) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_frames_flow_between_peers_in_order() {
        let (a, b) = tokio::io::duplex(64);
        let left_seen = Arc::new(Recorder::default());
        let right_seen = Arc::new(Recorder::default());

        let left = Connection::spawn(a, "right", left_seen.clone());
        let right = Connection::spawn(b, "left", right_seen.clone());

        for i in 0..10u8 {
            left.send(encode_frame(&[i; 40]).unwrap()).unwrap();
        }
        assert_eq!(left.frames_sent(), 10);

        wait_until(|| right_seen.frames.lock().unwrap().len() == 10).await;
        assert_eq!(right.frames_received(), 10);
        let frames = right_seen.frames.lock().unwrap();
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.as_ref(), &[i as u8; 40]);
        }
    }

    #[tokio::test]
    async fn test_handler_error_closes_connection() {
        let (a, b) = tokio::io::duplex(64);
        let seen = Arc::new(Recorder::default());
        let sender = Connection::spawn(a, "peer", Arc::new(Recorder::default()));
        let receiver = Connection::spawn(b, "peer", seen.clone());

        sender.send(encode_frame(b"bad").unwrap()).unwrap();

        wait_until(|| receiver.is_closed()).await;
        wait_until(|| seen.closed.load(Ordering::SeqCst)).await;
    }

    #[tokio::test]
    async fn test_malformed_prefix_closes_connection() {
        let (mut raw, b) = tokio::io::duplex(64);
        let receiver = Connection::spawn(b, "peer", Arc::new(Recorder::default()));

        raw.write_all(&u32::MAX.to_be_bytes()).await.unwrap();

        wait_until(|| receiver.is_closed()).await;
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (a, _b) = tokio::io::duplex(64);
        let conn = Connection::spawn(a, "peer", Arc::new(Recorder::default()));
        conn.close();

        let result = conn.send(encode_frame(b"x").unwrap());
        assert!(matches!(result, Err(RpcError::ConnectionClosed { .. })));
        assert_eq!(conn.frames_sent(), 0);
    }
}
