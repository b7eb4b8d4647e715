//! TCP transport pair
//!
//! Each frame is a `LengthDelimitedCodec` frame holding one bincode-encoded
//! `ClusterMessage`. The transmitter queues messages into an unbounded channel
//! drained by a writer task; the receiver is a reader task that decodes frames
//! and hands them to the session's listener. Closing the transmitter lets the
//! writer flush what is queued (a trailing `halt`, typically) before it shuts
//! the write half down.

use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use atoll_core::{
    ClusterMessage, Connection, MessageListener, Receiver, SocketHandle, Transmitter,
    TransportConfig, TransportError, TransportPair,
};

// ----------------------------------------------------------------------------
// Framing
// ----------------------------------------------------------------------------

/// Length-delimited codec bounded by the configured frame size
pub fn frame_codec(config: &TransportConfig) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(config.max_frame_len)
        .new_codec()
}

/// Encode a message into one frame body
pub fn encode_frame(
    message: &ClusterMessage,
    config: &TransportConfig,
) -> Result<Bytes, TransportError> {
    let bytes = message.encode()?;
    if bytes.len() > config.max_frame_len {
        return Err(TransportError::FrameTooLarge {
            size: bytes.len(),
            max: config.max_frame_len,
        });
    }
    Ok(Bytes::from(bytes))
}

pub type FrameReader = FramedRead<OwnedReadHalf, LengthDelimitedCodec>;
pub type FrameWriter = FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>;

/// Split a stream into framed halves
pub fn framed(stream: TcpStream, config: &TransportConfig) -> (FrameReader, FrameWriter) {
    let (read, write) = stream.into_split();
    (
        FramedRead::new(read, frame_codec(config)),
        FramedWrite::new(write, frame_codec(config)),
    )
}

// ----------------------------------------------------------------------------
// Connection
// ----------------------------------------------------------------------------

/// An accepted TCP connection waiting to be bound to a session
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
}

impl TcpConnection {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl Connection for TcpConnection {
    fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }

    fn attach(
        self,
        listener: Weak<dyn MessageListener>,
        config: &TransportConfig,
    ) -> Result<TransportPair, TransportError> {
        self.stream.set_nodelay(true)?;

        // Keep a std handle so the read side can be shut down from sync code.
        let std_stream = self.stream.into_std()?;
        let socket = std_stream.try_clone()?;
        let stream = TcpStream::from_std(std_stream)?;
        let peer_addr = stream.peer_addr().ok();

        let (reader, writer) = framed(stream, config);
        let (queue, outbound) = mpsc::unbounded_channel();

        let tx_token = CancellationToken::new();
        let rx_token = CancellationToken::new();

        tokio::spawn(write_loop(writer, outbound, tx_token.clone(), config.clone()));
        tokio::spawn(read_loop(reader, listener, rx_token.clone()));

        debug!(peer_addr = ?peer_addr, "Transport pair attached");

        Ok(TransportPair {
            tx: Box::new(TcpTransmitter {
                queue,
                closed: AtomicBool::new(false),
                token: tx_token,
            }),
            rx: Box::new(TcpReceiver { token: rx_token }),
            socket: Box::new(TcpSocket {
                stream: socket,
                peer_addr,
            }),
        })
    }
}

// ----------------------------------------------------------------------------
// Transmitter
// ----------------------------------------------------------------------------

struct TcpTransmitter {
    queue: mpsc::UnboundedSender<ClusterMessage>,
    closed: AtomicBool,
    token: CancellationToken,
}

impl Transmitter for TcpTransmitter {
    fn enqueue(&self, message: ClusterMessage) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        self.queue.send(message).is_ok()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.token.cancel();
    }
}

/// Resolves `bound` after the writer has been told to close
async fn drain_deadline(token: &CancellationToken, bound: Duration) {
    token.cancelled().await;
    tokio::time::sleep(bound).await;
}

/// Write queued messages onto the socket. Once closed, flush whatever is
/// still queued and shut the write half down, all within the drain bound.
async fn write_loop(
    mut writer: FrameWriter,
    mut outbound: mpsc::UnboundedReceiver<ClusterMessage>,
    token: CancellationToken,
    config: TransportConfig,
) {
    let deadline = drain_deadline(&token, config.drain_timeout());
    tokio::pin!(deadline);
    let mut draining = false;

    loop {
        let message = if draining {
            match outbound.try_recv() {
                Ok(message) => message,
                Err(_) => break,
            }
        } else {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    draining = true;
                    outbound.close();
                    continue;
                }
                message = outbound.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            }
        };

        tokio::select! {
            result = write_frame(&mut writer, &message, &config) => {
                if let Err(TransportError::Io(err)) = result {
                    warn!(error = %err, "Writer stopped");
                    return;
                }
            }
            _ = &mut deadline => {
                warn!("Timed out flushing outbound queue");
                return;
            }
        }
    }

    tokio::select! {
        result = SinkExt::<Bytes>::close(&mut writer) => {
            if let Err(err) = result {
                debug!(error = %err, "Error closing write half");
            }
        }
        _ = &mut deadline => warn!("Timed out closing write half"),
    }
    trace!("Writer task finished");
}

async fn write_frame(
    writer: &mut FrameWriter,
    message: &ClusterMessage,
    config: &TransportConfig,
) -> Result<(), TransportError> {
    let frame = match encode_frame(message, config) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(tag = %message.tag, error = %err, "Dropping unencodable message");
            return Err(err);
        }
    };
    writer.send(frame).await?;
    trace!(tag = %message.tag, "Sent message");
    Ok(())
}

// ----------------------------------------------------------------------------
// Receiver
// ----------------------------------------------------------------------------

struct TcpReceiver {
    token: CancellationToken,
}

impl Receiver for TcpReceiver {
    fn close(&self) {
        self.token.cancel();
    }
}

impl Drop for TcpReceiver {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Decode frames and deliver them until EOF, a read error, or a local close.
/// A remote-side end of stream is reported to the listener once.
async fn read_loop(
    mut reader: FrameReader,
    listener: Weak<dyn MessageListener>,
    token: CancellationToken,
) {
    let disconnected = loop {
        let frame = tokio::select! {
            _ = token.cancelled() => break false,
            frame = reader.next() => frame,
        };

        let bytes = match frame {
            Some(Ok(bytes)) => bytes,
            Some(Err(err)) => {
                warn!(error = %err, "Read error on node stream");
                break true;
            }
            None => break true,
        };

        let Some(session) = listener.upgrade() else {
            break false;
        };

        match ClusterMessage::decode(&bytes) {
            Ok(message) => {
                trace!(tag = %message.tag, "Received message");
                session.handle_message(message);
            }
            Err(err) => warn!(error = %err, len = bytes.len(), "Dropping undecodable frame"),
        }
    };

    if disconnected && !token.is_cancelled() {
        if let Some(session) = listener.upgrade() {
            session.stream_closed();
        }
    }
    trace!("Reader task finished");
}

// ----------------------------------------------------------------------------
// Socket
// ----------------------------------------------------------------------------

struct TcpSocket {
    stream: std::net::TcpStream,
    peer_addr: Option<SocketAddr>,
}

impl SocketHandle for TcpSocket {
    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Stop reading. The write half is shut down by the writer task once
    /// the queued messages are flushed.
    fn shutdown(&self) -> std::io::Result<()> {
        match self.stream.shutdown(Shutdown::Read) {
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}
