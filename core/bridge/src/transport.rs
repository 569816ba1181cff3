//! Transport layer for protocol frames
//!
//! The bridge only needs whole text frames and a bounded wait on reads, so
//! that the network thread can interleave socket input with engine events.

use std::io;
use std::net::TcpStream;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use log::debug;
use tungstenite::{Error as WsError, Message, WebSocket};

/// A trait for transporting protocol frames
pub trait Transport: Send {
    /// Waits up to `timeout` for the next text frame.
    ///
    /// `Ok(None)` means nothing arrived in time. A closed peer is reported as
    /// [`io::ErrorKind::ConnectionAborted`].
    fn read_frame(&mut self, timeout: Duration) -> io::Result<Option<String>>;

    /// Writes one text frame.
    fn write_frame(&mut self, frame: &str) -> io::Result<()>;

    /// Closes the connection; errors are ignored.
    fn close(&mut self);
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "peer closed the connection")
}

/// WebSocket transport over a TCP stream.
#[derive(Debug)]
pub struct WebSocketTransport {
    socket: WebSocket<TcpStream>,
    timeout: Option<Duration>,
}

impl WebSocketTransport {
    /// Wraps an accepted WebSocket.
    #[must_use]
    pub fn new(socket: WebSocket<TcpStream>) -> Self {
        Self {
            socket,
            timeout: None,
        }
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        // A zero read timeout is rejected by the OS; treat it as "block".
        let timeout = (!timeout.is_zero()).then_some(timeout);
        if self.timeout != timeout {
            self.socket.get_mut().set_read_timeout(timeout)?;
            self.timeout = timeout;
        }
        Ok(())
    }
}

impl Transport for WebSocketTransport {
    fn read_frame(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        self.set_timeout(timeout)?;
        loop {
            match self.socket.read() {
                Ok(Message::Text(text)) => return Ok(Some(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => {
                    let text = String::from_utf8(bytes.to_vec())
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    return Ok(Some(text));
                }
                Ok(Message::Close(_)) => return Err(closed()),
                // Pongs are queued by tungstenite and flushed on the next write.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(WsError::Io(error))
                    if matches!(
                        error.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    return Ok(None);
                }
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return Err(closed()),
                Err(WsError::Io(error)) => return Err(error),
                Err(error) => return Err(io::Error::other(error.to_string())),
            }
        }
    }

    fn write_frame(&mut self, frame: &str) -> io::Result<()> {
        match self.socket.send(Message::text(frame.to_owned())) {
            Ok(()) => Ok(()),
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Err(closed()),
            Err(WsError::Io(error)) => Err(error),
            Err(error) => Err(io::Error::other(error.to_string())),
        }
    }

    fn close(&mut self) {
        if let Err(err) = self.socket.close(None).and_then(|()| self.socket.flush()) {
            debug!("websocket close: {err}");
        }
    }
}

/// In-memory transport, one end of a [`ChannelTransport::pair`].
///
/// Used by tests and the demo to drive a page or session without sockets.
#[derive(Debug)]
pub struct ChannelTransport {
    rx: Receiver<String>,
    tx: Option<Sender<String>>,
}

impl ChannelTransport {
    /// Two connected ends.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::channel();
        let (b_tx, b_rx) = mpsc::channel();
        (
            Self {
                rx: a_rx,
                tx: Some(b_tx),
            },
            Self {
                rx: b_rx,
                tx: Some(a_tx),
            },
        )
    }

    /// Reads the next frame, waiting up to `timeout` (zero waits forever).
    ///
    /// # Errors
    ///
    /// Fails when the peer end was closed or dropped.
    pub fn recv(&self, timeout: Duration) -> io::Result<Option<String>> {
        if timeout.is_zero() {
            return self.rx.recv().map(Some).map_err(|_| closed());
        }
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(closed()),
        }
    }

    /// Sends a frame to the peer.
    ///
    /// # Errors
    ///
    /// Fails when either end was closed.
    pub fn send(&self, frame: impl Into<String>) -> io::Result<()> {
        self.tx
            .as_ref()
            .ok_or_else(closed)?
            .send(frame.into())
            .map_err(|_| closed())
    }
}

impl Transport for ChannelTransport {
    fn read_frame(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        self.recv(timeout)
    }

    fn write_frame(&mut self, frame: &str) -> io::Result<()> {
        self.send(frame)
    }

    fn close(&mut self) {
        self.tx = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_pair_delivers_both_ways() {
        let (mut a, mut b) = ChannelTransport::pair();
        a.write_frame("ping").unwrap();
        assert_eq!(b.read_frame(Duration::from_millis(50)).unwrap().as_deref(), Some("ping"));
        assert_eq!(b.read_frame(Duration::from_millis(10)).unwrap(), None);
        b.write_frame("pong").unwrap();
        assert_eq!(a.read_frame(Duration::ZERO).unwrap().as_deref(), Some("pong"));
    }

    #[test]
    fn closing_one_end_is_seen_by_the_other() {
        let (mut a, mut b) = ChannelTransport::pair();
        a.close();
        assert!(a.write_frame("late").is_err());
        let err = b.read_frame(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }
}
