//! Transport abstraction between a debugger client and the debug server.
//!
//! Grounded in `t86/common/TCP.h`, which the original hard-codes to a raw
//! TCP socket. Spec §4.10 asks for the same framing over a pluggable
//! transport so the debugger can be driven in-process during tests
//! without a real socket.

use std::io;
use std::net::TcpStream;

use serde::{Deserialize, Serialize};

use crate::protocol::{read_frame, write_frame, ProtocolError};

/// A bidirectional, length-prefixed-frame transport.
pub trait Channel {
    /// Sends one frame.
    ///
    /// # Errors
    /// Returns [`ProtocolError`] if serialization or the underlying write fails.
    fn send<T: Serialize>(&mut self, value: &T) -> Result<(), ProtocolError>;

    /// Receives one frame.
    ///
    /// # Errors
    /// Returns [`ProtocolError`] if the underlying read fails or the frame
    /// does not deserialize to `T`.
    fn receive<T: for<'de> Deserialize<'de>>(&mut self) -> Result<T, ProtocolError>;
}

/// A [`Channel`] backed by a real TCP connection, used by the CLI when
/// `--port` is passed (spec §6).
#[derive(Debug)]
pub struct TcpChannel {
    stream: TcpStream,
}

impl TcpChannel {
    /// Wraps an already-connected stream.
    #[must_use]
    pub const fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// Connects to a debug server listening at `addr`.
    ///
    /// # Errors
    /// Returns [`io::Error`] if the connection cannot be established.
    pub fn connect(addr: impl std::net::ToSocketAddrs) -> io::Result<Self> {
        Ok(Self::new(TcpStream::connect(addr)?))
    }
}

impl Channel for TcpChannel {
    fn send<T: Serialize>(&mut self, value: &T) -> Result<(), ProtocolError> {
        write_frame(&mut self.stream, value)
    }

    fn receive<T: for<'de> Deserialize<'de>>(&mut self) -> Result<T, ProtocolError> {
        read_frame(&mut self.stream)
    }
}

/// An in-process [`Channel`] backed by two byte queues, used in tests and
/// by any host embedding both ends of the protocol in one process.
#[derive(Debug, Default)]
pub struct InMemoryChannel {
    outgoing: Vec<u8>,
    incoming: std::collections::VecDeque<u8>,
}

impl InMemoryChannel {
    /// Creates an empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves every byte written via `send` into `other`'s read queue,
    /// simulating delivery across the wire without a real socket.
    pub fn deliver_to(&mut self, other: &mut Self) {
        other.incoming.extend(self.outgoing.drain(..));
    }
}

impl Channel for InMemoryChannel {
    fn send<T: Serialize>(&mut self, value: &T) -> Result<(), ProtocolError> {
        write_frame(&mut self.outgoing, value)
    }

    fn receive<T: for<'de> Deserialize<'de>>(&mut self) -> Result<T, ProtocolError> {
        let (front, back) = self.incoming.as_slices();
        let mut joined = Vec::with_capacity(front.len() + back.len());
        joined.extend_from_slice(front);
        joined.extend_from_slice(back);
        let mut cursor = io::Cursor::new(joined);
        let value = read_frame(&mut cursor)?;
        let consumed = cursor.position() as usize;
        self.incoming.drain(..consumed);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Request;

    #[test]
    fn in_memory_channel_delivers_frames_in_order() {
        let mut client = InMemoryChannel::new();
        let mut server = InMemoryChannel::new();
        client.send(&Request::SingleStep).unwrap();
        client.send(&Request::Continue).unwrap();
        client.deliver_to(&mut server);

        let first: Request = server.receive().unwrap();
        let second: Request = server.receive().unwrap();
        assert_eq!(first, Request::SingleStep);
        assert_eq!(second, Request::Continue);
    }
}
