use std::{fmt::Display, io};

use async_trait::async_trait;
use futures::{AsyncRead, AsyncWrite};
use identity::{PeerId, PublicKey};
use multiaddr::Multiaddr;

/// A type alias of [`Box<dyn Connection>`]
pub type BoxConnection = Box<dyn Connection>;

/// A type alias of [`Box<dyn Stream>`]
pub type BoxStream = Box<dyn Stream>;

/// Which side of the transport session initiated the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The remote peer dialed us.
    Inbound,
    /// We dialed the remote peer.
    Outbound,
}

/// Immutable security/transport metadata of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionState {
    /// Name of the transport variant that produced the connection, e.g. `webrtc-direct`.
    pub transport: &'static str,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "transport={}", self.transport)
    }
}

/// A type that represent a multiplexed transport layer connection between local and peer.
///
/// One connection carries many independent, ordered byte streams. Streams are
/// created locally by [`open`](Connection::open) or received from the peer by
/// [`accept`](Connection::accept).
#[async_trait]
pub trait Connection: Sync + Send {
    /// Returns local bind address.
    fn local_addr(&self) -> io::Result<Multiaddr>;

    /// Returns the remote address that this connection is connected to.
    fn peer_addr(&self) -> io::Result<Multiaddr>;

    /// Returns the local peer's id.
    fn local_peer_id(&self) -> io::Result<PeerId>;

    /// Return peer's id obtained from secure layer peer's public key.
    fn peer_id(&self) -> io::Result<PeerId>;

    /// Return the secure layer peer's public key.
    fn public_key(&self) -> io::Result<PublicKey>;

    /// Returns the security/transport metadata of this connection.
    fn conn_state(&self) -> ConnectionState;

    /// Open a outbound stream for reading/writing via this connection.
    async fn open(&self) -> io::Result<BoxStream>;

    /// Accept newly incoming stream for reading/writing.
    ///
    /// If the connection is closing or has been closed, this function returns the close reason.
    async fn accept(&self) -> io::Result<BoxStream>;

    /// Attempt to close this connection.
    ///
    /// Closing is idempotent and always succeeds.
    async fn close(&self) -> io::Result<()>;

    /// Returns true once the connection has been closed, by whatever path.
    fn is_closed(&self) -> bool;
}

/// A stream to read/write data between local node and peer.
pub trait Stream: AsyncWrite + AsyncRead + Sync + Send + Unpin {}

impl<T> Stream for T where T: AsyncWrite + AsyncRead + Sync + Send + Unpin {}
