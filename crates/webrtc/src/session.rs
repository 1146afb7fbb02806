//! The underlying session primitive this crate multiplexes.
//!
//! These traits describe the small surface of a WebRTC peer connection that the
//! multiplexer needs. Establishing the session (ICE, SDP, DTLS) is the job of
//! whatever type implements them.

use std::{io, sync::Arc};

use futures::{AsyncRead, AsyncWrite};

/// A type alias of [`Arc<dyn DataChannel>`]
pub type ArcDataChannel = Arc<dyn DataChannel>;

/// A type alias of [`Box<dyn RawChannel>`]
pub type BoxRawChannel = Box<dyn RawChannel>;

/// Callback invoked once a data channel is open.
pub type OnOpen = Box<dyn FnOnce() + Send + 'static>;

/// Callback invoked for every data channel opened by the remote peer.
pub type OnDataChannel = Box<dyn Fn(ArcDataChannel) + Send + Sync + 'static>;

/// Callback invoked when the peer connection changes state.
pub type OnStateChange = Box<dyn Fn(PeerConnectionState) + Send + Sync + 'static>;

/// State of the peer connection as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerConnectionState {
    /// Returns true if no more data can flow over the peer connection.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

/// One negotiated WebRTC peer connection.
pub trait PeerConnection: Send + Sync {
    /// Create a pre-negotiated data channel with the given `id`.
    ///
    /// The remote peer observes the same id, there is no in-band negotiation.
    fn create_data_channel(&self, id: u16) -> io::Result<ArcDataChannel>;

    /// Register the peer connection state change handler, replacing any previous one.
    fn on_connection_state_change(&self, f: OnStateChange);

    /// Register the handler for data channels opened by the remote peer, replacing any previous one.
    fn on_data_channel(&self, f: OnDataChannel);

    /// Returns the current peer connection state.
    fn connection_state(&self) -> PeerConnectionState;

    /// Close the peer connection and all of its data channels.
    fn close(&self) -> io::Result<()>;
}

/// One data channel of a [`PeerConnection`].
pub trait DataChannel: Send + Sync {
    /// The numeric id of this channel.
    fn id(&self) -> u16;

    /// Register the open handler.
    ///
    /// If the channel is already open, the handler may be called immediately.
    fn on_open(&self, f: OnOpen);

    /// Detach the channel, returning a raw byte-stream handle.
    ///
    /// Only valid after the channel is open.
    fn detach(&self) -> io::Result<BoxRawChannel>;

    /// Close the channel.
    ///
    /// Pending reads/writes on the detached handle are woken and fail.
    fn close(&self) -> io::Result<()>;
}

/// The raw duplex byte handle of a detached [`DataChannel`].
pub trait RawChannel: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

impl<T> RawChannel for T where T: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

/// A detached data channel together with the channel it came from.
pub struct DetachedChannel {
    pub(crate) raw: BoxRawChannel,
    pub(crate) channel: ArcDataChannel,
}

impl DetachedChannel {
    pub(crate) fn new(raw: BoxRawChannel, channel: ArcDataChannel) -> Self {
        Self { raw, channel }
    }

    /// The id of the underlying channel.
    pub fn id(&self) -> u16 {
        self.channel.id()
    }
}
