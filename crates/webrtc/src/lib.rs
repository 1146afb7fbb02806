//! Stream multiplexing over a WebRTC peer connection.
//!
//! Every stream of a [`WebRtcConn`] is carried by one pre-negotiated data channel. Frames on the
//! wire are varint length-prefixed protobuf `Message`s with optional `FIN`/`STOP_SENDING`/`RESET`
//! flags, see [`Stream`].
//!
//! The peer connection itself (ICE, SDP, DTLS) is established elsewhere and handed to
//! [`WebRtcConn::new`] through the [`PeerConnection`] trait.

include!(concat!(env!("OUT_DIR"), "/proto/mod.rs"));

mod errors;
pub use errors::*;

mod config;
pub use config::*;

mod session;
pub use session::*;

mod id;
pub use id::*;

mod stream;
pub use stream::*;

mod conn;
pub use conn::*;

mod codec;
pub use codec::MAX_FRAME_OVERHEAD;

mod accept;
mod detach;
mod lifecycle;
mod table;

#[cfg(test)]
mod mock;
