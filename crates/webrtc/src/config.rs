use std::time::Duration;

/// Number of detached inbound channels that may wait for [`accept_stream`](crate::WebRtcConn::accept_stream).
pub const DEFAULT_ACCEPT_QUEUE_LEN: usize = 256;

/// The maximum size of one framed message, as mandated by the libp2p webrtc specification.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024;

/// Configuration for one [`WebRtcConn`](crate::WebRtcConn).
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) accept_queue_len: usize,
    pub(crate) open_timeout: Option<Duration>,
    pub(crate) max_message_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            accept_queue_len: DEFAULT_ACCEPT_QUEUE_LEN,
            open_timeout: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl Config {
    /// Set the capacity of the inbound accept queue.
    ///
    /// Inbound channels that arrive while the queue is full are reset.
    /// A zero value is raised to one.
    pub fn accept_queue_len(mut self, len: usize) -> Self {
        self.accept_queue_len = len.max(1);
        self
    }

    /// Set the deadline applied by [`open_stream`](crate::WebRtcConn::open_stream)
    /// while waiting for a new channel to become ready.
    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = Some(timeout);
        self
    }

    /// Set the maximum size of one framed message written to a channel.
    ///
    /// # Panics
    ///
    /// Panics if `size` can't hold a frame header plus one byte of payload.
    pub fn max_message_size(mut self, size: usize) -> Self {
        assert!(
            size > crate::codec::MAX_FRAME_OVERHEAD,
            "max_message_size must be greater than {}",
            crate::codec::MAX_FRAME_OVERHEAD
        );
        self.max_message_size = size;
        self
    }
}
