use std::sync::atomic::{AtomicU32, Ordering};

use rp2p_core::Direction;

use crate::{Error, Result};

/// Stream id 0 carries the security handshake and is never handed out by [`StreamIdAllocator`].
pub const HANDSHAKE_STREAM_ID: u16 = 0;

/// The first id allocated by the side that accepted the session (odd ids).
pub const FIRST_INBOUND_STREAM_ID: u32 = 1;

/// The first id allocated by the side that dialed the session (even ids).
pub const FIRST_OUTBOUND_STREAM_ID: u32 = 2;

/// Ids of one side differ by this step, so both sides never pick the same id.
pub const STREAM_ID_STEP: u32 = 2;

/// The largest id a data channel can carry.
pub const MAX_STREAM_ID: u32 = u16::MAX as u32;

/// Map a raw counter value to a valid stream id.
///
/// Returns [`Error::StreamIdExhausted`] if `raw` doesn't fit the 16 bits a data channel id has.
pub fn to_stream_id(raw: u32) -> Result<u16> {
    u16::try_from(raw).map_err(|_| Error::StreamIdExhausted)
}

/// Lock-free allocator for locally opened stream ids.
#[derive(Debug)]
pub struct StreamIdAllocator {
    next: AtomicU32,
}

impl StreamIdAllocator {
    /// Create allocator for the side of the session given by `direction`.
    pub fn new(direction: Direction) -> Self {
        let first = match direction {
            Direction::Inbound => FIRST_INBOUND_STREAM_ID,
            Direction::Outbound => FIRST_OUTBOUND_STREAM_ID,
        };

        Self {
            next: AtomicU32::new(first),
        }
    }

    /// Allocate the next stream id.
    ///
    /// Once the id space is exhausted the counter stops moving, so every later call fails too.
    pub fn next(&self) -> Result<u16> {
        let raw = match self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current > MAX_STREAM_ID {
                    None
                } else {
                    Some(current + STREAM_ID_STEP)
                }
            }) {
            Ok(previous) => previous,
            Err(current) => current,
        };

        to_stream_id(raw)
    }

    #[cfg(test)]
    pub(crate) fn skip_to(&self, next: u32) {
        self.next.store(next, Ordering::SeqCst);
    }
}
