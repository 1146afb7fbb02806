use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use futures::AsyncWrite;
use protobuf::{EnumOrUnknown, Message as _};

use crate::{
    pb::{message::Flag, Message},
    Result,
};

/// Upper bound of the bytes a frame adds on top of its payload:
/// the length prefix, the flag field and the payload field header.
pub const MAX_FRAME_OVERHEAD: usize = 10;

/// Encode one length-delimited frame.
pub(crate) fn encode(flag: Option<Flag>, payload: &[u8]) -> Result<Vec<u8>> {
    let mut message = Message::new();

    if let Some(flag) = flag {
        message.flag = Some(EnumOrUnknown::new(flag));
    }

    if !payload.is_empty() {
        message.message = Some(payload.to_vec());
    }

    let body = message.write_to_bytes()?;

    let mut len_buf = unsigned_varint::encode::usize_buffer();

    let prefix = unsigned_varint::encode::usize(body.len(), &mut len_buf);

    let mut frame = Vec::with_capacity(prefix.len() + body.len());

    frame.extend_from_slice(prefix);
    frame.extend_from_slice(&body);

    Ok(frame)
}

/// Try to split one frame off the front of `buf`.
///
/// Returns `Ok(None)` if `buf` doesn't hold a complete frame yet.
pub(crate) fn decode(buf: &mut Vec<u8>, max_message_size: usize) -> Result<Option<Message>> {
    let (len, header_len) = match unsigned_varint::decode::usize(buf) {
        Ok((len, rest)) => (len, buf.len() - rest.len()),
        Err(unsigned_varint::decode::Error::Insufficient) => return Ok(None),
        Err(err) => return Err(io::Error::new(io::ErrorKind::InvalidData, err).into()),
    };

    if len > max_message_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {} exceeds {}", len, max_message_size),
        )
        .into());
    }

    if buf.len() < header_len + len {
        return Ok(None);
    }

    let message = Message::parse_from_bytes(&buf[header_len..header_len + len])?;

    buf.drain(..header_len + len);

    Ok(Some(message))
}

/// Write `frame` with a single non-blocking attempt.
///
/// Control frames sent from callbacks or teardown paths can't wait for the channel to drain,
/// so they are delivered best-effort.
pub(crate) fn write_once<W>(writer: &mut W, frame: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let waker = futures::task::noop_waker();
    let mut cx = Context::from_waker(&waker);

    match Pin::new(writer).poll_write(&mut cx, frame) {
        Poll::Ready(Ok(n)) if n == frame.len() => Ok(()),
        Poll::Ready(Ok(_)) => Err(io::Error::new(
            io::ErrorKind::WriteZero,
            "control frame partially written",
        )),
        Poll::Ready(Err(err)) => Err(err),
        Poll::Pending => Err(io::ErrorKind::WouldBlock.into()),
    }
}
