use std::{
    cmp::min,
    io,
    pin::Pin,
    sync::Arc,
    task::{ready, Context, Poll},
};

use bitmask_enum::bitmask;
use futures::{AsyncRead, AsyncWrite};
use parking_lot::Mutex;

use crate::{
    codec::{self, MAX_FRAME_OVERHEAD},
    pb::{message::Flag, Message},
    session::{ArcDataChannel, BoxRawChannel, DetachedChannel},
    Error,
};

/// Deregistration callback, fired once when the stream is torn down.
pub(crate) type OnDone = Box<dyn FnOnce() + Send + 'static>;

/// Read buffer size used for one poll of the raw channel.
const READ_CHUNK_SIZE: usize = 4096;

/// Halves of the stream that are still open.
#[bitmask(u8)]
enum HalfOpen {
    /// Cleared by a FIN from the peer, or by [`Stream::close_read`].
    Read,
    /// Cleared by [`Stream::poll_close`](AsyncWrite::poll_close), or by a STOP_SENDING from the peer.
    Write,
}

impl Default for HalfOpen {
    fn default() -> Self {
        Self::Read | Self::Write
    }
}

#[derive(Default)]
struct StreamState {
    open: HalfOpen,
    /// Once set, every read and write returns this error.
    close_err: Option<Error>,
    /// Decoded payload not yet read by the application.
    recv_buf: Vec<u8>,
    /// Raw bytes not yet decoded into frames.
    inbound: Vec<u8>,
    /// Encoded frames not yet written to the raw channel.
    outbound: Vec<u8>,
    on_done: Option<OnDone>,
    finished: bool,
}

struct StreamShared {
    id: u16,
    channel: ArcDataChannel,
    raw: Mutex<BoxRawChannel>,
    max_message_size: usize,
    /// Lock order: `state` before `raw`.
    state: Mutex<StreamState>,
}

impl StreamShared {
    /// Close the channel and hand the deregistration callback back to the caller.
    ///
    /// The callback must be invoked after `state` is unlocked.
    fn finish(&self, state: &mut StreamState) -> Option<OnDone> {
        if state.finished {
            return None;
        }

        state.finished = true;

        if let Err(err) = self.channel.close() {
            log::debug!("close data channel, id={}, err={}", self.id, err);
        }

        log::trace!("stream finished, id={}", self.id);

        state.on_done.take()
    }

    fn finish_if_closed(&self, state: &mut StreamState) -> Option<OnDone> {
        if state.open.contains(HalfOpen::Read) || state.open.contains(HalfOpen::Write) {
            return None;
        }

        self.finish(state)
    }

    fn poll_drain(&self, state: &mut StreamState, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !state.outbound.is_empty() {
            let mut raw = self.raw.lock();

            let written = ready!(Pin::new(&mut *raw).poll_write(cx, &state.outbound))?;

            if written == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }

            state.outbound.drain(..written);
        }

        Poll::Ready(Ok(()))
    }

    /// Queue a control frame behind any pending data and try to flush once, without waiting.
    fn send_control(&self, state: &mut StreamState, flag: Flag) {
        match codec::encode(Some(flag), &[]) {
            Ok(frame) => state.outbound.extend_from_slice(&frame),
            Err(err) => {
                log::debug!("encode {:?} frame, id={}, err={}", flag, self.id, err);
                return;
            }
        }

        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);

        if let Poll::Ready(Err(err)) = self.poll_drain(state, &mut cx) {
            log::debug!("send {:?} frame, id={}, err={}", flag, self.id, err);
        }
    }

    fn handle_message(&self, state: &mut StreamState, mut message: Message) -> Option<OnDone> {
        if let Some(payload) = message.message.take() {
            if state.open.contains(HalfOpen::Read) {
                state.recv_buf.extend_from_slice(&payload);
            }
        }

        match message.flag.map(|flag| flag.enum_value()) {
            Some(Ok(Flag::FIN)) => {
                if state.open.contains(HalfOpen::Read) {
                    state.open ^= HalfOpen::Read;
                }

                self.finish_if_closed(state)
            }
            Some(Ok(Flag::STOP_SENDING)) => {
                if state.open.contains(HalfOpen::Write) {
                    state.open ^= HalfOpen::Write;
                    state.outbound.clear();
                }

                self.finish_if_closed(state)
            }
            Some(Ok(Flag::RESET)) => {
                log::trace!("stream reset by peer, id={}", self.id);

                state.recv_buf.clear();
                state.close_err.get_or_insert(Error::StreamReset);

                self.finish(state)
            }
            Some(Ok(Flag::FIN_ACK)) | Some(Err(_)) | None => None,
        }
    }

    fn poll_read(&self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        loop {
            {
                let mut state = self.state.lock();

                if let Some(err) = &state.close_err {
                    return Poll::Ready(Err(err.clone().into()));
                }

                if !state.recv_buf.is_empty() {
                    let read_size = min(buf.len(), state.recv_buf.len());

                    buf[..read_size].copy_from_slice(&state.recv_buf[..read_size]);

                    state.recv_buf.drain(..read_size);

                    return Poll::Ready(Ok(read_size));
                }

                if !state.open.contains(HalfOpen::Read) {
                    return Poll::Ready(Ok(0));
                }

                match codec::decode(&mut state.inbound, self.max_message_size) {
                    Ok(Some(message)) => {
                        let on_done = self.handle_message(&mut state, message);

                        drop(state);

                        if let Some(on_done) = on_done {
                            on_done();
                        }

                        continue;
                    }
                    Ok(None) => {}
                    Err(err) => return Poll::Ready(Err(err.into())),
                }
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];

            let read_size = {
                let mut raw = self.raw.lock();

                ready!(Pin::new(&mut *raw).poll_read(cx, &mut chunk))
            };

            let mut state = self.state.lock();

            // the channel is closed under a pending read by reset/close paths,
            // the recorded error takes precedence over whatever the read returned.
            if let Some(err) = &state.close_err {
                return Poll::Ready(Err(err.clone().into()));
            }

            match read_size {
                Ok(0) => {
                    if state.open.contains(HalfOpen::Read) {
                        state.open ^= HalfOpen::Read;
                    }

                    let on_done = self.finish_if_closed(&mut state);

                    drop(state);

                    if let Some(on_done) = on_done {
                        on_done();
                    }

                    return Poll::Ready(Ok(0));
                }
                Ok(read_size) => state.inbound.extend_from_slice(&chunk[..read_size]),
                Err(err) => return Poll::Ready(Err(err)),
            }
        }
    }

    fn poll_write(&self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let mut state = self.state.lock();

        if let Some(err) = &state.close_err {
            return Poll::Ready(Err(err.clone().into()));
        }

        if !state.open.contains(HalfOpen::Write) {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stream closed for writing",
            )));
        }

        ready!(self.poll_drain(&mut state, cx))?;

        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let payload_len = min(buf.len(), self.max_message_size - MAX_FRAME_OVERHEAD);

        let frame = codec::encode(None, &buf[..payload_len])?;

        state.outbound.extend_from_slice(&frame);

        // the payload is accepted, a pending drain is resumed by the next write or flush.
        if let Poll::Ready(Err(err)) = self.poll_drain(&mut state, cx) {
            return Poll::Ready(Err(err));
        }

        Poll::Ready(Ok(payload_len))
    }

    fn poll_flush(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut state = self.state.lock();

        if let Some(err) = &state.close_err {
            return Poll::Ready(Err(err.clone().into()));
        }

        ready!(self.poll_drain(&mut state, cx))?;

        let mut raw = self.raw.lock();

        Pin::new(&mut *raw).poll_flush(cx)
    }

    fn poll_close(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut state = self.state.lock();

        if let Some(err) = &state.close_err {
            return Poll::Ready(Err(err.clone().into()));
        }

        if state.open.contains(HalfOpen::Write) {
            let frame = codec::encode(Some(Flag::FIN), &[])?;

            state.outbound.extend_from_slice(&frame);

            state.open ^= HalfOpen::Write;
        }

        ready!(self.poll_drain(&mut state, cx))?;

        let on_done = self.finish_if_closed(&mut state);

        drop(state);

        if let Some(on_done) = on_done {
            on_done();
        }

        Poll::Ready(Ok(()))
    }

    fn close_read(&self) {
        let on_done = {
            let mut state = self.state.lock();

            if state.finished || !state.open.contains(HalfOpen::Read) {
                return;
            }

            self.send_control(&mut state, Flag::STOP_SENDING);

            state.open ^= HalfOpen::Read;
            state.recv_buf.clear();

            self.finish_if_closed(&mut state)
        };

        if let Some(on_done) = on_done {
            on_done();
        }
    }

    fn reset(&self) {
        let on_done = {
            let mut state = self.state.lock();

            if state.finished {
                return;
            }

            self.send_control(&mut state, Flag::RESET);

            state.recv_buf.clear();
            state.close_err = Some(Error::StreamReset);

            self.finish(&mut state)
        };

        if let Some(on_done) = on_done {
            on_done();
        }
    }

    fn set_close_error(&self, err: Error) {
        let on_done = {
            let mut state = self.state.lock();

            if state.finished {
                return;
            }

            state.close_err = Some(err);

            self.finish(&mut state)
        };

        if let Some(on_done) = on_done {
            on_done();
        }
    }

    /// Tear down without sending anything and without firing the deregistration callback.
    fn discard(&self) {
        let mut state = self.state.lock();

        state.on_done = None;
        state.close_err.get_or_insert(Error::ConnectionClosed);

        // `on_done` is gone, nothing to invoke.
        _ = self.finish(&mut state);
    }
}

/// One multiplexed byte stream, carried by one data channel.
///
/// Dropping a stream that wasn't closed resets it.
pub struct Stream {
    shared: Arc<StreamShared>,
}

impl Stream {
    pub(crate) fn new(detached: DetachedChannel, max_message_size: usize, on_done: OnDone) -> Self {
        let id = detached.id();

        Self {
            shared: Arc::new(StreamShared {
                id,
                channel: detached.channel,
                raw: Mutex::new(detached.raw),
                max_message_size,
                state: Mutex::new(StreamState {
                    on_done: Some(on_done),
                    ..Default::default()
                }),
            }),
        }
    }

    /// The stream id, equal to the id of the data channel carrying it.
    pub fn id(&self) -> u16 {
        self.shared.id
    }

    /// Stop reading: tells the peer to stop sending and discards buffered data.
    pub fn close_read(&self) {
        self.shared.close_read()
    }

    /// Abruptly terminate both halves of the stream, discarding buffered data.
    pub fn reset(&self) {
        self.shared.reset()
    }

    pub(crate) fn handle(&self) -> StreamHandle {
        StreamHandle {
            shared: self.shared.clone(),
        }
    }

    /// Close a stream that never reached the application.
    pub(crate) fn discard(self) {
        self.shared.discard()
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();

        f.debug_struct("Stream")
            .field("id", &self.shared.id)
            .field("open", &state.open.bits())
            .field("finished", &state.finished)
            .finish()
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.shared.reset();
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        self.shared.poll_read(cx, buf)
    }
}

impl AsyncWrite for Stream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.shared.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shared.poll_flush(cx)
    }

    /// Close the write half, sending FIN to the peer.
    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shared.poll_close(cx)
    }
}

/// The connection's reference to a live [`Stream`].
#[derive(Clone)]
pub(crate) struct StreamHandle {
    shared: Arc<StreamShared>,
}

impl StreamHandle {
    pub(crate) fn id(&self) -> u16 {
        self.shared.id
    }

    pub(crate) fn reset(&self) {
        self.shared.reset()
    }

    /// Record `err` as the error of every later read/write, without discarding anything on the wire.
    pub(crate) fn set_close_error(&self, err: Error) {
        self.shared.set_close_error(err)
    }
}
