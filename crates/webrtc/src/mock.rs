//! In-memory session primitive: two linked peer connections whose data channels
//! are pairs of unbounded pipes.

use std::{
    cmp::min,
    io,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Weak,
    },
    task::{ready, Context, Poll},
};

use futures::{
    channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender},
    AsyncRead, AsyncReadExt, AsyncWrite, StreamExt,
};
use parking_lot::Mutex;
use rp2p_core::ConnScope;

use crate::{
    pb::Message,
    session::{
        ArcDataChannel, BoxRawChannel, DataChannel, OnDataChannel, OnOpen, OnStateChange,
        PeerConnection, PeerConnectionState,
    },
};

/// Detached end of a mock data channel.
pub(crate) struct MockRaw {
    tx: UnboundedSender<Vec<u8>>,
    rx: UnboundedReceiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl AsyncRead for MockRaw {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        if self.pending.is_empty() {
            match ready!(self.rx.poll_next_unpin(cx)) {
                Some(chunk) => self.pending = chunk,
                None => return Poll::Ready(Ok(0)),
            }
        }

        let read_size = min(buf.len(), self.pending.len());

        buf[..read_size].copy_from_slice(&self.pending[..read_size]);

        self.pending.drain(..read_size);

        Poll::Ready(Ok(read_size))
    }
}

impl AsyncWrite for MockRaw {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.tx.unbounded_send(buf.to_vec()) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(io::ErrorKind::BrokenPipe.into())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.tx.close_channel();

        Poll::Ready(Ok(()))
    }
}

/// Read one length-delimited frame from the peer end of a channel.
pub(crate) async fn read_frame(raw: &mut BoxRawChannel) -> io::Result<Message> {
    let len = unsigned_varint::aio::read_usize(&mut *raw)
        .await
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

    let mut body = vec![0; len];

    raw.read_exact(&mut body).await?;

    protobuf::Message::parse_from_bytes(&body)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

pub(crate) struct MockDataChannel {
    id: u16,
    open: Mutex<bool>,
    on_open: Mutex<Option<OnOpen>>,
    raw: Mutex<Option<MockRaw>>,
    /// Writer of the local -> remote pipe.
    outbound: UnboundedSender<Vec<u8>>,
    /// Writer of the remote -> local pipe, kept to close it.
    inbound: UnboundedSender<Vec<u8>>,
    fail_detach: AtomicBool,
}

impl MockDataChannel {
    /// Create the two linked ends of channel `id`.
    pub(crate) fn pair(id: u16) -> (Arc<Self>, Arc<Self>) {
        let (a_tx, b_rx) = unbounded();
        let (b_tx, a_rx) = unbounded();

        let a = Self {
            id,
            open: Mutex::new(false),
            on_open: Mutex::new(None),
            raw: Mutex::new(Some(MockRaw {
                tx: a_tx.clone(),
                rx: a_rx,
                pending: vec![],
            })),
            outbound: a_tx.clone(),
            inbound: b_tx.clone(),
            fail_detach: AtomicBool::new(false),
        };

        let b = Self {
            id,
            open: Mutex::new(false),
            on_open: Mutex::new(None),
            raw: Mutex::new(Some(MockRaw {
                tx: b_tx.clone(),
                rx: b_rx,
                pending: vec![],
            })),
            outbound: b_tx,
            inbound: a_tx,
            fail_detach: AtomicBool::new(false),
        };

        (Arc::new(a), Arc::new(b))
    }

    /// Mark the channel open and run the open handler.
    pub(crate) fn open(&self) {
        *self.open.lock() = true;

        let on_open = self.on_open.lock().take();

        if let Some(on_open) = on_open {
            on_open();
        }
    }

    /// Remove the pending open handler without running it.
    pub(crate) fn take_open_handler(&self) -> Option<OnOpen> {
        self.on_open.lock().take()
    }

    /// Make every later [`detach`](DataChannel::detach) call fail.
    pub(crate) fn fail_detach(&self) {
        self.fail_detach.store(true, Ordering::SeqCst);
    }

    /// Returns true once either end closed the channel.
    pub(crate) fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

impl DataChannel for MockDataChannel {
    fn id(&self) -> u16 {
        self.id
    }

    fn on_open(&self, f: OnOpen) {
        let open = self.open.lock();

        if *open {
            drop(open);
            f();
        } else {
            *self.on_open.lock() = Some(f);
        }
    }

    fn detach(&self) -> io::Result<BoxRawChannel> {
        if self.fail_detach.load(Ordering::SeqCst) || !*self.open.lock() {
            return Err(io::Error::new(io::ErrorKind::Other, "data channel not open"));
        }

        let raw = self
            .raw
            .lock()
            .take()
            .ok_or(io::Error::new(io::ErrorKind::Other, "already detached"))?;

        Ok(Box::new(raw))
    }

    fn close(&self) -> io::Result<()> {
        self.outbound.close_channel();
        self.inbound.close_channel();

        Ok(())
    }
}

/// One side of a linked pair of in-memory peer connections.
pub(crate) struct MockPeerConnection {
    state: Mutex<PeerConnectionState>,
    on_state: Mutex<Option<Arc<dyn Fn(PeerConnectionState) + Send + Sync>>>,
    on_data_channel: Mutex<Option<Arc<dyn Fn(ArcDataChannel) + Send + Sync>>>,
    /// Remote channels that arrived before a handler was registered.
    undelivered: Mutex<Vec<ArcDataChannel>>,
    remote: Mutex<Weak<MockPeerConnection>>,
    /// Open both ends of every new channel right away.
    auto_open: AtomicBool,
    /// Every channel of this side, created locally or by the remote.
    channels: Mutex<Vec<Arc<MockDataChannel>>>,
    close_calls: AtomicUsize,
}

impl MockPeerConnection {
    fn new() -> Self {
        Self {
            state: Mutex::new(PeerConnectionState::Connected),
            on_state: Mutex::new(None),
            on_data_channel: Mutex::new(None),
            undelivered: Mutex::new(vec![]),
            remote: Mutex::new(Weak::new()),
            auto_open: AtomicBool::new(true),
            channels: Mutex::new(vec![]),
            close_calls: AtomicUsize::new(0),
        }
    }

    /// Create two connected peer connections.
    pub(crate) fn pair() -> (Arc<Self>, Arc<Self>) {
        let a = Arc::new(Self::new());
        let b = Arc::new(Self::new());

        *a.remote.lock() = Arc::downgrade(&b);
        *b.remote.lock() = Arc::downgrade(&a);

        (a, b)
    }

    /// Leave new channels unopened, [`MockDataChannel::open`] opens them.
    pub(crate) fn manual_open(&self) {
        self.auto_open.store(false, Ordering::SeqCst);
    }

    /// Channels of this side, in creation/arrival order.
    pub(crate) fn channels(&self) -> Vec<Arc<MockDataChannel>> {
        self.channels.lock().clone()
    }

    /// Drop this side's references to its channels.
    pub(crate) fn forget_channels(&self) {
        self.channels.lock().clear();
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Simulate an ICE failure.
    pub(crate) fn fail(&self) {
        self.set_state(PeerConnectionState::Failed);
    }

    fn set_state(&self, state: PeerConnectionState) {
        *self.state.lock() = state;

        let on_state = self.on_state.lock().clone();

        if let Some(on_state) = on_state {
            on_state(state);
        }
    }

    fn deliver(&self, channel: Arc<MockDataChannel>) {
        self.channels.lock().push(channel.clone());

        let on_data_channel = self.on_data_channel.lock().clone();

        match on_data_channel {
            Some(on_data_channel) => on_data_channel(channel),
            None => self.undelivered.lock().push(channel),
        }
    }
}

impl PeerConnection for MockPeerConnection {
    fn create_data_channel(&self, id: u16) -> io::Result<ArcDataChannel> {
        if self.state.lock().is_terminal() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "peer connection closed",
            ));
        }

        let (local, remote) = MockDataChannel::pair(id);

        self.channels.lock().push(local.clone());

        let peer = self.remote.lock().upgrade();

        if let Some(peer) = peer {
            peer.deliver(remote.clone());
        }

        if self.auto_open.load(Ordering::SeqCst) {
            local.open();
            remote.open();
        }

        Ok(local)
    }

    fn on_connection_state_change(&self, f: OnStateChange) {
        *self.on_state.lock() = Some(Arc::from(f));
    }

    fn on_data_channel(&self, f: OnDataChannel) {
        let f: Arc<dyn Fn(ArcDataChannel) + Send + Sync> = Arc::from(f);

        *self.on_data_channel.lock() = Some(f.clone());

        let undelivered = std::mem::take(&mut *self.undelivered.lock());

        for channel in undelivered {
            f(channel);
        }
    }

    fn connection_state(&self) -> PeerConnectionState {
        *self.state.lock()
    }

    fn close(&self) -> io::Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);

        for channel in self.channels() {
            _ = channel.close();
        }

        // like a real peer connection, closing reports the state change back.
        self.set_state(PeerConnectionState::Closed);

        Ok(())
    }
}

/// A resource scope counting its releases.
#[derive(Default, Clone)]
pub(crate) struct CountingScope(pub(crate) Arc<AtomicUsize>);

impl ConnScope for CountingScope {
    fn done(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}
