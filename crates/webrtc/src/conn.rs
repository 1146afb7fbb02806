use std::{
    future::Future,
    io,
    sync::{Arc, Once, OnceLock},
};

use async_trait::async_trait;
use futures::{future, pin_mut, select, FutureExt};
use futures_timer::Delay;
use rp2p_core::{
    multiaddr::Multiaddr, BoxConnScope, BoxStream, ConnScope, Connection, ConnectionState,
    Direction, NullScope, PeerId, PublicKey,
};

use crate::{
    accept::AcceptQueue,
    detach::detach_channel,
    id::StreamIdAllocator,
    lifecycle::{CloseReason, Lifecycle},
    session::{ArcDataChannel, DetachedChannel, PeerConnection},
    stream::Stream,
    table::StreamTable,
    Config, Error, Result,
};

/// How the underlying peer connection was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportVariant {
    /// Dialed directly using the certificate hash of the listener.
    Direct,
    /// Negotiated through a relayed signaling stream.
    Relayed,
}

impl TransportVariant {
    /// The transport name reported by [`ConnectionState`].
    pub fn name(&self) -> &'static str {
        match self {
            TransportVariant::Direct => "webrtc-direct",
            TransportVariant::Relayed => "webrtc",
        }
    }
}

/// Construction-time identity of a [`WebRtcConn`].
pub struct ConnParams {
    direction: Direction,
    variant: TransportVariant,
    local_peer: PeerId,
    local_addr: Multiaddr,
    remote_peer: Option<PeerId>,
    remote_key: Option<PublicKey>,
    remote_addr: Multiaddr,
    scope: BoxConnScope,
}

impl ConnParams {
    /// Create params of a direct connection without resource accounting.
    ///
    /// The remote identity is usually unknown until the security handshake finished,
    /// see [`WebRtcConn::set_remote_peer`].
    pub fn new(
        direction: Direction,
        local_peer: PeerId,
        local_addr: Multiaddr,
        remote_addr: Multiaddr,
    ) -> Self {
        Self {
            direction,
            variant: TransportVariant::Direct,
            local_peer,
            local_addr,
            remote_peer: None,
            remote_key: None,
            remote_addr,
            scope: Box::new(NullScope),
        }
    }

    pub fn variant(mut self, variant: TransportVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn remote_peer(mut self, peer: PeerId) -> Self {
        self.remote_peer = Some(peer);
        self
    }

    pub fn remote_public_key(mut self, key: PublicKey) -> Self {
        self.remote_key = Some(key);
        self
    }

    /// Set the resource scope released when the connection is torn down.
    pub fn scope<S: ConnScope + 'static>(mut self, scope: S) -> Self {
        self.scope = Box::new(scope);
        self
    }
}

/// Closes a freshly created channel unless the open succeeded.
struct PendingChannel(Option<ArcDataChannel>);

impl PendingChannel {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for PendingChannel {
    fn drop(&mut self) {
        if let Some(channel) = self.0.take() {
            if let Err(err) = channel.close() {
                log::debug!("close abandoned data channel, id={}, err={}", channel.id(), err);
            }
        }
    }
}

struct ConnInner {
    pc: Arc<dyn PeerConnection>,
    scope: BoxConnScope,
    config: Config,
    close_once: Once,
    lifecycle: Lifecycle,
    direction: Direction,
    local_peer: PeerId,
    local_addr: Multiaddr,
    remote_peer: OnceLock<PeerId>,
    remote_key: OnceLock<PublicKey>,
    remote_addr: Multiaddr,
    conn_state: ConnectionState,
    streams: StreamTable,
    ids: StreamIdAllocator,
    accept_queue: AcceptQueue,
}

impl ConnInner {
    /// The teardown shared by every close path, runs exactly once.
    fn close_with(&self, reason: CloseReason) {
        self.close_once.call_once(|| {
            self.lifecycle.cancel(reason);

            let streams = self.streams.close();

            for stream in &streams {
                match reason {
                    CloseReason::Closed => stream.reset(),
                    CloseReason::TimedOut => stream.set_close_error(Error::ConnectionTimeout),
                }
            }

            for detached in self.accept_queue.close() {
                if let Err(err) = detached.channel.close() {
                    log::warn!(
                        "close queued data channel, id={}, err={}",
                        detached.id(),
                        err
                    );
                }
            }

            if let Err(err) = self.pc.close() {
                log::warn!("close peer connection, err={}", err);
            }

            self.scope.done();

            log::debug!(
                "webrtc connection closed, peer={:?}, reason={:?}, streams={}",
                self.remote_peer.get(),
                reason,
                streams.len()
            );
        });
    }

    fn close_timed_out(&self) {
        // teardown closing the peer connection reports back through the state handler.
        if self.lifecycle.is_cancelled() {
            return;
        }

        self.close_with(CloseReason::TimedOut);
    }

    async fn open<C>(self: &Arc<Self>, cancel: C) -> Result<Stream>
    where
        C: Future<Output = Error>,
    {
        if self.lifecycle.is_cancelled() {
            return Err(self.lifecycle.error());
        }

        let id = self.ids.next()?;

        let channel = self
            .pc
            .create_data_channel(id)
            .map_err(|err| Error::Open(Box::new(err.into())))?;

        let pending = PendingChannel(Some(channel.clone()));

        let raw = match detach_channel(&self.lifecycle, &channel, cancel).await {
            Ok(raw) => raw,
            Err(err @ Error::Io(_)) => return Err(Error::Open(Box::new(err))),
            Err(err) => return Err(err),
        };

        pending.disarm();

        let stream = self.register(DetachedChannel::new(raw, channel))?;

        log::trace!("stream opened, id={}", id);

        Ok(stream)
    }

    async fn accept(self: &Arc<Self>) -> Result<Stream> {
        if self.lifecycle.is_cancelled() {
            return Err(self.lifecycle.error());
        }

        let closed = self.lifecycle.cancelled().fuse();
        let next = self.accept_queue.recv().fuse();

        pin_mut!(closed, next);

        let detached = select! {
            _ = closed => return Err(self.lifecycle.error()),
            detached = next => match detached {
                Some(detached) => detached,
                None => return Err(self.lifecycle.error()),
            },
        };

        let id = detached.id();

        let stream = self.register(detached)?;

        log::trace!("stream accepted, id={}", id);

        Ok(stream)
    }

    /// Wrap `detached` and add it to the stream table.
    fn register(self: &Arc<Self>, detached: DetachedChannel) -> Result<Stream> {
        let id = detached.id();

        let conn = Arc::downgrade(self);

        let stream = Stream::new(
            detached,
            self.config.max_message_size,
            Box::new(move || {
                if let Some(conn) = conn.upgrade() {
                    conn.streams.remove(id);
                }
            }),
        );

        if let Err(err) = self.streams.add(stream.handle(), &self.lifecycle) {
            stream.discard();
            return Err(err);
        }

        Ok(stream)
    }
}

impl Drop for ConnInner {
    fn drop(&mut self) {
        self.close_with(CloseReason::Closed);
    }
}

/// A muxed connection over one WebRTC peer connection.
///
/// Every stream is carried by its own data channel, the channel id is the stream id.
/// Dropping the last clone closes the connection.
#[derive(Clone)]
pub struct WebRtcConn {
    inner: Arc<ConnInner>,
}

impl WebRtcConn {
    /// Take over `pc`, a negotiated peer connection.
    ///
    /// Inbound channels are accepted as soon as this returns, which must happen before the
    /// security handshake starts so that no channel the remote opens is missed.
    ///
    /// Fails with [`Error::ConnectionClosed`] if `pc` already failed or was closed.
    pub fn new(pc: Arc<dyn PeerConnection>, params: ConnParams, config: Config) -> Result<Self> {
        let remote_peer = OnceLock::new();
        let remote_key = OnceLock::new();

        if let Some(key) = params.remote_key {
            _ = remote_peer.set(key.to_peer_id());
            _ = remote_key.set(key);
        }

        if let Some(peer) = params.remote_peer {
            if remote_peer.get_or_init(|| peer) != &peer {
                params.scope.done();
                return Err(Error::RemoteIdentityMismatch);
            }
        }

        let accept_queue = AcceptQueue::install(pc.as_ref(), config.accept_queue_len);

        let inner = Arc::new(ConnInner {
            pc,
            scope: params.scope,
            close_once: Once::new(),
            lifecycle: Lifecycle::new(),
            direction: params.direction,
            local_peer: params.local_peer,
            local_addr: params.local_addr,
            remote_peer,
            remote_key,
            remote_addr: params.remote_addr,
            conn_state: ConnectionState {
                transport: params.variant.name(),
            },
            streams: StreamTable::new(),
            ids: StreamIdAllocator::new(params.direction),
            accept_queue,
            config,
        });

        let conn = Arc::downgrade(&inner);

        inner.pc.on_connection_state_change(Box::new(move |state| {
            if !state.is_terminal() {
                return;
            }

            if let Some(conn) = conn.upgrade() {
                log::debug!("peer connection {:?}, closing", state);
                conn.close_timed_out();
            }
        }));

        // the peer connection may have failed before the handler was installed.
        if inner.pc.connection_state().is_terminal() {
            inner.close_with(CloseReason::Closed);
            return Err(Error::ConnectionClosed);
        }

        Ok(Self { inner })
    }

    /// Open a new outbound stream.
    ///
    /// Waits at most [`Config::open_timeout`] for the new channel to become ready.
    pub async fn open_stream(&self) -> Result<Stream> {
        let timeout = self.inner.config.open_timeout;

        self.inner
            .open(async move {
                match timeout {
                    Some(timeout) => {
                        Delay::new(timeout).await;
                        Error::DeadlineExceeded
                    }
                    None => future::pending().await,
                }
            })
            .await
    }

    /// Open a new outbound stream, giving up with [`Error::Canceled`] once `cancel` resolves.
    pub async fn open_stream_with<C>(&self, cancel: C) -> Result<Stream>
    where
        C: Future<Output = ()>,
    {
        self.inner
            .open(async move {
                cancel.await;
                Error::Canceled
            })
            .await
    }

    /// Accept the next stream opened by the remote peer.
    pub async fn accept_stream(&self) -> Result<Stream> {
        self.inner.accept().await
    }

    /// Close the connection, resetting every live stream.
    ///
    /// Idempotent, concurrent callers return once the teardown finished.
    pub async fn close(&self) -> Result<()> {
        self.inner.close_with(CloseReason::Closed);

        Ok(())
    }

    /// Returns true once the connection was closed, by whatever path.
    pub fn is_closed(&self) -> bool {
        self.inner.lifecycle.is_cancelled()
    }

    /// Set the remote peer id authenticated by the security handshake.
    pub fn set_remote_peer(&self, peer: PeerId) -> Result<()> {
        if self.inner.remote_peer.get_or_init(|| peer) != &peer {
            return Err(Error::RemoteIdentityMismatch);
        }

        Ok(())
    }

    /// Set the remote public key authenticated by the security handshake,
    /// also setting the remote peer id derived from it.
    pub fn set_remote_public_key(&self, key: PublicKey) -> Result<()> {
        let peer = key.to_peer_id();

        if let Some(current) = self.inner.remote_peer.get() {
            if current != &peer {
                return Err(Error::RemoteIdentityMismatch);
            }
        }

        if self.inner.remote_key.get_or_init(|| key.clone()) != &key {
            return Err(Error::RemoteIdentityMismatch);
        }

        self.set_remote_peer(peer)
    }

    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    pub fn local_peer(&self) -> PeerId {
        self.inner.local_peer
    }

    pub fn local_addr(&self) -> &Multiaddr {
        &self.inner.local_addr
    }

    pub fn remote_peer(&self) -> Option<PeerId> {
        self.inner.remote_peer.get().copied()
    }

    pub fn remote_public_key(&self) -> Option<PublicKey> {
        self.inner.remote_key.get().cloned()
    }

    pub fn remote_addr(&self) -> &Multiaddr {
        &self.inner.remote_addr
    }

    pub fn conn_state(&self) -> ConnectionState {
        self.inner.conn_state
    }

    /// The resource scope released when this connection is torn down.
    pub fn scope(&self) -> &dyn ConnScope {
        self.inner.scope.as_ref()
    }
}

#[async_trait]
impl Connection for WebRtcConn {
    fn local_addr(&self) -> io::Result<Multiaddr> {
        Ok(self.inner.local_addr.clone())
    }

    fn peer_addr(&self) -> io::Result<Multiaddr> {
        Ok(self.inner.remote_addr.clone())
    }

    fn local_peer_id(&self) -> io::Result<PeerId> {
        Ok(self.inner.local_peer)
    }

    fn peer_id(&self) -> io::Result<PeerId> {
        self.remote_peer().ok_or(io::Error::new(
            io::ErrorKind::NotConnected,
            "remote peer not authenticated",
        ))
    }

    fn public_key(&self) -> io::Result<PublicKey> {
        self.remote_public_key().ok_or(io::Error::new(
            io::ErrorKind::NotConnected,
            "remote public key not authenticated",
        ))
    }

    fn conn_state(&self) -> ConnectionState {
        self.inner.conn_state
    }

    async fn open(&self) -> io::Result<BoxStream> {
        Ok(Box::new(self.open_stream().await?))
    }

    async fn accept(&self) -> io::Result<BoxStream> {
        Ok(Box::new(self.accept_stream().await?))
    }

    async fn close(&self) -> io::Result<()> {
        self.inner.close_with(CloseReason::Closed);

        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.lifecycle.is_cancelled()
    }
}
