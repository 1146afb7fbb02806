use std::sync::Arc;

use async_channel::{Receiver, Sender, TrySendError};

use crate::{
    codec,
    pb::message::Flag,
    session::{ArcDataChannel, BoxRawChannel, DetachedChannel, PeerConnection},
};

/// Bounded queue of detached inbound channels, fed by the peer connection's data channel handler.
pub(crate) struct AcceptQueue {
    receiver: Receiver<DetachedChannel>,
}

impl AcceptQueue {
    /// Create a queue holding at most `len` channels and install its feeder on `pc`.
    pub(crate) fn install(pc: &dyn PeerConnection, len: usize) -> Self {
        let (sender, receiver) = async_channel::bounded(len);

        pc.on_data_channel(Box::new(move |channel| {
            let sender = sender.clone();
            let opened = Arc::downgrade(&channel);
            let id = channel.id();

            channel.on_open(Box::new(move || match opened.upgrade() {
                Some(channel) => on_remote_channel(&sender, channel),
                None => {
                    log::warn!("data channel dropped before it opened, id={}", id);
                }
            }));
        }));

        Self { receiver }
    }

    /// Wait for the next inbound channel.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub(crate) async fn recv(&self) -> Option<DetachedChannel> {
        self.receiver.recv().await.ok()
    }

    /// Close the queue, returning every channel that was waiting in it.
    ///
    /// Channels that open later are rejected.
    pub(crate) fn close(&self) -> Vec<DetachedChannel> {
        self.receiver.close();

        let mut pending = vec![];

        while let Ok(detached) = self.receiver.try_recv() {
            pending.push(detached);
        }

        pending
    }
}

fn on_remote_channel(sender: &Sender<DetachedChannel>, channel: ArcDataChannel) {
    let id = channel.id();

    let raw = match channel.detach() {
        Ok(raw) => raw,
        Err(err) => {
            log::warn!("could not detach data channel, id={}, err={}", id, err);
            return;
        }
    };

    match sender.try_send(DetachedChannel::new(raw, channel)) {
        Ok(()) => {
            log::trace!("inbound data channel queued, id={}", id);
        }
        Err(TrySendError::Full(detached)) => {
            log::warn!("connection busy, rejecting stream, id={}", id);
            reject(detached);
        }
        Err(TrySendError::Closed(detached)) => {
            log::warn!("connection closed, rejecting stream, id={}", id);
            reject(detached);
        }
    }
}

/// Ask the remote to abandon the channel: one best-effort RESET frame, then close.
fn reject(detached: DetachedChannel) {
    let DetachedChannel { mut raw, channel } = detached;

    send_reset(channel.id(), &mut raw);

    if let Err(err) = channel.close() {
        log::debug!("close rejected data channel, id={}, err={}", channel.id(), err);
    }
}

fn send_reset(id: u16, raw: &mut BoxRawChannel) {
    let frame = match codec::encode(Some(Flag::RESET), &[]) {
        Ok(frame) => frame,
        Err(err) => {
            log::debug!("encode RESET frame, id={}, err={}", id, err);
            return;
        }
    };

    if let Err(err) = codec::write_once(raw, &frame) {
        log::debug!("send RESET frame, id={}, err={}", id, err);
    }
}
