use std::{future::Future, io, sync::Arc};

use futures::{channel::oneshot, pin_mut, select, FutureExt};

use crate::{
    lifecycle::Lifecycle,
    session::{ArcDataChannel, BoxRawChannel},
    Error, Result,
};

/// Wait for an outbound `channel` to open and detach it.
///
/// The open notification may come arbitrarily late, or never. Whichever of these fires first wins:
/// - the connection lifecycle is cancelled: returns the connection close error;
/// - `cancel` resolves: returns its error;
/// - the channel opens: returns the detach result.
pub(crate) async fn detach_channel<C>(
    lifecycle: &Lifecycle,
    channel: &ArcDataChannel,
    cancel: C,
) -> Result<BoxRawChannel>
where
    C: Future<Output = Error>,
{
    let (sender, receiver) = oneshot::channel();

    let opened = Arc::downgrade(channel);

    channel.on_open(Box::new(move || {
        let detached = match opened.upgrade() {
            Some(channel) => channel.detach(),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "data channel dropped before it opened",
            )),
        };

        // the waiter may have given up already.
        _ = sender.send(detached);
    }));

    let closed = lifecycle.cancelled().fuse();
    let cancel = cancel.fuse();
    let mut detached = receiver;

    pin_mut!(closed, cancel);

    select! {
        _ = closed => Err(lifecycle.error()),
        err = cancel => Err(err),
        detached = detached => match detached {
            Ok(detached) => Ok(detached?),
            Err(oneshot::Canceled) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "data channel closed before it opened",
            )
            .into()),
        },
    }
}
