use std::sync::OnceLock;

use async_channel::{Receiver, Sender};

use crate::Error;

/// Why a connection was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseReason {
    /// Closed by the local application.
    Closed,
    /// The underlying peer connection failed or was closed.
    TimedOut,
}

impl From<CloseReason> for Error {
    fn from(value: CloseReason) -> Self {
        match value {
            CloseReason::Closed => Error::ConnectionClosed,
            CloseReason::TimedOut => Error::ConnectionTimeout,
        }
    }
}

/// The one-shot cancellation broadcast of a connection.
///
/// The close reason is recorded before the signal fires, waiters woken by
/// [`cancelled`](Lifecycle::cancelled) read it without taking any lock.
pub(crate) struct Lifecycle {
    reason: OnceLock<CloseReason>,
    sender: Sender<()>,
    receiver: Receiver<()>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        // nothing is ever sent, closing the channel wakes every receiver.
        let (sender, receiver) = async_channel::bounded(1);

        Self {
            reason: OnceLock::new(),
            sender,
            receiver,
        }
    }

    /// Record `reason` and fire the signal.
    ///
    /// Returns false if the lifecycle had already been cancelled.
    pub(crate) fn cancel(&self, reason: CloseReason) -> bool {
        if self.reason.set(reason).is_err() {
            return false;
        }

        self.sender.close();

        true
    }

    /// Non-blocking poll of the signal.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.sender.is_closed()
    }

    /// The recorded close reason.
    ///
    /// Falls back to [`Error::ConnectionClosed`] if called before [`cancel`](Self::cancel).
    pub(crate) fn error(&self) -> Error {
        self.reason
            .get()
            .copied()
            .unwrap_or(CloseReason::Closed)
            .into()
    }

    /// Resolves once the signal fired.
    pub(crate) async fn cancelled(&self) {
        // `recv` only returns once the channel is closed.
        _ = self.receiver.recv().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[futures_test::test]
    async fn test_cancel_once() {
        let lifecycle = Lifecycle::new();

        assert!(!lifecycle.is_cancelled());

        assert!(lifecycle.cancel(CloseReason::TimedOut));
        assert!(!lifecycle.cancel(CloseReason::Closed));

        lifecycle.cancelled().await;

        assert!(lifecycle.is_cancelled());
        assert!(matches!(lifecycle.error(), Error::ConnectionTimeout));
    }
}
