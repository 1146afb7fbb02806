use std::{io, sync::Arc};

/// The webrtc multiplexer error type.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("connection closed")]
    ConnectionClosed,

    /// The underlying peer connection failed or was closed under us.
    ///
    /// Retrying on this connection is futile, but the failure was not initiated by the caller.
    #[error("connection timeout")]
    ConnectionTimeout,

    #[error("exhausted stream ID space")]
    StreamIdExhausted,

    #[error("stream ID {0} already exists")]
    StreamIdCollision(u16),

    #[error("operation canceled")]
    Canceled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("stream reset")]
    StreamReset,

    #[error("remote identity already set to a different value")]
    RemoteIdentityMismatch,

    #[error("open stream: {0}")]
    Open(Box<Error>),

    #[error(transparent)]
    Io(Arc<io::Error>),

    #[error(transparent)]
    Protobuf(Arc<protobuf::Error>),
}

impl Error {
    /// Returns true if this error reports a timeout of the whole connection.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::ConnectionTimeout | Error::DeadlineExceeded => true,
            Error::Open(inner) => inner.is_timeout(),
            Error::Io(err) => err.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }

    /// Returns true if no further operation can succeed on the connection that returned this error.
    pub fn is_closed(&self) -> bool {
        match self {
            Error::ConnectionClosed | Error::ConnectionTimeout => true,
            Error::Open(inner) => inner.is_closed(),
            _ => false,
        }
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error::Io(Arc::new(value))
    }
}

impl From<protobuf::Error> for Error {
    fn from(value: protobuf::Error) -> Self {
        Error::Protobuf(Arc::new(value))
    }
}

impl From<Error> for io::Error {
    fn from(value: Error) -> Self {
        let kind = match &value {
            Error::ConnectionClosed => io::ErrorKind::NotConnected,
            Error::ConnectionTimeout | Error::DeadlineExceeded => io::ErrorKind::TimedOut,
            Error::StreamIdExhausted => io::ErrorKind::Other,
            Error::StreamIdCollision(_) => io::ErrorKind::AlreadyExists,
            Error::Canceled => io::ErrorKind::Interrupted,
            Error::StreamReset => io::ErrorKind::ConnectionReset,
            Error::RemoteIdentityMismatch => io::ErrorKind::InvalidInput,
            Error::Protobuf(_) => io::ErrorKind::InvalidData,
            Error::Open(inner) => return io::Error::from((**inner).clone()),
            Error::Io(err) => err.kind(),
        };

        io::Error::new(kind, value)
    }
}

/// Type alias of [`std::result::Result<T,Error>`]
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_bridge() {
        let err = io::Error::from(Error::ConnectionTimeout);

        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        let inner = err.get_ref().unwrap().downcast_ref::<Error>().unwrap();

        assert!(inner.is_timeout());

        let err = io::Error::from(Error::Open(Box::new(Error::StreamReset)));

        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);

        assert!(!Error::ConnectionClosed.is_timeout());
        assert!(Error::Open(Box::new(Error::ConnectionClosed)).is_closed());
    }
}
