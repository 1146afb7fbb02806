use std::collections::HashMap;

use parking_lot::Mutex;

use crate::{lifecycle::Lifecycle, stream::StreamHandle, Error, Result};

/// Registry of the live streams of one connection.
///
/// `None` is the closed sentinel, once taken no stream is ever added again.
pub(crate) struct StreamTable {
    streams: Mutex<Option<HashMap<u16, StreamHandle>>>,
}

impl StreamTable {
    pub(crate) fn new() -> Self {
        Self {
            streams: Mutex::new(Some(HashMap::new())),
        }
    }

    /// Register `handle` under its stream id.
    ///
    /// Returns the connection close error if the table is closed, or
    /// [`Error::StreamIdCollision`] if the id is in use.
    pub(crate) fn add(&self, handle: StreamHandle, lifecycle: &Lifecycle) -> Result<()> {
        let mut streams = self.streams.lock();

        let Some(streams) = streams.as_mut() else {
            return Err(lifecycle.error());
        };

        let id = handle.id();

        if streams.contains_key(&id) {
            return Err(Error::StreamIdCollision(id));
        }

        streams.insert(id, handle);

        Ok(())
    }

    /// Remove stream `id`, no-op if it isn't registered or the table is closed.
    pub(crate) fn remove(&self, id: u16) {
        if let Some(streams) = self.streams.lock().as_mut() {
            if streams.remove(&id).is_some() {
                log::trace!("stream removed, id={}", id);
            }
        }
    }

    /// Close the table, returning every stream that was registered.
    pub(crate) fn close(&self) -> Vec<StreamHandle> {
        self.streams
            .lock()
            .take()
            .map(|streams| streams.into_values().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn ids(&self) -> Vec<u16> {
        let mut ids = self
            .streams
            .lock()
            .as_ref()
            .map(|streams| streams.keys().copied().collect::<Vec<_>>())
            .unwrap_or_default();

        ids.sort();

        ids
    }
}
