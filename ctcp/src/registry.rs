//! Registry of live connections.
//!
//! Every [`Connection`] is owned by a [`Registry`] and addressed through a
//! stable [`ConnId`].  The registry is a cheap cloneable handle around one
//! mutex, so:
//! - insertion, removal and event dispatch never run concurrently with a
//!   timer sweep, and
//! - a connection that is destroyed by an event leaves the map under the
//!   same lock acquisition that destroyed it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::connection::{ConnError, Connection, Tick};
use crate::io::{Channel, Sink, Source};

/// Stable identifier of a registered connection.  Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Why a connection left the registry during a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Teardown {
    /// Both directions closed and the linger period ran out.
    Graceful,
    /// The connection failed; carries the error that ended it.
    Aborted(ConnError),
}

/// Thread-safe map of connections swept by the timer driver.
pub struct Registry<C, S> {
    inner: Arc<Mutex<Inner<C, S>>>,
}

struct Inner<C, S> {
    connections: HashMap<ConnId, Connection<C, S>>,
    next_id: u64,
}

impl<C, S> Clone for Registry<C, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Channel, S: Sink> Default for Registry<C, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Channel, S: Sink> Registry<C, S> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                connections: HashMap::new(),
                next_id: 1,
            })),
        }
    }

    // A panic inside one event must not wedge every other connection.
    fn lock(&self) -> MutexGuard<'_, Inner<C, S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a freshly established connection.
    pub fn insert(&self, connection: Connection<C, S>) -> ConnId {
        let mut inner = self.lock();
        let id = ConnId(inner.next_id);
        inner.next_id += 1;
        inner.connections.insert(id, connection);
        log::debug!("[registry] {id} registered");
        id
    }

    /// Destroy and unregister a connection, returning its final state.
    pub fn remove(&self, id: ConnId) -> Option<Connection<C, S>> {
        let mut conn = self.lock().connections.remove(&id)?;
        conn.destroy();
        log::debug!("[registry] {id} removed");
        Some(conn)
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.lock().connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().connections.is_empty()
    }

    /// Identifiers of all live connections, in registration order.
    pub fn ids(&self) -> Vec<ConnId> {
        let mut ids: Vec<ConnId> = self.lock().connections.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Dispatch a datagram to connection `id`.
    pub fn on_segment(&self, id: ConnId, raw: &[u8], now: Instant) -> Result<(), ConnError> {
        self.dispatch(id, |conn| conn.on_segment(raw, now))
    }

    /// Dispatch application input to connection `id`.
    pub fn on_input<Src: Source>(
        &self,
        id: ConnId,
        source: &mut Src,
        now: Instant,
    ) -> Result<(), ConnError> {
        self.dispatch(id, |conn| conn.on_input(source, now))
    }

    /// Run one timer tick over every connection.
    ///
    /// Returns the connections destroyed during the sweep and why.
    pub fn tick(&self, now: Instant) -> Vec<(ConnId, Teardown)> {
        let mut inner = self.lock();
        let mut destroyed = Vec::new();

        inner.connections.retain(|&id, conn| match conn.on_tick(now) {
            Ok(Tick::Alive) => true,
            Ok(Tick::Destroyed) => {
                log::info!("[registry] {id} closed");
                destroyed.push((id, Teardown::Graceful));
                false
            }
            Err(e) => {
                log::warn!("[registry] {id} dropped: {e}");
                destroyed.push((id, Teardown::Aborted(e)));
                false
            }
        });

        destroyed.sort_unstable_by_key(|(id, _)| *id);
        destroyed
    }

    /// Run `f` against connection `id` while holding the registry lock.
    pub fn with_connection<R>(
        &self,
        id: ConnId,
        f: impl FnOnce(&mut Connection<C, S>) -> R,
    ) -> Option<R> {
        self.lock().connections.get_mut(&id).map(f)
    }

    fn dispatch(
        &self,
        id: ConnId,
        event: impl FnOnce(&mut Connection<C, S>) -> Result<(), ConnError>,
    ) -> Result<(), ConnError> {
        let mut inner = self.lock();
        let conn = inner.connections.get_mut(&id).ok_or(ConnError::Closed)?;
        let result = event(conn);
        if result.is_err() || conn.state().is_closed() {
            inner.connections.remove(&id);
            log::warn!("[registry] {id} removed after event");
        }
        result
    }
}
