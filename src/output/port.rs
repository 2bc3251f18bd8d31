//! The output port: connections, SRI bookkeeping and fan-out
//!
//! All mutable state sits behind one port-wide lock, so a push is atomic
//! with respect to connects, disconnects and filter changes. Each stream
//! records which connections have already received its current SRI; a
//! connection that has not is sent the SRI right before its next packet.
//!
//! Transport failures never reach the writer. A fatal error retires the
//! connection, and transient errors are counted and logged until a cap is
//! reached, after which the port goes quiet until the connection recovers.

use super::chunker::Fragments;
use super::filter::{ConnectionDescriptor, RoutingFilter};
use super::stream::{OutStreamShared, OutputStream};
use super::transport::{Transport, TransportError};
use crate::config::OutPortConfig;
use crate::data::PortData;
use crate::error::{BulkioError, Result};
use crate::sri::{self, StreamSri};
use crate::statistics::{LinkStatistics, PortState, PortStatistics};
use crate::time::PrecisionTime;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Callback receiving a connection ID
pub type ConnectionListener = Box<dyn Fn(&str) + Send + Sync>;

struct Connection<D: PortData> {
    id: String,
    transport: Box<dyn Transport<D>>,
    stats: LinkStatistics,
    alive: bool,
    /// Streams with data sent over this connection and no end-of-stream yet
    streams: BTreeSet<String>,
}

impl<D: PortData> Connection<D> {
    /// Classify a transport result; returns whether the call succeeded
    fn check(&mut self, result: std::result::Result<(), TransportError>, port: &str, max_logged: u64) -> bool {
        match result {
            Ok(()) => {
                self.stats.reset_connection_errors();
                true
            }
            Err(TransportError::Fatal(message)) => {
                error!(
                    "Push failed on port '{}' connection '{}' ({}): {}",
                    port,
                    self.id,
                    self.transport.describe(),
                    message
                );
                self.alive = false;
                false
            }
            Err(TransportError::Transient(message)) => {
                let errors = self.stats.increment_connection_errors();
                if errors < max_logged {
                    warn!(
                        "Push error on port '{}' connection '{}': {}",
                        port, self.id, message
                    );
                } else if errors == max_logged {
                    warn!(
                        "Push error on port '{}' connection '{}': {} (suppressing further messages)",
                        port, self.id, message
                    );
                }
                false
            }
        }
    }

    fn push_sri(&mut self, sri: &StreamSri, port: &str, max_logged: u64) -> bool {
        trace!("Pushing SRI '{}' to connection '{}'", sri.stream_id, self.id);
        let result = self.transport.push_sri(sri);
        self.check(result, port, max_logged)
    }
}

struct StreamEntry<D: PortData> {
    sri: Arc<StreamSri>,
    /// Connections that have received the current SRI
    seen: HashSet<String>,
    handle: Option<Arc<OutStreamShared<D>>>,
}

impl<D: PortData> StreamEntry<D> {
    fn new(sri: StreamSri) -> Self {
        Self {
            sri: Arc::new(sri),
            seen: HashSet::new(),
            handle: None,
        }
    }

    fn handle(&mut self, buffer_size: usize) -> Arc<OutStreamShared<D>> {
        self.handle
            .get_or_insert_with(|| Arc::new(OutStreamShared::new((*self.sri).clone(), buffer_size)))
            .clone()
    }
}

struct OutPortState<D: PortData> {
    connections: Vec<Connection<D>>,
    streams: BTreeMap<String, StreamEntry<D>>,
    filter: RoutingFilter,
}

#[derive(Default)]
struct ConnectionListeners {
    connect: Vec<ConnectionListener>,
    disconnect: Vec<ConnectionListener>,
}

struct OutPortInner<D: PortData> {
    name: String,
    config: OutPortConfig,
    state: Mutex<OutPortState<D>>,
    listeners: RwLock<ConnectionListeners>,
}

/// An output port for payload type `D`
///
/// Cloning yields another handle to the same port.
pub struct OutPort<D: PortData> {
    inner: Arc<OutPortInner<D>>,
}

impl<D: PortData> Clone for OutPort<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D: PortData> std::fmt::Debug for OutPort<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutPort")
            .field("name", &self.inner.name)
            .field("connections", &self.connections())
            .finish()
    }
}

impl<D: PortData> OutPort<D> {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, &OutPortConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: &OutPortConfig) -> Self {
        Self {
            inner: Arc::new(OutPortInner {
                name: name.into(),
                config: config.clone(),
                state: Mutex::new(OutPortState {
                    connections: Vec::new(),
                    streams: BTreeMap::new(),
                    filter: RoutingFilter::default(),
                }),
                listeners: RwLock::new(ConnectionListeners::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &OutPortConfig {
        &self.inner.config
    }

    // ── Connections ──

    /// Attach a transport under `connection_id` and send it the current SRI
    /// of every stream routed to it
    pub fn connect_port(&self, transport: Box<dyn Transport<D>>, connection_id: &str) -> Result<()> {
        let name = &self.inner.name;
        let max_logged = self.inner.config.max_logged_connection_errors;
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.connections.iter().any(|c| c.id == connection_id) {
                return Err(BulkioError::OccupiedPort(connection_id.to_string()));
            }

            let mut connection = Connection {
                id: connection_id.to_string(),
                stats: LinkStatistics::with_history(
                    name.clone(),
                    D::ELEMENT_BITS,
                    self.inner.config.history_window,
                ),
                transport,
                alive: true,
                streams: BTreeSet::new(),
            };
            for (stream_id, entry) in state.streams.iter_mut() {
                if !state.filter.is_routed(name, connection_id, stream_id) {
                    continue;
                }
                if connection.push_sri(&entry.sri, name, max_logged) {
                    entry.seen.insert(connection_id.to_string());
                }
            }
            info!(
                "Port '{}' connected '{}' ({})",
                name,
                connection_id,
                connection.transport.describe()
            );
            state.connections.push(connection);
        }

        for listener in &self.inner.listeners.read().connect {
            listener(connection_id);
        }
        Ok(())
    }

    /// Detach a connection, first ending every stream it carried
    pub fn disconnect_port(&self, connection_id: &str) -> Result<()> {
        let name = &self.inner.name;
        let max_logged = self.inner.config.max_logged_connection_errors;
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let index = state
                .connections
                .iter()
                .position(|c| c.id == connection_id)
                .ok_or_else(|| BulkioError::InvalidPort(connection_id.to_string()))?;
            let mut connection = state.connections.remove(index);

            let streams = std::mem::take(&mut connection.streams);
            for stream_id in streams {
                if !connection.alive {
                    break;
                }
                debug!("Sending end of stream '{}' to '{}'", stream_id, connection_id);
                let result = connection.transport.push_packet(
                    &D::empty(),
                    &PrecisionTime::not_set(),
                    true,
                    &stream_id,
                );
                connection.check(result, name, max_logged);
            }
            for entry in state.streams.values_mut() {
                entry.seen.remove(connection_id);
            }
            info!("Port '{}' disconnected '{}'", name, connection_id);
        }

        for listener in &self.inner.listeners.read().disconnect {
            listener(connection_id);
        }
        Ok(())
    }

    /// Connection IDs with their alive flag
    pub fn connections(&self) -> Vec<(String, bool)> {
        self.inner
            .state
            .lock()
            .connections
            .iter()
            .map(|c| (c.id.clone(), c.alive))
            .collect()
    }

    /// Replace the routing filter; every SRI is redelivered on the next push
    pub fn set_connection_filter(&self, entries: Vec<ConnectionDescriptor>) {
        let mut state = self.inner.state.lock();
        debug!(
            "Port '{}' routing filter set ({} entries)",
            self.inner.name,
            entries.len()
        );
        state.filter = RoutingFilter::new(entries);
        for entry in state.streams.values_mut() {
            entry.seen.clear();
        }
    }

    pub fn connection_filter(&self) -> Vec<ConnectionDescriptor> {
        self.inner.state.lock().filter.entries().to_vec()
    }

    pub fn add_connect_listener<F>(&self, listener: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.listeners.write().connect.push(Box::new(listener));
    }

    pub fn add_disconnect_listener<F>(&self, listener: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.listeners.write().disconnect.push(Box::new(listener));
    }

    // ── Pushing ──

    /// Store `sri` as its stream's header and send it to every connection
    pub fn push_sri(&self, sri: StreamSri) {
        let name = &self.inner.name;
        let max_logged = self.inner.config.max_logged_connection_errors;
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        let stream_id = sri.stream_id.clone();
        let sri = Arc::new(sri);
        let entry = state
            .streams
            .entry(stream_id.clone())
            .or_insert_with(|| StreamEntry::new((*sri).clone()));
        entry.sri = sri.clone();
        entry.seen.clear();

        for connection in state.connections.iter_mut() {
            if !connection.alive || !state.filter.is_routed(name, &connection.id, &stream_id) {
                continue;
            }
            if connection.push_sri(&sri, name, max_logged) {
                entry.seen.insert(connection.id.clone());
            }
        }
    }

    /// Send data for `stream_id`, creating a default SRI for unknown streams
    pub fn push_packet(&self, data: D, time: PrecisionTime, eos: bool, stream_id: &str) {
        self.send(&data, time, eos, stream_id, None);
    }

    /// End a stream by sending an empty end-of-stream packet
    pub fn close_stream(&self, stream_id: &str) -> Result<()> {
        if !self.inner.state.lock().streams.contains_key(stream_id) {
            return Err(BulkioError::UnknownStream(stream_id.to_string()));
        }
        self.send(&D::empty(), PrecisionTime::not_set(), true, stream_id, None);
        Ok(())
    }

    /// Chunk and fan out one push. `sri` seeds the stream entry if the port
    /// has none for `stream_id`.
    pub(crate) fn send(
        &self,
        data: &D,
        time: PrecisionTime,
        eos: bool,
        stream_id: &str,
        sri: Option<&StreamSri>,
    ) {
        let name = &self.inner.name;
        let config = &self.inner.config;
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        let entry = state.streams.entry(stream_id.to_string()).or_insert_with(|| {
            trace!("Creating stream '{}' on port '{}'", stream_id, name);
            StreamEntry::new(sri.cloned().unwrap_or_else(|| sri::create(stream_id)))
        });
        let current_sri = entry.sri.clone();

        for fragment in Fragments::new(data, time, eos, &current_sri, config.payload_bytes()) {
            for connection in state.connections.iter_mut() {
                if !connection.alive || !state.filter.is_routed(name, &connection.id, stream_id) {
                    continue;
                }
                if !entry.seen.contains(&connection.id) {
                    if !connection.push_sri(&current_sri, name, config.max_logged_connection_errors) {
                        continue;
                    }
                    entry.seen.insert(connection.id.clone());
                }

                trace!(
                    "Pushing {} elements of '{}' to '{}' (eos={})",
                    fragment.data.len(),
                    stream_id,
                    connection.id,
                    fragment.eos
                );
                let result = connection.transport.push_packet(
                    &fragment.data,
                    &fragment.time,
                    fragment.eos,
                    stream_id,
                );
                if connection.check(result, name, config.max_logged_connection_errors) {
                    connection.stats.update(
                        fragment.data.len(),
                        0.0,
                        fragment.eos,
                        stream_id,
                        false,
                    );
                    if fragment.eos {
                        connection.streams.remove(stream_id);
                    } else {
                        connection.streams.insert(stream_id.to_string());
                    }
                }
            }
        }

        if eos {
            debug!("Stream '{}' ended on port '{}'", stream_id, name);
            state.streams.remove(stream_id);
        }
    }

    // ── Streams ──

    /// Stream handle for `stream_id`, created with a default SRI if needed
    pub fn create_stream(&self, stream_id: &str) -> OutputStream<D> {
        let buffer_size = self.inner.config.default_buffer_size;
        let shared = self
            .inner
            .state
            .lock()
            .streams
            .entry(stream_id.to_string())
            .or_insert_with(|| StreamEntry::new(sri::create(stream_id)))
            .handle(buffer_size);
        OutputStream::from_parts(self.clone(), shared)
    }

    /// Stream handle for `sri.stream_id`; an existing stream takes `sri`
    pub fn create_stream_with_sri(&self, sri: StreamSri) -> OutputStream<D> {
        let buffer_size = self.inner.config.default_buffer_size;
        let (shared, existed) = {
            let mut state = self.inner.state.lock();
            let existed = state.streams.contains_key(&sri.stream_id);
            let shared = state
                .streams
                .entry(sri.stream_id.clone())
                .or_insert_with(|| StreamEntry::new(sri.clone()))
                .handle(buffer_size);
            (shared, existed)
        };
        let stream = OutputStream::from_parts(self.clone(), shared);
        if existed {
            stream.set_sri(sri);
        }
        stream
    }

    pub fn get_stream(&self, stream_id: &str) -> Option<OutputStream<D>> {
        let buffer_size = self.inner.config.default_buffer_size;
        let shared = self
            .inner
            .state
            .lock()
            .streams
            .get_mut(stream_id)?
            .handle(buffer_size);
        Some(OutputStream::from_parts(self.clone(), shared))
    }

    /// Handles for every stream that has not ended, ordered by stream ID
    pub fn get_streams(&self) -> Vec<OutputStream<D>> {
        let buffer_size = self.inner.config.default_buffer_size;
        let handles: Vec<_> = self
            .inner
            .state
            .lock()
            .streams
            .values_mut()
            .map(|entry| entry.handle(buffer_size))
            .collect();
        handles
            .into_iter()
            .map(|shared| OutputStream::from_parts(self.clone(), shared))
            .collect()
    }

    pub fn active_sris(&self) -> Vec<StreamSri> {
        self.inner
            .state
            .lock()
            .streams
            .values()
            .map(|entry| (*entry.sri).clone())
            .collect()
    }

    // ── State ──

    pub fn state(&self) -> PortState {
        if self.inner.state.lock().connections.is_empty() {
            PortState::Idle
        } else {
            PortState::Active
        }
    }

    /// Statistics per connection ID
    pub fn statistics(&self) -> Vec<(String, PortStatistics)> {
        self.inner
            .state
            .lock()
            .connections
            .iter()
            .map(|c| (c.id.clone(), c.stats.retrieve()))
            .collect()
    }

    pub fn enable_statistics(&self, enabled: bool) {
        for connection in &self.inner.state.lock().connections {
            connection.stats.set_enabled(enabled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::transport::MockTransport;
    use mockall::Sequence;

    type FloatPort = OutPort<Vec<f32>>;

    fn quiet_mock() -> MockTransport<Vec<f32>> {
        let mut mock = MockTransport::new();
        mock.expect_describe().return_const("mock".to_string());
        mock
    }

    #[test]
    fn test_sri_pushed_before_first_packet() {
        let mut mock = quiet_mock();
        let mut seq = Sequence::new();
        mock.expect_push_sri()
            .withf(|sri| sri.stream_id == "s1")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        mock.expect_push_packet()
            .withf(|data, _, eos, id| data.len() == 4 && !eos && id == "s1")
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(()));

        let port = FloatPort::new("out");
        port.connect_port(Box::new(mock), "c1").unwrap();
        port.push_packet(vec![1.0; 4], PrecisionTime::now(), false, "s1");
        port.push_packet(vec![2.0; 4], PrecisionTime::now(), false, "s1");
        assert_eq!(port.active_sris().len(), 1);
    }

    #[test]
    fn test_duplicate_and_unknown_connections() {
        let port = FloatPort::new("out");
        port.connect_port(Box::new(quiet_mock()), "c1").unwrap();
        let err = port.connect_port(Box::new(quiet_mock()), "c1").unwrap_err();
        assert!(matches!(err, BulkioError::OccupiedPort(id) if id == "c1"));

        let err = port.disconnect_port("nope").unwrap_err();
        assert!(matches!(err, BulkioError::InvalidPort(_)));
        assert_eq!(port.state(), PortState::Active);
    }

    #[test]
    fn test_connect_pushes_existing_sri() {
        let port = FloatPort::new("out");
        port.push_sri(sri::create("a"));
        port.push_sri(sri::create("b"));

        let mut mock = quiet_mock();
        mock.expect_push_sri().times(2).returning(|_| Ok(()));
        port.connect_port(Box::new(mock), "c1").unwrap();
    }

    #[test]
    fn test_disconnect_sends_eos_for_open_streams() {
        let mut mock = quiet_mock();
        mock.expect_push_sri().returning(|_| Ok(()));
        mock.expect_push_packet()
            .withf(|_, _, eos, _| !eos)
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        mock.expect_push_packet()
            .withf(|data, time, eos, id| data.is_empty() && *eos && id == "s1" && !time.is_valid())
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let port = FloatPort::new("out");
        let disconnected = Arc::new(Mutex::new(Vec::new()));
        let record = disconnected.clone();
        port.add_disconnect_listener(move |id| record.lock().push(id.to_string()));

        port.connect_port(Box::new(mock), "c1").unwrap();
        port.push_packet(vec![1.0], PrecisionTime::now(), false, "s1");
        port.disconnect_port("c1").unwrap();
        assert_eq!(*disconnected.lock(), vec!["c1".to_string()]);
        assert_eq!(port.state(), PortState::Idle);
    }

    #[test]
    fn test_fatal_error_kills_connection() {
        let mut mock = quiet_mock();
        mock.expect_push_sri().returning(|_| Ok(()));
        mock.expect_push_packet()
            .times(1)
            .returning(|_, _, _, _| Err(TransportError::Fatal("gone".into())));

        let port = FloatPort::new("out");
        port.connect_port(Box::new(mock), "c1").unwrap();
        port.push_packet(vec![1.0], PrecisionTime::now(), false, "s");
        // Dead connections are skipped, so the mock sees no second call
        port.push_packet(vec![1.0], PrecisionTime::now(), false, "s");
        assert_eq!(port.connections(), vec![("c1".to_string(), false)]);
    }

    #[test]
    fn test_transient_errors_counted_and_reset() {
        let mut mock = quiet_mock();
        mock.expect_push_sri().returning(|_| Ok(()));
        let mut seq = Sequence::new();
        mock.expect_push_packet()
            .times(15)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Err(TransportError::Transient("busy".into())));
        mock.expect_push_packet()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(()));

        let port = FloatPort::new("out");
        port.connect_port(Box::new(mock), "c1").unwrap();
        for _ in 0..15 {
            port.push_packet(vec![1.0], PrecisionTime::now(), false, "s");
        }
        {
            let state = port.inner.state.lock();
            assert_eq!(state.connections[0].stats.connection_errors(), 15);
            assert!(state.connections[0].alive);
        }
        port.push_packet(vec![1.0], PrecisionTime::now(), false, "s");
        assert_eq!(port.inner.state.lock().connections[0].stats.connection_errors(), 0);
    }

    #[test]
    fn test_routing_filter() {
        let mut c1 = quiet_mock();
        c1.expect_push_sri().returning(|_| Ok(()));
        c1.expect_push_packet()
            .withf(|_, _, _, id| id == "s1")
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        let mut c2 = quiet_mock();
        c2.expect_push_sri().returning(|_| Ok(()));
        c2.expect_push_packet()
            .withf(|_, _, _, id| id == "s2")
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let port = FloatPort::new("out");
        port.connect_port(Box::new(c1), "c1").unwrap();
        port.connect_port(Box::new(c2), "c2").unwrap();
        port.set_connection_filter(vec![
            ConnectionDescriptor::new("c1", "s1", "out"),
            ConnectionDescriptor::new("c2", "s2", "out"),
        ]);
        port.push_packet(vec![1.0], PrecisionTime::now(), false, "s1");
        port.push_packet(vec![1.0], PrecisionTime::now(), false, "s2");
    }

    #[test]
    fn test_filter_change_redelivers_sri() {
        let mut mock = quiet_mock();
        mock.expect_push_sri().times(2).returning(|_| Ok(()));
        mock.expect_push_packet().times(2).returning(|_, _, _, _| Ok(()));

        let port = FloatPort::new("out");
        port.connect_port(Box::new(mock), "c1").unwrap();
        port.push_packet(vec![1.0], PrecisionTime::now(), false, "s");
        port.set_connection_filter(Vec::new());
        port.push_packet(vec![1.0], PrecisionTime::now(), false, "s");
    }

    #[test]
    fn test_eos_erases_stream() {
        let port = FloatPort::new("out");
        port.push_packet(vec![1.0], PrecisionTime::now(), false, "s");
        assert!(port.get_stream("s").is_some());
        port.close_stream("s").unwrap();
        assert!(port.active_sris().is_empty());
        assert!(matches!(
            port.close_stream("s"),
            Err(BulkioError::UnknownStream(_))
        ));
    }

    #[test]
    fn test_create_stream_returns_same_handle() {
        let port = FloatPort::new("out");
        let a = port.create_stream("x");
        let b = port.get_stream("x").unwrap();
        assert_eq!(a, b);
        assert_eq!(port.get_streams().len(), 1);
    }
}
