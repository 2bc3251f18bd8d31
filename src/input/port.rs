//! The input port: ingestion, SRI tracking and stream bookkeeping
//!
//! Transports call [`InPort::push_sri`] and [`InPort::push_packet`]; the
//! component reads through [`InputStream`] handles obtained from
//! [`InPort::current_stream`], [`InPort::get_stream`] or a stream listener.
//!
//! Three locks protect the port's state and are never held together except
//! in the order queue → SRI table (a flush re-arming SRI change flags):
//!
//! - the packet queue, inside [`PacketQueue`]
//! - the SRI table: current header per stream ID plus an unreported-change flag
//! - the stream table: one active stream per ID, plus streams created for an
//!   ID whose previous occurrence has not ended yet
//!
//! SRI listeners run under the SRI table lock and must not call back into
//! the port's SRI accessors. Stream listeners run with no port lock held.

use super::queue::PacketQueue;
use super::stream::{InputStream, StreamShared};
use super::Wait;
use crate::config::InPortConfig;
use crate::data::PortData;
use crate::packet::Packet;
use crate::sri::{self, SriComparator, StreamSri};
use crate::statistics::{LinkStatistics, PortState, PortStatistics};
use crate::time::PrecisionTime;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Callback for new or changed SRIs
pub type SriListener = Box<dyn Fn(&StreamSri) + Send + Sync>;

/// Callback for newly active streams
pub type StreamListener<D> = Box<dyn Fn(InputStream<D>) + Send + Sync>;

#[derive(Debug)]
struct SriEntry {
    sri: Arc<StreamSri>,
    /// Set by `push_sri`, cleared by the next packet for the stream
    changed: bool,
}

struct StreamTable<D: PortData> {
    active: BTreeMap<String, Arc<StreamShared<D>>>,
    pending: HashMap<String, VecDeque<Arc<StreamShared<D>>>>,
}

impl<D: PortData> StreamTable<D> {
    /// Promote the oldest pending stream for `stream_id`, if any
    fn promote(&mut self, stream_id: &str) -> Option<Arc<StreamShared<D>>> {
        let queue = self.pending.get_mut(stream_id)?;
        let next = queue.pop_front();
        if queue.is_empty() {
            self.pending.remove(stream_id);
        }
        let next = next?;
        self.active.insert(stream_id.to_string(), next.clone());
        Some(next)
    }
}

struct Listeners<D: PortData> {
    new_sri: Option<SriListener>,
    sri_change: Option<SriListener>,
    stream_added: Vec<StreamListener<D>>,
}

/// State shared between an [`InPort`] and its streams
pub(crate) struct PortInner<D: PortData> {
    name: String,
    queue: PacketQueue<D>,
    sri_table: Mutex<HashMap<String, SriEntry>>,
    streams: Mutex<StreamTable<D>>,
    stats: LinkStatistics,
    listeners: RwLock<Listeners<D>>,
    comparator: RwLock<SriComparator>,
}

impl<D: PortData> PortInner<D> {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn queue(&self) -> &PacketQueue<D> {
        &self.queue
    }

    fn no_blocking_sri(&self) -> bool {
        self.sri_table.lock().values().all(|entry| !entry.sri.blocking)
    }

    /// Pop a packet, turning blocking mode off after an end-of-stream if no
    /// remaining SRI asks for it
    pub(crate) fn next_packet(&self, wait: Wait, stream_id: Option<&str>) -> Option<Packet<D>> {
        let packet = self.queue.pop(wait, stream_id)?;
        Some(self.popped(packet))
    }

    /// Pop the next packet for a stream; a wait ends early once the stream
    /// is disabled or retired
    pub(crate) fn next_stream_packet(
        &self,
        wait: Wait,
        shared: &StreamShared<D>,
    ) -> Option<Packet<D>> {
        let packet = self.queue.pop_unless(wait, Some(shared.stream_id()), || {
            !shared.is_enabled() || shared.is_closed()
        })?;
        Some(self.popped(packet))
    }

    fn popped(&self, packet: Packet<D>) -> Packet<D> {
        if packet.eos && self.queue.is_blocking() && self.no_blocking_sri() {
            debug!("Port '{}' leaving blocking mode", self.name);
            self.queue.set_blocking(false);
        }
        packet
    }

    pub(crate) fn set_stream_enabled(&self, shared: &StreamShared<D>, enabled: bool) {
        {
            let _streams = self.streams.lock();
            shared.store_enabled(enabled);
        }
        if !enabled {
            self.queue.wake_readers();
        }
    }

    /// Whether a packet for `stream_id` should be queued. A disabled stream
    /// swallows its packets; its end-of-stream retires it.
    fn accept_packet(&self, stream_id: &str, eos: bool) -> bool {
        let retired = {
            let mut streams = self.streams.lock();
            let Some(stream) = streams.active.get(stream_id) else {
                return true;
            };
            if stream.is_enabled() {
                return true;
            }
            // Data for a newer occurrence of the ID is still wanted
            if streams.pending.get(stream_id).is_some_and(|p| !p.is_empty()) {
                return true;
            }
            if eos {
                debug!("Removing disabled stream '{}' on end of stream", stream_id);
                stream.close();
                streams.active.remove(stream_id);
            }
            eos
        };
        if retired {
            self.queue.wake_readers();
        }
        false
    }

    fn create_stream(self: &Arc<Self>, sri: Arc<StreamSri>) {
        let shared = Arc::new(StreamShared::new(sri));
        let added = {
            let mut streams = self.streams.lock();
            let id = shared.stream_id().to_string();
            if streams.active.contains_key(&id) {
                debug!("Creating pending stream '{}'", id);
                streams.pending.entry(id).or_default().push_back(shared);
                None
            } else {
                debug!("Creating new stream '{}'", id);
                streams.active.insert(id, shared.clone());
                Some(shared)
            }
        };
        if let Some(shared) = added {
            self.stream_added(shared);
        }
    }

    fn stream_added(self: &Arc<Self>, shared: Arc<StreamShared<D>>) {
        let stream = InputStream::from_parts(self.clone(), shared);
        let listeners = self.listeners.read();
        for listener in &listeners.stream_added {
            listener(stream.clone());
        }
    }

    /// Drop a finished stream, promoting the next pending one for its ID
    pub(crate) fn remove_stream(self: &Arc<Self>, shared: &Arc<StreamShared<D>>) {
        let id = shared.stream_id();
        let promoted = {
            let mut streams = self.streams.lock();
            let is_active = streams
                .active
                .get(id)
                .is_some_and(|current| Arc::ptr_eq(current, shared));
            if is_active {
                debug!("Removing stream '{}'", id);
                streams.active.remove(id);
                streams.promote(id)
            } else {
                if let Some(queue) = streams.pending.get_mut(id) {
                    queue.retain(|s| !Arc::ptr_eq(s, shared));
                }
                None
            }
        };
        if let Some(next) = promoted {
            debug!("Moving pending stream '{}' to active", id);
            self.stream_added(next);
        }
    }
}

/// An input port for payload type `D`
///
/// Cloning yields another handle to the same port.
pub struct InPort<D: PortData> {
    inner: Arc<PortInner<D>>,
}

impl<D: PortData> Clone for InPort<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D: PortData> std::fmt::Debug for InPort<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InPort")
            .field("name", &self.inner.name)
            .field("queue_depth", &self.inner.queue.len())
            .field("max_queue_depth", &self.inner.queue.max_depth())
            .finish()
    }
}

impl<D: PortData> InPort<D> {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, &InPortConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: &InPortConfig) -> Self {
        let name = name.into();
        let stats = LinkStatistics::with_history(name.clone(), D::ELEMENT_BITS, config.history_window);
        stats.set_enabled(config.statistics_enabled);
        Self {
            inner: Arc::new(PortInner {
                queue: PacketQueue::new(config.max_queue_depth),
                sri_table: Mutex::new(HashMap::new()),
                streams: Mutex::new(StreamTable {
                    active: BTreeMap::new(),
                    pending: HashMap::new(),
                }),
                stats,
                listeners: RwLock::new(Listeners {
                    new_sri: None,
                    sri_change: None,
                    stream_added: Vec::new(),
                }),
                comparator: RwLock::new(sri::default_comparator),
                name,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    // ── Ingestion ──

    /// Record the header for a stream, creating the stream on first sight
    pub fn push_sri(&self, sri: StreamSri) {
        trace!("push_sri '{}' on port '{}'", sri.stream_id, self.inner.name);
        if sri.blocking {
            self.inner.queue.set_blocking(true);
        }

        let created = {
            let mut table = self.inner.sri_table.lock();
            let listeners = self.inner.listeners.read();
            match table.get_mut(&sri.stream_id) {
                None => {
                    debug!("New SRI for stream '{}'", sri.stream_id);
                    if let Some(listener) = &listeners.new_sri {
                        listener(&sri);
                    }
                    let sri = Arc::new(sri);
                    table.insert(
                        sri.stream_id.clone(),
                        SriEntry {
                            sri: sri.clone(),
                            changed: true,
                        },
                    );
                    Some(sri)
                }
                Some(entry) => {
                    let same = (self.inner.comparator.read())(&sri, &entry.sri);
                    if !same {
                        debug!("SRI changed for stream '{}'", sri.stream_id);
                        if let Some(listener) = &listeners.sri_change {
                            listener(&sri);
                        }
                        entry.sri = Arc::new(sri);
                        entry.changed = true;
                    }
                    None
                }
            }
        };

        if let Some(sri) = created {
            self.inner.create_stream(sri);
        }
    }

    /// Queue one push of data for `stream_id`
    pub fn push_packet(&self, data: D, time: PrecisionTime, eos: bool, stream_id: &str) {
        let inner = &self.inner;
        if !inner.accept_packet(stream_id, eos) {
            if eos && inner.queue.is_blocking() && inner.no_blocking_sri() {
                inner.queue.set_blocking(false);
            }
            return;
        }

        if data.is_empty() && !eos {
            debug!("Ignoring empty packet for '{}'", stream_id);
            return;
        }

        if inner.queue.max_depth() == 0 {
            trace!("Port '{}' has queue depth 0, dropping packet", inner.name);
            return;
        }

        let (sri, sri_changed, created) = {
            let mut table = inner.sri_table.lock();
            match table.get_mut(stream_id) {
                Some(entry) => {
                    let changed = std::mem::take(&mut entry.changed);
                    (entry.sri.clone(), changed, false)
                }
                None => {
                    warn!(
                        "Received data for stream '{}' with no SRI on port '{}', creating default",
                        stream_id, inner.name
                    );
                    let sri = Arc::new(sri::create(stream_id));
                    if let Some(listener) = &inner.listeners.read().new_sri {
                        listener(&sri);
                    }
                    table.insert(
                        stream_id.to_string(),
                        SriEntry {
                            sri: sri.clone(),
                            changed: false,
                        },
                    );
                    (sri, true, true)
                }
            }
        };
        if created {
            inner.create_stream(sri.clone());
        }

        let packet = Packet::new(data, time, eos, sri, sri_changed);
        inner.queue.push(packet, &inner.stats, |lost| {
            // Streams whose SRI change was flushed report it on their next packet
            let mut table = inner.sri_table.lock();
            let mut own = false;
            for id in lost {
                if id == stream_id {
                    own = true;
                } else if let Some(entry) = table.get_mut(&id) {
                    entry.changed = true;
                }
            }
            own
        });

        if eos {
            // The next push for this ID starts a new stream
            inner.sri_table.lock().remove(stream_id);
        }
    }

    // ── Reading ──

    /// Pop the next packet regardless of stream, bypassing stream bookkeeping
    pub fn next_packet(&self, wait: Wait) -> Option<Packet<D>> {
        self.inner.next_packet(wait, None)
    }

    /// Pop the next packet for `stream_id`, bypassing stream bookkeeping
    pub fn next_packet_for(&self, wait: Wait, stream_id: &str) -> Option<Packet<D>> {
        self.inner.next_packet(wait, Some(stream_id))
    }

    /// A stream that is ready to read: one with local data, otherwise the
    /// stream of the packet at the front of the queue
    pub fn current_stream(&self, wait: Wait) -> Option<InputStream<D>> {
        let active: Vec<Arc<StreamShared<D>>> =
            self.inner.streams.lock().active.values().cloned().collect();
        if let Some(shared) = active.into_iter().find(|s| s.has_buffered_data()) {
            return Some(InputStream::from_parts(self.inner.clone(), shared));
        }
        let stream_id = self.inner.queue.peek_stream_id(wait)?;
        self.get_stream(&stream_id)
    }

    pub fn get_stream(&self, stream_id: &str) -> Option<InputStream<D>> {
        let shared = self.inner.streams.lock().active.get(stream_id).cloned()?;
        Some(InputStream::from_parts(self.inner.clone(), shared))
    }

    /// All active streams, ordered by stream ID
    pub fn get_streams(&self) -> Vec<InputStream<D>> {
        let active: Vec<Arc<StreamShared<D>>> =
            self.inner.streams.lock().active.values().cloned().collect();
        active
            .into_iter()
            .map(|shared| InputStream::from_parts(self.inner.clone(), shared))
            .collect()
    }

    /// Drop every queued packet for `stream_id` up to its end-of-stream
    pub fn discard_packets_for_stream(&self, stream_id: &str) -> usize {
        self.inner.queue.discard_stream(stream_id)
    }

    /// Queued elements for `stream_id` up to the next break
    pub fn samples_available(&self, stream_id: &str, first: bool) -> usize {
        self.inner.queue.samples_available(stream_id, first)
    }

    // ── Lifecycle and state ──

    pub fn start_port(&self) {
        info!("Starting input port '{}'", self.inner.name);
        self.inner.queue.unblock();
    }

    /// Release every blocked reader and producer
    pub fn stop_port(&self) {
        info!("Stopping input port '{}'", self.inner.name);
        self.inner.queue.block();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.queue.is_stopped()
    }

    pub fn state(&self) -> PortState {
        self.inner.queue.state()
    }

    pub fn max_queue_depth(&self) -> i32 {
        self.inner.queue.max_depth()
    }

    pub fn set_max_queue_depth(&self, depth: i32) {
        debug!("Port '{}' max queue depth set to {}", self.inner.name, depth);
        self.inner.queue.set_max_depth(depth);
    }

    pub fn current_queue_depth(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn is_blocking(&self) -> bool {
        self.inner.queue.is_blocking()
    }

    /// Current SRIs of all streams that have not ended
    pub fn active_sris(&self) -> Vec<StreamSri> {
        let table = self.inner.sri_table.lock();
        let mut sris: Vec<StreamSri> = table.values().map(|e| (*e.sri).clone()).collect();
        sris.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
        sris
    }

    pub fn statistics(&self) -> PortStatistics {
        self.inner.stats.retrieve()
    }

    pub fn enable_statistics(&self, enabled: bool) {
        self.inner.stats.set_enabled(enabled);
    }

    // ── Listeners ──

    pub fn set_new_sri_listener<F>(&self, listener: F)
    where
        F: Fn(&StreamSri) + Send + Sync + 'static,
    {
        self.inner.listeners.write().new_sri = Some(Box::new(listener));
    }

    pub fn set_sri_change_listener<F>(&self, listener: F)
    where
        F: Fn(&StreamSri) + Send + Sync + 'static,
    {
        self.inner.listeners.write().sri_change = Some(Box::new(listener));
    }

    /// Register a callback for each stream that becomes active
    pub fn add_stream_listener<F>(&self, listener: F)
    where
        F: Fn(InputStream<D>) + Send + Sync + 'static,
    {
        self.inner.listeners.write().stream_added.push(Box::new(listener));
    }

    /// Replace the predicate deciding whether a pushed SRI is unchanged
    pub fn set_sri_comparator(&self, comparator: SriComparator) {
        *self.inner.comparator.write() = comparator;
    }
}
