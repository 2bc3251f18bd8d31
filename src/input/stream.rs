//! Per-stream read cursor over an input port's queue
//!
//! An [`InputStream`] is a handle onto one occurrence of a stream ID. It
//! fetches packets for its ID from the port queue into a private cursor and
//! serves reads from there:
//!
//! - [`InputStream::read`] returns whatever is left of the next packet
//! - [`InputStream::read_count`] and friends return exact sample counts,
//!   merging consecutive packets and optionally leaving overlap unconsumed
//!
//! A read never spans a segment break: a packet carrying an SRI change or a
//! queue-flush marker is parked as *pending* until everything before it has
//! been consumed.
//!
//! # End-of-stream lifecycle
//!
//! ```text
//! None ──EOS packet fetched──► Received ──EOS packet consumed──► Reached
//!                                                                   │
//!                            stream removed from port ◄── reported ─┘
//! ```
//!
//! A stream is reported as ended exactly once, by the first read (or
//! [`InputStream::eos`] call) that finds it in `Reached`. At that point it is
//! removed from the port and, if another stream with the same ID was waiting,
//! that one becomes active.

use super::port::PortInner;
use super::Wait;
use crate::data::{PortData, SampleData};
use crate::datablock::{DataBlock, ReadResult, SampleTimestamp};
use crate::error::{BulkioError, Result};
use crate::packet::Packet;
use crate::sri::{self, SriFields, StreamSri};
use crate::time::PrecisionTime;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// End-of-stream progress of an input stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EosState {
    /// No end-of-stream packet seen yet
    None,
    /// The end-of-stream packet has been fetched but data remains
    Received,
    /// All data has been consumed; the next read reports the end
    Reached,
    /// The end has been reported and the stream removed from its port
    Reported,
}

// ── Cursor ──

/// Local read state: packets fetched for this stream and the read position
/// within the front one
#[derive(Debug)]
pub(crate) struct Cursor<D: PortData> {
    queue: VecDeque<Packet<D>>,
    pending: Option<Packet<D>>,
    sample_offset: usize,
    samples_queued: usize,
    eos_state: EosState,
    new_stream: bool,
    sri: Arc<StreamSri>,
}

impl<D: PortData> Cursor<D> {
    fn new(sri: Arc<StreamSri>) -> Self {
        Self {
            queue: VecDeque::new(),
            pending: None,
            sample_offset: 0,
            samples_queued: 0,
            eos_state: EosState::None,
            new_stream: true,
            sri,
        }
    }

    fn has_buffered_data(&self) -> bool {
        !self.queue.is_empty() || self.pending.is_some() || self.eos_state == EosState::Reached
    }

    /// Whether a newly fetched packet may be read together with the queued ones
    fn can_bridge(&self, packet: &Packet<D>) -> bool {
        self.queue.is_empty() || !packet.is_break()
    }

    /// Add a packet to the local queue; returns false if it carried no data
    ///
    /// An empty end-of-stream only marks the queue tail, handing its flags to
    /// the last queued packet. With nothing queued the stream has simply
    /// ended: a flush marker on it has no block to ride on and is only
    /// visible in the port statistics.
    fn queue_packet(&mut self, packet: Packet<D>) -> bool {
        if packet.eos && packet.is_empty() {
            match self.queue.back_mut() {
                Some(back) => {
                    back.eos = true;
                    back.sri_changed |= packet.sri_changed;
                    back.input_queue_flushed |= packet.input_queue_flushed;
                }
                None => {
                    if packet.input_queue_flushed {
                        tracing::debug!(
                            "Stream '{}' ended by a flushed end-of-stream",
                            packet.stream_id
                        );
                    }
                    self.eos_state = EosState::Reached;
                }
            }
            return false;
        }
        self.samples_queued += packet.len();
        self.queue.push_back(packet);
        true
    }

    fn consume_packet(&mut self) {
        self.sample_offset = 0;
        let Some(packet) = self.queue.pop_front() else {
            return;
        };
        if packet.eos {
            self.eos_state = EosState::Reached;
        }
        if self.queue.is_empty() {
            if let Some(pending) = self.pending.take() {
                self.queue_packet(pending);
            }
        }
    }

    fn consume_data(&mut self, mut count: usize) {
        while count > 0 {
            let Some(front) = self.queue.front() else {
                break;
            };
            let available = front.len() - self.sample_offset;
            let taken = available.min(count);
            self.sample_offset += taken;
            self.samples_queued -= taken;
            count -= taken;
            if self.sample_offset >= front.len() {
                self.consume_packet();
            }
        }
    }

    /// Elements left in the front packet
    fn front_remaining(&self) -> usize {
        self.queue
            .front()
            .map(|p| p.len() - self.sample_offset)
            .unwrap_or(0)
    }

    fn clear(&mut self) {
        self.queue.clear();
        self.pending = None;
        self.sample_offset = 0;
        self.samples_queued = 0;
    }

    /// Read `count` elements from the front packet only
    fn front_slice(&self, count: usize) -> (D, Vec<SampleTimestamp>) {
        let front = &self.queue[0];
        let end = self.sample_offset + count;
        let data = if self.sample_offset == 0 && end == front.len() {
            front.data.clone()
        } else {
            front.data.slice(self.sample_offset, end)
        };
        let ts = timestamp(&front.sri, self.sample_offset, 0, front.time);
        (data, vec![ts])
    }

    /// Build the block for `data`, report and clear the front packet's flags,
    /// then consume `consume` elements
    fn take_block(&mut self, data: D, timestamps: Vec<SampleTimestamp>, consume: usize) -> DataBlock<D> {
        let new_stream = std::mem::take(&mut self.new_stream);
        let front = &mut self.queue[0];

        let flags = if new_stream {
            SriFields::all()
        } else if front.sri_changed {
            sri::compare_fields(&self.sri, &front.sri)
        } else {
            SriFields::empty()
        };
        let sri = front.sri.clone();
        let mut block = DataBlock::new(sri.clone(), data).with_flags(flags, front.input_queue_flushed);
        front.sri_changed = false;
        front.input_queue_flushed = false;
        self.sri = sri;

        if D::TIMESTAMPED {
            for ts in timestamps {
                block.add_timestamp(ts);
            }
        }
        self.consume_data(consume);
        block
    }
}

impl<D: SampleData> Cursor<D> {
    /// Read `count` elements starting at the front packet, spanning as many
    /// queued packets as needed
    fn merged(&self, count: usize) -> (D, Vec<SampleTimestamp>) {
        let front = &self.queue[0];
        let mut data = D::empty();
        let mut timestamps = Vec::new();
        let mut packet_offset = self.sample_offset;
        let mut remaining = count;

        for packet in &self.queue {
            timestamps.push(timestamp(&front.sri, packet_offset, data.len(), packet.time));
            let taken = (packet.len() - packet_offset).min(remaining);
            data.extend_from(&packet.data, packet_offset, packet_offset + taken);
            remaining -= taken;
            packet_offset = 0;
            if remaining == 0 {
                break;
            }
        }
        (data, timestamps)
    }

    fn read_elements(&mut self, count: usize, consume: usize) -> DataBlock<D> {
        let (data, timestamps) = if count <= self.front_remaining() {
            self.front_slice(count)
        } else {
            self.merged(count)
        };
        self.take_block(data, timestamps, consume)
    }
}

/// Timestamp for data starting `input_offset` elements into a packet and
/// landing `output_offset` elements into the block
fn timestamp(
    sri: &StreamSri,
    input_offset: usize,
    output_offset: usize,
    time: PrecisionTime,
) -> SampleTimestamp {
    let mut time_offset = input_offset as f64 * sri.xdelta;
    let mut output_offset = output_offset;
    if sri.is_complex() {
        time_offset /= 2.0;
        output_offset /= 2;
    }
    if time_offset > 0.0 {
        SampleTimestamp::new(time + time_offset, output_offset, true)
    } else {
        SampleTimestamp::new(time, output_offset, false)
    }
}

// ── Shared stream state ──

/// State shared by all handles to one stream and by its port
pub(crate) struct StreamShared<D: PortData> {
    stream_id: String,
    enabled: AtomicBool,
    closed: AtomicBool,
    sri: Mutex<Arc<StreamSri>>,
    cursor: Mutex<Cursor<D>>,
}

impl<D: PortData> StreamShared<D> {
    pub(crate) fn new(sri: Arc<StreamSri>) -> Self {
        Self {
            stream_id: sri.stream_id.clone(),
            enabled: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            sri: Mutex::new(sri.clone()),
            cursor: Mutex::new(Cursor::new(sri)),
        }
    }

    pub(crate) fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Caller must hold the port's stream table lock
    pub(crate) fn store_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Mark the stream as finished without touching its cursor
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Non-blocking: a stream whose cursor is busy in a read is skipped
    pub(crate) fn has_buffered_data(&self) -> bool {
        self.cursor
            .try_lock()
            .map(|cursor| cursor.has_buffered_data())
            .unwrap_or(false)
    }
}

// ── Handle ──

/// Handle to one stream of an input port
///
/// Handles are cheap to clone; all clones share the same read position.
pub struct InputStream<D: PortData> {
    port: Arc<PortInner<D>>,
    shared: Arc<StreamShared<D>>,
}

impl<D: PortData> Clone for InputStream<D> {
    fn clone(&self) -> Self {
        Self {
            port: self.port.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<D: PortData> fmt::Debug for InputStream<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputStream")
            .field("port", &self.port.name())
            .field("stream_id", &self.shared.stream_id)
            .field("enabled", &self.enabled())
            .finish()
    }
}

impl<D: PortData> PartialEq for InputStream<D> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<D: PortData> InputStream<D> {
    pub(crate) fn from_parts(port: Arc<PortInner<D>>, shared: Arc<StreamShared<D>>) -> Self {
        Self { port, shared }
    }

    pub fn stream_id(&self) -> &str {
        &self.shared.stream_id
    }

    /// The SRI of the most recently read block (or the creation SRI)
    pub fn sri(&self) -> Arc<StreamSri> {
        self.shared.sri.lock().clone()
    }

    pub fn enabled(&self) -> bool {
        self.shared.is_enabled()
    }

    /// Resume receiving data for this stream
    pub fn enable(&self) {
        self.port.set_stream_enabled(&self.shared, true);
    }

    /// Stop receiving data: drops locally buffered packets and, until the
    /// end-of-stream arrives, everything already queued for this ID
    ///
    /// Takes effect immediately. A read blocked on this stream from another
    /// thread returns [`ReadResult::Empty`].
    pub fn disable(&self) {
        self.port.set_stream_enabled(&self.shared, false);
        let mut cursor = self.shared.cursor.lock();
        if cursor.eos_state == EosState::None {
            let dropped = self.port.queue().discard_stream(&self.shared.stream_id);
            tracing::debug!(
                "Disabled stream '{}', discarded {} queued packets",
                self.shared.stream_id,
                dropped
            );
        }
        cursor.clear();
    }

    pub fn eos_state(&self) -> EosState {
        let mut cursor = self.shared.cursor.lock();
        self.sync_closed(&mut cursor);
        cursor.eos_state
    }

    /// Whether the stream has ended; reports the end if it was just reached
    pub fn eos(&self) -> bool {
        let mut cursor = self.shared.cursor.lock();
        self.sync_closed(&mut cursor);
        if cursor.queue.is_empty() {
            self.fetch_packet(&mut cursor, false);
        }
        self.report_if_reached(&mut cursor);
        cursor.eos_state == EosState::Reported
    }

    /// Whether data (or an unreported end) is waiting locally
    pub fn has_buffered_data(&self) -> bool {
        self.shared.cursor.lock().has_buffered_data()
    }

    /// Read the rest of the next packet, waiting for one to arrive
    pub fn read(&self) -> ReadResult<D> {
        self.read_packet(true)
    }

    /// Read the rest of the next packet if one is available
    pub fn try_read(&self) -> ReadResult<D> {
        self.read_packet(false)
    }

    fn read_packet(&self, blocking: bool) -> ReadResult<D> {
        let mut cursor = self.shared.cursor.lock();
        self.sync_closed(&mut cursor);
        if cursor.eos_state == EosState::Reported {
            return ReadResult::EndOfStream;
        }

        if cursor.samples_queued == 0 {
            self.fetch_packet(&mut cursor, blocking);
        }
        if cursor.samples_queued == 0 {
            return self.no_data(&mut cursor);
        }

        let count = cursor.front_remaining();
        let (data, timestamps) = cursor.front_slice(count);
        let block = cursor.take_block(data, timestamps, count);
        self.publish_sri(&cursor);
        ReadResult::Data(block)
    }

    // ── Fetching ──

    /// Pull the next packet for this stream from the port; returns whether
    /// data was added to the local queue
    fn fetch_packet(&self, cursor: &mut Cursor<D>, blocking: bool) -> bool {
        if cursor.pending.is_some() {
            // Cannot fetch past a break until it has been read
            return false;
        }
        let Some(packet) = self.fetch_next_packet(cursor, blocking) else {
            return false;
        };
        if cursor.can_bridge(&packet) {
            cursor.queue_packet(packet)
        } else {
            cursor.pending = Some(packet);
            false
        }
    }

    fn fetch_next_packet(&self, cursor: &mut Cursor<D>, blocking: bool) -> Option<Packet<D>> {
        if !self.shared.is_enabled() || cursor.eos_state != EosState::None {
            return None;
        }
        let wait = if blocking {
            Wait::Blocking
        } else {
            Wait::NonBlocking
        };
        let packet = self.port.next_stream_packet(wait, &self.shared)?;
        if packet.eos {
            cursor.eos_state = EosState::Received;
        }
        Some(packet)
    }

    fn sync_closed(&self, cursor: &mut Cursor<D>) {
        if self.shared.is_closed() {
            cursor.clear();
            cursor.eos_state = EosState::Reported;
        }
    }

    fn report_if_reached(&self, cursor: &mut Cursor<D>) {
        if cursor.eos_state == EosState::Reached {
            tracing::debug!("Stream '{}' reached end of stream", self.shared.stream_id);
            self.port.remove_stream(&self.shared);
            cursor.eos_state = EosState::Reported;
        }
    }

    fn no_data(&self, cursor: &mut Cursor<D>) -> ReadResult<D> {
        // The stream may have been retired while this read was waiting
        self.sync_closed(cursor);
        self.report_if_reached(cursor);
        if cursor.eos_state == EosState::Reported {
            ReadResult::EndOfStream
        } else {
            ReadResult::Empty
        }
    }

    fn publish_sri(&self, cursor: &Cursor<D>) {
        *self.shared.sri.lock() = cursor.sri.clone();
    }
}

impl<D: SampleData> InputStream<D> {
    /// Read exactly `count` samples, waiting until they are available
    ///
    /// Returns fewer only when a segment break or the end of the stream
    /// comes first. Counts are in samples, so complex data returns twice as
    /// many scalars.
    pub fn read_count(&self, count: usize) -> ReadResult<D> {
        self.read_elements(count, count, true)
    }

    /// Read `count` samples but only consume `consume` of them, leaving the
    /// rest to start the next read
    pub fn read_with_consume(&self, count: usize, consume: usize) -> Result<ReadResult<D>> {
        check_consume(count, consume)?;
        Ok(self.read_elements(count, consume, true))
    }

    /// Non-blocking [`read_count`](Self::read_count)
    ///
    /// Returns [`ReadResult::Empty`] if fewer than `count` samples are
    /// queued, unless a segment break or the end of the stream limits the
    /// read.
    pub fn try_read_count(&self, count: usize) -> ReadResult<D> {
        self.read_elements(count, count, false)
    }

    /// Non-blocking [`read_with_consume`](Self::read_with_consume)
    pub fn try_read_with_consume(&self, count: usize, consume: usize) -> Result<ReadResult<D>> {
        check_consume(count, consume)?;
        Ok(self.read_elements(count, consume, false))
    }

    fn read_elements(&self, count: usize, consume: usize, blocking: bool) -> ReadResult<D> {
        let mut cursor = self.shared.cursor.lock();
        self.sync_closed(&mut cursor);
        if cursor.eos_state == EosState::Reported {
            return ReadResult::EndOfStream;
        }

        if cursor.queue.is_empty() && !self.fetch_packet(&mut cursor, blocking) {
            return self.no_data(&mut cursor);
        }

        let item_size = cursor.queue[0].sri.item_size();
        let count = count * item_size;
        let mut consume = consume * item_size;

        while cursor.samples_queued < count {
            if !self.fetch_packet(&mut cursor, blocking) {
                break;
            }
        }
        if cursor.samples_queued == 0 {
            return self.no_data(&mut cursor);
        }

        let available = cursor.samples_queued.min(count);
        if available < count {
            // A short non-blocking read is only allowed at a break
            if !blocking && cursor.pending.is_none() && cursor.eos_state == EosState::None {
                return ReadResult::Empty;
            }
            if consume != 0 {
                consume = available;
            }
        }

        let block = cursor.read_elements(available, consume);
        self.publish_sri(&cursor);
        ReadResult::Data(block)
    }

    /// Discard up to `count` samples, waiting for data; returns how many
    /// were skipped
    pub fn skip(&self, count: usize) -> usize {
        let mut cursor = self.shared.cursor.lock();
        self.sync_closed(&mut cursor);
        if cursor.eos_state == EosState::Reported {
            return 0;
        }
        if cursor.queue.is_empty() && !self.fetch_packet(&mut cursor, true) {
            self.report_if_reached(&mut cursor);
            return 0;
        }

        let item_size = cursor.queue[0].sri.item_size();
        let count = count * item_size;
        while cursor.samples_queued < count {
            if !self.fetch_packet(&mut cursor, true) {
                break;
            }
        }
        let skipped = count.min(cursor.samples_queued);
        cursor.consume_data(skipped);
        skipped / item_size
    }

    /// Samples readable without blocking and without crossing a break
    pub fn samples_available(&self) -> usize {
        let mut cursor = self.shared.cursor.lock();
        self.sync_closed(&mut cursor);
        while self.fetch_packet(&mut cursor, false) {}
        match cursor.queue.front() {
            Some(front) => cursor.samples_queued / front.sri.item_size(),
            None => 0,
        }
    }

    /// Whether a read would return data or report the end right now
    pub fn ready(&self) -> bool {
        if !self.enabled() {
            return false;
        }
        if self.samples_available() > 0 {
            return true;
        }
        self.shared.cursor.lock().eos_state == EosState::Reached
    }
}

fn check_consume(count: usize, consume: usize) -> Result<()> {
    if consume > count {
        return Err(BulkioError::usage(format!(
            "consume length {} is greater than read length {}",
            consume, count
        )));
    }
    Ok(())
}
