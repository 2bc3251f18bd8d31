//! Writer-side stream handle
//!
//! An [`OutputStream`] owns a stream's SRI on the writing side. SRI setters
//! only edit a local copy and mark it dirty; the port receives the new SRI
//! right before the next packet, after any data buffered under the old SRI
//! has been sent.
//!
//! With a non-zero buffer size, [`OutputStream::write`] collects small
//! writes into one push per `buffer_size` real samples. The first buffered
//! write sets the buffer's timestamp; a write that overflows the buffer
//! carries its remainder into a new buffer with an interpolated timestamp.

use super::port::OutPort;
use crate::data::{PortData, SampleData};
use crate::datablock::SampleTimestamp;
use crate::error::{BulkioError, Result};
use crate::sri::{Keyword, KeywordValue, StreamSri};
use crate::time::{PrecisionTime, TCS_VALID};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

struct OutStreamState<D: PortData> {
    sri: StreamSri,
    sri_dirty: bool,
    buffer: Option<D>,
    buffer_time: PrecisionTime,
    buffer_size: usize,
}

impl<D: PortData> OutStreamState<D> {
    fn buffered(&self) -> usize {
        self.buffer.as_ref().map_or(0, PortData::len)
    }
}

/// Stream state shared by all handles and the port's stream table
pub(crate) struct OutStreamShared<D: PortData> {
    stream_id: String,
    state: Mutex<OutStreamState<D>>,
}

impl<D: PortData> OutStreamShared<D> {
    pub(crate) fn new(sri: StreamSri, buffer_size: usize) -> Self {
        Self {
            stream_id: sri.stream_id.clone(),
            state: Mutex::new(OutStreamState {
                sri,
                sri_dirty: false,
                buffer: None,
                buffer_time: PrecisionTime::not_set(),
                buffer_size,
            }),
        }
    }
}

/// Handle for writing one stream through an [`OutPort`]
pub struct OutputStream<D: PortData> {
    port: OutPort<D>,
    shared: Arc<OutStreamShared<D>>,
}

impl<D: PortData> Clone for OutputStream<D> {
    fn clone(&self) -> Self {
        Self {
            port: self.port.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<D: PortData> fmt::Debug for OutputStream<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputStream")
            .field("port", &self.port.name())
            .field("stream_id", &self.shared.stream_id)
            .finish()
    }
}

impl<D: PortData> PartialEq for OutputStream<D> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<D: PortData> OutputStream<D> {
    pub(crate) fn from_parts(port: OutPort<D>, shared: Arc<OutStreamShared<D>>) -> Self {
        Self { port, shared }
    }

    pub fn stream_id(&self) -> &str {
        &self.shared.stream_id
    }

    pub fn sri(&self) -> StreamSri {
        self.shared.state.lock().sri.clone()
    }

    pub fn xdelta(&self) -> f64 {
        self.shared.state.lock().sri.xdelta
    }

    pub fn complex(&self) -> bool {
        self.shared.state.lock().sri.is_complex()
    }

    pub fn blocking(&self) -> bool {
        self.shared.state.lock().sri.blocking
    }

    // ── SRI setters ──

    /// Apply `update` to a copy of the SRI; a real change flushes buffered
    /// data and marks the SRI for delivery with the next packet
    fn modify_sri(&self, update: impl FnOnce(&mut StreamSri)) {
        let mut state = self.shared.state.lock();
        let mut sri = state.sri.clone();
        update(&mut sri);
        sri.stream_id.clone_from(&self.shared.stream_id);
        if sri == state.sri {
            return;
        }
        self.flush_locked(&mut state, false);
        tracing::debug!("Output stream '{}' SRI modified", self.shared.stream_id);
        state.sri = sri;
        state.sri_dirty = true;
    }

    pub fn set_xstart(&self, xstart: f64) {
        self.modify_sri(|sri| sri.xstart = xstart);
    }

    pub fn set_xdelta(&self, xdelta: f64) {
        self.modify_sri(|sri| sri.xdelta = xdelta);
    }

    pub fn set_xunits(&self, xunits: i16) {
        self.modify_sri(|sri| sri.xunits = xunits);
    }

    pub fn set_subsize(&self, subsize: i32) {
        self.modify_sri(|sri| sri.subsize = subsize);
    }

    pub fn set_ystart(&self, ystart: f64) {
        self.modify_sri(|sri| sri.ystart = ystart);
    }

    pub fn set_ydelta(&self, ydelta: f64) {
        self.modify_sri(|sri| sri.ydelta = ydelta);
    }

    pub fn set_yunits(&self, yunits: i16) {
        self.modify_sri(|sri| sri.yunits = yunits);
    }

    pub fn set_complex(&self, complex: bool) {
        self.modify_sri(|sri| sri.mode = i16::from(complex));
    }

    pub fn set_blocking(&self, blocking: bool) {
        self.modify_sri(|sri| sri.blocking = blocking);
    }

    pub fn set_keywords(&self, keywords: Vec<Keyword>) {
        self.modify_sri(|sri| sri.keywords = keywords);
    }

    pub fn set_keyword(&self, id: &str, value: impl Into<KeywordValue>) {
        let value = value.into();
        self.modify_sri(|sri| sri.set_keyword(id, value));
    }

    pub fn erase_keyword(&self, id: &str) {
        self.modify_sri(|sri| {
            sri.erase_keyword(id);
        });
    }

    /// Replace the whole SRI; the stream ID is kept
    pub fn set_sri(&self, sri: StreamSri) {
        self.modify_sri(|current| *current = sri);
    }

    // ── Buffering ──

    /// Buffer size in real samples; 0 means every write is pushed at once
    pub fn buffer_size(&self) -> usize {
        self.shared.state.lock().buffer_size
    }

    pub fn set_buffer_size(&self, samples: usize) {
        let mut state = self.shared.state.lock();
        state.buffer_size = samples;
        let buffered = state.buffered();
        if buffered > 0 && buffered >= samples {
            self.flush_locked(&mut state, false);
        }
    }

    /// Send any buffered data
    pub fn flush(&self) {
        let mut state = self.shared.state.lock();
        self.flush_locked(&mut state, false);
    }

    /// Push one packet as-is, after sending anything already buffered
    pub fn write_packet(&self, data: D, time: PrecisionTime) {
        let mut state = self.shared.state.lock();
        self.flush_locked(&mut state, false);
        self.send_locked(&mut state, &data, time, false);
    }

    /// End the stream. Buffered data goes out with the end-of-stream flag;
    /// with nothing buffered an empty end-of-stream packet is sent.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        if !self.flush_locked(&mut state, true) {
            self.send_locked(&mut state, &D::empty(), PrecisionTime::not_set(), true);
        }
        tracing::debug!("Closed output stream '{}'", self.shared.stream_id);
    }

    fn flush_locked(&self, state: &mut OutStreamState<D>, eos: bool) -> bool {
        match state.buffer.take() {
            Some(buffer) if !buffer.is_empty() => {
                let time = state.buffer_time;
                self.send_locked(state, &buffer, time, eos);
                true
            }
            _ => false,
        }
    }

    fn send_locked(&self, state: &mut OutStreamState<D>, data: &D, time: PrecisionTime, eos: bool) {
        if state.sri_dirty {
            self.port.push_sri(state.sri.clone());
            state.sri_dirty = false;
        }
        self.port
            .send(data, time, eos, &self.shared.stream_id, Some(&state.sri));
    }
}

impl<D: SampleData> OutputStream<D> {
    /// Write data starting at `time`, buffering if a buffer size is set
    pub fn write(&self, data: D, time: PrecisionTime) {
        let mut state = self.shared.state.lock();
        self.write_locked(&mut state, data, time);
    }

    /// Write data whose samples carry several timestamps
    ///
    /// Each timestamp starts a segment at its offset (in complex samples for
    /// complex data). Offsets must start at 0, increase strictly, and fall
    /// inside the data.
    pub fn write_timestamps(&self, data: D, timestamps: &[SampleTimestamp]) -> Result<()> {
        let mut state = self.shared.state.lock();
        let item_size = state.sri.item_size();
        let bounds = segment_bounds(data.len(), item_size, timestamps)?;

        for (ts, (start, end)) in timestamps.iter().zip(bounds) {
            let segment = if start == 0 && end == data.len() {
                data.clone()
            } else {
                data.slice(start, end)
            };
            self.write_locked(&mut state, segment, ts.time);
        }
        Ok(())
    }

    fn write_locked(&self, state: &mut OutStreamState<D>, data: D, time: PrecisionTime) {
        if state.buffer_size == 0 {
            self.send_locked(state, &data, time, false);
            return;
        }

        let item_size = state.sri.item_size();
        let xdelta = state.sri.xdelta;
        let mut offset = 0;
        while offset < data.len() {
            if state.buffered() == 0 {
                state.buffer_time = if offset > 0 && time.tcstatus == TCS_VALID {
                    time.add_sample_offset(offset / item_size, xdelta)
                } else {
                    time
                };
            }
            let room = state.buffer_size.saturating_sub(state.buffered());
            let taken = room.min(data.len() - offset);
            state
                .buffer
                .get_or_insert_with(D::empty)
                .extend_from(&data, offset, offset + taken);
            offset += taken;

            if state.buffered() >= state.buffer_size {
                self.flush_locked(state, false);
            }
        }
    }
}

/// Element ranges for each timestamp's segment of `len` elements
fn segment_bounds(len: usize, item_size: usize, timestamps: &[SampleTimestamp]) -> Result<Vec<(usize, usize)>> {
    let first = timestamps
        .first()
        .ok_or_else(|| BulkioError::usage("no timestamps given"))?;
    if first.offset != 0 {
        return Err(BulkioError::usage("first timestamp must be at offset 0"));
    }

    let starts: Vec<usize> = timestamps.iter().map(|ts| ts.offset * item_size).collect();
    if starts.windows(2).any(|pair| pair[1] <= pair[0]) {
        return Err(BulkioError::usage("timestamp offsets are not in increasing order"));
    }
    if starts.iter().any(|&start| start > len) {
        return Err(BulkioError::usage("timestamp offset past end of data"));
    }

    let ends = starts.iter().skip(1).copied().chain(std::iter::once(len));
    Ok(starts.iter().copied().zip(ends).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_bounds() {
        let t = PrecisionTime::new(0.0, 0.0);
        let stamps = [
            SampleTimestamp::new(t, 0, false),
            SampleTimestamp::new(t + 1.0, 3, false),
        ];
        assert_eq!(segment_bounds(10, 1, &stamps).unwrap(), vec![(0, 3), (3, 10)]);
        // Complex offsets count pairs
        assert_eq!(segment_bounds(10, 2, &stamps).unwrap(), vec![(0, 6), (6, 10)]);
    }

    #[test]
    fn test_segment_bounds_rejects_bad_input() {
        let t = PrecisionTime::new(0.0, 0.0);
        assert!(segment_bounds(4, 1, &[]).unwrap_err().is_usage());
        assert!(segment_bounds(4, 1, &[SampleTimestamp::new(t, 1, false)])
            .unwrap_err()
            .is_usage());
        let unordered = [
            SampleTimestamp::new(t, 0, false),
            SampleTimestamp::new(t, 3, false),
            SampleTimestamp::new(t, 2, false),
        ];
        assert!(segment_bounds(4, 1, &unordered).is_err());
        let past_end = [SampleTimestamp::new(t, 0, false), SampleTimestamp::new(t, 9, false)];
        assert!(segment_bounds(4, 1, &past_end).is_err());
    }

    #[test]
    fn test_unbuffered_write_creates_port_stream() {
        let port: OutPort<Vec<f32>> = OutPort::new("out");
        let stream = port.create_stream("s");
        stream.set_xdelta(0.25);
        stream.write(vec![1.0, 2.0], PrecisionTime::now());

        let sris = port.active_sris();
        assert_eq!(sris.len(), 1);
        assert_eq!(sris[0].xdelta, 0.25);
    }

    #[test]
    fn test_setters_keep_stream_id() {
        let port: OutPort<Vec<i16>> = OutPort::new("out");
        let stream = port.create_stream("keep");
        let mut other = StreamSri::new("other");
        other.mode = 1;
        stream.set_sri(other);
        assert_eq!(stream.sri().stream_id, "keep");
        assert!(stream.complex());
    }

    #[test]
    fn test_buffer_collects_writes() {
        let port: OutPort<Vec<f32>> = OutPort::new("out");
        let stream = port.create_stream("buf");
        stream.set_buffer_size(8);
        stream.write(vec![0.0; 5], PrecisionTime::new(10.0, 0.0));
        assert_eq!(stream.shared.state.lock().buffered(), 5);

        // Overflow: 8 go out, 4 remain with an interpolated start time
        stream.write(vec![0.0; 7], PrecisionTime::new(20.0, 0.0));
        let state = stream.shared.state.lock();
        assert_eq!(state.buffered(), 4);
        assert_eq!(state.buffer_time, PrecisionTime::new(23.0, 0.0));
    }

    #[test]
    fn test_close_removes_port_stream() {
        let port: OutPort<Vec<u8>> = OutPort::new("out");
        let stream = port.create_stream("c");
        stream.set_buffer_size(100);
        stream.write(vec![1, 2, 3], PrecisionTime::now());
        stream.close();
        assert!(port.get_stream("c").is_none());
        assert_eq!(stream.shared.state.lock().buffered(), 0);
    }
}
