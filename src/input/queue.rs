//! Bounded packet FIFO shared by all streams of an input port
//!
//! The queue holds packets for every stream ID flowing through a port, in
//! arrival order. Producers and consumers coordinate through two condition
//! variables on the queue lock:
//!
//! - `data_available` wakes readers waiting for a packet
//! - `queue_available` wakes producers held back in blocking mode
//!
//! When the queue is full and the port is not in blocking mode, the whole
//! queue is flushed instead of dropping the newest packet. Only end-of-stream
//! packets survive a flush (with their data stripped), and the first packet
//! left in the queue is marked so the reader learns data was lost.

use super::Wait;
use crate::data::PortData;
use crate::packet::Packet;
use crate::statistics::{LinkStatistics, PortState};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

#[derive(Debug)]
struct QueueState<D: PortData> {
    packets: VecDeque<Packet<D>>,
    max_depth: i32,
    break_block: bool,
}

impl<D: PortData> QueueState<D> {
    fn is_full(&self) -> bool {
        self.max_depth >= 0 && self.packets.len() >= self.max_depth as usize
    }

    fn position(&self, stream_id: Option<&str>) -> Option<usize> {
        match stream_id {
            None => (!self.packets.is_empty()).then_some(0),
            Some(id) => self.packets.iter().position(|p| p.stream_id == id),
        }
    }

    /// Discard every packet except end-of-stream markers.
    ///
    /// Returns the IDs of streams that lost an SRI-changed packet with no
    /// surviving end-of-stream after it; the caller must re-arm their SRI
    /// change flag so the next packet reports it.
    fn flush(&mut self) -> HashSet<String> {
        let mut sri_changed = HashSet::new();
        let mut saved = VecDeque::new();
        for mut packet in self.packets.drain(..) {
            if packet.eos {
                // Later SRI changes belong to the next occurrence of the ID
                if sri_changed.remove(&packet.stream_id) {
                    packet.sri_changed = true;
                }
                packet.strip_data();
                packet.input_queue_flushed = false;
                saved.push_back(packet);
            } else if packet.sri_changed {
                sri_changed.insert(packet.stream_id.clone());
            }
        }
        self.packets = saved;
        sri_changed
    }
}

/// The packet queue of one input port
#[derive(Debug)]
pub struct PacketQueue<D: PortData> {
    state: Mutex<QueueState<D>>,
    data_available: Condvar,
    queue_available: Condvar,
    blocking: AtomicBool,
}

impl<D: PortData> PacketQueue<D> {
    pub fn new(max_depth: i32) -> Self {
        Self {
            state: Mutex::new(QueueState {
                packets: VecDeque::new(),
                max_depth,
                break_block: false,
            }),
            data_available: Condvar::new(),
            queue_available: Condvar::new(),
            blocking: AtomicBool::new(false),
        }
    }

    // ── Producer side ──

    /// Append a packet, waiting for room in blocking mode or flushing when
    /// full otherwise.
    ///
    /// `on_flush` runs under the queue lock with the stream IDs whose
    /// SRI-changed packets were discarded; it returns whether the incoming
    /// packet's own stream was among them. Returns whether a flush happened.
    pub fn push<F>(&self, mut packet: Packet<D>, stats: &LinkStatistics, on_flush: F) -> bool
    where
        F: FnOnce(HashSet<String>) -> bool,
    {
        let mut state = self.state.lock();
        let mut flushed = false;

        if self.blocking.load(Ordering::Acquire) {
            while state.is_full() && !state.break_block && self.blocking.load(Ordering::Acquire) {
                tracing::trace!(
                    "Queue full ({} packets), waiting for room",
                    state.packets.len()
                );
                self.queue_available.wait(&mut state);
            }
        } else if state.is_full() {
            tracing::debug!(
                "Input queue full, flushing {} packets",
                state.packets.len()
            );
            flushed = true;
            let lost_sri = state.flush();
            if on_flush(lost_sri) {
                packet.sri_changed = true;
            }
        }

        let fill = if state.max_depth > 0 {
            (state.packets.len() + 1) as f32 / state.max_depth as f32
        } else {
            0.0
        };
        stats.update(packet.len(), fill, packet.eos, &packet.stream_id, flushed);

        tracing::trace!(
            "Queued packet for '{}' ({} elements, queue={})",
            packet.stream_id,
            packet.len(),
            state.packets.len() + 1
        );
        state.packets.push_back(packet);

        // Only the first packet reports the flush; it may be a surviving
        // end-of-stream rather than the packet just added
        if flushed {
            if let Some(front) = state.packets.front_mut() {
                front.input_queue_flushed = true;
            }
        }

        self.data_available.notify_all();
        flushed
    }

    // ── Consumer side ──

    fn wait_for<T, F, C>(&self, wait: Wait, cancelled: C, mut take: F) -> Option<T>
    where
        F: FnMut(&mut MutexGuard<'_, QueueState<D>>) -> Option<T>,
        C: Fn() -> bool,
    {
        let mut state = self.state.lock();
        let deadline = match wait {
            Wait::Timeout(duration) => Some(Instant::now() + duration),
            _ => None,
        };

        loop {
            if state.break_block || cancelled() {
                return None;
            }
            if let Some(found) = take(&mut state) {
                return Some(found);
            }
            match wait {
                Wait::NonBlocking => return None,
                Wait::Blocking => self.data_available.wait(&mut state),
                Wait::Timeout(_) => {
                    let deadline = deadline?;
                    if Instant::now() >= deadline {
                        return None;
                    }
                    // A timeout still gets one last look at the queue
                    let _ = self.data_available.wait_until(&mut state, deadline);
                }
            }
        }
    }

    /// Remove the first packet, or the first packet for `stream_id`
    pub fn pop(&self, wait: Wait, stream_id: Option<&str>) -> Option<Packet<D>> {
        self.pop_unless(wait, stream_id, || false)
    }

    /// [`pop`](Self::pop) that gives up once `cancelled` returns true.
    ///
    /// `cancelled` is checked under the queue lock before every wait, so a
    /// caller that flips its condition and then calls
    /// [`wake_readers`](Self::wake_readers) cannot be missed.
    pub fn pop_unless<C>(
        &self,
        wait: Wait,
        stream_id: Option<&str>,
        cancelled: C,
    ) -> Option<Packet<D>>
    where
        C: Fn() -> bool,
    {
        let packet = self.wait_for(wait, cancelled, |state| {
            let index = state.position(stream_id)?;
            state.packets.remove(index)
        });
        if packet.is_some() {
            self.queue_available.notify_all();
        }
        packet
    }

    /// Stream ID of the packet at the front of the queue
    pub fn peek_stream_id(&self, wait: Wait) -> Option<String> {
        self.wait_for(wait, || false, |state| {
            state.packets.front().map(|p| p.stream_id.clone())
        })
    }

    /// Wake every waiting reader so it can re-check its cancel condition
    pub fn wake_readers(&self) {
        let _state = self.state.lock();
        self.data_available.notify_all();
    }

    /// Remove `stream_id`'s packets up to and including its first
    /// end-of-stream; returns how many were dropped
    pub fn discard_stream(&self, stream_id: &str) -> usize {
        let mut state = self.state.lock();
        let before = state.packets.len();
        let mut reached_eos = false;
        state.packets.retain(|packet| {
            if reached_eos || packet.stream_id != stream_id {
                return true;
            }
            reached_eos = packet.eos;
            false
        });
        let dropped = before - state.packets.len();
        drop(state);
        if dropped > 0 {
            self.queue_available.notify_all();
        }
        dropped
    }

    /// Elements queued for `stream_id` up to the next segment break
    ///
    /// A packet that starts a new segment (SRI change or queue flush) stops
    /// the count unless it is the first one considered and `first` is set.
    pub fn samples_available(&self, stream_id: &str, first: bool) -> usize {
        let state = self.state.lock();
        let mut count = 0;
        let mut item_size = None;
        let matching = state.packets.iter().filter(|p| p.stream_id == stream_id);
        for (index, packet) in matching.enumerate() {
            if packet.is_break() && (index > 0 || !first) {
                break;
            }
            item_size.get_or_insert(packet.sri.item_size());
            count += packet.len();
            if packet.eos {
                break;
            }
        }
        count / item_size.unwrap_or(1)
    }

    // ── Configuration and state ──

    pub fn len(&self) -> usize {
        self.state.lock().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().packets.is_empty()
    }

    pub fn max_depth(&self) -> i32 {
        self.state.lock().max_depth
    }

    pub fn set_max_depth(&self, depth: i32) {
        self.state.lock().max_depth = depth;
        self.queue_available.notify_all();
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking.load(Ordering::Acquire)
    }

    pub fn set_blocking(&self, blocking: bool) {
        // Take the lock so a producer cannot miss the wakeup between its
        // check and its wait
        let _state = self.state.lock();
        self.blocking.store(blocking, Ordering::Release);
        if !blocking {
            self.queue_available.notify_all();
        }
    }

    /// Release every waiter and make further waits return immediately
    pub fn block(&self) {
        self.state.lock().break_block = true;
        self.data_available.notify_all();
        self.queue_available.notify_all();
    }

    pub fn unblock(&self) {
        self.state.lock().break_block = false;
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().break_block
    }

    pub fn state(&self) -> PortState {
        let state = self.state.lock();
        if state.packets.is_empty() {
            PortState::Idle
        } else if state.is_full() {
            PortState::Busy
        } else {
            PortState::Active
        }
    }

    /// Stream IDs of queued packets, front to back
    pub fn queued_stream_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .packets
            .iter()
            .map(|p| p.stream_id.clone())
            .collect()
    }

    /// Snapshot of queued packets (for inspection and tests)
    pub fn snapshot(&self) -> Vec<Packet<D>> {
        self.state.lock().packets.iter().cloned().collect()
    }
}
