//! Queue element passed from ingestion to stream readers

use crate::data::PortData;
use crate::sri::StreamSri;
use crate::time::PrecisionTime;
use std::sync::Arc;

/// One received push, as held in an input port's queue
///
/// The SRI is a shared snapshot of the header that was current when the
/// packet arrived. Flags are set by the port on ingestion; the queue flush
/// may rewrite a packet once while it is still queued, and buffered streams
/// clear the flags once they have been reported in a data block.
#[derive(Debug, Clone)]
pub struct Packet<D: PortData> {
    pub data: D,
    pub time: PrecisionTime,
    pub eos: bool,
    pub stream_id: String,
    pub sri: Arc<StreamSri>,
    pub sri_changed: bool,
    pub input_queue_flushed: bool,
}

impl<D: PortData> Packet<D> {
    pub fn new(
        data: D,
        time: PrecisionTime,
        eos: bool,
        sri: Arc<StreamSri>,
        sri_changed: bool,
    ) -> Self {
        Self {
            data,
            time,
            eos,
            stream_id: sri.stream_id.clone(),
            sri,
            sri_changed,
            input_queue_flushed: false,
        }
    }

    /// Number of payload elements
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether this packet starts a new segment of its stream, so a read
    /// spanning packets must stop before it
    #[inline]
    pub fn is_break(&self) -> bool {
        self.sri_changed || self.input_queue_flushed
    }

    /// Drop the payload, keeping all flags
    pub(crate) fn strip_data(&mut self) {
        self.data = D::empty();
    }
}
