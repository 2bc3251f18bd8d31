//! Input side: packet queue, input port and input streams
//!
//! # Architecture
//!
//! ```text
//! transport ──push_sri/push_packet──► InPort ──► PacketQueue (all stream IDs)
//!                                        │              │
//!                                        │   fetch by stream ID
//!                                        ▼              ▼
//!                                   stream table ──► InputStream cursor ──► DataBlock
//! ```
//!
//! An [`InPort`] owns three independently locked pieces of state: the
//! [`PacketQueue`], the table of current SRIs, and the table of active and
//! pending [`InputStream`]s. Ingestion only touches the stream table to
//! check whether a stream is enabled or to create a stream for a new ID, so
//! readers doing stream bookkeeping never stall the producer.
//!
//! # Example
//!
//! ```ignore
//! use bulkio_rs::input::{InPort, Wait};
//!
//! let port: InPort<Vec<f32>> = InPort::new("dataFloat_in");
//! port.push_sri(sri::create("tone"));
//! port.push_packet(vec![0.0; 1024], PrecisionTime::now(), false, "tone");
//!
//! let stream = port.current_stream(Wait::NonBlocking).unwrap();
//! match stream.read_count(256) {
//!     ReadResult::Data(block) => process(block.samples()),
//!     ReadResult::Empty => {}
//!     ReadResult::EndOfStream => return,
//! }
//! ```

pub mod port;
pub mod queue;
pub mod stream;

pub use port::InPort;
pub use queue::PacketQueue;
pub use stream::{EosState, InputStream};

use std::time::Duration;

/// How long a read or packet fetch may wait for data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Return immediately
    NonBlocking,
    /// Wait until data arrives or the port is stopped
    Blocking,
    /// Wait at most this long
    Timeout(Duration),
}

impl Wait {
    /// Map a seconds value: 0 is non-blocking, negative waits forever
    pub fn from_secs_f64(seconds: f64) -> Self {
        if seconds < 0.0 {
            Wait::Blocking
        } else if seconds == 0.0 {
            Wait::NonBlocking
        } else {
            Wait::Timeout(Duration::from_secs_f64(seconds))
        }
    }

    /// Map a millisecond timeout: 0 is non-blocking, negative waits forever
    pub fn from_millis(millis: i64) -> Self {
        match millis {
            m if m < 0 => Wait::Blocking,
            0 => Wait::NonBlocking,
            m => Wait::Timeout(Duration::from_millis(m as u64)),
        }
    }
}
