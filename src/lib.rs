//! # bulkio-rs: BulkIO data-plane ports and streams
//!
//! Typed, one-directional data connections between signal-processing
//! components. An output port fans each push out to any number of
//! connections; an input port queues what arrives and reassembles it into
//! per-stream reads.
//!
//! ## Architecture
//!
//! - **Output**: [`OutPort`] chunks oversized pushes to the transport limit,
//!   keeps each connection's copy of the stream SRI current, and absorbs
//!   transport failures per connection
//! - **Input**: [`InPort`] queues packets from all streams in one bounded
//!   FIFO with a flush-on-overflow policy; each [`InputStream`] reads its own
//!   stream's packets with exact sample counts, overlap and EOS tracking
//! - **Metadata**: [`StreamSri`] describes each stream; changes travel
//!   in-band and surface as [`SriFields`] flags on the next data block
//! - **Transport**: the [`Transport`] trait is the only contact with the
//!   outside; [`local`] provides in-process implementations
//!
//! ## Example
//!
//! ```ignore
//! use bulkio_rs::{local::LocalTransport, types::*, PrecisionTime, Wait};
//!
//! let input = InFloatPort::new("dataFloat_in");
//! let output = OutFloatPort::new("dataFloat_out");
//! output.connect_port(Box::new(LocalTransport::new(input.clone())), "c1")?;
//!
//! let stream = output.create_stream("tone");
//! stream.write(vec![0.0; 4096], PrecisionTime::now());
//! stream.close();
//!
//! let reader = input.current_stream(Wait::NonBlocking).unwrap();
//! let block = reader.read_count(1024).into_block().unwrap();
//! ```

pub mod config;
pub mod data;
pub mod datablock;
pub mod error;
pub mod input;
pub mod local;
pub mod output;
pub mod packet;
pub mod sri;
pub mod statistics;
pub mod time;
pub mod types;

// Re-export commonly used types
pub use config::{BulkioConfig, InPortConfig, OutPortConfig};
pub use data::{BitBuffer, FileUri, PortData, SampleData, XmlDocument};
pub use datablock::{DataBlock, ReadResult, SampleTimestamp};
pub use error::{BulkioError, Result, ResultExt};
pub use input::{EosState, InPort, InputStream, Wait};
pub use output::{ConnectionDescriptor, OutPort, OutputStream, Transport, TransportError};
pub use sri::{SriFields, StreamSri};
pub use statistics::{PortState, PortStatistics};
pub use time::PrecisionTime;
