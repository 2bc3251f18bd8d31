//! Output side: chunking, routing and fan-out to connections
//!
//! # Architecture
//!
//! ```text
//! OutputStream ──write──► OutPort ──Fragments──► for each connection:
//!   (SRI, buffer)          │                       routed? alive?
//!                          │                       SRI seen? else push_sri
//!                          ▼                       push_packet → statistics
//!                    stream table (SRI + seen set)
//! ```
//!
//! Writers either call [`OutPort::push_sri`] / [`OutPort::push_packet`]
//! directly or go through an [`OutputStream`], which manages the SRI and
//! optional buffering. Each push is split once by the chunker and every
//! fragment is offered to every connection.
//!
//! # Example
//!
//! ```ignore
//! use bulkio_rs::output::OutPort;
//!
//! let port: OutPort<Vec<f32>> = OutPort::new("dataFloat_out");
//! port.connect_port(Box::new(transport), "connection_1")?;
//!
//! let stream = port.create_stream("tone");
//! stream.set_xdelta(1.0 / 48_000.0);
//! stream.write(samples, PrecisionTime::now());
//! stream.close();
//! ```

pub mod chunker;
pub mod filter;
pub mod port;
pub mod stream;
pub mod transport;

pub use chunker::{Fragment, Fragments};
pub use filter::{ConnectionDescriptor, RoutingFilter};
pub use port::OutPort;
pub use stream::OutputStream;
pub use transport::{Transport, TransportError};
