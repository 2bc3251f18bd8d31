//! Contract between an output port and one downstream connection
//!
//! The port never sees how data leaves the process. Each connection wraps a
//! [`Transport`], and the port classifies the transport's failures:
//!
//! - [`TransportError::Fatal`] - the peer is gone; the connection is marked
//!   dead and skipped from then on
//! - [`TransportError::Transient`] - this push failed but later ones may
//!   succeed; counted and logged with suppression

use crate::data::PortData;
use crate::sri::StreamSri;
use crate::time::PrecisionTime;
use thiserror::Error;

/// Failure reported by a transport
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The connection cannot recover
    #[error("fatal transport error: {0}")]
    Fatal(String),

    /// This call failed; the connection stays alive
    #[error("transport error: {0}")]
    Transient(String),
}

impl TransportError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Fatal(_))
    }
}

/// Delivery of SRIs and packets to one connected input port
#[cfg_attr(test, mockall::automock)]
pub trait Transport<D: PortData>: Send {
    fn push_sri(&mut self, sri: &StreamSri) -> Result<(), TransportError>;

    fn push_packet(
        &mut self,
        data: &D,
        time: &PrecisionTime,
        eos: bool,
        stream_id: &str,
    ) -> Result<(), TransportError>;

    /// Short human-readable description of the peer, for logs
    fn describe(&self) -> String;
}
