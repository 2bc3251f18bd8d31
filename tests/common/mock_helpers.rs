//! Hand-written transports for observing what an output port sends

use bulkio_rs::output::{Transport, TransportError};
use bulkio_rs::sri::StreamSri;
use bulkio_rs::PrecisionTime;
use parking_lot::Mutex;
use std::sync::Arc;

/// One call seen by a [`RecordingTransport`]
#[derive(Debug, Clone, PartialEq)]
pub enum Event<D> {
    Sri(StreamSri),
    Packet {
        data: D,
        time: PrecisionTime,
        eos: bool,
        stream_id: String,
    },
}

impl<D> Event<D> {
    pub fn is_sri(&self) -> bool {
        matches!(self, Event::Sri(_))
    }

    pub fn is_eos(&self) -> bool {
        matches!(self, Event::Packet { eos: true, .. })
    }
}

/// Transport that records every call; clones share the log
#[derive(Clone)]
pub struct RecordingTransport<D> {
    events: Arc<Mutex<Vec<Event<D>>>>,
}

impl<D: Clone> RecordingTransport<D> {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn events(&self) -> Vec<Event<D>> {
        self.events.lock().clone()
    }

    /// Payloads of all packet calls, in order
    pub fn packets(&self) -> Vec<D> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::Packet { data, .. } => Some(data.clone()),
                Event::Sri(_) => None,
            })
            .collect()
    }

    pub fn sri_count(&self) -> usize {
        self.events.lock().iter().filter(|e| e.is_sri()).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl<D> Transport<D> for RecordingTransport<D>
where
    D: bulkio_rs::PortData,
{
    fn push_sri(&mut self, sri: &StreamSri) -> Result<(), TransportError> {
        self.events.lock().push(Event::Sri(sri.clone()));
        Ok(())
    }

    fn push_packet(
        &mut self,
        data: &D,
        time: &PrecisionTime,
        eos: bool,
        stream_id: &str,
    ) -> Result<(), TransportError> {
        self.events.lock().push(Event::Packet {
            data: data.clone(),
            time: *time,
            eos,
            stream_id: stream_id.to_string(),
        });
        Ok(())
    }

    fn describe(&self) -> String {
        "recording".to_string()
    }
}

/// Transport whose every call fails with the given error
pub struct FailingTransport {
    error: TransportError,
    calls: Arc<Mutex<usize>>,
}

impl FailingTransport {
    pub fn new(error: TransportError) -> (Self, Arc<Mutex<usize>>) {
        let calls = Arc::new(Mutex::new(0));
        (
            Self {
                error,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl<D: bulkio_rs::PortData> Transport<D> for FailingTransport {
    fn push_sri(&mut self, _sri: &StreamSri) -> Result<(), TransportError> {
        *self.calls.lock() += 1;
        Err(self.error.clone())
    }

    fn push_packet(
        &mut self,
        _data: &D,
        _time: &PrecisionTime,
        _eos: bool,
        _stream_id: &str,
    ) -> Result<(), TransportError> {
        *self.calls.lock() += 1;
        Err(self.error.clone())
    }

    fn describe(&self) -> String {
        "failing".to_string()
    }
}
