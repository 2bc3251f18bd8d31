//! In-process transports
//!
//! Two ways to connect an [`OutPort`](crate::output::OutPort) to an
//! [`InPort`] living in the same process:
//!
//! - [`LocalTransport`] calls the input port directly on the writer's thread
//! - [`ChannelTransport`] hands each call to a [`DeliveryWorker`] over a
//!   bounded crossbeam channel, decoupling writer and reader threads
//!
//! # Example
//!
//! ```ignore
//! let input: InPort<Vec<f32>> = InPort::new("in");
//! let (transport, delivery) = ChannelTransport::spawn(input.clone(), 64)?;
//! output.connect_port(Box::new(transport), "loopback")?;
//! // ...
//! delivery.stop();
//! ```

use crate::data::PortData;
use crate::error::{BulkioError, Result};
use crate::input::InPort;
use crate::output::transport::{Transport, TransportError};
use crate::sri::StreamSri;
use crate::time::PrecisionTime;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How often an idle worker checks its running flag
const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(50);

// ── Direct delivery ──

/// Transport that pushes straight into an input port
pub struct LocalTransport<D: PortData> {
    port: InPort<D>,
}

impl<D: PortData> LocalTransport<D> {
    pub fn new(port: InPort<D>) -> Self {
        Self { port }
    }
}

impl<D: PortData> Transport<D> for LocalTransport<D> {
    fn push_sri(&mut self, sri: &StreamSri) -> std::result::Result<(), TransportError> {
        self.port.push_sri(sri.clone());
        Ok(())
    }

    fn push_packet(
        &mut self,
        data: &D,
        time: &PrecisionTime,
        eos: bool,
        stream_id: &str,
    ) -> std::result::Result<(), TransportError> {
        self.port.push_packet(data.clone(), *time, eos, stream_id);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("local:{}", self.port.name())
    }
}

// ── Channel delivery ──

/// One transport call in flight to a [`DeliveryWorker`]
#[derive(Debug, Clone)]
pub enum TransportMessage<D: PortData> {
    Sri(StreamSri),
    Packet {
        data: D,
        time: PrecisionTime,
        eos: bool,
        stream_id: String,
    },
}

/// Transport that queues calls for a delivery thread
pub struct ChannelTransport<D: PortData> {
    sender: Sender<TransportMessage<D>>,
    peer: String,
    block_when_full: bool,
}

impl<D: PortData> ChannelTransport<D> {
    /// Create a transport and the worker that drains it into `port`
    pub fn new(port: InPort<D>, capacity: usize) -> (Self, DeliveryWorker<D>) {
        let (sender, receiver) = bounded(capacity);
        let transport = Self {
            sender,
            peer: format!("channel:{}", port.name()),
            block_when_full: false,
        };
        let worker = DeliveryWorker {
            receiver,
            port,
            running: Arc::new(AtomicBool::new(true)),
            delivered: 0,
        };
        (transport, worker)
    }

    /// Create a transport and run its worker on a new thread
    pub fn spawn(port: InPort<D>, capacity: usize) -> Result<(Self, DeliveryHandle)> {
        let (transport, mut worker) = Self::new(port, capacity);
        let running = worker.running_flag();
        let thread = std::thread::Builder::new()
            .name(format!("bulkio-{}", transport.peer))
            .spawn(move || worker.run())
            .map_err(|e| BulkioError::Io(e).with_context("Spawning delivery worker"))?;
        Ok((
            transport,
            DeliveryHandle {
                running,
                thread: Some(thread),
            },
        ))
    }

    /// Wait for room instead of failing when the channel is full
    pub fn with_blocking(mut self, block_when_full: bool) -> Self {
        self.block_when_full = block_when_full;
        self
    }

    fn send(&self, message: TransportMessage<D>) -> std::result::Result<(), TransportError> {
        if self.block_when_full {
            return self
                .sender
                .send(message)
                .map_err(|_| TransportError::Fatal(format!("{} disconnected", self.peer)));
        }
        self.sender.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Transient(format!("{} queue full", self.peer)),
            TrySendError::Disconnected(_) => {
                TransportError::Fatal(format!("{} disconnected", self.peer))
            }
        })
    }
}

impl<D: PortData> Transport<D> for ChannelTransport<D> {
    fn push_sri(&mut self, sri: &StreamSri) -> std::result::Result<(), TransportError> {
        self.send(TransportMessage::Sri(sri.clone()))
    }

    fn push_packet(
        &mut self,
        data: &D,
        time: &PrecisionTime,
        eos: bool,
        stream_id: &str,
    ) -> std::result::Result<(), TransportError> {
        self.send(TransportMessage::Packet {
            data: data.clone(),
            time: *time,
            eos,
            stream_id: stream_id.to_string(),
        })
    }

    fn describe(&self) -> String {
        self.peer.clone()
    }
}

/// Drains a [`ChannelTransport`] into an input port
pub struct DeliveryWorker<D: PortData> {
    receiver: Receiver<TransportMessage<D>>,
    port: InPort<D>,
    running: Arc<AtomicBool>,
    delivered: usize,
}

impl<D: PortData> DeliveryWorker<D> {
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    fn deliver(&mut self, message: TransportMessage<D>) {
        match message {
            TransportMessage::Sri(sri) => self.port.push_sri(sri),
            TransportMessage::Packet {
                data,
                time,
                eos,
                stream_id,
            } => {
                self.port.push_packet(data, time, eos, &stream_id);
                self.delivered += 1;
            }
        }
    }

    /// Deliver everything queued right now; returns packets delivered so far
    pub fn deliver_pending(&mut self) -> usize {
        while let Ok(message) = self.receiver.try_recv() {
            self.deliver(message);
        }
        self.delivered
    }

    /// Deliver until the channel disconnects or the running flag clears;
    /// returns the number of packets delivered
    pub fn run(&mut self) -> usize {
        tracing::debug!("Delivery worker for '{}' started", self.port.name());
        while self.running.load(Ordering::SeqCst) {
            match self.receiver.recv_timeout(WORKER_POLL_INTERVAL) {
                Ok(message) => self.deliver(message),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    self.running.store(false, Ordering::SeqCst);
                    break;
                }
            }
        }
        tracing::debug!(
            "Delivery worker for '{}' stopped after {} packets",
            self.port.name(),
            self.delivered
        );
        self.delivered
    }
}

/// Control handle for a spawned [`DeliveryWorker`]
pub struct DeliveryHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<usize>>,
}

impl DeliveryHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the worker and wait for it; returns packets delivered
    pub fn stop(mut self) -> usize {
        self.shutdown()
    }

    fn shutdown(&mut self) -> usize {
        self.running.store(false, Ordering::SeqCst);
        self.thread
            .take()
            .and_then(|thread| thread.join().ok())
            .unwrap_or(0)
    }
}

impl Drop for DeliveryHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
