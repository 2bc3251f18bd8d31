//! Stream-to-connection routing
//!
//! A filter is a flat list of `(port, connection, stream)` triples. Ports not
//! named anywhere in the list route every stream to every connection; once a
//! port is named, it only sends a stream over the connections listed for it.

use serde::{Deserialize, Serialize};

/// One routing entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub connection_id: String,
    pub stream_id: String,
    pub port_name: String,
}

impl ConnectionDescriptor {
    pub fn new(
        connection_id: impl Into<String>,
        stream_id: impl Into<String>,
        port_name: impl Into<String>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            stream_id: stream_id.into(),
            port_name: port_name.into(),
        }
    }
}

/// The routing table of an output port
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingFilter {
    entries: Vec<ConnectionDescriptor>,
}

impl RoutingFilter {
    pub fn new(entries: Vec<ConnectionDescriptor>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ConnectionDescriptor] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `stream_id` goes out over `connection_id` on port `port_name`
    pub fn is_routed(&self, port_name: &str, connection_id: &str, stream_id: &str) -> bool {
        let mut port_listed = false;
        for entry in self.entries.iter().filter(|e| e.port_name == port_name) {
            port_listed = true;
            if entry.connection_id == connection_id && entry.stream_id == stream_id {
                return true;
            }
        }
        !port_listed
    }
}
