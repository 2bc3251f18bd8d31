//! Port and connection statistics
//!
//! [`LinkStatistics`] is the in-memory counter sink that ports call on every
//! push. It keeps a short rolling window of recent calls, from which
//! [`LinkStatistics::retrieve`] derives rates and averages. Updates take a
//! short internal lock and never fail.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;

/// Default number of calls kept in the rolling window
pub const DEFAULT_HISTORY_WINDOW: usize = 10;

/// Usage state of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortState {
    /// No data queued (input) or no connections (output)
    Idle,
    /// Queue is at its maximum depth
    Busy,
    /// Data queued (input) or at least one connection (output)
    Active,
}

/// Snapshot of statistics for one port or connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortStatistics {
    pub port_name: String,
    pub elements_per_second: f64,
    pub bits_per_second: f64,
    pub calls_per_second: f64,
    pub stream_ids: Vec<String>,
    pub average_queue_depth: f64,
    /// Seconds since the most recent update
    pub time_since_last_call: f64,
    /// Extra named values, e.g. `timeSinceLastFlush`
    pub keywords: Vec<(String, f64)>,
}

impl PortStatistics {
    pub fn keyword(&self, id: &str) -> Option<f64> {
        self.keywords
            .iter()
            .find(|(key, _)| key == id)
            .map(|(_, value)| *value)
    }
}

#[derive(Debug, Clone, Copy)]
struct StatPoint {
    elements: usize,
    queue_fill: f32,
    at: Instant,
}

#[derive(Debug)]
struct StatsInner {
    enabled: bool,
    history_window: usize,
    points: VecDeque<StatPoint>,
    active_streams: Vec<String>,
    last_flush: Option<Instant>,
    connection_errors: u64,
}

/// Rolling-window statistics for a port or a single connection
#[derive(Debug)]
pub struct LinkStatistics {
    port_name: String,
    bits_per_element: usize,
    created: Instant,
    inner: Mutex<StatsInner>,
}

impl LinkStatistics {
    pub fn new(port_name: impl Into<String>, bits_per_element: usize) -> Self {
        Self::with_history(port_name, bits_per_element, DEFAULT_HISTORY_WINDOW)
    }

    pub fn with_history(
        port_name: impl Into<String>,
        bits_per_element: usize,
        history_window: usize,
    ) -> Self {
        let history_window = history_window.max(1);
        Self {
            port_name: port_name.into(),
            bits_per_element,
            created: Instant::now(),
            inner: Mutex::new(StatsInner {
                enabled: true,
                history_window,
                points: VecDeque::with_capacity(history_window),
                active_streams: Vec::new(),
                last_flush: None,
                connection_errors: 0,
            }),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.lock().enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().enabled
    }

    /// Record one push of `elements` elements
    pub fn update(
        &self,
        elements: usize,
        queue_fill: f32,
        eos: bool,
        stream_id: &str,
        flushed: bool,
    ) {
        let mut inner = self.inner.lock();
        if !inner.enabled {
            return;
        }
        let now = Instant::now();
        inner.points.push_back(StatPoint {
            elements,
            queue_fill,
            at: now,
        });
        if inner.points.len() > inner.history_window {
            inner.points.pop_front();
        }

        if eos {
            inner.active_streams.retain(|id| id != stream_id);
        } else if !inner.active_streams.iter().any(|id| id == stream_id) {
            inner.active_streams.push(stream_id.to_string());
        }

        if flushed {
            inner.last_flush = Some(now);
        }
    }

    /// Compute a snapshot from the rolling window
    pub fn retrieve(&self) -> PortStatistics {
        let inner = self.inner.lock();
        let now = Instant::now();

        let calls = inner.points.len();
        let total_elements: usize = inner.points.iter().map(|p| p.elements).sum();
        let total_fill: f64 = inner.points.iter().map(|p| f64::from(p.queue_fill)).sum();

        // Measure the window from its first call (or port creation for a
        // single sample) up to now
        let since = inner.points.front().map(|p| p.at).unwrap_or(self.created);
        let span = now.duration_since(since).as_secs_f64().max(1e-6);

        let elements_per_second = total_elements as f64 / span;
        let mut keywords = Vec::new();
        if let Some(flush) = inner.last_flush {
            keywords.push((
                "timeSinceLastFlush".to_string(),
                now.duration_since(flush).as_secs_f64(),
            ));
        }

        PortStatistics {
            port_name: self.port_name.clone(),
            elements_per_second,
            bits_per_second: elements_per_second * self.bits_per_element as f64,
            calls_per_second: calls as f64 / span,
            stream_ids: inner.active_streams.clone(),
            average_queue_depth: if calls == 0 {
                0.0
            } else {
                total_fill / calls as f64
            },
            time_since_last_call: inner
                .points
                .back()
                .map(|p| now.duration_since(p.at).as_secs_f64())
                .unwrap_or(0.0),
            keywords,
        }
    }

    /// Active stream IDs seen by this link
    pub fn active_stream_ids(&self) -> Vec<String> {
        self.inner.lock().active_streams.clone()
    }

    pub fn connection_errors(&self) -> u64 {
        self.inner.lock().connection_errors
    }

    /// Bump the consecutive error counter, returning the new value
    pub fn increment_connection_errors(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.connection_errors = inner.connection_errors.saturating_add(1);
        inner.connection_errors
    }

    pub fn reset_connection_errors(&self) {
        self.inner.lock().connection_errors = 0;
    }
}
