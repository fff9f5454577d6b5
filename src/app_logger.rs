//! Relay traffic ring buffer.
//!
//! Every message that crosses the bridge (plugin → bridge, bridge → plugin,
//! and command-surface writes) leaves a short entry in a fixed-capacity
//! circular buffer, served back by `GET /logs`. Payloads are not stored, only
//! the message type and a one-line summary.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Direction {
    /// Received from the plugin
    In,
    /// Sent to the plugin
    Out,
    /// Write issued through the HTTP command surface
    Command,
}

/// A single traffic entry stored in the ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TrafficEntry {
    pub id: u64,
    pub timestamp_ms: i64,
    pub direction: Direction,
    pub message_type: String,
    pub summary: String,
}

// ---------------------------------------------------------------------------
// Ring buffer
// ---------------------------------------------------------------------------

pub(crate) const TRAFFIC_RING_CAPACITY: usize = 500;

/// Fixed-capacity circular buffer for traffic entries.
pub(crate) struct TrafficLog {
    entries: Vec<Option<TrafficEntry>>,
    capacity: usize,
    /// Write position (wraps around)
    write_pos: usize,
    /// Number of entries currently stored (≤ capacity)
    count: usize,
    /// Monotonically increasing ID for the next entry
    next_id: u64,
}

impl TrafficLog {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, || None);
        Self {
            entries,
            capacity,
            write_pos: 0,
            count: 0,
            next_id: 1,
        }
    }

    /// Record one event. Returns the assigned entry ID.
    pub(crate) fn push(
        &mut self,
        direction: Direction,
        message_type: impl Into<String>,
        summary: impl Into<String>,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        self.entries[self.write_pos] = Some(TrafficEntry {
            id,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            direction,
            message_type: message_type.into(),
            summary: summary.into(),
        });
        self.write_pos = (self.write_pos + 1) % self.capacity;
        if self.count < self.capacity {
            self.count += 1;
        }

        id
    }

    /// Entries in chronological order (oldest first), restricted to
    /// `direction` when given, keeping the most recent `limit` (0 = all).
    pub(crate) fn get_entries(&self, limit: usize, direction: Option<Direction>) -> Vec<TrafficEntry> {
        // write_pos points at the oldest slot once the buffer has wrapped
        let start = if self.count < self.capacity { 0 } else { self.write_pos };

        let matching: Vec<&TrafficEntry> = (0..self.count)
            .filter_map(|i| self.entries[(start + i) % self.capacity].as_ref())
            .filter(|e| direction.is_none_or(|d| e.direction == d))
            .collect();

        let skip = if limit == 0 { 0 } else { matching.len().saturating_sub(limit) };
        matching.into_iter().skip(skip).cloned().collect()
    }

    /// Remove all entries. IDs keep counting from where they were.
    pub(crate) fn clear(&mut self) {
        for slot in self.entries.iter_mut() {
            *slot = None;
        }
        self.write_pos = 0;
        self.count = 0;
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.count
    }
}

impl Default for TrafficLog {
    fn default() -> Self {
        Self::new(TRAFFIC_RING_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
