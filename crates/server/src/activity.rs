//! Record of the requests nodes received.

use parking_lot::Mutex;
use protosim_protocol::{Frame, Opcode};
use protosim_types::{NodeKey, Scope};
use std::collections::VecDeque;
use std::time::SystemTime;

/// One decoded request frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityEntry {
    pub node: NodeKey,
    /// Connection id, unique per node.
    pub connection: u64,
    /// Remote peer of the connection.
    pub peer: String,
    pub stream_id: i16,
    pub opcode: Opcode,
    /// Query text of QUERY and PREPARE, or of EXECUTE when the id is known.
    pub query: Option<String>,
    /// Whether a user prime answered, as opposed to a built-in stub or nothing.
    pub primed: bool,
    pub received_at: SystemTime,
}

/// Default number of entries kept before the oldest are dropped.
pub const DEFAULT_ACTIVITY_LOG_CAPACITY: usize = 10_000;

/// Server-wide activity log, filtered by scope on read.
///
/// Holds at most `capacity` entries, dropping the oldest first. A capacity of
/// zero turns recording off.
#[derive(Debug)]
pub struct ActivityLog {
    entries: Mutex<VecDeque<ActivityEntry>>,
    capacity: usize,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_ACTIVITY_LOG_CAPACITY)
    }
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&self, entry: ActivityEntry) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Entries of nodes within `scope`, oldest first.
    pub fn entries(&self, scope: &Scope) -> Vec<ActivityEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| scope.contains(&entry.node))
            .cloned()
            .collect()
    }

    /// Drop entries of nodes within `scope`. Returns how many were dropped.
    pub fn clear(&self, scope: &Scope) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| !scope.contains(&entry.node));
        before - entries.len()
    }
}

impl ActivityEntry {
    pub(crate) fn new(
        node: NodeKey,
        connection: u64,
        peer: &str,
        frame: &Frame,
        query: Option<&str>,
        primed: bool,
    ) -> Self {
        Self {
            node,
            connection,
            peer: peer.to_string(),
            stream_id: frame.stream_id,
            opcode: frame.opcode(),
            query: query.map(str::to_string),
            primed,
            received_at: SystemTime::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protosim_protocol::{Message, ProtocolVersion};
    use protosim_types::{ClusterId, DataCenterId, NodeId};

    #[test]
    fn test_scoped_read_and_clear() {
        let log = ActivityLog::new();
        let frame = Frame::new(ProtocolVersion::V4, 1, Message::Options);
        let a = NodeKey::new(ClusterId(0), DataCenterId(0), NodeId(0));
        let b = NodeKey::new(ClusterId(1), DataCenterId(0), NodeId(0));
        log.record(ActivityEntry::new(a, 0, "local", &frame, None, false));
        log.record(ActivityEntry::new(b, 0, "local", &frame, None, false));
        log.record(ActivityEntry::new(b, 1, "local", &frame, None, false));

        assert_eq!(log.entries(&Scope::any()).len(), 3);
        assert_eq!(log.entries(&Scope::cluster(ClusterId(1))).len(), 2);
        assert_eq!(log.clear(&Scope::node(a)), 1);
        assert_eq!(log.entries(&Scope::any()).len(), 2);
        assert_eq!(log.entries(&Scope::any())[0].opcode, Opcode::Options);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let log = ActivityLog::with_capacity(2);
        let key = NodeKey::new(ClusterId(0), DataCenterId(0), NodeId(0));
        for stream in 0..5 {
            let frame = Frame::new(ProtocolVersion::V4, stream, Message::Options);
            log.record(ActivityEntry::new(key, 0, "local", &frame, None, false));
        }

        let streams: Vec<i16> = log
            .entries(&Scope::any())
            .iter()
            .map(|entry| entry.stream_id)
            .collect();
        assert_eq!(streams, vec![3, 4]);
    }

    #[test]
    fn test_zero_capacity_records_nothing() {
        let log = ActivityLog::with_capacity(0);
        let frame = Frame::new(ProtocolVersion::V4, 1, Message::Options);
        let key = NodeKey::new(ClusterId(0), DataCenterId(0), NodeId(0));
        log.record(ActivityEntry::new(key, 0, "local", &frame, None, false));
        assert!(log.entries(&Scope::any()).is_empty());
    }
}
