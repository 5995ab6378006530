use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::models::flow::FlowRecord;

/// Arrival-ordered, capacity-bounded flow history.
///
/// When full, the oldest records are evicted before a new one is appended.
/// The buffer also owns the consumer's focused record so that clearing or
/// evicting never leaves the focus pointing at a record that is gone.
pub struct FlowBuffer {
    records: VecDeque<Arc<FlowRecord>>,
    capacity: usize,
    focused: Option<Arc<FlowRecord>>,
}

impl FlowBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = Self::sanitize(capacity);
        Self {
            records: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            focused: None,
        }
    }

    fn sanitize(capacity: usize) -> usize {
        if capacity == 0 {
            warn!("Buffer capacity 0 requested, using 1");
            1
        } else {
            capacity
        }
    }

    /// Append a record, evicting from the front until it fits.
    ///
    /// Returns the number of records evicted.
    pub fn append(&mut self, record: Arc<FlowRecord>) -> usize {
        let mut evicted = 0;
        while self.records.len() >= self.capacity {
            self.evict_front();
            evicted += 1;
        }
        self.records.push_back(record);
        evicted
    }

    /// Change the capacity, evicting the oldest surplus immediately.
    ///
    /// Returns the number of records evicted.
    pub fn set_capacity(&mut self, capacity: usize) -> usize {
        self.capacity = Self::sanitize(capacity);
        let mut evicted = 0;
        while self.records.len() > self.capacity {
            self.evict_front();
            evicted += 1;
        }
        if evicted > 0 {
            debug!("Capacity now {}, evicted {} records", self.capacity, evicted);
        }
        evicted
    }

    fn evict_front(&mut self) {
        if let Some(old) = self.records.pop_front() {
            if self.focused.as_ref().is_some_and(|f| Arc::ptr_eq(f, &old)) {
                debug!("Focused record {} evicted", old.id);
                self.focused = None;
            }
        }
    }

    /// Drop every record and the focused reference
    pub fn clear(&mut self) {
        self.records.clear();
        self.focused = None;
    }

    /// Focus the newest buffered record with this id. Returns the focused record.
    pub fn focus(&mut self, id: &str) -> Option<Arc<FlowRecord>> {
        self.focused = self.records.iter().rev().find(|r| r.id == id).cloned();
        self.focused.clone()
    }

    pub fn unfocus(&mut self) {
        self.focused = None;
    }

    pub fn focused(&self) -> Option<&Arc<FlowRecord>> {
        self.focused.as_ref()
    }

    /// Current records, oldest first
    pub fn snapshot(&self) -> Vec<Arc<FlowRecord>> {
        self.records.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<FlowRecord>> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
