//! In-memory call table owned by the tracker

use std::collections::{HashMap, HashSet, VecDeque};

/// Flags kept per linked id
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackedCall {
    /// A call of interest was seen and persisted
    pub tracked: bool,
    /// The call is bridged to an agent
    pub active: bool,
}

/// Tracking flags plus a bounded memory of recently ended calls
///
/// Only the tracker mutates the table; it is handed out by shared reference
/// for inspection.
#[derive(Debug)]
pub struct CallTable {
    calls: HashMap<String, TrackedCall>,
    ended: VecDeque<String>,
    ended_ids: HashSet<String>,
    ended_capacity: usize,
}

impl CallTable {
    pub fn new(ended_capacity: usize) -> Self {
        Self {
            calls: HashMap::new(),
            ended: VecDeque::with_capacity(ended_capacity.min(4096)),
            ended_ids: HashSet::new(),
            ended_capacity,
        }
    }

    /// Flags for `linked_id`, both false when unknown
    pub fn get(&self, linked_id: &str) -> TrackedCall {
        self.calls.get(linked_id).copied().unwrap_or_default()
    }

    pub fn is_tracked(&self, linked_id: &str) -> bool {
        self.get(linked_id).tracked
    }

    pub fn is_active(&self, linked_id: &str) -> bool {
        self.get(linked_id).active
    }

    pub fn contains(&self, linked_id: &str) -> bool {
        self.calls.contains_key(linked_id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub(crate) fn mark_tracked(&mut self, linked_id: &str) {
        self.calls.entry(linked_id.to_string()).or_default().tracked = true;
    }

    pub(crate) fn mark_active(&mut self, linked_id: &str) {
        let call = self.calls.entry(linked_id.to_string()).or_default();
        call.tracked = true;
        call.active = true;
    }

    /// Clear the tracked flag; the entry goes away once no flag is left
    pub(crate) fn clear_tracked(&mut self, linked_id: &str) {
        if let Some(call) = self.calls.get_mut(linked_id) {
            call.tracked = false;
            if !call.active {
                self.calls.remove(linked_id);
            }
        }
    }

    /// Drop the entry and both flags
    pub(crate) fn release(&mut self, linked_id: &str) {
        self.calls.remove(linked_id);
    }

    /// Remember a call that ended, evicting the oldest beyond capacity
    pub(crate) fn remember_ended(&mut self, linked_id: &str) {
        if self.ended_capacity == 0 || self.ended_ids.contains(linked_id) {
            return;
        }
        while self.ended.len() >= self.ended_capacity {
            if let Some(oldest) = self.ended.pop_front() {
                self.ended_ids.remove(&oldest);
            }
        }
        self.ended.push_back(linked_id.to_string());
        self.ended_ids.insert(linked_id.to_string());
    }

    pub(crate) fn forget_ended(&mut self, linked_id: &str) {
        if self.ended_ids.remove(linked_id) {
            self.ended.retain(|id| id != linked_id);
        }
    }

    /// Whether `linked_id` ended recently and may come back as a transfer
    pub fn was_ended(&self, linked_id: &str) -> bool {
        self.ended_ids.contains(linked_id)
    }

    pub fn ended_len(&self) -> usize {
        self.ended.len()
    }
}

impl Default for CallTable {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_default_to_false() {
        let table = CallTable::default();
        assert_eq!(table.get("1.1"), TrackedCall::default());
        assert!(!table.contains("1.1"));
    }

    #[test]
    fn test_clear_tracked_keeps_active_entries() {
        let mut table = CallTable::default();
        table.mark_tracked("1.1");
        table.clear_tracked("1.1");
        assert!(!table.contains("1.1"));

        table.mark_active("2.2");
        table.clear_tracked("2.2");
        assert_eq!(
            table.get("2.2"),
            TrackedCall {
                tracked: false,
                active: true
            }
        );
    }

    #[test]
    fn test_ended_ring_is_bounded() {
        let mut table = CallTable::new(2);
        table.remember_ended("a");
        table.remember_ended("b");
        table.remember_ended("b");
        table.remember_ended("c");

        assert!(!table.was_ended("a"));
        assert!(table.was_ended("b"));
        assert!(table.was_ended("c"));
        assert_eq!(table.ended_len(), 2);

        table.forget_ended("b");
        assert!(!table.was_ended("b"));
        assert_eq!(table.ended_len(), 1);
    }

    #[test]
    fn test_zero_capacity_remembers_nothing() {
        let mut table = CallTable::new(0);
        table.remember_ended("a");
        assert!(!table.was_ended("a"));
    }
}
