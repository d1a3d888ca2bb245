//! In-memory call store
//!
//! Mirrors the MySQL statements closely enough to exercise the tracker
//! without a database server: one lock per operation gives the same
//! all-or-nothing behaviour as the SQL transactions, and every statement is
//! appended to a journal so tests can assert on write order.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use super::{
    CallOutcome, CallStatus, CallStore, CurrentCallEvent, DatabaseError, DbResult, NewCall,
    TransferLeg,
};

/// A row of the `calls` table
#[derive(Debug, Clone, Serialize)]
pub struct StoredCall {
    pub id: u64,
    pub linked_id: String,
    pub phone: String,
    pub status: CallStatus,
    pub agent_id: i64,
    pub trunk: String,
    pub campaign_id: i64,
    pub entered_queue_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub wait_seconds: i64,
    pub duration_seconds: i64,
    pub transfer: Option<String>,
}

/// A row of the `current_calls` table
#[derive(Debug, Clone, Serialize)]
pub struct StoredCurrentCall {
    pub call_id: u64,
    pub linked_id: String,
    pub queue: String,
    pub agent_number: String,
    pub event: CurrentCallEvent,
    pub channel: String,
    pub channel_client: String,
    pub hold: bool,
    pub started_at: DateTime<Utc>,
}

/// Statements applied, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    InsertCall(String),
    InsertCurrentCall(String),
    UpdateCallStatus(String, CallStatus),
    UpdateCurrentCall(String, CurrentCallEvent),
    DeleteCurrentCall(String),
}

#[derive(Debug, Default)]
struct MemoryState {
    calls: Vec<StoredCall>,
    current_calls: Vec<StoredCurrentCall>,
    // number -> (id, active)
    agents: HashMap<String, (i64, bool)>,
    journal: Vec<StoreOp>,
    next_id: u64,
    unavailable: bool,
}

impl MemoryState {
    fn check_available(&self) -> DbResult<()> {
        if self.unavailable {
            return Err(DatabaseError::Unavailable("memory store switched off".to_string()));
        }
        Ok(())
    }

    fn call_mut(&mut self, linked_id: &str) -> DbResult<&mut StoredCall> {
        self.calls
            .iter_mut()
            .rev()
            .find(|c| c.linked_id == linked_id)
            .ok_or_else(|| DatabaseError::NotFound(format!("call {}", linked_id)))
    }
}

/// Call store kept in process memory
#[derive(Clone, Default)]
pub struct MemoryCallStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an active agent
    pub fn with_agent(self, number: &str, id: i64) -> Self {
        self.add_agent(number, id, true);
        self
    }

    pub fn add_agent(&self, number: &str, id: i64, active: bool) {
        self.state
            .lock()
            .agents
            .insert(number.to_string(), (id, active));
    }

    /// Make every operation fail with [`DatabaseError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    pub fn calls(&self) -> Vec<StoredCall> {
        self.state.lock().calls.clone()
    }

    pub fn call(&self, linked_id: &str) -> Option<StoredCall> {
        self.state
            .lock()
            .calls
            .iter()
            .rev()
            .find(|c| c.linked_id == linked_id)
            .cloned()
    }

    pub fn current_calls(&self) -> Vec<StoredCurrentCall> {
        self.state.lock().current_calls.clone()
    }

    pub fn current_calls_for(&self, linked_id: &str) -> Vec<StoredCurrentCall> {
        self.state
            .lock()
            .current_calls
            .iter()
            .filter(|c| c.linked_id == linked_id)
            .cloned()
            .collect()
    }

    pub fn journal(&self) -> Vec<StoreOp> {
        self.state.lock().journal.clone()
    }

    /// Pretend time passed since the call was queued and started
    pub fn age_call(&self, linked_id: &str, seconds: i64) {
        let mut state = self.state.lock();
        if let Ok(call) = state.call_mut(linked_id) {
            let shift = chrono::Duration::seconds(seconds);
            call.entered_queue_at -= shift;
            if let Some(started) = call.started_at.as_mut() {
                *started -= shift;
            }
        }
    }
}

#[async_trait]
impl CallStore for MemoryCallStore {
    async fn lookup_active_agent_id(&self, caller_number: &str) -> DbResult<Option<i64>> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(state
            .agents
            .get(caller_number)
            .filter(|(_, active)| *active)
            .map(|(id, _)| *id))
    }

    async fn active_agent_numbers(&self) -> DbResult<Vec<String>> {
        let state = self.state.lock();
        state.check_available()?;
        let mut numbers: Vec<String> = state
            .agents
            .iter()
            .filter(|(_, (_, active))| *active)
            .map(|(number, _)| number.clone())
            .collect();
        numbers.sort();
        Ok(numbers)
    }

    async fn read_call_status(&self, linked_id: &str) -> DbResult<CallStatus> {
        let mut state = self.state.lock();
        state.check_available()?;
        Ok(state.call_mut(linked_id)?.status.clone())
    }

    async fn open_call(&self, call: &NewCall) -> DbResult<()> {
        let mut state = self.state.lock();
        state.check_available()?;
        let now = Utc::now();

        state.next_id += 1;
        let id = state.next_id;
        state.calls.push(StoredCall {
            id,
            linked_id: call.linked_id.clone(),
            phone: call.caller_number.clone(),
            status: CallStatus::Ringing,
            agent_id: call.agent_id,
            trunk: call.channel_client.clone(),
            campaign_id: call.campaign_id,
            entered_queue_at: now,
            started_at: None,
            ended_at: None,
            wait_seconds: 0,
            duration_seconds: 0,
            transfer: None,
        });
        state.current_calls.push(StoredCurrentCall {
            call_id: id,
            linked_id: call.linked_id.clone(),
            queue: call.queue.clone(),
            agent_number: call.caller_number.clone(),
            event: CurrentCallEvent::Dialing,
            channel: call.channel.clone(),
            channel_client: call.channel_client.clone(),
            hold: false,
            started_at: now,
        });
        state.journal.push(StoreOp::InsertCall(call.linked_id.clone()));
        state
            .journal
            .push(StoreOp::InsertCurrentCall(call.linked_id.clone()));
        Ok(())
    }

    async fn start_call(&self, linked_id: &str) -> DbResult<()> {
        let mut state = self.state.lock();
        state.check_available()?;
        let now = Utc::now();

        let call = state.call_mut(linked_id)?;
        call.status = CallStatus::Active;
        call.started_at = Some(now);
        call.wait_seconds = (now - call.entered_queue_at).num_seconds();

        for current in state
            .current_calls
            .iter_mut()
            .filter(|c| c.linked_id == linked_id)
        {
            current.event = CurrentCallEvent::Link;
        }
        state.journal.push(StoreOp::UpdateCallStatus(
            linked_id.to_string(),
            CallStatus::Active,
        ));
        state.journal.push(StoreOp::UpdateCurrentCall(
            linked_id.to_string(),
            CurrentCallEvent::Link,
        ));
        Ok(())
    }

    async fn resume_transferred_call(&self, leg: &TransferLeg) -> DbResult<()> {
        let mut state = self.state.lock();
        state.check_available()?;
        let now = Utc::now();

        let call = state.call_mut(&leg.linked_id)?;
        call.status = CallStatus::Active;
        call.transfer = Some(leg.transfer.clone());
        let (call_id, phone) = (call.id, call.phone.clone());

        state.current_calls.push(StoredCurrentCall {
            call_id,
            linked_id: leg.linked_id.clone(),
            queue: leg.queue.clone(),
            agent_number: phone,
            event: CurrentCallEvent::Dialing,
            channel: leg.channel.clone(),
            channel_client: leg.channel_client.clone(),
            hold: false,
            started_at: now,
        });
        state.journal.push(StoreOp::UpdateCallStatus(
            leg.linked_id.clone(),
            CallStatus::Active,
        ));
        state
            .journal
            .push(StoreOp::InsertCurrentCall(leg.linked_id.clone()));
        Ok(())
    }

    async fn end_call(&self, linked_id: &str) -> DbResult<CallOutcome> {
        let mut state = self.state.lock();
        state.check_available()?;
        let now = Utc::now();

        let call = state.call_mut(linked_id)?;
        // same guard as the SQL: only open or transferred calls are closed
        let closable =
            call.ended_at.is_none() || call.transfer.as_deref().is_some_and(|t| !t.is_empty());
        let outcome = match call.status.clone() {
            CallStatus::Active => {
                if closable {
                    call.status = CallStatus::Finalized;
                    call.ended_at = Some(now);
                    let start = call.started_at.unwrap_or(call.entered_queue_at);
                    call.duration_seconds = (now - start).num_seconds();
                }
                CallOutcome::Finalized
            }
            CallStatus::Ringing => {
                if closable {
                    call.status = CallStatus::Unanswered;
                    call.ended_at = Some(now);
                    call.wait_seconds = (now - call.entered_queue_at).num_seconds();
                    call.duration_seconds = call.wait_seconds;
                }
                CallOutcome::Unanswered
            }
            other => CallOutcome::Unchanged(other),
        };

        match &outcome {
            CallOutcome::Finalized => state.journal.push(StoreOp::UpdateCallStatus(
                linked_id.to_string(),
                CallStatus::Finalized,
            )),
            CallOutcome::Unanswered => state.journal.push(StoreOp::UpdateCallStatus(
                linked_id.to_string(),
                CallStatus::Unanswered,
            )),
            CallOutcome::Unchanged(_) => {}
        }

        state.current_calls.retain(|c| c.linked_id != linked_id);
        state
            .journal
            .push(StoreOp::DeleteCurrentCall(linked_id.to_string()));
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_call(linked_id: &str) -> NewCall {
        NewCall {
            linked_id: linked_id.to_string(),
            caller_number: "8001".to_string(),
            agent_id: 7,
            channel: "SIP/8001-00000001".to_string(),
            channel_client: "-".to_string(),
            queue: "8000".to_string(),
            campaign_id: 1,
        }
    }

    #[tokio::test]
    async fn test_agent_lookup_ignores_inactive_agents() {
        let store = MemoryCallStore::new().with_agent("8001", 7);
        store.add_agent("8002", 8, false);

        assert_eq!(store.lookup_active_agent_id("8001").await.unwrap(), Some(7));
        assert_eq!(store.lookup_active_agent_id("8002").await.unwrap(), None);
        assert_eq!(store.lookup_active_agent_id("9999").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_active_agent_numbers_are_sorted() {
        let store = MemoryCallStore::new().with_agent("8003", 3).with_agent("8001", 1);
        store.add_agent("8002", 2, false);

        assert_eq!(store.active_agent_numbers().await.unwrap(), vec!["8001", "8003"]);
    }

    #[tokio::test]
    async fn test_open_then_end_ringing_call() {
        let store = MemoryCallStore::new();
        store.open_call(&new_call("1.1")).await.unwrap();
        store.age_call("1.1", 12);

        let outcome = store.end_call("1.1").await.unwrap();
        assert_eq!(outcome, CallOutcome::Unanswered);

        let call = store.call("1.1").unwrap();
        assert_eq!(call.status, CallStatus::Unanswered);
        assert!(call.wait_seconds >= 12);
        assert_eq!(call.duration_seconds, call.wait_seconds);
        assert!(store.current_calls().is_empty());
    }

    #[tokio::test]
    async fn test_finalized_call_keeps_talk_time() {
        let store = MemoryCallStore::new();
        store.open_call(&new_call("1.1")).await.unwrap();
        store.start_call("1.1").await.unwrap();
        store.age_call("1.1", 30);

        assert_eq!(store.end_call("1.1").await.unwrap(), CallOutcome::Finalized);
        let call = store.call("1.1").unwrap();
        assert_eq!(call.status, CallStatus::Finalized);
        assert!(call.duration_seconds >= 30);
    }

    #[tokio::test]
    async fn test_missing_call_is_not_found() {
        let store = MemoryCallStore::new();
        assert!(matches!(
            store.read_call_status("nope").await,
            Err(DatabaseError::NotFound(_))
        ));
        assert!(matches!(
            store.end_call("nope").await,
            Err(DatabaseError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unavailable_store_rejects_everything() {
        let store = MemoryCallStore::new().with_agent("8001", 7);
        store.set_unavailable(true);
        assert!(store.lookup_active_agent_id("8001").await.is_err());
        assert!(store.open_call(&new_call("1.1")).await.is_err());
        assert!(store.calls().is_empty());
        assert!(store.journal().is_empty());
    }
}
