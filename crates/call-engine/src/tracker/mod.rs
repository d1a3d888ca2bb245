//! # Call Lifecycle Tracker
//!
//! A single consumer of the manager event stream that follows calls of
//! interest from their first channel to their end and mirrors each step into
//! the [`CallStore`].
//!
//! ## State machine
//!
//! | Event | Guard | Effect |
//! |---|---|---|
//! | `Newchannel` | not tracked, originating leg, caller matches | look up agent, open call, mark tracked |
//! | `Hangup` | not the maintenance context, tracked, not active, caller matches | end call, drop entry |
//! | `BridgeEnter` | not the originating leg, tracked or recently ended | start call, or resume it as a transfer; mark active |
//! | `BridgeLeave` | not the originating leg, active | end call, drop entry |
//!
//! The originating leg is the one whose `Uniqueid` equals its `Linkedid`.
//! Events for one linked id are assumed to arrive in causal order; a bridge
//! event that contradicts the table (entering while active, leaving while
//! only tracked) is logged and dropped.
//!
//! Persistence failures never stop the loop. A `Newchannel` marks the call
//! tracked only once its rows are stored, so a failed or panicking insert
//! leaves nothing behind and a later event can try again. On `Hangup` and
//! `BridgeLeave` failures release the flags when
//! [`TrackerConfig::release_on_failure`] is set.
//!
//! ## Example
//!
//! ```
//! use ami_transport::AmiMessage;
//! use callcenter_engine::config::TrackerConfig;
//! use callcenter_engine::database::MemoryCallStore;
//! use callcenter_engine::tracker::{CallTracker, StepOutcome};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let store = MemoryCallStore::new().with_agent("8001", 7);
//! let mut tracker =
//!     CallTracker::new(store, TrackerConfig::default(), Duration::from_secs(1)).unwrap();
//!
//! let newchannel = AmiMessage::from_fields(vec![
//!     ("Event".into(), "Newchannel".into()),
//!     ("CallerIDNum".into(), "8001".into()),
//!     ("Uniqueid".into(), "1700000000.1".into()),
//!     ("Linkedid".into(), "1700000000.1".into()),
//! ]);
//! assert_eq!(tracker.process(&newchannel).await.unwrap(), StepOutcome::Opened);
//! assert!(tracker.calls().is_tracked("1700000000.1"));
//! # })
//! ```

pub mod events;
pub mod state;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use ami_transport::{AmiClient, AmiMessage, ConnectOptions};
use futures::FutureExt;
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::config::TrackerConfig;
use crate::database::{CallOutcome, CallStore, DatabaseError, DbResult, NewCall, TransferLeg};
use crate::error::{CallCenterError, Result};

pub use events::{ChannelEvent, ChannelEventKind};
pub use state::{CallTable, TrackedCall};

/// What processing one message did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Not a channel event the tracker handles
    Ignored,
    /// A guard did not hold; nothing changed
    Skipped,
    /// The event contradicts the known call state and was dropped
    OutOfOrder,
    /// The caller has no active agent row; nothing persisted
    NoAgent,
    /// Call and current-call rows created
    Opened,
    /// First bridge: the call is now Active
    Started,
    /// An ended call was bridged again
    Transferred,
    /// The call was closed
    Ended(CallOutcome),
    /// The store failed; flags were handled per policy
    Failed,
}

/// Follows calls through the manager event stream
pub struct CallTracker<S: CallStore> {
    store: S,
    config: TrackerConfig,
    caller_pattern: Regex,
    statement_timeout: Duration,
    calls: CallTable,
}

impl<S: CallStore> CallTracker<S> {
    pub fn new(store: S, config: TrackerConfig, statement_timeout: Duration) -> Result<Self> {
        let caller_pattern = config.caller_regex()?;
        let calls = CallTable::new(config.ended_retention);
        Ok(Self {
            store,
            config,
            caller_pattern,
            statement_timeout,
            calls,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Tracking flags by linked id
    pub fn calls(&self) -> &CallTable {
        &self.calls
    }

    /// Connect, then consume events until the session fails
    ///
    /// Always returns an error: either the connection could not be made or
    /// the transport failed after login.
    pub async fn serve(&mut self, options: &ConnectOptions) -> Result<()> {
        let mut client = AmiClient::connect(options).await?;
        info!("Starting AMI events service on {}", options.address);

        let result = self.run(&mut client).await;
        if let Err(e) = client.close().await {
            debug!("Closing AMI events session failed: {}", e);
        }
        result
    }

    /// Keep serving across transport failures until `shutdown` resolves
    ///
    /// The call table survives reconnects.
    pub async fn supervise<F>(&mut self, options: &ConnectOptions, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let restart_delay = self.config.restart_delay();

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("AMI events service shutting down");
                    return Ok(());
                }
                result = self.serve(options) => {
                    if let Err(e) = result {
                        error!("AMI events service stopped: {}", e);
                    }
                }
            }

            info!(
                "Restarting AMI events service in {}s ({} calls tracked)",
                restart_delay.as_secs(),
                self.calls.len()
            );
            tokio::select! {
                _ = &mut shutdown => {
                    info!("AMI events service shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(restart_delay) => {}
            }
        }
    }

    /// Consume every message of a logged-in session
    ///
    /// Handler errors and panics are logged per message; only a transport
    /// failure ends the loop, and it is returned as
    /// [`CallCenterError::TransportFatal`].
    pub async fn run(&mut self, client: &mut AmiClient) -> Result<()> {
        loop {
            let message = match client.next_message().await {
                Ok(message) => message,
                Err(e) => {
                    error!("error on ami: {}", e);
                    return Err(CallCenterError::transport(format!(
                        "AMI events stream ended: {}",
                        e
                    )));
                }
            };

            match AssertUnwindSafe(self.process(&message)).catch_unwind().await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("Dropped message: {}", e),
                Err(_) => error!(
                    "Panic while processing {} event, continuing",
                    message.event_name()
                ),
            }
        }
    }

    /// Apply one message to the state machine
    ///
    /// Only malformed channel events are errors; store failures are logged
    /// and reported as [`StepOutcome::Failed`].
    pub async fn process(&mut self, message: &AmiMessage) -> Result<StepOutcome> {
        let Some(event) = ChannelEvent::parse(message)? else {
            return Ok(StepOutcome::Ignored);
        };

        let outcome = match event.kind {
            ChannelEventKind::Newchannel => self.on_newchannel(&event).await,
            ChannelEventKind::Hangup => self.on_hangup(&event).await,
            ChannelEventKind::BridgeEnter => self.on_bridge_enter(&event).await,
            ChannelEventKind::BridgeLeave => self.on_bridge_leave(&event).await,
        };
        Ok(outcome)
    }

    async fn on_newchannel(&mut self, event: &ChannelEvent) -> StepOutcome {
        let linked_id = event.linked_id.as_str();
        if self.calls.is_tracked(linked_id) || !event.is_originating_leg() {
            return StepOutcome::Skipped;
        }
        if !self.caller_pattern.is_match(&event.caller_number) {
            return StepOutcome::Skipped;
        }

        info!(
            linked_id = %linked_id,
            caller = %event.caller_number,
            channel = %event.channel,
            "new event [newchannel]"
        );
        self.calls.forget_ended(linked_id);

        let agent_id = match self
            .bounded(self.store.lookup_active_agent_id(&event.caller_number))
            .await
        {
            Ok(Some(agent_id)) => agent_id,
            Ok(None) => {
                warn!(
                    linked_id = %linked_id,
                    caller = %event.caller_number,
                    "No active agent for caller, call not recorded"
                );
                return StepOutcome::NoAgent;
            }
            Err(e) => {
                error!(linked_id = %linked_id, event = "Newchannel", "Failed to retrieve agent ID: {}", e);
                return StepOutcome::Failed;
            }
        };

        let channel_client = if event.context == self.config.internal_context {
            event.exten.clone()
        } else {
            "-".to_string()
        };
        let call = NewCall {
            linked_id: linked_id.to_string(),
            caller_number: event.caller_number.clone(),
            agent_id,
            channel: event.channel.clone(),
            channel_client,
            queue: self.config.queue.clone(),
            campaign_id: self.config.campaign_id,
        };

        match self.bounded(self.store.open_call(&call)).await {
            Ok(()) => {
                self.calls.mark_tracked(linked_id);
                StepOutcome::Opened
            }
            Err(e) => {
                error!(linked_id = %linked_id, event = "Newchannel", "Failed to insert call: {}", e);
                StepOutcome::Failed
            }
        }
    }

    async fn on_hangup(&mut self, event: &ChannelEvent) -> StepOutcome {
        let linked_id = event.linked_id.as_str();
        let flags = self.calls.get(linked_id);
        if event.context == self.config.maintenance_context || !flags.tracked || flags.active {
            return StepOutcome::Skipped;
        }
        if !self.caller_pattern.is_match(&event.caller_number) {
            return StepOutcome::Skipped;
        }

        info!(linked_id = %linked_id, unique_id = %event.unique_id, "new event [hangup]");
        self.end_call(event).await
    }

    async fn on_bridge_enter(&mut self, event: &ChannelEvent) -> StepOutcome {
        let linked_id = event.linked_id.as_str();
        if event.is_originating_leg() {
            return StepOutcome::Skipped;
        }
        let flags = self.calls.get(linked_id);
        let recently_ended = self.calls.was_ended(linked_id);
        if !flags.tracked && !recently_ended {
            return StepOutcome::Skipped;
        }
        if flags.active {
            warn!(
                linked_id = %linked_id,
                unique_id = %event.unique_id,
                "BridgeEnter for a call already bridged, dropping"
            );
            return StepOutcome::OutOfOrder;
        }

        let status = match self.bounded(self.store.read_call_status(linked_id)).await {
            Ok(status) => status,
            Err(e) => {
                error!(linked_id = %linked_id, event = "BridgeEnter", "Failed to read status of call: {}", e);
                return StepOutcome::Failed;
            }
        };

        if status.is_ended() {
            info!(
                linked_id = %linked_id,
                unique_id = %event.unique_id,
                transfer = %event.caller_number,
                "new event [bridgeenter] transfer of ended call"
            );
            let leg = TransferLeg {
                linked_id: linked_id.to_string(),
                transfer: event.caller_number.clone(),
                channel: event.channel.clone(),
                channel_client: event.connected_line_number.clone(),
                queue: self.config.queue.clone(),
            };
            return match self.bounded(self.store.resume_transferred_call(&leg)).await {
                Ok(()) => {
                    self.calls.forget_ended(linked_id);
                    self.calls.mark_active(linked_id);
                    StepOutcome::Transferred
                }
                Err(e) => {
                    error!(linked_id = %linked_id, event = "BridgeEnter", "Failed to resume transferred call: {}", e);
                    StepOutcome::Failed
                }
            };
        }

        if !flags.tracked {
            // remembered as ended but the store still has it open
            debug!(linked_id = %linked_id, status = %status, "Ignoring bridge on untracked call");
            return StepOutcome::Skipped;
        }

        info!(linked_id = %linked_id, unique_id = %event.unique_id, "new event [bridgeenter]");
        match self.bounded(self.store.start_call(linked_id)).await {
            Ok(()) => {
                self.calls.mark_active(linked_id);
                StepOutcome::Started
            }
            Err(e) => {
                error!(linked_id = %linked_id, event = "BridgeEnter", "Failed to start call: {}", e);
                StepOutcome::Failed
            }
        }
    }

    async fn on_bridge_leave(&mut self, event: &ChannelEvent) -> StepOutcome {
        let linked_id = event.linked_id.as_str();
        if event.is_originating_leg() {
            return StepOutcome::Skipped;
        }
        let flags = self.calls.get(linked_id);
        if !flags.active {
            if flags.tracked {
                warn!(
                    linked_id = %linked_id,
                    unique_id = %event.unique_id,
                    "BridgeLeave for a call that never bridged, dropping"
                );
                return StepOutcome::OutOfOrder;
            }
            return StepOutcome::Skipped;
        }

        info!(linked_id = %linked_id, unique_id = %event.unique_id, "new event [bridgeleave]");
        self.end_call(event).await
    }

    // Shared terminal step of Hangup and BridgeLeave
    async fn end_call(&mut self, event: &ChannelEvent) -> StepOutcome {
        let linked_id = event.linked_id.as_str();
        match self.bounded(self.store.end_call(linked_id)).await {
            Ok(outcome) => {
                info!(linked_id = %linked_id, outcome = ?outcome, "Call ended");
                self.calls.release(linked_id);
                self.calls.remember_ended(linked_id);
                StepOutcome::Ended(outcome)
            }
            Err(e) => {
                error!(linked_id = %linked_id, event = %event.kind, "Failed to end call: {}", e);
                if self.config.release_on_failure {
                    match event.kind {
                        ChannelEventKind::BridgeLeave => self.calls.release(linked_id),
                        _ => self.calls.clear_tracked(linked_id),
                    }
                }
                StepOutcome::Failed
            }
        }
    }

    // Store calls carry the per-statement deadline
    async fn bounded<T>(&self, operation: impl Future<Output = DbResult<T>>) -> DbResult<T> {
        match tokio::time::timeout(self.statement_timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(DatabaseError::Timeout(
                self.statement_timeout.as_millis() as u64,
            )),
        }
    }
}
