//! # Action/Response Correlator
//!
//! Synchronous PBX queries. Every query follows the same send-and-await
//! pattern:
//!
//! 1. open a fresh manager session (sessions are never reused),
//! 2. send one action carrying a freshly generated action id,
//! 3. race incoming messages against a per-operation deadline and the
//!    session's fault channel,
//! 4. close the session, whatever the outcome.
//!
//! The operations themselves live in [`hangup`], [`extension`] and
//! [`queue`]; they only differ in how they judge incoming messages.
//! [`report`] combines the last two into a per-agent view.
//!
//! ```no_run
//! use callcenter_engine::config::CallCenterAmiConfig;
//! use callcenter_engine::correlator::ActionCorrelator;
//!
//! # async fn example() -> callcenter_engine::Result<()> {
//! let config = CallCenterAmiConfig::load(None)?;
//! let correlator = ActionCorrelator::new(&config.ami, config.actions.clone());
//!
//! let state = correlator.extension_status("8001").await?;
//! println!("{} is {}", state.extension, state.status);
//! # Ok(())
//! # }
//! ```

pub mod extension;
pub mod hangup;
pub mod queue;
pub mod report;

use std::time::Duration;

use ami_transport::{Action, AmiClient, AmiMessage, ConnectOptions};
use tracing::{debug, warn};

use crate::config::{ActionConfig, AmiConfig};
use crate::error::{CallCenterError, Result};

pub use extension::{ExtensionState, ExtensionStatus};
pub use hangup::hangup_channel_pattern;
pub use queue::{DeviceState, QueueMember};
pub use report::ExtensionReport;

/// How a single received message affects a pending query
#[derive(Debug)]
pub(crate) enum Verdict<T> {
    /// Not relevant, keep waiting
    Pending,
    /// The query succeeded
    Done(T),
    /// The PBX refused the action
    Failed(CallCenterError),
}

/// Deadline and user-facing messages for one wait
#[derive(Debug, Clone, Copy)]
pub(crate) struct Expectation<'a> {
    pub deadline: Duration,
    pub timeout_message: &'a str,
    /// Replaces the transport error text when set
    pub fault_message: Option<&'a str>,
}

/// Runs synchronous queries against the PBX, one session per query
#[derive(Debug, Clone)]
pub struct ActionCorrelator {
    options: ConnectOptions,
    actions: ActionConfig,
}

impl ActionCorrelator {
    pub fn new(ami: &AmiConfig, actions: ActionConfig) -> Self {
        Self::from_options(ami.connect_options(), actions)
    }

    pub fn from_options(options: ConnectOptions, actions: ActionConfig) -> Self {
        Self { options, actions }
    }

    pub fn actions(&self) -> &ActionConfig {
        &self.actions
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Open a session, send `action`, wait for `judge` to decide, close the session
    pub(crate) async fn execute<T, F>(
        &self,
        action: Action,
        events: bool,
        expectation: Expectation<'_>,
        judge: F,
    ) -> Result<T>
    where
        F: FnMut(&AmiMessage) -> Verdict<T>,
    {
        let options = self.options.clone().with_events(events);
        let mut client = AmiClient::connect(&options).await?;

        let result = match client.send(&action).await {
            Ok(()) => await_verdict(&mut client, expectation, judge).await,
            Err(e) => {
                warn!("Failed to send {} to {}: {}", action.name(), options.address, e);
                Err(fault_error(&expectation, e))
            }
        };

        if let Err(e) = client.close().await {
            debug!("Closing AMI session after {} failed: {}", action.name(), e);
        }
        result
    }
}

/// Race messages against the deadline and the fault channel
pub(crate) async fn await_verdict<T, F>(
    client: &mut AmiClient,
    expectation: Expectation<'_>,
    mut judge: F,
) -> Result<T>
where
    F: FnMut(&AmiMessage) -> Verdict<T>,
{
    let deadline = tokio::time::sleep(expectation.deadline);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            _ = &mut deadline => {
                return Err(CallCenterError::timeout(expectation.timeout_message));
            }
            received = client.next_message() => match received {
                Ok(message) => match judge(&message) {
                    Verdict::Pending => continue,
                    Verdict::Done(value) => return Ok(value),
                    Verdict::Failed(e) => return Err(e),
                },
                Err(e) => {
                    warn!("AMI session to {} failed while waiting: {}", client.address(), e);
                    return Err(fault_error(&expectation, e));
                }
            },
        }
    }
}

fn fault_error(expectation: &Expectation<'_>, error: ami_transport::Error) -> CallCenterError {
    match expectation.fault_message {
        Some(message) => CallCenterError::transport(message),
        None => CallCenterError::transport(error.to_string()),
    }
}

/// `Response: Error` addressed to our action, as a protocol failure
pub(crate) fn refused(message: &AmiMessage, action_id: &str) -> Option<CallCenterError> {
    if message.is_response()
        && message.correlates_to(action_id)
        && message.response().eq_ignore_ascii_case("Error")
    {
        let reason = match message.field("Message") {
            "" => "the PBX rejected the action",
            text => text,
        };
        return Some(CallCenterError::protocol(reason));
    }
    None
}
