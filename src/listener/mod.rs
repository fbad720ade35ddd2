//! Per-account balance listener
//!
//! One [`BalanceListener`] per watched brokerage account. It owns the venue
//! connection, drives the authenticate, switch, subscribe handshake in order,
//! and streams confirmed balance updates to a [`BalanceHandler`].

pub mod machine;
mod manager;
pub mod queue;
mod transport;

pub use machine::{Action, ListenerEvent, ListenerMachine};
pub use manager::BalanceListener;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::BalanceFeedError;
use crate::protocol::BalanceEvent;

/// Connection lifecycle states reported on the status channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Closed by the caller; nothing running
    Idle,
    /// Dialing the venue
    Connecting,
    /// Subscription confirmed; updates flowing
    Connected,
    /// Waiting out the delay before another dial
    Reconnecting,
    /// No connection and no retry pending
    Disconnected,
    /// A fatal protocol failure was recorded
    Error,
}

/// Confirmed balance update for the watched account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceUpdate {
    pub account_id: String,
    pub balance: Decimal,
    pub currency: String,
    /// Venue-reported time of the balance, when provided
    pub as_of: Option<DateTime<Utc>>,
}

impl From<BalanceEvent> for BalanceUpdate {
    fn from(event: BalanceEvent) -> Self {
        let as_of = event.as_of();
        Self {
            account_id: event.account_id,
            balance: event.balance,
            currency: event.currency,
            as_of,
        }
    }
}

/// Raw closure metadata for callers that track transport behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseInfo {
    pub code: Option<u16>,
    pub reason: Option<String>,
    /// True only for a closure this instance requested
    pub clean: bool,
}

/// Caller notification channels.
///
/// All channels are advisory: the listener's own state decides whether it
/// reconnects. Implementations are invoked on the listener task and must
/// not block.
pub trait BalanceHandler: Send + Sync {
    /// Confirmed balance update for the watched account
    fn on_balance(&self, update: &BalanceUpdate);

    /// Errors, fatal and recoverable alike
    fn on_error(&self, error: &BalanceFeedError);

    /// Lifecycle transition, with an optional human-readable detail
    fn on_status(&self, status: ConnectionState, detail: Option<&str>);

    /// Raw closure metadata; most callers only need `on_status`
    fn on_close(&self, info: &CloseInfo) {
        let _ = info;
    }
}
